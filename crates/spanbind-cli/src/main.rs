//! spanbind CLI - Command-line interface
//!
//! Usage:
//!   spanbind bind <input> --responses <file> [--format auto|json|compact] [-o out]
//!   spanbind eval <gold> <pred> [--run-id id] [--out-dir dir] [--require-text-match]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use spanbind_core::{load_dataset, save_dataset, AppConfig, Document, LoggingConfig};
use spanbind_extractor::{
    BatchRunner, EvaluationReport, Evaluator, ExtractionPipeline, RecordedResponses, ResponseFormat,
};

#[derive(Parser)]
#[command(name = "spanbind")]
#[command(about = "Bind LLM entity mentions to exact spans and evaluate NER quality")]
#[command(version)]
struct Cli {
    /// TOML configuration file; environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bind recorded model responses to spans in a dataset
    Bind {
        /// Dataset with the documents to bind
        input: PathBuf,
        /// JSON object of raw model responses keyed by document id
        #[arg(long)]
        responses: PathBuf,
        /// Response format
        #[arg(long, default_value = "auto")]
        format: ResponseFormat,
        /// Output dataset with predicted entities
        #[arg(short, long, default_value = "predictions.json")]
        output: PathBuf,
        /// Write dropped mentions to this JSON file
        #[arg(long)]
        issues: Option<PathBuf>,
    },
    /// Evaluate predictions against a gold dataset
    Eval {
        /// Gold dataset
        gold: PathBuf,
        /// Predicted dataset
        pred: PathBuf,
        /// Run identifier written into the reports
        #[arg(long)]
        run_id: Option<String>,
        /// Directory for the CSV and JSON reports
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Require the surface text to match in exact mode
        #[arg(long)]
        require_text_match: bool,
    },
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(config: &LoggingConfig) {
    let level = &config.level;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!("spanbind={level},spanbind_core={level},spanbind_extractor={level}").into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(config.include_location)
        .with_line_number(config.include_location);

    if config.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn run_bind(
    config: &AppConfig,
    input: PathBuf,
    responses: PathBuf,
    format: ResponseFormat,
    output: PathBuf,
    issues_path: Option<PathBuf>,
) -> anyhow::Result<()> {
    let documents: Vec<Document> = load_dataset(&input)
        .with_context(|| format!("Failed to load dataset {}", input.display()))?
        .iter()
        .map(|record| record.document())
        .collect();

    let source = RecordedResponses::from_file(&responses)
        .with_context(|| format!("Failed to load responses {}", responses.display()))?;
    info!(documents = documents.len(), responses = source.len(), "Inputs loaded");

    let pipeline = ExtractionPipeline::new(&config.locator, format);
    let runner = BatchRunner::new(pipeline, &config.batch);
    let outcome = runner.run(documents, Arc::new(source)).await;

    save_dataset(&output, &outcome.records)
        .with_context(|| format!("Failed to write {}", output.display()))?;

    if let Some(path) = issues_path {
        let json = serde_json::to_string_pretty(&outcome.issues)?;
        std::fs::write(&path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }

    println!(
        "Bound {} entities in {} documents -> {}",
        outcome.entity_count(),
        outcome.records.len(),
        output.display()
    );
    for (kind, count) in outcome.issue_counts() {
        println!("  dropped {kind}: {count}");
    }

    Ok(())
}

fn run_eval(
    config: &AppConfig,
    gold: PathBuf,
    pred: PathBuf,
    out_dir: PathBuf,
) -> anyhow::Result<()> {
    let gold = load_dataset(&gold)
        .with_context(|| format!("Failed to load gold dataset {}", gold.display()))?;
    let pred = load_dataset(&pred)
        .with_context(|| format!("Failed to load predictions {}", pred.display()))?;

    let evaluation = Evaluator::new()
        .with_text_matching(config.eval.require_text_match)
        .evaluate(&gold, &pred);
    let report = EvaluationReport::from_evaluation(&config.eval.run_id, &evaluation);

    let written = report
        .write_to_dir(&out_dir)
        .with_context(|| format!("Failed to write reports to {}", out_dir.display()))?;

    print!("{}", report.summary());
    for path in written {
        println!("  wrote {}", path.display());
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut config = load_config(cli.config.as_ref())?;
    init_tracing(&config.logging);

    match cli.command {
        Commands::Bind {
            input,
            responses,
            format,
            output,
            issues,
        } => run_bind(&config, input, responses, format, output, issues).await?,
        Commands::Eval {
            gold,
            pred,
            run_id,
            out_dir,
            require_text_match,
        } => {
            if let Some(run_id) = run_id {
                config.eval.run_id = run_id;
            }
            config.eval.require_text_match |= require_text_match;
            config.validate()?;
            run_eval(&config, gold, pred, out_dir)?;
        }
    }

    Ok(())
}
