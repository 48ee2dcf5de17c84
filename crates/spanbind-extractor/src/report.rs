//! Evaluation reports
//!
//! Flattens an `Evaluation` into overview, per-label and per-document rows
//! and renders them as CSV files plus a JSON document.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use spanbind_core::{EntityLabel, Result, SpanbindError};

use crate::metrics::{Evaluation, MatchCounts, MatchMode};

/// One row per match mode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverviewRow {
    pub run_id: String,
    pub eval_type: MatchMode,
    pub total_gold: usize,
    pub total_predicted: usize,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// F1 per label; only filled for exact matching
    pub label_f1: BTreeMap<String, f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelRow {
    pub run_id: String,
    pub label: String,
    pub true_positives: usize,
    pub false_positives: usize,
    pub false_negatives: usize,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedRow {
    pub run_id: String,
    pub doc_id: String,
    pub gold_count: usize,
    pub predicted_count: usize,
    /// Exact-match true positives
    pub true_positives: usize,
    pub span_true_positives: usize,
    pub notes: String,
}

/// Complete report for one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub overview: Vec<OverviewRow>,
    pub labels: Vec<LabelRow>,
    pub detailed: Vec<DetailedRow>,
}

impl EvaluationReport {
    pub fn from_evaluation(run_id: impl Into<String>, evaluation: &Evaluation) -> Self {
        let run_id = run_id.into();

        let overview = MatchMode::ALL
            .into_iter()
            .map(|mode| {
                let counts = evaluation.counts(mode);
                let label_f1 = match mode {
                    MatchMode::SpanOnly => BTreeMap::new(),
                    MatchMode::Exact => evaluation
                        .per_label
                        .iter()
                        .map(|(label, c)| (label.clone(), c.f1_score()))
                        .collect(),
                };
                OverviewRow {
                    run_id: run_id.clone(),
                    eval_type: mode,
                    total_gold: counts.gold_total,
                    total_predicted: counts.predicted_total,
                    true_positives: counts.true_positives,
                    false_positives: counts.false_positives,
                    false_negatives: counts.false_negatives,
                    precision: counts.precision(),
                    recall: counts.recall(),
                    f1: counts.f1_score(),
                    label_f1,
                }
            })
            .collect();

        let labels = evaluation
            .per_label
            .iter()
            .map(|(label, c)| label_row(&run_id, label, c))
            .collect();

        let detailed = evaluation
            .documents
            .iter()
            .map(|d| DetailedRow {
                run_id: run_id.clone(),
                doc_id: d.doc_id.clone(),
                gold_count: d.gold_count,
                predicted_count: d.predicted_count,
                true_positives: d.exact.true_positives,
                span_true_positives: d.span_only.true_positives,
                notes: d.notes.join("; "),
            })
            .collect();

        Self {
            run_id,
            generated_at: Utc::now(),
            overview,
            labels,
            detailed,
        }
    }

    /// Label columns of the overview: the known labels in prompt order,
    /// then any other label seen, sorted
    pub fn label_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = EntityLabel::ALL
            .iter()
            .map(|l| l.as_str().to_string())
            .collect();
        let extra: BTreeSet<&String> = self
            .overview
            .iter()
            .flat_map(|row| row.label_f1.keys())
            .filter(|label| EntityLabel::ALL.iter().all(|l| l.as_str() != label.as_str()))
            .collect();
        columns.extend(extra.into_iter().cloned());
        columns
    }

    pub fn overview_csv(&self) -> String {
        let columns = self.label_columns();
        let mut header = vec![
            "run_id".to_string(),
            "eval_type".to_string(),
            "total_gold".to_string(),
            "total_predicted".to_string(),
            "true_positives".to_string(),
            "false_positives".to_string(),
            "false_negatives".to_string(),
            "precision".to_string(),
            "recall".to_string(),
            "f1".to_string(),
        ];
        header.extend(columns.iter().map(|label| format!("{label}_f1")));

        let mut out = csv_line(&header);
        for row in &self.overview {
            let mut fields = vec![
                row.run_id.clone(),
                row.eval_type.to_string(),
                row.total_gold.to_string(),
                row.total_predicted.to_string(),
                row.true_positives.to_string(),
                row.false_positives.to_string(),
                row.false_negatives.to_string(),
                score(row.precision),
                score(row.recall),
                score(row.f1),
            ];
            fields.extend(columns.iter().map(|label| match row.eval_type {
                MatchMode::SpanOnly => String::new(),
                MatchMode::Exact => score(row.label_f1.get(label).copied().unwrap_or(0.0)),
            }));
            out.push_str(&csv_line(&fields));
        }
        out
    }

    pub fn labels_csv(&self) -> String {
        let mut out = csv_line(&[
            "run_id",
            "label",
            "true_positives",
            "false_positives",
            "false_negatives",
            "precision",
            "recall",
            "f1",
        ]);
        for row in &self.labels {
            out.push_str(&csv_line(&[
                row.run_id.clone(),
                row.label.clone(),
                row.true_positives.to_string(),
                row.false_positives.to_string(),
                row.false_negatives.to_string(),
                score(row.precision),
                score(row.recall),
                score(row.f1),
            ]));
        }
        out
    }

    pub fn detailed_csv(&self) -> String {
        let mut out = csv_line(&[
            "run_id",
            "doc_id",
            "gold_count",
            "predicted_count",
            "true_positives",
            "span_true_positives",
            "notes",
        ]);
        for row in &self.detailed {
            out.push_str(&csv_line(&[
                row.run_id.clone(),
                row.doc_id.clone(),
                row.gold_count.to_string(),
                row.predicted_count.to_string(),
                row.true_positives.to_string(),
                row.span_true_positives.to_string(),
                row.notes.clone(),
            ]));
        }
        out
    }

    /// Short human-readable summary
    pub fn summary(&self) -> String {
        let mut out = format!("Run '{}': {} documents\n", self.run_id, self.detailed.len());
        for row in &self.overview {
            out.push_str(&format!(
                "  {:<10} P {:.3}  R {:.3}  F1 {:.3}  (TP {} / FP {} / FN {})\n",
                row.eval_type.as_str(),
                row.precision,
                row.recall,
                row.f1,
                row.true_positives,
                row.false_positives,
                row.false_negatives
            ));
        }
        for row in &self.labels {
            out.push_str(&format!("  {:<12} F1 {:.3}\n", row.label, row.f1));
        }
        out
    }

    /// Write `overview_<run>.csv`, `labels_<run>.csv`, `detailed_<run>.csv`
    /// and `report_<run>.json` into `dir`, creating it if needed.
    pub fn write_to_dir(&self, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir).map_err(|e| io_error(dir, e))?;

        let json = serde_json::to_string_pretty(self).map_err(|e| SpanbindError::Dataset {
            path: dir.display().to_string(),
            message: e.to_string(),
        })?;

        let files = [
            (format!("overview_{}.csv", self.run_id), self.overview_csv()),
            (format!("labels_{}.csv", self.run_id), self.labels_csv()),
            (format!("detailed_{}.csv", self.run_id), self.detailed_csv()),
            (format!("report_{}.json", self.run_id), json),
        ];

        let mut written = Vec::with_capacity(files.len());
        for (name, content) in files {
            let path = dir.join(name);
            std::fs::write(&path, content).map_err(|e| io_error(&path, e))?;
            written.push(path);
        }

        info!(run_id = %self.run_id, dir = %dir.display(), "Report written");
        Ok(written)
    }
}

fn label_row(run_id: &str, label: &str, c: &MatchCounts) -> LabelRow {
    LabelRow {
        run_id: run_id.to_string(),
        label: label.to_string(),
        true_positives: c.true_positives,
        false_positives: c.false_positives,
        false_negatives: c.false_negatives,
        precision: c.precision(),
        recall: c.recall(),
        f1: c.f1_score(),
    }
}

fn score(value: f64) -> String {
    format!("{value:.4}")
}

fn io_error(path: &Path, source: std::io::Error) -> SpanbindError {
    SpanbindError::Io {
        path: path.display().to_string(),
        source,
    }
}

/// Join fields into one CSV line, quoting where RFC 4180 requires it
fn csv_line<S: AsRef<str>>(fields: &[S]) -> String {
    let mut line = fields
        .iter()
        .map(|f| csv_field(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    line.push('\n');
    line
}

fn csv_field(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Evaluator;
    use spanbind_core::dataset::EntitySpan;
    use spanbind_core::DocumentRecord;

    fn span(label: &str, start: usize, end: usize, text: &str) -> EntitySpan {
        EntitySpan {
            label: label.to_string(),
            start,
            end,
            text: text.to_string(),
        }
    }

    fn report() -> EvaluationReport {
        let text = "Anna, 0701234567";
        let gold = vec![DocumentRecord {
            id: "d1".to_string(),
            language: "sv".to_string(),
            text: text.to_string(),
            entities: vec![span("NAME", 0, 4, "Anna"), span("PHONE", 6, 16, "0701234567")],
        }];
        let pred = vec![DocumentRecord {
            id: "d1".to_string(),
            language: "sv".to_string(),
            text: text.to_string(),
            entities: vec![span("NAME", 0, 4, "Anna"), span("NAME", 6, 16, "0701234567")],
        }];
        let evaluation = Evaluator::new().evaluate(&gold, &pred);
        EvaluationReport::from_evaluation("run,1", &evaluation)
    }

    #[test]
    fn test_overview_rows() {
        let report = report();
        assert_eq!(report.overview.len(), 2);

        let span_row = &report.overview[0];
        assert_eq!(span_row.eval_type, MatchMode::SpanOnly);
        assert_eq!(span_row.true_positives, 2);
        assert!(span_row.label_f1.is_empty());

        let exact_row = &report.overview[1];
        assert_eq!(exact_row.true_positives, 1);
        assert_eq!(exact_row.total_gold, 2);
        assert_eq!(exact_row.label_f1.len(), 2);
    }

    #[test]
    fn test_overview_csv_layout() {
        let csv = report().overview_csv();
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("run_id,eval_type,total_gold"));
        assert!(lines[0].ends_with("NAME_f1,PHONE_f1,ADDRESS_f1,NATIONAL_ID_f1,EMAIL_f1"));
        assert!(lines[1].starts_with("\"run,1\",span-only,2,2,2,0,0,1.0000,1.0000,1.0000,"));
        assert!(lines[2].starts_with("\"run,1\",exact,2,2,1,1,1,0.5000"));
    }

    #[test]
    fn test_detailed_and_label_csv() {
        let report = report();
        let detailed = report.detailed_csv();
        assert_eq!(detailed.lines().nth(1), Some("\"run,1\",d1,2,2,1,2,"));

        let labels = report.labels_csv();
        assert_eq!(labels.lines().count(), 3);
        assert!(labels.contains(",PHONE,0,0,1,"));
    }

    #[test]
    fn test_extra_labels_follow_known_ones() {
        let mut report = report();
        report.overview[1].label_f1.insert("IBAN".to_string(), 0.5);
        let columns = report.label_columns();
        assert_eq!(columns.last().map(String::as_str), Some("IBAN"));
        assert_eq!(columns.len(), 6);
    }

    #[test]
    fn test_csv_quoting() {
        assert_eq!(csv_field("plain"), "plain");
        assert_eq!(csv_field("a,b"), "\"a,b\"");
        assert_eq!(csv_field("say \"hej\""), "\"say \"\"hej\"\"\"");
    }

    #[test]
    fn test_write_to_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("reports");
        let written = report().write_to_dir(&out).unwrap();

        assert_eq!(written.len(), 4);
        assert!(out.join("overview_run,1.csv").exists());

        let json = std::fs::read_to_string(out.join("report_run,1.json")).unwrap();
        let parsed: EvaluationReport = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.detailed.len(), 1);
        assert_eq!(parsed.overview[1].eval_type, MatchMode::Exact);
    }

    #[test]
    fn test_summary_lists_modes() {
        let summary = report().summary();
        assert!(summary.contains("Run 'run,1': 1 documents"));
        assert!(summary.contains("span-only"));
        assert!(summary.contains("exact"));
    }
}
