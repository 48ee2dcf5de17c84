//! Extraction pipeline
//!
//! Runs raw model responses through normalization and binding, one document
//! at a time or as a bounded-concurrency batch.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use spanbind_core::{
    BatchConfig, Document, DocumentRecord, LocatorConfig, MentionSource, Result, SpanbindError,
};

use crate::binder::{BindIssue, EntityBinder, IssueKind};
use crate::payload::{PayloadNormalizer, ResponseFormat};

/// Bound entities and dropped mentions for one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentOutcome {
    pub record: DocumentRecord,
    pub issues: Vec<BindIssue>,
}

/// Normalizer and binder for a single document
#[derive(Debug, Clone, Default)]
pub struct ExtractionPipeline {
    normalizer: PayloadNormalizer,
    binder: EntityBinder,
}

impl ExtractionPipeline {
    pub fn new(config: &LocatorConfig, format: ResponseFormat) -> Self {
        Self {
            normalizer: PayloadNormalizer::new(format),
            binder: EntityBinder::new(config),
        }
    }

    /// Bind the raw response for `document`. A missing response yields a
    /// record without entities and a `MissingResponse` issue.
    pub fn process(&self, document: &Document, raw: Option<&str>) -> DocumentOutcome {
        let Some(raw) = raw else {
            let issue = BindIssue::new(
                &document.id,
                IssueKind::MissingResponse,
                "No model response for document",
            );
            issue.log();
            return DocumentOutcome {
                record: DocumentRecord::from_records(document, &[]),
                issues: vec![issue],
            };
        };

        let parsed = self.normalizer.normalize(document, raw);
        let bound = self.binder.bind(document, &parsed.requests);

        let mut issues = parsed.issues;
        issues.extend(bound.issues);
        for issue in &issues {
            issue.log();
        }

        debug!(
            doc_id = %document.id,
            requests = parsed.requests.len(),
            bound = bound.records.len(),
            dropped = issues.len(),
            "Document processed"
        );

        DocumentOutcome {
            record: DocumentRecord::from_records(document, &bound.records),
            issues,
        }
    }
}

// ============================================================================
// Recorded responses
// ============================================================================

/// Mention source backed by previously recorded model responses
#[derive(Debug, Clone, Default)]
pub struct RecordedResponses {
    responses: BTreeMap<String, String>,
}

impl RecordedResponses {
    pub fn new(responses: BTreeMap<String, String>) -> Self {
        Self { responses }
    }

    /// Load a JSON object mapping document ids to responses.
    ///
    /// String values are taken verbatim; any other JSON value (typically the
    /// entity list itself) is re-serialized.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| SpanbindError::Io {
            path: path.display().to_string(),
            source: e,
        })?;

        let values: BTreeMap<String, serde_json::Value> =
            serde_json::from_str(&content).map_err(|e| SpanbindError::Dataset {
                path: path.display().to_string(),
                message: format!("Expected an object of responses keyed by document id: {e}"),
            })?;

        let responses = values
            .into_iter()
            .map(|(id, value)| match value {
                serde_json::Value::String(raw) => (id, raw),
                other => (id, other.to_string()),
            })
            .collect();

        Ok(Self { responses })
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }
}

#[async_trait]
impl MentionSource for RecordedResponses {
    async fn raw_response(&self, document: &Document) -> Result<Option<String>> {
        Ok(self.responses.get(&document.id).cloned())
    }

    fn name(&self) -> &str {
        "recorded"
    }
}

// ============================================================================
// Batch runner
// ============================================================================

/// Records and issues for a whole batch, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub records: Vec<DocumentRecord>,
    pub issues: Vec<BindIssue>,
}

impl BatchOutcome {
    /// Number of issues per kind
    pub fn issue_counts(&self) -> BTreeMap<IssueKind, usize> {
        let mut counts = BTreeMap::new();
        for issue in &self.issues {
            *counts.entry(issue.kind).or_insert(0) += 1;
        }
        counts
    }

    pub fn entity_count(&self) -> usize {
        self.records.iter().map(|r| r.entities.len()).sum()
    }
}

/// Runs the pipeline over many documents with bounded concurrency
#[derive(Debug, Clone)]
pub struct BatchRunner {
    pipeline: Arc<ExtractionPipeline>,
    concurrency: usize,
}

impl BatchRunner {
    pub fn new(pipeline: ExtractionPipeline, config: &BatchConfig) -> Self {
        Self {
            pipeline: Arc::new(pipeline),
            concurrency: config.concurrency.max(1),
        }
    }

    /// Process every document. Source failures are recorded as issues and
    /// never abort the batch.
    pub async fn run(
        &self,
        documents: Vec<Document>,
        source: Arc<dyn MentionSource>,
    ) -> BatchOutcome {
        info!(
            documents = documents.len(),
            source = source.name(),
            concurrency = self.concurrency,
            "Starting batch"
        );

        let semaphore = Arc::new(Semaphore::new(self.concurrency));

        let futures: Vec<_> = documents
            .into_iter()
            .map(|document| {
                let semaphore = Arc::clone(&semaphore);
                let source = Arc::clone(&source);
                let pipeline = Arc::clone(&self.pipeline);

                async move {
                    // The semaphore is never closed
                    let _permit = semaphore.acquire().await.ok();

                    match source.raw_response(&document).await {
                        Ok(raw) => pipeline.process(&document, raw.as_deref()),
                        Err(e) => {
                            let issue = BindIssue::new(
                                &document.id,
                                IssueKind::SourceFailure,
                                format!("{} failed: {e}", source.name()),
                            );
                            issue.log();
                            DocumentOutcome {
                                record: DocumentRecord::from_records(&document, &[]),
                                issues: vec![issue],
                            }
                        }
                    }
                }
            })
            .collect();

        let mut outcome = BatchOutcome::default();
        for document in futures::future::join_all(futures).await {
            outcome.records.push(document.record);
            outcome.issues.extend(document.issues);
        }

        if outcome.issues.is_empty() {
            info!(entities = outcome.entity_count(), "Batch complete");
        } else {
            warn!(
                entities = outcome.entity_count(),
                dropped = outcome.issues.len(),
                "Batch complete with dropped mentions"
            );
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FailingSource;

    #[async_trait]
    impl MentionSource for FailingSource {
        async fn raw_response(&self, document: &Document) -> Result<Option<String>> {
            if document.id == "bad" {
                Err(SpanbindError::Source("timeout".to_string()))
            } else {
                Ok(Some("1Eva".to_string()))
            }
        }

        fn name(&self) -> &str {
            "failing"
        }
    }

    fn documents() -> Vec<Document> {
        vec![
            Document::new("a", "Eva ringde Eva.", "sv"),
            Document::new("bad", "Eva igen.", "sv"),
            Document::new("c", "Ingen här.", "sv"),
        ]
    }

    #[test]
    fn test_process_json_response() {
        let document = Document::new("d1", "Mejla Åsa på asa@example.se", "sv");
        let raw = r#"[{"label": "NAME", "text": "Åsa", "start": 5, "end": 8},
                      {"label": "EMAIL", "text": "asa@example.se", "start": null, "end": null},
                      {"label": "PHONE", "text": "070-000"}]"#;

        let outcome = ExtractionPipeline::default().process(&document, Some(raw));
        let entities: Vec<(&str, usize, usize)> = outcome
            .record
            .entities
            .iter()
            .map(|e| (e.label.as_str(), e.start, e.end))
            .collect();

        assert_eq!(entities, vec![("NAME", 6, 9), ("EMAIL", 13, 27)]);
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].kind, IssueKind::Unresolvable);
    }

    #[test]
    fn test_process_without_response() {
        let document = Document::new("d1", "Text", "sv");
        let outcome = ExtractionPipeline::default().process(&document, None);
        assert!(outcome.record.entities.is_empty());
        assert_eq!(outcome.issues.len(), 1);
        assert_eq!(outcome.issues[0].kind, IssueKind::MissingResponse);
        assert_eq!(outcome.issues[0].doc_id, "d1");
        assert_eq!(outcome.record.text, "Text");
    }

    #[tokio::test]
    async fn test_batch_keeps_order_and_survives_failures() {
        let runner = BatchRunner::new(ExtractionPipeline::default(), &BatchConfig { concurrency: 2 });
        let outcome = runner.run(documents(), Arc::new(FailingSource)).await;

        let ids: Vec<&str> = outcome.records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "bad", "c"]);

        assert_eq!(outcome.records[0].entities.len(), 1);
        assert!(outcome.records[1].entities.is_empty());

        let counts = outcome.issue_counts();
        assert_eq!(counts.get(&IssueKind::SourceFailure), Some(&1));
        assert_eq!(counts.get(&IssueKind::Unresolvable), Some(&1));
    }

    #[tokio::test]
    async fn test_recorded_responses_source() {
        let mut responses = BTreeMap::new();
        responses.insert("a".to_string(), "1Eva\n1Eva".to_string());
        let source = RecordedResponses::new(responses);

        let runner = BatchRunner::new(ExtractionPipeline::default(), &BatchConfig::default());
        let outcome = runner.run(documents(), Arc::new(source)).await;

        let spans: Vec<(usize, usize)> = outcome.records[0]
            .entities
            .iter()
            .map(|e| (e.start, e.end))
            .collect();
        assert_eq!(spans, vec![(0, 3), (11, 14)]);
        assert_eq!(outcome.entity_count(), 2);

        // "bad" and "c" have no recorded response
        let counts = outcome.issue_counts();
        assert_eq!(counts.get(&IssueKind::MissingResponse), Some(&2));
        assert_eq!(outcome.issues.len(), 2);
    }
}
