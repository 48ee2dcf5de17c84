//! Entity binding
//!
//! Turns the ordered mention requests of one document into entity records
//! with exact spans. Every request that cannot be bound is reported as a
//! `BindIssue` so gaps in extraction quality stay auditable.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use spanbind_core::{
    Document, EntityLabel, EntityRecord, LocatorConfig, MentionRequest, Occurrence,
};

use crate::corrector::IndexCorrector;
use crate::locator::SpanLocator;
use crate::text::IndexedText;

// ============================================================================
// Issues
// ============================================================================

/// Why a mention was dropped
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// Missing field or empty mention text
    Malformed,
    /// Inverted or out-of-range span reported by the model
    OutOfBounds,
    /// Mention text does not occur in the document
    Unresolvable,
    /// More requests for a mention than it has occurrences
    ExcessDuplicate,
    /// The raw model response could not be parsed
    UnparseablePayload,
    /// The mention source failed for this document
    SourceFailure,
    /// No model response was recorded for this document
    MissingResponse,
}

impl std::fmt::Display for IssueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Malformed => write!(f, "malformed"),
            Self::OutOfBounds => write!(f, "out_of_bounds"),
            Self::Unresolvable => write!(f, "unresolvable"),
            Self::ExcessDuplicate => write!(f, "excess_duplicate"),
            Self::UnparseablePayload => write!(f, "unparseable_payload"),
            Self::SourceFailure => write!(f, "source_failure"),
            Self::MissingResponse => write!(f, "missing_response"),
        }
    }
}

/// A dropped mention or payload, with enough context to audit it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindIssue {
    pub doc_id: String,
    pub kind: IssueKind,
    /// Position of the request in emission order, when it came from one
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mention: Option<String>,
    pub detail: String,
}

impl BindIssue {
    pub fn new(doc_id: impl Into<String>, kind: IssueKind, detail: impl Into<String>) -> Self {
        Self {
            doc_id: doc_id.into(),
            kind,
            request_index: None,
            label: None,
            mention: None,
            detail: detail.into(),
        }
    }

    pub fn for_request(mut self, index: usize, request: &MentionRequest) -> Self {
        self.request_index = Some(index);
        self.label = Some(request.label.clone());
        self.mention = Some(request.text.clone());
        self
    }

    /// Emit the issue to the log
    pub fn log(&self) {
        warn!(
            doc_id = %self.doc_id,
            kind = %self.kind,
            request = ?self.request_index,
            label = self.label.as_deref().unwrap_or(""),
            mention = self.mention.as_deref().unwrap_or(""),
            "{}",
            self.detail
        );
    }
}

/// Result of binding one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BindOutcome {
    /// Bound records in emission order
    pub records: Vec<EntityRecord>,
    pub issues: Vec<BindIssue>,
}

// ============================================================================
// Binder
// ============================================================================

/// Binds mention requests to located occurrences.
///
/// Requests without an offset take the earliest unconsumed occurrence of
/// their text (FIFO). Requests with an offset take the unconsumed occurrence
/// the `IndexCorrector` picks for that offset.
#[derive(Debug, Clone, Copy, Default)]
pub struct EntityBinder {
    locator: SpanLocator,
    corrector: IndexCorrector,
}

impl EntityBinder {
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            locator: SpanLocator::new(),
            corrector: IndexCorrector::new(config),
        }
    }

    pub fn with_corrector(mut self, corrector: IndexCorrector) -> Self {
        self.corrector = corrector;
        self
    }

    /// Bind all requests for a document
    pub fn bind(&self, document: &Document, requests: &[MentionRequest]) -> BindOutcome {
        let text = IndexedText::new(&document.text);
        let text_len = text.char_len();
        let mut outcome = BindOutcome::default();

        let valid: Vec<(usize, &MentionRequest)> = requests
            .iter()
            .enumerate()
            .filter(|(idx, request)| match validate(request, text_len) {
                Ok(()) => true,
                Err((kind, detail)) => {
                    outcome
                        .issues
                        .push(BindIssue::new(&document.id, kind, detail).for_request(*idx, request));
                    false
                }
            })
            .collect();

        let located = self
            .locator
            .locate(&text, valid.iter().map(|(_, r)| r.trimmed_text()));
        let mut pools: BTreeMap<String, Vec<Occurrence>> = located.pools();

        for (idx, request) in valid {
            let mention = request.trimmed_text();

            let pool = match pools.get_mut(mention) {
                Some(pool) if !pool.is_empty() => pool,
                Some(_) => {
                    outcome.issues.push(
                        BindIssue::new(
                            &document.id,
                            IssueKind::ExcessDuplicate,
                            "More requests than occurrences, no free occurrence left",
                        )
                        .for_request(idx, request),
                    );
                    continue;
                }
                None => {
                    outcome.issues.push(
                        BindIssue::new(
                            &document.id,
                            IssueKind::Unresolvable,
                            "Mention not found in document",
                        )
                        .for_request(idx, request),
                    );
                    continue;
                }
            };

            let chosen = match request.approx_start {
                None => Some(0),
                Some(approx) => self.corrector.choose(pool, approx, text_len),
            };

            let Some(position) = chosen else {
                outcome.issues.push(
                    BindIssue::new(
                        &document.id,
                        IssueKind::Unresolvable,
                        "No occurrence inside the search window",
                    )
                    .for_request(idx, request),
                );
                continue;
            };

            let occurrence = pool.remove(position);
            let label = normalize_label(&request.label);
            let record = EntityRecord::bind(&document.id, label, occurrence);
            debug_assert!(record.is_consistent_with(document));
            outcome.records.push(record);
        }

        outcome
    }
}

/// Known labels in canonical case; unknown labels are kept as written.
fn normalize_label(label: &str) -> String {
    let label = label.trim();
    label
        .parse::<EntityLabel>()
        .map(|known| known.as_str().to_string())
        .unwrap_or_else(|_| label.to_string())
}

fn validate(request: &MentionRequest, text_len: usize) -> Result<(), (IssueKind, String)> {
    if request.label.trim().is_empty() {
        return Err((IssueKind::Malformed, "Missing label".to_string()));
    }
    if request.trimmed_text().is_empty() {
        return Err((IssueKind::Malformed, "Empty mention text".to_string()));
    }
    if let Some(start) = request.approx_start {
        if start >= text_len {
            return Err((
                IssueKind::OutOfBounds,
                format!("Offset {start} outside text of length {text_len}"),
            ));
        }
    }
    Ok(())
}
