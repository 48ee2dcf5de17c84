//! spanbind extractor - span reconciliation and evaluation
//!
//! Binds the entity mentions a language model proposes to exact character
//! spans in the source document, and measures extraction quality against a
//! gold standard.
//!
//! Pipeline: raw response → [`PayloadNormalizer`] → [`SpanLocator`] (+
//! [`IndexCorrector`]) → [`EntityBinder`] → entity records → [`Evaluator`]
//! → [`EvaluationReport`].

pub mod binder;
pub mod corrector;
pub mod locator;
pub mod metrics;
pub mod payload;
pub mod pipeline;
pub mod report;
pub mod text;

pub use binder::{BindIssue, BindOutcome, EntityBinder, IssueKind};
pub use corrector::IndexCorrector;
pub use locator::{LocatedSpans, SpanLocator};
pub use metrics::{DocumentEvaluation, Evaluation, Evaluator, MatchCounts, MatchMode};
pub use payload::{ParsedPayload, PayloadNormalizer, ResponseFormat};
pub use pipeline::{BatchOutcome, BatchRunner, DocumentOutcome, ExtractionPipeline, RecordedResponses};
pub use report::EvaluationReport;
pub use text::IndexedText;
