//! Model response normalization
//!
//! The model either answers with a JSON list of `{label, text, start, end}`
//! objects or with the compact line format, one entity per line prefixed by
//! a numeric label id:
//!
//! ```text
//! 1Anna Karlsson
//! 2070-123 45 67
//! ```
//!
//! Both are normalized into `MentionRequest`s. Only the JSON form carries
//! offsets.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use tracing::debug;

use spanbind_core::{Document, EntityLabel, MentionRequest, SpanbindError};

use crate::binder::{BindIssue, IssueKind};

static CODE_FENCE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^\s*```[A-Za-z]*[ \t]*\n?(.*?)\n?\s*```\s*$").expect("valid fence regex")
});

static COMPACT_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(\d)\s*[:.)]?(.+)$").expect("valid compact line regex"));

/// Shape of the raw model response
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ResponseFormat {
    /// JSON when the body starts with `[` or `{`, compact otherwise
    #[default]
    Auto,
    Json,
    Compact,
}

impl std::str::FromStr for ResponseFormat {
    type Err = SpanbindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "json" => Ok(Self::Json),
            "compact" | "lines" => Ok(Self::Compact),
            _ => Err(SpanbindError::MalformedPayload(format!(
                "unknown response format: {s}"
            ))),
        }
    }
}

/// Requests recovered from one response, plus everything that was dropped
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedPayload {
    pub requests: Vec<MentionRequest>,
    pub issues: Vec<BindIssue>,
}

/// Entity structure for LLM JSON output
#[derive(Debug, Deserialize)]
struct LlmEntity {
    label: Option<String>,
    text: Option<String>,
    start: Option<i64>,
    end: Option<i64>,
}

/// Parses raw model responses into mention requests
#[derive(Debug, Clone, Copy, Default)]
pub struct PayloadNormalizer {
    format: ResponseFormat,
}

impl PayloadNormalizer {
    pub fn new(format: ResponseFormat) -> Self {
        Self { format }
    }

    /// Normalize a raw response for `document`.
    ///
    /// Never fails: an unparseable response yields zero requests and a
    /// single `UnparseablePayload` issue. So does a non-empty compact
    /// response without a single entity line.
    pub fn normalize(&self, document: &Document, raw: &str) -> ParsedPayload {
        let body = strip_code_fences(raw);

        let format = match self.format {
            ResponseFormat::Auto if body.starts_with(['[', '{']) => ResponseFormat::Json,
            ResponseFormat::Auto => ResponseFormat::Compact,
            explicit => explicit,
        };

        match format {
            ResponseFormat::Json => parse_json(document, body),
            _ => parse_compact(document, body),
        }
    }
}

/// Remove a surrounding markdown code fence, if any
pub fn strip_code_fences(raw: &str) -> &str {
    let trimmed = raw.trim();
    match CODE_FENCE.captures(trimmed).and_then(|c| c.get(1)) {
        Some(inner) => inner.as_str().trim(),
        None => trimmed,
    }
}

fn parse_json(document: &Document, body: &str) -> ParsedPayload {
    let mut parsed = ParsedPayload::default();

    let items: Vec<serde_json::Value> = match serde_json::from_str(body) {
        Ok(items) => items,
        Err(e) => {
            parsed.issues.push(BindIssue::new(
                &document.id,
                IssueKind::UnparseablePayload,
                format!("Response is not a JSON list: {e}"),
            ));
            return parsed;
        }
    };

    let text_len = document.char_len();

    for (idx, item) in items.into_iter().enumerate() {
        let entity: LlmEntity = match serde_json::from_value(item) {
            Ok(entity) => entity,
            Err(e) => {
                parsed.issues.push(malformed(document, idx, format!("Invalid entity object: {e}")));
                continue;
            }
        };

        let (Some(label), Some(text)) = (entity.label, entity.text) else {
            parsed
                .issues
                .push(malformed(document, idx, "Entity is missing label or text"));
            continue;
        };

        let request = MentionRequest::new(label, text);
        let request = match (entity.start, entity.end) {
            (None, None) => request,
            (Some(start), Some(end)) => match checked_span(start, end, text_len) {
                Some(start) => request.with_approx_start(start),
                None => {
                    parsed.issues.push(
                        BindIssue::new(
                            &document.id,
                            IssueKind::OutOfBounds,
                            format!("Span [{start}, {end}) invalid for text of length {text_len}"),
                        )
                        .for_request(idx, &request),
                    );
                    continue;
                }
            },
            _ => {
                parsed.issues.push(
                    BindIssue::new(
                        &document.id,
                        IssueKind::Malformed,
                        "Entity has only one of start/end",
                    )
                    .for_request(idx, &request),
                );
                continue;
            }
        };

        parsed.requests.push(request);
    }

    parsed
}

fn parse_compact(document: &Document, body: &str) -> ParsedPayload {
    let mut parsed = ParsedPayload::default();

    for line in body.lines().map(str::trim) {
        let Some(caps) = COMPACT_LINE.captures(line) else {
            if !line.is_empty() {
                debug!(doc_id = %document.id, line, "Ignoring non-entity line");
            }
            continue;
        };

        let id = caps[1].chars().next().unwrap_or_default();
        let text = caps[2].trim();

        let Some(label) = EntityLabel::from_compact_id(id) else {
            debug!(doc_id = %document.id, line, "Ignoring line with unknown label id");
            continue;
        };
        if text.is_empty() {
            continue;
        }

        parsed.requests.push(MentionRequest::new(label.as_str(), text));
    }

    if parsed.requests.is_empty() && !body.is_empty() {
        parsed.issues.push(BindIssue::new(
            &document.id,
            IssueKind::UnparseablePayload,
            "Response has no entity lines",
        ));
    }

    parsed
}

fn checked_span(start: i64, end: i64, text_len: usize) -> Option<usize> {
    let start = usize::try_from(start).ok()?;
    let end = usize::try_from(end).ok()?;
    (start < end && end <= text_len).then_some(start)
}

fn malformed(document: &Document, idx: usize, detail: impl Into<String>) -> BindIssue {
    let mut issue = BindIssue::new(&document.id, IssueKind::Malformed, detail);
    issue.request_index = Some(idx);
    issue
}
