//! spanbind Core - Domain models, traits, and shared types
//!
//! This crate defines the core abstractions used throughout spanbind:
//! - Documents and the entity record schema
//! - Mention requests emitted by a language model
//! - Common error types
//! - The model-invocation boundary (`MentionSource`)
//! - Configuration management
//! - Dataset (de)serialization
//!
//! All offsets are character offsets into `Document::text`, never byte offsets.

pub mod config;
pub mod dataset;

pub use config::{
    AppConfig, BatchConfig, ConfigError, EvalConfig, FallbackStrategy, LocatorConfig,
    LoggingConfig,
};
pub use dataset::{load_dataset, save_dataset, DocumentRecord};

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

/// Core error types for spanbind operations
#[derive(Error, Debug)]
pub enum SpanbindError {
    #[error("Malformed mention request: {0}")]
    MalformedRequest(String),

    #[error("Malformed model payload: {0}")]
    MalformedPayload(String),

    #[error("Dataset error in {path}: {message}")]
    Dataset { path: String, message: String },

    #[error("IO error on {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Mention source error: {0}")]
    Source(String),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, SpanbindError>;

// ============================================================================
// Labels
// ============================================================================

/// Entity labels the extraction prompt asks for.
///
/// Records carry labels as plain strings so that gold files with labels
/// outside this set still evaluate; this enum covers the known ones and the
/// numeric ids of the compact response format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EntityLabel {
    Name,
    Phone,
    Address,
    NationalId,
    Email,
}

impl EntityLabel {
    pub const ALL: [EntityLabel; 5] = [
        Self::Name,
        Self::Phone,
        Self::Address,
        Self::NationalId,
        Self::Email,
    ];

    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Name => "NAME",
            Self::Phone => "PHONE",
            Self::Address => "ADDRESS",
            Self::NationalId => "NATIONAL_ID",
            Self::Email => "EMAIL",
        }
    }

    /// Look up a label by its compact-format id (`1` = NAME ... `5` = EMAIL)
    pub fn from_compact_id(id: char) -> Option<Self> {
        match id {
            '1' => Some(Self::Name),
            '2' => Some(Self::Phone),
            '3' => Some(Self::Address),
            '4' => Some(Self::NationalId),
            '5' => Some(Self::Email),
            _ => None,
        }
    }

    /// The compact-format id for this label
    pub fn compact_id(&self) -> char {
        match self {
            Self::Name => '1',
            Self::Phone => '2',
            Self::Address => '3',
            Self::NationalId => '4',
            Self::Email => '5',
        }
    }
}

impl std::fmt::Display for EntityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for EntityLabel {
    type Err = SpanbindError;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|l| l.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| SpanbindError::MalformedRequest(format!("unknown label: {s}")))
    }
}

// ============================================================================
// Documents and Records
// ============================================================================

/// A source document. `text` is the canonical character sequence that all
/// offsets refer to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub text: String,
    #[serde(default)]
    pub language: String,
}

impl Document {
    /// Create a new document
    pub fn new(id: impl Into<String>, text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            language: language.into(),
        }
    }

    /// Length of the text in characters
    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Character-offset slice of the text, `None` if out of range
    pub fn slice(&self, start: usize, end: usize) -> Option<&str> {
        char_slice(&self.text, start, end)
    }
}

/// Slice `text` by character offsets `[start, end)`.
pub fn char_slice(text: &str, start: usize, end: usize) -> Option<&str> {
    if start > end {
        return None;
    }
    let mut indices = text
        .char_indices()
        .map(|(b, _)| b)
        .chain(std::iter::once(text.len()));
    let begin = indices.nth(start)?;
    let finish = if end == start {
        begin
    } else {
        indices.nth(end - start - 1)?
    };
    Some(&text[begin..finish])
}

/// A single predicted or gold mention request, in emission order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionRequest {
    pub label: String,
    pub text: String,
    /// Model-reported start offset, present only for offset-bearing payloads
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub approx_start: Option<usize>,
}

impl MentionRequest {
    /// Create a request without an offset
    pub fn new(label: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            text: text.into(),
            approx_start: None,
        }
    }

    /// Attach an approximate start offset
    pub fn with_approx_start(mut self, start: usize) -> Self {
        self.approx_start = Some(start);
        self
    }

    /// Translate a chunk-local offset into a document offset
    pub fn shifted(mut self, chunk_offset: usize) -> Self {
        self.approx_start = self.approx_start.map(|s| s + chunk_offset);
        self
    }

    /// Mention text with surrounding whitespace removed
    pub fn trimmed_text(&self) -> &str {
        self.text.trim()
    }
}

/// A located occurrence of a mention string in a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Occurrence {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Occurrence {
    pub fn new(text: impl Into<String>, start: usize) -> Self {
        let text = text.into();
        let end = start + text.chars().count();
        Self { start, end, text }
    }

    /// Check whether two occurrences share any character position
    pub fn overlaps(&self, other: &Occurrence) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A bound entity. Invariant: `document.text[start..end] == text` in
/// character offsets, and `start < end`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRecord {
    pub doc_id: String,
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl EntityRecord {
    /// Bind a label to an occurrence within a document
    pub fn bind(doc_id: impl Into<String>, label: impl Into<String>, occurrence: Occurrence) -> Self {
        Self {
            doc_id: doc_id.into(),
            label: label.into(),
            start: occurrence.start,
            end: occurrence.end,
            text: occurrence.text,
        }
    }

    /// Check the record against the document it claims to come from
    pub fn is_consistent_with(&self, document: &Document) -> bool {
        self.doc_id == document.id
            && self.start < self.end
            && document.slice(self.start, self.end) == Some(self.text.as_str())
    }
}

// ============================================================================
// Traits
// ============================================================================

/// Boundary to the language model that proposes mentions.
///
/// Implementations return the raw model response for a document; parsing it
/// into mention requests is the extractor's job.
#[async_trait::async_trait]
pub trait MentionSource: Send + Sync {
    /// Fetch the raw response for a document, `None` if the source has nothing
    async fn raw_response(&self, document: &Document) -> Result<Option<String>>;

    /// Get source name for logging
    fn name(&self) -> &str;
}

// ============================================================================
// Tests
// ============================================================================
