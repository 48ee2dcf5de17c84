//! Dataset files
//!
//! A dataset is a JSON array of documents, each carrying its entity list.
//! The same schema is used for gold annotations and for predictions.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::{Document, EntityRecord, Result, SpanbindError};

/// Persisted entity, without the document id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySpan {
    pub label: String,
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl From<&EntityRecord> for EntitySpan {
    fn from(r: &EntityRecord) -> Self {
        Self {
            label: r.label.clone(),
            start: r.start,
            end: r.end,
            text: r.text.clone(),
        }
    }
}

/// A document together with its entities, as stored on disk
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub id: String,
    #[serde(default)]
    pub language: String,
    pub text: String,
    #[serde(
        default,
        alias = "gold_entities",
        alias = "predicted_entities",
        alias = "predicted entities"
    )]
    pub entities: Vec<EntitySpan>,
}

impl DocumentRecord {
    /// Build a record from a document and its bound entities
    pub fn from_records(document: &Document, records: &[EntityRecord]) -> Self {
        Self {
            id: document.id.clone(),
            language: document.language.clone(),
            text: document.text.clone(),
            entities: records.iter().map(EntitySpan::from).collect(),
        }
    }

    /// The document part of this record
    pub fn document(&self) -> Document {
        Document::new(&self.id, &self.text, &self.language)
    }

    /// Entities as records carrying this document's id
    pub fn records(&self) -> Vec<EntityRecord> {
        self.entities
            .iter()
            .map(|e| EntityRecord {
                doc_id: self.id.clone(),
                label: e.label.clone(),
                start: e.start,
                end: e.end,
                text: e.text.clone(),
            })
            .collect()
    }

    /// Entities whose offsets do not reproduce their text
    pub fn inconsistent_entities(&self) -> Vec<&EntitySpan> {
        let document = self.document();
        self.entities
            .iter()
            .filter(|e| e.start >= e.end || document.slice(e.start, e.end) != Some(e.text.as_str()))
            .collect()
    }
}

/// Load a dataset from a JSON file
pub fn load_dataset(path: impl AsRef<Path>) -> Result<Vec<DocumentRecord>> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|e| SpanbindError::Io {
        path: path.display().to_string(),
        source: e,
    })?;

    let records: Vec<DocumentRecord> =
        serde_json::from_str(&content).map_err(|e| SpanbindError::Dataset {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;

    for record in &records {
        for entity in record.inconsistent_entities() {
            tracing::warn!(
                doc_id = %record.id,
                label = %entity.label,
                start = entity.start,
                end = entity.end,
                "Entity offsets do not match its text"
            );
        }
    }

    tracing::debug!(path = %path.display(), documents = records.len(), "Loaded dataset");
    Ok(records)
}

/// Save a dataset as pretty-printed JSON
pub fn save_dataset(path: impl AsRef<Path>, records: &[DocumentRecord]) -> Result<()> {
    let path = path.as_ref();
    let json = serde_json::to_string_pretty(records).map_err(|e| SpanbindError::Dataset {
        path: path.display().to_string(),
        message: e.to_string(),
    })?;

    std::fs::write(path, json).map_err(|e| SpanbindError::Io {
        path: path.display().to_string(),
        source: e,
    })
}
