//! Quality Metrics module
//!
//! Compares predicted entities against a gold standard and computes
//! precision, recall and F1, in span-only and exact-match modes, overall and
//! per label.
//!
//! Matching uses set semantics per document: an entity key appearing twice
//! counts once. Corpus metrics sum per-document counts before dividing.

use std::collections::{BTreeMap, BTreeSet};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use spanbind_core::dataset::EntitySpan;
use spanbind_core::{DocumentRecord, EntityRecord};

// ============================================================================
// Counts
// ============================================================================

/// Match counts for one document, one label or a whole corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchCounts {
    /// Keys present in both gold and predictions
    pub true_positives: usize,
    /// Predicted keys missing from gold
    pub false_positives: usize,
    /// Gold keys missing from predictions
    pub false_negatives: usize,
    /// Distinct gold keys
    pub gold_total: usize,
    /// Distinct predicted keys
    pub predicted_total: usize,
}

impl MatchCounts {
    /// Count matches between two key sets
    pub fn from_sets<K: Ord>(gold: &BTreeSet<K>, predicted: &BTreeSet<K>) -> Self {
        let true_positives = gold.intersection(predicted).count();
        Self {
            true_positives,
            false_positives: predicted.len() - true_positives,
            false_negatives: gold.len() - true_positives,
            gold_total: gold.len(),
            predicted_total: predicted.len(),
        }
    }

    /// Calculate precision (TP / (TP + FP))
    pub fn precision(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_positives)
    }

    /// Calculate recall (TP / (TP + FN))
    pub fn recall(&self) -> f64 {
        ratio(self.true_positives, self.true_positives + self.false_negatives)
    }

    /// Calculate F1 score (2 * P * R / (P + R))
    pub fn f1_score(&self) -> f64 {
        let p = self.precision();
        let r = self.recall();
        if p + r == 0.0 {
            0.0
        } else {
            2.0 * p * r / (p + r)
        }
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

impl Add for MatchCounts {
    type Output = Self;

    fn add(mut self, rhs: Self) -> Self {
        self += rhs;
        self
    }
}

impl AddAssign for MatchCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.true_positives += rhs.true_positives;
        self.false_positives += rhs.false_positives;
        self.false_negatives += rhs.false_negatives;
        self.gold_total += rhs.gold_total;
        self.predicted_total += rhs.predicted_total;
    }
}

impl Sum for MatchCounts {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

impl<'a> Sum<&'a MatchCounts> for MatchCounts {
    fn sum<I: Iterator<Item = &'a MatchCounts>>(iter: I) -> Self {
        iter.copied().sum()
    }
}

fn merge_labels(into: &mut BTreeMap<String, MatchCounts>, from: &BTreeMap<String, MatchCounts>) {
    for (label, counts) in from {
        *into.entry(label.clone()).or_default() += *counts;
    }
}

// ============================================================================
// Modes and keys
// ============================================================================

/// What has to agree for a prediction to count as correct
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Offsets only; labels are ignored
    SpanOnly,
    /// Label and offsets
    Exact,
}

impl MatchMode {
    pub const ALL: [MatchMode; 2] = [MatchMode::SpanOnly, MatchMode::Exact];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SpanOnly => "span-only",
            Self::Exact => "exact",
        }
    }
}

impl std::fmt::Display for MatchMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Exact-match key within one document
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct ExactKey<'a> {
    label: &'a str,
    start: usize,
    end: usize,
    /// Only set when text equality is required
    text: Option<&'a str>,
}

// ============================================================================
// Results
// ============================================================================

/// Evaluation of a single document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentEvaluation {
    pub doc_id: String,
    /// Gold entities as listed, duplicates included
    pub gold_count: usize,
    /// Predicted entities as listed, duplicates included
    pub predicted_count: usize,
    pub span_only: MatchCounts,
    pub exact: MatchCounts,
    /// Exact-match counts partitioned by label
    pub per_label: BTreeMap<String, MatchCounts>,
    /// Alignment notes, e.g. a missing prediction
    pub notes: Vec<String>,
}

impl DocumentEvaluation {
    pub fn counts(&self, mode: MatchMode) -> &MatchCounts {
        match mode {
            MatchMode::SpanOnly => &self.span_only,
            MatchMode::Exact => &self.exact,
        }
    }
}

/// Corpus evaluation: summed counts plus the per-document breakdown
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    pub span_only: MatchCounts,
    pub exact: MatchCounts,
    pub per_label: BTreeMap<String, MatchCounts>,
    pub documents: Vec<DocumentEvaluation>,
}

impl Evaluation {
    pub fn counts(&self, mode: MatchMode) -> &MatchCounts {
        match mode {
            MatchMode::SpanOnly => &self.span_only,
            MatchMode::Exact => &self.exact,
        }
    }

    /// Sum document evaluations into corpus counts
    pub fn from_documents(documents: Vec<DocumentEvaluation>) -> Self {
        let mut per_label = BTreeMap::new();
        for document in &documents {
            merge_labels(&mut per_label, &document.per_label);
        }

        Self {
            span_only: documents.iter().map(|d| &d.span_only).sum(),
            exact: documents.iter().map(|d| &d.exact).sum(),
            per_label,
            documents,
        }
    }

    /// Print a summary report
    pub fn report(&self) -> String {
        let mut out = format!(
            "=== Extraction Quality Report ===\n\nDocuments evaluated: {}\n",
            self.documents.len()
        );

        for mode in MatchMode::ALL {
            let c = self.counts(mode);
            out.push_str(&format!(
                "\n{mode}:\n  Precision: {:.1}%\n  Recall:    {:.1}%\n  F1 Score:  {:.1}%\n  Gold: {} | Predicted: {} | TP: {} | FP: {} | FN: {}\n",
                c.precision() * 100.0,
                c.recall() * 100.0,
                c.f1_score() * 100.0,
                c.gold_total,
                c.predicted_total,
                c.true_positives,
                c.false_positives,
                c.false_negatives,
            ));
        }

        if !self.per_label.is_empty() {
            out.push_str("\nPer label (exact):\n");
            for (label, c) in &self.per_label {
                out.push_str(&format!(
                    "  {label:<12} P {:.3}  R {:.3}  F1 {:.3}\n",
                    c.precision(),
                    c.recall(),
                    c.f1_score()
                ));
            }
        }

        out
    }
}

// ============================================================================
// Evaluator
// ============================================================================

/// Evaluator for extraction quality
#[derive(Debug, Clone, Copy, Default)]
pub struct Evaluator {
    /// Surface text must also agree in exact mode
    require_text_match: bool,
}

impl Evaluator {
    /// Create a new evaluator with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable/disable text matching in exact mode
    pub fn with_text_matching(mut self, require_text_match: bool) -> Self {
        self.require_text_match = require_text_match;
        self
    }

    fn exact_key<'a>(&self, e: &'a EntitySpan) -> ExactKey<'a> {
        ExactKey {
            label: &e.label,
            start: e.start,
            end: e.end,
            text: self.require_text_match.then_some(e.text.as_str()),
        }
    }

    /// Evaluate one document's entities
    pub fn evaluate_entities(
        &self,
        doc_id: &str,
        gold: &[EntitySpan],
        predicted: &[EntitySpan],
    ) -> DocumentEvaluation {
        let gold_spans: BTreeSet<(usize, usize)> = gold.iter().map(|e| (e.start, e.end)).collect();
        let pred_spans: BTreeSet<(usize, usize)> =
            predicted.iter().map(|e| (e.start, e.end)).collect();

        let gold_exact: BTreeSet<ExactKey<'_>> = gold.iter().map(|e| self.exact_key(e)).collect();
        let pred_exact: BTreeSet<ExactKey<'_>> =
            predicted.iter().map(|e| self.exact_key(e)).collect();

        let labels: BTreeSet<&str> = gold_exact
            .iter()
            .chain(pred_exact.iter())
            .map(|k| k.label)
            .collect();

        let per_label = labels
            .into_iter()
            .map(|label| {
                let g: BTreeSet<&ExactKey<'_>> =
                    gold_exact.iter().filter(|k| k.label == label).collect();
                let p: BTreeSet<&ExactKey<'_>> =
                    pred_exact.iter().filter(|k| k.label == label).collect();
                (label.to_string(), MatchCounts::from_sets(&g, &p))
            })
            .collect();

        DocumentEvaluation {
            doc_id: doc_id.to_string(),
            gold_count: gold.len(),
            predicted_count: predicted.len(),
            span_only: MatchCounts::from_sets(&gold_spans, &pred_spans),
            exact: MatchCounts::from_sets(&gold_exact, &pred_exact),
            per_label,
            notes: Vec::new(),
        }
    }

    /// Compare two record sets, grouping them by document id
    pub fn compare(&self, gold: &[EntityRecord], predicted: &[EntityRecord]) -> Evaluation {
        let mut grouped: BTreeMap<&str, (Vec<EntitySpan>, Vec<EntitySpan>)> = BTreeMap::new();
        for record in gold {
            grouped.entry(&record.doc_id).or_default().0.push(record.into());
        }
        for record in predicted {
            grouped.entry(&record.doc_id).or_default().1.push(record.into());
        }

        let documents = grouped
            .into_iter()
            .map(|(doc_id, (g, p))| self.evaluate_entities(doc_id, &g, &p))
            .collect();
        Evaluation::from_documents(documents)
    }

    /// Evaluate predicted documents against gold documents, aligned by id.
    ///
    /// Documents are reported in gold order; predicted documents missing from
    /// gold follow in their own order, and every one of their entities is a
    /// false positive. A gold document without a prediction counts as an
    /// empty prediction.
    pub fn evaluate(&self, gold: &[DocumentRecord], predicted: &[DocumentRecord]) -> Evaluation {
        let mut aligned: Vec<AlignedDocument<'_>> = Vec::with_capacity(gold.len());
        let mut index: BTreeMap<&str, usize> = BTreeMap::new();

        for doc in gold {
            match index.get(doc.id.as_str()) {
                Some(&i) => {
                    warn!(doc_id = %doc.id, "Duplicate gold document, merging entities");
                    aligned[i].gold.extend(doc.entities.iter().cloned());
                }
                None => {
                    index.insert(&doc.id, aligned.len());
                    aligned.push(AlignedDocument {
                        doc_id: &doc.id,
                        gold_text: Some(&doc.text),
                        gold: doc.entities.clone(),
                        predicted: Vec::new(),
                        has_prediction: false,
                        notes: Vec::new(),
                    });
                }
            }
        }

        for doc in predicted {
            let slot = match index.get(doc.id.as_str()) {
                Some(&i) => &mut aligned[i],
                None => {
                    warn!(doc_id = %doc.id, "Predicted document not in gold, counting its entities as false positives");
                    index.insert(&doc.id, aligned.len());
                    aligned.push(AlignedDocument {
                        doc_id: &doc.id,
                        gold_text: None,
                        gold: Vec::new(),
                        predicted: Vec::new(),
                        has_prediction: false,
                        notes: vec!["not in gold".to_string()],
                    });
                    let last = aligned.len() - 1;
                    &mut aligned[last]
                }
            };

            if slot.has_prediction {
                warn!(doc_id = %doc.id, "Duplicate predicted document, merging entities");
            }
            if slot.gold_text.is_some_and(|text| text != doc.text) {
                warn!(doc_id = %doc.id, "Predicted document text differs from gold");
                slot.notes.push("text differs from gold".to_string());
            }
            slot.predicted.extend(doc.entities.iter().cloned());
            slot.has_prediction = true;
        }

        let documents: Vec<DocumentEvaluation> = aligned
            .into_iter()
            .map(|mut doc| {
                if !doc.has_prediction {
                    warn!(doc_id = %doc.doc_id, "No prediction for gold document");
                    doc.notes.push("missing prediction".to_string());
                }
                let mut evaluation = self.evaluate_entities(doc.doc_id, &doc.gold, &doc.predicted);
                evaluation.notes = doc.notes;
                evaluation
            })
            .collect();

        let evaluation = Evaluation::from_documents(documents);
        debug!(
            documents = evaluation.documents.len(),
            exact_f1 = evaluation.exact.f1_score(),
            span_f1 = evaluation.span_only.f1_score(),
            "Evaluation complete"
        );
        evaluation
    }
}

struct AlignedDocument<'a> {
    doc_id: &'a str,
    gold_text: Option<&'a str>,
    gold: Vec<EntitySpan>,
    predicted: Vec<EntitySpan>,
    has_prediction: bool,
    notes: Vec<String>,
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn span(label: &str, start: usize, end: usize, text: &str) -> EntitySpan {
        EntitySpan {
            label: label.to_string(),
            start,
            end,
            text: text.to_string(),
        }
    }

    fn doc(id: &str, text: &str, entities: Vec<EntitySpan>) -> DocumentRecord {
        DocumentRecord {
            id: id.to_string(),
            language: "sv".to_string(),
            text: text.to_string(),
            entities,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "{actual} != {expected}");
    }

    #[test]
    fn test_match_counts_ratios() {
        let counts = MatchCounts {
            true_positives: 8,
            false_positives: 2,
            false_negatives: 0,
            gold_total: 8,
            predicted_total: 10,
        };
        assert_close(counts.precision(), 0.8);
        assert_close(counts.recall(), 1.0);
        assert_close(counts.f1_score(), 16.0 / 18.0);
    }

    #[test]
    fn test_exact_match_scenario() {
        let gold = vec![span("NAME", 0, 4, "Anna")];
        let eval = Evaluator::new().evaluate_entities("d1", &gold, &gold.clone());

        assert_eq!(
            (eval.exact.true_positives, eval.exact.false_positives, eval.exact.false_negatives),
            (1, 0, 0)
        );
        assert_close(eval.exact.precision(), 1.0);
        assert_close(eval.exact.recall(), 1.0);
        assert_close(eval.exact.f1_score(), 1.0);
    }

    #[test]
    fn test_partial_match_scenario() {
        let gold = vec![span("NAME", 0, 4, "Anna"), span("PHONE", 10, 20, "0701234567")];
        let pred = vec![span("NAME", 0, 4, "Anna"), span("PHONE", 30, 40, "0709999999")];
        let eval = Evaluator::new().evaluate_entities("d1", &gold, &pred);

        for counts in [&eval.exact, &eval.span_only] {
            assert_eq!(
                (counts.true_positives, counts.false_positives, counts.false_negatives),
                (1, 1, 1)
            );
            assert_close(counts.precision(), 0.5);
            assert_close(counts.recall(), 0.5);
            assert_close(counts.f1_score(), 0.5);
        }

        assert_close(eval.per_label["NAME"].f1_score(), 1.0);
        assert_close(eval.per_label["PHONE"].f1_score(), 0.0);
    }

    #[test]
    fn test_empty_sets_score_zero() {
        let eval = Evaluator::new().evaluate(&[], &[]);
        for mode in MatchMode::ALL {
            let counts = eval.counts(mode);
            assert_eq!(counts.precision(), 0.0);
            assert_eq!(counts.recall(), 0.0);
            assert_eq!(counts.f1_score(), 0.0);
        }
        assert!(eval.per_label.is_empty());
    }

    #[test]
    fn test_span_only_ignores_labels() {
        let gold = vec![span("NAME", 0, 4, "Anna")];
        let pred = vec![span("ADDRESS", 0, 4, "Anna")];
        let eval = Evaluator::new().evaluate_entities("d1", &gold, &pred);

        assert_eq!(eval.span_only.true_positives, 1);
        assert_eq!(eval.exact.true_positives, 0);
        assert_eq!(
            eval.per_label.keys().map(String::as_str).collect::<Vec<_>>(),
            vec!["ADDRESS", "NAME"]
        );
    }

    #[test]
    fn test_duplicate_keys_count_once() {
        let gold = vec![span("NAME", 0, 4, "Anna")];
        let pred = vec![span("NAME", 0, 4, "Anna"), span("NAME", 0, 4, "Anna")];
        let eval = Evaluator::new().evaluate_entities("d1", &gold, &pred);

        assert_eq!(eval.exact.false_positives, 0);
        assert_eq!(eval.exact.predicted_total, 1);
        assert_eq!(eval.predicted_count, 2);
    }

    #[test]
    fn test_text_matching_is_optional() {
        let gold = vec![span("NAME", 0, 4, "Anna")];
        let pred = vec![span("NAME", 0, 4, "anna")];

        let lenient = Evaluator::new().evaluate_entities("d1", &gold, &pred);
        let strict = Evaluator::new()
            .with_text_matching(true)
            .evaluate_entities("d1", &gold, &pred);

        assert_eq!(lenient.exact.true_positives, 1);
        assert_eq!(strict.exact.true_positives, 0);
        assert_eq!(strict.span_only.true_positives, 1);
    }

    #[test]
    fn test_corpus_counts_are_summed_not_averaged() {
        // Doc 1: 1/1 correct; doc 2: 1 of 3 correct
        let gold = vec![
            doc("d1", "Anna", vec![span("NAME", 0, 4, "Anna")]),
            doc(
                "d2",
                "Eva Olle Per",
                vec![
                    span("NAME", 0, 3, "Eva"),
                    span("NAME", 4, 8, "Olle"),
                    span("NAME", 9, 12, "Per"),
                ],
            ),
        ];
        let pred = vec![
            doc("d1", "Anna", vec![span("NAME", 0, 4, "Anna")]),
            doc("d2", "Eva Olle Per", vec![span("NAME", 0, 3, "Eva")]),
        ];

        let eval = Evaluator::new().evaluate(&gold, &pred);
        assert_eq!(eval.exact.true_positives, 2);
        assert_eq!(eval.exact.false_negatives, 2);
        assert_close(eval.exact.precision(), 1.0);
        assert_close(eval.exact.recall(), 0.5);
        assert_eq!(eval.per_label["NAME"], eval.exact);
    }

    #[test]
    fn test_alignment_by_document_id() {
        let gold = vec![
            doc("d1", "Anna", vec![span("NAME", 0, 4, "Anna")]),
            doc("d2", "Eva", vec![span("NAME", 0, 3, "Eva")]),
        ];
        let pred = vec![
            doc("extra", "Olle", vec![span("NAME", 0, 4, "Olle")]),
            doc("d1", "Anna", vec![span("NAME", 0, 4, "Anna")]),
        ];

        let eval = Evaluator::new().evaluate(&gold, &pred);
        let ids: Vec<&str> = eval.documents.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(ids, vec!["d1", "d2", "extra"]);

        assert_eq!(eval.documents[1].notes, vec!["missing prediction".to_string()]);
        assert_eq!(eval.documents[2].notes, vec!["not in gold".to_string()]);
        assert_eq!(
            (eval.exact.true_positives, eval.exact.false_positives, eval.exact.false_negatives),
            (1, 1, 1)
        );
    }

    #[test]
    fn test_compare_records_groups_by_document() {
        let gold = vec![
            EntityRecord::bind("d1", "NAME", spanbind_core::Occurrence::new("Anna", 0)),
            EntityRecord::bind("d2", "NAME", spanbind_core::Occurrence::new("Anna", 0)),
        ];
        let pred = vec![EntityRecord::bind("d1", "NAME", spanbind_core::Occurrence::new("Anna", 0))];

        let eval = Evaluator::new().compare(&gold, &pred);
        // Same span in another document is a different key
        assert_eq!(eval.exact.true_positives, 1);
        assert_eq!(eval.exact.false_negatives, 1);
    }

    #[test]
    fn test_report_mentions_modes() {
        let report = Evaluator::new().evaluate(&[], &[]).report();
        assert!(report.contains("Documents evaluated: 0"));
        assert!(report.contains("span-only:"));
        assert!(report.contains("exact:"));
    }
}
