//! Property-based tests for span binding and metrics.
//!
//! Texts are drawn from a small alphabet with Swedish letters so that
//! mentions repeat, overlap and cross multibyte characters often.

use proptest::prelude::*;

use spanbind_core::dataset::EntitySpan;
use spanbind_core::{Document, MentionRequest};
use spanbind_extractor::{EntityBinder, Evaluator, IndexedText, MatchMode, SpanLocator};

fn request_strategy() -> impl Strategy<Value = MentionRequest> {
    (
        prop::sample::select(vec!["NAME", "PHONE", "EMAIL"]),
        "[abåö]{1,4}",
        prop::option::of(0usize..60),
    )
        .prop_map(|(label, text, approx)| {
            let request = MentionRequest::new(label, text);
            match approx {
                Some(start) => request.with_approx_start(start),
                None => request,
            }
        })
}

fn span_strategy() -> impl Strategy<Value = EntitySpan> {
    (prop::sample::select(vec!["NAME", "PHONE"]), 0usize..20, 1usize..5).prop_map(
        |(label, start, len)| EntitySpan {
            label: label.to_string(),
            start,
            end: start + len,
            text: String::new(),
        },
    )
}

proptest! {

    /// Every bound record reproduces its text at its offsets.
    #[test]
    fn bound_records_match_document_text(
        text in "[abåö ]{0,60}",
        requests in prop::collection::vec(request_strategy(), 0..10),
    ) {
        let document = Document::new("p", text, "sv");
        let outcome = EntityBinder::default().bind(&document, &requests);

        for record in &outcome.records {
            prop_assert!(record.start < record.end);
            prop_assert!(record.is_consistent_with(&document));
        }
        prop_assert_eq!(outcome.records.len() + outcome.issues.len(), requests.len());
    }

    /// Bound records never share a character position.
    #[test]
    fn bound_records_never_overlap(
        text in "[abåö ]{0,60}",
        requests in prop::collection::vec(request_strategy(), 0..10),
    ) {
        let document = Document::new("p", text, "sv");
        let outcome = EntityBinder::default().bind(&document, &requests);

        let mut spans: Vec<(usize, usize)> =
            outcome.records.iter().map(|r| (r.start, r.end)).collect();
        spans.sort();
        for pair in spans.windows(2) {
            prop_assert!(pair[0].1 <= pair[1].0, "overlap: {:?}", pair);
        }
    }

    /// Locating the same mentions twice gives identical results.
    #[test]
    fn locator_is_deterministic(
        text in "[abåö ]{0,60}",
        mentions in prop::collection::vec("[abåö]{1,4}", 0..8),
    ) {
        let indexed = IndexedText::new(&text);
        let locator = SpanLocator::new();

        let first = locator.locate(&indexed, mentions.iter().map(String::as_str));
        let reversed = locator.locate(&indexed, mentions.iter().rev().map(String::as_str));
        prop_assert_eq!(&first, &reversed);

        for pair in first.occurrences.windows(2) {
            prop_assert!(pair[0].start <= pair[1].start);
            prop_assert!(!pair[0].overlaps(&pair[1]));
        }
    }

    /// Precision, recall and F1 stay within [0, 1] in both modes.
    #[test]
    fn metrics_are_bounded(
        gold in prop::collection::vec(span_strategy(), 0..8),
        pred in prop::collection::vec(span_strategy(), 0..8),
    ) {
        let evaluation = Evaluator::new().evaluate_entities("p", &gold, &pred);

        for mode in MatchMode::ALL {
            let counts = evaluation.counts(mode);
            for value in [counts.precision(), counts.recall(), counts.f1_score()] {
                prop_assert!((0.0..=1.0).contains(&value));
            }
            prop_assert_eq!(
                counts.true_positives + counts.false_positives,
                counts.predicted_total
            );
        }
    }
}
