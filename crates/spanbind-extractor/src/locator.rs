//! Span location
//!
//! Finds every non-overlapping occurrence of a set of mention strings in a
//! document. Longer mentions claim their characters first, so "Anna Karlsson"
//! is located before the "Anna" it contains and the shorter mention only
//! binds to occurrences outside it.

use std::collections::{BTreeMap, BTreeSet};

use spanbind_core::Occurrence;

use crate::text::IndexedText;

/// Occurrences found for one document
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocatedSpans {
    /// All accepted occurrences, ascending by start
    pub occurrences: Vec<Occurrence>,
    /// Mentions with no occurrence at all, sorted
    pub unmatched: Vec<String>,
}

impl LocatedSpans {
    /// Per-mention queues of occurrences, each ascending by start
    pub fn pools(&self) -> BTreeMap<String, Vec<Occurrence>> {
        let mut pools: BTreeMap<String, Vec<Occurrence>> = BTreeMap::new();
        for occ in &self.occurrences {
            pools.entry(occ.text.clone()).or_default().push(occ.clone());
        }
        pools
    }

    pub fn is_empty(&self) -> bool {
        self.occurrences.is_empty()
    }
}

/// Longest-first, non-overlapping mention locator
#[derive(Debug, Clone, Copy, Default)]
pub struct SpanLocator;

impl SpanLocator {
    pub fn new() -> Self {
        Self
    }

    /// Locate all mentions in `text`. Mentions are trimmed and deduplicated;
    /// empty ones are ignored.
    pub fn locate<'m, I>(&self, text: &IndexedText<'_>, mentions: I) -> LocatedSpans
    where
        I: IntoIterator<Item = &'m str>,
    {
        let unique: BTreeSet<&str> = mentions
            .into_iter()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .collect();

        // Longest first; ties in lexicographic order from the BTreeSet
        let mut ordered: Vec<(usize, &str)> =
            unique.iter().map(|m| (m.chars().count(), *m)).collect();
        ordered.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1)));

        let mut occupied = vec![false; text.char_len()];
        let mut occurrences = Vec::new();
        let mut unmatched = Vec::new();

        for (len, mention) in ordered {
            let mut found = false;
            let mut cursor = 0;

            while let Some(start) = text.find_from(mention, cursor) {
                let end = start + len;
                if occupied[start..end].iter().any(|&taken| taken) {
                    // A tighter occurrence may start inside this one
                    cursor = start + 1;
                    continue;
                }

                occupied[start..end].iter_mut().for_each(|taken| *taken = true);
                occurrences.push(Occurrence::new(mention, start));
                found = true;
                cursor = end;
            }

            if !found {
                unmatched.push(mention.to_string());
            }
        }

        occurrences.sort_by(|a, b| a.start.cmp(&b.start).then_with(|| a.end.cmp(&b.end)));
        unmatched.sort();

        LocatedSpans {
            occurrences,
            unmatched,
        }
    }
}
