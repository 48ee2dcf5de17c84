//! Index correction
//!
//! Model-reported offsets are usually close to the real position but rarely
//! exact. The corrector looks for the mention in a window around the reported
//! offset and, depending on the configured strategy, falls back to the
//! occurrence nearest to it anywhere in the document.

use spanbind_core::{FallbackStrategy, LocatorConfig, Occurrence};

use crate::text::IndexedText;

/// Offset corrector with a configurable window and fallback
#[derive(Debug, Clone, Copy)]
pub struct IndexCorrector {
    window_half_width: usize,
    fallback: FallbackStrategy,
}

impl IndexCorrector {
    pub fn new(config: &LocatorConfig) -> Self {
        Self {
            window_half_width: config.window_half_width,
            fallback: config.fallback,
        }
    }

    pub fn with_window(mut self, half_width: usize) -> Self {
        self.window_half_width = half_width;
        self
    }

    pub fn with_fallback(mut self, fallback: FallbackStrategy) -> Self {
        self.fallback = fallback;
        self
    }

    /// Character window `[start, end)` searched around `approx_start`,
    /// widened on the right so the mention itself fits.
    pub fn window(&self, approx_start: usize, mention_len: usize, text_len: usize) -> (usize, usize) {
        let start = approx_start.saturating_sub(self.window_half_width).min(text_len);
        let end = approx_start
            .saturating_add(self.window_half_width)
            .saturating_add(mention_len)
            .min(text_len);
        (start, end)
    }

    /// Resolve a single mention against every occurrence in the document
    /// text, using the same policy as [`choose`](Self::choose).
    ///
    /// Other mentions are not taken into account, so overlaps are possible.
    /// Without an offset the search anchors at the start of the document.
    pub fn correct(
        &self,
        text: &IndexedText<'_>,
        mention: &str,
        approx_start: Option<usize>,
    ) -> Option<Occurrence> {
        let mention = mention.trim();
        if mention.is_empty() {
            return None;
        }

        let candidates: Vec<Occurrence> = text
            .find_all(mention)
            .into_iter()
            .map(|start| Occurrence::new(mention, start))
            .collect();
        let chosen = self.choose(&candidates, approx_start.unwrap_or(0), text.char_len())?;
        candidates.into_iter().nth(chosen)
    }

    /// Pick one of `candidates` (ascending by start) for a request reporting
    /// `approx_start`. Returns the index of the chosen candidate.
    pub fn choose(
        &self,
        candidates: &[Occurrence],
        approx_start: usize,
        text_len: usize,
    ) -> Option<usize> {
        if let Some(exact) = candidates.iter().position(|c| c.start == approx_start) {
            return Some(exact);
        }

        if self.fallback != FallbackStrategy::GlobalOnly {
            let in_window = candidates.iter().position(|c| {
                let (start, end) = self.window(approx_start, c.end - c.start, text_len);
                c.start >= start && c.end <= end
            });
            if in_window.is_some() {
                return in_window;
            }
        }

        if self.fallback == FallbackStrategy::WindowOnly {
            return None;
        }

        candidates
            .iter()
            .enumerate()
            .min_by_key(|(_, c)| (c.start.abs_diff(approx_start), c.start))
            .map(|(idx, _)| idx)
    }
}

impl Default for IndexCorrector {
    fn default() -> Self {
        Self::new(&LocatorConfig::default())
    }
}
