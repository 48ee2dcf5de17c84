//! Character-indexed text
//!
//! Offsets exchanged with annotators and models count characters, while
//! `str` searches work on bytes. `IndexedText` keeps the byte offset of every
//! character boundary so searches run on bytes and report characters.

/// A document text with a character boundary table
#[derive(Debug, Clone)]
pub struct IndexedText<'a> {
    text: &'a str,
    /// `boundaries[i]` is the byte offset of character `i`; the last entry is `text.len()`
    boundaries: Vec<usize>,
}

impl<'a> IndexedText<'a> {
    pub fn new(text: &'a str) -> Self {
        let boundaries = text
            .char_indices()
            .map(|(b, _)| b)
            .chain(std::iter::once(text.len()))
            .collect();
        Self { text, boundaries }
    }

    pub fn as_str(&self) -> &'a str {
        self.text
    }

    /// Length in characters
    pub fn char_len(&self) -> usize {
        self.boundaries.len() - 1
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Slice by character offsets `[start, end)`
    pub fn slice(&self, start: usize, end: usize) -> Option<&'a str> {
        if start > end || end > self.char_len() {
            return None;
        }
        Some(&self.text[self.boundaries[start]..self.boundaries[end]])
    }

    /// Character offset of the first occurrence of `needle` starting at or after `from`
    pub fn find_from(&self, needle: &str, from: usize) -> Option<usize> {
        self.find_in(needle, from, self.char_len())
    }

    /// Character offset of the first occurrence of `needle` lying entirely in `[start, end)`
    pub fn find_in(&self, needle: &str, start: usize, end: usize) -> Option<usize> {
        if needle.is_empty() || start > end || end > self.char_len() {
            return None;
        }
        let begin = self.boundaries[start];
        let haystack = &self.text[begin..self.boundaries[end]];
        haystack
            .find(needle)
            .map(|rel| self.char_at_byte(begin + rel))
    }

    /// Start offsets of all left-to-right, non-overlapping occurrences of `needle`
    pub fn find_all(&self, needle: &str) -> Vec<usize> {
        let needle_len = needle.chars().count();
        let mut starts = Vec::new();
        let mut from = 0;
        while let Some(start) = self.find_from(needle, from) {
            starts.push(start);
            from = start + needle_len;
        }
        starts
    }

    fn char_at_byte(&self, byte: usize) -> usize {
        // Matches of a valid UTF-8 needle always begin on a char boundary
        self.boundaries
            .binary_search(&byte)
            .unwrap_or_else(|insert_at| insert_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_char_offsets_for_swedish_text() {
        let text = IndexedText::new("Kör till Växjö, Åke");
        assert_eq!(text.char_len(), 19);
        assert_eq!(text.find_from("Växjö", 0), Some(9));
        assert_eq!(text.find_from("Åke", 0), Some(16));
        assert_eq!(text.slice(9, 14), Some("Växjö"));
    }

    #[test]
    fn test_find_in_requires_full_containment() {
        let text = IndexedText::new("abc Kalle def");
        assert_eq!(text.find_in("Kalle", 0, 9), Some(4));
        assert_eq!(text.find_in("Kalle", 0, 8), None);
        assert_eq!(text.find_in("Kalle", 5, 13), None);
    }

    #[test]
    fn test_find_all_non_overlapping() {
        let text = IndexedText::new("aaaa");
        assert_eq!(text.find_all("aa"), vec![0, 2]);
        assert!(text.find_all("").is_empty());
        assert!(text.find_all("b").is_empty());
    }

    #[test]
    fn test_out_of_range() {
        let text = IndexedText::new("kort");
        assert_eq!(text.slice(2, 9), None);
        assert_eq!(text.find_from("t", 5), None);
        assert_eq!(text.find_from("t", 4), None);
        assert!(IndexedText::new("").is_empty());
    }
}
