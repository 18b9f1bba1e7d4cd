//! Maps an archive-body byte offset to the stream-sidecar offset of the
//! entry that contains it, in O(log N).
//!
//! The source system builds a balanced binary tree bottom-up from the jump
//! sidecar's entries. A sorted array searched with binary search is
//! equivalent in complexity and simpler to reason about and test, so that
//! is what this module does.

use crate::zip_records::JumpEntry;

/// A sorted-by-`archive_offset` view over an archive's jump entries.
#[derive(Debug, Clone)]
pub struct SeekTree {
    entries: Vec<JumpEntry>,
}

impl SeekTree {
    /// Builds a seek tree from jump entries in any order; they are sorted
    /// by `archive_offset` internally since Central Directory iteration
    /// order is not guaranteed to already be ascending.
    pub fn build(mut entries: Vec<JumpEntry>) -> Self {
        entries.sort_unstable_by_key(|e| e.archive_offset);
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Finds the entry whose range contains `offset`: the entry with the
    /// greatest `archive_offset` that is `<= offset`.
    pub fn find(&self, offset: u64) -> Option<JumpEntry> {
        if self.entries.is_empty() {
            return None;
        }

        match self
            .entries
            .binary_search_by_key(&offset, |e| e.archive_offset)
        {
            Ok(idx) => Some(self.entries[idx]),
            Err(0) => None,
            Err(idx) => Some(self.entries[idx - 1]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(archive_offset: u64, stream_offset: u64) -> JumpEntry {
        JumpEntry {
            archive_offset,
            stream_offset,
        }
    }

    #[test]
    fn finds_exact_and_enclosing_entries() {
        let tree = SeekTree::build(vec![entry(0, 0), entry(100, 51), entry(250, 120)]);

        assert_eq!(tree.find(0).unwrap().stream_offset, 0);
        assert_eq!(tree.find(50).unwrap().stream_offset, 0);
        assert_eq!(tree.find(100).unwrap().stream_offset, 51);
        assert_eq!(tree.find(249).unwrap().stream_offset, 51);
        assert_eq!(tree.find(250).unwrap().stream_offset, 120);
        assert_eq!(tree.find(10_000).unwrap().stream_offset, 120);
    }

    #[test]
    fn offset_before_first_entry_is_none() {
        let tree = SeekTree::build(vec![entry(10, 0)]);
        assert!(tree.find(5).is_none());
    }

    #[test]
    fn sorts_unordered_input() {
        let tree = SeekTree::build(vec![entry(200, 2), entry(0, 0), entry(100, 1)]);
        assert_eq!(tree.find(150).unwrap().stream_offset, 1);
    }

    #[test]
    fn empty_tree_finds_nothing() {
        let tree = SeekTree::build(vec![]);
        assert!(tree.find(0).is_none());
    }
}
