//! Per-transaction read and write logs

use crate::mask::merge;
use crate::word::TmWord;
use std::collections::HashMap;
use std::sync::atomic::Ordering;

/// Write log size above which lookups go through a hash index
const INDEX_THRESHOLD: usize = 16;

/// A logged read
#[derive(Clone, Copy, Debug)]
pub struct ReadEntry<'a> {
    /// Word that was read
    pub word: &'a TmWord,
    /// Value observed
    pub value: u64,
    /// Bytes the read covered
    pub mask: u64,
}

impl<'a> ReadEntry<'a> {
    /// Check whether memory still holds the observed bytes
    #[inline]
    pub fn is_current(&self) -> bool {
        (self.word.load(Ordering::Relaxed) ^ self.value) & self.mask == 0
    }
}

/// Ordered trace of the reads a transaction performed
///
/// Insertion order is kept and duplicates are allowed; validation walks
/// the whole trace.
#[derive(Debug, Default)]
pub struct ReadLog<'a> {
    entries: Vec<ReadEntry<'a>>,
}

impl<'a> ReadLog<'a> {
    /// Create an empty read log
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Create an empty read log with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Record a read
    #[inline]
    pub fn record(&mut self, word: &'a TmWord, value: u64, mask: u64) {
        self.entries.push(ReadEntry { word, value, mask });
    }

    /// Re-read every logged word and compare with the logged bytes
    ///
    /// Loads are relaxed; the caller brackets this with the fences of
    /// its validation protocol.
    pub fn is_consistent(&self) -> bool {
        self.entries.iter().all(ReadEntry::is_current)
    }

    /// Iterate over logged reads in order
    pub fn iter(&self) -> impl Iterator<Item = &ReadEntry<'a>> {
        self.entries.iter()
    }

    /// Number of logged reads
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was read
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, keeping the allocation
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// A buffered write
#[derive(Clone, Copy, Debug)]
pub struct WriteEntry<'a> {
    /// Target word
    pub word: &'a TmWord,
    /// Pending value; bytes outside `mask` are zero
    pub value: u64,
    /// Bytes written so far
    pub mask: u64,
}

/// Buffered speculative writes, last write wins per word
///
/// Small logs are searched linearly behind a one-word bloom filter; once
/// the log grows past a threshold a hash index keyed by word address is
/// maintained as well.
#[derive(Debug, Default)]
pub struct WriteLog<'a> {
    entries: Vec<WriteEntry<'a>>,
    index: HashMap<usize, usize>,
    filter: u64,
}

#[inline]
fn filter_bit(addr: usize) -> u64 {
    1u64 << (((addr >> 3) ^ (addr >> 9)) & 63)
}

impl<'a> WriteLog<'a> {
    /// Create an empty write log
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            index: HashMap::new(),
            filter: 0,
        }
    }

    fn position(&self, addr: usize) -> Option<usize> {
        if self.filter & filter_bit(addr) == 0 {
            return None;
        }
        if self.entries.len() > INDEX_THRESHOLD {
            return self.index.get(&addr).copied();
        }
        self.entries.iter().position(|entry| entry.word.addr() == addr)
    }

    /// Buffer a write of the masked bytes of `value`
    pub fn insert(&mut self, word: &'a TmWord, value: u64, mask: u64) {
        let addr = word.addr();
        if let Some(pos) = self.position(addr) {
            let entry = &mut self.entries[pos];
            entry.value = merge(entry.value, value, mask);
            entry.mask |= mask;
            return;
        }

        self.entries.push(WriteEntry {
            word,
            value: value & mask,
            mask,
        });
        self.filter |= filter_bit(addr);

        let len = self.entries.len();
        if len == INDEX_THRESHOLD + 1 {
            self.index = self
                .entries
                .iter()
                .enumerate()
                .map(|(pos, entry)| (entry.word.addr(), pos))
                .collect();
        } else if len > INDEX_THRESHOLD {
            self.index.insert(addr, len - 1);
        }
    }

    /// Look up the buffered write for a word
    #[inline]
    pub fn find(&self, word: &TmWord) -> Option<&WriteEntry<'a>> {
        self.position(word.addr()).map(|pos| &self.entries[pos])
    }

    /// Apply every buffered write to memory
    ///
    /// The caller must hold the lock that makes it the only writer.
    pub fn write_back(&self) {
        for entry in &self.entries {
            entry.word.store_masked(entry.value, entry.mask, Ordering::Relaxed);
        }
    }

    /// Iterate over buffered writes
    pub fn iter(&self) -> impl Iterator<Item = &WriteEntry<'a>> {
        self.entries.iter()
    }

    /// Number of distinct words written
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing was written
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry, keeping the allocation
    pub fn clear(&mut self) {
        self.entries.clear();
        self.index.clear();
        self.filter = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mask::{byte_mask, FULL_MASK};

    // ==================== ReadLog Tests ====================

    #[test]
    fn test_read_log_order_and_duplicates() {
        let a = TmWord::new(1);
        let b = TmWord::new(2);
        let mut log = ReadLog::new();

        log.record(&a, 1, FULL_MASK);
        log.record(&b, 2, FULL_MASK);
        log.record(&a, 1, FULL_MASK);

        let values: Vec<u64> = log.iter().map(|e| e.value).collect();
        assert_eq!(values, vec![1, 2, 1]);
        assert_eq!(log.len(), 3);
    }

    #[test]
    fn test_read_log_detects_change() {
        let a = TmWord::new(1);
        let mut log = ReadLog::with_capacity(4);
        log.record(&a, 1, FULL_MASK);
        assert!(log.is_consistent());

        a.set(2);
        assert!(!log.is_consistent());
    }

    #[test]
    fn test_read_log_ignores_unmasked_bytes() {
        let a = TmWord::new(0x00FF);
        let mut log = ReadLog::new();
        log.record(&a, 0x00FF, byte_mask(0, 1));

        // Change a byte the read never covered
        a.set(0xAAFF);
        assert!(log.is_consistent());

        a.set(0xAA00);
        assert!(!log.is_consistent());
    }

    #[test]
    fn test_read_log_clear() {
        let a = TmWord::new(1);
        let mut log = ReadLog::new();
        log.record(&a, 1, FULL_MASK);
        log.clear();
        assert!(log.is_empty());
        assert!(log.is_consistent());
    }

    // ==================== WriteLog Tests ====================

    #[test]
    fn test_write_log_last_write_wins() {
        let a = TmWord::new(0);
        let mut log = WriteLog::new();

        log.insert(&a, 1, FULL_MASK);
        log.insert(&a, 2, FULL_MASK);

        assert_eq!(log.len(), 1);
        assert_eq!(log.find(&a).map(|e| e.value), Some(2));
    }

    #[test]
    fn test_write_log_merges_masks() {
        let a = TmWord::new(0);
        let mut log = WriteLog::new();

        log.insert(&a, 0x11, byte_mask(0, 1));
        log.insert(&a, 0x2200, byte_mask(1, 1));

        let entry = log.find(&a).copied().unwrap();
        assert_eq!(entry.value, 0x2211);
        assert_eq!(entry.mask, byte_mask(0, 2));
    }

    #[test]
    fn test_write_log_miss() {
        let a = TmWord::new(0);
        let b = TmWord::new(0);
        let mut log = WriteLog::new();
        log.insert(&a, 1, FULL_MASK);
        assert!(log.find(&b).is_none());
    }

    #[test]
    fn test_write_back_respects_masks() {
        let a = TmWord::new(0x1111_1111);
        let b = TmWord::new(5);
        let mut log = WriteLog::new();

        log.insert(&a, 0xBBBB, byte_mask(0, 2));
        log.insert(&b, 6, FULL_MASK);

        // Nothing reaches memory before write-back
        assert_eq!(a.get(), 0x1111_1111);
        log.write_back();

        assert_eq!(a.get(), 0x1111_BBBB);
        assert_eq!(b.get(), 6);
    }

    #[test]
    fn test_write_log_indexed_lookup() {
        let words: Vec<TmWord> = (0..64).map(TmWord::new).collect();
        let mut log = WriteLog::new();

        for (i, word) in words.iter().enumerate() {
            log.insert(word, i as u64 * 10, FULL_MASK);
        }
        // Overwrite after the index exists
        log.insert(&words[3], 999, FULL_MASK);
        log.insert(&words[40], 4000, FULL_MASK);

        assert_eq!(log.len(), 64);
        assert_eq!(log.find(&words[3]).map(|e| e.value), Some(999));
        assert_eq!(log.find(&words[40]).map(|e| e.value), Some(4000));
        assert_eq!(log.find(&words[63]).map(|e| e.value), Some(630));
    }

    #[test]
    fn test_write_log_clear_resets_index() {
        let words: Vec<TmWord> = (0..32).map(TmWord::new).collect();
        let mut log = WriteLog::new();
        for word in &words {
            log.insert(word, 1, FULL_MASK);
        }
        log.clear();

        assert!(log.is_empty());
        assert!(log.find(&words[20]).is_none());

        log.insert(&words[20], 7, FULL_MASK);
        assert_eq!(log.find(&words[20]).map(|e| e.value), Some(7));
    }
}
