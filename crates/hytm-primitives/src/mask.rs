//! Byte masks for sub-word transactional access
//!
//! Byte `i` of a word occupies bits `8 * i .. 8 * i + 8`.

/// Mask selecting every byte of a word
pub const FULL_MASK: u64 = u64::MAX;

/// Build a mask covering `len` bytes starting at byte `offset`
///
/// Bytes past the end of the word are ignored.
pub fn byte_mask(offset: usize, len: usize) -> u64 {
    if offset >= 8 || len == 0 {
        return 0;
    }
    let end = offset.saturating_add(len).min(8);
    let bits = (end - offset) * 8;
    let low = if bits == 64 { u64::MAX } else { (1u64 << bits) - 1 };
    low << (offset * 8)
}

/// Overlay the masked bytes of `update` onto `base`
#[inline]
pub fn merge(base: u64, update: u64, mask: u64) -> u64 {
    (base & !mask) | (update & mask)
}

/// Check whether `outer` selects every byte `inner` selects
#[inline]
pub fn covers(outer: u64, inner: u64) -> bool {
    outer & inner == inner
}
