//! Cache-line padding for hot shared state

use std::ops::{Deref, DerefMut};

/// Cache line size assumed when padding shared state
///
/// Must match the alignment of [`CachePadded`].
pub const CACHE_LINE_SIZE: usize = 64;

/// Value aligned and padded to a full cache line
///
/// Keeps the clock and the mode indicator off the lines that hold
/// application data so their CAS traffic does not cause false sharing.
#[derive(Debug, Default)]
#[repr(align(64))]
pub struct CachePadded<T> {
    value: T,
}

const _: () = assert!(std::mem::align_of::<CachePadded<u8>>() == CACHE_LINE_SIZE);

impl<T> CachePadded<T> {
    /// Wrap a value
    pub const fn new(value: T) -> Self {
        Self { value }
    }

    /// Unwrap the value
    pub fn into_inner(self) -> T {
        self.value
    }
}

impl<T> Deref for CachePadded<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T> DerefMut for CachePadded<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.value
    }
}
