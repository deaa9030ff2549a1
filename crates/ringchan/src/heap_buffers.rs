//! `HeapBuffers`: default `BufferProvider` implementation.
//!
//! Each buffer is a plain `Vec<u8>` heap allocation, one per operation.
//! No pre-registration, no page pinning.

use ringchan_core::buffer::BufferProvider;

use std::sync::atomic::{AtomicUsize, Ordering};

pub struct HeapBuffers {
    /// Default buffer size for allocations.
    default_size: usize,
    /// Total allocated (for diagnostics).
    total: AtomicUsize,
}

impl HeapBuffers {
    pub fn new(default_size: usize) -> Self {
        Self {
            default_size,
            total: AtomicUsize::new(0),
        }
    }

    /// Buffers allocated over the provider's lifetime.
    pub fn allocated(&self) -> usize {
        self.total.load(Ordering::Relaxed)
    }
}

impl Default for HeapBuffers {
    fn default() -> Self {
        Self::new(crate::config::defaults::BUFFER_SIZE)
    }
}

impl BufferProvider for HeapBuffers {
    type Buf = Vec<u8>;

    fn acquire(&self, min_size: usize) -> Option<Vec<u8>> {
        let size = min_size.max(self.default_size);
        self.total.fetch_add(1, Ordering::Relaxed);
        Some(Vec::with_capacity(size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquire_honours_minimum() {
        let p = HeapBuffers::new(64);
        let small = p.acquire(10).unwrap();
        let big = p.acquire(1000).unwrap();
        assert!(small.capacity() >= 64);
        assert!(big.capacity() >= 1000);
        assert!(small.is_empty());
        assert_eq!(p.allocated(), 2);
    }

    #[test]
    fn dropped_buffers_stay_counted() {
        let p = HeapBuffers::default();
        drop(p.acquire(0).unwrap());
        drop(p.acquire(0).unwrap());
        // Counts allocations, not live buffers.
        assert_eq!(p.allocated(), 2);
        assert!(p.acquire(0).unwrap().capacity() >= crate::config::defaults::BUFFER_SIZE);
    }
}
