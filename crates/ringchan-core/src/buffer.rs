//! Buffer ownership abstraction.
//!
//! A buffer submitted with a read or write is dereferenced by the kernel
//! long after the submitting call has returned. Two properties make that
//! sound, and both are encoded in the unsafe traits below:
//!
//! - the memory behind `stable_ptr()` does not move when the buffer value
//!   itself is moved (into a registry map, into a callback);
//! - nothing else touches the memory while the buffer sits in a channel's
//!   registry, which the registry guarantees by owning it.
//!
//! A `BufferProvider` hands out buffers to the submission path.
//!
//! # Implementors
//!
//! - `HeapBuffers` (default, `ringchan` crate): one heap allocation per
//!   operation. No pre-registration, no pinning.
//!
//! Recycling providers would need failed operations to hand their buffer
//! back, which the exception path does not do.

/// A buffer the ring may read from.
///
/// # Safety
///
/// `stable_ptr()` must return the same address for as long as the value is
/// alive, even across moves, and `bytes_init()` bytes at that address must
/// be initialised and readable.
pub unsafe trait IoBuf: Send + 'static {
    /// Start of the buffer memory.
    fn stable_ptr(&self) -> *const u8;

    /// Number of initialised bytes (what a write sends).
    fn bytes_init(&self) -> usize;

    /// Total capacity (what a read may fill).
    fn bytes_total(&self) -> usize;
}

/// A buffer the ring may write into.
///
/// # Safety
///
/// Same as [`IoBuf`], and `stable_mut_ptr()` must be valid for writes of
/// `bytes_total()` bytes.
pub unsafe trait IoBufMut: IoBuf {
    fn stable_mut_ptr(&mut self) -> *mut u8;

    /// Mark the first `len` bytes as initialised.
    ///
    /// # Safety
    ///
    /// The caller guarantees those bytes were written (by the kernel).
    unsafe fn set_init(&mut self, len: usize);
}

unsafe impl IoBuf for Vec<u8> {
    #[inline]
    fn stable_ptr(&self) -> *const u8 {
        self.as_ptr()
    }

    #[inline]
    fn bytes_init(&self) -> usize {
        self.len()
    }

    #[inline]
    fn bytes_total(&self) -> usize {
        self.capacity()
    }
}

unsafe impl IoBufMut for Vec<u8> {
    #[inline]
    fn stable_mut_ptr(&mut self) -> *mut u8 {
        self.as_mut_ptr()
    }

    #[inline]
    unsafe fn set_init(&mut self, len: usize) {
        debug_assert!(len <= self.capacity());
        self.set_len(len);
    }
}

/// Hands out buffers to the submission path.
///
/// **Contract:**
/// - `acquire()` returns a buffer with at least `min_size` bytes of capacity.
/// - Buffers are owned outright once handed out. A buffer whose operation
///   failed is dropped inside the channel, so there is no give-back path.
pub trait BufferProvider: Send + Sync {
    type Buf: IoBufMut;

    /// Acquire a buffer of at least `min_size` bytes.
    ///
    /// Returns `None` if the provider is exhausted.
    fn acquire(&self, min_size: usize) -> Option<Self::Buf>;
}
