//! Native close primitive.
//!
//! The lifecycle controller releases a channel's handle through this trait
//! exactly once, and only after it has verified that no operation
//! referencing the handle is still in the ring.
//!
//! # Implementors
//!
//! - `SysClose` (default, `ringchan` crate): `close(2)` via `nix`.
//!   Errors are logged, never raised: by the time close runs, the channel
//!   has already committed to the `Closed` state.
//!
//! - Test doubles that record which handles were closed.

use std::os::fd::RawFd;

/// Releases an OS handle.
pub trait NativeClose {
    fn close_handle(&self, fd: RawFd);
}

impl<T: NativeClose + ?Sized> NativeClose for std::sync::Arc<T> {
    fn close_handle(&self, fd: RawFd) {
        (**self).close_handle(fd)
    }
}
