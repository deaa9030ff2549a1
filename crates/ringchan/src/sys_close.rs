//! `SysClose`: default `NativeClose` implementation.
//!
//! Plain `close(2)` through `nix`. A failing close is logged and otherwise
//! ignored: the handle is gone either way (Linux releases the descriptor
//! even when close reports an error), and the channel has already
//! committed to `Closed`.

use ringchan_core::native::NativeClose;

use std::os::fd::RawFd;

#[derive(Debug, Default, Clone, Copy)]
pub struct SysClose;

impl NativeClose for SysClose {
    fn close_handle(&self, fd: RawFd) {
        if let Err(errno) = nix::unistd::close(fd) {
            log::warn!("ringchan: close({}) failed: {}", fd, errno);
        }
    }
}
