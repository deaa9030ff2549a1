//! Identifier and completion payload types.
//!
//! These are the *lingua franca* between the channel state machine, the
//! driver that talks to the ring, and application callbacks.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// Process-unique channel token.
///
/// Handed out once per channel at construction. Tokens are unique for 2^32
/// allocations, so a stale token cannot address a newer channel that happens
/// to share its fd. The counter wraps after that and skips 0. It does not
/// expose the native handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct ChannelId(u32);

static NEXT_CHANNEL_ID: AtomicU32 = AtomicU32::new(1);

impl ChannelId {
    /// Allocate a fresh token.
    pub fn next() -> Self {
        Self(allocate(&NEXT_CHANNEL_ID))
    }

    /// Rebuild a token from its packed form (used when decoding `user_data`).
    #[inline]
    pub const fn from_u32(raw: u32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn as_u32(self) -> u32 {
        self.0
    }
}

/// Take the next non-zero value from `counter`.
fn allocate(counter: &AtomicU32) -> u32 {
    loop {
        let raw = counter.fetch_add(1, Ordering::Relaxed);
        if raw != 0 {
            return raw;
        }
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ch#{}", self.0)
    }
}

/// Operation identifier.
///
/// Unique among the in-flight operations of one channel. Only the low 31
/// bits are significant so the id fits the packed correlation token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(transparent)]
pub struct OpId(pub u32);

impl OpId {
    /// Largest representable operation id.
    pub const MAX: Self = Self((1 << 31) - 1);

    /// The id following `self`, wrapping inside the 31-bit space.
    #[inline]
    pub const fn successor(self) -> Self {
        Self((self.0 + 1) & Self::MAX.0)
    }
}

impl fmt::Display for OpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Which registry / pending counter an operation belongs to.
///
/// Accepts on a listening channel travel in the `Read` direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Direction {
    Read = 0,
    Write = 1,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Read => write!(f, "read"),
            Direction::Write => write!(f, "write"),
        }
    }
}

/// Payload of a successful read or write completion.
///
/// The buffer is the very object that was submitted; ownership moves to the
/// callback. For reads, `buf` has been truncated to the `bytes` received.
#[derive(Debug)]
pub struct Completed<B> {
    pub op: OpId,
    pub buf: B,
    pub bytes: usize,
}

impl<B> Completed<B> {
    pub fn into_buf(self) -> B {
        self.buf
    }
}

/// Why a completed operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The kernel reported a negative errno.
    Os(i32),
    /// A read returned zero bytes: the peer closed its end.
    PeerClosed,
}

/// I/O-level failure delivered to the exception callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IoFailure {
    pub op: OpId,
    pub direction: Direction,
    pub kind: FailureKind,
}

impl IoFailure {
    pub fn os(op: OpId, direction: Direction, errno: i32) -> Self {
        Self { op, direction, kind: FailureKind::Os(errno) }
    }

    pub fn peer_closed(op: OpId) -> Self {
        Self { op, direction: Direction::Read, kind: FailureKind::PeerClosed }
    }

    /// Equivalent `std::io::Error`, for handlers that want to propagate it.
    pub fn to_io_error(&self) -> std::io::Error {
        match self.kind {
            FailureKind::Os(errno) => std::io::Error::from_raw_os_error(errno),
            FailureKind::PeerClosed => std::io::ErrorKind::UnexpectedEof.into(),
        }
    }
}

impl fmt::Display for IoFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            FailureKind::Os(errno) => write!(
                f,
                "{} {} failed: {}",
                self.direction,
                self.op,
                std::io::Error::from_raw_os_error(errno)
            ),
            FailureKind::PeerClosed => write!(f, "{} {}: peer closed", self.direction, self.op),
        }
    }
}

impl std::error::Error for IoFailure {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_ids_are_unique() {
        let a = ChannelId::next();
        let b = ChannelId::next();
        assert_ne!(a, b);
        assert_eq!(ChannelId::from_u32(a.as_u32()), a);
    }

    #[test]
    fn channel_id_counter_skips_zero_on_wrap() {
        let counter = AtomicU32::new(u32::MAX);
        assert_eq!(allocate(&counter), u32::MAX);
        assert_eq!(allocate(&counter), 1);
        assert_eq!(allocate(&counter), 2);
    }

    #[test]
    fn op_id_wraps_inside_31_bits() {
        assert_eq!(OpId(5).successor(), OpId(6));
        assert_eq!(OpId::MAX.successor(), OpId(0));
    }

    #[test]
    fn failure_display_and_io_error() {
        let f = IoFailure::os(OpId(3), Direction::Write, libc_epipe());
        assert!(f.to_string().starts_with("write op#3 failed"));
        assert_eq!(f.to_io_error().raw_os_error(), Some(libc_epipe()));

        let f = IoFailure::peer_closed(OpId(9));
        assert_eq!(f.to_string(), "read op#9: peer closed");
        assert_eq!(f.to_io_error().kind(), std::io::ErrorKind::UnexpectedEof);
    }

    // EPIPE is 32 on every Linux architecture.
    fn libc_epipe() -> i32 {
        32
    }
}
