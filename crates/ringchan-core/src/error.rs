//! ringchan error types.

use std::fmt;

use crate::entry::{ChannelId, Direction, OpId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChanError {
    /// Close refused: operations are still in flight. Retry after they settle.
    OperationPending { reads: usize, writes: usize },
    /// The ring completed an operation this channel has no record of.
    CompletionMismatch { direction: Direction, op: OpId },
    /// An operation id was registered twice in the same direction.
    DuplicateOperation { direction: Direction, op: OpId },
    /// A completion or request named a channel the driver does not own.
    UnknownChannel(ChannelId),
    /// The channel hit a fault earlier and accepts no new operations.
    Faulted,
    /// The channel is draining towards a deferred close.
    Closing,
    /// The channel is closed.
    Closed,
    /// The per-direction in-flight limit is reached.
    InFlightLimit { direction: Direction, limit: usize },
    /// The request queue is full.
    QueueFull,
    /// The ring's submission queue is full, even after a flush.
    RingFull,
    /// io_uring setup failed.
    RingSetup(i32),
    /// io_uring_enter failed.
    RingSubmit(i32),
    /// OS error with errno.
    Os(i32),
}

impl ChanError {
    /// Broken submission/completion bookkeeping, as opposed to a policy
    /// refusal or an OS condition. Faults must not be swallowed.
    pub fn is_fault(&self) -> bool {
        matches!(
            self,
            Self::CompletionMismatch { .. } | Self::DuplicateOperation { .. } | Self::UnknownChannel(_)
        )
    }
}

impl fmt::Display for ChanError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::OperationPending { reads, writes } => write!(
                f,
                "cannot close with pending I/O ({} reads, {} writes in flight)",
                reads, writes
            ),
            Self::CompletionMismatch { direction, op } => {
                write!(f, "completion mismatch: no {} buffer registered for {}", direction, op)
            }
            Self::DuplicateOperation { direction, op } => {
                write!(f, "duplicate {} operation {}", direction, op)
            }
            Self::UnknownChannel(id) => write!(f, "unknown channel {}", id),
            Self::Faulted => write!(f, "channel faulted"),
            Self::Closing => write!(f, "channel closing"),
            Self::Closed => write!(f, "channel closed"),
            Self::InFlightLimit { direction, limit } => {
                write!(f, "{} in-flight limit {} reached", direction, limit)
            }
            Self::QueueFull => write!(f, "request queue full"),
            Self::RingFull => write!(f, "ring full"),
            Self::RingSetup(e) => write!(f, "io_uring setup: errno {}", e),
            Self::RingSubmit(e) => write!(f, "io_uring submit: errno {}", e),
            Self::Os(e) => write!(f, "OS error: errno {}", e),
        }
    }
}

impl std::error::Error for ChanError {}

pub type Result<T> = std::result::Result<T, ChanError>;
