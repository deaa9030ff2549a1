//! Channel capability traits.
//!
//! Every channel kind shares one lifecycle capability set (`IoChannel`).
//! Kinds then add what they can actually do:
//!
//! | Kind                  | Capabilities                    |
//! |-----------------------|---------------------------------|
//! | client socket, pipe   | `IoChannel` + `DuplexChannel`   |
//! | listening socket      | `IoChannel` + `AcceptChannel`   |
//!
//! Only the application-facing surface is here. Registering buffers,
//! toggling pending marks and reaching the native handle are reserved for
//! the submission/completion path inside the `ringchan` crate.
//!
//! ## Handler replacement
//!
//! Every `on_*` setter **replaces** the previously registered handler of
//! that kind. Handlers are not chained. Registering a second read handler
//! means the first one never fires again.

use crate::entry::{ChannelId, Completed, IoFailure};
use crate::error::Result;

/// Result of a graceful close request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseOutcome {
    /// The handle has been released (or already was).
    Closed,
    /// Operations are still in flight. The channel rejects new work and
    /// releases its handle when the last one completes.
    Deferred,
}

/// Lifecycle and error-callback capabilities shared by every channel kind.
pub trait IoChannel {
    /// Token addressing this channel.
    fn id(&self) -> ChannelId;

    /// Release the native handle.
    ///
    /// - already closed: no-op, `Ok(())`
    /// - idle: handle released, channel closed
    /// - busy: `Err(ChanError::OperationPending)`; the channel stays usable
    fn close(&mut self) -> Result<()>;

    /// Close now if idle, otherwise stop accepting work and close once the
    /// in-flight operations have drained.
    fn close_when_idle(&mut self) -> CloseOutcome;

    fn is_closed(&self) -> bool;

    /// `true` between a deferred close request and the actual close.
    fn is_closing(&self) -> bool;

    fn is_read_pending(&self) -> bool;

    fn is_write_pending(&self) -> bool;

    /// Set the handler for I/O failures. Replaces any previous handler.
    fn on_exception<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(IoFailure) + Send + 'static,
        Self: Sized;
}

/// A channel that reads and writes byte buffers.
pub trait DuplexChannel: IoChannel {
    type Buf;

    /// Set the read-completion handler. Replaces any previous handler.
    fn on_read<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<Self::Buf>) + Send + 'static,
        Self: Sized;

    /// Set the write-completion handler. Replaces any previous handler.
    fn on_write<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<Self::Buf>) + Send + 'static,
        Self: Sized;
}

/// A listening channel that produces new connections.
pub trait AcceptChannel: IoChannel {
    type Conn;

    /// Set the handler receiving each accepted connection and its peer
    /// address (when the address family is known). Replaces any previous
    /// handler.
    fn on_accept<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Self::Conn, Option<std::net::SocketAddr>) + Send + 'static,
        Self: Sized;
}
