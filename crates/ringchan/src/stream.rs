//! `Stream`: byte-stream channel (connected socket, pipe end, file).
//!
//! Application code configures handlers through `DuplexChannel` and hands
//! the stream to a `Driver`. The driver builds submissions with
//! `prepare_read` / `prepare_write` and routes completions back through
//! `complete`.

use ringchan_core::buffer::IoBuf;
use ringchan_core::channel::{CloseOutcome, DuplexChannel, IoChannel};
use ringchan_core::entry::{ChannelId, Completed, Direction, IoFailure, OpId};
use ringchan_core::error::{ChanError, Result};

use io_uring::{opcode, squeue, types};
use nix::fcntl::OFlag;
use nix::unistd::pipe2;

use std::net::TcpStream;
use std::os::fd::OwnedFd;

use crate::state::{ChannelState, Lifecycle, Limits};
use crate::token;

pub struct Stream {
    state: ChannelState<Vec<u8>>,
}

impl Stream {
    /// Create a connected pair `(read end, write end)` over `pipe2(2)`.
    pub fn pipe() -> std::io::Result<(Stream, Stream)> {
        let (r, w) = pipe2(OFlag::O_CLOEXEC)?;
        Ok((Stream::from(r), Stream::from(w)))
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    pub fn is_faulted(&self) -> bool {
        self.state.is_faulted()
    }

    pub fn reads_in_flight(&self) -> usize {
        self.state.reads_in_flight()
    }

    pub fn writes_in_flight(&self) -> usize {
        self.state.writes_in_flight()
    }

    pub(crate) fn set_limits(&mut self, limits: Limits) {
        self.state.set_limits(limits);
    }

    /// Register `buf` for a read and build the matching SQE.
    ///
    /// The read fills the buffer from its start, up to its capacity.
    pub(crate) fn prepare_read(&mut self, buf: Vec<u8>) -> Result<(OpId, squeue::Entry)> {
        let id = self.state.id();
        let fd = types::Fd(self.state.fd());
        let op = self.state.begin(Direction::Read, buf)?;
        let buf = self
            .state
            .buffer_mut(Direction::Read, op)
            .ok_or(ChanError::CompletionMismatch { direction: Direction::Read, op })?;
        let len = buf.capacity().min(u32::MAX as usize) as u32;
        let sqe = opcode::Read::new(fd, buf.as_mut_ptr(), len)
            .offset(u64::MAX) // -1 = current file position
            .build()
            .user_data(token::pack(id, Direction::Read, op));
        Ok((op, sqe))
    }

    /// Register `buf` for a write of its initialised bytes and build the SQE.
    pub(crate) fn prepare_write(&mut self, buf: Vec<u8>) -> Result<(OpId, squeue::Entry)> {
        let id = self.state.id();
        let fd = types::Fd(self.state.fd());
        let op = self.state.begin(Direction::Write, buf)?;
        let buf = self
            .state
            .buffer_mut(Direction::Write, op)
            .ok_or(ChanError::CompletionMismatch { direction: Direction::Write, op })?;
        let len = buf.bytes_init().min(u32::MAX as usize) as u32;
        let sqe = opcode::Write::new(fd, buf.stable_ptr(), len)
            .offset(u64::MAX)
            .build()
            .user_data(token::pack(id, Direction::Write, op));
        Ok((op, sqe))
    }

    /// Undo a `prepare_*` whose SQE never reached the ring.
    pub(crate) fn abort(&mut self, direction: Direction, op: OpId) -> Result<Vec<u8>> {
        let buf = self.state.finish(direction, op)?;
        self.state.settle();
        Ok(buf)
    }

    pub(crate) fn complete(&mut self, direction: Direction, op: OpId, result: i32) -> Result<()> {
        match direction {
            Direction::Read => self.state.complete_read(op, result),
            Direction::Write => self.state.complete_write(op, result),
        }
    }
}

impl From<OwnedFd> for Stream {
    fn from(fd: OwnedFd) -> Self {
        Self { state: ChannelState::new(fd) }
    }
}

impl From<TcpStream> for Stream {
    fn from(stream: TcpStream) -> Self {
        Self::from(OwnedFd::from(stream))
    }
}

impl IoChannel for Stream {
    fn id(&self) -> ChannelId {
        self.state.id()
    }

    fn close(&mut self) -> Result<()> {
        self.state.close()
    }

    fn close_when_idle(&mut self) -> CloseOutcome {
        self.state.close_when_idle()
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn is_closing(&self) -> bool {
        self.state.is_closing()
    }

    fn is_read_pending(&self) -> bool {
        self.state.is_read_pending()
    }

    fn is_write_pending(&self) -> bool {
        self.state.is_write_pending()
    }

    fn on_exception<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(IoFailure) + Send + 'static,
    {
        self.state.on_exception(handler);
        self
    }
}

impl DuplexChannel for Stream {
    type Buf = Vec<u8>;

    fn on_read<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<Vec<u8>>) + Send + 'static,
    {
        self.state.on_read(handler);
        self
    }

    fn on_write<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<Vec<u8>>) + Send + 'static,
    {
        self.state.on_write(handler);
        self
    }
}

impl std::fmt::Debug for Stream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("Stream").field(&self.state).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn prepare_read_stamps_token() {
        let (mut r, _w) = Stream::pipe().unwrap();
        let (op, sqe) = r.prepare_read(Vec::with_capacity(32)).unwrap();
        assert_eq!(token::unpack(sqe.get_user_data()), (r.id(), Direction::Read, op));
        assert!(r.is_read_pending());
        assert!(matches!(r.close(), Err(ChanError::OperationPending { .. })));

        let buf = r.abort(Direction::Read, op).unwrap();
        assert_eq!(buf.capacity(), 32);
        assert!(!r.is_read_pending());
        r.close().unwrap();
    }

    #[test]
    fn completion_without_ring() {
        let (_r, mut w) = Stream::pipe().unwrap();
        let got = Arc::new(Mutex::new(None));
        let g = got.clone();
        w.on_write(move |done| *g.lock().unwrap() = Some(done.bytes));

        let (op, sqe) = w.prepare_write(b"abc".to_vec()).unwrap();
        assert_eq!(token::unpack(sqe.get_user_data()).1, Direction::Write);
        w.complete(Direction::Write, op, 3).unwrap();
        assert_eq!(*got.lock().unwrap(), Some(3));
        assert!(!w.is_write_pending());
    }

    #[test]
    fn pipe_ends_are_close_on_exec() {
        let (r, w) = Stream::pipe().unwrap();
        for s in [&r, &w] {
            let flags = nix::fcntl::fcntl(s.state.fd(), nix::fcntl::FcntlArg::F_GETFD).unwrap();
            assert!(nix::fcntl::FdFlag::from_bits_truncate(flags).contains(nix::fcntl::FdFlag::FD_CLOEXEC));
        }
        assert_ne!(r.id(), w.id());
    }

    #[test]
    fn second_read_hits_default_limit() {
        let (mut r, _w) = Stream::pipe().unwrap();
        let (op, _) = r.prepare_read(Vec::with_capacity(8)).unwrap();
        assert!(matches!(
            r.prepare_read(Vec::with_capacity(8)),
            Err(ChanError::InFlightLimit { direction: Direction::Read, limit: 1 })
        ));
        r.abort(Direction::Read, op).unwrap();
    }
}
