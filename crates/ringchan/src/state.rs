//! `ChannelState`: the per-channel lifecycle controller.
//!
//! Composes the channel identity, the pending tracker, the buffer registry
//! and the callback set, and owns the one rule that matters most in
//! completion-queue I/O: a handle with operations in flight is never
//! closed. Closing early would let the ring report a completion against a
//! descriptor number the process has already reused.
//!
//! ```text
//!            close() / close_when_idle()  [idle]
//!   Open ─────────────────────────────────────────────► Closed
//!     │                                                   ▲
//!     │ close_when_idle()  [busy]                         │ last completion
//!     └──────────────► Closing ───────────────────────────┘
//! ```
//!
//! Two surfaces:
//! - the application surface (`IoChannel`, `DuplexChannel`);
//! - the submission/completion path (`pub(crate)`): `begin`, `finish`,
//!   `complete_read`, `complete_write`, the registry and the pending marks.
//!   Only the driver and the channel kinds in this crate reach them.
//!
//! Submission order: register buffer → mark pending → push to the ring.
//! Completion order: take buffer → clear pending → dispatch.
//!
//! `&mut self` everywhere: one driving loop owns a channel at a time.

use ringchan_core::buffer::IoBufMut;
use ringchan_core::channel::{CloseOutcome, DuplexChannel, IoChannel};
use ringchan_core::entry::{ChannelId, Completed, Direction, IoFailure, OpId};
use ringchan_core::error::{ChanError, Result};
use ringchan_core::native::NativeClose;

use crate::callbacks::Callbacks;
use crate::registry::BufferRegistry;
use crate::sys_close::SysClose;
use crate::tracker::PendingTracker;

use std::os::fd::{IntoRawFd, OwnedFd, RawFd};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Open,
    /// Draining: no new operations, closes itself when idle.
    Closing,
    /// Terminal.
    Closed,
}

/// Per-direction cap on concurrently in-flight operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Limits {
    pub reads: usize,
    pub writes: usize,
}

impl Limits {
    pub fn get(&self, direction: Direction) -> usize {
        match direction {
            Direction::Read => self.reads,
            Direction::Write => self.writes,
        }
    }
}

impl Default for Limits {
    /// One read and one write at a time.
    fn default() -> Self {
        Self { reads: 1, writes: 1 }
    }
}

pub struct ChannelState<B, C: NativeClose = SysClose> {
    id: ChannelId,
    handle: RawFd,
    lifecycle: Lifecycle,
    faulted: bool,
    limits: Limits,
    next_op: OpId,
    tracker: PendingTracker,
    buffers: BufferRegistry<B>,
    callbacks: Callbacks<B>,
    closer: C,
}

impl<B> ChannelState<B, SysClose> {
    /// Take ownership of an open descriptor.
    pub fn new(fd: OwnedFd) -> Self {
        Self::with_closer(fd.into_raw_fd(), SysClose)
    }
}

impl<B, C: NativeClose> ChannelState<B, C> {
    /// Take ownership of `handle`; `closer` releases it exactly once.
    pub fn with_closer(handle: RawFd, closer: C) -> Self {
        Self {
            id: ChannelId::next(),
            handle,
            lifecycle: Lifecycle::Open,
            faulted: false,
            limits: Limits::default(),
            next_op: OpId(0),
            tracker: PendingTracker::new(),
            buffers: BufferRegistry::new(),
            callbacks: Callbacks::default(),
            closer,
        }
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    /// A bookkeeping fault was detected on this channel.
    pub fn is_faulted(&self) -> bool {
        self.faulted
    }

    pub fn reads_in_flight(&self) -> usize {
        self.tracker.reads_in_flight()
    }

    pub fn writes_in_flight(&self) -> usize {
        self.tracker.writes_in_flight()
    }

    pub fn limits(&self) -> Limits {
        self.limits
    }

    // ── submission/completion path ──

    /// Native handle, for building submissions.
    #[inline]
    pub(crate) fn fd(&self) -> RawFd {
        self.handle
    }

    pub(crate) fn set_limits(&mut self, limits: Limits) {
        self.limits = limits;
    }

    pub(crate) fn set_read_pending(&mut self, pending: bool) {
        self.tracker.set_read_pending(pending);
    }

    pub(crate) fn set_write_pending(&mut self, pending: bool) {
        self.tracker.set_write_pending(pending);
    }

    pub(crate) fn register_read_buffer(&mut self, op: OpId, buf: B) -> Result<()> {
        let r = self.buffers.register_read_buffer(op, buf);
        self.check(r)
    }

    pub(crate) fn register_write_buffer(&mut self, op: OpId, buf: B) -> Result<()> {
        let r = self.buffers.register_write_buffer(op, buf);
        self.check(r)
    }

    pub(crate) fn take_read_buffer(&mut self, op: OpId) -> Result<B> {
        let r = self.buffers.take_read_buffer(op);
        self.check(r)
    }

    pub(crate) fn take_write_buffer(&mut self, op: OpId) -> Result<B> {
        let r = self.buffers.take_write_buffer(op);
        self.check(r)
    }

    /// The in-flight buffer of `op`, to hand its address to the ring.
    pub(crate) fn buffer_mut(&mut self, direction: Direction, op: OpId) -> Option<&mut B> {
        self.buffers.get_mut(direction, op)
    }

    /// Submission path: admit a new operation, register its buffer and mark
    /// it pending. The caller pushes the matching entry to the ring next,
    /// or calls `finish` to roll back if it cannot.
    pub(crate) fn begin(&mut self, direction: Direction, buf: B) -> Result<OpId> {
        self.ensure_accepting()?;
        let limit = self.limits.get(direction);
        if self.tracker.in_flight(direction) >= limit {
            return Err(ChanError::InFlightLimit { direction, limit });
        }
        let op = self.allocate_op(direction);
        let r = self.buffers.register(direction, op, buf);
        self.check(r)?;
        self.tracker.set_pending(direction, true);
        Ok(op)
    }

    /// Completion path, first two steps: take the buffer back and clear the
    /// pending mark. Dispatch is left to the caller.
    pub(crate) fn finish(&mut self, direction: Direction, op: OpId) -> Result<B> {
        let r = self.buffers.take(direction, op);
        let buf = self.check(r)?;
        self.tracker.set_pending(direction, false);
        Ok(buf)
    }

    /// Deliver an I/O failure to the exception handler, if any.
    pub(crate) fn raise(&mut self, failure: IoFailure) {
        if !self.callbacks.dispatch_exception(failure) {
            log::trace!("ringchan: {} unhandled failure dropped: {}", self.id, failure);
        }
    }

    /// Run the deferred close once the last operation has settled.
    pub(crate) fn settle(&mut self) {
        if self.lifecycle == Lifecycle::Closing && self.is_idle() {
            log::debug!("ringchan: {} drained, completing deferred close", self.id);
            self.release();
        }
    }

    /// Close guard: nothing pending in either direction. A buffer that is
    /// registered but not marked pending has not reached the ring, so it
    /// does not hold the handle open.
    fn is_idle(&self) -> bool {
        self.tracker.is_idle()
    }

    fn ensure_accepting(&self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Closed => Err(ChanError::Closed),
            Lifecycle::Closing => Err(ChanError::Closing),
            Lifecycle::Open if self.faulted => Err(ChanError::Faulted),
            Lifecycle::Open => Ok(()),
        }
    }

    fn allocate_op(&mut self, direction: Direction) -> OpId {
        loop {
            let op = self.next_op;
            self.next_op = op.successor();
            if !self.buffers.contains(direction, op) {
                return op;
            }
        }
    }

    fn check<T>(&mut self, r: Result<T>) -> Result<T> {
        if let Err(e) = &r {
            if e.is_fault() {
                log::error!("ringchan: {} fault: {}", self.id, e);
                self.faulted = true;
            }
        }
        r
    }

    fn release(&mut self) {
        self.closer.close_handle(self.handle);
        self.lifecycle = Lifecycle::Closed;
        log::debug!("ringchan: {} closed (fd {})", self.id, self.handle);
    }

    fn set_read_handler(&mut self, handler: Box<dyn FnMut(Completed<B>) + Send>) {
        self.callbacks.set_read(handler);
    }

    fn set_write_handler(&mut self, handler: Box<dyn FnMut(Completed<B>) + Send>) {
        self.callbacks.set_write(handler);
    }
}

impl<B: IoBufMut, C: NativeClose> ChannelState<B, C> {
    /// Completion path for a read: take, settle, dispatch.
    ///
    /// `result` is the raw CQE result: bytes read, or a negative errno.
    pub(crate) fn complete_read(&mut self, op: OpId, result: i32) -> Result<()> {
        let mut buf = self.take_read_buffer(op)?;
        self.set_read_pending(false);

        if result < 0 {
            self.raise(IoFailure::os(op, Direction::Read, -result));
        } else if result == 0 && buf.bytes_total() > 0 {
            self.raise(IoFailure::peer_closed(op));
        } else {
            let bytes = result as usize;
            // Safety: the kernel wrote `bytes` bytes at the buffer start.
            unsafe { buf.set_init(bytes) };
            if !self.callbacks.dispatch_read(Completed { op, buf, bytes }) {
                log::trace!("ringchan: {} no read handler, {} bytes dropped", self.id, bytes);
            }
        }

        self.settle();
        Ok(())
    }

    /// Completion path for a write.
    pub(crate) fn complete_write(&mut self, op: OpId, result: i32) -> Result<()> {
        let buf = self.take_write_buffer(op)?;
        self.set_write_pending(false);

        if result < 0 {
            self.raise(IoFailure::os(op, Direction::Write, -result));
        } else {
            let bytes = result as usize;
            if !self.callbacks.dispatch_write(Completed { op, buf, bytes }) {
                log::trace!("ringchan: {} no write handler for {}", self.id, op);
            }
        }

        self.settle();
        Ok(())
    }
}

impl<B, C: NativeClose> IoChannel for ChannelState<B, C> {
    fn id(&self) -> ChannelId {
        self.id
    }

    fn close(&mut self) -> Result<()> {
        match self.lifecycle {
            Lifecycle::Closed => Ok(()),
            _ if self.is_idle() => {
                self.release();
                Ok(())
            }
            _ => Err(ChanError::OperationPending {
                reads: self.tracker.reads_in_flight(),
                writes: self.tracker.writes_in_flight(),
            }),
        }
    }

    fn close_when_idle(&mut self) -> CloseOutcome {
        match self.lifecycle {
            Lifecycle::Closed => CloseOutcome::Closed,
            _ if self.is_idle() => {
                self.release();
                CloseOutcome::Closed
            }
            _ => {
                if self.lifecycle == Lifecycle::Open {
                    log::debug!(
                        "ringchan: {} close deferred ({} reads, {} writes in flight)",
                        self.id,
                        self.tracker.reads_in_flight(),
                        self.tracker.writes_in_flight()
                    );
                }
                self.lifecycle = Lifecycle::Closing;
                CloseOutcome::Deferred
            }
        }
    }

    fn is_closed(&self) -> bool {
        self.lifecycle == Lifecycle::Closed
    }

    fn is_closing(&self) -> bool {
        self.lifecycle == Lifecycle::Closing
    }

    fn is_read_pending(&self) -> bool {
        self.tracker.is_read_pending()
    }

    fn is_write_pending(&self) -> bool {
        self.tracker.is_write_pending()
    }

    fn on_exception<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(IoFailure) + Send + 'static,
    {
        self.callbacks.set_exception(Box::new(handler));
        self
    }
}

impl<B: 'static, C: NativeClose> DuplexChannel for ChannelState<B, C> {
    type Buf = B;

    fn on_read<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<B>) + Send + 'static,
    {
        self.set_read_handler(Box::new(handler));
        self
    }

    fn on_write<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Completed<B>) + Send + 'static,
    {
        self.set_write_handler(Box::new(handler));
        self
    }
}

impl<B, C: NativeClose> Drop for ChannelState<B, C> {
    fn drop(&mut self) {
        if self.lifecycle == Lifecycle::Closed {
            return;
        }
        if self.is_idle() {
            self.release();
        } else {
            // The ring may still write into these buffers and still refers
            // to the handle: leak both rather than free or close them.
            let leaked = self.buffers.leak();
            log::error!(
                "ringchan: {} dropped with operations in flight; fd {} left open, {} buffers leaked",
                self.id,
                self.handle,
                leaked
            );
        }
    }
}

impl<B, C: NativeClose> std::fmt::Debug for ChannelState<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelState")
            .field("id", &self.id)
            .field("lifecycle", &self.lifecycle)
            .field("faulted", &self.faulted)
            .field("tracker", &self.tracker)
            .field("callbacks", &self.callbacks)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every handle it is asked to close.
    #[derive(Default)]
    struct RecordingClose {
        closed: Mutex<Vec<RawFd>>,
    }

    impl RecordingClose {
        fn count(&self, fd: RawFd) -> usize {
            self.closed.lock().unwrap().iter().filter(|&&c| c == fd).count()
        }
    }

    impl NativeClose for RecordingClose {
        fn close_handle(&self, fd: RawFd) {
            self.closed.lock().unwrap().push(fd);
        }
    }

    type TestChannel = ChannelState<Vec<u8>, Arc<RecordingClose>>;

    fn channel(fd: RawFd) -> (TestChannel, Arc<RecordingClose>) {
        let closer = Arc::new(RecordingClose::default());
        (ChannelState::with_closer(fd, closer.clone()), closer)
    }

    #[test]
    fn fresh_channel_closes_immediately() {
        let (mut ch, closer) = channel(10);
        assert!(!ch.is_closed());
        ch.close().unwrap();
        assert!(ch.is_closed());
        assert_eq!(closer.count(10), 1);
    }

    #[test]
    fn close_is_idempotent() {
        let (mut ch, closer) = channel(11);
        ch.close().unwrap();
        ch.close().unwrap();
        assert_eq!(ch.close_when_idle(), CloseOutcome::Closed);
        drop(ch);
        assert_eq!(closer.count(11), 1);
    }

    #[test]
    fn close_refused_while_read_pending() {
        let (mut ch, closer) = channel(12);
        ch.set_read_pending(true);
        assert_eq!(ch.close(), Err(ChanError::OperationPending { reads: 1, writes: 0 }));
        assert!(!ch.is_closed());
        assert_eq!(closer.count(12), 0);

        ch.set_read_pending(false);
        ch.close().unwrap();
        assert!(ch.is_closed());
    }

    #[test]
    fn close_refused_while_write_pending() {
        let (mut ch, _closer) = channel(13);
        ch.set_write_pending(true);
        assert!(matches!(ch.close(), Err(ChanError::OperationPending { reads: 0, writes: 1 })));
        assert!(!ch.is_closed());
        ch.set_write_pending(false);
        assert!(ch.close().is_ok());
    }

    #[test]
    fn registry_take_is_exactly_once() {
        let (mut ch, _closer) = channel(14);
        let buf = Vec::with_capacity(128);
        let ptr = buf.as_ptr();
        ch.register_read_buffer(OpId(3), buf).unwrap();

        let back = ch.take_read_buffer(OpId(3)).unwrap();
        assert_eq!(back.as_ptr(), ptr);
        assert!(!ch.is_faulted());

        assert_eq!(
            ch.take_read_buffer(OpId(3)),
            Err(ChanError::CompletionMismatch { direction: Direction::Read, op: OpId(3) })
        );
        assert!(ch.is_faulted());
    }

    #[test]
    fn duplicate_registration_faults_the_channel() {
        let (mut ch, _closer) = channel(15);
        ch.register_write_buffer(OpId(1), vec![1]).unwrap();
        assert!(ch.register_write_buffer(OpId(1), vec![2]).unwrap_err().is_fault());
        assert!(ch.is_faulted());
        assert_eq!(ch.begin(Direction::Write, vec![3]), Err(ChanError::Faulted));

        // A faulted channel still drains and closes.
        assert_eq!(ch.take_write_buffer(OpId(1)).unwrap(), vec![1]);
        ch.close().unwrap();
    }

    #[test]
    fn pending_flags_are_independent() {
        let (mut ch, _closer) = channel(16);
        ch.set_write_pending(true);
        ch.set_read_pending(true);
        ch.set_read_pending(false);
        assert!(ch.is_write_pending());
        ch.set_write_pending(false);
        assert!(!ch.is_write_pending());
        assert!(!ch.is_read_pending());
    }

    #[test]
    fn read_handler_replacement() {
        let (mut ch, _closer) = channel(17);
        let first = Arc::new(Mutex::new(0usize));
        let second = Arc::new(Mutex::new(0usize));

        let f = first.clone();
        ch.on_read(move |_| *f.lock().unwrap() += 1);
        let s = second.clone();
        ch.on_read(move |_| *s.lock().unwrap() += 1);

        let op = ch.begin(Direction::Read, Vec::with_capacity(8)).unwrap();
        ch.complete_read(op, 4).unwrap();

        assert_eq!(*first.lock().unwrap(), 0);
        assert_eq!(*second.lock().unwrap(), 1);
    }

    #[test]
    fn read_scenario_close_after_completion() {
        let (mut ch, closer) = channel(40);
        let seen: Arc<Mutex<Option<(usize, usize)>>> = Arc::new(Mutex::new(None));

        let s = seen.clone();
        ch.on_read(move |done| {
            *s.lock().unwrap() = Some((done.bytes, done.buf.as_ptr() as usize));
        });

        // Submit read op 7 with a 4 KiB buffer: register, then mark pending.
        let buf: Vec<u8> = Vec::with_capacity(4096);
        let ptr = buf.as_ptr() as usize;
        ch.register_read_buffer(OpId(7), buf).unwrap();
        ch.set_read_pending(true);

        assert!(matches!(ch.close(), Err(ChanError::OperationPending { .. })));
        assert!(!ch.is_closed());

        // Complete op 7: take, clear, dispatch.
        ch.complete_read(OpId(7), 100).unwrap();
        assert!(!ch.is_read_pending());
        assert_eq!(*seen.lock().unwrap(), Some((100, ptr)));

        ch.close().unwrap();
        assert!(ch.is_closed());
        drop(ch);
        assert_eq!(closer.count(40), 1);
    }

    #[test]
    fn begin_orders_register_then_pending() {
        let (mut ch, _closer) = channel(18);
        let op = ch.begin(Direction::Read, vec![0u8; 0]).unwrap();
        assert!(ch.is_read_pending());
        assert!(ch.buffer_mut(Direction::Read, op).is_some());

        let buf = ch.finish(Direction::Read, op).unwrap();
        assert!(buf.is_empty());
        assert!(!ch.is_read_pending());
        assert!(ch.buffer_mut(Direction::Read, op).is_none());
    }

    #[test]
    fn in_flight_limit() {
        let (mut ch, _closer) = channel(19);
        ch.begin(Direction::Write, vec![1]).unwrap();
        assert_eq!(
            ch.begin(Direction::Write, vec![2]),
            Err(ChanError::InFlightLimit { direction: Direction::Write, limit: 1 })
        );
        // The read side is unaffected.
        ch.begin(Direction::Read, Vec::with_capacity(1)).unwrap();

        ch.set_limits(Limits { reads: 1, writes: 3 });
        let a = ch.begin(Direction::Write, vec![2]).unwrap();
        let b = ch.begin(Direction::Write, vec![3]).unwrap();
        assert_ne!(a, b);
        assert_eq!(ch.writes_in_flight(), 3);
        assert!(ch.begin(Direction::Write, vec![4]).is_err());
    }

    #[test]
    fn failed_read_goes_to_exception_handler() {
        let (mut ch, _closer) = channel(20);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let reads = Arc::new(Mutex::new(0usize));

        let f = failures.clone();
        let r = reads.clone();
        ch.on_exception(move |e| f.lock().unwrap().push(e))
            .on_read(move |_| *r.lock().unwrap() += 1);

        let op = ch.begin(Direction::Read, Vec::with_capacity(16)).unwrap();
        ch.complete_read(op, -104).unwrap();
        let op2 = ch.begin(Direction::Read, Vec::with_capacity(16)).unwrap();
        ch.complete_read(op2, 0).unwrap();

        let failures = failures.lock().unwrap();
        assert_eq!(failures[0], IoFailure::os(op, Direction::Read, 104));
        assert_eq!(failures[1], IoFailure::peer_closed(op2));
        assert_eq!(*reads.lock().unwrap(), 0);
        assert!(!ch.is_read_pending());
    }

    #[test]
    fn write_completion_reports_bytes() {
        let (mut ch, _closer) = channel(21);
        let written = Arc::new(Mutex::new(None));
        let w = written.clone();
        ch.on_write(move |done| *w.lock().unwrap() = Some((done.bytes, done.into_buf())));

        let op = ch.begin(Direction::Write, b"hello".to_vec()).unwrap();
        assert!(ch.is_write_pending());
        ch.complete_write(op, 5).unwrap();

        assert_eq!(*written.lock().unwrap(), Some((5, b"hello".to_vec())));
        assert!(!ch.is_write_pending());
    }

    #[test]
    fn unknown_completion_is_a_fault() {
        let (mut ch, _closer) = channel(22);
        let err = ch.complete_write(OpId(99), 1).unwrap_err();
        assert_eq!(err, ChanError::CompletionMismatch { direction: Direction::Write, op: OpId(99) });
        assert!(ch.is_faulted());
    }

    #[test]
    fn deferred_close_runs_after_drain() {
        let (mut ch, closer) = channel(23);
        let r = ch.begin(Direction::Read, Vec::with_capacity(8)).unwrap();
        let w = ch.begin(Direction::Write, vec![1, 2]).unwrap();

        assert_eq!(ch.close_when_idle(), CloseOutcome::Deferred);
        assert!(ch.is_closing());
        assert!(!ch.is_closed());
        assert_eq!(ch.begin(Direction::Read, Vec::new()), Err(ChanError::Closing));
        assert!(matches!(ch.close(), Err(ChanError::OperationPending { .. })));

        ch.complete_write(w, 2).unwrap();
        assert!(ch.is_closing());
        assert_eq!(closer.count(23), 0);

        ch.complete_read(r, 3).unwrap();
        assert!(ch.is_closed());
        assert_eq!(closer.count(23), 1);

        assert_eq!(ch.begin(Direction::Write, vec![]), Err(ChanError::Closed));
        drop(ch);
        assert_eq!(closer.count(23), 1);
    }

    #[test]
    fn drop_closes_idle_channel_once() {
        let (ch, closer) = channel(24);
        drop(ch);
        assert_eq!(closer.count(24), 1);
    }

    #[test]
    fn drop_with_pending_io_leaves_handle_open() {
        let (mut ch, closer) = channel(25);
        ch.begin(Direction::Read, Vec::with_capacity(32)).unwrap();
        drop(ch);
        assert_eq!(closer.count(25), 0);
    }

    #[test]
    fn registered_but_not_pending_does_not_block_close() {
        let (mut ch, closer) = channel(27);
        ch.register_read_buffer(OpId(1), Vec::with_capacity(16)).unwrap();
        ch.register_write_buffer(OpId(2), vec![9]).unwrap();
        assert!(!ch.is_read_pending());
        assert!(!ch.is_write_pending());

        ch.close().unwrap();
        assert!(ch.is_closed());
        assert_eq!(closer.count(27), 1);
    }

    #[test]
    fn drop_releases_handle_when_only_registered() {
        let (mut ch, closer) = channel(28);
        ch.register_write_buffer(OpId(4), vec![1, 2, 3]).unwrap();
        drop(ch);
        assert_eq!(closer.count(28), 1);
    }

    #[test]
    fn op_ids_skip_ids_still_in_flight() {
        let (mut ch, _closer) = channel(26);
        ch.set_limits(Limits { reads: 4, writes: 1 });
        let a = ch.begin(Direction::Read, Vec::new()).unwrap();
        ch.next_op = a;
        let b = ch.begin(Direction::Read, Vec::new()).unwrap();
        assert_ne!(a, b);
    }
}
