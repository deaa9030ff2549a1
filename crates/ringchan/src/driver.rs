//! `Driver`: single-threaded io_uring loop over a set of channels.
//!
//! ```text
//!  other threads / callbacks                 driving thread
//! ┌───────────────────────┐          ┌──────────────────────────────┐
//! │ Submitter::read(..)   │─ push ──►│ ArrayQueue<Request>          │
//! │ Submitter::adopt(..)  │          │   │ drain                    │
//! └───────────────────────┘          │   ▼                          │
//!                                    │ channel.prepare_* ─► SQ      │
//!                                    │ submit_and_wait              │
//!                                    │ CQ ─► token::unpack          │
//!                                    │   ─► channel.complete*       │
//!                                    │   ─► callbacks               │
//!                                    │ reap closed channels         │
//!                                    └──────────────────────────────┘
//! ```
//!
//! Channels are owned by the driver and addressed by `ChannelId`. Callbacks
//! run on the driving thread with the channel borrowed, so they queue
//! follow-up work through a `Submitter` instead of calling back into the
//! driver.
//!
//! Fault policy: submission errors that are policy (`Closing`,
//! `InFlightLimit`, ...) are returned by the direct methods and logged when
//! they come from the request queue. Faults are always returned;
//! `run_once` dispatches the whole batch first and then reports the first.

use ringchan_core::channel::{CloseOutcome, IoChannel};
use ringchan_core::entry::{ChannelId, Direction, OpId};
use ringchan_core::error::{ChanError, Result};

use crossbeam_queue::ArrayQueue;
use io_uring::{squeue, IoUring};

use std::collections::HashMap;
use std::sync::Arc;

use crate::config::Config;
use crate::listener::Listener;
use crate::stream::Stream;
use crate::token;

/// Work queued for the driving thread.
pub enum Request {
    Adopt(Stream),
    Listen(Listener),
    Read { id: ChannelId, buf: Vec<u8> },
    Write { id: ChannelId, buf: Vec<u8> },
    Accept { id: ChannelId },
    Close { id: ChannelId },
}

/// Cloneable, thread-safe handle for queueing `Request`s.
#[derive(Clone)]
pub struct Submitter {
    queue: Arc<ArrayQueue<Request>>,
}

impl Submitter {
    /// Queue a request. `Err(QueueFull)` drops it.
    pub fn push(&self, req: Request) -> Result<()> {
        self.queue.push(req).map_err(|_| ChanError::QueueFull)
    }

    pub fn adopt(&self, stream: Stream) -> Result<ChannelId> {
        let id = stream.id();
        self.push(Request::Adopt(stream))?;
        Ok(id)
    }

    pub fn listen(&self, listener: Listener) -> Result<ChannelId> {
        let id = listener.id();
        self.push(Request::Listen(listener))?;
        Ok(id)
    }

    pub fn read(&self, id: ChannelId, buf: Vec<u8>) -> Result<()> {
        self.push(Request::Read { id, buf })
    }

    pub fn write(&self, id: ChannelId, buf: Vec<u8>) -> Result<()> {
        self.push(Request::Write { id, buf })
    }

    pub fn accept(&self, id: ChannelId) -> Result<()> {
        self.push(Request::Accept { id })
    }

    pub fn close(&self, id: ChannelId) -> Result<()> {
        self.push(Request::Close { id })
    }

    /// Requests waiting to be drained.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

enum Slot {
    Stream(Stream),
    Listener(Listener),
}

impl Slot {
    fn is_closed(&self) -> bool {
        match self {
            Slot::Stream(s) => s.is_closed(),
            Slot::Listener(l) => l.is_closed(),
        }
    }

    fn close_when_idle(&mut self) -> CloseOutcome {
        match self {
            Slot::Stream(s) => s.close_when_idle(),
            Slot::Listener(l) => l.close_when_idle(),
        }
    }
}

pub struct Driver {
    // Dropped before the ring: busy channels leak their buffers on drop, so
    // the ring never outlives memory it might still write into.
    channels: HashMap<ChannelId, Slot>,
    ring: IoUring,
    config: Config,
    requests: Arc<ArrayQueue<Request>>,
    inflight: usize,
    completions: Vec<(u64, i32)>,
}

impl Driver {
    pub fn new(config: Config) -> Result<Self> {
        if let Err(e) = config.validate() {
            log::error!("ringchan: {}", e);
            return Err(ChanError::RingSetup(libc::EINVAL));
        }
        let ring = IoUring::builder()
            .build(config.sq_entries)
            .map_err(|e| ChanError::RingSetup(e.raw_os_error().unwrap_or(-1)))?;
        log::debug!(
            "ringchan: driver up (sq_entries={}, limits={:?})",
            config.sq_entries,
            config.limits()
        );

        Ok(Self {
            channels: HashMap::new(),
            ring,
            requests: Arc::new(ArrayQueue::new(config.request_capacity)),
            completions: Vec::with_capacity(config.sq_entries as usize),
            inflight: 0,
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn submitter(&self) -> Submitter {
        Submitter { queue: self.requests.clone() }
    }

    /// Take ownership of a stream. Its in-flight limits come from the config.
    pub fn adopt(&mut self, mut stream: Stream) -> ChannelId {
        stream.set_limits(self.config.limits());
        let id = stream.id();
        self.channels.insert(id, Slot::Stream(stream));
        id
    }

    pub fn listen(&mut self, mut listener: Listener) -> ChannelId {
        listener.set_limits(self.config.limits());
        let id = listener.id();
        self.channels.insert(id, Slot::Listener(listener));
        id
    }

    pub fn stream(&mut self, id: ChannelId) -> Option<&mut Stream> {
        match self.channels.get_mut(&id) {
            Some(Slot::Stream(s)) => Some(s),
            _ => None,
        }
    }

    pub fn read(&mut self, id: ChannelId, buf: Vec<u8>) -> Result<OpId> {
        let stream = stream_mut(&mut self.channels, id)?;
        let (op, sqe) = stream.prepare_read(buf)?;
        if !push_entry(&mut self.ring, &sqe) {
            stream.abort(Direction::Read, op)?;
            return Err(ChanError::RingFull);
        }
        self.inflight += 1;
        Ok(op)
    }

    pub fn write(&mut self, id: ChannelId, buf: Vec<u8>) -> Result<OpId> {
        let stream = stream_mut(&mut self.channels, id)?;
        let (op, sqe) = stream.prepare_write(buf)?;
        if !push_entry(&mut self.ring, &sqe) {
            stream.abort(Direction::Write, op)?;
            return Err(ChanError::RingFull);
        }
        self.inflight += 1;
        Ok(op)
    }

    pub fn accept(&mut self, id: ChannelId) -> Result<OpId> {
        let listener = match self.channels.get_mut(&id) {
            Some(Slot::Listener(l)) => l,
            _ => return Err(unknown(id)),
        };
        let (op, sqe) = listener.prepare_accept()?;
        if !push_entry(&mut self.ring, &sqe) {
            listener.abort(op)?;
            return Err(ChanError::RingFull);
        }
        self.inflight += 1;
        Ok(op)
    }

    /// Graceful close: now if idle, otherwise once the channel drains.
    /// Closed channels leave the driver.
    pub fn close(&mut self, id: ChannelId) -> Result<CloseOutcome> {
        let slot = self.channels.get_mut(&id).ok_or_else(|| unknown(id))?;
        let outcome = slot.close_when_idle();
        if outcome == CloseOutcome::Closed {
            self.channels.remove(&id);
        }
        Ok(outcome)
    }

    /// Operations submitted and not yet completed.
    pub fn inflight(&self) -> usize {
        self.inflight
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }

    /// One loop iteration: drain requests, submit, wait for up to
    /// `min_complete` completions, dispatch them, drain requests queued by
    /// the callbacks, reap closed channels.
    ///
    /// Returns the number of completions dispatched. Never blocks when
    /// nothing is in flight.
    pub fn run_once(&mut self, min_complete: usize) -> Result<usize> {
        let mut fault = self.drain_requests();

        let wait = if self.inflight == 0 { 0 } else { min_complete.min(self.inflight) };
        match self.ring.submit_and_wait(wait) {
            Ok(_) => {}
            Err(e) if e.raw_os_error() == Some(libc::EINTR) => {}
            // CQ overflow backlog: reap below, then submit again next round.
            Err(e) if e.raw_os_error() == Some(libc::EBUSY) => {}
            Err(e) => return Err(ChanError::RingSubmit(e.raw_os_error().unwrap_or(-1))),
        }

        let mut batch = std::mem::take(&mut self.completions);
        batch.extend(self.ring.completion().map(|cqe| (cqe.user_data(), cqe.result())));
        let count = batch.len();

        for &(user_data, result) in &batch {
            self.inflight = self.inflight.saturating_sub(1);
            if let Err(e) = self.dispatch(user_data, result) {
                note(&mut fault, e);
            }
        }
        batch.clear();
        self.completions = batch;

        if let Err(e) = self.drain_requests() {
            note(&mut fault, e);
        }
        self.reap();

        match fault.err() {
            Some(e) => Err(e),
            None => Ok(count),
        }
    }

    /// Run until nothing is in flight and no request is queued.
    pub fn run_until_idle(&mut self) -> Result<()> {
        while self.inflight > 0 || !self.requests.is_empty() {
            self.run_once(1)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, user_data: u64, result: i32) -> Result<()> {
        let (id, direction, op) = token::unpack(user_data);
        match self.channels.get_mut(&id) {
            Some(Slot::Stream(s)) => s.complete(direction, op, result),
            Some(Slot::Listener(l)) => l.complete_accept(op, result),
            None => {
                log::error!("ringchan: completion for unknown {} ({} {})", id, direction, op);
                Err(ChanError::UnknownChannel(id))
            }
        }
    }

    /// Apply queued requests. Policy errors are logged; the first fault is
    /// returned after the queue is empty.
    fn drain_requests(&mut self) -> Result<()> {
        let mut fault = Ok(());
        while let Some(req) = self.requests.pop() {
            let r = match req {
                Request::Adopt(s) => {
                    self.adopt(s);
                    Ok(())
                }
                Request::Listen(l) => {
                    self.listen(l);
                    Ok(())
                }
                Request::Read { id, buf } => self.read(id, buf).map(drop),
                Request::Write { id, buf } => self.write(id, buf).map(drop),
                Request::Accept { id } => self.accept(id).map(drop),
                Request::Close { id } => self.close(id).map(drop),
            };
            if let Err(e) = r {
                note(&mut fault, e);
            }
        }
        fault
    }

    fn reap(&mut self) {
        let before = self.channels.len();
        self.channels.retain(|_, slot| !slot.is_closed());
        let reaped = before - self.channels.len();
        if reaped > 0 {
            log::trace!("ringchan: reaped {} closed channels", reaped);
        }
    }
}

fn unknown(id: ChannelId) -> ChanError {
    log::error!("ringchan: no such channel {}", id);
    ChanError::UnknownChannel(id)
}

fn stream_mut(channels: &mut HashMap<ChannelId, Slot>, id: ChannelId) -> Result<&mut Stream> {
    match channels.get_mut(&id) {
        Some(Slot::Stream(s)) => Ok(s),
        _ => Err(unknown(id)),
    }
}

/// Keep the first fault; log everything else.
fn note(first: &mut Result<()>, e: ChanError) {
    if e.is_fault() {
        if first.is_ok() {
            *first = Err(e);
        }
    } else {
        log::warn!("ringchan: queued request rejected: {}", e);
    }
}

/// Push one SQE, flushing the SQ to the kernel once if it is full.
fn push_entry(ring: &mut IoUring, sqe: &squeue::Entry) -> bool {
    // Safety: every entry points into a buffer owned by a channel registry,
    // which keeps it alive and in place until the completion is taken.
    unsafe {
        if ring.submission().push(sqe).is_ok() {
            return true;
        }
    }
    if let Err(e) = ring.submit() {
        log::warn!("ringchan: flushing full SQ failed: {}", e);
        return false;
    }
    unsafe { ring.submission().push(sqe).is_ok() }
}
