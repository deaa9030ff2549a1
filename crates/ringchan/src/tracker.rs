//! Pending-operation tracker.
//!
//! One in-flight count per direction. The boolean-style setters are kept:
//! the submission path calls `set_*_pending(true)` once per operation and
//! the completion path calls `set_*_pending(false)` once per operation, so
//! with the default limit of one operation per direction the counts behave
//! exactly like two flags.

use ringchan_core::entry::Direction;

#[derive(Debug, Default)]
pub struct PendingTracker {
    reads: usize,
    writes: usize,
}

impl PendingTracker {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_read_pending(&self) -> bool {
        self.reads > 0
    }

    #[inline]
    pub fn is_write_pending(&self) -> bool {
        self.writes > 0
    }

    pub fn set_read_pending(&mut self, pending: bool) {
        Self::apply(&mut self.reads, pending, Direction::Read);
    }

    pub fn set_write_pending(&mut self, pending: bool) {
        Self::apply(&mut self.writes, pending, Direction::Write);
    }

    pub fn set_pending(&mut self, direction: Direction, pending: bool) {
        match direction {
            Direction::Read => self.set_read_pending(pending),
            Direction::Write => self.set_write_pending(pending),
        }
    }

    #[inline]
    pub fn reads_in_flight(&self) -> usize {
        self.reads
    }

    #[inline]
    pub fn writes_in_flight(&self) -> usize {
        self.writes
    }

    pub fn in_flight(&self, direction: Direction) -> usize {
        match direction {
            Direction::Read => self.reads,
            Direction::Write => self.writes,
        }
    }

    /// Nothing pending in either direction: the close guard.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.reads == 0 && self.writes == 0
    }

    fn apply(count: &mut usize, pending: bool, direction: Direction) {
        if pending {
            *count += 1;
        } else if *count == 0 {
            log::warn!("ringchan: unmatched {} settle ignored (nothing pending)", direction);
        } else {
            *count -= 1;
        }
    }
}
