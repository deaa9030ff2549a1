//! Operation buffer registry.
//!
//! Owns every buffer that is currently referenced by an in-flight
//! operation, keyed by direction and operation id. The registry never looks
//! inside a buffer; it only holds the binding between id and buffer, and
//! moving a buffer in or out leaves its memory where it is.

use std::collections::HashMap;

use ringchan_core::entry::{Direction, OpId};
use ringchan_core::error::{ChanError, Result};

#[derive(Debug)]
pub struct BufferRegistry<B> {
    read: HashMap<OpId, B>,
    write: HashMap<OpId, B>,
}

impl<B> Default for BufferRegistry<B> {
    fn default() -> Self {
        Self {
            read: HashMap::new(),
            write: HashMap::new(),
        }
    }
}

impl<B> BufferRegistry<B> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_read_buffer(&mut self, op: OpId, buf: B) -> Result<()> {
        self.register(Direction::Read, op, buf)
    }

    pub fn register_write_buffer(&mut self, op: OpId, buf: B) -> Result<()> {
        self.register(Direction::Write, op, buf)
    }

    pub fn take_read_buffer(&mut self, op: OpId) -> Result<B> {
        self.take(Direction::Read, op)
    }

    pub fn take_write_buffer(&mut self, op: OpId) -> Result<B> {
        self.take(Direction::Write, op)
    }

    /// Insert a buffer for `op`. A duplicate id is a submission-path bug;
    /// the new buffer is dropped and the existing one is left untouched.
    pub fn register(&mut self, direction: Direction, op: OpId, buf: B) -> Result<()> {
        let map = self.map_mut(direction);
        if map.contains_key(&op) {
            return Err(ChanError::DuplicateOperation { direction, op });
        }
        map.insert(op, buf);
        Ok(())
    }

    /// Remove and return the buffer of `op`. Exactly once per operation.
    pub fn take(&mut self, direction: Direction, op: OpId) -> Result<B> {
        self.map_mut(direction)
            .remove(&op)
            .ok_or(ChanError::CompletionMismatch { direction, op })
    }

    pub fn get_mut(&mut self, direction: Direction, op: OpId) -> Option<&mut B> {
        self.map_mut(direction).get_mut(&op)
    }

    pub fn contains(&self, direction: Direction, op: OpId) -> bool {
        self.map(direction).contains_key(&op)
    }

    pub fn len(&self, direction: Direction) -> usize {
        self.map(direction).len()
    }

    pub fn is_empty(&self) -> bool {
        self.read.is_empty() && self.write.is_empty()
    }

    /// Give up ownership of every registered buffer without freeing it.
    ///
    /// Used when a channel disappears while the kernel may still write into
    /// its buffers: leaking is the only sound option.
    pub fn leak(&mut self) -> usize {
        let n = self.read.len() + self.write.len();
        std::mem::forget(std::mem::take(&mut self.read));
        std::mem::forget(std::mem::take(&mut self.write));
        n
    }

    fn map(&self, direction: Direction) -> &HashMap<OpId, B> {
        match direction {
            Direction::Read => &self.read,
            Direction::Write => &self.write,
        }
    }

    fn map_mut(&mut self, direction: Direction) -> &mut HashMap<OpId, B> {
        match direction {
            Direction::Read => &mut self.read,
            Direction::Write => &mut self.write,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn take_returns_the_registered_buffer() {
        let mut reg = BufferRegistry::new();
        let buf: Vec<u8> = Vec::with_capacity(4096);
        let ptr = buf.as_ptr();

        reg.register_read_buffer(OpId(1), buf).unwrap();
        let back = reg.take_read_buffer(OpId(1)).unwrap();
        assert_eq!(back.as_ptr(), ptr);
        assert_eq!(back.capacity(), 4096);

        assert_eq!(
            reg.take_read_buffer(OpId(1)),
            Err(ChanError::CompletionMismatch { direction: Direction::Read, op: OpId(1) })
        );
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut reg = BufferRegistry::new();
        reg.register_write_buffer(OpId(3), vec![1u8]).unwrap();
        assert_eq!(
            reg.register_write_buffer(OpId(3), vec![2u8]),
            Err(ChanError::DuplicateOperation { direction: Direction::Write, op: OpId(3) })
        );
        // The first binding survives.
        assert_eq!(reg.take_write_buffer(OpId(3)).unwrap(), vec![1u8]);
    }

    #[test]
    fn directions_do_not_share_ids() {
        let mut reg = BufferRegistry::new();
        reg.register_read_buffer(OpId(5), vec![b'r']).unwrap();
        reg.register_write_buffer(OpId(5), vec![b'w']).unwrap();
        assert_eq!(reg.len(Direction::Read), 1);
        assert_eq!(reg.len(Direction::Write), 1);
        assert_eq!(reg.take_write_buffer(OpId(5)).unwrap(), vec![b'w']);
        assert!(reg.contains(Direction::Read, OpId(5)));
        assert!(reg.take_write_buffer(OpId(5)).is_err());
    }

    #[test]
    fn leak_empties_without_dropping() {
        let mut reg = BufferRegistry::new();
        reg.register_read_buffer(OpId(0), vec![0u8; 8]).unwrap();
        reg.register_write_buffer(OpId(1), vec![0u8; 8]).unwrap();
        assert_eq!(reg.leak(), 2);
        assert!(reg.is_empty());
    }
}
