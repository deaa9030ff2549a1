//! io_uring `user_data` correlation token.
//!
//! ```text
//!  63            32 31 30                     0
//! ┌───────────────┬──┬────────────────────────┐
//! │  channel id   │d │      operation id      │
//! └───────────────┴──┴────────────────────────┘
//! ```
//!
//! `d` is the direction bit (0 = read/accept, 1 = write).

use ringchan_core::entry::{ChannelId, Direction, OpId};

const DIRECTION_BIT: u64 = 1 << 31;
const OP_MASK: u64 = OpId::MAX.0 as u64;

#[inline]
pub fn pack(id: ChannelId, direction: Direction, op: OpId) -> u64 {
    let dir = match direction {
        Direction::Read => 0,
        Direction::Write => DIRECTION_BIT,
    };
    ((id.as_u32() as u64) << 32) | dir | (op.0 as u64 & OP_MASK)
}

#[inline]
pub fn unpack(user_data: u64) -> (ChannelId, Direction, OpId) {
    let id = ChannelId::from_u32((user_data >> 32) as u32);
    let direction = if user_data & DIRECTION_BIT != 0 {
        Direction::Write
    } else {
        Direction::Read
    };
    let op = OpId((user_data & OP_MASK) as u32);
    (id, direction, op)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let id = ChannelId::from_u32(0xDEAD_BEEF);
        for (dir, op) in [
            (Direction::Read, OpId(0)),
            (Direction::Write, OpId(7)),
            (Direction::Write, OpId::MAX),
        ] {
            assert_eq!(unpack(pack(id, dir, op)), (id, dir, op));
        }
    }

    #[test]
    fn direction_does_not_bleed_into_op() {
        let id = ChannelId::from_u32(1);
        let r = pack(id, Direction::Read, OpId::MAX);
        let w = pack(id, Direction::Write, OpId::MAX);
        assert_ne!(r, w);
        assert_eq!(unpack(r).2, unpack(w).2);
    }
}
