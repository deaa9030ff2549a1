//! `Listener`: listening socket channel.
//!
//! Each accept travels in the read direction with a boxed address slot as
//! its registered buffer: the kernel writes the peer address into the slot
//! while the operation is in flight, so it is owned by the registry exactly
//! like a read buffer.

use ringchan_core::channel::{AcceptChannel, CloseOutcome, IoChannel};
use ringchan_core::entry::{ChannelId, Direction, IoFailure, OpId};
use ringchan_core::error::{ChanError, Result};

use io_uring::{opcode, squeue, types};

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, SocketAddrV4, SocketAddrV6, TcpListener};
use std::os::fd::{FromRawFd, OwnedFd};

use crate::state::{ChannelState, Lifecycle, Limits};
use crate::stream::Stream;
use crate::token;

type AcceptHandler = Box<dyn FnMut(Stream, Option<SocketAddr>) + Send>;

/// Peer address storage filled in by the kernel.
pub struct AcceptSlot {
    addr: libc::sockaddr_storage,
    len: libc::socklen_t,
}

impl AcceptSlot {
    fn new() -> Box<Self> {
        Box::new(Self {
            // Safety: sockaddr_storage is plain old data.
            addr: unsafe { std::mem::zeroed() },
            len: std::mem::size_of::<libc::sockaddr_storage>() as libc::socklen_t,
        })
    }

    /// Decode the address the kernel wrote, for the families we know.
    fn peer(&self) -> Option<SocketAddr> {
        let len = self.len as usize;
        match self.addr.ss_family as i32 {
            libc::AF_INET if len >= std::mem::size_of::<libc::sockaddr_in>() => {
                // Safety: family and length checked above.
                let sin = unsafe { &*(&self.addr as *const _ as *const libc::sockaddr_in) };
                let ip = Ipv4Addr::from(u32::from_be(sin.sin_addr.s_addr));
                Some(SocketAddr::V4(SocketAddrV4::new(ip, u16::from_be(sin.sin_port))))
            }
            libc::AF_INET6 if len >= std::mem::size_of::<libc::sockaddr_in6>() => {
                let sin6 = unsafe { &*(&self.addr as *const _ as *const libc::sockaddr_in6) };
                Some(SocketAddr::V6(SocketAddrV6::new(
                    Ipv6Addr::from(sin6.sin6_addr.s6_addr),
                    u16::from_be(sin6.sin6_port),
                    sin6.sin6_flowinfo,
                    sin6.sin6_scope_id,
                )))
            }
            _ => None,
        }
    }
}

pub struct Listener {
    state: ChannelState<Box<AcceptSlot>>,
    on_accept: Option<AcceptHandler>,
}

impl Listener {
    pub fn lifecycle(&self) -> Lifecycle {
        self.state.lifecycle()
    }

    pub fn is_faulted(&self) -> bool {
        self.state.is_faulted()
    }

    pub(crate) fn set_limits(&mut self, limits: Limits) {
        self.state.set_limits(limits);
    }

    pub(crate) fn prepare_accept(&mut self) -> Result<(OpId, squeue::Entry)> {
        let id = self.state.id();
        let fd = types::Fd(self.state.fd());
        let op = self.state.begin(Direction::Read, AcceptSlot::new())?;
        let slot = self
            .state
            .buffer_mut(Direction::Read, op)
            .ok_or(ChanError::CompletionMismatch { direction: Direction::Read, op })?;
        let sqe = opcode::Accept::new(
            fd,
            &mut slot.addr as *mut libc::sockaddr_storage as *mut libc::sockaddr,
            &mut slot.len,
        )
        .flags(libc::SOCK_CLOEXEC)
        .build()
        .user_data(token::pack(id, Direction::Read, op));
        Ok((op, sqe))
    }

    pub(crate) fn abort(&mut self, op: OpId) -> Result<()> {
        self.state.finish(Direction::Read, op)?;
        self.state.settle();
        Ok(())
    }

    /// `result` is the accepted descriptor or a negative errno.
    pub(crate) fn complete_accept(&mut self, op: OpId, result: i32) -> Result<()> {
        let slot = self.state.finish(Direction::Read, op)?;

        if result < 0 {
            self.state.raise(IoFailure::os(op, Direction::Read, -result));
        } else {
            // Safety: a successful accept returns a fresh descriptor we own.
            let fd = unsafe { OwnedFd::from_raw_fd(result) };
            let conn = Stream::from(fd);
            let peer = slot.peer();
            match self.on_accept.as_mut() {
                Some(h) => h(conn, peer),
                None => log::debug!(
                    "ringchan: {} no accept handler, dropping {:?}",
                    self.state.id(),
                    peer
                ),
            }
        }

        self.state.settle();
        Ok(())
    }
}

impl From<OwnedFd> for Listener {
    fn from(fd: OwnedFd) -> Self {
        Self { state: ChannelState::new(fd), on_accept: None }
    }
}

impl From<TcpListener> for Listener {
    fn from(listener: TcpListener) -> Self {
        Self::from(OwnedFd::from(listener))
    }
}

impl IoChannel for Listener {
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

impl AcceptChannel for Listener {
    type Conn = Stream;

    fn on_accept<F>(&mut self, handler: F) -> &mut Self
    where
        F: FnMut(Stream, Option<SocketAddr>) + Send + 'static,
    {
        self.on_accept = Some(Box::new(handler));
        self
    }
}
