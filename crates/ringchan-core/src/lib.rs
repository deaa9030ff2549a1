//! # ringchan-core: Trait definitions for ringchan
//!
//! This crate defines the vocabulary shared by every ringchan component:
//! channel and operation identifiers, the completion payloads handed to
//! callbacks, the buffer ownership traits, the native close primitive and
//! the capability traits that concrete channel kinds implement.
//!
//! ## Design principle
//!
//! > "A buffer handed to the ring belongs to the ring until the ring says
//! >  otherwise. A handle with work in flight is never closed."
//!
//! Everything here is platform-agnostic and dependency-free. The io_uring
//! driver, the OS close binding and the channel state machine live in the
//! `ringchan` crate.

pub mod entry;
pub mod buffer;
pub mod native;
pub mod channel;
pub mod error;

pub use buffer::{BufferProvider, IoBuf, IoBufMut};
pub use channel::{AcceptChannel, CloseOutcome, DuplexChannel, IoChannel};
pub use entry::{ChannelId, Completed, Direction, FailureKind, IoFailure, OpId};
pub use error::{ChanError, Result};
pub use native::NativeClose;
