//! # ringchan: Channel state and io_uring driver
//!
//! Implements the `ringchan-core` traits on top of io_uring.
//!
//! ## Default stack
//!
//! | Piece           | Type             | Role                                      |
//! |-----------------|------------------|-------------------------------------------|
//! | Lifecycle       | `ChannelState`   | pending tracking, buffer registry, close  |
//! | Native close    | `SysClose`       | `close(2)` via nix                        |
//! | BufferProvider  | `HeapBuffers`    | one `Vec<u8>` per operation               |
//! | Channel kinds   | `Stream`, `Listener` | sockets, pipes, listening sockets     |
//! | Event loop      | `Driver`         | SQ/CQ plumbing, request queue, dispatch   |
//!
//! ```rust,ignore
//! use ringchan::{Config, Driver, DuplexChannel, Stream};
//!
//! let mut driver = Driver::new(Config::from_env())?;
//! let (mut rx, tx) = Stream::pipe()?;
//! rx.on_read(|done| println!("{} bytes", done.bytes));
//! let rx = driver.adopt(rx);
//! let tx = driver.adopt(tx);
//! driver.write(tx, b"ping".to_vec())?;
//! driver.read(rx, Vec::with_capacity(4096))?;
//! driver.run_until_idle()?;
//! ```

pub mod env;
pub mod config;
pub mod tracker;
pub mod registry;
pub mod callbacks;
pub mod sys_close;
pub mod state;
pub mod heap_buffers;

pub use config::{Config, ConfigError};
pub use heap_buffers::HeapBuffers;
pub use state::{ChannelState, Lifecycle, Limits};
pub use sys_close::SysClose;

pub use ringchan_core::{
    AcceptChannel, BufferProvider, ChanError, ChannelId, CloseOutcome, Completed, Direction,
    DuplexChannel, FailureKind, IoChannel, IoFailure, NativeClose, OpId, Result,
};

cfg_if::cfg_if! {
    if #[cfg(target_os = "linux")] {
        pub mod token;
        pub mod stream;
        pub mod listener;
        pub mod driver;

        pub use driver::{Driver, Request, Submitter};
        pub use listener::Listener;
        pub use stream::Stream;
    }
}
