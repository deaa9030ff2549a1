//! ringchan Echo Server
//!
//! Single-threaded TCP echo server. Every connection is a `Stream` owned by
//! the driver; handlers chain read → write → read through a `Submitter`.
//!
//! Usage:
//!     cargo build --release -p ringchan-echo
//!     RUST_LOG=debug ./target/release/ringchan-echo [port]
//!
//! Test with:
//!     echo "hello" | nc -q1 localhost 9999
//!
//! Tuning comes from the environment (`RINGCHAN_SQ_ENTRIES`,
//! `RINGCHAN_BUFFER_SIZE`, ...), see `ringchan::Config::from_env`.

use ringchan::{
    AcceptChannel, BufferProvider, ChanError, ChannelId, Config, Driver, DuplexChannel,
    HeapBuffers, IoChannel, IoFailure, Listener, Stream, Submitter,
};

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

use std::io::ErrorKind;
use std::net::{SocketAddr, TcpListener};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

static RUNNING: AtomicBool = AtomicBool::new(true);
static CONNECTIONS: AtomicUsize = AtomicUsize::new(0);

extern "C" fn handle_stop(_: i32) {
    RUNNING.store(false, Ordering::Relaxed);
}

fn install_signals() -> nix::Result<()> {
    // No SA_RESTART: the blocking io_uring_enter must return EINTR.
    let action = SigAction::new(SigHandler::Handler(handle_stop), SaFlags::empty(), SigSet::empty());
    unsafe {
        sigaction(Signal::SIGINT, &action)?;
        sigaction(Signal::SIGTERM, &action)?;
    }
    Ok(())
}

/// Peer went away: the normal end of an echo session.
fn is_hangup(failure: &IoFailure) -> bool {
    matches!(
        failure.to_io_error().kind(),
        ErrorKind::UnexpectedEof | ErrorKind::ConnectionReset | ErrorKind::BrokenPipe
    )
}

/// Wire read → write-back → read on one accepted connection.
fn serve(mut conn: Stream, sub: &Submitter, buffers: &HeapBuffers, buf_size: usize) {
    let id = conn.id();

    let s = sub.clone();
    conn.on_read(move |done| {
        let mut buf = done.into_buf();
        if buf.is_empty() {
            // Zero-length read into an empty buffer: nothing to echo.
            buf.reserve(buf_size);
            queue(&s, id, s.read(id, buf));
        } else {
            queue(&s, id, s.write(id, buf));
        }
    });

    let s = sub.clone();
    conn.on_write(move |done| {
        let bytes = done.bytes;
        let mut buf = done.into_buf();
        if bytes == 0 {
            queue(&s, id, s.close(id));
        } else if bytes < buf.len() {
            buf.drain(..bytes);
            queue(&s, id, s.write(id, buf));
        } else {
            buf.clear();
            queue(&s, id, s.read(id, buf));
        }
    });

    let s = sub.clone();
    conn.on_exception(move |failure| {
        if is_hangup(&failure) {
            log::debug!("ringchan-echo: {} done: {}", id, failure);
        } else {
            log::warn!("ringchan-echo: {} failed: {}", id, failure);
        }
        CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        queue(&s, id, s.close(id));
    });

    let Some(buf) = buffers.acquire(buf_size) else {
        log::warn!("ringchan-echo: out of buffers, dropping {}", id);
        return;
    };
    CONNECTIONS.fetch_add(1, Ordering::Relaxed);
    if let Err(e) = sub.adopt(conn) {
        log::warn!("ringchan-echo: cannot adopt {}: {}", id, e);
        CONNECTIONS.fetch_sub(1, Ordering::Relaxed);
        return;
    }
    queue(sub, id, sub.read(id, buf));
}

fn queue(sub: &Submitter, id: ChannelId, r: Result<(), ChanError>) {
    if let Err(e) = r {
        log::warn!("ringchan-echo: {}: {} (queued {})", id, e, sub.queued());
    }
}

fn main() {
    env_logger::init();

    let args: Vec<String> = std::env::args().collect();
    let port: u16 = args.get(1).and_then(|s| s.parse().ok()).unwrap_or(9999);

    if let Err(e) = install_signals() {
        log::error!("ringchan-echo: cannot install signal handlers: {}", e);
        std::process::exit(1);
    }

    let config = Config::from_env();
    let buf_size = config.buffer_size;
    let mut driver = match Driver::new(config) {
        Ok(d) => d,
        Err(e) => {
            log::error!("ringchan-echo: {}", e);
            std::process::exit(1);
        }
    };

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let tcp = match TcpListener::bind(addr) {
        Ok(l) => l,
        Err(e) => {
            log::error!("ringchan-echo: bind {}: {}", addr, e);
            std::process::exit(1);
        }
    };

    let sub = driver.submitter();
    let buffers = Arc::new(HeapBuffers::new(buf_size));
    let mut listener = Listener::from(tcp);
    let lid = listener.id();

    let (s, b) = (sub.clone(), buffers.clone());
    listener.on_accept(move |conn, peer| {
        log::debug!("ringchan-echo: accepted {} from {:?}", conn.id(), peer);
        serve(conn, &s, &b, buf_size);
        if RUNNING.load(Ordering::Relaxed) {
            queue(&s, lid, s.accept(lid));
        }
    });
    let s = sub.clone();
    listener.on_exception(move |failure| {
        log::warn!("ringchan-echo: accept failed: {}", failure);
        if RUNNING.load(Ordering::Relaxed) {
            queue(&s, lid, s.accept(lid));
        }
    });

    driver.listen(listener);
    if let Err(e) = driver.accept(lid) {
        log::error!("ringchan-echo: {}", e);
        std::process::exit(1);
    }

    log::info!("ringchan-echo: listening on {} ({:?})", addr, driver.config());

    while RUNNING.load(Ordering::Relaxed) {
        if let Err(e) = driver.run_once(1) {
            log::error!("ringchan-echo: {}", e);
        }
    }

    log::info!(
        "ringchan-echo: shutting down ({} connections open, {} ops in flight, {} buffers allocated)",
        CONNECTIONS.load(Ordering::Relaxed),
        driver.inflight(),
        buffers.allocated()
    );
}
