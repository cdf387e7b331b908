//! Readiness notifier abstraction.
//!
//! A [`Notifier`] registers raw descriptors with a token, waits for
//! readiness with a timeout, and hands out a cross-thread [`WakeHandle`]
//! that interrupts the wait. The production backend wraps `mio::Poll`
//! (epoll/kqueue, edge-triggered class); tests inject a scripted
//! implementation to drive a worker without sockets.

use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::time::Duration;

/// Readiness interest for a registered descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    /// Wake when readable.
    Readable,
    /// Wake when writable.
    Writable,
    /// Wake on either direction.
    Both,
}

/// One readiness report.
#[derive(Debug, Clone, Copy)]
pub struct ReadyEvent {
    /// Token supplied at registration.
    pub token: usize,
    /// The descriptor is readable (or closed/errored, which reads report).
    pub readable: bool,
    /// The descriptor is writable.
    pub writable: bool,
}

/// Cross-thread wakeup for a blocked [`Notifier::wait`].
pub trait WakeHandle: Send + Sync {
    /// Interrupt the owning notifier's wait.
    fn wake(&self) -> io::Result<()>;
}

/// The readiness facility a worker runs on.
pub trait Notifier: Send {
    /// Start watching a descriptor under `token`.
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()>;

    /// Stop watching a descriptor.
    fn deregister(&mut self, fd: RawFd) -> io::Result<()>;

    /// Block until readiness, wakeup or timeout; appends events to `out`.
    fn wait(&mut self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()>;

    /// Handle other threads use to interrupt `wait`.
    fn wake_handle(&self) -> Arc<dyn WakeHandle>;
}

// ── mio backend ──────────────────────────────────────────────────────────

struct MioWake(mio::Waker);

impl WakeHandle for MioWake {
    fn wake(&self) -> io::Result<()> {
        self.0.wake()
    }
}

/// `mio::Poll` backend. The wake token is reserved by the caller and is
/// reported like any other readiness event.
pub struct PollNotifier {
    poll: mio::Poll,
    events: mio::Events,
    waker: Arc<MioWake>,
}

impl PollNotifier {
    /// Create a poll instance whose wake handle fires `wake_token`.
    pub fn new(wake_token: usize) -> io::Result<Self> {
        let poll = mio::Poll::new()?;
        let waker = mio::Waker::new(poll.registry(), mio::Token(wake_token))?;
        Ok(Self {
            poll,
            events: mio::Events::with_capacity(256),
            waker: Arc::new(MioWake(waker)),
        })
    }
}

fn mio_interest(interest: Interest) -> mio::Interest {
    match interest {
        Interest::Readable => mio::Interest::READABLE,
        Interest::Writable => mio::Interest::WRITABLE,
        Interest::Both => mio::Interest::READABLE | mio::Interest::WRITABLE,
    }
}

impl Notifier for PollNotifier {
    fn register(&mut self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poll.registry().register(
            &mut mio::unix::SourceFd(&fd),
            mio::Token(token),
            mio_interest(interest),
        )
    }

    fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        self.poll.registry().deregister(&mut mio::unix::SourceFd(&fd))
    }

    fn wait(&mut self, out: &mut Vec<ReadyEvent>, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }
        for event in self.events.iter() {
            out.push(ReadyEvent {
                token: event.token().0,
                readable: event.is_readable() || event.is_read_closed() || event.is_error(),
                writable: event.is_writable() || event.is_write_closed(),
            });
        }
        Ok(())
    }

    fn wake_handle(&self) -> Arc<dyn WakeHandle> {
        self.waker.clone()
    }
}

// ── scripted backend for tests ───────────────────────────────────────────
