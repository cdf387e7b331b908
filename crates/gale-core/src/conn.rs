//! Per-connection state.

use gale_http::{ParseLimits, ParseProgress, Request};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Instant;

/// The connection's current state-machine step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    /// TLS accept in progress.
    Handshake,
    /// Assembling and parsing the request.
    Recv,
    /// Flushing the response.
    Write,
}

/// Why (and whether) the connection is registered with the notifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Park {
    /// Not registered.
    None,
    /// Mid-request, waiting for bytes.
    Read,
    /// Response flush blocked.
    Write,
    /// Idle between requests; readiness means a new request is starting.
    Keepalive,
}

/// The hottest record in the server: one accepted socket and everything
/// needed to restart its state machine at any suspension point.
pub(crate) struct Conn {
    pub sock: TcpStream,
    pub tls: Option<rustls::ServerConnection>,
    pub handle: String,
    pub client_ip: String,
    pub step: Step,
    pub park: Park,
    /// Raw bytes in; pending response bytes out.
    pub inout: Vec<u8>,
    /// Restartable parse state over `inout`.
    pub progress: ParseProgress,
    /// The request currently dispatched to the handler.
    pub request: Option<Arc<Request>>,
    pub write_offset: usize,
    /// First byte of the current request (read-timeout epoch).
    pub start_read: Instant,
    /// Last activity (idle-timeout epoch).
    pub latest: Instant,
    /// Guard against arena slot reuse.
    pub generation: u64,
    pub ready: bool,
    pub handshaked: bool,
    pub inprogress: bool,
    pub shutdown: bool,
    pub keepalive: bool,
    pub error: bool,
    /// Client negotiated gzip for the response.
    pub compression: bool,
}

impl Conn {
    pub(crate) fn new(
        sock: TcpStream,
        tls: Option<rustls::ServerConnection>,
        handle: String,
        client_ip: String,
        limits: ParseLimits,
    ) -> Self {
        let now = Instant::now();
        let step = if tls.is_some() {
            Step::Handshake
        } else {
            Step::Recv
        };
        Self {
            sock,
            tls,
            handle,
            client_ip,
            step,
            park: Park::None,
            inout: Vec::new(),
            progress: ParseProgress::with_limits(limits),
            request: None,
            write_offset: 0,
            start_read: now,
            latest: now,
            generation: 0,
            ready: false,
            handshaked: false,
            inprogress: false,
            shutdown: false,
            keepalive: false,
            error: false,
            compression: false,
        }
    }

    /// Milliseconds since the first byte of the current request.
    pub(crate) fn read_elapsed_millis(&self) -> u64 {
        self.start_read.elapsed().as_millis() as u64
    }

    /// Milliseconds since the last activity.
    pub(crate) fn idle_millis(&self, now: Instant) -> u64 {
        now.duration_since(self.latest).as_millis() as u64
    }

    /// Reset request-scoped state, keeping the socket and TLS session.
    /// Used both on close and when recycling a keepalive connection.
    pub(crate) fn reset_request_state(&mut self) {
        self.inout.clear();
        self.progress.reset();
        self.request = None;
        self.write_offset = 0;
        self.ready = false;
        self.inprogress = false;
    }

    /// Restart the timers when a keepalive connection wakes.
    pub(crate) fn touch(&mut self, now: Instant) {
        self.start_read = now;
        self.latest = now;
    }
}
