//! Worker thread event loop.
//!
//! Each worker is single-threaded and cooperative: it drains its bounded
//! event queue, waits on its readiness notifier (a waker token folds queue
//! posts into the same wait), steps connection state machines, and runs
//! periodic maintenance. A connection is pinned to its worker for life, so
//! connection state needs no locking.
//!
//! The worker also owns its listening socket (bound with SO_REUSEPORT), so
//! the accept dispatcher runs here too: the kernel load-balances incoming
//! connections across workers.

use crate::config::ServerConfig;
use crate::conn::{Conn, Park, Step};
use crate::event::Event;
use crate::handle::{next_conn_handle, HandleTable};
use crate::handler::{ConnContext, Executor, HandlerError};
use crate::io::{self, IoOutcome};
use crate::notifier::{Interest, Notifier, ReadyEvent};
use crate::socket::client_ip_v6;
use crate::tls::{drive_handshake, HandshakeOutcome};
use crossbeam_channel::{Receiver, Sender, TrySendError};
use gale_http::{encode_response, ParseLimits, PumpState, Response};
use slab::Slab;
use std::net::{Shutdown, SocketAddr, TcpListener};
use std::os::fd::AsRawFd;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Token reserved for the notifier's wake handle.
pub(crate) const TOKEN_WAKER: usize = 0;
/// Token of the worker's listening socket.
const TOKEN_LISTENER: usize = 1;
/// Connection tokens start here; token = slot + TOKEN_BASE.
const TOKEN_BASE: usize = 2;

/// Everything a worker thread needs, assembled by the listen call.
pub(crate) struct WorkerSeed {
    pub id: usize,
    pub num_threads: usize,
    pub cfg: Arc<ServerConfig>,
    pub listener: TcpListener,
    pub tls: Option<Arc<rustls::ServerConfig>>,
    pub rx: Receiver<Event>,
    pub tx: Sender<Event>,
    pub table: Arc<HandleTable>,
    pub server_handle: String,
    pub executor: Box<dyn Executor>,
}

/// What a state-machine step decided.
enum StepOutcome {
    /// Step changed; run the next one immediately.
    Continue,
    /// Suspend until readiness fires.
    Park(Park),
    /// A complete request (or a failed parse) is ready for dispatch.
    Ready,
    /// The connection is gone.
    Closed,
}

enum RecvPhase {
    Ready,
    Park,
    CloseError,
    ClosePeer,
}

pub(crate) struct Worker<N: Notifier> {
    id: usize,
    cfg: Arc<ServerConfig>,
    listener: TcpListener,
    tls: Option<Arc<rustls::ServerConfig>>,
    rx: Receiver<Event>,
    tx: Sender<Event>,
    table: Arc<HandleTable>,
    server_handle: String,
    executor: Box<dyn Executor>,
    notifier: N,
    conns: Slab<Conn>,
    next_generation: u64,
    num_requests: u64,
    pivot: u64,
    terminate: bool,
    drain_deadline: Option<Instant>,
    sweep_pending: bool,
    last_sweep: Instant,
}

impl<N: Notifier> Worker<N> {
    pub(crate) fn new(seed: WorkerSeed, notifier: N) -> Self {
        let threshold = seed.cfg.gc_cleanup_threshold;
        // stagger maintenance so all workers do not sweep at once
        let pivot = if threshold > 0 && seed.num_threads > 0 {
            (seed.id as u64).wrapping_mul(threshold / seed.num_threads as u64) % threshold
        } else {
            0
        };
        Self {
            id: seed.id,
            cfg: seed.cfg,
            listener: seed.listener,
            tls: seed.tls,
            rx: seed.rx,
            tx: seed.tx,
            table: seed.table,
            server_handle: seed.server_handle,
            executor: seed.executor,
            notifier,
            conns: Slab::new(),
            next_generation: 0,
            num_requests: 0,
            pivot,
            terminate: false,
            drain_deadline: None,
            sweep_pending: false,
            last_sweep: Instant::now(),
        }
    }

    /// The run loop. Signals initialization through `ready_tx`, then
    /// processes events until terminated and drained.
    pub(crate) fn run(mut self, ready_tx: mpsc::Sender<Result<(), String>>) {
        let listener_fd = self.listener.as_raw_fd();
        if let Err(e) = self
            .notifier
            .register(listener_fd, TOKEN_LISTENER, Interest::Readable)
        {
            let _ = ready_tx.send(Err(format!("unable to watch listener: {e}")));
            return;
        }
        let _ = ready_tx.send(Ok(()));
        drop(ready_tx);

        let mut ready: Vec<ReadyEvent> = Vec::with_capacity(256);
        loop {
            while let Ok(event) = self.rx.try_recv() {
                self.dispatch(event);
            }

            if self.terminate {
                if self.conns.is_empty() {
                    break;
                }
                self.sweep();
                if self
                    .drain_deadline
                    .map(|deadline| Instant::now() >= deadline)
                    .unwrap_or(false)
                {
                    log::warn!(
                        "worker {}: drain grace expired, closing {} connections",
                        self.id,
                        self.conns.len()
                    );
                    let slots: Vec<usize> = self.conns.iter().map(|(slot, _)| slot).collect();
                    for slot in slots {
                        self.close_conn(slot, true);
                    }
                    break;
                }
            }

            let timeout = if self.terminate {
                Duration::from_millis(10)
            } else {
                Duration::from_millis(self.cfg.gc_interval_millis.max(1))
            };
            ready.clear();
            if let Err(e) = self.notifier.wait(&mut ready, Some(timeout)) {
                log::error!("worker {}: notifier wait failed: {e}", self.id);
                break;
            }
            for event in ready.drain(..) {
                match event.token {
                    TOKEN_WAKER => {}
                    TOKEN_LISTENER => self.accept_ready(),
                    token => self.conn_ready(token - TOKEN_BASE),
                }
            }

            if self.sweep_pending
                || self.last_sweep.elapsed().as_millis() as u64 >= self.cfg.gc_interval_millis
            {
                self.sweep_pending = false;
                self.sweep();
            }
        }
        log::debug!("worker {} exited", self.id);
    }

    // ── event dispatch ───────────────────────────────────────────────────

    fn dispatch(&mut self, event: Event) {
        match event {
            Event::NewConn(conn) => self.on_new_conn(conn),
            Event::Resume { slot, generation } => self.on_resume(slot, generation),
            Event::KeepaliveWake { slot, generation } => {
                self.on_keepalive_wake(slot, generation)
            }
            Event::Terminate => self.on_terminate(),
        }
    }

    fn parse_limits(&self) -> ParseLimits {
        ParseLimits {
            max_request_line_len: self.cfg.max_request_line_len,
            max_headers_size: self.cfg.max_headers_size,
        }
    }

    fn post(&self, event: Event) {
        match self.tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(Event::NewConn(conn))) => {
                log::error!("worker {}: event queue full, refusing connection", self.id);
                self.table.unregister(&conn.handle);
                let _ = conn.sock.shutdown(Shutdown::Both);
            }
            Err(TrySendError::Full(_)) => {
                log::error!("worker {}: event queue full, dropping event", self.id);
            }
            Err(TrySendError::Disconnected(_)) => {}
        }
    }

    /// Admission: either the connection enters this worker's arena or it is
    /// shut down immediately. This is the server's only back-pressure gate.
    fn on_new_conn(&mut self, mut conn: Box<Conn>) {
        let cap = self.cfg.thread_max_concurrent_conns;
        if self.terminate || (cap > 0 && self.conns.len() >= cap) {
            if self.terminate {
                log::debug!("worker {}: draining, refusing {}", self.id, conn.handle);
            } else {
                log::warn!("worker {}: thread limit reached, closing client", self.id);
            }
            self.table.unregister(&conn.handle);
            let _ = conn.sock.shutdown(Shutdown::Both);
            return;
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        conn.generation = generation;
        let handle = conn.handle.clone();
        let slot = self.conns.insert(*conn);
        self.table.bind_slot(&handle, slot, generation);
        self.post(Event::Resume { slot, generation });
    }

    fn on_resume(&mut self, slot: usize, generation: u64) {
        {
            let Some(conn) = self.conns.get(slot) else { return };
            if conn.generation != generation || conn.shutdown || conn.ready {
                return;
            }
        }
        self.step_loop(slot);
    }

    fn on_keepalive_wake(&mut self, slot: usize, generation: u64) {
        {
            let Some(conn) = self.conns.get_mut(slot) else { return };
            if conn.generation != generation || conn.shutdown {
                return;
            }
            conn.touch(Instant::now());
            conn.step = Step::Recv;
        }
        self.post(Event::Resume { slot, generation });
    }

    fn on_terminate(&mut self) {
        if self.terminate {
            return;
        }
        self.terminate = true;
        self.drain_deadline =
            Some(Instant::now() + Duration::from_millis(self.cfg.drain_grace_millis));
        let fd = self.listener.as_raw_fd();
        let _ = self.notifier.deregister(fd);
        log::info!(
            "worker {}: draining {} connections",
            self.id,
            self.conns.len()
        );
    }

    // ── accept path ──────────────────────────────────────────────────────

    fn accept_ready(&mut self) {
        if self.terminate {
            return;
        }
        loop {
            match self.listener.accept() {
                Ok((sock, peer)) => self.admit_socket(sock, peer),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::warn!("worker {}: accept failed: {e}", self.id);
                    break;
                }
            }
        }
    }

    fn admit_socket(&mut self, sock: std::net::TcpStream, peer: SocketAddr) {
        if let Err(e) = sock.set_nonblocking(true) {
            log::warn!("worker {}: set_nonblocking failed: {e}", self.id);
            return;
        }
        let client_ip = client_ip_v6(peer);
        let tls = match &self.tls {
            None => None,
            Some(ctx) => match rustls::ServerConnection::new(ctx.clone()) {
                Ok(session) => Some(session),
                Err(e) => {
                    log::warn!("worker {}: unable to create tls session: {e}", self.id);
                    let _ = sock.shutdown(Shutdown::Both);
                    return;
                }
            },
        };
        let handle = next_conn_handle();
        log::debug!("client connected from {client_ip} as {handle}");
        let conn = Conn::new(sock, tls, handle.clone(), client_ip, self.parse_limits());
        // registered before NEW_CONN is posted so the handle resolves from
        // the moment the event exists
        self.table.register(&handle, self.id, &self.server_handle);
        self.post(Event::NewConn(Box::new(conn)));
    }

    // ── readiness path ───────────────────────────────────────────────────

    fn conn_ready(&mut self, slot: usize) {
        let (generation, fd, park) = {
            let Some(conn) = self.conns.get(slot) else { return };
            (conn.generation, conn.sock.as_raw_fd(), conn.park)
        };
        if park == Park::None {
            return;
        }
        let _ = self.notifier.deregister(fd);
        self.conns[slot].park = Park::None;
        match park {
            Park::Keepalive => self.post(Event::KeepaliveWake { slot, generation }),
            _ => self.post(Event::Resume { slot, generation }),
        }
    }

    fn park(&mut self, slot: usize, kind: Park) {
        let fd = {
            let conn = &mut self.conns[slot];
            conn.park = kind;
            conn.sock.as_raw_fd()
        };
        let interest = match kind {
            Park::Write => Interest::Writable,
            _ => Interest::Readable,
        };
        if let Err(e) = self.notifier.register(fd, TOKEN_BASE + slot, interest) {
            log::error!("worker {}: notifier register failed: {e}", self.id);
            self.conns[slot].park = Park::None;
            self.conns[slot].error = true;
            self.close_conn(slot, true);
        }
    }

    // ── state machine ────────────────────────────────────────────────────

    fn step_loop(&mut self, slot: usize) {
        loop {
            let Some(conn) = self.conns.get(slot) else { return };
            let outcome = match conn.step {
                Step::Handshake => self.step_handshake(slot),
                Step::Recv => self.step_recv(slot),
                Step::Write => self.step_write(slot),
            };
            match outcome {
                StepOutcome::Continue => {}
                StepOutcome::Park(kind) => {
                    self.park(slot, kind);
                    return;
                }
                StepOutcome::Ready => {
                    self.dispatch_request(slot);
                    // only a successfully queued response continues the loop
                    if self.conns.get(slot).map(|c| c.step) != Some(Step::Write) {
                        return;
                    }
                }
                StepOutcome::Closed => return,
            }
        }
    }

    fn step_handshake(&mut self, slot: usize) -> StepOutcome {
        enum Hs {
            Continue,
            Park(Park),
            Fail,
        }
        let hs = {
            let conn = &mut self.conns[slot];
            if conn.handshaked {
                conn.step = Step::Recv;
                Hs::Continue
            } else {
                match conn.tls.as_mut() {
                    None => {
                        conn.step = Step::Recv;
                        Hs::Continue
                    }
                    Some(tls) => match drive_handshake(tls, &mut conn.sock) {
                        HandshakeOutcome::Complete => {
                            log::debug!("handshake complete on {}", conn.handle);
                            conn.handshaked = true;
                            conn.step = Step::Recv;
                            Hs::Continue
                        }
                        HandshakeOutcome::Suspend => Hs::Park(if tls.wants_write() {
                            Park::Write
                        } else {
                            Park::Read
                        }),
                        HandshakeOutcome::Failed => {
                            conn.error = true;
                            Hs::Fail
                        }
                    },
                }
            }
        };
        match hs {
            Hs::Continue => StepOutcome::Continue,
            Hs::Park(kind) => StepOutcome::Park(kind),
            Hs::Fail => {
                self.close_conn(slot, true);
                StepOutcome::Closed
            }
        }
    }

    fn step_recv(&mut self, slot: usize) -> StepOutcome {
        let phase = {
            let cfg = self.cfg.clone();
            let conn = &mut self.conns[slot];
            recv_phase(conn, &cfg)
        };
        match phase {
            RecvPhase::Ready => StepOutcome::Ready,
            RecvPhase::Park => StepOutcome::Park(Park::Read),
            RecvPhase::CloseError => {
                self.conns[slot].error = true;
                self.close_conn(slot, true);
                StepOutcome::Closed
            }
            RecvPhase::ClosePeer => {
                self.close_conn(slot, true);
                StepOutcome::Closed
            }
        }
    }

    fn step_write(&mut self, slot: usize) -> StepOutcome {
        let outcome = {
            let conn = &mut self.conns[slot];
            match conn.tls.as_mut() {
                Some(tls) => {
                    io::write_tls(tls, &mut conn.sock, &conn.inout, &mut conn.write_offset)
                }
                None => io::write_plain(&mut conn.sock, &conn.inout, &mut conn.write_offset),
            }
        };
        match outcome {
            IoOutcome::Again => StepOutcome::Park(Park::Write),
            IoOutcome::Error => {
                self.conns[slot].error = true;
                self.close_conn(slot, true);
                StepOutcome::Closed
            }
            IoOutcome::Done => self.close_conn(slot, false),
        }
    }

    /// The ready request leaves the parser and meets the executor.
    /// Interpreter state is saved and restored around the invocation;
    /// an empty parse answers 400 and always closes.
    fn dispatch_request(&mut self, slot: usize) {
        let cfg = self.cfg.clone();

        let (handle, ctx, request) = {
            let conn = &mut self.conns[slot];
            if conn.inprogress || conn.shutdown {
                return;
            }
            conn.inprogress = true;
            let request = conn.progress.take_request();
            conn.keepalive = cfg.keepalive
                && request
                    .as_ref()
                    .map(|r| gale_http::wants_keepalive(&r.headers))
                    .unwrap_or(false);
            conn.compression = cfg.gzip
                && request
                    .as_ref()
                    .map(|r| gale_http::accepts_gzip(&r.headers))
                    .unwrap_or(false);
            let request = request.map(Arc::new);
            conn.request = request.clone();
            let ctx = ConnContext::new(
                conn.handle.clone(),
                self.server_handle.clone(),
                conn.client_ip.clone(),
                self.table.clone(),
            );
            (conn.handle.clone(), ctx, request)
        };

        if let Some(request) = &request {
            self.table.set_request(&handle, request.clone());
        }

        let encoded = match request {
            None => {
                log::info!("bad request on {handle}");
                self.conns[slot].keepalive = false;
                encode_response(&Response::new(400).with_body("Bad Request"), None)
            }
            Some(request) => {
                self.executor.save_state();
                let result = self.executor.invoke(&ctx, &request);
                self.executor.restore_state();
                match result {
                    Ok(response) | Err(HandlerError::Response(response)) => {
                        let gzip = if self.conns[slot].compression {
                            Some(&cfg.gzip_policy)
                        } else {
                            None
                        };
                        encode_response(&response, gzip)
                    }
                    Err(HandlerError::Failure(msg)) => {
                        log::error!("handler failed on {handle}: {msg}");
                        self.conns[slot].keepalive = false;
                        encode_response(
                            &Response::new(500).with_body("Internal Server Error"),
                            None,
                        )
                    }
                }
            }
        };

        match encoded {
            Ok(bytes) => {
                let conn = &mut self.conns[slot];
                conn.inout = bytes;
                conn.write_offset = 0;
                conn.step = Step::Write;
            }
            Err(e) => {
                log::error!("response encoding failed on {handle}: {e}");
                self.conns[slot].error = true;
                self.close_conn(slot, true);
            }
        }
    }

    // ── close and maintenance ────────────────────────────────────────────

    /// Reset request state and either recycle the connection (keepalive,
    /// non-forced) or tear it down. Every call counts as one completed
    /// request toward the maintenance threshold.
    fn close_conn(&mut self, slot: usize, force: bool) -> StepOutcome {
        let recycle = {
            let conn = &mut self.conns[slot];
            if conn.shutdown {
                return StepOutcome::Closed;
            }
            conn.reset_request_state();
            !force && conn.keepalive
        };

        let outcome = if recycle {
            let conn = &mut self.conns[slot];
            conn.step = Step::Recv;
            let handle = conn.handle.clone();
            self.table.clear_request(&handle);
            StepOutcome::Park(Park::Keepalive)
        } else {
            let handle = self.conns[slot].handle.clone();
            if self.table.unregister(&handle) {
                self.shutdown_conn(slot);
            }
            self.conns.remove(slot);
            StepOutcome::Closed
        };

        self.num_requests = self.num_requests.wrapping_add(1);
        let threshold = self.cfg.gc_cleanup_threshold;
        if threshold > 0 && self.num_requests % threshold == self.pivot {
            self.sweep_pending = true;
        }
        outcome
    }

    /// Unpark, send TLS close_notify when the session is healthy, and shut
    /// the socket down both ways.
    fn shutdown_conn(&mut self, slot: usize) {
        let parked_fd = {
            let conn = &self.conns[slot];
            (conn.park != Park::None).then(|| conn.sock.as_raw_fd())
        };
        if let Some(fd) = parked_fd {
            let _ = self.notifier.deregister(fd);
            self.conns[slot].park = Park::None;
        }

        let conn = &mut self.conns[slot];
        conn.shutdown = true;
        if let Some(tls) = conn.tls.as_mut() {
            if !conn.error && conn.handshaked {
                tls.send_close_notify();
                let _ = tls.write_tls(&mut conn.sock);
            }
        }
        if let Err(e) = conn.sock.shutdown(Shutdown::Both) {
            if e.kind() != std::io::ErrorKind::NotConnected {
                log::debug!("socket shutdown failed: {e}");
            }
        }
    }

    /// Reap idle connections past the keepalive timeout, and resume parked
    /// mid-request connections whose read timeout has elapsed so the recv
    /// step can fail them with a 400.
    fn sweep(&mut self) {
        let now = Instant::now();
        let timeout = self.cfg.conn_timeout_millis;
        let expired: Vec<usize> = self
            .conns
            .iter()
            .filter(|(_, conn)| !conn.inprogress && conn.idle_millis(now) > timeout)
            .map(|(slot, _)| slot)
            .collect();
        for slot in expired {
            log::debug!("worker {}: closing idle connection", self.id);
            self.close_conn(slot, true);
        }

        let read_timeout = self.cfg.read_timeout_millis;
        let stalled: Vec<usize> = self
            .conns
            .iter()
            .filter(|(_, conn)| {
                conn.park == Park::Read
                    && conn.step == Step::Recv
                    && conn.read_elapsed_millis() > read_timeout
            })
            .map(|(slot, _)| slot)
            .collect();
        for slot in stalled {
            let fd = self.conns[slot].sock.as_raw_fd();
            let _ = self.notifier.deregister(fd);
            self.conns[slot].park = Park::None;
            self.step_loop(slot);
        }

        self.last_sweep = now;
    }

    #[cfg(test)]
    fn num_conns(&self) -> usize {
        self.conns.len()
    }
}

/// The six recv gates of the parser driver, restartable at every yield.
fn recv_phase(conn: &mut Conn, cfg: &ServerConfig) -> RecvPhase {
    if conn.ready {
        return RecvPhase::Ready;
    }

    // parse whatever is already buffered
    match conn.progress.pump(&conn.inout) {
        Err(e) => {
            log::info!("parse failed on {}: {e}", conn.handle);
            conn.progress.fail();
            conn.ready = true;
            return RecvPhase::Ready;
        }
        Ok(PumpState::Complete) => {
            conn.ready = true;
            return RecvPhase::Ready;
        }
        Ok(PumpState::NeedMore(_)) => {}
    }

    // give up with a 400 once the read timeout is exceeded
    if conn.read_elapsed_millis() > cfg.read_timeout_millis {
        log::debug!("read timeout on {}", conn.handle);
        conn.progress.fail();
        conn.ready = true;
        return RecvPhase::Ready;
    }

    let wanted = conn.progress.bytes_to_read(&conn.inout);
    let budget = cfg.max_request_read_bytes.saturating_sub(conn.inout.len());
    let outcome = match conn.tls.as_mut() {
        Some(tls) => io::read_tls(
            tls,
            &mut conn.sock,
            &mut conn.inout,
            wanted,
            cfg.max_read_buffer_size,
            budget,
        ),
        None => io::read_plain(
            &mut conn.sock,
            &mut conn.inout,
            wanted,
            cfg.max_read_buffer_size,
            budget,
        ),
    };

    match outcome {
        IoOutcome::Error => RecvPhase::CloseError,
        IoOutcome::Again => match conn.progress.pump(&conn.inout) {
            Err(e) => {
                log::info!("parse failed on {}: {e}", conn.handle);
                conn.progress.fail();
                conn.ready = true;
                RecvPhase::Ready
            }
            Ok(PumpState::Complete) => {
                conn.ready = true;
                RecvPhase::Ready
            }
            Ok(PumpState::NeedMore(_)) => RecvPhase::Park,
        },
        IoOutcome::Done => {
            if conn.inout.is_empty() {
                log::debug!("peer closed {}", conn.handle);
                return RecvPhase::ClosePeer;
            }
            match conn.progress.pump(&conn.inout) {
                Err(e) => {
                    log::info!("parse failed on {}: {e}", conn.handle);
                    conn.progress.fail();
                    conn.ready = true;
                    RecvPhase::Ready
                }
                Ok(PumpState::Complete) => {
                    conn.ready = true;
                    RecvPhase::Ready
                }
                Ok(PumpState::NeedMore(_)) => {
                    // peer stopped before the announced body arrived
                    conn.progress.fail();
                    conn.ready = true;
                    RecvPhase::Ready
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::HandlerFn;
    use crate::notifier::scripted::ScriptedNotifier;
    use gale_http::Request;
    use std::io::Read;
    use std::net::TcpStream;

    fn test_worker(cap: usize) -> (Worker<ScriptedNotifier>, Receiver<Event>) {
        let cfg = Arc::new(
            ServerConfig::new()
                .with_num_threads(1)
                .with_thread_max_concurrent_conns(cap),
        );
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.set_nonblocking(true).unwrap();
        let (tx, rx) = crossbeam_channel::bounded(64);
        let seed = WorkerSeed {
            id: 0,
            num_threads: 1,
            cfg,
            listener,
            tls: None,
            rx: rx.clone(),
            tx,
            table: Arc::new(HandleTable::new()),
            server_handle: "server-test".to_string(),
            executor: Box::new(HandlerFn(|_: &ConnContext, _: &Request| {
                Ok(Response::ok())
            })),
        };
        (Worker::new(seed, ScriptedNotifier::new()), rx)
    }

    fn connected_pair(worker: &Worker<ScriptedNotifier>) -> (TcpStream, TcpStream) {
        let port = worker.listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        // the listener is non-blocking; the connect may race the accept
        for _ in 0..100 {
            match worker.listener.accept() {
                Ok((sock, _)) => return (client, sock),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(e) => panic!("accept failed: {e}"),
            }
        }
        panic!("accept timed out");
    }

    fn new_conn(worker: &mut Worker<ScriptedNotifier>) -> (TcpStream, Box<Conn>) {
        let (client, sock) = connected_pair(worker);
        sock.set_nonblocking(true).unwrap();
        let handle = next_conn_handle();
        worker.table.register(&handle, 0, "server-test");
        let conn = Conn::new(sock, None, handle, "::1".to_string(), worker.parse_limits());
        (client, Box::new(conn))
    }

    #[test]
    fn admission_within_cap() {
        let (mut worker, rx) = test_worker(1);
        let (_client, conn) = new_conn(&mut worker);
        worker.on_new_conn(conn);
        assert_eq!(worker.num_conns(), 1);
        assert_eq!(worker.table.len(), 1);
        // a RESUME for the admitted connection was queued
        assert!(matches!(rx.try_recv(), Ok(Event::Resume { .. })));
    }

    #[test]
    fn admission_over_cap_closes_immediately() {
        let (mut worker, _rx) = test_worker(1);
        let (_c1, first) = new_conn(&mut worker);
        worker.on_new_conn(first);

        let (mut c2, second) = new_conn(&mut worker);
        worker.on_new_conn(second);

        // cap respected, handle gone, client sees EOF without any bytes
        assert_eq!(worker.num_conns(), 1);
        assert_eq!(worker.table.len(), 1);
        let mut buf = [0u8; 8];
        c2.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(c2.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn draining_worker_refuses_new_conns() {
        let (mut worker, _rx) = test_worker(0);
        worker.on_terminate();
        let (mut client, conn) = new_conn(&mut worker);
        worker.on_new_conn(conn);
        assert_eq!(worker.num_conns(), 0);
        let mut buf = [0u8; 8];
        client.set_read_timeout(Some(Duration::from_secs(2))).unwrap();
        assert_eq!(client.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn keepalive_readiness_becomes_wake_event() {
        let (mut worker, rx) = test_worker(0);
        let (_client, conn) = new_conn(&mut worker);
        worker.on_new_conn(conn);
        let Ok(Event::Resume { slot, .. }) = rx.try_recv() else {
            panic!("expected resume");
        };

        worker.park(slot, Park::Keepalive);
        assert_eq!(worker.conns[slot].park, Park::Keepalive);
        assert_eq!(worker.notifier.registered.len(), 1);

        worker.conn_ready(slot);
        assert_eq!(worker.conns[slot].park, Park::None);
        assert!(worker.notifier.registered.is_empty());
        assert!(matches!(rx.try_recv(), Ok(Event::KeepaliveWake { .. })));
    }

    #[test]
    fn stale_generation_resume_is_ignored() {
        let (mut worker, rx) = test_worker(0);
        let (_client, conn) = new_conn(&mut worker);
        worker.on_new_conn(conn);
        let Ok(Event::Resume { slot, generation }) = rx.try_recv() else {
            panic!("expected resume");
        };
        // a resume from a previous life of the slot does nothing
        worker.on_resume(slot, generation + 1);
        assert_eq!(worker.num_conns(), 1);
        assert!(!worker.conns[slot].ready);
    }

    #[test]
    fn sweep_reaps_idle_connections() {
        let (mut worker, rx) = test_worker(0);
        {
            let cfg = Arc::make_mut(&mut worker.cfg);
            cfg.conn_timeout_millis = 0;
        }
        let (_client, conn) = new_conn(&mut worker);
        worker.on_new_conn(conn);
        let _ = rx.try_recv();
        assert_eq!(worker.num_conns(), 1);
        std::thread::sleep(Duration::from_millis(5));
        worker.sweep();
        assert_eq!(worker.num_conns(), 0);
        assert_eq!(worker.table.len(), 0);
    }
}
