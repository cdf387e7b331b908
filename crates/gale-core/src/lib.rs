//! Multi-threaded, event-driven HTTP/HTTPS connection server core.
//!
//! The core accepts TCP connections, negotiates TLS when required, parses
//! HTTP/1.x requests incrementally, dispatches each completed request to an
//! embedder-supplied [`Executor`], writes the response, and either recycles
//! the connection (keep-alive) or closes it.
//!
//! # Architecture
//!
//! - Parallel worker threads, each single-threaded and cooperative inside.
//!   A connection is pinned to its worker for life, so connection state
//!   needs no locking.
//! - Every worker owns a SO_REUSEPORT listening socket; the kernel
//!   load-balances accepts.
//! - Suspension happens only when non-blocking I/O reports would-block
//!   (AGAIN), when a TLS handshake wants more bytes, or when the event
//!   queue is empty. The queue and the readiness notifier share one wait.
//! - Admission control caps connections per worker; over the cap, new
//!   connections are closed immediately.
//! - Shutdown drains: workers stop accepting, finish in-flight
//!   connections, and exit once idle or past the drain grace.
//!
//! # Example
//!
//! ```no_run
//! use gale_core::{handler_factory, ListenSpec, Server, ServerConfig};
//! use gale_http::Response;
//!
//! let mut server = Server::new(ServerConfig::new().with_num_threads(4));
//! let factory = handler_factory(|_ctx, req| {
//!     Ok(Response::ok().with_body(format!("hello from {}", req.path)))
//! });
//! let port = server.listen(ListenSpec::http(8080), &factory)?;
//! println!("listening on {port}");
//! # Ok::<(), gale_core::ServerError>(())
//! ```

#![forbid(unsafe_code)]

mod config;
mod conn;
mod error;
mod event;
mod handle;
mod handler;
mod io;
mod notifier;
mod server;
mod socket;
mod tls;
mod worker;

pub use config::{
    ServerConfig, DEFAULT_CONN_TIMEOUT_MILLIS, DEFAULT_MAX_HEADERS_SIZE,
    DEFAULT_MAX_READ_BUFFER_SIZE, DEFAULT_MAX_REQUEST_LINE_LEN, DEFAULT_MAX_REQUEST_READ_BYTES,
    DEFAULT_NUM_THREADS, DEFAULT_READ_TIMEOUT_MILLIS,
};
pub use error::ServerError;
pub use handle::{ConnAddr, ConnInfo, HandleTable};
pub use handler::{
    handler_factory, ConnContext, Executor, ExecutorFactory, HandlerError, HandlerFn,
};
pub use io::IoOutcome;
pub use notifier::{Interest, Notifier, PollNotifier, ReadyEvent, WakeHandle};
pub use server::{ListenSpec, Listener, Scheme, Server, TlsPaths};
