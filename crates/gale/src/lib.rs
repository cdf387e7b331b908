//! gale, a multi-threaded, event-driven HTTP/HTTPS connection server.
//!
//! The heavy lifting lives in two crates, re-exported here:
//!
//! - [`gale_core`]: connection lifecycle. Sockets, readiness, workers,
//!   TLS, admission, draining shutdown.
//! - [`gale_http`]: the HTTP/1.x wire layer. Incremental parsing, body
//!   transport, response emission.
//!
//! # Quick start
//!
//! ```no_run
//! use gale::prelude::*;
//!
//! let mut server = Server::new(ServerConfig::new().with_num_threads(4));
//! let factory = handler_factory(|_ctx, req| {
//!     Ok(Response::ok()
//!         .with_header("Content-Type", "text/plain")
//!         .with_body(format!("you asked for {}", req.path)))
//! });
//! server.listen(ListenSpec::http(8080), &factory).expect("listen failed");
//! loop {
//!     std::thread::park();
//! }
//! ```

#![forbid(unsafe_code)]

pub use gale_core as core;
pub use gale_http as http;

/// The types most embedders need.
pub mod prelude {
    pub use gale_core::{
        handler_factory, ConnContext, Executor, ExecutorFactory, HandlerError, HandlerFn,
        ListenSpec, Scheme, Server, ServerConfig, ServerError, TlsPaths,
    };
    pub use gale_http::{Headers, HttpVersion, Method, Request, Response};
}
