//! The handler seam.
//!
//! The core never interprets requests itself; each worker owns an opaque
//! [`Executor`] (the embedded interpreter or callback context) built by an
//! [`ExecutorFactory`] at worker startup. Interpreter state is saved and
//! restored around every invocation so a handler cannot leak state into the
//! event loop.

use crate::handle::ConnInfo;
use crate::handle::HandleTable;
use gale_http::{Request, Response};
use std::fmt;
use std::sync::Arc;

/// Per-request context handed to the executor alongside the request.
pub struct ConnContext {
    /// Handle of the connection serving this request.
    pub conn_handle: String,
    /// Handle of the owning server.
    pub server_handle: String,
    /// Peer address in v6 textual form (v4-mapped for IPv4 peers).
    pub client_ip: String,
    table: Arc<HandleTable>,
}

impl ConnContext {
    pub(crate) fn new(
        conn_handle: String,
        server_handle: String,
        client_ip: String,
        table: Arc<HandleTable>,
    ) -> Self {
        Self {
            conn_handle,
            server_handle,
            client_ip,
            table,
        }
    }

    /// Look up a connection handle, as the `info_conn` command does.
    /// Returns `None` for unknown handles.
    #[must_use]
    pub fn info_conn(&self, handle: &str) -> Option<ConnInfo> {
        self.table.info(handle)
    }
}

/// How a handler invocation failed.
#[derive(Debug)]
pub enum HandlerError {
    /// Short-circuit with a prebuilt response (the middleware "enter"
    /// contract): the payload is emitted as-is.
    Response(Response),
    /// Handler failure; the server answers 500 and closes.
    Failure(String),
}

impl fmt::Display for HandlerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Response(resp) => write!(f, "short-circuit response {}", resp.status_code),
            Self::Failure(msg) => write!(f, "handler failure: {msg}"),
        }
    }
}

impl std::error::Error for HandlerError {}

/// A per-worker request execution engine.
pub trait Executor: Send {
    /// Snapshot interpreter state before an invocation.
    fn save_state(&mut self) {}

    /// Restore interpreter state after an invocation.
    fn restore_state(&mut self) {}

    /// Handle one ready request.
    ///
    /// # Errors
    ///
    /// [`HandlerError::Response`] short-circuits with the given response;
    /// any other error turns into a 500 and the connection closes.
    fn invoke(&mut self, ctx: &ConnContext, request: &Request) -> Result<Response, HandlerError>;
}

/// Builds one executor per worker thread.
pub trait ExecutorFactory: Send + Sync {
    /// Create the executor for worker `worker_id`.
    fn create(&self, worker_id: usize) -> Box<dyn Executor>;
}

impl<F> ExecutorFactory for F
where
    F: Fn(usize) -> Box<dyn Executor> + Send + Sync,
{
    fn create(&self, worker_id: usize) -> Box<dyn Executor> {
        self(worker_id)
    }
}

/// Wrap a plain function as an executor.
pub struct HandlerFn<F>(pub F);

impl<F> Executor for HandlerFn<F>
where
    F: FnMut(&ConnContext, &Request) -> Result<Response, HandlerError> + Send,
{
    fn invoke(&mut self, ctx: &ConnContext, request: &Request) -> Result<Response, HandlerError> {
        (self.0)(ctx, request)
    }
}

/// Build an [`ExecutorFactory`] from a cloneable handler function, the
/// common case where every worker runs the same stateless handler.
pub fn handler_factory<F>(f: F) -> impl ExecutorFactory
where
    F: Fn(&ConnContext, &Request) -> Result<Response, HandlerError> + Clone + Send + Sync + 'static,
{
    move |_worker_id: usize| -> Box<dyn Executor> {
        let f = f.clone();
        Box::new(HandlerFn(move |ctx: &ConnContext, req: &Request| f(ctx, req)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_http::Method;

    #[test]
    fn handler_fn_invokes() {
        let mut exec = HandlerFn(|_ctx: &ConnContext, req: &Request| {
            Ok(Response::ok().with_body(req.path.clone()))
        });
        let ctx = ConnContext::new(
            "conn1".into(),
            "server1".into(),
            "::1".into(),
            Arc::new(HandleTable::new()),
        );
        let req = Request::new(Method::Get, "/ping");
        let resp = exec.invoke(&ctx, &req).unwrap();
        assert_eq!(resp.body, "/ping");
    }

    #[test]
    fn factory_builds_per_worker() {
        let factory = handler_factory(|_ctx, _req| Ok(Response::ok()));
        let _a = factory.create(0);
        let _b = factory.create(1);
    }

    #[test]
    fn context_info_conn_unknown_is_none() {
        let ctx = ConnContext::new(
            "conn1".into(),
            "server1".into(),
            "::1".into(),
            Arc::new(HandleTable::new()),
        );
        assert!(ctx.info_conn("conn404").is_none());
    }
}
