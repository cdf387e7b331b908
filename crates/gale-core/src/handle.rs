//! Process-wide connection handle table.
//!
//! Maps opaque handle strings to `(worker, slot, generation)` addresses so
//! embedder code never sees raw connection state. The current request of a
//! dispatched connection is stashed here as well, which is what makes
//! `info_conn` answerable from any thread.

use gale_http::Request;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_CONN: AtomicU64 = AtomicU64::new(1);
static NEXT_SERVER: AtomicU64 = AtomicU64::new(1);

/// Mint a process-unique connection handle.
pub(crate) fn next_conn_handle() -> String {
    format!("conn{}", NEXT_CONN.fetch_add(1, Ordering::Relaxed))
}

/// Mint a process-unique server handle.
pub(crate) fn next_server_handle() -> String {
    format!("server{}", NEXT_SERVER.fetch_add(1, Ordering::Relaxed))
}

/// Where a live connection lives.
#[derive(Debug, Clone)]
pub struct ConnAddr {
    /// Owning worker index.
    pub worker_id: usize,
    /// Arena slot, once admitted.
    pub slot: Option<usize>,
    /// Generation guard; a reused slot gets a new generation.
    pub generation: u64,
}

/// What `info_conn` reports for a handle.
#[derive(Debug, Clone)]
pub struct ConnInfo {
    /// The request currently dispatched on the connection, if any.
    pub request: Option<Arc<Request>>,
    /// Handle of the owning server.
    pub server: String,
}

struct Entry {
    worker_id: usize,
    slot: Option<usize>,
    generation: u64,
    request: Option<Arc<Request>>,
    server: String,
}

/// Mutex-protected handle registry shared by every worker of a server.
#[derive(Default)]
pub struct HandleTable {
    inner: Mutex<HashMap<String, Entry>>,
}

impl HandleTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handle before its NEW_CONN event is posted. The slot is
    /// bound later, at admission.
    pub(crate) fn register(&self, handle: &str, worker_id: usize, server: &str) {
        self.inner.lock().insert(
            handle.to_string(),
            Entry {
                worker_id,
                slot: None,
                generation: 0,
                request: None,
                server: server.to_string(),
            },
        );
    }

    /// Bind the arena address once the connection is admitted.
    pub(crate) fn bind_slot(&self, handle: &str, slot: usize, generation: u64) {
        if let Some(entry) = self.inner.lock().get_mut(handle) {
            entry.slot = Some(slot);
            entry.generation = generation;
        }
    }

    /// Stash the request being dispatched on the connection.
    pub(crate) fn set_request(&self, handle: &str, request: Arc<Request>) {
        if let Some(entry) = self.inner.lock().get_mut(handle) {
            entry.request = Some(request);
        }
    }

    /// Release the stashed request when a keepalive connection recycles.
    pub(crate) fn clear_request(&self, handle: &str) {
        if let Some(entry) = self.inner.lock().get_mut(handle) {
            entry.request = None;
        }
    }

    /// Remove a handle. Returns false when it was already gone, which lets
    /// callers gate double-close paths.
    pub(crate) fn unregister(&self, handle: &str) -> bool {
        self.inner.lock().remove(handle).is_some()
    }

    /// Resolve a handle to its arena address.
    #[must_use]
    pub fn resolve(&self, handle: &str) -> Option<ConnAddr> {
        self.inner.lock().get(handle).map(|entry| ConnAddr {
            worker_id: entry.worker_id,
            slot: entry.slot,
            generation: entry.generation,
        })
    }

    /// The `info_conn` view: current request and owning server.
    #[must_use]
    pub fn info(&self, handle: &str) -> Option<ConnInfo> {
        self.inner.lock().get(handle).map(|entry| ConnInfo {
            request: entry.request.clone(),
            server: entry.server.clone(),
        })
    }

    /// Number of live handles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// True when no handles are registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gale_http::{Method, Request};

    #[test]
    fn handles_are_unique() {
        let a = next_conn_handle();
        let b = next_conn_handle();
        assert_ne!(a, b);
    }

    #[test]
    fn register_bind_resolve() {
        let table = HandleTable::new();
        table.register("conn1", 3, "server1");
        let addr = table.resolve("conn1").unwrap();
        assert_eq!(addr.worker_id, 3);
        assert!(addr.slot.is_none());

        table.bind_slot("conn1", 12, 7);
        let addr = table.resolve("conn1").unwrap();
        assert_eq!(addr.slot, Some(12));
        assert_eq!(addr.generation, 7);
    }

    #[test]
    fn unregister_gates_double_close() {
        let table = HandleTable::new();
        table.register("conn2", 0, "server1");
        assert!(table.unregister("conn2"));
        assert!(!table.unregister("conn2"));
        assert!(table.resolve("conn2").is_none());
    }

    #[test]
    fn info_carries_request_and_server() {
        let table = HandleTable::new();
        table.register("conn3", 0, "server9");
        assert!(table.info("conn3").unwrap().request.is_none());

        let request = Arc::new(Request::new(Method::Get, "/x"));
        table.set_request("conn3", request);
        let info = table.info("conn3").unwrap();
        assert_eq!(info.server, "server9");
        assert_eq!(info.request.unwrap().path, "/x");
    }

    #[test]
    fn info_unknown_handle_is_none() {
        let table = HandleTable::new();
        assert!(table.info("conn999").is_none());
    }
}
