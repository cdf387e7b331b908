//! Server configuration.

use gale_http::GzipPolicy;

/// Default number of worker threads per listener.
pub const DEFAULT_NUM_THREADS: usize = 10;

/// Default bound on time from first request byte to a complete parse.
pub const DEFAULT_READ_TIMEOUT_MILLIS: u64 = 30 * 1000;

/// Default keepalive idle bound for a connection.
pub const DEFAULT_CONN_TIMEOUT_MILLIS: u64 = 2 * 60 * 1000;

/// Default cumulative cap on bytes read for a single request.
pub const DEFAULT_MAX_REQUEST_READ_BYTES: usize = 10 * 1024 * 1024;

/// Default per-call read buffer size.
pub const DEFAULT_MAX_READ_BUFFER_SIZE: usize = 32 * 1024;

/// Default request line length cap.
pub const DEFAULT_MAX_REQUEST_LINE_LEN: usize = 8 * 1024;

/// Default header block size cap.
pub const DEFAULT_MAX_HEADERS_SIZE: usize = 64 * 1024;

/// Immutable configuration shared by every listener and worker.
///
/// Built in the `ServerConfig::new().with_*()` style; all values have
/// production defaults.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Worker threads spawned per listener (unless the listen call
    /// overrides it).
    pub num_threads: usize,
    /// Per-worker connection cap; 0 disables admission control.
    pub thread_max_concurrent_conns: usize,
    /// Time budget from the first byte of a request until it parses.
    pub read_timeout_millis: u64,
    /// Idle bound; connections quiet longer than this are reaped.
    pub conn_timeout_millis: u64,
    /// Enable TCP keepalive probes and keep-alive connection recycling.
    pub keepalive: bool,
    /// TCP keepalive idle time, seconds.
    pub keepidle_secs: u32,
    /// TCP keepalive probe interval, seconds.
    pub keepintvl_secs: u32,
    /// TCP keepalive probe count.
    pub keepcnt: u32,
    /// Listen backlog.
    pub backlog: i32,
    /// Cumulative cap on bytes read while assembling one request.
    pub max_request_read_bytes: usize,
    /// Largest single read.
    pub max_read_buffer_size: usize,
    /// Request line length cap; exceeding it fails the request with a 400.
    pub max_request_line_len: usize,
    /// Header block size cap; exceeding it fails the request with a 400.
    pub max_headers_size: usize,
    /// Run connection maintenance every this many completed requests.
    pub gc_cleanup_threshold: u64,
    /// Upper bound between maintenance passes, milliseconds.
    pub gc_interval_millis: u64,
    /// Worker thread stack size; `None` uses the platform default.
    pub thread_stack_size: Option<usize>,
    /// Capacity of each worker's event queue.
    pub event_queue_capacity: usize,
    /// How long a draining worker waits for in-flight connections.
    pub drain_grace_millis: u64,
    /// Enable gzip response compression.
    pub gzip: bool,
    /// Compression thresholds and eligible content types.
    pub gzip_policy: GzipPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            num_threads: DEFAULT_NUM_THREADS,
            thread_max_concurrent_conns: 0,
            read_timeout_millis: DEFAULT_READ_TIMEOUT_MILLIS,
            conn_timeout_millis: DEFAULT_CONN_TIMEOUT_MILLIS,
            keepalive: true,
            keepidle_secs: 10,
            keepintvl_secs: 5,
            keepcnt: 3,
            backlog: 1024,
            max_request_read_bytes: DEFAULT_MAX_REQUEST_READ_BYTES,
            max_read_buffer_size: DEFAULT_MAX_READ_BUFFER_SIZE,
            max_request_line_len: DEFAULT_MAX_REQUEST_LINE_LEN,
            max_headers_size: DEFAULT_MAX_HEADERS_SIZE,
            gc_cleanup_threshold: 10 * 1000,
            gc_interval_millis: 10 * 1000,
            thread_stack_size: None,
            event_queue_capacity: 1024,
            drain_grace_millis: 10 * 1000,
            gzip: true,
            gzip_policy: GzipPolicy::default(),
        }
    }
}

impl ServerConfig {
    /// Configuration with production defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the worker thread count.
    #[must_use]
    pub fn with_num_threads(mut self, n: usize) -> Self {
        self.num_threads = n;
        self
    }

    /// Sets the per-worker connection cap (0 = unlimited).
    #[must_use]
    pub fn with_thread_max_concurrent_conns(mut self, n: usize) -> Self {
        self.thread_max_concurrent_conns = n;
        self
    }

    /// Sets the request read timeout in milliseconds.
    #[must_use]
    pub fn with_read_timeout_millis(mut self, millis: u64) -> Self {
        self.read_timeout_millis = millis;
        self
    }

    /// Sets the keepalive idle timeout in milliseconds.
    #[must_use]
    pub fn with_conn_timeout_millis(mut self, millis: u64) -> Self {
        self.conn_timeout_millis = millis;
        self
    }

    /// Enables or disables TCP keepalive and connection recycling.
    #[must_use]
    pub fn with_keepalive(mut self, enabled: bool) -> Self {
        self.keepalive = enabled;
        self
    }

    /// Sets the listen backlog.
    #[must_use]
    pub fn with_backlog(mut self, backlog: i32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Sets the cumulative per-request read cap.
    #[must_use]
    pub fn with_max_request_read_bytes(mut self, bytes: usize) -> Self {
        self.max_request_read_bytes = bytes;
        self
    }

    /// Sets the request line length cap.
    #[must_use]
    pub fn with_max_request_line_len(mut self, bytes: usize) -> Self {
        self.max_request_line_len = bytes;
        self
    }

    /// Sets the header block size cap.
    #[must_use]
    pub fn with_max_headers_size(mut self, bytes: usize) -> Self {
        self.max_headers_size = bytes;
        self
    }

    /// Sets the maintenance interval in completed requests.
    #[must_use]
    pub fn with_gc_cleanup_threshold(mut self, requests: u64) -> Self {
        self.gc_cleanup_threshold = requests;
        self
    }

    /// Sets the maintenance interval in milliseconds.
    #[must_use]
    pub fn with_gc_interval_millis(mut self, millis: u64) -> Self {
        self.gc_interval_millis = millis;
        self
    }

    /// Sets the worker thread stack size.
    #[must_use]
    pub fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = Some(bytes);
        self
    }

    /// Sets the drain grace period in milliseconds.
    #[must_use]
    pub fn with_drain_grace_millis(mut self, millis: u64) -> Self {
        self.drain_grace_millis = millis;
        self
    }

    /// Enables or disables gzip response compression.
    #[must_use]
    pub fn with_gzip(mut self, enabled: bool) -> Self {
        self.gzip = enabled;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ServerConfig::new();
        assert_eq!(cfg.num_threads, 10);
        assert_eq!(cfg.thread_max_concurrent_conns, 0);
        assert_eq!(cfg.read_timeout_millis, 30_000);
        assert_eq!(cfg.conn_timeout_millis, 120_000);
        assert!(cfg.keepalive);
        assert_eq!(cfg.max_request_read_bytes, 10 * 1024 * 1024);
        assert_eq!(cfg.max_read_buffer_size, 32 * 1024);
        assert_eq!(cfg.max_request_line_len, 8 * 1024);
        assert_eq!(cfg.max_headers_size, 64 * 1024);
        assert!(cfg.gzip);
    }

    #[test]
    fn builder_overrides() {
        let cfg = ServerConfig::new()
            .with_num_threads(2)
            .with_thread_max_concurrent_conns(64)
            .with_read_timeout_millis(500)
            .with_conn_timeout_millis(1000)
            .with_max_request_line_len(1024)
            .with_max_headers_size(2048)
            .with_gzip(false);
        assert_eq!(cfg.num_threads, 2);
        assert_eq!(cfg.thread_max_concurrent_conns, 64);
        assert_eq!(cfg.read_timeout_millis, 500);
        assert_eq!(cfg.conn_timeout_millis, 1000);
        assert_eq!(cfg.max_request_line_len, 1024);
        assert_eq!(cfg.max_headers_size, 2048);
        assert!(!cfg.gzip);
    }
}
