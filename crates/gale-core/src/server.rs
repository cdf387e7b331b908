//! Server assembly: listeners, worker spawning and draining shutdown.

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::event::Event;
use crate::handle::{next_server_handle, ConnInfo, HandleTable};
use crate::handler::ExecutorFactory;
use crate::notifier::{Notifier, PollNotifier, WakeHandle};
use crate::socket::bind_listener;
use crate::tls::build_tls_config;
use crate::worker::{Worker, WorkerSeed, TOKEN_WAKER};
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;
use std::thread;

/// Listener scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Plaintext HTTP.
    Http,
    /// HTTP over TLS.
    Https,
}

/// Certificate and key material for an HTTPS listener.
#[derive(Debug, Clone)]
pub struct TlsPaths {
    /// PEM certificate chain.
    pub cert: PathBuf,
    /// PEM private key.
    pub key: PathBuf,
}

/// What to listen on. Built with [`ListenSpec::http`] or
/// [`ListenSpec::https`] and refined with the `with_*` methods.
#[derive(Debug, Clone)]
pub struct ListenSpec {
    /// Scheme of the listener.
    pub scheme: Scheme,
    /// Host to bind; `None` binds the wildcard.
    pub host: Option<String>,
    /// Port to bind; 0 picks an ephemeral port (reported by `listen`).
    pub port: u16,
    /// Worker threads for this listener; defaults to the server config.
    pub num_threads: Option<usize>,
    /// TLS material, required for HTTPS.
    pub tls: Option<TlsPaths>,
}

impl ListenSpec {
    /// A plaintext listener on `port`.
    #[must_use]
    pub fn http(port: u16) -> Self {
        Self {
            scheme: Scheme::Http,
            host: None,
            port,
            num_threads: None,
            tls: None,
        }
    }

    /// A TLS listener on `port` with the given PEM files.
    #[must_use]
    pub fn https(port: u16, cert: impl Into<PathBuf>, key: impl Into<PathBuf>) -> Self {
        Self {
            scheme: Scheme::Https,
            host: None,
            port,
            num_threads: None,
            tls: Some(TlsPaths {
                cert: cert.into(),
                key: key.into(),
            }),
        }
    }

    /// Bind a specific host instead of the wildcard.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Override the worker thread count for this listener.
    #[must_use]
    pub fn with_threads(mut self, n: usize) -> Self {
        self.num_threads = Some(n);
        self
    }
}

struct WorkerLink {
    join: Option<thread::JoinHandle<()>>,
    tx: crossbeam_channel::Sender<Event>,
    waker: Arc<dyn WakeHandle>,
}

/// One bound (host, port, scheme) with its worker threads.
pub struct Listener {
    port: u16,
    scheme: Scheme,
    workers: Vec<WorkerLink>,
}

impl Listener {
    /// The actually bound port (useful when the spec asked for port 0).
    #[must_use]
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Scheme of this listener.
    #[must_use]
    pub fn scheme(&self) -> Scheme {
        self.scheme
    }
}

/// The server: immutable configuration, the process-wide handle table and
/// every attached listener.
pub struct Server {
    cfg: Arc<ServerConfig>,
    handle: String,
    table: Arc<HandleTable>,
    listeners: Vec<Listener>,
}

impl Server {
    /// Create a server from configuration.
    #[must_use]
    pub fn new(cfg: ServerConfig) -> Self {
        Self {
            cfg: Arc::new(cfg),
            handle: next_server_handle(),
            table: Arc::new(HandleTable::new()),
            listeners: Vec::new(),
        }
    }

    /// The server's handle string.
    #[must_use]
    pub fn handle(&self) -> &str {
        &self.handle
    }

    /// The attached listeners.
    #[must_use]
    pub fn listeners(&self) -> &[Listener] {
        &self.listeners
    }

    /// Number of currently registered connection handles.
    #[must_use]
    pub fn open_conns(&self) -> usize {
        self.table.len()
    }

    /// The `info_conn` command: request and server for a handle.
    ///
    /// # Errors
    ///
    /// Fails when the handle is unknown.
    pub fn info_conn(&self, handle: &str) -> Result<ConnInfo, ServerError> {
        self.table
            .info(handle)
            .ok_or_else(|| ServerError::HandleNotFound(handle.to_string()))
    }

    /// Spawn workers for a listener and attach it.
    ///
    /// Each worker binds its own SO_REUSEPORT socket, so every worker
    /// accepts independently. Blocks until every worker has signalled
    /// initialization. Returns the bound port.
    ///
    /// # Errors
    ///
    /// Bind failures, TLS configuration failures and worker spawn failures
    /// are fatal to the call.
    pub fn listen(
        &mut self,
        spec: ListenSpec,
        factory: &dyn ExecutorFactory,
    ) -> Result<u16, ServerError> {
        let tls = match spec.scheme {
            Scheme::Http => None,
            Scheme::Https => {
                let paths = spec.tls.as_ref().ok_or_else(|| {
                    ServerError::TlsConfig("https listener requires cert and key".to_string())
                })?;
                Some(build_tls_config(&paths.cert, &paths.key)?)
            }
        };

        let num_threads = spec.num_threads.unwrap_or(self.cfg.num_threads).max(1);
        let mut port = spec.port;
        let mut workers = Vec::with_capacity(num_threads);

        for i in 0..num_threads {
            let listener = bind_listener(spec.host.as_deref(), port, &self.cfg)?;
            if port == 0 {
                port = listener.local_addr()?.port();
            }

            let notifier = PollNotifier::new(TOKEN_WAKER)?;
            let waker = notifier.wake_handle();
            let (tx, rx) = crossbeam_channel::bounded(self.cfg.event_queue_capacity);
            let seed = WorkerSeed {
                id: i,
                num_threads,
                cfg: self.cfg.clone(),
                listener,
                tls: tls.clone(),
                rx,
                tx: tx.clone(),
                table: self.table.clone(),
                server_handle: self.handle.clone(),
                executor: factory.create(i),
            };

            let (ready_tx, ready_rx) = mpsc::channel();
            let mut builder = thread::Builder::new().name(format!("gale-worker-{port}-{i}"));
            if let Some(size) = self.cfg.thread_stack_size {
                builder = builder.stack_size(size);
            }
            let join = builder
                .spawn(move || Worker::new(seed, notifier).run(ready_tx))
                .map_err(ServerError::Io)?;

            // wait for the worker to signal that it is accepting
            match ready_rx.recv() {
                Ok(Ok(())) => {}
                Ok(Err(msg)) => return Err(ServerError::WorkerInit(msg)),
                Err(_) => {
                    return Err(ServerError::WorkerInit(
                        "worker exited before initializing".to_string(),
                    ))
                }
            }

            workers.push(WorkerLink {
                join: Some(join),
                tx,
                waker,
            });
        }

        log::info!(
            "listening on port {port} ({}) with {num_threads} workers",
            match spec.scheme {
                Scheme::Http => "http",
                Scheme::Https => "https",
            }
        );
        self.listeners.push(Listener {
            port,
            scheme: spec.scheme,
            workers,
        });
        Ok(port)
    }

    /// Terminate every worker and wait for the drain to finish. Workers
    /// stop accepting immediately and exit once their connections complete
    /// or the drain grace expires.
    pub fn shutdown(&mut self) {
        for listener in &self.listeners {
            for worker in &listener.workers {
                let _ = worker.tx.send(Event::Terminate);
                let _ = worker.waker.wake();
            }
        }
        for listener in &mut self.listeners {
            for worker in &mut listener.workers {
                if let Some(join) = worker.join.take() {
                    let _ = join.join();
                }
            }
        }
        self.listeners.clear();
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
