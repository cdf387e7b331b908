//! Server error type.

use std::fmt;
use std::io;

/// Errors surfaced by server startup, listening and handle lookups.
#[derive(Debug)]
pub enum ServerError {
    /// Socket or I/O failure.
    Io(io::Error),
    /// Host name did not resolve to any address.
    Resolve(String),
    /// TLS library error.
    Tls(rustls::Error),
    /// Certificate or key material could not be loaded.
    TlsConfig(String),
    /// A worker thread failed to initialize.
    WorkerInit(String),
    /// The connection handle is not registered.
    HandleNotFound(String),
}

impl fmt::Display for ServerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Resolve(host) => write!(f, "unable to resolve host: {host}"),
            Self::Tls(e) => write!(f, "tls error: {e}"),
            Self::TlsConfig(msg) => write!(f, "tls configuration error: {msg}"),
            Self::WorkerInit(msg) => write!(f, "worker initialization failed: {msg}"),
            Self::HandleNotFound(handle) => write!(f, "conn handle not found: {handle}"),
        }
    }
}

impl std::error::Error for ServerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Tls(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for ServerError {
    fn from(e: io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<rustls::Error> for ServerError {
    fn from(e: rustls::Error) -> Self {
        Self::Tls(e)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_formats() {
        let e = ServerError::Resolve("nosuchhost".to_string());
        assert_eq!(e.to_string(), "unable to resolve host: nosuchhost");

        let e = ServerError::HandleNotFound("conn42".to_string());
        assert!(e.to_string().contains("conn42"));
    }

    #[test]
    fn io_error_converts() {
        let e: ServerError = io::Error::new(io::ErrorKind::AddrInUse, "in use").into();
        assert!(matches!(e, ServerError::Io(_)));
    }
}
