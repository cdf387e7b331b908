//! TLS context construction and the incremental handshake driver.

use crate::error::ServerError;
use std::fs::File;
use std::io::BufReader;
use std::net::TcpStream;
use std::path::Path;
use std::sync::Arc;

/// Where the handshake stands after a drive attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HandshakeOutcome {
    /// Handshake finished and every pending record is flushed.
    Complete,
    /// The socket would block; park until readiness fires again.
    Suspend,
    /// Unrecoverable handshake failure; close the connection.
    Failed,
}

/// Build a server-side TLS configuration from PEM certificate and key files.
///
/// TLS 1.2 and 1.3 only, no client authentication. Failures here are fatal
/// to the listen call.
pub(crate) fn build_tls_config(
    cert_path: &Path,
    key_path: &Path,
) -> Result<Arc<rustls::ServerConfig>, ServerError> {
    let mut cert_reader = BufReader::new(File::open(cert_path)?);
    let certs = rustls_pemfile::certs(&mut cert_reader)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| ServerError::TlsConfig("unable to load certificate".to_string()))?;
    if certs.is_empty() {
        return Err(ServerError::TlsConfig(
            "no certificates found".to_string(),
        ));
    }

    let mut key_reader = BufReader::new(File::open(key_path)?);
    let key = rustls_pemfile::private_key(&mut key_reader)
        .map_err(|_| ServerError::TlsConfig("unable to load private key".to_string()))?
        .ok_or_else(|| ServerError::TlsConfig("no private key found".to_string()))?;

    let config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;

    Ok(Arc::new(config))
}

/// Drive the TLS accept as far as the socket allows.
///
/// Restartable: each call makes whatever progress is possible and suspends
/// on would-block in either direction. `Complete` is only reported once the
/// final flight is flushed.
pub(crate) fn drive_handshake(
    tls: &mut rustls::ServerConnection,
    sock: &mut TcpStream,
) -> HandshakeOutcome {
    loop {
        if tls.wants_write() {
            match tls.write_tls(sock) {
                Ok(_) => continue,
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    return HandshakeOutcome::Suspend
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    log::debug!("tls handshake write error: {e}");
                    return HandshakeOutcome::Failed;
                }
            }
        }

        if !tls.is_handshaking() {
            return HandshakeOutcome::Complete;
        }

        match tls.read_tls(sock) {
            Ok(0) => {
                log::debug!("peer closed connection in tls handshake");
                return HandshakeOutcome::Failed;
            }
            Ok(_) => {
                if let Err(e) = tls.process_new_packets() {
                    log::warn!("tls handshake failed: {e}");
                    return HandshakeOutcome::Failed;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                return HandshakeOutcome::Suspend
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("tls handshake read error: {e}");
                return HandshakeOutcome::Failed;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_cert_file_fails() {
        let err = build_tls_config(
            Path::new("/nonexistent/cert.pem"),
            Path::new("/nonexistent/key.pem"),
        )
        .unwrap_err();
        assert!(matches!(err, ServerError::Io(_)));
    }

    #[test]
    fn garbage_pem_fails() {
        let dir = std::env::temp_dir();
        let cert = dir.join("gale-test-bad-cert.pem");
        let key = dir.join("gale-test-bad-key.pem");
        std::fs::write(&cert, "not a certificate").unwrap();
        std::fs::write(&key, "not a key").unwrap();

        let err = build_tls_config(&cert, &key).unwrap_err();
        assert!(matches!(err, ServerError::TlsConfig(_)));

        let _ = std::fs::remove_file(cert);
        let _ = std::fs::remove_file(key);
    }
}
