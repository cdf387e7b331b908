//! Non-blocking I/O adapters.
//!
//! Four operations with one result contract: plaintext and TLS reads append
//! to the connection's accumulation buffer, plaintext and TLS writes drain
//! from it at an offset.
//!
//! - `Done`: all possible progress was made (reads: the wanted byte count
//!   arrived or the peer closed; writes: everything flushed)
//! - `Again`: the socket would block; park and retry on readiness
//! - `Error`: unrecoverable failure; the caller closes
//!
//! A read with `wanted == 0` pulls whatever is available and reports
//! `Again` once the socket empties, mirroring the "read until blocked"
//! contract the parser driver relies on.

use std::io::{Read, Write};
use std::net::TcpStream;

/// The three-valued non-blocking I/O result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoOutcome {
    /// All requested progress was made.
    Done,
    /// The socket would block.
    Again,
    /// Unrecoverable failure.
    Error,
}

/// Append up to `wanted` plaintext bytes (0 = whatever is available).
///
/// `budget` is the remaining cumulative request allowance; exceeding it is
/// an error.
pub(crate) fn read_plain(
    sock: &mut TcpStream,
    inout: &mut Vec<u8>,
    wanted: usize,
    max_buffer: usize,
    budget: usize,
) -> IoOutcome {
    let cap = if wanted == 0 {
        max_buffer
    } else {
        wanted.min(max_buffer)
    };
    let mut chunk = vec![0u8; cap.max(1)];
    let mut total = 0usize;

    loop {
        match sock.read(&mut chunk) {
            Ok(0) => return IoOutcome::Done,
            Ok(n) => {
                total += n;
                if total > budget {
                    log::warn!("request too large");
                    return IoOutcome::Error;
                }
                inout.extend_from_slice(&chunk[..n]);
                if wanted > 0 && total >= wanted {
                    return IoOutcome::Done;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return IoOutcome::Again,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("read error: {e}");
                return IoOutcome::Error;
            }
        }
    }
}

/// Flush `buf[*offset..]` to the socket, advancing the offset.
pub(crate) fn write_plain(sock: &mut TcpStream, buf: &[u8], offset: &mut usize) -> IoOutcome {
    while *offset < buf.len() {
        match sock.write(&buf[*offset..]) {
            Ok(0) => return IoOutcome::Error,
            Ok(n) => *offset += n,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return IoOutcome::Again,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("write error: {e}");
                return IoOutcome::Error;
            }
        }
    }
    IoOutcome::Done
}

/// TLS variant of [`read_plain`]: pulls records from the socket, decrypts,
/// and appends the plaintext. A clean close_notify reads as `Done`.
pub(crate) fn read_tls(
    tls: &mut rustls::ServerConnection,
    sock: &mut TcpStream,
    inout: &mut Vec<u8>,
    wanted: usize,
    max_buffer: usize,
    budget: usize,
) -> IoOutcome {
    let mut total = 0usize;
    let mut chunk = vec![0u8; max_buffer.max(1)];

    loop {
        // drain plaintext already decrypted (handshake read-ahead included)
        loop {
            match tls.reader().read(&mut chunk) {
                Ok(0) => return IoOutcome::Done, // close_notify
                Ok(n) => {
                    total += n;
                    if total > budget {
                        log::warn!("request too large");
                        return IoOutcome::Error;
                    }
                    inout.extend_from_slice(&chunk[..n]);
                    if wanted > 0 && total >= wanted {
                        return IoOutcome::Done;
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    log::debug!("tls plaintext read error: {e}");
                    return IoOutcome::Error;
                }
            }
        }

        match tls.read_tls(sock) {
            Ok(0) => return IoOutcome::Done, // peer closed
            Ok(_) => {
                if let Err(e) = tls.process_new_packets() {
                    log::debug!("tls record error: {e}");
                    return IoOutcome::Error;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return IoOutcome::Again,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => {
                log::debug!("tls read error: {e}");
                return IoOutcome::Error;
            }
        }
    }
}

/// TLS variant of [`write_plain`]: encrypts `buf[*offset..]` and flushes
/// the records.
pub(crate) fn write_tls(
    tls: &mut rustls::ServerConnection,
    sock: &mut TcpStream,
    buf: &[u8],
    offset: &mut usize,
) -> IoOutcome {
    loop {
        if *offset < buf.len() {
            match tls.writer().write(&buf[*offset..]) {
                Ok(n) => *offset += n,
                Err(e) => {
                    log::debug!("tls plaintext write error: {e}");
                    return IoOutcome::Error;
                }
            }
        }

        while tls.wants_write() {
            match tls.write_tls(sock) {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return IoOutcome::Again,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                Err(e) => {
                    log::debug!("tls write error: {e}");
                    return IoOutcome::Error;
                }
            }
        }

        if *offset >= buf.len() {
            return IoOutcome::Done;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port)).unwrap();
        let (server, _) = listener.accept().unwrap();
        server.set_nonblocking(true).unwrap();
        (server, client)
    }

    #[test]
    fn read_whatever_available_then_again() {
        let (mut server, mut client) = socket_pair();
        client.write_all(b"hello").unwrap();
        // give the kernel a moment to deliver
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut inout = Vec::new();
        let outcome = read_plain(&mut server, &mut inout, 0, 1024, 1 << 20);
        assert_eq!(outcome, IoOutcome::Again);
        assert_eq!(inout, b"hello");
    }

    #[test]
    fn read_exact_wanted_is_done() {
        let (mut server, mut client) = socket_pair();
        client.write_all(b"12345").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut inout = Vec::new();
        let outcome = read_plain(&mut server, &mut inout, 5, 1024, 1 << 20);
        assert_eq!(outcome, IoOutcome::Done);
        assert_eq!(inout, b"12345");
    }

    #[test]
    fn read_empty_socket_is_again() {
        let (mut server, _client) = socket_pair();
        let mut inout = Vec::new();
        assert_eq!(
            read_plain(&mut server, &mut inout, 0, 1024, 1 << 20),
            IoOutcome::Again
        );
        assert!(inout.is_empty());
    }

    #[test]
    fn peer_close_is_done_with_empty_buffer() {
        let (mut server, client) = socket_pair();
        drop(client);
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut inout = Vec::new();
        assert_eq!(
            read_plain(&mut server, &mut inout, 0, 1024, 1 << 20),
            IoOutcome::Done
        );
        assert!(inout.is_empty());
    }

    #[test]
    fn budget_overflow_is_error() {
        let (mut server, mut client) = socket_pair();
        client.write_all(b"0123456789").unwrap();
        std::thread::sleep(std::time::Duration::from_millis(50));

        let mut inout = Vec::new();
        assert_eq!(
            read_plain(&mut server, &mut inout, 0, 1024, 4),
            IoOutcome::Error
        );
    }

    #[test]
    fn write_drains_fully() {
        let (mut server, mut client) = socket_pair();
        let payload = b"response bytes";
        let mut offset = 0;
        assert_eq!(
            write_plain(&mut server, payload, &mut offset),
            IoOutcome::Done
        );
        assert_eq!(offset, payload.len());

        let mut got = vec![0u8; payload.len()];
        client.read_exact(&mut got).unwrap();
        assert_eq!(&got, payload);
    }
}
