//! Listening-socket setup.
//!
//! One dual-stack IPv6 socket serves both address families: `IPV6_V6ONLY`
//! is disabled and IPv4 peers appear as v4-mapped v6 addresses
//! (`::ffff:a.b.c.d`). Every listener is bound with SO_REUSEPORT so each
//! worker owns its own socket and the kernel load-balances accepts.

use crate::config::ServerConfig;
use crate::error::ServerError;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use std::net::{IpAddr, Ipv6Addr, SocketAddr, SocketAddrV6, ToSocketAddrs};
use std::time::Duration;

/// Create, configure and bind a non-blocking listening socket.
///
/// With no host the socket binds the v6 wildcard. A host name resolves
/// through the system resolver; the first returned address is used, IPv4
/// results encoded as v4-mapped v6. Bind failure is fatal.
pub(crate) fn bind_listener(
    host: Option<&str>,
    port: u16,
    cfg: &ServerConfig,
) -> Result<std::net::TcpListener, ServerError> {
    let socket = Socket::new(Domain::IPV6, Type::STREAM, Some(Protocol::TCP))?;
    socket.set_only_v6(false)?;
    #[cfg(unix)]
    socket.set_cloexec(true)?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    if cfg.keepalive {
        let params = TcpKeepalive::new()
            .with_time(Duration::from_secs(u64::from(cfg.keepidle_secs)))
            .with_interval(Duration::from_secs(u64::from(cfg.keepintvl_secs)))
            .with_retries(cfg.keepcnt);
        socket.set_tcp_keepalive(&params)?;
    }

    let addr = resolve_v6(host, port)?;
    socket.bind(&SocketAddr::V6(addr).into())?;
    socket.set_nonblocking(true)?;
    socket.listen(cfg.backlog)?;

    Ok(socket.into())
}

/// Resolve a host to a v6 socket address, mapping IPv4 results.
fn resolve_v6(host: Option<&str>, port: u16) -> Result<SocketAddrV6, ServerError> {
    let host = match host {
        None => return Ok(SocketAddrV6::new(Ipv6Addr::UNSPECIFIED, port, 0, 0)),
        Some(host) => host,
    };

    let mut addrs = (host, port)
        .to_socket_addrs()
        .map_err(|_| ServerError::Resolve(host.to_string()))?;
    let first = addrs
        .next()
        .ok_or_else(|| ServerError::Resolve(host.to_string()))?;

    Ok(match first {
        SocketAddr::V6(v6) => v6,
        SocketAddr::V4(v4) => SocketAddrV6::new(v4.ip().to_ipv6_mapped(), port, 0, 0),
    })
}

/// Textual v6 form of a peer address; IPv4 peers come out v4-mapped.
pub(crate) fn client_ip_v6(addr: SocketAddr) -> String {
    match addr.ip() {
        IpAddr::V4(v4) => v4.to_ipv6_mapped().to_string(),
        IpAddr::V6(v6) => v6.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn wildcard_bind_and_dual_stack_accept() {
        let cfg = ServerConfig::new();
        let listener = bind_listener(None, 0, &cfg).unwrap();
        let port = listener.local_addr().unwrap().port();

        // IPv4 client connects to the same socket
        let client = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        listener.set_nonblocking(false).unwrap();
        let (_, peer) = listener.accept().unwrap();
        assert!(client_ip_v6(peer).starts_with("::ffff:127.0.0.1"));
        drop(client);
    }

    #[test]
    fn two_listeners_share_a_port() {
        let cfg = ServerConfig::new();
        let first = bind_listener(None, 0, &cfg).unwrap();
        let port = first.local_addr().unwrap().port();
        // SO_REUSEPORT lets a second worker bind the same port
        bind_listener(None, port, &cfg).unwrap();
    }

    #[test]
    fn localhost_resolves() {
        let addr = resolve_v6(Some("localhost"), 8080).unwrap();
        assert_eq!(addr.port(), 8080);
    }

    #[test]
    fn unknown_host_fails() {
        assert!(matches!(
            resolve_v6(Some("host.invalid."), 80),
            Err(ServerError::Resolve(_))
        ));
    }

    #[test]
    fn v4_mapped_textual_form() {
        let addr = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)), 1234);
        assert_eq!(client_ip_v6(addr), "::ffff:10.1.2.3");
    }
}
