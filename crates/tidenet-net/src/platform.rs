//! Cross-platform TCP socket configuration.
//!
//! Provides [`SocketConfig`] to encapsulate platform-specific socket options
//! (TCP_NODELAY, keepalive, SO_REUSEADDR, dual-stack IPv6) and helpers to
//! build the engine's non-blocking listener.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr, TcpListener, TcpStream};
use std::time::Duration;

use socket2::{Domain, Protocol, SockRef, Socket, TcpKeepalive, Type};

/// Platform-specific TCP socket configuration applied to every connection.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Coalescing already batches small writes,
    /// so the kernel need not delay them further. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Keepalive idle time before the first probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Keepalive probe interval. Default: 10s.
    pub keepalive_interval: Duration,
    /// Number of keepalive probes before declaring connection dead. Default: 3.
    pub keepalive_retries: u32,
    /// Enable `SO_REUSEADDR` on server sockets. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
        }
    }
}

/// Apply socket configuration to an accepted [`TcpStream`].
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let sock_ref = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        sock_ref.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Create a non-blocking listening socket bound to `addr`.
///
/// IPv6 addresses are bound dual-stack so IPv4 peers are accepted too.
pub fn create_listener(
    addr: SocketAddr,
    backlog: i32,
    config: &SocketConfig,
) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        Domain::IPV6
    } else {
        Domain::IPV4
    };
    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;

    Ok(socket.into())
}

/// Dual-stack wildcard address (`[::]`).
pub fn default_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), port)
}

/// IPv4-only wildcard address (`0.0.0.0`).
pub fn ipv4_bind_address(port: u16) -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), port)
}

#[cfg(test)]
mod tests {
    use std::io::ErrorKind;

    use super::*;

    #[test]
    fn test_listener_is_non_blocking() {
        let listener =
            create_listener("127.0.0.1:0".parse().unwrap(), 16, &SocketConfig::default()).unwrap();
        let err = listener.accept().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::WouldBlock);
    }

    #[test]
    fn test_listener_accepts_ipv4() {
        let config = SocketConfig::default();
        let listener = create_listener("127.0.0.1:0".parse().unwrap(), 16, &config).unwrap();
        let addr = listener.local_addr().unwrap();

        let _client = TcpStream::connect(addr).unwrap();
        let accepted = crate::test_support::wait_until(|| listener.accept().is_ok());
        assert!(accepted, "IPv4 connection should be accepted");
    }

    #[test]
    fn test_dual_stack_listener_accepts_ipv4() {
        let config = SocketConfig::default();
        let listener = match create_listener("[::]:0".parse().unwrap(), 16, &config) {
            Ok(listener) => listener,
            Err(_) => {
                eprintln!("IPv6 not available, skipping test");
                return;
            }
        };
        let port = listener.local_addr().unwrap().port();
        let client = TcpStream::connect(("127.0.0.1", port));
        assert!(client.is_ok(), "dual-stack socket should accept IPv4");
    }

    #[test]
    fn test_tcp_nodelay_is_set() {
        let config = SocketConfig::default();
        let (server, _client) = crate::test_support::loopback_pair();
        configure_stream(&server, &config).unwrap();
        assert!(server.nodelay().unwrap(), "TCP_NODELAY should be enabled");
    }

    #[test]
    fn test_nodelay_disabled_when_configured() {
        let config = SocketConfig {
            tcp_nodelay: false,
            ..Default::default()
        };
        let (server, _client) = crate::test_support::loopback_pair();
        configure_stream(&server, &config).unwrap();
        assert!(!server.nodelay().unwrap());
    }

    #[test]
    fn test_keepalive_is_configured() {
        let config = SocketConfig {
            keepalive_idle: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let (server, _client) = crate::test_support::loopback_pair();
        configure_stream(&server, &config).unwrap();
        assert!(SockRef::from(&server).keepalive().unwrap());
    }

    #[test]
    fn test_bind_addresses() {
        let v6 = default_bind_address(28010);
        assert!(v6.is_ipv6());
        assert_eq!(v6.port(), 28010);
        let v4 = ipv4_bind_address(28010);
        assert!(v4.is_ipv4());
        assert_eq!(v4.port(), 28010);
    }

    #[test]
    fn test_reuse_addr_platform_default() {
        let config = SocketConfig::default();
        assert_eq!(config.reuse_addr, !cfg!(target_os = "windows"));
    }
}
