//! An unprivileged ICMPv4 datagram socket (spec §4.7 step 1, §9 "platform
//! scope").
//!
//! Built on `SOCK_DGRAM` + `IPPROTO_ICMP`, available without elevated
//! privileges on the platforms this crate targets (Linux with
//! `net.ipv4.ping_group_range` configured, macOS, Windows). Where the
//! platform refuses the combination the constructor returns
//! `PlatformNotSupported` rather than attempting a raw socket, per the
//! explicit Non-goal on raw-socket traceroute.

use crate::error::{NetpathError, NetpathResult};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, SocketAddrV4};

/// Binding configuration resolved by the facade's effective-config layer
/// (spec §4.11) and handed down to the socket layer unchanged.
#[derive(Debug, Clone, Default)]
pub struct BindConfig {
    pub interface: Option<String>,
    pub source_ip: Option<Ipv4Addr>,
}

/// A non-blocking `SOCK_DGRAM`+`IPPROTO_ICMP` socket, owned exclusively by
/// one engine instance from creation to close (spec §5).
pub struct IcmpSocket {
    inner: Socket,
}

impl IcmpSocket {
    /// Create and configure a socket per `bind`. Returns
    /// `PlatformNotSupported` if this OS doesn't allow an unprivileged ICMP
    /// datagram socket; any other OS failure is a `SocketCreateFailed`.
    pub fn create(bind: &BindConfig) -> NetpathResult<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).map_err(|e| {
            if matches!(
                e.kind(),
                io::ErrorKind::PermissionDenied | io::ErrorKind::Unsupported
            ) {
                NetpathError::PlatformNotSupported {
                    detail: e.to_string(),
                }
            } else {
                NetpathError::socket_create(&e)
            }
        })?;

        if let Some(interface) = &bind.interface {
            bind_to_interface(&socket, interface)?;
        }

        let bind_addr = SocketAddrV4::new(bind.source_ip.unwrap_or(Ipv4Addr::UNSPECIFIED), 0);
        socket
            .bind(&SockAddr::from(SocketAddr::V4(bind_addr)))
            .map_err(|e| {
                if bind.source_ip.is_some() {
                    NetpathError::source_ip_bind(&bind_addr.ip().to_string(), &e)
                } else {
                    NetpathError::socket_create(&e)
                }
            })?;

        socket
            .set_nonblocking(true)
            .map_err(|e| NetpathError::setsockopt("O_NONBLOCK", &e))?;

        Ok(Self { inner: socket })
    }

    /// Set the IPv4 TTL socket option for subsequent sends.
    pub fn set_ttl(&self, ttl: u8) -> NetpathResult<()> {
        self.inner
            .set_ttl(u32::from(ttl))
            .map_err(|e| NetpathError::setsockopt("IP_TTL", &e))
    }

    /// Send `bytes` to `dest` (port is ignored by ICMP but required by the
    /// socket address type).
    pub fn send_to(&self, bytes: &[u8], dest: Ipv4Addr) -> NetpathResult<()> {
        let addr = SockAddr::from(SocketAddr::V4(SocketAddrV4::new(dest, 0)));
        self.inner
            .send_to(bytes, &addr)
            .map(|_| ())
            .map_err(|e| NetpathError::send(&e))
    }

    /// Receive one datagram into `buf`, returning the number of bytes read
    /// and the responder's address. Non-blocking: callers must have
    /// already established readiness via [`crate::net::readiness`].
    pub fn recv_from(&self, buf: &mut [u8]) -> io::Result<(usize, IpAddr)> {
        let mut uninit = vec![std::mem::MaybeUninit::new(0_u8); buf.len()];
        let (len, from) = self.inner.recv_from(&mut uninit)?;
        for (dst, src) in buf.iter_mut().zip(uninit.iter()) {
            // SAFETY: `recv_from` initialized the first `len` bytes; we
            // only read within that range below.
            *dst = unsafe { src.assume_init() };
        }
        let addr = from
            .as_socket()
            .map(|s| s.ip())
            .unwrap_or(IpAddr::V4(Ipv4Addr::UNSPECIFIED));
        Ok((len, addr))
    }

    /// Access the underlying socket, for the readiness primitive only.
    pub(crate) fn raw(&self) -> &Socket {
        &self.inner
    }
}

#[cfg(unix)]
fn bind_to_interface(socket: &Socket, interface: &str) -> NetpathResult<()> {
    socket
        .bind_device(Some(interface.as_bytes()))
        .map_err(|e| NetpathError::interface_bind(interface, &e))
}

#[cfg(not(unix))]
fn bind_to_interface(_socket: &Socket, interface: &str) -> NetpathResult<()> {
    // `SO_BINDTODEVICE` has no portable socket2 equivalent outside Unix;
    // Windows interface selection instead goes through `source_ip` bound to
    // an address owned by the desired adapter.
    Err(NetpathError::InterfaceBindFailed {
        interface: interface.to_string(),
        errno: None,
        detail: "binding by interface name is only supported on Unix; use source_ip instead"
            .to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_default_socket_or_platform_not_supported() {
        // This environment may or may not grant unprivileged ICMP sockets;
        // either a concrete socket or a clean `PlatformNotSupported` is
        // acceptable, but no other error variant and no panic.
        match IcmpSocket::create(&BindConfig::default()) {
            Ok(_) | Err(NetpathError::PlatformNotSupported { .. }) => {}
            Err(other) => panic!("unexpected error variant: {other:?}"),
        }
    }
}
