//! Multicast socket setup
//!
//! tokio's `UdpSocket` cannot express bind-time options, so the socket is
//! built with socket2 and converted afterwards.

use std::net::{Ipv4Addr, SocketAddr};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::debug;

/// A UDP socket joined to a multicast group.
pub(crate) struct MulticastSocket {
    pub socket: UdpSocket,
    group: Ipv4Addr,
    interface: Ipv4Addr,
}

impl MulticastSocket {
    /// Bind a socket on `port` and join `group` via `interface`.
    ///
    /// macOS refuses to receive group traffic on a socket bound to a
    /// specific interface address, so it binds the wildcard there; other
    /// platforms bind the interface address directly.
    pub(crate) fn join(
        group: Ipv4Addr,
        interface: Ipv4Addr,
        port: u16,
        ttl: u32,
    ) -> std::io::Result<Self> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;
        socket.set_nonblocking(true)?;

        let bind_ip = if cfg!(target_os = "macos") {
            Ipv4Addr::UNSPECIFIED
        } else {
            interface
        };
        socket.bind(&SocketAddr::from((bind_ip, port)).into())?;

        socket.set_multicast_if_v4(&interface)?;
        // Bounded TTL keeps group traffic from escaping the local network
        socket.set_multicast_ttl_v4(ttl)?;
        socket.join_multicast_v4(&group, &interface)?;

        let socket = UdpSocket::from_std(socket.into())?;
        debug!(%group, %interface, port, "joined multicast group");
        Ok(Self {
            socket,
            group,
            interface,
        })
    }

    /// Leave the group. Safe to call more than once.
    pub(crate) fn leave(&self) {
        if let Err(e) = self.socket.leave_multicast_v4(self.group, self.interface) {
            debug!("leaving multicast group failed: {e}");
        }
    }
}
