//! Small networking helpers.

use std::net::{IpAddr, Ipv4Addr, UdpSocket};

/// The LAN address other hosts can reach us on, discovered by routing a
/// dummy datagram. Falls back to loopback on isolated hosts.
pub fn local_ip() -> IpAddr {
    let probe = || -> std::io::Result<IpAddr> {
        let socket = UdpSocket::bind(("0.0.0.0", 0))?;
        socket.connect(("8.8.8.8", 80))?;
        Ok(socket.local_addr()?.ip())
    };
    probe().unwrap_or(IpAddr::V4(Ipv4Addr::LOCALHOST))
}
