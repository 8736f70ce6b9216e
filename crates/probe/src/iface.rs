// Outbound interface detection

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

/// Any routable address works: connecting a UDP socket sends nothing, it
/// only makes the kernel pick the source address of the default route
const ROUTE_PROBE_TARGET: &str = "8.8.8.8:80";

/// Primary IPv4 address of this host, if there is a default route
pub fn primary_ipv4() -> Option<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).ok()?;
    socket.connect(ROUTE_PROBE_TARGET).ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V4(addr) if usable(*addr.ip()) => Some(*addr.ip()),
        _ => None,
    }
}

fn usable(ip: Ipv4Addr) -> bool {
    !ip.is_unspecified() && !ip.is_loopback()
}
