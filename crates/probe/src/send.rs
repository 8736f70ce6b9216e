// Sender probe - exactly one datagram, local transmit result only

use crate::iface::primary_ipv4;
use castcheck_core::domain::{SendReport, SendStatus};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddrV4};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SendOptions {
    pub group: Ipv4Addr,
    pub port: u16,
    pub ttl: u32,
    /// Outbound interface address; auto-detected when absent
    pub interface: Option<Ipv4Addr>,
    pub payload: String,
}

/// Transmit the payload once. Never retried: the report says whether the
/// local send call succeeded, nothing about delivery.
pub fn send(options: &SendOptions) -> SendReport {
    let interface = options.interface.or_else(primary_ipv4);
    if interface.is_none() {
        debug!("No outbound interface detected, leaving IP_MULTICAST_IF unset");
    }

    let result = transmit(options, interface);
    let mut report = SendReport {
        status: SendStatus::Sent,
        group: options.group.to_string(),
        port: options.port,
        ttl: options.ttl,
        interface: interface.map(|ip| ip.to_string()),
        payload: options.payload.clone(),
        sent_at: crate::now_millis(),
        detail: None,
    };

    match result {
        Ok(bytes) => {
            info!(group = %options.group, port = options.port, bytes, "Multicast datagram sent");
        }
        Err(e) => {
            warn!(group = %options.group, port = options.port, error = %e, "Multicast send failed");
            report.status = SendStatus::Error;
            report.detail = Some(e.to_string());
        }
    }
    report
}

fn transmit(options: &SendOptions, interface: Option<Ipv4Addr>) -> io::Result<usize> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_multicast_ttl_v4(options.ttl)?;
    if let Some(ip) = interface {
        socket.set_multicast_if_v4(&ip)?;
    }

    let target = SockAddr::from(SocketAddrV4::new(options.group, options.port));
    socket.send_to(options.payload.as_bytes(), &target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use castcheck_core::domain::ProbePayload;

    #[test]
    fn test_report_echoes_request() {
        let payload = ProbePayload::new("run-1", 0, "alpha").encode();
        let options = SendOptions {
            group: Ipv4Addr::new(239, 1, 1, 1),
            port: 5000,
            ttl: 1,
            interface: None,
            payload: payload.clone(),
        };

        // Delivery is not observable here; only the echoed fields are
        let report = send(&options);

        assert_eq!(report.payload, payload);
        assert_eq!(report.group, "239.1.1.1");
        assert_eq!(report.ttl, 1);
        assert_eq!(report.detail.is_some(), report.status == SendStatus::Error);
    }
}
