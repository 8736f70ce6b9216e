// Receiver probe - join, listen for one window, report

use crate::MAX_DATAGRAM;
use castcheck_core::domain::{ProbePayload, RecvReport, RecvStatus};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::Instant;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct RecvOptions {
    pub group: Ipv4Addr,
    pub port: u16,
    /// Counted from probe start
    pub window: Duration,
    /// Correlation token (`<run_id>/<round>`) of the datagram to accept
    pub expect: String,
    /// Interface to join on; the kernel picks when absent
    pub interface: Option<Ipv4Addr>,
}

/// Kernels disagree on whether a multicast listener may bind the group
/// address, so both are tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindStrategy {
    Group,
    Wildcard,
}

impl BindStrategy {
    pub const ORDER: [BindStrategy; 2] = [BindStrategy::Group, BindStrategy::Wildcard];

    pub fn as_str(&self) -> &'static str {
        match self {
            BindStrategy::Group => "group",
            BindStrategy::Wildcard => "wildcard",
        }
    }

    fn address(&self, group: Ipv4Addr) -> Ipv4Addr {
        match self {
            BindStrategy::Group => group,
            BindStrategy::Wildcard => Ipv4Addr::UNSPECIFIED,
        }
    }
}

/// Listen until a datagram carrying the expected token arrives or the
/// window elapses. Nothing received is a normal outcome, not an error.
pub async fn receive(options: &RecvOptions) -> RecvReport {
    let deadline = Instant::now() + options.window;
    let mut report = RecvReport {
        status: RecvStatus::NoReceipt,
        group: options.group.to_string(),
        port: options.port,
        bind: None,
        from: None,
        payload: None,
        observed_at: None,
        foreign: 0,
        detail: None,
    };

    let (socket, strategy) = match join(options) {
        Ok(joined) => joined,
        Err(e) => {
            warn!(group = %options.group, port = options.port, error = %e, "Could not join multicast group");
            report.status = RecvStatus::Error;
            report.detail = Some(e.to_string());
            return report;
        }
    };
    report.bind = Some(strategy.as_str().to_string());
    info!(
        group = %options.group,
        port = options.port,
        bind = strategy.as_str(),
        window_ms = options.window.as_millis() as u64,
        "Listening"
    );

    let mut buf = [0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
            Err(_) => break,
            Ok(Ok(received)) => received,
            Ok(Err(e)) => {
                warn!(error = %e, "Receive failed");
                report.status = RecvStatus::Error;
                report.detail = Some(e.to_string());
                return report;
            }
        };

        let raw = String::from_utf8_lossy(&buf[..len]).trim().to_string();
        if matches_token(&raw, &options.expect) {
            info!(from = %from, "Expected datagram received");
            report.status = RecvStatus::Received;
            report.from = Some(from.to_string());
            report.payload = Some(raw);
            report.observed_at = Some(crate::now_millis());
            return report;
        }

        report.foreign += 1;
        debug!(from = %from, bytes = len, "Ignoring datagram for another token");
    }

    if report.foreign > 0 {
        report.status = RecvStatus::Foreign;
    }
    report
}

/// True when `raw` is a probe payload for `expect`
pub fn matches_token(raw: &str, expect: &str) -> bool {
    ProbePayload::decode(raw).is_some_and(|payload| payload.token() == expect)
}

fn join(options: &RecvOptions) -> io::Result<(UdpSocket, BindStrategy)> {
    let mut last_error = None;
    for strategy in BindStrategy::ORDER {
        match open(options, strategy) {
            Ok(socket) => return Ok((socket, strategy)),
            Err(e) => {
                debug!(bind = strategy.as_str(), error = %e, "Bind strategy failed");
                last_error = Some(e);
            }
        }
    }
    Err(last_error.unwrap_or_else(|| io::Error::other("no bind strategy available")))
}

fn open(options: &RecvOptions, strategy: BindStrategy) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_nonblocking(true)?;

    let bind = SocketAddr::V4(SocketAddrV4::new(
        strategy.address(options.group),
        options.port,
    ));
    socket.bind(&SockAddr::from(bind))?;
    socket.join_multicast_v4(
        &options.group,
        &options.interface.unwrap_or(Ipv4Addr::UNSPECIFIED),
    )?;

    UdpSocket::from_std(socket.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_bind_is_tried_first() {
        assert_eq!(BindStrategy::ORDER[0], BindStrategy::Group);
        let group = Ipv4Addr::new(239, 1, 1, 1);
        assert_eq!(BindStrategy::Group.address(group), group);
        assert_eq!(BindStrategy::Wildcard.address(group), Ipv4Addr::UNSPECIFIED);
    }

    #[test]
    fn test_token_matching() {
        let payload = ProbePayload::new("run-1", 3, "alpha").encode();

        assert!(matches_token(&payload, "run-1/3"));
        assert!(!matches_token(&payload, "run-1/4"));
        assert!(!matches_token("Multicast test from alpha", "run-1/3"));
    }

    #[tokio::test]
    async fn test_window_is_bounded() {
        let options = RecvOptions {
            group: Ipv4Addr::new(239, 1, 1, 1),
            port: 0,
            window: Duration::from_millis(50),
            expect: "run-1/0".to_string(),
            interface: None,
        };

        let started = std::time::Instant::now();
        let report = receive(&options).await;

        // Hosts without a multicast route fail the join; either way the
        // probe returns promptly and never reports a receipt
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_ne!(report.status, RecvStatus::Received);
    }
}
