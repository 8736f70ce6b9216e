//! Probe wire contract shared by the probe binary and the round executor.
//!
//! A probe writes exactly one terminal line to stdout:
//!
//! ```text
//! CASTCHECK-RESULT {"role":"recv","status":"received",...}
//! ```
//!
//! Everything else it prints (on either stream) is informational and is
//! never used for classification.

use serde::{Deserialize, Serialize};

/// Prefix of the single structured line a probe emits on completion
pub const RESULT_PREFIX: &str = "CASTCHECK-RESULT ";

/// Datagram body sent by the sender probe.
///
/// Receivers only accept a datagram whose `token()` matches the one they were
/// told to expect, so crosstalk from unrelated senders on the same group is
/// never mistaken for the round's sender.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbePayload {
    pub run_id: String,
    pub round: usize,
    pub sender: String,
}

impl ProbePayload {
    pub fn new(run_id: impl Into<String>, round: usize, sender: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            round,
            sender: sender.into(),
        }
    }

    /// Correlation token: `<run_id>/<round>`
    pub fn token(&self) -> String {
        format!("{}/{}", self.run_id, self.round)
    }

    pub fn encode(&self) -> String {
        // A struct of strings and integers always serializes
        serde_json::to_string(self).unwrap_or_default()
    }

    pub fn decode(raw: &str) -> Option<Self> {
        serde_json::from_str(raw.trim()).ok()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendStatus {
    Sent,
    Error,
}

/// Result of the sender probe: local transmit only, no delivery knowledge
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendReport {
    pub status: SendStatus,
    pub group: String,
    pub port: u16,
    pub ttl: u32,
    pub interface: Option<String>,
    pub payload: String,
    pub sent_at: i64, // epoch ms
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecvStatus {
    /// A datagram carrying the expected token arrived
    Received,
    /// Listen window elapsed with nothing received
    NoReceipt,
    /// Only datagrams for other tokens arrived
    Foreign,
    /// Socket setup failed (bind or group join)
    Error,
}

/// Result of the receiver probe
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecvReport {
    pub status: RecvStatus,
    pub group: String,
    pub port: u16,
    /// Which bind strategy succeeded (`group` or `wildcard`)
    pub bind: Option<String>,
    /// Source address of the accepted datagram
    pub from: Option<String>,
    pub payload: Option<String>,
    pub observed_at: Option<i64>, // epoch ms
    /// Datagrams ignored because they carried another token
    pub foreign: u32,
    pub detail: Option<String>,
}

/// Terminal report of either probe role
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", rename_all = "snake_case")]
pub enum ProbeReport {
    Send(SendReport),
    Recv(RecvReport),
}

impl ProbeReport {
    /// Render the terminal line (without trailing newline)
    pub fn to_line(&self) -> String {
        format!(
            "{}{}",
            RESULT_PREFIX,
            serde_json::to_string(self).unwrap_or_default()
        )
    }

    /// Find the last terminal line in captured output.
    ///
    /// `None` means no terminal line was written; `Some(Err)` means one was
    /// written but could not be decoded.
    pub fn parse_output(output: &str) -> Option<Result<Self, serde_json::Error>> {
        output
            .lines()
            .rev()
            .map(|line| line.trim_end_matches('\r').trim_start())
            .find_map(|line| line.strip_prefix(RESULT_PREFIX))
            .map(serde_json::from_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_report(status: RecvStatus) -> RecvReport {
        RecvReport {
            status,
            group: "239.1.1.1".into(),
            port: 5000,
            bind: Some("wildcard".into()),
            from: None,
            payload: None,
            observed_at: None,
            foreign: 0,
            detail: None,
        }
    }

    #[test]
    fn test_payload_token() {
        let payload = ProbePayload::new("run-1", 3, "host-a");
        assert_eq!(payload.token(), "run-1/3");
        assert_eq!(ProbePayload::decode(&payload.encode()), Some(payload));
        assert_eq!(ProbePayload::decode("hello multicast"), None);
    }

    #[test]
    fn test_parse_output_finds_terminal_line_among_noise() {
        let report = ProbeReport::Recv(recv_report(RecvStatus::NoReceipt));
        let output = format!("starting listener\n{}\r\n", report.to_line());

        let parsed = ProbeReport::parse_output(&output).unwrap().unwrap();
        assert_eq!(parsed, report);
    }

    #[test]
    fn test_parse_output_without_terminal_line() {
        assert!(ProbeReport::parse_output("Received multicast from 10.0.0.1").is_none());
        assert!(ProbeReport::parse_output("").is_none());
    }

    #[test]
    fn test_parse_output_garbled_terminal_line() {
        let parsed = ProbeReport::parse_output("CASTCHECK-RESULT {not json").unwrap();
        assert!(parsed.is_err());
    }

    #[test]
    fn test_role_tag_on_wire() {
        let line = ProbeReport::Recv(recv_report(RecvStatus::Received)).to_line();
        assert!(line.starts_with("CASTCHECK-RESULT {\"role\":\"recv\",\"status\":\"received\""));
    }
}
