// Outcome classification
//
// Maps captured probe output to an outcome using the structured terminal
// line only. FAIL, TIMEOUT and EXEC_ERROR are never conflated.

use crate::domain::probe::{ProbePayload, ProbeReport, RecvStatus, SendReport, SendStatus};
use crate::domain::{OutcomeStatus, ReceiverOutcome};
use crate::port::CommandOutput;

/// Exit code of coreutils `timeout` when it had to stop the listener
const EXIT_TIMED_OUT: i32 = 124;
/// Shell exit codes for "found but not executable" / "not found"
const EXIT_NOT_EXECUTABLE: i32 = 126;
const EXIT_NOT_FOUND: i32 = 127;

/// Classify one receiver's captured output against the payload it expected
pub fn classify_receiver(
    host: &str,
    output: &CommandOutput,
    expected: &ProbePayload,
) -> ReceiverOutcome {
    match ProbeReport::parse_output(&output.stdout) {
        Some(Ok(ProbeReport::Recv(report))) => match report.status {
            RecvStatus::Received => {
                let raw = report.payload.unwrap_or_default();
                match ProbePayload::decode(&raw) {
                    Some(seen) if seen == *expected => {
                        ReceiverOutcome::new(host, OutcomeStatus::Success)
                            .with_payload(raw, report.observed_at)
                    }
                    _ => ReceiverOutcome::new(host, OutcomeStatus::Fail)
                        .with_payload(raw, report.observed_at)
                        .with_detail(format!(
                            "received a datagram that does not match {}",
                            expected.token()
                        )),
                }
            }
            RecvStatus::NoReceipt => ReceiverOutcome::new(host, OutcomeStatus::Timeout)
                .with_detail("no datagram within the listen window"),
            RecvStatus::Foreign => ReceiverOutcome::new(host, OutcomeStatus::Fail).with_detail(
                format!("only foreign datagrams received ({})", report.foreign),
            ),
            RecvStatus::Error => ReceiverOutcome::new(host, OutcomeStatus::Fail).with_detail(
                report
                    .detail
                    .unwrap_or_else(|| "receiver socket error".to_string()),
            ),
        },
        Some(Ok(ProbeReport::Send(_))) => ReceiverOutcome::new(host, OutcomeStatus::Fail)
            .with_detail("receiver emitted a sender report"),
        Some(Err(e)) => ReceiverOutcome::new(host, OutcomeStatus::Fail)
            .with_detail(format!("unparseable terminal line: {}", e)),
        None => classify_silent(host, output),
    }
}

/// No terminal line: decide from process state and exit code
fn classify_silent(host: &str, output: &CommandOutput) -> ReceiverOutcome {
    if !output.finished {
        return ReceiverOutcome::new(host, OutcomeStatus::Timeout)
            .with_detail("listener still running at collection deadline");
    }

    match output.exit_code {
        Some(EXIT_TIMED_OUT) => ReceiverOutcome::new(host, OutcomeStatus::Timeout)
            .with_detail("listener stopped by its lifetime bound"),
        Some(code @ (EXIT_NOT_EXECUTABLE | EXIT_NOT_FOUND)) => ReceiverOutcome::exec_error(
            host,
            format!("probe not runnable on host (exit {})", code),
        ),
        code => ReceiverOutcome::new(host, OutcomeStatus::Fail).with_detail(format!(
            "no terminal report (exit {})",
            code.map_or_else(|| "unknown".to_string(), |c| c.to_string())
        )),
    }
}

/// Check that the sender confirmed a local transmit of the expected payload
pub fn classify_sender(output: &CommandOutput, expected: &ProbePayload) -> Result<SendReport, String> {
    match ProbeReport::parse_output(&output.stdout) {
        Some(Ok(ProbeReport::Send(report))) => match report.status {
            SendStatus::Sent if ProbePayload::decode(&report.payload).as_ref() == Some(expected) => {
                Ok(report)
            }
            SendStatus::Sent => Err("sender transmitted an unexpected payload".to_string()),
            SendStatus::Error => Err(format!(
                "sender transmit failed: {}",
                report.detail.unwrap_or_else(|| "unknown error".to_string())
            )),
        },
        Some(Ok(ProbeReport::Recv(_))) => Err("sender emitted a receiver report".to_string()),
        Some(Err(e)) => Err(format!("unparseable sender terminal line: {}", e)),
        None => Err(format!(
            "sender produced no terminal report (exit {:?})",
            output.exit_code
        )),
    }
}
