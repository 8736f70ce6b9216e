// Terminal rendering for matrices, reports and deploy results

use castcheck_core::application::DeployResult;
use castcheck_core::domain::{OutcomeStatus, ReachabilityMatrix, RunReport};
use colored::{ColoredString, Colorize};
use tabled::builder::Builder;
use tabled::settings::Style;
use tabled::{Table, Tabled};

const SELF_CELL: &str = "-";
const MISSING_CELL: &str = "?";

/// Sender per row, receiver per column
pub fn matrix_table(matrix: &ReachabilityMatrix) -> String {
    let hosts = matrix.hosts();
    let mut builder = Builder::default();

    let mut header = vec!["sender \\ receiver".to_string()];
    header.extend(hosts.iter().cloned());
    builder.push_record(header);

    for sender in hosts {
        let mut row = vec![sender.clone()];
        for receiver in hosts {
            let cell = if sender == receiver {
                SELF_CELL.to_string()
            } else {
                matrix
                    .get(sender, receiver)
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| MISSING_CELL.to_string())
            };
            row.push(cell);
        }
        builder.push_record(row);
    }

    let mut table = builder.build();
    table.with(Style::modern());
    table.to_string()
}

pub fn status_label(status: OutcomeStatus) -> ColoredString {
    match status {
        OutcomeStatus::Success => status.as_str().green(),
        OutcomeStatus::Fail => status.as_str().red(),
        OutcomeStatus::Timeout => status.as_str().yellow(),
        OutcomeStatus::ExecError => status.as_str().magenta().bold(),
    }
}

/// `SUCCESS 4  FAIL 1  TIMEOUT 1  EXEC_ERROR 0`
pub fn status_counts(matrix: &ReachabilityMatrix) -> String {
    OutcomeStatus::ALL
        .iter()
        .map(|s| format!("{} {}", status_label(*s), matrix.count(*s)))
        .collect::<Vec<_>>()
        .join("  ")
}

#[derive(Tabled)]
struct OutcomeRow {
    round: usize,
    sender: String,
    receiver: String,
    status: String,
    detail: String,
}

/// Every non-SUCCESS outcome with its reason, or `None` when all succeeded
pub fn problem_table(report: &RunReport) -> Option<String> {
    let rows: Vec<OutcomeRow> = report
        .rounds
        .iter()
        .flat_map(|round| {
            round
                .outcomes
                .iter()
                .filter(|o| o.status != OutcomeStatus::Success)
                .map(move |o| OutcomeRow {
                    round: round.index,
                    sender: round.sender.clone(),
                    receiver: o.host.clone(),
                    status: o.status.to_string(),
                    detail: o.detail.clone().unwrap_or_default(),
                })
        })
        .collect();

    if rows.is_empty() {
        return None;
    }
    let mut table = Table::new(rows);
    table.with(Style::modern());
    Some(table.to_string())
}

#[derive(Tabled)]
struct DeployRow {
    host: String,
    result: String,
}

pub fn deploy_table(results: &[DeployResult]) -> String {
    let rows = results.iter().map(|r| DeployRow {
        host: r.host.clone(),
        result: r.error.clone().unwrap_or_else(|| "ok".to_string()),
    });
    let mut table = Table::new(rows);
    table.with(Style::modern());
    table.to_string()
}
