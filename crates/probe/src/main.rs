//! castcheck-probe - runs on every inventory host
//!
//! stdout carries exactly one line, the terminal `CASTCHECK-RESULT` report.
//! Diagnostics go to stderr.

use castcheck_core::application::constants::{
    DEFAULT_GROUP, DEFAULT_LISTEN_WINDOW_MS, DEFAULT_PORT, DEFAULT_TTL,
};
use castcheck_core::domain::{ProbeReport, RecvStatus, SendStatus};
use castcheck_probe::{receive, send, RecvOptions, SendOptions};
use clap::{Args, Parser, Subcommand};
use std::fs::OpenOptions;
use std::io::Write;
use std::net::Ipv4Addr;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Exit status when the probe could not do its job (socket setup or send failed)
const EXIT_PROBE_ERROR: u8 = 2;

#[derive(Parser)]
#[command(name = "castcheck-probe")]
#[command(about = "Multicast reachability probe", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send one datagram to the group
    Send(SendArgs),
    /// Listen on the group for one window
    Recv(RecvArgs),
}

#[derive(Args)]
struct WireArgs {
    /// Multicast group
    #[arg(long, default_value = DEFAULT_GROUP)]
    group: Ipv4Addr,

    /// UDP port
    #[arg(long, default_value_t = DEFAULT_PORT)]
    port: u16,

    /// Local interface address to send from / join on
    #[arg(long)]
    iface: Option<Ipv4Addr>,

    /// Also append the terminal line to this file
    #[arg(long)]
    log: Option<PathBuf>,
}

#[derive(Args)]
struct SendArgs {
    #[command(flatten)]
    wire: WireArgs,

    /// Multicast TTL (hop limit)
    #[arg(long, default_value_t = DEFAULT_TTL)]
    ttl: u32,

    /// Datagram body
    #[arg(long)]
    payload: String,
}

#[derive(Args)]
struct RecvArgs {
    #[command(flatten)]
    wire: WireArgs,

    /// Listen window in milliseconds
    #[arg(long, default_value_t = DEFAULT_LISTEN_WINDOW_MS)]
    window_ms: u64,

    /// Correlation token of the datagram to accept (`<run_id>/<round>`)
    #[arg(long)]
    expect: String,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("castcheck_probe=info")),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let cli = Cli::parse();

    let (report, log, failed) = match cli.command {
        Commands::Send(args) => {
            let report = send(&SendOptions {
                group: args.wire.group,
                port: args.wire.port,
                ttl: args.ttl,
                interface: args.wire.iface,
                payload: args.payload,
            });
            let failed = report.status == SendStatus::Error;
            (ProbeReport::Send(report), args.wire.log, failed)
        }
        Commands::Recv(args) => {
            let report = receive(&RecvOptions {
                group: args.wire.group,
                port: args.wire.port,
                window: Duration::from_millis(args.window_ms),
                expect: args.expect,
                interface: args.wire.iface,
            })
            .await;
            let failed = report.status == RecvStatus::Error;
            (ProbeReport::Recv(report), args.wire.log, failed)
        }
    };

    let line = report.to_line();
    if let Some(path) = log {
        if let Err(e) = append_line(&path, &line) {
            tracing::warn!(path = %path.display(), error = %e, "Could not write probe log");
        }
    }
    println!("{}", line);

    if failed {
        ExitCode::from(EXIT_PROBE_ERROR)
    } else {
        ExitCode::SUCCESS
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(file, "{}", line)
}
