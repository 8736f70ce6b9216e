// Command construction for the two transports

use crate::constants::{REMOTE_PID_MARKER, REMOTE_TERM_POLLS, SSH_CONNECTION_FAILURE_EXIT};
use crate::settings::SshSettings;
use castcheck_core::domain::Host;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

pub(crate) enum Transport {
    Ssh(SshSettings),
    /// `sh -c` on this machine; host identity is ignored
    Local,
}

impl Transport {
    /// Command that runs `command` through the host's shell
    pub fn shell(&self, host: &Host, command: &str) -> Command {
        let mut cmd = match self {
            Transport::Local => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(command);
                cmd
            }
            Transport::Ssh(settings) => {
                let mut cmd = Command::new(&settings.ssh_program);
                cmd.args(client_options(settings, host, "-p"))
                    .arg(target(settings, host))
                    .arg(command);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Command that starts `command` as a background process
    ///
    /// Over ssh the remote shell first announces its pid, then execs the
    /// command, so the adapter can stop it on the host later. Killing the
    /// local client alone leaves a tty-less remote command running.
    pub fn background(&self, host: &Host, command: &str) -> Command {
        match self {
            Transport::Local => self.shell(host, command),
            Transport::Ssh(_) => {
                let wrapped = format!(
                    "echo {} $$; exec sh -c {}",
                    REMOTE_PID_MARKER,
                    shell_words::quote(command)
                );
                self.shell(host, &wrapped)
            }
        }
    }

    /// `scp` command copying a local file to the host; `None` for local runs
    pub fn copy_to(&self, host: &Host, local_path: &Path, remote_path: &str) -> Option<Command> {
        match self {
            Transport::Local => None,
            Transport::Ssh(settings) => {
                let mut cmd = Command::new(&settings.scp_program);
                cmd.arg("-q")
                    .args(client_options(settings, host, "-P"))
                    .arg(local_path)
                    .arg(format!("{}:{}", target(settings, host), remote_path))
                    .stdin(Stdio::null())
                    .stdout(Stdio::piped())
                    .stderr(Stdio::piped())
                    .kill_on_drop(true);
                Some(cmd)
            }
        }
    }

    pub fn is_local(&self) -> bool {
        matches!(self, Transport::Local)
    }

    /// Exit statuses that mean the client never reached the host
    pub fn is_connection_failure(&self, exit_code: Option<i32>) -> bool {
        matches!(self, Transport::Ssh(_)) && exit_code == Some(SSH_CONNECTION_FAILURE_EXIT)
    }
}

/// Split the pid announcement off the front of a background command's stdout
pub(crate) fn split_pid_marker(stdout: &str) -> (Option<u32>, &str) {
    let announced = stdout
        .strip_prefix(REMOTE_PID_MARKER)
        .and_then(|rest| rest.split_once('\n'))
        .and_then(|(line, tail)| line.trim().parse().ok().map(|pid| (pid, tail)));
    match announced {
        Some((pid, tail)) => (Some(pid), tail),
        None => (None, stdout),
    }
}

/// Remote shell script that stops `pid` and its process group, then waits
/// until it is gone. Exits non-zero only if the process survived SIGKILL.
pub(crate) fn remote_stop_script(pid: u32) -> String {
    format!(
        "pid={pid}
kill -s TERM -- -$pid 2>/dev/null || kill -s TERM $pid 2>/dev/null || exit 0
n=0
while kill -0 $pid 2>/dev/null; do
    if [ $n -ge {polls} ]; then
        kill -s KILL -- -$pid 2>/dev/null || kill -s KILL $pid 2>/dev/null
        sleep 0.2
        if kill -0 $pid 2>/dev/null; then exit 1; fi
        exit 0
    fi
    n=$((n + 1))
    sleep 0.1
done",
        pid = pid,
        polls = REMOTE_TERM_POLLS
    )
}

fn target(settings: &SshSettings, host: &Host) -> String {
    match host.user.as_ref().or(settings.default_user.as_ref()) {
        Some(user) => format!("{}@{}", user, host.address()),
        None => host.address().to_string(),
    }
}

/// Options common to ssh and scp; they only differ in the port flag
fn client_options(settings: &SshSettings, host: &Host, port_flag: &str) -> Vec<String> {
    let mut args = vec![
        "-o".to_string(),
        "BatchMode=yes".to_string(),
        "-o".to_string(),
        format!("ConnectTimeout={}", settings.connect_timeout_secs),
    ];
    for option in &settings.options {
        args.push("-o".to_string());
        args.push(option.clone());
    }
    if let Some(port) = host.ssh_port {
        args.push(port_flag.to_string());
        args.push(port.to_string());
    }
    if let Some(identity) = host
        .identity_file
        .as_ref()
        .or(settings.default_identity_file.as_ref())
    {
        args.push("-i".to_string());
        args.push(identity.display().to_string());
    }
    args
}
