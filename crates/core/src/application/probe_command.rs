// Probe command lines
//
// Renders the shell lines the round executor hands to the remote executor.
// Every argument is quoted with shell-words; the receiver is wrapped in
// coreutils `timeout` so a listener can never outlive its round.

use super::config::SweepConfig;
use crate::domain::{Host, ProbePayload};

/// Shell command renderer bound to one sweep configuration
pub struct ProbeCommands<'a> {
    config: &'a SweepConfig,
}

impl<'a> ProbeCommands<'a> {
    pub fn new(config: &'a SweepConfig) -> Self {
        Self { config }
    }

    pub fn probe_path(&self) -> String {
        self.config.remote.probe_path()
    }

    /// Per-round, per-host receiver log: the transient remote state of a round
    pub fn receiver_log_path(&self, payload: &ProbePayload, host: &Host) -> String {
        format!(
            "{}/recv-{}-{}-{}.log",
            self.config.remote.remote_dir, payload.run_id, payload.round, host.name
        )
    }

    fn wire_args(&self, role: &str) -> Vec<String> {
        let probe = &self.config.probe;
        vec![
            self.probe_path(),
            role.to_string(),
            "--group".to_string(),
            probe.group.to_string(),
            "--port".to_string(),
            probe.port.to_string(),
        ]
    }

    /// Background listener for `host`, expecting `payload`
    pub fn receiver(&self, host: &Host, payload: &ProbePayload) -> String {
        let timing = &self.config.timing;
        let mut args = vec![
            "timeout".to_string(),
            "-k".to_string(),
            format!("{}", super::constants::LISTENER_KILL_AFTER_SECS),
            timing.listener_lifetime_secs().to_string(),
        ];
        args.extend(self.wire_args("recv"));
        args.extend([
            "--window-ms".to_string(),
            timing.listen_window_ms.to_string(),
            "--expect".to_string(),
            payload.token(),
            "--log".to_string(),
            self.receiver_log_path(payload, host),
        ]);
        if let Some(iface) = &host.multicast_interface {
            args.extend(["--iface".to_string(), iface.clone()]);
        }

        format!(
            "{} && exec {}",
            self.prepare_dir(),
            shell_words::join(&args)
        )
    }

    /// Foreground one-shot sender for `host`
    pub fn sender(&self, host: &Host, payload: &ProbePayload) -> String {
        let mut args = self.wire_args("send");
        args.extend([
            "--ttl".to_string(),
            self.config.probe.ttl.to_string(),
            "--payload".to_string(),
            payload.encode(),
        ]);
        if let Some(iface) = &host.multicast_interface {
            args.extend(["--iface".to_string(), iface.clone()]);
        }
        shell_words::join(&args)
    }

    /// Remove the receiver log written during a round
    pub fn cleanup(&self, log_path: &str) -> String {
        shell_words::join(["rm", "-f", log_path])
    }

    pub fn prepare_dir(&self) -> String {
        shell_words::join(["mkdir", "-p", self.config.remote.remote_dir.as_str()])
    }

    pub fn make_executable(&self) -> String {
        shell_words::join(["chmod", "+x", self.probe_path().as_str()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> ProbePayload {
        ProbePayload::new("run-1", 2, "alpha")
    }

    #[test]
    fn test_receiver_is_bounded_and_correlated() {
        let config = SweepConfig::default();
        let commands = ProbeCommands::new(&config);

        let line = commands.receiver(&Host::new("beta"), &payload());

        assert!(line.starts_with("mkdir -p /tmp/castcheck && exec timeout -k 1 11 "));
        assert!(line.contains("/tmp/castcheck/castcheck-probe recv --group 239.1.1.1 --port 5000"));
        assert!(line.contains("--window-ms 8000"));
        assert!(line.contains("--expect run-1/2"));
        assert!(line.contains("--log /tmp/castcheck/recv-run-1-2-beta.log"));
        assert!(!line.contains("--iface"));
    }

    #[test]
    fn test_sender_payload_is_quoted() {
        let config = SweepConfig::default();
        let commands = ProbeCommands::new(&config);
        let mut host = Host::new("alpha");
        host.multicast_interface = Some("10.1.0.7".to_string());

        let line = commands.sender(&host, &payload());
        let words = shell_words::split(&line).unwrap();

        let at = words.iter().position(|w| w == "--payload").unwrap();
        assert_eq!(ProbePayload::decode(&words[at + 1]), Some(payload()));
        assert!(words.ends_with(&["--iface".to_string(), "10.1.0.7".to_string()]));
        assert!(words.contains(&"--ttl".to_string()));
    }

    #[test]
    fn test_cleanup_targets_log_only() {
        let config = SweepConfig::default();
        let commands = ProbeCommands::new(&config);
        assert_eq!(commands.cleanup("/tmp/castcheck/x.log"), "rm -f /tmp/castcheck/x.log");
    }
}
