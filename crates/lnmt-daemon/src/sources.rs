//! Production collaborator implementations for the tracker.
//!
//! Traffic counters and the DNS query log are site-specific feeds and
//! stay pluggable; reachability probing ships with a default that shells
//! out to the system `ping`, which works unprivileged everywhere ICMP
//! does.

use async_trait::async_trait;
use lnmt_tracker::PingProber;
use tracing::debug;

/// Probes reachability with the system `ping` binary.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemPingProber;

#[async_trait]
impl PingProber for SystemPingProber {
    async fn ping(&self, ip: &str, window_s: u32) -> bool {
        let window = window_s.max(1).to_string();
        let result = tokio::process::Command::new("ping")
            .args(["-c", "1", "-W", &window, ip])
            .stdout(std::process::Stdio::null())
            .stderr(std::process::Stdio::null())
            .status()
            .await;
        match result {
            Ok(status) => status.success(),
            Err(err) => {
                debug!(%ip, error = %err, "ping spawn failed");
                false
            }
        }
    }
}
