//! Probe check execution.
//!
//! Checks observe and nothing more: `port` opens one TCP connection and
//! closes it, `http` issues one GET, `process` and `disk` read kernel
//! state. Side effects belong to recovery actions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::types::{HealthStatus, ProbeKind};

const PORT_DEADLINE: Duration = Duration::from_secs(2);
const HTTP_DEADLINE: Duration = Duration::from_secs(5);

/// A user-supplied check body for `custom` probes.
#[async_trait]
pub trait CustomCheck: Send + Sync {
    /// Run the check.
    async fn check(&self) -> (HealthStatus, String);
}

/// Runs the check behind a probe kind.
///
/// A trait so tests (and exotic deployments) can substitute scripted
/// outcomes for real network and kernel access.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    /// Execute one check.
    async fn run(&self, kind: &ProbeKind) -> (HealthStatus, String);
}

/// The production check runner.
#[derive(Default)]
pub struct DefaultCheckRunner {
    custom: RwLock<HashMap<String, Arc<dyn CustomCheck>>>,
    http: reqwest::Client,
}

impl DefaultCheckRunner {
    /// Create a runner with an empty custom-check registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a custom check under `name`.
    pub fn register_custom(&self, name: &str, check: Arc<dyn CustomCheck>) {
        if let Ok(mut custom) = self.custom.write() {
            custom.insert(name.to_owned(), check);
        }
    }

    async fn check_port(addr: &str) -> (HealthStatus, String) {
        match tokio::time::timeout(PORT_DEADLINE, tokio::net::TcpStream::connect(addr)).await {
            Ok(Ok(_stream)) => (HealthStatus::Ok, format!("connected to {addr}")),
            Ok(Err(err)) => (HealthStatus::Fail, format!("connect {addr}: {err}")),
            Err(_) => (HealthStatus::Fail, format!("connect {addr}: timeout")),
        }
    }

    async fn check_http(&self, url: &str) -> (HealthStatus, String) {
        let request = self.http.get(url).timeout(HTTP_DEADLINE).send();
        match request.await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    (HealthStatus::Ok, format!("GET {url}: {status}"))
                } else {
                    (HealthStatus::Fail, format!("GET {url}: {status}"))
                }
            }
            Err(err) => (HealthStatus::Fail, format!("GET {url}: {err}")),
        }
    }

    fn check_process(name: &str) -> (HealthStatus, String) {
        match find_process(name) {
            Ok(true) => (HealthStatus::Ok, format!("{name} running")),
            Ok(false) => (HealthStatus::Fail, format!("{name} not found")),
            Err(err) => (HealthStatus::Fail, format!("proc scan: {err}")),
        }
    }

    fn check_disk(path: &str, max_used_percent: u8) -> (HealthStatus, String) {
        match nix::sys::statvfs::statvfs(path) {
            Ok(stat) => {
                let total = stat.blocks();
                if total == 0 {
                    return (HealthStatus::Warn, format!("{path}: zero-size filesystem"));
                }
                let free = stat.blocks_available();
                #[allow(clippy::cast_possible_truncation)]
                let used_percent =
                    (100u64.saturating_sub(free.saturating_mul(100) / total)) as u8;
                let detail = format!("{path}: {used_percent}% used");
                if used_percent <= max_used_percent {
                    (HealthStatus::Ok, detail)
                } else {
                    (HealthStatus::Fail, detail)
                }
            }
            Err(err) => (HealthStatus::Fail, format!("statvfs {path}: {err}")),
        }
    }
}

/// Scan `/proc` for a process whose `comm` matches `name`.
fn find_process(name: &str) -> Result<bool, String> {
    let entries = std::fs::read_dir("/proc").map_err(|e| e.to_string())?;
    for entry in entries.flatten() {
        let file_name = entry.file_name();
        let Some(pid) = file_name.to_str() else {
            continue;
        };
        if !pid.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if let Ok(comm) = std::fs::read_to_string(entry.path().join("comm")) {
            if comm.trim() == name {
                return Ok(true);
            }
        }
    }
    Ok(false)
}

#[async_trait]
impl CheckRunner for DefaultCheckRunner {
    async fn run(&self, kind: &ProbeKind) -> (HealthStatus, String) {
        let outcome = match kind {
            ProbeKind::Process { name } => Self::check_process(name),
            ProbeKind::Port { addr } => Self::check_port(addr).await,
            ProbeKind::Http { url } => self.check_http(url).await,
            ProbeKind::Disk {
                path,
                max_used_percent,
            } => Self::check_disk(path, *max_used_percent),
            ProbeKind::Custom { name } => {
                let check = self
                    .custom
                    .read()
                    .ok()
                    .and_then(|custom| custom.get(name).cloned());
                match check {
                    Some(check) => check.check().await,
                    None => (
                        HealthStatus::Fail,
                        format!("custom check not registered: {name}"),
                    ),
                }
            }
        };
        debug!(status = %outcome.0, detail = %outcome.1, "probe check");
        outcome
    }
}

impl std::fmt::Debug for DefaultCheckRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DefaultCheckRunner").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_port_check_against_live_listener() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();

        let (status, _) = DefaultCheckRunner::check_port(&addr).await;
        assert_eq!(status, HealthStatus::Ok);

        drop(listener);
        let (status, _) = DefaultCheckRunner::check_port(&addr).await;
        assert_eq!(status, HealthStatus::Fail);
    }

    #[tokio::test]
    async fn test_custom_check_registry() {
        struct AlwaysWarn;

        #[async_trait]
        impl CustomCheck for AlwaysWarn {
            async fn check(&self) -> (HealthStatus, String) {
                (HealthStatus::Warn, "meh".to_owned())
            }
        }

        let runner = DefaultCheckRunner::new();
        runner.register_custom("meh", Arc::new(AlwaysWarn));

        let (status, detail) = runner
            .run(&ProbeKind::Custom {
                name: "meh".to_owned(),
            })
            .await;
        assert_eq!(status, HealthStatus::Warn);
        assert_eq!(detail, "meh");

        let (status, _) = runner
            .run(&ProbeKind::Custom {
                name: "missing".to_owned(),
            })
            .await;
        assert_eq!(status, HealthStatus::Fail);
    }

    #[tokio::test]
    async fn test_disk_check_on_root() {
        // Root is always mounted; with a 100% ceiling the check passes.
        let (status, detail) = DefaultCheckRunner::check_disk("/", 100);
        assert_eq!(status, HealthStatus::Ok, "{detail}");
    }
}
