//! Scans well-known systemd units and reports their state.

use fleetwatch_common::wire::ServiceReport;
use fleetwatch_common::ServiceState;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command as TokioCommand;
use tracing::{debug, warn};

pub const DEFAULT_WATCHED_SERVICES: &[&str] = &[
    "apache2",
    "nginx",
    "mysql",
    "postgresql",
    "redis-server",
    "docker",
    "ssh",
];

/// Cap on each `systemctl` invocation.
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

pub fn well_known_port(service: &str) -> Option<u16> {
    match service {
        "apache2" | "nginx" | "httpd" => Some(80),
        "mysql" | "mariadb" => Some(3306),
        "postgresql" => Some(5432),
        "redis-server" | "redis" => Some(6379),
        "ssh" | "sshd" => Some(22),
        _ => None,
    }
}

/// Builds a report from raw `is-active` / `is-enabled` output.
/// `None` means the unit is not installed on this host.
pub fn interpret(name: &str, active: &str, enabled: &str) -> Option<ServiceReport> {
    let enabled = enabled.trim();
    if enabled.is_empty() || enabled == "not-found" {
        return None;
    }
    let status = ServiceState::from_systemctl(active)?;
    Some(ServiceReport {
        name: name.to_string(),
        status,
        enabled: enabled == "enabled",
        port: well_known_port(name),
    })
}

async fn systemctl(verb: &str, unit: &str, timeout: Duration) -> Option<String> {
    let mut command = TokioCommand::new("systemctl");
    command
        .arg(verb)
        .arg(unit)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(timeout, command.output()).await {
        // is-active exits non-zero for inactive units; stdout is what matters.
        Ok(Ok(output)) => Some(String::from_utf8_lossy(&output.stdout).trim().to_string()),
        Ok(Err(e)) => {
            debug!(unit, verb, error = %e, "Failed to run systemctl.");
            None
        }
        Err(_) => {
            warn!(unit, verb, timeout_secs = timeout.as_secs(), "systemctl timed out.");
            None
        }
    }
}

pub async fn scan_services(names: &[String], timeout: Duration) -> Vec<ServiceReport> {
    let mut reports = Vec::with_capacity(names.len());
    for name in names {
        let Some(active) = systemctl("is-active", name, timeout).await else {
            continue;
        };
        let Some(enabled) = systemctl("is-enabled", name, timeout).await else {
            continue;
        };
        if let Some(report) = interpret(name, &active, &enabled) {
            reports.push(report);
        }
    }
    debug!(scanned = names.len(), found = reports.len(), "Service scan finished.");
    reports
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_systemctl_states() {
        let running = interpret("nginx", "active", "enabled").unwrap();
        assert_eq!(running.status, ServiceState::Running);
        assert!(running.enabled);
        assert_eq!(running.port, Some(80));

        let stopped = interpret("docker", "inactive\n", "disabled").unwrap();
        assert_eq!(stopped.status, ServiceState::Stopped);
        assert!(!stopped.enabled);
        assert_eq!(stopped.port, None);

        let failed = interpret("mysql", "failed", "enabled").unwrap();
        assert_eq!(failed.status, ServiceState::Failed);
    }

    #[test]
    fn absent_or_odd_units_are_skipped() {
        assert!(interpret("apache2", "inactive", "").is_none());
        assert!(interpret("apache2", "inactive", "not-found").is_none());
        assert!(interpret("nginx", "activating", "enabled").is_none());
    }
}
