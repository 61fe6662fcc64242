//! Health classification of a snapshot.

use crate::config::HealthConfig;
use crate::state::Snapshot;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Error,
}

impl HealthStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Unhealthy => "unhealthy",
            Self::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCode {
    TransmissionDaemonDown,
    WebUiUnreachable,
    RpcUnreachable,
    VpnDisconnected,
    DiskSpaceLow,
    MemoryUsageHigh,
    PeerPortClosed,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HealthThresholds {
    pub disk_warning_percent: f64,
    pub memory_warning_percent: f64,
}

impl Default for HealthThresholds {
    fn default() -> Self {
        Self {
            disk_warning_percent: 90.0,
            memory_warning_percent: 90.0,
        }
    }
}

impl From<&HealthConfig> for HealthThresholds {
    fn from(cfg: &HealthConfig) -> Self {
        Self {
            disk_warning_percent: cfg.disk_warning_percent,
            memory_warning_percent: cfg.memory_warning_percent,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthVerdict {
    pub status: HealthStatus,
    pub issues: Vec<IssueCode>,
    pub warnings: Vec<IssueCode>,
    pub error: Option<String>,
}

impl HealthVerdict {
    fn failed(cause: impl Into<String>) -> Self {
        Self {
            status: HealthStatus::Error,
            issues: Vec::new(),
            warnings: Vec::new(),
            error: Some(cause.into()),
        }
    }
}

/// Issues make the verdict unhealthy, warnings only degrade it. Rules whose
/// inputs were never collected are skipped, except daemon health which is
/// required.
pub fn evaluate(snapshot: &Snapshot, thresholds: &HealthThresholds) -> HealthVerdict {
    let Some(daemon) = &snapshot.daemon_health else {
        let cause = snapshot
            .collectors
            .get(crate::state::COLLECTOR_DAEMON_HEALTH)
            .and_then(|status| status.last_error.clone())
            .unwrap_or_else(|| "daemon health has not been collected yet".to_string());
        return HealthVerdict::failed(cause);
    };

    let mut issues = Vec::new();
    let mut warnings = Vec::new();

    if !daemon.process.running {
        issues.push(IssueCode::TransmissionDaemonDown);
    }
    if !daemon.web_ui.reachable {
        issues.push(IssueCode::WebUiUnreachable);
    }
    if !daemon.rpc.reachable {
        issues.push(IssueCode::RpcUnreachable);
    }

    if let Some(vpn) = &snapshot.vpn_state {
        if !vpn.connected {
            warnings.push(IssueCode::VpnDisconnected);
        }
    }
    if let Some(host) = &snapshot.host_state {
        if let Some(disk) = &host.data_disk {
            if disk.usage_percent > thresholds.disk_warning_percent {
                warnings.push(IssueCode::DiskSpaceLow);
            }
        }
        if let Some(memory) = host.memory_usage_percent() {
            if memory > thresholds.memory_warning_percent {
                warnings.push(IssueCode::MemoryUsageHigh);
            }
        }
    }
    if daemon.peer_port_open == Some(false) {
        warnings.push(IssueCode::PeerPortClosed);
    }

    let status = if !issues.is_empty() {
        HealthStatus::Unhealthy
    } else if !warnings.is_empty() {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    };

    HealthVerdict {
        status,
        issues,
        warnings,
        error: None,
    }
}

/// Minimal liveness used by `/health/simple`.
pub fn is_serving(snapshot: &Snapshot) -> bool {
    snapshot
        .daemon_health
        .as_ref()
        .map(|d| d.process.running && d.web_ui.reachable)
        .unwrap_or(false)
}
