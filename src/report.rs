//! JSON health document served on `/health` and printed by `--once`.

use crate::health::{HealthStatus, HealthVerdict, IssueCode};
use crate::state::{
    CollectorStatus, DaemonHealth, HostState, SessionStats, Snapshot, TorrentStats, VpnState,
};
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Serialize)]
pub struct HealthDocument<'a> {
    pub status: HealthStatus,
    pub issues: &'a [IssueCode],
    pub warnings: &'a [IssueCode],
    pub error: Option<&'a str>,
    pub timestamp: u64,
    pub last_update: Option<f64>,
    pub collected_at: Option<String>,
    pub round: u64,
    pub torrent_stats: Option<&'a TorrentStats>,
    pub session_stats: Option<&'a SessionStats>,
    pub vpn_state: Option<&'a VpnState>,
    pub host_state: Option<&'a HostState>,
    pub daemon_health: Option<&'a DaemonHealth>,
    pub collectors: &'a BTreeMap<String, CollectorStatus>,
}

impl<'a> HealthDocument<'a> {
    /// `now_unix` is supplied by the caller so the document is reproducible.
    pub fn new(snapshot: &'a Snapshot, verdict: &'a HealthVerdict, now_unix: u64) -> Self {
        Self {
            status: verdict.status,
            issues: &verdict.issues,
            warnings: &verdict.warnings,
            error: verdict.error.as_deref(),
            timestamp: now_unix,
            last_update: snapshot.last_update_unix(),
            collected_at: snapshot
                .collected_at
                .map(|at| humantime::format_rfc3339_seconds(at).to_string()),
            round: snapshot.round,
            torrent_stats: snapshot.torrent_stats.as_ref(),
            session_stats: snapshot.session_stats.as_ref(),
            vpn_state: snapshot.vpn_state.as_ref(),
            host_state: snapshot.host_state.as_ref(),
            daemon_health: snapshot.daemon_health.as_ref(),
            collectors: &snapshot.collectors,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
