use crate::collectors::CollectError;
use crate::rpc::methods::{SessionArgs, TransferCounters};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const COLLECTOR_TRANSMISSION: &str = "transmission";
pub const COLLECTOR_VPN: &str = "vpn";
pub const COLLECTOR_HOST: &str = "host";
pub const COLLECTOR_DAEMON_HEALTH: &str = "daemon_health";

/// Consistent view of everything the collectors observed, as of one round.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Snapshot {
    pub round: u64,
    #[serde(serialize_with = "serialize_unix")]
    pub collected_at: Option<SystemTime>,
    pub torrent_stats: Option<TorrentStats>,
    pub session_stats: Option<SessionStats>,
    pub vpn_state: Option<VpnState>,
    pub host_state: Option<HostState>,
    pub daemon_health: Option<DaemonHealth>,
    pub collectors: BTreeMap<String, CollectorStatus>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TorrentStats {
    pub total: u64,
    pub downloading: u64,
    pub seeding: u64,
    pub paused: u64,
    pub active: u64,
    pub checking: u64,
    pub queued: u64,
    pub errored: u64,
    pub by_status: BTreeMap<String, u64>,
    pub download_rate_bytes: u64,
    pub upload_rate_bytes: u64,
    pub total_size_bytes: u64,
    pub size_when_done_bytes: u64,
    pub left_until_done_bytes: u64,
    pub downloaded_ever_bytes: u64,
    pub uploaded_ever_bytes: u64,
    pub peers_connected: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionStats {
    pub active_torrents: u64,
    pub paused_torrents: u64,
    pub torrent_count: u64,
    pub download_speed_bytes: u64,
    pub upload_speed_bytes: u64,
    pub current: TransferCounters,
    pub cumulative: TransferCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct VpnState {
    pub interface: Option<String>,
    pub interface_up: bool,
    pub connected: bool,
    pub ipv4: Option<Ipv4Addr>,
    pub external_ip: Option<String>,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub rx_packets: u64,
    pub tx_packets: u64,
    pub rx_errors: u64,
    pub tx_errors: u64,
    pub rx_dropped: u64,
    pub tx_dropped: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HostState {
    pub uptime_secs: u64,
    pub load_1: f64,
    pub load_5: f64,
    pub load_15: f64,
    pub memory_total_bytes: u64,
    pub memory_used_bytes: u64,
    pub memory_available_bytes: u64,
    pub swap_total_bytes: u64,
    pub swap_used_bytes: u64,
    pub cpu_usage_percent: f64,
    pub data_disk: Option<DiskUsage>,
}

impl HostState {
    pub fn memory_usage_percent(&self) -> Option<f64> {
        percent(self.memory_used_bytes, self.memory_total_bytes)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskUsage {
    pub mount: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
    pub used_bytes: u64,
    pub usage_percent: f64,
}

impl DiskUsage {
    pub fn new(mount: String, total_bytes: u64, available_bytes: u64) -> Self {
        let used_bytes = total_bytes.saturating_sub(available_bytes);
        Self {
            mount,
            total_bytes,
            available_bytes,
            used_bytes,
            usage_percent: percent(used_bytes, total_bytes).unwrap_or(0.0),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DaemonHealth {
    pub process: ProcessProbe,
    pub web_ui: WebProbe,
    pub rpc: RpcProbe,
    /// `None` when the port test is disabled or could not be run.
    pub peer_port_open: Option<bool>,
    pub session: Option<SessionArgs>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ProcessProbe {
    pub running: bool,
    pub pid: Option<u32>,
    pub rss_bytes: Option<u64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WebProbe {
    pub reachable: bool,
    pub latency_ms: u64,
    pub status_code: Option<u16>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RpcProbe {
    pub reachable: bool,
    pub latency_ms: u64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CollectorStatus {
    pub up: bool,
    #[serde(serialize_with = "serialize_unix")]
    pub last_success: Option<SystemTime>,
    pub failures_total: u64,
    pub last_error: Option<String>,
}

/// Output of the Transmission stats collector: torrent aggregates plus daemon session counters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DaemonStats {
    pub torrents: TorrentStats,
    pub session: SessionStats,
}

/// One round's collector outcomes, in the order the engine settled them.
#[derive(Debug)]
pub struct RoundResults {
    pub transmission: Result<DaemonStats, CollectError>,
    pub vpn: Result<VpnState, CollectError>,
    pub host: Result<HostState, CollectError>,
    pub daemon_health: Result<DaemonHealth, CollectError>,
}

impl Snapshot {
    /// Builds the successor of `prev`. Fragments whose collector failed keep
    /// the previous round's value; `collected_at` never moves backwards.
    pub fn merged(prev: &Snapshot, results: RoundResults, now: SystemTime) -> Snapshot {
        let stamp = match prev.collected_at {
            Some(last) if now <= last => last + Duration::from_micros(1),
            _ => now,
        };

        let mut next = prev.clone();
        next.round = prev.round + 1;
        next.collected_at = Some(stamp);

        if let Some(stats) = record(
            &mut next.collectors,
            COLLECTOR_TRANSMISSION,
            results.transmission,
            stamp,
        ) {
            next.torrent_stats = Some(stats.torrents);
            next.session_stats = Some(stats.session);
        }
        if let Some(vpn) = record(&mut next.collectors, COLLECTOR_VPN, results.vpn, stamp) {
            next.vpn_state = Some(vpn);
        }
        if let Some(host) = record(&mut next.collectors, COLLECTOR_HOST, results.host, stamp) {
            next.host_state = Some(host);
        }
        if let Some(health) = record(
            &mut next.collectors,
            COLLECTOR_DAEMON_HEALTH,
            results.daemon_health,
            stamp,
        ) {
            next.daemon_health = Some(health);
        }
        next
    }

    pub fn age(&self, now: SystemTime) -> Option<Duration> {
        self.collected_at
            .map(|at| now.duration_since(at).unwrap_or(Duration::ZERO))
    }

    pub fn last_update_unix(&self) -> Option<f64> {
        self.collected_at.map(unix_seconds)
    }
}

fn record<T>(
    collectors: &mut BTreeMap<String, CollectorStatus>,
    name: &str,
    outcome: Result<T, CollectError>,
    stamp: SystemTime,
) -> Option<T> {
    let status = collectors.entry(name.to_string()).or_default();
    match outcome {
        Ok(value) => {
            status.up = true;
            status.last_success = Some(stamp);
            status.last_error = None;
            Some(value)
        }
        Err(err) => {
            status.up = false;
            status.failures_total += 1;
            status.last_error = Some(err.to_string());
            None
        }
    }
}

pub fn percent(part: u64, whole: u64) -> Option<f64> {
    if whole == 0 {
        return None;
    }
    Some(part as f64 * 100.0 / whole as f64)
}

pub fn unix_seconds(at: SystemTime) -> f64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

fn serialize_unix<S: Serializer>(at: &Option<SystemTime>, s: S) -> Result<S::Ok, S::Error> {
    match at {
        Some(at) => s.serialize_some(&unix_seconds(*at)),
        None => s.serialize_none(),
    }
}
