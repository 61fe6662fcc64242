use crate::health::{HealthStatus, HealthVerdict};
use crate::rpc::methods::TransferCounters;
use crate::state::{unix_seconds, DaemonHealth, HostState, SessionStats, Snapshot, TorrentStats, VpnState};
use prometheus::core::Collector;
use prometheus::{opts, Encoder, Gauge, GaugeVec, IntCounter, IntCounterVec, Registry, TextEncoder};
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Renders one scrape. A fresh registry is filled from the snapshot so the
/// output depends only on the arguments.
pub fn render(snapshot: &Snapshot, verdict: &HealthVerdict) -> Result<String, prometheus::Error> {
    let out = Families::default();

    if let Some(torrents) = &snapshot.torrent_stats {
        torrent_families(&out, torrents)?;
    }
    if let Some(session) = &snapshot.session_stats {
        session_families(&out, session)?;
    }
    if let Some(vpn) = &snapshot.vpn_state {
        vpn_families(&out, vpn)?;
    }
    if let Some(host) = &snapshot.host_state {
        host_families(&out, host)?;
    }
    if let Some(daemon) = &snapshot.daemon_health {
        daemon_families(&out, daemon)?;
    }
    verdict_families(&out, verdict)?;
    exporter_families(&out, snapshot)?;

    out.encode()
}

#[derive(Default)]
struct Families {
    registry: Registry,
}

impl Families {
    fn gauge(&self, name: &str, help: &str, value: f64) -> Result<(), prometheus::Error> {
        let gauge = Gauge::with_opts(opts!(name, help))?;
        gauge.set(value);
        register(&self.registry, &gauge)
    }

    fn gauge_opt(&self, name: &str, help: &str, value: Option<f64>) -> Result<(), prometheus::Error> {
        match value {
            Some(value) => self.gauge(name, help, value),
            None => Ok(()),
        }
    }

    fn gauge_vec<'a>(
        &self,
        name: &str,
        help: &str,
        label: &str,
        rows: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> Result<(), prometheus::Error> {
        let vec = GaugeVec::new(opts!(name, help), &[label])?;
        for (value_label, value) in rows {
            vec.with_label_values(&[value_label]).set(value);
        }
        register(&self.registry, &vec)
    }

    fn counter(&self, name: &str, help: &str, value: u64) -> Result<(), prometheus::Error> {
        let counter = IntCounter::with_opts(opts!(name, help))?;
        counter.inc_by(value);
        register(&self.registry, &counter)
    }

    fn counter_vec<'a>(
        &self,
        name: &str,
        help: &str,
        label: &str,
        rows: impl IntoIterator<Item = (&'a str, u64)>,
    ) -> Result<(), prometheus::Error> {
        let vec = IntCounterVec::new(opts!(name, help), &[label])?;
        for (value_label, value) in rows {
            vec.with_label_values(&[value_label]).inc_by(value);
        }
        register(&self.registry, &vec)
    }

    fn encode(&self) -> Result<String, prometheus::Error> {
        let mut buf = Vec::new();
        let encoder = TextEncoder::new();
        let mf = self.registry.gather();
        encoder.encode(&mf, &mut buf)?;
        String::from_utf8(buf).map_err(|err| prometheus::Error::Msg(err.to_string()))
    }
}

fn register<T: Collector + Clone + 'static>(
    registry: &Registry,
    collector: &T,
) -> Result<(), prometheus::Error> {
    registry.register(Box::new(collector.clone()))
}

fn flag(value: bool) -> f64 {
    if value {
        1.0
    } else {
        0.0
    }
}

fn torrent_families(out: &Families, t: &TorrentStats) -> Result<(), prometheus::Error> {
    out.gauge("transmission_torrent_count", "Total number of torrents", t.total as f64)?;
    out.gauge(
        "transmission_active_torrents",
        "Torrents downloading or seeding",
        t.active as f64,
    )?;
    out.gauge(
        "transmission_downloading_torrents",
        "Torrents currently downloading",
        t.downloading as f64,
    )?;
    out.gauge(
        "transmission_seeding_torrents",
        "Torrents currently seeding",
        t.seeding as f64,
    )?;
    out.gauge(
        "transmission_paused_torrents",
        "Stopped or paused torrents",
        t.paused as f64,
    )?;
    out.gauge(
        "transmission_checking_torrents",
        "Torrents verifying local data or waiting to",
        t.checking as f64,
    )?;
    out.gauge(
        "transmission_queued_torrents",
        "Torrents waiting in the download or seed queue",
        t.queued as f64,
    )?;
    out.gauge(
        "transmission_errored_torrents",
        "Torrents reporting an error",
        t.errored as f64,
    )?;
    out.gauge_vec(
        "transmission_torrents_by_status",
        "Torrents by daemon status",
        "status",
        t.by_status.iter().map(|(s, n)| (s.as_str(), *n as f64)),
    )?;
    out.gauge(
        "transmission_download_rate_bytes_per_second",
        "Aggregate download rate of all torrents",
        t.download_rate_bytes as f64,
    )?;
    out.gauge(
        "transmission_upload_rate_bytes_per_second",
        "Aggregate upload rate of all torrents",
        t.upload_rate_bytes as f64,
    )?;
    out.gauge(
        "transmission_size_bytes",
        "Total size of all torrents",
        t.total_size_bytes as f64,
    )?;
    out.gauge(
        "transmission_size_when_done_bytes",
        "Bytes wanted across all torrents",
        t.size_when_done_bytes as f64,
    )?;
    out.gauge(
        "transmission_left_until_done_bytes",
        "Bytes still to download across all torrents",
        t.left_until_done_bytes as f64,
    )?;
    out.gauge(
        "transmission_peers_connected",
        "Peers connected across all torrents",
        t.peers_connected as f64,
    )?;
    out.counter(
        "transmission_torrents_downloaded_ever_bytes",
        "Bytes ever downloaded by the current torrents",
        t.downloaded_ever_bytes,
    )?;
    out.counter(
        "transmission_torrents_uploaded_ever_bytes",
        "Bytes ever uploaded by the current torrents",
        t.uploaded_ever_bytes,
    )
}

fn transfer_counters(
    out: &Families,
    prefix: &str,
    scope: &str,
    c: &TransferCounters,
) -> Result<(), prometheus::Error> {
    out.counter(
        &format!("{prefix}_downloaded_bytes"),
        &format!("Bytes downloaded {scope}"),
        c.downloaded_bytes,
    )?;
    out.counter(
        &format!("{prefix}_uploaded_bytes"),
        &format!("Bytes uploaded {scope}"),
        c.uploaded_bytes,
    )?;
    out.counter(
        &format!("{prefix}_files_added"),
        &format!("Files added {scope}"),
        c.files_added,
    )?;
    out.counter(
        &format!("{prefix}_seconds_active"),
        &format!("Seconds active {scope}"),
        c.seconds_active,
    )
}

fn session_families(out: &Families, s: &SessionStats) -> Result<(), prometheus::Error> {
    out.gauge(
        "transmission_session_download_speed_bytes_per_second",
        "Download speed reported by the daemon",
        s.download_speed_bytes as f64,
    )?;
    out.gauge(
        "transmission_session_upload_speed_bytes_per_second",
        "Upload speed reported by the daemon",
        s.upload_speed_bytes as f64,
    )?;
    out.gauge(
        "transmission_session_active_torrents",
        "Active torrents reported by the daemon",
        s.active_torrents as f64,
    )?;
    out.gauge(
        "transmission_session_paused_torrents",
        "Paused torrents reported by the daemon",
        s.paused_torrents as f64,
    )?;
    transfer_counters(out, "transmission_session", "since the daemon started", &s.current)?;
    transfer_counters(out, "transmission_cumulative", "over the daemon lifetime", &s.cumulative)?;
    out.counter(
        "transmission_cumulative_session_count",
        "Number of daemon sessions",
        s.cumulative.session_count,
    )
}

fn vpn_families(out: &Families, v: &VpnState) -> Result<(), prometheus::Error> {
    out.gauge(
        "transmissionvpn_vpn_interface_up",
        "VPN interface exists (1=yes, 0=no)",
        flag(v.interface.is_some()),
    )?;
    out.gauge(
        "transmissionvpn_vpn_connected",
        "VPN interface is up (1=yes, 0=no)",
        flag(v.connected),
    )?;
    out.gauge(
        "transmissionvpn_external_ip_reachable",
        "External IP echo service answered (1=yes, 0=no)",
        flag(v.external_ip.is_some()),
    )?;
    out.gauge_opt(
        "transmissionvpn_external_ip_hash",
        "Hash of the external IP for change detection",
        v.external_ip.as_deref().map(ip_hash),
    )?;

    let Some(iface) = v.interface.as_deref() else {
        return Ok(());
    };
    let counters = [
        ("transmissionvpn_vpn_rx_bytes", "Bytes received on the VPN interface", v.rx_bytes),
        ("transmissionvpn_vpn_tx_bytes", "Bytes sent on the VPN interface", v.tx_bytes),
        ("transmissionvpn_vpn_rx_packets", "Packets received on the VPN interface", v.rx_packets),
        ("transmissionvpn_vpn_tx_packets", "Packets sent on the VPN interface", v.tx_packets),
        ("transmissionvpn_vpn_rx_errors", "Receive errors on the VPN interface", v.rx_errors),
        ("transmissionvpn_vpn_tx_errors", "Transmit errors on the VPN interface", v.tx_errors),
        ("transmissionvpn_vpn_rx_dropped", "Inbound packets dropped on the VPN interface", v.rx_dropped),
        ("transmissionvpn_vpn_tx_dropped", "Outbound packets dropped on the VPN interface", v.tx_dropped),
    ];
    for (name, help, value) in counters {
        out.counter_vec(name, help, "interface", [(iface, value)])?;
    }
    Ok(())
}

/// Stable within one build; only used to spot changes between scrapes.
fn ip_hash(ip: &str) -> f64 {
    let mut hasher = DefaultHasher::new();
    ip.hash(&mut hasher);
    (hasher.finish() % 1_000_000) as f64
}

fn host_families(out: &Families, h: &HostState) -> Result<(), prometheus::Error> {
    out.gauge("transmissionvpn_host_uptime_seconds", "Host uptime", h.uptime_secs as f64)?;
    out.gauge("transmissionvpn_cpu_load_1min", "Load average over 1 minute", h.load_1)?;
    out.gauge("transmissionvpn_cpu_load_5min", "Load average over 5 minutes", h.load_5)?;
    out.gauge("transmissionvpn_cpu_load_15min", "Load average over 15 minutes", h.load_15)?;
    out.gauge(
        "transmissionvpn_cpu_usage_percent",
        "Global CPU usage in percent",
        h.cpu_usage_percent,
    )?;
    out.gauge(
        "transmissionvpn_memory_total_bytes",
        "Total memory",
        h.memory_total_bytes as f64,
    )?;
    out.gauge(
        "transmissionvpn_memory_used_bytes",
        "Used memory",
        h.memory_used_bytes as f64,
    )?;
    out.gauge(
        "transmissionvpn_memory_available_bytes",
        "Available memory",
        h.memory_available_bytes as f64,
    )?;
    out.gauge_opt(
        "transmissionvpn_memory_usage_percent",
        "Memory usage in percent",
        h.memory_usage_percent(),
    )?;
    out.gauge("transmissionvpn_swap_total_bytes", "Total swap", h.swap_total_bytes as f64)?;
    out.gauge("transmissionvpn_swap_used_bytes", "Used swap", h.swap_used_bytes as f64)?;

    if let Some(disk) = &h.data_disk {
        out.gauge(
            "transmissionvpn_disk_total_bytes",
            "Size of the filesystem holding the data directory",
            disk.total_bytes as f64,
        )?;
        out.gauge(
            "transmissionvpn_disk_available_bytes",
            "Available disk space in bytes",
            disk.available_bytes as f64,
        )?;
        out.gauge(
            "transmissionvpn_disk_used_bytes",
            "Used disk space in bytes",
            disk.used_bytes as f64,
        )?;
        out.gauge(
            "transmissionvpn_disk_usage_percent",
            "Disk usage percentage",
            disk.usage_percent,
        )?;
    }
    Ok(())
}

fn daemon_families(out: &Families, d: &DaemonHealth) -> Result<(), prometheus::Error> {
    out.gauge(
        "transmissionvpn_transmission_daemon_up",
        "Daemon process is running (1=yes, 0=no)",
        flag(d.process.running),
    )?;
    out.gauge_opt(
        "transmissionvpn_transmission_resident_bytes",
        "Resident memory of the daemon process",
        d.process.rss_bytes.map(|b| b as f64),
    )?;
    out.gauge(
        "transmissionvpn_web_ui_up",
        "Web UI is responding (1=yes, 0=no)",
        flag(d.web_ui.reachable),
    )?;
    out.gauge(
        "transmissionvpn_web_ui_latency_ms",
        "Web UI response time",
        d.web_ui.latency_ms as f64,
    )?;
    out.gauge(
        "transmissionvpn_rpc_up",
        "RPC interface is responding (1=yes, 0=no)",
        flag(d.rpc.reachable),
    )?;
    out.gauge(
        "transmissionvpn_rpc_latency_ms",
        "RPC session-get response time",
        d.rpc.latency_ms as f64,
    )?;
    out.gauge_opt(
        "transmissionvpn_peer_port_open",
        "Peer port reachable from outside (1=yes, 0=no)",
        d.peer_port_open.map(flag),
    )?;

    let Some(session) = &d.session else {
        return Ok(());
    };
    out.gauge_opt(
        "transmission_config_peer_port",
        "Configured peer port",
        session.peer_port.map(f64::from),
    )?;
    let toggles = [
        ("transmission_config_dht_enabled", "DHT enabled", session.dht_enabled),
        ("transmission_config_pex_enabled", "PEX enabled", session.pex_enabled),
        ("transmission_config_lpd_enabled", "Local peer discovery enabled", session.lpd_enabled),
        ("transmission_config_utp_enabled", "uTP enabled", session.utp_enabled),
        (
            "transmission_config_alt_speed_enabled",
            "Alternative speed limits active",
            session.alt_speed_enabled,
        ),
        (
            "transmission_config_speed_limit_down_enabled",
            "Download speed limit active",
            session.speed_limit_down_enabled,
        ),
        (
            "transmission_config_speed_limit_up_enabled",
            "Upload speed limit active",
            session.speed_limit_up_enabled,
        ),
    ];
    for (name, help, value) in toggles {
        out.gauge_opt(name, help, value.map(flag))?;
    }
    let limits = [
        ("transmission_config_speed_limit_down_kbps", "Download speed limit", session.speed_limit_down),
        ("transmission_config_speed_limit_up_kbps", "Upload speed limit", session.speed_limit_up),
        ("transmission_config_download_queue_size", "Download queue size", session.download_queue_size),
        ("transmission_config_seed_queue_size", "Seed queue size", session.seed_queue_size),
        ("transmission_config_peer_limit_global", "Global peer limit", session.peer_limit_global),
        (
            "transmission_config_peer_limit_per_torrent",
            "Per-torrent peer limit",
            session.peer_limit_per_torrent,
        ),
    ];
    for (name, help, value) in limits {
        out.gauge_opt(name, help, value.map(|v| v as f64))?;
    }
    if let Some(version) = session.version.as_deref() {
        out.gauge_vec(
            "transmission_version_info",
            "Daemon version",
            "version",
            [(version, 1.0)],
        )?;
    }
    Ok(())
}

fn verdict_families(out: &Families, verdict: &HealthVerdict) -> Result<(), prometheus::Error> {
    let statuses = [
        HealthStatus::Healthy,
        HealthStatus::Degraded,
        HealthStatus::Unhealthy,
        HealthStatus::Error,
    ];
    out.gauge_vec(
        "transmissionvpn_health_status",
        "Current health status (1 for the active status)",
        "status",
        statuses
            .iter()
            .map(|s| (s.as_str(), flag(*s == verdict.status))),
    )?;
    out.gauge(
        "transmissionvpn_overall_health_status",
        "Overall health status (1=serving, 0=unhealthy or unknown)",
        flag(matches!(
            verdict.status,
            HealthStatus::Healthy | HealthStatus::Degraded
        )),
    )?;
    out.gauge(
        "transmissionvpn_health_issues",
        "Number of critical issues",
        verdict.issues.len() as f64,
    )?;
    out.gauge(
        "transmissionvpn_health_warnings",
        "Number of warnings",
        verdict.warnings.len() as f64,
    )
}

fn exporter_families(out: &Families, snapshot: &Snapshot) -> Result<(), prometheus::Error> {
    out.counter(
        "transmission_metrics_rounds_total",
        "Completed collection rounds",
        snapshot.round,
    )?;
    out.gauge_opt(
        "transmission_metrics_last_update_timestamp",
        "Unix time of the last completed collection round",
        snapshot.last_update_unix(),
    )?;
    if snapshot.collectors.is_empty() {
        return Ok(());
    }
    out.gauge_vec(
        "transmission_metrics_collector_up",
        "Collector succeeded in the last round (1=yes, 0=no)",
        "collector",
        snapshot
            .collectors
            .iter()
            .map(|(name, status)| (name.as_str(), flag(status.up))),
    )?;
    out.counter_vec(
        "transmission_metrics_collector_failures_total",
        "Failed collector runs",
        "collector",
        snapshot
            .collectors
            .iter()
            .map(|(name, status)| (name.as_str(), status.failures_total)),
    )?;
    out.gauge_vec(
        "transmission_metrics_collector_last_success_timestamp",
        "Unix time of the collector's last success",
        "collector",
        snapshot.collectors.iter().filter_map(|(name, status)| {
            status
                .last_success
                .map(|at| (name.as_str(), unix_seconds(at)))
        }),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::health::{evaluate, HealthThresholds};
    use crate::state::{CollectorStatus, ProcessProbe};
    use std::time::{Duration, UNIX_EPOCH};

    fn occurrences(text: &str, needle: &str) -> usize {
        text.lines().filter(|line| line.starts_with(needle)).count()
    }

    fn snapshot() -> Snapshot {
        let mut snap = Snapshot {
            round: 4,
            collected_at: Some(UNIX_EPOCH + Duration::from_secs(1_700_000_000)),
            torrent_stats: Some(TorrentStats {
                total: 5,
                downloading: 2,
                seeding: 1,
                active: 3,
                paused: 2,
                ..TorrentStats::default()
            }),
            daemon_health: Some(DaemonHealth {
                process: ProcessProbe {
                    running: true,
                    ..ProcessProbe::default()
                },
                ..DaemonHealth::default()
            }),
            ..Snapshot::default()
        };
        snap.collectors.insert(
            "vpn".to_string(),
            CollectorStatus {
                up: false,
                failures_total: 3,
                ..CollectorStatus::default()
            },
        );
        snap
    }

    #[test]
    fn renders_torrent_counts_once() {
        let snap = snapshot();
        let verdict = evaluate(&snap, &HealthThresholds::default());

        let text = render(&snap, &verdict).expect("render");

        assert!(text.lines().any(|l| l == "transmission_torrent_count 5"));
        assert!(text.lines().any(|l| l == "transmission_downloading_torrents 2"));
        assert!(text.lines().any(|l| l == "transmission_seeding_torrents 1"));
        for name in [
            "transmission_torrent_count",
            "transmission_downloading_torrents",
            "transmission_seeding_torrents",
        ] {
            assert_eq!(occurrences(&text, &format!("# HELP {name} ")), 1, "{name}");
            assert_eq!(occurrences(&text, &format!("# TYPE {name} gauge")), 1, "{name}");
        }
    }

    #[test]
    fn missing_fragments_are_omitted() {
        let snap = snapshot();
        let verdict = evaluate(&snap, &HealthThresholds::default());

        let text = render(&snap, &verdict).expect("render");

        assert!(!text.contains("transmissionvpn_vpn_connected"));
        assert!(!text.contains("transmissionvpn_memory_total_bytes"));
        assert!(!text.contains("transmission_session_uploaded_bytes"));
        assert!(!text.contains("transmissionvpn_peer_port_open"));
    }

    #[test]
    fn counters_and_collector_status() {
        let mut snap = snapshot();
        snap.session_stats = Some(SessionStats {
            cumulative: TransferCounters {
                uploaded_bytes: 4096,
                ..TransferCounters::default()
            },
            ..SessionStats::default()
        });
        let verdict = evaluate(&snap, &HealthThresholds::default());

        let text = render(&snap, &verdict).expect("render");

        assert!(text.contains("# TYPE transmission_cumulative_uploaded_bytes counter"));
        assert!(text.lines().any(|l| l == "transmission_cumulative_uploaded_bytes 4096"));
        assert!(text.contains("transmission_metrics_collector_failures_total{collector=\"vpn\"} 3"));
        assert!(text.contains("transmission_metrics_collector_up{collector=\"vpn\"} 0"));
        assert!(text.lines().any(|l| l == "transmission_metrics_last_update_timestamp 1700000000"));
    }

    #[test]
    fn verdict_is_one_hot() {
        let snap = Snapshot::default();
        let verdict = evaluate(&snap, &HealthThresholds::default());

        let text = render(&snap, &verdict).expect("render");

        assert!(text.contains("transmissionvpn_health_status{status=\"error\"} 1"));
        assert!(text.contains("transmissionvpn_health_status{status=\"healthy\"} 0"));
        assert!(text.lines().any(|l| l == "transmissionvpn_overall_health_status 0"));
        assert!(!text.contains("transmission_torrent_count"));
        assert!(!text.contains("transmission_metrics_last_update_timestamp"));
    }

    #[test]
    fn rendering_is_repeatable() {
        let snap = snapshot();
        let verdict = evaluate(&snap, &HealthThresholds::default());

        assert_eq!(
            render(&snap, &verdict).expect("first"),
            render(&snap, &verdict).expect("second")
        );
    }
}
