use super::{CollectError, Collector};
use crate::rpc::methods::{SessionStatsArgs, Torrent, TORRENT_FIELDS};
use crate::rpc::RpcClient;
use crate::state::{DaemonStats, SessionStats, TorrentStats, COLLECTOR_TRANSMISSION};
use async_trait::async_trait;
use std::sync::Arc;

pub const STATUS_STOPPED: i64 = 0;
pub const STATUS_CHECK_WAIT: i64 = 1;
pub const STATUS_CHECKING: i64 = 2;
pub const STATUS_DOWNLOAD_WAIT: i64 = 3;
pub const STATUS_DOWNLOADING: i64 = 4;
pub const STATUS_SEED_WAIT: i64 = 5;
pub const STATUS_SEEDING: i64 = 6;

/// Label used for the per-status breakdown.
pub fn status_label(status: i64) -> String {
    match status {
        STATUS_STOPPED => "stopped".to_string(),
        STATUS_CHECK_WAIT => "check_wait".to_string(),
        STATUS_CHECKING => "checking".to_string(),
        STATUS_DOWNLOAD_WAIT => "download_wait".to_string(),
        STATUS_DOWNLOADING => "downloading".to_string(),
        STATUS_SEED_WAIT => "seed_wait".to_string(),
        STATUS_SEEDING => "seeding".to_string(),
        other => format!("status_{other}"),
    }
}

pub struct DaemonCollector {
    rpc: Arc<RpcClient>,
}

impl DaemonCollector {
    pub fn new(rpc: Arc<RpcClient>) -> Self {
        Self { rpc }
    }
}

#[async_trait]
impl Collector for DaemonCollector {
    type Output = DaemonStats;

    fn name(&self) -> &'static str {
        COLLECTOR_TRANSMISSION
    }

    async fn collect(&self) -> Result<DaemonStats, CollectError> {
        let (session, torrents) = tokio::try_join!(
            self.rpc.session_stats(),
            self.rpc.torrent_get(TORRENT_FIELDS)
        )?;
        Ok(DaemonStats {
            torrents: classify(&torrents),
            session: session_stats(session),
        })
    }
}

pub fn classify(torrents: &[Torrent]) -> TorrentStats {
    let mut stats = TorrentStats::default();
    for torrent in torrents {
        stats.total += 1;
        *stats.by_status.entry(status_label(torrent.status)).or_insert(0) += 1;
        match torrent.status {
            STATUS_STOPPED => stats.paused += 1,
            STATUS_CHECK_WAIT | STATUS_CHECKING => stats.checking += 1,
            STATUS_DOWNLOAD_WAIT | STATUS_SEED_WAIT => stats.queued += 1,
            STATUS_DOWNLOADING => stats.downloading += 1,
            STATUS_SEEDING => stats.seeding += 1,
            _ => {}
        }
        if torrent.error != 0 {
            stats.errored += 1;
        }
        stats.download_rate_bytes += torrent.rate_download;
        stats.upload_rate_bytes += torrent.rate_upload;
        stats.total_size_bytes += torrent.total_size;
        stats.size_when_done_bytes += torrent.size_when_done;
        stats.left_until_done_bytes += torrent.left_until_done;
        stats.downloaded_ever_bytes += torrent.downloaded_ever;
        stats.uploaded_ever_bytes += torrent.uploaded_ever;
        stats.peers_connected += torrent.peers_connected;
    }
    stats.active = stats.downloading + stats.seeding;
    stats
}

fn session_stats(args: SessionStatsArgs) -> SessionStats {
    SessionStats {
        active_torrents: args.active_torrent_count,
        paused_torrents: args.paused_torrent_count,
        torrent_count: args.torrent_count,
        download_speed_bytes: args.download_speed,
        upload_speed_bytes: args.upload_speed,
        current: args.current_stats,
        cumulative: args.cumulative_stats,
    }
}
