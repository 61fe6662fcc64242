use super::{RpcClient, RpcError};
use serde::{Deserialize, Serialize};
use serde_json::json;

/// Fields requested from `torrent-get`; everything the daemon-stats collector aggregates.
pub const TORRENT_FIELDS: &[&str] = &[
    "status",
    "error",
    "totalSize",
    "sizeWhenDone",
    "leftUntilDone",
    "rateDownload",
    "rateUpload",
    "downloadedEver",
    "uploadedEver",
    "peersConnected",
];

#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TransferCounters {
    #[serde(default)]
    pub downloaded_bytes: u64,
    #[serde(default)]
    pub uploaded_bytes: u64,
    #[serde(default)]
    pub files_added: u64,
    #[serde(default)]
    pub session_count: u64,
    #[serde(default)]
    pub seconds_active: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatsArgs {
    #[serde(default)]
    pub active_torrent_count: u64,
    #[serde(default)]
    pub paused_torrent_count: u64,
    #[serde(default)]
    pub torrent_count: u64,
    #[serde(default)]
    pub download_speed: u64,
    #[serde(default)]
    pub upload_speed: u64,
    #[serde(rename = "current-stats")]
    pub current_stats: TransferCounters,
    #[serde(rename = "cumulative-stats")]
    pub cumulative_stats: TransferCounters,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct SessionArgs {
    pub version: Option<String>,
    pub rpc_version: Option<u64>,
    pub peer_port: Option<u16>,
    pub port_forwarding_enabled: Option<bool>,
    pub dht_enabled: Option<bool>,
    pub pex_enabled: Option<bool>,
    pub lpd_enabled: Option<bool>,
    pub utp_enabled: Option<bool>,
    pub encryption: Option<String>,
    pub alt_speed_enabled: Option<bool>,
    pub alt_speed_down: Option<u64>,
    pub alt_speed_up: Option<u64>,
    pub speed_limit_down: Option<u64>,
    pub speed_limit_down_enabled: Option<bool>,
    pub speed_limit_up: Option<u64>,
    pub speed_limit_up_enabled: Option<bool>,
    pub download_queue_size: Option<u64>,
    pub seed_queue_size: Option<u64>,
    pub peer_limit_global: Option<u64>,
    pub peer_limit_per_torrent: Option<u64>,
    pub download_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Torrent {
    pub status: i64,
    #[serde(default)]
    pub error: i64,
    #[serde(default)]
    pub total_size: u64,
    #[serde(default)]
    pub size_when_done: u64,
    #[serde(default)]
    pub left_until_done: u64,
    #[serde(default)]
    pub rate_download: u64,
    #[serde(default)]
    pub rate_upload: u64,
    #[serde(default)]
    pub downloaded_ever: u64,
    #[serde(default)]
    pub uploaded_ever: u64,
    #[serde(default)]
    pub peers_connected: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TorrentList {
    pub torrents: Vec<Torrent>,
}

#[derive(Debug, Clone, Deserialize)]
struct PortTestArgs {
    #[serde(rename = "port-is-open")]
    port_is_open: bool,
}

impl RpcClient {
    pub async fn session_stats(&self) -> Result<SessionStatsArgs, RpcError> {
        self.call("session-stats", None)
            .await?
            .decode("session-stats")
    }

    pub async fn session_get(&self) -> Result<SessionArgs, RpcError> {
        self.call("session-get", None).await?.decode("session-get")
    }

    pub async fn torrent_get(&self, fields: &[&str]) -> Result<Vec<Torrent>, RpcError> {
        let list: TorrentList = self
            .call("torrent-get", Some(json!({ "fields": fields })))
            .await?
            .decode("torrent-get")?;
        Ok(list.torrents)
    }

    /// Asks the daemon to probe its own peer port from the outside.
    pub async fn port_test(&self) -> Result<bool, RpcError> {
        let args: PortTestArgs = self.call("port-test", None).await?.decode("port-test")?;
        Ok(args.port_is_open)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fake::{FakeDaemon, FakeReply};
    use reqwest::Client;
    use std::time::Duration;

    fn client(url: String) -> RpcClient {
        RpcClient::new(Client::new(), url, None, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn session_stats_decodes_kebab_sections() {
        let daemon = FakeDaemon::spawn(|_, _| {
            FakeReply::success(json!({
                "activeTorrentCount": 2,
                "pausedTorrentCount": 1,
                "torrentCount": 3,
                "downloadSpeed": 1024,
                "uploadSpeed": 512,
                "current-stats": {"downloadedBytes": 10, "uploadedBytes": 20, "filesAdded": 1, "sessionCount": 1, "secondsActive": 60},
                "cumulative-stats": {"downloadedBytes": 100, "uploadedBytes": 200, "filesAdded": 7, "sessionCount": 4, "secondsActive": 3600}
            }))
        })
        .await;

        let stats = client(daemon.url()).session_stats().await.expect("decode");

        assert_eq!(stats.torrent_count, 3);
        assert_eq!(stats.current_stats.uploaded_bytes, 20);
        assert_eq!(stats.cumulative_stats.session_count, 4);
    }

    #[tokio::test]
    async fn torrent_get_without_torrents_is_protocol_error() {
        let daemon = FakeDaemon::spawn(|_, _| FakeReply::success(json!({"unexpected": []}))).await;

        let err = client(daemon.url())
            .torrent_get(TORRENT_FIELDS)
            .await
            .expect_err("shape mismatch");

        assert!(matches!(err, RpcError::Protocol { .. }));
    }

    #[tokio::test]
    async fn port_test_reads_flag() {
        let daemon = FakeDaemon::spawn(|_, _| FakeReply::success(json!({"port-is-open": false}))).await;

        let open = client(daemon.url()).port_test().await.expect("decode");

        assert!(!open);
        let sent = daemon.last_request().expect("request");
        assert_eq!(sent.body["method"], "port-test");
    }

    #[tokio::test]
    async fn session_get_tolerates_missing_keys() {
        let daemon = FakeDaemon::spawn(|_, _| {
            FakeReply::success(json!({"version": "4.0.5", "dht-enabled": true, "encryption": "required"}))
        })
        .await;

        let session = client(daemon.url()).session_get().await.expect("decode");

        assert_eq!(session.version.as_deref(), Some("4.0.5"));
        assert_eq!(session.dht_enabled, Some(true));
        assert_eq!(session.pex_enabled, None);
    }
}
