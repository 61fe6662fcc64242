pub mod checks;
pub mod daemon;
pub mod host;
pub mod vpn;

use crate::config::Config;
use crate::rpc::{RpcClient, RpcError};
use crate::state::{DaemonHealth, DaemonStats, HostState, VpnState};
use async_trait::async_trait;
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CollectError {
    #[error(transparent)]
    Rpc(#[from] RpcError),
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("previous sample still in progress")]
    Busy,
    #[error("no result within {0:?}")]
    Timeout(Duration),
    #[error("collector task panicked")]
    Panicked,
}

/// One independent probe. Errors mean "fragment unavailable this round".
#[async_trait]
pub trait Collector: Send + Sync {
    type Output: Send + 'static;

    fn name(&self) -> &'static str;

    async fn collect(&self) -> Result<Self::Output, CollectError>;
}

#[derive(Clone)]
pub struct CollectorSet {
    pub transmission: Arc<dyn Collector<Output = DaemonStats>>,
    pub vpn: Arc<dyn Collector<Output = VpnState>>,
    pub host: Arc<dyn Collector<Output = HostState>>,
    pub daemon_health: Arc<dyn Collector<Output = DaemonHealth>>,
}

impl CollectorSet {
    pub fn from_config(cfg: &Config, http: Client) -> Self {
        let rpc = Arc::new(RpcClient::from_config(http.clone(), &cfg.transmission));
        Self {
            transmission: Arc::new(daemon::DaemonCollector::new(rpc.clone())),
            vpn: Arc::new(vpn::VpnCollector::from_config(&cfg.vpn, http.clone())),
            host: Arc::new(host::HostCollector::new(&cfg.host.data_dir)),
            daemon_health: Arc::new(checks::DaemonHealthCollector::from_config(
                &cfg.transmission,
                http,
                rpc,
            )),
        }
    }
}
