use super::{CollectError, Collector};
use crate::config::VpnConfig;
use crate::state::{VpnState, COLLECTOR_VPN};
use async_trait::async_trait;
use reqwest::Client;
use std::fs;
use std::io;
use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

const IFF_UP: u32 = 0x1;

pub struct VpnCollector {
    http: Client,
    sysfs_root: PathBuf,
    prefixes: Vec<String>,
    external_ip_url: Option<String>,
    external_ip_timeout: Duration,
}

impl VpnCollector {
    pub fn from_config(cfg: &VpnConfig, http: Client) -> Self {
        let external_ip_url = Some(cfg.external_ip_url.trim())
            .filter(|url| !url.is_empty())
            .map(str::to_string);
        Self {
            http,
            sysfs_root: PathBuf::from(&cfg.sysfs_net_root),
            prefixes: cfg.interface_prefixes.clone(),
            external_ip_url,
            external_ip_timeout: Duration::from_millis(cfg.external_ip_timeout_ms),
        }
    }

    /// `None` when no echo service is configured or it gave no usable answer.
    async fn external_ip(&self) -> Option<String> {
        let url = self.external_ip_url.as_deref()?;
        match self.fetch_external_ip(url).await {
            Ok(ip) => ip,
            Err(err) => {
                debug!(url, error = %err, "external ip service unreachable");
                None
            }
        }
    }

    async fn fetch_external_ip(&self, url: &str) -> Result<Option<String>, CollectError> {
        let resp = self
            .http
            .get(url)
            .timeout(self.external_ip_timeout)
            .send()
            .await?
            .error_for_status()?;
        let body = resp.text().await?;
        Ok(body.trim().parse::<IpAddr>().ok().map(|ip| ip.to_string()))
    }
}

#[async_trait]
impl Collector for VpnCollector {
    type Output = VpnState;

    fn name(&self) -> &'static str {
        COLLECTOR_VPN
    }

    async fn collect(&self) -> Result<VpnState, CollectError> {
        let root = self.sysfs_root.clone();
        let prefixes = self.prefixes.clone();
        let mut state = tokio::task::spawn_blocking(move || read_tunnel(&root, &prefixes))
            .await
            .map_err(|_| CollectError::Panicked)??;

        if let Some(name) = state.interface.as_deref() {
            state.ipv4 = interface_ipv4(name);
        }
        state.external_ip = self.external_ip().await;
        Ok(state)
    }
}

/// Picks the tunnel interface from `root` (normally `/sys/class/net`): the
/// first matching name with IFF_UP set, else the first matching name.
pub fn read_tunnel(root: &Path, prefixes: &[String]) -> io::Result<VpnState> {
    let mut names: Vec<String> = fs::read_dir(root)?
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| prefixes.iter().any(|p| name.starts_with(p.as_str())))
        .collect();
    names.sort();

    let mut fallback = None;
    for name in names {
        let dir = root.join(&name);
        let up = read_flags(&dir).map(|f| f & IFF_UP != 0).unwrap_or(false);
        if up {
            return Ok(interface_state(&dir, name, true));
        }
        if fallback.is_none() {
            fallback = Some((dir, name));
        }
    }

    Ok(match fallback {
        Some((dir, name)) => interface_state(&dir, name, false),
        None => VpnState::default(),
    })
}

fn interface_state(dir: &Path, name: String, up: bool) -> VpnState {
    let stats = dir.join("statistics");
    let counter = |file: &str| read_u64(&stats.join(file)).unwrap_or(0);
    VpnState {
        interface: Some(name),
        interface_up: up,
        connected: up,
        ipv4: None,
        external_ip: None,
        rx_bytes: counter("rx_bytes"),
        tx_bytes: counter("tx_bytes"),
        rx_packets: counter("rx_packets"),
        tx_packets: counter("tx_packets"),
        rx_errors: counter("rx_errors"),
        tx_errors: counter("tx_errors"),
        rx_dropped: counter("rx_dropped"),
        tx_dropped: counter("tx_dropped"),
    }
}

fn read_flags(dir: &Path) -> Option<u32> {
    let raw = fs::read_to_string(dir.join("flags")).ok()?;
    let raw = raw.trim();
    let hex = raw
        .strip_prefix("0x")
        .or_else(|| raw.strip_prefix("0X"))
        .unwrap_or(raw);
    u32::from_str_radix(hex, 16).ok()
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path).ok()?.trim().parse().ok()
}

#[cfg(unix)]
fn interface_ipv4(name: &str) -> Option<Ipv4Addr> {
    use std::net::SocketAddrV4;

    let addrs = match nix::ifaddrs::getifaddrs() {
        Ok(addrs) => addrs,
        Err(err) => {
            warn!(error = %err, "getifaddrs failed");
            return None;
        }
    };
    addrs
        .filter(|ifa| ifa.interface_name == name)
        .find_map(|ifa| {
            let sin = *ifa.address?.as_sockaddr_in()?;
            Some(*SocketAddrV4::from(sin).ip())
        })
}

#[cfg(not(unix))]
fn interface_ipv4(_name: &str) -> Option<Ipv4Addr> {
    None
}
