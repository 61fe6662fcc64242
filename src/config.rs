use serde::{Deserialize, Serialize};
use std::fs;
use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_collector_timeout_secs")]
    pub collector_timeout_secs: u64,
    #[serde(default = "default_request_refresh_timeout_ms")]
    pub request_refresh_timeout_ms: u64,
    #[serde(default)]
    pub transmission: TransmissionConfig,
    #[serde(default)]
    pub vpn: VpnConfig,
    #[serde(default)]
    pub host: HostConfig,
    #[serde(default)]
    pub health: HealthConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TransmissionConfig {
    #[serde(default = "default_transmission_host")]
    pub host: String,
    #[serde(default = "default_transmission_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_rpc_path")]
    pub rpc_path: String,
    #[serde(default = "default_web_path")]
    pub web_path: String,
    #[serde(default = "default_web_expected_status")]
    pub web_expected_status: u16,
    #[serde(default = "default_process_name")]
    pub process_name: String,
    #[serde(default = "default_port_test")]
    pub port_test: bool,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VpnConfig {
    #[serde(default = "default_interface_prefixes")]
    pub interface_prefixes: Vec<String>,
    #[serde(default = "default_sysfs_net_root")]
    pub sysfs_net_root: String,
    /// Empty string disables the external IP probe.
    #[serde(default = "default_external_ip_url")]
    pub external_ip_url: String,
    #[serde(default = "default_external_ip_timeout_ms")]
    pub external_ip_timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HealthConfig {
    #[serde(default = "default_warning_percent")]
    pub disk_warning_percent: f64,
    #[serde(default = "default_warning_percent")]
    pub memory_warning_percent: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            listen: default_listen(),
            interval_secs: default_interval_secs(),
            collector_timeout_secs: default_collector_timeout_secs(),
            request_refresh_timeout_ms: default_request_refresh_timeout_ms(),
            transmission: TransmissionConfig::default(),
            vpn: VpnConfig::default(),
            host: HostConfig::default(),
            health: HealthConfig::default(),
        }
    }
}

impl Default for TransmissionConfig {
    fn default() -> Self {
        Self {
            host: default_transmission_host(),
            port: default_transmission_port(),
            username: None,
            password: None,
            rpc_path: default_rpc_path(),
            web_path: default_web_path(),
            web_expected_status: default_web_expected_status(),
            process_name: default_process_name(),
            port_test: default_port_test(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

impl Default for VpnConfig {
    fn default() -> Self {
        Self {
            interface_prefixes: default_interface_prefixes(),
            sysfs_net_root: default_sysfs_net_root(),
            external_ip_url: default_external_ip_url(),
            external_ip_timeout_ms: default_external_ip_timeout_ms(),
        }
    }
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            disk_warning_percent: default_warning_percent(),
            memory_warning_percent: default_warning_percent(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("failed to parse YAML in {path}: {source}")]
    Parse {
        path: String,
        source: serde_yaml::Error,
    },
    #[error("environment variable {key}={value:?} is invalid: {reason}")]
    Env {
        key: &'static str,
        value: String,
        reason: String,
    },
    #[error("config validation failed: {0}")]
    Validation(String),
}

impl Config {
    /// Loads the optional YAML file, applies process environment overrides and validates.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut cfg = match path {
            Some(path) => Self::read_file(path)?,
            None => Self::default(),
        };
        cfg.apply_env(|key| std::env::var(key).ok())?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn read_file(path: &Path) -> Result<Self, ConfigError> {
        let path_display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path_display.clone(),
            source,
        })?;

        serde_yaml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path_display,
            source,
        })
    }

    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("METRICS_ENABLED") {
            self.enabled = parse_bool("METRICS_ENABLED", &v)?;
        }
        if let Some(v) = lookup("METRICS_PORT") {
            let port: u16 = parse_env("METRICS_PORT", &v)?;
            let mut addr = SocketAddr::from_str(&self.listen)
                .unwrap_or_else(|_| SocketAddr::from(([0, 0, 0, 0], port)));
            addr.set_port(port);
            self.listen = addr.to_string();
        }
        if let Some(v) = lookup("METRICS_INTERVAL") {
            self.interval_secs = parse_env("METRICS_INTERVAL", &v)?;
        }
        if let Some(v) = lookup("COLLECTOR_TIMEOUT") {
            self.collector_timeout_secs = parse_env("COLLECTOR_TIMEOUT", &v)?;
        }
        if let Some(v) = lookup("REQUEST_REFRESH_TIMEOUT_MS") {
            self.request_refresh_timeout_ms = parse_env("REQUEST_REFRESH_TIMEOUT_MS", &v)?;
        }
        if let Some(v) = lookup("TRANSMISSION_HOST") {
            self.transmission.host = v;
        }
        if let Some(v) = lookup("TRANSMISSION_PORT") {
            self.transmission.port = parse_env("TRANSMISSION_PORT", &v)?;
        }
        if let Some(v) = lookup("TRANSMISSION_RPC_USERNAME") {
            self.transmission.username = non_empty(v);
        }
        if let Some(v) = lookup("TRANSMISSION_RPC_PASSWORD") {
            self.transmission.password = non_empty(v);
        }
        if let Some(v) = lookup("TRANSMISSION_PROCESS_NAME") {
            self.transmission.process_name = v;
        }
        if let Some(v) = lookup("TRANSMISSION_PORT_TEST") {
            self.transmission.port_test = parse_bool("TRANSMISSION_PORT_TEST", &v)?;
        }
        if let Some(v) = lookup("VPN_INTERFACE_PREFIXES") {
            self.vpn.interface_prefixes = v
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(v) = lookup("EXTERNAL_IP_URL") {
            self.vpn.external_ip_url = v.trim().to_string();
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.host.data_dir = v;
        }
        if let Some(v) = lookup("HEALTH_DISK_WARNING_PERCENT") {
            self.health.disk_warning_percent = parse_env("HEALTH_DISK_WARNING_PERCENT", &v)?;
        }
        if let Some(v) = lookup("HEALTH_MEMORY_WARNING_PERCENT") {
            self.health.memory_warning_percent = parse_env("HEALTH_MEMORY_WARNING_PERCENT", &v)?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if SocketAddr::from_str(&self.listen).is_err() {
            return Err(ConfigError::Validation(
                "listen must be a valid host:port address".to_string(),
            ));
        }
        if self.interval_secs < 1 {
            return Err(ConfigError::Validation(
                "interval_secs must be >= 1".to_string(),
            ));
        }
        if self.collector_timeout_secs < 1 {
            return Err(ConfigError::Validation(
                "collector_timeout_secs must be >= 1".to_string(),
            ));
        }
        if self.request_refresh_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "request_refresh_timeout_ms must be > 0".to_string(),
            ));
        }

        validate_transmission(&self.transmission)?;
        validate_vpn(&self.vpn)?;
        validate_health(&self.health)?;

        if self.host.data_dir.trim().is_empty() {
            return Err(ConfigError::Validation(
                "host.data_dir must not be empty".to_string(),
            ));
        }

        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn collector_timeout(&self) -> Duration {
        Duration::from_secs(self.collector_timeout_secs)
    }

    pub fn request_refresh_timeout(&self) -> Duration {
        Duration::from_millis(self.request_refresh_timeout_ms)
    }

    pub fn example_yaml() -> &'static str {
        include_str!("../config.yaml.example")
    }
}

impl TransmissionConfig {
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }

    pub fn rpc_url(&self) -> String {
        format!("{}{}", self.base_url(), self.rpc_path)
    }

    pub fn web_url(&self) -> String {
        format!("{}{}", self.base_url(), self.web_path)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn validate_transmission(cfg: &TransmissionConfig) -> Result<(), ConfigError> {
    if cfg.host.trim().is_empty() {
        return Err(ConfigError::Validation(
            "transmission.host must not be empty".to_string(),
        ));
    }
    if cfg.port == 0 {
        return Err(ConfigError::Validation(
            "transmission.port must be in range 1..65535".to_string(),
        ));
    }
    if cfg.username.is_some() != cfg.password.is_some() {
        return Err(ConfigError::Validation(
            "transmission.username and transmission.password must be set together".to_string(),
        ));
    }
    if !cfg.rpc_path.starts_with('/') || !cfg.web_path.starts_with('/') {
        return Err(ConfigError::Validation(
            "transmission.rpc_path and transmission.web_path must start with '/'".to_string(),
        ));
    }
    if cfg.process_name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "transmission.process_name must not be empty".to_string(),
        ));
    }
    if cfg.timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "transmission.timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_vpn(cfg: &VpnConfig) -> Result<(), ConfigError> {
    if cfg.interface_prefixes.is_empty() {
        return Err(ConfigError::Validation(
            "vpn.interface_prefixes must list at least one prefix".to_string(),
        ));
    }
    if cfg.interface_prefixes.iter().any(|p| p.trim().is_empty()) {
        return Err(ConfigError::Validation(
            "vpn.interface_prefixes must not contain empty entries".to_string(),
        ));
    }
    if cfg.external_ip_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "vpn.external_ip_timeout_ms must be > 0".to_string(),
        ));
    }
    Ok(())
}

fn validate_health(cfg: &HealthConfig) -> Result<(), ConfigError> {
    if !(0.0..=100.0).contains(&cfg.disk_warning_percent) {
        return Err(ConfigError::Validation(
            "health.disk_warning_percent must be in range 0..100".to_string(),
        ));
    }
    if !(0.0..=100.0).contains(&cfg.memory_warning_percent) {
        return Err(ConfigError::Validation(
            "health.memory_warning_percent must be in range 0..100".to_string(),
        ));
    }
    Ok(())
}

fn parse_env<T>(key: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    value.trim().parse::<T>().map_err(|err| ConfigError::Env {
        key,
        value: value.to_string(),
        reason: err.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Env {
            key,
            value: value.to_string(),
            reason: "expected true/false".to_string(),
        }),
    }
}

fn non_empty(value: String) -> Option<String> {
    if value.is_empty() {
        None
    } else {
        Some(value)
    }
}

const fn default_enabled() -> bool {
    true
}

fn default_listen() -> String {
    "0.0.0.0:9099".to_string()
}

const fn default_interval_secs() -> u64 {
    30
}

const fn default_collector_timeout_secs() -> u64 {
    10
}

const fn default_request_refresh_timeout_ms() -> u64 {
    2000
}

fn default_transmission_host() -> String {
    "127.0.0.1".to_string()
}

const fn default_transmission_port() -> u16 {
    9091
}

fn default_rpc_path() -> String {
    "/transmission/rpc".to_string()
}

fn default_web_path() -> String {
    "/transmission/web/".to_string()
}

const fn default_web_expected_status() -> u16 {
    200
}

fn default_process_name() -> String {
    "transmission-daemon".to_string()
}

const fn default_port_test() -> bool {
    true
}

const fn default_timeout_ms() -> u64 {
    5000
}

fn default_interface_prefixes() -> Vec<String> {
    vec!["tun".to_string(), "wg".to_string(), "tap".to_string()]
}

fn default_sysfs_net_root() -> String {
    "/sys/class/net".to_string()
}

fn default_external_ip_url() -> String {
    "https://ifconfig.me/ip".to_string()
}

const fn default_external_ip_timeout_ms() -> u64 {
    5000
}

fn default_data_dir() -> String {
    "/downloads".to_string()
}

const fn default_warning_percent() -> f64 {
    90.0
}
