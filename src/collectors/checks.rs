use super::{CollectError, Collector};
use crate::config::TransmissionConfig;
use crate::rpc::RpcClient;
use crate::rpc::methods::SessionArgs;
use crate::state::{DaemonHealth, ProcessProbe, RpcProbe, WebProbe, COLLECTOR_DAEMON_HEALTH};
use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::Client;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use sysinfo::{PidExt, ProcessExt, ProcessRefreshKind, System, SystemExt};
use tokio::time;
use tracing::warn;

/// Liveness probes for the daemon. Individual probe failures are recorded as
/// negative observations, so the fragment is produced on every round.
pub struct DaemonHealthCollector {
    http: Client,
    rpc: Arc<RpcClient>,
    system: Arc<Mutex<System>>,
    process_name: String,
    web_url: String,
    web_expected_status: u16,
    port_test: bool,
    timeout: Duration,
}

impl DaemonHealthCollector {
    pub fn from_config(cfg: &TransmissionConfig, http: Client, rpc: Arc<RpcClient>) -> Self {
        Self {
            http,
            rpc,
            system: Arc::new(Mutex::new(System::new())),
            process_name: cfg.process_name.clone(),
            web_url: cfg.web_url(),
            web_expected_status: cfg.web_expected_status,
            port_test: cfg.port_test,
            timeout: cfg.timeout(),
        }
    }

    async fn probe_process(&self) -> ProcessProbe {
        let system = self.system.clone();
        let name = self.process_name.clone();
        match tokio::task::spawn_blocking(move || find_process(&mut system.lock(), &name)).await {
            Ok(probe) => probe,
            Err(err) => {
                warn!(error = %err, "process probe failed");
                ProcessProbe::default()
            }
        }
    }

    async fn probe_web(&self) -> WebProbe {
        let start = Instant::now();
        let req = self.http.get(&self.web_url).timeout(self.timeout);

        let (reachable, status_code) = match req.send().await {
            Ok(resp) => {
                let code = resp.status().as_u16();
                (code == self.web_expected_status, Some(code))
            }
            Err(err) => {
                warn!(url = %self.web_url, error = %err, "web ui check failed");
                (false, None)
            }
        };

        WebProbe {
            reachable,
            latency_ms: start.elapsed().as_millis() as u64,
            status_code,
        }
    }

    async fn probe_rpc(&self) -> (RpcProbe, Option<SessionArgs>) {
        let start = Instant::now();
        let outcome = time::timeout(self.timeout, self.rpc.session_get()).await;
        let latency_ms = start.elapsed().as_millis() as u64;

        match outcome {
            Ok(Ok(session)) => (
                RpcProbe {
                    reachable: true,
                    latency_ms,
                    error: None,
                },
                Some(session),
            ),
            Ok(Err(err)) => {
                warn!(url = %self.rpc.url(), error = %err, "rpc check failed");
                (
                    RpcProbe {
                        reachable: false,
                        latency_ms,
                        error: Some(err.to_string()),
                    },
                    None,
                )
            }
            Err(_elapsed) => {
                warn!(url = %self.rpc.url(), "rpc check timeout");
                (
                    RpcProbe {
                        reachable: false,
                        latency_ms,
                        error: Some(format!("no answer within {:?}", self.timeout)),
                    },
                    None,
                )
            }
        }
    }

    async fn probe_peer_port(&self) -> Option<bool> {
        match time::timeout(self.timeout, self.rpc.port_test()).await {
            Ok(Ok(open)) => Some(open),
            Ok(Err(err)) => {
                warn!(error = %err, "port test failed");
                None
            }
            Err(_elapsed) => {
                warn!("port test timeout");
                None
            }
        }
    }
}

#[async_trait]
impl Collector for DaemonHealthCollector {
    type Output = DaemonHealth;

    fn name(&self) -> &'static str {
        COLLECTOR_DAEMON_HEALTH
    }

    async fn collect(&self) -> Result<DaemonHealth, CollectError> {
        // All probes share one timeout window; the port test is kept only when
        // the RPC endpoint answered in the same round.
        let port_probe = async {
            if self.port_test {
                self.probe_peer_port().await
            } else {
                None
            }
        };
        let (process, web_ui, (rpc, session), port_open) = tokio::join!(
            self.probe_process(),
            self.probe_web(),
            self.probe_rpc(),
            port_probe
        );
        let peer_port_open = if rpc.reachable { port_open } else { None };

        Ok(DaemonHealth {
            process,
            web_ui,
            rpc,
            peer_port_open,
            session,
        })
    }
}

fn find_process(system: &mut System, name: &str) -> ProcessProbe {
    system.refresh_processes_specifics(ProcessRefreshKind::new());
    // Linux truncates comm to 15 bytes, so the executable path is checked too.
    let found = system.processes().values().find(|process| {
        process.name() == name
            || process.exe().file_name().and_then(|f| f.to_str()) == Some(name)
            || process
                .cmd()
                .first()
                .and_then(|arg0| Path::new(arg0).file_name())
                .and_then(|f| f.to_str())
                == Some(name)
    });
    match found {
        Some(process) => ProcessProbe {
            running: true,
            pid: Some(process.pid().as_u32()),
            rss_bytes: Some(process.memory()),
        },
        None => ProcessProbe::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::fake::{FakeDaemon, FakeReply};
    use serde_json::json;

    fn config_for(daemon: &FakeDaemon, port_test: bool) -> TransmissionConfig {
        TransmissionConfig {
            host: daemon.addr().ip().to_string(),
            port: daemon.addr().port(),
            process_name: "no-such-process-for-tests".to_string(),
            port_test,
            timeout_ms: 2000,
            ..TransmissionConfig::default()
        }
    }

    fn collector(cfg: &TransmissionConfig) -> DaemonHealthCollector {
        let rpc = Arc::new(RpcClient::from_config(Client::new(), cfg));
        DaemonHealthCollector::from_config(cfg, Client::new(), rpc)
    }

    #[tokio::test]
    async fn healthy_daemon_reports_every_probe() {
        let daemon = FakeDaemon::spawn(|_, _| {
            FakeReply::success(json!({"version": "4.0.5", "peer-port": 51413, "port-is-open": true}))
        })
        .await;
        let cfg = config_for(&daemon, true);

        let health = collector(&cfg).collect().await.expect("fragment");

        assert!(!health.process.running);
        assert!(health.web_ui.reachable);
        assert_eq!(health.web_ui.status_code, Some(200));
        assert!(health.rpc.reachable);
        assert_eq!(health.peer_port_open, Some(true));
        let session = health.session.expect("session settings");
        assert_eq!(session.peer_port, Some(51413));
    }

    #[tokio::test]
    async fn disabled_port_test_is_not_run() {
        let daemon = FakeDaemon::spawn(|_, _| FakeReply::success(json!({}))).await;
        let cfg = config_for(&daemon, false);

        let health = collector(&cfg).collect().await.expect("fragment");

        assert_eq!(health.peer_port_open, None);
        assert!(daemon
            .requests()
            .iter()
            .all(|r| r.body["method"] != "port-test"));
    }

    #[tokio::test]
    async fn slow_rpc_probes_fit_one_timeout_window() {
        let daemon = FakeDaemon::spawn(|hit, token| match (hit, token) {
            (0, None) => FakeReply::conflict("sid-1"),
            _ => FakeReply::delayed(
                Duration::from_millis(700),
                FakeReply::success(json!({"version": "4.0.5", "port-is-open": false})),
            ),
        })
        .await;
        let cfg = TransmissionConfig {
            timeout_ms: 1000,
            ..config_for(&daemon, true)
        };
        let collector = collector(&cfg);
        collector.rpc.session_get().await.expect("warm session id");

        let start = Instant::now();
        let health = collector.collect().await.expect("fragment");

        assert!(health.rpc.reachable);
        assert_eq!(health.peer_port_open, Some(false));
        assert!(start.elapsed() < Duration::from_millis(1300));
    }

    #[tokio::test]
    async fn port_result_dropped_when_rpc_unreachable() {
        let daemon = FakeDaemon::spawn(|_, _| FakeReply::status(500)).await;
        let cfg = config_for(&daemon, true);

        let health = collector(&cfg).collect().await.expect("fragment");

        assert!(!health.rpc.reachable);
        assert_eq!(health.peer_port_open, None);
    }

    #[tokio::test]
    async fn unreachable_daemon_is_a_negative_observation() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").expect("bind");
        let port = listener.local_addr().expect("addr").port();
        drop(listener);
        let cfg = TransmissionConfig {
            host: "127.0.0.1".to_string(),
            port,
            process_name: "no-such-process-for-tests".to_string(),
            timeout_ms: 500,
            ..TransmissionConfig::default()
        };

        let health = collector(&cfg).collect().await.expect("fragment");

        assert!(!health.web_ui.reachable);
        assert_eq!(health.web_ui.status_code, None);
        assert!(!health.rpc.reachable);
        assert!(health.rpc.error.is_some());
        assert_eq!(health.peer_port_open, None);
    }
}
