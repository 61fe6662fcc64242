//! Owns the published [`Snapshot`] and the refresh cycle that replaces it.
//!
//! Readers load the current snapshot through an atomic pointer and never wait
//! on a round. At most one round runs at a time; a refresh requested while
//! one is in flight is coalesced into it.

use crate::collectors::{CollectError, Collector, CollectorSet};
use crate::state::{RoundResults, Snapshot};
use arc_swap::ArcSwap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub enum RefreshOutcome {
    Completed(Arc<Snapshot>),
    Coalesced,
}

pub struct Engine {
    current: ArcSwap<Snapshot>,
    collectors: CollectorSet,
    refreshing: AtomicBool,
    round_done: Notify,
    interval: Duration,
    round_timeout: Duration,
}

struct RefreshGuard<'a>(&'a AtomicBool);

impl Drop for RefreshGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl Engine {
    pub fn new(collectors: CollectorSet, interval: Duration, round_timeout: Duration) -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::default()),
            collectors,
            refreshing: AtomicBool::new(false),
            round_done: Notify::new(),
            interval,
            round_timeout,
        }
    }

    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    pub fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::Acquire)
    }

    pub fn is_stale(&self, snapshot: &Snapshot, now: SystemTime) -> bool {
        match snapshot.age(now) {
            Some(age) => age >= self.interval,
            None => true,
        }
    }

    /// Runs one collection round and publishes the merged snapshot.
    pub async fn refresh(&self) -> RefreshOutcome {
        if self
            .refreshing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("refresh already running, coalescing");
            return RefreshOutcome::Coalesced;
        }
        let guard = RefreshGuard(&self.refreshing);

        let results = self.run_round().await;
        let prev = self.current.load_full();
        let next = Arc::new(Snapshot::merged(&prev, results, SystemTime::now()));
        self.current.store(next.clone());

        drop(guard);
        self.round_done.notify_waiters();
        RefreshOutcome::Completed(next)
    }

    /// Returns the current snapshot, first waiting up to `wait` for a round
    /// when it is older than the refresh interval.
    pub async fn snapshot_fresh(self: &Arc<Self>, wait: Duration) -> Arc<Snapshot> {
        let current = self.snapshot();
        if !self.is_stale(&current, SystemTime::now()) {
            return current;
        }

        let notified = self.round_done.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        if !self.is_refreshing() {
            let engine = Arc::clone(self);
            tokio::spawn(async move {
                engine.refresh().await;
            });
        }
        if time::timeout(wait, notified).await.is_err() {
            debug!(wait_ms = wait.as_millis() as u64, "serving stale snapshot");
        }
        self.snapshot()
    }

    /// Periodic refresh until `shutdown` flips. The first round runs immediately.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("refresh loop stopping");
                    break;
                }
                _ = ticker.tick() => {
                    match self.refresh().await {
                        RefreshOutcome::Completed(snapshot) => {
                            let failed: Vec<&str> = snapshot
                                .collectors
                                .iter()
                                .filter(|(_, status)| !status.up)
                                .map(|(name, _)| name.as_str())
                                .collect();
                            debug!(round = snapshot.round, ?failed, "round published");
                        }
                        RefreshOutcome::Coalesced => {
                            debug!("tick skipped, on-demand round in flight");
                        }
                    }
                }
            }
        }
    }

    async fn run_round(&self) -> RoundResults {
        let deadline = Instant::now() + self.round_timeout;
        let set = &self.collectors;

        let transmission = spawn_collector(set.transmission.clone());
        let vpn = spawn_collector(set.vpn.clone());
        let host = spawn_collector(set.host.clone());
        let daemon_health = spawn_collector(set.daemon_health.clone());

        RoundResults {
            transmission: self.settle(set.transmission.name(), transmission, deadline).await,
            vpn: self.settle(set.vpn.name(), vpn, deadline).await,
            host: self.settle(set.host.name(), host, deadline).await,
            daemon_health: self
                .settle(set.daemon_health.name(), daemon_health, deadline)
                .await,
        }
    }

    /// Waits for one collector task until the shared round deadline. A late
    /// task is left running detached; its result is dropped.
    async fn settle<T>(
        &self,
        name: &str,
        handle: JoinHandle<Result<T, CollectError>>,
        deadline: Instant,
    ) -> Result<T, CollectError> {
        let outcome = match time::timeout_at(deadline, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => {
                warn!(collector = name, error = %join_err, "collector task aborted");
                Err(CollectError::Panicked)
            }
            Err(_elapsed) => Err(CollectError::Timeout(self.round_timeout)),
        };
        if let Err(err) = &outcome {
            warn!(collector = name, error = %err, "collector unavailable this round");
        }
        outcome
    }
}

fn spawn_collector<T: Send + 'static>(
    collector: Arc<dyn Collector<Output = T>>,
) -> JoinHandle<Result<T, CollectError>> {
    tokio::spawn(async move { collector.collect().await })
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use crate::state::{DaemonHealth, DaemonStats, HostState, TorrentStats, VpnState};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU64;

    /// Scripted collector: returns `make(call_index)` after `delay`.
    pub struct Scripted<T> {
        pub name: &'static str,
        pub delay: Duration,
        pub calls: AtomicU64,
        pub make: Box<dyn Fn(u64) -> Result<T, CollectError> + Send + Sync>,
    }

    impl<T> Scripted<T> {
        pub fn new(
            name: &'static str,
            delay: Duration,
            make: impl Fn(u64) -> Result<T, CollectError> + Send + Sync + 'static,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                delay,
                calls: AtomicU64::new(0),
                make: Box::new(make),
            })
        }
    }

    #[async_trait]
    impl<T: Send + 'static> Collector for Scripted<T> {
        type Output = T;

        fn name(&self) -> &'static str {
            self.name
        }

        async fn collect(&self) -> Result<T, CollectError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                time::sleep(self.delay).await;
            }
            (self.make)(call)
        }
    }

    /// Every collector succeeds; the torrent total equals the call index + 1.
    pub fn healthy_set(delay: Duration) -> CollectorSet {
        CollectorSet {
            transmission: Scripted::new("transmission", delay, |call| {
                Ok(DaemonStats {
                    torrents: TorrentStats {
                        total: call + 1,
                        ..TorrentStats::default()
                    },
                    ..DaemonStats::default()
                })
            }),
            vpn: Scripted::new("vpn", delay, |_| {
                Ok(VpnState {
                    interface: Some("tun0".into()),
                    interface_up: true,
                    connected: true,
                    ..VpnState::default()
                })
            }),
            host: Scripted::new("host", delay, |_| {
                Ok(HostState {
                    memory_total_bytes: 100,
                    memory_used_bytes: 10,
                    ..HostState::default()
                })
            }),
            daemon_health: Scripted::new("daemon_health", delay, |_| Ok(DaemonHealth::default())),
        }
    }
}
