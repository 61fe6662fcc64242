use super::{CollectError, Collector};
use crate::state::{DiskUsage, HostState, COLLECTOR_HOST};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use sysinfo::{CpuExt, DiskExt, System, SystemExt};

/// Samples host resources through a long-lived `System` so CPU usage is a
/// delta between rounds rather than a since-boot average.
pub struct HostCollector {
    system: Arc<Mutex<System>>,
    data_dir: PathBuf,
}

impl HostCollector {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            system: Arc::new(Mutex::new(System::new())),
            data_dir: data_dir.into(),
        }
    }
}

#[async_trait]
impl Collector for HostCollector {
    type Output = HostState;

    fn name(&self) -> &'static str {
        COLLECTOR_HOST
    }

    async fn collect(&self) -> Result<HostState, CollectError> {
        let system = self.system.clone();
        let data_dir = self.data_dir.clone();
        tokio::task::spawn_blocking(move || -> Result<HostState, CollectError> {
            let mut system = system.try_lock().ok_or(CollectError::Busy)?;
            Ok(sample_host(&mut system, &data_dir))
        })
        .await
        .map_err(|_| CollectError::Panicked)?
    }
}

pub fn sample_host(system: &mut System, data_dir: &Path) -> HostState {
    system.refresh_cpu();
    system.refresh_memory();
    system.refresh_disks_list();
    system.refresh_disks();

    let load = system.load_average();
    let mounts: Vec<(PathBuf, u64, u64)> = system
        .disks()
        .iter()
        .map(|d| (d.mount_point().to_path_buf(), d.total_space(), d.available_space()))
        .collect();

    HostState {
        uptime_secs: system.uptime(),
        load_1: load.one,
        load_5: load.five,
        load_15: load.fifteen,
        memory_total_bytes: system.total_memory(),
        memory_used_bytes: system.used_memory(),
        memory_available_bytes: system.available_memory(),
        swap_total_bytes: system.total_swap(),
        swap_used_bytes: system.used_swap(),
        cpu_usage_percent: system.global_cpu_info().cpu_usage() as f64,
        data_disk: disk_for_path(&mounts, data_dir),
    }
}

/// Longest mount point that is a path prefix of `dir`.
pub fn disk_for_path(mounts: &[(PathBuf, u64, u64)], dir: &Path) -> Option<DiskUsage> {
    mounts
        .iter()
        .filter(|(mount, _, _)| dir.starts_with(mount))
        .max_by_key(|(mount, _, _)| mount.components().count())
        .map(|(mount, total, available)| {
            DiskUsage::new(mount.to_string_lossy().into_owned(), *total, *available)
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mounts() -> Vec<(PathBuf, u64, u64)> {
        vec![
            (PathBuf::from("/"), 1000, 500),
            (PathBuf::from("/downloads"), 4000, 400),
            (PathBuf::from("/downloads-old"), 10, 10),
        ]
    }

    #[test]
    fn picks_longest_matching_mount() {
        let disk = disk_for_path(&mounts(), Path::new("/downloads/complete")).expect("disk");

        assert_eq!(disk.mount, "/downloads");
        assert_eq!(disk.used_bytes, 3600);
        assert!((disk.usage_percent - 90.0).abs() < 1e-9);
    }

    #[test]
    fn sibling_prefix_is_not_a_match() {
        let disk = disk_for_path(&mounts(), Path::new("/downloads-new")).expect("disk");

        assert_eq!(disk.mount, "/");
    }

    #[test]
    fn no_mounts_means_no_disk() {
        assert!(disk_for_path(&[], Path::new("/data")).is_none());
    }

    #[tokio::test]
    async fn samples_local_host() {
        let collector = HostCollector::new("/");

        let host = collector.collect().await.expect("sample");

        assert!(host.memory_total_bytes > 0);
        assert!(host.memory_used_bytes <= host.memory_total_bytes);
    }

    #[tokio::test]
    async fn held_handle_reports_busy() {
        let collector = HostCollector::new("/");
        let _held = collector.system.lock();

        let err = collector.collect().await.expect_err("busy");

        assert!(matches!(err, CollectError::Busy));
    }
}
