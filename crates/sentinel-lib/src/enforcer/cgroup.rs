//! cgroup v2 limit enforcement

use super::{
    format_cpu_max, format_io_max, format_memory_max, AppliedLimit, AtomicFileWriter, DryRunWriter,
    LimitWriter, ResourceEnforcer,
};
use crate::error::{AgentError, Result};
use crate::sampler::CgroupV2Sampler;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Enforcer writing cgroup v2 control files under `cgroup_root`
pub struct CgroupEnforcer {
    cgroup_root: PathBuf,
    writer: Arc<dyn LimitWriter>,
    /// Block device for io.max; discovered from io.stat when unset
    io_device: Option<String>,
}

impl CgroupEnforcer {
    /// Create an enforcer that performs real writes
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self::with_writer(cgroup_root, Arc::new(AtomicFileWriter))
    }

    /// Create an enforcer that only records intended writes
    pub fn dry_run(cgroup_root: impl Into<PathBuf>) -> (Self, Arc<DryRunWriter>) {
        let writer = Arc::new(DryRunWriter::new());
        (Self::with_writer(cgroup_root, writer.clone()), writer)
    }

    pub fn with_writer(cgroup_root: impl Into<PathBuf>, writer: Arc<dyn LimitWriter>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            writer,
            io_device: None,
        }
    }

    /// Pin io.max writes to one `major:minor` device
    pub fn with_io_device(mut self, device: impl Into<String>) -> Self {
        self.io_device = Some(device.into());
        self
    }

    pub fn is_dry_run(&self) -> bool {
        self.writer.is_dry_run()
    }

    fn workload_path(&self, workload: &str) -> PathBuf {
        let relative = workload.trim_start_matches('/');
        if relative.is_empty() || relative == "." {
            return self.cgroup_root.clone();
        }
        self.cgroup_root.join(relative)
    }

    fn commit(&self, target: PathBuf, value: String) -> Result<AppliedLimit> {
        self.writer.write(&target, &value)?;
        debug!(
            path = %target.display(),
            value = %value,
            dry_run = self.is_dry_run(),
            "Limit committed"
        );
        Ok(AppliedLimit {
            target,
            value,
            dry_run: self.is_dry_run(),
        })
    }

    /// Devices the io.max write applies to
    fn io_devices(&self, workload_path: &Path) -> Vec<String> {
        if let Some(device) = &self.io_device {
            return vec![device.clone()];
        }
        std::fs::read_to_string(workload_path.join("io.stat"))
            .map(|content| CgroupV2Sampler::parse_io_devices(&content))
            .unwrap_or_default()
    }
}

impl ResourceEnforcer for CgroupEnforcer {
    fn set_cpu_limit(
        &self,
        workload: &str,
        quota_usec: Option<u64>,
        period_usec: u64,
    ) -> Result<AppliedLimit> {
        let target = self.workload_path(workload).join("cpu.max");
        self.commit(target, format_cpu_max(quota_usec, period_usec))
    }

    fn set_memory_limit(&self, workload: &str, bytes: Option<u64>) -> Result<AppliedLimit> {
        let target = self.workload_path(workload).join("memory.max");
        self.commit(target, format_memory_max(bytes))
    }

    fn set_io_limit(&self, workload: &str, bytes_per_sec: Option<u64>) -> Result<AppliedLimit> {
        let workload_path = self.workload_path(workload);
        let target = workload_path.join("io.max");
        let devices = self.io_devices(&workload_path);

        if devices.is_empty() {
            return Err(AgentError::Unrepresentable {
                path: target,
                reason: "no block device configured or listed in io.stat".to_string(),
            });
        }

        // All device lines go out in a single commit
        let value = devices
            .iter()
            .map(|device| format_io_max(device, bytes_per_sec))
            .collect::<Vec<_>>()
            .join("\n");
        self.commit(target, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn workload_dir(temp_dir: &TempDir, workload: &str) -> PathBuf {
        let path = temp_dir.path().join(workload);
        fs::create_dir_all(&path).unwrap();
        path
    }

    #[test]
    fn test_set_cpu_limit_writes_quota_and_period() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "docker/web");
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        let applied = enforcer.set_cpu_limit("docker/web", Some(240_000), 100_000).unwrap();

        assert_eq!(applied.value, "240000 100000");
        assert!(!applied.dry_run);
        assert_eq!(fs::read_to_string(path.join("cpu.max")).unwrap(), "240000 100000");
    }

    #[test]
    fn test_clear_cpu_limit_is_idempotent() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        let first = enforcer.set_cpu_limit("web", None, 100_000).unwrap();
        let on_disk_first = fs::read_to_string(path.join("cpu.max")).unwrap();
        let second = enforcer.set_cpu_limit("web", None, 100_000).unwrap();
        let on_disk_second = fs::read_to_string(path.join("cpu.max")).unwrap();

        assert_eq!(first, second);
        assert_eq!(on_disk_first, "max");
        assert_eq!(on_disk_first, on_disk_second);
    }

    #[test]
    fn test_zero_quota_clamped() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        enforcer.set_cpu_limit("web", Some(0), 100_000).unwrap();
        assert_eq!(fs::read_to_string(path.join("cpu.max")).unwrap(), "1 100000");
    }

    #[test]
    fn test_set_memory_limit() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        enforcer.set_memory_limit("web", Some(536870912)).unwrap();
        assert_eq!(fs::read_to_string(path.join("memory.max")).unwrap(), "536870912");

        enforcer.set_memory_limit("web", None).unwrap();
        assert_eq!(fs::read_to_string(path.join("memory.max")).unwrap(), "max");
    }

    #[test]
    fn test_write_failure_for_missing_workload() {
        let temp_dir = TempDir::new().unwrap();
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        let err = enforcer.set_cpu_limit("gone", Some(1000), 100_000).unwrap_err();
        assert!(matches!(err, AgentError::WriteFailure { .. }));
    }

    #[test]
    fn test_io_limit_with_pinned_device() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        let enforcer = CgroupEnforcer::new(temp_dir.path()).with_io_device("8:0");

        let applied = enforcer.set_io_limit("web", Some(52428800)).unwrap();

        assert_eq!(applied.value, "8:0 rbps=52428800 wbps=52428800");
        assert_eq!(
            fs::read_to_string(path.join("io.max")).unwrap(),
            "8:0 rbps=52428800 wbps=52428800"
        );
    }

    #[test]
    fn test_io_limit_discovers_devices() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        fs::write(
            path.join("io.stat"),
            "8:0 rbytes=1 wbytes=2\n259:0 rbytes=3 wbytes=4\n",
        )
        .unwrap();
        let (enforcer, journal) = CgroupEnforcer::dry_run(temp_dir.path());

        let applied = enforcer.set_io_limit("web", None).unwrap();

        assert!(applied.dry_run);
        assert_eq!(applied.value, "8:0 rbps=max wbps=max\n259:0 rbps=max wbps=max");
        assert_eq!(journal.journal().len(), 1);
        assert!(!path.join("io.max").exists());
    }

    #[test]
    fn test_io_limit_keeps_every_device_on_disk() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        fs::write(
            path.join("io.stat"),
            "8:0 rbytes=1 wbytes=2\n259:0 rbytes=3 wbytes=4\n",
        )
        .unwrap();
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        let applied = enforcer.set_io_limit("web", Some(52428800)).unwrap();
        let on_disk = fs::read_to_string(path.join("io.max")).unwrap();

        assert_eq!(
            on_disk,
            "8:0 rbps=52428800 wbps=52428800\n259:0 rbps=52428800 wbps=52428800"
        );
        assert_eq!(applied.value, on_disk);
    }

    #[test]
    fn test_io_limit_without_device_is_unrepresentable() {
        let temp_dir = TempDir::new().unwrap();
        workload_dir(&temp_dir, "web");
        let enforcer = CgroupEnforcer::new(temp_dir.path());

        let err = enforcer.set_io_limit("web", None).unwrap_err();
        assert!(matches!(err, AgentError::Unrepresentable { .. }));
    }

    #[test]
    fn test_dry_run_reports_intended_value() {
        let temp_dir = TempDir::new().unwrap();
        let path = workload_dir(&temp_dir, "web");
        let (enforcer, journal) = CgroupEnforcer::dry_run(temp_dir.path());

        let applied = enforcer.set_cpu_limit("web", Some(1000), 100_000).unwrap();

        assert!(applied.dry_run);
        assert_eq!(applied.value, "1000 100000");
        assert!(!path.join("cpu.max").exists());
        assert_eq!(journal.last_value(&path.join("cpu.max")), Some("1000 100000".to_string()));
    }
}
