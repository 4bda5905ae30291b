//! Mapping between runtime container ids and control-group paths

use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;
use tracing::debug;

/// Maps an external container identifier to a control-group path
#[async_trait]
pub trait WorkloadResolver: Send + Sync {
    /// Resolve `container_id` to a path relative to the cgroup root.
    /// Returns `None` when no mapping exists.
    async fn resolve(&self, container_id: &str) -> Option<String>;
}

/// Resolver probing the layouts used by Docker and containerd under systemd
pub struct CgroupPathResolver {
    cgroup_root: PathBuf,
}

impl CgroupPathResolver {
    pub fn new(cgroup_root: impl Into<PathBuf>) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
        }
    }

    /// Candidate relative paths for a container id, most specific first
    pub fn candidates(container_id: &str) -> Vec<String> {
        vec![
            format!("docker/{container_id}"),
            container_id.to_string(),
            format!("system.slice/docker-{container_id}.scope"),
            format!("system.slice/containerd-{container_id}.scope"),
        ]
    }
}

#[async_trait]
impl WorkloadResolver for CgroupPathResolver {
    async fn resolve(&self, container_id: &str) -> Option<String> {
        for candidate in Self::candidates(container_id) {
            if fs::metadata(self.cgroup_root.join(&candidate)).await.is_ok() {
                debug!(
                    container_id = %container_id,
                    cgroup_path = %candidate,
                    "Resolved container"
                );
                return Some(candidate);
            }
        }
        None
    }
}

/// Derive the runtime container id from a control-group path.
/// Handles various container runtime formats:
/// - Docker: /docker/<container_id>
/// - systemd scopes: /system.slice/docker-<container_id>.scope
/// - CRI-O: /kubepods.slice/.../crio-<container_id>.scope
pub fn container_id_hint(cgroup_path: &str) -> Option<String> {
    let path_parts: Vec<&str> = cgroup_path.split('/').filter(|p| !p.is_empty()).collect();

    for part in path_parts.iter().rev() {
        let unscoped = part.strip_suffix(".scope").unwrap_or(part);
        for prefix in ["docker-", "containerd-", "cri-containerd-", "crio-"] {
            if let Some(id) = unscoped.strip_prefix(prefix) {
                if is_container_id(id) {
                    return Some(id.to_string());
                }
            }
        }

        if is_container_id(part) {
            return Some(part.to_string());
        }
    }

    // Fallback: use the last non-empty path component
    path_parts
        .last()
        .filter(|p| **p != ".")
        .map(|s| s.to_string())
}

fn is_container_id(candidate: &str) -> bool {
    candidate.len() == 64 && candidate.chars().all(|c| c.is_ascii_hexdigit())
}
