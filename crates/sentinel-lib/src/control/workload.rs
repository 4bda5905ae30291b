//! Per-workload control state and the registry of tracked workloads

use crate::models::{Sample, TrustAssessment, WorkloadId};
use crate::sampler::{container_id_hint, History};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::debug;

/// Everything the loop remembers about one workload between ticks
#[derive(Debug)]
pub struct WorkloadState {
    /// CPU demand readings in CPU-usec per second
    pub history: History,
    /// Previous reading, the baseline for the next rate
    pub last_sample: Option<Sample>,
    pub last_forecast: Option<f64>,
    /// Forecast that overran its budget and is still running
    pub pending_forecast: Option<JoinHandle<f64>>,
    /// Cached assessment, refreshed every few ticks
    pub trust: Option<TrustAssessment>,
    /// Runtime id used for security lookups
    pub container_id: Option<String>,
    /// Last `cpu.max` value this loop wrote
    pub cpu_limit: Option<String>,
    /// True while this loop holds an I/O cap on the workload
    pub io_capped: bool,
    /// Completed evaluations
    pub ticks: u64,
}

impl WorkloadState {
    pub fn new(workload: &str) -> Self {
        Self {
            history: History::new(),
            last_sample: None,
            last_forecast: None,
            pending_forecast: None,
            trust: None,
            container_id: container_id_hint(workload),
            cpu_limit: None,
            io_capped: false,
            ticks: 0,
        }
    }

    /// True when the security feed should be queried this evaluation
    pub fn security_due(&self, refresh_every: u64) -> bool {
        self.trust.is_none() || self.ticks % refresh_every.max(1) == 0
    }
}

/// Workloads under control, each behind its own lock.
///
/// The map lock is only held to look up or insert entries; evaluations
/// hold the per-workload mutex, so independent workloads never wait on
/// each other.
#[derive(Debug, Default)]
pub struct WorkloadRegistry {
    workloads: DashMap<WorkloadId, Arc<Mutex<WorkloadState>>>,
}

impl WorkloadRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a workload. Returns false if it was already tracked.
    pub fn register(&self, workload: impl Into<WorkloadId>) -> bool {
        let workload = workload.into();
        if self.workloads.contains_key(&workload) {
            return false;
        }
        debug!(workload = %workload, "Registering workload");
        let state = WorkloadState::new(&workload);
        self.workloads
            .insert(workload, Arc::new(Mutex::new(state)));
        true
    }

    /// Start tracking a workload whose runtime container id is known
    pub fn register_container(
        &self,
        workload: impl Into<WorkloadId>,
        container_id: impl Into<String>,
    ) {
        let workload = workload.into();
        let mut state = WorkloadState::new(&workload);
        state.container_id = Some(container_id.into());
        debug!(
            workload = %workload,
            container_id = ?state.container_id,
            "Registering container workload"
        );
        self.workloads
            .insert(workload, Arc::new(Mutex::new(state)));
    }

    /// Stop tracking a workload
    pub fn unregister(&self, workload: &str) -> bool {
        debug!(workload = %workload, "Unregistering workload");
        self.workloads.remove(workload).is_some()
    }

    /// Lock handle for one workload
    pub fn handle(&self, workload: &str) -> Option<Arc<Mutex<WorkloadState>>> {
        self.workloads.get(workload).map(|entry| Arc::clone(entry.value()))
    }

    /// Tracked workloads in a stable order
    pub fn ids(&self) -> Vec<WorkloadId> {
        let mut ids: Vec<WorkloadId> = self.workloads.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn contains(&self, workload: &str) -> bool {
        self.workloads.contains_key(workload)
    }

    pub fn len(&self) -> usize {
        self.workloads.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workloads.is_empty()
    }
}
