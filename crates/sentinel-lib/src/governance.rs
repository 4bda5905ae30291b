//! Quarantine governance
//!
//! Per-workload state machine combining the demand forecast with the trust
//! score. Governance is the only component allowed to override normal
//! scaling: whenever [`GovernanceAction::took_action`] is true the control
//! loop must not apply its own CPU decision in the same tick.
//!
//! Transitions, in precedence order:
//! 1. `Normal -> Quarantined` when trust is below the threshold and the
//!    forecast exceeds the high-load mark; a severe CPU cap is written.
//! 2. `Quarantined -> Normal` when trust recovers, regardless of load; the
//!    CPU limit is cleared.
//! 3. Otherwise no transition. A quarantined workload that is still
//!    untrusted is held, so default scaling never lifts its cap.

use crate::enforcer::{AppliedLimit, ResourceEnforcer, DEFAULT_CPU_PERIOD_USEC};
use crate::error::{AgentError, Result};
use crate::models::{QuarantineState, TrustAssessment, WorkloadId};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Thresholds of the quarantine policy
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GovernancePolicy {
    /// Trust scores strictly below this are untrusted
    pub trust_threshold: u8,
    /// Forecast (CPU-usec per second) above which an untrusted workload is quarantined
    pub high_load: f64,
    /// CPU quota per period applied while quarantined
    pub quarantine_quota_usec: u64,
    pub period_usec: u64,
}

impl Default for GovernancePolicy {
    fn default() -> Self {
        Self {
            trust_threshold: 50,
            high_load: 500_000.0,
            // 1% of the default period
            quarantine_quota_usec: DEFAULT_CPU_PERIOD_USEC / 100,
            period_usec: DEFAULT_CPU_PERIOD_USEC,
        }
    }
}

impl GovernancePolicy {
    pub fn validate(&self) -> Result<()> {
        if self.trust_threshold == 0 || self.trust_threshold > 100 {
            return Err(AgentError::config("trust_threshold must be within 1..=100"));
        }
        if !self.high_load.is_finite() || self.high_load < 0.0 {
            return Err(AgentError::config("high_load must be a non-negative number"));
        }
        if self.quarantine_quota_usec == 0 || self.quarantine_quota_usec > self.period_usec {
            return Err(AgentError::config(
                "quarantine_quota_usec must be within 1..=period_usec",
            ));
        }
        Ok(())
    }
}

/// What governance did for a workload this tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernanceAction {
    /// No policy applies; default scaling runs
    None,
    /// Workload entered quarantine and the severe cap was written
    Quarantined(AppliedLimit),
    /// Workload left quarantine and its CPU limit was cleared
    Released(AppliedLimit),
    /// Workload stays quarantined; its cap is left untouched
    Holding,
    /// A transition was due but its write failed; retried next tick
    Deferred(String),
}

impl GovernanceAction {
    /// True when governance owns this tick's CPU decision
    pub fn took_action(&self) -> bool {
        !matches!(self, GovernanceAction::None)
    }
}

/// Quarantine policy engine
pub struct GovernanceEngine {
    enforcer: Arc<dyn ResourceEnforcer>,
    policy: GovernancePolicy,
    states: DashMap<WorkloadId, QuarantineState>,
}

impl GovernanceEngine {
    pub fn new(enforcer: Arc<dyn ResourceEnforcer>, policy: GovernancePolicy) -> Self {
        Self {
            enforcer,
            policy,
            states: DashMap::new(),
        }
    }

    pub fn policy(&self) -> &GovernancePolicy {
        &self.policy
    }

    /// Evaluate the policy for one workload.
    ///
    /// Callers must not evaluate the same workload concurrently; the control
    /// loop guarantees this with its per-workload lock.
    pub fn evaluate(
        &self,
        workload: &str,
        forecast: f64,
        trust: &TrustAssessment,
    ) -> GovernanceAction {
        let current = *self
            .states
            .entry(workload.to_string())
            .or_insert(QuarantineState::Normal);
        let untrusted = trust.score < self.policy.trust_threshold;

        match current {
            QuarantineState::Normal if untrusted && forecast > self.policy.high_load => {
                match self.enforcer.set_cpu_limit(
                    workload,
                    Some(self.policy.quarantine_quota_usec),
                    self.policy.period_usec,
                ) {
                    Ok(applied) => {
                        self.states.insert(workload.to_string(), QuarantineState::Quarantined);
                        warn!(
                            event = "workload_quarantined",
                            workload = %workload,
                            trust_score = trust.score,
                            forecast = forecast,
                            risks = ?trust.risks,
                            limit = %applied.value,
                            "Quarantining high-risk workload under high load"
                        );
                        GovernanceAction::Quarantined(applied)
                    }
                    Err(e) => {
                        warn!(
                            workload = %workload,
                            error = %e,
                            "Quarantine cap could not be applied"
                        );
                        GovernanceAction::Deferred(e.to_string())
                    }
                }
            }
            QuarantineState::Quarantined if !untrusted => {
                match self
                    .enforcer
                    .set_cpu_limit(workload, None, self.policy.period_usec)
                {
                    Ok(applied) => {
                        self.states.insert(workload.to_string(), QuarantineState::Normal);
                        info!(
                            event = "workload_released",
                            workload = %workload,
                            trust_score = trust.score,
                            "Trust recovered, releasing workload from quarantine"
                        );
                        GovernanceAction::Released(applied)
                    }
                    Err(e) => {
                        warn!(
                            workload = %workload,
                            error = %e,
                            "Quarantine release could not be applied"
                        );
                        GovernanceAction::Deferred(e.to_string())
                    }
                }
            }
            QuarantineState::Quarantined => GovernanceAction::Holding,
            QuarantineState::Normal => GovernanceAction::None,
        }
    }

    /// Current state of a workload; unknown workloads are `Normal`
    pub fn state(&self, workload: &str) -> QuarantineState {
        self.states
            .get(workload)
            .map(|s| *s)
            .unwrap_or_default()
    }

    /// Workloads currently quarantined
    pub fn quarantined(&self) -> Vec<WorkloadId> {
        self.states
            .iter()
            .filter(|entry| *entry.value() == QuarantineState::Quarantined)
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of workloads governance has evaluated
    pub fn tracked(&self) -> usize {
        self.states.len()
    }
}
