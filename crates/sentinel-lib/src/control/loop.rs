//! Control loop
//!
//! Every tick samples each tracked workload, forecasts its CPU demand,
//! refreshes its trust assessment when due, lets governance decide and,
//! when governance stays out, applies default predictive scaling.

use super::workload::{WorkloadRegistry, WorkloadState};
use crate::enforcer::{AppliedLimit, ResourceEnforcer};
use crate::error::{AgentError, Result};
use crate::governance::{GovernanceAction, GovernanceEngine, GovernancePolicy};
use crate::health::{components, ComponentHealth, HealthRegistry};
use crate::models::{QuarantineState, TelemetryReport, TrustAssessment, WorkloadId};
use crate::observability::{AgentMetrics, StructuredLogger};
use crate::predictor::{DemandPredictor, MovingAveragePredictor, DEFAULT_WINDOW};
use crate::sampler::UsageSampler;
use crate::security::{SecurityFeed, UnavailableSecurityFeed};
use crate::telemetry::{NullTelemetrySink, TelemetrySink};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, Semaphore};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

const MIB: u64 = 1024 * 1024;

/// Consecutive ticks in which every write failed before the enforcer is unhealthy
const ENFORCER_UNHEALTHY_AFTER: u32 = 3;

/// Configuration for the control loop
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Tick interval (default: 5 seconds)
    pub interval: Duration,
    /// Forecast (CPU-usec per second) above which a quota is applied
    pub scaling_threshold: f64,
    /// Multiplier applied to the forecast when sizing the quota
    pub safety_margin: f64,
    /// Quarantine thresholds and CPU period
    pub governance: GovernancePolicy,
    /// Query the security feed every N evaluations of a workload
    pub security_refresh_every: u64,
    /// Trust score assumed while the security feed is unavailable
    pub unavailable_trust_score: u8,
    /// I/O rate in bytes per second above which throughput is capped
    pub io_rate_threshold: f64,
    /// Cap applied to read and write throughput, bytes per second
    pub io_fallback_rate: u64,
    /// Maximum time one forecast may take
    pub predict_budget: Duration,
    /// Maximum time one workload evaluation may take
    pub workload_timeout: Duration,
    /// Workloads evaluated concurrently
    pub max_concurrency: usize,
    /// Forecast horizon in ticks
    pub horizon: usize,
    /// Window of the moving-average fallback
    pub baseline_window: usize,
    pub node_id: String,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            scaling_threshold: 2_000_000.0,
            safety_margin: 1.2,
            governance: GovernancePolicy::default(),
            security_refresh_every: 10,
            unavailable_trust_score: 100,
            io_rate_threshold: (100 * MIB) as f64,
            io_fallback_rate: 50 * MIB,
            predict_budget: Duration::from_millis(50),
            workload_timeout: Duration::from_secs(2),
            max_concurrency: 8,
            horizon: 1,
            baseline_window: DEFAULT_WINDOW,
            node_id: "local".to_string(),
        }
    }
}

impl ControlConfig {
    /// Check thresholds before the loop starts
    pub fn validate(&self) -> Result<()> {
        if self.interval.is_zero() {
            return Err(AgentError::config("interval must be greater than zero"));
        }
        if !self.scaling_threshold.is_finite() || self.scaling_threshold < 0.0 {
            return Err(AgentError::config("scaling_threshold must be a non-negative number"));
        }
        if !self.safety_margin.is_finite() || self.safety_margin < 1.0 {
            return Err(AgentError::config("safety_margin must be at least 1.0"));
        }
        if self.security_refresh_every == 0 {
            return Err(AgentError::config("security_refresh_every must be at least 1"));
        }
        if self.unavailable_trust_score > 100 {
            return Err(AgentError::config("unavailable_trust_score must be within 0..=100"));
        }
        if !self.io_rate_threshold.is_finite() || self.io_rate_threshold <= 0.0 {
            return Err(AgentError::config("io_rate_threshold must be greater than zero"));
        }
        if self.io_fallback_rate == 0 {
            return Err(AgentError::config("io_fallback_rate must be greater than zero"));
        }
        if self.predict_budget.is_zero() || self.workload_timeout.is_zero() {
            return Err(AgentError::config(
                "predict_budget and workload_timeout must be greater than zero",
            ));
        }
        if self.max_concurrency == 0 {
            return Err(AgentError::config("max_concurrency must be at least 1"));
        }
        if self.horizon == 0 || self.baseline_window == 0 {
            return Err(AgentError::config("horizon and baseline_window must be at least 1"));
        }
        if self.node_id.trim().is_empty() {
            return Err(AgentError::config("node_id must not be empty"));
        }
        self.governance.validate()
    }
}

/// CPU quota granting at least `forecast × safety_margin` CPU-usec per second
pub fn cpu_quota_for(forecast: f64, safety_margin: f64, period_usec: u64) -> u64 {
    let quota = (forecast * safety_margin * period_usec as f64 / 1_000_000.0).ceil();
    if quota.is_finite() && quota >= 1.0 {
        quota as u64
    } else {
        1
    }
}

/// Where this evaluation's trust assessment came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedStatus {
    Cached,
    Fresh,
    /// The feed failed and the neutral assessment was substituted
    Unavailable,
}

/// Result of evaluating one workload
#[derive(Debug, Clone)]
pub struct WorkloadOutcome {
    pub forecast: f64,
    pub trust_score: u8,
    pub feed: FeedStatus,
    pub governance: GovernanceAction,
    /// Limit written by default scaling, only when governance stayed out
    pub cpu_limit: Option<AppliedLimit>,
    pub io_limit: Option<AppliedLimit>,
    pub write_failures: usize,
    /// No counter could be read
    pub blind: bool,
    pub predictor_fallback: bool,
}

/// Summary of one tick
#[derive(Debug, Default)]
pub struct TickReport {
    pub evaluated: usize,
    /// Still in flight from an earlier tick, or no evaluation slot
    pub skipped: usize,
    pub timed_out: usize,
    pub quarantined: usize,
    pub released: usize,
    pub write_failures: usize,
    /// Evaluated workloads with at least one failed write
    pub failing_workloads: usize,
    pub blind: usize,
    pub outcomes: BTreeMap<WorkloadId, WorkloadOutcome>,
}

impl TickReport {
    pub fn outcome(&self, workload: &str) -> Option<&WorkloadOutcome> {
        self.outcomes.get(workload)
    }

    fn record(&mut self, workload: WorkloadId, outcome: WorkloadOutcome) {
        self.evaluated += 1;
        self.write_failures += outcome.write_failures;
        if outcome.write_failures > 0 {
            self.failing_workloads += 1;
        }
        if outcome.blind {
            self.blind += 1;
        }
        match outcome.governance {
            GovernanceAction::Quarantined(_) => self.quarantined += 1,
            GovernanceAction::Released(_) => self.released += 1,
            _ => {}
        }
        self.outcomes.insert(workload, outcome);
    }

    fn any_feed(&self, status: FeedStatus) -> bool {
        self.outcomes.values().any(|o| o.feed == status)
    }
}

/// Collaborators shared by every evaluation task
struct ControlContext {
    sampler: Arc<dyn UsageSampler>,
    predictor: Arc<dyn DemandPredictor>,
    baseline: MovingAveragePredictor,
    enforcer: Arc<dyn ResourceEnforcer>,
    governance: Arc<GovernanceEngine>,
    security: Arc<dyn SecurityFeed>,
    telemetry: Arc<dyn TelemetrySink>,
    registry: Arc<WorkloadRegistry>,
    config: ControlConfig,
    metrics: AgentMetrics,
    logger: StructuredLogger,
    health: Option<HealthRegistry>,
    permits: Arc<Semaphore>,
    /// Consecutive ticks in which no workload could be enforced
    enforcer_failure_streak: AtomicU32,
}

/// Per-node control loop
pub struct ControlLoop {
    ctx: Arc<ControlContext>,
}

impl ControlLoop {
    pub fn registry(&self) -> &Arc<WorkloadRegistry> {
        &self.ctx.registry
    }

    pub fn governance(&self) -> &Arc<GovernanceEngine> {
        &self.ctx.governance
    }

    pub fn config(&self) -> &ControlConfig {
        &self.ctx.config
    }

    /// Tick until a shutdown signal arrives.
    ///
    /// A tick in progress always completes; evaluations that outlived their
    /// timeout are awaited before returning.
    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        info!(
            interval_secs = self.ctx.config.interval.as_secs_f64(),
            workloads = self.ctx.registry.len(),
            predictor = %self.ctx.predictor.name(),
            "Starting control loop"
        );

        let predictor_status = match &self.ctx.health {
            Some(health) => health.component(components::PREDICTOR).await,
            None => None,
        };

        let mut ticker = interval(self.ctx.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut tick_count = 0u64;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let start = Instant::now();
                    let report = self.run_tick().await;
                    self.update_health(&report, predictor_status.as_ref()).await;
                    tick_count += 1;

                    // Every minute at the default interval
                    if tick_count % 12 == 0 {
                        self.ctx.logger.log_tick(
                            report.evaluated,
                            report.skipped,
                            report.timed_out,
                            start.elapsed().as_millis(),
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("Shutting down control loop");
                    break;
                }
            }
        }

        self.drain().await;
    }

    /// Evaluate every tracked workload once
    pub async fn run_tick(&self) -> TickReport {
        let ctx = &self.ctx;
        let start = Instant::now();
        let mut report = TickReport::default();
        let mut pending = Vec::new();

        for workload in ctx.registry.ids() {
            let Some(handle) = ctx.registry.handle(&workload) else {
                continue;
            };
            let Ok(mut state) = handle.try_lock_owned() else {
                debug!(workload = %workload, "Previous evaluation still in flight, skipping");
                report.skipped += 1;
                continue;
            };
            let permit = match tokio::time::timeout(
                ctx.config.workload_timeout,
                Arc::clone(&ctx.permits).acquire_owned(),
            )
            .await
            {
                Ok(Ok(permit)) => permit,
                _ => {
                    warn!(workload = %workload, "No evaluation slot available, skipping");
                    report.skipped += 1;
                    continue;
                }
            };

            let deadline = Instant::now() + ctx.config.workload_timeout;
            let task_ctx = Arc::clone(ctx);
            let task_workload = workload.clone();
            // Holds the workload lock and the slot until the evaluation ends,
            // even after the tick has stopped waiting for it
            let task = tokio::spawn(async move {
                let _permit = permit;
                task_ctx.evaluate(&task_workload, &mut state).await
            });
            pending.push((workload, deadline, task));
        }

        for (workload, deadline, task) in pending {
            match tokio::time::timeout_at(deadline, task).await {
                Ok(Ok(outcome)) => report.record(workload, outcome),
                Ok(Err(e)) => {
                    warn!(workload = %workload, error = %e, "Workload evaluation aborted");
                    report.skipped += 1;
                }
                Err(_) => {
                    warn!(
                        workload = %workload,
                        timeout_ms = ctx.config.workload_timeout.as_millis(),
                        "Workload evaluation timed out, retrying next tick"
                    );
                    ctx.metrics.inc_workload_timeouts();
                    report.timed_out += 1;
                }
            }
        }

        ctx.metrics.set_workloads_tracked(ctx.registry.len() as i64);
        ctx.metrics
            .set_workloads_quarantined(ctx.governance.quarantined().len() as i64);
        ctx.metrics.observe_tick_latency(start.elapsed().as_secs_f64());

        report
    }

    /// Reflect a tick's outcome in component health.
    ///
    /// `predictor_status` is the status recorded at startup, restored once
    /// the predictor meets its budget again.
    pub(crate) async fn update_health(
        &self,
        report: &TickReport,
        predictor_status: Option<&ComponentHealth>,
    ) {
        let Some(health) = &self.ctx.health else {
            return;
        };

        if report.evaluated > 0 {
            if report.blind == report.evaluated {
                health
                    .set_degraded(components::SAMPLER, "no counters readable for any workload")
                    .await;
            } else {
                health.set_healthy(components::SAMPLER).await;
            }
        }

        let streak = &self.ctx.enforcer_failure_streak;
        if report.evaluated > 0 && report.failing_workloads == report.evaluated {
            let ticks = streak.fetch_add(1, Ordering::Relaxed) + 1;
            let message =
                format!("limit writes failed for every workload in {ticks} consecutive ticks");
            if ticks >= ENFORCER_UNHEALTHY_AFTER {
                health.set_unhealthy(components::ENFORCER, message).await;
            } else {
                health.set_degraded(components::ENFORCER, message).await;
            }
        } else if report.write_failures > 0 {
            streak.store(0, Ordering::Relaxed);
            health
                .set_degraded(
                    components::ENFORCER,
                    format!("{} limit writes failed in the last tick", report.write_failures),
                )
                .await;
        } else {
            streak.store(0, Ordering::Relaxed);
            health.set_healthy(components::ENFORCER).await;
        }

        if report.any_feed(FeedStatus::Unavailable) {
            health
                .set_degraded(
                    components::SECURITY_FEED,
                    "security feed unavailable, using neutral trust",
                )
                .await;
        } else if report.any_feed(FeedStatus::Fresh) {
            health.set_healthy(components::SECURITY_FEED).await;
        }

        if report.outcomes.values().any(|o| o.predictor_fallback) {
            health
                .set_degraded(components::PREDICTOR, "predictor exceeded its budget")
                .await;
        } else if let Some(status) = predictor_status {
            health.update(components::PREDICTOR, status.clone()).await;
        }
    }

    /// Wait for evaluations that outlived their tick
    async fn drain(&self) {
        let slots = self.ctx.config.max_concurrency as u32;
        let all_slots = self.ctx.permits.acquire_many(slots);
        match tokio::time::timeout(self.ctx.config.workload_timeout, all_slots).await {
            Ok(_) => debug!("All workload evaluations finished"),
            Err(_) => warn!("Workload evaluations still running at shutdown"),
        }
    }
}

impl ControlContext {
    async fn evaluate(&self, workload: &str, state: &mut WorkloadState) -> WorkloadOutcome {
        let sample = self.sampler.sample(workload).await;
        let blind = sample.is_blind();
        if blind {
            self.metrics.inc_sampler_degraded();
            debug!(workload = %workload, "No counters readable this tick");
        }

        let (cpu_rate, io_rate) = match &state.last_sample {
            Some(previous) => (sample.cpu_rate_since(previous), sample.io_rate_since(previous)),
            None => (None, None),
        };
        if let Some(rate) = cpu_rate {
            state.history.push(rate);
        }

        let (forecast, predictor_fallback) = self.forecast(state).await;
        state.last_forecast = Some(forecast);

        let (trust, feed) = self.trust(workload, state).await;

        let mut outcome = WorkloadOutcome {
            forecast,
            trust_score: trust.score,
            feed,
            governance: GovernanceAction::None,
            cpu_limit: None,
            io_limit: None,
            write_failures: 0,
            blind,
            predictor_fallback,
        };

        let governance = Arc::clone(&self.governance);
        let target = workload.to_string();
        let action =
            tokio::task::spawn_blocking(move || governance.evaluate(&target, forecast, &trust))
                .await
                .unwrap_or_else(|e| GovernanceAction::Deferred(e.to_string()));

        match &action {
            GovernanceAction::Quarantined(applied) | GovernanceAction::Released(applied) => {
                self.record_write(workload, "cpu", applied);
                state.cpu_limit = Some(applied.value.clone());
            }
            GovernanceAction::Deferred(_) => {
                self.metrics.inc_limit_write("cpu", "failed");
                outcome.write_failures += 1;
            }
            GovernanceAction::None | GovernanceAction::Holding => {}
        }

        if !action.took_action() {
            let period = self.config.governance.period_usec;
            let quota = (forecast > self.config.scaling_threshold)
                .then(|| cpu_quota_for(forecast, self.config.safety_margin, period));

            let apply = move |enforcer: &dyn ResourceEnforcer, w: &str| {
                enforcer.set_cpu_limit(w, quota, period)
            };
            match self.enforce(workload, "cpu", apply).await {
                Ok(applied) => {
                    if state.cpu_limit.as_deref() != Some(applied.value.as_str()) {
                        self.logger
                            .log_limit_applied(workload, "cpu", &applied.value, applied.dry_run);
                        state.cpu_limit = Some(applied.value.clone());
                    }
                    outcome.cpu_limit = Some(applied);
                }
                Err(_) => outcome.write_failures += 1,
            }
        }
        outcome.governance = action;

        if let Some(rate) = io_rate {
            let over = rate > self.config.io_rate_threshold;
            if over != state.io_capped {
                let limit = over.then_some(self.config.io_fallback_rate);
                match self
                    .enforce(workload, "io", move |enforcer, w| enforcer.set_io_limit(w, limit))
                    .await
                {
                    Ok(applied) => {
                        self.logger
                            .log_limit_applied(workload, "io", &applied.value, applied.dry_run);
                        state.io_capped = over;
                        outcome.io_limit = Some(applied);
                    }
                    Err(_) => outcome.write_failures += 1,
                }
            }
        }

        let report = TelemetryReport {
            node_id: self.config.node_id.clone(),
            workload: workload.to_string(),
            cpu_usage: sample.cpu_usage_usec.unwrap_or(0),
            cpu_rate,
            memory_bytes: sample.memory_bytes.unwrap_or(0),
            prediction: forecast,
            quarantined: self.governance.state(workload) == QuarantineState::Quarantined,
            timestamp: sample.timestamp,
        };
        self.push_telemetry(report);

        state.last_sample = Some(sample);
        state.ticks += 1;
        outcome
    }

    /// Forecast off the runtime, bounded by the prediction budget.
    ///
    /// A call that overruns keeps its blocking thread until it returns; no
    /// further call is made for the workload while it is still running.
    async fn forecast(&self, state: &mut WorkloadState) -> (f64, bool) {
        let horizon = self.config.horizon;

        let reason = match state.pending_forecast.take() {
            Some(pending) if !pending.is_finished() => {
                state.pending_forecast = Some(pending);
                "previous forecast still running".to_string()
            }
            // A late result was computed from stale history and is dropped
            _ => {
                let history = state.history.snapshot();
                let predictor = Arc::clone(&self.predictor);
                let start = Instant::now();
                let mut task =
                    tokio::task::spawn_blocking(move || predictor.forecast(&history, horizon));
                let result = tokio::time::timeout(self.config.predict_budget, &mut task).await;
                self.metrics
                    .observe_prediction_latency(start.elapsed().as_secs_f64());

                match result {
                    Ok(Ok(forecast)) if forecast.is_finite() => return (forecast.max(0.0), false),
                    Ok(Ok(forecast)) => format!("non-finite forecast {forecast}"),
                    Ok(Err(e)) => e.to_string(),
                    Err(_) => {
                        state.pending_forecast = Some(task);
                        format!("exceeded {}ms budget", self.config.predict_budget.as_millis())
                    }
                }
            }
        };

        self.metrics.inc_predictor_fallbacks();
        let fallback = state.last_forecast.unwrap_or_else(|| {
            self.baseline
                .forecast(&state.history.snapshot(), horizon)
        });
        debug!(
            predictor = %self.predictor.name(),
            reason = %reason,
            fallback = fallback,
            "Predictor unavailable this tick"
        );
        (fallback, true)
    }

    /// Cached trust assessment, refreshed from the feed when due
    async fn trust(
        &self,
        workload: &str,
        state: &mut WorkloadState,
    ) -> (TrustAssessment, FeedStatus) {
        if let Some(cached) = &state.trust {
            if !state.security_due(self.config.security_refresh_every) {
                return (cached.clone(), FeedStatus::Cached);
            }
        }

        let container_id = state
            .container_id
            .clone()
            .unwrap_or_else(|| workload.to_string());
        let (assessment, feed) = match self.security.scan(&container_id).await {
            Ok(assessment) => {
                self.metrics.inc_security_scan("ok");
                (assessment, FeedStatus::Fresh)
            }
            Err(e) => {
                self.metrics.inc_security_scan("unavailable");
                debug!(
                    workload = %workload,
                    container_id = %container_id,
                    error = %e,
                    "Security feed unavailable, using neutral trust"
                );
                (
                    TrustAssessment::unavailable(self.config.unavailable_trust_score),
                    FeedStatus::Unavailable,
                )
            }
        };

        state.trust = Some(assessment.clone());
        (assessment, feed)
    }

    /// Run one enforcement call on the blocking pool
    async fn enforce<F>(
        &self,
        workload: &str,
        resource: &'static str,
        apply: F,
    ) -> Result<AppliedLimit>
    where
        F: FnOnce(&dyn ResourceEnforcer, &str) -> Result<AppliedLimit> + Send + 'static,
    {
        let enforcer = Arc::clone(&self.enforcer);
        let target = workload.to_string();
        let result = tokio::task::spawn_blocking(move || apply(&*enforcer, &target))
            .await
            .unwrap_or_else(|e| Err(AgentError::unavailable("enforcer", e.to_string())));

        match &result {
            Ok(applied) => {
                let outcome = if applied.dry_run { "dry_run" } else { "applied" };
                self.metrics.inc_limit_write(resource, outcome);
            }
            Err(e) => {
                self.metrics.inc_limit_write(resource, "failed");
                self.logger
                    .log_limit_write_failed(workload, resource, &e.to_string());
            }
        }
        result
    }

    fn record_write(&self, workload: &str, resource: &str, applied: &AppliedLimit) {
        let outcome = if applied.dry_run { "dry_run" } else { "applied" };
        self.metrics.inc_limit_write(resource, outcome);
        self.logger
            .log_limit_applied(workload, resource, &applied.value, applied.dry_run);
    }

    /// Fire-and-forget push; failures are only counted
    fn push_telemetry(&self, report: TelemetryReport) {
        let sink = Arc::clone(&self.telemetry);
        let metrics = self.metrics.clone();
        tokio::spawn(async move {
            if let Err(e) = sink.push(&report).await {
                metrics.inc_telemetry_failures();
                debug!(workload = %report.workload, error = %e, "Telemetry push failed");
            }
        });
    }
}

/// Builder for creating the control loop
pub struct ControlLoopBuilder {
    sampler: Option<Arc<dyn UsageSampler>>,
    predictor: Option<Arc<dyn DemandPredictor>>,
    enforcer: Option<Arc<dyn ResourceEnforcer>>,
    security: Option<Arc<dyn SecurityFeed>>,
    telemetry: Option<Arc<dyn TelemetrySink>>,
    registry: Option<Arc<WorkloadRegistry>>,
    health: Option<HealthRegistry>,
    config: ControlConfig,
}

impl ControlLoopBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            sampler: None,
            predictor: None,
            enforcer: None,
            security: None,
            telemetry: None,
            registry: None,
            health: None,
            config: ControlConfig::default(),
        }
    }

    pub fn sampler(mut self, sampler: Arc<dyn UsageSampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    pub fn predictor(mut self, predictor: Arc<dyn DemandPredictor>) -> Self {
        self.predictor = Some(predictor);
        self
    }

    pub fn enforcer(mut self, enforcer: Arc<dyn ResourceEnforcer>) -> Self {
        self.enforcer = Some(enforcer);
        self
    }

    /// Set the security feed (default: always unavailable)
    pub fn security_feed(mut self, feed: Arc<dyn SecurityFeed>) -> Self {
        self.security = Some(feed);
        self
    }

    /// Set the telemetry sink (default: discard)
    pub fn telemetry(mut self, sink: Arc<dyn TelemetrySink>) -> Self {
        self.telemetry = Some(sink);
        self
    }

    /// Set the workload registry (default: empty)
    pub fn registry(mut self, registry: Arc<WorkloadRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn health(mut self, health: HealthRegistry) -> Self {
        self.health = Some(health);
        self
    }

    pub fn config(mut self, config: ControlConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the tick interval
    pub fn interval(mut self, interval: Duration) -> Self {
        self.config.interval = interval;
        self
    }

    /// Build the control loop, validating its configuration
    pub fn build(self) -> Result<ControlLoop> {
        self.config.validate()?;

        let sampler = self
            .sampler
            .ok_or_else(|| AgentError::config("sampler is required"))?;
        let predictor = self
            .predictor
            .ok_or_else(|| AgentError::config("predictor is required"))?;
        let enforcer = self
            .enforcer
            .ok_or_else(|| AgentError::config("enforcer is required"))?;

        let governance = Arc::new(GovernanceEngine::new(
            Arc::clone(&enforcer),
            self.config.governance.clone(),
        ));
        let logger = StructuredLogger::new(self.config.node_id.clone());
        let permits = Arc::new(Semaphore::new(self.config.max_concurrency));

        Ok(ControlLoop {
            ctx: Arc::new(ControlContext {
                sampler,
                predictor,
                baseline: MovingAveragePredictor::new(self.config.baseline_window),
                enforcer,
                governance,
                security: self
                    .security
                    .unwrap_or_else(|| Arc::new(UnavailableSecurityFeed)),
                telemetry: self
                    .telemetry
                    .unwrap_or_else(|| Arc::new(NullTelemetrySink)),
                registry: self.registry.unwrap_or_default(),
                config: self.config,
                metrics: AgentMetrics::new(),
                logger,
                health: self.health,
                permits,
                enforcer_failure_streak: AtomicU32::new(0),
            }),
        })
    }
}

impl Default for ControlLoopBuilder {
    fn default() -> Self {
        Self::new()
    }
}
