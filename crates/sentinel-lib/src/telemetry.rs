//! Best-effort telemetry push
//!
//! Reports per-tick workload stats to an external collector. Pushes are
//! fire-and-forget: the control loop spawns them detached and only counts
//! failures, so a slow or absent collector never delays a control decision.

use crate::error::{AgentError, Result};
use crate::models::TelemetryReport;
use async_trait::async_trait;
use std::time::Duration;
use url::Url;

/// Default timeout for one push
pub const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_millis(100);

/// Trait for telemetry collectors
#[async_trait]
pub trait TelemetrySink: Send + Sync {
    async fn push(&self, report: &TelemetryReport) -> anyhow::Result<()>;
}

/// Sink POSTing JSON reports to an HTTP endpoint
pub struct HttpTelemetrySink {
    client: reqwest::Client,
    endpoint: Url,
}

impl HttpTelemetrySink {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint).map_err(|e| {
            AgentError::config(format!("invalid telemetry endpoint {endpoint:?}: {e}"))
        })?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::config(format!("failed to build telemetry client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl TelemetrySink for HttpTelemetrySink {
    async fn push(&self, report: &TelemetryReport) -> anyhow::Result<()> {
        self.client
            .post(self.endpoint.clone())
            .json(report)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

/// Sink discarding every report
#[derive(Debug, Default)]
pub struct NullTelemetrySink;

#[async_trait]
impl TelemetrySink for NullTelemetrySink {
    async fn push(&self, _report: &TelemetryReport) -> anyhow::Result<()> {
        Ok(())
    }
}
