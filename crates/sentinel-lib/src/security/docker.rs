//! Docker Engine API security feed
//!
//! Inspects the container configuration through the Engine API
//! (`GET /containers/{id}/json`) and scores it with static heuristics.

use super::SecurityFeed;
use crate::error::{AgentError, Result};
use crate::models::TrustAssessment;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Container ports that expose remote shells or the Docker daemon
pub const SENSITIVE_PORTS: &[&str] = &["22/tcp", "2375/tcp", "2376/tcp"];

/// Feed scoring containers inspected through the Docker Engine API
pub struct DockerSecurityFeed {
    client: reqwest::Client,
    endpoint: Url,
}

impl DockerSecurityFeed {
    /// Create a feed for an Engine API endpoint such as `http://127.0.0.1:2375/v1.43`
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let mut endpoint = Url::parse(endpoint)
            .map_err(|e| AgentError::config(format!("invalid docker endpoint {endpoint:?}: {e}")))?;
        if !endpoint.path().ends_with('/') {
            let path = format!("{}/", endpoint.path());
            endpoint.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::config(format!("failed to build docker client: {e}")))?;

        Ok(Self { client, endpoint })
    }

    /// Inspect URL for a container
    pub fn inspect_url(&self, container_id: &str) -> Result<Url> {
        self.endpoint
            .join(&format!("containers/{container_id}/json"))
            .map_err(|e| AgentError::unavailable("security_feed", format!("bad container id: {e}")))
    }
}

#[async_trait]
impl SecurityFeed for DockerSecurityFeed {
    async fn scan(&self, container_id: &str) -> Result<TrustAssessment> {
        let url = self.inspect_url(container_id)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| AgentError::unavailable("security_feed", e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AgentError::unavailable(
                "security_feed",
                format!("inspect {container_id} returned {status}"),
            ));
        }

        let attrs: Value = response
            .json()
            .await
            .map_err(|e| AgentError::unavailable("security_feed", e.to_string()))?;

        let assessment = assess_container(&attrs);
        debug!(container_id = %container_id, score = assessment.score, "Container assessed");
        Ok(assessment)
    }
}

/// Score a container inspect document.
///
/// Starts at 100 and subtracts: privileged mode 40, running as root 30,
/// sensitive port exposed 20, `always` restart policy 5.
pub fn assess_container(attrs: &Value) -> TrustAssessment {
    let mut score: i32 = 100;
    let mut risks = Vec::new();

    if attrs["HostConfig"]["Privileged"].as_bool().unwrap_or(false) {
        score -= 40;
        risks.push("Container is running in Privileged mode (High Risk)".to_string());
    }

    let user = attrs["Config"]["User"].as_str().unwrap_or("");
    if matches!(user, "" | "0" | "root") {
        score -= 30;
        risks.push("Container is running as ROOT user (Medium Risk)".to_string());
    }

    let exposes_sensitive_port = attrs["NetworkSettings"]["Ports"]
        .as_object()
        .map(|ports| ports.keys().any(|port| SENSITIVE_PORTS.contains(&port.as_str())))
        .unwrap_or(false);
    if exposes_sensitive_port {
        score -= 20;
        risks.push(
            "Container exposes sensitive ports (SSH/Docker socket) (Medium Risk)".to_string(),
        );
    }

    if attrs["HostConfig"]["RestartPolicy"]["Name"].as_str() == Some("always") {
        score -= 5;
        risks.push("Restart policy is 'always' (Low Risk)".to_string());
    }

    TrustAssessment::new(score.clamp(0, 100) as u8, risks)
}
