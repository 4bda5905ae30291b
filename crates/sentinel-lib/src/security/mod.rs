//! Security assessment feeds
//!
//! A feed returns a point-in-time trust score and risk list for a workload.
//! Feeds may be unavailable; callers substitute a configured neutral
//! assessment instead of failing.

mod docker;

pub use docker::{assess_container, DockerSecurityFeed, SENSITIVE_PORTS};

use crate::error::{AgentError, Result};
use crate::models::TrustAssessment;
use async_trait::async_trait;

/// Trait for security assessment backends
#[async_trait]
pub trait SecurityFeed: Send + Sync {
    /// Assess the runtime container behind a workload
    async fn scan(&self, container_id: &str) -> Result<TrustAssessment>;
}

/// Feed returning the same assessment for every workload
pub struct StaticSecurityFeed {
    assessment: TrustAssessment,
}

impl StaticSecurityFeed {
    pub fn new(assessment: TrustAssessment) -> Self {
        Self { assessment }
    }
}

#[async_trait]
impl SecurityFeed for StaticSecurityFeed {
    async fn scan(&self, _container_id: &str) -> Result<TrustAssessment> {
        Ok(self.assessment.clone())
    }
}

/// Feed for hosts without a container runtime to introspect
#[derive(Debug, Default)]
pub struct UnavailableSecurityFeed;

#[async_trait]
impl SecurityFeed for UnavailableSecurityFeed {
    async fn scan(&self, _container_id: &str) -> Result<TrustAssessment> {
        Err(AgentError::unavailable("security_feed", "no container runtime configured"))
    }
}
