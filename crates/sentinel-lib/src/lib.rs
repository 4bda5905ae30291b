//! Node agent library for predictive cgroup control
//!
//! This crate provides the core functionality for:
//! - Usage sampling from cgroup v2 counters
//! - Demand forecasting (moving average or a learned ONNX model)
//! - Quarantine governance driven by container trust scores
//! - Atomic cgroup v2 limit enforcement
//! - Health checks and observability

pub mod control;
pub mod enforcer;
pub mod error;
pub mod governance;
pub mod health;
pub mod models;
pub mod observability;
pub mod predictor;
pub mod sampler;
pub mod security;
pub mod telemetry;

pub use control::{ControlConfig, ControlLoop, ControlLoopBuilder, TickReport, WorkloadRegistry};
pub use error::{AgentError, Result};
pub use governance::{GovernanceAction, GovernanceEngine, GovernancePolicy};
pub use health::{
    ComponentHealth, ComponentStatus, HealthRegistry, HealthResponse, ReadinessResponse,
};
pub use models::*;
pub use observability::{AgentMetrics, StructuredLogger};
