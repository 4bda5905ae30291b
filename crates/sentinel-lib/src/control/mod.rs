//! Per-node control loop
//!
//! Ties the sampler, predictor, security feed, governance and enforcer
//! together. Each workload is evaluated under its own lock so a slow
//! workload never blocks the others.

mod r#loop;
mod workload;


pub use r#loop::{
    cpu_quota_for, ControlConfig, ControlLoop, ControlLoopBuilder, FeedStatus, TickReport,
    WorkloadOutcome,
};
pub use workload::{WorkloadRegistry, WorkloadState};
