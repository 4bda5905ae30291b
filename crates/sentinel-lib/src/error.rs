//! Error taxonomy for the control loop
//!
//! Only `Configuration` is fatal, and only at startup. Every other variant is
//! scoped to one workload and one tick: the loop logs it and moves on.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by sampling, prediction, enforcement and the collaborators
#[derive(Debug, Error)]
pub enum AgentError {
    /// A counter file was missing or unreadable this tick
    #[error("transient I/O error reading {path}: {source}")]
    TransientIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An enforcement write could not be committed; the prior limit stays in effect
    #[error("failed to write {value:?} to {path}: {source}")]
    WriteFailure {
        path: PathBuf,
        value: String,
        #[source]
        source: std::io::Error,
    },

    /// The requested limit has no representation in the controller's file format
    #[error("limit for {path} is not representable: {reason}")]
    Unrepresentable { path: PathBuf, reason: String },

    /// An optional backend (learned model, security feed) is absent or failed
    #[error("{capability} unavailable: {reason}")]
    CapabilityUnavailable {
        capability: &'static str,
        reason: String,
    },

    /// Invalid thresholds or paths detected before the loop starts
    #[error("invalid configuration: {0}")]
    Configuration(String),
}

impl AgentError {
    pub fn unavailable(capability: &'static str, reason: impl Into<String>) -> Self {
        AgentError::CapabilityUnavailable {
            capability,
            reason: reason.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        AgentError::Configuration(message.into())
    }

    /// Returns true for errors that must stop the process
    pub fn is_fatal(&self) -> bool {
        matches!(self, AgentError::Configuration(_))
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_configuration_is_fatal() {
        assert!(AgentError::config("bad threshold").is_fatal());
        assert!(!AgentError::unavailable("security_feed", "no runtime").is_fatal());

        let err = AgentError::WriteFailure {
            path: PathBuf::from("/sys/fs/cgroup/a/cpu.max"),
            value: "max".to_string(),
            source: std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        };
        assert!(!err.is_fatal());
        assert!(err.to_string().contains("cpu.max"));
    }
}
