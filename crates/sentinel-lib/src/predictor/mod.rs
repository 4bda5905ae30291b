//! CPU demand prediction
//!
//! Predictors turn the bounded demand history of one workload into a single
//! forecast value. The implementation is chosen once at startup by
//! [`probe_predictor`]: a learned ONNX model when one is configured and loads,
//! the moving-average baseline otherwise.

mod baseline;
mod inference;

pub use baseline::{MovingAveragePredictor, DEFAULT_WINDOW};
pub use inference::{InferenceStats, OnnxPredictor, DEFAULT_LAGS};

use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// Trait for demand prediction implementations
pub trait DemandPredictor: Send + Sync {
    /// Forecast demand `horizon` steps ahead of the newest reading in `history`.
    ///
    /// Must not fail on short or empty histories: it degrades to the mean of
    /// what is available, or 0.0 when there is nothing.
    fn forecast(&self, history: &[f64], horizon: usize) -> f64;

    /// Short name used in logs and metrics
    fn name(&self) -> &str;
}

/// Predictor selection settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PredictorConfig {
    /// Moving-average window of the baseline predictor
    pub window: usize,
    /// Learned model to load, if any
    pub model_path: Option<PathBuf>,
    /// Expected SHA-256 of the model file (hex)
    pub model_sha256: Option<String>,
    /// Number of readings the learned model consumes
    pub lags: usize,
    /// Divisor applied to readings before inference and multiplier after
    pub input_scale: f64,
}

impl Default for PredictorConfig {
    fn default() -> Self {
        Self {
            window: DEFAULT_WINDOW,
            model_path: None,
            model_sha256: None,
            lags: DEFAULT_LAGS,
            input_scale: 1_000_000.0,
        }
    }
}

/// Predictor chosen at startup
#[derive(Clone)]
pub enum PredictorHandle {
    Baseline(MovingAveragePredictor),
    Learned(Arc<OnnxPredictor>),
}

impl PredictorHandle {
    /// Capability flag: true when a learned model is serving forecasts
    pub fn is_learned(&self) -> bool {
        matches!(self, PredictorHandle::Learned(_))
    }
}

impl DemandPredictor for PredictorHandle {
    fn forecast(&self, history: &[f64], horizon: usize) -> f64 {
        match self {
            PredictorHandle::Baseline(p) => p.forecast(history, horizon),
            PredictorHandle::Learned(p) => p.forecast(history, horizon),
        }
    }

    fn name(&self) -> &str {
        match self {
            PredictorHandle::Baseline(p) => p.name(),
            PredictorHandle::Learned(p) => p.name(),
        }
    }
}

/// Select the predictor once, falling back to the baseline when the learned
/// model is not configured or cannot be loaded
pub fn probe_predictor(config: &PredictorConfig) -> PredictorHandle {
    let baseline = PredictorHandle::Baseline(MovingAveragePredictor::new(config.window));

    let Some(path) = &config.model_path else {
        info!(
            window = config.window,
            "No learned model configured, using moving-average predictor"
        );
        return baseline;
    };

    let loaded = OnnxPredictor::from_file(
        path,
        config.model_sha256.as_deref(),
        config.lags,
        config.input_scale,
    );
    match loaded {
        Ok(predictor) => {
            info!(model = %path.display(), lags = config.lags, "Learned predictor loaded");
            PredictorHandle::Learned(Arc::new(predictor))
        }
        Err(e) => {
            warn!(
                model = %path.display(),
                error = %e,
                "Learned predictor unavailable, using moving-average predictor"
            );
            baseline
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_probe_without_model_is_baseline() {
        let handle = probe_predictor(&PredictorConfig::default());
        assert!(!handle.is_learned());
        assert_eq!(handle.name(), "moving_average");
        assert_eq!(handle.forecast(&[2.0, 4.0], 1), 3.0);
    }

    #[test]
    fn test_probe_missing_model_falls_back() {
        let config = PredictorConfig {
            model_path: Some(PathBuf::from("/nonexistent/model.onnx")),
            ..PredictorConfig::default()
        };
        let handle = probe_predictor(&config);
        assert!(!handle.is_learned());
    }

    #[test]
    fn test_probe_corrupt_model_falls_back() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"definitely not protobuf").unwrap();

        let config = PredictorConfig {
            model_path: Some(file.path().to_path_buf()),
            ..PredictorConfig::default()
        };
        let handle = probe_predictor(&config);
        assert!(!handle.is_learned());
        assert_eq!(handle.forecast(&[], 1), 0.0);
    }
}
