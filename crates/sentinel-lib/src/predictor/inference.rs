//! Learned demand predictor using tract
//!
//! Loads an ONNX regression model trained offline on demand traces. The model
//! takes the last `lags` readings as a `[1, lags]` f32 tensor (divided by
//! `input_scale`) and returns one scalar, the next reading.

use super::{DemandPredictor, MovingAveragePredictor};
use crate::error::{AgentError, Result};
use anyhow::Context;
use sha2::{Digest, Sha256};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tract_onnx::prelude::*;
use tracing::{debug, warn};

/// Number of readings consumed by the model when not configured
pub const DEFAULT_LAGS: usize = 10;

/// Maximum inference latency before warning (5ms target)
const MAX_INFERENCE_MS: u128 = 5;

type TractModel = SimplePlan<TypedFact, Box<dyn TypedOp>, Graph<TypedFact, Box<dyn TypedOp>>>;

/// ONNX-based predictor using tract for lightweight inference
pub struct OnnxPredictor {
    model: TractModel,
    lags: usize,
    input_scale: f64,
    short_history: MovingAveragePredictor,
    inference_count: AtomicU64,
    slow_inference_count: AtomicU64,
    failed_inference_count: AtomicU64,
}

impl OnnxPredictor {
    /// Load a model file, verifying its SHA-256 when a checksum is given
    pub fn from_file(
        path: &Path,
        expected_sha256: Option<&str>,
        lags: usize,
        input_scale: f64,
    ) -> Result<Self> {
        let bytes = std::fs::read(path).map_err(|e| {
            AgentError::unavailable(
                "learned_predictor",
                format!("cannot read {}: {e}", path.display()),
            )
        })?;

        if let Some(expected) = expected_sha256 {
            let actual = sha256_hex(&bytes);
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(AgentError::unavailable(
                    "learned_predictor",
                    format!("checksum mismatch: expected {expected}, got {actual}"),
                ));
            }
        }

        Self::from_bytes(&bytes, lags, input_scale)
    }

    /// Create a predictor from model bytes
    pub fn from_bytes(model_bytes: &[u8], lags: usize, input_scale: f64) -> Result<Self> {
        let lags = lags.max(1);
        let model = Self::load_model(model_bytes, lags)
            .map_err(|e| AgentError::unavailable("learned_predictor", format!("{e:#}")))?;

        Ok(Self {
            model,
            lags,
            input_scale: if input_scale > 0.0 { input_scale } else { 1.0 },
            short_history: MovingAveragePredictor::new(lags),
            inference_count: AtomicU64::new(0),
            slow_inference_count: AtomicU64::new(0),
            failed_inference_count: AtomicU64::new(0),
        })
    }

    /// Load and optimize an ONNX model from bytes
    fn load_model(model_bytes: &[u8], lags: usize) -> anyhow::Result<TractModel> {
        let model = tract_onnx::onnx()
            .model_for_read(&mut std::io::Cursor::new(model_bytes))
            .context("Failed to parse ONNX model")?
            .with_input_fact(0, f32::fact([1, lags]).into())
            .context("Failed to set input shape")?
            .into_optimized()
            .context("Failed to optimize model")?
            .into_runnable()
            .context("Failed to create runnable model")?;
        Ok(model)
    }

    /// Run one inference step on exactly `lags` readings
    fn infer_next(&self, window: &[f64]) -> anyhow::Result<f64> {
        let start = Instant::now();

        let data: Vec<f32> = window
            .iter()
            .map(|v| (v / self.input_scale) as f32)
            .collect();
        let input: Tensor = tract_ndarray::Array2::from_shape_vec((1, self.lags), data)?.into();

        let result = self.model.run(tvec!(input.into()))?;
        let output = result.first().context("No output from model")?;
        let value = output
            .to_array_view::<f32>()?
            .iter()
            .next()
            .copied()
            .context("Model output is empty")?;

        let elapsed = start.elapsed();
        self.inference_count.fetch_add(1, Ordering::Relaxed);
        if elapsed.as_millis() > MAX_INFERENCE_MS {
            self.slow_inference_count.fetch_add(1, Ordering::Relaxed);
            warn!(
                elapsed_ms = elapsed.as_millis(),
                "Inference exceeded {}ms target",
                MAX_INFERENCE_MS
            );
        } else {
            debug!(elapsed_us = elapsed.as_micros(), "Inference completed");
        }

        Ok((value as f64 * self.input_scale).max(0.0))
    }

    /// Get inference statistics
    pub fn stats(&self) -> InferenceStats {
        InferenceStats {
            total_inferences: self.inference_count.load(Ordering::Relaxed),
            slow_inferences: self.slow_inference_count.load(Ordering::Relaxed),
            failed_inferences: self.failed_inference_count.load(Ordering::Relaxed),
        }
    }

    pub fn lags(&self) -> usize {
        self.lags
    }
}

impl DemandPredictor for OnnxPredictor {
    fn forecast(&self, history: &[f64], horizon: usize) -> f64 {
        if history.len() < self.lags {
            return self.short_history.forecast(history, horizon);
        }

        // Feed each prediction back in for multi-step horizons
        let mut sequence: Vec<f64> = history[history.len() - self.lags..].to_vec();
        let mut prediction = 0.0;
        for _ in 0..horizon.max(1) {
            match self.infer_next(&sequence[sequence.len() - self.lags..]) {
                Ok(next) => {
                    prediction = next;
                    sequence.push(next);
                }
                Err(e) => {
                    self.failed_inference_count.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, "Inference error, using moving average");
                    return self.short_history.forecast(history, horizon);
                }
            }
        }
        prediction
    }

    fn name(&self) -> &str {
        "onnx"
    }
}

/// Inference statistics
#[derive(Debug, Clone)]
pub struct InferenceStats {
    pub total_inferences: u64,
    pub slow_inferences: u64,
    pub failed_inferences: u64,
}

/// Hex-encoded SHA-256 digest
fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
