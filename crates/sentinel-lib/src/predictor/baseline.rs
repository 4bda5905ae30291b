//! Moving-average baseline predictor

use super::DemandPredictor;

/// Default number of recent readings averaged
pub const DEFAULT_WINDOW: usize = 5;

/// Forecasts the arithmetic mean of the last `window` readings
#[derive(Debug, Clone, Copy)]
pub struct MovingAveragePredictor {
    window: usize,
}

impl MovingAveragePredictor {
    pub fn new(window: usize) -> Self {
        Self {
            window: window.max(1),
        }
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl Default for MovingAveragePredictor {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW)
    }
}

impl DemandPredictor for MovingAveragePredictor {
    fn forecast(&self, history: &[f64], _horizon: usize) -> f64 {
        if history.is_empty() {
            return 0.0;
        }
        let start = history.len().saturating_sub(self.window);
        let recent = &history[start..];
        recent.iter().sum::<f64>() / recent.len() as f64
    }

    fn name(&self) -> &str {
        "moving_average"
    }
}
