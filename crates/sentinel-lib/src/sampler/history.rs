//! Bounded per-workload demand history

use std::collections::VecDeque;

/// Maximum number of readings kept per workload
pub const HISTORY_CAPACITY: usize = 1000;

/// Append-only FIFO of CPU demand readings, oldest evicted first
#[derive(Debug, Clone)]
pub struct History {
    readings: VecDeque<f64>,
    capacity: usize,
}

impl History {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            readings: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a reading, evicting the oldest one when full
    pub fn push(&mut self, reading: f64) {
        if self.readings.len() == self.capacity {
            self.readings.pop_front();
        }
        self.readings.push_back(reading);
    }

    /// Copy of the readings in arrival order, for handing to a predictor
    pub fn snapshot(&self) -> Vec<f64> {
        self.readings.iter().copied().collect()
    }

    pub fn latest(&self) -> Option<f64> {
        self.readings.back().copied()
    }

    pub fn oldest(&self) -> Option<f64> {
        self.readings.front().copied()
    }

    pub fn len(&self) -> usize {
        self.readings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.readings.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}
