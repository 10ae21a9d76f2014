use std::collections::VecDeque;

use ofs_core::{LocalStats, StatsTracker};

pub const DEFAULT_WINDOW: usize = 64;

/// Susceptibility estimate `chi = n · var(R)` over a sliding window of global
/// order-parameter samples.
#[derive(Debug, Clone)]
pub struct CriticalityTracker {
    units: usize,
    window: usize,
    samples: VecDeque<f64>,
}

impl CriticalityTracker {
    pub fn new(units: usize, window: usize) -> Self {
        let window = window.max(2);
        Self {
            units,
            window,
            samples: VecDeque::with_capacity(window),
        }
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn window(&self) -> usize {
        self.window
    }
}

impl StatsTracker for CriticalityTracker {
    fn update(&mut self, cos: f64, sin: f64, _local_stats: Option<&LocalStats>) {
        let r = cos.hypot(sin);
        if !r.is_finite() {
            return;
        }
        if self.samples.len() == self.window {
            self.samples.pop_front();
        }
        self.samples.push_back(r);
    }

    fn chi(&self) -> f64 {
        if self.samples.len() < 2 {
            return 0.0;
        }
        let n = self.samples.len() as f64;
        let mean = self.samples.iter().sum::<f64>() / n;
        let variance = self.samples.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / n;
        self.units as f64 * variance
    }

    fn reset(&mut self) {
        self.samples.clear();
    }
}
