use serde::{Deserialize, Serialize};

/// Neighbourhood statistics computed by the backend alongside an order readback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LocalStats {
    /// Mean of the local order parameter over all neighbourhoods.
    pub mean_r: f64,
    /// Mean absolute phase gradient between neighbouring units.
    pub gradient: f64,
    /// Fraction of units whose local order parameter exceeds the sync threshold.
    pub sync_fraction: f64,
}

/// Aggregate order-parameter statistics resolved from a backend readback.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct OrderReadback {
    /// Mean of `cos(theta)` over the field.
    pub cos: f64,
    /// Mean of `sin(theta)` over the field.
    pub sin: f64,
    /// Local statistics, when the backend computed them for this step.
    #[serde(default)]
    pub local_stats: Option<LocalStats>,
}

impl OrderReadback {
    /// Global Kuramoto order parameter `|<e^{i theta}>|`.
    pub fn global_r(&self) -> f64 {
        self.cos.hypot(self.sin)
    }
}

/// Outcome of a single reservoir step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct ReservoirStep {
    /// Input value presented to the field for the next step.
    pub input: f64,
    /// Readout prediction, once a readout exists.
    pub prediction: Option<f64>,
    /// Target the prediction is scored against, once the task history is long enough.
    pub target: Option<f64>,
}

/// Settings passed to [`crate::Reservoir::configure`] at the start of each control value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirConfig {
    /// Number of leading samples per session that are not used for fitting or scoring.
    pub washout: usize,
    /// Number of units in the layer slice the reservoir reads.
    pub layer_size: usize,
    /// Readout learning rate.
    pub learning_rate: f64,
    /// Amplitude applied to the task input before it is injected.
    pub input_scale: f64,
    /// Seed for input weights and the task generator.
    pub seed: u64,
}

impl Default for ReservoirConfig {
    fn default() -> Self {
        Self {
            washout: 0,
            layer_size: 0,
            learning_rate: 0.05,
            input_scale: 1.0,
            seed: 0,
        }
    }
}
