//! User-facing experiment plans and their normalised protocols.
//!
//! Plans are what users write (YAML/JSON, any numeric value accepted);
//! protocols are what runners execute. Normalisation is total: every plan
//! yields a protocol, with counts floored and clamped to their minimums.

use std::fs;
use std::path::Path;

use ofs_core::errors::{ErrorInfo, OfsError};
use ofs_core::ReservoirConfig;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::serde::{from_json_slice, from_yaml_slice};

/// Tolerance applied to the upper bound of the control-value range.
pub const K_EPSILON: f64 = 1e-9;
/// Smallest control-value increment accepted by a sweep.
pub const MIN_K_STEP: f64 = 1e-3;
/// Upper bound on the number of control values in one sweep.
pub const MAX_CONTROL_VALUES: usize = 10_000;

/// Raw rollout plan as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutPlan {
    #[serde(default = "default_warmup_steps")]
    pub warmup_steps: f64,
    #[serde(default = "default_measure_steps")]
    pub measure_steps: f64,
    #[serde(default = "default_readback_every")]
    pub readback_every: f64,
    #[serde(default = "default_steps_per_frame")]
    pub steps_per_frame: f64,
}

fn default_warmup_steps() -> f64 {
    500.0
}

fn default_measure_steps() -> f64 {
    2000.0
}

fn default_readback_every() -> f64 {
    4.0
}

fn default_steps_per_frame() -> f64 {
    8.0
}

impl Default for RolloutPlan {
    fn default() -> Self {
        Self {
            warmup_steps: default_warmup_steps(),
            measure_steps: default_measure_steps(),
            readback_every: default_readback_every(),
            steps_per_frame: default_steps_per_frame(),
        }
    }
}

/// Normalised rollout protocol captured at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RolloutProtocol {
    pub warmup_steps: u64,
    pub measure_steps: u64,
    pub readback_every: u64,
    pub steps_per_frame: u64,
}

impl RolloutProtocol {
    pub fn total_steps(&self) -> u64 {
        self.warmup_steps + self.measure_steps
    }
}

impl RolloutPlan {
    /// Floors and clamps every count.
    pub fn normalize(&self) -> RolloutProtocol {
        RolloutProtocol {
            warmup_steps: count(self.warmup_steps, 0),
            measure_steps: count(self.measure_steps, 1),
            readback_every: count(self.readback_every, 1),
            steps_per_frame: count(self.steps_per_frame, 1),
        }
    }
}

/// Reservoir settings carried by a sweep plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirPlan {
    #[serde(default = "default_task")]
    pub task: String,
    #[serde(default = "default_history_length")]
    pub history_length: f64,
    #[serde(default = "default_feature_budget")]
    pub feature_budget: f64,
    /// Index of the layer whose units feed the readout.
    #[serde(default)]
    pub layer_index: f64,
    /// Units per layer; `0` reads the whole field.
    #[serde(default)]
    pub layer_size: f64,
    #[serde(default = "default_learning_rate")]
    pub learning_rate: f64,
    #[serde(default = "default_input_scale")]
    pub input_scale: f64,
    #[serde(default)]
    pub seed: u64,
}

fn default_task() -> String {
    "delay".to_string()
}

fn default_history_length() -> f64 {
    5.0
}

fn default_feature_budget() -> f64 {
    64.0
}

fn default_learning_rate() -> f64 {
    0.05
}

fn default_input_scale() -> f64 {
    1.0
}

impl Default for ReservoirPlan {
    fn default() -> Self {
        Self {
            task: default_task(),
            history_length: default_history_length(),
            feature_budget: default_feature_budget(),
            layer_index: 0.0,
            layer_size: 0.0,
            learning_rate: default_learning_rate(),
            input_scale: default_input_scale(),
            seed: 0,
        }
    }
}

/// Raw criticality sweep plan as written by the user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepPlan {
    #[serde(default = "default_k_min")]
    pub k_min: f64,
    #[serde(default = "default_k_max")]
    pub k_max: f64,
    #[serde(default = "default_k_step")]
    pub k_step: f64,
    #[serde(default = "default_warmup_samples")]
    pub warmup_samples: f64,
    #[serde(default = "default_train_samples")]
    pub train_samples: f64,
    #[serde(default = "default_test_samples")]
    pub test_samples: f64,
    #[serde(default = "default_stats_every")]
    pub stats_every: f64,
    #[serde(default)]
    pub delay_steps: f64,
    #[serde(default)]
    pub global_coupling: bool,
    #[serde(default)]
    pub reservoir: ReservoirPlan,
}

fn default_k_min() -> f64 {
    0.2
}

fn default_k_max() -> f64 {
    2.4
}

fn default_k_step() -> f64 {
    0.2
}

fn default_warmup_samples() -> f64 {
    100.0
}

fn default_train_samples() -> f64 {
    1000.0
}

fn default_test_samples() -> f64 {
    500.0
}

fn default_stats_every() -> f64 {
    4.0
}

impl Default for SweepPlan {
    fn default() -> Self {
        Self {
            k_min: default_k_min(),
            k_max: default_k_max(),
            k_step: default_k_step(),
            warmup_samples: default_warmup_samples(),
            train_samples: default_train_samples(),
            test_samples: default_test_samples(),
            stats_every: default_stats_every(),
            delay_steps: 0.0,
            global_coupling: false,
            reservoir: ReservoirPlan::default(),
        }
    }
}

/// Normalised reservoir settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReservoirProtocol {
    pub task: String,
    pub history_length: usize,
    pub feature_budget: usize,
    pub layer_index: usize,
    pub layer_size: usize,
    pub learning_rate: f64,
    pub input_scale: f64,
    pub seed: u64,
}

/// Normalised sweep protocol captured at `start`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepProtocol {
    pub k_min: f64,
    pub k_max: f64,
    pub k_step: f64,
    pub k_values: Vec<f64>,
    pub warmup_samples: u64,
    pub train_samples: u64,
    pub test_samples: u64,
    pub stats_every: u64,
    pub delay_steps: u32,
    pub global_coupling: bool,
    pub reservoir: ReservoirProtocol,
}

impl SweepProtocol {
    /// Samples consumed by the warmup+train phase of one control value.
    pub fn train_phase_samples(&self) -> u64 {
        self.warmup_samples + self.train_samples
    }

    /// Samples consumed by the test phase of one control value.
    pub fn test_phase_samples(&self) -> u64 {
        self.warmup_samples + self.test_samples
    }

    /// Session settings handed to the reservoir at each control value.
    pub fn reservoir_config(&self) -> ReservoirConfig {
        ReservoirConfig {
            washout: self.warmup_samples as usize,
            layer_size: self.reservoir.layer_size,
            learning_rate: self.reservoir.learning_rate,
            input_scale: self.reservoir.input_scale,
            seed: self.reservoir.seed,
        }
    }
}

impl SweepPlan {
    pub fn normalize(&self) -> SweepProtocol {
        let k_min = finite_or(self.k_min, default_k_min());
        let k_max = finite_or(self.k_max, k_min).max(k_min);
        let k_step = if self.k_step.is_finite() && self.k_step.abs() >= MIN_K_STEP {
            self.k_step.abs()
        } else {
            MIN_K_STEP
        };
        let reservoir = ReservoirProtocol {
            task: if self.reservoir.task.trim().is_empty() {
                default_task()
            } else {
                self.reservoir.task.trim().to_string()
            },
            history_length: count(self.reservoir.history_length, 1) as usize,
            feature_budget: count(self.reservoir.feature_budget, 1) as usize,
            layer_index: count(self.reservoir.layer_index, 0) as usize,
            layer_size: count(self.reservoir.layer_size, 0) as usize,
            learning_rate: finite_or(self.reservoir.learning_rate, default_learning_rate())
                .max(0.0),
            input_scale: finite_or(self.reservoir.input_scale, default_input_scale()),
            seed: self.reservoir.seed,
        };
        let k_values = control_values(k_min, k_max, k_step);
        // A capped grid reports the bound it actually reaches.
        let k_max = match k_values.last() {
            Some(&last) if k_values.len() >= MAX_CONTROL_VALUES && last + K_EPSILON < k_max => {
                warn!(
                    requested_k_max = k_max,
                    kept_k_max = last,
                    values = k_values.len(),
                    "control-value grid truncated"
                );
                last
            }
            _ => k_max,
        };
        SweepProtocol {
            k_min,
            k_max,
            k_step,
            k_values,
            warmup_samples: count(self.warmup_samples, 0),
            train_samples: count(self.train_samples, 1),
            test_samples: count(self.test_samples, 1),
            stats_every: count(self.stats_every, 1),
            delay_steps: count(self.delay_steps, 0).min(u64::from(u32::MAX)) as u32,
            global_coupling: self.global_coupling,
            reservoir,
        }
    }
}

/// Inclusive control-value grid `k_min, k_min + step, ...` up to `k_max`.
///
/// Values are generated from the index rather than by repeated addition and
/// the upper bound is widened by [`K_EPSILON`], so floating drift neither drops
/// nor duplicates the endpoint. Each value is rounded to three decimals.
pub fn control_values(k_min: f64, k_max: f64, k_step: f64) -> Vec<f64> {
    if !(k_min.is_finite() && k_max.is_finite() && k_step.is_finite()) || k_step <= 0.0 {
        return vec![round3(k_min)];
    }
    let mut values = Vec::new();
    let mut idx = 0usize;
    loop {
        let k = k_min + idx as f64 * k_step;
        if k > k_max + K_EPSILON || values.len() >= MAX_CONTROL_VALUES {
            break;
        }
        values.push(round3(k));
        idx += 1;
    }
    values
}

/// Rounds to three decimal places.
pub fn round3(value: f64) -> f64 {
    (value * 1000.0).round() / 1000.0
}

fn count(value: f64, min: u64) -> u64 {
    if !value.is_finite() || value <= 0.0 {
        return min;
    }
    (value.floor() as u64).max(min)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

/// Loads a plan document, choosing JSON or YAML by file extension.
pub fn load_document<T: DeserializeOwned>(path: &Path) -> Result<T, OfsError> {
    let bytes = fs::read(path).map_err(|err| {
        OfsError::Config(ErrorInfo::new("plan-read", err.to_string()).with_path("path", path))
    })?;
    let parsed = match path.extension().and_then(|ext| ext.to_str()) {
        Some("json") => from_json_slice(&bytes),
        _ => from_yaml_slice(&bytes),
    };
    parsed.map_err(|err| {
        OfsError::Config(
            ErrorInfo::new("plan-parse", err.info().message.clone())
                .with_path("path", path)
                .with_hint("plans are YAML unless the file ends in .json"),
        )
    })
}
