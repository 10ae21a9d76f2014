//! Job documents: a field description plus the protocol to run on it.

use std::path::Path;

use ofs_core::OfsError;
use ofs_exp::{load_document, RolloutPlan, StepParams, SweepPlan};
use ofs_ref::{FieldConfig, DEFAULT_WINDOW};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutJob {
    #[serde(default)]
    pub field: FieldConfig,
    #[serde(default)]
    pub protocol: RolloutPlan,
    #[serde(default)]
    pub step: StepParams,
    #[serde(default = "default_window")]
    pub tracker_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepJob {
    #[serde(default)]
    pub field: FieldConfig,
    #[serde(default)]
    pub protocol: SweepPlan,
    #[serde(default = "default_window")]
    pub tracker_window: usize,
}

fn default_window() -> usize {
    DEFAULT_WINDOW
}

impl Default for RolloutJob {
    fn default() -> Self {
        Self {
            field: FieldConfig::default(),
            protocol: RolloutPlan::default(),
            step: StepParams::default(),
            tracker_window: default_window(),
        }
    }
}

impl Default for SweepJob {
    fn default() -> Self {
        Self {
            field: FieldConfig::default(),
            protocol: SweepPlan::default(),
            tracker_window: default_window(),
        }
    }
}

impl RolloutJob {
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.field.seed = seed;
        }
        self
    }

    pub fn snapshot(&self) -> Value {
        field_snapshot(&self.field, &self.step)
    }
}

impl SweepJob {
    /// Overrides both the field seed and the reservoir seed.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        if let Some(seed) = seed {
            self.field.seed = seed;
            self.protocol.reservoir.seed = seed;
        }
        self
    }

    pub fn snapshot(&self) -> Value {
        field_snapshot(
            &self.field,
            &StepParams {
                delay_steps: self.protocol.delay_steps.max(0.0) as u32,
                global_coupling: self.protocol.global_coupling,
            },
        )
    }
}

fn field_snapshot(field: &FieldConfig, step: &StepParams) -> Value {
    json!({
        "field": field,
        "delay_steps": step.delay_steps,
        "global_coupling": step.global_coupling,
    })
}

pub fn load_rollout_job(path: &Path) -> Result<RolloutJob, OfsError> {
    load_document(path)
}

pub fn load_sweep_job(path: &Path) -> Result<SweepJob, OfsError> {
    load_document(path)
}
