use serde::{Deserialize, Serialize};

use crate::summary::MeanStd;
use crate::sweep::SweepResult;

/// Callback invoked with a fresh status snapshot after every runner mutation.
pub type StatusListener<S> = Box<dyn FnMut(&S)>;

/// Terminal outcome latched while in-flight work drains.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    Done,
    Canceled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RolloutPhase {
    #[default]
    Idle,
    Warmup,
    Measure,
    Finalizing,
    Done,
    Canceled,
}

impl RolloutPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RolloutPhase::Done | RolloutPhase::Canceled)
    }
}

impl From<RunOutcome> for RolloutPhase {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Done => RolloutPhase::Done,
            RunOutcome::Canceled => RolloutPhase::Canceled,
        }
    }
}

/// Per-series aggregates computed when a rollout finishes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RolloutSummary {
    pub samples: usize,
    pub global_r: MeanStd,
    pub local_mean_r: MeanStd,
    pub gradient: MeanStd,
    pub sync_fraction: MeanStd,
    pub chi: MeanStd,
    pub chi_max: f64,
}

/// Snapshot of a rollout emitted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RolloutStatus {
    pub phase: RolloutPhase,
    pub running: bool,
    pub step_index: u64,
    pub total_steps: u64,
    pub warmup_steps: u64,
    pub measure_steps: u64,
    pub samples: usize,
    pub last_readback_step: Option<u64>,
    pub config_hash: Option<String>,
    pub summary: Option<RolloutSummary>,
}

impl RolloutStatus {
    /// Fraction of protocol steps issued so far.
    pub fn progress(&self) -> f64 {
        if self.total_steps == 0 {
            0.0
        } else {
            self.step_index as f64 / self.total_steps as f64
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SweepPhase {
    #[default]
    Idle,
    Initializing,
    WarmupTrain,
    Test,
    Done,
    Canceled,
}

impl SweepPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SweepPhase::Done | SweepPhase::Canceled)
    }
}

impl From<RunOutcome> for SweepPhase {
    fn from(outcome: RunOutcome) -> Self {
        match outcome {
            RunOutcome::Done => SweepPhase::Done,
            RunOutcome::Canceled => SweepPhase::Canceled,
        }
    }
}

/// Snapshot of a sweep emitted after every mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct SweepStatus {
    pub phase: SweepPhase,
    pub active: bool,
    /// Index of the active control value.
    pub k_index: usize,
    pub k_count: usize,
    pub k: Option<f64>,
    pub sample_in_phase: u64,
    /// Samples the current phase runs for before advancing.
    pub phase_samples: u64,
    pub completed: usize,
    pub config_hash: Option<String>,
    /// Full result table, attached once the sweep is terminal.
    pub results: Option<Vec<SweepResult>>,
}
