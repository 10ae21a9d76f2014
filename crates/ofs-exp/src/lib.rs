//! Experiment orchestration for the oscillator-field sandbox.
//!
//! Two runners share one frame contract: the host calls `encode_steps` while
//! building a command batch and `after_submit` once the batch is submitted.
//! Neither entry point blocks; backend results are picked up on whichever
//! frame observes them resolved.

mod export;
mod hash;
mod inflight;
mod plan;
mod rollout;
mod serde;
mod status;
mod summary;
mod sweep;

pub use export::write_export;
pub use hash::{config_hash, fnv1a32, hash_hex, stable_stringify};
pub use plan::{
    control_values, load_document, round3, ReservoirPlan, ReservoirProtocol, RolloutPlan,
    RolloutProtocol, SweepPlan, SweepProtocol, K_EPSILON, MAX_CONTROL_VALUES, MIN_K_STEP,
};
pub use rollout::{RolloutExport, RolloutRunner, RolloutSeries, StepParams};
pub use status::{
    RolloutPhase, RolloutStatus, RolloutSummary, RunOutcome, StatusListener, SweepPhase,
    SweepStatus,
};
pub use summary::{downsample, max_or_zero, mean_std, MeanStd, DEFAULT_MAX_POINTS};
pub use sweep::{
    layer_slice, results_to_csv, SweepExport, SweepResult, SweepRunner, CSV_HEADER,
};

pub use crate::serde::{from_json_slice, from_yaml_slice, to_canonical_json_bytes, to_pretty_json};
