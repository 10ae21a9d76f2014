#![deny(missing_docs)]
#![doc = "Core traits and data types shared by the OFS experiment runners and their collaborators."]

use futures::future::BoxFuture;

pub mod errors;
pub mod rng;
mod types;

pub use errors::{ErrorInfo, OfsError};
pub use rng::{derive_substream_seed, RngHandle};
pub use types::{LocalStats, OrderReadback, ReservoirConfig, ReservoirStep};

/// Future returned by backend reads. Resolves to `None` when there is nothing
/// to report for this tick.
pub type Pending<T> = BoxFuture<'static, Option<T>>;

/// Contract for the component that advances the oscillator field.
///
/// Steps and readback requests are enqueued synchronously into a per-frame
/// `Batch`; aggregate results only come back through [`Pending`] futures that
/// may resolve on a later frame.
pub trait ComputeBackend {
    /// Per-frame command batch the runner encodes steps into.
    type Batch;

    /// Enqueues one discrete update of the field.
    fn step(
        &mut self,
        batch: &mut Self::Batch,
        delay_steps: u32,
        global_coupling: bool,
        compute_stats: bool,
    );

    /// Enqueues an aggregate order-parameter extraction for the latest step.
    fn request_order_readback(&mut self, batch: &mut Self::Batch);

    /// True while a requested readback has not yet been resolved.
    fn readback_pending(&self) -> bool;

    /// Resolves the most recently requested readback.
    fn process_readback(&mut self) -> Pending<OrderReadback>;

    /// Full-resolution snapshot of every unit's phase.
    fn read_full_state(&mut self) -> Pending<Vec<f32>>;

    /// Overwrites the field state.
    fn write_full_state(&mut self, data: &[f32]);

    /// Sets the control parameter (coupling strength).
    fn write_control_value(&mut self, value: f64);

    /// Current control parameter.
    fn control_value(&self) -> f64;

    /// Re-initialises the field state from the backend's own seed.
    fn reset_field(&mut self);

    /// Uploads per-unit weights applied to the injected signal.
    fn write_input_weights(&mut self, weights: &[f32]);

    /// Sets the scalar signal injected into the field on every step.
    fn set_injected_signal(&mut self, value: f64);
}

/// Order-parameter statistics collaborator (variance/criticality tracking).
pub trait StatsTracker {
    /// Feeds one readback into the tracker.
    fn update(&mut self, cos: f64, sin: f64, local_stats: Option<&LocalStats>);

    /// Susceptibility estimate after the latest update.
    fn chi(&self) -> f64;

    /// Clears all accumulated history.
    fn reset(&mut self);
}

/// Learning subsystem trained on field state slices.
pub trait Reservoir {
    /// Applies session settings; called before every training session.
    fn configure(&mut self, config: &ReservoirConfig);

    /// Selects the task by name. Returns `false` for unknown tasks.
    fn set_task(&mut self, name: &str) -> bool;

    /// Sets the task memory horizon.
    fn set_history_length(&mut self, length: usize);

    /// Caps the number of readout features.
    fn set_feature_budget(&mut self, budget: usize);

    /// Begins a training session.
    fn start_training(&mut self);

    /// Ends training and returns the training error metric.
    fn stop_training(&mut self) -> f64;

    /// Begins inference; `false` when no trained readout exists.
    fn start_inference(&mut self) -> bool;

    /// Ends inference.
    fn stop_inference(&mut self);

    /// Normalised RMSE over the latest inference session.
    fn compute_test_nrmse(&self) -> f64;

    /// Consumes one state slice, advancing the task generator.
    fn step(&mut self, state: &[f32]) -> ReservoirStep;

    /// Signal the field should receive on the next step.
    fn input_signal(&self) -> f64;

    /// Per-unit input weights for the current task position.
    fn input_weights(&self) -> Vec<f32>;

    /// True when the task moves its input location on every step.
    fn relocates_input(&self) -> bool;
}
