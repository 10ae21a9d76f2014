//! Criticality sweep: train/test a reservoir at every control value.
//!
//! Pacing is one simulation step per reservoir sample. A step is issued from
//! `encode_steps` only when the previous step's phase read has settled, so the
//! number of backend steps never runs more than one ahead of the number of
//! consumed samples regardless of readback latency.
//!
//! Statistics readbacks are a second, independent category of in-flight work.
//! A statistics readback that resolves after the phase has left `Test` is
//! dropped rather than attributed to the new phase.

use chrono::Utc;
use ofs_core::{
    ComputeBackend, ErrorInfo, OfsError, OrderReadback, Reservoir, StatsTracker,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::hash::config_hash;
use crate::inflight::InFlight;
use crate::plan::{SweepPlan, SweepProtocol};
use crate::serde::{metric, metric_from, to_pretty_json};
use crate::status::{RunOutcome, StatusListener, SweepPhase, SweepStatus};
use crate::summary::{max_or_zero, mean_std};

/// Aggregated outcome for one completed control value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepResult {
    pub k: f64,
    /// Training error; `+inf` when the reservoir reported a non-finite value.
    #[serde(serialize_with = "metric", deserialize_with = "metric_from")]
    pub train_metric: f64,
    /// Test NRMSE; `+inf` when the reservoir reported a non-finite value.
    #[serde(serialize_with = "metric", deserialize_with = "metric_from")]
    pub test_metric: f64,
    pub local_mean_r_mean: f64,
    pub local_mean_r_std: f64,
    pub chi_mean: f64,
    pub chi_std: f64,
    pub chi_max: f64,
    /// Criticality samples accumulated during the test window.
    pub samples: usize,
}

/// Exported sweep record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepExport {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub config_hash: Option<String>,
    pub protocol: Option<SweepProtocol>,
    pub snapshot: Option<Value>,
    pub results: Vec<SweepResult>,
}

impl SweepExport {
    pub fn to_json_string(&self) -> Result<String, OfsError> {
        to_pretty_json(self)
    }
}

pub const CSV_HEADER: [&str; 9] = [
    "k",
    "train_metric",
    "test_metric",
    "local_mean_r_mean",
    "local_mean_r_std",
    "chi_mean",
    "chi_std",
    "chi_max",
    "samples",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Session {
    Training,
    Inference,
}

struct Baseline {
    control: f64,
    field: Option<Vec<f32>>,
}

#[derive(Default)]
struct Accumulator {
    local_mean_r: Vec<f64>,
    chi: Vec<f64>,
}

impl Accumulator {
    fn clear(&mut self) {
        self.local_mean_r.clear();
        self.chi.clear();
    }
}

/// State machine driving one criticality sweep at a time.
pub struct SweepRunner {
    reservoir: Box<dyn Reservoir>,
    stats: Box<dyn StatsTracker>,
    protocol: Option<SweepProtocol>,
    snapshot: Option<Value>,
    config_hash: Option<String>,
    phase: SweepPhase,
    active: bool,
    cancel_requested: bool,
    k_index: usize,
    sample_in_phase: u64,
    train_metric: f64,
    session: Option<Session>,
    accumulator: Accumulator,
    results: Vec<SweepResult>,
    baseline_control: f64,
    baseline: Option<Baseline>,
    baseline_read: InFlight<Vec<f32>>,
    step_submitted: bool,
    stats_requested: bool,
    stats_flight: InFlight<OrderReadback>,
    phase_read: InFlight<Vec<f32>>,
    finish_requested: Option<RunOutcome>,
    steps_issued: u64,
    phase_reads_completed: u64,
    listener: Option<StatusListener<SweepStatus>>,
    status: SweepStatus,
}

impl SweepRunner {
    pub fn new(reservoir: Box<dyn Reservoir>, stats: Box<dyn StatsTracker>) -> Self {
        Self {
            reservoir,
            stats,
            protocol: None,
            snapshot: None,
            config_hash: None,
            phase: SweepPhase::Idle,
            active: false,
            cancel_requested: false,
            k_index: 0,
            sample_in_phase: 0,
            train_metric: f64::INFINITY,
            session: None,
            accumulator: Accumulator::default(),
            results: Vec::new(),
            baseline_control: 0.0,
            baseline: None,
            baseline_read: InFlight::default(),
            step_submitted: false,
            stats_requested: false,
            stats_flight: InFlight::default(),
            phase_read: InFlight::default(),
            finish_requested: None,
            steps_issued: 0,
            phase_reads_completed: 0,
            listener: None,
            status: SweepStatus::default(),
        }
    }

    pub fn on_status(&mut self, listener: impl FnMut(&SweepStatus) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn status(&self) -> &SweepStatus {
        &self.status
    }

    pub fn phase(&self) -> SweepPhase {
        self.phase
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn results(&self) -> &[SweepResult] {
        &self.results
    }

    pub fn protocol(&self) -> Option<&SweepProtocol> {
        self.protocol.as_ref()
    }

    /// Backend steps issued since the runner was created.
    pub fn steps_issued(&self) -> u64 {
        self.steps_issued
    }

    /// Phase reads that have settled since the runner was created.
    pub fn phase_reads_completed(&self) -> u64 {
        self.phase_reads_completed
    }

    /// Accepts a sweep and starts capturing the baseline. Returns `false` when
    /// a sweep is already active.
    ///
    /// The first control value begins once the baseline field read resolves,
    /// which may be on a later frame; until then the runner is `Initializing`.
    pub fn start<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        plan: &SweepPlan,
        snapshot: &Value,
    ) -> bool {
        if self.active {
            return false;
        }
        let protocol = plan.normalize();
        self.config_hash = match config_hash(snapshot, &protocol) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(error = %err, "config fingerprint unavailable");
                None
            }
        };
        info!(
            values = protocol.k_values.len(),
            k_min = protocol.k_min,
            k_max = protocol.k_max,
            config_hash = self.config_hash.as_deref().unwrap_or("-"),
            "sweep started"
        );
        self.protocol = Some(protocol);
        self.snapshot = Some(snapshot.clone());
        self.results.clear();
        self.accumulator.clear();
        self.k_index = 0;
        self.sample_in_phase = 0;
        self.train_metric = f64::INFINITY;
        self.session = None;
        self.cancel_requested = false;
        self.finish_requested = None;
        self.step_submitted = false;
        self.stats_requested = false;
        self.baseline = None;
        self.baseline_control = backend.control_value();
        self.baseline_read.launch(backend.read_full_state(), ());
        self.phase = SweepPhase::Initializing;
        self.active = true;
        self.emit();
        self.drain(backend);
        true
    }

    /// Requests cooperative cancellation, observed at the next phase-advance
    /// check.
    pub fn cancel(&mut self) {
        if !self.active {
            return;
        }
        self.cancel_requested = true;
    }

    /// Encodes at most one step, and only once the previous step's sample has
    /// been consumed.
    pub fn encode_steps<B: ComputeBackend>(&mut self, backend: &mut B, batch: &mut B::Batch) {
        if !self.active
            || self.step_submitted
            || self.phase_read.is_busy()
            || self.finish_requested.is_some()
            || !matches!(self.phase, SweepPhase::WarmupTrain | SweepPhase::Test)
        {
            return;
        }
        let Some(protocol) = self.protocol.as_ref() else {
            return;
        };
        let should_stats =
            self.phase == SweepPhase::Test && self.sample_in_phase % protocol.stats_every == 0;
        backend.step(
            batch,
            protocol.delay_steps,
            protocol.global_coupling,
            should_stats,
        );
        if should_stats {
            backend.request_order_readback(batch);
        }
        self.step_submitted = true;
        self.stats_requested = should_stats;
        self.steps_issued += 1;
    }

    /// Launches this step's statistics and phase reads and consumes whatever
    /// has resolved.
    pub fn after_submit<B: ComputeBackend>(&mut self, backend: &mut B) {
        self.drain(backend);
        if !self.active || !self.step_submitted {
            return;
        }
        if self.stats_requested && backend.readback_pending() && !self.stats_flight.is_busy() {
            self.stats_requested = false;
            self.stats_flight.launch(backend.process_readback(), ());
        }
        if !self.phase_read.is_busy() {
            self.phase_read.launch(backend.read_full_state(), ());
        }
        self.drain(backend);
    }

    pub fn export_json(&self) -> SweepExport {
        SweepExport {
            kind: "criticality_sweep".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            config_hash: self.config_hash.clone(),
            protocol: self.protocol.clone(),
            snapshot: self.snapshot.clone(),
            results: self.results.clone(),
        }
    }

    /// One CSV row per completed control value.
    pub fn export_csv(&self) -> Result<String, OfsError> {
        results_to_csv(&self.results)
    }

    fn drain<B: ComputeBackend>(&mut self, backend: &mut B) {
        if let Some(settled) = self.baseline_read.poll_settled() {
            self.on_baseline(backend, settled.value);
        }
        if let Some(settled) = self.stats_flight.poll_settled() {
            self.on_stats(settled.value);
            if let Some(outcome) = self.finish_requested {
                self.finish(backend, outcome);
            }
        }
        if let Some(settled) = self.phase_read.poll_settled() {
            self.phase_reads_completed += 1;
            self.on_phase_sample(backend, settled.value);
        }
    }

    fn on_baseline<B: ComputeBackend>(&mut self, backend: &mut B, field: Option<Vec<f32>>) {
        if field.is_none() {
            warn!("baseline field read resolved empty; only the control value will be restored");
        }
        self.baseline = Some(Baseline {
            control: self.baseline_control,
            field,
        });
        if self.cancel_requested {
            self.request_finish(backend, RunOutcome::Canceled);
            return;
        }
        self.start_k(backend);
    }

    fn on_stats(&mut self, readback: Option<OrderReadback>) {
        let Some(readback) = readback else {
            return;
        };
        self.stats
            .update(readback.cos, readback.sin, readback.local_stats.as_ref());
        let chi = self.stats.chi();
        let warmup = self.protocol.as_ref().map_or(0, |p| p.warmup_samples);
        if self.phase == SweepPhase::Test
            && self.finish_requested.is_none()
            && self.sample_in_phase >= warmup
        {
            let local = readback.local_stats.unwrap_or_default();
            self.accumulator.local_mean_r.push(local.mean_r);
            self.accumulator.chi.push(chi);
        } else {
            debug!(
                phase = ?self.phase,
                sample = self.sample_in_phase,
                "statistics readback outside the test window dropped"
            );
        }
    }

    fn on_phase_sample<B: ComputeBackend>(&mut self, backend: &mut B, state: Option<Vec<f32>>) {
        self.step_submitted = false;
        self.stats_requested = false;
        match state {
            Some(state) => {
                let (index, size) = self
                    .protocol
                    .as_ref()
                    .map_or((0, 0), |p| (p.reservoir.layer_index, p.reservoir.layer_size));
                self.reservoir.step(layer_slice(&state, index, size));
                if self.reservoir.relocates_input() {
                    backend.write_input_weights(&self.reservoir.input_weights());
                }
                backend.set_injected_signal(self.reservoir.input_signal());
                self.sample_in_phase += 1;
            }
            None => debug!("phase read resolved empty"),
        }
        self.advance_phase_if_needed(backend);
    }

    fn advance_phase_if_needed<B: ComputeBackend>(&mut self, backend: &mut B) {
        if self.cancel_requested {
            self.request_finish(backend, RunOutcome::Canceled);
            return;
        }
        let Some(protocol) = self.protocol.as_ref() else {
            return;
        };
        let train_target = protocol.train_phase_samples();
        let test_target = protocol.test_phase_samples();
        let k_count = protocol.k_values.len();
        let k = protocol.k_values.get(self.k_index).copied().unwrap_or(0.0);

        match self.phase {
            SweepPhase::WarmupTrain if self.sample_in_phase >= train_target => {
                self.train_metric = non_finite_as_inf(self.reservoir.stop_training());
                if !self.reservoir.start_inference() {
                    warn!(k, "inference started without a trained readout");
                }
                self.session = Some(Session::Inference);
                self.phase = SweepPhase::Test;
                self.sample_in_phase = 0;
                debug!(k, train_metric = self.train_metric, "training complete");
                self.emit();
            }
            SweepPhase::Test if self.sample_in_phase >= test_target => {
                self.reservoir.stop_inference();
                self.session = None;
                let test_metric = non_finite_as_inf(self.reservoir.compute_test_nrmse());
                let local = mean_std(&self.accumulator.local_mean_r);
                let chi = mean_std(&self.accumulator.chi);
                let result = SweepResult {
                    k,
                    train_metric: self.train_metric,
                    test_metric,
                    local_mean_r_mean: local.mean,
                    local_mean_r_std: local.std,
                    chi_mean: chi.mean,
                    chi_std: chi.std,
                    chi_max: max_or_zero(&self.accumulator.chi),
                    samples: self.accumulator.chi.len(),
                };
                if result.train_metric.is_infinite() || result.test_metric.is_infinite() {
                    warn!(k, "non-finite reservoir metric recorded as +inf");
                }
                info!(
                    k,
                    train = result.train_metric,
                    test = result.test_metric,
                    chi_mean = result.chi_mean,
                    "control value complete"
                );
                self.results.push(result);
                self.k_index += 1;
                if self.k_index >= k_count {
                    self.request_finish(backend, RunOutcome::Done);
                } else {
                    self.start_k(backend);
                }
            }
            _ => self.emit(),
        }
    }

    /// Resets all per-value state and opens a fresh training session.
    fn start_k<B: ComputeBackend>(&mut self, backend: &mut B) {
        let Some(protocol) = self.protocol.as_ref() else {
            return;
        };
        let Some(&k) = protocol.k_values.get(self.k_index) else {
            return;
        };
        let config = protocol.reservoir_config();
        let task = protocol.reservoir.task.clone();
        let history = protocol.reservoir.history_length;
        let budget = protocol.reservoir.feature_budget;

        self.accumulator.clear();
        self.stats.reset();
        backend.write_control_value(k);
        backend.reset_field();
        backend.set_injected_signal(0.0);
        self.reservoir.configure(&config);
        if !self.reservoir.set_task(&task) {
            warn!(task = %task, "unknown reservoir task; previous task kept");
        }
        self.reservoir.set_history_length(history);
        self.reservoir.set_feature_budget(budget);
        backend.write_input_weights(&self.reservoir.input_weights());
        self.reservoir.start_training();
        self.session = Some(Session::Training);
        self.train_metric = f64::INFINITY;
        self.phase = SweepPhase::WarmupTrain;
        self.sample_in_phase = 0;
        info!(k, index = self.k_index, "control value started");
        self.emit();
    }

    fn request_finish<B: ComputeBackend>(&mut self, backend: &mut B, outcome: RunOutcome) {
        if self.stats_flight.is_busy() {
            debug!(outcome = ?outcome, "finish deferred until statistics readback drains");
            self.finish_requested = Some(outcome);
            self.emit();
        } else {
            self.finish(backend, outcome);
        }
    }

    fn finish<B: ComputeBackend>(&mut self, backend: &mut B, outcome: RunOutcome) {
        self.active = false;
        self.finish_requested = None;
        self.cancel_requested = false;
        self.step_submitted = false;
        self.stats_requested = false;
        match self.session.take() {
            Some(Session::Training) => {
                self.reservoir.stop_training();
            }
            Some(Session::Inference) => self.reservoir.stop_inference(),
            None => {}
        }
        backend.set_injected_signal(0.0);
        if let Some(baseline) = self.baseline.take() {
            backend.write_control_value(baseline.control);
            if let Some(field) = baseline.field.as_deref() {
                backend.write_full_state(field);
            }
        }
        self.phase = outcome.into();
        info!(outcome = ?outcome, results = self.results.len(), "sweep finished");
        self.emit();
    }

    fn emit(&mut self) {
        let (k_count, k, phase_samples) = match self.protocol.as_ref() {
            Some(protocol) => (
                protocol.k_values.len(),
                protocol.k_values.get(self.k_index).copied(),
                match self.phase {
                    SweepPhase::WarmupTrain => protocol.train_phase_samples(),
                    SweepPhase::Test => protocol.test_phase_samples(),
                    _ => 0,
                },
            ),
            None => (0, None, 0),
        };
        self.status = SweepStatus {
            phase: self.phase,
            active: self.active,
            k_index: self.k_index,
            k_count,
            k,
            sample_in_phase: self.sample_in_phase,
            phase_samples,
            completed: self.results.len(),
            config_hash: self.config_hash.clone(),
            results: self.phase.is_terminal().then(|| self.results.clone()),
        };
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.status);
        }
    }
}

fn non_finite_as_inf(value: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        f64::INFINITY
    }
}

/// Units of layer `index` when layers hold `size` units each; the whole field
/// when `size` is zero or the layer lies outside the state.
pub fn layer_slice(state: &[f32], index: usize, size: usize) -> &[f32] {
    if size == 0 {
        return state;
    }
    let start = index.saturating_mul(size);
    let end = start.saturating_add(size).min(state.len());
    match state.get(start..end) {
        Some(slice) if !slice.is_empty() => slice,
        _ => state,
    }
}

/// Renders results with fixed precision: `k` to 3 decimals, metrics to 6.
pub fn results_to_csv(results: &[SweepResult]) -> Result<String, OfsError> {
    let mut writer = csv::WriterBuilder::new().from_writer(Vec::new());
    writer
        .write_record(CSV_HEADER)
        .map_err(|err| csv_error("sweep-csv-header", err))?;
    for result in results {
        writer
            .write_record([
                format!("{:.3}", result.k),
                format!("{:.6}", result.train_metric),
                format!("{:.6}", result.test_metric),
                format!("{:.6}", result.local_mean_r_mean),
                format!("{:.6}", result.local_mean_r_std),
                format!("{:.6}", result.chi_mean),
                format!("{:.6}", result.chi_std),
                format!("{:.6}", result.chi_max),
                result.samples.to_string(),
            ])
            .map_err(|err| csv_error("sweep-csv-row", err))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|err| OfsError::Export(ErrorInfo::new("sweep-csv-flush", err.to_string())))?;
    String::from_utf8(bytes)
        .map_err(|err| OfsError::Export(ErrorInfo::new("sweep-csv-utf8", err.to_string())))
}

fn csv_error(code: &str, err: csv::Error) -> OfsError {
    OfsError::Export(ErrorInfo::new(code, err.to_string()))
}
