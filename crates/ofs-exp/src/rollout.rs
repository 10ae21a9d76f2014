//! Warmup + measurement rollout over a compute backend.
//!
//! The runner issues steps from `encode_steps` and consumes readbacks from
//! `after_submit`. Readbacks resolve on the backend's schedule, so the end of
//! the step budget and the end of the run are decoupled: reaching the last
//! step latches the outcome and moves to `Finalizing`, and whichever path
//! next observes an empty pipeline (no pending readback, nothing being
//! processed) performs the single transition to `Done`/`Canceled`.

use chrono::Utc;
use ofs_core::{ComputeBackend, OfsError, OrderReadback, StatsTracker};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::hash::config_hash;
use crate::inflight::InFlight;
use crate::plan::{RolloutPlan, RolloutProtocol};
use crate::serde::to_pretty_json;
use crate::status::{RolloutPhase, RolloutStatus, RolloutSummary, RunOutcome, StatusListener};
use crate::summary::{downsample, max_or_zero, mean_std, DEFAULT_MAX_POINTS};

/// Per-frame dynamic parameters forwarded to every backend step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StepParams {
    pub delay_steps: u32,
    pub global_coupling: bool,
}

/// Parallel sample series indexed by relative measurement step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct RolloutSeries {
    pub step: Vec<u64>,
    pub global_r: Vec<f64>,
    pub local_mean_r: Vec<f64>,
    pub gradient: Vec<f64>,
    pub sync_fraction: Vec<f64>,
    pub chi: Vec<f64>,
}

impl RolloutSeries {
    pub fn len(&self) -> usize {
        self.step.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step.is_empty()
    }

    fn clear(&mut self) {
        *self = Self::default();
    }

    fn summarize(&self) -> RolloutSummary {
        RolloutSummary {
            samples: self.len(),
            global_r: mean_std(&self.global_r),
            local_mean_r: mean_std(&self.local_mean_r),
            gradient: mean_std(&self.gradient),
            sync_fraction: mean_std(&self.sync_fraction),
            chi: mean_std(&self.chi),
            chi_max: max_or_zero(&self.chi),
        }
    }

    /// Each series reduced independently to at most `max_points` entries.
    pub fn downsampled(&self, max_points: usize) -> Self {
        Self {
            step: downsample(&self.step, max_points),
            global_r: downsample(&self.global_r, max_points),
            local_mean_r: downsample(&self.local_mean_r, max_points),
            gradient: downsample(&self.gradient, max_points),
            sync_fraction: downsample(&self.sync_fraction, max_points),
            chi: downsample(&self.chi, max_points),
        }
    }
}

/// Exported rollout record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RolloutExport {
    #[serde(rename = "type")]
    pub kind: String,
    pub timestamp: String,
    pub config_hash: Option<String>,
    pub url: Option<String>,
    pub state: Option<Value>,
    pub protocol: Option<RolloutProtocol>,
    pub summary: Option<RolloutSummary>,
    pub timeseries: Option<RolloutSeries>,
}

impl RolloutExport {
    pub fn to_json_string(&self) -> Result<String, OfsError> {
        to_pretty_json(self)
    }
}

/// State machine driving one rollout at a time.
pub struct RolloutRunner {
    protocol: Option<RolloutProtocol>,
    snapshot: Option<Value>,
    config_hash: Option<String>,
    url: Option<String>,
    phase: RolloutPhase,
    running: bool,
    cancel_requested: bool,
    step_index: u64,
    last_readback_step: Option<u64>,
    /// Relative index of the most recently requested, not yet launched readback.
    pending_sample: Option<u64>,
    finish_requested: Option<RunOutcome>,
    processing: InFlight<OrderReadback, Option<u64>>,
    series: RolloutSeries,
    summary: Option<RolloutSummary>,
    stats: Option<Box<dyn StatsTracker>>,
    listener: Option<StatusListener<RolloutStatus>>,
    status: RolloutStatus,
}

impl Default for RolloutRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl RolloutRunner {
    pub fn new() -> Self {
        Self {
            protocol: None,
            snapshot: None,
            config_hash: None,
            url: None,
            phase: RolloutPhase::Idle,
            running: false,
            cancel_requested: false,
            step_index: 0,
            last_readback_step: None,
            pending_sample: None,
            finish_requested: None,
            processing: InFlight::default(),
            series: RolloutSeries::default(),
            summary: None,
            stats: None,
            listener: None,
            status: RolloutStatus::default(),
        }
    }

    /// Attaches a statistics collaborator fed by every resolved readback.
    pub fn with_stats(mut self, stats: Box<dyn StatsTracker>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn set_stats(&mut self, stats: Option<Box<dyn StatsTracker>>) {
        self.stats = stats;
    }

    pub fn take_stats(&mut self) -> Option<Box<dyn StatsTracker>> {
        self.stats.take()
    }

    /// Origin recorded in exports (the page or tool that produced the run).
    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = Some(url.into());
    }

    pub fn on_status(&mut self, listener: impl FnMut(&RolloutStatus) + 'static) {
        self.listener = Some(Box::new(listener));
    }

    pub fn status(&self) -> &RolloutStatus {
        &self.status
    }

    pub fn phase(&self) -> RolloutPhase {
        self.phase
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    pub fn series(&self) -> &RolloutSeries {
        &self.series
    }

    pub fn summary(&self) -> Option<&RolloutSummary> {
        self.summary.as_ref()
    }

    /// Begins a run. Returns `false` without touching any state when a run is
    /// already in progress.
    pub fn start(&mut self, plan: &RolloutPlan, snapshot: &Value) -> bool {
        if self.running {
            return false;
        }
        let protocol = plan.normalize();
        let hash = match config_hash(snapshot, &protocol) {
            Ok(hash) => Some(hash),
            Err(err) => {
                warn!(error = %err, "config fingerprint unavailable");
                None
            }
        };
        self.protocol = Some(protocol);
        self.snapshot = Some(snapshot.clone());
        self.config_hash = hash;
        self.step_index = 0;
        self.last_readback_step = None;
        self.pending_sample = None;
        self.finish_requested = None;
        self.cancel_requested = false;
        self.series.clear();
        self.summary = None;
        if let Some(stats) = self.stats.as_mut() {
            stats.reset();
        }
        self.phase = if protocol.warmup_steps > 0 {
            RolloutPhase::Warmup
        } else {
            RolloutPhase::Measure
        };
        self.running = true;
        info!(
            warmup = protocol.warmup_steps,
            measure = protocol.measure_steps,
            config_hash = self.config_hash.as_deref().unwrap_or("-"),
            "rollout started"
        );
        self.emit();
        true
    }

    /// Requests cooperative cancellation. The next batch runs one step and
    /// then stops.
    pub fn cancel(&mut self) {
        if !self.running {
            return;
        }
        self.cancel_requested = true;
    }

    /// Encodes this frame's steps into `batch`.
    pub fn encode_steps<B: ComputeBackend>(
        &mut self,
        backend: &mut B,
        batch: &mut B::Batch,
        params: &StepParams,
    ) {
        if !self.running {
            return;
        }
        let Some(protocol) = self.protocol else {
            return;
        };

        // Nothing is stepped once finalization is latched.
        let budget = if self.finish_requested.is_some() {
            0
        } else {
            let remaining = protocol.total_steps().saturating_sub(self.step_index);
            protocol.steps_per_frame.min(remaining)
        };
        for _ in 0..budget {
            self.step_index += 1;
            if self.phase == RolloutPhase::Warmup && self.step_index > protocol.warmup_steps {
                self.phase = RolloutPhase::Measure;
            }
            let relative = self.step_index.saturating_sub(protocol.warmup_steps);
            let should_readback =
                self.phase == RolloutPhase::Measure && relative % protocol.readback_every == 0;
            backend.step(
                batch,
                params.delay_steps,
                params.global_coupling,
                should_readback,
            );
            if should_readback {
                backend.request_order_readback(batch);
                self.last_readback_step = Some(self.step_index);
                self.pending_sample = Some(relative);
            }
            if self.cancel_requested {
                break;
            }
        }

        let outcome = if self.cancel_requested {
            Some(RunOutcome::Canceled)
        } else if self.step_index >= protocol.total_steps() {
            Some(RunOutcome::Done)
        } else {
            None
        };
        match outcome {
            Some(outcome) => {
                self.finish_requested = Some(outcome);
                self.phase = RolloutPhase::Finalizing;
                if self.drained(backend) {
                    self.finish(outcome);
                } else {
                    debug!(step = self.step_index, "finalize deferred until readback drains");
                    self.emit();
                }
            }
            None => self.emit(),
        }
    }

    /// Consumes readbacks after the frame's commands were submitted.
    pub fn after_submit<B: ComputeBackend>(&mut self, backend: &mut B) {
        self.drain_readback(backend);
        if self.phase == RolloutPhase::Idle
            || self.processing.is_busy()
            || !backend.readback_pending()
        {
            return;
        }
        let sample = self.pending_sample.take();
        self.processing.launch(backend.process_readback(), sample);
        self.drain_readback(backend);
    }

    /// Plain export record; each series is downsampled independently.
    pub fn export_json(&self) -> RolloutExport {
        RolloutExport {
            kind: "rollout".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            config_hash: self.config_hash.clone(),
            url: self.url.clone(),
            state: self.snapshot.clone(),
            protocol: self.protocol,
            summary: self.summary.clone(),
            timeseries: self
                .protocol
                .map(|_| self.series.downsampled(DEFAULT_MAX_POINTS)),
        }
    }

    fn drained<B: ComputeBackend>(&self, backend: &B) -> bool {
        !backend.readback_pending() && !self.processing.is_busy()
    }

    fn drain_readback<B: ComputeBackend>(&mut self, backend: &B) {
        let Some(settled) = self.processing.poll_settled() else {
            return;
        };
        self.apply_readback(settled.tag, settled.value);
        if let Some(outcome) = self.finish_requested {
            if self.drained(backend) {
                self.finish(outcome);
                return;
            }
        }
        self.emit();
    }

    fn apply_readback(&mut self, sample: Option<u64>, readback: Option<OrderReadback>) {
        let Some(readback) = readback else {
            debug!("readback resolved empty");
            return;
        };
        let chi = match self.stats.as_mut() {
            Some(stats) => {
                stats.update(readback.cos, readback.sin, readback.local_stats.as_ref());
                stats.chi()
            }
            None => 0.0,
        };
        let (Some(relative), Some(protocol)) = (sample, self.protocol) else {
            return;
        };
        if relative < 1 || relative > protocol.measure_steps {
            warn!(
                relative,
                measure_steps = protocol.measure_steps,
                "discarding readback outside the measurement window"
            );
            return;
        }
        let local = readback.local_stats.unwrap_or_default();
        self.series.step.push(relative);
        self.series.global_r.push(readback.global_r());
        self.series.local_mean_r.push(local.mean_r);
        self.series.gradient.push(local.gradient);
        self.series.sync_fraction.push(local.sync_fraction);
        self.series.chi.push(chi);
    }

    fn finish(&mut self, outcome: RunOutcome) {
        self.running = false;
        self.phase = outcome.into();
        self.finish_requested = None;
        self.cancel_requested = false;
        let summary = self.series.summarize();
        info!(
            outcome = ?outcome,
            samples = summary.samples,
            global_r = summary.global_r.mean,
            chi_max = summary.chi_max,
            "rollout finished"
        );
        self.summary = Some(summary);
        self.emit();
    }

    fn emit(&mut self) {
        let protocol = self.protocol;
        self.status = RolloutStatus {
            phase: self.phase,
            running: self.running,
            step_index: self.step_index,
            total_steps: protocol.map_or(0, |p| p.total_steps()),
            warmup_steps: protocol.map_or(0, |p| p.warmup_steps),
            measure_steps: protocol.map_or(0, |p| p.measure_steps),
            samples: self.series.len(),
            last_readback_step: self.last_readback_step,
            config_hash: self.config_hash.clone(),
            summary: self.summary.clone(),
        };
        if let Some(listener) = self.listener.as_mut() {
            listener(&self.status);
        }
    }
}
