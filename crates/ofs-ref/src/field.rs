//! CPU Kuramoto field implementing [`ComputeBackend`].
//!
//! Units form `layers` rings of `units` oscillators each. Every step applies
//! one Euler update of
//!
//! ```text
//! dθᵢ/dt = ωᵢ + K · C_i(θ_delayed) + s · w_i
//! ```
//!
//! where `C_i` is either the mean-field term `R sin(ψ - θᵢ)` (global coupling)
//! or the neighbour average of `sin(θⱼ - θᵢ)` over the two ring neighbours and
//! the same unit in adjacent layers. `s` is the injected signal and `w` the
//! uploaded input weights, tiled across the field.

use std::collections::VecDeque;
use std::f64::consts::TAU;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::FutureExt;
use ofs_core::{
    ComputeBackend, ErrorInfo, LocalStats, OfsError, OrderReadback, Pending, RngHandle,
};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Longest phase history kept for delayed coupling.
pub const MAX_DELAY_STEPS: u32 = 64;

const FREQUENCY_STREAM: u64 = 0;
const PHASE_STREAM: u64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Oscillators per layer.
    #[serde(default = "default_units")]
    pub units: usize,
    #[serde(default = "default_layers")]
    pub layers: usize,
    /// Euler integration step.
    #[serde(default = "default_dt")]
    pub dt: f64,
    /// Initial control value.
    #[serde(default = "default_coupling")]
    pub coupling: f64,
    /// Standard deviation of the natural frequencies.
    #[serde(default = "default_frequency_spread")]
    pub frequency_spread: f64,
    /// Local order above which a unit counts as synchronised.
    #[serde(default = "default_sync_threshold")]
    pub sync_threshold: f64,
    /// Frames a readback or state read waits before resolving.
    #[serde(default)]
    pub readback_latency: u64,
    #[serde(default)]
    pub seed: u64,
}

fn default_units() -> usize {
    64
}

fn default_layers() -> usize {
    1
}

fn default_dt() -> f64 {
    0.05
}

fn default_coupling() -> f64 {
    1.0
}

fn default_frequency_spread() -> f64 {
    0.5
}

fn default_sync_threshold() -> f64 {
    0.8
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            units: default_units(),
            layers: default_layers(),
            dt: default_dt(),
            coupling: default_coupling(),
            frequency_spread: default_frequency_spread(),
            sync_threshold: default_sync_threshold(),
            readback_latency: 0,
            seed: 0,
        }
    }
}

impl FieldConfig {
    pub fn validate(&self) -> Result<(), OfsError> {
        if self.units < 3 {
            return Err(OfsError::Backend(
                ErrorInfo::new("field-units", "a ring needs at least three units")
                    .with_context("units", self.units.to_string()),
            ));
        }
        if self.layers == 0 {
            return Err(OfsError::Backend(ErrorInfo::new(
                "field-layers",
                "at least one layer is required",
            )));
        }
        if !(self.dt.is_finite() && self.dt > 0.0) {
            return Err(OfsError::Backend(
                ErrorInfo::new("field-dt", "integration step must be positive")
                    .with_context("dt", self.dt.to_string()),
            ));
        }
        Ok(())
    }

    pub fn total_units(&self) -> usize {
        self.units * self.layers
    }
}

/// Commands encoded during one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuBatch {
    pub steps: usize,
    pub readback_requests: usize,
}

/// Future that resolves once the shared frame clock reaches `ready_at`.
///
/// The runners poll with a no-op waker on every frame, so no wakeup is
/// registered here.
struct FrameDelayed<T> {
    value: Option<T>,
    ready_at: u64,
    clock: Arc<AtomicU64>,
}

impl<T: Unpin> Future for FrameDelayed<T> {
    type Output = Option<T>;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        if this.clock.load(Ordering::Acquire) >= this.ready_at {
            Poll::Ready(this.value.take())
        } else {
            Poll::Pending
        }
    }
}

pub struct KuramotoField {
    config: FieldConfig,
    phases: Vec<f64>,
    frequencies: Vec<f64>,
    history: VecDeque<Vec<f64>>,
    input_weights: Vec<f64>,
    coupling: f64,
    injected: f64,
    steps: u64,
    last_local: Option<LocalStats>,
    requested: Option<OrderReadback>,
    clock: Arc<AtomicU64>,
}

impl KuramotoField {
    pub fn new(config: FieldConfig) -> Result<Self, OfsError> {
        config.validate()?;
        let n = config.total_units();
        let mut freq_rng = RngHandle::substream(config.seed, FREQUENCY_STREAM);
        let frequencies = (0..n)
            .map(|_| freq_rng.normal() * config.frequency_spread)
            .collect();
        let mut field = Self {
            coupling: config.coupling,
            phases: vec![0.0; n],
            frequencies,
            history: VecDeque::with_capacity(MAX_DELAY_STEPS as usize + 1),
            input_weights: Vec::new(),
            injected: 0.0,
            steps: 0,
            last_local: None,
            requested: None,
            clock: Arc::new(AtomicU64::new(0)),
            config,
        };
        field.reset_field();
        Ok(field)
    }

    pub fn config(&self) -> &FieldConfig {
        &self.config
    }

    pub fn phases(&self) -> &[f64] {
        &self.phases
    }

    pub fn steps(&self) -> u64 {
        self.steps
    }

    pub fn injected_signal(&self) -> f64 {
        self.injected
    }

    /// Ticks the frame clock that delayed reads resolve against.
    pub fn advance_frame(&self) {
        self.clock.fetch_add(1, Ordering::AcqRel);
    }

    /// Global order parameter of the current phases.
    pub fn order(&self) -> (f64, f64) {
        mean_phasor(&self.phases)
    }

    fn delayed<T: Send + Unpin + 'static>(&self, value: T) -> Pending<T> {
        let ready_at = self.clock.load(Ordering::Acquire) + self.config.readback_latency;
        FrameDelayed {
            value: Some(value),
            ready_at,
            clock: Arc::clone(&self.clock),
        }
        .boxed()
    }

    fn delayed_phases(&self, delay_steps: u32) -> &[f64] {
        let delay = delay_steps.min(MAX_DELAY_STEPS) as usize;
        if delay == 0 {
            return &self.phases;
        }
        self.history
            .get(delay - 1)
            .or_else(|| self.history.back())
            .map_or(&self.phases, Vec::as_slice)
    }

    fn neighbours(&self, index: usize) -> impl Iterator<Item = usize> {
        let units = self.config.units;
        let layers = self.config.layers;
        let layer = index / units;
        let pos = index % units;
        let base = layer * units;
        let ring = [base + (pos + units - 1) % units, base + (pos + 1) % units];
        let below = (layer > 0).then(|| index - units);
        let above = (layer + 1 < layers).then(|| index + units);
        ring.into_iter().chain(below).chain(above)
    }

    fn local_stats(&self) -> LocalStats {
        let n = self.phases.len();
        let mut mean_r = 0.0;
        let mut gradient = 0.0;
        let mut synced = 0usize;
        for i in 0..n {
            let (mut c, mut s) = (self.phases[i].cos(), self.phases[i].sin());
            let mut count = 1.0;
            for j in self.neighbours(i) {
                c += self.phases[j].cos();
                s += self.phases[j].sin();
                count += 1.0;
            }
            let local = (c / count).hypot(s / count);
            mean_r += local;
            if local > self.config.sync_threshold {
                synced += 1;
            }
            let layer_base = (i / self.config.units) * self.config.units;
            let next = layer_base + (i % self.config.units + 1) % self.config.units;
            gradient += wrap_angle(self.phases[next] - self.phases[i]).abs();
        }
        let n = n as f64;
        LocalStats {
            mean_r: mean_r / n,
            gradient: gradient / n,
            sync_fraction: synced as f64 / n,
        }
    }
}

impl ComputeBackend for KuramotoField {
    type Batch = CpuBatch;

    fn step(
        &mut self,
        batch: &mut CpuBatch,
        delay_steps: u32,
        global_coupling: bool,
        compute_stats: bool,
    ) {
        let coupled = self.delayed_phases(delay_steps);
        let mean_field = global_coupling.then(|| mean_phasor(coupled));
        let mut next = Vec::with_capacity(self.phases.len());
        for (i, &theta) in self.phases.iter().enumerate() {
            let coupling = match mean_field {
                Some((c, s)) => {
                    let r = c.hypot(s);
                    r * (s.atan2(c) - theta).sin()
                }
                None => {
                    let mut sum = 0.0;
                    let mut degree = 0.0;
                    for j in self.neighbours(i) {
                        sum += (coupled[j] - theta).sin();
                        degree += 1.0;
                    }
                    sum / degree
                }
            };
            let weight = if self.input_weights.is_empty() {
                0.0
            } else {
                self.input_weights[i % self.input_weights.len()]
            };
            let d_theta = self.frequencies[i] + self.coupling * coupling + self.injected * weight;
            next.push((theta + self.config.dt * d_theta).rem_euclid(TAU));
        }
        let previous = std::mem::replace(&mut self.phases, next);
        self.history.push_front(previous);
        self.history.truncate(MAX_DELAY_STEPS as usize);
        self.steps += 1;
        self.last_local = compute_stats.then(|| self.local_stats());
        batch.steps += 1;
    }

    fn request_order_readback(&mut self, batch: &mut CpuBatch) {
        let (cos, sin) = self.order();
        self.requested = Some(OrderReadback {
            cos,
            sin,
            local_stats: self.last_local,
        });
        batch.readback_requests += 1;
    }

    fn readback_pending(&self) -> bool {
        self.requested.is_some()
    }

    fn process_readback(&mut self) -> Pending<OrderReadback> {
        match self.requested.take() {
            Some(readback) => self.delayed(readback),
            None => futures::future::ready(None).boxed(),
        }
    }

    fn read_full_state(&mut self) -> Pending<Vec<f32>> {
        let snapshot: Vec<f32> = self.phases.iter().map(|&p| p as f32).collect();
        self.delayed(snapshot)
    }

    fn write_full_state(&mut self, data: &[f32]) {
        if data.len() != self.phases.len() {
            warn!(
                expected = self.phases.len(),
                got = data.len(),
                "field state size mismatch; copying the overlap"
            );
        }
        for (phase, &value) in self.phases.iter_mut().zip(data) {
            *phase = f64::from(value).rem_euclid(TAU);
        }
        self.history.clear();
    }

    fn write_control_value(&mut self, value: f64) {
        self.coupling = value;
    }

    fn control_value(&self) -> f64 {
        self.coupling
    }

    fn reset_field(&mut self) {
        let mut rng = RngHandle::substream(self.config.seed, PHASE_STREAM);
        for phase in &mut self.phases {
            *phase = rng.uniform(0.0, TAU);
        }
        self.history.clear();
        self.last_local = None;
    }

    fn write_input_weights(&mut self, weights: &[f32]) {
        self.input_weights = weights.iter().map(|&w| f64::from(w)).collect();
    }

    fn set_injected_signal(&mut self, value: f64) {
        self.injected = value;
    }
}

fn mean_phasor(phases: &[f64]) -> (f64, f64) {
    if phases.is_empty() {
        return (0.0, 0.0);
    }
    let n = phases.len() as f64;
    let (c, s) = phases
        .iter()
        .fold((0.0, 0.0), |(c, s), p| (c + p.cos(), s + p.sin()));
    (c / n, s / n)
}

/// Maps an angle difference into `(-π, π]`.
fn wrap_angle(delta: f64) -> f64 {
    let wrapped = delta.rem_euclid(TAU);
    if wrapped > std::f64::consts::PI {
        wrapped - TAU
    } else {
        wrapped
    }
}
