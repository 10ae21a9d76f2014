//! Delay-recall echo reservoir with an NLMS linear readout.
//!
//! The task draws a uniform input `u_t ∈ [-1, 1)` each sample; the field is
//! driven with `input_scale · u_t` and the readout is asked to recall the input
//! injected `history_length` samples earlier from the current field state.
//! Features are `cos θ` and `sin θ` of strided units of the layer slice plus a
//! bias, capped by the feature budget.

use std::collections::VecDeque;

use ofs_core::{Reservoir, ReservoirConfig, ReservoirStep, RngHandle};
use serde::{Deserialize, Serialize};
use tracing::debug;

const INPUT_STREAM: u64 = 2;
const WEIGHT_STREAM: u64 = 3;
/// Input-weight length when the layer size is unknown; the field tiles it.
pub const DEFAULT_INPUT_UNITS: usize = 32;
const NLMS_EPSILON: f64 = 1e-6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Task {
    /// Fixed random input weights.
    Delay,
    /// Input injected through a block of units that moves one unit per sample.
    DelayRelocating,
}

impl Task {
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "delay" => Some(Task::Delay),
            "delay-relocating" => Some(Task::DelayRelocating),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Task::Delay => "delay",
            Task::DelayRelocating => "delay-relocating",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Idle,
    Training,
    Inference,
}

#[derive(Debug, Clone, Default)]
struct Score {
    count: usize,
    sum_sq_err: f64,
    sum_target: f64,
    sum_target_sq: f64,
}

impl Score {
    fn record(&mut self, prediction: f64, target: f64) {
        let err = prediction - target;
        self.count += 1;
        self.sum_sq_err += err * err;
        self.sum_target += target;
        self.sum_target_sq += target * target;
    }

    /// RMSE over the target's standard deviation; NaN when undefined.
    fn nrmse(&self) -> f64 {
        if self.count == 0 {
            return f64::NAN;
        }
        let n = self.count as f64;
        let mean = self.sum_target / n;
        let variance = self.sum_target_sq / n - mean * mean;
        if variance <= 1e-12 {
            return f64::NAN;
        }
        (self.sum_sq_err / n).sqrt() / variance.sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct EchoReservoir {
    config: ReservoirConfig,
    task: Task,
    history_length: usize,
    feature_budget: usize,
    rng: RngHandle,
    /// Raw injected inputs, most recent first.
    inputs: VecDeque<f64>,
    current: f64,
    readout: Vec<f64>,
    base_weights: Vec<f32>,
    position: usize,
    mode: Mode,
    fitted: usize,
    session_samples: usize,
    train_score: Score,
    test_score: Score,
}

impl Default for EchoReservoir {
    fn default() -> Self {
        Self::new(&ReservoirConfig::default())
    }
}

impl EchoReservoir {
    pub fn new(config: &ReservoirConfig) -> Self {
        let mut reservoir = Self {
            config: config.clone(),
            task: Task::Delay,
            history_length: 1,
            feature_budget: 64,
            rng: RngHandle::substream(config.seed, INPUT_STREAM),
            inputs: VecDeque::new(),
            current: 0.0,
            readout: Vec::new(),
            base_weights: Vec::new(),
            position: 0,
            mode: Mode::Idle,
            fitted: 0,
            session_samples: 0,
            train_score: Score::default(),
            test_score: Score::default(),
        };
        reservoir.configure(config);
        reservoir
    }

    pub fn task(&self) -> Task {
        self.task
    }

    pub fn history_length(&self) -> usize {
        self.history_length
    }

    pub fn readout(&self) -> &[f64] {
        &self.readout
    }

    fn input_units(&self) -> usize {
        if self.config.layer_size > 0 {
            self.config.layer_size
        } else {
            DEFAULT_INPUT_UNITS
        }
    }

    fn features(&self, state: &[f32]) -> Vec<f64> {
        let pairs = (self.feature_budget.saturating_sub(1) / 2).min(state.len());
        let mut features = Vec::with_capacity(1 + 2 * pairs);
        features.push(1.0);
        for j in 0..pairs {
            let theta = f64::from(state[j * state.len() / pairs]);
            features.push(theta.cos());
            features.push(theta.sin());
        }
        features
    }

    fn target(&self) -> Option<f64> {
        self.inputs.get(self.history_length).copied()
    }

    fn advance_input(&mut self) {
        let raw = self.rng.uniform(-1.0, 1.0);
        self.inputs.push_front(raw);
        self.inputs.truncate(self.history_length + 1);
        self.current = raw * self.config.input_scale;
        if self.task == Task::DelayRelocating {
            self.position = (self.position + 1) % self.input_units();
        }
    }

    fn fit(&mut self, features: &[f64], target: f64) {
        if self.readout.len() != features.len() {
            self.readout = vec![0.0; features.len()];
        }
        let prediction = dot(&self.readout, features);
        self.train_score.record(prediction, target);
        let norm = features.iter().map(|x| x * x).sum::<f64>();
        let gain = self.config.learning_rate * (target - prediction) / (NLMS_EPSILON + norm);
        for (w, x) in self.readout.iter_mut().zip(features) {
            *w += gain * x;
        }
        self.fitted += 1;
    }
}

impl Reservoir for EchoReservoir {
    fn configure(&mut self, config: &ReservoirConfig) {
        self.config = config.clone();
        self.rng = RngHandle::substream(config.seed, INPUT_STREAM);
        let mut weight_rng = RngHandle::substream(config.seed, WEIGHT_STREAM);
        self.base_weights = (0..self.input_units())
            .map(|_| weight_rng.uniform(-1.0, 1.0) as f32)
            .collect();
        self.inputs.clear();
        self.current = 0.0;
        self.readout.clear();
        self.position = 0;
        self.mode = Mode::Idle;
        self.fitted = 0;
        self.session_samples = 0;
        self.train_score = Score::default();
        self.test_score = Score::default();
    }

    fn set_task(&mut self, name: &str) -> bool {
        match Task::from_name(name) {
            Some(task) => {
                self.task = task;
                true
            }
            None => false,
        }
    }

    fn set_history_length(&mut self, length: usize) {
        self.history_length = length.max(1);
    }

    fn set_feature_budget(&mut self, budget: usize) {
        self.feature_budget = budget.max(3);
    }

    fn start_training(&mut self) {
        self.mode = Mode::Training;
        self.readout.clear();
        self.fitted = 0;
        self.session_samples = 0;
        self.train_score = Score::default();
    }

    fn stop_training(&mut self) -> f64 {
        self.mode = Mode::Idle;
        let nrmse = self.train_score.nrmse();
        debug!(fitted = self.fitted, nrmse, "readout training stopped");
        nrmse
    }

    fn start_inference(&mut self) -> bool {
        if self.fitted == 0 {
            return false;
        }
        self.mode = Mode::Inference;
        self.session_samples = 0;
        self.test_score = Score::default();
        true
    }

    fn stop_inference(&mut self) {
        self.mode = Mode::Idle;
    }

    fn compute_test_nrmse(&self) -> f64 {
        self.test_score.nrmse()
    }

    fn step(&mut self, state: &[f32]) -> ReservoirStep {
        let features = self.features(state);
        let target = self.target();
        self.session_samples += 1;
        let scored = self.session_samples > self.config.washout;
        let prediction = match (self.mode, target) {
            (Mode::Training, Some(t)) if scored => {
                self.fit(&features, t);
                Some(dot(&self.readout, &features))
            }
            (Mode::Inference, Some(t)) if scored => {
                let p = dot(&self.readout, &features);
                self.test_score.record(p, t);
                Some(p)
            }
            _ if !self.readout.is_empty() => Some(dot(&self.readout, &features)),
            _ => None,
        };
        self.advance_input();
        ReservoirStep {
            input: self.current,
            prediction,
            target,
        }
    }

    fn input_signal(&self) -> f64 {
        self.current
    }

    fn input_weights(&self) -> Vec<f32> {
        match self.task {
            Task::Delay => self.base_weights.clone(),
            Task::DelayRelocating => {
                let units = self.input_units();
                let width = (units / 8).max(1);
                (0..units)
                    .map(|i| {
                        if (i + units - self.position) % units < width {
                            1.0
                        } else {
                            0.0
                        }
                    })
                    .collect()
            }
        }
    }

    fn relocates_input(&self) -> bool {
        self.task == Task::DelayRelocating
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}
