#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use futures::channel::oneshot;
use futures::future::{self, FutureExt};
use ofs_core::{
    ComputeBackend, LocalStats, OrderReadback, Pending, Reservoir, ReservoirConfig,
    ReservoirStep, StatsTracker,
};

/// Backend double whose reads either resolve immediately or stay parked until
/// the test releases them.
pub struct MockBackend {
    pub field: Vec<f32>,
    pub control: f64,
    pub injected: f64,
    pub steps: u64,
    pub stats_steps: u64,
    pub state_reads: u64,
    pub control_writes: Vec<f64>,
    pub state_writes: Vec<Vec<f32>>,
    pub weight_writes: usize,
    pub resets: usize,
    pub hold_readbacks: bool,
    pub hold_state_reads: bool,
    pub readback: OrderReadback,
    readback_pending: bool,
    held_readbacks: Vec<oneshot::Sender<Option<OrderReadback>>>,
    held_states: Vec<oneshot::Sender<Option<Vec<f32>>>>,
}

impl MockBackend {
    pub fn new(units: usize) -> Self {
        Self {
            field: (0..units).map(|i| i as f32 * 0.1).collect(),
            control: 1.25,
            injected: 0.0,
            steps: 0,
            stats_steps: 0,
            state_reads: 0,
            control_writes: Vec::new(),
            state_writes: Vec::new(),
            weight_writes: 0,
            resets: 0,
            hold_readbacks: false,
            hold_state_reads: false,
            readback: OrderReadback {
                cos: 0.6,
                sin: 0.8,
                local_stats: Some(LocalStats {
                    mean_r: 0.5,
                    gradient: 0.1,
                    sync_fraction: 0.25,
                }),
            },
            readback_pending: false,
            held_readbacks: Vec::new(),
            held_states: Vec::new(),
        }
    }

    pub fn held_readbacks(&self) -> usize {
        self.held_readbacks.len()
    }

    pub fn held_state_reads(&self) -> usize {
        self.held_states.len()
    }

    pub fn release_readbacks(&mut self) {
        for tx in self.held_readbacks.drain(..) {
            let _ = tx.send(Some(self.readback));
        }
    }

    pub fn release_state_reads(&mut self) {
        for tx in self.held_states.drain(..) {
            let _ = tx.send(Some(self.field.clone()));
        }
    }
}

impl ComputeBackend for MockBackend {
    type Batch = ();

    fn step(&mut self, _batch: &mut (), _delay_steps: u32, _global: bool, compute_stats: bool) {
        self.steps += 1;
        if compute_stats {
            self.stats_steps += 1;
        }
        for unit in &mut self.field {
            *unit += 0.01;
        }
    }

    fn request_order_readback(&mut self, _batch: &mut ()) {
        self.readback_pending = true;
    }

    fn readback_pending(&self) -> bool {
        self.readback_pending
    }

    fn process_readback(&mut self) -> Pending<OrderReadback> {
        self.readback_pending = false;
        if self.hold_readbacks {
            let (tx, rx) = oneshot::channel();
            self.held_readbacks.push(tx);
            rx.map(|res| res.ok().flatten()).boxed()
        } else {
            future::ready(Some(self.readback)).boxed()
        }
    }

    fn read_full_state(&mut self) -> Pending<Vec<f32>> {
        self.state_reads += 1;
        if self.hold_state_reads {
            let (tx, rx) = oneshot::channel();
            self.held_states.push(tx);
            rx.map(|res| res.ok().flatten()).boxed()
        } else {
            future::ready(Some(self.field.clone())).boxed()
        }
    }

    fn write_full_state(&mut self, data: &[f32]) {
        self.field = data.to_vec();
        self.state_writes.push(data.to_vec());
    }

    fn write_control_value(&mut self, value: f64) {
        self.control = value;
        self.control_writes.push(value);
    }

    fn control_value(&self) -> f64 {
        self.control
    }

    fn reset_field(&mut self) {
        self.resets += 1;
        for unit in &mut self.field {
            *unit = 0.0;
        }
    }

    fn write_input_weights(&mut self, _weights: &[f32]) {
        self.weight_writes += 1;
    }

    fn set_injected_signal(&mut self, value: f64) {
        self.injected = value;
    }
}

/// Tracker that reports the number of updates since the last reset as chi.
pub struct CountingStats {
    pub updates: Rc<RefCell<usize>>,
    since_reset: usize,
}

impl CountingStats {
    pub fn new() -> (Self, Rc<RefCell<usize>>) {
        let updates = Rc::new(RefCell::new(0));
        (
            Self {
                updates: Rc::clone(&updates),
                since_reset: 0,
            },
            updates,
        )
    }
}

impl StatsTracker for CountingStats {
    fn update(&mut self, _cos: f64, _sin: f64, _local: Option<&LocalStats>) {
        *self.updates.borrow_mut() += 1;
        self.since_reset += 1;
    }

    fn chi(&self) -> f64 {
        self.since_reset as f64
    }

    fn reset(&mut self) {
        self.since_reset = 0;
    }
}

#[derive(Debug, Default)]
pub struct ReservoirLog {
    pub calls: Vec<&'static str>,
    pub steps: usize,
    pub configs: Vec<ReservoirConfig>,
    pub tasks: Vec<String>,
    pub last_slice_len: usize,
}

pub struct MockReservoir {
    pub log: Rc<RefCell<ReservoirLog>>,
    pub train_metric: f64,
    pub test_metric: f64,
    pub relocates: bool,
    signal: f64,
}

impl MockReservoir {
    pub fn new() -> (Self, Rc<RefCell<ReservoirLog>>) {
        let log = Rc::new(RefCell::new(ReservoirLog::default()));
        (
            Self {
                log: Rc::clone(&log),
                train_metric: 0.25,
                test_metric: 0.5,
                relocates: false,
                signal: 0.0,
            },
            log,
        )
    }
}

impl Reservoir for MockReservoir {
    fn configure(&mut self, config: &ReservoirConfig) {
        self.log.borrow_mut().configs.push(config.clone());
    }

    fn set_task(&mut self, name: &str) -> bool {
        self.log.borrow_mut().tasks.push(name.to_string());
        name == "delay"
    }

    fn set_history_length(&mut self, _length: usize) {}

    fn set_feature_budget(&mut self, _budget: usize) {}

    fn start_training(&mut self) {
        self.log.borrow_mut().calls.push("start_training");
    }

    fn stop_training(&mut self) -> f64 {
        self.log.borrow_mut().calls.push("stop_training");
        self.train_metric
    }

    fn start_inference(&mut self) -> bool {
        self.log.borrow_mut().calls.push("start_inference");
        true
    }

    fn stop_inference(&mut self) {
        self.log.borrow_mut().calls.push("stop_inference");
    }

    fn compute_test_nrmse(&self) -> f64 {
        self.test_metric
    }

    fn step(&mut self, state: &[f32]) -> ReservoirStep {
        let mut log = self.log.borrow_mut();
        log.steps += 1;
        log.last_slice_len = state.len();
        self.signal = log.steps as f64 * 0.1;
        ReservoirStep {
            input: self.signal,
            prediction: None,
            target: None,
        }
    }

    fn input_signal(&self) -> f64 {
        self.signal
    }

    fn input_weights(&self) -> Vec<f32> {
        vec![1.0; 4]
    }

    fn relocates_input(&self) -> bool {
        self.relocates
    }
}
