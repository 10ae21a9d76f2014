mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{CountingStats, MockBackend, MockReservoir, ReservoirLog};
use ofs_exp::{ReservoirPlan, SweepPhase, SweepPlan, SweepRunner};
use serde_json::json;

fn frame(runner: &mut SweepRunner, backend: &mut MockBackend) {
    runner.encode_steps(backend, &mut ());
    runner.after_submit(backend);
}

fn runner() -> (SweepRunner, Rc<RefCell<ReservoirLog>>) {
    let (reservoir, log) = MockReservoir::new();
    let (stats, _) = CountingStats::new();
    (SweepRunner::new(Box::new(reservoir), Box::new(stats)), log)
}

fn small_plan(k_min: f64, k_max: f64, k_step: f64) -> SweepPlan {
    SweepPlan {
        k_min,
        k_max,
        k_step,
        warmup_samples: 1.0,
        train_samples: 2.0,
        test_samples: 3.0,
        stats_every: 1.0,
        ..SweepPlan::default()
    }
}

#[test]
fn default_plan_covers_twelve_values() {
    let protocol = SweepPlan::default().normalize();
    assert_eq!(protocol.k_values.len(), 12);
    assert_eq!(protocol.k_values.first().copied(), Some(0.2));
    assert_eq!(protocol.k_values.last().copied(), Some(2.4));
    assert_eq!(protocol.k_values[2], 0.6);
}

#[test]
fn completes_every_value_and_restores_baseline() {
    let mut backend = MockBackend::new(6);
    let baseline_field = backend.field.clone();
    let (mut runner, log) = runner();
    let terminal = Rc::new(RefCell::new(0usize));
    let seen = Rc::clone(&terminal);
    runner.on_status(move |status| {
        if status.phase.is_terminal() {
            *seen.borrow_mut() += 1;
        }
    });

    assert!(runner.start(&mut backend, &small_plan(0.5, 0.7, 0.1), &json!({"units": 6})));
    assert_eq!(runner.phase(), SweepPhase::WarmupTrain);
    assert_eq!(runner.status().k, Some(0.5));
    assert_eq!(backend.control, 0.5);
    assert_eq!(
        runner.protocol().map(|p| p.k_values.clone()),
        Some(vec![0.5, 0.6, 0.7])
    );

    let mut frames = 0;
    while runner.is_active() && frames < 100 {
        frame(&mut runner, &mut backend);
        frames += 1;
    }
    assert_eq!(runner.phase(), SweepPhase::Done);
    assert_eq!(frames, 21);
    assert_eq!(runner.steps_issued(), 21);
    assert_eq!(runner.phase_reads_completed(), 21);
    assert_eq!(*terminal.borrow(), 1);

    let results = runner.results();
    assert_eq!(
        results.iter().map(|r| r.k).collect::<Vec<_>>(),
        vec![0.5, 0.6, 0.7]
    );
    for result in results {
        assert_eq!(result.samples, 3);
        assert_eq!(result.train_metric, 0.25);
        assert_eq!(result.test_metric, 0.5);
        assert_eq!(result.local_mean_r_mean, 0.5);
        assert_eq!(result.chi_max, 4.0);
    }
    assert_eq!(runner.status().results.as_ref().map(Vec::len), Some(3));

    assert_eq!(backend.control, 1.25);
    assert_eq!(backend.field, baseline_field);
    assert_eq!(backend.injected, 0.0);
    assert_eq!(backend.resets, 3);
    assert_eq!(backend.stats_steps, 12);

    let log = log.borrow();
    assert_eq!(log.steps, 21);
    assert_eq!(log.configs.len(), 3);
    assert_eq!(log.configs[0].washout, 1);
    assert_eq!(
        log.calls.iter().filter(|c| **c == "stop_inference").count(),
        3
    );
    assert_eq!(log.calls.last().copied(), Some("stop_inference"));
}

#[test]
fn cancel_mid_value_restores_baseline() {
    let mut backend = MockBackend::new(6);
    let baseline_field = backend.field.clone();
    let (mut runner, log) = runner();
    assert!(runner.start(&mut backend, &small_plan(0.5, 0.7, 0.1), &json!({})));
    for _ in 0..5 {
        frame(&mut runner, &mut backend);
    }
    assert_eq!(runner.phase(), SweepPhase::Test);

    runner.cancel();
    frame(&mut runner, &mut backend);
    assert_eq!(runner.phase(), SweepPhase::Canceled);
    assert!(!runner.is_active());
    assert!(runner.results().is_empty());
    assert_eq!(backend.control, 1.25);
    assert_eq!(backend.field, baseline_field);
    assert_eq!(log.borrow().calls.last().copied(), Some("stop_inference"));

    let steps = backend.steps;
    frame(&mut runner, &mut backend);
    assert_eq!(backend.steps, steps);
}

#[test]
fn cancel_during_baseline_capture() {
    let mut backend = MockBackend::new(4);
    backend.hold_state_reads = true;
    let (mut runner, log) = runner();
    assert!(runner.start(&mut backend, &small_plan(1.0, 1.0, 0.1), &json!({})));
    assert_eq!(runner.phase(), SweepPhase::Initializing);
    assert!(!runner.start(&mut backend, &small_plan(2.0, 2.0, 0.1), &json!({})));

    runner.cancel();
    frame(&mut runner, &mut backend);
    assert_eq!(runner.phase(), SweepPhase::Initializing);
    assert_eq!(backend.steps, 0);

    backend.release_state_reads();
    frame(&mut runner, &mut backend);
    assert_eq!(runner.phase(), SweepPhase::Canceled);
    assert_eq!(backend.control_writes, vec![1.25]);
    assert!(log.borrow().calls.is_empty());
}

#[test]
fn never_runs_more_than_one_step_ahead() {
    let mut backend = MockBackend::new(4);
    backend.hold_state_reads = true;
    let (mut runner, _) = runner();
    assert!(runner.start(&mut backend, &small_plan(0.5, 0.6, 0.1), &json!({})));
    assert_eq!(runner.phase(), SweepPhase::Initializing);
    backend.release_state_reads();

    for frame_index in 0..60 {
        frame(&mut runner, &mut backend);
        assert!(runner.steps_issued() <= runner.phase_reads_completed() + 1);
        if frame_index % 3 == 2 {
            backend.release_state_reads();
        }
    }
    assert!(runner.steps_issued() > 0);
    assert_eq!(backend.steps, runner.steps_issued());
}

#[test]
fn stats_resolving_after_phase_change_are_dropped() {
    let mut backend = MockBackend::new(4);
    backend.hold_readbacks = true;
    let (mut runner, _) = runner();
    let plan = SweepPlan {
        k_min: 1.0,
        k_max: 2.0,
        k_step: 1.0,
        warmup_samples: 0.0,
        train_samples: 1.0,
        test_samples: 2.0,
        stats_every: 1.0,
        ..SweepPlan::default()
    };
    assert!(runner.start(&mut backend, &plan, &json!({})));

    for _ in 0..3 {
        frame(&mut runner, &mut backend);
    }
    assert_eq!(runner.results().len(), 1);
    assert_eq!(runner.phase(), SweepPhase::WarmupTrain);
    assert_eq!(backend.held_readbacks(), 1);

    backend.release_readbacks();
    backend.hold_readbacks = false;
    while runner.is_active() {
        frame(&mut runner, &mut backend);
    }
    let results = runner.results();
    assert_eq!(results[0].samples, 0);
    assert_eq!(results[0].chi_max, 0.0);
    assert_eq!(results[1].samples, 2);
}

#[test]
fn finish_waits_for_statistics_readback() {
    let mut backend = MockBackend::new(4);
    backend.hold_readbacks = true;
    let (mut runner, _) = runner();
    let plan = SweepPlan {
        k_min: 1.0,
        k_max: 1.0,
        warmup_samples: 0.0,
        train_samples: 1.0,
        test_samples: 2.0,
        stats_every: 1.0,
        ..SweepPlan::default()
    };
    assert!(runner.start(&mut backend, &plan, &json!({})));
    for _ in 0..3 {
        frame(&mut runner, &mut backend);
    }
    assert_eq!(runner.results().len(), 1);
    assert!(runner.is_active());

    frame(&mut runner, &mut backend);
    assert!(runner.is_active());
    assert_eq!(backend.steps, 3);

    backend.release_readbacks();
    frame(&mut runner, &mut backend);
    assert_eq!(runner.phase(), SweepPhase::Done);
    assert_eq!(runner.results()[0].samples, 0);
}

#[test]
fn non_finite_metrics_are_reported_as_infinity() {
    let mut backend = MockBackend::new(4);
    let (mut reservoir, _) = MockReservoir::new();
    reservoir.test_metric = f64::NAN;
    let (stats, _) = CountingStats::new();
    let mut runner = SweepRunner::new(Box::new(reservoir), Box::new(stats));
    assert!(runner.start(&mut backend, &small_plan(1.0, 1.0, 0.1), &json!({})));
    while runner.is_active() {
        frame(&mut runner, &mut backend);
    }
    assert_eq!(runner.results()[0].test_metric, f64::INFINITY);

    let text = runner.export_json().to_json_string().expect("json");
    let value: serde_json::Value = serde_json::from_str(&text).expect("parse");
    assert_eq!(value["type"], "criticality_sweep");
    assert_eq!(value["results"][0]["test_metric"], "Infinity");

    let csv = runner.export_csv().expect("csv");
    let row = csv.lines().nth(1).expect("row");
    assert!(row.starts_with("1.000,0.250000,inf,"));
}

#[test]
fn csv_has_one_row_per_value() {
    let mut backend = MockBackend::new(4);
    let (mut runner, _) = runner();
    assert!(runner.start(&mut backend, &small_plan(0.5, 0.7, 0.1), &json!({})));
    while runner.is_active() {
        frame(&mut runner, &mut backend);
    }
    let csv = runner.export_csv().expect("csv");
    assert_eq!(csv.lines().count(), 4);
    assert!(csv.lines().nth(2).expect("row").starts_with("0.600,"));

    let export = runner.export_json();
    assert_eq!(export.results.len(), 3);
    assert_eq!(export.config_hash, runner.status().config_hash);
    assert_eq!(export.protocol.expect("protocol").k_values, vec![0.5, 0.6, 0.7]);
}

#[test]
fn relocating_task_rewrites_input_weights_each_sample() {
    let mut backend = MockBackend::new(8);
    let (mut reservoir, log) = MockReservoir::new();
    reservoir.relocates = true;
    let (stats, _) = CountingStats::new();
    let mut runner = SweepRunner::new(Box::new(reservoir), Box::new(stats));
    let plan = SweepPlan {
        reservoir: ReservoirPlan {
            layer_index: 1.0,
            layer_size: 4.0,
            ..ReservoirPlan::default()
        },
        ..small_plan(1.0, 1.0, 0.1)
    };
    assert!(runner.start(&mut backend, &plan, &json!({})));
    while runner.is_active() {
        frame(&mut runner, &mut backend);
    }
    let log = log.borrow();
    assert_eq!(backend.weight_writes, 1 + log.steps);
    assert_eq!(log.last_slice_len, 4);
}
