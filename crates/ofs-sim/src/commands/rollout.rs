use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use ofs_exp::{write_export, RolloutPhase, RolloutRunner};
use ofs_ref::{CpuBatch, CriticalityTracker, KuramotoField};
use tracing::{info, warn};

use crate::job::load_rollout_job;

use super::DRAIN_FRAMES;

#[derive(Args, Debug)]
pub struct RolloutArgs {
    /// YAML or JSON job with `field` and `protocol` sections.
    #[arg(long)]
    pub plan: PathBuf,
    /// Output directory for `rollout_export.json`.
    #[arg(long)]
    pub out: PathBuf,
    /// Overrides the field seed.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Frames to run before the rollout is canceled.
    #[arg(long, default_value_t = 1_000_000)]
    pub max_frames: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RolloutReport {
    pub phase: RolloutPhase,
    pub frames: u64,
    pub samples: usize,
    pub config_hash: Option<String>,
    pub export_path: PathBuf,
}

pub fn run(args: &RolloutArgs) -> Result<(), Box<dyn Error>> {
    let report = execute(args)?;
    println!(
        "{} {:?} samples={} -> {}",
        report.config_hash.as_deref().unwrap_or("-"),
        report.phase,
        report.samples,
        report.export_path.display()
    );
    Ok(())
}

pub fn execute(args: &RolloutArgs) -> Result<RolloutReport, Box<dyn Error>> {
    let job = load_rollout_job(&args.plan)?.with_seed(args.seed);
    let mut field = KuramotoField::new(job.field.clone())?;
    let tracker = CriticalityTracker::new(job.field.total_units(), job.tracker_window);
    let mut runner = RolloutRunner::new().with_stats(Box::new(tracker));
    runner.set_url(format!("file://{}", args.plan.display()));

    if !runner.start(&job.protocol, &job.snapshot()) {
        return Err("rollout runner refused to start".into());
    }

    let mut frames = 0u64;
    let mut budget = args.max_frames;
    while runner.is_running() {
        if frames == budget {
            if budget > args.max_frames {
                return Err(format!("rollout did not settle after {frames} frames").into());
            }
            warn!(
                frames,
                progress = runner.status().progress(),
                "frame budget exhausted; canceling rollout"
            );
            runner.cancel();
            budget += DRAIN_FRAMES;
        }
        let mut batch = CpuBatch::default();
        runner.encode_steps(&mut field, &mut batch, &job.step);
        runner.after_submit(&mut field);
        field.advance_frame();
        frames += 1;
    }

    let export = runner.export_json();
    let export_path = write_export(&args.out, "rollout_export.json", &export.to_json_string()?)?;
    info!(frames, phase = ?runner.phase(), "rollout command complete");
    Ok(RolloutReport {
        phase: runner.phase(),
        frames,
        samples: runner.series().len(),
        config_hash: export.config_hash,
        export_path,
    })
}
