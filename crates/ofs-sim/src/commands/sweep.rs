use std::error::Error;
use std::path::PathBuf;

use clap::Args;
use ofs_exp::{write_export, SweepPhase, SweepRunner};
use ofs_ref::{CpuBatch, CriticalityTracker, EchoReservoir, KuramotoField};
use tracing::{info, warn};

use crate::job::load_sweep_job;

use super::DRAIN_FRAMES;

#[derive(Args, Debug)]
pub struct SweepArgs {
    /// YAML or JSON job with `field` and `protocol` sections.
    #[arg(long)]
    pub plan: PathBuf,
    /// Output directory for `sweep_export.json` and `sweep_results.csv`.
    #[arg(long)]
    pub out: PathBuf,
    /// Overrides the field and reservoir seeds.
    #[arg(long)]
    pub seed: Option<u64>,
    /// Frames to run before the sweep is canceled.
    #[arg(long, default_value_t = 10_000_000)]
    pub max_frames: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SweepReport {
    pub phase: SweepPhase,
    pub frames: u64,
    pub completed: usize,
    pub config_hash: Option<String>,
    pub export_path: PathBuf,
    pub csv_path: PathBuf,
}

pub fn run(args: &SweepArgs) -> Result<(), Box<dyn Error>> {
    let report = execute(args)?;
    println!(
        "{} {:?} values={} -> {}",
        report.config_hash.as_deref().unwrap_or("-"),
        report.phase,
        report.completed,
        report.csv_path.display()
    );
    Ok(())
}

pub fn execute(args: &SweepArgs) -> Result<SweepReport, Box<dyn Error>> {
    let job = load_sweep_job(&args.plan)?.with_seed(args.seed);
    let mut field = KuramotoField::new(job.field.clone())?;
    let tracker = CriticalityTracker::new(job.field.total_units(), job.tracker_window);
    let mut runner = SweepRunner::new(Box::new(EchoReservoir::default()), Box::new(tracker));

    if !runner.start(&mut field, &job.protocol, &job.snapshot()) {
        return Err("sweep runner refused to start".into());
    }

    let mut frames = 0u64;
    let mut budget = args.max_frames;
    while runner.is_active() {
        if frames == budget {
            if budget > args.max_frames {
                return Err(format!("sweep did not settle after {frames} frames").into());
            }
            warn!(frames, "frame budget exhausted; canceling sweep");
            runner.cancel();
            budget += DRAIN_FRAMES;
        }
        let mut batch = CpuBatch::default();
        runner.encode_steps(&mut field, &mut batch);
        runner.after_submit(&mut field);
        field.advance_frame();
        frames += 1;
    }

    let export = runner.export_json();
    let export_path = write_export(&args.out, "sweep_export.json", &export.to_json_string()?)?;
    let csv_path = write_export(&args.out, "sweep_results.csv", &runner.export_csv()?)?;
    info!(frames, phase = ?runner.phase(), "sweep command complete");
    Ok(SweepReport {
        phase: runner.phase(),
        frames,
        completed: runner.results().len(),
        config_hash: export.config_hash,
        export_path,
        csv_path,
    })
}
