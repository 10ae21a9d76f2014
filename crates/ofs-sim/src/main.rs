use std::error::Error;

use clap::{Parser, Subcommand};
use ofs_sim::commands::{
    rollout::{self, RolloutArgs},
    sweep::{self, SweepArgs},
    version::{self, VersionArgs},
};

#[derive(Parser, Debug)]
#[command(name = "ofs-sim", about = "Oscillator-field rollout and criticality sweep CLI")]
struct Cli {
    /// Log filter used when `RUST_LOG` is unset.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a warmup + measurement rollout and export its time series.
    Rollout(RolloutArgs),
    /// Train and test the reservoir across a range of coupling strengths.
    Sweep(SweepArgs),
    /// Print version information.
    Version(VersionArgs),
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    ofs_sim::init_tracing(&cli.log_level);
    match cli.command {
        Command::Rollout(args) => rollout::run(&args),
        Command::Sweep(args) => sweep::run(&args),
        Command::Version(args) => version::run(&args),
    }
}
