//! Dirties a working set continuously and reports lost or stale pages.

use std::{
    process::ExitCode,
    sync::{Arc, atomic::AtomicBool},
};

use clap::Parser;
use guestmem_dirty::workload::{WorkloadConfig, run_workload};

#[derive(Parser, Debug)]
#[command(
    name = "dirty-workload",
    about = "Write and verify markers across a working set until interrupted."
)]
struct Args {
    /// Working set size in bytes, split across the workers
    working_set: usize,

    /// Number of workers
    #[arg(default_value_t = 1)]
    workers: usize,

    /// Distance between markers in bytes
    #[arg(default_value_t = WorkloadConfig::DEFAULT_STRIDE)]
    stride: usize,

    /// Stop after this many passes per worker
    #[arg(long, value_name = "COUNT")]
    passes: Option<u64>,

    /// Raise the log level
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    let level = match args.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        _ => tracing::Level::DEBUG,
    };

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let terminate_flag = Arc::new(AtomicBool::new(false));
    signal_hook::flag::register(signal_hook::consts::SIGHUP, terminate_flag.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGINT, terminate_flag.clone())?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, terminate_flag.clone())?;

    let config = WorkloadConfig {
        working_set: args.working_set,
        workers: args.workers,
        stride: args.stride,
        passes: args.passes,
    };

    let outcomes = run_workload(&config, &terminate_flag)?;

    let mut failed = false;
    for outcome in &outcomes {
        if let Some(corruption) = &outcome.corruption {
            println!("{corruption}");
            failed = true;
        }

        println!(
            "collected worker: {} after {} passes",
            outcome.id, outcome.passes
        );
    }

    if failed {
        Ok(ExitCode::FAILURE)
    }
    else {
        Ok(ExitCode::SUCCESS)
    }
}
