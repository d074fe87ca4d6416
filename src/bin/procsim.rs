//! procsim — Run the process-scheduler simulation from a config file.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

use procsim::{report, Scheduler, SimConfig};

/// Run the process-scheduler simulation from a config file.
#[derive(Parser)]
#[command(name = "procsim")]
struct Cli {
    /// Path to the key/value config file.
    config: Option<PathBuf>,

    /// How long to let the process generator run, in milliseconds.
    #[arg(short, long, default_value_t = 2000)]
    duration_ms: u64,

    /// Where to write the utilization report.
    #[arg(long, default_value = "csopesy-log.txt")]
    report: PathBuf,

    /// Directory for periodic memory snapshots.
    #[arg(long, default_value = ".")]
    snapshot_dir: PathBuf,

    /// Disable periodic memory snapshots.
    #[arg(long)]
    no_snapshots: bool,

    /// Seed for the program generator.
    #[arg(long)]
    seed: Option<u64>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut config = match &cli.config {
        Some(path) => SimConfig::load(path)?,
        None => SimConfig::default(),
    };
    config.snapshot_dir = (!cli.no_snapshots).then(|| cli.snapshot_dir.clone());
    if let Some(seed) = cli.seed {
        config.seed = seed;
    }

    let mut scheduler = Scheduler::new(config);
    scheduler.start();
    scheduler.start_generation();

    std::thread::sleep(Duration::from_millis(cli.duration_ms));

    scheduler.stop_generation();
    scheduler.wait_until_idle();

    report::write_to_file(&scheduler, &cli.report)?;
    print!("{}", report::render(&scheduler));
    println!(
        "{} processes finished in {} ticks",
        scheduler.finished_processes().len(),
        scheduler.elapsed_ticks()
    );

    scheduler.stop();
    Ok(())
}
