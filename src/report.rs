//! Utilization report rendering (`screen -ls` / `report-util`).

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use crate::scheduler::Scheduler;
use crate::types::CoreId;

/// Render the CPU and process summary: utilization, core counts and
/// per-core busy ticks, then the running, sleeping and finished lists
/// with per-process core binding and instruction progress.
pub fn render(scheduler: &Scheduler) -> String {
    let mut out = String::new();

    writeln!(out, "CPU utilization: {:.0}%", scheduler.cpu_utilization()).unwrap();
    writeln!(out, "Cores used: {}", scheduler.cores_used()).unwrap();
    writeln!(out, "Cores available: {}", scheduler.cores_available()).unwrap();
    let elapsed = scheduler.elapsed_ticks().max(1);
    for i in 0..scheduler.num_cores() as u32 {
        let busy = scheduler.core_ticks_used(CoreId(i));
        writeln!(
            out,
            "Core {i}: {busy} busy ticks ({:.0}%)",
            100.0 * busy as f64 / elapsed as f64
        )
        .unwrap();
    }
    writeln!(out).unwrap();

    writeln!(out, "Running processes:").unwrap();
    for (core, process) in scheduler.running_processes() {
        let p = process.lock().unwrap();
        let (done, total) = p.progress();
        writeln!(
            out,
            "{}  ({})  Core: {}   {} / {}",
            p.name,
            p.created_at.format("%m/%d/%Y %I:%M:%S%p"),
            core,
            done,
            total
        )
        .unwrap();
    }
    writeln!(out).unwrap();

    let sleeping = scheduler.sleeping_processes();
    if !sleeping.is_empty() {
        writeln!(out, "Sleeping processes:").unwrap();
        for process in sleeping {
            let p = process.lock().unwrap();
            let (done, total) = p.progress();
            writeln!(
                out,
                "{}  ({})  wakes at tick {}   {} / {}",
                p.name,
                p.created_at.format("%m/%d/%Y %I:%M:%S%p"),
                p.wake_at(),
                done,
                total
            )
            .unwrap();
        }
        writeln!(out).unwrap();
    }

    let pending = scheduler.pending_processes();
    if !pending.is_empty() {
        writeln!(out, "Waiting for memory:").unwrap();
        for process in pending {
            let p = process.lock().unwrap();
            writeln!(
                out,
                "{}  ({})",
                p.name,
                p.created_at.format("%m/%d/%Y %I:%M:%S%p")
            )
            .unwrap();
        }
        writeln!(out).unwrap();
    }

    writeln!(out, "Finished processes:").unwrap();
    for process in scheduler.finished_processes() {
        let p = process.lock().unwrap();
        let (_, total) = p.progress();
        let finished_at = p
            .finish_time
            .map(|t| t.format("%m/%d/%Y %I:%M:%S%p").to_string())
            .unwrap_or_default();
        writeln!(out, "{}  ({})  Finished   {} / {}", p.name, finished_at, total, total).unwrap();
    }

    out
}

/// Write the report to a file (`report-util`, default `csopesy-log.txt`).
pub fn write_to_file(scheduler: &Scheduler, path: &Path) -> Result<()> {
    fs::write(path, render(scheduler))
        .with_context(|| format!("failed to write report to {}", path.display()))?;
    info!(path = %path.display(), "utilization report written");
    Ok(())
}
