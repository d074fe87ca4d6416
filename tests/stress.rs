//! Randomized stress scenarios for invariant checking.
//!
//! These tests drive the scheduler with generated programs and verify
//! the structural invariants at the end of the run: every process
//! finishes exactly once, memory is fully reclaimed and tiled, and no
//! program error leaks out of balanced generated loops.
//!
//! Configuration via environment variables:
//! - `STRESS_SEED`: random seed (default: 42)

use std::time::Duration;

use rand::rngs::SmallRng;
use rand::SeedableRng;

use procsim::process::generate_program;
use procsim::{Process, SchedPolicy, Scheduler, SimConfig};

mod common;

fn seed() -> u64 {
    std::env::var("STRESS_SEED")
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(42)
}

#[test]
fn random_programs_satisfy_invariants() {
    common::init_tracing();
    let mut rng = SmallRng::seed_from_u64(seed());
    let mut scheduler = Scheduler::new(SimConfig {
        max_memory: 300,
        mem_per_proc: 100,
        ..common::config(4, SchedPolicy::Rr, 3)
    });

    let nr_procs = 12;
    for i in 0..nr_procs {
        let program = generate_program(&mut rng, 5, 20);
        scheduler
            .submit(Process::with_program(
                scheduler.next_pid(),
                format!("s{i}"),
                program,
            ))
            .unwrap();
    }

    scheduler.start();
    assert!(
        scheduler.wait_until_idle_for(Duration::from_secs(60)),
        "stress run did not drain"
    );
    scheduler.stop();

    // Exactly-once completion.
    let finished = scheduler.finished_processes();
    assert_eq!(finished.len(), nr_procs);
    let mut pids: Vec<_> = finished.iter().map(|p| p.lock().unwrap().pid).collect();
    pids.sort();
    pids.dedup();
    assert_eq!(pids.len(), nr_procs);

    // All memory reclaimed and coalesced.
    let blocks = scheduler.memory().blocks();
    assert_eq!(blocks.len(), 1);
    assert_eq!(blocks[0].owner, None);

    // Generated programs are balanced, so no interpreter errors.
    for process in &finished {
        let p = process.lock().unwrap();
        assert!(p.is_finished());
        assert!(
            !p.logs.iter().any(|l| l.starts_with("error:")),
            "{}: unexpected interpreter error",
            p.name
        );
    }

    assert_eq!(scheduler.active_count(), 0);
}

/// The generator loop produces, admits and drains processes on its own.
#[test]
fn generator_produces_processes() {
    common::init_tracing();
    let mut scheduler = Scheduler::new(SimConfig {
        batch_process_freq: 5,
        min_ins: 3,
        max_ins: 8,
        ..common::config(2, SchedPolicy::Rr, 4)
    });

    scheduler.start();
    scheduler.start_generation();
    std::thread::sleep(Duration::from_millis(300));
    scheduler.stop_generation();

    assert!(
        scheduler.wait_until_idle_for(Duration::from_secs(60)),
        "generated processes did not drain"
    );

    let finished = scheduler.finished_processes();
    assert!(
        !finished.is_empty(),
        "generator produced no processes in 300ms"
    );
    for process in &finished {
        let p = process.lock().unwrap();
        assert!(p.name.starts_with('p'), "unexpected generated name {}", p.name);
        assert!((3..=8).contains(&p.program.len()));
    }
    scheduler.stop();
}

/// Stopping mid-run loses nothing: unfinished processes stay active and
/// a restart drains them.
#[test]
fn stop_and_restart_preserves_processes() {
    common::init_tracing();
    let mut rng = SmallRng::seed_from_u64(seed() ^ 0xa5a5);
    let mut scheduler = Scheduler::new(common::config(2, SchedPolicy::Rr, 2));

    let nr_procs = 6;
    for i in 0..nr_procs {
        let program = generate_program(&mut rng, 20, 40);
        scheduler
            .submit(Process::with_program(
                scheduler.next_pid(),
                format!("r{i}"),
                program,
            ))
            .unwrap();
    }

    scheduler.start();
    std::thread::sleep(Duration::from_millis(20));
    scheduler.stop();

    let done_at_stop = scheduler.finished_processes().len();
    assert_eq!(
        scheduler.active_count() + done_at_stop,
        nr_procs,
        "a process was lost across stop"
    );

    scheduler.start();
    assert!(
        scheduler.wait_until_idle_for(Duration::from_secs(60)),
        "restart did not drain the remaining processes"
    );
    scheduler.stop();
    assert_eq!(scheduler.finished_processes().len(), nr_procs);
}
