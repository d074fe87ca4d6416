//! The scheduler: owner of cores, queues and counters.
//!
//! Hosts two long-lived threads. The dispatch loop wakes due sleepers,
//! drains the memory-pending queue in FIFO order, hands ready processes
//! to idle cores (rotating the starting core), reaps finished processes
//! and dumps periodic memory snapshots. The generator loop creates a
//! synthetic process every `batch_process_freq` ticks while generation
//! is enabled.
//!
//! Cores communicate back through [`SchedShared`], a capability struct
//! holding the queues, sets and counters. The `Scheduler` owns the
//! cores and the thread handles; cores hold only the shared state, so
//! they never extend the scheduler's lifetime.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use anyhow::{bail, Result};
use chrono::Local;
use rand::rngs::SmallRng;
use rand::SeedableRng;
use tracing::{debug, info, warn};

use crate::clock::{TickClock, Ticker};
use crate::config::{SchedPolicy, SimConfig};
use crate::core::Core;
use crate::memory::MemoryManager;
use crate::process::{Process, ProcessRef};
use crate::queue::TsQueue;
use crate::types::{CoreId, Pid, Tick, QUANTUM_UNLIMITED};

/// Wall-clock pause between dispatch passes.
const DISPATCH_PERIOD: Duration = Duration::from_millis(2);
/// Wall-clock pause between generator polls.
const GENERATOR_POLL: Duration = Duration::from_millis(2);
/// Wall-clock pause between `wait_until_idle` polls.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// State shared between the scheduler threads and the core workers.
///
/// Each collection has its own mutex and no path locks two of them at
/// once, so lock ordering never becomes an issue.
pub(crate) struct SchedShared {
    clock: TickClock,
    policy: SchedPolicy,
    quantum: u64,
    ready: TsQueue<ProcessRef>,
    sleeping: Mutex<Vec<ProcessRef>>,
    finished: Mutex<Vec<ProcessRef>>,
    finished_pids: Mutex<HashSet<Pid>>,
    mem_pending: Mutex<VecDeque<ProcessRef>>,
    memory: MemoryManager,
    registry: Mutex<HashMap<String, ProcessRef>>,
    rng: Mutex<SmallRng>,
    next_pid: AtomicU32,
    active: AtomicUsize,
    running: AtomicBool,
    gen_enabled: AtomicBool,
    next_core: AtomicUsize,
    start_tick: AtomicU64,
    last_gen_tick: AtomicU64,
    last_snapshot_tick: AtomicU64,
    snapshot_index: AtomicU64,
    core_ticks: Vec<AtomicU64>,
}

impl SchedShared {
    pub(crate) fn clock(&self) -> TickClock {
        self.clock.clone()
    }

    pub(crate) fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Route a preempted or stopped process back where it belongs: the
    /// sleeping set when it slept, the ready queue otherwise.
    pub(crate) fn requeue(&self, process: ProcessRef) {
        let sleeping = process.lock().unwrap().is_sleeping();
        if sleeping {
            self.sleeping.lock().unwrap().push(process);
        } else {
            self.ready.push(process);
        }
    }

    /// Record completion exactly once per PID: stamp the finish time,
    /// release the memory, append to the finished list and drop the
    /// process from the active population.
    pub(crate) fn finalize(&self, process: &ProcessRef) {
        let pid = process.lock().unwrap().pid;
        if !self.finished_pids.lock().unwrap().insert(pid) {
            return;
        }
        process.lock().unwrap().finish_time = Some(Local::now());
        self.memory.deallocate(pid);
        self.finished.lock().unwrap().push(Arc::clone(process));
        self.active.fetch_sub(1, Ordering::AcqRel);
        debug!(%pid, "process finished");
    }

    pub(crate) fn add_core_ticks(&self, core: CoreId, ticks: u64) {
        self.core_ticks[core.0 as usize].fetch_add(ticks, Ordering::Relaxed);
    }

    fn alloc_pid(&self) -> Pid {
        Pid(self.next_pid.fetch_add(1, Ordering::Relaxed))
    }

    /// Register a process by name for later lookup. Every entry point
    /// goes through this check: a taken name is refused, never
    /// silently replaced.
    fn register(&self, name: &str, process: &ProcessRef) -> bool {
        let mut registry = self.registry.lock().unwrap();
        if registry.contains_key(name) {
            return false;
        }
        registry.insert(name.to_string(), Arc::clone(process));
        true
    }

    /// Admit a process: into the ready queue when memory allocation
    /// succeeds, onto the memory-pending queue otherwise. Either way the
    /// process joins the active population.
    fn admit(&self, process: ProcessRef) {
        let pid = process.lock().unwrap().pid;
        self.active.fetch_add(1, Ordering::AcqRel);
        if self.memory.allocate(pid) {
            self.ready.push(process);
        } else {
            debug!(%pid, "admission deferred, waiting for memory");
            self.mem_pending.lock().unwrap().push_back(process);
        }
    }

    /// Move every sleeper whose wake tick has arrived to the ready queue.
    fn wake_sleepers(&self) {
        let now = self.clock.now();
        let mut sleeping = self.sleeping.lock().unwrap();
        if sleeping.is_empty() {
            return;
        }
        let mut still = Vec::with_capacity(sleeping.len());
        for process in sleeping.drain(..) {
            let awake = {
                let mut p = process.lock().unwrap();
                if p.wake_at() <= now {
                    p.clear_sleep();
                    true
                } else {
                    false
                }
            };
            if awake {
                self.ready.push(process);
            } else {
                still.push(process);
            }
        }
        *sleeping = still;
    }

    /// Admit memory-pending processes in FIFO order, stopping at the
    /// first one that still does not fit.
    fn drain_mem_pending(&self) {
        let mut pending = self.mem_pending.lock().unwrap();
        while let Some(process) = pending.front() {
            let pid = process.lock().unwrap().pid;
            if !self.memory.allocate(pid) {
                break;
            }
            let process = pending.pop_front().unwrap();
            debug!(%pid, "deferred admission satisfied");
            self.ready.push(process);
        }
    }
}

/// The process scheduler. See the module docs for the thread layout.
pub struct Scheduler {
    shared: Arc<SchedShared>,
    cores: Vec<Core>,
    config: SimConfig,
    ticker: Ticker,
    dispatch: Option<JoinHandle<()>>,
    generator: Option<JoinHandle<()>>,
}

impl Scheduler {
    /// Build a scheduler (and start the tick clock) from a validated
    /// configuration.
    pub fn new(config: SimConfig) -> Self {
        let ticker = Ticker::start();
        let shared = Arc::new(SchedShared {
            clock: ticker.clock(),
            policy: config.policy,
            quantum: config.quantum_cycles,
            ready: TsQueue::new(),
            sleeping: Mutex::new(Vec::new()),
            finished: Mutex::new(Vec::new()),
            finished_pids: Mutex::new(HashSet::new()),
            mem_pending: Mutex::new(VecDeque::new()),
            memory: MemoryManager::new(config.max_memory, config.mem_per_proc),
            registry: Mutex::new(HashMap::new()),
            rng: Mutex::new(SmallRng::seed_from_u64(config.seed)),
            next_pid: AtomicU32::new(1),
            active: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            gen_enabled: AtomicBool::new(false),
            next_core: AtomicUsize::new(0),
            start_tick: AtomicU64::new(0),
            last_gen_tick: AtomicU64::new(0),
            last_snapshot_tick: AtomicU64::new(0),
            snapshot_index: AtomicU64::new(0),
            core_ticks: (0..config.num_cpu).map(|_| AtomicU64::new(0)).collect(),
        });
        let cores = (0..config.num_cpu)
            .map(|i| Core::new(CoreId(i), config.delay_per_exec, Arc::clone(&shared)))
            .collect();
        Scheduler {
            shared,
            cores,
            config,
            ticker,
            dispatch: None,
            generator: None,
        }
    }

    /// Spawn the dispatch and generator threads. Idempotent.
    pub fn start(&mut self) {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return;
        }
        let now = self.shared.clock.now();
        self.shared.start_tick.store(now, Ordering::Relaxed);
        self.shared.last_snapshot_tick.store(now, Ordering::Relaxed);

        let shared = Arc::clone(&self.shared);
        let cores = self.cores.clone();
        let snapshot_dir = self.config.snapshot_dir.clone();
        self.dispatch = Some(
            thread::Builder::new()
                .name("dispatch".into())
                .spawn(move || dispatch_loop(shared, cores, snapshot_dir))
                .expect("failed to spawn dispatch thread"),
        );

        let shared = Arc::clone(&self.shared);
        let (freq, min_ins, max_ins) = (
            self.config.batch_process_freq,
            self.config.min_ins,
            self.config.max_ins,
        );
        self.generator = Some(
            thread::Builder::new()
                .name("process-gen".into())
                .spawn(move || generator_loop(shared, freq, min_ins, max_ins))
                .expect("failed to spawn generator thread"),
        );
        info!(
            cores = self.cores.len(),
            policy = %self.config.policy,
            "scheduler started"
        );
    }

    /// Signal every thread to stop, then join them. Processes caught
    /// mid-burst finish their current instruction and return to the
    /// ready queue; nothing is lost. Idempotent.
    pub fn stop(&mut self) {
        if !self.shared.running.swap(false, Ordering::AcqRel) {
            return;
        }
        if let Some(handle) = self.dispatch.take() {
            let _ = handle.join();
        }
        if let Some(handle) = self.generator.take() {
            let _ = handle.join();
        }
        for core in &self.cores {
            core.join_worker();
        }
        info!("scheduler stopped");
    }

    /// Enable the process generator (`scheduler-start`).
    pub fn start_generation(&self) {
        // Back-date the last generation so the first process appears on
        // the next generator poll.
        let now = self.shared.clock.now();
        self.shared.last_gen_tick.store(
            now.saturating_sub(self.config.batch_process_freq),
            Ordering::Relaxed,
        );
        self.shared.gen_enabled.store(true, Ordering::Release);
    }

    /// Disable the process generator (`scheduler-stop`).
    pub fn stop_generation(&self) {
        self.shared.gen_enabled.store(false, Ordering::Release);
    }

    /// Create a process with a fresh PID and a generated program, then
    /// submit it (`screen -s`). A duplicate name is an error.
    pub fn create_process(&self, name: &str) -> Result<ProcessRef> {
        let pid = self.shared.alloc_pid();
        let mut process = Process::new(pid, name);
        {
            let mut rng = self.shared.rng.lock().unwrap();
            process.generate(&mut rng, self.config.min_ins, self.config.max_ins);
        }
        self.submit(process)
    }

    /// Submit an externally built process. Registers it by name for
    /// later lookup; admission may defer on memory pressure.
    pub fn submit(&self, process: Process) -> Result<ProcessRef> {
        let name = process.name.clone();
        let process = Arc::new(Mutex::new(process));
        if !self.shared.register(&name, &process) {
            bail!("process name {name:?} already exists");
        }
        self.shared.admit(Arc::clone(&process));
        Ok(process)
    }

    /// Allocate a fresh PID for an externally built process.
    pub fn next_pid(&self) -> Pid {
        self.shared.alloc_pid()
    }

    /// Look up any known process by name (`screen -r`).
    pub fn find_process(&self, name: &str) -> Option<ProcessRef> {
        self.shared.registry.lock().unwrap().get(name).cloned()
    }

    /// Snapshot of every busy core's bound process.
    pub fn running_processes(&self) -> Vec<(CoreId, ProcessRef)> {
        self.cores
            .iter()
            .filter(|c| c.is_busy())
            .filter_map(|c| c.current().map(|p| (c.id(), p)))
            .collect()
    }

    pub fn sleeping_processes(&self) -> Vec<ProcessRef> {
        self.shared.sleeping.lock().unwrap().clone()
    }

    pub fn finished_processes(&self) -> Vec<ProcessRef> {
        self.shared.finished.lock().unwrap().clone()
    }

    /// Processes waiting for memory admission, in submission order.
    pub fn pending_processes(&self) -> Vec<ProcessRef> {
        self.shared.mem_pending.lock().unwrap().iter().cloned().collect()
    }

    /// Submitted but not yet finalized processes, including
    /// memory-pending ones.
    pub fn active_count(&self) -> usize {
        self.shared.active.load(Ordering::Acquire)
    }

    pub fn cores_used(&self) -> usize {
        self.cores.iter().filter(|c| c.is_busy()).count()
    }

    pub fn cores_available(&self) -> usize {
        self.cores.len() - self.cores_used()
    }

    pub fn num_cores(&self) -> usize {
        self.cores.len()
    }

    /// Percentage of cores currently busy.
    pub fn cpu_utilization(&self) -> f64 {
        100.0 * self.cores_used() as f64 / self.cores.len() as f64
    }

    /// Busy ticks accumulated by one core across all its bursts.
    pub fn core_ticks_used(&self, core: CoreId) -> u64 {
        self.shared.core_ticks[core.0 as usize].load(Ordering::Relaxed)
    }

    /// Ticks elapsed since the last `start`.
    pub fn elapsed_ticks(&self) -> Tick {
        self.shared
            .clock
            .now()
            .saturating_sub(self.shared.start_tick.load(Ordering::Relaxed))
    }

    pub fn clock(&self) -> TickClock {
        self.shared.clock()
    }

    pub fn memory(&self) -> &MemoryManager {
        &self.shared.memory
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    pub fn ready_len(&self) -> usize {
        self.shared.ready.len()
    }

    /// Block until every submitted process has been finalized.
    /// Generation should be disabled first or this never returns.
    pub fn wait_until_idle(&self) {
        while self.active_count() > 0 {
            thread::sleep(IDLE_POLL);
        }
    }

    /// Like [`Self::wait_until_idle`] but gives up after `timeout`,
    /// returning whether the scheduler went idle.
    pub fn wait_until_idle_for(&self, timeout: Duration) -> bool {
        let deadline = std::time::Instant::now() + timeout;
        while self.active_count() > 0 {
            if std::time::Instant::now() >= deadline {
                return false;
            }
            thread::sleep(IDLE_POLL);
        }
        true
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.stop();
        self.ticker.stop();
    }
}

fn dispatch_loop(shared: Arc<SchedShared>, cores: Vec<Core>, snapshot_dir: Option<std::path::PathBuf>) {
    while shared.is_running() {
        shared.wake_sleepers();
        shared.drain_mem_pending();

        // Hand ready processes to idle cores, rotating the starting
        // core so low-numbered cores are not systematically favored.
        let start = shared.next_core.load(Ordering::Relaxed);
        for offset in 0..cores.len() {
            let idx = (start + offset) % cores.len();
            let core = &cores[idx];
            if core.is_busy() {
                continue;
            }
            let Some(process) = shared.ready.try_pop() else {
                break;
            };
            let quantum = match shared.policy {
                SchedPolicy::Rr => shared.quantum,
                SchedPolicy::Fcfs => QUANTUM_UNLIMITED,
            };
            if core.try_assign(Arc::clone(&process), quantum) {
                shared.next_core.store((idx + 1) % cores.len(), Ordering::Relaxed);
            } else {
                // Lost a race with the core; keep FIFO order intact.
                shared.ready.push_front(process);
            }
        }

        // Reap: a finished process may still be bound to its core for a
        // moment; finalization is idempotent so racing the worker's own
        // notification is harmless.
        for core in &cores {
            if let Some(process) = core.current() {
                if process.lock().unwrap().is_finished() {
                    shared.finalize(&process);
                }
            }
        }

        if let Some(dir) = &snapshot_dir {
            let now = shared.clock.now();
            if now.saturating_sub(shared.last_snapshot_tick.load(Ordering::Relaxed))
                >= shared.quantum
            {
                let index = shared.snapshot_index.fetch_add(1, Ordering::Relaxed);
                if let Err(err) = shared.memory.dump_snapshot(index, dir) {
                    warn!(%err, index, "memory snapshot failed");
                }
                shared.last_snapshot_tick.store(now, Ordering::Relaxed);
            }
        }

        thread::sleep(DISPATCH_PERIOD);
    }
}

fn generator_loop(shared: Arc<SchedShared>, freq: u64, min_ins: u64, max_ins: u64) {
    while shared.is_running() {
        if shared.gen_enabled.load(Ordering::Acquire) {
            let now = shared.clock.now();
            if now >= shared.last_gen_tick.load(Ordering::Relaxed) + freq {
                let pid = shared.alloc_pid();
                let name = format!("p{pid}");
                let mut process = Process::new(pid, name.clone());
                {
                    let mut rng = shared.rng.lock().unwrap();
                    process.generate(&mut rng, min_ins, max_ins);
                }
                let process = Arc::new(Mutex::new(process));
                if shared.register(&name, &process) {
                    shared.admit(process);
                } else {
                    // A submitter already claimed this name; drop the
                    // generated process and retry with a fresh PID on
                    // the next cycle.
                    warn!(name = %name, "generated process name already taken, skipping cycle");
                }
                shared.last_gen_tick.store(now, Ordering::Relaxed);
            }
        }
        thread::sleep(GENERATOR_POLL);
    }
}
