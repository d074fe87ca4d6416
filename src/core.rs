//! Virtual CPU core.
//!
//! A core executes one assigned process for a bounded burst on its own
//! worker thread: up to `quantum` instructions under round-robin, or to
//! completion/sleep under FCFS (`QUANTUM_UNLIMITED`). Between
//! instructions it enforces the configured tick-based delay and
//! observes the scheduler's stop flag. Outcomes (finish, sleep, quantum
//! expiry) are reported back through the shared scheduler state; the
//! core never owns the scheduler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tracing::{debug, warn};

use crate::process::ProcessRef;
use crate::scheduler::SchedShared;
use crate::types::{CoreId, QUANTUM_UNLIMITED};

/// Handle to one virtual core. Cheap to clone; all clones refer to the
/// same core state.
#[derive(Clone)]
pub struct Core {
    inner: Arc<CoreInner>,
}

struct CoreInner {
    id: CoreId,
    busy: AtomicBool,
    current: Mutex<Option<ProcessRef>>,
    delay_per_exec: u64,
    shared: Arc<SchedShared>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    pub(crate) fn new(id: CoreId, delay_per_exec: u64, shared: Arc<SchedShared>) -> Self {
        Core {
            inner: Arc::new(CoreInner {
                id,
                busy: AtomicBool::new(false),
                current: Mutex::new(None),
                delay_per_exec,
                shared,
                worker: Mutex::new(None),
            }),
        }
    }

    pub fn id(&self) -> CoreId {
        self.inner.id
    }

    pub fn is_busy(&self) -> bool {
        self.inner.busy.load(Ordering::Acquire)
    }

    /// The process currently bound to this core, if any.
    pub fn current(&self) -> Option<ProcessRef> {
        self.inner.current.lock().unwrap().clone()
    }

    /// Bind `process` to this core and start a burst of at most
    /// `quantum` instructions. Refuses (returns false) when the core is
    /// already busy or the worker thread cannot be spawned.
    pub fn try_assign(&self, process: ProcessRef, quantum: u64) -> bool {
        let inner = &self.inner;
        if inner.busy.swap(true, Ordering::AcqRel) {
            return false;
        }
        // Reap the previous burst's thread before starting a new one.
        if let Some(handle) = inner.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
        *inner.current.lock().unwrap() = Some(Arc::clone(&process));

        let worker = Arc::clone(inner);
        let spawned = thread::Builder::new()
            .name(format!("core-{}", inner.id))
            .spawn(move || worker.run_burst(process, quantum));
        match spawned {
            Ok(handle) => {
                *inner.worker.lock().unwrap() = Some(handle);
                true
            }
            Err(err) => {
                warn!(core = %inner.id, %err, "worker spawn failed, core stays idle");
                *inner.current.lock().unwrap() = None;
                inner.busy.store(false, Ordering::Release);
                false
            }
        }
    }

    /// Join the most recent burst's worker thread, if any.
    pub(crate) fn join_worker(&self) {
        if let Some(handle) = self.inner.worker.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl CoreInner {
    fn run_burst(&self, process: ProcessRef, quantum: u64) {
        let clock = self.shared.clock();
        let start_tick = clock.now();
        let mut executed: u64 = 0;

        debug!(
            core = %self.id,
            unlimited = quantum == QUANTUM_UNLIMITED,
            "burst start"
        );

        while executed < quantum && self.shared.is_running() {
            let went_to_sleep = {
                let mut p = process.lock().unwrap();
                if p.is_finished() || p.is_sleeping() {
                    break;
                }
                if !p.run_one_instruction(self.id, &clock) {
                    break;
                }
                p.is_sleeping()
            };
            executed += 1;
            if went_to_sleep {
                // Sleep entry ends the burst; the instruction itself
                // already counted as executed.
                break;
            }
            if self.delay_per_exec == 0 {
                thread::yield_now();
            } else {
                let target = clock.now() + self.delay_per_exec;
                clock.wait_until(target, || self.shared.is_running());
            }
        }

        self.shared
            .add_core_ticks(self.id, clock.now().saturating_sub(start_tick));

        // Detach from the core before the process becomes visible in
        // any other collection, so it is never observable both as this
        // core's current and as ready/finished at the same time.
        *self.current.lock().unwrap() = None;
        self.busy.store(false, Ordering::Release);

        let finished = process.lock().unwrap().is_finished();
        if finished {
            self.shared.finalize(&process);
        } else {
            // Routes to the sleeping set or back to the ready queue.
            self.shared.requeue(process);
        }
    }
}
