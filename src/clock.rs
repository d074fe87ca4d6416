//! The global tick clock.
//!
//! A single monotonically increasing counter advanced by a dedicated
//! ticker thread at a fixed wall-clock period (1 ms). Every other
//! component reads it with a lock-free atomic load; nothing else writes
//! it. Logical time (SLEEP deadlines, per-instruction delay, snapshot
//! cadence, utilization accounting) is thereby decoupled from any one
//! worker's wall-clock scheduling.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tracing::debug;

use crate::types::Tick;

/// Wall-clock period of one tick.
pub const TICK_PERIOD: Duration = Duration::from_millis(1);

struct ClockInner {
    tick: AtomicU64,
    ticking: AtomicBool,
}

/// Read handle to the global tick counter. Cheap to clone; all clones
/// observe the same counter.
#[derive(Clone)]
pub struct TickClock {
    inner: Arc<ClockInner>,
}

impl TickClock {
    fn new() -> Self {
        TickClock {
            inner: Arc::new(ClockInner {
                tick: AtomicU64::new(0),
                ticking: AtomicBool::new(true),
            }),
        }
    }

    /// Current logical time. Lock-free and wait-free.
    pub fn now(&self) -> Tick {
        self.inner.tick.load(Ordering::Relaxed)
    }

    /// Block until the clock reaches `target`, checking `keep_waiting`
    /// at every tick boundary so callers can abandon the wait on
    /// shutdown.
    pub fn wait_until(&self, target: Tick, keep_waiting: impl Fn() -> bool) {
        while self.now() < target && keep_waiting() {
            thread::sleep(TICK_PERIOD);
        }
    }
}

/// Owns the ticker thread. Dropping (or calling [`Ticker::stop`]) halts
/// the thread and joins it; the counter stays readable at its final
/// value through any outstanding [`TickClock`] handles.
pub struct Ticker {
    clock: TickClock,
    handle: Option<thread::JoinHandle<()>>,
}

impl Ticker {
    /// Spawn the ticker thread and start advancing the clock.
    pub fn start() -> Self {
        let clock = TickClock::new();
        let inner = Arc::clone(&clock.inner);
        let handle = thread::Builder::new()
            .name("ticker".into())
            .spawn(move || {
                while inner.ticking.load(Ordering::Relaxed) {
                    thread::sleep(TICK_PERIOD);
                    inner.tick.fetch_add(1, Ordering::Relaxed);
                }
            })
            .expect("failed to spawn ticker thread");
        Ticker {
            clock,
            handle: Some(handle),
        }
    }

    /// A read handle to the clock this ticker drives.
    pub fn clock(&self) -> TickClock {
        self.clock.clone()
    }

    /// Halt the ticker thread and join it.
    pub fn stop(&mut self) {
        self.clock.inner.ticking.store(false, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
            debug!(final_tick = self.clock.now(), "ticker stopped");
        }
    }
}

impl Drop for Ticker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clock_advances() {
        let ticker = Ticker::start();
        let clock = ticker.clock();
        let start = clock.now();
        thread::sleep(Duration::from_millis(20));
        assert!(clock.now() > start, "clock did not advance");
    }

    #[test]
    fn clock_stops_on_drop() {
        let ticker = Ticker::start();
        let clock = ticker.clock();
        drop(ticker);
        let frozen = clock.now();
        thread::sleep(Duration::from_millis(10));
        assert_eq!(clock.now(), frozen, "clock advanced after ticker drop");
    }

    #[test]
    fn wait_until_honors_cancellation() {
        let ticker = Ticker::start();
        let clock = ticker.clock();
        // Target far in the future, but the predicate bails immediately.
        clock.wait_until(clock.now() + 1_000_000, || false);
    }
}
