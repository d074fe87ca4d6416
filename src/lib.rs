//! procsim - Multi-threaded process-scheduler simulator.
//!
//! A pedagogical kernel that models a pool of virtual CPU cores
//! executing synthetic processes under FCFS or round-robin policies,
//! with admission control by a first-fit memory manager and a global
//! logical clock driving sleep, delay and snapshot cadence.
//!
//! # Architecture
//!
//! - **TickClock / Ticker**: global logical time, advanced at ~1 kHz by
//!   a dedicated thread and read lock-free everywhere else
//! - **TsQueue**: FIFO ready queue shared by the dispatcher and cores
//! - **MemoryManager**: first-fit contiguous allocator gating admission
//! - **Process**: interpreter over a small instruction set (arithmetic,
//!   print, sleep, bounded loops) whose state survives preemption
//! - **Core**: per-burst worker thread, preempted by quantum bookkeeping
//! - **Scheduler**: dispatch and process-generator loops, queries, stop
//!
//! # Usage
//!
//! ```rust,no_run
//! use procsim::{Scheduler, SimConfig};
//!
//! let mut scheduler = Scheduler::new(SimConfig::default());
//! scheduler.start();
//! scheduler.start_generation();
//! std::thread::sleep(std::time::Duration::from_secs(2));
//! scheduler.stop_generation();
//! scheduler.wait_until_idle();
//! println!("{}", procsim::report::render(&scheduler));
//! scheduler.stop();
//! ```

pub mod clock;
pub mod config;
pub mod core;
pub mod memory;
pub mod process;
pub mod queue;
pub mod report;
pub mod scheduler;
pub mod types;

// Re-export the main public types for convenience.
pub use clock::{TickClock, Ticker};
pub use config::{SchedPolicy, SimConfig};
pub use self::core::Core;
pub use memory::{MemoryBlock, MemoryManager};
pub use process::{Instruction, Process, ProcessRef};
pub use queue::TsQueue;
pub use scheduler::Scheduler;
pub use types::{CoreId, Pid, Tick, QUANTUM_UNLIMITED};
