//! Newtype wrappers and type aliases for domain concepts.
//!
//! Newtypes for identifiers (PIDs, core IDs) prevent silent type
//! confusion. Type aliases for quantities (ticks) provide
//! self-documenting code without the boilerplate of implementing
//! arithmetic traits.

use std::fmt;

/// Process identifier. Assigned monotonically starting at 1.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pid(pub u32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// CPU core identifier. 0-based index into the scheduler's core pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CoreId(pub u32);

impl fmt::Display for CoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Logical time in ticks of the global clock (~1 ms of wall time each).
pub type Tick = u64;

/// Quantum value meaning "run to completion or sleep" (FCFS bursts).
pub const QUANTUM_UNLIMITED: u64 = u64::MAX;
