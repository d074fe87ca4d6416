//! Simulator configuration.
//!
//! Parsed from a key/value text file (`key value` per line, values
//! optionally double-quoted). Unknown keys warn and are skipped; a
//! missing required key or an out-of-range value is a configuration
//! error and the simulator does not initialize.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::{bail, Context, Result};
use tracing::warn;

/// Scheduling policy for ready-queue dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedPolicy {
    /// First-come-first-served: a burst ends only on finish or sleep.
    Fcfs,
    /// Round-robin: bursts are capped at `quantum_cycles` instructions.
    Rr,
}

impl FromStr for SchedPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "fcfs" => Ok(SchedPolicy::Fcfs),
            "rr" => Ok(SchedPolicy::Rr),
            other => bail!("unknown scheduler policy {other:?} (expected \"fcfs\" or \"rr\")"),
        }
    }
}

impl fmt::Display for SchedPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedPolicy::Fcfs => write!(f, "fcfs"),
            SchedPolicy::Rr => write!(f, "rr"),
        }
    }
}

/// Complete simulator configuration.
#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Number of virtual cores (1–128).
    pub num_cpu: u32,
    pub policy: SchedPolicy,
    /// RR slice in instructions; also the memory-snapshot cadence in ticks.
    pub quantum_cycles: u64,
    /// Ticks between generator-created processes.
    pub batch_process_freq: u64,
    pub min_ins: u64,
    pub max_ins: u64,
    /// Mandatory busy-wait between instructions, in ticks.
    pub delay_per_exec: u64,
    /// Total bytes of simulated memory.
    pub max_memory: u64,
    /// Bytes allocated to each admitted process.
    pub mem_per_proc: u64,
    /// Where periodic memory snapshots are written; `None` disables them.
    pub snapshot_dir: Option<PathBuf>,
    /// Seed for the program generator.
    pub seed: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        SimConfig {
            num_cpu: 4,
            policy: SchedPolicy::Rr,
            quantum_cycles: 5,
            batch_process_freq: 1,
            min_ins: 1000,
            max_ins: 2000,
            delay_per_exec: 0,
            max_memory: 16384,
            mem_per_proc: 4096,
            snapshot_dir: None,
            seed: 42,
        }
    }
}

impl SimConfig {
    /// Parse a config file. All seven scheduler keys are required; the
    /// memory keys fall back to their defaults when absent.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("invalid config file {}", path.display()))
    }

    /// Parse config text in `key value` form.
    pub fn parse(text: &str) -> Result<Self> {
        let mut num_cpu = None;
        let mut policy = None;
        let mut quantum_cycles = None;
        let mut batch_process_freq = None;
        let mut min_ins = None;
        let mut max_ins = None;
        let mut delay_per_exec = None;
        let mut cfg = SimConfig::default();

        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let (key, value) = line
                .split_once(char::is_whitespace)
                .with_context(|| format!("line {}: expected `key value`", lineno + 1))?;
            let value = value.trim().trim_matches('"');

            match key {
                "num-cpu" => num_cpu = Some(parse_number(key, value)?),
                "scheduler" => policy = Some(value.parse::<SchedPolicy>()?),
                "quantum-cycles" => quantum_cycles = Some(parse_number(key, value)?),
                "batch-process-freq" => batch_process_freq = Some(parse_number(key, value)?),
                "min-ins" => min_ins = Some(parse_number(key, value)?),
                "max-ins" => max_ins = Some(parse_number(key, value)?),
                "delay-per-exec" => delay_per_exec = Some(parse_number(key, value)?),
                "max-overall-mem" => cfg.max_memory = parse_number(key, value)?,
                "mem-per-proc" => cfg.mem_per_proc = parse_number(key, value)?,
                other => warn!(key = other, "ignoring unknown config key"),
            }
        }

        let cpus: u64 = require(num_cpu, "num-cpu")?;
        cfg.num_cpu = u32::try_from(cpus).unwrap_or(u32::MAX);
        cfg.policy = require(policy, "scheduler")?;
        cfg.quantum_cycles = require(quantum_cycles, "quantum-cycles")?;
        cfg.batch_process_freq = require(batch_process_freq, "batch-process-freq")?;
        cfg.min_ins = require(min_ins, "min-ins")?;
        cfg.max_ins = require(max_ins, "max-ins")?;
        cfg.delay_per_exec = require(delay_per_exec, "delay-per-exec")?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if !(1..=128).contains(&self.num_cpu) {
            bail!("num-cpu must be in 1..=128, got {}", self.num_cpu);
        }
        if self.quantum_cycles == 0 {
            bail!("quantum-cycles must be at least 1");
        }
        if self.batch_process_freq == 0 {
            bail!("batch-process-freq must be at least 1");
        }
        if self.min_ins == 0 {
            bail!("min-ins must be at least 1");
        }
        if self.max_ins < self.min_ins {
            bail!(
                "max-ins ({}) must be >= min-ins ({})",
                self.max_ins,
                self.min_ins
            );
        }
        if self.mem_per_proc == 0 || self.mem_per_proc > self.max_memory {
            bail!(
                "mem-per-proc ({}) must be in 1..=max-overall-mem ({})",
                self.mem_per_proc,
                self.max_memory
            );
        }
        Ok(())
    }
}

fn parse_number(key: &str, value: &str) -> Result<u64> {
    value
        .parse::<u64>()
        .with_context(|| format!("{key}: malformed number {value:?}"))
}

fn require<T>(value: Option<T>, key: &str) -> Result<T> {
    value.with_context(|| format!("missing required config key {key:?}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const FULL: &str = "\
num-cpu 4
scheduler \"rr\"
quantum-cycles 5
batch-process-freq 1
min-ins 1000
max-ins 2000
delay-per-exec 0
";

    #[test]
    fn parses_full_config() {
        let cfg = SimConfig::parse(FULL).unwrap();
        assert_eq!(cfg.num_cpu, 4);
        assert_eq!(cfg.policy, SchedPolicy::Rr);
        assert_eq!(cfg.quantum_cycles, 5);
        assert_eq!(cfg.batch_process_freq, 1);
        assert_eq!(cfg.min_ins, 1000);
        assert_eq!(cfg.max_ins, 2000);
        assert_eq!(cfg.delay_per_exec, 0);
        // Memory keys fall back to defaults.
        assert_eq!(cfg.max_memory, 16384);
        assert_eq!(cfg.mem_per_proc, 4096);
    }

    #[test]
    fn quotes_are_stripped() {
        let cfg = SimConfig::parse(FULL).unwrap();
        assert_eq!(cfg.policy, SchedPolicy::Rr);
    }

    #[test]
    fn missing_key_is_an_error() {
        let text = FULL.replace("num-cpu 4\n", "");
        let err = SimConfig::parse(&text).unwrap_err();
        assert!(err.to_string().contains("num-cpu"));
    }

    #[test]
    fn out_of_range_cpu_rejected() {
        let text = FULL.replace("num-cpu 4", "num-cpu 129");
        assert!(SimConfig::parse(&text).is_err());
    }

    #[test]
    fn max_ins_below_min_ins_rejected() {
        let text = FULL.replace("max-ins 2000", "max-ins 10");
        assert!(SimConfig::parse(&text).is_err());
    }

    #[test]
    fn malformed_number_rejected() {
        let text = FULL.replace("quantum-cycles 5", "quantum-cycles five");
        assert!(SimConfig::parse(&text).is_err());
    }

    #[test]
    fn unknown_policy_rejected() {
        let text = FULL.replace("scheduler \"rr\"", "scheduler \"sjf\"");
        assert!(SimConfig::parse(&text).is_err());
    }

    #[test]
    fn memory_keys_override_defaults() {
        let text = format!("{FULL}max-overall-mem 300\nmem-per-proc 100\n");
        let cfg = SimConfig::parse(&text).unwrap();
        assert_eq!(cfg.max_memory, 300);
        assert_eq!(cfg.mem_per_proc, 100);
    }
}
