use procsim::{SchedPolicy, SimConfig};

/// Initialize tracing from `RUST_LOG`. `try_init` is idempotent: the
/// first call in the process succeeds, later calls are ignored.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Scenario config: no generator traffic, no snapshots, zero
/// per-instruction delay unless a test overrides it.
pub fn config(num_cpu: u32, policy: SchedPolicy, quantum_cycles: u64) -> SimConfig {
    SimConfig {
        num_cpu,
        policy,
        quantum_cycles,
        delay_per_exec: 0,
        ..SimConfig::default()
    }
}
