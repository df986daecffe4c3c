//! Kernel tunables.

/// Tunable limits and defaults, fixed at boot.
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Wall-clock budget per resume before a checkpoint forces a yield.
    pub quantum_ms: u64,
    /// A slice longer than `quantum_ms * watchdog_multiplier` records a strike.
    pub watchdog_multiplier: u32,
    /// Strikes before the watchdog escalates to SIGTERM, then SIGKILL.
    pub watchdog_strikes: u32,
    /// Maximum DPCs drained per tick.
    pub dpc_drain_cap: usize,
    /// Kernel message ring capacity, in entries.
    pub kmsg_capacity: usize,
    /// Default anonymous pipe capacity in bytes.
    pub pipe_capacity: usize,
    /// Pids below this value bypass the synapse check.
    pub synapse_bypass_pid: usize,
}

impl Default for KernelConfig {
    fn default() -> Self {
        KernelConfig {
            quantum_ms: 50,
            watchdog_multiplier: 4,
            watchdog_strikes: 3,
            dpc_drain_cap: 64,
            kmsg_capacity: 4096,
            pipe_capacity: 65536,
            synapse_bypass_pid: 10,
        }
    }
}

/// Upper bound on targets in one multiple-object wait.
pub const MAX_WAIT_TARGETS: usize = 64;
