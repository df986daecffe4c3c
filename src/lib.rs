//! # The Axis Kernel Executive
//!
//! The executive for a hosted, multi-ring hobby operating system. It owns the
//! process table, the cooperative scheduler with preemption checkpoints, the
//! object manager and its namespace, the synapse token layer, the wait
//! dispatcher, the IPC primitive families, the VFS router, the syscall
//! override bus, and the DPC queue.
//!
//! The whole executive is a single owned state structure, [`Kernel`]. Every
//! syscall is a method on it taking the calling process id as its first
//! argument. User programs are cooperative tasks implementing
//! [`process::Program`]; the scheduler resumes one at a time, so no kernel
//! data structure is ever observed concurrently.

#[macro_use]
pub mod log;

pub mod config;
pub mod dpc;
pub mod ipc;
pub mod object;
pub mod process;
pub mod scheduler;
pub mod syscall;
pub mod time;
pub mod vfs;

#[cfg(test)]
mod tests;

use config::KernelConfig;
use dpc::DpcQueue;
use log::KernelLog;
use object::ObjectManager;
use process::list::ProcessTable;
use process::timeout::TimeoutRegistry;
use syscall::OverrideTable;
use time::Clock;
use vfs::Router;

pub use object::{Access, ObjectId};
pub use process::{Pid, Ring, Status, Step};
pub use scheduler::Schedule;
pub use syscall::error::{Error, Result};
pub use syscall::{Outcome, Value};

/// The kernel executive.
///
/// All mutable kernel state lives here. The executor runs inside it: the
/// embedding runtime calls [`Kernel::run_until_idle`] (or drives
/// [`Kernel::schedule_once`] itself) and otherwise only observes results.
pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) clock: Clock,
    pub(crate) log: spin::Mutex<KernelLog>,
    pub(crate) procs: ProcessTable,
    pub(crate) ob: ObjectManager,
    pub(crate) timeouts: TimeoutRegistry,
    /// Object ids of armed timers, scanned each tick.
    pub(crate) timers: Vec<ObjectId>,
    pub(crate) dpc: DpcQueue,
    pub(crate) overrides: OverrideTable,
    pub(crate) vfs: Router,
    /// Pid the round-robin rotor last ran, for fair selection.
    pub(crate) last_scheduled: Option<Pid>,
}

impl Kernel {
    /// Creates a kernel with the default configuration and the host clock.
    pub fn new() -> Kernel {
        Kernel::with_config(KernelConfig::default())
    }

    /// Creates a kernel with the given configuration and the host clock.
    pub fn with_config(config: KernelConfig) -> Kernel {
        Kernel::build(config, Clock::host())
    }

    /// Creates a kernel whose clock only advances through
    /// [`Kernel::advance_clock`]. Deterministic timeouts for tests.
    pub fn with_manual_clock(config: KernelConfig) -> Kernel {
        Kernel::build(config, Clock::manual())
    }

    fn build(config: KernelConfig, clock: Clock) -> Kernel {
        let log = spin::Mutex::new(KernelLog::new(config.kmsg_capacity));
        let kernel = Kernel {
            clock,
            log,
            procs: ProcessTable::new(),
            ob: ObjectManager::new(),
            timeouts: TimeoutRegistry::new(),
            timers: Vec::new(),
            dpc: DpcQueue::new(),
            overrides: OverrideTable::new(),
            vfs: Router::new(),
            last_scheduled: None,
            config,
        };
        klog!(kernel, Info, 0, "executive up, quantum {} ms", kernel.config.quantum_ms);
        kernel
    }

    /// Monotonic uptime in seconds.
    pub fn uptime(&self) -> f64 {
        self.clock.now()
    }

    /// Advances a manual clock. Ignored for the host clock.
    pub fn advance_clock(&mut self, secs: f64) {
        self.clock.advance(secs);
    }
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::new()
    }
}
