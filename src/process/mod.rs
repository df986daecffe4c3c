//! # Process Management
//!
//! Process descriptors, ring levels, run states, and the cooperative task
//! contract the scheduler drives.

pub mod list;
pub mod signal;
pub mod timeout;

use arrayvec::ArrayVec;
use core::fmt;
use hashbrown::HashMap;
use std::collections::VecDeque;

use crate::config::MAX_WAIT_TARGETS;
use crate::ipc::WaitStatus;
use crate::object::{HandleEntry, ObjectId};
use crate::syscall::error::Result;
use crate::syscall::{OverrideRequest, Value};
use crate::Kernel;

pub type Pid = usize;

/// Advisory privilege band. Influences syscall gating only, never scheduling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ring {
    /// Ring 0, the kernel itself.
    Kernel,
    /// Ring 1, pipeline and manager services.
    Manager,
    /// Ring 2, device drivers.
    Driver,
    /// Ring 2.5, elevated user processes.
    Elevated,
    /// Ring 3, ordinary user processes.
    User,
}

impl Ring {
    /// Rings 0 and 1 bypass the synapse check and may use gated syscalls.
    pub fn is_privileged(self) -> bool {
        matches!(self, Ring::Kernel | Ring::Manager)
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Ring::Kernel => "0",
            Ring::Manager => "1",
            Ring::Driver => "2",
            Ring::Elevated => "2.5",
            Ring::User => "3",
        };
        f.write_str(s)
    }
}

/// Interrupt request level. Waits fail at `Dispatch` and above; signal
/// delivery runs at `Apc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Irql {
    Passive,
    Apc,
    Dispatch,
    Device,
}

/// What a sleeping process is registered on. Exactly one of these holds for
/// every sleeper, so waking always knows what to detach.
#[derive(Debug, Clone)]
pub enum SleepKind {
    /// Blocked in the wait dispatcher. A single-object wait is the
    /// one-target, any-mode case.
    Dispatch {
        targets: ArrayVec<ObjectId, MAX_WAIT_TARGETS>,
        wait_all: bool,
    },
    /// On a pipe's pending-reader list.
    PipeRead(ObjectId),
    /// On a pipe's pending-writer list.
    PipeWrite(ObjectId),
    /// On a message queue's send-wait list.
    MqSend(ObjectId),
    /// On a message queue's receive-wait list.
    MqReceive(ObjectId),
    /// Caller of an overridden syscall, parked until the owner replies.
    Override(String),
    /// Override owner draining an empty inbox.
    InboxWait,
}

/// Run state. A process is in exactly one at any instant, and exactly one
/// process kernel-wide is `Running`.
#[derive(Debug, Clone)]
pub enum Status {
    Ready,
    Running,
    Sleeping(SleepKind),
    Stopped,
    Dead,
}

impl Status {
    pub fn is_ready(&self) -> bool {
        matches!(self, Status::Ready)
    }

    pub fn is_sleeping(&self) -> bool {
        matches!(self, Status::Sleeping(_))
    }

    pub fn is_dead(&self) -> bool {
        matches!(self, Status::Dead)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Ready => "ready",
            Status::Running => "running",
            Status::Sleeping(_) => "sleeping",
            Status::Stopped => "stopped",
            Status::Dead => "dead",
        }
    }
}

/// Per-process CPU accounting, updated at every resume and yield.
#[derive(Debug, Clone, Default)]
pub struct CpuStats {
    /// Accumulated run time in seconds.
    pub total: f64,
    /// Duration of the most recent slice.
    pub last_slice: f64,
    /// Longest slice observed.
    pub max_slice: f64,
    /// Times the scheduler resumed this process.
    pub resumes: u64,
    /// Involuntary yields forced by the quantum.
    pub preemptions: u64,
    /// Watchdog strikes recorded so far.
    pub strikes: u32,
}

/// What a program's resume reported back to the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Checkpoint reached, still runnable.
    Yield,
    /// A blocking syscall parked the process; the kernel already moved it to
    /// `Sleeping`.
    Blocked,
    /// Process finished with this exit status.
    Done(i32),
}

/// A cooperative user task. `resume` runs the program up to its next
/// checkpoint; issuing syscalls against the kernel it was handed.
pub trait Program {
    fn resume(&mut self, kernel: &mut Kernel, pid: Pid) -> Step;
}

/// A registered signal handler callback. Errors raised by a handler are
/// logged, never propagated.
pub type SignalHandler = Box<dyn FnMut(u32) -> Result<()>>;

/// The process descriptor.
pub struct Process {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub ring: Ring,
    pub status: Status,
    /// Current synapse token, `SYN-` prefixed.
    pub synapse: String,
    pub uid: u32,
    pub gid: u32,
    pub cwd: String,
    pub env: HashMap<String, String>,
    pub args: Vec<String>,
    pub image: String,
    pub cpu: CpuStats,
    pub irql: Irql,
    /// Scheduling tiebreaker, lower first among equals.
    pub priority: u8,
    pub pending_signals: VecDeque<u32>,
    pub handlers: HashMap<u32, SignalHandler>,
    /// Bitset over signal numbers, bit n masks signal n.
    pub sigmask: u64,
    pub pgid: Pid,
    /// Co-processes sharing this descriptor's environment.
    pub threads: Vec<Pid>,
    /// Handle table: opaque token to object binding.
    pub handles: HashMap<String, HandleEntry>,
    /// Standard handle slots, keyed -10 stdin, -11 stdout, -12 stderr.
    pub std_handles: HashMap<i32, String>,
    pub(crate) program: Option<Box<dyn Program>>,
    /// Result written by the wake path, consumed on resume.
    pub(crate) wait_result: Option<WaitStatus>,
    /// Reply to an overridden syscall, consumed on resume.
    pub(crate) reply: Option<Result<Vec<Value>>>,
    /// Inbox of override requests, for override owners.
    pub(crate) inbox: VecDeque<OverrideRequest>,
    pub exit_status: Option<i32>,
    /// Set once the watchdog has escalated to SIGTERM.
    pub(crate) watchdog_termed: bool,
}

impl Process {
    pub(crate) fn new(pid: Pid, ppid: Option<Pid>, image: &str, ring: Ring, synapse: String) -> Process {
        Process {
            pid,
            ppid,
            ring,
            status: Status::Ready,
            synapse,
            uid: 0,
            gid: 0,
            cwd: String::from("/"),
            env: HashMap::new(),
            args: Vec::new(),
            image: String::from(image),
            cpu: CpuStats::default(),
            irql: Irql::Passive,
            priority: 50,
            pending_signals: VecDeque::new(),
            handlers: HashMap::new(),
            sigmask: 0,
            pgid: pid,
            threads: Vec::new(),
            handles: HashMap::new(),
            std_handles: HashMap::new(),
            program: None,
            wait_result: None,
            reply: None,
            inbox: VecDeque::new(),
            exit_status: None,
            watchdog_termed: false,
        }
    }

    /// Parks the process on the given registration.
    pub(crate) fn block(&mut self, kind: SleepKind) {
        self.status = Status::Sleeping(kind);
    }

    /// Makes a sleeping or stopped process runnable again.
    pub(crate) fn unblock(&mut self) {
        if !self.status.is_dead() {
            self.status = Status::Ready;
        }
    }

    /// Whether the synapse layer lets this process skip token checks.
    pub(crate) fn synapse_bypass(&self, bypass_pid: usize) -> bool {
        self.ring.is_privileged() || self.pid < bypass_pid
    }
}

impl fmt::Debug for Process {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Process")
            .field("pid", &self.pid)
            .field("image", &self.image)
            .field("ring", &self.ring)
            .field("status", &self.status.as_str())
            .field("pgid", &self.pgid)
            .finish()
    }
}

/// A row of `process_list` output.
#[derive(Debug, Clone)]
pub struct ProcessInfo {
    pub pid: Pid,
    pub ppid: Option<Pid>,
    pub ring: Ring,
    pub status: &'static str,
    pub image: String,
    pub pgid: Pid,
    pub priority: u8,
}

impl Kernel {
    /// Consumes the wait status the wake path left for `pid`. Programs call
    /// this on resume after a blocking wait.
    pub fn take_wait_result(&mut self, pid: Pid) -> Option<WaitStatus> {
        self.procs.get_mut(pid).ok()?.wait_result.take()
    }
}
