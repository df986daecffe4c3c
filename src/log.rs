//! Kernel message ring.
//!
//! A bounded in-memory ring of tagged diagnostic messages, read back through
//! the `dmesg` family. Every entry carries a strictly monotonic sequence
//! number, the uptime at append, a level tag, and the originating pid. The
//! oldest entries are evicted first.

use core::fmt;
use std::collections::VecDeque;

use crate::process::{Pid, Ring};
use crate::syscall::error::{Error, Result};
use crate::Kernel;

/// Message levels, ordered roughly by severity within their families.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Level {
    Debug,
    Dev,
    Sched,
    Ipc,
    Info,
    Drv,
    Vfs,
    Mem,
    Proc,
    Warn,
    Ok,
    Sec,
    Fail,
}

pub const LEVEL_COUNT: usize = 13;

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Dev => "dev",
            Level::Sched => "sched",
            Level::Ipc => "ipc",
            Level::Info => "info",
            Level::Drv => "drv",
            Level::Vfs => "vfs",
            Level::Mem => "mem",
            Level::Proc => "proc",
            Level::Warn => "warn",
            Level::Ok => "ok",
            Level::Sec => "sec",
            Level::Fail => "fail",
        }
    }

    fn index(self) -> usize {
        match self {
            Level::Debug => 0,
            Level::Dev => 1,
            Level::Sched => 2,
            Level::Ipc => 3,
            Level::Info => 4,
            Level::Drv => 5,
            Level::Vfs => 6,
            Level::Mem => 7,
            Level::Proc => 8,
            Level::Warn => 9,
            Level::Ok => 10,
            Level::Sec => 11,
            Level::Fail => 12,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One ring entry.
#[derive(Debug, Clone)]
pub struct KmsgEntry {
    pub seq: u64,
    pub uptime: f64,
    pub level: Level,
    pub pid: Pid,
    pub text: String,
}

/// Ring statistics, as returned by `dmesg_stats`.
#[derive(Debug, Clone)]
pub struct KmsgStats {
    pub entries: usize,
    pub capacity: usize,
    pub evicted: u64,
    pub next_seq: u64,
    pub per_level: [u64; LEVEL_COUNT],
}

/// The bounded message ring.
pub struct KernelLog {
    entries: VecDeque<KmsgEntry>,
    capacity: usize,
    next_seq: u64,
    evicted: u64,
    per_level: [u64; LEVEL_COUNT],
}

impl KernelLog {
    pub fn new(capacity: usize) -> KernelLog {
        KernelLog {
            entries: VecDeque::with_capacity(capacity.min(1024)),
            capacity: capacity.max(1),
            next_seq: 0,
            evicted: 0,
            per_level: [0; LEVEL_COUNT],
        }
    }

    /// Appends an entry, evicting the oldest if the ring is full.
    pub fn append(&mut self, level: Level, pid: Pid, uptime: f64, text: String) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.per_level[level.index()] += 1;
        while self.entries.len() >= self.capacity {
            self.entries.pop_front();
            self.evicted += 1;
        }
        self.entries.push_back(KmsgEntry {
            seq,
            uptime,
            level,
            pid,
            text,
        });
        seq
    }

    /// Entries with `seq >= since_seq`, newest last, at most `count`,
    /// optionally restricted to one level.
    pub fn read(&self, since_seq: u64, count: usize, level: Option<Level>) -> Vec<KmsgEntry> {
        self.entries
            .iter()
            .filter(|e| e.seq >= since_seq)
            .filter(|e| level.map_or(true, |l| e.level == l))
            .take(count)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.evicted += self.entries.len() as u64;
        self.entries.clear();
    }

    pub fn stats(&self) -> KmsgStats {
        KmsgStats {
            entries: self.entries.len(),
            capacity: self.capacity,
            evicted: self.evicted,
            next_seq: self.next_seq,
            per_level: self.per_level,
        }
    }
}

/// Appends a formatted entry to the kernel's message ring.
///
/// Usage: `klog!(self, Sec, pid, "synapse mismatch on {}", handle)`.
macro_rules! klog {
    ($k:expr, $lvl:ident, $pid:expr, $($arg:tt)*) => {
        $k.log.lock().append(
            $crate::log::Level::$lvl,
            $pid,
            $k.clock.now(),
            format!($($arg)*),
        )
    };
}

impl Kernel {
    /// Appends a message to the ring on behalf of the caller.
    pub fn kernel_log(&self, caller: Pid, message: &str) -> Result<u64> {
        Ok(klog!(self, Info, caller, "{}", message))
    }

    /// Reads ring entries starting at `since_seq`.
    pub fn dmesg_read(
        &self,
        since_seq: u64,
        count: usize,
        level_filter: Option<Level>,
    ) -> Vec<KmsgEntry> {
        self.log.lock().read(since_seq, count, level_filter)
    }

    /// Empties the ring. Ring 0 and 1 only.
    pub fn dmesg_clear(&mut self, caller: Pid) -> Result<()> {
        let ring = self.procs.get(caller)?.ring;
        if !matches!(ring, Ring::Kernel | Ring::Manager) {
            klog!(self, Sec, caller, "dmesg_clear denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        self.log.lock().clear();
        Ok(())
    }

    pub fn dmesg_stats(&self) -> KmsgStats {
        self.log.lock().stats()
    }
}
