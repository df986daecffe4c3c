//! # Scheduler
//!
//! Single-threaded cooperative with preemption checkpoints. Exactly one
//! process runs at a time; the executor re-enters at every `resume` return.
//! Each pass ticks the clock sources first: timers fire, wait deadlines
//! expire, the DPC queue drains a bounded batch, and only then is the next
//! ready process picked, round-robin with priority as tiebreaker.

use crate::process::{Irql, Pid, Status, Step};
use crate::process::signal::{SIGKILL, SIGTERM};
use crate::syscall::error::Result;
use crate::time::ms_to_secs;
use crate::Kernel;

/// Outcome of one scheduling pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    Ran(Pid),
    AllIdle,
}

impl Kernel {
    /// One tick: timers, wait timeouts, DPC drain. Runs at the top of every
    /// scheduling pass and may be driven directly by hosts.
    pub fn tick(&mut self) {
        self.tick_timers();
        let now = self.clock.now();
        for pid in self.timeouts.expire(now) {
            self.expire_wait(pid);
        }
        self.drain_dpcs();
    }

    /// Ticks, then resumes the next ready process, if any.
    pub fn schedule_once(&mut self) -> Schedule {
        self.tick();
        let Some(pid) = self.pick_next() else {
            return Schedule::AllIdle;
        };
        self.last_scheduled = Some(pid);
        self.run_process(pid);
        Schedule::Ran(pid)
    }

    /// Drives the executor until every process is parked or dead, bounded by
    /// `max_passes`. Returns the number of passes run.
    pub fn run_until_idle(&mut self, max_passes: usize) -> usize {
        let mut passes = 0;
        while passes < max_passes {
            match self.schedule_once() {
                Schedule::Ran(_) => passes += 1,
                Schedule::AllIdle => break,
            }
        }
        passes
    }

    /// Round-robin over ready processes; the priority field breaks ties,
    /// lower number first.
    fn pick_next(&self) -> Option<Pid> {
        let ready = self.procs.ready_pids();
        if ready.is_empty() {
            return None;
        }
        let start = match self.last_scheduled {
            Some(last) => ready.iter().position(|&p| p > last).unwrap_or(0),
            None => 0,
        };
        let mut best: Option<(u8, Pid)> = None;
        for &pid in ready[start..].iter().chain(ready[..start].iter()) {
            let priority = match self.procs.get(pid) {
                Ok(p) => p.priority,
                Err(_) => continue,
            };
            if best.map_or(true, |(bp, _)| priority < bp) {
                best = Some((priority, pid));
            }
        }
        best.map(|(_, pid)| pid)
    }

    /// Delivers pending signals, resumes the program, accounts the slice.
    fn run_process(&mut self, pid: Pid) {
        self.deliver_signals(pid);
        let Ok(p) = self.procs.get_mut(pid) else { return };
        if !p.status.is_ready() {
            return;
        }
        p.status = Status::Running;
        p.cpu.resumes += 1;
        let Some(mut program) = p.program.take() else {
            p.status = Status::Ready;
            return;
        };
        self.procs.set_running(Some(pid));

        let start = self.clock.now();
        let step = program.resume(self, pid);
        let slice = self.clock.now() - start;

        if let Some(p) = self.procs.get_any_mut(pid) {
            if !p.status.is_dead() && p.program.is_none() {
                p.program = Some(program);
            }
        }
        self.account(pid, slice);

        match step {
            Step::Done(status) => self.process_exit(pid, status),
            Step::Yield | Step::Blocked => {
                if let Some(p) = self.procs.get_any_mut(pid) {
                    if matches!(p.status, Status::Running) {
                        p.status = Status::Ready;
                    }
                }
            }
        }
        if self.procs.running() == Some(pid) {
            self.procs.set_running(None);
        }
    }

    /// CPU accounting and the watchdog. A slice over the quantum counts as a
    /// preemption; a slice over the watchdog threshold is a strike, and
    /// enough strikes bring SIGTERM, then SIGKILL.
    fn account(&mut self, pid: Pid, slice: f64) {
        let quantum = ms_to_secs(self.config.quantum_ms);
        let watchdog_limit = quantum * self.config.watchdog_multiplier as f64;
        let escalate = {
            let Some(p) = self.procs.get_any_mut(pid) else { return };
            p.cpu.total += slice;
            p.cpu.last_slice = slice;
            if slice > p.cpu.max_slice {
                p.cpu.max_slice = slice;
            }
            if slice > quantum {
                p.cpu.preemptions += 1;
            }
            if slice > watchdog_limit {
                p.cpu.strikes += 1;
                if p.cpu.strikes >= self.config.watchdog_strikes {
                    let termed = p.watchdog_termed;
                    p.watchdog_termed = true;
                    Some(termed)
                } else {
                    None
                }
            } else {
                None
            }
        };
        match escalate {
            Some(false) => {
                klog!(self, Sched, pid, "watchdog strike limit hit, sending SIGTERM");
                self.post_signal(pid, SIGTERM);
            }
            Some(true) => {
                klog!(self, Sched, pid, "watchdog escalating to SIGKILL");
                self.post_signal(pid, SIGKILL);
            }
            None => {}
        }
    }

    /// Raises the caller's IRQL, returning the previous level.
    pub fn raise_irql(&mut self, pid: Pid, level: Irql) -> Result<Irql> {
        let p = self.procs.get_mut(pid)?;
        let old = p.irql;
        if level > old {
            p.irql = level;
        }
        Ok(old)
    }

    /// Restores the caller's IRQL to a lower level.
    pub fn lower_irql(&mut self, pid: Pid, level: Irql) -> Result<()> {
        let p = self.procs.get_mut(pid)?;
        if level < p.irql {
            p.irql = level;
        }
        Ok(())
    }
}
