//! Signals, process groups, and the death sweep.
//!
//! Signals queue per process and are delivered at well-defined points, with
//! the target's IRQL raised to APC_LEVEL for the duration. SIGKILL and
//! SIGSTOP never queue: they act on the process status immediately. A signal
//! landing on a sleeper wakes it with IO_COMPLETION so it can service its
//! queue and re-issue the wait.

use super::{Irql, Pid, SignalHandler, Status};
use crate::ipc::WaitStatus;
use crate::syscall::error::{Error, Result};
use crate::Kernel;

pub const SIGHUP: u32 = 1;
pub const SIGINT: u32 = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGUSR2: u32 = 12;
pub const SIGPIPE: u32 = 13;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;
pub const SIGTSTP: u32 = 20;

/// What an unhandled signal does to its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Terminate,
    Ignore,
    Stop,
    Continue,
}

pub fn default_action(signum: u32) -> Disposition {
    match signum {
        SIGCHLD => Disposition::Ignore,
        SIGSTOP | SIGTSTP => Disposition::Stop,
        SIGCONT => Disposition::Continue,
        _ => Disposition::Terminate,
    }
}

fn masked(mask: u64, signum: u32) -> bool {
    signum < 64 && mask & (1u64 << signum) != 0
}

impl Kernel {
    /// Gate for syscalls naming another process: privileged rings and early
    /// pids pass, otherwise the target must be the caller itself, a
    /// descendant, or a group sibling.
    pub(crate) fn check_process_access(&self, caller: Pid, target: Pid) -> Result<()> {
        let caller_proc = self.procs.get(caller)?;
        self.procs.get(target)?;
        if caller == target
            || caller_proc.ring.is_privileged()
            || caller < self.config.synapse_bypass_pid
        {
            return Ok(());
        }
        let target_proc = self.procs.get(target)?;
        if target_proc.pgid == caller_proc.pgid {
            return Ok(());
        }
        let mut cursor = target_proc.ppid;
        while let Some(pid) = cursor {
            if pid == caller {
                return Ok(());
            }
            cursor = self.procs.get_any(pid).and_then(|p| p.ppid);
        }
        klog!(self, Sec, caller, "denied signal access to pid {}", target);
        Err(Error::AccessDenied)
    }

    /// Sends a signal to one process.
    pub fn signal_send(&mut self, caller: Pid, target: Pid, signum: u32) -> Result<()> {
        self.check_process_access(caller, target)?;
        klog!(self, Proc, caller, "signal {} -> pid {}", signum, target);
        self.post_signal(target, signum);
        Ok(())
    }

    /// Sends a signal to every non-dead member of a process group.
    pub fn signal_send_group(&mut self, caller: Pid, pgid: Pid, signum: u32) -> Result<()> {
        let caller_proc = self.procs.get(caller)?;
        if !(caller_proc.ring.is_privileged()
            || caller < self.config.synapse_bypass_pid
            || caller_proc.pgid == pgid)
        {
            klog!(self, Sec, caller, "denied group signal to pgid {}", pgid);
            return Err(Error::AccessDenied);
        }
        let members = self.procs.group_members(pgid);
        if members.is_empty() {
            return Err(Error::NoSuchProcess);
        }
        klog!(self, Proc, caller, "signal {} -> pgid {} ({} members)", signum, pgid, members.len());
        for pid in members {
            self.post_signal(pid, signum);
        }
        Ok(())
    }

    /// Registers a handler callback. SIGKILL and SIGSTOP are uncatchable.
    pub fn signal_set_handler(
        &mut self,
        caller: Pid,
        signum: u32,
        handler: SignalHandler,
    ) -> Result<()> {
        if signum == SIGKILL || signum == SIGSTOP {
            return Err(Error::InvalidArgument("signal is uncatchable"));
        }
        self.procs.get_mut(caller)?.handlers.insert(signum, handler);
        Ok(())
    }

    /// Replaces the caller's signal mask. Bit n masks signal n.
    pub fn signal_set_mask(&mut self, caller: Pid, mask: u64) -> Result<u64> {
        let p = self.procs.get_mut(caller)?;
        let old = p.sigmask;
        p.sigmask = mask;
        Ok(old)
    }

    /// Moves a process into another group. The default group of a process is
    /// its own pid.
    pub fn set_process_group(&mut self, caller: Pid, target: Pid, pgid: Pid) -> Result<()> {
        self.check_process_access(caller, target)?;
        self.procs.get_mut(target)?.pgid = pgid;
        klog!(self, Proc, caller, "pid {} joined group {}", target, pgid);
        Ok(())
    }

    /// Kernel-internal signal posting: no access checks, callers have
    /// already passed theirs.
    pub(crate) fn post_signal(&mut self, target: Pid, signum: u32) {
        let Some(status) = self.procs.get_any(target).map(|p| p.status.clone()) else {
            return;
        };
        if status.is_dead() {
            return;
        }
        match signum {
            SIGKILL => {
                self.kill_process(target, 128 + SIGKILL as i32, "killed");
            }
            SIGSTOP => {
                if status.is_sleeping() {
                    self.detach_registrations(target);
                    self.timeouts.cancel(target);
                    if let Some(p) = self.procs.get_any_mut(target) {
                        p.wait_result = Some(WaitStatus::IoCompletion);
                    }
                }
                if let Some(p) = self.procs.get_any_mut(target) {
                    p.status = Status::Stopped;
                }
                klog!(self, Proc, target, "stopped");
            }
            SIGCONT if matches!(status, Status::Stopped) => {
                if let Some(p) = self.procs.get_any_mut(target) {
                    p.status = Status::Ready;
                    p.pending_signals.push_back(signum);
                }
                klog!(self, Proc, target, "continued");
            }
            _ => {
                if let Some(p) = self.procs.get_any_mut(target) {
                    p.pending_signals.push_back(signum);
                }
                if status.is_sleeping() {
                    // Interrupt the wait; the sleeper rechecks its queue.
                    self.detach_registrations(target);
                    self.timeouts.cancel(target);
                    if let Some(p) = self.procs.get_any_mut(target) {
                        p.wait_result = Some(WaitStatus::IoCompletion);
                        p.unblock();
                    }
                }
            }
        }
    }

    /// Drains the pending queue at APC_LEVEL. A masked signal re-queues at
    /// the back and ends the cycle. Run before every resume.
    pub(crate) fn deliver_signals(&mut self, pid: Pid) {
        let Some(p) = self.procs.get_any_mut(pid) else { return };
        if p.status.is_dead() || p.pending_signals.is_empty() {
            return;
        }
        let saved_irql = p.irql;
        p.irql = Irql::Apc;

        let mut budget = self
            .procs
            .get_any(pid)
            .map(|p| p.pending_signals.len())
            .unwrap_or(0);
        while budget > 0 {
            budget -= 1;
            let Some(p) = self.procs.get_any_mut(pid) else { return };
            if p.status.is_dead() {
                return;
            }
            let Some(signum) = p.pending_signals.pop_front() else { break };
            if masked(p.sigmask, signum) {
                p.pending_signals.push_back(signum);
                break;
            }
            if let Some(mut handler) = p.handlers.remove(&signum) {
                // The handler runs without the descriptor borrowed so it may
                // capture and mutate its own state freely.
                let outcome = handler(signum);
                if let Some(p) = self.procs.get_any_mut(pid) {
                    p.handlers.entry(signum).or_insert(handler);
                }
                if let Err(err) = outcome {
                    klog!(self, Fail, pid, "signal {} handler failed: {}", signum, err);
                }
                continue;
            }
            match default_action(signum) {
                Disposition::Terminate => {
                    self.kill_process(pid, 128 + signum as i32, "unhandled signal");
                    break;
                }
                Disposition::Ignore => continue,
                Disposition::Stop => {
                    if let Some(p) = self.procs.get_any_mut(pid) {
                        p.status = Status::Stopped;
                    }
                    break;
                }
                Disposition::Continue => continue,
            }
        }

        if let Some(p) = self.procs.get_any_mut(pid) {
            if !p.status.is_dead() {
                p.irql = saved_irql;
            }
        }
    }

    /// The death sweep. Removes every registration, closes the handle
    /// table, abandons owned mutexes, fails pending override traffic,
    /// notifies the parent, and reparents children.
    pub(crate) fn kill_process(&mut self, pid: Pid, exit_status: i32, why: &str) {
        let Some(p) = self.procs.get_any(pid) else { return };
        if p.status.is_dead() {
            return;
        }
        // Off every waiter list first, then dead: nothing may observe a dead
        // pid still queued.
        self.detach_registrations(pid);
        self.timeouts.cancel(pid);

        let ppid = {
            let Some(p) = self.procs.get_any_mut(pid) else { return };
            p.status = Status::Dead;
            if p.exit_status.is_none() {
                p.exit_status = Some(exit_status);
            }
            p.program = None;
            p.wait_result = None;
            p.ppid
        };
        if self.procs.running() == Some(pid) {
            self.procs.set_running(None);
        }

        // Handle table sweep: close is the single de-reference site.
        let handles: Vec<_> = self
            .procs
            .get_any_mut(pid)
            .map(|p| p.handles.drain().collect())
            .unwrap_or_default();
        for (_, entry) in handles {
            self.handle_dropped(entry.object, entry.access);
        }

        self.abandon_mutexes_of(pid);
        self.override_owner_died(pid);

        // Reap finished children, orphan the rest.
        for child in self.procs.children_of(pid) {
            let dead = self
                .procs
                .get_any(child)
                .map(|c| c.status.is_dead())
                .unwrap_or(false);
            if dead {
                self.procs.remove(child);
            } else if let Some(c) = self.procs.get_any_mut(child) {
                c.ppid = None;
            }
        }

        klog!(self, Proc, pid, "dead ({}), exit status {}", why, exit_status);
        if let Some(parent) = ppid {
            if self.procs.get(parent).is_ok() {
                self.post_signal(parent, SIGCHLD);
            }
        }
    }
}
