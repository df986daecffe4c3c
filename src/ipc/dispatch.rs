//! The wait dispatcher.
//!
//! Every waitable body embeds a [`DispatchHeader`]: a signaled bit, the reset
//! policy, and a FIFO waiter list. Single-object and multiple-object waits
//! (any and all modes) both funnel through the engine here, as does every
//! wake triggered by a signal operation.

use arrayvec::ArrayVec;

use crate::config::MAX_WAIT_TARGETS;
use crate::object::{Access, Body, ObjectId};
use crate::process::{Irql, Pid, SleepKind, Status};
use crate::syscall::error::{Error, Result};
use crate::syscall::Outcome;
use crate::time::ms_to_secs;
use crate::Kernel;

/// An entry in a waiter list: who is waiting and which slot of their wait it
/// satisfies (always 0 for single waits).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Waiter {
    pub pid: Pid,
    pub key: usize,
}

/// The shared prefix of every waitable body.
#[derive(Debug, Clone, Default)]
pub struct DispatchHeader {
    pub signaled: bool,
    pub manual_reset: bool,
    /// FIFO by insertion; a pid appears at most once.
    pub waiters: Vec<Waiter>,
}

impl DispatchHeader {
    pub fn new(manual_reset: bool, signaled: bool) -> DispatchHeader {
        DispatchHeader {
            signaled,
            manual_reset,
            waiters: Vec::new(),
        }
    }

    /// Appends a waiter, keeping the at-most-once invariant.
    pub fn enqueue(&mut self, pid: Pid, key: usize) {
        if !self.waiters.iter().any(|w| w.pid == pid) {
            self.waiters.push(Waiter { pid, key });
        }
    }

    pub fn remove(&mut self, pid: Pid) {
        self.waiters.retain(|w| w.pid != pid);
    }
}

/// Wait results, with their wire status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// WAIT_0 plus the index of the satisfying target.
    Object(usize),
    /// Acquired a mutex a dead owner left behind.
    Abandoned(usize),
    /// The registered deadline expired first.
    Timeout,
    /// A signal interrupted the sleep; re-check pending signals and retry.
    IoCompletion,
    Failed,
}

impl WaitStatus {
    pub const fn code(self) -> i64 {
        match self {
            WaitStatus::Object(k) => k as i64,
            WaitStatus::Abandoned(k) => 0x80 + k as i64,
            WaitStatus::Timeout => 258,
            WaitStatus::IoCompletion => 0xC0,
            WaitStatus::Failed => -1,
        }
    }
}

impl Kernel {
    /// Waits on one handle. Returns `Ready` when the wait is decided on the
    /// spot; `Pending` means the caller is now sleeping and must read its
    /// result with [`Kernel::take_wait_result`] on resume.
    pub fn ke_wait_single(
        &mut self,
        caller: Pid,
        handle: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Outcome<WaitStatus>> {
        if self.procs.get(caller)?.irql >= Irql::Dispatch {
            klog!(self, Warn, caller, "wait refused at dispatch level");
            return Err(Error::CannotBlock);
        }
        let id = self.resolve_handle(caller, handle, Access::SYNCHRONIZE)?;
        if !self.is_waitable(id)? {
            klog!(self, Ipc, caller, "wait on non-waitable object {}", id);
            return Err(Error::NotWaitable);
        }
        if self.acquirable_by(id, caller) {
            let abandoned = self.acquire(id, caller);
            let status = if abandoned {
                WaitStatus::Abandoned(0)
            } else {
                WaitStatus::Object(0)
            };
            return Ok(Outcome::Ready(status));
        }
        if timeout_ms == Some(0) {
            return Ok(Outcome::Ready(WaitStatus::Timeout));
        }

        let mut targets = ArrayVec::new();
        targets.push(id);
        self.park_on_dispatch(caller, targets, false, timeout_ms);
        Ok(Outcome::Pending)
    }

    /// Waits on several handles at once. `wait_all` selects all-mode; the
    /// default any-mode reports the index of the satisfying target.
    pub fn ke_wait_multiple(
        &mut self,
        caller: Pid,
        handles: &[&str],
        wait_all: bool,
        timeout_ms: Option<u64>,
    ) -> Result<Outcome<WaitStatus>> {
        if self.procs.get(caller)?.irql >= Irql::Dispatch {
            klog!(self, Warn, caller, "wait refused at dispatch level");
            return Err(Error::CannotBlock);
        }
        if handles.is_empty() || handles.len() > MAX_WAIT_TARGETS {
            return Err(Error::InvalidArgument("bad wait target count"));
        }

        // Resolve everything up front so a bad handle fails with no side
        // effects on the good ones.
        let mut targets: ArrayVec<ObjectId, MAX_WAIT_TARGETS> = ArrayVec::new();
        for handle in handles {
            let id = self.resolve_handle(caller, handle, Access::SYNCHRONIZE)?;
            if !self.is_waitable(id)? {
                klog!(self, Ipc, caller, "wait on non-waitable object {}", id);
                return Err(Error::NotWaitable);
            }
            if targets.contains(&id) {
                return Err(Error::InvalidArgument("duplicate wait target"));
            }
            targets.push(id);
        }

        if wait_all {
            if targets.iter().all(|&id| self.acquirable_by(id, caller)) {
                let mut abandoned = false;
                for &id in &targets {
                    abandoned |= self.acquire(id, caller);
                }
                let status = if abandoned {
                    WaitStatus::Abandoned(0)
                } else {
                    WaitStatus::Object(0)
                };
                return Ok(Outcome::Ready(status));
            }
        } else if let Some(index) = targets
            .iter()
            .position(|&id| self.acquirable_by(id, caller))
        {
            let abandoned = self.acquire(targets[index], caller);
            let status = if abandoned {
                WaitStatus::Abandoned(index)
            } else {
                WaitStatus::Object(index)
            };
            return Ok(Outcome::Ready(status));
        }

        if timeout_ms == Some(0) {
            return Ok(Outcome::Ready(WaitStatus::Timeout));
        }
        self.park_on_dispatch(caller, targets, wait_all, timeout_ms);
        Ok(Outcome::Pending)
    }

    /// Enqueues the caller on every target, registers the timeout, and puts
    /// it to sleep.
    fn park_on_dispatch(
        &mut self,
        caller: Pid,
        targets: ArrayVec<ObjectId, MAX_WAIT_TARGETS>,
        wait_all: bool,
        timeout_ms: Option<u64>,
    ) {
        for (key, &id) in targets.iter().enumerate() {
            if let Ok(obj) = self.ob.get_mut(id) {
                if let Some(header) = obj.body.header_mut() {
                    header.enqueue(caller, key);
                }
            }
        }
        if let Some(ms) = timeout_ms {
            let deadline = self.clock.now() + ms_to_secs(ms);
            self.timeouts.register(caller, deadline);
        }
        let n = targets.len();
        if let Ok(p) = self.procs.get_mut(caller) {
            p.block(SleepKind::Dispatch { targets, wait_all });
        }
        klog!(self, Ipc, caller, "sleeping on {} wait target(s)", n);
    }

    /// Whether the object embeds a dispatch header at all.
    pub(crate) fn is_waitable(&self, id: ObjectId) -> Result<bool> {
        Ok(self.ob.get(id)?.body.header().is_some())
    }

    /// Whether `pid` could complete a type-specific acquire right now.
    pub(crate) fn acquirable_by(&self, id: ObjectId, pid: Pid) -> bool {
        match self.ob.get(id).map(|o| &o.body) {
            Ok(Body::Mutex(m)) => m.owner.is_none() || m.owner == Some(pid),
            Ok(Body::Semaphore(s)) => s.count > 0,
            Ok(body) => body.header().is_some_and(|h| h.signaled),
            Err(_) => false,
        }
    }

    /// Whether some waiter, any waiter, could acquire right now.
    fn acquirable_by_anyone(&self, id: ObjectId) -> bool {
        match self.ob.get(id).map(|o| &o.body) {
            Ok(Body::Mutex(m)) => m.owner.is_none(),
            Ok(Body::Semaphore(s)) => s.count > 0,
            Ok(body) => body.header().is_some_and(|h| h.signaled),
            Err(_) => false,
        }
    }

    /// The type-specific acquire. Returns true when the caller inherited an
    /// abandoned mutex.
    pub(crate) fn acquire(&mut self, id: ObjectId, pid: Pid) -> bool {
        let Ok(obj) = self.ob.get_mut(id) else {
            return false;
        };
        match &mut obj.body {
            Body::Event(e) => {
                if !e.header.manual_reset {
                    e.header.signaled = false;
                }
                false
            }
            Body::Mutex(m) => {
                if m.owner == Some(pid) {
                    m.depth += 1;
                    false
                } else {
                    m.owner = Some(pid);
                    m.depth = 1;
                    m.header.signaled = false;
                    core::mem::take(&mut m.abandoned)
                }
            }
            Body::Semaphore(s) => {
                s.count = s.count.saturating_sub(1);
                s.header.signaled = s.count > 0;
                false
            }
            // Timers and message queues stay signaled until reset elsewhere.
            _ => false,
        }
    }

    /// Wakes as many waiters of `id` as its current state can satisfy, FIFO,
    /// honouring multi-wait contexts.
    pub(crate) fn wake_waiters(&mut self, id: ObjectId) {
        loop {
            if !self.acquirable_by_anyone(id) {
                break;
            }
            let waiters = match self.ob.get(id).ok().and_then(|o| o.body.header()) {
                Some(h) => h.waiters.clone(),
                None => break,
            };
            let mut woke = false;
            for waiter in waiters {
                match self.try_satisfy(id, waiter) {
                    Satisfy::Woken => {
                        woke = true;
                        break;
                    }
                    Satisfy::Skipped => continue,
                    Satisfy::Stale => {
                        if let Some(h) =
                            self.ob.get_mut(id).ok().and_then(|o| o.body.header_mut())
                        {
                            h.remove(waiter.pid);
                        }
                        continue;
                    }
                }
            }
            if !woke {
                break;
            }
        }
    }

    /// Attempts to complete `waiter`'s wait with a trigger on `id`.
    fn try_satisfy(&mut self, id: ObjectId, waiter: Waiter) -> Satisfy {
        let Some(process) = self.procs.get_any(waiter.pid) else {
            return Satisfy::Stale;
        };
        let Status::Sleeping(SleepKind::Dispatch { targets, wait_all }) = &process.status else {
            return Satisfy::Stale;
        };
        if !targets.contains(&id) {
            return Satisfy::Stale;
        }
        if *wait_all {
            let targets = targets.clone();
            if !targets
                .iter()
                .all(|&t| self.acquirable_by(t, waiter.pid))
            {
                return Satisfy::Skipped;
            }
            let mut abandoned = false;
            for &t in &targets {
                abandoned |= self.acquire(t, waiter.pid);
            }
            let status = if abandoned {
                WaitStatus::Abandoned(0)
            } else {
                WaitStatus::Object(0)
            };
            self.finish_wait(waiter.pid, status);
        } else {
            let abandoned = self.acquire(id, waiter.pid);
            let status = if abandoned {
                WaitStatus::Abandoned(waiter.key)
            } else {
                WaitStatus::Object(waiter.key)
            };
            self.finish_wait(waiter.pid, status);
        }
        Satisfy::Woken
    }

    /// Writes the result, detaches the sleeper from every list it is queued
    /// on, and makes it runnable.
    pub(crate) fn finish_wait(&mut self, pid: Pid, status: WaitStatus) {
        self.detach_registrations(pid);
        self.timeouts.cancel(pid);
        if let Some(p) = self.procs.get_any_mut(pid) {
            p.wait_result = Some(status);
            p.unblock();
        }
        klog!(self, Ipc, pid, "wait completed with {:?}", status);
    }

    /// Removes `pid` from whatever its sleep registration points at. The
    /// status is left untouched; callers decide what happens next.
    pub(crate) fn detach_registrations(&mut self, pid: Pid) {
        let kind = match self.procs.get_any(pid) {
            Some(p) => match &p.status {
                Status::Sleeping(kind) => kind.clone(),
                _ => return,
            },
            None => return,
        };
        match kind {
            SleepKind::Dispatch { targets, .. } => {
                for id in targets {
                    if let Some(h) = self.ob.get_mut(id).ok().and_then(|o| o.body.header_mut()) {
                        h.remove(pid);
                    }
                }
            }
            SleepKind::PipeRead(id) | SleepKind::PipeWrite(id) => {
                if let Ok(obj) = self.ob.get_mut(id) {
                    if let Body::Pipe(pipe) = &mut obj.body {
                        pipe.pending_readers.retain(|&p| p != pid);
                        pipe.pending_writers.retain(|&p| p != pid);
                    }
                }
            }
            SleepKind::MqSend(id) | SleepKind::MqReceive(id) => {
                if let Ok(obj) = self.ob.get_mut(id) {
                    if let Body::MessageQueue(q) = &mut obj.body {
                        q.send_waiters.retain(|&p| p != pid);
                        q.recv_waiters.retain(|&p| p != pid);
                    }
                }
            }
            SleepKind::Override(_) => {
                self.overrides.pending.remove(&pid);
            }
            SleepKind::InboxWait => {}
        }
    }

    /// Wakes an expired sleeper with a TIMEOUT result.
    pub(crate) fn expire_wait(&mut self, pid: Pid) {
        klog!(self, Ipc, pid, "wait deadline expired");
        self.finish_wait(pid, WaitStatus::Timeout);
    }
}

enum Satisfy {
    /// The waiter was woken and removed from every list.
    Woken,
    /// The waiter stays queued (all-mode not yet satisfiable).
    Skipped,
    /// The entry no longer matches a live sleeper; drop it.
    Stale,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_match_the_contract() {
        assert_eq!(WaitStatus::Object(0).code(), 0);
        assert_eq!(WaitStatus::Object(2).code(), 2);
        assert_eq!(WaitStatus::Abandoned(0).code(), 0x80);
        assert_eq!(WaitStatus::Timeout.code(), 258);
        assert_eq!(WaitStatus::IoCompletion.code(), 0xC0);
        assert_eq!(WaitStatus::Failed.code(), -1);
    }

    #[test]
    fn header_enqueue_is_once_per_pid() {
        let mut h = DispatchHeader::new(false, false);
        h.enqueue(3, 0);
        h.enqueue(3, 1);
        h.enqueue(4, 2);
        assert_eq!(h.waiters.len(), 2);
        h.remove(3);
        assert_eq!(h.waiters, vec![Waiter { pid: 4, key: 2 }]);
    }
}
