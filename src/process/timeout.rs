//! Central wait-timeout registry.
//!
//! Every timed wait registers its deadline here. The scheduler consults the
//! registry each tick; expired entries wake the sleeper with a TIMEOUT
//! result, and the wake path detaches it from whatever it was queued on.

use std::collections::VecDeque;

use super::Pid;

#[derive(Debug)]
struct Timeout {
    pid: Pid,
    deadline: f64,
}

#[derive(Debug, Default)]
pub struct TimeoutRegistry {
    entries: VecDeque<Timeout>,
}

impl TimeoutRegistry {
    pub fn new() -> TimeoutRegistry {
        TimeoutRegistry {
            entries: VecDeque::new(),
        }
    }

    /// Registers a deadline for `pid`, replacing any previous one.
    pub fn register(&mut self, pid: Pid, deadline: f64) {
        self.cancel(pid);
        self.entries.push_back(Timeout { pid, deadline });
    }

    /// Drops the entry for `pid`, if any. Safe to call when none exists.
    pub fn cancel(&mut self, pid: Pid) {
        self.entries.retain(|t| t.pid != pid);
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.entries.iter().any(|t| t.pid == pid)
    }

    /// Removes and returns every pid whose deadline has passed.
    pub fn expire(&mut self, now: f64) -> Vec<Pid> {
        let mut expired = Vec::new();
        let mut i = 0;
        while i < self.entries.len() {
            if self.entries[i].deadline <= now {
                if let Some(t) = self.entries.remove(i) {
                    expired.push(t.pid);
                }
            } else {
                i += 1;
            }
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expires_in_registration_order() {
        let mut reg = TimeoutRegistry::new();
        reg.register(1, 1.0);
        reg.register(2, 0.5);
        reg.register(3, 2.0);
        assert_eq!(reg.expire(0.4), Vec::<Pid>::new());
        assert_eq!(reg.expire(1.0), vec![1, 2]);
        assert!(reg.contains(3));
    }

    #[test]
    fn reregistration_replaces_deadline() {
        let mut reg = TimeoutRegistry::new();
        reg.register(7, 1.0);
        reg.register(7, 5.0);
        assert_eq!(reg.expire(2.0), Vec::<Pid>::new());
        assert_eq!(reg.expire(5.0), vec![7]);
    }
}
