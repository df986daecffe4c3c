//! The process table.
//!
//! One table for the whole executive. Iteration order is insertion order,
//! which the round-robin rotor relies on.

use indexmap::IndexMap;

use super::{Pid, Process, Status};
use crate::syscall::error::{Error, Result};

pub struct ProcessTable {
    map: IndexMap<Pid, Process>,
    next_pid: Pid,
    /// Pid of the process currently in `Running` state, if any.
    running: Option<Pid>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            map: IndexMap::new(),
            next_pid: 1,
            running: None,
        }
    }

    pub fn allocate_pid(&mut self) -> Pid {
        let pid = self.next_pid;
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, process: Process) {
        self.map.insert(process.pid, process);
    }

    /// Live-process lookup. Dead processes are visible only through
    /// [`ProcessTable::get_any`] until reaped.
    pub fn get(&self, pid: Pid) -> Result<&Process> {
        match self.map.get(&pid) {
            Some(p) if !p.status.is_dead() => Ok(p),
            _ => Err(Error::NoSuchProcess),
        }
    }

    pub fn get_mut(&mut self, pid: Pid) -> Result<&mut Process> {
        match self.map.get_mut(&pid) {
            Some(p) if !p.status.is_dead() => Ok(p),
            _ => Err(Error::NoSuchProcess),
        }
    }

    /// Lookup that also sees dead-but-unreaped processes.
    pub fn get_any(&self, pid: Pid) -> Option<&Process> {
        self.map.get(&pid)
    }

    pub fn get_any_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.map.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.map.shift_remove(&pid)
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.map.contains_key(&pid)
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.map.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.map.values()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Process> {
        self.map.values_mut()
    }

    /// Pids of every live member of the given process group.
    pub fn group_members(&self, pgid: Pid) -> Vec<Pid> {
        self.map
            .values()
            .filter(|p| p.pgid == pgid && !p.status.is_dead())
            .map(|p| p.pid)
            .collect()
    }

    /// Live children of the given parent.
    pub fn children_of(&self, ppid: Pid) -> Vec<Pid> {
        self.map
            .values()
            .filter(|p| p.ppid == Some(ppid))
            .map(|p| p.pid)
            .collect()
    }

    pub fn running(&self) -> Option<Pid> {
        self.running
    }

    /// Marks `pid` as the running process. At most one process holds
    /// `Running` at a time; the previous one must have yielded already.
    pub fn set_running(&mut self, pid: Option<Pid>) {
        debug_assert!(
            self.running
                .and_then(|p| self.map.get(&p))
                .map_or(true, |p| !matches!(p.status, Status::Running))
                || pid == self.running,
            "two processes running at once"
        );
        self.running = pid;
    }

    /// Ready pids in table order, the rotor's raw material.
    pub fn ready_pids(&self) -> Vec<Pid> {
        self.map
            .values()
            .filter(|p| p.status.is_ready() && p.program.is_some())
            .map(|p| p.pid)
            .collect()
    }
}
