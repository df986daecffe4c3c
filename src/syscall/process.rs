//! Process lifecycle syscalls.

use crate::process::signal::SIGKILL;
use crate::process::{CpuStats, Pid, Process, ProcessInfo, Program, Ring};
use crate::syscall::error::{Error, Result};
use crate::Kernel;

/// Ordering of rings by privilege, most privileged first.
fn rank(ring: Ring) -> u8 {
    match ring {
        Ring::Kernel => 0,
        Ring::Manager => 1,
        Ring::Driver => 2,
        Ring::Elevated => 3,
        Ring::User => 4,
    }
}

impl Kernel {
    /// Boot-time spawn with no parent. The embedding runtime uses this to
    /// seed the initial manager processes.
    pub fn spawn_system(&mut self, image: &str, ring: Ring) -> Pid {
        let pid = self.procs.allocate_pid();
        let synapse = self.ob.new_synapse_token();
        let mut p = Process::new(pid, None, image, ring, synapse);
        seed_env(&mut p);
        self.procs.insert(p);
        klog!(self, Proc, pid, "system process {} spawned at ring {}", image, ring);
        pid
    }

    /// Spawns a child of `caller`. The child inherits uid, gid, cwd, and
    /// environment; its synapse token is fresh and its group is its own pid.
    pub fn process_spawn(
        &mut self,
        caller: Pid,
        image: &str,
        ring: Ring,
        env: &[(&str, &str)],
    ) -> Result<Pid> {
        let parent = self.procs.get(caller)?;
        if rank(ring) < rank(parent.ring) {
            klog!(self, Sec, caller, "spawn at ring {} denied from ring {}", ring, parent.ring);
            return Err(Error::AccessDenied);
        }
        let (uid, gid, cwd, mut child_env) =
            (parent.uid, parent.gid, parent.cwd.clone(), parent.env.clone());
        for (k, v) in env {
            child_env.insert(String::from(*k), String::from(*v));
        }
        let pid = self.procs.allocate_pid();
        let synapse = self.ob.new_synapse_token();
        let mut p = Process::new(pid, Some(caller), image, ring, synapse);
        p.uid = uid;
        p.gid = gid;
        p.cwd = cwd;
        p.env = child_env;
        p.env.insert(String::from("PWD"), p.cwd.clone());
        if let Some(args) = p.env.get("ARGS") {
            p.args = args.split_whitespace().map(String::from).collect();
        }
        self.procs.insert(p);
        klog!(self, Proc, caller, "spawned pid {} ({}) at ring {}", pid, image, ring);
        Ok(pid)
    }

    /// Spawns a co-process sharing the caller's environment, cwd, group, and
    /// synapse token.
    pub fn process_spawn_thread(&mut self, caller: Pid, image: &str) -> Result<Pid> {
        let parent = self.procs.get(caller)?;
        let (ring, uid, gid, cwd, env, synapse, pgid) = (
            parent.ring,
            parent.uid,
            parent.gid,
            parent.cwd.clone(),
            parent.env.clone(),
            parent.synapse.clone(),
            parent.pgid,
        );
        let pid = self.procs.allocate_pid();
        let mut p = Process::new(pid, Some(caller), image, ring, synapse);
        p.uid = uid;
        p.gid = gid;
        p.cwd = cwd;
        p.env = env;
        p.pgid = pgid;
        self.procs.insert(p);
        self.procs.get_mut(caller)?.threads.push(pid);
        klog!(self, Proc, caller, "spawned thread pid {}", pid);
        Ok(pid)
    }

    /// Attaches the cooperative task body the scheduler will resume.
    pub fn attach_program(&mut self, pid: Pid, program: Box<dyn Program>) -> Result<()> {
        self.procs.get_mut(pid)?.program = Some(program);
        Ok(())
    }

    /// Immediate, uncatchable termination of `target`.
    pub fn process_kill(&mut self, caller: Pid, target: Pid) -> Result<()> {
        self.check_process_access(caller, target)?;
        klog!(self, Proc, caller, "killing pid {}", target);
        self.kill_process(target, 128 + SIGKILL as i32, "process_kill");
        Ok(())
    }

    /// Voluntary exit.
    pub fn process_exit(&mut self, caller: Pid, status: i32) {
        self.kill_process(caller, status, "exit");
    }

    /// A voluntary checkpoint. The actual yield is the program returning
    /// [`crate::process::Step::Yield`]; this records it for accounting.
    pub fn process_yield(&mut self, caller: Pid) -> Result<()> {
        self.procs.get(caller)?;
        Ok(())
    }

    /// Collects a dead child's exit status and reaps its descriptor.
    /// `None` means the child is still running; SIGCHLD says when to retry.
    pub fn process_wait(&mut self, caller: Pid, child: Pid) -> Result<Option<i32>> {
        self.procs.get(caller)?;
        let Some(c) = self.procs.get_any(child) else {
            return Err(Error::NoSuchProcess);
        };
        if c.ppid != Some(caller) {
            klog!(self, Sec, caller, "wait on non-child pid {}", child);
            return Err(Error::AccessDenied);
        }
        if !c.status.is_dead() {
            return Ok(None);
        }
        let status = c.exit_status.unwrap_or(0);
        self.procs.remove(child);
        klog!(self, Proc, caller, "reaped pid {}, status {}", child, status);
        Ok(Some(status))
    }

    pub fn process_list(&self, caller: Pid) -> Result<Vec<ProcessInfo>> {
        self.procs.get(caller)?;
        Ok(self
            .procs
            .iter()
            .map(|p| ProcessInfo {
                pid: p.pid,
                ppid: p.ppid,
                ring: p.ring,
                status: p.status.as_str(),
                image: p.image.clone(),
                pgid: p.pgid,
                priority: p.priority,
            })
            .collect())
    }

    /// The pid of the process currently running, if the executor is mid
    /// resume.
    pub fn process_get_pid(&self) -> Option<Pid> {
        self.procs.running()
    }

    pub fn process_get_ring(&self, caller: Pid, pid: Pid) -> Result<Ring> {
        self.procs.get(caller)?;
        Ok(self.procs.get(pid)?.ring)
    }

    pub fn process_cpu_stats(&self, caller: Pid, pid: Pid) -> Result<CpuStats> {
        self.procs.get(caller)?;
        Ok(self.procs.get(pid)?.cpu.clone())
    }

    /// Adjusts the scheduling tiebreaker. Lower runs first among equals.
    pub fn process_set_priority(&mut self, caller: Pid, target: Pid, priority: u8) -> Result<()> {
        self.check_process_access(caller, target)?;
        self.procs.get_mut(target)?.priority = priority;
        Ok(())
    }

    /// Reads one environment key.
    pub fn environ_get(&self, caller: Pid, key: &str) -> Result<Option<String>> {
        Ok(self.procs.get(caller)?.env.get(key).cloned())
    }

    /// Writes one environment key. PWD tracks the cwd as well.
    pub fn environ_set(&mut self, caller: Pid, key: &str, value: &str) -> Result<()> {
        let p = self.procs.get_mut(caller)?;
        if key == "PWD" {
            p.cwd = String::from(value);
        }
        p.env.insert(String::from(key), String::from(value));
        Ok(())
    }

    /// Wall-clock seconds since the Unix epoch. The only place wall time is
    /// surfaced; core logic never reads it.
    pub fn environ_realtime(&self, caller: Pid) -> Result<f64> {
        self.procs.get(caller)?;
        Ok(std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0))
    }
}

fn seed_env(p: &mut Process) {
    p.env.insert(String::from("USER"), String::from("root"));
    p.env.insert(String::from("UID"), p.uid.to_string());
    p.env.insert(String::from("HOME"), String::from("/root"));
    p.env.insert(String::from("PWD"), p.cwd.clone());
    p.env.insert(String::from("PATH"), String::from("/bin:/usr/bin"));
    p.env.insert(String::from("HOSTNAME"), String::from("axis"));
}
