//! # Syscall Layer
//!
//! The dynamic syscall bus and the override mechanism riding on it. Typed
//! kernel methods are the authoritative implementations; `syscall_invoke` is
//! the routing layer above them that lets a Ring 1 manager claim a syscall
//! name and service other processes' invocations of it.

pub mod error;
pub mod privilege;
pub mod process;

use hashbrown::HashMap;

use crate::process::{Pid, SleepKind};
use crate::syscall::error::{Error, Result};
use crate::Kernel;

/// A blocking-capable syscall result. `Pending` means the caller has been
/// moved to `Sleeping` and must pick up its result on resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome<T> {
    Ready(T),
    Pending,
}

impl<T> Outcome<T> {
    pub fn ready(self) -> Option<T> {
        match self {
            Outcome::Ready(v) => Some(v),
            Outcome::Pending => None,
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Outcome::Pending)
    }
}

/// A dynamically typed syscall argument or return value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Unit,
    Bool(bool),
    Int(i64),
    Str(String),
    Bytes(Vec<u8>),
}

impl Value {
    pub fn as_int(&self) -> Result<i64> {
        match self {
            Value::Int(i) => Ok(*i),
            _ => Err(Error::InvalidArgument("expected integer")),
        }
    }

    pub fn as_str(&self) -> Result<&str> {
        match self {
            Value::Str(s) => Ok(s),
            _ => Err(Error::InvalidArgument("expected string")),
        }
    }

    pub fn as_bytes(&self) -> Result<&[u8]> {
        match self {
            Value::Bytes(b) => Ok(b),
            _ => Err(Error::InvalidArgument("expected bytes")),
        }
    }
}

/// One parked invocation, as delivered to the override owner's inbox.
#[derive(Debug, Clone)]
pub struct OverrideRequest {
    pub name: String,
    pub args: Vec<Value>,
    /// The caller's synapse token at invocation time.
    pub synapse: String,
    pub pid: Pid,
}

/// The routing table above the dispatcher: syscall name to owning process,
/// plus the set of callers currently parked on a reply.
#[derive(Debug, Default)]
pub struct OverrideTable {
    pub(crate) owners: HashMap<String, Pid>,
    /// Parked caller to the overridden name it invoked.
    pub(crate) pending: HashMap<Pid, String>,
}

impl OverrideTable {
    pub fn new() -> OverrideTable {
        OverrideTable::default()
    }

    pub fn owner_of(&self, name: &str) -> Option<Pid> {
        self.owners.get(name).copied()
    }
}

impl Kernel {
    /// Claims delivery of every subsequent invocation of `name`. Ring 0 and
    /// 1 only; one owner per name.
    pub fn syscall_override(&mut self, caller: Pid, name: &str) -> Result<()> {
        let ring = self.procs.get(caller)?.ring;
        if !ring.is_privileged() {
            klog!(self, Sec, caller, "syscall_override denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        if let Some(owner) = self.overrides.owners.get(name) {
            if self.procs.get(*owner).is_ok() {
                return Err(Error::InvalidArgument("syscall already overridden"));
            }
        }
        self.overrides.owners.insert(String::from(name), caller);
        klog!(self, Ipc, caller, "override registered for {}", name);
        Ok(())
    }

    /// Invokes a syscall by name. An active override parks the caller and
    /// forwards the invocation; otherwise the built-in implementation runs
    /// inline.
    pub fn syscall_invoke(
        &mut self,
        caller: Pid,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Outcome<Vec<Value>>> {
        if let Some(owner) = self.overrides.owner_of(name) {
            if owner != caller && self.procs.get(owner).is_ok() {
                let synapse = self.procs.get(caller)?.synapse.clone();
                let request = OverrideRequest {
                    name: String::from(name),
                    args,
                    synapse,
                    pid: caller,
                };
                let owner_proc = self.procs.get_mut(owner)?;
                owner_proc.inbox.push_back(request);
                if matches!(owner_proc.status, crate::process::Status::Sleeping(SleepKind::InboxWait)) {
                    owner_proc.unblock();
                }
                self.overrides.pending.insert(caller, String::from(name));
                self.procs
                    .get_mut(caller)?
                    .block(SleepKind::Override(String::from(name)));
                klog!(self, Ipc, caller, "{} forwarded to pid {}", name, owner);
                return Ok(Outcome::Pending);
            }
        }
        self.dispatch_builtin(caller, name, args)
    }

    /// Pulls the next request from the caller's inbox, parking on an empty
    /// one.
    pub fn override_next_request(&mut self, caller: Pid) -> Result<Outcome<OverrideRequest>> {
        let p = self.procs.get_mut(caller)?;
        match p.inbox.pop_front() {
            Some(request) => Ok(Outcome::Ready(request)),
            None => {
                p.block(SleepKind::InboxWait);
                Ok(Outcome::Pending)
            }
        }
    }

    /// Replies to a parked invocation, resuming the caller with `values`.
    pub fn syscall_return(&mut self, caller: Pid, target: Pid, values: Vec<Value>) -> Result<()> {
        let name = match self.overrides.pending.get(&target) {
            Some(name) => name.clone(),
            None => return Err(Error::NoSuchProcess),
        };
        if self.overrides.owner_of(&name) != Some(caller) {
            klog!(self, Sec, caller, "syscall_return for {} by non-owner", name);
            return Err(Error::AccessDenied);
        }
        self.overrides.pending.remove(&target);
        let p = self.procs.get_mut(target)?;
        p.reply = Some(Ok(values));
        p.unblock();
        klog!(self, Ipc, caller, "reply posted to pid {}", target);
        Ok(())
    }

    /// Consumes the reply an override owner posted for `pid`. Programs call
    /// this on resume after a forwarded invocation.
    pub fn take_reply(&mut self, pid: Pid) -> Option<Result<Vec<Value>>> {
        self.procs.get_any_mut(pid)?.reply.take()
    }

    /// Run from the death sweep: releases the dead process's overrides and
    /// fails every caller parked on them.
    pub(crate) fn override_owner_died(&mut self, dead: Pid) {
        let names: Vec<String> = self
            .overrides
            .owners
            .iter()
            .filter(|(_, &owner)| owner == dead)
            .map(|(name, _)| name.clone())
            .collect();
        if names.is_empty() {
            return;
        }
        for name in &names {
            self.overrides.owners.remove(name);
        }
        let orphaned: Vec<Pid> = self
            .overrides
            .pending
            .iter()
            .filter(|(_, name)| names.contains(name))
            .map(|(&pid, _)| pid)
            .collect();
        for pid in orphaned {
            self.overrides.pending.remove(&pid);
            if let Some(p) = self.procs.get_any_mut(pid) {
                p.reply = Some(Err(Error::SyscallHandlerGone));
                p.unblock();
            }
            klog!(self, Fail, pid, "override owner died with request pending");
        }
    }

    /// The built-in implementations behind the dynamic bus.
    fn dispatch_builtin(
        &mut self,
        caller: Pid,
        name: &str,
        args: Vec<Value>,
    ) -> Result<Outcome<Vec<Value>>> {
        match name {
            "vfs_open" => {
                let path = args.first().ok_or(Error::InvalidArgument("missing path"))?;
                let mode = args.get(1).ok_or(Error::InvalidArgument("missing mode"))?;
                let mode = crate::vfs::OpenMode::from_bits_truncate(mode.as_int()? as u32);
                let handle = self.vfs_open(caller, path.as_str()?, mode)?;
                Ok(Outcome::Ready(vec![Value::Str(handle)]))
            }
            "vfs_read" => {
                let handle = args.first().ok_or(Error::InvalidArgument("missing handle"))?;
                let n = args.get(1).ok_or(Error::InvalidArgument("missing count"))?;
                match self.vfs_read(caller, handle.as_str()?, n.as_int()? as usize)? {
                    Outcome::Ready(data) => Ok(Outcome::Ready(vec![Value::Bytes(data)])),
                    Outcome::Pending => Ok(Outcome::Pending),
                }
            }
            "vfs_write" => {
                let handle = args.first().ok_or(Error::InvalidArgument("missing handle"))?;
                let bytes = args.get(1).ok_or(Error::InvalidArgument("missing bytes"))?;
                match self.vfs_write_all(caller, handle.as_str()?, bytes.as_bytes()?)? {
                    Outcome::Ready(n) => Ok(Outcome::Ready(vec![Value::Int(n as i64)])),
                    Outcome::Pending => Ok(Outcome::Pending),
                }
            }
            "vfs_close" => {
                let handle = args.first().ok_or(Error::InvalidArgument("missing handle"))?;
                self.vfs_close(caller, handle.as_str()?)?;
                Ok(Outcome::Ready(vec![Value::Unit]))
            }
            "vfs_list" => {
                let path = args.first().ok_or(Error::InvalidArgument("missing path"))?;
                let names = self.vfs_list(caller, path.as_str()?)?;
                Ok(Outcome::Ready(
                    names.into_iter().map(Value::Str).collect(),
                ))
            }
            "vfs_mkdir" => {
                let path = args.first().ok_or(Error::InvalidArgument("missing path"))?;
                self.vfs_mkdir(caller, path.as_str()?)?;
                Ok(Outcome::Ready(vec![Value::Unit]))
            }
            "vfs_remove" => {
                let path = args.first().ok_or(Error::InvalidArgument("missing path"))?;
                self.vfs_remove(caller, path.as_str()?)?;
                Ok(Outcome::Ready(vec![Value::Unit]))
            }
            "kernel_log" => {
                let text = args.first().ok_or(Error::InvalidArgument("missing text"))?;
                self.kernel_log(caller, text.as_str()?)?;
                Ok(Outcome::Ready(vec![Value::Unit]))
            }
            _ => {
                klog!(self, Warn, caller, "unknown syscall {}", name);
                Err(Error::InvalidArgument("unknown syscall"))
            }
        }
    }
}
