//! Mutex objects.
//!
//! Owned, recursive. Signaled means free. A dead owner abandons the mutex;
//! the next acquirer is told so through an ABANDONED wait result and must
//! treat the protected resource as possibly inconsistent.

use super::DispatchHeader;
use crate::object::{Access, Body, ObjectId};
use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::Kernel;

#[derive(Debug)]
pub struct Mutex {
    pub header: DispatchHeader,
    pub owner: Option<Pid>,
    pub depth: u32,
    /// Set when the previous owner died while holding the mutex; consumed by
    /// the next acquire.
    pub abandoned: bool,
}

impl Mutex {
    pub fn new(owner: Option<Pid>) -> Mutex {
        Mutex {
            header: DispatchHeader::new(false, owner.is_none()),
            owner,
            depth: if owner.is_some() { 1 } else { 0 },
            abandoned: false,
        }
    }
}

impl Kernel {
    pub fn ke_create_mutex(&mut self, caller: Pid, initial_owner: bool) -> Result<String> {
        self.procs.get(caller)?;
        let owner = if initial_owner { Some(caller) } else { None };
        let id = self.ob.create(Body::Mutex(Mutex::new(owner)));
        klog!(self, Ipc, caller, "mutex {} created", id);
        self.create_handle_for(caller, id, Access::all())
    }

    /// Releases one level of ownership. Only the owner may release; dropping
    /// the last level frees the mutex and wakes the oldest waiter.
    pub fn ke_release_mutex(&mut self, caller: Pid, handle: &str) -> Result<()> {
        let id = self.resolve_handle(caller, handle, Access::SYNCHRONIZE)?;
        let freed = self.mutex_release_inner(id, caller)?;
        if freed {
            self.wake_waiters(id);
        }
        Ok(())
    }

    fn mutex_release_inner(&mut self, id: ObjectId, caller: Pid) -> Result<bool> {
        let obj = self.ob.get_mut(id)?;
        let Body::Mutex(m) = &mut obj.body else {
            return Err(Error::NotWaitable);
        };
        if m.owner != Some(caller) {
            klog!(self, Ipc, caller, "release of mutex {} by non-owner", id);
            return Err(Error::AccessDenied);
        }
        m.depth = m.depth.saturating_sub(1);
        if m.depth == 0 {
            m.owner = None;
            m.header.signaled = true;
            return Ok(true);
        }
        Ok(false)
    }

    /// Abandons every mutex `pid` owns. Run by the death sweep.
    pub(crate) fn abandon_mutexes_of(&mut self, pid: Pid) {
        let held: Vec<ObjectId> = self
            .ob
            .object_ids()
            .into_iter()
            .filter(|&id| {
                matches!(
                    self.ob.get(id).map(|o| &o.body),
                    Ok(Body::Mutex(m)) if m.owner == Some(pid)
                )
            })
            .collect();
        for id in held {
            if let Ok(obj) = self.ob.get_mut(id) {
                if let Body::Mutex(m) = &mut obj.body {
                    m.owner = None;
                    m.depth = 0;
                    m.abandoned = true;
                    m.header.signaled = true;
                }
            }
            klog!(self, Ipc, pid, "mutex {} abandoned by dead owner", id);
            self.wake_waiters(id);
        }
    }
}
