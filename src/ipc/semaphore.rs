//! Semaphore objects.

use super::DispatchHeader;
use crate::object::{Access, Body};
use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::Kernel;

#[derive(Debug)]
pub struct Semaphore {
    pub header: DispatchHeader,
    pub count: u32,
    pub max: u32,
}

impl Semaphore {
    pub fn new(initial: u32, max: u32) -> Semaphore {
        Semaphore {
            header: DispatchHeader::new(false, initial > 0),
            count: initial.min(max),
            max,
        }
    }
}

impl Kernel {
    pub fn ke_create_semaphore(&mut self, caller: Pid, initial: u32, max: u32) -> Result<String> {
        self.procs.get(caller)?;
        if max == 0 {
            return Err(Error::InvalidArgument("semaphore max must be positive"));
        }
        let id = self.ob.create(Body::Semaphore(Semaphore::new(initial, max)));
        klog!(self, Ipc, caller, "semaphore {} created ({}/{})", id, initial.min(max), max);
        self.create_handle_for(caller, id, Access::all())
    }

    /// Adds `n` to the count, clamped at the maximum, and wakes up to `n`
    /// waiters one at a time. Returns the count before the release.
    pub fn ke_release_semaphore(&mut self, caller: Pid, handle: &str, n: u32) -> Result<u32> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        let previous = {
            let obj = self.ob.get_mut(id)?;
            let Body::Semaphore(s) = &mut obj.body else {
                return Err(Error::NotWaitable);
            };
            let previous = s.count;
            s.count = s.count.saturating_add(n).min(s.max);
            s.header.signaled = s.count > 0;
            previous
        };
        self.wake_waiters(id);
        Ok(previous)
    }
}
