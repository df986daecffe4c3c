//! Event objects.
//!
//! The simplest waitable: a bare dispatch header. Manual-reset events stay
//! signaled and wake every waiter; auto-reset events wake exactly one and
//! clear themselves.

use super::DispatchHeader;
use crate::object::{Access, Body};
use crate::process::Pid;
use crate::syscall::error::Result;
use crate::Kernel;

#[derive(Debug, Default)]
pub struct Event {
    pub header: DispatchHeader,
}

impl Event {
    pub fn new(manual_reset: bool, signaled: bool) -> Event {
        Event {
            header: DispatchHeader::new(manual_reset, signaled),
        }
    }
}

impl Kernel {
    pub fn ke_create_event(
        &mut self,
        caller: Pid,
        manual_reset: bool,
        initial_signaled: bool,
    ) -> Result<String> {
        self.procs.get(caller)?;
        let id = self.ob.create(Body::Event(Event::new(manual_reset, initial_signaled)));
        klog!(self, Ipc, caller, "event {} created", id);
        self.create_handle_for(caller, id, Access::all())
    }

    /// Marks the event signaled and wakes waiters per the reset policy.
    pub fn ke_set_event(&mut self, caller: Pid, handle: &str) -> Result<()> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        self.event_header_mut(id)?.signaled = true;
        self.wake_waiters(id);
        Ok(())
    }

    pub fn ke_reset_event(&mut self, caller: Pid, handle: &str) -> Result<()> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        self.event_header_mut(id)?.signaled = false;
        Ok(())
    }

    /// Set, wake, clear in one step. Waiters not queued right now miss it.
    pub fn ke_pulse_event(&mut self, caller: Pid, handle: &str) -> Result<()> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        self.event_header_mut(id)?.signaled = true;
        self.wake_waiters(id);
        if let Ok(header) = self.event_header_mut(id) {
            header.signaled = false;
        }
        Ok(())
    }

    fn event_header_mut(&mut self, id: crate::object::ObjectId) -> Result<&mut DispatchHeader> {
        match &mut self.ob.get_mut(id)?.body {
            Body::Event(e) => Ok(&mut e.header),
            _ => Err(crate::syscall::error::Error::NotWaitable),
        }
    }
}
