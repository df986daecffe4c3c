//! Timer objects.
//!
//! A timer carries a manual-reset dispatch header, an absolute deadline on
//! the uptime clock, an optional period, and an optional DPC fired on
//! expiry. Periodic timers re-arm immediately by advancing the deadline one
//! period; a backlog of missed periods collapses into at most one extra
//! firing.

use super::DispatchHeader;
use crate::dpc::DpcFn;
use crate::object::{Access, Body, ObjectId};
use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::time::ms_to_secs;
use crate::Kernel;

/// A deferred callback attached to a timer.
#[derive(Clone)]
pub struct TimerDpc {
    pub func: DpcFn,
    pub arg1: usize,
    pub arg2: usize,
}

pub struct Timer {
    pub header: DispatchHeader,
    pub deadline: f64,
    pub period: Option<f64>,
    pub dpc: Option<TimerDpc>,
    pub active: bool,
    /// Stable identifier, distinct from the object id.
    pub timer_id: u64,
}

impl Timer {
    pub fn new(timer_id: u64) -> Timer {
        Timer {
            header: DispatchHeader::new(true, false),
            deadline: 0.0,
            period: None,
            dpc: None,
            active: false,
            timer_id,
        }
    }
}

impl Kernel {
    pub fn ke_create_timer(&mut self, caller: Pid) -> Result<String> {
        self.procs.get(caller)?;
        let timer_id = self.ob.next_serial();
        let id = self.ob.create(Body::Timer(Timer::new(timer_id)));
        klog!(self, Ipc, caller, "timer {} created", id);
        self.create_handle_for(caller, id, Access::all())
    }

    /// Arms the timer: clears the signaled bit, records the deadline, the
    /// optional period, and the optional DPC.
    pub fn ke_set_timer(
        &mut self,
        caller: Pid,
        handle: &str,
        delay_ms: u64,
        period_ms: Option<u64>,
        dpc: Option<TimerDpc>,
    ) -> Result<()> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        let now = self.clock.now();
        let newly_armed = {
            let obj = self.ob.get_mut(id)?;
            let Body::Timer(t) = &mut obj.body else {
                return Err(Error::NotWaitable);
            };
            t.header.signaled = false;
            t.deadline = now + ms_to_secs(delay_ms);
            t.period = period_ms.map(ms_to_secs);
            t.dpc = dpc;
            let newly = !t.active;
            t.active = true;
            newly
        };
        if newly_armed {
            // The scan list holds a reference so closing every handle cannot
            // free an armed timer out from under the tick.
            self.ob.reference(id)?;
            self.timers.push(id);
        }
        klog!(self, Ipc, caller, "timer {} armed, {} ms", id, delay_ms);
        Ok(())
    }

    /// Disarms the timer. Returns whether it was armed.
    pub fn ke_cancel_timer(&mut self, caller: Pid, handle: &str) -> Result<bool> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        let was_active = {
            let obj = self.ob.get_mut(id)?;
            let Body::Timer(t) = &mut obj.body else {
                return Err(Error::NotWaitable);
            };
            core::mem::take(&mut t.active)
        };
        if was_active {
            self.disarm(id);
        }
        Ok(was_active)
    }

    fn disarm(&mut self, id: ObjectId) {
        self.timers.retain(|&t| t != id);
        self.external_ref_dropped(id);
    }

    /// Fires every expired timer: signal, wake, DPC, re-arm or disarm. Run
    /// once per tick before timeouts and DPC drain.
    pub(crate) fn tick_timers(&mut self) {
        let now = self.clock.now();
        for id in self.timers.clone() {
            let fired = {
                let Ok(obj) = self.ob.get_mut(id) else { continue };
                let Body::Timer(t) = &mut obj.body else { continue };
                if !t.active || now < t.deadline {
                    continue;
                }
                t.header.signaled = true;
                match t.period {
                    Some(period) => {
                        t.deadline += period;
                        if t.deadline <= now {
                            t.deadline = now + period;
                        }
                    }
                    None => t.active = false,
                }
                (t.dpc.clone(), t.period.is_none(), t.timer_id)
            };
            let (dpc, one_shot, timer_id) = fired;
            klog!(self, Ipc, 0, "timer {} expired", timer_id);
            self.wake_waiters(id);
            if let Some(d) = dpc {
                self.dpc.enqueue(d.func, d.arg1, d.arg2);
            }
            if one_shot {
                self.disarm(id);
            }
        }
    }
}
