//! Deferred procedure calls.
//!
//! Short callbacks queued for the next tick drain. The drain is bounded per
//! tick so a burst of DPCs cannot starve user processes. Callback failures
//! are logged and dropped, never propagated.

use std::collections::VecDeque;
use std::sync::Arc;

use crate::syscall::error::Result;
use crate::Kernel;

/// A deferred callback with its two arguments.
pub type DpcFn = Arc<dyn Fn(usize, usize) -> Result<()>>;

pub struct Dpc {
    pub id: u64,
    pub func: DpcFn,
    pub arg1: usize,
    pub arg2: usize,
}

pub struct DpcQueue {
    queue: VecDeque<Dpc>,
    next_id: u64,
}

impl DpcQueue {
    pub fn new() -> DpcQueue {
        DpcQueue {
            queue: VecDeque::new(),
            next_id: 1,
        }
    }

    /// Queues a callback; the returned id cancels it.
    pub fn enqueue(&mut self, func: DpcFn, arg1: usize, arg2: usize) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push_back(Dpc {
            id,
            func,
            arg1,
            arg2,
        });
        id
    }

    /// Removes a queued DPC. Returns whether it was still queued.
    pub fn cancel(&mut self, id: u64) -> bool {
        let before = self.queue.len();
        self.queue.retain(|d| d.id != id);
        self.queue.len() != before
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn pop(&mut self) -> Option<Dpc> {
        self.queue.pop_front()
    }
}

impl Kernel {
    /// Drains up to the configured cap of DPCs, FIFO.
    pub(crate) fn drain_dpcs(&mut self) {
        for _ in 0..self.config.dpc_drain_cap {
            let Some(dpc) = self.dpc.pop() else { break };
            if let Err(err) = (dpc.func)(dpc.arg1, dpc.arg2) {
                klog!(self, Fail, 0, "dpc {} failed: {}", dpc.id, err);
            }
        }
    }

    /// Queues a deferred callback outside of timer expiry.
    pub fn dpc_enqueue(&mut self, func: DpcFn, arg1: usize, arg2: usize) -> u64 {
        self.dpc.enqueue(func, arg1, arg2)
    }

    pub fn dpc_cancel(&mut self, id: u64) -> bool {
        self.dpc.cancel(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    #[test]
    fn cancellation_removes_a_queued_dpc() {
        let mut q = DpcQueue::new();
        let hits = Rc::new(Cell::new(0));
        let h = Rc::clone(&hits);
        let id = q.enqueue(
            Arc::new(move |_, _| {
                h.set(h.get() + 1);
                Ok(())
            }),
            0,
            0,
        );
        assert!(q.cancel(id));
        assert!(!q.cancel(id));
        assert!(q.is_empty());
        assert_eq!(hits.get(), 0);
    }
}
