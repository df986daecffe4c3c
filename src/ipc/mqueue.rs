//! Priority message queues.
//!
//! A bounded list ordered by priority, higher value delivered first, stable
//! within a priority. The dispatch header is signaled exactly while the
//! queue is non-empty, so queues compose with the generic wait surface.

use std::collections::VecDeque;

use super::DispatchHeader;
use crate::object::{Access, Body, ObjectId};
use crate::process::{Irql, Pid, SleepKind};
use crate::syscall::error::{Error, Result};
use crate::syscall::Outcome;
use crate::time::ms_to_secs;
use crate::Kernel;

#[derive(Debug, Clone)]
pub struct MqMessage {
    pub payload: Vec<u8>,
    pub priority: u32,
}

#[derive(Debug)]
pub struct MessageQueue {
    pub header: DispatchHeader,
    pub messages: VecDeque<MqMessage>,
    pub max_msgs: usize,
    pub max_size: usize,
    pub send_waiters: Vec<Pid>,
    pub recv_waiters: Vec<Pid>,
}

impl MessageQueue {
    pub fn new(max_msgs: usize, max_size: usize) -> MessageQueue {
        MessageQueue {
            header: DispatchHeader::new(true, false),
            messages: VecDeque::new(),
            max_msgs: max_msgs.max(1),
            max_size: max_size.max(1),
            send_waiters: Vec::new(),
            recv_waiters: Vec::new(),
        }
    }

    fn is_full(&self) -> bool {
        self.messages.len() >= self.max_msgs
    }
}

impl Kernel {
    /// Creates a queue published at `\MQueue\name`.
    pub fn ke_create_mqueue(
        &mut self,
        caller: Pid,
        name: &str,
        max_msgs: usize,
        max_size: usize,
    ) -> Result<String> {
        self.procs.get(caller)?;
        let id = self
            .ob
            .create(Body::MessageQueue(MessageQueue::new(max_msgs, max_size)));
        self.ob.insert(id, &format!("\\MQueue\\{}", name))?;
        klog!(
            self,
            Ipc,
            caller,
            "mqueue \\MQueue\\{} created, {} msgs x {} bytes",
            name,
            max_msgs,
            max_size
        );
        self.create_handle_for(caller, id, Access::all())
    }

    /// Opens an existing named queue.
    pub fn ke_open_mqueue(&mut self, caller: Pid, name: &str) -> Result<String> {
        self.procs.get(caller)?;
        let id = self.ob.lookup(&format!("\\MQueue\\{}", name))?;
        if !matches!(self.ob.get(id)?.body, Body::MessageQueue(_)) {
            return Err(Error::NoSuchObject);
        }
        self.create_handle_for(caller, id, Access::all())
    }

    /// Sends a message. A full queue parks the caller on the send-wait list;
    /// retry on resume. Callers at DISPATCH_LEVEL get QUEUE_FULL instead.
    pub fn ke_mq_send(
        &mut self,
        caller: Pid,
        handle: &str,
        payload: &[u8],
        priority: u32,
    ) -> Result<Outcome<()>> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        let full = {
            let obj = self.ob.get_mut(id)?;
            let Body::MessageQueue(q) = &mut obj.body else {
                return Err(Error::NoSuchObject);
            };
            if payload.len() > q.max_size {
                klog!(self, Ipc, caller, "mq {} refused {} byte payload", id, payload.len());
                return Err(Error::MsgTooLarge);
            }
            if q.is_full() {
                if !q.send_waiters.contains(&caller) {
                    q.send_waiters.push(caller);
                }
                true
            } else {
                let message = MqMessage {
                    payload: payload.to_vec(),
                    priority,
                };
                // Before the first lower-priority entry, after equals.
                let at = q
                    .messages
                    .iter()
                    .position(|m| m.priority < priority)
                    .unwrap_or(q.messages.len());
                q.messages.insert(at, message);
                q.header.signaled = true;
                false
            }
        };
        if full {
            if self.procs.get(caller)?.irql >= Irql::Dispatch {
                self.mq_unregister(id, caller);
                return Err(Error::QueueFull);
            }
            self.procs.get_mut(caller)?.block(SleepKind::MqSend(id));
            klog!(self, Ipc, caller, "blocked sending to mq {}", id);
            return Ok(Outcome::Pending);
        }
        self.mq_wake_one_receiver(id);
        self.wake_waiters(id);
        Ok(Outcome::Ready(()))
    }

    /// Receives the highest-priority message. An empty queue either refuses
    /// (zero timeout), or parks the caller with an optional deadline in the
    /// central registry.
    pub fn ke_mq_receive(
        &mut self,
        caller: Pid,
        handle: &str,
        timeout_ms: Option<u64>,
    ) -> Result<Outcome<(Vec<u8>, u32)>> {
        let id = self.resolve_handle(caller, handle, Access::READ)?;
        let taken = {
            let obj = self.ob.get_mut(id)?;
            let Body::MessageQueue(q) = &mut obj.body else {
                return Err(Error::NoSuchObject);
            };
            match q.messages.pop_front() {
                Some(m) => {
                    q.header.signaled = !q.messages.is_empty();
                    Some((m.payload, m.priority))
                }
                None => {
                    if timeout_ms == Some(0) {
                        return Err(Error::QueueEmpty);
                    }
                    None
                }
            }
        };
        match taken {
            Some(message) => {
                self.mq_wake_one_sender(id);
                Ok(Outcome::Ready(message))
            }
            None => {
                if self.procs.get(caller)?.irql >= Irql::Dispatch {
                    return Err(Error::CannotBlock);
                }
                {
                    let obj = self.ob.get_mut(id)?;
                    if let Body::MessageQueue(q) = &mut obj.body {
                        if !q.recv_waiters.contains(&caller) {
                            q.recv_waiters.push(caller);
                        }
                    }
                }
                if let Some(ms) = timeout_ms {
                    let deadline = self.clock.now() + ms_to_secs(ms);
                    self.timeouts.register(caller, deadline);
                }
                self.procs.get_mut(caller)?.block(SleepKind::MqReceive(id));
                klog!(self, Ipc, caller, "blocked receiving from mq {}", id);
                Ok(Outcome::Pending)
            }
        }
    }

    fn mq_unregister(&mut self, id: ObjectId, pid: Pid) {
        if let Ok(obj) = self.ob.get_mut(id) {
            if let Body::MessageQueue(q) = &mut obj.body {
                q.send_waiters.retain(|&p| p != pid);
                q.recv_waiters.retain(|&p| p != pid);
            }
        }
    }

    fn mq_wake_one_receiver(&mut self, id: ObjectId) {
        let pid = match self.ob.get_mut(id) {
            Ok(obj) => match &mut obj.body {
                Body::MessageQueue(q) if !q.recv_waiters.is_empty() => {
                    Some(q.recv_waiters.remove(0))
                }
                _ => None,
            },
            Err(_) => None,
        };
        if let Some(pid) = pid {
            self.timeouts.cancel(pid);
            if let Some(p) = self.procs.get_any_mut(pid) {
                p.unblock();
            }
        }
    }

    fn mq_wake_one_sender(&mut self, id: ObjectId) {
        let pid = match self.ob.get_mut(id) {
            Ok(obj) => match &mut obj.body {
                Body::MessageQueue(q) if !q.send_waiters.is_empty() => {
                    Some(q.send_waiters.remove(0))
                }
                _ => None,
            },
            Err(_) => None,
        };
        if let Some(pid) = pid {
            if let Some(p) = self.procs.get_any_mut(pid) {
                p.unblock();
            }
        }
    }
}
