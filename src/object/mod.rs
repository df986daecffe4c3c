//! # Object Manager
//!
//! Typed kernel objects, the hierarchical namespace, reference counting, and
//! per-process handle tables with unforgeable tokens.
//!
//! Every object is owned jointly by the manager and by every handle that
//! references it. When the last reference drops, the release hook runs once
//! and the record is freed.

pub mod namespace;

use core::fmt;
use slab::Slab;

use crate::ipc::{DispatchHeader, Event, MessageQueue, Mutex, Pipe, Section, Semaphore, Timer};
use crate::process::{Pid, Process};
use crate::syscall::error::{Error, Result};
use crate::vfs::{DeviceFile, FileBody};
use crate::Kernel;
use namespace::Namespace;

pub type ObjectId = usize;

bitflags::bitflags! {
    /// Handle access rights.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Access: u32 {
        const READ        = 1 << 0;
        const WRITE       = 1 << 1;
        const EXECUTE     = 1 << 2;
        const SYNCHRONIZE = 1 << 3;
        const CONTROL     = 1 << 4;
    }
}

/// Object type tags, one per body shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjectType {
    Event,
    Mutex,
    Semaphore,
    Timer,
    Pipe,
    Section,
    MessageQueue,
    File,
    Device,
    Directory,
    SymbolicLink,
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectType::Event => "Event",
            ObjectType::Mutex => "Mutex",
            ObjectType::Semaphore => "Semaphore",
            ObjectType::Timer => "Timer",
            ObjectType::Pipe => "Pipe",
            ObjectType::Section => "Section",
            ObjectType::MessageQueue => "MessageQueue",
            ObjectType::File => "File",
            ObjectType::Device => "Device",
            ObjectType::Directory => "Directory",
            ObjectType::SymbolicLink => "SymbolicLink",
        };
        f.write_str(s)
    }
}

/// The body of a kernel object. Waitable variants expose their dispatch
/// header through [`Body::header`].
pub enum Body {
    Event(Event),
    Mutex(Mutex),
    Semaphore(Semaphore),
    Timer(Timer),
    Pipe(Pipe),
    Section(Section),
    MessageQueue(MessageQueue),
    File(FileBody),
    Device(DeviceFile),
    Directory,
    SymbolicLink(String),
}

impl Body {
    pub fn type_tag(&self) -> ObjectType {
        match self {
            Body::Event(_) => ObjectType::Event,
            Body::Mutex(_) => ObjectType::Mutex,
            Body::Semaphore(_) => ObjectType::Semaphore,
            Body::Timer(_) => ObjectType::Timer,
            Body::Pipe(_) => ObjectType::Pipe,
            Body::Section(_) => ObjectType::Section,
            Body::MessageQueue(_) => ObjectType::MessageQueue,
            Body::File(_) => ObjectType::File,
            Body::Device(_) => ObjectType::Device,
            Body::Directory => ObjectType::Directory,
            Body::SymbolicLink(_) => ObjectType::SymbolicLink,
        }
    }

    /// The dispatch header, for waitable bodies.
    pub fn header(&self) -> Option<&DispatchHeader> {
        match self {
            Body::Event(e) => Some(&e.header),
            Body::Mutex(m) => Some(&m.header),
            Body::Semaphore(s) => Some(&s.header),
            Body::Timer(t) => Some(&t.header),
            Body::MessageQueue(q) => Some(&q.header),
            _ => None,
        }
    }

    pub fn header_mut(&mut self) -> Option<&mut DispatchHeader> {
        match self {
            Body::Event(e) => Some(&mut e.header),
            Body::Mutex(m) => Some(&mut m.header),
            Body::Semaphore(s) => Some(&mut s.header),
            Body::Timer(t) => Some(&mut t.header),
            Body::MessageQueue(q) => Some(&mut q.header),
            _ => None,
        }
    }
}

/// One typed, reference-counted kernel object.
pub struct KernelObject {
    pub type_tag: ObjectType,
    /// Total references: the manager's own, plus one per handle, plus
    /// explicit external references.
    refs: usize,
    handle_count: usize,
    /// Whether the manager's own creation reference is still held.
    ob_ref_held: bool,
    /// Namespace path, if published.
    pub path: Option<String>,
    pub body: Body,
}

impl KernelObject {
    pub fn handle_count(&self) -> usize {
        self.handle_count
    }

    pub fn refs(&self) -> usize {
        self.refs
    }
}

/// A handle table entry: object binding, granted rights, and the synapse
/// token snapshotted at creation.
#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub object: ObjectId,
    pub access: Access,
    pub synapse: String,
}

/// The manager: object storage, the namespace, and token issuance.
pub struct ObjectManager {
    objects: Slab<KernelObject>,
    pub(crate) namespace: Namespace,
    /// Counter folded into every issued token, so tokens never repeat.
    token_seq: u64,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            objects: Slab::new(),
            namespace: Namespace::new(),
            token_seq: 0,
        }
    }

    /// Allocates a record with one reference and no handles.
    pub fn create(&mut self, body: Body) -> ObjectId {
        self.objects.insert(KernelObject {
            type_tag: body.type_tag(),
            refs: 1,
            handle_count: 0,
            ob_ref_held: true,
            path: None,
            body,
        })
    }

    pub fn get(&self, id: ObjectId) -> Result<&KernelObject> {
        self.objects.get(id).ok_or(Error::NoSuchObject)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Result<&mut KernelObject> {
        self.objects.get_mut(id).ok_or(Error::NoSuchObject)
    }

    pub fn lookup(&self, path: &str) -> Result<ObjectId> {
        self.namespace.lookup(path)
    }

    /// Every live object id. For sweeps and diagnostics.
    pub fn object_ids(&self) -> Vec<ObjectId> {
        self.objects.iter().map(|(id, _)| id).collect()
    }

    /// Publishes `id` at `path`. The namespace entry rides on the manager's
    /// own reference, so no count changes here.
    pub fn insert(&mut self, id: ObjectId, path: &str) -> Result<()> {
        if !self.objects.contains(id) {
            return Err(Error::NoSuchObject);
        }
        self.namespace.insert(path, id)?;
        self.objects[id].path = Some(String::from(path));
        Ok(())
    }

    /// Takes an explicit external reference on `id`.
    pub fn reference(&mut self, id: ObjectId) -> Result<()> {
        let obj = self.get_mut(id)?;
        obj.refs += 1;
        Ok(())
    }

    /// Issues a fresh handle token: unpredictable, never reused, `H-` prefixed.
    pub fn new_handle_token(&mut self) -> String {
        self.token_seq += 1;
        format!("H-{:016x}{:08x}", rand::random::<u64>(), self.token_seq)
    }

    /// Issues a fresh synapse token, `SYN-` prefixed.
    pub fn new_synapse_token(&mut self) -> String {
        self.token_seq += 1;
        format!("SYN-{:016x}{:08x}", rand::random::<u64>(), self.token_seq)
    }

    /// A plain runtime-unique serial, for timer ids and the like.
    pub fn next_serial(&mut self) -> u64 {
        self.token_seq += 1;
        self.token_seq
    }
}

impl Kernel {
    /// Validates a handle for `required` access under the synapse rules and
    /// returns its entry.
    pub(crate) fn check_handle(
        &self,
        caller: &Process,
        token: &str,
        required: Access,
    ) -> Result<HandleEntry> {
        let entry = match caller.handles.get(token) {
            Some(e) => e.clone(),
            None => {
                klog!(self, Sec, caller.pid, "invalid handle {}", token);
                return Err(Error::InvalidHandle);
            }
        };
        if !caller.synapse_bypass(self.config.synapse_bypass_pid) && entry.synapse != caller.synapse
        {
            klog!(self, Sec, caller.pid, "synapse mismatch on {}", token);
            return Err(Error::AccessDenied);
        }
        if !entry.access.contains(required) {
            klog!(
                self,
                Sec,
                caller.pid,
                "access mask {:?} lacks {:?} on {}",
                entry.access,
                required,
                token
            );
            return Err(Error::AccessDenied);
        }
        Ok(entry)
    }

    /// Resolves `token` in the caller's table to an object id, enforcing the
    /// synapse and access checks.
    pub(crate) fn resolve_handle(
        &self,
        caller: Pid,
        token: &str,
        required: Access,
    ) -> Result<ObjectId> {
        let process = self.procs.get(caller)?;
        let entry = self.check_handle(process, token, required)?;
        if !self.ob.objects.contains(entry.object) {
            return Err(Error::NoSuchObject);
        }
        Ok(entry.object)
    }

    /// Creates an object from a body. Ring 0 and 1 only; other rings go
    /// through the typed `ke_create_*` surface.
    pub fn ob_create_object(&mut self, caller: Pid, body: Body) -> Result<ObjectId> {
        let ring = self.procs.get(caller)?.ring;
        if !ring.is_privileged() {
            klog!(self, Sec, caller, "ob_create_object denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        let tag = body.type_tag();
        let id = self.ob.create(body);
        klog!(self, Dev, caller, "created {} object {}", tag, id);
        Ok(id)
    }

    /// Creates a handle to `object` in `target`'s table, bound to the
    /// target's current synapse token. Creating handles for another process
    /// requires ring 0 or 1.
    pub fn ob_create_handle(
        &mut self,
        caller: Pid,
        target: Pid,
        object: ObjectId,
        access: Access,
    ) -> Result<String> {
        let ring = self.procs.get(caller)?.ring;
        if target != caller && !ring.is_privileged() {
            klog!(self, Sec, caller, "cross-process handle denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        self.create_handle_for(target, object, access)
    }

    /// Internal handle creation path used by the typed `ke_create_*` and
    /// `vfs_open` surfaces.
    pub(crate) fn create_handle_for(
        &mut self,
        target: Pid,
        object: ObjectId,
        access: Access,
    ) -> Result<String> {
        if !self.ob.objects.contains(object) {
            return Err(Error::NoSuchObject);
        }
        let token = self.ob.new_handle_token();
        let synapse = self.procs.get(target)?.synapse.clone();
        {
            let obj = &mut self.ob.objects[object];
            obj.refs += 1;
            obj.handle_count += 1;
        }
        self.handle_opened(object, access);
        self.procs.get_mut(target)?.handles.insert(
            token.clone(),
            HandleEntry {
                object,
                access,
                synapse,
            },
        );
        Ok(token)
    }

    /// Resolves a handle, returning the object id. The reference is borrowed:
    /// it is valid only until the next scheduling point.
    pub fn ob_reference_object_by_handle(
        &self,
        caller: Pid,
        token: &str,
        required: Access,
    ) -> Result<ObjectId> {
        self.resolve_handle(caller, token, required)
    }

    /// Closes a handle. The second close of the same token reports
    /// INVALID_HANDLE; the release hook runs exactly once.
    pub fn ob_close_handle(&mut self, caller: Pid, token: &str) -> Result<()> {
        let entry = match self.procs.get_mut(caller)?.handles.remove(token) {
            Some(e) => e,
            None => {
                klog!(self, Sec, caller, "close of unknown handle {}", token);
                return Err(Error::InvalidHandle);
            }
        };
        self.handle_dropped(entry.object, entry.access);
        Ok(())
    }

    /// Publishes the object behind `token` at `path`.
    pub fn ob_insert_object(&mut self, caller: Pid, token: &str, path: &str) -> Result<()> {
        let id = self.resolve_handle(caller, token, Access::empty())?;
        self.ob.insert(id, path)?;
        klog!(self, Dev, caller, "published object {} at {}", id, path);
        Ok(())
    }

    /// Enumerates the namespace. Ring 0 and 1 only.
    pub fn ob_dump_directory(&self, caller: Pid) -> Result<Vec<String>> {
        let ring = self.procs.get(caller)?.ring;
        if !ring.is_privileged() {
            klog!(self, Sec, caller, "ob_dump_directory denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        Ok(self.ob.namespace.dump())
    }

    /// Ref bookkeeping for one dropped handle, including the manager's own
    /// reference once the last handle on an unpublished object goes away.
    pub(crate) fn handle_dropped(&mut self, id: ObjectId, access: Access) {
        self.handle_closed_hook(id, access);
        let released = {
            let Ok(obj) = self.ob.get_mut(id) else { return };
            obj.refs = obj.refs.saturating_sub(1);
            obj.handle_count = obj.handle_count.saturating_sub(1);
            if obj.handle_count == 0 && obj.path.is_none() && obj.ob_ref_held {
                obj.ob_ref_held = false;
                obj.refs = obj.refs.saturating_sub(1);
            }
            obj.refs == 0
        };
        if released {
            self.release_object(id);
        }
    }

    /// Drops one explicit external reference.
    pub(crate) fn external_ref_dropped(&mut self, id: ObjectId) {
        let released = {
            let Ok(obj) = self.ob.get_mut(id) else { return };
            obj.refs = obj.refs.saturating_sub(1);
            obj.refs == 0
        };
        if released {
            self.release_object(id);
        }
    }

    /// Unpublishes an object from the namespace. If no handles remain, the
    /// manager's own reference goes with it.
    pub(crate) fn unlink_object(&mut self, id: ObjectId) -> Result<()> {
        let path = match self.ob.get(id)?.path.clone() {
            Some(p) => p,
            None => return Ok(()),
        };
        self.ob.namespace.remove(&path)?;
        let released = {
            let obj = self.ob.get_mut(id)?;
            obj.path = None;
            if obj.handle_count == 0 && obj.ob_ref_held {
                obj.ob_ref_held = false;
                obj.refs = obj.refs.saturating_sub(1);
            }
            obj.refs == 0
        };
        if released {
            self.release_object(id);
        }
        Ok(())
    }

    /// The release hook: unlink, detach from the timer scan list, free the
    /// record.
    fn release_object(&mut self, id: ObjectId) {
        let Ok(obj) = self.ob.get(id) else { return };
        let tag = obj.type_tag;
        if let Some(path) = obj.path.clone() {
            let _ = self.ob.namespace.remove(&path);
        }
        self.timers.retain(|&t| t != id);
        self.ob.objects.remove(id);
        klog!(self, Mem, 0, "released {} object {}", tag, id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokens_are_unique_and_prefixed() {
        let mut ob = ObjectManager::new();
        let mut seen = std::collections::HashSet::new();
        for _ in 0..1000 {
            let t = ob.new_handle_token();
            assert!(t.starts_with("H-"));
            assert!(seen.insert(t));
        }
        assert!(ob.new_synapse_token().starts_with("SYN-"));
    }
}
