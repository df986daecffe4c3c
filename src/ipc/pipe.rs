//! Pipes.
//!
//! A fixed-size byte buffer with pending-reader and pending-writer lists.
//! Anonymous pipes hand out a read handle and a write handle; named pipes
//! publish the same body under `\Pipe\...` and connectors share one buffer.
//!
//! A reader sees EOF only when the buffer is empty and the write side is
//! closed. A writer that finds the read side closed gets SIGPIPE and a
//! broken-pipe failure, both.

use std::collections::VecDeque;

use crate::object::{Access, Body, ObjectId};
use crate::process::signal::SIGPIPE;
use crate::process::{Pid, SleepKind};
use crate::syscall::error::{Error, Result};
use crate::Kernel;

#[derive(Debug, Default)]
pub struct Pipe {
    pub buf: VecDeque<u8>,
    pub capacity: usize,
    pub read_closed: bool,
    pub write_closed: bool,
    pub pending_readers: Vec<Pid>,
    pub pending_writers: Vec<Pid>,
    /// Open handles per direction; the closed flags flip when these hit zero.
    pub reader_handles: usize,
    pub writer_handles: usize,
    pub bytes_written: u64,
    pub bytes_read: u64,
}

impl Pipe {
    pub fn new(capacity: usize) -> Pipe {
        Pipe {
            capacity: capacity.max(1),
            ..Pipe::default()
        }
    }

    pub fn space(&self) -> usize {
        self.capacity.saturating_sub(self.buf.len())
    }
}

/// Result of a pipe read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRead {
    Data(Vec<u8>),
    Eof,
    /// Nothing to read yet; the caller is parked and should retry on resume.
    Blocked,
}

/// Result of a pipe write attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeWrite {
    Complete(usize),
    /// `0..n` bytes were accepted before the buffer filled; the caller is
    /// parked and should retry with the remainder on resume.
    Blocked(usize),
}

impl Kernel {
    /// Creates an anonymous pipe, returning its read and write handles.
    pub fn ke_create_pipe(&mut self, caller: Pid, size: Option<usize>) -> Result<(String, String)> {
        self.procs.get(caller)?;
        let capacity = size.unwrap_or(self.config.pipe_capacity);
        let id = self.ob.create(Body::Pipe(Pipe::new(capacity)));
        let read = self.create_handle_for(caller, id, Access::READ | Access::SYNCHRONIZE)?;
        let write = self.create_handle_for(caller, id, Access::WRITE | Access::SYNCHRONIZE)?;
        klog!(self, Ipc, caller, "pipe {} created, capacity {}", id, capacity);
        Ok((read, write))
    }

    /// Creates a pipe published at `\Pipe\name` and returns a read-write
    /// handle to it.
    pub fn ke_create_named_pipe(
        &mut self,
        caller: Pid,
        name: &str,
        size: Option<usize>,
    ) -> Result<String> {
        self.procs.get(caller)?;
        let capacity = size.unwrap_or(self.config.pipe_capacity);
        let id = self.ob.create(Body::Pipe(Pipe::new(capacity)));
        self.ob.insert(id, &format!("\\Pipe\\{}", name))?;
        klog!(self, Ipc, caller, "named pipe \\Pipe\\{} created", name);
        self.create_handle_for(caller, id, Access::READ | Access::WRITE | Access::SYNCHRONIZE)
    }

    /// Opens a new read-write handle onto an existing named pipe.
    pub fn ke_connect_named_pipe(&mut self, caller: Pid, name: &str) -> Result<String> {
        self.procs.get(caller)?;
        let id = self.ob.lookup(&format!("\\Pipe\\{}", name))?;
        if !matches!(self.ob.get(id)?.body, Body::Pipe(_)) {
            return Err(Error::NoSuchObject);
        }
        klog!(self, Ipc, caller, "connected to \\Pipe\\{}", name);
        self.create_handle_for(caller, id, Access::READ | Access::WRITE | Access::SYNCHRONIZE)
    }

    /// The read fast path. Never re-enters the router.
    pub(crate) fn pipe_read(&mut self, caller: Pid, id: ObjectId, n: usize) -> Result<PipeRead> {
        let taken = {
            let obj = self.ob.get_mut(id)?;
            let Body::Pipe(pipe) = &mut obj.body else {
                return Err(Error::InvalidHandle);
            };
            if pipe.buf.is_empty() {
                if pipe.write_closed {
                    return Ok(PipeRead::Eof);
                }
                if !pipe.pending_readers.contains(&caller) {
                    pipe.pending_readers.push(caller);
                }
                None
            } else {
                let take = n.min(pipe.buf.len());
                let data: Vec<u8> = pipe.buf.drain(..take).collect();
                pipe.bytes_read += data.len() as u64;
                Some(data)
            }
        };
        match taken {
            Some(data) => {
                // Space opened up; one parked writer gets another turn.
                self.wake_one_pipe_writer(id);
                Ok(PipeRead::Data(data))
            }
            None => {
                self.procs.get_mut(caller)?.block(SleepKind::PipeRead(id));
                klog!(self, Ipc, caller, "blocked reading pipe {}", id);
                Ok(PipeRead::Blocked)
            }
        }
    }

    /// The write fast path. Accepts what fits, parks the caller for the
    /// remainder.
    pub(crate) fn pipe_write(&mut self, caller: Pid, id: ObjectId, bytes: &[u8]) -> Result<PipeWrite> {
        let broken = {
            let obj = self.ob.get(id)?;
            match &obj.body {
                Body::Pipe(pipe) => pipe.read_closed,
                _ => return Err(Error::InvalidHandle),
            }
        };
        if broken {
            klog!(self, Ipc, caller, "write on pipe {} with read end closed", id);
            self.post_signal(caller, SIGPIPE);
            return Err(Error::BrokenPipe);
        }
        let (accepted, parked) = {
            let obj = self.ob.get_mut(id)?;
            let Body::Pipe(pipe) = &mut obj.body else {
                return Err(Error::InvalidHandle);
            };
            let accepted = pipe.space().min(bytes.len());
            pipe.buf.extend(bytes[..accepted].iter().copied());
            pipe.bytes_written += accepted as u64;
            let parked = accepted < bytes.len();
            if parked && !pipe.pending_writers.contains(&caller) {
                pipe.pending_writers.push(caller);
            }
            (accepted, parked)
        };
        if accepted > 0 {
            self.wake_one_pipe_reader(id);
        }
        if parked {
            self.procs.get_mut(caller)?.block(SleepKind::PipeWrite(id));
            klog!(self, Ipc, caller, "blocked writing pipe {}", id);
            Ok(PipeWrite::Blocked(accepted))
        } else {
            Ok(PipeWrite::Complete(accepted))
        }
    }

    /// All-or-nothing admission: parks the caller until the pipe can take
    /// `len` bytes in one go. Used where a partial write cannot be resumed.
    pub(crate) fn pipe_reserve_write(&mut self, caller: Pid, id: ObjectId, len: usize) -> Result<bool> {
        let admitted = {
            let obj = self.ob.get_mut(id)?;
            let Body::Pipe(pipe) = &mut obj.body else {
                return Err(Error::InvalidHandle);
            };
            if pipe.read_closed {
                None
            } else if len > pipe.capacity {
                return Err(Error::InvalidArgument("payload exceeds pipe capacity"));
            } else if pipe.space() >= len {
                Some(true)
            } else {
                if !pipe.pending_writers.contains(&caller) {
                    pipe.pending_writers.push(caller);
                }
                Some(false)
            }
        };
        match admitted {
            None => {
                klog!(self, Ipc, caller, "write on pipe {} with read end closed", id);
                self.post_signal(caller, SIGPIPE);
                Err(Error::BrokenPipe)
            }
            Some(true) => Ok(true),
            Some(false) => {
                self.procs.get_mut(caller)?.block(SleepKind::PipeWrite(id));
                klog!(self, Ipc, caller, "blocked writing pipe {}", id);
                Ok(false)
            }
        }
    }

    fn wake_one_pipe_reader(&mut self, id: ObjectId) {
        let pid = match self.ob.get_mut(id) {
            Ok(obj) => match &mut obj.body {
                Body::Pipe(pipe) if !pipe.pending_readers.is_empty() => {
                    Some(pipe.pending_readers.remove(0))
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

    fn wake_one_pipe_writer(&mut self, id: ObjectId) {
        let pid = match self.ob.get_mut(id) {
            Ok(obj) => match &mut obj.body {
                Body::Pipe(pipe) if !pipe.pending_writers.is_empty() => {
                    Some(pipe.pending_writers.remove(0))
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

    /// Endpoint bookkeeping when a handle to `id` is created.
    pub(crate) fn handle_opened(&mut self, id: ObjectId, access: Access) {
        if let Ok(obj) = self.ob.get_mut(id) {
            if let Body::Pipe(pipe) = &mut obj.body {
                if access.contains(Access::READ) {
                    pipe.reader_handles += 1;
                    pipe.read_closed = false;
                }
                if access.contains(Access::WRITE) {
                    pipe.writer_handles += 1;
                    pipe.write_closed = false;
                }
            }
        }
    }

    /// Endpoint bookkeeping when a handle to `id` is closed. Closing the
    /// last endpoint of a direction flips the closed flag and wakes the
    /// other side so it can observe EOF or break.
    pub(crate) fn handle_closed_hook(&mut self, id: ObjectId, access: Access) {
        let (readers_gone, writers_gone) = {
            let Ok(obj) = self.ob.get_mut(id) else { return };
            let Body::Pipe(pipe) = &mut obj.body else { return };
            if access.contains(Access::READ) {
                pipe.reader_handles = pipe.reader_handles.saturating_sub(1);
                if pipe.reader_handles == 0 {
                    pipe.read_closed = true;
                }
            }
            if access.contains(Access::WRITE) {
                pipe.writer_handles = pipe.writer_handles.saturating_sub(1);
                if pipe.writer_handles == 0 {
                    pipe.write_closed = true;
                }
            }
            (pipe.read_closed, pipe.write_closed)
        };
        if readers_gone {
            // Parked writers retry, hit the closed read end, and take their
            // SIGPIPE there.
            while let Some(pid) = self.pop_pipe_writer(id) {
                if let Some(p) = self.procs.get_any_mut(pid) {
                    p.unblock();
                }
            }
        }
        if writers_gone {
            while let Some(pid) = self.pop_pipe_reader(id) {
                if let Some(p) = self.procs.get_any_mut(pid) {
                    p.unblock();
                }
            }
        }
    }

    fn pop_pipe_reader(&mut self, id: ObjectId) -> Option<Pid> {
        match &mut self.ob.get_mut(id).ok()?.body {
            Body::Pipe(pipe) if !pipe.pending_readers.is_empty() => {
                Some(pipe.pending_readers.remove(0))
            }
            _ => None,
        }
    }

    fn pop_pipe_writer(&mut self, id: ObjectId) -> Option<Pid> {
        match &mut self.ob.get_mut(id).ok()?.body {
            Body::Pipe(pipe) if !pipe.pending_writers.is_empty() => {
                Some(pipe.pending_writers.remove(0))
            }
            _ => None,
        }
    }
}
