//! # VFS Router
//!
//! The authoritative filesystem syscall implementation. Opens route three
//! ways: `/dev/` paths go to their registered device driver, pipes take the
//! fast path without re-entering the router, and everything else lands on
//! the raw filesystem after a permission-map check.

pub mod device;
pub mod memfs;

use hashbrown::HashMap;
use std::sync::Arc;

pub use device::{DeviceDriver, DeviceFile, NullDevice, TtyDevice};
pub use memfs::{Filesystem, MemFs};

use crate::ipc::pipe::{PipeRead, PipeWrite};
use crate::object::{Access, Body};
use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::syscall::{Outcome, Value};
use crate::Kernel;

bitflags::bitflags! {
    /// Open mode bits, matching one octal permission digit.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct OpenMode: u32 {
        const EXEC  = 1;
        const WRITE = 2;
        const READ  = 4;
    }
}

/// Standard handle slot indices.
pub const STDIN_SLOT: i32 = -10;
pub const STDOUT_SLOT: i32 = -11;
pub const STDERR_SLOT: i32 = -12;

/// One permission-map record: owner, group, and a three-digit octal mode.
#[derive(Debug, Clone, Copy)]
pub struct FileMode {
    pub uid: u32,
    pub gid: u32,
    pub mode: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileStat {
    pub size: usize,
    pub is_dir: bool,
}

/// Result of a write: everything went through, or the buffer filled after
/// accepting a prefix and the caller is parked for the rest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteResult {
    Complete(usize),
    BlockedAfter(usize),
}

/// An open regular file: the backing path, the cursor, and the mode it was
/// opened with.
#[derive(Debug, Clone)]
pub struct FileBody {
    pub path: String,
    pub pos: usize,
    pub mode: OpenMode,
}

/// The router state: permission map, device registry, raw-FS backend.
pub struct Router {
    perms: HashMap<String, FileMode>,
    devices: HashMap<String, Arc<dyn DeviceDriver>>,
    fs: Box<dyn Filesystem>,
    tty: Arc<TtyDevice>,
}

impl Router {
    pub fn new() -> Router {
        let tty = Arc::new(TtyDevice::new());
        let mut devices: HashMap<String, Arc<dyn DeviceDriver>> = HashMap::new();
        devices.insert(String::from("null"), Arc::new(NullDevice));
        devices.insert(String::from("tty"), Arc::clone(&tty) as Arc<dyn DeviceDriver>);
        Router {
            perms: HashMap::new(),
            devices,
            fs: Box::new(MemFs::new()),
            tty,
        }
    }

    pub fn register_device(&mut self, name: &str, driver: Arc<dyn DeviceDriver>) {
        self.devices.insert(String::from(name), driver);
    }

    pub fn set_permission(&mut self, path: &str, entry: FileMode) {
        self.perms.insert(String::from(path), entry);
    }

    pub fn set_filesystem(&mut self, fs: Box<dyn Filesystem>) {
        self.fs = fs;
    }

    /// The octal digit governing this caller for this path, or None when the
    /// path is unmapped (permissive default for regular files).
    fn digit_for(&self, uid: u32, gid: u32, path: &str) -> Option<u16> {
        let entry = self.perms.get(path)?;
        let digit = if uid == entry.uid {
            (entry.mode >> 6) & 0o7
        } else if gid == entry.gid {
            (entry.mode >> 3) & 0o7
        } else {
            entry.mode & 0o7
        };
        Some(digit)
    }
}

/// Joins against the cwd and collapses `.` and `..` components.
fn normalize(cwd: &str, path: &str) -> String {
    let joined = if path.starts_with('/') {
        String::from(path)
    } else {
        format!("{}/{}", cwd.trim_end_matches('/'), path)
    };
    let mut parts: Vec<&str> = Vec::new();
    for part in joined.split('/') {
        match part {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            p => parts.push(p),
        }
    }
    format!("/{}", parts.join("/"))
}

fn access_for(mode: OpenMode, device: bool) -> Access {
    let mut access = Access::SYNCHRONIZE;
    if mode.contains(OpenMode::READ) {
        access |= Access::READ;
    }
    if mode.contains(OpenMode::WRITE) {
        access |= Access::WRITE;
    }
    if mode.contains(OpenMode::EXEC) {
        access |= Access::EXECUTE;
    }
    if device {
        access |= Access::CONTROL;
    }
    access
}

impl Kernel {
    /// Installs a permission-map record. Paths under `/dev/` are never
    /// checked against the map.
    pub fn set_file_permission(&mut self, path: &str, uid: u32, gid: u32, mode: u16) {
        self.vfs.set_permission(path, FileMode { uid, gid, mode });
    }

    /// Registers a device driver under `/dev/<name>`.
    pub fn register_device(&mut self, name: &str, driver: Arc<dyn DeviceDriver>) {
        self.vfs.register_device(name, driver);
        klog!(self, Drv, 0, "device {} registered", name);
    }

    /// The built-in terminal device, for host-side input and output.
    pub fn tty_device(&self) -> Arc<TtyDevice> {
        Arc::clone(&self.vfs.tty)
    }

    fn check_permissions(&self, caller: Pid, path: &str, requested: OpenMode) -> Result<()> {
        let p = self.procs.get(caller)?;
        if let Some(digit) = self.vfs.digit_for(p.uid, p.gid, path) {
            let bits = requested.bits() as u16;
            if digit & bits != bits {
                klog!(self, Vfs, caller, "permission denied on {} (digit {:o})", path, digit);
                return Err(Error::PermissionDenied);
            }
        }
        Ok(())
    }

    /// Opens a path, routing to a device driver or the raw filesystem, and
    /// returns a handle bound to the caller's synapse token.
    pub fn vfs_open(&mut self, caller: Pid, path: &str, mode: OpenMode) -> Result<String> {
        let cwd = self.procs.get(caller)?.cwd.clone();
        let path = normalize(&cwd, path);

        if let Some(rest) = path.strip_prefix("/dev/") {
            let name = rest.split('/').next().unwrap_or("");
            let Some(driver) = self.vfs.devices.get(name).cloned() else {
                klog!(self, Drv, caller, "open of unknown device {}", name);
                return Err(Error::FileNotFound);
            };
            let remainder = rest.strip_prefix(name).unwrap_or("");
            if let Err(err) = driver.open(remainder, mode) {
                klog!(self, Drv, caller, "driver {} refused open: {}", name, err);
                return Err(err);
            }
            let id = self.ob.create(Body::Device(DeviceFile {
                name: String::from(name),
                driver,
            }));
            let handle = self.create_handle_for(caller, id, access_for(mode, true))?;
            self.wire_std_handles(caller, name, mode, &handle)?;
            klog!(self, Vfs, caller, "opened device {} as {}", path, handle);
            return Ok(handle);
        }

        self.check_permissions(caller, &path, mode)?;
        if let Err(err) = self.vfs.fs.open(&path, mode) {
            klog!(self, Vfs, caller, "open {} failed: {}", path, err);
            return Err(err);
        }
        let id = self.ob.create(Body::File(FileBody {
            path: path.clone(),
            pos: 0,
            mode,
        }));
        let handle = self.create_handle_for(caller, id, access_for(mode, false))?;
        klog!(self, Vfs, caller, "opened {} as {}", path, handle);
        Ok(handle)
    }

    /// `/dev/tty` opens land in the standard handle slots: read-only fills
    /// stdin, writable fills stdout first and stderr second.
    fn wire_std_handles(&mut self, caller: Pid, name: &str, mode: OpenMode, handle: &str) -> Result<()> {
        if name != "tty" {
            return Ok(());
        }
        let p = self.procs.get_mut(caller)?;
        if mode == OpenMode::READ {
            p.std_handles.insert(STDIN_SLOT, String::from(handle));
        } else if mode.contains(OpenMode::WRITE) {
            let slot = if p.std_handles.contains_key(&STDOUT_SLOT) {
                STDERR_SLOT
            } else {
                STDOUT_SLOT
            };
            p.std_handles.insert(slot, String::from(handle));
        }
        Ok(())
    }

    /// Reads from a handle. Pipe bodies take the fast path and may park the
    /// caller; files and devices answer immediately. An empty `Ready` vector
    /// on a pipe is EOF.
    pub fn vfs_read(&mut self, caller: Pid, handle: &str, n: usize) -> Result<Outcome<Vec<u8>>> {
        let id = self.resolve_handle(caller, handle, Access::READ)?;
        match &self.ob.get(id)?.body {
            Body::Pipe(_) => match self.pipe_read(caller, id, n)? {
                PipeRead::Data(data) => Ok(Outcome::Ready(data)),
                PipeRead::Eof => Ok(Outcome::Ready(Vec::new())),
                PipeRead::Blocked => Ok(Outcome::Pending),
            },
            Body::File(f) => {
                let (path, pos) = (f.path.clone(), f.pos);
                let data = match self.vfs.fs.read(&path, pos, n) {
                    Ok(data) => data,
                    Err(err) => {
                        klog!(self, Vfs, caller, "read {} failed: {}", path, err);
                        return Err(err);
                    }
                };
                if let Body::File(f) = &mut self.ob.get_mut(id)?.body {
                    f.pos += data.len();
                }
                Ok(Outcome::Ready(data))
            }
            Body::Device(d) => {
                let driver = Arc::clone(&d.driver);
                Ok(Outcome::Ready(driver.read(n)?))
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    /// Writes to a handle. Pipes accept what fits and park for the rest;
    /// callers retry with the remainder on resume.
    pub fn vfs_write(&mut self, caller: Pid, handle: &str, bytes: &[u8]) -> Result<WriteResult> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        match &self.ob.get(id)?.body {
            Body::Pipe(_) => match self.pipe_write(caller, id, bytes)? {
                PipeWrite::Complete(n) => Ok(WriteResult::Complete(n)),
                PipeWrite::Blocked(n) => Ok(WriteResult::BlockedAfter(n)),
            },
            Body::File(f) => {
                let (path, pos) = (f.path.clone(), f.pos);
                let n = match self.vfs.fs.write(&path, pos, bytes) {
                    Ok(n) => n,
                    Err(err) => {
                        klog!(self, Vfs, caller, "write {} failed: {}", path, err);
                        return Err(err);
                    }
                };
                if let Body::File(f) = &mut self.ob.get_mut(id)?.body {
                    f.pos += n;
                }
                Ok(WriteResult::Complete(n))
            }
            Body::Device(d) => {
                let driver = Arc::clone(&d.driver);
                Ok(WriteResult::Complete(driver.write(bytes)?))
            }
            _ => Err(Error::InvalidHandle),
        }
    }

    /// All-or-park write for the dynamic bus: nothing is consumed until the
    /// pipe can take the whole buffer, so a retry after waking is
    /// idempotent.
    pub fn vfs_write_all(&mut self, caller: Pid, handle: &str, bytes: &[u8]) -> Result<Outcome<usize>> {
        let id = self.resolve_handle(caller, handle, Access::WRITE)?;
        if matches!(self.ob.get(id)?.body, Body::Pipe(_)) {
            if !self.pipe_reserve_write(caller, id, bytes.len())? {
                return Ok(Outcome::Pending);
            }
            return match self.pipe_write(caller, id, bytes)? {
                PipeWrite::Complete(n) => Ok(Outcome::Ready(n)),
                PipeWrite::Blocked(n) => Ok(Outcome::Ready(n)),
            };
        }
        match self.vfs_write(caller, handle, bytes)? {
            WriteResult::Complete(n) | WriteResult::BlockedAfter(n) => Ok(Outcome::Ready(n)),
        }
    }

    /// Closes a handle and clears any standard slot pointing at it.
    pub fn vfs_close(&mut self, caller: Pid, handle: &str) -> Result<()> {
        self.ob_close_handle(caller, handle)?;
        if let Ok(p) = self.procs.get_mut(caller) {
            p.std_handles.retain(|_, h| h.as_str() != handle);
        }
        Ok(())
    }

    pub fn vfs_list(&mut self, caller: Pid, path: &str) -> Result<Vec<String>> {
        let cwd = self.procs.get(caller)?.cwd.clone();
        let path = normalize(&cwd, path);
        if path == "/dev" {
            let mut names: Vec<String> = self.vfs.devices.keys().cloned().collect();
            names.sort();
            return Ok(names);
        }
        self.check_permissions(caller, &path, OpenMode::READ)?;
        match self.vfs.fs.list(&path) {
            Ok(names) => Ok(names),
            Err(err) => {
                klog!(self, Vfs, caller, "list {} failed: {}", path, err);
                Err(err)
            }
        }
    }

    pub fn vfs_stat(&mut self, caller: Pid, path: &str) -> Result<FileStat> {
        let cwd = self.procs.get(caller)?.cwd.clone();
        let path = normalize(&cwd, path);
        if let Some(rest) = path.strip_prefix("/dev/") {
            let name = rest.split('/').next().unwrap_or("");
            return if self.vfs.devices.contains_key(name) {
                Ok(FileStat {
                    size: 0,
                    is_dir: false,
                })
            } else {
                klog!(self, Vfs, caller, "stat of unknown device {}", name);
                Err(Error::FileNotFound)
            };
        }
        match self.vfs.fs.stat(&path) {
            Ok(stat) => Ok(stat),
            Err(err) => {
                klog!(self, Vfs, caller, "stat {} failed: {}", path, err);
                Err(err)
            }
        }
    }

    pub fn vfs_mkdir(&mut self, caller: Pid, path: &str) -> Result<()> {
        let cwd = self.procs.get(caller)?.cwd.clone();
        let path = normalize(&cwd, path);
        if path.starts_with("/dev/") {
            return Err(Error::InvalidArgument("cannot create under /dev"));
        }
        self.check_permissions(caller, &path, OpenMode::WRITE)?;
        match self.vfs.fs.mkdir(&path) {
            Ok(()) => {
                klog!(self, Vfs, caller, "mkdir {}", path);
                Ok(())
            }
            Err(err) => {
                klog!(self, Vfs, caller, "mkdir {} failed: {}", path, err);
                Err(err)
            }
        }
    }

    pub fn vfs_remove(&mut self, caller: Pid, path: &str) -> Result<()> {
        let cwd = self.procs.get(caller)?.cwd.clone();
        let path = normalize(&cwd, path);
        if path.starts_with("/dev/") {
            return Err(Error::InvalidArgument("cannot remove under /dev"));
        }
        self.check_permissions(caller, &path, OpenMode::WRITE)?;
        match self.vfs.fs.remove(&path) {
            Ok(()) => {
                klog!(self, Vfs, caller, "removed {}", path);
                Ok(())
            }
            Err(err) => {
                klog!(self, Vfs, caller, "remove {} failed: {}", path, err);
                Err(err)
            }
        }
    }

    /// Forwards a control call to the driver behind a device handle.
    pub fn vfs_device_control(
        &mut self,
        caller: Pid,
        handle: &str,
        method: &str,
        args: &[Value],
    ) -> Result<Value> {
        let id = self.resolve_handle(caller, handle, Access::CONTROL)?;
        let driver = match &self.ob.get(id)?.body {
            Body::Device(d) => Arc::clone(&d.driver),
            _ => return Err(Error::InvalidHandle),
        };
        match driver.device_control(method, args) {
            Ok(value) => Ok(value),
            Err(err) => {
                klog!(self, Drv, caller, "device control {} failed: {}", method, err);
                Err(err)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_joins_and_collapses() {
        assert_eq!(normalize("/home", "notes.txt"), "/home/notes.txt");
        assert_eq!(normalize("/", "/etc//passwd"), "/etc/passwd");
        assert_eq!(normalize("/home", "../etc/./passwd"), "/etc/passwd");
        assert_eq!(normalize("/", ".."), "/");
    }

    #[test]
    fn digit_selection_follows_relationship() {
        let mut router = Router::new();
        router.set_permission(
            "/secret",
            FileMode {
                uid: 1,
                gid: 5,
                mode: 0o640,
            },
        );
        assert_eq!(router.digit_for(1, 1, "/secret"), Some(0o6));
        assert_eq!(router.digit_for(2, 5, "/secret"), Some(0o4));
        assert_eq!(router.digit_for(2, 2, "/secret"), Some(0o0));
        assert_eq!(router.digit_for(1, 1, "/unmapped"), None);
    }
}
