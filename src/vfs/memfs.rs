//! The in-memory raw filesystem.
//!
//! The router's default backend. Hosts that want persistence swap in their
//! own [`Filesystem`] implementation; the router neither knows nor cares.

use hashbrown::HashMap;

use super::{FileStat, OpenMode};
use crate::syscall::error::{Error, Result};

/// The raw filesystem contract the router dispatches to for non-device
/// paths. Paths are absolute, slash separated, already normalized.
pub trait Filesystem {
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<()>;
    fn read(&mut self, path: &str, pos: usize, n: usize) -> Result<Vec<u8>>;
    fn write(&mut self, path: &str, pos: usize, data: &[u8]) -> Result<usize>;
    fn list(&self, path: &str) -> Result<Vec<String>>;
    fn stat(&self, path: &str) -> Result<FileStat>;
    fn mkdir(&mut self, path: &str) -> Result<()>;
    fn remove(&mut self, path: &str) -> Result<()>;
}

enum Node {
    File(Vec<u8>),
    Dir,
}

pub struct MemFs {
    /// Absolute path to node. The root directory is implicit.
    nodes: HashMap<String, Node>,
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(i) => &path[..i],
    }
}

impl MemFs {
    pub fn new() -> MemFs {
        MemFs {
            nodes: HashMap::new(),
        }
    }

    fn dir_exists(&self, path: &str) -> bool {
        path == "/" || matches!(self.nodes.get(path), Some(Node::Dir))
    }
}

impl Filesystem for MemFs {
    /// Opening for write creates the file on demand; opening for read alone
    /// requires it to exist.
    fn open(&mut self, path: &str, mode: OpenMode) -> Result<()> {
        match self.nodes.get(path) {
            Some(Node::File(_)) => Ok(()),
            Some(Node::Dir) => Err(Error::InvalidArgument("path is a directory")),
            None if mode.contains(OpenMode::WRITE) => {
                if !self.dir_exists(parent_of(path)) {
                    return Err(Error::FileNotFound);
                }
                self.nodes.insert(String::from(path), Node::File(Vec::new()));
                Ok(())
            }
            None => Err(Error::FileNotFound),
        }
    }

    fn read(&mut self, path: &str, pos: usize, n: usize) -> Result<Vec<u8>> {
        match self.nodes.get(path) {
            Some(Node::File(data)) => {
                let start = pos.min(data.len());
                let end = (pos + n).min(data.len());
                Ok(data[start..end].to_vec())
            }
            _ => Err(Error::FileNotFound),
        }
    }

    fn write(&mut self, path: &str, pos: usize, data: &[u8]) -> Result<usize> {
        match self.nodes.get_mut(path) {
            Some(Node::File(contents)) => {
                if contents.len() < pos + data.len() {
                    contents.resize(pos + data.len(), 0);
                }
                contents[pos..pos + data.len()].copy_from_slice(data);
                Ok(data.len())
            }
            _ => Err(Error::FileNotFound),
        }
    }

    fn list(&self, path: &str) -> Result<Vec<String>> {
        if !self.dir_exists(path) {
            return Err(Error::FileNotFound);
        }
        let prefix = if path == "/" {
            String::from("/")
        } else {
            format!("{}/", path)
        };
        let mut names: Vec<String> = self
            .nodes
            .keys()
            .filter_map(|p| {
                let rest = p.strip_prefix(&prefix)?;
                if rest.is_empty() || rest.contains('/') {
                    None
                } else {
                    Some(String::from(rest))
                }
            })
            .collect();
        names.sort();
        Ok(names)
    }

    fn stat(&self, path: &str) -> Result<FileStat> {
        if path == "/" {
            return Ok(FileStat {
                size: 0,
                is_dir: true,
            });
        }
        match self.nodes.get(path) {
            Some(Node::File(data)) => Ok(FileStat {
                size: data.len(),
                is_dir: false,
            }),
            Some(Node::Dir) => Ok(FileStat {
                size: 0,
                is_dir: true,
            }),
            None => Err(Error::FileNotFound),
        }
    }

    fn mkdir(&mut self, path: &str) -> Result<()> {
        if self.nodes.contains_key(path) {
            return Err(Error::InvalidArgument("name already exists"));
        }
        if !self.dir_exists(parent_of(path)) {
            return Err(Error::FileNotFound);
        }
        self.nodes.insert(String::from(path), Node::Dir);
        Ok(())
    }

    fn remove(&mut self, path: &str) -> Result<()> {
        match self.nodes.get(path) {
            Some(Node::Dir) => {
                let prefix = format!("{}/", path);
                if self.nodes.keys().any(|p| p.starts_with(&prefix)) {
                    return Err(Error::InvalidArgument("directory not empty"));
                }
            }
            Some(Node::File(_)) => {}
            None => return Err(Error::FileNotFound),
        }
        self.nodes.remove(path);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_creates_and_read_round_trips() {
        let mut fs = MemFs::new();
        fs.open("/motd", OpenMode::WRITE).unwrap();
        fs.write("/motd", 0, b"welcome").unwrap();
        assert_eq!(fs.read("/motd", 0, 64).unwrap(), b"welcome");
        assert_eq!(fs.read("/motd", 3, 2).unwrap(), b"co");
    }

    #[test]
    fn read_only_open_requires_existence() {
        let mut fs = MemFs::new();
        assert_eq!(fs.open("/ghost", OpenMode::READ), Err(Error::FileNotFound));
    }

    #[test]
    fn list_shows_direct_children_only() {
        let mut fs = MemFs::new();
        fs.mkdir("/etc").unwrap();
        fs.open("/etc/passwd", OpenMode::WRITE).unwrap();
        fs.open("/kernel.log", OpenMode::WRITE).unwrap();
        assert_eq!(fs.list("/").unwrap(), vec!["etc", "kernel.log"]);
        assert_eq!(fs.list("/etc").unwrap(), vec!["passwd"]);
    }

    #[test]
    fn remove_refuses_populated_directories() {
        let mut fs = MemFs::new();
        fs.mkdir("/var").unwrap();
        fs.open("/var/db", OpenMode::WRITE).unwrap();
        assert!(fs.remove("/var").is_err());
        fs.remove("/var/db").unwrap();
        fs.remove("/var").unwrap();
    }
}
