//! The object namespace.
//!
//! A rooted tree of directories, symbolic links, and object pointers, in the
//! style of `\Device\...`, `\Pipe\...`, `\Section\...`, `\MQueue\...`.
//! Resolution is case-preserving; forward and back slashes are equivalent
//! separators.

use indexmap::IndexMap;

use super::ObjectId;
use crate::syscall::error::{Error, Result};

/// Links may chain, but not forever.
const MAX_LINK_DEPTH: usize = 8;

#[derive(Debug)]
pub enum NsNode {
    Directory(IndexMap<String, NsNode>),
    Object(ObjectId),
    Link(String),
}

#[derive(Debug)]
pub struct Namespace {
    root: IndexMap<String, NsNode>,
}

/// Splits a namespace path into components, treating `/` and `\` alike.
pub fn split_path(path: &str) -> Vec<&str> {
    path.split(|c| c == '\\' || c == '/')
        .filter(|s| !s.is_empty())
        .collect()
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace {
            root: IndexMap::new(),
        }
    }

    /// Publishes `id` at `path`, creating intermediate directories on
    /// demand. Fails if the final name already exists.
    pub fn insert(&mut self, path: &str, id: ObjectId) -> Result<()> {
        let parts = split_path(path);
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(Error::InvalidArgument("empty namespace path"));
        };
        let mut node = &mut self.root;
        for part in dirs {
            let entry = node
                .entry(String::from(*part))
                .or_insert_with(|| NsNode::Directory(IndexMap::new()));
            match entry {
                NsNode::Directory(children) => node = children,
                _ => return Err(Error::InvalidArgument("path component is not a directory")),
            }
        }
        if node.contains_key(*leaf) {
            return Err(Error::InvalidArgument("name already exists"));
        }
        node.insert(String::from(*leaf), NsNode::Object(id));
        Ok(())
    }

    /// Creates a symbolic link at `path` pointing at `target`.
    pub fn link(&mut self, path: &str, target: &str) -> Result<()> {
        let parts = split_path(path);
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(Error::InvalidArgument("empty namespace path"));
        };
        let mut node = &mut self.root;
        for part in dirs {
            let entry = node
                .entry(String::from(*part))
                .or_insert_with(|| NsNode::Directory(IndexMap::new()));
            match entry {
                NsNode::Directory(children) => node = children,
                _ => return Err(Error::InvalidArgument("path component is not a directory")),
            }
        }
        if node.contains_key(*leaf) {
            return Err(Error::InvalidArgument("name already exists"));
        }
        node.insert(String::from(*leaf), NsNode::Link(String::from(target)));
        Ok(())
    }

    /// Resolves `path` to an object, following links.
    pub fn lookup(&self, path: &str) -> Result<ObjectId> {
        self.lookup_depth(path, 0)
    }

    fn lookup_depth(&self, path: &str, depth: usize) -> Result<ObjectId> {
        if depth > MAX_LINK_DEPTH {
            return Err(Error::NoSuchObject);
        }
        let parts = split_path(path);
        let mut node = &self.root;
        for (i, part) in parts.iter().enumerate() {
            match node.get(*part) {
                Some(NsNode::Directory(children)) => node = children,
                Some(NsNode::Object(id)) if i + 1 == parts.len() => return Ok(*id),
                Some(NsNode::Link(target)) if i + 1 == parts.len() => {
                    return self.lookup_depth(target, depth + 1);
                }
                _ => return Err(Error::NoSuchObject),
            }
        }
        Err(Error::NoSuchObject)
    }

    /// Removes the entry at `path`. Directories must be empty.
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let parts = split_path(path);
        let Some((leaf, dirs)) = parts.split_last() else {
            return Err(Error::InvalidArgument("empty namespace path"));
        };
        let mut node = &mut self.root;
        for part in dirs {
            match node.get_mut(*part) {
                Some(NsNode::Directory(children)) => node = children,
                _ => return Err(Error::NoSuchObject),
            }
        }
        match node.get(*leaf) {
            Some(NsNode::Directory(children)) if !children.is_empty() => {
                Err(Error::InvalidArgument("directory not empty"))
            }
            Some(_) => {
                node.shift_remove(*leaf);
                Ok(())
            }
            None => Err(Error::NoSuchObject),
        }
    }

    /// Flat listing of the whole tree, one line per node, insertion order.
    pub fn dump(&self) -> Vec<String> {
        let mut out = Vec::new();
        Self::dump_dir(&self.root, "", &mut out);
        out
    }

    fn dump_dir(dir: &IndexMap<String, NsNode>, prefix: &str, out: &mut Vec<String>) {
        for (name, node) in dir {
            let path = format!("{}\\{}", prefix, name);
            match node {
                NsNode::Directory(children) => {
                    out.push(format!("{} <dir>", path));
                    Self::dump_dir(children, &path, out);
                }
                NsNode::Object(id) => out.push(format!("{} -> object {}", path, id)),
                NsNode::Link(target) => out.push(format!("{} => {}", path, target)),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slash_styles_are_equivalent() {
        let mut ns = Namespace::new();
        ns.insert("\\Pipe\\login", 3).unwrap();
        assert_eq!(ns.lookup("/Pipe/login").unwrap(), 3);
        assert_eq!(ns.lookup("\\Pipe\\login").unwrap(), 3);
    }

    #[test]
    fn insert_refuses_duplicates() {
        let mut ns = Namespace::new();
        ns.insert("\\Device\\null", 1).unwrap();
        assert!(ns.insert("\\Device\\null", 2).is_err());
    }

    #[test]
    fn links_resolve_and_cycles_terminate() {
        let mut ns = Namespace::new();
        ns.insert("\\Device\\tty0", 9).unwrap();
        ns.link("\\Device\\console", "\\Device\\tty0").unwrap();
        assert_eq!(ns.lookup("\\Device\\console").unwrap(), 9);

        ns.link("\\a", "\\b").unwrap();
        ns.link("\\b", "\\a").unwrap();
        assert_eq!(ns.lookup("\\a").unwrap_err(), Error::NoSuchObject);
    }

    #[test]
    fn remove_requires_empty_directory() {
        let mut ns = Namespace::new();
        ns.insert("\\MQueue\\q", 5).unwrap();
        assert!(ns.remove("\\MQueue").is_err());
        ns.remove("\\MQueue\\q").unwrap();
        ns.remove("\\MQueue").unwrap();
        assert_eq!(ns.lookup("\\MQueue\\q").unwrap_err(), Error::NoSuchObject);
    }
}
