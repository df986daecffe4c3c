//! Shared sections.
//!
//! A named, fixed-size byte region that mapping processes observe directly.
//! The region sits behind a shared lock so observers never tear each other's
//! writes, but higher-level synchronisation stays the callers' business,
//! typically through a companion mutex.

use std::sync::Arc;

use crate::object::{Access, Body};
use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::Kernel;

/// The handle a mapping returns. Clones share one region.
pub type SectionMapping = Arc<spin::Mutex<Vec<u8>>>;

pub struct Section {
    pub name: Option<String>,
    pub size: usize,
    pub data: SectionMapping,
}

impl Section {
    pub fn new(name: Option<&str>, size: usize) -> Section {
        Section {
            name: name.map(String::from),
            size,
            data: Arc::new(spin::Mutex::new(vec![0; size])),
        }
    }
}

impl Kernel {
    /// Creates a section. A named section is published at `\Section\name`.
    pub fn ke_create_section(
        &mut self,
        caller: Pid,
        name: Option<&str>,
        size: usize,
    ) -> Result<String> {
        self.procs.get(caller)?;
        if size == 0 {
            return Err(Error::InvalidArgument("section size must be positive"));
        }
        let id = self.ob.create(Body::Section(Section::new(name, size)));
        if let Some(name) = name {
            self.ob.insert(id, &format!("\\Section\\{}", name))?;
        }
        klog!(self, Mem, caller, "section {} created, {} bytes", id, size);
        self.create_handle_for(caller, id, Access::READ | Access::WRITE)
    }

    /// Opens an existing named section.
    pub fn ke_open_section(&mut self, caller: Pid, name: &str) -> Result<String> {
        self.procs.get(caller)?;
        let id = self.ob.lookup(&format!("\\Section\\{}", name))?;
        if !matches!(self.ob.get(id)?.body, Body::Section(_)) {
            return Err(Error::NoSuchObject);
        }
        self.create_handle_for(caller, id, Access::READ | Access::WRITE)
    }

    /// Maps the section, returning a direct reference to the shared region.
    pub fn ke_map_section(&mut self, caller: Pid, handle: &str) -> Result<SectionMapping> {
        let id = self.resolve_handle(caller, handle, Access::READ)?;
        match &self.ob.get(id)?.body {
            Body::Section(s) => Ok(Arc::clone(&s.data)),
            _ => Err(Error::NoSuchObject),
        }
    }
}
