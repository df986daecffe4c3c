//! Synapse token syscalls.
//!
//! The per-process secret behind the handle layer. Rotation expires future
//! trust only: handles made earlier keep the snapshot they were bound to and
//! stay valid for a holder whose current token still matches. Revocation is
//! done by closing handles.

use crate::process::Pid;
use crate::syscall::error::{Error, Result};
use crate::Kernel;

impl Kernel {
    /// The caller's current synapse token.
    pub fn synapse_get_token(&self, caller: Pid) -> Result<String> {
        Ok(self.procs.get(caller)?.synapse.clone())
    }

    /// Replaces `target`'s current token with a fresh one. Ring 0 and 1
    /// only. Outstanding handles are untouched.
    pub fn synapse_rotate(&mut self, caller: Pid, target: Pid) -> Result<String> {
        let ring = self.procs.get(caller)?.ring;
        if !ring.is_privileged() {
            klog!(self, Sec, caller, "synapse_rotate denied at ring {}", ring);
            return Err(Error::AccessDenied);
        }
        let token = self.ob.new_synapse_token();
        self.procs.get_mut(target)?.synapse = token.clone();
        klog!(self, Sec, caller, "rotated synapse token of pid {}", target);
        Ok(token)
    }

    /// Whether `token` is `pid`'s current synapse token.
    pub fn synapse_validate(&self, caller: Pid, pid: Pid, token: &str) -> Result<bool> {
        self.procs.get(caller)?;
        Ok(self.procs.get(pid)?.synapse == token)
    }
}
