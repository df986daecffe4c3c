//! End-to-end tests driving the executive the way the runtime does: spawn,
//! attach programs, run the scheduler, observe.

mod executive;
mod objects;
mod override_bus;
mod properties;

use crate::config::KernelConfig;
use crate::object::Access;
use crate::process::{Pid, Ring};
use crate::{Kernel, ObjectId};

/// A kernel on a manual clock, deterministic for every timeout test.
pub fn boot() -> Kernel {
    Kernel::with_manual_clock(KernelConfig::default())
}

/// A kernel whose synapse layer has no pid bypass, so isolation tests see
/// the checks undiluted.
pub fn boot_strict() -> Kernel {
    let config = KernelConfig {
        synapse_bypass_pid: 0,
        ..KernelConfig::default()
    };
    Kernel::with_manual_clock(config)
}

/// A Ring 0 system process to act as parent and privileged driver.
pub fn system(kernel: &mut Kernel) -> Pid {
    kernel.spawn_system("[system]", Ring::Kernel)
}

/// Spawns a plain user child of `parent`.
pub fn user(kernel: &mut Kernel, parent: Pid, image: &str) -> Pid {
    kernel
        .process_spawn(parent, image, Ring::User, &[])
        .expect("spawn user process")
}

/// Duplicates the object behind `handle` into `target`'s table.
pub fn dup_handle(
    kernel: &mut Kernel,
    owner: Pid,
    handle: &str,
    target: Pid,
    access: Access,
) -> String {
    let id = kernel
        .ob_reference_object_by_handle(owner, handle, Access::empty())
        .expect("resolve handle");
    kernel
        .ob_create_handle(owner, target, id, access)
        .expect("duplicate handle")
}

/// The object id behind a handle, for white-box assertions.
pub fn object_of(kernel: &Kernel, owner: Pid, handle: &str) -> ObjectId {
    kernel
        .ob_reference_object_by_handle(owner, handle, Access::empty())
        .expect("resolve handle")
}
