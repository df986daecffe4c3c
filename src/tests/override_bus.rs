//! The syscall override mechanism: claim, forward, reply, and the failure
//! path when an owner dies with requests in flight.

use super::{boot, system, user};
use crate::object::Access;
use crate::process::Ring;
use crate::syscall::{Outcome, Value};
use crate::vfs::OpenMode;
use crate::Error;

#[test]
fn override_requires_a_privileged_ring() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let pleb = user(&mut kernel, root, "pleb");
    assert_eq!(
        kernel.syscall_override(pleb, "vfs_open").unwrap_err(),
        Error::AccessDenied
    );
}

#[test]
fn claimed_syscall_round_trips_through_the_owner() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let router = kernel.spawn_system("[router]", Ring::Manager);
    let caller = user(&mut kernel, root, "app");

    kernel.syscall_override(router, "vfs_open").unwrap();

    // The invocation parks the caller and lands in the owner's inbox.
    let outcome = kernel
        .syscall_invoke(
            caller,
            "vfs_open",
            vec![
                Value::Str(String::from("/data/report")),
                Value::Int(OpenMode::WRITE.bits() as i64),
            ],
        )
        .unwrap();
    assert!(outcome.is_pending());
    assert!(kernel.procs.get_any(caller).unwrap().status.is_sleeping());

    let request = match kernel.override_next_request(router).unwrap() {
        Outcome::Ready(r) => r,
        Outcome::Pending => unreachable!("inbox holds the request"),
    };
    assert_eq!(request.name, "vfs_open");
    assert_eq!(request.pid, caller);
    assert_eq!(
        request.synapse,
        kernel.synapse_get_token(caller).unwrap()
    );

    // The owner services the open on the caller's behalf and replies.
    let mode = OpenMode::from_bits_truncate(request.args[1].as_int().unwrap() as u32);
    let handle = kernel
        .vfs_open(request.pid, request.args[0].as_str().unwrap(), mode)
        .unwrap();
    kernel
        .syscall_return(router, caller, vec![Value::Str(handle.clone())])
        .unwrap();

    assert!(kernel.procs.get_any(caller).unwrap().status.is_ready());
    let reply = kernel.take_reply(caller).unwrap().unwrap();
    assert_eq!(reply, vec![Value::Str(handle.clone())]);

    // The returned handle really is in the caller's table.
    assert!(kernel
        .ob_reference_object_by_handle(caller, &handle, Access::WRITE)
        .is_ok());
}

#[test]
fn only_the_owner_may_reply() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let router = kernel.spawn_system("[router]", Ring::Manager);
    let impostor = kernel.spawn_system("[impostor]", Ring::Manager);
    let caller = user(&mut kernel, root, "app");

    kernel.syscall_override(router, "vfs_stat").unwrap();
    kernel
        .syscall_invoke(caller, "vfs_stat", vec![Value::Str(String::from("/x"))])
        .unwrap();
    assert_eq!(
        kernel
            .syscall_return(impostor, caller, vec![Value::Unit])
            .unwrap_err(),
        Error::AccessDenied
    );
}

#[test]
fn second_claim_on_a_name_is_refused() {
    let mut kernel = boot();
    let a = kernel.spawn_system("[mgr]", Ring::Manager);
    let b = kernel.spawn_system("[mgr2]", Ring::Manager);
    kernel.syscall_override(a, "vfs_remove").unwrap();
    assert!(kernel.syscall_override(b, "vfs_remove").is_err());
}

#[test]
fn owner_death_fails_parked_callers() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let router = kernel.spawn_system("[router]", Ring::Manager);
    let caller = user(&mut kernel, root, "app");

    kernel.syscall_override(router, "vfs_mkdir").unwrap();
    kernel
        .syscall_invoke(caller, "vfs_mkdir", vec![Value::Str(String::from("/tmp"))])
        .unwrap();
    assert!(kernel.procs.get_any(caller).unwrap().status.is_sleeping());

    kernel.process_kill(root, router).unwrap();

    assert!(kernel.procs.get_any(caller).unwrap().status.is_ready());
    assert_eq!(
        kernel.take_reply(caller).unwrap(),
        Err(Error::SyscallHandlerGone)
    );
    // The name is free again.
    let replacement = kernel.spawn_system("[router2]", Ring::Manager);
    kernel.syscall_override(replacement, "vfs_mkdir").unwrap();
}

#[test]
fn unclaimed_names_fall_through_to_the_builtin() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let caller = user(&mut kernel, root, "app");
    let outcome = kernel
        .syscall_invoke(
            caller,
            "vfs_open",
            vec![
                Value::Str(String::from("/notes")),
                Value::Int(OpenMode::WRITE.bits() as i64),
            ],
        )
        .unwrap();
    match outcome {
        Outcome::Ready(values) => assert!(matches!(&values[0], Value::Str(h) if h.starts_with("H-"))),
        Outcome::Pending => unreachable!("no override registered"),
    }
    assert_eq!(
        kernel
            .syscall_invoke(caller, "no_such_call", vec![])
            .unwrap_err(),
        Error::InvalidArgument("unknown syscall")
    );
}
