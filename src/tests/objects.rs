//! Object manager behaviour across processes: named objects, the namespace,
//! reference lifetimes, and the privilege gates.

use super::{boot, object_of, system, user};
use crate::object::{Access, Body};
use crate::process::Ring;
use crate::syscall::Outcome;
use crate::vfs::WriteResult;
use crate::Error;

#[test]
fn named_pipe_connectors_share_one_buffer() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let client = user(&mut kernel, root, "client");

    let server_h = kernel.ke_create_named_pipe(root, "login", Some(64)).unwrap();
    let client_h = kernel.ke_connect_named_pipe(client, "login").unwrap();

    kernel.vfs_write(client, &client_h, b"hello login").unwrap();
    assert_eq!(
        kernel.vfs_read(root, &server_h, 64).unwrap(),
        Outcome::Ready(b"hello login".to_vec())
    );
    assert_eq!(
        kernel.ke_connect_named_pipe(client, "nope").unwrap_err(),
        Error::NoSuchObject
    );
}

#[test]
fn named_objects_outlive_handles_until_unlinked() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let h = kernel.ke_create_named_pipe(root, "sticky", None).unwrap();
    let id = object_of(&kernel, root, &h);

    kernel.ob_close_handle(root, &h).unwrap();
    // Still published, still alive.
    assert!(kernel.ob.get(id).is_ok());
    assert_eq!(kernel.ob.lookup("\\Pipe\\sticky").unwrap(), id);

    kernel.unlink_object(id).unwrap();
    assert!(kernel.ob.get(id).is_err());
    assert_eq!(
        kernel.ob.lookup("\\Pipe\\sticky").unwrap_err(),
        Error::NoSuchObject
    );
}

#[test]
fn sections_and_queues_open_by_name() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let peer = user(&mut kernel, root, "peer");

    let s = kernel.ke_create_section(root, Some("frame"), 32).unwrap();
    let mapped_by_creator = kernel.ke_map_section(root, &s).unwrap();
    let opened = kernel.ke_open_section(peer, "frame").unwrap();
    let mapped_by_peer = kernel.ke_map_section(peer, &opened).unwrap();

    mapped_by_creator.lock()[0] = 0xAB;
    assert_eq!(mapped_by_peer.lock()[0], 0xAB);

    kernel.ke_create_mqueue(root, "jobs", 4, 16).unwrap();
    let q = kernel.ke_open_mqueue(peer, "jobs").unwrap();
    kernel.ke_mq_send(peer, &q, b"job-1", 0).unwrap();
    match kernel.ke_mq_receive(peer, &q, Some(0)).unwrap() {
        Outcome::Ready((payload, _)) => assert_eq!(payload, b"job-1"),
        Outcome::Pending => unreachable!(),
    }
}

#[test]
fn dump_directory_is_privileged_and_ordered() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let pleb = user(&mut kernel, root, "pleb");
    kernel.ke_create_named_pipe(root, "a", None).unwrap();
    kernel.ke_create_section(root, Some("b"), 8).unwrap();

    assert_eq!(
        kernel.ob_dump_directory(pleb).unwrap_err(),
        Error::AccessDenied
    );
    let dump = kernel.ob_dump_directory(root).unwrap();
    assert!(dump.iter().any(|line| line.starts_with("\\Pipe\\a")));
    assert!(dump.iter().any(|line| line.starts_with("\\Section\\b")));
}

#[test]
fn create_object_syscall_is_ring_gated() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let pleb = user(&mut kernel, root, "pleb");
    assert_eq!(
        kernel
            .ob_create_object(pleb, Body::Event(crate::ipc::Event::new(false, false)))
            .unwrap_err(),
        Error::AccessDenied
    );
    let id = kernel
        .ob_create_object(root, Body::Event(crate::ipc::Event::new(true, true)))
        .unwrap();
    let h = kernel.ob_create_handle(root, pleb, id, Access::SYNCHRONIZE).unwrap();
    assert!(matches!(
        kernel.ke_wait_single(pleb, &h, Some(0)),
        Ok(Outcome::Ready(_))
    ));
}

#[test]
fn anonymous_objects_die_with_their_last_handle() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let (read_h, write_h) = kernel.ke_create_pipe(root, Some(4)).unwrap();
    let id = object_of(&kernel, root, &read_h);

    assert_eq!(
        kernel.vfs_write(root, &write_h, b"hi").unwrap(),
        WriteResult::Complete(2)
    );
    kernel.ob_close_handle(root, &write_h).unwrap();
    assert!(kernel.ob.get(id).is_ok());
    kernel.ob_close_handle(root, &read_h).unwrap();
    assert!(kernel.ob.get(id).is_err());
}

#[test]
fn process_surface_smoke() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let child = user(&mut kernel, root, "child");

    let listing = kernel.process_list(root).unwrap();
    assert_eq!(listing.len(), 2);
    assert_eq!(kernel.process_get_ring(root, child).unwrap(), Ring::User);
    assert_eq!(kernel.process_cpu_stats(root, child).unwrap().resumes, 0);
    assert!(kernel.process_yield(child).is_ok());

    // Children cannot spawn upward.
    assert_eq!(
        kernel
            .process_spawn(child, "usurper", Ring::Kernel, &[])
            .unwrap_err(),
        Error::AccessDenied
    );

    // Threads share the parent's synapse token and group.
    let thread = kernel.process_spawn_thread(child, "child/worker").unwrap();
    assert!(kernel
        .synapse_validate(root, thread, &kernel.synapse_get_token(child).unwrap())
        .unwrap());
    assert_eq!(kernel.procs.get(thread).unwrap().pgid, child);
    assert!(kernel.procs.get(child).unwrap().threads.contains(&thread));
}
