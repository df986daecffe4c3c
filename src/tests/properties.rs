//! The quantified invariants, driven through the syscall surface.

use std::collections::HashSet;

use super::{boot, boot_strict, dup_handle, object_of, system, user};
use crate::ipc::WaitStatus;
use crate::object::Access;
use crate::syscall::Outcome;
use crate::vfs::WriteResult;
use crate::Error;

#[test]
fn handle_tokens_never_repeat() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let mut seen = HashSet::new();
    for _ in 0..256 {
        let h = kernel.ke_create_event(root, false, false).unwrap();
        assert!(h.starts_with("H-"));
        assert!(seen.insert(h.clone()));
        kernel.ob_close_handle(root, &h).unwrap();
    }
}

#[test]
fn foreign_tokens_are_invalid_and_stale_synapse_is_denied() {
    let mut kernel = boot_strict();
    let root = system(&mut kernel);
    let p = user(&mut kernel, root, "p");
    let q = user(&mut kernel, root, "q");

    let event = kernel.ke_create_event(root, false, false).unwrap();
    let in_p = dup_handle(&mut kernel, root, &event, p, Access::all());

    // Q presenting P's token: not in Q's table at all.
    assert_eq!(
        kernel.ke_set_event(q, &in_p).unwrap_err(),
        Error::InvalidHandle
    );
    // P itself is fine before rotation.
    kernel.ke_set_event(p, &in_p).unwrap();

    // After rotation the handle's snapshot no longer matches P's token.
    kernel.synapse_rotate(root, p).unwrap();
    assert_eq!(
        kernel.ke_set_event(p, &in_p).unwrap_err(),
        Error::AccessDenied
    );
    // New handles bind the rotated token and work.
    let second = kernel.ke_create_event(root, false, false).unwrap();
    let fresh = dup_handle(&mut kernel, root, &second, p, Access::all());
    kernel.ke_set_event(p, &fresh).unwrap();
}

#[test]
fn ring_zero_bypasses_the_synapse_snapshot() {
    let mut kernel = boot_strict();
    let root = system(&mut kernel);
    let h = kernel.ke_create_event(root, false, false).unwrap();
    kernel.synapse_rotate(root, root).unwrap();
    // Ring 0 skips the snapshot comparison entirely.
    kernel.ke_set_event(root, &h).unwrap();
}

#[test]
fn auto_reset_event_wakes_waiters_in_fifo_order() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let event = kernel.ke_create_event(root, false, false).unwrap();

    let waiters: Vec<_> = (0..3)
        .map(|i| {
            let pid = user(&mut kernel, root, &format!("waiter-{}", i));
            let h = dup_handle(&mut kernel, root, &event, pid, Access::SYNCHRONIZE);
            assert_eq!(
                kernel.ke_wait_single(pid, &h, None).unwrap(),
                Outcome::Pending
            );
            pid
        })
        .collect();

    for (round, &expected) in waiters.iter().enumerate() {
        kernel.ke_set_event(root, &event).unwrap();
        assert_eq!(
            kernel.take_wait_result(expected),
            Some(WaitStatus::Object(0)),
            "set {} woke the wrong waiter",
            round
        );
        for &later in &waiters[round + 1..] {
            assert!(kernel.procs.get_any(later).unwrap().status.is_sleeping());
        }
    }
}

#[test]
fn mq_orders_by_priority_with_fifo_ties() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let q = kernel.ke_create_mqueue(root, "props", 32, 64).unwrap();
    for (payload, priority) in [
        (&b"a"[..], 3u32),
        (b"b", 1),
        (b"c", 4),
        (b"d", 1),
        (b"e", 5),
    ] {
        kernel.ke_mq_send(root, &q, payload, priority).unwrap();
    }
    let mut order = Vec::new();
    while let Ok(Outcome::Ready((payload, _))) = kernel.ke_mq_receive(root, &q, Some(0)) {
        order.push(payload);
    }
    let expect: Vec<Vec<u8>> = [&b"e"[..], b"c", b"a", b"b", b"d"]
        .iter()
        .map(|b| b.to_vec())
        .collect();
    assert_eq!(order, expect);
}

#[test]
fn timeouts_never_fire_early() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let sleeper = user(&mut kernel, root, "sleeper");
    let event = kernel.ke_create_event(root, false, false).unwrap();
    let h = dup_handle(&mut kernel, root, &event, sleeper, Access::SYNCHRONIZE);

    assert_eq!(
        kernel.ke_wait_single(sleeper, &h, Some(500)).unwrap(),
        Outcome::Pending
    );
    kernel.advance_clock(0.4);
    kernel.tick();
    assert!(kernel.procs.get_any(sleeper).unwrap().status.is_sleeping());

    kernel.advance_clock(0.1);
    kernel.tick();
    assert_eq!(kernel.take_wait_result(sleeper), Some(WaitStatus::Timeout));
}

#[test]
fn double_close_is_invalid_and_releases_once() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let h = kernel.ke_create_event(root, false, false).unwrap();
    let id = object_of(&kernel, root, &h);

    kernel.ob_close_handle(root, &h).unwrap();
    assert!(kernel.ob.get(id).is_err());
    assert_eq!(
        kernel.ob_close_handle(root, &h).unwrap_err(),
        Error::InvalidHandle
    );
}

#[test]
fn mutex_recursion_balances_acquire_and_release() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let probe = user(&mut kernel, root, "probe");
    let mutex = kernel.ke_create_mutex(root, false).unwrap();
    let probe_h = dup_handle(&mut kernel, root, &mutex, probe, Access::SYNCHRONIZE);

    for _ in 0..4 {
        assert_eq!(
            kernel.ke_wait_single(root, &mutex, None).unwrap(),
            Outcome::Ready(WaitStatus::Object(0))
        );
    }
    for _ in 0..3 {
        kernel.ke_release_mutex(root, &mutex).unwrap();
        assert_eq!(
            kernel.ke_wait_single(probe, &probe_h, Some(0)).unwrap(),
            Outcome::Ready(WaitStatus::Timeout),
            "mutex freed before the final release"
        );
    }
    kernel.ke_release_mutex(root, &mutex).unwrap();
    assert_eq!(
        kernel.ke_wait_single(probe, &probe_h, Some(0)).unwrap(),
        Outcome::Ready(WaitStatus::Object(0))
    );
    // Releasing something we no longer own fails.
    assert_eq!(
        kernel.ke_release_mutex(root, &mutex).unwrap_err(),
        Error::AccessDenied
    );
}

#[test]
fn pipe_round_trips_byte_strings() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let payload: Vec<u8> = (0..=255u8).collect();
    let (read_h, write_h) = kernel.ke_create_pipe(root, Some(payload.len())).unwrap();

    assert_eq!(
        kernel.vfs_write(root, &write_h, &payload).unwrap(),
        WriteResult::Complete(payload.len())
    );
    match kernel.vfs_read(root, &read_h, payload.len()).unwrap() {
        Outcome::Ready(data) => assert_eq!(data, payload),
        Outcome::Pending => unreachable!("pipe holds the payload"),
    }
}

#[test]
fn eof_requires_closed_writers_and_sigpipe_hits_closed_readers() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let writer = user(&mut kernel, root, "w");

    let (read_h, write_h) = kernel.ke_create_pipe(root, Some(16)).unwrap();
    let wh = dup_handle(&mut kernel, root, &write_h, writer, Access::WRITE | Access::SYNCHRONIZE);
    kernel.vfs_write(writer, &wh, b"bye").unwrap();

    // Close every write-capable handle: the reader drains, then sees EOF.
    kernel.ob_close_handle(root, &write_h).unwrap();
    kernel.ob_close_handle(writer, &wh).unwrap();
    assert_eq!(
        kernel.vfs_read(root, &read_h, 16).unwrap(),
        Outcome::Ready(b"bye".to_vec())
    );
    assert_eq!(
        kernel.vfs_read(root, &read_h, 16).unwrap(),
        Outcome::Ready(Vec::new())
    );

    // And the mirror image: writing with no readers breaks.
    let (read_h2, write_h2) = kernel.ke_create_pipe(root, Some(16)).unwrap();
    kernel.ob_close_handle(root, &read_h2).unwrap();
    assert_eq!(
        kernel.vfs_write(root, &write_h2, b"x").unwrap_err(),
        Error::BrokenPipe
    );
    assert!(kernel
        .procs
        .get_any(root)
        .unwrap()
        .pending_signals
        .contains(&crate::process::signal::SIGPIPE));
}
