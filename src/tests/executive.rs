//! Scheduler, watchdog, signal delivery, timers, VFS routing, and the
//! kernel message ring, exercised together.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use super::{boot, dup_handle, system, user};
use crate::ipc::timer::TimerDpc;
use crate::ipc::WaitStatus;
use crate::log::Level;
use crate::object::Access;
use crate::process::signal::{SIGCONT, SIGSTOP, SIGUSR1, SIGUSR2};
use crate::process::{Irql, Pid, Ring, Step};
use crate::syscall::Outcome;
use crate::vfs::{OpenMode, WriteResult, STDERR_SLOT, STDIN_SLOT, STDOUT_SLOT};
use crate::{Error, Kernel};

/// Records each of its resumes, then yields.
struct Tracer {
    trace: Rc<RefCell<Vec<Pid>>>,
}

impl crate::process::Program for Tracer {
    fn resume(&mut self, _kernel: &mut Kernel, pid: Pid) -> Step {
        self.trace.borrow_mut().push(pid);
        Step::Yield
    }
}

#[test]
fn round_robin_rotates_and_priority_breaks_ties() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let trace = Rc::new(RefCell::new(Vec::new()));
    let pids: Vec<Pid> = (0..3)
        .map(|i| {
            let pid = user(&mut kernel, root, &format!("task-{}", i));
            let program = Tracer {
                trace: Rc::clone(&trace),
            };
            kernel.attach_program(pid, Box::new(program)).unwrap();
            pid
        })
        .collect();

    for _ in 0..6 {
        kernel.schedule_once();
    }
    assert_eq!(
        *trace.borrow(),
        vec![pids[0], pids[1], pids[2], pids[0], pids[1], pids[2]]
    );

    // A lower priority number dominates the rotation.
    kernel.process_set_priority(root, pids[2], 10).unwrap();
    trace.borrow_mut().clear();
    for _ in 0..4 {
        kernel.schedule_once();
    }
    assert_eq!(*trace.borrow(), vec![pids[2]; 4]);
}

/// Burns a whole simulated second per resume.
struct Hog;

impl crate::process::Program for Hog {
    fn resume(&mut self, kernel: &mut Kernel, _pid: Pid) -> Step {
        kernel.advance_clock(1.0);
        Step::Yield
    }
}

#[test]
fn watchdog_strikes_then_terminates_a_hog() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let hog = user(&mut kernel, root, "hog");
    kernel.attach_program(hog, Box::new(Hog)).unwrap();

    kernel.run_until_idle(20);
    let victim = kernel.procs.get_any(hog).unwrap();
    assert!(victim.status.is_dead());
    assert!(victim.cpu.strikes >= 3);
    assert!(victim.cpu.preemptions >= 3);
    assert!(victim.cpu.total >= 3.0);
    assert!(victim.cpu.max_slice >= 1.0);
}

#[test]
fn handlers_run_and_masked_signals_hold_the_queue() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let target = user(&mut kernel, root, "handler");
    kernel.attach_program(target, Box::new(Spinner)).unwrap();

    let hits = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&hits);
    kernel
        .signal_set_handler(
            target,
            SIGUSR1,
            Box::new(move |signum| {
                sink.borrow_mut().push(signum);
                Ok(())
            }),
        )
        .unwrap();

    // Masked: queued but not delivered.
    kernel.signal_set_mask(target, 1 << SIGUSR1).unwrap();
    kernel.signal_send(root, target, SIGUSR1).unwrap();
    kernel.run_until_idle(2);
    assert!(hits.borrow().is_empty());
    assert!(kernel
        .procs
        .get_any(target)
        .unwrap()
        .pending_signals
        .contains(&SIGUSR1));

    // Unmasked: the held signal drains into the handler.
    kernel.signal_set_mask(target, 0).unwrap();
    kernel.run_until_idle(2);
    assert_eq!(*hits.borrow(), vec![SIGUSR1]);
}

struct Spinner;

impl crate::process::Program for Spinner {
    fn resume(&mut self, _kernel: &mut Kernel, _pid: Pid) -> Step {
        Step::Yield
    }
}

#[test]
fn stop_and_continue_gate_scheduling() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let target = user(&mut kernel, root, "stoppee");
    let trace = Rc::new(RefCell::new(Vec::new()));
    let program = Tracer {
        trace: Rc::clone(&trace),
    };
    kernel.attach_program(target, Box::new(program)).unwrap();

    kernel.run_until_idle(1);
    assert_eq!(trace.borrow().len(), 1);

    kernel.signal_send(root, target, SIGSTOP).unwrap();
    kernel.run_until_idle(5);
    assert_eq!(trace.borrow().len(), 1, "stopped process still ran");

    kernel.signal_send(root, target, SIGCONT).unwrap();
    kernel.run_until_idle(1);
    assert_eq!(trace.borrow().len(), 2);
}

#[test]
fn signals_interrupt_waits_with_io_completion() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let sleeper = user(&mut kernel, root, "sleeper");
    let event = kernel.ke_create_event(root, false, false).unwrap();
    let h = dup_handle(&mut kernel, root, &event, sleeper, Access::SYNCHRONIZE);

    assert_eq!(
        kernel.ke_wait_single(sleeper, &h, Some(10_000)).unwrap(),
        Outcome::Pending
    );
    kernel.signal_send(root, sleeper, SIGUSR2).unwrap();

    let p = kernel.procs.get_any(sleeper).unwrap();
    assert!(p.status.is_ready());
    assert_eq!(kernel.take_wait_result(sleeper), Some(WaitStatus::IoCompletion));
    // The interrupted wait left no residue: a later set wakes nobody.
    kernel.ke_set_event(root, &event).unwrap();
    assert!(kernel.take_wait_result(sleeper).is_none());
}

#[test]
fn waits_are_refused_at_dispatch_level() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let event = kernel.ke_create_event(root, false, false).unwrap();
    kernel.raise_irql(root, Irql::Dispatch).unwrap();
    assert_eq!(
        kernel.ke_wait_single(root, &event, None).unwrap_err(),
        Error::CannotBlock
    );
    kernel.lower_irql(root, Irql::Passive).unwrap();
    assert!(kernel.ke_wait_single(root, &event, Some(0)).is_ok());
}

#[test]
fn periodic_timer_fires_dpcs_and_rearms() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let timer = kernel.ke_create_timer(root).unwrap();

    let fired = Rc::new(RefCell::new(0usize));
    let sink = Rc::clone(&fired);
    let dpc = TimerDpc {
        func: Arc::new(move |a, _| {
            *sink.borrow_mut() += a;
            Ok(())
        }),
        arg1: 1,
        arg2: 0,
    };
    kernel
        .ke_set_timer(root, &timer, 100, Some(100), Some(dpc))
        .unwrap();

    kernel.advance_clock(0.11);
    kernel.tick();
    assert_eq!(*fired.borrow(), 1);
    assert_eq!(
        kernel.ke_wait_single(root, &timer, Some(0)).unwrap(),
        Outcome::Ready(WaitStatus::Object(0))
    );

    kernel.advance_clock(0.1);
    kernel.tick();
    assert_eq!(*fired.borrow(), 2);

    assert!(kernel.ke_cancel_timer(root, &timer).unwrap());
    kernel.advance_clock(1.0);
    kernel.tick();
    assert_eq!(*fired.borrow(), 2, "cancelled timer kept firing");
}

#[test]
fn vfs_routes_files_devices_and_permissions() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let alien = user(&mut kernel, root, "alien");
    // Give the user a distinct identity for the permission check.
    kernel.procs.get_mut(alien).unwrap().uid = 7;
    kernel.procs.get_mut(alien).unwrap().gid = 7;

    // Regular file: write through one handle, read through another.
    let out = kernel.vfs_open(root, "/log.txt", OpenMode::WRITE).unwrap();
    assert_eq!(
        kernel.vfs_write(root, &out, b"hello").unwrap(),
        WriteResult::Complete(5)
    );
    let input = kernel.vfs_open(root, "/log.txt", OpenMode::READ).unwrap();
    assert_eq!(
        kernel.vfs_read(root, &input, 64).unwrap(),
        Outcome::Ready(b"hello".to_vec())
    );
    assert!(!kernel.vfs_stat(root, "/log.txt").unwrap().is_dir);

    // Owner-only mode shuts out other uids.
    kernel.set_file_permission("/log.txt", 0, 0, 0o600);
    assert_eq!(
        kernel.vfs_open(alien, "/log.txt", OpenMode::READ).unwrap_err(),
        Error::PermissionDenied
    );
    assert!(kernel.vfs_open(root, "/log.txt", OpenMode::READ).is_ok());

    // Devices skip the permission map entirely.
    let null = kernel.vfs_open(alien, "/dev/null", OpenMode::WRITE).unwrap();
    assert_eq!(
        kernel.vfs_write(alien, &null, b"discard").unwrap(),
        WriteResult::Complete(7)
    );
    assert_eq!(
        kernel.vfs_open(alien, "/dev/missing", OpenMode::READ).unwrap_err(),
        Error::FileNotFound
    );

    // Directory operations.
    kernel.vfs_mkdir(root, "/srv").unwrap();
    let f = kernel.vfs_open(root, "/srv/unit", OpenMode::WRITE).unwrap();
    kernel.vfs_close(root, &f).unwrap();
    assert_eq!(kernel.vfs_list(root, "/srv").unwrap(), vec!["unit"]);
    assert_eq!(
        kernel.vfs_remove(root, "/srv").unwrap_err(),
        Error::InvalidArgument("directory not empty")
    );
}

#[test]
fn tty_opens_fill_the_standard_slots() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let tty = kernel.tty_device();
    tty.push_input(b"typed\n");

    let stdin = kernel.vfs_open(root, "/dev/tty", OpenMode::READ).unwrap();
    let stdout = kernel.vfs_open(root, "/dev/tty", OpenMode::WRITE).unwrap();
    let stderr = kernel.vfs_open(root, "/dev/tty", OpenMode::WRITE).unwrap();

    let p = kernel.procs.get_any(root).unwrap();
    assert_eq!(p.std_handles.get(&STDIN_SLOT), Some(&stdin));
    assert_eq!(p.std_handles.get(&STDOUT_SLOT), Some(&stdout));
    assert_eq!(p.std_handles.get(&STDERR_SLOT), Some(&stderr));

    assert_eq!(
        kernel.vfs_read(root, &stdin, 5).unwrap(),
        Outcome::Ready(b"typed".to_vec())
    );
    kernel.vfs_write(root, &stdout, b"echo").unwrap();
    assert_eq!(tty.take_output(), b"echo");

    // Device control goes straight to the driver. One byte of the original
    // input (the newline) is still queued.
    tty.push_input(b"xy");
    assert_eq!(
        kernel
            .vfs_device_control(root, &stdin, "pending", &[])
            .unwrap(),
        crate::Value::Int(3)
    );
    assert!(kernel
        .vfs_device_control(root, &stdin, "reboot", &[])
        .is_err());
}

#[test]
fn dmesg_reads_filter_and_clear_is_gated() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let pleb = user(&mut kernel, root, "pleb");

    let before = kernel.dmesg_stats().next_seq;
    kernel.kernel_log(root, "first").unwrap();
    kernel.kernel_log(pleb, "second").unwrap();

    let entries = kernel.dmesg_read(before, usize::MAX, Some(Level::Info));
    let texts: Vec<&str> = entries.iter().map(|e| e.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "second"]);
    assert!(entries.windows(2).all(|w| w[0].seq < w[1].seq));

    assert_eq!(kernel.dmesg_clear(pleb).unwrap_err(), Error::AccessDenied);
    kernel.dmesg_clear(root).unwrap();
    assert_eq!(kernel.dmesg_stats().entries, 0);
}

#[test]
fn environment_is_inherited_and_realtime_lives_here_only() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    kernel.environ_set(root, "PATH", "/bin").unwrap();
    let child = kernel
        .process_spawn(root, "child", Ring::User, &[("ARGS", "serve --port 80")])
        .unwrap();
    assert_eq!(
        kernel.environ_get(child, "PATH").unwrap(),
        Some(String::from("/bin"))
    );
    assert_eq!(
        kernel.environ_get(child, "HOSTNAME").unwrap(),
        Some(String::from("axis"))
    );
    assert_eq!(
        kernel.procs.get(child).unwrap().args,
        vec!["serve", "--port", "80"]
    );
    assert!(kernel.environ_realtime(root).unwrap() > 0.0);
}

#[test]
fn group_signals_reach_every_member() {
    let mut kernel = boot();
    let root = system(&mut kernel);
    let a = user(&mut kernel, root, "a");
    let b = user(&mut kernel, root, "b");
    let c = user(&mut kernel, root, "c");
    kernel.set_process_group(root, a, 99).unwrap();
    kernel.set_process_group(root, b, 99).unwrap();

    kernel.signal_send_group(root, 99, SIGUSR1).unwrap();
    assert!(kernel.procs.get_any(a).unwrap().pending_signals.contains(&SIGUSR1));
    assert!(kernel.procs.get_any(b).unwrap().pending_signals.contains(&SIGUSR1));
    assert!(kernel.procs.get_any(c).unwrap().pending_signals.is_empty());
}
