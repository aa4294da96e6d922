//! Process lifecycle: spawn, exit, wait, kill privileges, elevation.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};

use spinning_top::Spinlock;
use vt_abi::{Ring, Status, Value};
use vt_kernel::kernel::{SpawnSpec, StdioSpec};
use vt_kernel::logging::LogLevel;
use vt_kernel::process::ProcessStatus;
use vt_kernel::sandbox::program;
use vt_kernel::run_until;

use common::{bare, run_until_dead, seed_boot_processes, spawn};

/// Spawn-and-exit: a ring 3 process prints "hi", its stdout pipe carries
/// exactly `hi\n`, it dies, and the parent's wait returns its exit code.
#[test]
fn spawn_print_exit_and_wait() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let stdout_token: Arc<Spinlock<Option<String>>> = Arc::new(Spinlock::new(None));
    let collected: Arc<Spinlock<Vec<u8>>> = Arc::new(Spinlock::new(Vec::new()));
    let wait_result = Arc::new(AtomicI64::new(i64::MIN));
    let done = Arc::new(AtomicBool::new(false));

    // Parent: reads the child's stdout pipe, then waits for the child.
    let child_pid: Arc<Spinlock<Option<i64>>> = Arc::new(Spinlock::new(None));
    let parent = {
        let stdout_token = stdout_token.clone();
        let collected = collected.clone();
        let wait_result = wait_result.clone();
        let done = done.clone();
        let child_pid = child_pid.clone();
        spawn(&kernel, "parent", Ring::Kernel, None, move |ctx| {
            let stdout_token = stdout_token.clone();
            let collected = collected.clone();
            let wait_result = wait_result.clone();
            let done = done.clone();
            let child_pid = child_pid.clone();
            async move {
                // Wait until the test wires the pipe handle in.
                let token = loop {
                    if let Some(token) = stdout_token.lock().clone() {
                        break token;
                    }
                    ctx.yield_now().await;
                };
                let data = ctx
                    .sys(
                        "ke_pipe_read",
                        vec![Value::from(token.as_str()), Value::Int(3)],
                    )
                    .await
                    .expect("pipe read");
                collected.lock().extend(data.as_bytes().unwrap_or(&[]));

                let child = loop {
                    if let Some(pid) = *child_pid.lock() {
                        break pid;
                    }
                    ctx.yield_now().await;
                };
                match ctx.sys("process_wait", vec![Value::Int(child)]).await {
                    Ok(Value::Int(code)) => wait_result.store(code, Ordering::Relaxed),
                    other => panic!("process_wait: {other:?}"),
                }
                done.store(true, Ordering::Relaxed);
                0
            }
        })
    };

    // Child: ring 3, stdout on a fresh pipe, prints and exits.
    let spawned = kernel
        .spawn(
            SpawnSpec::new(
                "hi",
                Ring::User,
                program(|ctx| async move {
                    ctx.print("hi").await;
                    0
                }),
            )
            .parent(parent)
            .stdout(StdioSpec::NewPipe),
        )
        .expect("spawn child");
    // Hand the parent-side pipe handle to... the child's parent. The
    // handle was minted for the spawn parent, which is the reader above.
    *child_pid.lock() = Some(spawned.pid.as_u64() as i64);
    *stdout_token.lock() = Some(spawned.stdout.expect("pipe handle"));

    assert!(run_until(&kernel, 50_000, |_| done.load(Ordering::Relaxed)));
    assert_eq!(collected.lock().as_slice(), b"hi\n");
    assert_eq!(wait_result.load(Ordering::Relaxed), 0);
    assert_eq!(
        kernel.process_status(spawned.pid),
        None,
        "dead child is reaped after its waiters drain"
    );
    assert!(run_until_dead(&kernel, spawned.pid));
}

/// A child may not be more privileged than its parent unless the parent
/// is ring 0.
#[test]
fn child_ring_cannot_outrank_parent() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let user = spawn(&kernel, "user", Ring::User, None, |ctx| async move {
        loop {
            ctx.yield_now().await;
        }
    });

    let err = kernel
        .spawn(
            SpawnSpec::new(
                "sneaky",
                Ring::Driver,
                program(|_ctx| async move { 0 }),
            )
            .parent(user),
        )
        .unwrap_err();
    assert_eq!(err.status, Status::PrivilegeNotHeld);

    // Ring 0 parents may spawn anything.
    let root = spawn(&kernel, "root", Ring::Kernel, None, |ctx| async move {
        ctx.yield_now().await;
        0
    });
    assert!(
        kernel
            .spawn(
                SpawnSpec::new("driver", Ring::Driver, program(|_ctx| async move { 0 }))
                    .parent(root)
            )
            .is_ok()
    );
}

/// Ancestor kill rejection: a child calling `process_kill` on its parent
/// gets `cannot kill ancestor` and the parent stays alive.
#[test]
fn killing_an_ancestor_is_rejected() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let parent = spawn(&kernel, "parent", Ring::User, None, |ctx| async move {
        loop {
            ctx.yield_now().await;
        }
    });

    let error_text: Arc<Spinlock<Option<String>>> = Arc::new(Spinlock::new(None));
    let child = {
        let error_text = error_text.clone();
        let parent_n = parent.as_u64() as i64;
        spawn(
            &kernel,
            "child",
            Ring::User,
            Some(parent),
            move |ctx| {
                let error_text = error_text.clone();
                async move {
                    match ctx.sys("process_kill", vec![Value::Int(parent_n)]).await {
                        Err(err) => *error_text.lock() = Some(err.to_string()),
                        Ok(_) => *error_text.lock() = Some("unexpectedly succeeded".into()),
                    }
                    0
                }
            },
        )
    };

    assert!(run_until_dead(&kernel, child));
    assert_eq!(error_text.lock().as_deref(), Some("cannot kill ancestor"));
    assert_eq!(
        kernel.process_status(parent),
        Some(ProcessStatus::Ready),
        "parent must survive"
    );
}

/// Ring 3 non-root processes may only signal themselves or their own
/// descendants.
#[test]
fn ring3_non_root_cannot_signal_siblings() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let victim = spawn(&kernel, "victim", Ring::User, None, |ctx| async move {
        loop {
            ctx.yield_now().await;
        }
    });

    let denied2 = Arc::new(AtomicBool::new(false));
    {
        let denied2 = denied2.clone();
        let victim_n = victim.as_u64() as i64;
        let pid = kernel
            .spawn(
                SpawnSpec::new(
                    "attacker2",
                    Ring::User,
                    program(move |ctx| {
                        let denied2 = denied2.clone();
                        async move {
                            if let Err(err) =
                                ctx.sys("process_kill", vec![Value::Int(victim_n)]).await
                            {
                                denied2
                                    .store(err.status == Status::AccessDenied, Ordering::Relaxed);
                            }
                            0
                        }
                    }),
                )
                .uid(1000),
            )
            .unwrap()
            .pid;
        assert!(run_until_dead(&kernel, pid));
    }
    assert!(denied2.load(Ordering::Relaxed));
    assert!(!kernel.process_is_dead(victim));
}

/// Elevation rotates the synapse token and changes the effective ring.
#[test]
fn elevation_rotates_synapse_token() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let tokens: Arc<Spinlock<Vec<String>>> = Arc::new(Spinlock::new(Vec::new()));
    let rings: Arc<Spinlock<Vec<f64>>> = Arc::new(Spinlock::new(Vec::new()));
    let pid = {
        let tokens = tokens.clone();
        let rings = rings.clone();
        spawn(&kernel, "elevator", Ring::User, None, move |ctx| {
            let tokens = tokens.clone();
            let rings = rings.clone();
            async move {
                let before = ctx.sys("synapse_get_token", vec![]).await.unwrap();
                tokens.lock().push(before.as_str().unwrap().to_string());

                let ring = ctx
                    .sys("process_elevate", vec![Value::Float(2.5)])
                    .await
                    .unwrap();
                rings.lock().push(ring.as_number().unwrap());

                let after = ctx.sys("synapse_get_token", vec![]).await.unwrap();
                tokens.lock().push(after.as_str().unwrap().to_string());
                0
            }
        })
    };

    assert!(run_until_dead(&kernel, pid));
    let tokens = tokens.lock();
    assert_eq!(tokens.len(), 2);
    assert_ne!(tokens[0], tokens[1], "token must be re-minted");
    assert_eq!(rings.lock().as_slice(), &[2.5]);
}

/// The syscall rate limiter kills ring 3 processes that flood the
/// dispatcher.
#[test]
fn rate_limited_process_is_killed() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let pid = spawn(&kernel, "flood", Ring::User, None, |ctx| async move {
        loop {
            let _ = ctx.sys("process_get_pid", vec![]).await;
        }
    });

    assert!(run_until_dead(&kernel, pid));
    assert!(kernel.sched_stats().rate_limit_kills >= 1);
    let sec = kernel.dmesg().read(None, 64, LogLevel::Sec);
    assert!(sec.iter().any(|e| e.message.contains("rate limit")));
}
