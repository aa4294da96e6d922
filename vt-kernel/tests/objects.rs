//! Object Manager invariants through the syscall surface: refcounts,
//! namespace, symlinks, handle tokens, synapse binding.

mod common;

use std::sync::Arc;

use spinning_top::Spinlock;
use vt_abi::{AccessMask, Ring, Status, Value};

use common::{bare, run_until_dead, seed_boot_processes, spawn};

fn v(s: &str) -> Value {
    Value::from(s)
}

/// `ObCreateHandle ; ObCloseHandle` leaves the object's refcount where it
/// started, and closing the last edge frees the object.
#[test]
fn handle_lifecycle_balances_refcounts() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let counts: Arc<Spinlock<Vec<i64>>> = Arc::new(Spinlock::new(Vec::new()));
    let pid = {
        let counts = counts.clone();
        spawn(&kernel, "ob", Ring::Kernel, None, move |ctx| {
            let counts = counts.clone();
            async move {
                let me = match ctx.sys("process_get_pid", vec![]).await {
                    Ok(Value::Int(pid)) => pid,
                    _ => return 1,
                };
                let obj = ctx
                    .sys(
                        "ob_create_object",
                        vec![
                            v("IpcEvent"),
                            Value::map([("bManualReset", Value::Bool(true))]),
                        ],
                    )
                    .await
                    .unwrap();
                ctx.sys("ob_insert_object", vec![obj.clone(), v("\\BaseNamedObjects\\rc")])
                    .await
                    .unwrap();

                // Mint and resolve a handle; refcount must read 2
                // (namespace + handle).
                let token = ctx
                    .sys(
                        "ob_create_handle",
                        vec![
                            Value::Int(me),
                            obj.clone(),
                            Value::from(AccessMask::ALL.bits()),
                            Value::Bool(false),
                        ],
                    )
                    .await
                    .unwrap();
                let info = ctx
                    .sys(
                        "ob_reference_by_handle",
                        vec![Value::Int(me), token.clone()],
                    )
                    .await
                    .unwrap();
                counts.lock().push(info.get("nRefcount").as_int().unwrap());

                ctx.sys("ob_close_handle", vec![Value::Int(me), token.clone()])
                    .await
                    .unwrap();
                // The token is gone for good.
                match ctx
                    .sys("ob_reference_by_handle", vec![Value::Int(me), token])
                    .await
                {
                    Err(err) if err.status == Status::HandleNotFound => {}
                    other => panic!("stale token resolved: {other:?}"),
                }

                // Deleting the name drops the last edge.
                ctx.sys("ob_delete_object", vec![v("\\BaseNamedObjects\\rc")])
                    .await
                    .unwrap();
                match ctx
                    .sys("ke_open_named", vec![v("\\BaseNamedObjects\\rc")])
                    .await
                {
                    Err(err) if err.status == Status::NoSuchFile => {}
                    other => panic!("freed object still named: {other:?}"),
                }
                0
            }
        })
    };

    let live_before = kernel.live_objects();
    assert!(run_until_dead(&kernel, pid));
    assert_eq!(counts.lock().as_slice(), &[2]);
    assert_eq!(kernel.live_objects(), live_before, "no object leaked");
}

/// Symlink resolution is bounded and observable through open-by-name.
#[test]
fn symlinks_resolve_with_bounded_indirection() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let pid = spawn(&kernel, "links", Ring::Kernel, None, |ctx| async move {
        let obj = ctx
            .sys("ob_create_object", vec![v("IpcEvent"), Value::Null])
            .await
            .unwrap();
        ctx.sys("ob_insert_object", vec![obj, v("\\Device\\real")])
            .await
            .unwrap();
        ctx.sys(
            "ob_create_symlink",
            vec![v("\\DosDevices\\dev\\alias"), v("\\Device\\real")],
        )
        .await
        .unwrap();

        // Open through the link.
        ctx.sys("ke_open_named", vec![v("\\DosDevices\\dev\\alias")])
            .await
            .unwrap();

        // A link loop resolves to nothing instead of hanging.
        ctx.sys("ob_create_symlink", vec![v("\\la"), v("\\lb")])
            .await
            .unwrap();
        ctx.sys("ob_create_symlink", vec![v("\\lb"), v("\\la")])
            .await
            .unwrap();
        match ctx.sys("ke_open_named", vec![v("\\la")]).await {
            Err(_) => 0,
            Ok(_) => 1,
        }
    });

    assert!(run_until_dead(&kernel, pid));
    assert_eq!(kernel.process_exit_code(pid), None); // reaped after exit 0
}

/// A handle minted before a synapse rotation stops resolving for other
/// holders: the mismatch is reported, not the object.
#[test]
fn synapse_mismatch_blocks_stale_handles() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let outcome: Arc<Spinlock<Vec<u32>>> = Arc::new(Spinlock::new(Vec::new()));
    let pid = {
        let outcome = outcome.clone();
        spawn(&kernel, "synapse", Ring::Kernel, None, move |ctx| {
            let outcome = outcome.clone();
            async move {
                // A ring 3 victim process that parks forever.
                let victim = match ctx
                    .sys("process_spawn", vec![v("/bin/park"), Value::Float(3.0)])
                    .await
                {
                    Ok(Value::Int(pid)) => pid,
                    other => panic!("spawn: {other:?}"),
                };

                let obj = ctx
                    .sys("ob_create_object", vec![v("IpcEvent"), Value::Null])
                    .await
                    .unwrap();
                let token = ctx
                    .sys(
                        "ob_create_handle",
                        vec![
                            Value::Int(victim),
                            obj,
                            Value::from(AccessMask::ALL.bits()),
                            Value::Bool(false),
                        ],
                    )
                    .await
                    .unwrap();

                // Resolves fine with the token it was minted under.
                assert!(
                    ctx.sys(
                        "ob_reference_by_handle",
                        vec![Value::Int(victim), token.clone()],
                    )
                    .await
                    .is_ok()
                );

                // Rotate the victim's synapse token: the stored handle
                // entry is now bound to a retired identity and must stop
                // resolving.
                ctx.sys("synapse_rotate", vec![Value::Int(victim)])
                    .await
                    .unwrap();
                let stale = ctx
                    .sys(
                        "ob_reference_by_handle",
                        vec![Value::Int(victim), token.clone()],
                    )
                    .await;
                outcome
                    .lock()
                    .push(stale.map(|_| 0).unwrap_or_else(|e| e.code()));
                0
            }
        })
    };

    kernel.programs().register(
        "/bin/park",
        vt_kernel::program(|ctx| async move {
            loop {
                ctx.yield_now().await;
            }
        }),
    );

    assert!(run_until_dead(&kernel, pid));
    assert_eq!(
        outcome.lock().as_slice(),
        &[Status::SynapseTokenMismatch.code()]
    );
}

/// Handle tokens are opaque strings and never integers; std handle slots
/// live apart from the table.
#[test]
fn std_handle_slots() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let pid = spawn(&kernel, "stdio", Ring::User, None, |ctx| async move {
        let pipe = match ctx.sys("ke_create_pipe", vec![]).await {
            Ok(Value::Str(token)) => token,
            _ => return 1,
        };
        assert!(pipe.parse::<u64>().is_err(), "token must not be numeric");

        ctx.sys(
            "ob_set_standard_handle",
            vec![Value::Int(1), v(&pipe)],
        )
        .await
        .unwrap();
        match ctx.sys("ob_get_standard_handle", vec![Value::Int(1)]).await {
            Ok(Value::Str(token)) if token == pipe => {}
            other => panic!("stdout slot: {other:?}"),
        }
        // Stdin slot stays empty.
        match ctx.sys("ob_get_standard_handle", vec![Value::Int(0)]).await {
            Ok(Value::Null) => 0,
            other => panic!("stdin slot: {other:?}"),
        }
    });

    assert!(run_until_dead(&kernel, pid));
}
