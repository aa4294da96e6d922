//! End-to-end IRP pipeline: boot the full system, talk to devices through
//! the VFS, and survive a driver crash.

mod common;

use std::sync::Arc;

use spinning_top::Spinlock;
use vt_abi::{Ring, Status, Value};
use vt_kernel::host::VirtHost;
use vt_kernel::kernel::{Kernel, SpawnSpec};
use vt_kernel::sandbox::{Sandbox, program};
use vt_kernel::{boot, programs, run_until};

fn system_kernel() -> (Arc<VirtHost>, Arc<Kernel>) {
    let (builder, _fs) = VirtHost::builder().managed_fs([
        (
            "/etc/drivers.cfg",
            b"/drivers/null.sys\n/drivers/vtty.sys\n".to_vec(),
        ),
    ]);
    let host = builder.build();
    let kernel = boot(host.clone(), programs::standard_images(), true);
    // Let init bring the Pipeline Manager up before user processes enter.
    assert!(run_until(&kernel, 10_000, |k| k.pipeline_manager().is_some()));
    (host, kernel)
}

/// Retry until the VFS answers: drivers come up asynchronously. The
/// back-off keeps a ring 3 retry loop well under the syscall rate limit.
async fn open_eventually(ctx: &Sandbox, path: &str) -> Result<String, u32> {
    for _ in 0..2_000 {
        match ctx.sys("vfs_open", vec![Value::from(path)]).await {
            Ok(Value::Str(handle)) => return Ok(handle),
            Ok(other) => panic!("open: unexpected {other}"),
            Err(_) => ctx.sleep_ms(2).await,
        }
    }
    Err(Status::NoSuchDevice.code())
}

/// Open `/dev/null`, write into it, read end-of-file, close.
#[test]
fn vfs_round_trip_through_null_driver() {
    let (_host, kernel) = system_kernel();

    let log: Arc<Spinlock<Vec<String>>> = Arc::new(Spinlock::new(Vec::new()));
    let user = {
        let log = log.clone();
        let image = program(move |ctx| {
            let log = log.clone();
            async move {
                let handle = match open_eventually(&ctx, "/dev/null").await {
                    Ok(handle) => handle,
                    Err(code) => {
                        log.lock().push(format!("open failed: {code}"));
                        return 1;
                    }
                };
                match ctx
                    .sys(
                        "vfs_write",
                        vec![
                            Value::from(handle.as_str()),
                            Value::Bytes(b"abc".to_vec()),
                        ],
                    )
                    .await
                {
                    Ok(Value::Int(3)) => log.lock().push("wrote 3".into()),
                    other => log.lock().push(format!("write: {other:?}")),
                }
                match ctx
                    .sys(
                        "vfs_read",
                        vec![Value::from(handle.as_str()), Value::Int(16)],
                    )
                    .await
                {
                    Err(err) if err.status == Status::EndOfFile => {
                        log.lock().push("eof".into());
                    }
                    other => log.lock().push(format!("read: {other:?}")),
                }
                match ctx
                    .sys("vfs_close", vec![Value::from(handle.as_str())])
                    .await
                {
                    Ok(_) => log.lock().push("closed".into()),
                    Err(err) => log.lock().push(format!("close: {err}")),
                }
                0
            }
        });
        kernel
            .spawn(
                SpawnSpec::new("user", Ring::User, image).parent(vt_abi::Pid::INIT),
            )
            .unwrap()
            .pid
    };

    assert!(run_until(&kernel, 500_000, |k| k.process_is_dead(user)));
    assert_eq!(
        log.lock().as_slice(),
        &["wrote 3", "eof", "closed"],
        "dmesg: {:?}",
        kernel
            .dmesg()
            .read(None, 64, vt_kernel::LogLevel::Debug)
            .iter()
            .map(|e| e.message.clone())
            .collect::<Vec<_>>()
    );
}

/// Writes to `/dev/tty` land on the host console via the vtty driver.
#[test]
fn vtty_writes_reach_the_console() {
    let (host, kernel) = system_kernel();

    let user = {
        let image = program(|ctx| async move {
            let handle = match open_eventually(&ctx, "/dev/tty").await {
                Ok(handle) => handle,
                Err(_) => return 1,
            };
            let _ = ctx
                .sys(
                    "vfs_write",
                    vec![
                        Value::from(handle.as_str()),
                        Value::Bytes(b"hello console\n".to_vec()),
                    ],
                )
                .await;
            let _ = ctx
                .sys("vfs_close", vec![Value::from(handle.as_str())])
                .await;
            0
        });
        kernel
            .spawn(SpawnSpec::new("tty-user", Ring::User, image).parent(vt_abi::Pid::INIT))
            .unwrap()
            .pid
    };

    assert!(run_until(&kernel, 500_000, |k| k.process_is_dead(user)));
    assert!(
        host.console_lines()
            .iter()
            .any(|line| line.contains("hello console"))
    );
}

/// A driver that crashes mid-IRP fails the request with UNSUCCESSFUL and
/// is restarted by the supervisor; the device comes back.
#[test]
fn driver_crash_fails_irp_and_restarts() {
    let (builder, _fs) = VirtHost::builder().managed_fs([(
        "/etc/drivers.cfg",
        b"/drivers/crashy.sys\n".to_vec(),
    )]);
    let host = builder.build();

    let mut images = programs::standard_images();
    images.push((
        "/drivers/crashy.sys".to_string(),
        program(|ctx| async move {
            if ctx
                .sys(
                    "io_register_device",
                    vec![Value::from("crashy"), Value::from("crashy")],
                )
                .await
                .is_err()
            {
                return 1;
            }
            loop {
                let signal = match ctx.next_kernel_signal().await {
                    Ok(signal) => signal,
                    Err(_) => return 0,
                };
                if let vt_kernel::ipc::KernelSignal::IrpDispatch(irp) = signal {
                    match irp.major {
                        vt_abi::IrpMajor::Create => {
                            let _ = ctx
                                .sys(
                                    "io_complete_request",
                                    vec![Value::from(irp.id), Value::Int(0), Value::Null],
                                )
                                .await;
                        }
                        // Any write takes the whole driver down.
                        vt_abi::IrpMajor::Write => panic!("driver bug"),
                        _ => {
                            let _ = ctx
                                .sys(
                                    "io_complete_request",
                                    vec![
                                        Value::from(irp.id),
                                        Value::from(Status::NotImplemented.code()),
                                        Value::Null,
                                    ],
                                )
                                .await;
                        }
                    }
                }
                ctx.checkpoint().await;
            }
        }),
    ));
    let kernel = boot(host.clone(), images, true);
    assert!(run_until(&kernel, 10_000, |k| k.pipeline_manager().is_some()));

    let outcome: Arc<Spinlock<Vec<String>>> = Arc::new(Spinlock::new(Vec::new()));
    let user = {
        let outcome = outcome.clone();
        let image = program(move |ctx| {
            let outcome = outcome.clone();
            async move {
                let handle = match open_eventually(&ctx, "/dev/crashy").await {
                    Ok(handle) => handle,
                    Err(_) => return 1,
                };
                match ctx
                    .sys(
                        "vfs_write",
                        vec![Value::from(handle.as_str()), Value::Bytes(b"x".to_vec())],
                    )
                    .await
                {
                    Err(err) if err.status == Status::Unsuccessful => {
                        outcome.lock().push("write failed unsuccessful".into());
                    }
                    other => outcome.lock().push(format!("write: {other:?}")),
                }
                // The supervisor restarts the driver; a fresh open works
                // again once the device re-registers.
                match open_eventually(&ctx, "/dev/crashy").await {
                    Ok(_) => outcome.lock().push("reopened".into()),
                    Err(code) => outcome.lock().push(format!("reopen failed: {code}")),
                }
                0
            }
        });
        kernel
            .spawn(SpawnSpec::new("crash-user", Ring::User, image).parent(vt_abi::Pid::INIT))
            .unwrap()
            .pid
    };

    assert!(run_until(&kernel, 1_000_000, |k| k.process_is_dead(user)));
    assert_eq!(
        outcome.lock().as_slice(),
        &["write failed unsuccessful", "reopened"]
    );
}
