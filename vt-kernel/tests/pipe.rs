//! Pipes between processes.

mod common;

use std::sync::Arc;

use spinning_top::Spinlock;
use vt_abi::{Ring, Status, Value};

use common::{bare, run_until_dead, seed_boot_processes, spawn};

/// Two ring 3 processes share a named pipe: A writes `ABCDE` and closes;
/// B reads 5 bytes, then hits end-of-file.
#[test]
fn pipe_between_two_processes() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let a = spawn(&kernel, "pipe-a", Ring::User, None, |ctx| async move {
        let p = match ctx
            .sys("ke_create_named_pipe", vec![Value::from("t"), Value::Int(64)])
            .await
        {
            Ok(Value::Str(token)) => token,
            _ => return 1,
        };
        ctx.sys(
            "ke_pipe_write",
            vec![Value::from(p.as_str()), Value::Bytes(b"ABCDE".to_vec())],
        )
        .await
        .unwrap();
        ctx.sys("ke_pipe_close", vec![Value::from(p.as_str())])
            .await
            .unwrap();
        0
    });

    let results: Arc<Spinlock<Vec<Result<Vec<u8>, u32>>>> = Arc::new(Spinlock::new(Vec::new()));
    let b = {
        let results = results.clone();
        spawn(&kernel, "pipe-b", Ring::User, None, move |ctx| {
            let results = results.clone();
            async move {
                let p = match ctx
                    .sys("ke_create_named_pipe", vec![Value::from("t"), Value::Int(64)])
                    .await
                {
                    Ok(Value::Str(token)) => token,
                    _ => return 1,
                };
                for n in [5i64, 1] {
                    let read = ctx
                        .sys(
                            "ke_pipe_read",
                            vec![Value::from(p.as_str()), Value::Int(n)],
                        )
                        .await;
                    results.lock().push(match read {
                        Ok(Value::Bytes(data)) => Ok(data),
                        Ok(other) => panic!("unexpected read result {other}"),
                        Err(err) => Err(err.code()),
                    });
                }
                0
            }
        })
    };

    assert!(run_until_dead(&kernel, a));
    assert!(run_until_dead(&kernel, b));

    let results = results.lock();
    assert_eq!(results.len(), 2);
    assert_eq!(results[0], Ok(b"ABCDE".to_vec()));
    assert_eq!(results[1], Err(Status::EndOfFile.code()));
}

/// `write(s) ; read(|s|)` reproduces `s` exactly for payloads up to the
/// capacity, and a reader parked on an empty pipe is woken by the write.
#[test]
fn pipe_round_trip_and_blocking_read() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let got: Arc<Spinlock<Vec<u8>>> = Arc::new(Spinlock::new(Vec::new()));
    let reader = {
        let got = got.clone();
        spawn(&kernel, "reader", Ring::User, None, move |ctx| {
            let got = got.clone();
            async move {
                let p = match ctx
                    .sys(
                        "ke_create_named_pipe",
                        vec![Value::from("blk"), Value::Int(32)],
                    )
                    .await
                {
                    Ok(Value::Str(token)) => token,
                    _ => return 1,
                };
                // Blocks until the writer shows up.
                let data = ctx
                    .sys("ke_pipe_read", vec![Value::from(p.as_str()), Value::Int(32)])
                    .await
                    .unwrap();
                got.lock().extend(data.as_bytes().unwrap_or(&[]));
                0
            }
        })
    };

    // Let the reader park first.
    vt_kernel::run_until(&kernel, 100, |k| {
        k.process_status(reader) == Some(vt_kernel::process::ProcessStatus::Sleeping)
    });

    let writer = spawn(&kernel, "writer", Ring::User, None, |ctx| async move {
        let p = match ctx
            .sys(
                "ke_create_named_pipe",
                vec![Value::from("blk"), Value::Int(32)],
            )
            .await
        {
            Ok(Value::Str(token)) => token,
            _ => return 1,
        };
        match ctx
            .sys(
                "ke_pipe_write",
                vec![
                    Value::from(p.as_str()),
                    Value::Bytes(b"payload".to_vec()),
                ],
            )
            .await
        {
            Ok(Value::Int(7)) => 0,
            other => panic!("write: {other:?}"),
        }
    });

    assert!(run_until_dead(&kernel, writer));
    assert!(run_until_dead(&kernel, reader));
    assert_eq!(got.lock().as_slice(), b"payload");
}

/// A writer blocks on a full pipe until a reader drains it.
#[test]
fn pipe_write_blocks_when_full() {
    let (_host, kernel) = bare();
    seed_boot_processes(&kernel);

    let writer = spawn(&kernel, "writer", Ring::User, None, |ctx| async move {
        let p = match ctx
            .sys(
                "ke_create_named_pipe",
                vec![Value::from("full"), Value::Int(4)],
            )
            .await
        {
            Ok(Value::Str(token)) => token,
            _ => return 1,
        };
        // 8 bytes into a 4-byte pipe: blocks halfway.
        match ctx
            .sys(
                "ke_pipe_write",
                vec![Value::from(p.as_str()), Value::Bytes(b"12345678".to_vec())],
            )
            .await
        {
            Ok(Value::Int(8)) => 0,
            other => panic!("write: {other:?}"),
        }
    });

    vt_kernel::run_until(&kernel, 100, |k| {
        k.process_status(writer) == Some(vt_kernel::process::ProcessStatus::Sleeping)
    });
    assert!(!kernel.process_is_dead(writer), "writer should be parked");

    let drained: Arc<Spinlock<Vec<u8>>> = Arc::new(Spinlock::new(Vec::new()));
    let reader = {
        let drained = drained.clone();
        spawn(&kernel, "reader", Ring::User, None, move |ctx| {
            let drained = drained.clone();
            async move {
                let p = match ctx
                    .sys(
                        "ke_create_named_pipe",
                        vec![Value::from("full"), Value::Int(4)],
                    )
                    .await
                {
                    Ok(Value::Str(token)) => token,
                    _ => return 1,
                };
                while drained.lock().len() < 8 {
                    let data = ctx
                        .sys("ke_pipe_read", vec![Value::from(p.as_str()), Value::Int(8)])
                        .await
                        .unwrap();
                    drained.lock().extend(data.as_bytes().unwrap_or(&[]));
                }
                0
            }
        })
    };

    assert!(run_until_dead(&kernel, writer));
    assert!(run_until_dead(&kernel, reader));
    assert_eq!(drained.lock().as_slice(), b"12345678");
}
