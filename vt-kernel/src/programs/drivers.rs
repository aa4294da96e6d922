//! Demo drivers.
//!
//! `null`: accepts everything, reads as end-of-file. `vtty`: a write-only
//! console device backed by the raw host screen (the driver runs at
//! ring 2 and therefore holds platform capabilities).

use std::sync::Arc;

use vt_abi::{IrpMajor, Status, Value};

use crate::io::Irp;
use crate::ipc::KernelSignal;
use crate::sandbox::{Program, Sandbox, program};

pub fn null_image() -> Arc<dyn Program> {
    program(|ctx| async move { run_null(ctx).await })
}

pub fn vtty_image() -> Arc<dyn Program> {
    program(|ctx| async move { run_vtty(ctx).await })
}

async fn complete(ctx: &Sandbox, irp: &Irp, status: Status, information: Value) {
    let _ = ctx
        .sys(
            "io_complete_request",
            vec![
                Value::from(irp.id),
                Value::from(status.code()),
                information,
            ],
        )
        .await;
}

async fn run_null(ctx: Sandbox) -> i64 {
    if ctx
        .sys(
            "io_register_device",
            vec![Value::from("null"), Value::from("null")],
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
        if let KernelSignal::IrpDispatch(irp) = signal {
            match irp.major {
                IrpMajor::Create | IrpMajor::Close => {
                    complete(&ctx, &irp, Status::Success, Value::Null).await;
                }
                IrpMajor::Read => {
                    complete(&ctx, &irp, Status::EndOfFile, Value::Null).await;
                }
                IrpMajor::Write => {
                    let written = irp
                        .parameters
                        .get("vBuffer")
                        .as_bytes()
                        .map(<[u8]>::len)
                        .unwrap_or(0);
                    complete(&ctx, &irp, Status::Success, Value::from(written)).await;
                }
                IrpMajor::DeviceControl => {
                    complete(&ctx, &irp, Status::NotImplemented, Value::Null).await;
                }
            }
        }
        ctx.checkpoint().await;
    }
}

async fn run_vtty(ctx: Sandbox) -> i64 {
    if ctx
        .sys(
            "io_register_device",
            vec![Value::from("vtty0"), Value::from("tty")],
        )
        .await
        .is_err()
    {
        return 1;
    }
    // Keyboard events arrive as hardware interrupts.
    let _ = ctx
        .sys(
            "io_subscribe_interrupt",
            vec![Value::from("vtty0"), Value::from("key_down")],
        )
        .await;

    loop {
        let signal = match ctx.next_kernel_signal().await {
            Ok(signal) => signal,
            Err(_) => return 0,
        };
        match signal {
            KernelSignal::IrpDispatch(irp) => match irp.major {
                IrpMajor::Create | IrpMajor::Close => {
                    complete(&ctx, &irp, Status::Success, Value::Null).await;
                }
                IrpMajor::Write => {
                    let buffer = irp.parameters.get("vBuffer").clone();
                    let text = match &buffer {
                        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
                        Value::Str(s) => s.clone(),
                        _ => String::new(),
                    };
                    if let Some(platform) = ctx.platform() {
                        platform.console_write(text.trim_end_matches('\n'));
                    }
                    complete(&ctx, &irp, Status::Success, Value::from(text.len())).await;
                }
                IrpMajor::Read => {
                    complete(&ctx, &irp, Status::EndOfFile, Value::Null).await;
                }
                IrpMajor::DeviceControl => {
                    complete(&ctx, &irp, Status::NotImplemented, Value::Null).await;
                }
            },
            KernelSignal::HardwareInterrupt { event } => {
                log::debug!("vtty0 interrupt: {event}");
            }
            _ => {}
        }
        ctx.checkpoint().await;
    }
}
