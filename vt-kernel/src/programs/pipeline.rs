//! The Pipeline Manager: ring 1 owner of the VFS and the IRP pipeline.
//!
//! Claims the VFS syscall surface through overrides, resolves user-facing
//! device paths, turns VFS calls into IRPs, and forwards host events to
//! subscribed drivers as hardware interrupts. Driver loading is delegated
//! to the DKMS supervisor over the `\Mqueue\dkms` queue.

use std::sync::Arc;

use vt_abi::{AccessMask, IrpMajor, Pid, Status, SysError, SysResult, Value};

use crate::ipc::KernelSignal;
use crate::sandbox::{Program, Sandbox, program};

const VFS_SURFACE: &[&str] = &[
    "vfs_open",
    "vfs_read",
    "vfs_write",
    "vfs_close",
    "vfs_list",
    "vfs_delete",
    "vfs_mkdir",
    "vfs_chmod",
    "vfs_device_control",
    "driver_load",
];

pub fn image() -> Arc<dyn Program> {
    program(run)
}

async fn run(ctx: Sandbox) -> i64 {
    for name in VFS_SURFACE {
        if ctx
            .sys("svc_register_override", vec![Value::from(*name)])
            .await
            .is_err()
        {
            return 1;
        }
    }

    // The DKMS request queue exists before the supervisor starts, so
    // driver_load can never race it.
    let dkms_queue = match ctx
        .sys("ke_create_mqueue", vec![Value::from("dkms"), Value::Int(16)])
        .await
    {
        Ok(Value::Str(token)) => token,
        _ => return 1,
    };
    let _ = ctx
        .sys(
            "process_spawn",
            vec![Value::from("/sys/dkms"), Value::Float(1.0)],
        )
        .await;

    // Boot-time driver list, handed down from init's environment.
    if let Some(list) = ctx.env().get("drivers").cloned() {
        for path in list.split(',').filter(|p| !p.is_empty()) {
            let _ = ctx
                .sys(
                    "ke_mq_send",
                    vec![
                        Value::from(dkms_queue.as_str()),
                        Value::Int(0),
                        Value::map([("sPath", Value::from(path))]),
                    ],
                )
                .await;
        }
    }

    loop {
        let signal = match ctx.next_kernel_signal().await {
            Ok(signal) => signal,
            Err(_) => return 0,
        };
        match signal {
            KernelSignal::Syscall {
                seq,
                caller,
                name,
                args,
                ..
            } => {
                let result = handle_vfs(&ctx, caller, &name, &args, &dkms_queue).await;
                reply(&ctx, seq, result).await;
            }
            KernelSignal::HostEvent { event } => route_event(&ctx, &event).await,
            _ => {}
        }
        ctx.checkpoint().await;
    }
}

async fn reply(ctx: &Sandbox, seq: u64, result: SysResult) {
    let args = match result {
        Ok(value) => vec![Value::from(seq), value],
        Err(err) => vec![
            Value::from(seq),
            Value::Null,
            Value::Str(err.to_string()),
            Value::from(err.code()),
        ],
    };
    let _ = ctx.sys("svc_syscall_return", args).await;
}

async fn handle_vfs(
    ctx: &Sandbox,
    caller: Pid,
    name: &str,
    args: &[Value],
    dkms_queue: &str,
) -> SysResult {
    match name {
        "vfs_open" => vfs_open(ctx, caller, args).await,
        "vfs_read" => vfs_read(ctx, caller, args).await,
        "vfs_write" => vfs_write(ctx, caller, args).await,
        "vfs_close" => vfs_close(ctx, caller, args).await,
        "vfs_device_control" => vfs_device_control(ctx, caller, args).await,
        "driver_load" => driver_load(ctx, args, dkms_queue).await,
        // Directory-level operations need a filesystem driver, which this
        // deployment does not carry.
        _ => Err(SysError::new(Status::NotImplemented)),
    }
}

fn str_arg(args: &[Value], i: usize) -> SysResult<String> {
    args.get(i)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or(SysError::new(Status::InvalidParameter))
}

/// Dispatch one IRP and unwrap its io-status slot.
async fn roundtrip(
    ctx: &Sandbox,
    device: &str,
    major: IrpMajor,
    parameters: Value,
    caller: Pid,
) -> SysResult {
    let completion = ctx
        .sys(
            "io_dispatch_irp",
            vec![
                Value::from(device),
                Value::from(major.number()),
                parameters,
                Value::from(caller),
            ],
        )
        .await?;
    let status = completion.get("nStatus").as_int().unwrap_or(300) as u32;
    match Status::from_code(status) {
        Some(Status::Success) => Ok(completion.get("vInformation").clone()),
        Some(status) => Err(SysError::new(status)),
        None => Err(SysError::new(Status::Unsuccessful)),
    }
}

async fn resolve_device(ctx: &Sandbox, path: &str) -> SysResult<String> {
    let resolved = ctx
        .sys("io_resolve_device", vec![Value::from(path)])
        .await?;
    resolved
        .get("sDevice")
        .as_str()
        .map(str::to_string)
        .ok_or(SysError::new(Status::NoSuchDevice))
}

/// Look up the caller's file handle: `(device, per-open context)`.
async fn file_of(ctx: &Sandbox, caller: Pid, token: &str, desired: AccessMask) -> SysResult<(String, Value)> {
    let info = ctx
        .sys(
            "ob_reference_by_handle",
            vec![
                Value::from(caller),
                Value::from(token),
                Value::from(desired.bits()),
            ],
        )
        .await?;
    let file = info.get("tFile");
    match file.get("sDevice").as_str() {
        Some(device) => Ok((device.to_string(), file.get("vContext").clone())),
        None => Err(SysError::new(Status::InvalidHandle)),
    }
}

async fn vfs_open(ctx: &Sandbox, caller: Pid, args: &[Value]) -> SysResult {
    let path = str_arg(args, 0)?;
    let mode = args.get(1).cloned().unwrap_or(Value::Null);
    let device = resolve_device(ctx, &path).await?;

    let context = roundtrip(
        ctx,
        &device,
        IrpMajor::Create,
        Value::map([("sPath", Value::from(path.as_str())), ("vMode", mode)]),
        caller,
    )
    .await?;

    let object = ctx
        .sys(
            "ob_create_object",
            vec![
                Value::from("IoFile"),
                Value::map([
                    ("sDevice", Value::from(device.as_str())),
                    ("vContext", context),
                ]),
            ],
        )
        .await?;
    ctx.sys(
        "ob_create_handle",
        vec![
            Value::from(caller),
            object,
            Value::from(AccessMask::RW.bits()),
            Value::Bool(false),
        ],
    )
    .await
}

async fn vfs_read(ctx: &Sandbox, caller: Pid, args: &[Value]) -> SysResult {
    let token = str_arg(args, 0)?;
    let length = args.get(1).and_then(Value::as_int).unwrap_or(0).max(0);
    let (device, context) = file_of(ctx, caller, &token, AccessMask::READ).await?;
    roundtrip(
        ctx,
        &device,
        IrpMajor::Read,
        Value::map([("nLength", Value::Int(length)), ("vContext", context)]),
        caller,
    )
    .await
}

async fn vfs_write(ctx: &Sandbox, caller: Pid, args: &[Value]) -> SysResult {
    let token = str_arg(args, 0)?;
    let buffer = args.get(1).cloned().unwrap_or(Value::Null);
    let (device, context) = file_of(ctx, caller, &token, AccessMask::WRITE).await?;
    roundtrip(
        ctx,
        &device,
        IrpMajor::Write,
        Value::map([("vBuffer", buffer), ("vContext", context)]),
        caller,
    )
    .await
}

async fn vfs_close(ctx: &Sandbox, caller: Pid, args: &[Value]) -> SysResult {
    let token = str_arg(args, 0)?;
    let (device, context) = file_of(ctx, caller, &token, AccessMask::empty()).await?;
    let _ = roundtrip(
        ctx,
        &device,
        IrpMajor::Close,
        Value::map([("vContext", context)]),
        caller,
    )
    .await;
    ctx.sys(
        "ob_close_handle",
        vec![Value::from(caller), Value::from(token)],
    )
    .await
}

async fn vfs_device_control(ctx: &Sandbox, caller: Pid, args: &[Value]) -> SysResult {
    let token = str_arg(args, 0)?;
    let code = args.get(1).and_then(Value::as_int).unwrap_or(0);
    let argument = args.get(2).cloned().unwrap_or(Value::Null);
    let (device, context) = file_of(ctx, caller, &token, AccessMask::CONTROL).await?;
    roundtrip(
        ctx,
        &device,
        IrpMajor::DeviceControl,
        Value::map([
            ("nCode", Value::Int(code)),
            ("vArgument", argument),
            ("vContext", context),
        ]),
        caller,
    )
    .await
}

/// Queue a load request for the DKMS supervisor. The load completes
/// asynchronously; the driver announces itself by registering devices.
async fn driver_load(ctx: &Sandbox, args: &[Value], dkms_queue: &str) -> SysResult {
    let path = str_arg(args, 0)?;
    ctx.sys(
        "ke_mq_send",
        vec![
            Value::from(dkms_queue),
            Value::Int(0),
            Value::map([("sPath", Value::from(path.as_str()))]),
        ],
    )
    .await?;
    Ok(Value::Bool(true))
}

/// Forward a host event to every driver whose device subscribed to its
/// kind.
async fn route_event(ctx: &Sandbox, event: &Value) {
    let Some(kind) = event.as_list().and_then(|l| l.first()).and_then(Value::as_str) else {
        return;
    };
    let Ok(routes) = ctx.sys("io_interrupt_routes", vec![]).await else {
        return;
    };
    let Some(routes) = routes.as_list() else {
        return;
    };
    for route in routes {
        if route.get("sKind").as_str() == Some(kind) {
            if let Some(driver) = route.get("nDriver").as_int() {
                let _ = ctx
                    .sys(
                        "io_raise_interrupt",
                        vec![Value::Int(driver), event.clone()],
                    )
                    .await;
            }
        }
    }
}
