//! I/O and driver-model syscalls.

use std::sync::Arc;

use vt_abi::{IrpMajor, Pid, Status, SysError, Value};

use crate::io::Irp;
use crate::ipc::KernelSignal;
use crate::kernel::Kernel;
use crate::object::{IoDevice, ObjectBody};
use crate::process::WaitReason;

use super::{Caller, SysFuture, opt_str, want_str, want_u64};

/// Register a device for the calling driver: an `IoDevice` object at
/// `\Device\<name>` plus an optional user-facing symlink under
/// `\DosDevices\dev\`.
pub fn sys_io_register_device(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let name = want_str(&args, 0)?;
        let alias = opt_str(&args, 1);
        let device_path = format!("\\Device\\{name}");

        {
            let mut objects = kernel.objects.lock();
            if objects.lookup(&device_path).is_some() {
                return Err(SysError::with(
                    Status::DeviceAlreadyExists,
                    format!("{device_path} exists"),
                ));
            }
            let id = objects.create(ObjectBody::IoDevice(IoDevice {
                name: name.clone(),
                driver: caller.pid,
                interrupts: Vec::new(),
            }));
            objects.insert(id, &device_path)?;
            if let Some(alias) = &alias {
                // A restarted driver may find its old symlink still in
                // place; replace it.
                let link_path = format!("\\DosDevices\\dev\\{alias}");
                if objects.namespace.get(&link_path).is_some() {
                    let _ = objects.delete(&link_path);
                }
                objects.create_symlink(&link_path, &device_path)?;
            }
        }

        kernel.kprint_pid(
            crate::logging::LogLevel::Info,
            caller.pid,
            format!("device {device_path} registered"),
        );
        Ok(Value::Str(device_path))
    })
}

/// Build and dispatch an IRP to the driver owning a device, parking the
/// caller until `io_complete_request`.
pub fn sys_io_dispatch_irp(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let device = want_str(&args, 0)?;
        let major = IrpMajor::from_number(want_u64(&args, 1)? as u32)
            .ok_or(SysError::with(Status::InvalidParameter, "bad major function"))?;
        let parameters = args.get(2).cloned().unwrap_or(Value::Null);
        let sender = args
            .get(3)
            .and_then(Value::as_int)
            .map(|n| Pid(n as u64))
            .unwrap_or(caller.pid);

        let driver = {
            let objects = kernel.objects.lock();
            let id = objects
                .lookup(&format!("\\Device\\{device}"))
                .ok_or(SysError::with(Status::NoSuchDevice, format!("no device {device}")))?;
            match objects.get(id).map(|o| &o.body) {
                Some(ObjectBody::IoDevice(dev)) => dev.driver,
                _ => return Err(SysError::new(Status::InvalidDeviceType)),
            }
        };

        // Driver must still be alive to service the packet.
        let driver_alive = kernel
            .procs
            .lock()
            .get(driver)
            .map(|p| p.is_alive())
            .unwrap_or(false);
        if !driver_alive {
            return Err(SysError::with(Status::Unsuccessful, "driver not running"));
        }

        let id = kernel.irps.lock().dispatch(caller.pid, driver);
        let irp = Irp {
            id,
            device,
            major,
            sender,
            parameters,
        };
        kernel.push_ksignal(driver, KernelSignal::IrpDispatch(irp));

        let park = kernel.park(caller.pid, WaitReason::Syscall, None);
        park.await
    })
}

/// Complete an IRP: wakes the parked initiator with the io-status slot.
pub fn sys_io_complete_request(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let irp_id = want_u64(&args, 0)?;
        let status = want_u64(&args, 1)? as u32;
        let information = args.get(2).cloned().unwrap_or(Value::Null);

        let initiator = kernel
            .irps
            .lock()
            .complete(irp_id, caller.pid)
            .map_err(|status| match status {
                Status::AccessDenied => {
                    SysError::with(Status::AccessDenied, "irp belongs to another driver")
                }
                _ => SysError::with(Status::InvalidParameter, "unknown or completed irp"),
            })?;

        kernel.wake_process(
            initiator,
            Ok(Value::map([
                ("nStatus", Value::from(status)),
                ("vInformation", information),
            ])),
        );
        Ok(Value::Null)
    })
}

/// Resolve a user-facing `/dev/<alias>` path (or a bare device leaf) to
/// the owning `\Device` leaf name, following the DosDevices symlink.
pub fn sys_io_resolve_device(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let object_path = if let Some(alias) = path.strip_prefix("/dev/") {
            format!("\\DosDevices\\dev\\{alias}")
        } else if path.starts_with('\\') {
            path.clone()
        } else {
            format!("\\Device\\{path}")
        };

        let objects = kernel.objects.lock();
        let id = objects
            .lookup(&object_path)
            .ok_or(SysError::with(Status::NoSuchDevice, format!("no device at {path}")))?;
        match objects.get(id).map(|o| &o.body) {
            Some(ObjectBody::IoDevice(dev)) => Ok(Value::map([
                ("sDevice", Value::from(dev.name.as_str())),
                ("nDriver", Value::from(dev.driver)),
            ])),
            _ => Err(SysError::new(Status::InvalidDeviceType)),
        }
    })
}

/// Subscribe one of the caller's devices to a host event kind.
pub fn sys_io_subscribe_interrupt(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let device = want_str(&args, 0)?;
        let kind = want_str(&args, 1)?;
        let mut objects = kernel.objects.lock();
        let id = objects
            .lookup(&format!("\\Device\\{device}"))
            .ok_or(SysError::new(Status::NoSuchDevice))?;
        match objects.get_mut(id).map(|o| &mut o.body) {
            Some(ObjectBody::IoDevice(dev)) => {
                if dev.driver != caller.pid {
                    return Err(SysError::with(
                        Status::AccessDenied,
                        "device belongs to another driver",
                    ));
                }
                if !dev.interrupts.contains(&kind) {
                    dev.interrupts.push(kind);
                }
                Ok(Value::Null)
            }
            _ => Err(SysError::new(Status::InvalidDeviceType)),
        }
    })
}

/// The interrupt routing table, for the Pipeline Manager's event loop.
pub fn sys_io_interrupt_routes(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let objects = kernel.objects.lock();
        let mut routes = Vec::new();
        for (path, id) in objects.namespace.iter() {
            if let Some(ObjectBody::IoDevice(dev)) = objects.get(id).map(|o| &o.body) {
                for kind in &dev.interrupts {
                    routes.push(Value::map([
                        ("sKind", Value::from(kind.as_str())),
                        ("sDevice", Value::from(path)),
                        ("nDriver", Value::from(dev.driver)),
                    ]));
                }
            }
        }
        Ok(Value::List(routes))
    })
}

/// Forward a matching host event to a driver as a hardware interrupt.
pub fn sys_io_raise_interrupt(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let driver = Pid(want_u64(&args, 0)?);
        let event = args.get(1).cloned().unwrap_or(Value::Null);
        kernel.push_ksignal(driver, KernelSignal::HardwareInterrupt { event });
        Ok(Value::Null)
    })
}
