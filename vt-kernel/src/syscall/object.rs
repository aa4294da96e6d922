//! Object Manager syscalls (ring 0–1, plus the standard-handle slots).

use std::sync::Arc;

use vt_abi::{AccessMask, Status, SysError, Value};

use crate::ipc::{Event, MessageQueue, Mutex, Pipe, Section, Semaphore, Timer};
use crate::kernel::Kernel;
use crate::object::{IoDevice, IoFile, ObjectBody, ObjectId, StdSlot};

use super::{Caller, SysFuture, opt_bool, opt_int, want_pid, want_str, want_u64};

fn want_object_id(args: &[Value], i: usize) -> Result<ObjectId, SysError> {
    want_str(args, i).and_then(|s| {
        ObjectId::decode(&s).ok_or(SysError::with(Status::InvalidParameter, "bad object id"))
    })
}

fn body_from_spec(tag: &str, params: &Value) -> Result<ObjectBody, SysError> {
    Ok(match tag {
        "IpcEvent" => ObjectBody::IpcEvent(Event::new(
            params.get("bManualReset").as_bool().unwrap_or(false),
            params.get("bSignalled").as_bool().unwrap_or(false),
        )),
        "IpcMutex" => ObjectBody::IpcMutex(Mutex::new()),
        "IpcSemaphore" => {
            let max = params.get("nMax").as_int().unwrap_or(1).max(1) as u32;
            let initial = params.get("nInitial").as_int().unwrap_or(0).max(0) as u32;
            ObjectBody::IpcSemaphore(Semaphore::new(initial, max))
        }
        "IpcTimer" => ObjectBody::IpcTimer(Timer::new()),
        "IoPipe" => {
            let capacity = params
                .get("nCapacity")
                .as_int()
                .unwrap_or(vt_abi::DEFAULT_PIPE_CAPACITY as i64)
                .max(1) as usize;
            ObjectBody::IoPipe(Pipe::new(capacity))
        }
        "IpcMessageQueue" => {
            let capacity = params
                .get("nCapacity")
                .as_int()
                .unwrap_or(vt_abi::DEFAULT_QUEUE_CAPACITY as i64)
                .max(1) as usize;
            ObjectBody::IpcMessageQueue(MessageQueue::new(capacity))
        }
        "IpcSection" => {
            let size = params.get("nSize").as_int().unwrap_or(0).max(0) as usize;
            ObjectBody::IpcSection(Section::new(size))
        }
        "IoFile" => ObjectBody::IoFile(IoFile {
            device: params
                .get("sDevice")
                .as_str()
                .ok_or(SysError::with(Status::InvalidParameter, "sDevice required"))?
                .to_string(),
            context: params.get("vContext").clone(),
        }),
        "IoDevice" => ObjectBody::IoDevice(IoDevice {
            name: params
                .get("sName")
                .as_str()
                .ok_or(SysError::with(Status::InvalidParameter, "sName required"))?
                .to_string(),
            driver: vt_abi::Pid(params.get("nDriver").as_int().unwrap_or(0) as u64),
            interrupts: Vec::new(),
        }),
        other => {
            return Err(SysError::with(
                Status::InvalidDeviceType,
                format!("unknown object type {other}"),
            ));
        }
    })
}

pub fn sys_ob_create_object(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let tag = want_str(&args, 0)?;
        let params = args.get(1).cloned().unwrap_or(Value::Null);
        let body = body_from_spec(&tag, &params)?;
        let id = kernel.objects.lock().create(body);
        Ok(Value::Str(id.encode()))
    })
}

pub fn sys_ob_insert_object(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let id = want_object_id(&args, 0)?;
        let path = want_str(&args, 1)?;
        kernel.objects.lock().insert(id, &path)?;
        Ok(Value::Null)
    })
}

pub fn sys_ob_delete_object(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let freed = kernel.objects.lock().delete(&path)?;
        if let Some(freed) = freed {
            for waiter in freed.orphaned_waiters {
                kernel.wake_process(
                    waiter,
                    Err(SysError::with(Status::Unsuccessful, "object deleted")),
                );
            }
        }
        Ok(Value::Null)
    })
}

pub fn sys_ob_create_symlink(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let src = want_str(&args, 0)?;
        let target = want_str(&args, 1)?;
        kernel.objects.lock().create_symlink(&src, &target)?;
        Ok(Value::Null)
    })
}

pub fn sys_ob_create_handle(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let owner = want_pid(&args, 0)?;
        let id = want_object_id(&args, 1)?;
        let access = opt_int(&args, 2)
            .and_then(|bits| AccessMask::from_bits(bits as u32))
            .unwrap_or(AccessMask::ALL);
        let inheritable = opt_bool(&args, 3).unwrap_or(false);
        let token = kernel.create_handle(owner, id, access, inheritable)?;
        Ok(Value::Str(token))
    })
}

pub fn sys_ob_reference_by_handle(
    kernel: Arc<Kernel>,
    _caller: Caller,
    args: Vec<Value>,
) -> SysFuture {
    Box::pin(async move {
        let owner = want_pid(&args, 0)?;
        let token = want_str(&args, 1)?;
        let desired = opt_int(&args, 2)
            .and_then(|bits| AccessMask::from_bits(bits as u32))
            .unwrap_or(AccessMask::READ);
        let id = kernel.reference_by_handle(owner, &token, desired)?;
        let objects = kernel.objects.lock();
        let object = objects.get(id).ok_or(SysError::new(Status::InvalidHandle))?;
        let mut out = vec![
            ("sObjectId", Value::Str(id.encode())),
            ("sType", Value::from(object.body.tag())),
            ("nRefcount", Value::from(object.refcount() as i64)),
        ];
        if let ObjectBody::IoFile(file) = &object.body {
            out.push((
                "tFile",
                Value::map([
                    ("sDevice", Value::from(file.device.as_str())),
                    ("vContext", file.context.clone()),
                ]),
            ));
        }
        Ok(Value::map(out))
    })
}

pub fn sys_ob_close_handle(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let owner = want_pid(&args, 0)?;
        let token = want_str(&args, 1)?;
        kernel.close_handle(owner, &token)?;
        Ok(Value::Null)
    })
}

pub fn sys_ob_set_standard_handle(
    kernel: Arc<Kernel>,
    caller: Caller,
    args: Vec<Value>,
) -> SysFuture {
    Box::pin(async move {
        let slot = want_u64(&args, 0)?
            .try_into()
            .ok()
            .and_then(StdSlot::from_index)
            .ok_or(SysError::with(Status::InvalidParameter, "bad std slot"))?;
        let token = args.get(1).and_then(Value::as_str).map(str::to_string);
        if let Some(token) = &token {
            // The slot must alias a handle the caller actually owns.
            kernel.reference_by_handle(caller.pid, token, AccessMask::empty())?;
        }
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        process.handles.set_std(slot, token);
        Ok(Value::Null)
    })
}

pub fn sys_ob_get_standard_handle(
    kernel: Arc<Kernel>,
    caller: Caller,
    args: Vec<Value>,
) -> SysFuture {
    Box::pin(async move {
        let slot = want_u64(&args, 0)?
            .try_into()
            .ok()
            .and_then(StdSlot::from_index)
            .ok_or(SysError::with(Status::InvalidParameter, "bad std slot"))?;
        let procs = kernel.procs.lock();
        let process = procs
            .get(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        Ok(match process.handles.std(slot) {
            Some(token) => Value::from(token),
            None => Value::Null,
        })
    })
}

pub fn sys_ob_dump_directory(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let objects = kernel.objects.lock();
        let children = objects.namespace.children(&path);
        let mut out = Vec::new();
        for child in children {
            let full = vt_abi::path::join(&path, &child);
            let entry = match objects.namespace.get(&full).and_then(|id| objects.get(id)) {
                Some(object) => Value::map([
                    ("sName", Value::from(child.as_str())),
                    ("sType", Value::from(object.body.tag())),
                    ("nRefcount", Value::from(object.refcount() as i64)),
                ]),
                // Intermediate directory component with no object of its own.
                None => Value::map([
                    ("sName", Value::from(child.as_str())),
                    ("sType", Value::from("Directory")),
                ]),
            };
            out.push(entry);
        }
        Ok(Value::List(out))
    })
}
