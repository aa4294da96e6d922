//! IPC syscalls.
//!
//! Creation returns a handle token. Waitable acquisition (events, mutexes,
//! semaphores, timers) goes through the wait engine so the consume step is
//! atomic with waiter selection; pipes and message queues use retry-parking
//! with FIFO wake order.

use std::sync::Arc;

use vt_abi::{AccessMask, Irql, Pid, Signal, Status, SysError, SysResult, Value};

use crate::ipc::signal::Disposition;
use crate::ipc::{Event, MessageQueue, Mutex, Pipe, PipeRead, Section, Semaphore, Timer};
use crate::kernel::Kernel;
use crate::object::{ObjectBody, ObjectId, WaitMode};
use crate::process::WaitReason;

use super::{Caller, SysFuture, opt_int, opt_str, want_bytes, want_int, want_str, want_u64};

// =============================================================================
// Shared plumbing
// =============================================================================

fn resolve(kernel: &Kernel, caller: &Caller, token: &str, desired: AccessMask) -> SysResult<ObjectId> {
    kernel.reference_by_handle(caller.pid, token, desired)
}

/// Create an anonymous or named object and hand the caller a handle.
///
/// Named creation is create-or-open: if the path already holds an object
/// of the same type, the caller gets a handle to the existing one.
fn create_with_handle(
    kernel: &Arc<Kernel>,
    caller: &Caller,
    name: Option<String>,
    body: ObjectBody,
) -> SysResult<Value> {
    let id = {
        let mut objects = kernel.objects.lock();
        match &name {
            Some(path) => match objects.lookup(path) {
                Some(existing) => {
                    let tag = objects
                        .get(existing)
                        .map(|o| o.body.tag())
                        .unwrap_or("gone");
                    if tag != body.tag() {
                        return Err(SysError::with(
                            Status::DeviceAlreadyExists,
                            format!("{path} holds a {tag}"),
                        ));
                    }
                    existing
                }
                None => {
                    let id = objects.create(body);
                    if let Err(err) = objects.insert(id, path) {
                        objects.discard(id);
                        return Err(err);
                    }
                    id
                }
            },
            None => objects.create(body),
        }
    };
    let token = kernel.create_handle(caller.pid, id, AccessMask::ALL, false)?;
    Ok(Value::Str(token))
}

/// Run the wait-engine completions produced while the object lock was
/// held, then the body-specific retry wakes.
fn apply_signal(kernel: &Arc<Kernel>, id: ObjectId) {
    let completions = kernel.objects.lock().signal_object(id);
    kernel.apply_wait_completions(completions);
}

fn irql_may_sleep(kernel: &Kernel, pid: Pid) -> SysResult<()> {
    let procs = kernel.procs.lock();
    let irql = procs.get(pid).map(|p| p.irql).unwrap_or(Irql::Passive);
    if irql.may_sleep() {
        Ok(())
    } else {
        Err(SysError::with(
            Status::Unsuccessful,
            "cannot sleep at or above dispatch level",
        ))
    }
}

// =============================================================================
// Creators
// =============================================================================

pub fn sys_ke_create_event(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let manual = args.first().and_then(Value::as_bool).unwrap_or(false);
        let signalled = args.get(1).and_then(Value::as_bool).unwrap_or(false);
        let name = opt_str(&args, 2);
        create_with_handle(
            &kernel,
            &caller,
            name,
            ObjectBody::IpcEvent(Event::new(manual, signalled)),
        )
    })
}

pub fn sys_ke_create_mutex(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let name = opt_str(&args, 0);
        create_with_handle(&kernel, &caller, name, ObjectBody::IpcMutex(Mutex::new()))
    })
}

pub fn sys_ke_create_semaphore(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let initial = want_int(&args, 0)?.max(0) as u32;
        let max = want_int(&args, 1)?.max(1) as u32;
        let name = opt_str(&args, 2);
        create_with_handle(
            &kernel,
            &caller,
            name,
            ObjectBody::IpcSemaphore(Semaphore::new(initial, max)),
        )
    })
}

pub fn sys_ke_create_timer(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let name = opt_str(&args, 0);
        create_with_handle(&kernel, &caller, name, ObjectBody::IpcTimer(Timer::new()))
    })
}

pub fn sys_ke_create_pipe(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let capacity = opt_int(&args, 0)
            .unwrap_or(vt_abi::DEFAULT_PIPE_CAPACITY as i64)
            .max(1) as usize;
        create_with_handle(
            &kernel,
            &caller,
            None,
            ObjectBody::IoPipe(Pipe::new(capacity)),
        )
    })
}

pub fn sys_ke_create_named_pipe(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let leaf = want_str(&args, 0)?;
        let capacity = opt_int(&args, 1)
            .unwrap_or(vt_abi::DEFAULT_PIPE_CAPACITY as i64)
            .max(1) as usize;
        create_with_handle(
            &kernel,
            &caller,
            Some(format!("\\Pipe\\{leaf}")),
            ObjectBody::IoPipe(Pipe::new(capacity)),
        )
    })
}

pub fn sys_ke_create_section(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let leaf = want_str(&args, 0)?;
        let size = want_int(&args, 1)?.max(0) as usize;
        create_with_handle(
            &kernel,
            &caller,
            Some(format!("\\Section\\{leaf}")),
            ObjectBody::IpcSection(Section::new(size)),
        )
    })
}

pub fn sys_ke_create_mqueue(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let leaf = opt_str(&args, 0);
        let capacity = opt_int(&args, 1)
            .unwrap_or(vt_abi::DEFAULT_QUEUE_CAPACITY as i64)
            .max(1) as usize;
        create_with_handle(
            &kernel,
            &caller,
            leaf.map(|l| format!("\\Mqueue\\{l}")),
            ObjectBody::IpcMessageQueue(MessageQueue::new(capacity)),
        )
    })
}

/// Close one of the caller's own handles.
pub fn sys_ke_close_handle(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        kernel.close_handle(caller.pid, &token)?;
        Ok(Value::Null)
    })
}

/// Open any named object by canonical path.
pub fn sys_ke_open_named(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let id = kernel
            .objects
            .lock()
            .lookup(&path)
            .ok_or(SysError::with(Status::NoSuchFile, format!("no object at {path}")))?;
        let token = kernel.create_handle(caller.pid, id, AccessMask::ALL, false)?;
        Ok(Value::Str(token))
    })
}

// =============================================================================
// Events
// =============================================================================

fn with_event<R>(
    kernel: &Kernel,
    id: ObjectId,
    f: impl FnOnce(&mut Event) -> R,
) -> SysResult<R> {
    let mut objects = kernel.objects.lock();
    match objects.get_mut(id).map(|o| &mut o.body) {
        Some(ObjectBody::IpcEvent(event)) => Ok(f(event)),
        Some(_) => Err(SysError::with(Status::InvalidHandle, "not an event")),
        None => Err(SysError::new(Status::InvalidHandle)),
    }
}

pub fn sys_ke_set_event(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        with_event(&kernel, id, |e| e.set())?;
        apply_signal(&kernel, id);
        Ok(Value::Null)
    })
}

pub fn sys_ke_reset_event(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        with_event(&kernel, id, |e| e.reset())?;
        Ok(Value::Null)
    })
}

/// Wake current waiters without leaving the event signalled.
pub fn sys_ke_pulse_event(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        let completions = {
            let mut objects = kernel.objects.lock();
            match objects.get_mut(id).map(|o| &mut o.body) {
                Some(ObjectBody::IpcEvent(event)) => event.set(),
                Some(_) => return Err(SysError::with(Status::InvalidHandle, "not an event")),
                None => return Err(SysError::new(Status::InvalidHandle)),
            }
            let completions = objects.signal_object(id);
            if let Some(ObjectBody::IpcEvent(event)) =
                objects.get_mut(id).map(|o| &mut o.body)
            {
                event.reset();
            }
            completions
        };
        kernel.apply_wait_completions(completions);
        Ok(Value::Null)
    })
}

// =============================================================================
// Mutexes and semaphores
// =============================================================================

pub fn sys_ke_release_mutex(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        let freed = {
            let mut objects = kernel.objects.lock();
            match objects.get_mut(id).map(|o| &mut o.body) {
                Some(ObjectBody::IpcMutex(mutex)) => mutex.release(caller.pid)?,
                Some(_) => return Err(SysError::with(Status::InvalidHandle, "not a mutex")),
                None => return Err(SysError::new(Status::InvalidHandle)),
            }
        };
        if freed {
            apply_signal(&kernel, id);
        }
        Ok(Value::Null)
    })
}

pub fn sys_ke_release_semaphore(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let n = opt_int(&args, 1).unwrap_or(1).max(0) as u32;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        let added = {
            let mut objects = kernel.objects.lock();
            match objects.get_mut(id).map(|o| &mut o.body) {
                Some(ObjectBody::IpcSemaphore(sem)) => sem.release(n),
                Some(_) => return Err(SysError::with(Status::InvalidHandle, "not a semaphore")),
                None => return Err(SysError::new(Status::InvalidHandle)),
            }
        };
        if added > 0 {
            apply_signal(&kernel, id);
        }
        Ok(Value::from(added))
    })
}

// =============================================================================
// Timers
// =============================================================================

pub fn sys_ke_set_timer(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let due = want_int(&args, 1)?;
        let period = opt_int(&args, 2).unwrap_or(0).max(0) as u64;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;

        // Negative due times are relative to now, in milliseconds;
        // non-negative are absolute uptime deadlines.
        let deadline = if due < 0 {
            kernel.now_ms() + due.unsigned_abs()
        } else {
            due as u64
        };

        let mut objects = kernel.objects.lock();
        match objects.get_mut(id).map(|o| &mut o.body) {
            Some(ObjectBody::IpcTimer(timer)) => {
                timer.set(deadline, period);
                Ok(Value::from(deadline))
            }
            Some(_) => Err(SysError::with(Status::InvalidHandle, "not a timer")),
            None => Err(SysError::new(Status::InvalidHandle)),
        }
    })
}

pub fn sys_ke_cancel_timer(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::CONTROL)?;
        let mut objects = kernel.objects.lock();
        match objects.get_mut(id).map(|o| &mut o.body) {
            Some(ObjectBody::IpcTimer(timer)) => {
                timer.cancel();
                Ok(Value::Null)
            }
            Some(_) => Err(SysError::with(Status::InvalidHandle, "not a timer")),
            None => Err(SysError::new(Status::InvalidHandle)),
        }
    })
}

// =============================================================================
// Waits
// =============================================================================

async fn wait_on(
    kernel: Arc<Kernel>,
    caller: Caller,
    tokens: Vec<String>,
    mode: WaitMode,
    timeout_ms: Option<u64>,
) -> SysResult {
    irql_may_sleep(&kernel, caller.pid)?;

    let mut ids = Vec::with_capacity(tokens.len());
    for token in &tokens {
        ids.push(resolve(&kernel, &caller, token, AccessMask::WAIT)?);
    }
    if ids.is_empty() {
        return Err(SysError::with(Status::InvalidParameter, "empty wait set"));
    }

    // Evaluate-and-consume without parking when possible.
    {
        let mut objects = kernel.objects.lock();
        if let Some(index) = objects.try_wait(caller.pid, &ids, mode)? {
            return Ok(Value::Int(index as i64));
        }
        objects.register_wait(caller.pid, ids, mode);
    }

    let deadline = timeout_ms.map(|t| kernel.now_ms() + t);
    let park = kernel.park(caller.pid, WaitReason::IpcWait, deadline);
    park.await
}

pub fn sys_ke_wait_single(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let timeout = opt_int(&args, 1).map(|t| t.max(0) as u64);
        wait_on(kernel, caller, vec![token], WaitMode::Any, timeout).await
    })
}

pub fn sys_ke_wait_multiple(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let handles = args
            .first()
            .and_then(Value::as_list)
            .ok_or(SysError::with(Status::InvalidParameter, "handle list expected"))?;
        let tokens: Vec<String> = handles
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect();
        if tokens.len() != handles.len() {
            return Err(SysError::with(Status::InvalidParameter, "non-string handle"));
        }
        let mode = match want_str(&args, 1)?.as_str() {
            "any" => WaitMode::Any,
            "all" => WaitMode::All,
            other => {
                return Err(SysError::with(
                    Status::InvalidParameter,
                    format!("bad wait mode {other}"),
                ));
            }
        };
        let timeout = opt_int(&args, 2).map(|t| t.max(0) as u64);
        wait_on(kernel, caller, tokens, mode, timeout).await
    })
}

// =============================================================================
// Pipes
// =============================================================================

enum PipeStep {
    Done(SysResult),
    Park,
}

pub fn sys_ke_pipe_read(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let max = want_u64(&args, 1)?.max(1) as usize;
        let id = resolve(&kernel, &caller, &token, AccessMask::READ)?;
        irql_may_sleep(&kernel, caller.pid)?;

        loop {
            let (step, wake_writer) = {
                let mut objects = kernel.objects.lock();
                match objects.get_mut(id).map(|o| &mut o.body) {
                    Some(ObjectBody::IoPipe(pipe)) => match pipe.read_some(max) {
                        PipeRead::Data(data) => {
                            let writer = pipe.next_writer();
                            (PipeStep::Done(Ok(Value::Bytes(data))), writer)
                        }
                        PipeRead::Eof => {
                            (PipeStep::Done(Err(SysError::new(Status::EndOfFile))), None)
                        }
                        PipeRead::WouldBlock => {
                            pipe.park_reader(caller.pid);
                            (PipeStep::Park, None)
                        }
                    },
                    Some(_) => (
                        PipeStep::Done(Err(SysError::with(Status::InvalidHandle, "not a pipe"))),
                        None,
                    ),
                    None => (PipeStep::Done(Err(SysError::new(Status::InvalidHandle))), None),
                }
            };
            if let Some(writer) = wake_writer {
                kernel.wake_process(writer, Ok(Value::Null));
            }
            match step {
                PipeStep::Done(result) => return result,
                PipeStep::Park => {
                    let park = kernel.park(caller.pid, WaitReason::IpcWait, None);
                    park.await?;
                }
            }
        }
    })
}

pub fn sys_ke_pipe_write(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let data = want_bytes(&args, 1)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::WRITE)?;
        irql_may_sleep(&kernel, caller.pid)?;

        let mut offset = 0usize;
        while offset < data.len() {
            let (accepted, wake_reader, closed) = {
                let mut objects = kernel.objects.lock();
                match objects.get_mut(id).map(|o| &mut o.body) {
                    Some(ObjectBody::IoPipe(pipe)) => match pipe.write_some(&data[offset..]) {
                        Some(n) => {
                            let reader = if n > 0 { pipe.next_reader() } else { None };
                            if n == 0 {
                                pipe.park_writer(caller.pid);
                            }
                            (n, reader, false)
                        }
                        None => (0, None, true),
                    },
                    Some(_) => {
                        return Err(SysError::with(Status::InvalidHandle, "not a pipe"));
                    }
                    None => return Err(SysError::new(Status::InvalidHandle)),
                }
            };

            if closed {
                // Writing into a closed pipe raises SIGPIPE and fails.
                kernel.queue_signal(caller.pid, Signal::Pipe, caller.pid);
                return Err(SysError::with(Status::EndOfFile, "pipe closed"));
            }

            offset += accepted;
            if let Some(reader) = wake_reader {
                kernel.wake_process(reader, Ok(Value::Null));
            }
            if accepted > 0 {
                // The pipe became readable for wait-engine waiters too.
                apply_signal(&kernel, id);
            }
            if offset < data.len() && accepted == 0 {
                let park = kernel.park(caller.pid, WaitReason::IpcWait, None);
                park.await?;
            }
        }
        Ok(Value::from(data.len()))
    })
}

pub fn sys_ke_pipe_close(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::WRITE)?;
        let parked = {
            let mut objects = kernel.objects.lock();
            match objects.get_mut(id).map(|o| &mut o.body) {
                Some(ObjectBody::IoPipe(pipe)) => {
                    pipe.close();
                    pipe.drain_waiters()
                }
                Some(_) => return Err(SysError::with(Status::InvalidHandle, "not a pipe")),
                None => return Err(SysError::new(Status::InvalidHandle)),
            }
        };
        // Every parked reader and writer retries and observes the close.
        for pid in parked {
            kernel.wake_process(pid, Ok(Value::Null));
        }
        apply_signal(&kernel, id);
        Ok(Value::Null)
    })
}

// =============================================================================
// Sections
// =============================================================================

fn with_section<R>(
    kernel: &Kernel,
    id: ObjectId,
    f: impl FnOnce(&Section) -> SysResult<R>,
) -> SysResult<R> {
    let objects = kernel.objects.lock();
    match objects.get(id).map(|o| &o.body) {
        Some(ObjectBody::IpcSection(section)) => f(section),
        Some(_) => Err(SysError::with(Status::InvalidHandle, "not a section")),
        None => Err(SysError::new(Status::InvalidHandle)),
    }
}

pub fn sys_ke_section_read(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let offset = want_u64(&args, 1)? as usize;
        let len = want_u64(&args, 2)? as usize;
        let id = resolve(&kernel, &caller, &token, AccessMask::READ)?;
        with_section(&kernel, id, |s| s.read(offset, len).map(Value::Bytes))
    })
}

pub fn sys_ke_section_write(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let offset = want_u64(&args, 1)? as usize;
        let data = want_bytes(&args, 2)?;
        let id = resolve(&kernel, &caller, &token, AccessMask::WRITE)?;
        with_section(&kernel, id, |s| {
            s.write(offset, &data)?;
            Ok(Value::from(data.len()))
        })
    })
}

// =============================================================================
// Message queues
// =============================================================================

pub fn sys_ke_mq_send(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let priority = opt_int(&args, 1).unwrap_or(0);
        let payload = args.get(2).cloned().unwrap_or(Value::Null);
        let payload = if caller.ring.is_sandboxed() {
            payload.sanitized()
        } else {
            payload
        };
        let id = resolve(&kernel, &caller, &token, AccessMask::WRITE)?;
        irql_may_sleep(&kernel, caller.pid)?;

        loop {
            let (step, wake_receiver) = {
                let mut objects = kernel.objects.lock();
                match objects.get_mut(id).map(|o| &mut o.body) {
                    Some(ObjectBody::IpcMessageQueue(queue)) => {
                        match queue.send(priority, payload.clone()) {
                            Ok(true) => (PipeStep::Done(Ok(Value::Null)), queue.next_receiver()),
                            Ok(false) => {
                                queue.park_sender(caller.pid);
                                (PipeStep::Park, None)
                            }
                            Err(err) => (PipeStep::Done(Err(err)), None),
                        }
                    }
                    Some(_) => (
                        PipeStep::Done(Err(SysError::with(
                            Status::InvalidHandle,
                            "not a message queue",
                        ))),
                        None,
                    ),
                    None => (PipeStep::Done(Err(SysError::new(Status::InvalidHandle))), None),
                }
            };
            if let Some(receiver) = wake_receiver {
                kernel.wake_process(receiver, Ok(Value::Null));
            }
            match step {
                PipeStep::Done(result) => {
                    if result.is_ok() {
                        apply_signal(&kernel, id);
                    }
                    return result;
                }
                PipeStep::Park => {
                    let park = kernel.park(caller.pid, WaitReason::IpcWait, None);
                    park.await?;
                }
            }
        }
    })
}

pub fn sys_ke_mq_receive(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let token = want_str(&args, 0)?;
        let timeout = opt_int(&args, 1).map(|t| t.max(0) as u64);
        let id = resolve(&kernel, &caller, &token, AccessMask::READ)?;
        irql_may_sleep(&kernel, caller.pid)?;

        loop {
            let (step, wake_sender) = {
                let mut objects = kernel.objects.lock();
                match objects.get_mut(id).map(|o| &mut o.body) {
                    Some(ObjectBody::IpcMessageQueue(queue)) => match queue.receive() {
                        Some((priority, payload)) => (
                            PipeStep::Done(Ok(Value::map([
                                ("nPriority", Value::Int(priority)),
                                ("vPayload", payload),
                            ]))),
                            queue.next_sender(),
                        ),
                        None => {
                            queue.park_receiver(caller.pid);
                            (PipeStep::Park, None)
                        }
                    },
                    Some(_) => (
                        PipeStep::Done(Err(SysError::with(
                            Status::InvalidHandle,
                            "not a message queue",
                        ))),
                        None,
                    ),
                    None => (PipeStep::Done(Err(SysError::new(Status::InvalidHandle))), None),
                }
            };
            if let Some(sender) = wake_sender {
                kernel.wake_process(sender, Ok(Value::Null));
            }
            match step {
                PipeStep::Done(result) => return result,
                PipeStep::Park => {
                    let deadline = timeout.map(|t| kernel.now_ms() + t);
                    let park = kernel.park(caller.pid, WaitReason::IpcWait, deadline);
                    park.await?;
                }
            }
        }
    })
}

// =============================================================================
// Signals
// =============================================================================

pub fn sys_ke_signal_send(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let target = Pid(want_u64(&args, 0)?);
        let signal = Signal::from_number(want_u64(&args, 1)? as u32)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid signal"))?;
        kernel.check_signal_privilege(caller.pid, target)?;
        kernel.send_signal(caller.pid, target, signal);
        Ok(Value::Bool(true))
    })
}

/// String dispositions only; closure handlers are installed through the
/// sandbox, which calls into the signal state directly.
pub fn sys_ke_signal_handler(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let signal = Signal::from_number(want_u64(&args, 0)? as u32)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid signal"))?;
        if signal.is_unblockable() {
            return Err(SysError::with(Status::InvalidParameter, "SIGKILL cannot be handled"));
        }
        let disposition = match want_str(&args, 1)?.as_str() {
            "default" => Disposition::Default,
            "ignore" => Disposition::Ignore,
            other => {
                return Err(SysError::with(
                    Status::InvalidParameter,
                    format!("bad disposition {other}"),
                ));
            }
        };
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        process.signals.set_disposition(signal, disposition);
        Ok(Value::Null)
    })
}

pub fn sys_ke_signal_mask(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let mask = want_u64(&args, 0)?;
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        let old = process.signals.mask();
        process.signals.set_mask(mask);
        Ok(Value::from(old))
    })
}

/// Group-wide signal: privilege rules apply per-target; disallowed targets
/// are skipped, and the count of reached processes is returned.
pub fn sys_ke_signal_group(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let pgid = Pid(want_u64(&args, 0)?);
        let signal = Signal::from_number(want_u64(&args, 1)? as u32)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid signal"))?;
        let members = kernel.procs.lock().group_members(pgid);
        let mut reached = 0i64;
        for member in members {
            if kernel.check_signal_privilege(caller.pid, member).is_ok() {
                kernel.send_signal(caller.pid, member, signal);
                reached += 1;
            }
        }
        Ok(Value::Int(reached))
    })
}

// =============================================================================
// IRQL
// =============================================================================

pub fn sys_ke_raise_irql(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let level = Irql::from_number(want_u64(&args, 0)? as u8)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid irql"))?;
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        if level < process.irql {
            return Err(SysError::with(Status::InvalidParameter, "irql would lower"));
        }
        let old = process.irql;
        process.irql = level;
        Ok(Value::from(old as u32))
    })
}

pub fn sys_ke_lower_irql(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let level = Irql::from_number(want_u64(&args, 0)? as u8)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid irql"))?;
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        if level > process.irql {
            return Err(SysError::with(Status::InvalidParameter, "irql would raise"));
        }
        let old = process.irql;
        process.irql = level;
        Ok(Value::from(old as u32))
    })
}

pub fn sys_ke_get_irql(kernel: Arc<Kernel>, caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let procs = kernel.procs.lock();
        let irql = procs
            .get(caller.pid)
            .map(|p| p.irql)
            .unwrap_or(Irql::Passive);
        Ok(Value::from(irql as u32))
    })
}
