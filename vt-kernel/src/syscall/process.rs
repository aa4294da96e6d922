//! Process syscalls.

use std::collections::BTreeMap;
use std::sync::Arc;

use vt_abi::{Ring, Signal, Status, SysError, Value};

use crate::kernel::{Kernel, SpawnSpec, StdioSpec};
use crate::process::{ProcessStatus, WaitReason, YieldNow};

use super::{Caller, SysFuture, opt_int, want_pid, want_str};

pub fn sys_process_spawn(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let path = want_str(&args, 0)?;
        let ring = args
            .get(1)
            .and_then(Value::as_number)
            .and_then(Ring::from_number)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid ring"))?;

        let mut env: BTreeMap<String, String> = BTreeMap::new();
        if let Some(map) = args.get(2).and_then(Value::as_map) {
            for (k, v) in map {
                if let Some(s) = v.as_str() {
                    env.insert(k.clone(), s.to_string());
                }
            }
        }

        let program = kernel
            .programs
            .resolve(&path)
            .ok_or(SysError::with(Status::NoSuchFile, format!("no image at {path}")))?;

        let spawned = kernel.spawn(
            SpawnSpec::new(path, ring, program)
                .parent(caller.pid)
                .uid(caller.uid)
                .env(env)
                .stdout(StdioSpec::Inherit),
        )?;
        Ok(Value::from(spawned.pid))
    })
}

/// `process_thread` takes a callable, which cannot cross the value
/// boundary; threads are created through the sandbox task primitives,
/// which land in [`Kernel::spawn`] directly.
pub fn sys_process_thread(_kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    super::ready(Err(SysError::with(
        Status::InvalidParameter,
        "process_thread takes a callable; use the task primitives",
    )))
}

pub fn sys_process_wait(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let target = want_pid(&args, 0)?;
        {
            let mut procs = kernel.procs.lock();
            let process = procs
                .get_mut(target)
                .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;
            match process.exit_code {
                Some(code) if process.status == ProcessStatus::Dead => {
                    process.waited = true;
                    return Ok(Value::Int(code));
                }
                _ => {
                    if !process.exit_waiters.contains(&caller.pid) {
                        process.exit_waiters.push(caller.pid);
                    }
                }
            }
        }
        let park = kernel.park(caller.pid, WaitReason::WaitPid, None);
        park.await
    })
}

pub fn sys_process_kill(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let target = want_pid(&args, 0)?;
        let signal = match opt_int(&args, 1) {
            Some(n) => Signal::from_number(n as u32)
                .ok_or(SysError::with(Status::InvalidParameter, "invalid signal"))?,
            None => Signal::Kill,
        };
        kernel.check_signal_privilege(caller.pid, target)?;
        kernel.send_signal(caller.pid, target, signal);
        Ok(Value::Bool(true))
    })
}

pub fn sys_process_yield(_kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        YieldNow::new().await;
        Ok(Value::Null)
    })
}

pub fn sys_process_elevate(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let ring = args
            .first()
            .and_then(Value::as_number)
            .and_then(Ring::from_number)
            .ok_or(SysError::with(Status::InvalidParameter, "invalid ring"))?;

        // Elevation is a root-only operation, and never into ring 0.
        if caller.uid != 0 {
            return Err(SysError::with(
                Status::PrivilegeNotHeld,
                "elevation requires uid 0",
            ));
        }
        if ring == Ring::Kernel {
            return Err(SysError::with(
                Status::PrivilegeNotHeld,
                "cannot elevate into ring 0",
            ));
        }

        // Re-mint the synapse token. Every handle minted before the
        // elevation stays bound to the retired token and stops resolving
        // with SYNAPSE_TOKEN_MISMATCH; the elevated process re-opens what
        // it still needs.
        let new_token = kernel.mint.synapse();
        {
            let mut procs = kernel.procs.lock();
            let process = procs
                .get_mut(caller.pid)
                .ok_or(SysError::new(Status::Unsuccessful))?;
            process.ring = ring;
            process.synapse = new_token;
        }
        kernel.kprint_pid(
            crate::logging::LogLevel::Sec,
            caller.pid,
            format!("elevated to ring {ring}, synapse token rotated"),
        );
        Ok(Value::Float(ring.as_number()))
    })
}

pub fn sys_process_get_pid(_kernel: Arc<Kernel>, caller: Caller, _args: Vec<Value>) -> SysFuture {
    super::ready(Ok(Value::from(caller.pid)))
}

pub fn sys_process_get_ring(_kernel: Arc<Kernel>, caller: Caller, _args: Vec<Value>) -> SysFuture {
    super::ready(Ok(Value::Float(caller.ring.as_number())))
}

pub fn sys_process_get_uid(_kernel: Arc<Kernel>, caller: Caller, _args: Vec<Value>) -> SysFuture {
    super::ready(Ok(Value::from(caller.uid)))
}

pub fn sys_process_list(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let procs = kernel.procs.lock();
        let list: Vec<Value> = procs
            .iter()
            .map(|p| {
                Value::map([
                    ("nPid", Value::from(p.pid)),
                    ("sName", Value::from(p.name.as_str())),
                    ("nRing", Value::Float(p.ring.as_number())),
                    ("sStatus", Value::from(status_name(p.status))),
                    (
                        "nParent",
                        p.parent.map(Value::from).unwrap_or(Value::Null),
                    ),
                    ("nUid", Value::from(p.uid)),
                    ("nCpuMs", Value::from((p.slice.cpu_time * 1000.0) as i64)),
                    ("nPreempts", Value::from(p.slice.preempt_count)),
                ])
            })
            .collect();
        Ok(Value::List(list))
    })
}

fn status_name(status: ProcessStatus) -> &'static str {
    match status {
        ProcessStatus::Ready => "ready",
        ProcessStatus::Running => "running",
        ProcessStatus::Sleeping => "sleeping",
        ProcessStatus::Dead => "dead",
    }
}
