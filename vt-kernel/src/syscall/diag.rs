//! Diagnostic syscalls.

use std::sync::Arc;

use vt_abi::Value;

use crate::kernel::Kernel;
use crate::logging::LogLevel;

use super::{Caller, SysFuture, opt_int};

pub fn sys_sched_get_stats(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let sched = kernel.sched.lock();
        Ok(sched.stats.to_value())
    })
}

pub fn sys_mem_info(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        Ok(Value::map([
            ("nTotal", Value::from(kernel.host.total_memory())),
            ("nFree", Value::from(kernel.host.free_memory())),
            (
                "nObjects",
                Value::from(kernel.objects.lock().live_objects()),
            ),
            ("nProcesses", Value::from(kernel.procs.lock().len())),
        ]))
    })
}

pub fn sys_preempt_stats(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move { Ok(kernel.preempt.stats()) })
}

/// `dmesg_read(last_seq, max, level)`: entries newer than `last_seq`, at
/// or above `level`, up to `max`.
pub fn sys_dmesg_read(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let last_seq = opt_int(&args, 0).and_then(|n| u64::try_from(n).ok());
        let max = opt_int(&args, 1).unwrap_or(64).clamp(1, 1024) as usize;
        let level = opt_int(&args, 2)
            .and_then(|n| LogLevel::from_number(n as u8))
            .unwrap_or(LogLevel::Debug);

        let entries = kernel.dmesg.read(last_seq, max, level);
        let list: Vec<Value> = entries
            .into_iter()
            .map(|e| {
                Value::map([
                    ("nSeq", Value::from(e.seq)),
                    ("nUptime", Value::Float(e.uptime)),
                    ("sLevel", Value::from(e.level.tag())),
                    ("sMessage", Value::from(e.message)),
                    ("nPid", e.pid.map(Value::from).unwrap_or(Value::Null)),
                ])
            })
            .collect();
        Ok(Value::List(list))
    })
}

pub fn sys_patchguard_arm(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        crate::patchguard::arm(&kernel);
        Ok(Value::Null)
    })
}

pub fn sys_patchguard_status(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move { Ok(kernel.patchguard.lock().status()) })
}

pub fn sys_patchguard_check(kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let clean = crate::patchguard::check_now(&kernel);
        Ok(Value::Bool(clean))
    })
}
