//! Override-server plumbing: how the Pipeline Manager claims syscalls and
//! replies to forwarded calls.

use std::sync::Arc;

use vt_abi::{Status, SysError, Value};

use crate::kernel::Kernel;

use super::{Caller, SysFuture, want_str, want_u64};

/// Claim a syscall: future dispatches are rewritten as kernel signals to
/// the calling server.
pub fn sys_svc_register_override(kernel: Arc<Kernel>, caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let name = want_str(&args, 0)?;
        kernel.syscalls.lock().set_override(&name, caller.pid)?;
        // The first override registration names the Pipeline Manager.
        if kernel.pipeline_manager().is_none() {
            kernel.set_pipeline_manager(caller.pid);
        }
        log::debug!("syscall {name} overridden by pid {}", caller.pid);
        Ok(Value::Null)
    })
}

/// Complete a forwarded syscall: wake the original caller with the
/// server's result.
pub fn sys_svc_syscall_return(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let seq = want_u64(&args, 0)?;
        let result = args.get(1).cloned().unwrap_or(Value::Null);
        let error = args.get(2).and_then(Value::as_str).map(str::to_string);

        let original = kernel
            .syscalls
            .lock()
            .take_forward(seq)
            .ok_or(SysError::with(Status::InvalidParameter, "unknown sequence"))?;

        let outcome = match error {
            Some(message) => {
                let status = args
                    .get(3)
                    .and_then(Value::as_int)
                    .and_then(|code| Status::from_code(code as u32))
                    .unwrap_or(Status::Unsuccessful);
                Err(SysError::with(status, message))
            }
            None => Ok(result),
        };
        kernel.wake_process(original, outcome);
        Ok(Value::Null)
    })
}
