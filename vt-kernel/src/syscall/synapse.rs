//! Synapse token syscalls.

use std::sync::Arc;

use vt_abi::{Pid, Status, SysError, Value};

use crate::kernel::Kernel;

use super::{Caller, SysFuture, want_str, want_u64};

pub fn sys_synapse_get_token(kernel: Arc<Kernel>, caller: Caller, _args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let procs = kernel.procs.lock();
        let process = procs
            .get(caller.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        Ok(Value::from(process.synapse.as_str()))
    })
}

/// Check a presented token against a process's current token.
pub fn sys_synapse_validate(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let pid = Pid(want_u64(&args, 0)?);
        let presented = want_str(&args, 1)?;
        let procs = kernel.procs.lock();
        let process = procs
            .get(pid)
            .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;
        Ok(Value::Bool(process.synapse.as_str() == presented))
    })
}

/// Rotate a process's synapse token. Handles minted under the old token
/// stop resolving with `SYNAPSE_TOKEN_MISMATCH` until re-created.
pub fn sys_synapse_rotate(kernel: Arc<Kernel>, _caller: Caller, args: Vec<Value>) -> SysFuture {
    Box::pin(async move {
        let pid = Pid(want_u64(&args, 0)?);
        let token = kernel.mint.synapse();
        let mut procs = kernel.procs.lock();
        let process = procs
            .get_mut(pid)
            .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;
        process.synapse = token;
        Ok(Value::Bool(true))
    })
}
