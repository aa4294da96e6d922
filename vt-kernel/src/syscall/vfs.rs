//! VFS syscalls.
//!
//! The kernel does not implement a filesystem: the whole VFS surface is
//! owned by the Pipeline Manager through syscall overrides. These stubs
//! only answer when no server has claimed the surface yet.

use std::sync::Arc;

use vt_abi::{Status, SysError, Value};

use crate::kernel::Kernel;

use super::{Caller, SysFuture};

pub fn sys_vfs_unrouted(_kernel: Arc<Kernel>, _caller: Caller, _args: Vec<Value>) -> SysFuture {
    super::ready(Err(SysError::with(
        Status::NotImplemented,
        "no pipeline manager is serving the VFS",
    )))
}
