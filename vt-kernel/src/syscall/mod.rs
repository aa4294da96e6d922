//! Syscall dispatch.
//!
//! Every syscall is a table record: name, handler, and the set of rings
//! granted to call it. Dispatch looks the record up by name, enforces the
//! ring grant (a violation is fatal to the caller, not returned, to
//! prevent probing), applies the ring ≥ 3 rate limit, honours user-space
//! overrides by rewriting the call as a tagged kernel signal to the
//! registered server, and otherwise invokes the in-kernel handler.

mod diag;
mod io;
mod ipc;
mod object;
mod process;
mod registry;
mod svc;
mod synapse;
mod vfs;

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use vt_abi::{Pid, Ring, RingSet, Status, SysError, SysResult, Value};

use crate::ipc::KernelSignal;
use crate::kernel::Kernel;
use crate::logging::LogLevel;
use crate::process::WaitReason;

/// Boxed future returned by every handler.
pub type SysFuture = Pin<Box<dyn Future<Output = SysResult> + Send>>;

/// Handler function type. A plain `fn` so PatchGuard can fingerprint the
/// handler identity by address.
pub type SyscallFn = fn(Arc<Kernel>, Caller, Vec<Value>) -> SysFuture;

/// Snapshot of the calling process taken at dispatch entry.
#[derive(Debug, Clone, Copy)]
pub struct Caller {
    pub pid: Pid,
    pub ring: Ring,
    pub uid: u32,
}

/// One syscall table record.
pub struct SyscallEntry {
    pub handler: SyscallFn,
    pub rings: RingSet,
}

/// The kernel syscall table.
pub struct SyscallTable {
    /// Ordered by registration: the order is part of the PatchGuard
    /// fingerprint.
    entries: IndexMap<String, SyscallEntry>,
    /// Syscalls claimed by a user-space server.
    overrides: HashMap<String, Pid>,
    /// In-flight forwarded calls: seq → original caller.
    pending_forwards: HashMap<u64, Pid>,
}

impl SyscallTable {
    pub fn empty() -> SyscallTable {
        SyscallTable {
            entries: IndexMap::new(),
            overrides: HashMap::new(),
            pending_forwards: HashMap::new(),
        }
    }

    /// The full kernel surface.
    pub fn with_defaults() -> SyscallTable {
        let mut t = SyscallTable::empty();

        // Process.
        t.register("process_spawn", RingSet::ALL, process::sys_process_spawn);
        t.register("process_thread", RingSet::ALL, process::sys_process_thread);
        t.register("process_wait", RingSet::ALL, process::sys_process_wait);
        t.register("process_kill", RingSet::ALL, process::sys_process_kill);
        t.register("process_yield", RingSet::ALL, process::sys_process_yield);
        t.register("process_elevate", RingSet::USER, process::sys_process_elevate);
        t.register("process_get_pid", RingSet::ALL, process::sys_process_get_pid);
        t.register("process_get_ring", RingSet::ALL, process::sys_process_get_ring);
        t.register("process_get_uid", RingSet::ALL, process::sys_process_get_uid);
        t.register("process_list", RingSet::ALL, process::sys_process_list);

        // VFS: owned by the Pipeline Manager through overrides; the
        // in-kernel handlers only report the absence of one.
        for name in [
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
        ] {
            t.register(name, RingSet::ALL, vfs::sys_vfs_unrouted);
        }

        // Object manager.
        t.register("ob_create_object", RingSet::KERNEL_SYSTEM, object::sys_ob_create_object);
        t.register("ob_create_handle", RingSet::KERNEL_SYSTEM, object::sys_ob_create_handle);
        t.register(
            "ob_reference_by_handle",
            RingSet::KERNEL_SYSTEM,
            object::sys_ob_reference_by_handle,
        );
        t.register("ob_close_handle", RingSet::KERNEL_SYSTEM, object::sys_ob_close_handle);
        t.register("ob_insert_object", RingSet::KERNEL_SYSTEM, object::sys_ob_insert_object);
        t.register("ob_delete_object", RingSet::KERNEL_SYSTEM, object::sys_ob_delete_object);
        t.register(
            "ob_create_symlink",
            RingSet::KERNEL_SYSTEM,
            object::sys_ob_create_symlink,
        );
        t.register(
            "ob_set_standard_handle",
            RingSet::ALL,
            object::sys_ob_set_standard_handle,
        );
        t.register(
            "ob_get_standard_handle",
            RingSet::ALL,
            object::sys_ob_get_standard_handle,
        );
        t.register("ob_dump_directory", RingSet::KERNEL_SYSTEM, object::sys_ob_dump_directory);

        // IPC.
        t.register("ke_create_event", RingSet::ALL, ipc::sys_ke_create_event);
        t.register("ke_create_mutex", RingSet::ALL, ipc::sys_ke_create_mutex);
        t.register("ke_create_semaphore", RingSet::ALL, ipc::sys_ke_create_semaphore);
        t.register("ke_create_timer", RingSet::ALL, ipc::sys_ke_create_timer);
        t.register("ke_create_pipe", RingSet::ALL, ipc::sys_ke_create_pipe);
        t.register("ke_create_named_pipe", RingSet::ALL, ipc::sys_ke_create_named_pipe);
        t.register("ke_create_section", RingSet::ALL, ipc::sys_ke_create_section);
        t.register("ke_create_mqueue", RingSet::ALL, ipc::sys_ke_create_mqueue);
        t.register("ke_open_named", RingSet::ALL, ipc::sys_ke_open_named);
        t.register("ke_close_handle", RingSet::ALL, ipc::sys_ke_close_handle);
        t.register("ke_set_event", RingSet::ALL, ipc::sys_ke_set_event);
        t.register("ke_reset_event", RingSet::ALL, ipc::sys_ke_reset_event);
        t.register("ke_pulse_event", RingSet::ALL, ipc::sys_ke_pulse_event);
        t.register("ke_release_mutex", RingSet::ALL, ipc::sys_ke_release_mutex);
        t.register("ke_release_semaphore", RingSet::ALL, ipc::sys_ke_release_semaphore);
        t.register("ke_set_timer", RingSet::ALL, ipc::sys_ke_set_timer);
        t.register("ke_cancel_timer", RingSet::ALL, ipc::sys_ke_cancel_timer);
        t.register("ke_wait_single", RingSet::ALL, ipc::sys_ke_wait_single);
        t.register("ke_wait_multiple", RingSet::ALL, ipc::sys_ke_wait_multiple);
        t.register("ke_pipe_read", RingSet::ALL, ipc::sys_ke_pipe_read);
        t.register("ke_pipe_write", RingSet::ALL, ipc::sys_ke_pipe_write);
        t.register("ke_pipe_close", RingSet::ALL, ipc::sys_ke_pipe_close);
        t.register("ke_section_read", RingSet::ALL, ipc::sys_ke_section_read);
        t.register("ke_section_write", RingSet::ALL, ipc::sys_ke_section_write);
        t.register("ke_mq_send", RingSet::ALL, ipc::sys_ke_mq_send);
        t.register("ke_mq_receive", RingSet::ALL, ipc::sys_ke_mq_receive);
        t.register("ke_signal_send", RingSet::ALL, ipc::sys_ke_signal_send);
        t.register("ke_signal_handler", RingSet::ALL, ipc::sys_ke_signal_handler);
        t.register("ke_signal_mask", RingSet::ALL, ipc::sys_ke_signal_mask);
        t.register("ke_signal_group", RingSet::ALL, ipc::sys_ke_signal_group);
        t.register("ke_raise_irql", RingSet::PRIVILEGED, ipc::sys_ke_raise_irql);
        t.register("ke_lower_irql", RingSet::PRIVILEGED, ipc::sys_ke_lower_irql);
        t.register("ke_get_irql", RingSet::PRIVILEGED, ipc::sys_ke_get_irql);

        // Synapse.
        t.register("synapse_get_token", RingSet::ALL, synapse::sys_synapse_get_token);
        t.register("synapse_validate", RingSet::PRIVILEGED, synapse::sys_synapse_validate);
        t.register("synapse_rotate", RingSet::KERNEL_SYSTEM, synapse::sys_synapse_rotate);

        // Registry: writes 0-2, reads 0-3.
        t.register("reg_create_key", RingSet::PRIVILEGED, registry::sys_reg_create_key);
        t.register("reg_delete_key", RingSet::PRIVILEGED, registry::sys_reg_delete_key);
        t.register("reg_set_value", RingSet::PRIVILEGED, registry::sys_reg_set_value);
        t.register("reg_delete_value", RingSet::PRIVILEGED, registry::sys_reg_delete_value);
        t.register("reg_get_value", RingSet::ALL, registry::sys_reg_get_value);
        t.register("reg_enum_keys", RingSet::ALL, registry::sys_reg_enum_keys);
        t.register("reg_enum_values", RingSet::ALL, registry::sys_reg_enum_values);
        t.register("reg_dump_tree", RingSet::ALL, registry::sys_reg_dump_tree);
        t.register(
            "reg_alloc_device_id",
            RingSet::PRIVILEGED,
            registry::sys_reg_alloc_device_id,
        );

        // I/O and driver model.
        t.register("io_register_device", RingSet::PRIVILEGED, io::sys_io_register_device);
        t.register("io_dispatch_irp", RingSet::KERNEL_SYSTEM, io::sys_io_dispatch_irp);
        t.register("io_complete_request", RingSet::PRIVILEGED, io::sys_io_complete_request);
        t.register(
            "io_subscribe_interrupt",
            RingSet::PRIVILEGED,
            io::sys_io_subscribe_interrupt,
        );
        t.register("io_resolve_device", RingSet::KERNEL_SYSTEM, io::sys_io_resolve_device);
        t.register("io_interrupt_routes", RingSet::KERNEL_SYSTEM, io::sys_io_interrupt_routes);
        t.register("io_raise_interrupt", RingSet::KERNEL_SYSTEM, io::sys_io_raise_interrupt);

        // Override plumbing.
        t.register("svc_register_override", RingSet::KERNEL_SYSTEM, svc::sys_svc_register_override);
        t.register("svc_syscall_return", RingSet::KERNEL_SYSTEM, svc::sys_svc_syscall_return);

        // Diagnostics.
        t.register("sched_get_stats", RingSet::ALL, diag::sys_sched_get_stats);
        t.register("mem_info", RingSet::ALL, diag::sys_mem_info);
        t.register("dmesg_read", RingSet::ALL, diag::sys_dmesg_read);
        t.register("preempt_stats", RingSet::ALL, diag::sys_preempt_stats);
        t.register("patchguard_arm", RingSet::KERNEL_SYSTEM, diag::sys_patchguard_arm);
        t.register("patchguard_status", RingSet::ALL, diag::sys_patchguard_status);
        t.register("patchguard_check", RingSet::KERNEL_SYSTEM, diag::sys_patchguard_check);

        t
    }

    pub fn register(&mut self, name: &str, rings: RingSet, handler: SyscallFn) {
        self.entries
            .insert(name.to_string(), SyscallEntry { handler, rings });
    }

    pub fn lookup(&self, name: &str) -> Option<&SyscallEntry> {
        self.entries.get(name)
    }

    /// Claim a syscall for a user-space server. The entry must exist.
    pub fn set_override(&mut self, name: &str, server: Pid) -> SysResult<()> {
        if !self.entries.contains_key(name) {
            return Err(SysError::with(
                Status::InvalidParameter,
                format!("no syscall {name}"),
            ));
        }
        self.overrides.insert(name.to_string(), server);
        Ok(())
    }

    pub fn override_for(&self, name: &str) -> Option<Pid> {
        self.overrides.get(name).copied()
    }

    pub fn note_forward(&mut self, seq: u64, caller: Pid) {
        self.pending_forwards.insert(seq, caller);
    }

    pub fn take_forward(&mut self, seq: u64) -> Option<Pid> {
        self.pending_forwards.remove(&seq)
    }

    /// Forget forwarded calls whose caller died before the server replied.
    pub fn drop_forwards_for(&mut self, pid: Pid) {
        self.pending_forwards.retain(|_, caller| *caller != pid);
    }

    /// Ordered names, for the PatchGuard fingerprint.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Canonical per-entry identity strings: name, handler address, grant
    /// set bits.
    pub fn identity_lines(&self) -> Vec<String> {
        self.entries
            .iter()
            .map(|(name, e)| format!("{name}:{:#x}:{:02x}", e.handler as usize, e.rings.bits()))
            .collect()
    }

    /// Canonical override lines.
    pub fn override_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = self
            .overrides
            .iter()
            .map(|(name, pid)| format!("{name}->{pid}"))
            .collect();
        lines.sort();
        lines
    }
}

/// A future that is immediately ready.
pub(crate) fn ready(result: SysResult) -> SysFuture {
    Box::pin(std::future::ready(result))
}

/// A future that never resolves. Handed to callers that were killed during
/// dispatch: the process is dead and will never be polled again.
pub(crate) fn never() -> SysFuture {
    Box::pin(std::future::pending())
}

// =============================================================================
// Argument extraction
// =============================================================================

pub(crate) fn want_str(args: &[Value], i: usize) -> SysResult<String> {
    args.get(i)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| SysError::with(Status::InvalidParameter, format!("argument {i}: string expected")))
}

pub(crate) fn want_int(args: &[Value], i: usize) -> SysResult<i64> {
    args.get(i)
        .and_then(Value::as_int)
        .ok_or_else(|| SysError::with(Status::InvalidParameter, format!("argument {i}: integer expected")))
}

pub(crate) fn want_u64(args: &[Value], i: usize) -> SysResult<u64> {
    let n = want_int(args, i)?;
    u64::try_from(n)
        .map_err(|_| SysError::with(Status::InvalidParameter, format!("argument {i}: must be non-negative")))
}

pub(crate) fn want_pid(args: &[Value], i: usize) -> SysResult<Pid> {
    Ok(Pid(want_u64(args, i)?))
}

pub(crate) fn want_bytes(args: &[Value], i: usize) -> SysResult<Vec<u8>> {
    match args.get(i) {
        Some(Value::Bytes(b)) => Ok(b.clone()),
        Some(Value::Str(s)) => Ok(s.clone().into_bytes()),
        _ => Err(SysError::with(
            Status::InvalidParameter,
            format!("argument {i}: bytes expected"),
        )),
    }
}

pub(crate) fn opt_int(args: &[Value], i: usize) -> Option<i64> {
    args.get(i).and_then(Value::as_int)
}

pub(crate) fn opt_str(args: &[Value], i: usize) -> Option<String> {
    args.get(i).and_then(Value::as_str).map(str::to_string)
}

pub(crate) fn opt_bool(args: &[Value], i: usize) -> Option<bool> {
    args.get(i).and_then(Value::as_bool)
}

// =============================================================================
// Dispatch
// =============================================================================

/// Dispatch a syscall on behalf of `pid`.
pub fn dispatch(kernel: &Arc<Kernel>, pid: Pid, name: &Value, args: Vec<Value>) -> SysFuture {
    // Non-string names are rejected without dispatch.
    let Some(name) = name.as_str() else {
        return ready(Err(SysError::with(
            Status::InvalidParameter,
            "syscall name must be a string",
        )));
    };
    let name = name.to_string();

    // Snapshot the caller.
    let caller = {
        let procs = kernel.procs.lock();
        match procs.get(pid).filter(|p| p.is_alive()) {
            Some(p) => Caller {
                pid,
                ring: p.ring,
                uid: p.uid,
            },
            None => return ready(Err(SysError::new(Status::Unsuccessful))),
        }
    };

    // Delivery point (a): syscall entry.
    if kernel.deliver_signals(pid) {
        return never();
    }

    // Rolling one-second rate window for ring 3.
    if caller.ring == Ring::User && !rate_limit_ok(kernel, pid) {
        kernel.kprint_pid(
            LogLevel::Sec,
            pid,
            format!("syscall rate limit exceeded ({name})"),
        );
        kernel.sched.lock().stats.rate_limit_kills += 1;
        kernel.kill_process(pid, -1, "syscall rate limit");
        return never();
    }

    kernel.sched.lock().stats.syscalls += 1;

    // Look up the entry and the override under one table lock.
    let (rings, handler, override_server) = {
        let table = kernel.syscalls.lock();
        match table.lookup(&name) {
            Some(entry) => (entry.rings, entry.handler, table.override_for(&name)),
            None => {
                return ready(Err(SysError::with(
                    Status::NotImplemented,
                    format!("unknown syscall {name}"),
                )));
            }
        }
    };

    // Ring grant. A violation kills the caller; nothing is returned, so
    // the grant set cannot be probed.
    if !rings.grants(caller.ring) {
        kernel.kprint_pid(
            LogLevel::Sec,
            pid,
            format!("RING VIOLATION: pid={pid} ring={} syscall={name}", caller.ring),
        );
        kernel.sched.lock().stats.ring_violation_kills += 1;
        kernel.kill_process(pid, -1, "ring violation");
        return never();
    }

    // Overridden syscalls are rewritten as a tagged kernel signal to the
    // registered server; the caller sleeps until the server replies.
    if let Some(server) = override_server {
        if server != pid {
            return forward_to_server(kernel, caller, server, name, args);
        }
    }

    handler(kernel.clone(), caller, args)
}

fn rate_limit_ok(kernel: &Arc<Kernel>, pid: Pid) -> bool {
    let now = kernel.uptime();
    let mut procs = kernel.procs.lock();
    let Some(process) = procs.get_mut(pid) else {
        return false;
    };
    if now - process.rl_window_start >= 1.0 {
        process.rl_window_start = now;
        process.rl_count = 0;
    }
    process.rl_count += 1;
    process.rl_count <= vt_abi::SYSCALL_RATE_LIMIT
}

fn forward_to_server(
    kernel: &Arc<Kernel>,
    caller: Caller,
    server: Pid,
    name: String,
    args: Vec<Value>,
) -> SysFuture {
    // A dead server fails the call instead of parking the caller forever;
    // its supervisor will re-register the override.
    let server_ring = {
        let procs = kernel.procs.lock();
        match procs.get(server).filter(|p| p.is_alive()) {
            Some(p) => p.ring,
            None => {
                return ready(Err(SysError::with(
                    Status::Unsuccessful,
                    format!("no server for {name}"),
                )));
            }
        }
    };
    // Data crossing down into a more privileged server is sanitized.
    let args = if caller.ring.is_sandboxed() && server_ring.level() <= Ring::Driver.level() {
        args.iter().map(Value::sanitized).collect()
    } else {
        args
    };

    let seq = kernel.override_seq.fetch_add(1, Ordering::Relaxed);
    kernel.syscalls.lock().note_forward(seq, caller.pid);
    kernel.push_ksignal(
        server,
        KernelSignal::Syscall {
            seq,
            caller: caller.pid,
            caller_ring: caller.ring,
            name,
            args,
        },
    );

    let park = kernel.park(caller.pid, WaitReason::Syscall, None);
    Box::pin(park)
}
