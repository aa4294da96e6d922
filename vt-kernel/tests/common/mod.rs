//! Shared scaffolding for the kernel integration tests.
//!
//! Tests boot a kernel over a scripted `VirtHost`, spawn guest programs
//! built from async closures, and drive the scheduler with `run_until`.

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;

use vt_kernel::host::VirtHost;
use vt_kernel::kernel::{Kernel, SpawnSpec};
use vt_kernel::process::ProcessStatus;
use vt_kernel::sandbox::{Sandbox, program};
use vt_kernel::{Pid, Ring, boot};

/// Boot a kernel with no system processes on a fresh host.
pub fn bare() -> (Arc<VirtHost>, Arc<Kernel>) {
    let host = VirtHost::builder().build();
    let kernel = boot(host.clone(), Vec::new(), false);
    (host, kernel)
}

/// Occupy the boot pid range (0..3) with idle system processes so that
/// test subjects land on unprotected pids, the way they would on a
/// booted machine.
pub fn seed_boot_processes(kernel: &Arc<Kernel>) {
    for i in 0..3 {
        spawn(kernel, &format!("boot{i}"), Ring::Kernel, None, |ctx| async move {
            loop {
                ctx.yield_now().await;
            }
        });
    }
}

/// Spawn a guest program from an async closure.
pub fn spawn<F, Fut>(
    kernel: &Arc<Kernel>,
    name: &str,
    ring: Ring,
    parent: Option<Pid>,
    body: F,
) -> Pid
where
    F: Fn(Sandbox) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = i64> + Send + 'static,
{
    let mut spec = SpawnSpec::new(name, ring, program(body));
    if let Some(parent) = parent {
        spec = spec.parent(parent);
    }
    kernel.spawn(spec).expect("spawn failed").pid
}

/// Run until the process is dead (or the iteration budget runs out).
pub fn run_until_dead(kernel: &Arc<Kernel>, pid: Pid) -> bool {
    vt_kernel::run_until(kernel, 50_000, |k| k.process_is_dead(pid))
}

pub fn status(kernel: &Arc<Kernel>, pid: Pid) -> Option<ProcessStatus> {
    kernel.process_status(pid)
}
