//! VT-OS: a microkernel core for a scripted compute host.
//!
//! The host exposes a pull-based event queue, raw components addressed by
//! string, and a shared memory pool; the kernel layers on top of it a
//! ring-privileged execution model with sandboxed guest programs,
//! cooperative-plus-preemptive scheduling over the single host thread, an
//! NT-flavoured Object Manager with token-bound handle tables, a
//! synchronous IRP driver pipeline routed through a user-space Pipeline
//! Manager, a full IPC suite, and a runtime integrity monitor.
//!
//! The crate is hosted: [`host::VirtHost`] simulates the machine for the
//! binary and the test suite, and guest programs are async Rust bodies
//! registered as [`sandbox::Program`] images.

pub mod boot;
pub mod crash;
pub mod host;
pub mod io;
pub mod ipc;
pub mod kernel;
pub mod logging;
pub mod object;
pub mod patchguard;
pub mod preempt;
pub mod process;
pub mod programs;
pub mod registry;
pub mod sandbox;
pub mod sched;
pub mod syscall;
pub mod token;
pub mod volume;

pub use boot::{BootConfig, boot};
pub use host::{Host, HostEvent, VirtHost};
pub use kernel::{Kernel, SpawnSpec, Spawned, StdioSpec, StopCode};
pub use logging::{DmesgLog, LogLevel};
pub use sandbox::{Program, Sandbox, program};
pub use sched::{RunExit, run, run_iteration, run_until};

pub use vt_abi::{
    AccessMask, Irql, Pid, RegType, Ring, RingSet, Signal, Status, SysError, SysResult, Value,
};
