//! Kernel IPC primitives.
//!
//! Every primitive here is the *body* of a kernel object: the Object
//! Manager owns the arena, the wait engine evaluates signalled state, and
//! these types hold the per-primitive state machines. Files mirror the
//! primitive table: events, mutexes, semaphores, timers, pipes, sections,
//! message queues, signals, and the DPC queue.

pub mod dpc;
pub mod event;
pub mod mqueue;
pub mod mutex;
pub mod pipe;
pub mod section;
pub mod semaphore;
pub mod signal;
pub mod timer;

pub use dpc::DpcQueue;
pub use event::Event;
pub use mqueue::MessageQueue;
pub use mutex::Mutex;
pub use pipe::{Pipe, PipeRead};
pub use section::Section;
pub use semaphore::Semaphore;
pub use signal::{Disposition, PendingSignal, SignalState};
pub use timer::Timer;

use vt_abi::{Pid, Ring, Value};

/// A kernel-internal message delivered to a server or driver process.
///
/// These are the "kernel signals" of the dispatch model: syscall
/// forwarding to the Pipeline Manager, IRP dispatch to drivers, and host
/// event/interrupt forwarding. They never cross into guest-visible
/// `Value` form except through the sanitizer.
#[derive(Debug, Clone)]
pub enum KernelSignal {
    /// A syscall forwarded to an override server.
    Syscall {
        seq: u64,
        caller: Pid,
        caller_ring: Ring,
        name: String,
        args: Vec<Value>,
    },
    /// An IRP dispatched to a driver process.
    IrpDispatch(crate::io::Irp),
    /// A host event matching a driver's interrupt subscription.
    HardwareInterrupt { event: Value },
    /// A raw host event forwarded to the Pipeline Manager.
    HostEvent { event: Value },
}
