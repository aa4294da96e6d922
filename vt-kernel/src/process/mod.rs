//! Process records and the process table.

pub mod waker;

pub use waker::{Park, WakeCell, YieldNow, process_waker};

use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use vt_abi::{BOOT_PID_THRESHOLD, Irql, Pid, Ring};

use crate::ipc::{KernelSignal, SignalState};
use crate::object::HandleTable;
use crate::token::SynapseToken;

/// Execution status of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    Ready,
    Running,
    Sleeping,
    Dead,
}

/// Why a sleeping process is asleep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitReason {
    None,
    Signal,
    Syscall,
    WaitPid,
    IpcWait,
}

/// The suspendable body of a process.
pub type ProcessBody = Pin<Box<dyn Future<Output = i64> + Send>>;

/// Per-process preemption and CPU accounting.
#[derive(Debug, Clone, Copy, Default)]
pub struct SliceStats {
    /// Total CPU seconds consumed across all slices.
    pub cpu_time: f64,
    /// Times the checkpoint suspended this process mid-slice.
    pub preempt_count: u64,
    /// Duration of the most recent slice, seconds.
    pub last_slice: f64,
    /// Longest single slice observed, seconds.
    pub max_slice: f64,
    /// Watchdog strikes; three kills the process.
    pub watchdog_strikes: u32,
}

/// A process record.
pub struct Process {
    pub pid: Pid,
    pub name: String,
    pub parent: Option<Pid>,
    /// Process group; defaults to the process's own pid.
    pub pgid: Pid,
    pub uid: u32,
    pub ring: Ring,
    pub status: ProcessStatus,
    pub wait_reason: WaitReason,
    pub synapse: SynapseToken,
    /// The body future; taken out of the record while being polled.
    pub body: Option<ProcessBody>,
    pub wake: Arc<WakeCell>,
    pub handles: HandleTable,
    pub signals: SignalState,
    pub irql: Irql,
    pub env: BTreeMap<String, String>,
    /// Kernel-signal inbox for servers and drivers (ring ≤ 2).
    pub ksignals: VecDeque<KernelSignal>,
    pub exit_code: Option<i64>,
    /// Processes blocked in `process_wait` on this one.
    pub exit_waiters: Vec<Pid>,
    /// Whether the exit code has been collected. A dead record lingers
    /// until it is waited on or its parent is gone.
    pub waited: bool,
    pub slice: SliceStats,
    /// Uptime (ms) when the current slice started.
    pub slice_start_ms: u64,
    /// Checkpoint calls since the last clock sample.
    pub checkpoint_counter: u32,
    /// Set by the checkpoint when it suspends the process; consumed by the
    /// scheduler to count the preemption.
    pub preempted: bool,
    /// Rolling syscall-rate window.
    pub rl_window_start: f64,
    pub rl_count: u32,
    /// Monotonic wait sequence; invalidates stale timeout registrations.
    pub wait_seq: u64,
}

impl Process {
    /// Kernel-protected processes may only be signalled from ring 0.
    pub fn is_protected(&self) -> bool {
        self.pid.as_u64() < BOOT_PID_THRESHOLD
    }

    /// Boot-time system processes bypass synapse token checks.
    pub fn bypasses_synapse(&self) -> bool {
        self.pid.as_u64() < BOOT_PID_THRESHOLD
    }

    pub fn is_alive(&self) -> bool {
        self.status != ProcessStatus::Dead
    }
}

/// The kernel process table.
pub struct ProcessTable {
    procs: BTreeMap<Pid, Process>,
    next_pid: u64,
    current: Option<Pid>,
}

impl ProcessTable {
    pub fn new() -> ProcessTable {
        ProcessTable {
            procs: BTreeMap::new(),
            next_pid: 0,
            current: None,
        }
    }

    /// Allocate the next pid. Pids increase monotonically and are never
    /// reused.
    pub fn alloc_pid(&mut self) -> Pid {
        let pid = Pid(self.next_pid);
        self.next_pid += 1;
        pid
    }

    pub fn insert(&mut self, process: Process) {
        debug_assert!(!self.procs.contains_key(&process.pid));
        self.procs.insert(process.pid, process);
    }

    pub fn get(&self, pid: Pid) -> Option<&Process> {
        self.procs.get(&pid)
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Process> {
        self.procs.get_mut(&pid)
    }

    pub fn remove(&mut self, pid: Pid) -> Option<Process> {
        self.procs.remove(&pid)
    }

    pub fn len(&self) -> usize {
        self.procs.len()
    }

    pub fn pids(&self) -> Vec<Pid> {
        self.procs.keys().copied().collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.procs.values()
    }

    pub fn current(&self) -> Option<Pid> {
        self.current
    }

    pub fn set_current(&mut self, pid: Option<Pid>) {
        self.current = pid;
    }

    /// Walk the parent chain of `descendant` looking for `ancestor`.
    /// Traversal is depth-bounded; a corrupted chain reads as "not an
    /// ancestor" rather than hanging.
    pub fn is_ancestor(&self, ancestor: Pid, descendant: Pid) -> bool {
        let mut cursor = self.get(descendant).and_then(|p| p.parent);
        for _ in 0..64 {
            match cursor {
                Some(pid) if pid == ancestor => return true,
                Some(pid) => cursor = self.get(pid).and_then(|p| p.parent),
                None => return false,
            }
        }
        false
    }

    /// Every member of a process group.
    pub fn group_members(&self, pgid: Pid) -> Vec<Pid> {
        self.procs
            .values()
            .filter(|p| p.pgid == pgid)
            .map(|p| p.pid)
            .collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
