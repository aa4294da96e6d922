//! Guest preemption.
//!
//! The host gives the kernel exactly one thread, so preemption is built on
//! checkpoints: every guest program awaits [`crate::sandbox::Sandbox::checkpoint`]
//! at loop boundaries, and the checkpoint suspends the process when its
//! quantum is exhausted. Counting keeps the fast path cheap: the monotonic
//! clock is only sampled every `check_interval` checkpoint calls.
//!
//! Nested guest tasks cannot dodge the checkpoint: a sub-future awaited by
//! the body shares the process future, so a leaf suspension suspends the
//! whole process frame up to the scheduler.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use vt_abi::Value;

/// Default slice quantum in milliseconds.
pub const DEFAULT_QUANTUM_MS: u64 = 50;

/// Checkpoint calls between clock samples.
pub const CHECK_INTERVAL: u32 = 192;

/// Preemption configuration and counters.
pub struct Preempt {
    quantum_ms: AtomicU64,
    check_interval: AtomicU32,
    checkpoints: AtomicU64,
    preemptions: AtomicU64,
}

impl Preempt {
    pub fn new() -> Preempt {
        Preempt {
            quantum_ms: AtomicU64::new(DEFAULT_QUANTUM_MS),
            check_interval: AtomicU32::new(CHECK_INTERVAL),
            checkpoints: AtomicU64::new(0),
            preemptions: AtomicU64::new(0),
        }
    }

    pub fn quantum_ms(&self) -> u64 {
        self.quantum_ms.load(Ordering::Relaxed)
    }

    pub fn set_quantum_ms(&self, ms: u64) {
        self.quantum_ms.store(ms.max(1), Ordering::Relaxed);
    }

    pub fn check_interval(&self) -> u32 {
        self.check_interval.load(Ordering::Relaxed)
    }

    pub fn set_check_interval(&self, n: u32) {
        self.check_interval.store(n.max(1), Ordering::Relaxed);
    }

    /// Count one checkpoint call. Returns `true` when the caller should
    /// sample the clock (every `check_interval` calls).
    pub fn tally(&self, counter: &mut u32) -> bool {
        self.checkpoints.fetch_add(1, Ordering::Relaxed);
        *counter += 1;
        if *counter >= self.check_interval() {
            *counter = 0;
            true
        } else {
            false
        }
    }

    pub fn note_preemption(&self) {
        self.preemptions.fetch_add(1, Ordering::Relaxed);
    }

    pub fn preemptions(&self) -> u64 {
        self.preemptions.load(Ordering::Relaxed)
    }

    pub fn checkpoints(&self) -> u64 {
        self.checkpoints.load(Ordering::Relaxed)
    }

    /// Statistics surface, shaped for the diagnostic syscalls.
    pub fn stats(&self) -> Value {
        Value::map([
            ("nQuantumMs", Value::from(self.quantum_ms())),
            ("nCheckInterval", Value::from(self.check_interval())),
            ("nCheckpoints", Value::from(self.checkpoints())),
            ("nPreemptions", Value::from(self.preemptions())),
        ])
    }
}

impl Default for Preempt {
    fn default() -> Self {
        Self::new()
    }
}

/// Checkpoint fast path: count the call, and every `check_interval` calls
/// sample the clock. Returns `true` when the current quantum is exhausted
/// and the process should suspend; the process is flagged so the scheduler
/// accounts the suspension as a preemption.
pub fn checkpoint_due(kernel: &std::sync::Arc<crate::kernel::Kernel>, pid: vt_abi::Pid) -> bool {
    let sample = {
        let mut procs = kernel.procs.lock();
        let Some(process) = procs.get_mut(pid) else {
            return false;
        };
        kernel.preempt.tally(&mut process.checkpoint_counter)
    };
    if !sample {
        return false;
    }

    let now = kernel.now_ms();
    let quantum = kernel.preempt.quantum_ms();
    let mut procs = kernel.procs.lock();
    let Some(process) = procs.get_mut(pid) else {
        return false;
    };
    if now.saturating_sub(process.slice_start_ms) >= quantum {
        process.preempted = true;
        true
    } else {
        false
    }
}
