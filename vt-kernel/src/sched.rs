//! The scheduler.
//!
//! Cooperative at the host level (there is exactly one host thread) and
//! preemptive from the guest's point of view via the checkpoint mechanism.
//! Each iteration round-robins the current process table, resuming every
//! ready process for one slice, then runs the IPC tick (timers, wait
//! timeouts), drains the DPC queue, gives PatchGuard its randomised tick,
//! and applies the OOM floor.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::task::{Context, Poll};

use vt_abi::{Pid, Ring, Status, SysError, Value};

use crate::kernel::{Kernel, StopCode};
use crate::logging::LogLevel;
use crate::object::ObjectBody;
use crate::process::{ProcessStatus, process_waker};

/// A slice longer than this earns a watchdog strike.
pub const WATCHDOG_WARN_SECS: f64 = 2.0;

/// Strikes before the watchdog kills.
pub const WATCHDOG_MAX_STRIKES: u32 = 3;

/// Free-memory floor below which the OOM killer fires.
pub const OOM_FLOOR_BYTES: u64 = 32 * 1024;

/// Scheduler counters, surfaced by `sched_get_stats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SchedStats {
    pub iterations: u64,
    pub context_switches: u64,
    pub preemptions: u64,
    pub syscalls: u64,
    pub watchdog_kills: u64,
    pub oom_kills: u64,
    pub ring_violation_kills: u64,
    pub rate_limit_kills: u64,
    pub timeouts_fired: u64,
    pub dpcs_drained: u64,
}

impl SchedStats {
    pub fn to_value(&self) -> Value {
        Value::map([
            ("nIterations", Value::from(self.iterations)),
            ("nContextSwitches", Value::from(self.context_switches)),
            ("nPreemptions", Value::from(self.preemptions)),
            ("nSyscalls", Value::from(self.syscalls)),
            ("nWatchdogKills", Value::from(self.watchdog_kills)),
            ("nOomKills", Value::from(self.oom_kills)),
            ("nRingViolationKills", Value::from(self.ring_violation_kills)),
            ("nRateLimitKills", Value::from(self.rate_limit_kills)),
            ("nTimeoutsFired", Value::from(self.timeouts_fired)),
            ("nDpcsDrained", Value::from(self.dpcs_drained)),
        ])
    }
}

/// Scheduler-owned state: counters plus the wait-timeout heap.
pub struct SchedState {
    pub stats: SchedStats,
    /// Min-heap of `(deadline_ms, wait_seq, pid)`. The wait sequence
    /// number invalidates entries whose wait completed by another path.
    timeouts: BinaryHeap<Reverse<(u64, u64, Pid)>>,
}

impl SchedState {
    pub fn new() -> SchedState {
        SchedState {
            stats: SchedStats::default(),
            timeouts: BinaryHeap::new(),
        }
    }

    pub fn arm_timeout(&mut self, deadline_ms: u64, pid: Pid, wait_seq: u64) {
        self.timeouts.push(Reverse((deadline_ms, wait_seq, pid)));
    }

    /// Pop every entry whose deadline is at or before `now`.
    pub fn take_expired(&mut self, now_ms: u64) -> Vec<(Pid, u64)> {
        let mut expired = Vec::new();
        while let Some(Reverse((deadline, seq, pid))) = self.timeouts.peek().copied() {
            if deadline > now_ms {
                break;
            }
            self.timeouts.pop();
            expired.push((pid, seq));
        }
        expired
    }

    /// Next armed deadline, for idle-wait sizing.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timeouts.peek().map(|Reverse((d, _, _))| *d)
    }
}

impl Default for SchedState {
    fn default() -> Self {
        Self::new()
    }
}

/// Why the scheduler loop returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    /// A bugcheck or explicit halt stopped the machine.
    Halted(StopCode),
    /// Every process exited.
    Finished,
}

/// Run the scheduler until the machine halts or the process table drains.
pub fn run(kernel: &Arc<Kernel>) -> RunExit {
    loop {
        if let Some(code) = kernel.stop_code() {
            return RunExit::Halted(code);
        }
        if kernel.procs.lock().len() == 0 {
            return RunExit::Finished;
        }
        run_iteration(kernel);
    }
}

/// Run iterations until `pred` holds or `max_iterations` pass. Returns
/// whether the predicate was satisfied. Test scaffolding.
pub fn run_until(
    kernel: &Arc<Kernel>,
    max_iterations: u64,
    mut pred: impl FnMut(&Arc<Kernel>) -> bool,
) -> bool {
    for _ in 0..max_iterations {
        if pred(kernel) {
            return true;
        }
        if kernel.is_halted() {
            return pred(kernel);
        }
        run_iteration(kernel);
    }
    pred(kernel)
}

/// One scheduler iteration.
pub fn run_iteration(kernel: &Arc<Kernel>) {
    // Round-robin over the current keyset. Processes created during the
    // iteration become eligible next iteration.
    let pids = kernel.procs.lock().pids();
    let mut any_ran = false;

    for pid in pids {
        if kernel.is_halted() {
            return;
        }
        any_ran |= run_slice(kernel, pid);

        // One non-blocking event pull per resume: resets the host's
        // "too long without yielding" watchdog and feeds the Pipeline
        // Manager.
        if let Some(event) = kernel.host.pull_event(0.0) {
            kernel.forward_host_event(event);
        }
    }

    ipc_tick(kernel);
    drain_dpcs(kernel);
    crate::patchguard::tick(kernel);
    oom_check(kernel);
    kernel.reap_dead();

    {
        let mut sched = kernel.sched.lock();
        sched.stats.iterations += 1;
    }

    if !any_ran {
        idle_wait(kernel);
    }
}

/// Resume one process for a slice. Returns whether it actually ran.
fn run_slice(kernel: &Arc<Kernel>, pid: Pid) -> bool {
    let mut body = {
        let mut procs = kernel.procs.lock();
        let Some(process) = procs.get_mut(pid) else {
            return false;
        };
        if process.status != ProcessStatus::Ready {
            return false;
        }
        let Some(body) = process.body.take() else {
            return false;
        };
        process.status = ProcessStatus::Running;
        process.wait_reason = crate::process::WaitReason::None;
        process.slice_start_ms = kernel.now_ms();
        process.checkpoint_counter = 0;
        procs.set_current(Some(pid));
        body
    };

    let started = kernel.uptime();
    let waker = process_waker(pid);
    let mut cx = Context::from_waker(&waker);
    let poll = catch_unwind(AssertUnwindSafe(|| body.as_mut().poll(&mut cx)));
    let elapsed = kernel.uptime() - started;

    kernel.procs.lock().set_current(None);
    {
        let mut sched = kernel.sched.lock();
        sched.stats.context_switches += 1;
    }

    match poll {
        Err(_) => {
            // A guest panic is contained to the faulting process; the
            // supervisor model restarts drivers out-of-band.
            kernel.kprint_pid(LogLevel::Fail, pid, "process body panicked");
            kernel.kill_process(pid, -1, "panic");
        }
        Ok(Poll::Ready(code)) => {
            kernel.exit_process(pid, code);
        }
        Ok(Poll::Pending) => {
            let mut watchdog_strikes = None;
            let mut preempted = false;
            let mut body_slot = Some(body);
            {
                let mut procs = kernel.procs.lock();
                if let Some(process) = procs.get_mut(pid) {
                    if process.status != ProcessStatus::Dead {
                        process.slice.cpu_time += elapsed;
                        process.slice.last_slice = elapsed;
                        process.slice.max_slice = process.slice.max_slice.max(elapsed);

                        // Still running after the resume means the
                        // checkpoint suspended it rather than a voluntary
                        // sleep: flip back to ready.
                        if process.status == ProcessStatus::Running {
                            process.status = ProcessStatus::Ready;
                            if process.preempted {
                                process.preempted = false;
                                process.slice.preempt_count += 1;
                                preempted = true;
                            }
                        }

                        if elapsed > WATCHDOG_WARN_SECS {
                            process.slice.watchdog_strikes += 1;
                            watchdog_strikes = Some(process.slice.watchdog_strikes);
                        }

                        process.body = body_slot.take();
                    }
                }
                // A process killed mid-slice keeps no body; the taken
                // future is dropped outside the lock below.
            }
            drop(body_slot);

            if preempted {
                kernel.preempt.note_preemption();
                kernel.sched.lock().stats.preemptions += 1;
            }
            match watchdog_strikes {
                Some(strikes) if strikes >= WATCHDOG_MAX_STRIKES => {
                    kernel.sched.lock().stats.watchdog_kills += 1;
                    kernel.kill_process(pid, -1, "watchdog");
                }
                Some(strikes) => {
                    kernel.kprint_pid(
                        LogLevel::Warn,
                        pid,
                        format!(
                            "slice overran watchdog ({elapsed:.2}s), strike {strikes}/{WATCHDOG_MAX_STRIKES}"
                        ),
                    );
                }
                None => {}
            }
        }
    }
    true
}

/// Timers and wait timeouts.
fn ipc_tick(kernel: &Arc<Kernel>) {
    let now = kernel.now_ms();

    // Expired timers signal their objects; completions wake waiters.
    let completions = {
        let mut objects = kernel.objects.lock();
        let mut completions = Vec::new();
        for id in objects.armed_timers() {
            let fired = match objects.get_mut(id) {
                Some(object) => match &mut object.body {
                    ObjectBody::IpcTimer(timer) => timer.tick(now),
                    _ => false,
                },
                None => false,
            };
            if fired {
                completions.extend(objects.signal_object(id));
            }
        }
        completions
    };
    kernel.apply_wait_completions(completions);

    // Wait deadlines fire at the first tick at or after the deadline.
    let expired = kernel.sched.lock().take_expired(now);
    for (pid, seq) in expired {
        let still_waiting = {
            let procs = kernel.procs.lock();
            procs
                .get(pid)
                .map(|p| p.status == ProcessStatus::Sleeping && p.wait_seq == seq)
                .unwrap_or(false)
        };
        if still_waiting {
            kernel.objects.lock().forget_process(pid);
            kernel.sched.lock().stats.timeouts_fired += 1;
            kernel.wake_process(pid, Err(SysError::new(Status::Timeout)));
        }
    }
}

/// Drain the DPC queue, at most once per iteration, FIFO.
fn drain_dpcs(kernel: &Arc<Kernel>) {
    let items = kernel.dpcs.lock().take_all();
    if items.is_empty() {
        return;
    }
    let count = items.len() as u64;
    for item in items {
        log::debug!("dpc: {}", item.label);
        (item.work)();
    }
    kernel.sched.lock().stats.dpcs_drained += count;
}

/// Kill the highest-CPU ring 3 process when free memory drops below the
/// floor. Evaluated once per iteration.
fn oom_check(kernel: &Arc<Kernel>) {
    if kernel.host.free_memory() >= OOM_FLOOR_BYTES {
        return;
    }
    let victim = {
        let procs = kernel.procs.lock();
        procs
            .iter()
            .filter(|p| p.ring == Ring::User && p.is_alive())
            .max_by(|a, b| a.slice.cpu_time.total_cmp(&b.slice.cpu_time))
            .map(|p| (p.pid, p.name.clone()))
    };
    let Some((pid, name)) = victim else {
        return;
    };
    kernel.kprint_pid(
        LogLevel::Fail,
        pid,
        format!("out of memory: killing {name} (highest cpu)"),
    );
    kernel.sched.lock().stats.oom_kills += 1;
    kernel.kill_process(pid, -1, "oom");
}

/// Nothing was ready: block on the host event queue briefly instead of
/// spinning, bounded by the next armed deadline.
fn idle_wait(kernel: &Arc<Kernel>) {
    let now = kernel.now_ms();
    let wait_ms = kernel
        .sched
        .lock()
        .next_deadline()
        .map(|d| d.saturating_sub(now).min(10))
        .unwrap_or(5);
    if let Some(event) = kernel.host.pull_event(wait_ms as f64 / 1000.0) {
        kernel.forward_host_event(event);
    }
}
