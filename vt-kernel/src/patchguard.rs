//! PatchGuard: runtime integrity monitoring of the kernel tables.
//!
//! At arm time the monitor snapshots the syscall table (the ordered name
//! fingerprint, each entry's handler identity and ring-grant set) plus
//! the override map and the Pipeline Manager's pid, all as canonical
//! strings under an FNV hash. Ticks re-hash and compare; any mismatch
//! logs each violation and stops the machine with
//! `CRITICAL_STRUCTURE_CORRUPTION`. The tick interval is re-randomised on
//! every fire to frustrate timing attacks, and arming is deferred so boot
//! -time overrides are captured in the baseline.

use std::sync::Arc;

use vt_abi::Value;

use crate::kernel::{Kernel, StopCode};
use crate::logging::LogLevel;

/// Iterations after boot before the monitor arms itself.
pub const ARM_AFTER_ITERATIONS: u64 = 300;

/// Tick interval bounds, in scheduler iterations.
pub const CHECK_MIN: u64 = 30;
pub const CHECK_MAX: u64 = 100;

fn fnv1a(lines: &[String]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for line in lines {
        for b in line.as_bytes() {
            hash ^= *b as u64;
            hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
        }
        hash ^= 0x0a;
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[derive(Debug, Clone)]
struct Snapshot {
    fingerprint: String,
    identity_lines: Vec<String>,
    override_lines: Vec<String>,
    pipeline_manager: Option<vt_abi::Pid>,
    hash: u64,
}

/// Monitor state.
pub struct PatchGuard {
    snapshot: Option<Snapshot>,
    /// Iterations until the next check, once armed.
    countdown: u64,
    violations: u32,
    checks: u64,
}

impl PatchGuard {
    pub fn new() -> PatchGuard {
        PatchGuard {
            snapshot: None,
            countdown: CHECK_MIN,
            violations: 0,
            checks: 0,
        }
    }

    pub fn is_armed(&self) -> bool {
        self.snapshot.is_some()
    }

    pub fn status(&self) -> Value {
        Value::map([
            ("bArmed", Value::Bool(self.is_armed())),
            ("nChecks", Value::from(self.checks)),
            ("nViolations", Value::from(self.violations)),
            (
                "nFingerprintHash",
                match &self.snapshot {
                    Some(s) => Value::from(s.hash),
                    None => Value::Null,
                },
            ),
        ])
    }
}

impl Default for PatchGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn capture(kernel: &Arc<Kernel>) -> Snapshot {
    let (fingerprint, identity_lines, override_lines) = {
        let table = kernel.syscalls.lock();
        (
            table.names().join(","),
            table.identity_lines(),
            table.override_lines(),
        )
    };
    let mut all = Vec::with_capacity(identity_lines.len() + override_lines.len() + 2);
    all.push(fingerprint.clone());
    all.extend(identity_lines.iter().cloned());
    all.extend(override_lines.iter().cloned());
    let pipeline_manager = kernel.pipeline_manager();
    if let Some(pm) = pipeline_manager {
        all.push(format!("pm={pm}"));
    }
    let hash = fnv1a(&all);
    Snapshot {
        fingerprint,
        identity_lines,
        override_lines,
        pipeline_manager,
        hash,
    }
}

/// Arm the monitor: take the baseline snapshot.
pub fn arm(kernel: &Arc<Kernel>) {
    let snapshot = capture(kernel);
    let mut pg = kernel.patchguard.lock();
    if pg.snapshot.is_none() {
        kernel.kprint(
            LogLevel::Info,
            format!("patchguard armed ({:#018x})", snapshot.hash),
        );
    }
    pg.snapshot = Some(snapshot);
}

/// Scheduler hook: arm after the boot grace period, then check on a
/// randomised countdown.
pub fn tick(kernel: &Arc<Kernel>) {
    let iteration = kernel.sched.lock().stats.iterations;

    {
        let pg = kernel.patchguard.lock();
        if pg.snapshot.is_none() {
            if iteration < ARM_AFTER_ITERATIONS {
                return;
            }
            drop(pg);
            arm(kernel);
            return;
        }
    }

    let due = {
        let mut pg = kernel.patchguard.lock();
        if pg.countdown > 1 {
            pg.countdown -= 1;
            false
        } else {
            pg.countdown = kernel.rand_range(CHECK_MIN, CHECK_MAX);
            true
        }
    };
    if due {
        check_now(kernel);
    }
}

/// Compare the live tables against the baseline. Returns `true` when
/// clean; a mismatch does not return (the machine stops).
pub fn check_now(kernel: &Arc<Kernel>) -> bool {
    let Some(baseline) = kernel.patchguard.lock().snapshot.clone() else {
        return true;
    };
    let live = capture(kernel);
    {
        let mut pg = kernel.patchguard.lock();
        pg.checks += 1;
    }
    if live.hash == baseline.hash {
        return true;
    }

    // Walk the canonical lines and log every violation individually.
    let mut violations = Vec::new();
    if live.fingerprint != baseline.fingerprint {
        violations.push("syscall table fingerprint changed".to_string());
    }
    diff_lines(
        "syscall entry",
        &baseline.identity_lines,
        &live.identity_lines,
        &mut violations,
    );
    diff_lines(
        "override",
        &baseline.override_lines,
        &live.override_lines,
        &mut violations,
    );
    if live.pipeline_manager != baseline.pipeline_manager {
        violations.push(format!(
            "pipeline manager changed: {:?} -> {:?}",
            baseline.pipeline_manager, live.pipeline_manager
        ));
    }

    {
        let mut pg = kernel.patchguard.lock();
        pg.violations += violations.len() as u32;
    }
    for violation in &violations {
        kernel.kprint(LogLevel::Crit, format!("patchguard: {violation}"));
    }
    crate::crash::bugcheck(
        kernel,
        StopCode::CriticalStructureCorruption,
        &format!("{} integrity violation(s)", violations.len().max(1)),
    );
    false
}

fn diff_lines(what: &str, baseline: &[String], live: &[String], out: &mut Vec<String>) {
    for line in baseline {
        if !live.contains(line) {
            out.push(format!("{what} removed or modified: {line}"));
        }
    }
    for line in live {
        if !baseline.contains(line) {
            out.push(format!("{what} added: {line}"));
        }
    }
}
