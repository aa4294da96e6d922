//! Bugchecks, crash dumps, and the stop screen.
//!
//! A bugcheck is terminal: it writes a structured dump to the root volume,
//! records the crash cause in the EEPROM data area so the next boot can
//! report it, plays the descending tones, paints the stop screen, and
//! halts the host. Kernel handlers never panic; this path is reached from
//! the integrity monitor and from explicit kernel panics.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use vt_abi::Value;
use vt_abi::encoding::{CrashCause, EepromData};

use crate::kernel::{Kernel, StopCode};
use crate::logging::LogLevel;

/// Dmesg entries carried into the dump.
const DUMP_DMESG_TAIL: usize = 64;

fn cause_for(stop: StopCode) -> CrashCause {
    match stop {
        StopCode::KernelPanic => CrashCause::Panic,
        StopCode::CriticalStructureCorruption => CrashCause::StructureCorruption,
        StopCode::CriticalProcessDied => CrashCause::Panic,
    }
}

/// Compose the crash dump text.
fn compose_dump(kernel: &Arc<Kernel>, stop: StopCode, detail: &str) -> String {
    let mut out = String::new();
    out.push_str("=== VT-OS CRASH DUMP ===\n");
    out.push_str(&format!("stop: {}\n", stop.name()));
    out.push_str(&format!("detail: {detail}\n"));
    out.push_str(&format!("uptime: {:.4}s\n", kernel.uptime()));
    out.push_str(&format!(
        "boot: {}\n\n",
        kernel.boot_counter.load(Ordering::Relaxed)
    ));

    out.push_str("-- processes --\n");
    {
        let procs = kernel.procs.lock();
        for p in procs.iter() {
            out.push_str(&format!(
                "pid={} name={} ring={} status={:?} cpu={:.3}s strikes={}\n",
                p.pid, p.name, p.ring, p.status, p.slice.cpu_time, p.slice.watchdog_strikes
            ));
        }
    }

    out.push_str("\n-- scheduler --\n");
    {
        let sched = kernel.sched.lock();
        out.push_str(&format!("{}\n", sched.stats.to_value()));
    }

    out.push_str("\n-- objects --\n");
    {
        let objects = kernel.objects.lock();
        for (tag, count) in objects.stats() {
            out.push_str(&format!("{tag}: {count}\n"));
        }
        out.push_str(&format!("named: {}\n", objects.namespace.len()));
    }
    out.push_str(&format!(
        "irps in flight: {}\n",
        kernel.irps.lock().in_flight_count()
    ));

    out.push_str("\n-- patchguard --\n");
    {
        let pg = kernel.patchguard.lock();
        out.push_str(&format!("{}\n", pg.status()));
    }

    out.push_str("\n-- dmesg tail --\n");
    for entry in kernel.dmesg.tail(DUMP_DMESG_TAIL) {
        out.push_str(&format!(
            "[{:10.4}] {} {}\n",
            entry.uptime,
            entry.level.tag(),
            entry.message
        ));
    }
    out
}

/// Stop the machine.
///
/// Idempotent: the first bugcheck wins and later calls return quietly (a
/// panic inside the panic path must not recurse).
pub fn bugcheck(kernel: &Arc<Kernel>, stop: StopCode, detail: &str) {
    {
        let mut slot = kernel.stop.lock();
        if slot.is_some() {
            return;
        }
        *slot = Some(stop);
    }

    kernel.kprint(LogLevel::Crit, format!("*** STOP: {} ({detail})", stop.name()));

    // Crash dump to the root volume.
    let dump = compose_dump(kernel, stop, detail);
    let boot = kernel.boot_counter.load(Ordering::Relaxed);
    {
        let volume = kernel.volume.lock();
        if let Some(volume) = volume.as_ref() {
            let path = format!("/log/crash_{boot:03}.dump");
            if let Err(err) = volume.write(&path, dump.as_bytes()) {
                kernel.kprint(LogLevel::Fail, format!("crash dump write failed: {err}"));
            } else {
                kernel.kprint(LogLevel::Crit, format!("crash dump written to {path}"));
            }
        }
    }

    // Crash cause into EEPROM for the next boot.
    let mut data = EepromData::parse(&kernel.host.eeprom_data()).unwrap_or_else(EepromData::fresh);
    data.set_crash_cause(cause_for(stop));
    if stop == StopCode::CriticalStructureCorruption {
        data.pg_violations = data.pg_violations.saturating_add(1);
    }
    kernel.host.set_eeprom_data(&data.to_bytes());

    // Audible descending tone, then the stop screen.
    for freq in [1000u32, 800, 600, 440] {
        kernel.host.beep(freq, 0.15);
    }
    paint_stop_screen(kernel, stop, detail);

    kernel.host.halt();
}

fn paint_stop_screen(kernel: &Arc<Kernel>, stop: StopCode, detail: &str) {
    let host = &kernel.host;
    host.console_write("");
    host.console_write("  A problem has been detected and VT-OS has been halted");
    host.console_write("  to prevent damage to this machine.");
    host.console_write("");
    host.console_write(&format!("  *** STOP: {}", stop.name()));
    host.console_write(&format!("      {detail}"));
    host.console_write("");
    host.console_write(&format!(
        "  uptime {:.2}s, dump /log/crash_{:03}.dump",
        kernel.uptime(),
        kernel.boot_counter.load(Ordering::Relaxed)
    ));
}

/// Explicit kernel panic with a reason value for the dump.
pub fn panic(kernel: &Arc<Kernel>, reason: &Value) {
    bugcheck(kernel, StopCode::KernelPanic, &format!("{reason}"));
}
