//! PatchGuard: tampering with the kernel tables stops the machine.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use vt_abi::{Ring, Value};
use vt_kernel::host::VirtHost;
use vt_kernel::kernel::Kernel;
use vt_kernel::logging::LogLevel;
use vt_kernel::{Host, StopCode, boot, run_until};

use common::{seed_boot_processes, spawn};

use spinning_top::Spinlock;
use std::collections::BTreeMap;

fn kernel_with_fs() -> (
    Arc<VirtHost>,
    Arc<Kernel>,
    Arc<Spinlock<BTreeMap<String, Vec<u8>>>>,
) {
    let (builder, fs) = VirtHost::builder().managed_fs([]);
    let host = builder.build();
    let kernel = boot(host.clone(), Vec::new(), false);
    (host, kernel, fs)
}

/// Arm, tamper with the override map from ring 1, and watch the next
/// integrity check stop the machine with a crash dump, the EEPROM crash
/// byte, the descending tones, and the stop screen.
#[test]
fn override_tampering_bugchecks() {
    let (host, kernel, fs) = kernel_with_fs();
    seed_boot_processes(&kernel);

    let armed = Arc::new(AtomicBool::new(false));
    {
        let armed = armed.clone();
        spawn(&kernel, "armer", Ring::Kernel, None, move |ctx| {
            let armed = armed.clone();
            async move {
                ctx.sys("patchguard_arm", vec![]).await.unwrap();
                armed.store(true, Ordering::Relaxed);
                0
            }
        });
    }
    assert!(run_until(&kernel, 10_000, |_| armed.load(Ordering::Relaxed)));

    // Post-arm tamper: a ring 1 server claims a syscall.
    let tampered = Arc::new(AtomicBool::new(false));
    {
        let tampered = tampered.clone();
        spawn(&kernel, "rogue", Ring::System, None, move |ctx| {
            let tampered = tampered.clone();
            async move {
                ctx.sys("svc_register_override", vec![Value::from("vfs_open")])
                    .await
                    .unwrap();
                tampered.store(true, Ordering::Relaxed);
                0
            }
        });
    }
    assert!(run_until(&kernel, 10_000, |_| {
        tampered.load(Ordering::Relaxed)
    }));

    // The randomised tick fires within its upper bound.
    run_until(&kernel, 150, |k| k.is_halted());

    assert_eq!(
        kernel.stop_code(),
        Some(StopCode::CriticalStructureCorruption)
    );
    assert!(host.is_halted());

    // Each violation logged at CRIT.
    let crit = kernel.dmesg().read(None, 128, LogLevel::Crit);
    assert!(crit.iter().any(|e| e.message.contains("patchguard:")));
    assert!(
        crit.iter()
            .any(|e| e.message.contains("CRITICAL_STRUCTURE_CORRUPTION"))
    );

    // Crash dump on the root volume.
    let dumps: Vec<String> = fs
        .lock()
        .keys()
        .filter(|k| k.starts_with("/log/crash_"))
        .cloned()
        .collect();
    assert_eq!(dumps.len(), 1);
    let dump = String::from_utf8(fs.lock().get(&dumps[0]).unwrap().clone()).unwrap();
    assert!(dump.contains("CRITICAL_STRUCTURE_CORRUPTION"));
    assert!(dump.contains("-- processes --"));
    assert!(dump.contains("-- dmesg tail --"));

    // EEPROM carries the crash cause and the violation counter.
    let eeprom = vt_abi::encoding::EepromData::parse(&host.eeprom_data()).unwrap();
    assert_eq!(
        eeprom.crash_cause(),
        Some(vt_abi::encoding::CrashCause::StructureCorruption)
    );
    assert_eq!(eeprom.pg_violations, 1);

    // Descending tones and the stop screen.
    let beeps = kernel_beeps(&host);
    assert_eq!(beeps, vec![1000, 800, 600, 440]);
    assert!(
        host.console_lines()
            .iter()
            .any(|l| l.contains("*** STOP: CRITICAL_STRUCTURE_CORRUPTION"))
    );

    // The next boot reports the unclean shutdown.
    let kernel2 = boot(host.clone(), Vec::new(), false);
    let sec = kernel2.dmesg().read(None, 32, LogLevel::Sec);
    assert!(sec.iter().any(|e| e.message.contains("not clean")));
}

fn kernel_beeps(host: &Arc<VirtHost>) -> Vec<u32> {
    host.beeps().iter().map(|(freq, _)| *freq).collect()
}

/// Without tampering, the armed monitor ticks clean indefinitely.
#[test]
fn clean_tables_pass_checks() {
    let (_host, kernel, _fs) = kernel_with_fs();
    seed_boot_processes(&kernel);

    let status: Arc<Spinlock<Option<Value>>> = Arc::new(Spinlock::new(None));
    {
        let status = status.clone();
        spawn(&kernel, "checker", Ring::Kernel, None, move |ctx| {
            let status = status.clone();
            async move {
                ctx.sys("patchguard_arm", vec![]).await.unwrap();
                match ctx.sys("patchguard_check", vec![]).await {
                    Ok(Value::Bool(true)) => {}
                    other => panic!("check: {other:?}"),
                }
                *status.lock() = Some(ctx.sys("patchguard_status", vec![]).await.unwrap());
                0
            }
        });
    }

    run_until(&kernel, 10_000, |_| status.lock().is_some());
    let status = status.lock().clone().expect("status collected");
    assert_eq!(status.get("bArmed").as_bool(), Some(true));
    assert!(status.get("nChecks").as_int().unwrap_or(0) >= 1);
    assert_eq!(status.get("nViolations").as_int(), Some(0));
    assert!(!kernel.is_halted());
}
