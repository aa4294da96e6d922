//! Boot: EEPROM handling, volume mount, loader configuration, and the
//! initial process line-up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use vt_abi::Ring;
use vt_abi::encoding::{CrashCause, EepromData};

use crate::host::Host;
use crate::kernel::{Kernel, SpawnSpec};
use crate::logging::LogLevel;
use crate::sandbox::{Program, program};
use crate::volume::mount_root;

/// Loader configuration merged from the EEPROM boot bytes and
/// `/boot/loader.cfg`.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub screen_log_level: LogLevel,
    pub quantum_ms: Option<u64>,
    pub check_interval: Option<u32>,
}

impl Default for BootConfig {
    fn default() -> Self {
        BootConfig {
            screen_log_level: LogLevel::Info,
            quantum_ms: None,
            check_interval: None,
        }
    }
}

/// Parse the `key=value` lines of `/boot/loader.cfg`.
fn parse_loader_cfg(text: &str, config: &mut BootConfig) {
    for line in text.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match (key.trim(), value.trim()) {
            ("log_level", v) => {
                if let Some(level) = v.parse::<u8>().ok().and_then(LogLevel::from_number) {
                    config.screen_log_level = level;
                }
            }
            ("quantum_ms", v) => config.quantum_ms = v.parse().ok(),
            ("check_interval", v) => config.check_interval = v.parse().ok(),
            _ => {}
        }
    }
}

/// Bring a kernel up on a host.
///
/// Reads and rewrites the EEPROM data area (boot counter, crash-cause
/// byte), mounts the root volume, applies loader configuration, registers
/// the given program images, and, when `start_system` is set, spawns
/// the kernel housekeeping process (PID 0) and `/bin/init` (PID 1).
pub fn boot(
    host: Arc<dyn Host>,
    images: impl IntoIterator<Item = (String, Arc<dyn Program>)>,
    start_system: bool,
) -> Arc<Kernel> {
    // EEPROM: bump the boot counter, capture and clear the crash byte.
    let mut eeprom = EepromData::parse(&host.eeprom_data()).unwrap_or_else(EepromData::fresh);
    let previous_crash = eeprom.crash_cause();
    let boots = eeprom.boot_counter() + 1;
    eeprom.set_boot_counter(boots);
    eeprom.set_crash_cause(CrashCause::Clean);
    host.set_eeprom_data(&eeprom.to_bytes());

    let screen_level = LogLevel::from_number(eeprom.log_level).unwrap_or(LogLevel::Info);
    let kernel = Kernel::new(host.clone(), screen_level);
    kernel.boot_counter.store(boots as u64, Ordering::Relaxed);

    kernel.kprint(LogLevel::Info, format!("VT-OS kernel starting, boot #{boots}"));
    match previous_crash {
        Some(CrashCause::Clean) | None => {}
        Some(cause) => {
            kernel.kprint(
                LogLevel::Sec,
                format!("previous shutdown was not clean: {cause:?}"),
            );
        }
    }

    // Root volume and loader configuration.
    let mut config = BootConfig {
        screen_log_level: screen_level,
        ..BootConfig::default()
    };
    if let Some(volume) = mount_root(&host) {
        kernel.kprint(
            LogLevel::Info,
            format!("root volume mounted ({})", volume.kind()),
        );
        if let Ok(data) = volume.read("/boot/loader.cfg") {
            if let Ok(text) = String::from_utf8(data) {
                parse_loader_cfg(&text, &mut config);
            }
        }
        *kernel.volume.lock() = Some(volume);
    } else {
        kernel.kprint(LogLevel::Warn, "no root volume found");
    }

    kernel.dmesg.set_screen_level(config.screen_log_level);
    if let Some(quantum) = config.quantum_ms {
        kernel.preempt.set_quantum_ms(quantum);
    }
    if let Some(interval) = config.check_interval {
        kernel.preempt.set_check_interval(interval);
    }

    for (path, image) in images {
        kernel.programs.register(&path, image);
    }

    if start_system {
        // PID 0: kernel housekeeping. Keeps the machine alive and gives
        // the boot set its protected anchor.
        let idle = program(|ctx| async move {
            loop {
                ctx.yield_now().await;
            }
        });
        kernel
            .spawn(SpawnSpec::new("kernel", Ring::Kernel, idle))
            .expect("spawning the kernel process cannot fail at boot");

        // PID 1: init, when an image is registered. The boot driver list
        // travels through init's environment down to the Pipeline Manager.
        if let Some(init) = kernel.programs.resolve("/bin/init") {
            let mut env = BTreeMap::new();
            {
                let volume = kernel.volume.lock();
                if let Some(drivers) = volume
                    .as_ref()
                    .and_then(|v| v.read("/etc/drivers.cfg").ok())
                    .and_then(|data| String::from_utf8(data).ok())
                {
                    let list: Vec<&str> = drivers
                        .lines()
                        .map(str::trim)
                        .filter(|l| !l.is_empty() && !l.starts_with('#'))
                        .collect();
                    if !list.is_empty() {
                        env.insert("drivers".to_string(), list.join(","));
                    }
                }
            }
            kernel
                .spawn(
                    SpawnSpec::new("/bin/init", Ring::Kernel, init)
                        .parent(vt_abi::Pid::KERNEL)
                        .env(env),
                )
                .expect("spawning init cannot fail at boot");
        }
    }

    kernel
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtHost;

    #[test]
    fn loader_cfg_parsing() {
        let mut config = BootConfig::default();
        parse_loader_cfg(
            "# comment\nlog_level=2\nquantum_ms=25\ncheck_interval=64\nbogus\n",
            &mut config,
        );
        assert_eq!(config.screen_log_level, LogLevel::Warn);
        assert_eq!(config.quantum_ms, Some(25));
        assert_eq!(config.check_interval, Some(64));
    }

    #[test]
    fn boot_counts_and_clears_crash_byte() {
        let mut eeprom = EepromData::fresh();
        eeprom.set_boot_counter(6);
        eeprom.set_crash_cause(CrashCause::Watchdog);
        let host = VirtHost::builder().eeprom(eeprom.to_bytes()).build();

        let kernel = boot(host.clone(), [], false);
        assert_eq!(kernel.boot_counter.load(Ordering::Relaxed), 7);

        let rewritten = EepromData::parse(&host.eeprom_data()).unwrap();
        assert_eq!(rewritten.boot_counter(), 7);
        assert_eq!(rewritten.crash_cause(), Some(CrashCause::Clean));

        // The unclean shutdown is reported at security level.
        let sec = kernel.dmesg.read(None, 16, LogLevel::Sec);
        assert!(sec.iter().any(|e| e.message.contains("not clean")));
    }

    #[test]
    fn boot_applies_loader_cfg_from_volume() {
        let (builder, _tree) = VirtHost::builder()
            .managed_fs([("/boot/loader.cfg", b"quantum_ms=20\n".to_vec())]);
        let host = builder.build();
        let kernel = boot(host, [], false);
        assert_eq!(kernel.preempt.quantum_ms(), 20);
    }
}
