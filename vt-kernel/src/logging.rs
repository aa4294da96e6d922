//! Kernel log: the dmesg ring and the console mirror.
//!
//! Every kernel-originated message goes through [`DmesgLog::kprint`], which
//! appends a structured entry to a bounded ring and mirrors it to the host
//! console when it clears the screen log level. The `log` crate facade is
//! bridged into the same ring so that `debug!`/`warn!` call sites inside the
//! kernel land in dmesg too.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::OnceLock;

use ring_buffer::RingBuffer;
use spinning_top::Spinlock;
use vt_abi::{DMESG_CAPACITY, Pid};

use crate::host::Host;

/// Severity of a dmesg entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum LogLevel {
    Debug = 0,
    Info = 1,
    Warn = 2,
    Fail = 3,
    Sec = 4,
    Crit = 5,
}

impl LogLevel {
    pub const fn tag(self) -> &'static str {
        match self {
            LogLevel::Debug => "DBG",
            LogLevel::Info => "INF",
            LogLevel::Warn => "WRN",
            LogLevel::Fail => "FAIL",
            LogLevel::Sec => "SEC",
            LogLevel::Crit => "CRIT",
        }
    }

    pub fn from_number(n: u8) -> Option<LogLevel> {
        Some(match n {
            0 => LogLevel::Debug,
            1 => LogLevel::Info,
            2 => LogLevel::Warn,
            3 => LogLevel::Fail,
            4 => LogLevel::Sec,
            5 => LogLevel::Crit,
            _ => return None,
        })
    }
}

/// One dmesg record.
#[derive(Debug, Clone)]
pub struct DmesgEntry {
    /// Monotonic sequence number, never reused.
    pub seq: u64,
    /// Host uptime when the entry was pushed, in seconds.
    pub uptime: f64,
    pub level: LogLevel,
    pub message: String,
    /// Originating process, when the message came from a process context.
    pub pid: Option<Pid>,
}

struct DmesgInner {
    ring: RingBuffer<DmesgEntry>,
    next_seq: u64,
}

/// The kernel log.
pub struct DmesgLog {
    inner: Spinlock<DmesgInner>,
    screen_level: AtomicU8,
    host: Arc<dyn Host>,
}

impl DmesgLog {
    pub fn new(host: Arc<dyn Host>, screen_level: LogLevel) -> Arc<DmesgLog> {
        Arc::new(DmesgLog {
            inner: Spinlock::new(DmesgInner {
                ring: RingBuffer::new(DMESG_CAPACITY),
                next_seq: 0,
            }),
            screen_level: AtomicU8::new(screen_level as u8),
            host,
        })
    }

    /// Push one entry and render it when it clears the screen level.
    pub fn kprint(&self, level: LogLevel, pid: Option<Pid>, message: impl Into<String>) {
        let message = message.into();
        let uptime = self.host.uptime();

        {
            let mut inner = self.inner.lock();
            let seq = inner.next_seq;
            inner.next_seq += 1;
            inner.ring.push(DmesgEntry {
                seq,
                uptime,
                level,
                message: message.clone(),
                pid,
            });
        }

        if level as u8 >= self.screen_level.load(Ordering::Relaxed) {
            let origin = match pid {
                Some(pid) => format!(" pid={pid}"),
                None => String::new(),
            };
            self.host
                .console_write(&format!("[{uptime:10.4}] {}{origin}: {message}", level.tag()));
        }
    }

    /// Change the screen mirroring threshold.
    pub fn set_screen_level(&self, level: LogLevel) {
        self.screen_level.store(level as u8, Ordering::Relaxed);
    }

    /// Read entries with sequence number greater than `last_seq`, at or
    /// above `level`, up to `max` of them.
    pub fn read(&self, last_seq: Option<u64>, max: usize, level: LogLevel) -> Vec<DmesgEntry> {
        let inner = self.inner.lock();
        inner
            .ring
            .iter()
            .filter(|e| last_seq.is_none_or(|s| e.seq > s))
            .filter(|e| e.level >= level)
            .take(max)
            .cloned()
            .collect()
    }

    /// The newest `n` entries, oldest first. Used by the crash dump writer.
    pub fn tail(&self, n: usize) -> Vec<DmesgEntry> {
        let inner = self.inner.lock();
        inner.ring.tail(n).cloned().collect()
    }

    /// Highest sequence number issued so far, if any entry exists.
    pub fn last_seq(&self) -> Option<u64> {
        let inner = self.inner.lock();
        inner.next_seq.checked_sub(1)
    }
}

// =============================================================================
// `log` facade bridge
// =============================================================================

/// Sink for the `log` crate macros. Routes records into the most recently
/// installed kernel's dmesg ring.
struct FacadeLog;

static FACADE_TARGET: Spinlock<Option<Arc<DmesgLog>>> = Spinlock::new(None);
static FACADE_INSTALLED: OnceLock<()> = OnceLock::new();

impl log::Log for FacadeLog {
    fn enabled(&self, _metadata: &log::Metadata) -> bool {
        FACADE_TARGET.lock().is_some()
    }

    fn log(&self, record: &log::Record) {
        let Some(dmesg) = FACADE_TARGET.lock().clone() else {
            return;
        };
        let level = match record.level() {
            log::Level::Error => LogLevel::Fail,
            log::Level::Warn => LogLevel::Warn,
            log::Level::Info => LogLevel::Info,
            log::Level::Debug | log::Level::Trace => LogLevel::Debug,
        };
        dmesg.kprint(level, None, format!("{}", record.args()));
    }

    fn flush(&self) {}
}

static FACADE: FacadeLog = FacadeLog;

/// Point the `log` facade at this kernel's dmesg ring.
pub fn install_facade(dmesg: Arc<DmesgLog>) {
    *FACADE_TARGET.lock() = Some(dmesg);
    FACADE_INSTALLED.get_or_init(|| {
        // Ignore the error: another component may already own the global
        // logger when the kernel is embedded in a larger process.
        let _ = log::set_logger(&FACADE);
        log::set_max_level(log::LevelFilter::Debug);
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtHost;

    #[test]
    fn kprint_assigns_monotonic_seq() {
        let host = VirtHost::builder().build();
        let dmesg = DmesgLog::new(host, LogLevel::Crit);
        dmesg.kprint(LogLevel::Info, None, "a");
        dmesg.kprint(LogLevel::Warn, Some(Pid(7)), "b");

        let entries = dmesg.read(None, 16, LogLevel::Debug);
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert_eq!(entries[1].pid, Some(Pid(7)));
    }

    #[test]
    fn read_filters_by_seq_and_level() {
        let host = VirtHost::builder().build();
        let dmesg = DmesgLog::new(host, LogLevel::Crit);
        dmesg.kprint(LogLevel::Debug, None, "noise");
        dmesg.kprint(LogLevel::Sec, None, "RING VIOLATION: pid=9");
        dmesg.kprint(LogLevel::Info, None, "boot ok");

        let sec = dmesg.read(None, 16, LogLevel::Sec);
        assert_eq!(sec.len(), 1);
        assert!(sec[0].message.contains("RING VIOLATION"));

        let after = dmesg.read(Some(1), 16, LogLevel::Debug);
        assert_eq!(after.len(), 1);
        assert_eq!(after[0].message, "boot ok");
    }

    #[test]
    fn screen_mirror_honours_level() {
        let host = VirtHost::builder().build();
        let dmesg = DmesgLog::new(host.clone(), LogLevel::Warn);
        dmesg.kprint(LogLevel::Info, None, "quiet");
        dmesg.kprint(LogLevel::Fail, None, "loud");

        let lines = host.console_lines();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("loud"));
    }

    #[test]
    fn ring_is_bounded() {
        let host = VirtHost::builder().build();
        let dmesg = DmesgLog::new(host, LogLevel::Crit);
        for i in 0..(DMESG_CAPACITY + 10) {
            dmesg.kprint(LogLevel::Info, None, format!("m{i}"));
        }
        let entries = dmesg.read(None, DMESG_CAPACITY * 2, LogLevel::Debug);
        assert_eq!(entries.len(), DMESG_CAPACITY);
        // Oldest entries were evicted.
        assert_eq!(entries[0].seq, 10);
    }
}
