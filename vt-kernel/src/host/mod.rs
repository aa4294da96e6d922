//! Host abstraction.
//!
//! The kernel runs on a scripted compute host that exposes a pull-based
//! event queue, raw components addressed by string, a monotonic uptime
//! clock, and a shared memory pool. Everything the kernel needs from the
//! host goes through the [`Host`] trait; [`VirtHost`] is the in-memory
//! implementation used by the binary and the test suite.
//!
//! All kernel timing decisions use [`Host::uptime`]; wall-clock time is
//! never consulted for scheduling.

mod virt;

pub use virt::{VirtHost, VirtHostBuilder};

use vt_abi::{SysResult, Value};

/// A single event pulled from the host queue.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEvent {
    /// Event kind, e.g. `"key_down"`, `"component_added"`.
    pub kind: String,
    /// Address of the originating component, when there is one.
    pub source: Option<String>,
    /// Event payload.
    pub args: Vec<Value>,
}

/// A raw component visible on the host bus.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Component {
    /// Opaque component address.
    pub address: String,
    /// Component kind, e.g. `"screen"`, `"drive"`, `"eeprom"`.
    pub kind: String,
}

/// The host machine as seen by the kernel.
pub trait Host: Send + Sync {
    /// Pull at most one queued event, waiting up to `timeout` seconds.
    /// A timeout of `0.0` polls without waiting.
    fn pull_event(&self, timeout: f64) -> Option<HostEvent>;

    /// Monotonic uptime in seconds.
    fn uptime(&self) -> f64;

    /// Total installed memory, in bytes.
    fn total_memory(&self) -> u64;

    /// Currently free memory, in bytes.
    fn free_memory(&self) -> u64;

    /// List the raw components on the bus.
    fn components(&self) -> Vec<Component>;

    /// Invoke a method on a raw component.
    fn invoke(&self, address: &str, method: &str, args: &[Value]) -> SysResult<Vec<Value>>;

    /// Emit a tone.
    fn beep(&self, freq: u32, duration: f64);

    /// Stop the machine. The kernel does not return to the scheduler after
    /// calling this.
    fn halt(&self);

    /// Restart the machine.
    fn reboot(&self);

    /// Read the EEPROM data area.
    fn eeprom_data(&self) -> Vec<u8>;

    /// Replace the EEPROM data area.
    fn set_eeprom_data(&self, data: &[u8]);

    /// Fill `buf` with host-provided randomness.
    fn random_bytes(&self, buf: &mut [u8]);

    /// Write a line to the host console.
    fn console_write(&self, line: &str);
}

/// Uptime in whole milliseconds, the unit used by deadlines and quanta.
pub fn uptime_ms(host: &dyn Host) -> u64 {
    (host.uptime() * 1000.0) as u64
}
