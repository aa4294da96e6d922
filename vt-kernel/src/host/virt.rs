//! In-memory host implementation.
//!
//! `VirtHost` simulates the scripted compute host: a scripted event queue,
//! raw components backed by closures, an EEPROM byte area, and adjustable
//! memory counters. The kernel binary boots on one of these; the test
//! suite scripts them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::time::Instant;

use spinning_top::Spinlock;
use vt_abi::{Status, SysError, SysResult, Value};
use vt_abi::encoding::EepromData;

use super::{Component, Host, HostEvent};

type ComponentHandler = Box<dyn Fn(&str, &[Value]) -> SysResult<Vec<Value>> + Send + Sync>;

struct VirtComponent {
    kind: String,
    handler: ComponentHandler,
}

/// Simulated host machine.
pub struct VirtHost {
    start: Instant,
    /// Virtual clock offset in milliseconds, added to real elapsed time.
    /// Tests advance this to skip ahead without sleeping.
    clock_skew_ms: AtomicI64,
    events: Spinlock<VecDeque<HostEvent>>,
    components: Spinlock<BTreeMap<String, VirtComponent>>,
    total_memory: u64,
    free_memory: AtomicU64,
    eeprom: Spinlock<Vec<u8>>,
    halted: AtomicBool,
    rebooted: AtomicBool,
    beeps: Spinlock<Vec<(u32, f64)>>,
    console: Spinlock<Vec<String>>,
    echo_console: bool,
    rng_state: AtomicU64,
}

impl VirtHost {
    pub fn builder() -> VirtHostBuilder {
        VirtHostBuilder::default()
    }

    /// Queue an event for the kernel to pull.
    pub fn push_event(&self, event: HostEvent) {
        self.events.lock().push_back(event);
    }

    /// Advance the virtual clock without sleeping.
    pub fn advance_ms(&self, ms: i64) {
        self.clock_skew_ms.fetch_add(ms, Ordering::Relaxed);
    }

    /// Pin the free-memory probe to an exact value.
    pub fn set_free_memory(&self, bytes: u64) {
        self.free_memory.store(bytes, Ordering::Relaxed);
    }

    pub fn is_halted(&self) -> bool {
        self.halted.load(Ordering::Relaxed)
    }

    pub fn was_rebooted(&self) -> bool {
        self.rebooted.load(Ordering::Relaxed)
    }

    /// Everything written to the host console so far.
    pub fn console_lines(&self) -> Vec<String> {
        self.console.lock().clone()
    }

    /// Tones emitted so far, as `(frequency, duration)` pairs.
    pub fn beeps(&self) -> Vec<(u32, f64)> {
        self.beeps.lock().clone()
    }
}

impl Host for VirtHost {
    fn pull_event(&self, timeout: f64) -> Option<HostEvent> {
        if let Some(event) = self.events.lock().pop_front() {
            return Some(event);
        }
        if timeout <= 0.0 {
            return None;
        }
        let deadline = Instant::now() + std::time::Duration::from_secs_f64(timeout);
        while Instant::now() < deadline {
            if let Some(event) = self.events.lock().pop_front() {
                return Some(event);
            }
            std::thread::sleep(std::time::Duration::from_millis(1));
        }
        None
    }

    fn uptime(&self) -> f64 {
        let skew = self.clock_skew_ms.load(Ordering::Relaxed) as f64 / 1000.0;
        self.start.elapsed().as_secs_f64() + skew
    }

    fn total_memory(&self) -> u64 {
        self.total_memory
    }

    fn free_memory(&self) -> u64 {
        self.free_memory.load(Ordering::Relaxed)
    }

    fn components(&self) -> Vec<Component> {
        self.components
            .lock()
            .iter()
            .map(|(address, c)| Component {
                address: address.clone(),
                kind: c.kind.clone(),
            })
            .collect()
    }

    fn invoke(&self, address: &str, method: &str, args: &[Value]) -> SysResult<Vec<Value>> {
        let components = self.components.lock();
        let component = components
            .get(address)
            .ok_or_else(|| SysError::with(Status::NoSuchDevice, format!("no component {address}")))?;
        (component.handler)(method, args)
    }

    fn beep(&self, freq: u32, duration: f64) {
        self.beeps.lock().push((freq, duration));
    }

    fn halt(&self) {
        self.halted.store(true, Ordering::Relaxed);
    }

    fn reboot(&self) {
        self.rebooted.store(true, Ordering::Relaxed);
        self.halted.store(true, Ordering::Relaxed);
    }

    fn eeprom_data(&self) -> Vec<u8> {
        self.eeprom.lock().clone()
    }

    fn set_eeprom_data(&self, data: &[u8]) {
        *self.eeprom.lock() = data.to_vec();
    }

    fn random_bytes(&self, buf: &mut [u8]) {
        // xorshift64* over a per-host state, mixed with the clock. Quality
        // only needs to defeat in-process guessing, matching the platform.
        let mut state = self.rng_state.load(Ordering::Relaxed) ^ self.start.elapsed().as_nanos() as u64;
        for b in buf.iter_mut() {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            *b = (state.wrapping_mul(0x2545_F491_4F6C_DD1D) >> 56) as u8;
        }
        self.rng_state.store(state, Ordering::Relaxed);
    }

    fn console_write(&self, line: &str) {
        if self.echo_console {
            println!("{line}");
        }
        self.console.lock().push(line.to_string());
    }
}

/// Builder for a scripted [`VirtHost`].
pub struct VirtHostBuilder {
    total_memory: u64,
    free_memory: u64,
    eeprom: Vec<u8>,
    events: VecDeque<HostEvent>,
    components: BTreeMap<String, VirtComponent>,
    echo_console: bool,
}

impl Default for VirtHostBuilder {
    fn default() -> Self {
        Self {
            total_memory: 4 * 1024 * 1024,
            free_memory: 2 * 1024 * 1024,
            eeprom: EepromData::fresh().to_bytes(),
            events: VecDeque::new(),
            components: BTreeMap::new(),
            echo_console: false,
        }
    }
}

impl VirtHostBuilder {
    pub fn memory(mut self, total: u64, free: u64) -> Self {
        self.total_memory = total;
        self.free_memory = free;
        self
    }

    pub fn eeprom(mut self, data: Vec<u8>) -> Self {
        self.eeprom = data;
        self
    }

    pub fn queue_event(mut self, event: HostEvent) -> Self {
        self.events.push_back(event);
        self
    }

    /// Echo console writes to stdout (used by the binary, not the tests).
    pub fn echo_console(mut self) -> Self {
        self.echo_console = true;
        self
    }

    /// Attach a raw component with a closure-backed method handler.
    pub fn component(
        mut self,
        address: &str,
        kind: &str,
        handler: impl Fn(&str, &[Value]) -> SysResult<Vec<Value>> + Send + Sync + 'static,
    ) -> Self {
        self.components.insert(
            address.to_string(),
            VirtComponent {
                kind: kind.to_string(),
                handler: Box::new(handler),
            },
        );
        self
    }

    /// Attach a managed filesystem component backed by an in-memory tree.
    ///
    /// Returns the shared tree alongside the builder so tests can inspect
    /// files written by the kernel (crash dumps in particular).
    pub fn managed_fs(
        self,
        files: impl IntoIterator<Item = (&'static str, Vec<u8>)>,
    ) -> (Self, Arc<Spinlock<BTreeMap<String, Vec<u8>>>>) {
        let tree: Arc<Spinlock<BTreeMap<String, Vec<u8>>>> = Arc::new(Spinlock::new(
            files
                .into_iter()
                .map(|(path, data)| (path.to_string(), data))
                .collect(),
        ));
        let handle = tree.clone();
        let this = self.component("fs0", "filesystem", move |method, args| {
            let path = args
                .first()
                .and_then(Value::as_str)
                .ok_or(SysError::new(Status::InvalidParameter))?;
            let mut tree = tree.lock();
            match method {
                "exists" => Ok(vec![Value::Bool(tree.contains_key(path))]),
                "read" => match tree.get(path) {
                    Some(data) => Ok(vec![Value::Bytes(data.clone())]),
                    None => Err(SysError::new(Status::NoSuchFile)),
                },
                "write" => {
                    let data = args
                        .get(1)
                        .and_then(Value::as_bytes)
                        .ok_or(SysError::new(Status::InvalidParameter))?;
                    tree.insert(path.to_string(), data.to_vec());
                    Ok(vec![Value::Bool(true)])
                }
                "list" => {
                    let prefix = if path.ends_with('/') {
                        path.to_string()
                    } else {
                        format!("{path}/")
                    };
                    let names: Vec<Value> = tree
                        .keys()
                        .filter(|k| k.starts_with(&prefix))
                        .map(|k| Value::from(&k[prefix.len()..]))
                        .collect();
                    Ok(vec![Value::List(names)])
                }
                _ => Err(SysError::new(Status::NotImplemented)),
            }
        });
        (this, handle)
    }

    /// Attach a raw drive component with the given sector image.
    pub fn drive(self, image: Vec<u8>) -> Self {
        let sectors = Arc::new(Spinlock::new(image));
        self.component("drive0", "drive", move |method, args| {
            let mut image = sectors.lock();
            match method {
                "capacity" => Ok(vec![Value::from(image.len())]),
                "read_sector" => {
                    let index = args
                        .first()
                        .and_then(Value::as_int)
                        .ok_or(SysError::new(Status::InvalidParameter))?
                        as usize;
                    let start = index * 512;
                    if start + 512 > image.len() {
                        return Err(SysError::new(Status::InvalidParameter));
                    }
                    Ok(vec![Value::Bytes(image[start..start + 512].to_vec())])
                }
                "write_sector" => {
                    let index = args
                        .first()
                        .and_then(Value::as_int)
                        .ok_or(SysError::new(Status::InvalidParameter))?
                        as usize;
                    let data = args
                        .get(1)
                        .and_then(Value::as_bytes)
                        .ok_or(SysError::new(Status::InvalidParameter))?;
                    let start = index * 512;
                    if start + data.len() > image.len() {
                        return Err(SysError::new(Status::InvalidParameter));
                    }
                    image[start..start + data.len()].copy_from_slice(data);
                    Ok(vec![Value::Bool(true)])
                }
                _ => Err(SysError::new(Status::NotImplemented)),
            }
        })
    }

    pub fn build(self) -> Arc<VirtHost> {
        Arc::new(VirtHost {
            start: Instant::now(),
            clock_skew_ms: AtomicI64::new(0),
            events: Spinlock::new(self.events),
            components: Spinlock::new(self.components),
            total_memory: self.total_memory,
            free_memory: AtomicU64::new(self.free_memory),
            eeprom: Spinlock::new(self.eeprom),
            halted: AtomicBool::new(false),
            rebooted: AtomicBool::new(false),
            beeps: Spinlock::new(Vec::new()),
            console: Spinlock::new(Vec::new()),
            echo_console: self.echo_console,
            rng_state: AtomicU64::new(0x9E37_79B9_7F4A_7C15),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_queue_pops_in_order() {
        let host = VirtHost::builder()
            .queue_event(HostEvent {
                kind: "key_down".into(),
                source: None,
                args: vec![Value::Int(65)],
            })
            .build();
        host.push_event(HostEvent {
            kind: "key_up".into(),
            source: None,
            args: vec![],
        });

        assert_eq!(host.pull_event(0.0).unwrap().kind, "key_down");
        assert_eq!(host.pull_event(0.0).unwrap().kind, "key_up");
        assert_eq!(host.pull_event(0.0), None);
    }

    #[test]
    fn clock_skew_advances_uptime() {
        let host = VirtHost::builder().build();
        let before = host.uptime();
        host.advance_ms(5000);
        assert!(host.uptime() - before >= 5.0);
    }

    #[test]
    fn managed_fs_component_round_trips() {
        let (builder, tree) = VirtHost::builder().managed_fs([("/etc/fstab", b"root".to_vec())]);
        let host = builder.build();

        let out = host
            .invoke("fs0", "read", &[Value::from("/etc/fstab")])
            .unwrap();
        assert_eq!(out[0].as_bytes(), Some(&b"root"[..]));

        host.invoke(
            "fs0",
            "write",
            &[Value::from("/log/x"), Value::Bytes(b"hi".to_vec())],
        )
        .unwrap();
        assert_eq!(tree.lock().get("/log/x").unwrap(), b"hi");
    }

    #[test]
    fn random_bytes_vary() {
        let host = VirtHost::builder().build();
        let mut a = [0u8; 16];
        let mut b = [0u8; 16];
        host.random_bytes(&mut a);
        host.random_bytes(&mut b);
        assert_ne!(a, b);
    }
}
