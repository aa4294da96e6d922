//! The kernel value.
//!
//! Every kernel table (process table, object namespace, syscall table,
//! registry, dmesg ring) hangs off a single `Kernel` struct threaded
//! through every handler. Subsystem state sits behind short-held spinlocks;
//! no lock is ever held across a suspension point, and anything that wakes
//! a process is applied after the locks it needed are released.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::AtomicU64;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use spinning_top::Spinlock;
use vt_abi::{
    Irql, Pid, Ring, Signal, SignalDefault, Status, SysError, SysResult, Value,
};

use crate::host::{Host, HostEvent, uptime_ms};
use crate::io::IrpTable;
use crate::ipc::signal::{self, DeliveryAction};
use crate::ipc::{DpcQueue, KernelSignal};
use crate::logging::{DmesgLog, LogLevel};
use crate::object::{HandleTable, ObjectManager};
use crate::patchguard::PatchGuard;
use crate::preempt::Preempt;
use crate::process::{
    Park, Process, ProcessStatus, ProcessTable, WaitReason, WakeCell,
};
use crate::registry::Registry;
use crate::sandbox::{Program, ProgramRegistry, Sandbox};
use crate::sched::SchedState;
use crate::syscall::SyscallTable;
use crate::token::TokenMint;
use crate::volume::Volume;

/// Stop codes named on the panic screen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopCode {
    KernelPanic,
    CriticalStructureCorruption,
    CriticalProcessDied,
}

impl StopCode {
    pub const fn name(self) -> &'static str {
        match self {
            StopCode::KernelPanic => "KERNEL_PANIC",
            StopCode::CriticalStructureCorruption => "CRITICAL_STRUCTURE_CORRUPTION",
            StopCode::CriticalProcessDied => "CRITICAL_PROCESS_DIED",
        }
    }
}

/// Standard stream wiring for a spawned process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdioSpec {
    /// Copy the parent's standard handles (re-minted for the child).
    Inherit,
    /// Fresh pipe; the parent receives its own handle to the same pipe.
    NewPipe,
    /// No standard handle; writes fall through to the host console.
    Console,
}

/// Everything needed to create a process.
pub struct SpawnSpec {
    pub name: String,
    pub ring: Ring,
    pub parent: Option<Pid>,
    pub uid: u32,
    pub env: BTreeMap<String, String>,
    pub program: Arc<dyn Program>,
    pub stdout: StdioSpec,
}

impl SpawnSpec {
    pub fn new(name: impl Into<String>, ring: Ring, program: Arc<dyn Program>) -> SpawnSpec {
        SpawnSpec {
            name: name.into(),
            ring,
            parent: None,
            uid: 0,
            env: BTreeMap::new(),
            program,
            stdout: StdioSpec::Console,
        }
    }

    pub fn parent(mut self, pid: Pid) -> SpawnSpec {
        self.parent = Some(pid);
        self
    }

    pub fn uid(mut self, uid: u32) -> SpawnSpec {
        self.uid = uid;
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> SpawnSpec {
        self.env = env;
        self
    }

    pub fn stdout(mut self, stdio: StdioSpec) -> SpawnSpec {
        self.stdout = stdio;
        self
    }
}

/// Result of a spawn, including the parent-side stdout handle when a fresh
/// pipe was requested.
#[derive(Debug)]
pub struct Spawned {
    pub pid: Pid,
    pub stdout: Option<String>,
}

/// The kernel.
pub struct Kernel {
    pub(crate) host: Arc<dyn Host>,
    pub(crate) dmesg: Arc<DmesgLog>,
    pub(crate) mint: TokenMint,
    pub(crate) procs: Spinlock<ProcessTable>,
    pub(crate) objects: Spinlock<ObjectManager>,
    pub(crate) syscalls: Spinlock<SyscallTable>,
    pub(crate) registry: Spinlock<Registry>,
    pub(crate) sched: Spinlock<SchedState>,
    pub(crate) patchguard: Spinlock<PatchGuard>,
    pub(crate) dpcs: Spinlock<DpcQueue>,
    pub(crate) irps: Spinlock<IrpTable>,
    pub(crate) programs: ProgramRegistry,
    pub(crate) preempt: Preempt,
    pub(crate) rng: Spinlock<SmallRng>,
    pub(crate) stop: Spinlock<Option<StopCode>>,
    pub(crate) volume: Spinlock<Option<Box<dyn Volume>>>,
    pub(crate) pipeline_manager: Spinlock<Option<Pid>>,
    pub(crate) override_seq: AtomicU64,
    pub(crate) boot_counter: AtomicU64,
}

impl Kernel {
    /// Build a kernel over a host. Boot proper (EEPROM, volumes, initial
    /// processes) lives in [`crate::boot`].
    pub fn new(host: Arc<dyn Host>, screen_level: LogLevel) -> Arc<Kernel> {
        let dmesg = DmesgLog::new(host.clone(), screen_level);
        crate::logging::install_facade(dmesg.clone());

        let mut seed = [0u8; 32];
        host.random_bytes(&mut seed);

        Arc::new(Kernel {
            mint: TokenMint::new(host.clone()),
            dmesg,
            procs: Spinlock::new(ProcessTable::new()),
            objects: Spinlock::new(ObjectManager::new()),
            syscalls: Spinlock::new(SyscallTable::with_defaults()),
            registry: Spinlock::new(Registry::with_hives()),
            sched: Spinlock::new(SchedState::new()),
            patchguard: Spinlock::new(PatchGuard::new()),
            dpcs: Spinlock::new(DpcQueue::new()),
            irps: Spinlock::new(IrpTable::new()),
            programs: ProgramRegistry::new(),
            preempt: Preempt::new(),
            rng: Spinlock::new(SmallRng::from_seed(seed)),
            stop: Spinlock::new(None),
            volume: Spinlock::new(None),
            pipeline_manager: Spinlock::new(None),
            override_seq: AtomicU64::new(0),
            boot_counter: AtomicU64::new(0),
            host,
        })
    }

    // =========================================================================
    // Time and logging
    // =========================================================================

    pub fn uptime(&self) -> f64 {
        self.host.uptime()
    }

    pub fn now_ms(&self) -> u64 {
        uptime_ms(self.host.as_ref())
    }

    pub fn kprint(&self, level: LogLevel, message: impl Into<String>) {
        self.dmesg.kprint(level, None, message);
    }

    pub fn kprint_pid(&self, level: LogLevel, pid: Pid, message: impl Into<String>) {
        self.dmesg.kprint(level, Some(pid), message);
    }

    /// Whether the machine has been stopped by a bugcheck or clean halt.
    pub fn is_halted(&self) -> bool {
        self.stop.lock().is_some()
    }

    pub fn stop_code(&self) -> Option<StopCode> {
        *self.stop.lock()
    }

    // =========================================================================
    // Process lifecycle
    // =========================================================================

    /// Create a process. The body future is built from the program and the
    /// child becomes eligible on the next scheduler iteration.
    pub fn spawn(self: &Arc<Kernel>, spec: SpawnSpec) -> SysResult<Spawned> {
        // A child may never be more privileged than its parent, unless the
        // parent is ring 0.
        if let Some(parent_pid) = spec.parent {
            let procs = self.procs.lock();
            let parent = procs
                .get(parent_pid)
                .ok_or(SysError::with(Status::InvalidParameter, "no such parent"))?;
            if parent.ring != Ring::Kernel && spec.ring.level() < parent.ring.level() {
                return Err(SysError::with(
                    Status::PrivilegeNotHeld,
                    "child ring outranks parent",
                ));
            }
        }

        let pid = {
            let mut procs = self.procs.lock();
            let pid = procs.alloc_pid();
            let pgid = spec
                .parent
                .and_then(|p| procs.get(p))
                .map(|p| p.pgid)
                .unwrap_or(pid);

            procs.insert(Process {
                pid,
                name: spec.name.clone(),
                parent: spec.parent,
                pgid,
                uid: spec.uid,
                ring: spec.ring,
                status: ProcessStatus::Ready,
                wait_reason: WaitReason::None,
                synapse: self.mint.synapse(),
                body: None,
                wake: WakeCell::new(),
                handles: HandleTable::new(),
                signals: crate::ipc::SignalState::new(),
                irql: Irql::Passive,
                env: spec.env.clone(),
                ksignals: VecDeque::new(),
                exit_code: None,
                exit_waiters: Vec::new(),
                waited: false,
                slice: Default::default(),
                slice_start_ms: 0,
                checkpoint_counter: 0,
                preempted: false,
                rl_window_start: 0.0,
                rl_count: 0,
                wait_seq: 0,
            });
            pid
        };

        // Handle inheritance: every inheritable parent entry is duplicated
        // into the child under a fresh token, bound to the child's synapse
        // token, adding one reference per copy.
        if let Some(parent_pid) = spec.parent {
            let copies: Vec<(crate::object::ObjectId, vt_abi::AccessMask)> = {
                let procs = self.procs.lock();
                procs
                    .get(parent_pid)
                    .map(|parent| {
                        parent
                            .handles
                            .inheritable()
                            .map(|(_, e)| (e.object, e.access))
                            .collect()
                    })
                    .unwrap_or_default()
            };
            for (object, access) in copies {
                let _ = self.create_handle(pid, object, access, true);
            }
        }

        // Standard stream wiring.
        let mut parent_stdout = None;
        match spec.stdout {
            StdioSpec::Console => {}
            StdioSpec::Inherit => {
                let inherited = {
                    let procs = self.procs.lock();
                    spec.parent
                        .and_then(|p| procs.get(p))
                        .and_then(|parent| {
                            parent
                                .handles
                                .std(crate::object::StdSlot::Stdout)
                                .and_then(|token| parent.handles.get(token))
                                .map(|e| (e.object, e.access))
                        })
                };
                if let Some((object, access)) = inherited {
                    if let Ok(token) = self.create_handle(pid, object, access, true) {
                        let mut procs = self.procs.lock();
                        if let Some(p) = procs.get_mut(pid) {
                            p.handles
                                .set_std(crate::object::StdSlot::Stdout, Some(token));
                        }
                    }
                }
            }
            StdioSpec::NewPipe => {
                let pipe_id = {
                    let mut objects = self.objects.lock();
                    objects.create(crate::object::ObjectBody::IoPipe(crate::ipc::Pipe::new(
                        vt_abi::DEFAULT_PIPE_CAPACITY,
                    )))
                };
                let child_token =
                    match self.create_handle(pid, pipe_id, vt_abi::AccessMask::RW, false) {
                        Ok(token) => token,
                        Err(err) => {
                            // Roll the half-built record back out.
                            self.procs.lock().remove(pid);
                            return Err(err);
                        }
                    };
                {
                    let mut procs = self.procs.lock();
                    if let Some(p) = procs.get_mut(pid) {
                        p.handles
                            .set_std(crate::object::StdSlot::Stdout, Some(child_token));
                    }
                }
                if let Some(parent_pid) = spec.parent {
                    parent_stdout = self
                        .create_handle(parent_pid, pipe_id, vt_abi::AccessMask::RW, false)
                        .ok();
                }
            }
        }

        // Build the body last so the sandbox sees the finished record.
        let sandbox = Sandbox::new(self.clone(), pid, spec.ring, spec.uid, spec.env);
        let program = spec.program;
        let body: crate::process::ProcessBody =
            Box::pin(async move { program.main(sandbox).await });
        {
            let mut procs = self.procs.lock();
            if let Some(p) = procs.get_mut(pid) {
                p.body = Some(body);
            }
        }

        log::debug!("spawned process {pid} ({}) at ring {}", spec.name, spec.ring);
        Ok(Spawned {
            pid,
            stdout: parent_stdout,
        })
    }

    pub fn current_pid(&self) -> Option<Pid> {
        self.procs.lock().current()
    }

    // =========================================================================
    // Parking and waking
    // =========================================================================

    /// Transition `pid` to sleeping and hand back the future that resolves
    /// when something wakes it. An optional deadline (uptime ms) arms a
    /// timeout fired by the IPC tick.
    pub(crate) fn park(&self, pid: Pid, reason: WaitReason, deadline_ms: Option<u64>) -> Park {
        let mut procs = self.procs.lock();
        let park = {
            let process = procs.get_mut(pid).expect("parking a vanished process");
            process.status = ProcessStatus::Sleeping;
            process.wait_reason = reason;
            process.wait_seq += 1;
            process.wake.clear();
            process.wake.park()
        };
        if let Some(deadline) = deadline_ms {
            let seq = procs.get(pid).expect("checked above").wait_seq;
            self.sched.lock().arm_timeout(deadline, pid, seq);
        }
        park
    }

    /// Wake a sleeping process with the result its suspended operation
    /// resumes with. No-op if the process is gone or already dead.
    pub(crate) fn wake_process(&self, pid: Pid, result: SysResult) {
        let mut procs = self.procs.lock();
        let Some(process) = procs.get_mut(pid) else {
            return;
        };
        if process.status == ProcessStatus::Dead {
            return;
        }
        if process.status == ProcessStatus::Sleeping {
            process.status = ProcessStatus::Ready;
            process.wait_reason = WaitReason::None;
        }
        process.wait_seq += 1; // invalidate any armed timeout
        process.wake.complete(result);
    }

    /// Apply a batch of wait-engine completions: each pid resumes with the
    /// index of the object that satisfied its wait.
    pub(crate) fn apply_wait_completions(&self, completions: Vec<(Pid, usize)>) {
        for (pid, index) in completions {
            self.wake_process(pid, Ok(Value::Int(index as i64)));
        }
    }

    // =========================================================================
    // Death
    // =========================================================================

    /// Normal exit: the body future returned.
    pub(crate) fn exit_process(self: &Arc<Kernel>, pid: Pid, code: i64) {
        log::debug!("process {pid} exited with code {code}");
        self.teardown_process(pid, code);
    }

    /// Forced death: watchdog, OOM, SIGKILL, ring violation, panic.
    pub fn kill_process(self: &Arc<Kernel>, pid: Pid, code: i64, why: &str) {
        self.kprint_pid(LogLevel::Warn, pid, format!("killed: {why}"));
        self.teardown_process(pid, code);
    }

    /// Shared teardown. Marks the record dead, releases every handle,
    /// abandons owned mutexes, fails in-flight IRPs, wakes waiters, and
    /// notifies the parent. The body future is dropped outside all locks.
    fn teardown_process(self: &Arc<Kernel>, pid: Pid, code: i64) {
        // Phase 1: mark dead, strip the record.
        let (body, handles, exit_waiters, parent) = {
            let mut procs = self.procs.lock();
            let Some(process) = procs.get_mut(pid) else {
                return;
            };
            if process.status == ProcessStatus::Dead {
                return;
            }
            process.status = ProcessStatus::Dead;
            process.wait_reason = WaitReason::None;
            process.exit_code = Some(code);
            process.signals.drain();
            let body = process.body.take();
            let handles = process.handles.drain();
            let exit_waiters = std::mem::take(&mut process.exit_waiters);
            (body, handles, exit_waiters, process.parent)
        };

        // Phase 2: object bookkeeping. Collect every process to wake, then
        // apply the wakes after the object lock is gone.
        let mut wake_error: Vec<Pid> = Vec::new();
        let mut completions: Vec<(Pid, usize)> = Vec::new();
        {
            let mut objects = self.objects.lock();
            objects.forget_process(pid);

            for entry in handles {
                if let Some(freed) = objects.dereference(entry.object) {
                    wake_error.extend(freed.orphaned_waiters);
                }
            }

            for mutex_id in objects.abandon_mutexes(pid) {
                completions.extend(objects.signal_object(mutex_id));
            }

            // Devices registered by a dead driver are unregistered so a
            // supervisor restart can claim them again.
            let stale_devices: Vec<String> = objects
                .namespace
                .iter()
                .filter_map(|(path, id)| match objects.get(id).map(|o| &o.body) {
                    Some(crate::object::ObjectBody::IoDevice(dev)) if dev.driver == pid => {
                        Some(path.to_string())
                    }
                    _ => None,
                })
                .collect();
            for path in stale_devices {
                if let Ok(Some(freed)) = objects.delete(&path) {
                    wake_error.extend(freed.orphaned_waiters);
                }
            }
        }
        for waiter in wake_error {
            self.wake_process(
                waiter,
                Err(SysError::with(Status::Unsuccessful, "object deleted")),
            );
        }
        self.apply_wait_completions(completions);

        // Phase 3: fail IRPs this process was driving or awaiting, and
        // forget forwarded syscalls it was blocked on.
        self.syscalls.lock().drop_forwards_for(pid);
        let failed = self.irps.lock().fail_for_process(pid);
        for (caller, status) in failed {
            if caller != pid {
                self.wake_process(caller, Err(SysError::new(status)));
            }
        }

        // Phase 4: wake exit waiters and notify the parent.
        if !exit_waiters.is_empty() {
            let mut procs = self.procs.lock();
            if let Some(process) = procs.get_mut(pid) {
                process.waited = true;
            }
        }
        for waiter in exit_waiters {
            self.wake_process(waiter, Ok(Value::Int(code)));
        }
        if let Some(parent) = parent {
            self.queue_signal(parent, Signal::Chld, pid);
        }

        // The Pipeline Manager cannot service anything once dead.
        {
            let mut pm = self.pipeline_manager.lock();
            if *pm == Some(pid) {
                *pm = None;
            }
        }

        drop(body);
    }

    /// Reap dead process records. A dead record lingers as a zombie until
    /// its exit code was collected, or until no live parent remains to
    /// collect it. Called at iteration end by the scheduler.
    pub(crate) fn reap_dead(&self) {
        let mut procs = self.procs.lock();
        let dead: Vec<Pid> = procs
            .iter()
            .filter(|p| p.status == ProcessStatus::Dead && p.exit_waiters.is_empty())
            .filter(|p| {
                p.waited
                    || p.parent
                        .and_then(|parent| procs.get(parent))
                        .map(|parent| !parent.is_alive())
                        .unwrap_or(true)
            })
            .map(|p| p.pid)
            .collect();
        for pid in dead {
            procs.remove(pid);
        }
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Privilege rules applied to every kill/signal-like operation.
    pub(crate) fn check_signal_privilege(&self, caller: Pid, target: Pid) -> SysResult<()> {
        let procs = self.procs.lock();
        let caller_proc = procs
            .get(caller)
            .ok_or(SysError::new(Status::InvalidParameter))?;
        let target_proc = procs
            .get(target)
            .filter(|p| p.is_alive())
            .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;

        // (a) kernel-protected processes are ring-0 territory.
        if target_proc.is_protected() && caller_proc.ring != Ring::Kernel {
            return Err(SysError::with(
                Status::AccessDenied,
                "cannot signal protected process",
            ));
        }
        // (b) never a strictly more privileged target.
        if target_proc.ring.level() < caller_proc.ring.level() {
            return Err(SysError::with(
                Status::PrivilegeNotHeld,
                "cannot signal more privileged process",
            ));
        }
        // (c) never an ancestor.
        if procs.is_ancestor(target, caller) {
            return Err(SysError::with(Status::AccessDenied, "cannot kill ancestor"));
        }
        // (d) ring 3 non-root: self or own descendants only.
        if caller_proc.ring == Ring::User
            && caller_proc.uid != 0
            && target != caller
            && !procs.is_ancestor(caller, target)
        {
            return Err(SysError::with(
                Status::AccessDenied,
                "target is not a descendant",
            ));
        }
        Ok(())
    }

    /// Deliver a signal to `target` on behalf of `sender`, after privilege
    /// checks have passed. SIGKILL is immediate; everything else queues.
    pub(crate) fn send_signal(self: &Arc<Kernel>, sender: Pid, target: Pid, sig: Signal) {
        if sig == Signal::Kill {
            self.kill_process(target, -(sig.number() as i64), "SIGKILL");
            return;
        }
        self.queue_signal(target, sig, sender);
    }

    /// Queue without privilege checks (kernel-internal senders).
    pub(crate) fn queue_signal(&self, target: Pid, sig: Signal, sender: Pid) {
        // A signal whose default disposition is ignore and which has no
        // handler is dropped at send time; everything else queues.
        let mut procs = self.procs.lock();
        let Some(process) = procs.get_mut(target) else {
            return;
        };
        if !process.is_alive() {
            return;
        }
        if matches!(sig.default_action(), SignalDefault::Ignore)
            && matches!(process.signals.disposition(sig), signal::Disposition::Default)
        {
            return;
        }
        process.signals.push(sig, sender);
    }

    /// Signal delivery point: consume at most one pending non-masked
    /// signal and act on it. Handlers run here, in the process context at
    /// IRQL Passive, to completion. Returns `true` if the process died.
    pub(crate) fn deliver_signals(self: &Arc<Kernel>, pid: Pid) -> bool {
        loop {
            let action = {
                let mut procs = self.procs.lock();
                let Some(process) = procs.get_mut(pid) else {
                    return true;
                };
                if !process.is_alive() {
                    return true;
                }
                let Some(pending) = process.signals.take_deliverable() else {
                    return false;
                };
                let disposition = process.signals.disposition(pending.signal);
                (pending.signal, signal::resolve(pending.signal, &disposition))
            };

            match action {
                (sig, DeliveryAction::Kill) | (sig, DeliveryAction::Terminate) => {
                    self.kill_process(pid, -(sig.number() as i64), &format!("{sig}"));
                    return true;
                }
                (_, DeliveryAction::Ignore) => continue,
                (sig, DeliveryAction::Run(handler)) => {
                    // Handler runs outside every kernel lock.
                    handler(sig);
                    return false;
                }
            }
        }
    }

    // =========================================================================
    // Kernel signals (server/driver inboxes)
    // =========================================================================

    /// Queue a kernel signal on a server or driver process and wake it if
    /// it is blocked on its inbox.
    pub(crate) fn push_ksignal(&self, target: Pid, signal: KernelSignal) {
        let woke = {
            let mut procs = self.procs.lock();
            let Some(process) = procs.get_mut(target) else {
                return;
            };
            if !process.is_alive() {
                return;
            }
            process.ksignals.push_back(signal);
            process.status == ProcessStatus::Sleeping
                && process.wait_reason == WaitReason::Signal
        };
        if woke {
            self.wake_process(target, Ok(Value::Null));
        }
    }

    /// Take the next kernel signal for `pid`, blocking until one arrives.
    pub(crate) async fn next_ksignal(self: &Arc<Kernel>, pid: Pid) -> SysResult<KernelSignal> {
        loop {
            {
                let mut procs = self.procs.lock();
                let process = procs
                    .get_mut(pid)
                    .ok_or(SysError::new(Status::Unsuccessful))?;
                if let Some(signal) = process.ksignals.pop_front() {
                    return Ok(signal);
                }
            }
            let park = self.park(pid, WaitReason::Signal, None);
            park.await?;
        }
    }

    /// Forward a raw host event to the Pipeline Manager.
    pub(crate) fn forward_host_event(&self, event: HostEvent) {
        let Some(pm) = *self.pipeline_manager.lock() else {
            return;
        };
        let mut payload = vec![Value::from(event.kind.as_str())];
        if let Some(source) = &event.source {
            payload.push(Value::from(source.as_str()));
        }
        payload.extend(event.args.iter().cloned());
        self.push_ksignal(pm, KernelSignal::HostEvent {
            event: Value::List(payload),
        });
    }

    // =========================================================================
    // Handles
    // =========================================================================

    /// Mint a handle for `owner` referencing `object`.
    pub fn create_handle(
        &self,
        owner: Pid,
        object: crate::object::ObjectId,
        access: vt_abi::AccessMask,
        inheritable: bool,
    ) -> SysResult<String> {
        {
            let mut objects = self.objects.lock();
            objects.reference(object)?;
        }

        let token = self.mint.handle();
        let mut procs = self.procs.lock();
        let Some(process) = procs.get_mut(owner) else {
            self.objects.lock().dereference(object);
            return Err(SysError::with(Status::InvalidParameter, "no such process"));
        };
        let entry = crate::object::HandleEntry {
            object,
            access,
            synapse: process.synapse.clone(),
            inheritable,
        };
        match process.handles.insert(token.clone(), entry) {
            Ok(()) => Ok(token),
            Err(err) => {
                drop(procs);
                self.objects.lock().dereference(object);
                Err(err)
            }
        }
    }

    /// Close a handle: exactly one dereference of its object.
    pub fn close_handle(&self, owner: Pid, token: &str) -> SysResult<()> {
        let entry = {
            let mut procs = self.procs.lock();
            let process = procs
                .get_mut(owner)
                .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;
            process
                .handles
                .remove(token)
                .ok_or(SysError::new(Status::HandleNotFound))?
        };

        let freed = self.objects.lock().dereference(entry.object);
        if let Some(freed) = freed {
            for waiter in freed.orphaned_waiters {
                self.wake_process(
                    waiter,
                    Err(SysError::with(Status::Unsuccessful, "object deleted")),
                );
            }
        }
        Ok(())
    }

    /// Resolve a handle, enforcing the synapse token and the advisory
    /// access mask.
    pub fn reference_by_handle(
        &self,
        owner: Pid,
        token: &str,
        desired: vt_abi::AccessMask,
    ) -> SysResult<crate::object::ObjectId> {
        let procs = self.procs.lock();
        let process = procs
            .get(owner)
            .ok_or(SysError::with(Status::InvalidParameter, "no such process"))?;
        let entry = process
            .handles
            .get(token)
            .ok_or(SysError::new(Status::HandleNotFound))?;

        if !process.bypasses_synapse() && entry.synapse != process.synapse {
            return Err(SysError::new(Status::SynapseTokenMismatch));
        }
        if !entry.access.contains(desired) {
            return Err(SysError::new(Status::AccessDenied));
        }
        Ok(entry.object)
    }

    // =========================================================================
    // Misc plumbing
    // =========================================================================

    /// Uniform random integer in `[lo, hi)` for interval jitter.
    pub(crate) fn rand_range(&self, lo: u64, hi: u64) -> u64 {
        self.rng.lock().gen_range(lo..hi)
    }

    /// Register the Pipeline Manager process.
    pub(crate) fn set_pipeline_manager(&self, pid: Pid) {
        *self.pipeline_manager.lock() = Some(pid);
        self.kprint(LogLevel::Info, format!("pipeline manager registered as pid {pid}"));
    }

    /// The registered Pipeline Manager, once it has claimed the VFS.
    pub fn pipeline_manager(&self) -> Option<Pid> {
        *self.pipeline_manager.lock()
    }

    /// Enqueue a deferred procedure call.
    pub fn queue_dpc(&self, label: &str, work: impl FnOnce() + Send + 'static) {
        self.dpcs.lock().enqueue(label, work);
    }

    // =========================================================================
    // External observation surface (binary, tests, tooling)
    // =========================================================================

    pub fn process_status(&self, pid: Pid) -> Option<ProcessStatus> {
        self.procs.lock().get(pid).map(|p| p.status)
    }

    pub fn process_exit_code(&self, pid: Pid) -> Option<i64> {
        self.procs.lock().get(pid).and_then(|p| p.exit_code)
    }

    pub fn process_ring(&self, pid: Pid) -> Option<Ring> {
        self.procs.lock().get(pid).map(|p| p.ring)
    }

    pub fn process_count(&self) -> usize {
        self.procs.lock().len()
    }

    /// Whether a process is gone or dead.
    pub fn process_is_dead(&self, pid: Pid) -> bool {
        self.procs
            .lock()
            .get(pid)
            .map(|p| p.status == ProcessStatus::Dead)
            .unwrap_or(true)
    }

    pub fn dmesg(&self) -> Arc<DmesgLog> {
        self.dmesg.clone()
    }

    pub fn sched_stats(&self) -> crate::sched::SchedStats {
        self.sched.lock().stats
    }

    pub fn live_objects(&self) -> usize {
        self.objects.lock().live_objects()
    }

    pub fn preempt(&self) -> &Preempt {
        &self.preempt
    }

    pub fn programs(&self) -> &ProgramRegistry {
        &self.programs
    }
}
