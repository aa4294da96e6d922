//! Per-process sandboxes.
//!
//! The sandbox is the *capability surface* a guest program runs against.
//! The kernel-owned surface is methods on this struct, so guest code
//! cannot replace or shadow it; user state lives in the program's own
//! environment; and the raw platform surface is an `Option` populated
//! only for ring ≤ 2. Ring 2.5 and 3 never see raw host access, table
//! mutators, or process-level module loading.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use spinning_top::Spinlock;
use vt_abi::{Pid, Ring, Signal, Status, SysError, SysResult, Value};

use crate::host::Component;
use crate::ipc::KernelSignal;
use crate::ipc::section::SectionMapping;
use crate::ipc::signal::Disposition;
use crate::kernel::Kernel;
use crate::object::ObjectBody;
use crate::process::YieldNow;

/// A loadable program image.
#[async_trait]
pub trait Program: Send + Sync {
    async fn main(&self, ctx: Sandbox) -> i64;
}

type BoxBody = Pin<Box<dyn Future<Output = i64> + Send>>;

struct FnProgram<F>(F);

#[async_trait]
impl<F> Program for FnProgram<F>
where
    F: Fn(Sandbox) -> BoxBody + Send + Sync,
{
    async fn main(&self, ctx: Sandbox) -> i64 {
        (self.0)(ctx).await
    }
}

/// Wrap an async closure as a program image.
pub fn program<F, Fut>(f: F) -> Arc<dyn Program>
where
    F: Fn(Sandbox) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = i64> + Send + 'static,
{
    Arc::new(FnProgram(move |ctx| Box::pin(f(ctx)) as BoxBody))
}

/// One-shot body used by the in-process task primitives.
struct TaskProgram {
    body: Spinlock<Option<Box<dyn FnOnce(Sandbox) -> BoxBody + Send>>>,
}

#[async_trait]
impl Program for TaskProgram {
    async fn main(&self, ctx: Sandbox) -> i64 {
        // The guard must drop before the body runs.
        let body = self.body.lock().take();
        match body {
            Some(body) => body(ctx).await,
            None => -1,
        }
    }
}

/// Registered program images, keyed by filesystem path.
pub struct ProgramRegistry {
    images: Spinlock<HashMap<String, Arc<dyn Program>>>,
}

impl ProgramRegistry {
    pub fn new() -> ProgramRegistry {
        ProgramRegistry {
            images: Spinlock::new(HashMap::new()),
        }
    }

    pub fn register(&self, path: &str, image: Arc<dyn Program>) {
        self.images.lock().insert(path.to_string(), image);
    }

    pub fn resolve(&self, path: &str) -> Option<Arc<dyn Program>> {
        self.images.lock().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.images.lock().keys().cloned().collect()
    }
}

impl Default for ProgramRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Raw platform capabilities, handed only to ring ≤ 2.
pub struct PlatformCaps {
    kernel: Arc<Kernel>,
}

impl PlatformCaps {
    pub fn components(&self) -> Vec<Component> {
        self.kernel.host.components()
    }

    pub fn invoke(&self, address: &str, method: &str, args: &[Value]) -> SysResult<Vec<Value>> {
        self.kernel.host.invoke(address, method, args)
    }

    pub fn beep(&self, freq: u32, duration: f64) {
        self.kernel.host.beep(freq, duration);
    }

    pub fn uptime(&self) -> f64 {
        self.kernel.host.uptime()
    }

    pub fn console_write(&self, line: &str) {
        self.kernel.host.console_write(line);
    }
}

/// The per-process execution surface.
#[derive(Clone)]
pub struct Sandbox {
    kernel: Arc<Kernel>,
    pid: Pid,
    ring: Ring,
    uid: u32,
    env: BTreeMap<String, String>,
    platform: Option<Arc<PlatformCaps>>,
}

impl Sandbox {
    pub(crate) fn new(
        kernel: Arc<Kernel>,
        pid: Pid,
        ring: Ring,
        uid: u32,
        env: BTreeMap<String, String>,
    ) -> Sandbox {
        let platform = (!ring.is_sandboxed()).then(|| {
            Arc::new(PlatformCaps {
                kernel: kernel.clone(),
            })
        });
        Sandbox {
            kernel,
            pid,
            ring,
            uid,
            env,
            platform,
        }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn ring(&self) -> Ring {
        self.ring
    }

    pub fn uid(&self) -> u32 {
        self.uid
    }

    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Monotonic host uptime in seconds. Open to every ring; all guest
    /// timing is against this clock.
    pub fn uptime(&self) -> f64 {
        self.kernel.uptime()
    }

    /// Raw platform surface; `None` for sandboxed rings.
    pub fn platform(&self) -> Option<&PlatformCaps> {
        self.platform.as_deref()
    }

    // =========================================================================
    // Syscalls
    // =========================================================================

    /// Issue a syscall. `(value, nil)` on success, `(nil, error)` on
    /// failure, as a `Result`.
    pub async fn sys(&self, name: &str, args: Vec<Value>) -> SysResult {
        crate::syscall::dispatch(&self.kernel, self.pid, &Value::from(name), args).await
    }

    /// Issue a syscall with an arbitrary name value. Non-string names are
    /// rejected by the dispatcher; this exists for completeness and tests.
    pub async fn sys_value(&self, name: Value, args: Vec<Value>) -> SysResult {
        crate::syscall::dispatch(&self.kernel, self.pid, &name, args).await
    }

    // =========================================================================
    // Preemption and yielding
    // =========================================================================

    /// Preemption checkpoint. Every loop in guest code awaits this; it
    /// delivers pending signals and suspends the process when the current
    /// quantum is exhausted.
    pub async fn checkpoint(&self) {
        if self.kernel.deliver_signals(self.pid) {
            // The process was just killed; never hand control back.
            std::future::pending::<()>().await;
        }
        if crate::preempt::checkpoint_due(&self.kernel, self.pid) {
            YieldNow::new().await;
        }
    }

    /// Voluntarily give up the rest of the slice.
    pub async fn yield_now(&self) {
        YieldNow::new().await;
    }

    /// Sleep for a duration, against the monotonic clock.
    pub async fn sleep_ms(&self, ms: u64) {
        let handle = match self.sys("ke_create_timer", vec![]).await {
            Ok(Value::Str(token)) => token,
            _ => return,
        };
        let _ = self
            .sys("ke_set_timer", vec![Value::from(handle.as_str()), Value::Int(-(ms as i64))])
            .await;
        let _ = self
            .sys("ke_wait_single", vec![Value::from(handle.as_str())])
            .await;
        let _ = self.sys("ke_close_handle", vec![Value::from(handle)]).await;
    }

    // =========================================================================
    // Stdio
    // =========================================================================

    /// Write a line to standard output. Falls through to the host console
    /// when no stdout handle is wired.
    pub async fn print(&self, text: &str) {
        let stdout = {
            let procs = self.kernel.procs.lock();
            procs
                .get(self.pid)
                .and_then(|p| p.handles.std(crate::object::StdSlot::Stdout))
                .map(str::to_string)
        };
        match stdout {
            Some(token) => {
                let line = format!("{text}\n");
                let _ = self
                    .sys(
                        "ke_pipe_write",
                        vec![Value::Str(token), Value::Bytes(line.into_bytes())],
                    )
                    .await;
            }
            None => self.kernel.host.console_write(text),
        }
    }

    // =========================================================================
    // Tasks
    // =========================================================================

    /// Spawn a sibling task sharing this process's ring, uid, and parent
    /// linkage to the caller. This is the `process_thread` primitive: the
    /// child body is ordinary guest code full of checkpoint awaits, so a
    /// nested task cannot outrun the preemption machinery.
    pub fn spawn_task<F, Fut>(&self, name: &str, body: F) -> SysResult<Pid>
    where
        F: FnOnce(Sandbox) -> Fut + Send + 'static,
        Fut: Future<Output = i64> + Send + 'static,
    {
        let image = Arc::new(TaskProgram {
            body: Spinlock::new(Some(Box::new(move |ctx| Box::pin(body(ctx)) as BoxBody))),
        });
        let spawned = self.kernel.spawn(
            crate::kernel::SpawnSpec::new(name, self.ring, image)
                .parent(self.pid)
                .uid(self.uid)
                .env(self.env.clone())
                .stdout(crate::kernel::StdioSpec::Inherit),
        )?;
        Ok(spawned.pid)
    }

    // =========================================================================
    // Signals
    // =========================================================================

    /// Install a signal handler closure. Runs at delivery points in this
    /// process's context.
    pub fn on_signal(
        &self,
        signal: Signal,
        handler: impl Fn(Signal) + Send + Sync + 'static,
    ) -> SysResult<()> {
        if signal.is_unblockable() {
            return Err(SysError::with(Status::InvalidParameter, "SIGKILL cannot be handled"));
        }
        let mut procs = self.kernel.procs.lock();
        let process = procs
            .get_mut(self.pid)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        process
            .signals
            .set_disposition(signal, Disposition::Handler(Arc::new(handler)));
        Ok(())
    }

    // =========================================================================
    // Kernel signals (ring ≤ 2)
    // =========================================================================

    /// Receive the next kernel signal (forwarded syscall, IRP, interrupt,
    /// host event). Servers and drivers only.
    pub async fn next_kernel_signal(&self) -> SysResult<KernelSignal> {
        if self.ring.is_sandboxed() {
            return Err(SysError::new(Status::PrivilegeNotHeld));
        }
        self.kernel.next_ksignal(self.pid).await
    }

    // =========================================================================
    // Sections
    // =========================================================================

    /// Map a section handle into an aliased byte view. The section is the
    /// one shared-mutable resource; pair it with a mutex or event.
    pub fn map_section(&self, token: &str) -> SysResult<SectionMapping> {
        let id = self
            .kernel
            .reference_by_handle(self.pid, token, vt_abi::AccessMask::RW)?;
        let objects = self.kernel.objects.lock();
        match objects.get(id).map(|o| &o.body) {
            Some(ObjectBody::IpcSection(section)) => Ok(section.map()),
            Some(_) => Err(SysError::with(Status::InvalidHandle, "not a section")),
            None => Err(SysError::new(Status::InvalidHandle)),
        }
    }
}
