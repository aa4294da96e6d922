//! Shared ABI definitions between the VT kernel and guest programs.
//!
//! This crate contains the privilege-ring model, the status-code taxonomy,
//! signal numbers, IRP majors, and the boundary `Value` type that both sides
//! of the syscall interface need to agree on.

pub mod encoding;
pub mod path;
pub mod value;

use core::fmt;

pub use value::Value;

// =============================================================================
// Process identifiers
// =============================================================================

/// Unique process identifier. Monotonically increasing, never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub u64);

impl Pid {
    /// The kernel housekeeping process.
    pub const KERNEL: Pid = Pid(0);
    /// The init process.
    pub const INIT: Pid = Pid(1);
    /// The Pipeline Manager.
    pub const PIPELINE_MANAGER: Pid = Pid(2);

    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// PIDs below this threshold are boot-time system processes. They bypass
/// synapse token checks and may only be signalled from ring 0.
pub const BOOT_PID_THRESHOLD: u64 = 3;

// =============================================================================
// Privilege rings
// =============================================================================

/// Privilege ring of a process.
///
/// Ring 2.5 (`UserDriver`) sits between kernel drivers and ordinary user
/// code: a user-space driver host that is sandboxed like ring 3 but receives
/// driver-facing syscalls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ring {
    /// Ring 0: the kernel itself.
    Kernel,
    /// Ring 1: trusted system servers (Pipeline Manager).
    System,
    /// Ring 2: kernel-trusted drivers.
    Driver,
    /// Ring 2.5: sandboxed user-space driver hosts.
    UserDriver,
    /// Ring 3: ordinary user processes.
    User,
}

impl Ring {
    /// Ring level in tenths, for ordering: 0, 10, 20, 25, 30.
    pub const fn level(self) -> u8 {
        match self {
            Ring::Kernel => 0,
            Ring::System => 10,
            Ring::Driver => 20,
            Ring::UserDriver => 25,
            Ring::User => 30,
        }
    }

    /// Whether this ring is sandboxed (instrumented, sanitized, rate-limited).
    pub const fn is_sandboxed(self) -> bool {
        matches!(self, Ring::UserDriver | Ring::User)
    }

    /// Whether this ring is at least as privileged as `other`.
    pub const fn outranks_or_equals(self, other: Ring) -> bool {
        self.level() <= other.level()
    }

    /// Parse the numeric ring notation used by configuration files and
    /// syscall arguments: 0, 1, 2, 2.5, 3.
    pub fn from_number(n: f64) -> Option<Ring> {
        match n {
            n if n == 0.0 => Some(Ring::Kernel),
            n if n == 1.0 => Some(Ring::System),
            n if n == 2.0 => Some(Ring::Driver),
            n if n == 2.5 => Some(Ring::UserDriver),
            n if n == 3.0 => Some(Ring::User),
            _ => None,
        }
    }

    pub const fn as_number(self) -> f64 {
        match self {
            Ring::Kernel => 0.0,
            Ring::System => 1.0,
            Ring::Driver => 2.0,
            Ring::UserDriver => 2.5,
            Ring::User => 3.0,
        }
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ring::UserDriver => write!(f, "2.5"),
            other => write!(f, "{}", other.as_number() as u8),
        }
    }
}

bitflags::bitflags! {
    /// Set of rings a syscall is granted to, stored in the syscall table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RingSet: u8 {
        const KERNEL      = 1 << 0;
        const SYSTEM      = 1 << 1;
        const DRIVER      = 1 << 2;
        const USER_DRIVER = 1 << 3;
        const USER        = 1 << 4;
    }
}

impl RingSet {
    /// Rings 0 through 3 inclusive.
    pub const ALL: RingSet = RingSet::all();
    /// Rings 0 and 1.
    pub const KERNEL_SYSTEM: RingSet =
        RingSet::KERNEL.union(RingSet::SYSTEM);
    /// Rings 0 through 2.
    pub const PRIVILEGED: RingSet = RingSet::KERNEL
        .union(RingSet::SYSTEM)
        .union(RingSet::DRIVER);

    pub fn grants(self, ring: Ring) -> bool {
        let bit = match ring {
            Ring::Kernel => RingSet::KERNEL,
            Ring::System => RingSet::SYSTEM,
            Ring::Driver => RingSet::DRIVER,
            Ring::UserDriver => RingSet::USER_DRIVER,
            Ring::User => RingSet::USER,
        };
        self.contains(bit)
    }
}

// =============================================================================
// Status codes
// =============================================================================

/// Numeric status taxonomy shared by every kernel interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Status {
    Success = 0,
    Pending = 1,
    Timeout = 258,

    Unsuccessful = 300,
    NotImplemented = 301,

    InvalidDriverObject = 400,
    InvalidDriverEntry = 401,
    InvalidDriverInfo = 402,
    DriverValidationFailed = 403,
    DriverInitFailed = 404,
    NoSuchDevice = 405,
    DeviceAlreadyExists = 406,
    InvalidDeviceType = 407,
    DriverUnloadFailed = 408,

    AccessDenied = 500,
    PrivilegeNotHeld = 501,
    SynapseTokenMismatch = 502,
    SynapseTokenExpired = 503,

    InvalidHandle = 600,
    InvalidParameter = 601,
    EndOfFile = 602,
    NoSuchFile = 603,
    DeviceBusy = 604,

    HandleNotFound = 700,
    HandleTableFull = 701,
    HandleAliasInvalid = 702,
}

impl Status {
    pub const fn code(self) -> u32 {
        self as u32
    }

    pub fn from_code(code: u32) -> Option<Status> {
        use Status::*;
        Some(match code {
            0 => Success,
            1 => Pending,
            258 => Timeout,
            300 => Unsuccessful,
            301 => NotImplemented,
            400 => InvalidDriverObject,
            401 => InvalidDriverEntry,
            402 => InvalidDriverInfo,
            403 => DriverValidationFailed,
            404 => DriverInitFailed,
            405 => NoSuchDevice,
            406 => DeviceAlreadyExists,
            407 => InvalidDeviceType,
            408 => DriverUnloadFailed,
            500 => AccessDenied,
            501 => PrivilegeNotHeld,
            502 => SynapseTokenMismatch,
            503 => SynapseTokenExpired,
            600 => InvalidHandle,
            601 => InvalidParameter,
            602 => EndOfFile,
            603 => NoSuchFile,
            604 => DeviceBusy,
            700 => HandleNotFound,
            701 => HandleTableFull,
            702 => HandleAliasInvalid,
            _ => return None,
        })
    }

    /// Canonical error-string form, as surfaced by the syscall interface.
    pub const fn name(self) -> &'static str {
        use Status::*;
        match self {
            Success => "SUCCESS",
            Pending => "PENDING",
            Timeout => "TIMEOUT",
            Unsuccessful => "UNSUCCESSFUL",
            NotImplemented => "NOT_IMPLEMENTED",
            InvalidDriverObject => "INVALID_DRIVER_OBJECT",
            InvalidDriverEntry => "INVALID_DRIVER_ENTRY",
            InvalidDriverInfo => "INVALID_DRIVER_INFO",
            DriverValidationFailed => "DRIVER_VALIDATION_FAILED",
            DriverInitFailed => "DRIVER_INIT_FAILED",
            NoSuchDevice => "NO_SUCH_DEVICE",
            DeviceAlreadyExists => "DEVICE_ALREADY_EXISTS",
            InvalidDeviceType => "INVALID_DEVICE_TYPE",
            DriverUnloadFailed => "DRIVER_UNLOAD_FAILED",
            AccessDenied => "ACCESS_DENIED",
            PrivilegeNotHeld => "PRIVILEGE_NOT_HELD",
            SynapseTokenMismatch => "SYNAPSE_TOKEN_MISMATCH",
            SynapseTokenExpired => "SYNAPSE_TOKEN_EXPIRED",
            InvalidHandle => "INVALID_HANDLE",
            InvalidParameter => "INVALID_PARAMETER",
            EndOfFile => "END_OF_FILE",
            NoSuchFile => "NO_SUCH_FILE",
            DeviceBusy => "DEVICE_BUSY",
            HandleNotFound => "HANDLE_NOT_FOUND",
            HandleTableFull => "HANDLE_TABLE_FULL",
            HandleAliasInvalid => "HANDLE_ALIAS_INVALID",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Error type returned by every syscall: a status code plus an optional
/// human-readable detail string.
///
/// The syscall surface is `(value, nil)` on success and `(nil, error)` on
/// failure; `SysError` is the error half.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SysError {
    pub status: Status,
    pub detail: Option<String>,
}

impl SysError {
    pub fn new(status: Status) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    pub fn with(status: Status, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }

    pub fn code(&self) -> u32 {
        self.status.code()
    }
}

impl fmt::Display for SysError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.detail {
            Some(detail) => write!(f, "{}", detail),
            None => write!(f, "{}", self.status),
        }
    }
}

impl From<Status> for SysError {
    fn from(status: Status) -> Self {
        SysError::new(status)
    }
}

impl std::error::Error for SysError {}

/// Result type of every syscall handler.
pub type SysResult<T = Value> = Result<T, SysError>;

// =============================================================================
// Signals
// =============================================================================

/// POSIX-style signal numbers understood by the kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Signal {
    Hup = 1,
    Int = 2,
    Quit = 3,
    Kill = 9,
    Usr1 = 10,
    Usr2 = 12,
    Pipe = 13,
    Alrm = 14,
    Term = 15,
    Chld = 17,
    Cont = 18,
}

impl Signal {
    pub const fn number(self) -> u32 {
        self as u32
    }

    pub fn from_number(n: u32) -> Option<Signal> {
        use Signal::*;
        Some(match n {
            1 => Hup,
            2 => Int,
            3 => Quit,
            9 => Kill,
            10 => Usr1,
            12 => Usr2,
            13 => Pipe,
            14 => Alrm,
            15 => Term,
            17 => Chld,
            18 => Cont,
            _ => return None,
        })
    }

    /// What happens when the signal is delivered and no handler is installed.
    pub const fn default_action(self) -> SignalDefault {
        use Signal::*;
        match self {
            Kill => SignalDefault::Kill,
            Chld | Cont => SignalDefault::Ignore,
            _ => SignalDefault::Terminate,
        }
    }

    /// SIGKILL bypasses masks and handlers unconditionally.
    pub const fn is_unblockable(self) -> bool {
        matches!(self, Signal::Kill)
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Signal::Hup => "SIGHUP",
            Signal::Int => "SIGINT",
            Signal::Quit => "SIGQUIT",
            Signal::Kill => "SIGKILL",
            Signal::Usr1 => "SIGUSR1",
            Signal::Usr2 => "SIGUSR2",
            Signal::Pipe => "SIGPIPE",
            Signal::Alrm => "SIGALRM",
            Signal::Term => "SIGTERM",
            Signal::Chld => "SIGCHLD",
            Signal::Cont => "SIGCONT",
        };
        write!(f, "{name}")
    }
}

/// Default disposition of an unhandled signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalDefault {
    /// The process dies, no handler consulted, mask ignored.
    Kill,
    /// The process dies unless a handler is installed.
    Terminate,
    /// The signal is dropped.
    Ignore,
}

// =============================================================================
// IRP majors
// =============================================================================

/// Major function of an I/O Request Packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum IrpMajor {
    Create = 0,
    Close = 1,
    Read = 2,
    Write = 3,
    DeviceControl = 4,
}

impl IrpMajor {
    pub fn from_number(n: u32) -> Option<IrpMajor> {
        Some(match n {
            0 => IrpMajor::Create,
            1 => IrpMajor::Close,
            2 => IrpMajor::Read,
            3 => IrpMajor::Write,
            4 => IrpMajor::DeviceControl,
            _ => return None,
        })
    }

    pub const fn number(self) -> u32 {
        self as u32
    }
}

impl fmt::Display for IrpMajor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            IrpMajor::Create => "CREATE",
            IrpMajor::Close => "CLOSE",
            IrpMajor::Read => "READ",
            IrpMajor::Write => "WRITE",
            IrpMajor::DeviceControl => "DEVICE_CONTROL",
        };
        write!(f, "{name}")
    }
}

// =============================================================================
// IRQL
// =============================================================================

/// Interrupt-request level. Primitives that sleep are forbidden above `Apc`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Irql {
    Passive = 0,
    Apc = 1,
    Dispatch = 2,
    Device = 3,
}

impl Irql {
    pub fn from_number(n: u8) -> Option<Irql> {
        Some(match n {
            0 => Irql::Passive,
            1 => Irql::Apc,
            2 => Irql::Dispatch,
            3 => Irql::Device,
            _ => return None,
        })
    }

    /// Whether blocking waits are permitted at this level.
    pub const fn may_sleep(self) -> bool {
        matches!(self, Irql::Passive | Irql::Apc)
    }
}

// =============================================================================
// Handle access masks
// =============================================================================

bitflags::bitflags! {
    /// Advisory access mask granted to a handle at creation.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct AccessMask: u32 {
        const READ    = 1 << 0;
        const WRITE   = 1 << 1;
        const WAIT    = 1 << 2;
        const CONTROL = 1 << 3;
        const DELETE  = 1 << 4;
    }
}

impl AccessMask {
    pub const ALL: AccessMask = AccessMask::all();
    pub const RW: AccessMask = AccessMask::READ.union(AccessMask::WRITE);
}

// =============================================================================
// Registry value types
// =============================================================================

/// Type tag of a registry value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegType {
    Str,
    Num,
    Bool,
    Tab,
}

impl RegType {
    pub const fn name(self) -> &'static str {
        match self {
            RegType::Str => "STR",
            RegType::Num => "NUM",
            RegType::Bool => "BOOL",
            RegType::Tab => "TAB",
        }
    }

    pub fn from_name(name: &str) -> Option<RegType> {
        Some(match name {
            "STR" => RegType::Str,
            "NUM" => RegType::Num,
            "BOOL" => RegType::Bool,
            "TAB" => RegType::Tab,
            _ => return None,
        })
    }
}

// =============================================================================
// Shared limits
// =============================================================================

/// Maximum recursion depth the cross-boundary sanitizer will copy.
pub const MAX_SANITIZE_DEPTH: usize = 16;

/// Maximum total item count the cross-boundary sanitizer will copy.
pub const MAX_SANITIZE_ITEMS: usize = 4096;

/// Default capacity (bytes) of an anonymous pipe.
pub const DEFAULT_PIPE_CAPACITY: usize = 4096;

/// Maximum size of a single message-queue message, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 8192;

/// Default message-queue depth.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

/// Ring ≥ 3 processes issuing more than this many syscalls per rolling
/// second are killed.
pub const SYSCALL_RATE_LIMIT: u32 = 10_000;

/// Capacity of the dmesg ring.
pub const DMESG_CAPACITY: usize = 1024;

/// Symbolic-link indirection bound during namespace lookup.
pub const MAX_SYMLINK_DEPTH: usize = 8;
