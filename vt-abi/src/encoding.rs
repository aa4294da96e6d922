//! Persisted wire formats.
//!
//! The EEPROM data area is the only state that survives a reboot. The layout
//! is fixed and byte-exact so that the bootloader, the kernel, and external
//! tooling can all read it without negotiation.

use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

/// Magic bytes at the start of a valid EEPROM data area.
pub const EEPROM_MAGIC: [u8; 4] = *b"VTB1";

/// Cause byte recorded on an abnormal halt, read back on the next boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CrashCause {
    Clean = 0,
    Panic = 1,
    StructureCorruption = 2,
    Watchdog = 3,
    OutOfMemory = 4,
}

impl CrashCause {
    pub fn from_byte(b: u8) -> Option<CrashCause> {
        Some(match b {
            0 => CrashCause::Clean,
            1 => CrashCause::Panic,
            2 => CrashCause::StructureCorruption,
            3 => CrashCause::Watchdog,
            4 => CrashCause::OutOfMemory,
            _ => return None,
        })
    }
}

/// The EEPROM data area.
///
/// All multi-byte integers are big-endian. The struct is `repr(C)` and
/// unaligned so it can be overlaid directly on the raw byte area.
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
pub struct EepromData {
    /// Must equal [`EEPROM_MAGIC`].
    pub magic: [u8; 4],
    /// Secure-boot mode: 0 off, 1 warn, 2 enforce.
    pub secureboot: u8,
    /// Default boot entry index.
    pub default_entry: u8,
    /// Boot menu timeout in seconds.
    pub timeout_secs: u8,
    /// Screen log level (dmesg mirroring threshold).
    pub log_level: u8,
    /// Machine-binding hash.
    pub machine_hash: [u8; 32],
    /// Hash of the kernel image.
    pub kernel_hash: [u8; 32],
    /// Hash of the boot manifest.
    pub manifest_hash: [u8; 32],
    /// Platform-key fingerprint.
    pub pk_fingerprint: [u8; 20],
    /// Number of completed boots.
    pub boot_counter: U32<BigEndian>,
    /// [`CrashCause`] byte from the previous session.
    pub crash_cause: u8,
    /// PatchGuard violation counter.
    pub pg_violations: u8,
}

impl EepromData {
    /// Byte length of the data area.
    pub const SIZE: usize = core::mem::size_of::<EepromData>();

    /// A freshly initialised data area (first boot).
    pub fn fresh() -> Self {
        Self {
            magic: EEPROM_MAGIC,
            secureboot: 0,
            default_entry: 0,
            timeout_secs: 3,
            log_level: 1,
            machine_hash: [0; 32],
            kernel_hash: [0; 32],
            manifest_hash: [0; 32],
            pk_fingerprint: [0; 20],
            boot_counter: U32::new(0),
            crash_cause: CrashCause::Clean as u8,
            pg_violations: 0,
        }
    }

    /// Parse a data area, validating the magic. Returns `None` when the
    /// area is too short or was never initialised.
    pub fn parse(bytes: &[u8]) -> Option<EepromData> {
        let data = EepromData::read_from_bytes(bytes.get(..Self::SIZE)?).ok()?;
        if data.magic != EEPROM_MAGIC {
            return None;
        }
        Some(data)
    }

    /// Serialise back to the raw byte area.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    pub fn boot_counter(&self) -> u32 {
        self.boot_counter.get()
    }

    pub fn set_boot_counter(&mut self, n: u32) {
        self.boot_counter = U32::new(n);
    }

    pub fn crash_cause(&self) -> Option<CrashCause> {
        CrashCause::from_byte(self.crash_cause)
    }

    pub fn set_crash_cause(&mut self, cause: CrashCause) {
        self.crash_cause = cause as u8;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        let mut data = EepromData::fresh();
        data.set_boot_counter(41);
        data.set_crash_cause(CrashCause::Watchdog);
        data.machine_hash[0] = 0xAA;

        let bytes = data.to_bytes();
        assert_eq!(bytes.len(), EepromData::SIZE);

        let parsed = EepromData::parse(&bytes).unwrap();
        assert_eq!(parsed.boot_counter(), 41);
        assert_eq!(parsed.crash_cause(), Some(CrashCause::Watchdog));
        assert_eq!(parsed.machine_hash[0], 0xAA);
    }

    #[test]
    fn boot_counter_is_big_endian() {
        let mut data = EepromData::fresh();
        data.set_boot_counter(0x0102_0304);
        let bytes = data.to_bytes();
        // The counter sits immediately after the fixed-size hash block.
        let offset = 4 + 4 + 32 + 32 + 32 + 20;
        assert_eq!(&bytes[offset..offset + 4], &[1, 2, 3, 4]);
    }

    #[test]
    fn bad_magic_rejected() {
        let mut bytes = EepromData::fresh().to_bytes();
        bytes[0] = b'X';
        assert!(EepromData::parse(&bytes).is_none());
    }

    #[test]
    fn short_area_rejected() {
        assert!(EepromData::parse(&[0u8; 8]).is_none());
    }
}
