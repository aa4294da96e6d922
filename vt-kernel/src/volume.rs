//! Root-volume access.
//!
//! The boot volume is either *managed* (a host filesystem component that
//! understands paths directly) or a raw drive carrying a primitive
//! extent-addressed partition. Both sit behind the [`Volume`] trait; the
//! kernel only needs whole-file read/write, existence checks, and
//! directory listing, which covers loader configuration, `/etc` files, and
//! crash dumps.

use std::sync::Arc;

use vt_abi::{Status, SysError, SysResult, Value};
use zerocopy::byteorder::{BigEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout, Unaligned};

use crate::host::Host;

/// Whole-file view of the root volume.
pub trait Volume: Send + Sync {
    fn kind(&self) -> &'static str;
    fn exists(&self, path: &str) -> bool;
    fn read(&self, path: &str) -> SysResult<Vec<u8>>;
    fn write(&self, path: &str, data: &[u8]) -> SysResult<()>;
    fn list(&self, dir: &str) -> SysResult<Vec<String>>;
}

// =============================================================================
// Managed volume
// =============================================================================

/// A host filesystem component: paths go straight through.
pub struct ManagedVolume {
    host: Arc<dyn Host>,
    address: String,
}

impl ManagedVolume {
    pub fn new(host: Arc<dyn Host>, address: &str) -> ManagedVolume {
        ManagedVolume {
            host,
            address: address.to_string(),
        }
    }
}

impl Volume for ManagedVolume {
    fn kind(&self) -> &'static str {
        "managed"
    }

    fn exists(&self, path: &str) -> bool {
        self.host
            .invoke(&self.address, "exists", &[Value::from(path)])
            .ok()
            .and_then(|out| out.first().and_then(Value::as_bool))
            .unwrap_or(false)
    }

    fn read(&self, path: &str) -> SysResult<Vec<u8>> {
        let out = self
            .host
            .invoke(&self.address, "read", &[Value::from(path)])?;
        out.into_iter()
            .next()
            .and_then(|v| match v {
                Value::Bytes(b) => Some(b),
                Value::Str(s) => Some(s.into_bytes()),
                _ => None,
            })
            .ok_or(SysError::new(Status::NoSuchFile))
    }

    fn write(&self, path: &str, data: &[u8]) -> SysResult<()> {
        self.host.invoke(
            &self.address,
            "write",
            &[Value::from(path), Value::Bytes(data.to_vec())],
        )?;
        Ok(())
    }

    fn list(&self, dir: &str) -> SysResult<Vec<String>> {
        let out = self
            .host
            .invoke(&self.address, "list", &[Value::from(dir)])?;
        Ok(out
            .into_iter()
            .next()
            .and_then(|v| match v {
                Value::List(items) => Some(
                    items
                        .into_iter()
                        .filter_map(|v| v.as_str().map(str::to_string))
                        .collect(),
                ),
                _ => None,
            })
            .unwrap_or_default())
    }
}

// =============================================================================
// Inode volume
// =============================================================================

pub const SECTOR_SIZE: usize = 512;
pub const VTFS_MAGIC: [u8; 4] = *b"VTFS";

/// File-table sectors reserved after the superblock (64 entries).
const TABLE_SECTORS: usize = 8;
const ENTRY_SIZE: usize = 64;
const MAX_FILES: usize = TABLE_SECTORS * SECTOR_SIZE / ENTRY_SIZE;

/// On-disk file-table entry: a name plus one extent.
#[derive(Debug, Clone, FromBytes, IntoBytes, KnownLayout, Immutable, Unaligned)]
#[repr(C)]
struct FsEntry {
    name: [u8; 48],
    start_sector: U32<BigEndian>,
    length: U32<BigEndian>,
    flags: U32<BigEndian>,
    reserved: [u8; 4],
}

impl FsEntry {
    fn name_str(&self) -> &str {
        let end = self.name.iter().position(|b| *b == 0).unwrap_or(48);
        std::str::from_utf8(&self.name[..end]).unwrap_or("")
    }

    fn is_live(&self) -> bool {
        self.name[0] != 0
    }
}

/// A raw drive component carrying a VTFS partition.
pub struct InodeVolume {
    host: Arc<dyn Host>,
    address: String,
}

impl InodeVolume {
    pub fn new(host: Arc<dyn Host>, address: &str) -> InodeVolume {
        InodeVolume {
            host,
            address: address.to_string(),
        }
    }

    fn read_sector(&self, index: usize) -> SysResult<Vec<u8>> {
        let out = self
            .host
            .invoke(&self.address, "read_sector", &[Value::from(index)])?;
        out.into_iter()
            .next()
            .and_then(|v| v.as_bytes().map(<[u8]>::to_vec))
            .ok_or(SysError::new(Status::Unsuccessful))
    }

    fn write_sector(&self, index: usize, data: &[u8]) -> SysResult<()> {
        self.host.invoke(
            &self.address,
            "write_sector",
            &[Value::from(index), Value::Bytes(data.to_vec())],
        )?;
        Ok(())
    }

    fn capacity_sectors(&self) -> SysResult<usize> {
        let out = self.host.invoke(&self.address, "capacity", &[])?;
        let bytes = out
            .first()
            .and_then(Value::as_int)
            .ok_or(SysError::new(Status::Unsuccessful))?;
        Ok(bytes as usize / SECTOR_SIZE)
    }

    fn load_table(&self) -> SysResult<Vec<FsEntry>> {
        let superblock = self.read_sector(0)?;
        if superblock.get(..4) != Some(&VTFS_MAGIC[..]) {
            return Err(SysError::with(Status::Unsuccessful, "bad partition magic"));
        }
        let mut entries = Vec::new();
        for s in 0..TABLE_SECTORS {
            let sector = self.read_sector(1 + s)?;
            for chunk in sector.chunks_exact(ENTRY_SIZE) {
                if let Ok(entry) = FsEntry::read_from_bytes(chunk) {
                    if entry.is_live() {
                        entries.push(entry);
                    }
                }
            }
        }
        Ok(entries)
    }

    fn store_table(&self, entries: &[FsEntry]) -> SysResult<()> {
        if entries.len() > MAX_FILES {
            return Err(SysError::with(Status::Unsuccessful, "file table full"));
        }
        let mut table = vec![0u8; TABLE_SECTORS * SECTOR_SIZE];
        for (i, entry) in entries.iter().enumerate() {
            table[i * ENTRY_SIZE..(i + 1) * ENTRY_SIZE].copy_from_slice(entry.as_bytes());
        }
        for (s, sector) in table.chunks_exact(SECTOR_SIZE).enumerate() {
            self.write_sector(1 + s, sector)?;
        }
        Ok(())
    }

    fn read_extent(&self, entry: &FsEntry) -> SysResult<Vec<u8>> {
        let length = entry.length.get() as usize;
        let start = entry.start_sector.get() as usize;
        let sectors = length.div_ceil(SECTOR_SIZE);
        let mut data = Vec::with_capacity(sectors * SECTOR_SIZE);
        for s in 0..sectors {
            data.extend(self.read_sector(start + s)?);
        }
        data.truncate(length);
        Ok(data)
    }
}

impl Volume for InodeVolume {
    fn kind(&self) -> &'static str {
        "inode"
    }

    fn exists(&self, path: &str) -> bool {
        self.load_table()
            .map(|t| t.iter().any(|e| e.name_str() == path))
            .unwrap_or(false)
    }

    fn read(&self, path: &str) -> SysResult<Vec<u8>> {
        let table = self.load_table()?;
        let entry = table
            .iter()
            .find(|e| e.name_str() == path)
            .ok_or(SysError::new(Status::NoSuchFile))?;
        self.read_extent(entry)
    }

    /// Write a file into a fresh extent past every live one. The old
    /// extent of a replaced file is left unreferenced; this is a primitive
    /// boot partition, not a general filesystem.
    fn write(&self, path: &str, data: &[u8]) -> SysResult<()> {
        if path.len() > 47 {
            return Err(SysError::with(Status::InvalidParameter, "path too long"));
        }
        let mut table = self.load_table()?;

        let data_base = 1 + TABLE_SECTORS;
        let next_free = table
            .iter()
            .map(|e| {
                e.start_sector.get() as usize
                    + (e.length.get() as usize).div_ceil(SECTOR_SIZE)
            })
            .max()
            .unwrap_or(data_base)
            .max(data_base);

        let sectors = data.len().div_ceil(SECTOR_SIZE).max(1);
        if next_free + sectors > self.capacity_sectors()? {
            return Err(SysError::with(Status::Unsuccessful, "volume full"));
        }

        for (s, chunk) in data.chunks(SECTOR_SIZE).enumerate() {
            let mut sector = vec![0u8; SECTOR_SIZE];
            sector[..chunk.len()].copy_from_slice(chunk);
            self.write_sector(next_free + s, &sector)?;
        }
        if data.is_empty() {
            self.write_sector(next_free, &vec![0u8; SECTOR_SIZE])?;
        }

        let mut name = [0u8; 48];
        name[..path.len()].copy_from_slice(path.as_bytes());
        let entry = FsEntry {
            name,
            start_sector: U32::new(next_free as u32),
            length: U32::new(data.len() as u32),
            flags: U32::new(0),
            reserved: [0; 4],
        };
        match table.iter_mut().find(|e| e.name_str() == path) {
            Some(slot) => *slot = entry,
            None => table.push(entry),
        }
        self.store_table(&table)
    }

    fn list(&self, dir: &str) -> SysResult<Vec<String>> {
        let prefix = if dir.ends_with('/') {
            dir.to_string()
        } else {
            format!("{dir}/")
        };
        Ok(self
            .load_table()?
            .iter()
            .filter_map(|e| e.name_str().strip_prefix(&prefix).map(str::to_string))
            .collect())
    }
}

/// Build a VTFS partition image holding the given files. Test and
/// provisioning helper.
pub fn format_image(total_sectors: usize, files: &[(&str, &[u8])]) -> Vec<u8> {
    assert!(files.len() <= MAX_FILES);
    let mut image = vec![0u8; total_sectors * SECTOR_SIZE];
    image[..4].copy_from_slice(&VTFS_MAGIC);

    let mut cursor = 1 + TABLE_SECTORS;
    for (i, (path, data)) in files.iter().enumerate() {
        assert!(path.len() <= 47, "path too long: {path}");
        let mut name = [0u8; 48];
        name[..path.len()].copy_from_slice(path.as_bytes());
        let entry = FsEntry {
            name,
            start_sector: U32::new(cursor as u32),
            length: U32::new(data.len() as u32),
            flags: U32::new(0),
            reserved: [0; 4],
        };
        let offset = SECTOR_SIZE + i * ENTRY_SIZE;
        image[offset..offset + ENTRY_SIZE].copy_from_slice(entry.as_bytes());

        let start = cursor * SECTOR_SIZE;
        image[start..start + data.len()].copy_from_slice(data);
        cursor += data.len().div_ceil(SECTOR_SIZE).max(1);
    }
    image
}

/// Pick a volume backend from the host's component bus: a managed
/// filesystem component wins over a raw drive.
pub fn mount_root(host: &Arc<dyn Host>) -> Option<Box<dyn Volume>> {
    let components = host.components();
    if let Some(fs) = components.iter().find(|c| c.kind == "filesystem") {
        return Some(Box::new(ManagedVolume::new(host.clone(), &fs.address)));
    }
    if let Some(drive) = components.iter().find(|c| c.kind == "drive") {
        let volume = InodeVolume::new(host.clone(), &drive.address);
        if volume.load_table().is_ok() {
            return Some(Box::new(volume));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::VirtHost;

    fn inode_host(files: &[(&str, &[u8])]) -> Arc<VirtHost> {
        VirtHost::builder()
            .drive(format_image(256, files))
            .build()
    }

    #[test]
    fn inode_volume_reads_formatted_files() {
        let host = inode_host(&[
            ("/boot/loader.cfg", b"log_level=1\n"),
            ("/etc/fstab", b"root vtfs\n"),
        ]);
        let volume = InodeVolume::new(host, "drive0");

        assert!(volume.exists("/boot/loader.cfg"));
        assert!(!volume.exists("/boot/missing"));
        assert_eq!(volume.read("/etc/fstab").unwrap(), b"root vtfs\n");
        assert_eq!(volume.list("/etc").unwrap(), vec!["fstab"]);
    }

    #[test]
    fn inode_volume_round_trips_large_files() {
        let big: Vec<u8> = (0..3000u32).map(|n| n as u8).collect();
        let host = inode_host(&[("/big", &big)]);
        let volume = InodeVolume::new(host, "drive0");
        assert_eq!(volume.read("/big").unwrap(), big);
    }

    #[test]
    fn inode_volume_writes_new_files() {
        let host = inode_host(&[("/boot/loader.cfg", b"x")]);
        let volume = InodeVolume::new(host, "drive0");

        volume.write("/log/crash_001.dump", b"dump body").unwrap();
        assert_eq!(volume.read("/log/crash_001.dump").unwrap(), b"dump body");
        // Existing files survive.
        assert_eq!(volume.read("/boot/loader.cfg").unwrap(), b"x");

        // Replacement takes the new contents.
        volume.write("/log/crash_001.dump", b"second").unwrap();
        assert_eq!(volume.read("/log/crash_001.dump").unwrap(), b"second");
    }

    #[test]
    fn managed_volume_round_trips() {
        let (builder, _tree) =
            VirtHost::builder().managed_fs([("/etc/passwd", b"root:0".to_vec())]);
        let host = builder.build();
        let volume = ManagedVolume::new(host, "fs0");

        assert!(volume.exists("/etc/passwd"));
        assert_eq!(volume.read("/etc/passwd").unwrap(), b"root:0");
        volume.write("/etc/new", b"data").unwrap();
        assert_eq!(volume.read("/etc/new").unwrap(), b"data");
        assert_eq!(volume.list("/etc").unwrap(), vec!["new", "passwd"]);
    }

    #[test]
    fn mount_prefers_managed() {
        let (builder, _tree) = VirtHost::builder().managed_fs([]);
        let host: Arc<dyn Host> = builder.drive(format_image(64, &[])).build();
        let volume = mount_root(&host).unwrap();
        assert_eq!(volume.kind(), "managed");
    }
}
