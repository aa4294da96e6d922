//! Shared-memory sections.
//!
//! A section is the single user-visible shared-mutable resource in the
//! system. Mapping a section hands out an alias of the same byte region;
//! synchronisation is the user's responsibility (typically a mutex or an
//! event paired with the section).

use std::sync::Arc;

use spinning_top::Spinlock;
use vt_abi::{Status, SysError, SysResult};

/// Named shared memory region.
#[derive(Debug, Clone)]
pub struct Section {
    data: Arc<Spinlock<Vec<u8>>>,
    size: usize,
}

impl Section {
    pub fn new(size: usize) -> Section {
        Section {
            data: Arc::new(Spinlock::new(vec![0; size])),
            size,
        }
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Alias the underlying region for an in-process mapping.
    pub fn map(&self) -> SectionMapping {
        SectionMapping {
            data: self.data.clone(),
            size: self.size,
        }
    }

    pub fn read(&self, offset: usize, len: usize) -> SysResult<Vec<u8>> {
        let data = self.data.lock();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(SysError::new(Status::InvalidParameter))?;
        Ok(data[offset..end].to_vec())
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> SysResult<()> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= data.len())
            .ok_or(SysError::new(Status::InvalidParameter))?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}

/// An aliased view of a section, handed to guest code.
#[derive(Debug, Clone)]
pub struct SectionMapping {
    data: Arc<Spinlock<Vec<u8>>>,
    size: usize,
}

impl SectionMapping {
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn read(&self, offset: usize, len: usize) -> SysResult<Vec<u8>> {
        let data = self.data.lock();
        let end = offset
            .checked_add(len)
            .filter(|end| *end <= data.len())
            .ok_or(SysError::new(Status::InvalidParameter))?;
        Ok(data[offset..end].to_vec())
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> SysResult<()> {
        let mut data = self.data.lock();
        let end = offset
            .checked_add(bytes.len())
            .filter(|end| *end <= data.len())
            .ok_or(SysError::new(Status::InvalidParameter))?;
        data[offset..end].copy_from_slice(bytes);
        Ok(())
    }
}
