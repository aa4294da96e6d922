//! Per-process handle tables.
//!
//! A handle is an opaque, unguessable string token mapping to an object
//! plus a granted access mask. The token records the synapse token of the
//! process it was minted for; resolution rechecks it on every use. The
//! three standard I/O slots live in a separate tiny map so they can be
//! rebound without disturbing the table proper.

use std::collections::HashMap;

use vt_abi::{AccessMask, Status, SysError, SysResult};

use crate::token::SynapseToken;

use super::ObjectId;

/// Maximum live handles per process.
pub const HANDLE_LIMIT: usize = 1024;

/// One handle-table slot.
#[derive(Debug, Clone)]
pub struct HandleEntry {
    pub object: ObjectId,
    pub access: AccessMask,
    pub synapse: SynapseToken,
    pub inheritable: bool,
}

/// Standard handle indices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StdSlot {
    Stdin = 0,
    Stdout = 1,
    Stderr = 2,
}

impl StdSlot {
    pub fn from_index(n: u32) -> Option<StdSlot> {
        Some(match n {
            0 => StdSlot::Stdin,
            1 => StdSlot::Stdout,
            2 => StdSlot::Stderr,
            _ => return None,
        })
    }
}

/// Handle table of a single process.
#[derive(Debug, Default)]
pub struct HandleTable {
    entries: HashMap<String, HandleEntry>,
    std_slots: [Option<String>; 3],
}

impl HandleTable {
    pub fn new() -> HandleTable {
        HandleTable::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Store an entry under a freshly minted token.
    pub fn insert(&mut self, token: String, entry: HandleEntry) -> SysResult<()> {
        if self.entries.len() >= HANDLE_LIMIT {
            return Err(SysError::new(Status::HandleTableFull));
        }
        debug_assert!(!self.entries.contains_key(&token));
        self.entries.insert(token, entry);
        Ok(())
    }

    pub fn get(&self, token: &str) -> Option<&HandleEntry> {
        self.entries.get(token)
    }

    pub fn remove(&mut self, token: &str) -> Option<HandleEntry> {
        self.entries.remove(token)
    }

    /// Entries marked inheritable, for spawn-time duplication.
    pub fn inheritable(&self) -> impl Iterator<Item = (&str, &HandleEntry)> {
        self.entries
            .iter()
            .filter(|(_, e)| e.inheritable)
            .map(|(k, e)| (k.as_str(), e))
    }

    /// Drain every entry, for process teardown. Each drained entry must be
    /// dereferenced exactly once by the caller.
    pub fn drain(&mut self) -> Vec<HandleEntry> {
        self.std_slots = [None, None, None];
        self.entries.drain().map(|(_, e)| e).collect()
    }

    pub fn set_std(&mut self, slot: StdSlot, token: Option<String>) {
        self.std_slots[slot as usize] = token;
    }

    pub fn std(&self, slot: StdSlot) -> Option<&str> {
        self.std_slots[slot as usize].as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_abi::AccessMask;

    fn entry(n: u32, inheritable: bool) -> HandleEntry {
        HandleEntry {
            object: ObjectId {
                index: n,
                generation: 1,
            },
            access: AccessMask::RW,
            synapse: crate::token::TokenMint::new(crate::host::VirtHost::builder().build())
                .synapse(),
            inheritable,
        }
    }

    #[test]
    fn insert_get_remove() {
        let mut table = HandleTable::new();
        table.insert("h-1".into(), entry(1, false)).unwrap();
        assert!(table.get("h-1").is_some());
        assert!(table.get("h-2").is_none());
        assert!(table.remove("h-1").is_some());
        assert!(table.get("h-1").is_none());
    }

    #[test]
    fn inheritable_filter() {
        let mut table = HandleTable::new();
        table.insert("h-1".into(), entry(1, true)).unwrap();
        table.insert("h-2".into(), entry(2, false)).unwrap();
        let inherited: Vec<&str> = table.inheritable().map(|(t, _)| t).collect();
        assert_eq!(inherited, vec!["h-1"]);
    }

    #[test]
    fn table_is_bounded() {
        let mut table = HandleTable::new();
        for i in 0..HANDLE_LIMIT {
            table.insert(format!("h-{i}"), entry(i as u32, false)).unwrap();
        }
        let err = table.insert("h-over".into(), entry(0, false)).unwrap_err();
        assert_eq!(err.status, Status::HandleTableFull);
    }

    #[test]
    fn std_slots_are_separate() {
        let mut table = HandleTable::new();
        table.set_std(StdSlot::Stdout, Some("h-out".into()));
        assert_eq!(table.std(StdSlot::Stdout), Some("h-out"));
        assert_eq!(table.std(StdSlot::Stdin), None);
        assert_eq!(table.len(), 0);
    }
}
