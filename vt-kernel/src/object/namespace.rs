//! The kernel object namespace.
//!
//! A flat, sorted map of canonical backslash paths to object ids. The
//! hierarchy is implicit in the path structure, which keeps directory
//! enumeration a prefix scan. Symbolic links are objects whose bodies name
//! a target path; resolution substitutes them with a bounded indirection
//! count so link cycles cannot hang a lookup.

use std::collections::BTreeMap;

use vt_abi::{MAX_SYMLINK_DEPTH, path};

use super::ObjectId;

/// Canonical subtrees seeded at boot.
pub const CANONICAL_SUBTREES: &[&str] = &["\\Device", "\\DosDevices", "\\Pipe", "\\Section", "\\Mqueue"];

/// Path → object map.
#[derive(Debug, Default)]
pub struct Namespace {
    entries: BTreeMap<String, ObjectId>,
}

impl Namespace {
    pub fn new() -> Namespace {
        Namespace::default()
    }

    /// Insert an object at a canonical path. Fails when the slot is taken.
    pub fn insert(&mut self, path: &str, id: ObjectId) -> Result<(), ()> {
        if !path::is_canonical(path) || self.entries.contains_key(path) {
            return Err(());
        }
        self.entries.insert(path.to_string(), id);
        Ok(())
    }

    /// Remove the entry at `path`, returning the object that lived there.
    pub fn remove(&mut self, path: &str) -> Option<ObjectId> {
        self.entries.remove(path)
    }

    /// Exact lookup with no symlink resolution.
    pub fn get(&self, path: &str) -> Option<ObjectId> {
        self.entries.get(path).copied()
    }

    /// Resolve `path` to an object id, substituting symbolic links.
    ///
    /// `symlink_target` maps an object id to its link target when the
    /// object is a symlink. Indirection is bounded at
    /// [`MAX_SYMLINK_DEPTH`]; paths that chain deeper (or loop) resolve to
    /// `None`. Links may appear at any prefix of the path: the longest
    /// matching link prefix is substituted first.
    pub fn resolve(
        &self,
        path: &str,
        mut symlink_target: impl FnMut(ObjectId) -> Option<String>,
    ) -> Option<ObjectId> {
        let mut current = path.to_string();

        for _ in 0..=MAX_SYMLINK_DEPTH {
            if let Some(id) = self.get(&current) {
                match symlink_target(id) {
                    Some(target) => {
                        current = target;
                        continue;
                    }
                    None => return Some(id),
                }
            }

            // No exact entry: try the longest prefix that is a symlink and
            // graft the remainder onto its target.
            let mut rewritten = None;
            let mut prefix = current.clone();
            while let Some((parent, _)) = path::split_leaf(&prefix) {
                let parent = parent.to_string();
                if let Some(id) = self.get(&parent) {
                    if let Some(target) = symlink_target(id) {
                        let rest = &current[parent.len()..];
                        rewritten = Some(format!("{target}{rest}"));
                    }
                    break;
                }
                prefix = parent;
            }

            match rewritten {
                Some(next) => current = next,
                None => return None,
            }
        }

        // Indirection bound exceeded.
        None
    }

    /// Enumerate the direct children of a directory path.
    pub fn children(&self, dir: &str) -> Vec<String> {
        let prefix = if dir == "\\" {
            "\\".to_string()
        } else {
            format!("{dir}\\")
        };

        let mut names: Vec<String> = Vec::new();
        for key in self.entries.keys() {
            if let Some(rest) = key.strip_prefix(&prefix) {
                let child = match rest.find('\\') {
                    Some(idx) => &rest[..idx],
                    None => rest,
                };
                if !child.is_empty() && names.last().map(String::as_str) != Some(child) {
                    names.push(child.to_string());
                }
            }
        }
        names.dedup();
        names
    }

    /// Every named entry, for diagnostics and the integrity monitor.
    pub fn iter(&self) -> impl Iterator<Item = (&str, ObjectId)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), *v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
