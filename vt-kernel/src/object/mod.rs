//! The Object Manager.
//!
//! Every kernel-visible resource is a typed, reference-counted object in a
//! generational arena. Objects become reachable through the namespace
//! (named objects), through per-process handles, or through explicit
//! references; the refcount is exactly the number of those inbound edges,
//! and hitting zero destroys the object deterministically, waking any
//! parked waiters with an error.

pub mod handle;
pub mod namespace;

pub use handle::{HANDLE_LIMIT, HandleEntry, HandleTable, StdSlot};
pub use namespace::{CANONICAL_SUBTREES, Namespace};

use std::collections::{HashMap, VecDeque};

use slab::Slab;
use vt_abi::{Pid, Status, SysError, SysResult, Value};

use crate::ipc::{Event, MessageQueue, Mutex, Pipe, Section, Semaphore, Timer};

/// Generational object id. A freed slot's bumped generation invalidates
/// any dangling copies of the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectId {
    pub index: u32,
    pub generation: u64,
}

impl ObjectId {
    /// Encode for transport across the ring 0/1 syscall surface.
    pub fn encode(&self) -> String {
        format!("obj:{}:{}", self.index, self.generation)
    }

    pub fn decode(s: &str) -> Option<ObjectId> {
        let rest = s.strip_prefix("obj:")?;
        let (index, generation) = rest.split_once(':')?;
        Some(ObjectId {
            index: index.parse().ok()?,
            generation: generation.parse().ok()?,
        })
    }
}

/// An open file on a device, owned by the Pipeline Manager's VFS layer.
#[derive(Debug, Clone)]
pub struct IoFile {
    /// `\Device` name this file was opened on.
    pub device: String,
    /// Driver-defined per-open context, round-tripped on every IRP.
    pub context: Value,
}

/// A registered device.
#[derive(Debug, Clone)]
pub struct IoDevice {
    /// Leaf name under `\Device`.
    pub name: String,
    /// Driver process that services this device's IRPs.
    pub driver: Pid,
    /// Host event kinds this device subscribed to as interrupts.
    pub interrupts: Vec<String>,
}

/// A symbolic link to another namespace path.
#[derive(Debug, Clone)]
pub struct Symlink {
    pub target: String,
}

/// Typed object body.
#[derive(Debug)]
pub enum ObjectBody {
    IoFile(IoFile),
    IoDevice(IoDevice),
    IoPipe(Pipe),
    IpcEvent(Event),
    IpcMutex(Mutex),
    IpcSemaphore(Semaphore),
    IpcTimer(Timer),
    IpcMessageQueue(MessageQueue),
    IpcSection(Section),
    IpcSymlink(Symlink),
}

impl ObjectBody {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectBody::IoFile(_) => "IoFile",
            ObjectBody::IoDevice(_) => "IoDevice",
            ObjectBody::IoPipe(_) => "IoPipe",
            ObjectBody::IpcEvent(_) => "IpcEvent",
            ObjectBody::IpcMutex(_) => "IpcMutex",
            ObjectBody::IpcSemaphore(_) => "IpcSemaphore",
            ObjectBody::IpcTimer(_) => "IpcTimer",
            ObjectBody::IpcMessageQueue(_) => "IpcMessageQueue",
            ObjectBody::IpcSection(_) => "IpcSection",
            ObjectBody::IpcSymlink(_) => "IpcSymlink",
        }
    }

    /// Uniform wait-engine state. `None` means the object is not waitable.
    pub fn is_signalled_for(&self, pid: Pid) -> Option<bool> {
        Some(match self {
            ObjectBody::IpcEvent(e) => e.is_signalled(),
            ObjectBody::IpcMutex(m) => m.available_to(pid),
            ObjectBody::IpcSemaphore(s) => s.is_available(),
            ObjectBody::IpcTimer(t) => t.is_signalled(),
            ObjectBody::IoPipe(p) => p.is_readable(),
            ObjectBody::IpcMessageQueue(q) => !q.is_empty(),
            _ => return None,
        })
    }

    /// Consume the signalled state on behalf of a satisfied waiter. This
    /// is the atomic take: a semaphore permit or auto-reset event is taken
    /// here, in the same step that selects the waiter.
    pub fn consume_for(&mut self, pid: Pid) {
        match self {
            ObjectBody::IpcEvent(e) => e.consume(),
            ObjectBody::IpcMutex(m) => m.acquire(pid),
            ObjectBody::IpcSemaphore(s) => s.acquire(),
            ObjectBody::IpcTimer(t) => t.consume(),
            // Pipes and message queues consume on the actual read/receive.
            ObjectBody::IoPipe(_) | ObjectBody::IpcMessageQueue(_) => {}
            _ => {}
        }
    }

    /// Drain body-specific parked processes (pipe readers/writers, queue
    /// senders/receivers) for teardown.
    fn drain_parked(&mut self) -> Vec<Pid> {
        match self {
            ObjectBody::IoPipe(p) => p.drain_waiters(),
            ObjectBody::IpcMessageQueue(q) => q.drain_waiters(),
            _ => Vec::new(),
        }
    }

    fn forget_parked(&mut self, pid: Pid) {
        match self {
            ObjectBody::IoPipe(p) => p.forget_waiter(pid),
            ObjectBody::IpcMessageQueue(q) => q.forget_waiter(pid),
            _ => {}
        }
    }
}

/// Common object header plus body.
#[derive(Debug)]
pub struct Object {
    /// Canonical namespace path, when inserted.
    pub name: Option<String>,
    refcount: u32,
    /// Wait-engine parkers, FIFO.
    waiters: VecDeque<Pid>,
    pub body: ObjectBody,
}

impl Object {
    pub fn refcount(&self) -> u32 {
        self.refcount
    }
}

/// Wait mode of a multi-object wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitMode {
    Any,
    All,
}

#[derive(Debug)]
struct WaitState {
    objects: Vec<ObjectId>,
    mode: WaitMode,
}

/// Everything the kernel must act on after an object is freed.
#[derive(Debug)]
pub struct FreedObject {
    pub name: Option<String>,
    pub body: ObjectBody,
    /// Processes parked on the object; wake each with an error.
    pub orphaned_waiters: Vec<Pid>,
}

struct Slot {
    generation: u64,
    object: Object,
}

/// Object arena, namespace, and wait registry.
pub struct ObjectManager {
    arena: Slab<Slot>,
    next_generation: u64,
    pub namespace: Namespace,
    waits: HashMap<Pid, WaitState>,
}

impl ObjectManager {
    pub fn new() -> ObjectManager {
        ObjectManager {
            arena: Slab::new(),
            next_generation: 1,
            namespace: Namespace::new(),
            waits: HashMap::new(),
        }
    }

    /// Number of live objects.
    pub fn live_objects(&self) -> usize {
        self.arena.len()
    }

    /// Per-tag object counts, for diagnostics and the crash dump.
    pub fn stats(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<(&'static str, usize)> = Vec::new();
        for (_, slot) in self.arena.iter() {
            let tag = slot.object.body.tag();
            match counts.iter_mut().find(|(t, _)| *t == tag) {
                Some((_, n)) => *n += 1,
                None => counts.push((tag, 1)),
            }
        }
        counts.sort();
        counts
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Create an object with no inbound edges yet. The caller must name it
    /// or create a handle before the id escapes, otherwise it is
    /// unreachable garbage (freed on the first dereference pairing).
    pub fn create(&mut self, body: ObjectBody) -> ObjectId {
        let generation = self.next_generation;
        self.next_generation += 1;
        let index = self.arena.insert(Slot {
            generation,
            object: Object {
                name: None,
                refcount: 0,
                waiters: VecDeque::new(),
                body,
            },
        }) as u32;
        ObjectId { index, generation }
    }

    pub fn get(&self, id: ObjectId) -> Option<&Object> {
        let slot = self.arena.get(id.index as usize)?;
        (slot.generation == id.generation).then_some(&slot.object)
    }

    pub fn get_mut(&mut self, id: ObjectId) -> Option<&mut Object> {
        let slot = self.arena.get_mut(id.index as usize)?;
        (slot.generation == id.generation).then_some(&mut slot.object)
    }

    /// Add one inbound edge.
    pub fn reference(&mut self, id: ObjectId) -> SysResult<()> {
        let object = self
            .get_mut(id)
            .ok_or(SysError::new(Status::InvalidHandle))?;
        object.refcount += 1;
        Ok(())
    }

    /// Drop one inbound edge. Returns the freed object when the count hit
    /// zero; the caller wakes the orphaned waiters with an error.
    pub fn dereference(&mut self, id: ObjectId) -> Option<FreedObject> {
        let object = self.get_mut(id)?;
        debug_assert!(object.refcount > 0, "dereference underflow");
        object.refcount = object.refcount.saturating_sub(1);
        if object.refcount > 0 {
            return None;
        }

        let slot = self.arena.remove(id.index as usize);
        let mut object = slot.object;
        if let Some(name) = &object.name {
            self.namespace.remove(name);
        }

        let mut orphaned: Vec<Pid> = object.waiters.drain(..).collect();
        orphaned.extend(object.body.drain_parked());
        for pid in &orphaned {
            self.cancel_wait(*pid);
        }

        Some(FreedObject {
            name: object.name,
            body: object.body,
            orphaned_waiters: orphaned,
        })
    }

    // =========================================================================
    // Namespace operations
    // =========================================================================

    /// Insert an object at a canonical path, adding a namespace edge.
    pub fn insert(&mut self, id: ObjectId, path: &str) -> SysResult<()> {
        if self.get(id).is_none() {
            return Err(SysError::new(Status::InvalidHandle));
        }
        if self.namespace.get(path).is_some() {
            return Err(SysError::with(
                Status::DeviceAlreadyExists,
                format!("object path {path} exists"),
            ));
        }
        self.namespace
            .insert(path, id)
            .map_err(|_| SysError::with(Status::InvalidParameter, format!("bad path {path}")))?;
        let object = self.get_mut(id).expect("checked above");
        object.name = Some(path.to_string());
        object.refcount += 1;
        Ok(())
    }

    /// Resolve a path to an object, following symlinks. Does not add an
    /// edge.
    pub fn lookup(&self, path: &str) -> Option<ObjectId> {
        let arena = &self.arena;
        self.namespace.resolve(path, |id| {
            let slot = arena.get(id.index as usize)?;
            if slot.generation != id.generation {
                return None;
            }
            match &slot.object.body {
                ObjectBody::IpcSymlink(link) => Some(link.target.clone()),
                _ => None,
            }
        })
    }

    /// Remove the namespace edge at `path`. Frees the object when the
    /// namespace held the last edge.
    pub fn delete(&mut self, path: &str) -> SysResult<Option<FreedObject>> {
        let id = self
            .namespace
            .remove(path)
            .ok_or(SysError::new(Status::NoSuchFile))?;
        if let Some(object) = self.get_mut(id) {
            object.name = None;
        }
        Ok(self.dereference(id))
    }

    /// Create a symbolic link object at `src` pointing at `target`.
    pub fn create_symlink(&mut self, src: &str, target: &str) -> SysResult<ObjectId> {
        let id = self.create(ObjectBody::IpcSymlink(Symlink {
            target: target.to_string(),
        }));
        match self.insert(id, src) {
            Ok(()) => Ok(id),
            Err(err) => {
                // Unreachable object: drop the slot straight away.
                self.arena.remove(id.index as usize);
                Err(err)
            }
        }
    }

    // =========================================================================
    // Wait engine
    // =========================================================================

    /// Evaluate a wait without parking. Consumes the chosen object(s) when
    /// the predicate is satisfied. Returns `Some(index)` of the satisfied
    /// object in `any` mode (`0` in `all` mode), `None` when the caller
    /// should park.
    pub fn try_wait(
        &mut self,
        pid: Pid,
        objects: &[ObjectId],
        mode: WaitMode,
    ) -> SysResult<Option<usize>> {
        // Validate every id first: a stale id fails the whole wait.
        for id in objects {
            let object = self.get(*id).ok_or(SysError::new(Status::InvalidHandle))?;
            if object.body.is_signalled_for(pid).is_none() {
                return Err(SysError::with(
                    Status::InvalidParameter,
                    format!("{} is not waitable", object.body.tag()),
                ));
            }
        }

        match mode {
            WaitMode::Any => {
                for (index, id) in objects.iter().enumerate() {
                    let object = self.get_mut(*id).expect("validated above");
                    if object.body.is_signalled_for(pid) == Some(true) {
                        object.body.consume_for(pid);
                        return Ok(Some(index));
                    }
                }
                Ok(None)
            }
            WaitMode::All => {
                let all = objects.iter().all(|id| {
                    self.get(*id)
                        .and_then(|o| o.body.is_signalled_for(pid))
                        .unwrap_or(false)
                });
                if !all {
                    return Ok(None);
                }
                for id in objects {
                    let object = self.get_mut(*id).expect("validated above");
                    object.body.consume_for(pid);
                }
                Ok(Some(0))
            }
        }
    }

    /// Park `pid` on a set of objects. The caller transitions the process
    /// to sleeping before yielding.
    pub fn register_wait(&mut self, pid: Pid, objects: Vec<ObjectId>, mode: WaitMode) {
        for id in &objects {
            if let Some(object) = self.get_mut(*id) {
                if !object.waiters.contains(&pid) {
                    object.waiters.push_back(pid);
                }
            }
        }
        self.waits.insert(pid, WaitState { objects, mode });
    }

    /// Re-evaluate waiters after `id` became signalled. Returns the waits
    /// completed by this signal as `(pid, satisfied_index)` pairs, in FIFO
    /// order. The consume step happens here, atomically with selection.
    pub fn signal_object(&mut self, id: ObjectId) -> Vec<(Pid, usize)> {
        let mut completions = Vec::new();

        // Bounded by the queue length so all-mode rotation cannot spin: each
        // waiter is examined at most twice per signal.
        let mut budget = self
            .get(id)
            .map(|o| o.waiters.len() * 2 + 1)
            .unwrap_or(0);

        while budget > 0 {
            budget -= 1;
            let Some(object) = self.get_mut(id) else {
                break;
            };
            if object.body.is_signalled_for(Pid(0)).is_none() {
                break;
            }

            // Take the first waiter whose predicate this signal satisfies.
            let Some(&pid) = object.waiters.front() else {
                break;
            };

            let Some((mode, wait_objects)) =
                self.waits.get(&pid).map(|s| (s.mode, s.objects.clone()))
            else {
                // Stale queue entry; drop it and continue.
                if let Some(object) = self.get_mut(id) {
                    object.waiters.pop_front();
                }
                continue;
            };

            let satisfied = match mode {
                WaitMode::Any => self
                    .get(id)
                    .and_then(|o| o.body.is_signalled_for(pid))
                    .unwrap_or(false),
                WaitMode::All => wait_objects.iter().all(|oid| {
                    self.get(*oid)
                        .and_then(|o| o.body.is_signalled_for(pid))
                        .unwrap_or(false)
                }),
            };

            if !satisfied {
                // The head waiter cannot complete. In any-mode nothing
                // behind it may consume this object without starving it,
                // so stop; an all-mode head blocked on its *other* objects
                // is rotated so waiters behind it are not starved by an
                // incomplete set.
                let head_blocks_others = {
                    let object = self.get_mut(id).expect("checked above");
                    if object.body.is_signalled_for(pid) == Some(true)
                        && mode == WaitMode::All
                        && object.waiters.len() > 1
                    {
                        let head = object.waiters.pop_front().expect("non-empty");
                        object.waiters.push_back(head);
                        false
                    } else {
                        true
                    }
                };
                if head_blocks_others {
                    break;
                }
                continue;
            }

            self.waits.remove(&pid);
            let index = match mode {
                WaitMode::Any => wait_objects.iter().position(|oid| *oid == id).unwrap_or(0),
                WaitMode::All => 0,
            };

            match mode {
                WaitMode::Any => {
                    if let Some(object) = self.get_mut(id) {
                        object.body.consume_for(pid);
                    }
                }
                WaitMode::All => {
                    for oid in &wait_objects {
                        if let Some(object) = self.get_mut(*oid) {
                            object.body.consume_for(pid);
                        }
                    }
                }
            }

            // Remove the completed waiter from every queue it sat in.
            for oid in &wait_objects {
                if let Some(object) = self.get_mut(*oid) {
                    object.waiters.retain(|p| *p != pid);
                }
            }

            completions.push((pid, index));
        }

        completions
    }

    /// Drop a freshly created object that never gained an inbound edge
    /// (failed named creation).
    pub(crate) fn discard(&mut self, id: ObjectId) {
        if let Some(object) = self.get(id) {
            debug_assert_eq!(object.refcount(), 0);
            self.arena.remove(id.index as usize);
        }
    }

    /// Drop `pid`'s wait registration (timeout, kill, or completion by
    /// another path). Returns `true` when a registration existed.
    pub fn cancel_wait(&mut self, pid: Pid) -> bool {
        let Some(state) = self.waits.remove(&pid) else {
            return false;
        };
        for oid in &state.objects {
            if let Some(object) = self.get_mut(*oid) {
                object.waiters.retain(|p| *p != pid);
            }
        }
        true
    }

    /// Forget `pid` everywhere: wait registry plus body-specific parking.
    /// Used on process death.
    pub fn forget_process(&mut self, pid: Pid) {
        self.cancel_wait(pid);
        for (_, slot) in self.arena.iter_mut() {
            slot.object.waiters.retain(|p| *p != pid);
            slot.object.body.forget_parked(pid);
        }
    }

    /// Release every mutex owned by a dying process. Returns the ids that
    /// became free so the kernel can re-run their waiters.
    pub fn abandon_mutexes(&mut self, pid: Pid) -> Vec<ObjectId> {
        let mut freed = Vec::new();
        for (index, slot) in self.arena.iter_mut() {
            if let ObjectBody::IpcMutex(m) = &mut slot.object.body {
                if m.abandon(pid) {
                    freed.push(ObjectId {
                        index: index as u32,
                        generation: slot.generation,
                    });
                }
            }
        }
        freed
    }

    /// Ids of every armed timer, for the IPC tick.
    pub fn armed_timers(&self) -> Vec<ObjectId> {
        self.arena
            .iter()
            .filter_map(|(index, slot)| match &slot.object.body {
                ObjectBody::IpcTimer(t) if t.is_armed() => Some(ObjectId {
                    index: index as u32,
                    generation: slot.generation,
                }),
                _ => None,
            })
            .collect()
    }
}

impl Default for ObjectManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event_object(om: &mut ObjectManager, manual: bool) -> ObjectId {
        om.create(ObjectBody::IpcEvent(Event::new(manual, false)))
    }

    #[test]
    fn object_id_encoding_round_trips() {
        let id = ObjectId {
            index: 42,
            generation: 7,
        };
        assert_eq!(ObjectId::decode(&id.encode()), Some(id));
        assert_eq!(ObjectId::decode("obj:x:y"), None);
        assert_eq!(ObjectId::decode("nonsense"), None);
    }

    #[test]
    fn refcount_tracks_inbound_edges() {
        let mut om = ObjectManager::new();
        let id = event_object(&mut om, false);

        om.insert(id, "\\Pipe\\e").unwrap();
        assert_eq!(om.get(id).unwrap().refcount(), 1);

        om.reference(id).unwrap();
        assert_eq!(om.get(id).unwrap().refcount(), 2);

        assert!(om.dereference(id).is_none());
        let freed = om.delete("\\Pipe\\e").unwrap();
        assert!(freed.is_some());
        assert!(om.get(id).is_none());
        assert_eq!(om.lookup("\\Pipe\\e"), None);
    }

    #[test]
    fn stale_generation_is_invisible() {
        let mut om = ObjectManager::new();
        let id = event_object(&mut om, false);
        om.reference(id).unwrap();
        om.dereference(id);

        // A new object may reuse the slab slot; the old id must not see it.
        let new_id = event_object(&mut om, false);
        assert_eq!(new_id.index, id.index);
        assert_ne!(new_id.generation, id.generation);
        assert!(om.get(id).is_none());
        assert!(om.get(new_id).is_some());
    }

    #[test]
    fn try_wait_any_consumes_exactly_one() {
        let mut om = ObjectManager::new();
        let auto = event_object(&mut om, false);
        om.reference(auto).unwrap();
        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(auto).unwrap().body {
            e.set();
        }

        let got = om.try_wait(Pid(1), &[auto], WaitMode::Any).unwrap();
        assert_eq!(got, Some(0));
        // Auto-reset: consumed by the successful wait.
        let got = om.try_wait(Pid(1), &[auto], WaitMode::Any).unwrap();
        assert_eq!(got, None);
    }

    #[test]
    fn signal_wakes_fifo_waiter() {
        let mut om = ObjectManager::new();
        let auto = event_object(&mut om, false);
        om.reference(auto).unwrap();

        om.register_wait(Pid(1), vec![auto], WaitMode::Any);
        om.register_wait(Pid(2), vec![auto], WaitMode::Any);

        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(auto).unwrap().body {
            e.set();
        }
        let completions = om.signal_object(auto);
        // Auto-reset event: exactly one waiter, FIFO order.
        assert_eq!(completions, vec![(Pid(1), 0)]);

        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(auto).unwrap().body {
            e.set();
        }
        assert_eq!(om.signal_object(auto), vec![(Pid(2), 0)]);
    }

    #[test]
    fn manual_event_wakes_all_waiters() {
        let mut om = ObjectManager::new();
        let manual = event_object(&mut om, true);
        om.reference(manual).unwrap();

        om.register_wait(Pid(1), vec![manual], WaitMode::Any);
        om.register_wait(Pid(2), vec![manual], WaitMode::Any);

        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(manual).unwrap().body {
            e.set();
        }
        let completions = om.signal_object(manual);
        assert_eq!(completions, vec![(Pid(1), 0), (Pid(2), 0)]);
        // Signalled state persists for manual-reset events.
        assert_eq!(
            om.try_wait(Pid(3), &[manual], WaitMode::Any).unwrap(),
            Some(0)
        );
    }

    #[test]
    fn wait_all_requires_every_object() {
        let mut om = ObjectManager::new();
        let a = event_object(&mut om, true);
        let b = event_object(&mut om, true);
        om.reference(a).unwrap();
        om.reference(b).unwrap();

        om.register_wait(Pid(1), vec![a, b], WaitMode::All);

        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(a).unwrap().body {
            e.set();
        }
        assert!(om.signal_object(a).is_empty());

        if let ObjectBody::IpcEvent(e) = &mut om.get_mut(b).unwrap().body {
            e.set();
        }
        assert_eq!(om.signal_object(b), vec![(Pid(1), 0)]);
    }

    #[test]
    fn freeing_reports_orphaned_waiters() {
        let mut om = ObjectManager::new();
        let auto = event_object(&mut om, false);
        om.reference(auto).unwrap();
        om.register_wait(Pid(4), vec![auto], WaitMode::Any);

        let freed = om.dereference(auto).expect("last edge dropped");
        assert_eq!(freed.orphaned_waiters, vec![Pid(4)]);
        assert!(!om.cancel_wait(Pid(4)), "wait registration already gone");
    }

    #[test]
    fn symlink_resolution_via_lookup() {
        let mut om = ObjectManager::new();
        let dev = event_object(&mut om, false);
        om.insert(dev, "\\Device\\beep").unwrap();
        om.create_symlink("\\DosDevices\\dev\\beep", "\\Device\\beep")
            .unwrap();

        assert_eq!(om.lookup("\\DosDevices\\dev\\beep"), Some(dev));
    }

    #[test]
    fn mutex_grant_is_fifo_through_signal() {
        let mut om = ObjectManager::new();
        let id = om.create(ObjectBody::IpcMutex(Mutex::new()));
        om.reference(id).unwrap();

        // Pid 1 takes the mutex directly.
        assert_eq!(om.try_wait(Pid(1), &[id], WaitMode::Any).unwrap(), Some(0));

        om.register_wait(Pid(2), vec![id], WaitMode::Any);
        om.register_wait(Pid(3), vec![id], WaitMode::Any);

        // Release: the mutex becomes free, waiter 2 acquires it in the
        // same signal step.
        if let ObjectBody::IpcMutex(m) = &mut om.get_mut(id).unwrap().body {
            m.release(Pid(1)).unwrap();
        }
        assert_eq!(om.signal_object(id), vec![(Pid(2), 0)]);
        if let ObjectBody::IpcMutex(m) = &om.get(id).unwrap().body {
            assert_eq!(m.owner(), Some(Pid(2)));
        }
    }
}
