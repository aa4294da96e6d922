//! Deferred procedure calls.
//!
//! DPCs are kernel work items queued from any context and drained at most
//! once per scheduler iteration, in FIFO order, at IRQL Dispatch.

use std::collections::VecDeque;

/// A queued deferred procedure.
pub struct DpcItem {
    pub label: String,
    pub work: Box<dyn FnOnce() + Send>,
}

/// FIFO queue of deferred procedures.
#[derive(Default)]
pub struct DpcQueue {
    items: VecDeque<DpcItem>,
}

impl DpcQueue {
    pub fn new() -> DpcQueue {
        DpcQueue::default()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn enqueue(&mut self, label: impl Into<String>, work: impl FnOnce() + Send + 'static) {
        self.items.push_back(DpcItem {
            label: label.into(),
            work: Box::new(work),
        });
    }

    /// Take the whole queue for this iteration's drain.
    pub fn take_all(&mut self) -> Vec<DpcItem> {
        self.items.drain(..).collect()
    }
}
