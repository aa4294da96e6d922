//! Message queues.
//!
//! A bounded priority queue of `Value` messages. Higher priority is
//! delivered first; within a priority class delivery is FIFO, enforced by
//! a monotonic sequence number in the heap ordering.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, VecDeque};

use vt_abi::{MAX_MESSAGE_SIZE, Pid, Status, SysError, SysResult, Value};

#[derive(Debug, Clone)]
struct MqEntry {
    priority: i64,
    seq: u64,
    payload: Value,
}

impl PartialEq for MqEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for MqEntry {}

impl Ord for MqEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: higher priority wins; equal priority falls back to the
        // *lower* sequence number (older message) winning.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for MqEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Approximate wire size of a message, for the per-message bound.
fn message_size(value: &Value) -> usize {
    match value {
        Value::Str(s) => s.len(),
        Value::Bytes(b) => b.len(),
        Value::List(items) => items.iter().map(message_size).sum::<usize>() + 8,
        Value::Map(map) => map
            .iter()
            .map(|(k, v)| k.len() + message_size(v))
            .sum::<usize>()
            + 8,
        _ => 8,
    }
}

/// A bounded priority message queue.
#[derive(Debug, Clone)]
pub struct MessageQueue {
    heap: BinaryHeap<MqEntry>,
    capacity: usize,
    next_seq: u64,
    send_waiters: VecDeque<Pid>,
    recv_waiters: VecDeque<Pid>,
}

impl MessageQueue {
    pub fn new(capacity: usize) -> MessageQueue {
        MessageQueue {
            heap: BinaryHeap::new(),
            capacity,
            next_seq: 0,
            send_waiters: VecDeque::new(),
            recv_waiters: VecDeque::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.heap.len() >= self.capacity
    }

    /// Queue a message. `Err` on oversized payloads; `Ok(false)` when the
    /// queue is full and the sender should block.
    pub fn send(&mut self, priority: i64, payload: Value) -> SysResult<bool> {
        if message_size(&payload) > MAX_MESSAGE_SIZE {
            return Err(SysError::with(
                Status::InvalidParameter,
                "message exceeds maximum size",
            ));
        }
        if self.is_full() {
            return Ok(false);
        }
        let seq = self.next_seq;
        self.next_seq += 1;
        self.heap.push(MqEntry {
            priority,
            seq,
            payload,
        });
        Ok(true)
    }

    /// Take the highest-priority message, FIFO within a priority class.
    pub fn receive(&mut self) -> Option<(i64, Value)> {
        self.heap.pop().map(|e| (e.priority, e.payload))
    }

    pub fn park_sender(&mut self, pid: Pid) {
        if !self.send_waiters.contains(&pid) {
            self.send_waiters.push_back(pid);
        }
    }

    pub fn park_receiver(&mut self, pid: Pid) {
        if !self.recv_waiters.contains(&pid) {
            self.recv_waiters.push_back(pid);
        }
    }

    pub fn next_sender(&mut self) -> Option<Pid> {
        self.send_waiters.pop_front()
    }

    pub fn next_receiver(&mut self) -> Option<Pid> {
        self.recv_waiters.pop_front()
    }

    pub fn forget_waiter(&mut self, pid: Pid) {
        self.send_waiters.retain(|p| *p != pid);
        self.recv_waiters.retain(|p| *p != pid);
    }

    /// Drain every parked process, for object teardown.
    pub fn drain_waiters(&mut self) -> Vec<Pid> {
        self.send_waiters
            .drain(..)
            .chain(self.recv_waiters.drain(..))
            .collect()
    }
}
