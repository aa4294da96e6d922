//! Pipe objects.
//!
//! A pipe is a bounded byte FIFO. Writes block when the buffer is full,
//! reads block when it is empty and the write side is open, and reading a
//! closed empty pipe returns end-of-file. Blocking itself happens in the
//! syscall layer; this type reports `WouldBlock` and tracks the FIFO
//! queues of parked readers and writers so wakes stay fair.

use std::collections::VecDeque;

use vt_abi::Pid;

/// Outcome of a non-blocking read attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipeRead {
    Data(Vec<u8>),
    Eof,
    WouldBlock,
}

/// A bounded FIFO byte pipe.
#[derive(Debug, Clone)]
pub struct Pipe {
    buf: VecDeque<u8>,
    capacity: usize,
    closed: bool,
    read_waiters: VecDeque<Pid>,
    write_waiters: VecDeque<Pid>,
}

impl Pipe {
    pub fn new(capacity: usize) -> Pipe {
        Pipe {
            buf: VecDeque::with_capacity(capacity),
            capacity,
            closed: false,
            read_waiters: VecDeque::new(),
            write_waiters: VecDeque::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// A pipe is "signalled" for the wait engine when a read would not
    /// block: data is buffered or the write side is closed.
    pub fn is_readable(&self) -> bool {
        !self.buf.is_empty() || self.closed
    }

    /// Append as much of `data` as fits. Returns the number of bytes
    /// accepted; `None` when the pipe is closed.
    pub fn write_some(&mut self, data: &[u8]) -> Option<usize> {
        if self.closed {
            return None;
        }
        let space = self.capacity - self.buf.len();
        let n = space.min(data.len());
        self.buf.extend(&data[..n]);
        Some(n)
    }

    /// Take up to `max` bytes.
    pub fn read_some(&mut self, max: usize) -> PipeRead {
        if self.buf.is_empty() {
            return if self.closed {
                PipeRead::Eof
            } else {
                PipeRead::WouldBlock
            };
        }
        let n = max.min(self.buf.len());
        let data: Vec<u8> = self.buf.drain(..n).collect();
        PipeRead::Data(data)
    }

    /// Close the write side. Blocked readers must be woken by the caller.
    pub fn close(&mut self) {
        self.closed = true;
    }

    pub fn park_reader(&mut self, pid: Pid) {
        if !self.read_waiters.contains(&pid) {
            self.read_waiters.push_back(pid);
        }
    }

    pub fn park_writer(&mut self, pid: Pid) {
        if !self.write_waiters.contains(&pid) {
            self.write_waiters.push_back(pid);
        }
    }

    /// Pop the next parked reader, FIFO.
    pub fn next_reader(&mut self) -> Option<Pid> {
        self.read_waiters.pop_front()
    }

    /// Pop the next parked writer, FIFO.
    pub fn next_writer(&mut self) -> Option<Pid> {
        self.write_waiters.pop_front()
    }

    /// Drain every parked process, for close and object teardown.
    pub fn drain_waiters(&mut self) -> Vec<Pid> {
        self.read_waiters
            .drain(..)
            .chain(self.write_waiters.drain(..))
            .collect()
    }

    /// Forget a parked process (it died or timed out).
    pub fn forget_waiter(&mut self, pid: Pid) {
        self.read_waiters.retain(|p| *p != pid);
        self.write_waiters.retain(|p| *p != pid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut p = Pipe::new(64);
        assert_eq!(p.write_some(b"ABCDE"), Some(5));
        assert_eq!(p.read_some(5), PipeRead::Data(b"ABCDE".to_vec()));
        assert_eq!(p.read_some(1), PipeRead::WouldBlock);
    }

    #[test]
    fn closed_empty_pipe_is_eof() {
        let mut p = Pipe::new(8);
        p.write_some(b"xy");
        p.close();
        assert_eq!(p.read_some(10), PipeRead::Data(b"xy".to_vec()));
        assert_eq!(p.read_some(1), PipeRead::Eof);
        assert_eq!(p.write_some(b"z"), None);
    }

    #[test]
    fn write_is_bounded_by_capacity() {
        let mut p = Pipe::new(4);
        assert_eq!(p.write_some(b"abcdef"), Some(4));
        assert_eq!(p.write_some(b"gh"), Some(0));
        assert_eq!(p.read_some(2), PipeRead::Data(b"ab".to_vec()));
        assert_eq!(p.write_some(b"gh"), Some(2));
    }

    #[test]
    fn waiter_queues_are_fifo() {
        let mut p = Pipe::new(4);
        p.park_reader(Pid(1));
        p.park_reader(Pid(2));
        assert_eq!(p.next_reader(), Some(Pid(1)));
        assert_eq!(p.next_reader(), Some(Pid(2)));
        assert_eq!(p.next_reader(), None);
    }
}
