//! Wake cells: how blocked processes are resumed.
//!
//! A process that must sleep parks on its wake cell and returns `Pending`
//! from its body future. Whatever unblocks it (an object signal, a syscall
//! completion, a timeout, a kill) completes the cell with the result the
//! suspended operation should resume with, and flips the process back to
//! ready. The scheduler re-polls ready processes by status, so the stored
//! task waker only has to hand the result across; it never drives
//! scheduling on its own.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll, Wake, Waker};

use spinning_top::Spinlock;
use vt_abi::{Pid, SysResult};

struct WakeInner {
    result: Option<SysResult>,
    waker: Option<Waker>,
}

/// Per-process resumption slot.
pub struct WakeCell {
    inner: Spinlock<WakeInner>,
}

impl WakeCell {
    pub fn new() -> Arc<WakeCell> {
        Arc::new(WakeCell {
            inner: Spinlock::new(WakeInner {
                result: None,
                waker: None,
            }),
        })
    }

    /// Deliver a resumption result and notify the parked future.
    pub fn complete(&self, result: SysResult) {
        let waker = {
            let mut inner = self.inner.lock();
            inner.result = Some(result);
            inner.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    /// Discard any stale result before a fresh park.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.result = None;
        inner.waker = None;
    }

    /// Whether a result is waiting to be consumed.
    pub fn is_completed(&self) -> bool {
        self.inner.lock().result.is_some()
    }

    /// Await the next completion of this cell.
    pub fn park(self: &Arc<WakeCell>) -> Park {
        Park { cell: self.clone() }
    }
}

/// Future side of a wake cell.
pub struct Park {
    cell: Arc<WakeCell>,
}

impl Future for Park {
    type Output = SysResult;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<SysResult> {
        let mut inner = self.cell.inner.lock();
        match inner.result.take() {
            Some(result) => Poll::Ready(result),
            None => {
                inner.waker = Some(cx.waker().clone());
                Poll::Pending
            }
        }
    }
}

/// Yield the current slice once: `Pending` on the first poll, `Ready` on
/// the next. Used by voluntary yields and preemption checkpoints. The
/// process stays in running state, which the scheduler reads as
/// "suspended mid-slice" and flips back to ready.
pub struct YieldNow {
    polled: bool,
}

impl YieldNow {
    pub fn new() -> YieldNow {
        YieldNow { polled: false }
    }
}

impl Default for YieldNow {
    fn default() -> Self {
        Self::new()
    }
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.polled {
            Poll::Ready(())
        } else {
            self.polled = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}

/// Task waker handed to process polls.
///
/// Wake-ups are driven by process status transitions, not by the task
/// waker: every unblock path marks the process ready before completing its
/// wake cell. Waking here is therefore a no-op beyond satisfying the
/// `Future` contract.
struct ProcessWaker(#[allow(dead_code)] Pid);

impl Wake for ProcessWaker {
    fn wake(self: Arc<Self>) {}
}

pub fn process_waker(pid: Pid) -> Waker {
    Waker::from(Arc::new(ProcessWaker(pid)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use vt_abi::Value;

    fn poll_once<F: Future + Unpin>(future: &mut F, pid: Pid) -> Poll<F::Output> {
        let waker = process_waker(pid);
        let mut cx = Context::from_waker(&waker);
        Pin::new(future).poll(&mut cx)
    }

    #[test]
    fn park_waits_for_completion() {
        let cell = WakeCell::new();
        let mut park = cell.park();
        assert!(poll_once(&mut park, Pid(1)).is_pending());

        cell.complete(Ok(Value::Int(7)));
        match poll_once(&mut park, Pid(1)) {
            Poll::Ready(Ok(Value::Int(7))) => {}
            other => panic!("unexpected poll result: {other:?}"),
        }
    }

    #[test]
    fn completion_before_park_is_not_lost() {
        let cell = WakeCell::new();
        cell.complete(Ok(Value::Null));
        let mut park = cell.park();
        assert!(poll_once(&mut park, Pid(1)).is_ready());
    }

    #[test]
    fn clear_discards_stale_result() {
        let cell = WakeCell::new();
        cell.complete(Ok(Value::Null));
        cell.clear();
        let mut park = cell.park();
        assert!(poll_once(&mut park, Pid(1)).is_pending());
    }

    #[test]
    fn yield_now_is_pending_exactly_once() {
        let mut y = YieldNow::new();
        assert!(poll_once(&mut y, Pid(1)).is_pending());
        assert!(poll_once(&mut y, Pid(1)).is_ready());
    }
}
