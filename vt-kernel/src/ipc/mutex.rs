//! Mutex objects.

use vt_abi::{Pid, Status, SysError};

/// A recursive, owner-tracked mutex.
///
/// Acquisition goes through the wait engine (a mutex is signalled for a
/// given waiter when it is free or already owned by that waiter); release
/// is a direct syscall.
#[derive(Debug, Clone)]
pub struct Mutex {
    owner: Option<Pid>,
    recursion: u32,
}

impl Mutex {
    pub fn new() -> Mutex {
        Mutex {
            owner: None,
            recursion: 0,
        }
    }

    pub fn owner(&self) -> Option<Pid> {
        self.owner
    }

    /// Whether `pid` could take the mutex right now.
    pub fn available_to(&self, pid: Pid) -> bool {
        match self.owner {
            None => true,
            Some(owner) => owner == pid,
        }
    }

    /// Take the mutex for `pid`. Recursive acquisition increments the
    /// recursion counter. Callers must have checked `available_to` first.
    pub fn acquire(&mut self, pid: Pid) {
        match self.owner {
            Some(owner) => {
                debug_assert_eq!(owner, pid);
                self.recursion += 1;
            }
            None => {
                self.owner = Some(pid);
                self.recursion = 1;
            }
        }
    }

    /// Release one level of ownership. Returns `true` when the mutex became
    /// free (waiters should be re-evaluated).
    pub fn release(&mut self, pid: Pid) -> Result<bool, SysError> {
        match self.owner {
            Some(owner) if owner == pid => {
                self.recursion -= 1;
                if self.recursion == 0 {
                    self.owner = None;
                    Ok(true)
                } else {
                    Ok(false)
                }
            }
            _ => Err(SysError::with(
                Status::Unsuccessful,
                "mutex not owned by caller",
            )),
        }
    }

    /// Forced release when the owner dies. Returns `true` if the mutex was
    /// held by `pid`.
    pub fn abandon(&mut self, pid: Pid) -> bool {
        if self.owner == Some(pid) {
            self.owner = None;
            self.recursion = 0;
            true
        } else {
            false
        }
    }
}

impl Default for Mutex {
    fn default() -> Self {
        Self::new()
    }
}
