//! Process-wide exclusivity for create and restore
//!
//! A second request while the lock is held is rejected immediately rather
//! than queued, so an explicit restore is never silently parked behind a long
//! scheduled dump.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;

use crate::error::{VaultError, VaultResult};

/// Operations serialized by the lock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Create,
    Restore,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => write!(f, "backup"),
            Operation::Restore => write!(f, "restore"),
        }
    }
}

/// Single try-lock shared by every create and restore
#[derive(Debug, Clone, Default)]
pub struct OperationLock {
    held: Arc<Mutex<Option<Operation>>>,
}

impl OperationLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock for `operation`, or fail with `Rejected` if it is held
    pub fn try_acquire(&self, operation: Operation) -> VaultResult<OperationGuard> {
        let mut held = self.held.lock();
        if let Some(current) = *held {
            return Err(VaultError::Rejected(format!("a {} is already running", current)));
        }
        *held = Some(operation);

        Ok(OperationGuard {
            held: Arc::clone(&self.held),
            operation,
        })
    }

    /// The operation currently holding the lock
    pub fn current(&self) -> Option<Operation> {
        *self.held.lock()
    }
}

/// Releases the lock when dropped, on every exit path
#[derive(Debug)]
pub struct OperationGuard {
    held: Arc<Mutex<Option<Operation>>>,
    operation: Operation,
}

impl OperationGuard {
    pub fn operation(&self) -> Operation {
        self.operation
    }
}

impl Drop for OperationGuard {
    fn drop(&mut self) {
        *self.held.lock() = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Barrier;
    use std::thread;

    #[test]
    fn test_second_acquire_is_rejected() {
        let lock = OperationLock::new();

        let guard = lock.try_acquire(Operation::Create).unwrap();
        assert_eq!(guard.operation(), Operation::Create);
        assert_eq!(lock.current(), Some(Operation::Create));

        let err = lock.try_acquire(Operation::Restore).unwrap_err();
        assert!(err.is_rejected());
        assert_eq!(err.to_string(), "Operation in progress: a backup is already running");
    }

    #[test]
    fn test_release_on_drop() {
        let lock = OperationLock::new();
        {
            let _guard = lock.try_acquire(Operation::Restore).unwrap();
        }
        assert_eq!(lock.current(), None);
        assert!(lock.try_acquire(Operation::Create).is_ok());
    }

    #[test]
    fn test_release_on_panic() {
        let lock = OperationLock::new();
        let cloned = lock.clone();

        let result = thread::spawn(move || {
            let _guard = cloned.try_acquire(Operation::Create).unwrap();
            panic!("dump exploded");
        })
        .join();

        assert!(result.is_err());
        assert_eq!(lock.current(), None);
    }

    #[test]
    fn test_exactly_one_concurrent_winner() {
        for _ in 0..50 {
            let lock = OperationLock::new();
            let start = Arc::new(Barrier::new(8));
            let hold = Arc::new(Barrier::new(8));

            let handles: Vec<_> = (0..8)
                .map(|i| {
                    let lock = lock.clone();
                    let start = Arc::clone(&start);
                    let hold = Arc::clone(&hold);
                    thread::spawn(move || {
                        let op = if i % 2 == 0 { Operation::Create } else { Operation::Restore };
                        start.wait();
                        let guard = lock.try_acquire(op);
                        // Keep any winner's guard alive until everyone has tried
                        hold.wait();
                        guard.is_ok()
                    })
                })
                .collect();

            let winners = handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count();
            assert_eq!(winners, 1);
            assert_eq!(lock.current(), None);
        }
    }
}
