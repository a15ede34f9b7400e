//! In-progress flag for user-triggered actions

use crate::{Result, StoreError};
use std::sync::atomic::{AtomicBool, Ordering};

/// Refuses a second submission of an action while the first is running.
///
/// The flag is released when the returned guard drops, so every exit path
/// of the action (success, error, early return) clears it.
#[derive(Debug)]
pub struct ActionLatch {
    name: &'static str,
    busy: AtomicBool,
}

impl ActionLatch {
    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            busy: AtomicBool::new(false),
        }
    }

    /// Claim the latch or fail with [`StoreError::ActionInProgress`]
    pub fn try_acquire(&self) -> Result<LatchGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .map_err(|_| StoreError::action_in_progress(self.name))?;
        Ok(LatchGuard { latch: self })
    }

    /// Whether the action is currently running (the "loading" indicator)
    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

/// Holds an [`ActionLatch`] until dropped
#[derive(Debug)]
pub struct LatchGuard<'a> {
    latch: &'a ActionLatch,
}

impl Drop for LatchGuard<'_> {
    fn drop(&mut self) {
        self.latch.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_second_acquire_fails_until_release() {
        let latch = ActionLatch::new("payment");
        let guard = latch.try_acquire().unwrap();
        assert!(latch.is_busy());

        let err = latch.try_acquire().unwrap_err();
        assert!(err.to_string().contains("payment"));

        drop(guard);
        assert!(!latch.is_busy());
        assert!(latch.try_acquire().is_ok());
    }

    #[test]
    fn test_released_on_error_path() {
        let latch = ActionLatch::new("withdraw");

        let outcome: Result<()> = tokio_test::block_on(async {
            let _guard = latch.try_acquire()?;
            Err(StoreError::reverted("insufficient balance"))
        });

        assert!(outcome.is_err());
        assert!(!latch.is_busy());
    }
}
