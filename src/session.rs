//! Admission control for the external session ceiling.
//!
//! The remote browser-session service caps how many sessions may exist at
//! once, shared across every session-based agent in a run. The pool is a
//! counting semaphore sized to that ceiling; a worker must hold a
//! [`SessionPermit`] for the whole lifetime of its external session. Permits
//! are RAII guards, so teardown is unconditional even when the owning task
//! is cancelled mid-flight.

use crate::types::{AppError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Run-scoped counting admission control for external sessions.
#[derive(Clone)]
pub struct SessionPool {
    semaphore: Arc<Semaphore>,
    capacity: usize,
    acquire_timeout: Duration,
}

impl SessionPool {
    /// Create a pool sized to the external session ceiling.
    pub fn new(capacity: usize, acquire_timeout: Duration) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(capacity)),
            capacity,
            acquire_timeout,
        }
    }

    /// The configured ceiling.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Sessions that could be admitted right now.
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Acquire one session slot, waiting up to the configured timeout.
    ///
    /// The returned permit releases the slot on drop.
    pub async fn acquire(&self) -> Result<SessionPermit> {
        let permit = tokio::time::timeout(
            self.acquire_timeout,
            Arc::clone(&self.semaphore).acquire_owned(),
        )
        .await
        .map_err(|_| AppError::Session("Timed out waiting for a session slot".to_string()))?
        .map_err(|_| AppError::Session("Session pool closed".to_string()))?;

        Ok(SessionPermit { _permit: permit })
    }
}

/// RAII guard for one admitted session slot.
#[derive(Debug)]
pub struct SessionPermit {
    _permit: OwnedSemaphorePermit,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn permits_are_returned_on_drop() {
        let pool = SessionPool::new(2, Duration::from_millis(100));
        assert_eq!(pool.available(), 2);

        let a = pool.acquire().await.unwrap();
        let _b = pool.acquire().await.unwrap();
        assert_eq!(pool.available(), 0);

        drop(a);
        assert_eq!(pool.available(), 1);
    }

    #[tokio::test]
    async fn acquire_times_out_when_exhausted() {
        let pool = SessionPool::new(1, Duration::from_millis(20));
        let _held = pool.acquire().await.unwrap();

        let err = pool.acquire().await.unwrap_err();
        assert!(matches!(err, AppError::Session(_)));
    }
}
