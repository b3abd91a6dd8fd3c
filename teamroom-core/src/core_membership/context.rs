//! Per-operation deadline and cancellation
//!
//! Every store transaction checks its [`OpContext`] before each statement.
//! A cancelled or expired context aborts the transaction, which rusqlite
//! rolls back when it is dropped, so no partial rows survive.

use super::errors::{CoreError, CoreResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Deadline plus a cancellation flag shared between clones
#[derive(Debug, Clone, Default)]
pub struct OpContext {
    deadline: Option<Instant>,
    cancelled: Arc<AtomicBool>,
}

impl OpContext {
    /// A context that never expires unless cancelled
    pub fn background() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        OpContext {
            deadline: Some(deadline),
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this context and every clone of it
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when unbounded
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Fails with `Cancelled` once the context is cancelled or past its deadline
    pub fn checkpoint(&self) -> CoreResult<()> {
        if self.is_cancelled() {
            return Err(CoreError::Cancelled("cancelled by caller".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() >= deadline {
                return Err(CoreError::Cancelled("deadline exceeded".to_string()));
            }
        }
        Ok(())
    }
}
