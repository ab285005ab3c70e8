//! # Call Context
//!
//! Purpose: Carry an optional deadline and cancellation flag into a call.
//!
//! Both are checked once at call entry. After that the remaining time is
//! enforced only through the socket read/write timeout of the connection
//! serving the call.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{ClientError, ClientResult};

/// Deadline and cancellation for one client call.
#[derive(Debug, Clone, Default)]
pub struct Context {
    deadline: Option<Instant>,
    cancelled: Option<Arc<AtomicBool>>,
}

impl Context {
    /// A context with no deadline that is never cancelled.
    pub fn background() -> Self {
        Context::default()
    }

    pub fn with_deadline(deadline: Instant) -> Self {
        Context {
            deadline: Some(deadline),
            cancelled: None,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Context::with_deadline(Instant::now() + timeout)
    }

    /// Returns a cancellable copy of this context and the handle that cancels it.
    pub fn with_cancel(self) -> (Self, CancelHandle) {
        let flag = Arc::new(AtomicBool::new(false));
        let ctx = Context {
            deadline: self.deadline,
            cancelled: Some(flag.clone()),
        };
        (ctx, CancelHandle { flag })
    }

    #[inline]
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when there is no deadline.
    ///
    /// # Errors
    /// `DeadlineExceeded` once the deadline has passed.
    pub fn remaining(&self) -> ClientResult<Option<Duration>> {
        match self.deadline {
            None => Ok(None),
            Some(deadline) => {
                let left = deadline.saturating_duration_since(Instant::now());
                if left.is_zero() {
                    Err(ClientError::DeadlineExceeded)
                } else {
                    Ok(Some(left))
                }
            }
        }
    }

    /// Entry check run before any I/O.
    pub(crate) fn check(&self) -> ClientResult<()> {
        if let Some(flag) = &self.cancelled {
            if flag.load(Ordering::Acquire) {
                return Err(ClientError::Cancelled);
            }
        }
        self.remaining().map(|_| ())
    }
}

/// Cancels every context cloned from the one it was created with.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }
}
