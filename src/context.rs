// ABOUTME: Cancellation context shared by the export pipeline
// ABOUTME: Carries deadlines and cancellation through retries and browser process waits

use crate::errors::ContextError;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Upper bound on how long a sleeping context goes without re-checking its ancestors.
const POLL_SLICE: Duration = Duration::from_millis(20);

/// Cancellation and deadline scope for one operation.
///
/// Cloning is cheap and clones share state: cancelling any clone cancels all of
/// them, along with every context derived from them via [`Context::with_timeout`].
#[derive(Clone, Default)]
pub struct Context {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
    deadline: Option<Instant>,
    parent: Option<Context>,
}

impl Context {
    /// A context that is never done unless cancelled.
    pub fn background() -> Self {
        Self::default()
    }

    /// A root context that expires after `timeout`. A timeout too large to
    /// represent as an instant gives a context with no deadline.
    pub fn with_deadline_in(timeout: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                deadline: Instant::now().checked_add(timeout),
                ..Inner::default()
            }),
        }
    }

    /// Derive a child that expires after `timeout` or when `self` is done, whichever is first.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let own = Instant::now().checked_add(timeout);
        let deadline = match (self.deadline(), own) {
            (Some(parent), Some(own)) => Some(parent.min(own)),
            (parent, own) => parent.or(own),
        };
        Self {
            inner: Arc::new(Inner {
                deadline,
                parent: Some(self.clone()),
                ..Inner::default()
            }),
        }
    }

    /// Cancel this context and everything derived from it.
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.inner.deadline
    }

    /// Why the context is done, or `None` while it is still live.
    pub fn err(&self) -> Option<ContextError> {
        if *self.inner.cancelled.lock() {
            return Some(ContextError::Canceled);
        }
        if let Some(parent) = &self.inner.parent {
            if let Some(err) = parent.err() {
                return Some(err);
            }
        }
        match self.inner.deadline {
            Some(deadline) if Instant::now() >= deadline => Some(ContextError::DeadlineExceeded),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        self.err().is_some()
    }

    /// Time left before the deadline, if there is one.
    pub fn remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Block for `duration`, returning early with an error if the context finishes first.
    /// An unrepresentable `duration` sleeps until the context is done.
    pub fn sleep(&self, duration: Duration) -> Result<(), ContextError> {
        let until = Instant::now().checked_add(duration);
        let mut cancelled = self.inner.cancelled.lock();
        loop {
            if *cancelled {
                return Err(ContextError::Canceled);
            }
            if let Some(err) = self.inner.parent.as_ref().and_then(Context::err) {
                return Err(err);
            }
            let now = Instant::now();
            if let Some(deadline) = self.inner.deadline {
                if now >= deadline {
                    return Err(ContextError::DeadlineExceeded);
                }
            }
            let mut wait = POLL_SLICE;
            if let Some(until) = until {
                if now >= until {
                    return Ok(());
                }
                wait = wait.min(until - now);
            }
            if let Some(left) = self.remaining() {
                wait = wait.min(left);
            }
            self.inner.wake.wait_for(&mut cancelled, wait);
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.inner.deadline)
            .field("err", &self.err())
            .finish()
    }
}
