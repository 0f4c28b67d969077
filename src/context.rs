//! Cancellation and deadline token for blocking client operations
use std::task::{Context as TaskContext, Poll};
use std::time::{Duration, Instant};
use std::{cell::Cell, cell::RefCell, fmt, future::Future, pin::Pin, rc::Rc};

use ntex_util::channel::pool;
use ntex_util::time::{sleep, Sleep};

/// Reason a [`Context`] is done
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, thiserror::Error)]
pub enum ContextError {
    /// `Context::cancel()` was called
    #[error("Operation is cancelled")]
    Cancelled,
    /// Context deadline is reached
    #[error("Deadline exceeded")]
    DeadlineExceeded,
}

/// Cancellation and deadline token.
///
/// Every blocking client operation accepts a `Context` and resolves with
/// [`ContextError`] once the token is cancelled or its deadline elapses,
/// whichever happens first. Clones share the same token.
#[derive(Clone)]
pub struct Context(Rc<ContextInner>);

struct ContextInner {
    deadline: Option<Instant>,
    cancelled: Cell<bool>,
    waiters: RefCell<Vec<pool::Sender<()>>>,
    pool: pool::Pool<()>,
}

impl Context {
    /// Context without deadline, completes only on cancel
    pub fn new() -> Self {
        Self::create(None)
    }

    /// Context which expires after `timeout`
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::create(Instant::now().checked_add(timeout))
    }

    /// Context which expires at `deadline`
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::create(Some(deadline))
    }

    fn create(deadline: Option<Instant>) -> Self {
        Context(Rc::new(ContextInner {
            deadline,
            cancelled: Cell::new(false),
            waiters: RefCell::new(Vec::new()),
            pool: pool::new(),
        }))
    }

    /// Context deadline
    pub fn deadline(&self) -> Option<Instant> {
        self.0.deadline
    }

    /// Cancel context and all its clones.
    ///
    /// Calling `cancel` on an already cancelled context does nothing.
    pub fn cancel(&self) {
        if !self.0.cancelled.replace(true) {
            for tx in self.0.waiters.borrow_mut().drain(..) {
                let _ = tx.send(());
            }
        }
    }

    /// Check if context is done, without blocking.
    ///
    /// Cancellation is reported even if the deadline has passed as well.
    pub fn err(&self) -> Option<ContextError> {
        if self.0.cancelled.get() {
            Some(ContextError::Cancelled)
        } else if self.0.deadline.map(|d| d <= Instant::now()).unwrap_or(false) {
            Some(ContextError::DeadlineExceeded)
        } else {
            None
        }
    }

    /// Future that resolves once context is done
    pub fn done(&self) -> Done {
        let rx = if self.0.cancelled.get() {
            None
        } else {
            let (tx, rx) = self.0.pool.channel();
            let mut waiters = self.0.waiters.borrow_mut();
            waiters.retain(|tx| !tx.is_canceled());
            waiters.push(tx);
            Some(rx)
        };
        let delay = self.0.deadline.map(|d| sleep(d.saturating_duration_since(Instant::now())));

        Done { ctx: self.clone(), rx, delay }
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Context")
            .field("deadline", &self.0.deadline)
            .field("cancelled", &self.0.cancelled.get())
            .finish()
    }
}

/// Future returned by [`Context::done`]
pub struct Done {
    ctx: Context,
    rx: Option<pool::Receiver<()>>,
    delay: Option<Sleep>,
}

impl Future for Done {
    type Output = ContextError;

    fn poll(self: Pin<&mut Self>, cx: &mut TaskContext<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();

        if let Some(err) = this.ctx.err() {
            return Poll::Ready(err);
        }
        if let Some(ref rx) = this.rx {
            if rx.poll_recv(cx).is_ready() {
                return Poll::Ready(ContextError::Cancelled);
            }
        }
        if let Some(ref delay) = this.delay {
            if delay.poll_elapsed(cx).is_ready() {
                // timer resolution is coarser than Instant
                return Poll::Ready(this.ctx.err().unwrap_or(ContextError::DeadlineExceeded));
            }
        }
        Poll::Pending
    }
}
