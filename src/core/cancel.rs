//! Cooperative cancellation tokens with parent chaining and deadlines.
//!
//! A single root token is created by the daemon entry point and threaded through
//! the scheduler into every plugin call. Child tokens observe their parent, and a
//! child created with [`CancelToken::child_with_timeout`] additionally fires once
//! its deadline passes. Nothing here interrupts a thread: callers poll
//! [`CancelToken::is_cancelled`] or sleep through [`CancelToken::sleep`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// Granularity of [`CancelToken::sleep`]; bounds how late a sleeper notices cancellation.
const SLEEP_SLICE: Duration = Duration::from_millis(50);

/// Why a token reports itself as cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelReason {
    /// `cancel()` was called on this token or an ancestor.
    Cancelled,
    /// The deadline of this token or an ancestor passed.
    DeadlineExceeded,
}

#[derive(Debug)]
struct Inner {
    flag: Arc<AtomicBool>,
    deadline: Option<Instant>,
    parent: Option<CancelToken>,
}

/// Cheaply cloneable cancellation handle.
#[derive(Debug, Clone)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    /// Create a root token that is cancelled only by [`CancelToken::cancel`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: Arc::new(AtomicBool::new(false)),
                deadline: None,
                parent: None,
            }),
        }
    }

    /// Create a child that is cancelled whenever `self` is.
    #[must_use]
    pub fn child(&self) -> Self {
        self.derive(None)
    }

    /// Create a child that is cancelled whenever `self` is, or once `timeout` elapses.
    #[must_use]
    pub fn child_with_timeout(&self, timeout: Duration) -> Self {
        self.derive(Instant::now().checked_add(timeout))
    }

    fn derive(&self, deadline: Option<Instant>) -> Self {
        Self {
            inner: Arc::new(Inner {
                flag: Arc::new(AtomicBool::new(false)),
                deadline,
                parent: Some(self.clone()),
            }),
        }
    }

    /// Cancel this token and every child derived from it.
    pub fn cancel(&self) {
        self.inner.flag.store(true, Ordering::Release);
    }

    /// Raw flag backing this token, for registration with signal handlers.
    #[must_use]
    pub fn flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.inner.flag)
    }

    /// Whether this token or any ancestor is cancelled or past its deadline.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Whether this token's own deadline (not an ancestor's cancel) has passed.
    #[must_use]
    pub fn deadline_exceeded(&self) -> bool {
        self.inner
            .deadline
            .is_some_and(|deadline| Instant::now() >= deadline)
    }

    /// First cancellation cause found walking from this token up to the root.
    #[must_use]
    pub fn reason(&self) -> Option<CancelReason> {
        let mut current = Some(self);
        while let Some(token) = current {
            if token.inner.flag.load(Ordering::Acquire) {
                return Some(CancelReason::Cancelled);
            }
            if token.deadline_exceeded() {
                return Some(CancelReason::DeadlineExceeded);
            }
            current = token.inner.parent.as_ref();
        }
        None
    }

    /// Sleep for `duration` unless cancelled first.
    ///
    /// Returns `true` when the full duration elapsed, `false` on cancellation.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                return true;
            }
            std::thread::sleep(SLEEP_SLICE.min(deadline - now));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_token_is_not_cancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
        assert_eq!(token.reason(), None);
    }

    #[test]
    fn cancel_propagates_to_children_not_parents() {
        let root = CancelToken::new();
        let child = root.child();
        let grandchild = child.child_with_timeout(Duration::from_secs(60));

        child.cancel();
        assert!(!root.is_cancelled());
        assert!(child.is_cancelled());
        assert_eq!(grandchild.reason(), Some(CancelReason::Cancelled));
    }

    #[test]
    fn deadline_fires_without_cancelling_parent() {
        let root = CancelToken::new();
        let scoped = root.child_with_timeout(Duration::from_millis(10));
        std::thread::sleep(Duration::from_millis(20));
        assert!(scoped.deadline_exceeded());
        assert_eq!(scoped.reason(), Some(CancelReason::DeadlineExceeded));
        assert!(!root.is_cancelled());
    }

    #[test]
    fn clones_share_state() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn flag_store_cancels_token() {
        let token = CancelToken::new();
        token.flag().store(true, Ordering::Relaxed);
        assert!(token.is_cancelled());
    }

    #[test]
    fn sleep_returns_early_on_cancel() {
        let token = CancelToken::new();
        let remote = token.clone();
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(30));
            remote.cancel();
        });
        let start = Instant::now();
        assert!(!token.sleep(Duration::from_secs(10)));
        assert!(start.elapsed() < Duration::from_secs(2));
        handle.join().unwrap();
    }

    #[test]
    fn sleep_completes_when_not_cancelled() {
        let token = CancelToken::new();
        assert!(token.sleep(Duration::from_millis(5)));
    }
}
