//! Cancellation signals
//!
//! A [`CancelController`] cancels; every [`CancelSignal`] cloned from it
//! observes. Cancellation is one-shot and keeps the first reason given.
//!
//! Signals can be linked to other controllers so that cancelling one
//! cancels the other. A link lasts as long as its [`SignalLink`] guard.

use std::fmt;
use std::future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::watch;

/// Why an operation was cancelled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelReason {
    /// Superseded by a newer operation
    Abandoned,
    /// A timeout elapsed
    TimedOut,
    /// Cancelled by the caller
    Requested(String),
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CancelReason::Abandoned => f.write_str("operation abandoned"),
            CancelReason::TimedOut => f.write_str("operation timed out"),
            CancelReason::Requested(reason) => f.write_str(reason),
        }
    }
}

struct Listener {
    id: u64,
    target: CancelController,
}

struct SignalShared {
    state: watch::Sender<Option<CancelReason>>,
    listeners: Mutex<Vec<Listener>>,
    next_listener: AtomicU64,
}

impl SignalShared {
    fn listeners(&self) -> MutexGuard<'_, Vec<Listener>> {
        self.listeners.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reason(&self) -> Option<CancelReason> {
        self.state.borrow().clone()
    }
}

/// Owner side of a cancellation signal
#[derive(Clone)]
pub struct CancelController {
    shared: Arc<SignalShared>,
}

impl CancelController {
    pub fn new() -> Self {
        let (state, _) = watch::channel(None);
        CancelController {
            shared: Arc::new(SignalShared {
                state,
                listeners: Mutex::new(Vec::new()),
                next_listener: AtomicU64::new(0),
            }),
        }
    }

    /// Observer handle for this controller
    pub fn signal(&self) -> CancelSignal {
        CancelSignal {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Cancel with `reason`
    ///
    /// Returns `false` if already cancelled, in which case the first
    /// reason is kept.
    pub fn cancel(&self, reason: CancelReason) -> bool {
        let changed = self.shared.state.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason.clone());
                true
            } else {
                false
            }
        });

        if changed {
            let listeners = std::mem::take(&mut *self.shared.listeners());
            for listener in listeners {
                listener.target.cancel(reason.clone());
            }
        }
        changed
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.borrow().is_some()
    }
}

impl Default for CancelController {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for CancelController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelController")
            .field("reason", &self.shared.reason())
            .finish()
    }
}

/// Observer side of a cancellation signal
#[derive(Clone)]
pub struct CancelSignal {
    shared: Arc<SignalShared>,
}

impl CancelSignal {
    /// A signal that cancels itself with [`CancelReason::TimedOut`] after
    /// `timeout`
    ///
    /// Must be called from within a tokio runtime.
    pub fn with_timeout(timeout: Duration) -> CancelSignal {
        let controller = CancelController::new();
        let signal = controller.signal();
        tokio::spawn(async move {
            tokio::time::sleep(timeout).await;
            controller.cancel(CancelReason::TimedOut);
        });
        signal
    }

    pub fn is_cancelled(&self) -> bool {
        self.shared.state.borrow().is_some()
    }

    /// Reason given on cancellation, if cancelled
    pub fn reason(&self) -> Option<CancelReason> {
        self.shared.reason()
    }

    /// Resolve once cancelled
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.shared.state.subscribe();
        loop {
            let current = rx.borrow_and_update().clone();
            if let Some(reason) = current {
                return reason;
            }
            if rx.changed().await.is_err() {
                // Sender lives in `self.shared`; unreachable while borrowed
                return future::pending().await;
            }
        }
    }

    /// Propagate a future cancellation of this signal into `target`
    ///
    /// If this signal is already cancelled, `target` is cancelled right away.
    /// Dropping the returned link detaches it.
    pub fn link(&self, target: &CancelController) -> SignalLink {
        let id = self.shared.next_listener.fetch_add(1, Ordering::Relaxed);
        self.shared.listeners().push(Listener {
            id,
            target: target.clone(),
        });

        let link = SignalLink {
            source: Arc::downgrade(&self.shared),
            id,
        };

        // Cancelled before the listener was registered
        if let Some(reason) = self.reason() {
            link.detach_now();
            target.cancel(reason);
        }
        link
    }

    /// Number of live links from this signal
    pub fn link_count(&self) -> usize {
        self.shared.listeners().len()
    }
}

impl fmt::Debug for CancelSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancelSignal")
            .field("reason", &self.shared.reason())
            .finish()
    }
}

/// Guard for a link created by [`CancelSignal::link`]
#[must_use = "dropping the link detaches it immediately"]
pub struct SignalLink {
    source: Weak<SignalShared>,
    id: u64,
}

impl SignalLink {
    fn detach_now(&self) {
        if let Some(source) = self.source.upgrade() {
            source.listeners().retain(|l| l.id != self.id);
        }
    }
}

impl Drop for SignalLink {
    fn drop(&mut self) {
        self.detach_now();
    }
}

impl fmt::Debug for SignalLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignalLink").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reason_wins() {
        let controller = CancelController::new();
        let signal = controller.signal();
        assert!(!signal.is_cancelled());

        assert!(controller.cancel(CancelReason::Requested("stop".to_string())));
        assert!(!controller.cancel(CancelReason::TimedOut));
        assert_eq!(signal.reason(), Some(CancelReason::Requested("stop".to_string())));
    }

    #[test]
    fn test_link_propagates_and_detaches() {
        let external = CancelController::new();
        let token = CancelController::new();

        let link = external.signal().link(&token);
        assert_eq!(external.signal().link_count(), 1);

        drop(link);
        assert_eq!(external.signal().link_count(), 0);
        external.cancel(CancelReason::TimedOut);
        assert!(!token.is_cancelled());
    }

    #[test]
    fn test_link_forwards_reason() {
        let external = CancelController::new();
        let token = CancelController::new();
        let _link = external.signal().link(&token);

        external.cancel(CancelReason::Requested("user".to_string()));
        assert_eq!(
            token.signal().reason(),
            Some(CancelReason::Requested("user".to_string()))
        );
        // Listener consumed by the cancel
        assert_eq!(external.signal().link_count(), 0);
    }

    #[test]
    fn test_link_to_cancelled_signal_fires_immediately() {
        let external = CancelController::new();
        external.cancel(CancelReason::TimedOut);

        let token = CancelController::new();
        let _link = external.signal().link(&token);
        assert_eq!(token.signal().reason(), Some(CancelReason::TimedOut));
        assert_eq!(external.signal().link_count(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_resolves() {
        let controller = CancelController::new();
        let signal = controller.signal();

        let waiter = tokio::spawn(async move { signal.cancelled().await });
        tokio::task::yield_now().await;
        controller.cancel(CancelReason::Abandoned);

        assert_eq!(waiter.await.unwrap(), CancelReason::Abandoned);
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout() {
        let signal = CancelSignal::with_timeout(Duration::from_secs(5));
        assert!(!signal.is_cancelled());

        let reason = signal.cancelled().await;
        assert_eq!(reason, CancelReason::TimedOut);
    }

    #[test]
    fn test_reason_display() {
        assert_eq!(CancelReason::Abandoned.to_string(), "operation abandoned");
        assert_eq!(CancelReason::Requested("bye".into()).to_string(), "bye");
    }
}
