//! Single-flight ceremony coordination
//!
//! At most one ceremony is in flight. Beginning a new one cancels the
//! previous one with [`CancelReason::Abandoned`].

use super::signal::{CancelController, CancelReason, CancelSignal, SignalLink};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::{debug, warn};

struct InFlight {
    id: u64,
    controller: CancelController,
    /// Link from the caller's signal, if one was given
    _link: Option<SignalLink>,
}

#[derive(Default)]
struct CoordinatorState {
    next_id: u64,
    current: Option<InFlight>,
}

fn lock(state: &Mutex<CoordinatorState>) -> MutexGuard<'_, CoordinatorState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

fn end_ceremony(state: &Mutex<CoordinatorState>, id: u64) {
    let mut state = lock(state);
    if state.current.as_ref().map(|c| c.id) == Some(id) {
        // Dropping the in-flight record detaches the caller's signal
        state.current = None;
        debug!(ceremony = id, "Ceremony released");
    }
}

/// Hands out cancellation tokens for passkey ceremonies
#[derive(Default)]
pub struct CancellationCoordinator {
    state: Arc<Mutex<CoordinatorState>>,
}

impl CancellationCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a ceremony, abandoning any pending one
    ///
    /// The returned guard's signal is cancelled when `external` is (or
    /// already was), or when a later ceremony begins.
    pub fn begin(&self, external: Option<&CancelSignal>) -> CeremonyGuard {
        let mut state = lock(&self.state);

        if let Some(previous) = state.current.take() {
            let InFlight {
                id: previous_id,
                controller,
                _link: link,
            } = previous;
            drop(link);
            if controller.cancel(CancelReason::Abandoned) {
                warn!(ceremony = previous_id, "Abandoning pending passkey ceremony");
            }
        }

        state.next_id += 1;
        let id = state.next_id;
        let controller = CancelController::new();

        let link = match external {
            Some(external) => match external.reason() {
                Some(reason) => {
                    controller.cancel(reason);
                    None
                }
                None => Some(external.link(&controller)),
            },
            None => None,
        };

        state.current = Some(InFlight {
            id,
            controller: controller.clone(),
            _link: link,
        });
        debug!(ceremony = id, "Ceremony started");

        CeremonyGuard {
            id,
            signal: controller.signal(),
            coordinator: Arc::downgrade(&self.state),
        }
    }

    /// Release a ceremony; a no-op unless it is still the current one
    pub fn end(&self, guard: CeremonyGuard) {
        drop(guard);
    }

    /// Cancel whatever ceremony is in flight
    pub fn cancel_current(&self, reason: CancelReason) -> bool {
        match lock(&self.state).current.as_ref() {
            Some(current) => current.controller.cancel(reason),
            None => false,
        }
    }

    /// Whether a ceremony is currently in flight
    pub fn is_pending(&self) -> bool {
        lock(&self.state).current.is_some()
    }
}

/// Token for one in-flight ceremony; releases it on drop
#[must_use = "dropping the guard ends the ceremony"]
pub struct CeremonyGuard {
    id: u64,
    signal: CancelSignal,
    coordinator: Weak<Mutex<CoordinatorState>>,
}

impl CeremonyGuard {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Signal to hand to the ceremony
    pub fn signal(&self) -> &CancelSignal {
        &self.signal
    }

    /// Resolve once this ceremony is cancelled
    pub async fn cancelled(&self) -> CancelReason {
        self.signal.cancelled().await
    }
}

impl Drop for CeremonyGuard {
    fn drop(&mut self) {
        if let Some(state) = self.coordinator.upgrade() {
            end_ceremony(&state, self.id);
        }
    }
}

impl std::fmt::Debug for CeremonyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CeremonyGuard")
            .field("id", &self.id)
            .field("signal", &self.signal)
            .finish()
    }
}
