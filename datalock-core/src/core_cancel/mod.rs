//! Cancellation module
//!
//! Cooperative cancellation for passkey ceremonies: one-shot cancel signals
//! that can be chained together, and a coordinator that keeps at most one
//! ceremony in flight.

mod coordinator;
mod signal;

pub use coordinator::{CancellationCoordinator, CeremonyGuard};
pub use signal::{CancelController, CancelReason, CancelSignal, SignalLink};
