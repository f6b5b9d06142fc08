/*
    cancellation.rs - Single-flight ceremonies and caller cancellation

    A new get_lock_key abandons the pending one; caller signals and
    timeouts cancel the ceremony they were handed; every exit path
    releases the ceremony token.
*/

use datalock_core::test_utils::{settle, spawn_test_task, TestHarness, DEFAULT_TEST_TIMEOUT};
use datalock_core::{CancelController, CancelReason, CancelSignal, GetLockKeyOptions, LockKeyError};
use std::time::Duration;

/// Harness with identity "x" registered and its cache entry cleared
async fn harness_needing_auth() -> TestHarness {
    let harness = TestHarness::new();
    harness.register("x").await;
    harness.manager.clear_lock_key_cache(None);
    harness
}

fn lookup() -> GetLockKeyOptions {
    GetLockKeyOptions::new().local_identity("x")
}

#[tokio::test]
async fn test_second_call_abandons_first() {
    let harness = harness_needing_auth().await;
    harness.authenticator.hold_until_cancelled(true);

    let manager = harness.manager.clone();
    let first = spawn_test_task(async move { manager.get_lock_key(lookup()).await });
    settle().await;
    assert!(harness.manager.has_pending_ceremony());

    harness.authenticator.hold_until_cancelled(false);
    let second = harness.manager.get_lock_key(lookup()).await.unwrap();
    assert!(second.is_some());

    let err = first.join_within(DEFAULT_TEST_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, LockKeyError::Cancelled(CancelReason::Abandoned)));
    assert!(!harness.manager.has_pending_ceremony());
}

#[tokio::test]
async fn test_caller_signal_cancels_ceremony() {
    let harness = harness_needing_auth().await;
    harness.authenticator.hold_until_cancelled(true);
    let controller = CancelController::new();

    let manager = harness.manager.clone();
    let options = lookup().signal(controller.signal());
    let pending = spawn_test_task(async move { manager.get_lock_key(options).await });
    settle().await;

    assert!(controller.cancel(CancelReason::Requested("user closed dialog".to_string())));
    let err = pending.join_within(DEFAULT_TEST_TIMEOUT).await.unwrap_err();

    assert!(matches!(
        err,
        LockKeyError::Cancelled(CancelReason::Requested(ref why)) if why == "user closed dialog"
    ));
    assert!(!harness.manager.has_pending_ceremony());
    assert!(harness.manager.cached_lock_key("x").is_none());
}

#[tokio::test]
async fn test_already_cancelled_signal_skips_ceremony() {
    let harness = harness_needing_auth().await;
    let controller = CancelController::new();
    controller.cancel(CancelReason::Requested("too late".to_string()));

    let err = harness
        .manager
        .get_lock_key(lookup().signal(controller.signal()))
        .await
        .unwrap_err();

    assert!(matches!(err, LockKeyError::Cancelled(CancelReason::Requested(_))));
    assert_eq!(harness.authenticator.assertion_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_timeout_signal_cancels_ceremony() {
    let harness = harness_needing_auth().await;
    harness.authenticator.hold_until_cancelled(true);

    let err = harness
        .manager
        .get_lock_key(lookup().signal(CancelSignal::with_timeout(Duration::from_secs(5))))
        .await
        .unwrap_err();

    assert!(matches!(err, LockKeyError::Cancelled(CancelReason::TimedOut)));
    assert_eq!(err.to_string(), "Passkey operation cancelled: operation timed out");
}

#[tokio::test]
async fn test_cancel_pending_from_manager() {
    let harness = harness_needing_auth().await;
    harness.authenticator.hold_until_cancelled(true);
    assert!(!harness.manager.cancel_pending(CancelReason::Abandoned));

    let manager = harness.manager.clone();
    let pending = spawn_test_task(async move { manager.get_lock_key(lookup()).await });
    settle().await;

    assert!(harness
        .manager
        .cancel_pending(CancelReason::Requested("shutdown".to_string())));
    let err = pending.join_within(DEFAULT_TEST_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, LockKeyError::Cancelled(CancelReason::Requested(_))));
}

#[tokio::test]
async fn test_dropped_call_releases_token() {
    let harness = harness_needing_auth().await;
    harness.authenticator.hold_until_cancelled(true);

    let manager = harness.manager.clone();
    let pending = spawn_test_task(async move { manager.get_lock_key(lookup()).await });
    settle().await;
    assert!(harness.manager.has_pending_ceremony());

    drop(pending);
    settle().await;
    assert!(!harness.manager.has_pending_ceremony());
}

#[tokio::test]
async fn test_registration_is_single_flight_too() {
    let harness = TestHarness::new();
    harness.authenticator.hold_until_cancelled(true);

    let manager = harness.manager.clone();
    let first = spawn_test_task(async move {
        manager
            .get_lock_key(GetLockKeyOptions::new().local_identity("a").add_new_passkey(true))
            .await
    });
    settle().await;

    harness.authenticator.hold_until_cancelled(false);
    let second = harness.register("b").await;
    assert_eq!(second.local_identity(), "b");

    let err = first.join_within(DEFAULT_TEST_TIMEOUT).await.unwrap_err();
    assert!(matches!(err, LockKeyError::Cancelled(CancelReason::Abandoned)));
    assert_eq!(
        harness.manager.list_local_identities().await.unwrap(),
        vec!["b".to_string()]
    );
}
