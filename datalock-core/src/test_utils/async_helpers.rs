//! Async test helpers
//!
//! Timeouts for futures that should or should not settle, and a task
//! handle that aborts on drop.

use std::future::Future;
use tokio::time::{timeout, Duration};

/// Default timeout duration for tests (5 seconds)
pub const DEFAULT_TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Short timeout for tests that should fail fast (100ms)
pub const SHORT_TEST_TIMEOUT: Duration = Duration::from_millis(100);

/// Helper to assert a future completes within duration
pub async fn assert_completes_within<F, T>(duration: Duration, future: F) -> T
where
    F: Future<Output = T>,
{
    match timeout(duration, future).await {
        Ok(result) => result,
        Err(_) => panic!("Future did not complete within {:?}", duration),
    }
}

/// Helper to assert a future does NOT complete within duration
pub async fn assert_times_out<F, T>(duration: Duration, future: F)
where
    F: Future<Output = T>,
{
    if timeout(duration, future).await.is_ok() {
        panic!("Expected future to time out, but it completed within {:?}", duration);
    }
}

/// Spawn a task that is aborted when the handle drops
pub fn spawn_test_task<F, T>(future: F) -> TestTaskHandle<T>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    TestTaskHandle {
        handle: Some(tokio::spawn(future)),
    }
}

/// Handle for a test task that aborts on drop
pub struct TestTaskHandle<T> {
    handle: Option<tokio::task::JoinHandle<T>>,
}

impl<T> TestTaskHandle<T> {
    /// Wait for the task, panicking if it does not finish within `duration`
    pub async fn join_within(mut self, duration: Duration) -> T {
        let Some(handle) = self.handle.take() else {
            panic!("Test task already joined");
        };
        match assert_completes_within(duration, handle).await {
            Ok(value) => value,
            Err(e) => panic!("Test task failed: {}", e),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.as_ref().map_or(true, |h| h.is_finished())
    }
}

impl<T> Drop for TestTaskHandle<T> {
    fn drop(&mut self) {
        if let Some(handle) = &self.handle {
            handle.abort();
        }
    }
}

/// Let spawned tasks run until they block
pub async fn settle() {
    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
}
