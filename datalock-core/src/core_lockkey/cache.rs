//! Lock-key cache
//!
//! In-memory map of local ID → lock-key with a time-to-live. Expiry is
//! enforced on every read; a background tokio task additionally evicts
//! expired entries so key material does not linger in memory.
//!
//! There is at most one outstanding purge task. It is aborted and recreated
//! whenever the contents or the lifetime change.

use super::clock::{Clock, SystemClock};
use super::key::LockKey;
use rand::Rng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::debug;

/// Default maximum cache lifetime of a lock-key (30 minutes)
pub const DEFAULT_CACHE_LIFETIME: Duration = Duration::from_secs(30 * 60);

/// Minimum delay before a purge runs
const MIN_PURGE_DELAY_MS: u64 = 60_000;

/// Upper bound of the random delay added to a purge
const MAX_PURGE_JITTER_MS: u64 = 10_000;

struct CacheEntry {
    key: Arc<LockKey>,
    timestamp: u64,
}

struct CacheState {
    entries: HashMap<String, CacheEntry>,
    lifetime_ms: u64,
    purge: Option<JoinHandle<()>>,
}

impl CacheState {
    /// Expiry window at `now`; never longer than `now` itself
    fn ttl_at(&self, now: u64) -> u64 {
        self.lifetime_ms.min(now)
    }

    fn is_fresh(&self, entry: &CacheEntry, now: u64) -> bool {
        now.saturating_sub(entry.timestamp) < self.ttl_at(now)
    }

    fn cancel_purge(&mut self) {
        if let Some(handle) = self.purge.take() {
            handle.abort();
        }
    }
}

struct CacheInner {
    state: Mutex<CacheState>,
    clock: Arc<dyn Clock>,
}

impl CacheInner {
    fn lock(&self) -> MutexGuard<'_, CacheState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn evict_expired(&self, state: &mut CacheState) -> usize {
        let now = self.clock.now_ms();
        let before = state.entries.len();
        let ttl = state.ttl_at(now);
        state
            .entries
            .retain(|_, entry| now.saturating_sub(entry.timestamp) < ttl);
        before - state.entries.len()
    }
}

impl Drop for CacheInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        state.cancel_purge();
    }
}

/// Time-bounded cache of derived lock-keys
///
/// Clones share the same entries.
#[derive(Clone)]
pub struct LockKeyCache {
    inner: Arc<CacheInner>,
}

impl LockKeyCache {
    /// Cache on the system clock with the default lifetime
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Cache on a custom clock with the default lifetime
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        LockKeyCache {
            inner: Arc::new(CacheInner {
                state: Mutex::new(CacheState {
                    entries: HashMap::new(),
                    lifetime_ms: DEFAULT_CACHE_LIFETIME.as_millis() as u64,
                    purge: None,
                }),
                clock,
            }),
        }
    }

    /// Cached key for `local_id`, if present and not expired
    pub fn get(&self, local_id: &str) -> Option<Arc<LockKey>> {
        let now = self.inner.clock.now_ms();
        let state = self.inner.lock();
        state
            .entries
            .get(local_id)
            .filter(|entry| state.is_fresh(entry, now))
            .map(|entry| Arc::clone(&entry.key))
    }

    /// Cache `key` for `local_id`
    ///
    /// A fresh entry is only replaced when `force_update` is set; an expired
    /// one counts as absent. Returns whether the key was stored.
    pub fn put(&self, local_id: &str, key: Arc<LockKey>, force_update: bool) -> bool {
        let now = self.inner.clock.now_ms();
        let mut state = self.inner.lock();
        let fresh = state
            .entries
            .get(local_id)
            .is_some_and(|entry| state.is_fresh(entry, now));
        if !force_update && fresh {
            return false;
        }

        state.entries.insert(
            local_id.to_string(),
            CacheEntry {
                key,
                timestamp: now,
            },
        );
        debug!(local_id = %local_id, forced = force_update, "Cached lock-key");
        self.schedule_purge(&mut state);
        true
    }

    /// Drop one entry, or every entry when `local_id` is `None`
    pub fn clear(&self, local_id: Option<&str>) {
        let mut state = self.inner.lock();
        match local_id {
            Some(local_id) => {
                if state.entries.remove(local_id).is_some() {
                    debug!(local_id = %local_id, "Cleared cached lock-key");
                }
            }
            None => {
                debug!(count = state.entries.len(), "Cleared lock-key cache");
                state.entries.clear();
            }
        }
        self.schedule_purge(&mut state);
    }

    /// Change the maximum lifetime of cached keys
    pub fn set_lifetime(&self, lifetime: Duration) {
        let lifetime_ms = u64::try_from(lifetime.as_millis()).unwrap_or(u64::MAX);
        let mut state = self.inner.lock();
        state.lifetime_ms = lifetime_ms;
        debug!(lifetime_ms, "Set lock-key cache lifetime");
        self.schedule_purge(&mut state);
    }

    /// Change the lifetime from an untyped millisecond count
    ///
    /// NaN and negative values become zero. Returns the lifetime applied.
    pub fn set_lifetime_ms(&self, ms: f64) -> Duration {
        let lifetime = if ms.is_nan() || ms <= 0.0 {
            Duration::ZERO
        } else if ms >= u64::MAX as f64 {
            Duration::from_millis(u64::MAX)
        } else {
            Duration::from_millis(ms as u64)
        };
        self.set_lifetime(lifetime);
        lifetime
    }

    /// Current maximum lifetime
    pub fn lifetime(&self) -> Duration {
        Duration::from_millis(self.inner.lock().lifetime_ms)
    }

    /// Number of entries held, expired or not
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Evict every expired entry now; returns how many were evicted
    pub fn purge_expired(&self) -> usize {
        let mut state = self.inner.lock();
        let evicted = self.inner.evict_expired(&mut state);
        self.schedule_purge(&mut state);
        evicted
    }

    fn schedule_purge(&self, state: &mut CacheState) {
        state.cancel_purge();
        spawn_purge(&self.inner, state);
    }
}

impl Default for LockKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Start the purge task for the current contents, if any
///
/// Without a tokio runtime no task is started; `get` still enforces expiry.
fn spawn_purge(inner: &Arc<CacheInner>, state: &mut CacheState) {
    if state.entries.is_empty() {
        return;
    }
    let runtime = match Handle::try_current() {
        Ok(runtime) => runtime,
        Err(_) => return,
    };

    let now = inner.clock.now_ms();
    let ttl = state.ttl_at(now);
    let oldest = state
        .entries
        .values()
        .map(|entry| entry.timestamp)
        .min()
        .unwrap_or(now);
    let until_expiry = oldest.saturating_add(ttl).saturating_sub(now);
    let jitter = rand::rng().random_range(0..=MAX_PURGE_JITTER_MS);
    let delay_ms = until_expiry.saturating_add(jitter).max(MIN_PURGE_DELAY_MS);

    let weak = Arc::downgrade(inner);
    state.purge = Some(runtime.spawn(run_purge(weak, Duration::from_millis(delay_ms))));
}

async fn run_purge(cache: Weak<CacheInner>, delay: Duration) {
    tokio::time::sleep(delay).await;

    let Some(inner) = cache.upgrade() else {
        return;
    };
    let mut state = inner.lock();
    // This task is finishing; detach rather than abort it
    state.purge = None;

    let evicted = inner.evict_expired(&mut state);
    if evicted > 0 {
        debug!(evicted, remaining = state.entries.len(), "Purged expired lock-keys");
    }
    spawn_purge(&inner, &mut state);
}
