//! Time-bounded cache of pods whose terminal status is already recorded.
//!
//! After labelling a pod `completed=true` the watch filter should exclude
//! it, but the event stream has been observed to deliver stragglers that
//! predate the label. This cache suppresses them without a round-trip to
//! re-read the pod.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Default entry lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60 * 60);

/// Default interval between background expiry sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(10 * 60);

/// A set of pod names with per-entry TTL.
///
/// Thread-safe and internally locked; every operation is non-blocking in the
/// sense that the lock is only held for map access, never across I/O.
#[derive(Debug)]
pub struct CompletedPodCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, Instant>>,
}

impl Default for CompletedPodCache {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl CompletedPodCache {
    /// Creates a cache with the given entry lifetime.
    #[must_use]
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Records that the pod's terminal status has been persisted.
    pub fn insert(&self, pod_name: impl Into<String>) {
        let expires_at = Instant::now() + self.ttl;
        self.lock().insert(pod_name.into(), expires_at);
    }

    /// Returns true if the pod is in the cache and its entry is still live.
    ///
    /// Expired entries are removed on the way out.
    pub fn seen(&self, pod_name: &str) -> bool {
        let mut entries = self.lock();
        match entries.get(pod_name) {
            Some(expires_at) if *expires_at > Instant::now() => true,
            Some(_) => {
                entries.remove(pod_name);
                false
            }
            None => false,
        }
    }

    /// Removes every expired entry. Returns how many were dropped.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, expires_at| *expires_at > now);
        before - entries.len()
    }

    /// Number of live and not-yet-swept entries.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Returns true if the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Starts the background expiry sweep.
    ///
    /// The task runs until aborted or until the process exits.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick fires immediately; skip it so the initial sweep
            // happens one full interval after startup.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let dropped = cache.sweep();
                if dropped > 0 {
                    tracing::debug!(dropped, "expired completed-pod cache entries");
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Instant>> {
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }
}
