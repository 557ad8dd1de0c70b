//! Expiring cache with spawned expiry callbacks.
//!
//! Tracks keys with a deadline and notifies a listener exactly once per
//! tracked entry when the deadline passes. Expired entries are removed
//! under the cache lock before their callbacks are spawned, so a
//! replacement or removal racing the sweep can never double-fire.
//!
//! The configured `max_size` throttles intake: a full cache rejects new
//! keys with a warning and never evicts a live tracked entry, since
//! eviction would silently drop a scheduled expiration.

use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, warn};

/// Receives expiry notifications from an [`ExpiringCache`].
///
/// Each call runs on its own spawned task; a panicking listener takes
/// down only that task, never the sweep loop.
#[async_trait]
pub trait ExpiryListener<K, V>: Send + Sync {
    /// Called exactly once when a tracked entry's deadline passes.
    async fn entry_expired(&self, key: K, value: V);
}

struct Tracked<V> {
    value: V,
    deadline: Instant,
}

/// A size-bounded cache of entries that expire through a listener.
pub struct ExpiringCache<K, V> {
    entries: Arc<Mutex<HashMap<K, Tracked<V>>>>,
    listener: Arc<dyn ExpiryListener<K, V>>,
    max_size: usize,
    sweep_interval: std::time::Duration,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl<K, V> ExpiringCache<K, V>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
    V: Send + Sync + 'static,
{
    /// Creates a cache. Call [`start`](Self::start) to run the sweep loop.
    #[must_use]
    pub fn new(
        max_size: usize,
        sweep_interval: std::time::Duration,
        listener: Arc<dyn ExpiryListener<K, V>>,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            listener,
            max_size,
            sweep_interval,
            shutdown_tx,
            shutdown_rx,
            task: Mutex::new(None),
        }
    }

    fn lock_entries(
        entries: &Mutex<HashMap<K, Tracked<V>>>,
    ) -> MutexGuard<'_, HashMap<K, Tracked<V>>> {
        entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Tracks a key for `ttl`. Re-putting an existing key replaces its
    /// value and restarts the countdown; the superseded deadline never
    /// fires.
    ///
    /// A zero or negative `ttl` fires the listener immediately without
    /// tracking. Returns `false` when a full cache rejected a new key.
    pub fn put(&self, key: K, value: V, ttl: time::Duration) -> bool {
        if !ttl.is_positive() {
            let listener = Arc::clone(&self.listener);
            tokio::spawn(async move {
                listener.entry_expired(key, value).await;
            });
            return true;
        }
        // Positive and sub-u64::MAX-seconds, so the conversion holds.
        let ttl = std::time::Duration::try_from(ttl).unwrap_or(std::time::Duration::ZERO);

        let mut entries = Self::lock_entries(&self.entries);
        if entries.len() >= self.max_size && !entries.contains_key(&key) {
            warn!(
                max_size = self.max_size,
                "expiring cache full, new entry rejected"
            );
            return false;
        }
        entries.insert(
            key,
            Tracked {
                value,
                deadline: Instant::now() + ttl,
            },
        );
        true
    }

    /// Stops tracking a key without firing the listener.
    pub fn remove(&self, key: &K) -> Option<V> {
        Self::lock_entries(&self.entries)
            .remove(key)
            .map(|t| t.value)
    }

    /// Returns `true` if the key is tracked.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        Self::lock_entries(&self.entries).contains_key(key)
    }

    /// Number of tracked entries.
    #[must_use]
    pub fn len(&self) -> usize {
        Self::lock_entries(&self.entries).len()
    }

    /// Returns `true` if nothing is tracked.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        Self::lock_entries(&self.entries).is_empty()
    }

    /// Spawns the sweep loop. Idempotent; a second call is a no-op.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let entries = Arc::clone(&self.entries);
        let listener = Arc::clone(&self.listener);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let sweep_interval = self.sweep_interval;

        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        Self::sweep(&entries, &listener);
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("expiring cache sweep loop stopped");
                        return;
                    }
                }
            }
        }));
    }

    fn sweep(entries: &Mutex<HashMap<K, Tracked<V>>>, listener: &Arc<dyn ExpiryListener<K, V>>) {
        let now = Instant::now();
        let due: Vec<(K, V)> = {
            let mut entries = Self::lock_entries(entries);
            let due_keys: Vec<K> = entries
                .iter()
                .filter(|(_, t)| t.deadline <= now)
                .map(|(k, _)| k.clone())
                .collect();
            due_keys
                .into_iter()
                .filter_map(|k| entries.remove(&k).map(|t| (k, t.value)))
                .collect()
        };
        for (key, value) in due {
            let listener = Arc::clone(listener);
            tokio::spawn(async move {
                listener.entry_expired(key, value).await;
            });
        }
    }

    /// Signals the sweep loop to stop and waits for it.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = {
            let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
            task.take()
        };
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[derive(Default)]
    struct RecordingListener {
        fired: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ExpiryListener<String, u32> for RecordingListener {
        async fn entry_expired(&self, key: String, _value: u32) {
            self.fired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(key);
        }
    }

    impl RecordingListener {
        fn fired(&self) -> Vec<String> {
            self.fired
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .clone()
        }
    }

    fn cache(
        max_size: usize,
    ) -> (Arc<RecordingListener>, ExpiringCache<String, u32>) {
        let listener = Arc::new(RecordingListener::default());
        let cache = ExpiringCache::new(
            max_size,
            Duration::from_millis(10),
            Arc::clone(&listener) as Arc<dyn ExpiryListener<String, u32>>,
        );
        (listener, cache)
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_contains_remove() {
        let (_, cache) = cache(10);
        assert!(cache.put("a".to_string(), 1, time::Duration::seconds(60)));
        assert!(cache.contains(&"a".to_string()));
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.remove(&"a".to_string()), Some(1));
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_nonpositive_ttl_fires_immediately() {
        let (listener, cache) = cache(10);
        assert!(cache.put("now".to_string(), 1, time::Duration::seconds(0)));
        assert!(cache.put("past".to_string(), 2, time::Duration::seconds(-5)));
        tokio::time::sleep(Duration::from_millis(1)).await;

        let mut fired = listener.fired();
        fired.sort();
        assert_eq!(fired, vec!["now".to_string(), "past".to_string()]);
        assert!(cache.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_entry_expires_exactly_once() {
        let (listener, cache) = cache(10);
        cache.start();
        cache.put("a".to_string(), 1, time::Duration::milliseconds(30));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.fired(), vec!["a".to_string()]);
        assert!(cache.is_empty());

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.fired().len(), 1);
        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_replacement_restarts_countdown() {
        let (listener, cache) = cache(10);
        cache.start();
        cache.put("a".to_string(), 1, time::Duration::milliseconds(30));
        tokio::time::sleep(Duration::from_millis(20)).await;
        cache.put("a".to_string(), 2, time::Duration::milliseconds(60));

        // Past the original deadline: the superseded countdown must not
        // have fired.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(listener.fired().is_empty());
        assert!(cache.contains(&"a".to_string()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(listener.fired(), vec!["a".to_string()]);
        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_removed_entry_never_fires() {
        let (listener, cache) = cache(10);
        cache.start();
        cache.put("a".to_string(), 1, time::Duration::milliseconds(30));
        assert_eq!(cache.remove(&"a".to_string()), Some(1));

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(listener.fired().is_empty());
        cache.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_cache_rejects_new_keys_only() {
        let (_, cache) = cache(2);
        assert!(cache.put("a".to_string(), 1, time::Duration::seconds(60)));
        assert!(cache.put("b".to_string(), 2, time::Duration::seconds(60)));
        assert!(!cache.put("c".to_string(), 3, time::Duration::seconds(60)));
        // Replacing a tracked key is always allowed.
        assert!(cache.put("a".to_string(), 9, time::Duration::seconds(60)));
        assert_eq!(cache.len(), 2);
    }
}
