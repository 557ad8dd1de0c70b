//! Expiration notificator.
//!
//! A periodic sweep over the entry store that feeds the expiring cache
//! with everything deletable that expires within the look-ahead window.
//! Entries already past their expiration fire immediately through the
//! cache's zero-duration path.
//!
//! The sweep is guarded by a single running flag (an overlapping firing
//! is a no-op) and throttled by `interval_secs` measured from the last
//! successful finish. The flag is cleared by a drop guard, so a failing
//! sweep can never wedge the timer. Back-to-back sweeps are idempotent:
//! re-tracking a key only restarts its countdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use gatehouse_config::NotificatorConfig;
use gatehouse_storage::{DynEntryStore, EntryKey, EntryKind, Filter, StoreResult, attr};

use crate::cache::{ExpiringCache, ExpiryListener};
use crate::ciba::CibaFlowController;
use crate::events::DynEventSink;
use crate::grant::GrantRegistry;

/// Key of a tracked expiration: entity id plus its kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ExpId {
    /// Entity identifier.
    pub key: String,
    /// Entity kind.
    pub kind: EntryKind,
}

impl ExpId {
    /// Creates an expiration key.
    #[must_use]
    pub fn new(key: impl Into<String>, kind: EntryKind) -> Self {
        Self {
            key: key.into(),
            kind,
        }
    }
}

/// Reacts to a tracked expiration firing: removes the durable entry and
/// drives the per-kind consequences.
pub struct ExpirationListener {
    store: DynEntryStore,
    registry: Arc<GrantRegistry>,
    ciba: Arc<CibaFlowController>,
    events: DynEventSink,
}

impl ExpirationListener {
    /// Creates a listener.
    #[must_use]
    pub fn new(
        store: DynEntryStore,
        registry: Arc<GrantRegistry>,
        ciba: Arc<CibaFlowController>,
        events: DynEventSink,
    ) -> Self {
        Self {
            store,
            registry,
            ciba,
            events,
        }
    }

    async fn remove_entry(&self, id: &ExpId) {
        let key = EntryKey::new(&id.key, id.kind);
        if let Err(err) = self.store.remove(&key).await {
            warn!(key = %key, error = %err, "expired entry removal failed");
        }
    }
}

#[async_trait]
impl ExpiryListener<ExpId, ()> for ExpirationListener {
    async fn entry_expired(&self, id: ExpId, (): ()) {
        debug!(key = %id.key, kind = %id.kind, "tracked expiration fired");
        match id.kind {
            EntryKind::Grant => {
                match Uuid::parse_str(&id.key) {
                    // remove_grant also deletes the durable entry.
                    Ok(grant_id) => self.registry.remove_grant(grant_id).await,
                    Err(_) => self.remove_entry(&id).await,
                }
            }
            EntryKind::Session => {
                self.remove_entry(&id).await;
                let removed = self.registry.remove_grants_by_session(&id.key).await;
                if removed > 0 {
                    debug!(session_id = %id.key, grants = removed, "session grants removed");
                }
                self.events.session_gone(&id.key).await;
            }
            EntryKind::CibaRequest => {
                // Expire reports the outcome (push error delivery included);
                // retire then drops the request from the live set and the
                // store so terminal requests never accumulate.
                self.ciba.expire(&id.key).await;
                self.ciba.retire(&id.key).await;
            }
        }
    }
}

/// Periodic expiration sweep.
pub struct ExpirationNotificator {
    store: DynEntryStore,
    cache: Arc<ExpiringCache<ExpId, ()>>,
    config: NotificatorConfig,
    running: AtomicBool,
    last_finished: Mutex<Option<OffsetDateTime>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl ExpirationNotificator {
    /// Creates a notificator. Call [`start`](Self::start) for the
    /// periodic loop, or drive [`process`](Self::process) manually.
    #[must_use]
    pub fn new(
        store: DynEntryStore,
        cache: Arc<ExpiringCache<ExpId, ()>>,
        config: NotificatorConfig,
    ) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            store,
            cache,
            config,
            running: AtomicBool::new(false),
            last_finished: Mutex::new(None),
            shutdown_tx,
            shutdown_rx,
            task: Mutex::new(None),
        }
    }

    fn last_finished_guard(&self) -> MutexGuard<'_, Option<OffsetDateTime>> {
        self.last_finished
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// When the last sweep finished successfully, if ever.
    #[must_use]
    pub fn last_finished(&self) -> Option<OffsetDateTime> {
        *self.last_finished_guard()
    }

    /// Returns `true` if a sweep may run now: the interval must be
    /// non-negative and `interval_secs` must have elapsed since the last
    /// successful finish.
    #[must_use]
    pub fn allow_to_run(&self) -> bool {
        if self.config.interval_secs < 0 {
            debug!("expiration notificator disabled by configuration");
            return false;
        }
        match self.last_finished() {
            None => true,
            Some(finished) => {
                let elapsed = OffsetDateTime::now_utc() - finished;
                elapsed.whole_seconds() >= self.config.interval_secs
            }
        }
    }

    /// One guarded firing: skips when a sweep is already in progress or
    /// the interval has not elapsed; otherwise sweeps and records the
    /// finish time on success. Errors are logged, never propagated.
    pub async fn process(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            debug!("expiration sweep already in progress, skipping");
            return;
        }
        let _guard = RunningGuard(&self.running);

        if !self.allow_to_run() {
            return;
        }
        match self.sweep().await {
            Ok(tracked) => {
                *self.last_finished_guard() = Some(OffsetDateTime::now_utc());
                if tracked > 0 {
                    info!(tracked = tracked, "expiration sweep finished");
                }
            }
            Err(err) => {
                warn!(error = %err, "expiration sweep failed");
            }
        }
    }

    /// Loads every deletable entry expiring within the look-ahead window
    /// into the cache. The remaining duration is recomputed from the
    /// entry's own expiration attribute each sweep.
    async fn sweep(&self) -> StoreResult<usize> {
        let now = OffsetDateTime::now_utc();
        // Saturate: an oversized look-ahead means "everything deletable",
        // not a cutoff wrapped into the past.
        let look_ahead =
            time::Duration::seconds(i64::try_from(self.config.look_ahead_secs).unwrap_or(i64::MAX));
        let cutoff = now
            .checked_add(look_ahead)
            .unwrap_or(time::PrimitiveDateTime::MAX.assume_utc());
        let filter = Filter::and(vec![
            Filter::eq(attr::DELETABLE, true),
            Filter::le_time(attr::EXPIRES_AT, cutoff),
        ]);

        let mut tracked = 0;
        for kind in [EntryKind::Grant, EntryKind::Session, EntryKind::CibaRequest] {
            let entries = self.store.find_entries(kind, &filter).await?;
            for entry in entries {
                let Some(expires_at) = entry.attr_time(attr::EXPIRES_AT) else {
                    continue;
                };
                let remaining = expires_at - now;
                self.cache
                    .put(ExpId::new(entry.key.id.clone(), kind), (), remaining);
                tracked += 1;
            }
        }
        Ok(tracked)
    }

    /// Spawns the periodic loop. A non-positive interval disables it.
    pub fn start(self: &Arc<Self>) {
        if self.config.interval_secs < 0 {
            debug!("expiration notificator disabled, loop not started");
            return;
        }
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_some() {
            return;
        }

        let notificator = Arc::clone(self);
        let mut shutdown_rx = self.shutdown_rx.clone();
        let period = std::time::Duration::from_secs(self.config.interval_secs.max(1) as u64);
        *task = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        notificator.process().await;
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("expiration notificator stopped");
                        return;
                    }
                }
            }
        }));
    }

    /// Signals the loop to stop and waits for it.
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
