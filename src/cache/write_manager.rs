//! Delayed batch writer for the two-level cache.
//!
//! Searches put fresh results in the memory tier right away and hand the
//! durable write to this manager. Writes are coalesced per key and pushed
//! through the registered main cache updater in batches: periodically, when
//! the backlog reaches `max_pending`, or during shutdown.
use crate::config::BatchWriteSettings;
use crate::error::{PansouError, Result};
use crate::metrics::Metrics;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Receives `(key, data, ttl)` for every write the manager persists.
pub type MainCacheUpdater = Arc<dyn Fn(&str, &[u8], Duration) -> Result<()> + Send + Sync>;

struct PendingWrite {
    data: Vec<u8>,
    ttl: Duration,
}

pub struct DelayedBatchWriteManager {
    settings: BatchWriteSettings,
    pending: Mutex<HashMap<String, PendingWrite>>,
    updater: RwLock<Option<MainCacheUpdater>>,
    /// Serializes flushes so shutdown waits for an in-flight periodic batch.
    flush_lock: Mutex<()>,
    initialized: AtomicBool,
    shutting_down: AtomicBool,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    flusher: Mutex<Option<JoinHandle<()>>>,
    metrics: Arc<Metrics>,
}

impl DelayedBatchWriteManager {
    pub fn new(settings: BatchWriteSettings, metrics: Arc<Metrics>) -> Result<Self> {
        if settings.flush_interval_secs == 0 {
            return Err(PansouError::CacheWriter(
                "flush interval must be at least one second".to_string(),
            ));
        }
        if settings.max_pending == 0 {
            return Err(PansouError::CacheWriter(
                "max pending writes must be positive".to_string(),
            ));
        }

        Ok(Self {
            settings,
            pending: Mutex::new(HashMap::new()),
            updater: RwLock::new(None),
            flush_lock: Mutex::new(()),
            initialized: AtomicBool::new(false),
            shutting_down: AtomicBool::new(false),
            wake: Arc::new(Notify::new()),
            cancel: CancellationToken::new(),
            flusher: Mutex::new(None),
            metrics,
        })
    }

    /// Start the background flusher. Needs a running Tokio runtime.
    pub fn initialize(self: &Arc<Self>) -> Result<()> {
        if self.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(e) => {
                self.initialized.store(false, Ordering::SeqCst);
                return Err(PansouError::CacheWriter(format!(
                    "no async runtime for the batch flusher: {e}"
                )));
            }
        };

        let task = runtime.spawn(run_flusher(
            Arc::downgrade(self),
            Arc::clone(&self.wake),
            self.cancel.clone(),
            self.settings.flush_interval(),
        ));
        *self.flusher.lock() = Some(task);

        info!(
            "Cache write manager started (flush every {:?}, batch size {})",
            self.settings.flush_interval(),
            self.settings.max_pending
        );
        Ok(())
    }

    pub fn set_main_cache_updater<F>(&self, updater: F)
    where
        F: Fn(&str, &[u8], Duration) -> Result<()> + Send + Sync + 'static,
    {
        *self.updater.write() = Some(Arc::new(updater));
        debug!("Main cache updater registered");
    }

    pub fn has_main_cache_updater(&self) -> bool {
        self.updater.read().is_some()
    }

    pub fn pending_len(&self) -> usize {
        self.pending.lock().len()
    }

    /// Queue a durable write. A newer write for the same key replaces the older one.
    pub fn enqueue(&self, key: &str, data: Vec<u8>, ttl: Duration) -> Result<()> {
        if self.shutting_down.load(Ordering::SeqCst) {
            return Err(PansouError::ShuttingDown);
        }

        let backlog = {
            let mut pending = self.pending.lock();
            pending.insert(key.to_string(), PendingWrite { data, ttl });
            pending.len()
        };
        self.metrics.batch_writes_queued.inc();

        if backlog >= self.settings.max_pending {
            self.wake.notify_one();
        }
        Ok(())
    }

    /// Push every pending write through the updater. Without an updater the
    /// writes stay queued.
    pub fn flush_pending(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        self.flush_locked()
    }

    fn flush_locked(&self) -> Result<usize> {
        let Some(updater) = self.updater.read().clone() else {
            return Ok(0);
        };

        let batch: Vec<(String, PendingWrite)> = self.pending.lock().drain().collect();
        if batch.is_empty() {
            return Ok(0);
        }

        let mut flushed = 0usize;
        let mut first_error = None;
        for (key, write) in batch {
            match updater(&key, &write.data, write.ttl) {
                Ok(()) => flushed += 1,
                Err(e) => {
                    warn!("Cache write for '{key}' failed, keeping it queued: {e}");
                    // A write that arrived meanwhile is newer; keep that one.
                    self.pending.lock().entry(key).or_insert(write);
                    first_error.get_or_insert(e);
                }
            }
        }

        self.metrics.batch_writes_flushed.inc_by(flushed as u64);
        match first_error {
            Some(e) => Err(e),
            None => Ok(flushed),
        }
    }

    fn drain_for_shutdown(&self) -> Result<usize> {
        let _guard = self.flush_lock.lock();
        let pending = self.pending_len();
        if pending == 0 {
            return Ok(0);
        }
        if !self.has_main_cache_updater() {
            return Err(PansouError::NoMainCacheUpdater { pending });
        }
        self.flush_locked()
    }

    /// Stop the flusher and persist everything still queued within `timeout`.
    pub async fn shutdown(self: &Arc<Self>, timeout: Duration) -> Result<()> {
        self.shutting_down.store(true, Ordering::SeqCst);
        self.cancel.cancel();
        if let Some(flusher) = self.flusher.lock().take() {
            flusher.abort();
        }

        let manager = Arc::clone(self);
        let drain = tokio::task::spawn_blocking(move || manager.drain_for_shutdown());
        match tokio::time::timeout(timeout, drain).await {
            Ok(Ok(Ok(flushed))) => {
                info!("Cache write manager flushed {flushed} pending writes");
                Ok(())
            }
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(join_error)) => Err(PansouError::CacheWriter(format!(
                "shutdown flush task failed: {join_error}"
            ))),
            Err(_) => Err(PansouError::ShutdownTimeout {
                phase: "batch write flush",
                timeout,
            }),
        }
    }
}

async fn run_flusher(
    manager: Weak<DelayedBatchWriteManager>,
    wake: Arc<Notify>,
    cancel: CancellationToken,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately.
    ticker.tick().await;

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
            _ = wake.notified() => {}
        }

        let Some(manager) = manager.upgrade() else {
            break;
        };
        match tokio::task::spawn_blocking(move || manager.flush_pending()).await {
            Ok(Ok(0)) => {}
            Ok(Ok(flushed)) => debug!("Flushed {flushed} delayed cache writes"),
            Ok(Err(e)) => warn!("Delayed cache flush failed: {e}"),
            Err(e) => warn!("Delayed cache flush task failed: {e}"),
        }
    }
    debug!("Cache write flusher stopped");
}
