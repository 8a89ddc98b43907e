//! Background TTL sweeper.
//!
//! Runs `cleanup_expired` on a fixed interval in small per-namespace
//! batches, yielding between batches so foreground `get`/`set` calls only
//! ever wait for one batch.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use wayfinder_core::CacheEngine;

/// Entries removed per lock acquisition.
pub const SWEEP_BATCH: usize = 64;

/// Used when the caller passes a zero interval.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Owns the sweeper task. Dropping the handle aborts the task.
#[derive(Debug)]
pub struct SweeperHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SweeperHandle {
    /// Stop the sweeper and wait for it to exit.
    pub async fn shutdown(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                tracing::warn!(error = %err, "cache sweeper exited abnormally");
            }
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.as_ref().map(JoinHandle::is_finished).unwrap_or(true)
    }
}

impl Drop for SweeperHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// Sweep every namespace once; returns the number of entries removed.
pub async fn sweep_once<V: Clone>(cache: &CacheEngine<V>) -> usize {
    let namespaces: Vec<String> = cache.namespaces().map(str::to_string).collect();
    let mut removed = 0;

    for namespace in namespaces {
        loop {
            let batch = cache.cleanup_expired_batch(&namespace, SWEEP_BATCH);
            removed += batch;
            if batch < SWEEP_BATCH {
                break;
            }
            tokio::task::yield_now().await;
        }
    }
    removed
}

/// Spawn the periodic sweeper on the current tokio runtime.
///
/// A zero `interval` is replaced by [`DEFAULT_SWEEP_INTERVAL`].
pub fn spawn_sweeper<V>(cache: Arc<CacheEngine<V>>, interval: Duration) -> SweeperHandle
where
    V: Clone + Send + 'static,
{
    let interval = if interval.is_zero() {
        tracing::warn!(
            fallback = ?DEFAULT_SWEEP_INTERVAL,
            "zero cache sweep interval, using default"
        );
        DEFAULT_SWEEP_INTERVAL
    } else {
        interval
    };
    let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = &mut stop_rx => break,
                _ = ticker.tick() => {
                    let removed = sweep_once(&cache).await;
                    if removed > 0 {
                        tracing::debug!(removed, "swept expired cache entries");
                    }
                }
            }
        }
        tracing::debug!("cache sweeper stopped");
    });

    SweeperHandle {
        stop: Some(stop_tx),
        task: Some(task),
    }
}
