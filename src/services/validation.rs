use async_trait::async_trait;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::error::Result;

/// An owner whose sessions can be validated in bulk.
#[async_trait]
pub trait ValidatingSessionManager: Send + Sync {
    /// Validates every active session, invalidating the ones that fail.
    ///
    /// Returns how many sessions were invalidated. Per-session invalidity is
    /// not an error; an `Err` means the sweep itself could not run.
    async fn validate_sessions(&self) -> Result<usize>;
}

struct SchedulerInner {
    owner: Weak<dyn ValidatingSessionManager>,
    interval: Duration,
    enabled: AtomicBool,
    failed: AtomicBool,
    token: Mutex<Option<Arc<CancellationToken>>>,
}

impl SchedulerInner {
    fn slot(&self) -> MutexGuard<'_, Option<Arc<CancellationToken>>> {
        self.token
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn take_token(&self) -> Option<Arc<CancellationToken>> {
        self.slot().take()
    }

    /// Disables the scheduler on behalf of the task holding `token`.
    ///
    /// Leaves the slot and flags alone when they belong to a newer task.
    fn fail(&self, token: &Arc<CancellationToken>) {
        token.cancel();
        let mut slot = self.slot();
        let owns_slot = slot.as_ref().is_some_and(|current| Arc::ptr_eq(current, token));
        if !owns_slot {
            tracing::debug!("Failed sweep belonged to a disabled validation task");
            return;
        }

        slot.take();
        self.failed.store(true, Ordering::SeqCst);
        self.enabled.store(false, Ordering::SeqCst);
    }

    async fn run(self: Arc<Self>, token: Arc<CancellationToken>) {
        let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let Some(owner) = self.owner.upgrade() else {
                tracing::debug!("Session manager dropped, stopping validation task");
                break;
            };

            tracing::info!("🧹 Running scheduled session validation...");
            let outcome = AssertUnwindSafe(owner.validate_sessions())
                .catch_unwind()
                .await;
            drop(owner);

            match outcome {
                Ok(Ok(invalidated)) => {
                    tracing::debug!("✅ Session validation completed, {} invalidated", invalidated);
                }
                Ok(Err(e)) => {
                    tracing::error!(
                        "❌ Session validation failed: {}. Disabling session validation scheduler.",
                        e
                    );
                    self.fail(&token);
                    break;
                }
                Err(_) => {
                    tracing::error!(
                        "❌ Session validation panicked. Disabling session validation scheduler."
                    );
                    self.fail(&token);
                    break;
                }
            }
        }
    }
}

/// Periodically invokes `validate_sessions` on its owner from a single background task.
///
/// A sweep that returns an error or panics disables the scheduler; it stays
/// disabled until `enable` is called explicitly.
pub struct ValidationScheduler {
    inner: Arc<SchedulerInner>,
}

impl ValidationScheduler {
    /// Creates a disabled scheduler for `owner`.
    pub fn new(owner: Weak<dyn ValidatingSessionManager>, interval: Duration) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                owner,
                interval,
                enabled: AtomicBool::new(false),
                failed: AtomicBool::new(false),
                token: Mutex::new(None),
            }),
        }
    }

    pub fn interval(&self) -> Duration {
        self.inner.interval
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.enabled.load(Ordering::SeqCst)
    }

    /// Whether the scheduler disabled itself after a failed sweep.
    pub fn has_failed(&self) -> bool {
        self.inner.failed.load(Ordering::SeqCst)
    }

    /// Starts the background task. Must be called from within a Tokio runtime.
    pub fn enable(&self) {
        let mut slot = self.inner.slot();
        if slot.is_some() {
            return;
        }

        let token = Arc::new(CancellationToken::new());
        *slot = Some(token.clone());
        self.inner.failed.store(false, Ordering::SeqCst);
        self.inner.enabled.store(true, Ordering::SeqCst);
        drop(slot);

        tokio::spawn(Arc::clone(&self.inner).run(token));
        tracing::info!(
            "✅ Session validation scheduler enabled (runs every {}s)",
            self.inner.interval.as_secs()
        );
    }

    /// Enables the scheduler unless it is running or has failed.
    pub fn enable_if_idle(&self) {
        if !self.is_enabled() && !self.has_failed() {
            self.enable();
        }
    }

    /// Stops future runs. A sweep already in progress completes.
    pub fn disable(&self) {
        if let Some(token) = self.inner.take_token() {
            token.cancel();
            self.inner.enabled.store(false, Ordering::SeqCst);
            tracing::info!("Disabled session validation scheduler.");
        }
    }
}

impl Drop for ValidationScheduler {
    fn drop(&mut self) {
        if let Some(token) = self.inner.take_token() {
            token.cancel();
        }
    }
}
