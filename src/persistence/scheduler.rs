use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex as StdMutex, Weak,
};
use std::time::Duration;

use chrono::Utc;
use tokio::{runtime::Handle, sync::Mutex, task::JoinHandle, time};

use crate::models::SessionFormData;
use crate::timer::SessionTimerState;
use crate::{log_debug, log_warn};

use super::SessionPersistence;

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushOutcome {
    /// Nothing changed since the last flush.
    Skipped,
    Saved,
    /// The session was completed, or blank with the timer idle, so storage
    /// was cleared.
    Cleared,
    Failed,
}

struct SchedulerInner {
    persistence: Arc<SessionPersistence>,
    form: Arc<Mutex<SessionFormData>>,
    timer: Arc<Mutex<SessionTimerState>>,
    delay: Duration,
    dirty: AtomicBool,
    pending: StdMutex<Option<JoinHandle<()>>>,
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = pending.take() {
            handle.abort();
        }
    }
}

/// Coalesces bursts of changes into one save after `delay` of quiet.
#[derive(Clone)]
pub struct PersistScheduler {
    inner: Arc<SchedulerInner>,
}

impl PersistScheduler {
    pub fn new(
        persistence: Arc<SessionPersistence>,
        form: Arc<Mutex<SessionFormData>>,
        timer: Arc<Mutex<SessionTimerState>>,
        delay: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                persistence,
                form,
                timer,
                delay,
                dirty: AtomicBool::new(false),
                pending: StdMutex::new(None),
            }),
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.inner.dirty.load(Ordering::SeqCst)
    }

    /// Record a change and (re)arm the delayed flush.
    pub fn mark_dirty(&self) {
        self.inner.dirty.store(true, Ordering::SeqCst);

        let Ok(runtime) = Handle::try_current() else {
            log_debug!("No runtime to schedule a save on; waiting for an explicit flush");
            return;
        };

        let weak: Weak<SchedulerInner> = Arc::downgrade(&self.inner);
        let delay = self.inner.delay;
        let handle = runtime.spawn(async move {
            time::sleep(delay).await;
            if let Some(inner) = weak.upgrade() {
                PersistScheduler { inner }.flush().await;
            }
        });

        if let Some(previous) = self.pending().replace(handle) {
            previous.abort();
        }
    }

    /// Drop any scheduled flush and forget pending changes.
    pub fn cancel(&self) {
        self.inner.dirty.store(false, Ordering::SeqCst);
        if let Some(handle) = self.pending().take() {
            handle.abort();
        }
    }

    /// Write now if anything changed since the last flush.
    pub async fn flush(&self) -> FlushOutcome {
        if !self.inner.dirty.swap(false, Ordering::SeqCst) {
            return FlushOutcome::Skipped;
        }

        let session = self.inner.form.lock().await.clone();
        let timer = self.inner.timer.lock().await.clone();

        // Completed sessions are never kept locally.
        if session.is_completed || (session.is_blank() && !timer.is_active()) {
            self.inner.persistence.clear();
            return FlushOutcome::Cleared;
        }

        if self.inner.persistence.save(&session, &timer, Utc::now()) {
            FlushOutcome::Saved
        } else {
            log_warn!("Deferred save failed; will retry on the next change");
            self.inner.dirty.store(true, Ordering::SeqCst);
            FlushOutcome::Failed
        }
    }

    fn pending(&self) -> std::sync::MutexGuard<'_, Option<JoinHandle<()>>> {
        match self.inner.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
