use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::{
    runtime::Handle,
    task::JoinHandle,
    time::{self, Instant, MissedTickBehavior},
};

use crate::storage::{keys, KeyValueStore};
use crate::utils::epoch_millis;
use crate::{log_debug, log_warn};

use super::AudioElement;

const ENABLE_LOGS: bool = true;

const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(500);
/// Snapshots older than this are not resumed.
pub const RESUME_WINDOW_MS: i64 = 10_000;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AudioSnapshot {
    pub is_playing: bool,
    pub current_time: f64,
    /// Epoch milliseconds.
    pub last_updated: i64,
}

#[derive(Default)]
struct Leases {
    count: usize,
    persist_task: Option<JoinHandle<()>>,
}

struct ManagerInner {
    element: StdMutex<Box<dyn AudioElement>>,
    session_store: Arc<dyn KeyValueStore>,
    leases: StdMutex<Leases>,
    /// Bumped by every clear so the snapshot task forgets what it last saw.
    clears: AtomicU64,
}

impl Drop for ManagerInner {
    fn drop(&mut self) {
        let mut leases = match self.leases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = leases.persist_task.take() {
            handle.abort();
        }
    }
}

/// Owner of the single playback element shared by every screen of a
/// session. Screens hold an [`AudioLease`] while mounted; the position
/// snapshot task runs while at least one lease is alive.
#[derive(Clone)]
pub struct AudioManager {
    inner: Arc<ManagerInner>,
}

/// Keeps the snapshot task alive; released on drop.
pub struct AudioLease {
    manager: AudioManager,
}

impl Drop for AudioLease {
    fn drop(&mut self) {
        self.manager.release();
    }
}

impl AudioLease {
    pub fn manager(&self) -> &AudioManager {
        &self.manager
    }
}

impl AudioManager {
    pub fn new(element: Box<dyn AudioElement>, session_store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                element: StdMutex::new(element),
                session_store,
                leases: StdMutex::new(Leases::default()),
                clears: AtomicU64::new(0),
            }),
        }
    }

    pub fn acquire(&self) -> AudioLease {
        let mut leases = self.leases();
        leases.count += 1;
        if leases.count == 1 {
            leases.persist_task = self.spawn_persist_task();
        }
        AudioLease {
            manager: self.clone(),
        }
    }

    pub fn lease_count(&self) -> usize {
        self.leases().count
    }

    pub fn is_persisting(&self) -> bool {
        self.leases()
            .persist_task
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    fn release(&self) {
        let mut leases = self.leases();
        leases.count = leases.count.saturating_sub(1);
        if leases.count == 0 {
            if let Some(handle) = leases.persist_task.take() {
                handle.abort();
            }
        }
    }

    pub fn with_element<R>(&self, f: impl FnOnce(&mut dyn AudioElement) -> R) -> R {
        let mut element = match self.inner.element.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        f(element.as_mut())
    }

    pub fn read_snapshot(&self) -> Option<AudioSnapshot> {
        let raw = self.inner.session_store.get(keys::AUDIO_STATE).ok()??;
        serde_json::from_str(&raw).ok()
    }

    pub fn write_snapshot(&self, snapshot: &AudioSnapshot) {
        let result = serde_json::to_string(snapshot)
            .map_err(crate::error::StorageError::from)
            .and_then(|raw| self.inner.session_store.set(keys::AUDIO_STATE, &raw));
        if let Err(err) = result {
            log_debug!("Could not store audio position: {}", err);
        }
    }

    pub fn clear_snapshot(&self) {
        self.inner.clears.fetch_add(1, Ordering::SeqCst);
        if let Err(err) = self.inner.session_store.remove(keys::AUDIO_STATE) {
            log_debug!("Could not clear audio position: {}", err);
        }
    }

    /// Pick up playback left running by a previous mount. Returns true when
    /// playback was resumed.
    pub fn resume_from_snapshot(&self, now: DateTime<Utc>) -> bool {
        let Some(snapshot) = self.read_snapshot() else {
            return false;
        };
        let age_ms = epoch_millis(now) - snapshot.last_updated;
        if !snapshot.is_playing || !(0..=RESUME_WINDOW_MS).contains(&age_ms) {
            return false;
        }

        let position = snapshot.current_time + age_ms as f64 / 1000.0;
        self.with_element(|element| {
            element.set_current_time(position);
            match element.play() {
                Ok(()) => true,
                Err(err) => {
                    log_debug!("Audio resume refused: {}", err);
                    false
                }
            }
        })
    }

    fn capture(&self) -> (bool, f64) {
        self.with_element(|element| (!element.is_paused(), element.current_time()))
    }

    fn spawn_persist_task(&self) -> Option<JoinHandle<()>> {
        let Ok(runtime) = Handle::try_current() else {
            log_warn!("No runtime available; audio position will not be remembered");
            return None;
        };
        let weak: Weak<ManagerInner> = Arc::downgrade(&self.inner);
        Some(runtime.spawn(async move {
            let mut interval = time::interval_at(Instant::now() + SNAPSHOT_INTERVAL, SNAPSHOT_INTERVAL);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut was_playing = false;
            let mut seen_clears = 0;
            loop {
                interval.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let clears = inner.clears.load(Ordering::SeqCst);
                if clears != seen_clears {
                    // A cleared snapshot stays cleared until playback resumes.
                    seen_clears = clears;
                    was_playing = false;
                }
                let manager = AudioManager { inner };
                let (playing, current_time) = manager.capture();
                if playing || was_playing {
                    manager.write_snapshot(&AudioSnapshot {
                        is_playing: playing,
                        current_time,
                        last_updated: epoch_millis(Utc::now()),
                    });
                }
                was_playing = playing;
            }
        }))
    }

    fn leases(&self) -> MutexGuard<'_, Leases> {
        match self.inner.leases.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::ClockElement;
    use crate::storage::MemoryStorage;
    use chrono::Duration as ChronoDuration;

    fn manager() -> (AudioManager, Arc<MemoryStorage>) {
        let store = Arc::new(MemoryStorage::new());
        let manager = AudioManager::new(Box::new(ClockElement::new(Some(167.0))), store.clone());
        (manager, store)
    }

    #[tokio::test(start_paused = true)]
    async fn persist_task_follows_lease_count() {
        let (manager, _) = manager();
        let first = manager.acquire();
        let second = manager.acquire();
        assert_eq!(manager.lease_count(), 2);
        assert!(manager.is_persisting());

        drop(first);
        assert!(manager.is_persisting());
        drop(second);
        assert_eq!(manager.lease_count(), 0);
        assert!(!manager.is_persisting());
    }

    #[tokio::test(start_paused = true)]
    async fn snapshots_are_written_while_playing() {
        let (manager, _) = manager();
        let _lease = manager.acquire();
        time::sleep(Duration::from_millis(600)).await;
        assert_eq!(manager.read_snapshot(), None);

        manager.with_element(|element| element.play()).unwrap();
        time::sleep(Duration::from_millis(1_100)).await;
        let snapshot = manager.read_snapshot().unwrap();
        assert!(snapshot.is_playing);
        assert!(snapshot.current_time > 0.5);

        manager.with_element(|element| element.pause());
        time::sleep(Duration::from_millis(500)).await;
        assert!(!manager.read_snapshot().unwrap().is_playing);
    }

    #[tokio::test(start_paused = true)]
    async fn cleared_snapshot_is_not_rewritten_after_a_stop() {
        let (manager, store) = manager();
        let _lease = manager.acquire();
        manager.with_element(|element| element.play()).unwrap();
        time::sleep(Duration::from_millis(1_100)).await;
        assert!(manager.read_snapshot().unwrap().is_playing);

        manager.with_element(|element| {
            element.pause();
            element.set_current_time(0.0);
        });
        manager.clear_snapshot();
        time::sleep(Duration::from_millis(1_100)).await;
        assert_eq!(manager.read_snapshot(), None);
        assert!(store.get(keys::AUDIO_STATE).unwrap().is_none());

        manager.with_element(|element| element.play()).unwrap();
        time::sleep(Duration::from_millis(600)).await;
        assert!(manager.read_snapshot().unwrap().is_playing);
    }

    #[test]
    fn fresh_snapshot_resumes_with_elapsed_time() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.write_snapshot(&AudioSnapshot {
            is_playing: true,
            current_time: 20.0,
            last_updated: epoch_millis(now - ChronoDuration::seconds(4)),
        });

        assert!(manager.resume_from_snapshot(now));
        manager.with_element(|element| {
            assert!(!element.is_paused());
            assert!((element.current_time() - 24.0).abs() < 0.01);
        });
    }

    #[test]
    fn stale_or_paused_snapshots_are_ignored() {
        let (manager, _) = manager();
        let now = Utc::now();
        manager.write_snapshot(&AudioSnapshot {
            is_playing: true,
            current_time: 20.0,
            last_updated: epoch_millis(now - ChronoDuration::seconds(11)),
        });
        assert!(!manager.resume_from_snapshot(now));

        manager.write_snapshot(&AudioSnapshot {
            is_playing: false,
            current_time: 20.0,
            last_updated: epoch_millis(now),
        });
        assert!(!manager.resume_from_snapshot(now));
        manager.with_element(|element| assert!(element.is_paused()));
    }

    #[test]
    fn rejected_resume_is_swallowed() {
        let store = Arc::new(MemoryStorage::new());
        let manager = AudioManager::new(Box::new(ClockElement::rejecting(None)), store);
        manager.write_snapshot(&AudioSnapshot {
            is_playing: true,
            current_time: 1.0,
            last_updated: epoch_millis(Utc::now()),
        });
        assert!(!manager.resume_from_snapshot(Utc::now()));
    }
}
