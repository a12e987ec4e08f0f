//! Versioned snapshots of the in-progress session in on-device storage.
//!
//! Layout (all JSON strings):
//! - `sessionData`: the [`SessionFormData`] aggregate
//! - `schemaVersion`: [`SCHEMA_VERSION`]; a mismatch wipes every session key
//! - `sessionTimer` / `matchTimer`: `{value, timestamp, isRunning}`
//! - `matchState`: phase and transition flags
//! - `startTimestamps`: absolute session/match start instants
//!
//! Running clocks are stored with the wall-clock time of the write, so a
//! reload can add the time that passed while nothing was ticking.

mod scheduler;

pub use scheduler::{FlushOutcome, PersistScheduler};

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc, Mutex,
};

use chrono::{DateTime, TimeZone, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::error::StorageError;
use crate::events::{AppEvent, EventSink};
use crate::models::{MatchType, SessionFormData};
use crate::storage::{keys, KeyValueStore};
use crate::timer::{MatchPhase, SessionTimerState};
use crate::utils::{elapsed_whole_secs, epoch_millis};
use crate::{log_debug, log_error, log_warn};

const ENABLE_LOGS: bool = true;

/// Bump whenever the stored layout changes incompatibly. Stored data with
/// another version is discarded, with a warning to the user.
pub const SCHEMA_VERSION: &str = "3";

pub const SCHEMA_RESET_WARNING: &str =
    "Your saved session was created by an older version of TeamTrack and could not be restored.";
pub const SAVE_FAILED_WARNING: &str =
    "Could not save your session on this device. Changes will be lost if you close the app.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TimerRecord {
    pub value: u64,
    /// Epoch milliseconds of the write.
    pub timestamp: i64,
    pub is_running: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MatchStateRecord {
    pub has_started: bool,
    pub has_transitioned_to_teleop: bool,
    pub show_teleop_transition: bool,
    pub match_phase: MatchPhase,
    #[serde(default)]
    pub phase_timer: Option<u32>,
    #[serde(default)]
    pub match_type: MatchType,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct StartTimestamps {
    pub session_started_at: Option<i64>,
    pub match_started_at: Option<i64>,
}

fn from_millis(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

pub struct SessionPersistence {
    store: Arc<dyn KeyValueStore>,
    events: Arc<dyn EventSink>,
    pending_warning: Mutex<Option<String>>,
    save_warning_shown: AtomicBool,
}

impl SessionPersistence {
    pub fn new(store: Arc<dyn KeyValueStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            store,
            events,
            pending_warning: Mutex::new(None),
            save_warning_shown: AtomicBool::new(false),
        }
    }

    pub fn store(&self) -> &Arc<dyn KeyValueStore> {
        &self.store
    }

    fn serialize_all(
        &self,
        session: &SessionFormData,
        timer: &SessionTimerState,
        now: DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>, StorageError> {
        let stamp = epoch_millis(now);
        let session_timer = TimerRecord {
            value: timer.session_elapsed,
            timestamp: stamp,
            is_running: timer.has_started && !session.is_completed,
        };
        let match_timer = TimerRecord {
            value: u64::from(timer.timer),
            timestamp: stamp,
            is_running: timer.running,
        };
        let match_state = MatchStateRecord {
            has_started: timer.has_started,
            has_transitioned_to_teleop: timer.has_transitioned_to_teleop,
            show_teleop_transition: timer.show_teleop_transition,
            match_phase: timer.phase,
            phase_timer: timer.phase_timer,
            match_type: timer.match_type,
        };
        let stamps = StartTimestamps {
            session_started_at: timer.session_started_at.map(epoch_millis),
            match_started_at: timer.match_started_at.map(epoch_millis),
        };

        Ok(vec![
            (keys::SESSION_DATA, serde_json::to_string(session)?),
            (keys::SESSION_TIMER, serde_json::to_string(&session_timer)?),
            (keys::MATCH_TIMER, serde_json::to_string(&match_timer)?),
            (keys::MATCH_STATE, serde_json::to_string(&match_state)?),
            (keys::START_TIMESTAMPS, serde_json::to_string(&stamps)?),
            (keys::SCHEMA_VERSION, SCHEMA_VERSION.to_string()),
        ])
    }

    /// Write the session and timer. On failure the keys touched by this
    /// call are put back, a warning toast is shown, and false is returned.
    pub fn save(
        &self,
        session: &SessionFormData,
        timer: &SessionTimerState,
        now: DateTime<Utc>,
    ) -> bool {
        let entries = match self.serialize_all(session, timer, now) {
            Ok(entries) => entries,
            Err(err) => {
                self.report_save_failure(&err);
                return false;
            }
        };

        let mut written: Vec<(&'static str, Option<String>)> = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            let previous = match self.store.get(key) {
                Ok(previous) => previous,
                Err(err) => {
                    self.rollback(written);
                    self.report_save_failure(&err);
                    return false;
                }
            };
            if let Err(err) = self.store.set(key, &value) {
                self.rollback(written);
                self.report_save_failure(&err);
                return false;
            }
            written.push((key, previous));
        }

        self.save_warning_shown.store(false, Ordering::SeqCst);
        true
    }

    fn rollback(&self, written: Vec<(&'static str, Option<String>)>) {
        for (key, previous) in written.into_iter().rev() {
            let result = match previous {
                Some(value) => self.store.set(key, &value),
                None => self.store.remove(key),
            };
            if let Err(err) = result {
                log_warn!("Failed to restore {} after a failed save: {}", key, err);
            }
        }
    }

    fn report_save_failure(&self, err: &StorageError) {
        log_error!("Failed to save session locally: {}", err);
        if !self.save_warning_shown.swap(true, Ordering::SeqCst) {
            self.events.emit(AppEvent::warning(SAVE_FAILED_WARNING));
        }
    }

    fn stored_version(&self) -> Result<Option<String>, StorageError> {
        self.store.get(keys::SCHEMA_VERSION)
    }

    /// Restore the session aggregate, or `None` when there is nothing usable.
    pub fn load(&self) -> Option<SessionFormData> {
        let version = match self.stored_version() {
            Ok(version) => version,
            Err(err) => {
                log_warn!("Local storage unavailable, starting fresh: {}", err);
                return None;
            }
        };
        let raw = self.store.get(keys::SESSION_DATA).ok().flatten();

        if version.as_deref() != Some(SCHEMA_VERSION) {
            let leftovers = keys::SESSION_KEYS
                .iter()
                .any(|key| matches!(self.store.get(key), Ok(Some(_))));
            if leftovers {
                log_warn!(
                    "Stored schema version {:?} does not match {}; discarding session",
                    version,
                    SCHEMA_VERSION
                );
                self.clear();
            }
            if raw.is_some() {
                self.queue_warning(SCHEMA_RESET_WARNING);
            }
            return None;
        }

        let raw = raw?;
        match serde_json::from_str::<SessionFormData>(&raw) {
            Ok(session) => Some(session),
            Err(err) => {
                log_warn!("Stored session is unreadable, discarding: {}", err);
                self.clear();
                self.queue_warning(SCHEMA_RESET_WARNING);
                None
            }
        }
    }

    fn read_record<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.store.get(key) {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(err) => {
                log_warn!("Failed to read {}: {}", key, err);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(value) => Some(value),
            Err(err) => {
                log_warn!("Ignoring malformed {}: {}", key, err);
                None
            }
        }
    }

    /// Rebuild timer state, adding wall-clock time that passed since the
    /// last write to every clock that was running at the time.
    pub fn load_timer_state(&self, now: DateTime<Utc>) -> Option<SessionTimerState> {
        if self.stored_version().ok().flatten().as_deref() != Some(SCHEMA_VERSION) {
            return None;
        }

        let session_timer: Option<TimerRecord> = self.read_record(keys::SESSION_TIMER);
        let match_timer: Option<TimerRecord> = self.read_record(keys::MATCH_TIMER);
        let match_state: Option<MatchStateRecord> = self.read_record(keys::MATCH_STATE);
        let stamps: Option<StartTimestamps> = self.read_record(keys::START_TIMESTAMPS);

        if session_timer.is_none() && match_timer.is_none() && match_state.is_none() {
            return None;
        }

        let match_type = match_state.map(|s| s.match_type).unwrap_or_default();
        let mut state = SessionTimerState::for_match_type(match_type);

        if let Some(record) = match_timer {
            let elapsed = if record.is_running {
                elapsed_whole_secs(record.timestamp, now)
            } else {
                0
            };
            let remaining = record.value.saturating_sub(elapsed);
            state.timer = u32::try_from(remaining).unwrap_or(u32::MAX);
            state.running = record.is_running;
        }

        if let Some(record) = session_timer {
            let elapsed = if record.is_running {
                elapsed_whole_secs(record.timestamp, now)
            } else {
                0
            };
            state.session_elapsed = record.value.saturating_add(elapsed);
        }

        if let Some(flags) = match_state {
            state.has_started = flags.has_started;
            state.has_transitioned_to_teleop = flags.has_transitioned_to_teleop;
            state.show_teleop_transition = flags.show_teleop_transition;
            state.phase = flags.match_phase;
            state.phase_timer = flags.phase_timer;

            // The pickup countdown runs while the match clock is stopped.
            if flags.match_phase == MatchPhase::ControllerPickup && flags.phase_timer.is_some() {
                if let Some(record) = match_timer {
                    state.advance_pickup(elapsed_whole_secs(record.timestamp, now));
                }
            }
        }

        if let Some(stamps) = stamps {
            state.session_started_at = stamps.session_started_at.and_then(from_millis);
            state.match_started_at = stamps.match_started_at.and_then(from_millis);
        }

        Some(state)
    }

    /// Remove every session key. Errors are logged, never returned.
    pub fn clear(&self) {
        for key in keys::SESSION_KEYS {
            if let Err(err) = self.store.remove(key) {
                log_warn!("Failed to remove {}: {}", key, err);
            }
        }
        log_debug!("Cleared local session storage");
    }

    /// True when the stored session has a recorded match or a started timer.
    pub fn has_active_session(&self) -> bool {
        let has_matches = self
            .read_record::<SessionFormData>(keys::SESSION_DATA)
            .is_some_and(|session| !session.matches.is_empty());
        if has_matches {
            return true;
        }
        self.read_record::<MatchStateRecord>(keys::MATCH_STATE)
            .is_some_and(|flags| flags.has_started)
    }

    fn queue_warning(&self, message: &str) {
        let mut pending = match self.pending_warning.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        pending.get_or_insert_with(|| message.to_string());
    }

    /// The warning queued by the last discarding `load`, handed out once.
    pub fn take_pending_warning(&self) -> Option<String> {
        match self.pending_warning.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Emit any queued warning as a toast.
    pub fn flush_warnings(&self) {
        if let Some(message) = self.take_pending_warning() {
            self.events.emit(AppEvent::warning(message));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordingSink, ToastLevel};
    use crate::models::ParkStatus;
    use crate::storage::MemoryStorage;
    use chrono::Duration;

    fn persistence_with(store: Arc<MemoryStorage>) -> (SessionPersistence, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (SessionPersistence::new(store, sink.clone()), sink)
    }

    fn sample_session() -> SessionFormData {
        let mut session = SessionFormData::new("Thursday practice", MatchType::FullGame);
        session.duration = "1 hour".into();
        session.draft.auton.classified = 3;
        session.draft.park = ParkStatus::Full;
        session.record_match(Utc::now()).unwrap();
        session.notes = "intake jammed twice".into();
        session
    }

    #[test]
    fn save_then_load_round_trips() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        let session = sample_session();
        let timer = SessionTimerState::default();

        assert!(persistence.save(&session, &timer, Utc::now()));
        assert_eq!(persistence.load(), Some(session.clone()));

        let mut edited = session;
        edited.notes.push_str(", fixed");
        assert!(persistence.save(&edited, &timer, Utc::now()));
        assert_eq!(persistence.load(), Some(edited));
    }

    #[test]
    fn version_mismatch_wipes_and_warns_once() {
        let store = Arc::new(MemoryStorage::new());
        let (persistence, sink) = persistence_with(store.clone());
        persistence.save(&sample_session(), &SessionTimerState::default(), Utc::now());
        store.set(keys::SCHEMA_VERSION, "1").unwrap();

        assert_eq!(persistence.load(), None);
        for key in keys::SESSION_KEYS {
            assert_eq!(store.get(key).unwrap(), None, "{key} should be cleared");
        }

        persistence.flush_warnings();
        persistence.flush_warnings();
        assert_eq!(
            sink.toasts(),
            vec![(ToastLevel::Warning, SCHEMA_RESET_WARNING.to_string())]
        );
    }

    #[test]
    fn mismatch_without_session_data_is_silent() {
        let store = Arc::new(MemoryStorage::new());
        let (persistence, _) = persistence_with(store.clone());
        store.set(keys::SCHEMA_VERSION, "0").unwrap();
        store.set(keys::MATCH_STATE, "{}").unwrap();

        assert_eq!(persistence.load(), None);
        assert_eq!(persistence.take_pending_warning(), None);
        assert!(store.is_empty());
    }

    #[test]
    fn unversioned_timer_leftovers_are_wiped() {
        let store = Arc::new(MemoryStorage::new());
        let (persistence, _) = persistence_with(store.clone());
        store
            .set(
                keys::MATCH_TIMER,
                r#"{"value":90,"timestamp":0,"isRunning":true}"#,
            )
            .unwrap();

        assert_eq!(persistence.load(), None);
        assert_eq!(persistence.take_pending_warning(), None);
        assert!(store.is_empty());
        assert_eq!(persistence.load_timer_state(Utc::now()), None);
    }

    #[test]
    fn fresh_store_loads_nothing() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        assert_eq!(persistence.load(), None);
        assert_eq!(persistence.load_timer_state(Utc::now()), None);
        assert!(!persistence.has_active_session());
    }

    #[test]
    fn running_match_timer_catches_up_on_load() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        let mut timer = SessionTimerState::for_match_type(MatchType::Teleop);
        let written_at = Utc::now();
        timer.start(written_at);
        timer.timer = 100;
        timer.session_elapsed = 40;
        persistence.save(&SessionFormData::default(), &timer, written_at);

        let later = written_at + Duration::milliseconds(7_900);
        let restored = persistence.load_timer_state(later).unwrap();
        assert_eq!(restored.timer, 93);
        assert_eq!(restored.session_elapsed, 47);
        assert!(restored.running);
        assert_eq!(restored.phase, MatchPhase::Teleop);

        let much_later = written_at + Duration::seconds(500);
        assert_eq!(persistence.load_timer_state(much_later).unwrap().timer, 0);
    }

    #[test]
    fn stopped_clocks_do_not_move() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        let mut timer = SessionTimerState::for_match_type(MatchType::FullGame);
        timer.timer = 140;
        timer.session_elapsed = 12;
        let written_at = Utc::now();
        persistence.save(&SessionFormData::default(), &timer, written_at);

        let restored = persistence
            .load_timer_state(written_at + Duration::seconds(60))
            .unwrap();
        assert_eq!(restored.timer, 140);
        assert_eq!(restored.session_elapsed, 12);
        assert!(!restored.running);
    }

    #[test]
    fn pickup_countdown_catches_up_on_load() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        let mut timer = SessionTimerState::for_match_type(MatchType::FullGame);
        timer.start(Utc::now());
        timer.end_autonomous();
        let written_at = Utc::now();
        persistence.save(&SessionFormData::default(), &timer, written_at);

        let restored = persistence
            .load_timer_state(written_at + Duration::seconds(3))
            .unwrap();
        assert_eq!(restored.phase, MatchPhase::ControllerPickup);
        assert_eq!(restored.phase_timer, Some(5));
    }

    #[test]
    fn late_reload_carries_pickup_into_teleop() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        let mut timer = SessionTimerState::for_match_type(MatchType::FullGame);
        timer.start(Utc::now());
        timer.end_autonomous();
        let written_at = Utc::now();
        persistence.save(&SessionFormData::default(), &timer, written_at);

        let teleop = persistence
            .load_timer_state(written_at + Duration::seconds(60))
            .unwrap();
        assert_eq!(teleop.phase, MatchPhase::Teleop);
        assert_eq!(teleop.timer, 68);
        assert_eq!(teleop.phase_timer, None);
        assert!(teleop.running);

        let ended = persistence
            .load_timer_state(written_at + Duration::seconds(600))
            .unwrap();
        assert_eq!(ended.phase, MatchPhase::Ended);
        assert_eq!(ended.timer, 0);
        assert!(!ended.running);
    }

    #[test]
    fn quota_failure_keeps_previous_snapshot() {
        let store = Arc::new(MemoryStorage::with_quota(4_000));
        let (persistence, sink) = persistence_with(store.clone());
        let session = sample_session();
        assert!(persistence.save(&session, &SessionTimerState::default(), Utc::now()));

        let mut huge = session.clone();
        huge.notes = "x".repeat(10_000);
        assert!(!persistence.save(&huge, &SessionTimerState::default(), Utc::now()));
        assert!(!persistence.save(&huge, &SessionTimerState::default(), Utc::now()));

        assert_eq!(persistence.load(), Some(session));
        assert_eq!(
            sink.toasts(),
            vec![(ToastLevel::Warning, SAVE_FAILED_WARNING.to_string())]
        );
    }

    #[test]
    fn disabled_storage_never_panics() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::disabled()));
        assert!(!persistence.save(
            &sample_session(),
            &SessionTimerState::default(),
            Utc::now()
        ));
        assert_eq!(persistence.load(), None);
        assert_eq!(persistence.load_timer_state(Utc::now()), None);
        persistence.clear();
        assert!(!persistence.has_active_session());
    }

    #[test]
    fn active_session_tracks_matches_and_started_flag() {
        let (persistence, _) = persistence_with(Arc::new(MemoryStorage::new()));
        persistence.clear();
        assert!(!persistence.has_active_session());

        let mut timer = SessionTimerState::default();
        persistence.save(&SessionFormData::default(), &timer, Utc::now());
        assert!(!persistence.has_active_session());

        timer.start(Utc::now());
        persistence.save(&SessionFormData::default(), &timer, Utc::now());
        assert!(persistence.has_active_session());

        persistence.clear();
        assert!(!persistence.has_active_session());

        persistence.save(&sample_session(), &SessionTimerState::default(), Utc::now());
        assert!(persistence.has_active_session());

        persistence.clear();
        persistence.clear();
        assert!(!persistence.has_active_session());
    }
}
