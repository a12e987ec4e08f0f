//! The mounted practice session: form data, timer, local persistence,
//! audio and remote write-through behind one handle.

mod listener;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;

use crate::audio::{AudioCueConfig, AudioManager, AudioSynchronizer};
use crate::error::SessionError;
use crate::events::{AppEvent, EventSink};
use crate::gateway::{log_failure, Gateway};
use crate::models::{Match, MatchType, RemoteSession, SessionFormData};
use crate::persistence::{FlushOutcome, PersistScheduler, SessionPersistence};
use crate::storage::KeyValueStore;
use crate::timer::{PhaseTransition, SessionTimerState, TimerController, TimerSnapshot};
use crate::{log_debug, log_info, log_warn};

use listener::SessionListener;

const ENABLE_LOGS: bool = true;

pub const REMOTE_SYNC_WARNING: &str =
    "Your change was saved on this device but could not be synced.";

/// Everything a session needs from the outside world.
pub struct SessionDeps {
    pub local_store: Arc<dyn KeyValueStore>,
    pub events: Arc<dyn EventSink>,
    pub gateway: Option<Gateway>,
    pub audio: Option<AudioManager>,
    pub cues: AudioCueConfig,
    pub persist_debounce: Duration,
    pub tick_interval: Duration,
}

impl SessionDeps {
    pub fn new(local_store: Arc<dyn KeyValueStore>, events: Arc<dyn EventSink>) -> Self {
        Self {
            local_store,
            events,
            gateway: None,
            audio: None,
            cues: AudioCueConfig::default(),
            persist_debounce: Duration::from_millis(300),
            tick_interval: Duration::from_secs(1),
        }
    }
}

pub struct SessionCoordinator {
    form: Arc<Mutex<SessionFormData>>,
    timer: TimerController,
    scheduler: PersistScheduler,
    persistence: Arc<SessionPersistence>,
    audio: Option<Arc<AudioSynchronizer>>,
    gateway: Option<Gateway>,
    events: Arc<dyn EventSink>,
}

impl SessionCoordinator {
    /// Restore whatever the last run left in storage and resume its clocks.
    pub async fn mount(deps: SessionDeps) -> Self {
        let persistence = Arc::new(SessionPersistence::new(
            deps.local_store.clone(),
            deps.events.clone(),
        ));

        let form = persistence.load().unwrap_or_default();
        let mut timer_state = persistence
            .load_timer_state(Utc::now())
            .unwrap_or_else(|| SessionTimerState::for_match_type(form.match_type));
        if timer_state.match_type != form.match_type && !timer_state.is_active() {
            if let Err(err) = timer_state.set_match_type(form.match_type) {
                log_debug!("Keeping stored match type: {}", err);
            }
        }
        let completed = form.is_completed;

        let audio = deps
            .audio
            .as_ref()
            .map(|manager| Arc::new(AudioSynchronizer::new(manager, deps.cues.clone())));
        if let Some(audio) = &audio {
            audio.validate_track();
            if audio.manager().resume_from_snapshot(Utc::now()) {
                log_info!("Resumed match audio from the previous view");
            }
        }

        let form = Arc::new(Mutex::new(form));
        let timer_state = Arc::new(Mutex::new(timer_state));
        let scheduler = PersistScheduler::new(
            persistence.clone(),
            form.clone(),
            timer_state.clone(),
            deps.persist_debounce,
        );
        let listener = Arc::new(SessionListener {
            scheduler: scheduler.clone(),
            audio: audio.clone(),
            events: deps.events.clone(),
        });
        let timer = TimerController::new(timer_state, listener, deps.tick_interval);
        timer.set_session_completed(completed);

        if !completed {
            timer.restore().await;
        }
        persistence.flush_warnings();

        Self {
            form,
            timer,
            scheduler,
            persistence,
            audio,
            gateway: deps.gateway.map(|gateway| gateway.child()),
            events: deps.events,
        }
    }

    pub async fn form(&self) -> SessionFormData {
        self.form.lock().await.clone()
    }

    pub async fn timer_state(&self) -> SessionTimerState {
        self.timer.get_state().await
    }

    pub async fn snapshot(&self) -> TimerSnapshot {
        self.timer.get_snapshot().await
    }

    pub fn timer(&self) -> &TimerController {
        &self.timer
    }

    pub fn persistence(&self) -> &SessionPersistence {
        &self.persistence
    }

    /// Apply an edit to the form. Completed sessions are read-only.
    pub async fn update<R>(
        &self,
        edit: impl FnOnce(&mut SessionFormData) -> R,
    ) -> Result<R, SessionError> {
        let result = {
            let mut form = self.form.lock().await;
            if form.is_completed {
                return Err(SessionError::Completed);
            }
            edit(&mut form)
        };
        self.scheduler.mark_dirty();
        Ok(result)
    }

    pub async fn set_match_type(&self, match_type: MatchType) -> Result<(), SessionError> {
        self.ensure_open().await?;
        self.timer.set_match_type(match_type).await?;
        self.form.lock().await.match_type = match_type;
        self.scheduler.mark_dirty();
        Ok(())
    }

    pub async fn start_timer(&self) -> Result<SessionTimerState, SessionError> {
        self.ensure_open().await?;
        self.timer.start().await
    }

    pub async fn pause_timer(&self) -> SessionTimerState {
        self.timer.pause().await
    }

    pub async fn skip_to_teleop(&self) -> Result<SessionTimerState, SessionError> {
        self.ensure_open().await?;
        self.timer.skip_to_teleop().await
    }

    pub async fn end_autonomous(&self) -> Option<PhaseTransition> {
        self.timer.end_autonomous().await
    }

    pub async fn reset_timer(&self) -> SessionTimerState {
        self.timer.reset_timer().await
    }

    pub fn set_tutorial_active(&self, active: bool) {
        if let Some(audio) = &self.audio {
            audio.set_tutorial_active(active);
        }
    }

    /// Turn the draft into a match. The timer is left as it is.
    pub async fn record_match(&self) -> Result<Match, SessionError> {
        let recorded = {
            let mut form = self.form.lock().await;
            form.record_match(Utc::now())?.clone()
        };
        log_info!("Recorded match {} ({} pts)", recorded.match_number, recorded.total_points());
        self.scheduler.mark_dirty();
        Ok(recorded)
    }

    pub async fn begin_edit(&self, index: usize) -> Result<(), SessionError> {
        self.update(|form| form.begin_edit(index)).await??;
        Ok(())
    }

    pub async fn commit_edit(&self) -> Result<Match, SessionError> {
        let edited = self
            .update(|form| form.commit_edit().map(Match::clone))
            .await??;
        self.push_remote_update().await;
        Ok(edited)
    }

    pub async fn cancel_edit(&self) -> Result<(), SessionError> {
        self.update(|form| form.cancel_edit()).await??;
        Ok(())
    }

    /// Remove a match locally and, for a session already stored remotely,
    /// push the new match list. A failed push only warns.
    pub async fn remove_match(&self, index: usize) -> Result<Match, SessionError> {
        let removed = {
            let mut form = self.form.lock().await;
            if form.is_completed {
                return Err(SessionError::Completed);
            }
            form.remove_match(index)?
        };
        self.scheduler.mark_dirty();
        self.push_remote_update().await;
        Ok(removed)
    }

    async fn push_remote_update(&self) {
        let Some(gateway) = &self.gateway else {
            return;
        };
        let form = self.form().await;
        let Some(remote_id) = form.remote_id.clone() else {
            return;
        };
        if let Err(err) = gateway.update_session(&remote_id, &form).await {
            log_failure("update remote session", &err);
            if !err.is_aborted() {
                self.events.emit(AppEvent::warning(REMOTE_SYNC_WARNING));
            }
        }
    }

    /// Freeze the session, stop every clock, write it through the gateway
    /// and forget the local copy.
    pub async fn complete_session(
        &self,
        owner_id: &str,
        team_id: Option<&str>,
    ) -> Result<RemoteSession, SessionError> {
        let gateway = self
            .gateway
            .as_ref()
            .ok_or_else(|| SessionError::InvalidState("no remote gateway configured".into()))?;

        let mut finished = self.form().await;
        if finished.is_completed {
            return Err(SessionError::Completed);
        }
        if finished.is_editing() {
            return Err(SessionError::EditInProgress);
        }
        finished.is_completed = true;

        let stored = match finished.remote_id.clone() {
            Some(remote_id) => gateway.update_session(&remote_id, &finished).await,
            None => gateway.create_session(owner_id, team_id, &finished).await,
        };
        let stored = match stored {
            Ok(stored) => stored,
            Err(err) => {
                log_failure("complete session", &err);
                return Err(err.into());
            }
        };

        {
            let mut form = self.form.lock().await;
            form.is_completed = true;
            form.remote_id = Some(stored.id.clone());
        }
        self.timer.set_session_completed(true);
        self.timer.pause().await;
        self.timer.shutdown();
        self.scheduler.cancel();
        self.persistence.clear();
        if let Some(audio) = &self.audio {
            audio.stop_now();
        }
        log_info!("Completed session {}", stored.id);
        self.events.emit(AppEvent::info("Session saved"));
        Ok(stored)
    }

    /// Discard the current session and start over.
    pub async fn new_session(&self, name: &str, match_type: MatchType) -> SessionTimerState {
        self.scheduler.cancel();
        *self.form.lock().await = SessionFormData::new(name, match_type);
        self.timer.shutdown();
        let mut state = self.timer.reset_session().await;
        if state.match_type != match_type {
            match self.timer.set_match_type(match_type).await {
                Ok(next) => state = next,
                Err(err) => log_warn!("Could not switch match type: {}", err),
            }
        }
        self.persistence.clear();
        self.scheduler.mark_dirty();
        state
    }

    pub async fn flush(&self) -> FlushOutcome {
        self.scheduler.flush().await
    }

    /// Unmount: write pending changes, then stop every ticker, timeout and
    /// in-flight remote request.
    pub async fn shutdown(&self) {
        let outcome = self.scheduler.flush().await;
        log_debug!("Final flush: {:?}", outcome);
        self.scheduler.cancel();
        self.timer.shutdown();
        if let Some(gateway) = &self.gateway {
            gateway.cancel();
        }
    }

    async fn ensure_open(&self) -> Result<(), SessionError> {
        if self.form.lock().await.is_completed {
            Err(SessionError::Completed)
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{RecordingSink, ToastLevel};
    use crate::persistence::SCHEMA_RESET_WARNING;
    use crate::storage::{keys, MemoryStorage};
    use crate::timer::MatchPhase;

    fn deps(store: Arc<MemoryStorage>, sink: Arc<RecordingSink>) -> SessionDeps {
        SessionDeps::new(store, sink)
    }

    #[tokio::test(start_paused = true)]
    async fn edits_are_persisted_after_the_debounce() {
        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let session = SessionCoordinator::mount(deps(store.clone(), sink.clone())).await;

        session
            .update(|form| form.session_name = "Practice".into())
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.get(keys::SESSION_DATA).unwrap().unwrap().contains("Practice"));

        let remounted = SessionCoordinator::mount(deps(store.clone(), sink)).await;
        assert_eq!(remounted.form().await.session_name, "Practice");
    }

    #[tokio::test(start_paused = true)]
    async fn schema_reset_warns_on_mount() {
        let store = Arc::new(MemoryStorage::new());
        store.set(keys::SCHEMA_VERSION, "1").unwrap();
        store.set(keys::SESSION_DATA, "{}").unwrap();
        let sink = Arc::new(RecordingSink::new());

        let session = SessionCoordinator::mount(deps(store.clone(), sink.clone())).await;
        assert_eq!(session.form().await, SessionFormData::default());
        assert_eq!(
            sink.toasts(),
            vec![(ToastLevel::Warning, SCHEMA_RESET_WARNING.to_string())]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn running_timer_resumes_after_remount() {
        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let session = SessionCoordinator::mount(deps(store.clone(), sink.clone())).await;
        session.set_match_type(MatchType::Teleop).await.unwrap();
        session.start_timer().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5_500)).await;
        session.shutdown().await;

        let remounted = SessionCoordinator::mount(deps(store, sink)).await;
        let state = remounted.timer_state().await;
        assert_eq!(state.match_type, MatchType::Teleop);
        assert!(state.running);
        assert!(state.timer <= 115);
        assert_eq!(remounted.timer().active_tickers(), (true, false, true));
        remounted.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn edits_round_trip_through_the_coordinator() {
        let store = Arc::new(MemoryStorage::new());
        let session =
            SessionCoordinator::mount(deps(store, Arc::new(RecordingSink::new()))).await;
        session
            .update(|form| form.draft.teleop.classified = 5)
            .await
            .unwrap();
        let first = session.record_match().await.unwrap();
        assert_eq!(first.match_number, 1);

        session.begin_edit(0).await.unwrap();
        session
            .update(|form| form.draft.teleop.classified = 7)
            .await
            .unwrap();
        assert!(matches!(
            session.record_match().await,
            Err(SessionError::EditInProgress)
        ));
        let edited = session.commit_edit().await.unwrap();
        assert_eq!(edited.teleop.classified, 7);
        assert_eq!(session.form().await.draft.teleop.classified, 0);

        let removed = session.remove_match(0).await.unwrap();
        assert_eq!(removed.id, first.id);
        assert!(session.form().await.matches.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn completing_writes_through_and_clears_local_storage() {
        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let gateway = Gateway::in_memory().unwrap();
        let mut deps = deps(store.clone(), sink.clone());
        deps.gateway = Some(gateway.clone());
        let session = SessionCoordinator::mount(deps).await;

        session
            .update(|form| form.session_name = "Finals prep".into())
            .await
            .unwrap();
        session.record_match().await.unwrap();
        session.start_timer().await.unwrap();
        session.flush().await;
        assert!(session.persistence().has_active_session());

        let stored = session.complete_session("alice", None).await.unwrap();
        assert!(stored.data.is_completed);
        assert_eq!(stored.data.matches.len(), 1);
        assert!(!session.persistence().has_active_session());
        assert_eq!(session.timer().active_tickers(), (false, false, false));
        assert!(matches!(
            session.update(|form| form.notes.push('x')).await,
            Err(SessionError::Completed)
        ));
        assert!(matches!(
            session.complete_session("alice", None).await,
            Err(SessionError::Completed)
        ));

        let listed = gateway.list_sessions_by_owner("alice").await.unwrap();
        assert_eq!(listed[0].id, stored.id);
    }

    #[tokio::test(start_paused = true)]
    async fn removing_a_match_updates_the_remote_copy() {
        let gateway = Gateway::in_memory().unwrap();
        let mut form = SessionFormData::new("Synced", MatchType::FullGame);
        form.record_match(Utc::now()).unwrap();
        form.record_match(Utc::now()).unwrap();
        let remote = gateway.create_session("alice", None, &form).await.unwrap();

        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let mut deps = deps(store, sink.clone());
        deps.gateway = Some(gateway.clone());
        let session = SessionCoordinator::mount(deps).await;
        session
            .update(|current| *current = remote.data.clone())
            .await
            .unwrap();

        session.remove_match(1).await.unwrap();
        let refreshed = gateway.get_session(&remote.id).await.unwrap().unwrap();
        assert_eq!(refreshed.data.matches.len(), 1);
        assert!(sink.toasts().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_cancels_remote_calls_quietly() {
        let gateway = Gateway::in_memory().unwrap();
        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let mut deps = deps(store, sink.clone());
        deps.gateway = Some(gateway.clone());
        let session = SessionCoordinator::mount(deps).await;
        session
            .update(|form| form.remote_id = Some("gone".into()))
            .await
            .unwrap();

        session.shutdown().await;
        session
            .update(|form| {
                form.draft.auton.leave = true;
            })
            .await
            .unwrap();
        session.record_match().await.unwrap();
        session.remove_match(0).await.unwrap();
        assert!(sink.toasts().is_empty());
        // the parent gateway is still usable
        assert!(gateway.list_sessions_by_owner("alice").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn autonomous_match_ends_without_recording() {
        let store = Arc::new(MemoryStorage::new());
        let sink = Arc::new(RecordingSink::new());
        let session = SessionCoordinator::mount(deps(store, sink.clone())).await;
        session.set_match_type(MatchType::Autonomous).await.unwrap();
        session.start_timer().await.unwrap();
        tokio::time::sleep(Duration::from_millis(30_500)).await;

        let state = session.timer_state().await;
        assert_eq!(state.phase, MatchPhase::Ended);
        assert!(session.form().await.matches.is_empty());
        assert!(sink.events().iter().any(|event| matches!(
            event,
            AppEvent::MatchEnded {
                match_type: MatchType::Autonomous
            }
        )));
    }
}
