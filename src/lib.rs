pub mod audio;
pub mod error;
pub mod events;
pub mod export;
pub mod gateway;
pub mod identity;
pub mod models;
pub mod persistence;
pub mod preferences;
pub mod session;
pub mod settings;
pub mod storage;
pub mod timer;
pub mod utils;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use audio::{AudioElement, AudioManager, ClockElement};
use events::EventSink;
use gateway::Gateway;
use identity::Identity;
use preferences::Preferences;
use session::{SessionCoordinator, SessionDeps};
use settings::{AppSettings, SettingsStore};
use storage::{FileStorage, MemoryStorage};

pub const DATA_DIR_ENV: &str = "TEAMTRACK_DATA_DIR";
const LOCAL_STORAGE_FILE: &str = "local_storage.json";
const DATABASE_FILE: &str = "teamtrack.sqlite3";

/// `TEAMTRACK_DATA_DIR`, else the platform data directory, else the
/// working directory.
pub fn default_data_dir() -> PathBuf {
    if let Some(dir) = std::env::var_os(DATA_DIR_ENV).filter(|dir| !dir.is_empty()) {
        return PathBuf::from(dir);
    }
    dirs::data_dir()
        .map(|dir| dir.join("teamtrack"))
        .unwrap_or_else(|| PathBuf::from(".teamtrack"))
}

fn build_audio_element(settings: &AppSettings) -> Box<dyn AudioElement> {
    #[cfg(feature = "rodio-output")]
    {
        if let Some(track) = &settings.match_track {
            match audio::RodioElement::open(track) {
                Ok(element) => return Box::new(element),
                Err(err) => log::warn!("Falling back to silent cues: {err}"),
            }
        }
    }
    #[cfg(not(feature = "rodio-output"))]
    {
        if let Some(track) = &settings.match_track {
            log::debug!(
                "Ignoring match track {} (built without audio output)",
                track.display()
            );
        }
    }
    Box::new(ClockElement::new(Some(settings.audio_cues.track_length_secs)))
}

/// Long-lived services for one data directory.
pub struct AppState {
    pub data_dir: PathBuf,
    pub settings: SettingsStore,
    pub local_store: Arc<FileStorage>,
    /// Tab-scoped storage; gone when the process exits.
    pub session_store: Arc<MemoryStorage>,
    pub gateway: Gateway,
    pub identity: Identity,
    pub preferences: Preferences,
    pub audio: AudioManager,
    pub events: Arc<dyn EventSink>,
}

impl AppState {
    pub fn open(data_dir: &Path, events: Arc<dyn EventSink>) -> Result<Self> {
        std::fs::create_dir_all(data_dir)
            .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

        let settings = SettingsStore::in_dir(data_dir)?;
        let current = settings.settings();

        let local_store = Arc::new(FileStorage::open(data_dir.join(LOCAL_STORAGE_FILE)));
        let session_store = Arc::new(MemoryStorage::new());
        let gateway = Gateway::open(data_dir.join(DATABASE_FILE))?;
        let audio = AudioManager::new(build_audio_element(&current), session_store.clone());

        log::info!("TeamTrack data in {}", data_dir.display());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            identity: Identity::new(local_store.clone()),
            preferences: Preferences::new(local_store.clone(), current.default_theme),
            settings,
            local_store,
            session_store,
            gateway,
            audio,
            events,
        })
    }

    pub fn session_deps(&self) -> SessionDeps {
        let settings = self.settings.settings();
        let persist_debounce = settings.persist_debounce();
        SessionDeps {
            local_store: self.local_store.clone(),
            events: self.events.clone(),
            gateway: Some(self.gateway.clone()),
            audio: Some(self.audio.clone()),
            cues: settings.audio_cues,
            persist_debounce,
            tick_interval: Duration::from_secs(1),
        }
    }

    pub async fn mount_session(&self) -> SessionCoordinator {
        SessionCoordinator::mount(self.session_deps()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RecordingSink;
    use crate::export::{create_share_link, resolve_link};
    use crate::models::MatchType;

    #[tokio::test]
    async fn session_survives_a_restart() {
        let dir = tempfile::tempdir().unwrap();
        let sink = Arc::new(RecordingSink::new());

        {
            let state = AppState::open(dir.path(), sink.clone()).unwrap();
            let session = state.mount_session().await;
            session.new_session("Scrimmage", MatchType::Teleop).await;
            session
                .update(|form| form.draft.teleop.classified = 4)
                .await
                .unwrap();
            session.record_match().await.unwrap();
            session.shutdown().await;
        }

        let state = AppState::open(dir.path(), sink.clone()).unwrap();
        let session = state.mount_session().await;
        let form = session.form().await;
        assert_eq!(form.session_name, "Scrimmage");
        assert_eq!(form.match_type, MatchType::Teleop);
        assert_eq!(form.matches.len(), 1);
        assert_eq!(form.matches[0].total_points(), 12);
        assert!(sink.toasts().is_empty());
        session.shutdown().await;
    }

    #[test]
    fn session_deps_follow_settings() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path(), Arc::new(RecordingSink::new())).unwrap();
        state
            .settings
            .update(|settings| {
                settings.persist_debounce_ms = 50;
                settings.audio_cues.teleop_base = 40.0;
            })
            .unwrap();

        let deps = state.session_deps();
        assert_eq!(deps.persist_debounce, Duration::from_millis(50));
        assert_eq!(deps.cues.teleop_base, 40.0);
        assert!(deps.gateway.is_some());
        assert!(deps.audio.is_some());
    }

    #[tokio::test]
    async fn guest_completes_and_shares() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path(), Arc::new(RecordingSink::new())).unwrap();
        state.identity.set_guest_mode(true).unwrap();
        let principal = state.identity.principal(None).unwrap().unwrap();
        assert!(!principal.is_authenticated());

        let session = state.mount_session().await;
        session.new_session("Guest run", MatchType::FullGame).await;
        session.record_match().await.unwrap();

        let form = session.form().await;
        let base = state.settings.settings().share_base_url;
        let link = create_share_link(&state.gateway, None, &base, &form)
            .await
            .unwrap();
        let opened = resolve_link(&state.gateway, &link).await.unwrap();
        assert_eq!(opened.session_name, "Guest run");

        let stored = session
            .complete_session(principal.owner_id(), None)
            .await
            .unwrap();
        let listed = state
            .gateway
            .list_sessions_by_owner(principal.owner_id())
            .await
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert!(!session.persistence().has_active_session());
        session.shutdown().await;
    }
}
