use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
    time::Duration,
};

use crate::audio::AudioCueConfig;
use crate::log_warn;
use crate::preferences::Theme;

const ENABLE_LOGS: bool = true;

pub const SETTINGS_FILE: &str = "settings.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSettings {
    pub audio_cues: AudioCueConfig,
    /// Quiet period before a changed session is written to storage.
    pub persist_debounce_ms: u64,
    pub default_theme: Theme,
    pub share_base_url: String,
    /// Optional match track played through the system output.
    pub match_track: Option<PathBuf>,
}

impl Default for AppSettings {
    fn default() -> Self {
        Self {
            audio_cues: AudioCueConfig::default(),
            persist_debounce_ms: 300,
            default_theme: Theme::System,
            share_base_url: "https://teamtrack.app".into(),
            match_track: None,
        }
    }
}

impl AppSettings {
    pub fn persist_debounce(&self) -> Duration {
        Duration::from_millis(self.persist_debounce_ms)
    }
}

pub struct SettingsStore {
    path: PathBuf,
    data: RwLock<AppSettings>,
}

impl SettingsStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("Failed to read settings from {}", path.display()))?;
            serde_json::from_str(&contents).unwrap_or_else(|err| {
                log_warn!("Ignoring unreadable settings in {}: {}", path.display(), err);
                AppSettings::default()
            })
        } else {
            AppSettings::default()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn in_dir(dir: &Path) -> Result<Self> {
        Self::new(dir.join(SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn settings(&self) -> AppSettings {
        self.read().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut AppSettings)) -> Result<AppSettings> {
        let mut guard = self.write();
        let mut next = guard.clone();
        apply(&mut next);
        self.persist(&next)?;
        *guard = next.clone();
        Ok(next)
    }

    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: AppSettings = serde_json::from_str(&contents)?;
        *self.write() = data;
        Ok(())
    }

    fn persist(&self, data: &AppSettings) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("Failed to write settings to {}", self.path.display()))
    }

    fn read(&self) -> RwLockReadGuard<'_, AppSettings> {
        match self.data.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<'_, AppSettings> {
        match self.data.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(dir.path()).unwrap();
        assert_eq!(store.settings(), AppSettings::default());
        assert_eq!(store.settings().persist_debounce(), Duration::from_millis(300));
    }

    #[test]
    fn updates_survive_a_reload() {
        let dir = tempfile::tempdir().unwrap();
        let store = SettingsStore::in_dir(dir.path()).unwrap();
        store
            .update(|s| {
                s.default_theme = Theme::Dark;
                s.audio_cues.teleop_base = 40.0;
            })
            .unwrap();

        let reopened = SettingsStore::in_dir(dir.path()).unwrap();
        assert_eq!(reopened.settings().default_theme, Theme::Dark);
        assert_eq!(reopened.settings().audio_cues.teleop_base, 40.0);
    }

    #[test]
    fn partial_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(SETTINGS_FILE);

        fs::write(&path, r#"{"persist_debounce_ms": 50}"#).unwrap();
        let store = SettingsStore::new(path.clone()).unwrap();
        assert_eq!(store.settings().persist_debounce_ms, 50);
        assert_eq!(store.settings().audio_cues, AudioCueConfig::default());

        fs::write(&path, "{not json").unwrap();
        assert_eq!(SettingsStore::new(path.clone()).unwrap().settings(), AppSettings::default());
        assert!(store.reload().is_err());
    }
}
