//! Per-device UI preferences kept in local storage.

use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::storage::{keys, KeyValueStore};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl Theme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }
}

impl FromStr for Theme {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            other => Err(format!("unknown theme '{other}'")),
        }
    }
}

pub struct Preferences {
    store: Arc<dyn KeyValueStore>,
    default_theme: Theme,
}

impl Preferences {
    pub fn new(store: Arc<dyn KeyValueStore>, default_theme: Theme) -> Self {
        Self {
            store,
            default_theme,
        }
    }

    /// Stored theme, or the configured default when unset or unreadable.
    pub fn theme(&self) -> Theme {
        self.store
            .get(keys::THEME)
            .ok()
            .flatten()
            .and_then(|raw| raw.parse().ok())
            .unwrap_or(self.default_theme)
    }

    pub fn set_theme(&self, theme: Theme) -> Result<(), StorageError> {
        self.store.set(keys::THEME, theme.as_str())
    }

    fn seen_key(flag: &str) -> String {
        format!("{}{}", keys::SEEN_PREFIX, flag)
    }

    /// One-time hints (tutorials, what's-new) the user has dismissed.
    pub fn has_seen(&self, flag: &str) -> bool {
        matches!(self.store.get(&Self::seen_key(flag)), Ok(Some(_)))
    }

    pub fn mark_seen(&self, flag: &str) -> Result<(), StorageError> {
        self.store.set(&Self::seen_key(flag), "1")
    }

    pub fn reset_seen(&self) -> Result<usize, StorageError> {
        let seen: Vec<String> = self
            .store
            .keys()?
            .into_iter()
            .filter(|key| key.starts_with(keys::SEEN_PREFIX))
            .collect();
        for key in &seen {
            self.store.remove(key)?;
        }
        Ok(seen.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;

    #[test]
    fn theme_falls_back_to_default() {
        let store = Arc::new(MemoryStorage::new());
        let prefs = Preferences::new(store.clone(), Theme::Dark);
        assert_eq!(prefs.theme(), Theme::Dark);

        prefs.set_theme(Theme::Light).unwrap();
        assert_eq!(prefs.theme(), Theme::Light);

        store.set(keys::THEME, "neon").unwrap();
        assert_eq!(prefs.theme(), Theme::Dark);
    }

    #[test]
    fn seen_flags() {
        let prefs = Preferences::new(Arc::new(MemoryStorage::new()), Theme::System);
        assert!(!prefs.has_seen("tutorial"));
        prefs.mark_seen("tutorial").unwrap();
        prefs.mark_seen("whats-new").unwrap();
        assert!(prefs.has_seen("tutorial"));
        assert_eq!(prefs.reset_seen().unwrap(), 2);
        assert!(!prefs.has_seen("tutorial"));
    }
}
