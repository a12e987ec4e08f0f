//! On-device key-value storage.
//!
//! Mirrors the browser's local/session storage: string keys, string values,
//! synchronous access. [`MemoryStorage`] stands in for tab-scoped session
//! storage and for tests; [`FileStorage`] is the durable store.

mod file;
mod memory;

pub use file::FileStorage;
pub use memory::MemoryStorage;

use crate::error::StorageError;

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;
    fn keys(&self) -> Result<Vec<String>, StorageError>;

    fn contains(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.get(key)?.is_some())
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStore for std::sync::Arc<T> {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        (**self).remove(key)
    }

    fn keys(&self) -> Result<Vec<String>, StorageError> {
        (**self).keys()
    }
}

/// Storage key names. Everything the crate writes lives under this prefix.
pub mod keys {
    pub const PREFIX: &str = "teamtrack.";

    pub const SESSION_DATA: &str = "teamtrack.sessionData";
    pub const SCHEMA_VERSION: &str = "teamtrack.schemaVersion";
    pub const SESSION_TIMER: &str = "teamtrack.sessionTimer";
    pub const MATCH_TIMER: &str = "teamtrack.matchTimer";
    pub const MATCH_STATE: &str = "teamtrack.matchState";
    pub const START_TIMESTAMPS: &str = "teamtrack.startTimestamps";

    pub const THEME: &str = "teamtrack.theme";
    pub const GUEST_ID: &str = "teamtrack.guestId";
    pub const GUEST_MODE: &str = "teamtrack.guestMode";
    pub const SEEN_PREFIX: &str = "teamtrack.seen.";

    /// Lives in session (tab-scoped) storage, not local storage.
    pub const AUDIO_STATE: &str = "teamtrack.audioState";

    /// Keys owned by the in-progress session; removed together on clear.
    pub const SESSION_KEYS: [&str; 6] = [
        SESSION_DATA,
        SCHEMA_VERSION,
        SESSION_TIMER,
        MATCH_TIMER,
        MATCH_STATE,
        START_TIMESTAMPS,
    ];
}
