//! Who is using the app: a signed-in account, or a guest identified by a
//! UUID generated on this device.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::StorageError;
use crate::log_info;
use crate::storage::{keys, KeyValueStore};

const ENABLE_LOGS: bool = true;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    User(String),
    Guest(String),
}

impl Principal {
    pub fn owner_id(&self) -> &str {
        match self {
            Principal::User(id) | Principal::Guest(id) => id,
        }
    }

    /// Guests cannot publish short share links.
    pub fn is_authenticated(&self) -> bool {
        matches!(self, Principal::User(_))
    }
}

pub struct Identity {
    store: Arc<dyn KeyValueStore>,
}

impl Identity {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// The device's guest id, created on first use.
    pub fn guest_id(&self) -> Result<String, StorageError> {
        if let Some(existing) = self.store.get(keys::GUEST_ID)? {
            if Uuid::parse_str(&existing).is_ok() {
                return Ok(existing);
            }
        }
        let id = Uuid::new_v4().to_string();
        self.store.set(keys::GUEST_ID, &id)?;
        log_info!("Created guest identity {}", id);
        Ok(id)
    }

    pub fn is_guest_mode(&self) -> bool {
        matches!(self.store.get(keys::GUEST_MODE), Ok(Some(flag)) if flag == "true")
    }

    pub fn set_guest_mode(&self, enabled: bool) -> Result<(), StorageError> {
        if enabled {
            self.store.set(keys::GUEST_MODE, "true")
        } else {
            self.store.remove(keys::GUEST_MODE)
        }
    }

    /// A signed-in user wins; otherwise guest mode yields the guest id.
    pub fn principal(&self, signed_in: Option<&str>) -> Result<Option<Principal>, StorageError> {
        if let Some(user) = signed_in.map(str::trim).filter(|user| !user.is_empty()) {
            return Ok(Some(Principal::User(user.to_string())));
        }
        if self.is_guest_mode() {
            return Ok(Some(Principal::Guest(self.guest_id()?)));
        }
        Ok(None)
    }
}
