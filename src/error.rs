//! Error types shared across the crate.
//!
//! Storage and gateway failures are typed so callers can tell a cancelled
//! request (always suppressed) from one that needs the user's attention.

use thiserror::Error;

/// Failures from on-device key-value storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Storage is disabled or could not be opened.
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    /// Writing the value would exceed the store's quota.
    #[error("storage quota exceeded writing '{key}' ({needed} bytes, limit {limit})")]
    QuotaExceeded {
        key: String,
        needed: usize,
        limit: usize,
    },
    #[error("failed to serialize value: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures at the remote data gateway boundary.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// The request was cancelled by its owner (unmount, shutdown, navigation).
    #[error("request aborted")]
    Aborted,
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid request: {0}")]
    Invalid(String),
    #[error("backend failure: {0:#}")]
    Backend(anyhow::Error),
}

impl GatewayError {
    /// Aborted requests are expected during teardown and never surface to the user.
    pub fn is_aborted(&self) -> bool {
        matches!(self, GatewayError::Aborted)
    }
}

impl From<anyhow::Error> for GatewayError {
    fn from(err: anyhow::Error) -> Self {
        GatewayError::Backend(err)
    }
}

/// Failures creating or resolving share links.
#[derive(Debug, Error)]
pub enum ShareError {
    #[error("not a share link: {0}")]
    InvalidLink(String),
    #[error("share payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("share payload is not a valid session: {0}")]
    Payload(#[from] serde_json::Error),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

/// Failures from the audio output.
#[derive(Debug, Error)]
pub enum AudioError {
    /// The output refused to start playback (autoplay policy, no device).
    #[error("playback rejected: {0}")]
    PlaybackRejected(String),
    #[error("audio device error: {0}")]
    Device(String),
}

/// Failures from session-level operations.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("no match at index {0}")]
    NoSuchMatch(usize),
    #[error("a match is already being edited")]
    EditInProgress,
    #[error("no match is being edited")]
    NotEditing,
    #[error("session is already completed")]
    Completed,
    #[error("operation not allowed: {0}")]
    InvalidState(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_the_aborted_kind_is_aborted() {
        assert!(GatewayError::Aborted.is_aborted());
        assert!(!GatewayError::NotFound("x".into()).is_aborted());
        assert!(!GatewayError::from(anyhow::anyhow!("boom")).is_aborted());
    }

    #[test]
    fn quota_message_names_the_key() {
        let err = StorageError::QuotaExceeded {
            key: "teamtrack.sessionData".into(),
            needed: 10,
            limit: 5,
        };
        assert!(err.to_string().contains("teamtrack.sessionData"));
    }
}
