use base64::{
    engine::general_purpose::{STANDARD_NO_PAD, URL_SAFE_NO_PAD},
    Engine,
};
use rand::{distributions::Alphanumeric, Rng};

use crate::error::ShareError;
use crate::gateway::Gateway;
use crate::log_debug;
use crate::models::SessionFormData;

const ENABLE_LOGS: bool = true;

pub const SHORT_ID_LEN: usize = 7;
const SHORT_PATH: &str = "/s/";
const EMBEDDED_PATH: &str = "/s?";
const DATA_PARAM: &str = "data=";

/// What a share URL points at.
#[derive(Debug, Clone, PartialEq)]
pub enum ShareLink {
    /// Snapshot stored by the gateway under a short id.
    Short(String),
    /// The whole session carried in the URL.
    Embedded(Box<SessionFormData>),
}

pub fn generate_short_id() -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(SHORT_ID_LEN)
        .map(char::from)
        .collect()
}

fn is_short_id(candidate: &str) -> bool {
    candidate.len() == SHORT_ID_LEN && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

/// The read-only copy that leaves the device: no edit state, no remote id.
fn shareable(session: &SessionFormData) -> SessionFormData {
    let mut copy = session.clone();
    if let Some(editing) = copy.editing.take() {
        copy.draft = editing.stashed_draft;
    }
    copy.remote_id = None;
    copy
}

pub fn short_link(base_url: &str, short_id: &str) -> String {
    format!("{}{}{}", base_url.trim_end_matches('/'), SHORT_PATH, short_id)
}

pub fn embedded_link(base_url: &str, session: &SessionFormData) -> Result<String, ShareError> {
    let payload = serde_json::to_vec(&shareable(session))?;
    Ok(format!(
        "{}{}{}{}",
        base_url.trim_end_matches('/'),
        EMBEDDED_PATH,
        DATA_PARAM,
        URL_SAFE_NO_PAD.encode(payload)
    ))
}

fn decode_payload(raw: &str) -> Result<SessionFormData, ShareError> {
    // tolerate padding and the standard alphabet from older links
    let cleaned = raw.replace("%3D", "=").replace("%3d", "=").replace(' ', "+");
    let trimmed = cleaned.trim_end_matches('=');
    let bytes = match URL_SAFE_NO_PAD.decode(trimmed) {
        Ok(bytes) => bytes,
        Err(_) => STANDARD_NO_PAD.decode(trimmed)?,
    };
    Ok(serde_json::from_slice(&bytes)?)
}

pub fn parse_link(url: &str) -> Result<ShareLink, ShareError> {
    let url = url.trim();
    let without_fragment = url.split('#').next().unwrap_or(url);

    if let Some(pos) = without_fragment.find(EMBEDDED_PATH) {
        let query = &without_fragment[pos + EMBEDDED_PATH.len()..];
        let data = query
            .split('&')
            .find_map(|pair| pair.strip_prefix(DATA_PARAM))
            .ok_or_else(|| ShareError::InvalidLink(url.to_string()))?;
        return Ok(ShareLink::Embedded(Box::new(decode_payload(data)?)));
    }

    if let Some(pos) = without_fragment.rfind(SHORT_PATH) {
        let rest = &without_fragment[pos + SHORT_PATH.len()..];
        let id = rest.split(['?', '/']).next().unwrap_or_default();
        if is_short_id(id) {
            return Ok(ShareLink::Short(id.to_string()));
        }
    }

    Err(ShareError::InvalidLink(url.to_string()))
}

/// Short link when signed in, embedded link otherwise.
pub async fn create_share_link(
    gateway: &Gateway,
    owner_id: Option<&str>,
    base_url: &str,
    session: &SessionFormData,
) -> Result<String, ShareError> {
    match owner_id {
        Some(owner_id) => {
            let shared = gateway
                .create_shared_session(owner_id, &shareable(session))
                .await?;
            Ok(short_link(base_url, &shared.short_id))
        }
        None => {
            log_debug!("No signed-in owner; embedding the session in the link");
            embedded_link(base_url, session)
        }
    }
}

/// Turn a share URL back into a session.
pub async fn resolve_link(gateway: &Gateway, url: &str) -> Result<SessionFormData, ShareError> {
    match parse_link(url)? {
        ShareLink::Embedded(session) => Ok(*session),
        ShareLink::Short(short_id) => gateway
            .get_shared_session(&short_id)
            .await?
            .map(|shared| shared.data)
            .ok_or_else(|| ShareError::InvalidLink(format!("no shared session {short_id}"))),
    }
}
