//! Remote data gateway: sessions, teams and share links.
//!
//! Backed by SQLite on a worker thread. Every call races the gateway's
//! [`CancellationToken`]; a cancelled call returns [`GatewayError::Aborted`]
//! which callers treat as silent.

pub mod connection;
mod helpers;
mod migrations;
mod repositories;

pub use connection::Database;

use std::collections::HashMap;
use std::future::Future;
use std::path::PathBuf;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use anyhow::Result as AnyResult;
use chrono::Utc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::GatewayError;
use crate::models::{RemoteSession, SessionFormData, SharedSession, Team};
use crate::{log_debug, log_error, log_info};

const ENABLE_LOGS: bool = true;

const TEAM_FEED_CAPACITY: usize = 16;

type TeamSnapshot = Vec<RemoteSession>;

/// Live view of a team's sessions, newest update first.
pub struct TeamFeed {
    pub current: TeamSnapshot,
    updates: broadcast::Receiver<TeamSnapshot>,
}

impl TeamFeed {
    /// Wait for the next snapshot. Returns `None` once the gateway is gone.
    /// A slow reader skips straight to the newest snapshot.
    pub async fn recv(&mut self) -> Option<TeamSnapshot> {
        loop {
            match self.updates.recv().await {
                Ok(snapshot) => {
                    self.current = snapshot.clone();
                    return Some(snapshot);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    log_debug!("Team feed skipped {} stale snapshots", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

#[derive(Default)]
struct Subscriptions {
    teams: StdMutex<HashMap<String, broadcast::Sender<TeamSnapshot>>>,
}

impl Subscriptions {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, broadcast::Sender<TeamSnapshot>>> {
        match self.teams.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[derive(Clone)]
pub struct Gateway {
    db: Database,
    subscriptions: Arc<Subscriptions>,
    cancel: CancellationToken,
}

/// Log a failed call: aborted requests at debug, everything else at error.
pub fn log_failure(operation: &str, err: &GatewayError) {
    if err.is_aborted() {
        log_debug!("{} aborted", operation);
    } else {
        log_error!("{} failed: {}", operation, err);
    }
}

fn or_default<T: Default>(operation: &str, result: Result<T, GatewayError>) -> T {
    result.unwrap_or_else(|err| {
        log_failure(operation, &err);
        T::default()
    })
}

impl Gateway {
    pub fn new(db: Database) -> Self {
        Self {
            db,
            subscriptions: Arc::new(Subscriptions::default()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn open(path: PathBuf) -> AnyResult<Self> {
        Ok(Self::new(Database::new(path)?))
    }

    pub fn in_memory() -> AnyResult<Self> {
        Ok(Self::new(Database::in_memory()?))
    }

    /// A handle sharing this gateway's database whose calls can be
    /// cancelled on their own. Cancelling the parent cancels the child.
    pub fn child(&self) -> Self {
        Self {
            db: self.db.clone(),
            subscriptions: self.subscriptions.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    async fn guard<T, F>(&self, call: F) -> Result<T, GatewayError>
    where
        F: Future<Output = AnyResult<T>>,
    {
        if self.cancel.is_cancelled() {
            return Err(GatewayError::Aborted);
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(GatewayError::Aborted),
            result = call => result.map_err(GatewayError::from),
        }
    }

    // sessions

    pub async fn create_session(
        &self,
        owner_id: &str,
        team_id: Option<&str>,
        data: &SessionFormData,
    ) -> Result<RemoteSession, GatewayError> {
        if owner_id.trim().is_empty() {
            return Err(GatewayError::Invalid("owner id is required".into()));
        }
        if let Some(team_id) = team_id {
            let team = self
                .get_team(team_id)
                .await?
                .ok_or_else(|| GatewayError::NotFound(format!("team {team_id}")))?;
            if !team.is_member(owner_id) {
                return Err(GatewayError::Invalid(format!(
                    "{owner_id} is not a member of team {team_id}"
                )));
            }
        }

        let now = Utc::now();
        let mut record_data = data.clone();
        let id = Uuid::new_v4().to_string();
        record_data.remote_id = Some(id.clone());
        let record = RemoteSession {
            id,
            owner_id: owner_id.to_string(),
            team_id: team_id.map(str::to_string),
            data: record_data,
            created_at: now,
            updated_at: now,
        };

        self.guard(self.db.insert_session(&record)).await?;
        log_info!("Created remote session {}", record.id);
        self.publish_team(record.team_id.as_deref()).await;
        Ok(record)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<RemoteSession>, GatewayError> {
        self.guard(self.db.get_session(session_id)).await
    }

    pub async fn update_session(
        &self,
        session_id: &str,
        data: &SessionFormData,
    ) -> Result<RemoteSession, GatewayError> {
        let mut data = data.clone();
        data.remote_id = Some(session_id.to_string());
        let updated = self
            .guard(self.db.update_session_data(session_id, &data, Utc::now()))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("session {session_id}")))?;
        self.publish_team(updated.team_id.as_deref()).await;
        Ok(updated)
    }

    /// Returns false when there was nothing to delete.
    pub async fn delete_session(&self, session_id: &str) -> Result<bool, GatewayError> {
        match self.guard(self.db.delete_session(session_id)).await? {
            Some(team_id) => {
                self.publish_team(team_id.as_deref()).await;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    pub async fn list_sessions_by_owner(
        &self,
        owner_id: &str,
    ) -> Result<Vec<RemoteSession>, GatewayError> {
        self.guard(self.db.list_sessions_by_owner(owner_id)).await
    }

    pub async fn list_sessions_by_team(
        &self,
        team_id: &str,
    ) -> Result<Vec<RemoteSession>, GatewayError> {
        self.guard(self.db.list_sessions_by_team(team_id)).await
    }

    pub async fn sessions_by_owner_or_default(&self, owner_id: &str) -> Vec<RemoteSession> {
        or_default("list sessions", self.list_sessions_by_owner(owner_id).await)
    }

    pub async fn sessions_by_team_or_default(&self, team_id: &str) -> Vec<RemoteSession> {
        or_default("list team sessions", self.list_sessions_by_team(team_id).await)
    }

    pub async fn session_or_default(&self, session_id: &str) -> Option<RemoteSession> {
        or_default("get session", self.get_session(session_id).await)
    }

    // teams

    pub async fn create_team(&self, name: &str, owner_id: &str) -> Result<Team, GatewayError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(GatewayError::Invalid("team name is required".into()));
        }
        if owner_id.trim().is_empty() {
            return Err(GatewayError::Invalid("owner id is required".into()));
        }
        let team = Team {
            id: Uuid::new_v4().to_string(),
            name: name.to_string(),
            owner_id: owner_id.to_string(),
            member_ids: vec![owner_id.to_string()],
            created_at: Utc::now(),
        };
        self.guard(self.db.insert_team(&team)).await?;
        log_info!("Created team {} ({})", team.name, team.id);
        Ok(team)
    }

    pub async fn get_team(&self, team_id: &str) -> Result<Option<Team>, GatewayError> {
        self.guard(self.db.get_team(team_id)).await
    }

    pub async fn list_teams_for_member(&self, user_id: &str) -> Result<Vec<Team>, GatewayError> {
        self.guard(self.db.list_teams_for_member(user_id)).await
    }

    pub async fn teams_for_member_or_default(&self, user_id: &str) -> Vec<Team> {
        or_default("list teams", self.list_teams_for_member(user_id).await)
    }

    pub async fn add_member(&self, team_id: &str, user_id: &str) -> Result<Team, GatewayError> {
        if user_id.trim().is_empty() {
            return Err(GatewayError::Invalid("user id is required".into()));
        }
        self.guard(self.db.add_team_member(team_id, user_id))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("team {team_id}")))
    }

    /// The owner cannot leave their own team; delete it instead.
    pub async fn remove_member(&self, team_id: &str, user_id: &str) -> Result<Team, GatewayError> {
        let team = self
            .get_team(team_id)
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("team {team_id}")))?;
        if team.owner_id == user_id {
            return Err(GatewayError::Invalid(
                "the owner cannot be removed from a team".into(),
            ));
        }
        self.guard(self.db.remove_team_member(team_id, user_id))
            .await?
            .ok_or_else(|| GatewayError::NotFound(format!("team {team_id}")))
    }

    pub async fn delete_team(&self, team_id: &str) -> Result<bool, GatewayError> {
        let deleted = self.guard(self.db.delete_team(team_id)).await?;
        if deleted {
            // subscribers see the team's sessions detach
            self.publish_team(Some(team_id)).await;
            self.subscriptions.lock().remove(team_id);
        }
        Ok(deleted)
    }

    // share links

    pub async fn create_shared_session(
        &self,
        owner_id: &str,
        data: &SessionFormData,
    ) -> Result<SharedSession, GatewayError> {
        let shared = self
            .guard(self.db.insert_shared_session(owner_id, data))
            .await?;
        log_info!("Shared session as {}", shared.short_id);
        Ok(shared)
    }

    pub async fn get_shared_session(
        &self,
        short_id: &str,
    ) -> Result<Option<SharedSession>, GatewayError> {
        self.guard(self.db.get_shared_session(short_id)).await
    }

    // subscriptions

    /// Current sessions of a team plus every later snapshot, published
    /// after each write that touches the team.
    pub async fn subscribe_team(&self, team_id: &str) -> Result<TeamFeed, GatewayError> {
        let updates = {
            let mut teams = self.subscriptions.lock();
            teams
                .entry(team_id.to_string())
                .or_insert_with(|| broadcast::channel(TEAM_FEED_CAPACITY).0)
                .subscribe()
        };
        let current = self.list_sessions_by_team(team_id).await?;
        Ok(TeamFeed { current, updates })
    }

    async fn publish_team(&self, team_id: Option<&str>) {
        let Some(team_id) = team_id else {
            return;
        };
        let sender = {
            let mut teams = self.subscriptions.lock();
            match teams.get(team_id) {
                Some(sender) if sender.receiver_count() > 0 => sender.clone(),
                Some(_) => {
                    teams.remove(team_id);
                    return;
                }
                None => return,
            }
        };

        match self.list_sessions_by_team(team_id).await {
            Ok(snapshot) => {
                // no receivers left is not an error
                let _ = sender.send(snapshot);
            }
            Err(err) => log_failure("publish team sessions", &err),
        }
    }
}
