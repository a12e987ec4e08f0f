use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::gateway::{
    connection::Database,
    helpers::{format_datetime, from_json, parse_datetime, to_json},
};
use crate::models::{RemoteSession, SessionFormData};

const SESSION_COLUMNS: &str = "id, owner_id, team_id, data, created_at, updated_at";

fn row_to_session(row: &Row) -> Result<RemoteSession> {
    let data: String = row.get("data")?;
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;

    Ok(RemoteSession {
        id: row.get("id")?,
        owner_id: row.get("owner_id")?,
        team_id: row.get("team_id")?,
        data: from_json(&data, "data")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        updated_at: parse_datetime(&updated_at, "updated_at")?,
    })
}

fn query_sessions(conn: &Connection, filter: &str, key: &str) -> Result<Vec<RemoteSession>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SESSION_COLUMNS} FROM sessions
         WHERE {filter} = ?1
         ORDER BY updated_at DESC, created_at DESC"
    ))?;
    let mut rows = stmt.query(params![key])?;
    let mut sessions = Vec::new();
    while let Some(row) = rows.next()? {
        sessions.push(row_to_session(row)?);
    }
    Ok(sessions)
}

pub(crate) fn select_session(conn: &Connection, id: &str) -> Result<Option<RemoteSession>> {
    let mut stmt = conn.prepare(&format!("SELECT {SESSION_COLUMNS} FROM sessions WHERE id = ?1"))?;
    let mut rows = stmt.query(params![id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_session(row)?)),
        None => Ok(None),
    }
}

impl Database {
    pub async fn insert_session(&self, session: &RemoteSession) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT INTO sessions (id, owner_id, team_id, data, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    record.id,
                    record.owner_id,
                    record.team_id,
                    to_json(&record.data, "data")?,
                    format_datetime(record.created_at),
                    format_datetime(record.updated_at),
                ],
            )?;
            Ok(())
        })
        .await
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<RemoteSession>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| select_session(conn, &session_id))
            .await
    }

    /// Replace the stored form data. Returns the updated row, or `None`
    /// when no session has that id.
    pub async fn update_session_data(
        &self,
        session_id: &str,
        data: &SessionFormData,
        updated_at: DateTime<Utc>,
    ) -> Result<Option<RemoteSession>> {
        let session_id = session_id.to_string();
        let data = data.clone();
        self.execute(move |conn| {
            let changed = conn.execute(
                "UPDATE sessions SET data = ?1, updated_at = ?2 WHERE id = ?3",
                params![
                    to_json(&data, "data")?,
                    format_datetime(updated_at),
                    session_id,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            select_session(conn, &session_id)
        })
        .await
    }

    /// Returns the deleted row's team, if the row existed.
    pub async fn delete_session(&self, session_id: &str) -> Result<Option<Option<String>>> {
        let session_id = session_id.to_string();
        self.transaction(move |tx| {
            let team: Option<Option<String>> = tx
                .query_row(
                    "SELECT team_id FROM sessions WHERE id = ?1",
                    params![session_id],
                    |row| row.get(0),
                )
                .optional()?;
            if team.is_some() {
                tx.execute("DELETE FROM sessions WHERE id = ?1", params![session_id])?;
            }
            Ok(team)
        })
        .await
    }

    pub async fn list_sessions_by_owner(&self, owner_id: &str) -> Result<Vec<RemoteSession>> {
        let owner_id = owner_id.to_string();
        self.execute(move |conn| query_sessions(conn, "owner_id", &owner_id))
            .await
    }

    pub async fn list_sessions_by_team(&self, team_id: &str) -> Result<Vec<RemoteSession>> {
        let team_id = team_id.to_string();
        self.execute(move |conn| query_sessions(conn, "team_id", &team_id))
            .await
    }
}
