use anyhow::Result;
use chrono::Utc;
use rusqlite::{params, Connection, Row};

use crate::gateway::{
    connection::Database,
    helpers::{format_datetime, parse_datetime},
};
use crate::models::Team;

fn row_to_team(conn: &Connection, row: &Row) -> Result<Team> {
    let id: String = row.get("id")?;
    let created_at: String = row.get("created_at")?;

    Ok(Team {
        member_ids: member_ids(conn, &id)?,
        name: row.get("name")?,
        owner_id: row.get("owner_id")?,
        created_at: parse_datetime(&created_at, "created_at")?,
        id,
    })
}

fn member_ids(conn: &Connection, team_id: &str) -> Result<Vec<String>> {
    let mut stmt = conn.prepare(
        "SELECT user_id FROM team_members
         WHERE team_id = ?1
         ORDER BY joined_at ASC, user_id ASC",
    )?;
    let mut rows = stmt.query(params![team_id])?;
    let mut members = Vec::new();
    while let Some(row) = rows.next()? {
        members.push(row.get(0)?);
    }
    Ok(members)
}

fn select_team(conn: &Connection, team_id: &str) -> Result<Option<Team>> {
    let mut stmt =
        conn.prepare("SELECT id, name, owner_id, created_at FROM teams WHERE id = ?1")?;
    let mut rows = stmt.query(params![team_id])?;
    match rows.next()? {
        Some(row) => Ok(Some(row_to_team(conn, row)?)),
        None => Ok(None),
    }
}

impl Database {
    /// Insert a team and enrol its owner as the first member.
    pub async fn insert_team(&self, team: &Team) -> Result<()> {
        let record = team.clone();
        self.transaction(move |tx| {
            let created_at = format_datetime(record.created_at);
            tx.execute(
                "INSERT INTO teams (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![record.id, record.name, record.owner_id, created_at],
            )?;
            for member in &record.member_ids {
                tx.execute(
                    "INSERT OR IGNORE INTO team_members (team_id, user_id, joined_at)
                     VALUES (?1, ?2, ?3)",
                    params![record.id, member, created_at],
                )?;
            }
            Ok(())
        })
        .await
    }

    pub async fn get_team(&self, team_id: &str) -> Result<Option<Team>> {
        let team_id = team_id.to_string();
        self.execute(move |conn| select_team(conn, &team_id)).await
    }

    pub async fn list_teams_for_member(&self, user_id: &str) -> Result<Vec<Team>> {
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.owner_id, t.created_at
                 FROM teams t
                 JOIN team_members m ON m.team_id = t.id
                 WHERE m.user_id = ?1
                 ORDER BY t.name COLLATE NOCASE ASC, t.created_at ASC",
            )?;
            let mut rows = stmt.query(params![user_id])?;
            let mut teams = Vec::new();
            while let Some(row) = rows.next()? {
                teams.push(row_to_team(conn, row)?);
            }
            Ok(teams)
        })
        .await
    }

    /// Returns the team after the change, or `None` when it does not exist.
    pub async fn add_team_member(&self, team_id: &str, user_id: &str) -> Result<Option<Team>> {
        let team_id = team_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            if select_team(conn, &team_id)?.is_none() {
                return Ok(None);
            }
            conn.execute(
                "INSERT OR IGNORE INTO team_members (team_id, user_id, joined_at)
                 VALUES (?1, ?2, ?3)",
                params![team_id, user_id, format_datetime(Utc::now())],
            )?;
            select_team(conn, &team_id)
        })
        .await
    }

    pub async fn remove_team_member(
        &self,
        team_id: &str,
        user_id: &str,
    ) -> Result<Option<Team>> {
        let team_id = team_id.to_string();
        let user_id = user_id.to_string();
        self.execute(move |conn| {
            conn.execute(
                "DELETE FROM team_members WHERE team_id = ?1 AND user_id = ?2",
                params![team_id, user_id],
            )?;
            select_team(conn, &team_id)
        })
        .await
    }

    /// Delete a team. Its sessions stay with their owners, detached.
    pub async fn delete_team(&self, team_id: &str) -> Result<bool> {
        let team_id = team_id.to_string();
        self.execute(move |conn| {
            let removed = conn.execute("DELETE FROM teams WHERE id = ?1", params![team_id])?;
            Ok(removed > 0)
        })
        .await
    }
}
