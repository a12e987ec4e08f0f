use anyhow::{bail, Result};
use rusqlite::{params, OptionalExtension, Row};

use crate::export::share::generate_short_id;
use crate::gateway::{
    connection::Database,
    helpers::{format_datetime, from_json, parse_datetime, to_json},
};
use crate::models::{SessionFormData, SharedSession};

/// Fresh ids tried before giving up on a share.
const MAX_ID_ATTEMPTS: usize = 5;

fn row_to_shared(row: &Row) -> Result<SharedSession> {
    let data: String = row.get("data")?;
    let created_at: String = row.get("created_at")?;

    Ok(SharedSession {
        short_id: row.get("short_id")?,
        owner_id: row.get("owner_id")?,
        data: from_json(&data, "data")?,
        created_at: parse_datetime(&created_at, "created_at")?,
    })
}

impl Database {
    /// Store a read-only copy under a new short id. `next_id` is asked for
    /// candidates until one is unused.
    pub async fn insert_shared_session_with<F>(
        &self,
        owner_id: &str,
        data: &SessionFormData,
        mut next_id: F,
    ) -> Result<SharedSession>
    where
        F: FnMut() -> String + Send + 'static,
    {
        let owner_id = owner_id.to_string();
        let data = data.clone();
        self.execute(move |conn| {
            let created_at = chrono::Utc::now();
            let payload = to_json(&data, "data")?;
            for _ in 0..MAX_ID_ATTEMPTS {
                let short_id = next_id();
                let taken: Option<i64> = conn
                    .query_row(
                        "SELECT 1 FROM shared_sessions WHERE short_id = ?1",
                        params![short_id],
                        |row| row.get(0),
                    )
                    .optional()?;
                if taken.is_some() {
                    continue;
                }
                conn.execute(
                    "INSERT INTO shared_sessions (short_id, owner_id, data, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![short_id, owner_id, payload, format_datetime(created_at)],
                )?;
                return Ok(SharedSession {
                    short_id,
                    owner_id,
                    data,
                    created_at,
                });
            }
            bail!("no free share id after {MAX_ID_ATTEMPTS} attempts")
        })
        .await
    }

    pub async fn insert_shared_session(
        &self,
        owner_id: &str,
        data: &SessionFormData,
    ) -> Result<SharedSession> {
        self.insert_shared_session_with(owner_id, data, generate_short_id)
            .await
    }

    pub async fn get_shared_session(&self, short_id: &str) -> Result<Option<SharedSession>> {
        let short_id = short_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT short_id, owner_id, data, created_at
                 FROM shared_sessions WHERE short_id = ?1",
            )?;
            let mut rows = stmt.query(params![short_id])?;
            match rows.next()? {
                Some(row) => Ok(Some(row_to_shared(row)?)),
                None => Ok(None),
            }
        })
        .await
    }
}
