use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{debug, error, info};
use rusqlite::{Connection, Transaction};
use tokio::sync::{mpsc, oneshot};

use super::migrations::run_migrations;

/// Several CLI processes may share one database file.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type Job = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

#[derive(Debug, Clone, PartialEq, Eq)]
enum Location {
    File(PathBuf),
    Memory,
}

impl Location {
    fn open(&self) -> Result<Connection> {
        match self {
            Location::Memory => {
                Connection::open_in_memory().context("failed to open in-memory database")
            }
            Location::File(path) => {
                let conn = Connection::open(path)
                    .with_context(|| format!("failed to open {}", path.display()))?;
                conn.busy_timeout(BUSY_TIMEOUT)?;
                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                Ok(conn)
            }
        }
    }

    fn path(&self) -> &Path {
        match self {
            Location::File(path) => path,
            Location::Memory => Path::new(":memory:"),
        }
    }
}

struct Worker {
    jobs: Option<mpsc::UnboundedSender<Job>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for Worker {
    fn drop(&mut self) {
        // Closing the queue ends the worker loop once queued jobs are done.
        self.jobs.take();
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(handle) = handle {
            if let Err(err) = handle.join() {
                error!("Database worker panicked: {err:?}");
            }
        }
    }
}

/// SQLite connection owned by a dedicated thread. Jobs run there in
/// submission order; callers await the reply.
#[derive(Clone)]
pub struct Database {
    worker: Arc<Worker>,
    location: Arc<Location>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }
        Self::start(Location::File(db_path))
    }

    /// A private database that disappears with the last handle.
    pub fn in_memory() -> Result<Self> {
        Self::start(Location::Memory)
    }

    fn start(location: Location) -> Result<Self> {
        let (jobs_tx, mut jobs_rx) = mpsc::unbounded_channel::<Job>();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<()>>();
        let worker_location = location.clone();

        let thread = thread::Builder::new()
            .name("teamtrack-db".into())
            .spawn(move || {
                let opened = worker_location.open().and_then(|mut conn| {
                    conn.pragma_update(None, "foreign_keys", "ON")?;
                    run_migrations(&mut conn).context("failed to run database migrations")?;
                    Ok(conn)
                });
                let mut conn = match opened {
                    Ok(conn) => {
                        let _ = ready_tx.send(Ok(()));
                        conn
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Some(job) = jobs_rx.blocking_recv() {
                    job(&mut conn);
                }
                debug!("Database worker for {} stopped", worker_location.path().display());
            })
            .context("failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before it was ready")??;

        info!("Database ready at {}", location.path().display());

        Ok(Self {
            worker: Arc::new(Worker {
                jobs: Some(jobs_tx),
                thread: Mutex::new(Some(thread)),
            }),
            location: Arc::new(location),
        })
    }

    pub fn path(&self) -> &Path {
        self.location.path()
    }

    pub fn is_in_memory(&self) -> bool {
        *self.location == Location::Memory
    }

    /// Run `task` on the database thread.
    ///
    /// Dropping the returned future does not cancel a job that has already
    /// been queued; its result is discarded.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let jobs = self
            .worker
            .jobs
            .as_ref()
            .ok_or_else(|| anyhow!("database worker is shutting down"))?;
        let (reply_tx, reply_rx) = oneshot::channel();

        let job: Job = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                debug!("Database caller went away before the reply");
            }
        });
        jobs.send(job)
            .map_err(|_| anyhow!("database worker has stopped"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database worker dropped the job"))?
    }

    /// Like [`Database::execute`], inside a transaction that commits only
    /// when `task` succeeds.
    pub async fn transaction<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&Transaction<'_>) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            let value = task(&tx)?;
            tx.commit()?;
            Ok(value)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::bail;
    use rusqlite::params;

    async fn team_count(db: &Database) -> i64 {
        db.execute(|conn| Ok(conn.query_row("SELECT COUNT(*) FROM teams", [], |row| row.get(0))?))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn failed_transactions_roll_back() {
        let db = Database::in_memory().unwrap();
        assert!(db.is_in_memory());

        let result: Result<()> = db
            .transaction(|tx| {
                tx.execute(
                    "INSERT INTO teams (id, name, owner_id, created_at) VALUES (?1, ?2, ?3, ?4)",
                    params!["t1", "Robots", "alice", "2025-01-01T00:00:00Z"],
                )?;
                bail!("abort after insert")
            })
            .await;
        assert!(result.is_err());
        assert_eq!(team_count(&db).await, 0);
    }

    #[tokio::test]
    async fn file_databases_reopen_with_their_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("db.sqlite3");
        {
            let db = Database::new(path.clone()).unwrap();
            assert_eq!(db.path(), path.as_path());
            db.execute(|conn| {
                conn.execute(
                    "INSERT INTO teams (id, name, owner_id, created_at) VALUES ('t1', 'A', 'o', 'now')",
                    [],
                )?;
                Ok(())
            })
            .await
            .unwrap();
        }
        let reopened = Database::new(path).unwrap();
        assert_eq!(team_count(&reopened).await, 1);
    }
}
