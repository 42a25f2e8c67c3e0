use std::{
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
    time::Duration,
};

use anyhow::{anyhow, Context, Result};
use log::{error, info};
use rusqlite::Connection;
use tokio::sync::oneshot;

use super::migrations::run_migrations;

const WORKER_THREAD_NAME: &str = "flowtrace-store";
// Producers and the report command may open the same file concurrently.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

type StoreJob = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum StoreCommand {
    Run(StoreJob),
    Close,
}

struct StoreWorker {
    jobs: mpsc::Sender<StoreCommand>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for StoreWorker {
    fn drop(&mut self) {
        let handle = match self.thread.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        let Some(handle) = handle else {
            return;
        };

        if let Err(err) = self.jobs.send(StoreCommand::Close) {
            error!("Failed to ask event store thread to close: {err}");
        }
        if let Err(join_err) = handle.join() {
            error!("Failed to join event store thread: {join_err:?}");
        }
    }
}

fn open_store(path: &Path) -> Result<Connection> {
    let mut conn = Connection::open(path)
        .with_context(|| format!("failed to open SQLite event store at {}", path.display()))?;
    conn.busy_timeout(BUSY_TIMEOUT)
        .context("failed to set busy timeout")?;
    if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
        error!("Failed to enable WAL mode: {err}");
    }
    conn.pragma_update(None, "foreign_keys", "ON")
        .context("failed to enable foreign keys")?;
    run_migrations(&mut conn).context("failed to run event store migrations")?;
    Ok(conn)
}

fn serve(path: PathBuf, ready: mpsc::Sender<Result<()>>, jobs: mpsc::Receiver<StoreCommand>) {
    let mut conn = match open_store(&path) {
        Ok(conn) => conn,
        Err(err) => {
            let _ = ready.send(Err(err));
            return;
        }
    };
    if ready.send(Ok(())).is_err() {
        error!("Event store opener went away before the store was ready");
        return;
    }

    while let Ok(command) = jobs.recv() {
        match command {
            StoreCommand::Run(job) => job(&mut conn),
            StoreCommand::Close => break,
        }
    }
    info!("Event store thread shutting down");
}

/// Local event store. A single worker thread owns the SQLite connection;
/// async callers hand it closures through `execute`.
#[derive(Clone)]
pub struct Database {
    worker: Arc<StoreWorker>,
    path: Arc<PathBuf>,
}

impl Database {
    /// Open (creating if needed) the store at `path` and bring its schema up
    /// to date before returning.
    pub fn new(path: PathBuf) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create event store directory {}", parent.display())
            })?;
        }

        let (jobs_tx, jobs_rx) = mpsc::channel();
        let (ready_tx, ready_rx) = mpsc::channel();
        let worker_path = path.clone();
        let thread = thread::Builder::new()
            .name(WORKER_THREAD_NAME.into())
            .spawn(move || serve(worker_path, ready_tx, jobs_rx))
            .context("failed to spawn event store worker thread")?;

        ready_rx
            .recv()
            .context("event store worker exited before signaling readiness")??;
        info!("Event store opened at {}", path.display());

        Ok(Self {
            worker: Arc::new(StoreWorker {
                jobs: jobs_tx,
                thread: Mutex::new(Some(thread)),
            }),
            path: Arc::new(path),
        })
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// Run `task` on the store thread and wait for its result.
    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let job: StoreJob = Box::new(move |conn| {
            if reply_tx.send(task(conn)).is_err() {
                error!("Event store caller dropped before receiving result");
            }
        });

        self.worker
            .jobs
            .send(StoreCommand::Run(job))
            .map_err(|err| anyhow!("event store thread is gone: {err}"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("event store thread terminated unexpectedly"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn opens_nested_path_and_runs_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("events.db");
        let store = Database::new(path.clone()).unwrap();
        assert_eq!(store.path(), path.as_path());

        let tables: i64 = store
            .execute(|conn| {
                Ok(conn.query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table'",
                    [],
                    |row| row.get(0),
                )?)
            })
            .await
            .unwrap();
        assert!(tables >= 3);
    }

    #[tokio::test]
    async fn job_errors_reach_the_caller() {
        let dir = tempfile::tempdir().unwrap();
        let store = Database::new(dir.path().join("events.db")).unwrap();
        let result: Result<()> = store
            .execute(|conn| {
                conn.execute_batch("SELECT * FROM no_such_table")?;
                Ok(())
            })
            .await;
        assert!(result.is_err());
    }
}
