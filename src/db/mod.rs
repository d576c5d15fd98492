//! SQLite storage for the task board.
//!
//! One connection behind a mutex holds four tables:
//! - `accounts`: sign-in accounts, unique by email and by linked external id
//! - `tasks`: tasks owned by one account, removed with it
//! - `sessions`: cookie session tokens with an expiry
//! - `oauth_states`: single-use state values for the provider round trip
//!
//! Queries live in the submodules as `impl Database` blocks and return `anyhow::Result`.

pub mod accounts;
pub mod sessions;
pub mod stats;
pub mod tasks;

use anyhow::{Result, anyhow};
use rusqlite::Connection;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

mod embedded {
    use refinery::embed_migrations;
    embed_migrations!("migrations");
}

/// Tasks and sessions cascade from their account only while foreign keys are on.
const FILE_PRAGMAS: &str = "PRAGMA journal_mode=WAL;
     PRAGMA foreign_keys=ON;
     PRAGMA busy_timeout=5000;";

const MEMORY_PRAGMAS: &str = "PRAGMA foreign_keys=ON;";

/// Shared handle to the task board database. Cloning shares the connection.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the database file and bring its schema up to date.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_connection(Connection::open(path)?, FILE_PRAGMAS)
    }

    /// Fresh in-memory database with the full schema, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, MEMORY_PRAGMAS)
    }

    fn from_connection(conn: Connection, pragmas: &str) -> Result<Self> {
        conn.execute_batch(pragmas)?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("database connection mutex poisoned"))
    }

    fn run_migrations(&self) -> Result<()> {
        let mut conn = self.lock()?;
        let report = embedded::migrations::runner().run(&mut *conn)?;
        for migration in report.applied_migrations() {
            tracing::debug!(version = migration.version(), name = migration.name(), "Applied migration");
        }
        Ok(())
    }

    /// Run read queries or single statements on the connection.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&Connection) -> Result<T>,
    {
        let conn = self.lock()?;
        f(&conn)
    }

    /// Run work that needs a transaction, such as session creation with expiry sweep.
    pub fn with_conn_mut<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T>,
    {
        let mut conn = self.lock()?;
        f(&mut conn)
    }
}

/// Milliseconds since the epoch; every `created_at`/`updated_at`/`expires_at` column uses it.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
