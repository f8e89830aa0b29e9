//! Small `DuckDB` connection pool.
//!
//! One database instance is opened per pool; additional connections are cloned from it
//! so every checkout shares the same file handle and write-ahead log.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ::duckdb::Connection;

struct PoolState {
    primary: Connection,
    idle: Vec<Connection>,
}

struct PoolInner {
    db_path: PathBuf,
    max_idle: usize,
    state: Mutex<PoolState>,
}

/// Shared handle to the pool; cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Opens the database file and builds a pool around it.
    ///
    /// # Errors
    /// Returns the `DuckDB` error when the file cannot be opened or configured.
    pub fn open(db_path: impl Into<PathBuf>, max_idle: usize) -> Result<Self, ::duckdb::Error> {
        let db_path = db_path.into();
        let primary = Connection::open(db_path.as_path())?;
        primary.execute_batch("PRAGMA disable_progress_bar;")?;

        Ok(Self {
            inner: Arc::new(PoolInner {
                db_path,
                max_idle: max_idle.max(1),
                state: Mutex::new(PoolState {
                    primary,
                    idle: Vec::new(),
                }),
            }),
        })
    }

    /// Checks out an idle connection, cloning a new one when none is parked.
    ///
    /// # Errors
    /// Returns the `DuckDB` error when a new connection cannot be created.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    pub fn checkout(&self) -> Result<PooledConnection, ::duckdb::Error> {
        let mut state = self
            .inner
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        let connection = match state.idle.pop() {
            Some(connection) => connection,
            None => state.primary.try_clone()?,
        };
        drop(state);

        Ok(PooledConnection {
            pool: Arc::clone(&self.inner),
            connection: Some(connection),
        })
    }

    #[must_use]
    pub fn db_path(&self) -> &Path {
        self.inner.db_path.as_path()
    }

    /// Number of connections currently parked in the pool.
    ///
    /// # Panics
    /// Panics if the pool mutex is poisoned.
    #[must_use]
    pub fn idle_count(&self) -> usize {
        self.inner
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned")
            .idle
            .len()
    }
}

/// A checked-out connection; returns itself to the pool on drop.
pub struct PooledConnection {
    pool: Arc<PoolInner>,
    connection: Option<Connection>,
}

impl Deref for PooledConnection {
    type Target = Connection;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("pooled connection already returned")
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        let mut state = self
            .pool
            .state
            .lock()
            .expect("duckdb connection pool mutex poisoned");
        if state.idle.len() < self.pool.max_idle {
            state.idle.push(connection);
        }
    }
}
