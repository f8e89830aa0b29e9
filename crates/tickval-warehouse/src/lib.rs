//! # Tickval Warehouse
//!
//! DuckDB-backed local store for per-ticker analysis results.
//!
//! The warehouse is the development/test persistence backend: a single DuckDB file
//! under `TICKVAL_HOME` holding one row per `(exchange, ticker)`. Writes are upserts,
//! so replaying a result for the same key always leaves exactly one row.
//!
//! ```rust,no_run
//! use tickval_warehouse::{ResultRecord, Warehouse};
//!
//! let warehouse = Warehouse::open_default()?;
//! warehouse.upsert_result(&ResultRecord {
//!     exchange: "NYSE".to_string(),
//!     ticker: "IBM".to_string(),
//!     success: true,
//!     payload: Some(r#"{"fair_value":182.4}"#.to_string()),
//!     error: None,
//!     analyzed_at: "2026-10-16T09:30:00Z".to_string(),
//! })?;
//!
//! let done = warehouse.completed_tickers("NYSE")?;
//! assert!(done.contains(&"IBM".to_string()));
//! # Ok::<(), tickval_warehouse::WarehouseError>(())
//! ```
//!
//! ## Tables
//!
//! | Table | Description |
//! |-------|-------------|
//! | `analysis_results` | Latest result per exchange/ticker |
//! | `schema_migrations` | Applied migration versions |

pub mod migrations;
pub mod pool;

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use ::duckdb::ToSql;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use pool::{ConnectionPool, PooledConnection};

/// Errors that can occur during warehouse operations.
#[derive(Debug, Error)]
pub enum WarehouseError {
    /// `DuckDB` database error.
    #[error(transparent)]
    DuckDb(#[from] ::duckdb::Error),

    /// I/O error while preparing the database directory.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// A record was rejected before reaching the database.
    #[error("invalid record: {0}")]
    InvalidRecord(String),
}

impl WarehouseError {
    /// Whether retrying the same operation may succeed.
    ///
    /// File-system hiccups and lock/write conflicts are transient; anything touching the
    /// shape of the data is not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Io(_) => true,
            Self::InvalidRecord(_) => false,
            Self::DuckDb(error) => {
                let message = error.to_string().to_ascii_lowercase();
                TRANSIENT_MARKERS
                    .iter()
                    .any(|marker| message.contains(marker))
            }
        }
    }
}

const TRANSIENT_MARKERS: &[&str] = &[
    "io error",
    "could not set lock",
    "conflict",
    "database is locked",
    "resource temporarily unavailable",
];

/// Configuration for the warehouse database.
#[derive(Debug, Clone)]
pub struct WarehouseConfig {
    /// Root directory for tickval data.
    pub tickval_home: PathBuf,
    /// Path to the `DuckDB` database file.
    pub db_path: PathBuf,
    /// Maximum number of idle connections kept in the pool.
    pub max_pool_size: usize,
}

impl Default for WarehouseConfig {
    fn default() -> Self {
        let tickval_home = resolve_tickval_home();
        let db_path = tickval_home.join("results.duckdb");
        Self {
            tickval_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

impl WarehouseConfig {
    /// Configuration rooted at an explicit directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let tickval_home = dir.into();
        let db_path = tickval_home.join("results.duckdb");
        Self {
            tickval_home,
            db_path,
            max_pool_size: 4,
        }
    }
}

/// One persisted analysis outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub exchange: String,
    pub ticker: String,
    pub success: bool,
    /// Serialized JSON payload for successful analyses.
    pub payload: Option<String>,
    /// Error detail for failed analyses.
    pub error: Option<String>,
    /// RFC 3339 timestamp of the analysis.
    pub analyzed_at: String,
}

impl ResultRecord {
    fn validate(&self) -> Result<(), WarehouseError> {
        if self.exchange.trim().is_empty() {
            return Err(WarehouseError::InvalidRecord(String::from(
                "exchange must not be empty",
            )));
        }
        if self.ticker.trim().is_empty() {
            return Err(WarehouseError::InvalidRecord(String::from(
                "ticker must not be empty",
            )));
        }
        if self.success && self.payload.is_none() {
            return Err(WarehouseError::InvalidRecord(format!(
                "successful result for {}:{} has no payload",
                self.exchange, self.ticker
            )));
        }
        Ok(())
    }
}

/// Local result store backed by a `DuckDB` file.
#[derive(Clone)]
pub struct Warehouse {
    config: WarehouseConfig,
    pool: ConnectionPool,
}

impl Warehouse {
    /// Open a warehouse with default configuration.
    pub fn open_default() -> Result<Self, WarehouseError> {
        Self::open(WarehouseConfig::default())
    }

    /// Open a warehouse, creating the directory and applying migrations.
    pub fn open(config: WarehouseConfig) -> Result<Self, WarehouseError> {
        if let Some(parent) = config.db_path.parent() {
            fs::create_dir_all(parent)?;
        }

        let pool = ConnectionPool::open(config.db_path.clone(), config.max_pool_size)?;
        let warehouse = Self { config, pool };
        warehouse.initialize()?;
        Ok(warehouse)
    }

    fn initialize(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.checkout()?;
        migrations::apply_migrations(&connection)?;
        Ok(())
    }

    pub fn db_path(&self) -> &Path {
        self.pool.db_path()
    }

    pub fn config(&self) -> &WarehouseConfig {
        &self.config
    }

    /// Cheap reachability check.
    pub fn ping(&self) -> Result<(), WarehouseError> {
        let connection = self.pool.checkout()?;
        let _: i32 = connection.query_row("SELECT 1", [], |row| row.get(0))?;
        Ok(())
    }

    /// Insert or replace the result stored for `(exchange, ticker)`.
    ///
    /// Replaying the same record is a no-op apart from `updated_at`.
    pub fn upsert_result(&self, record: &ResultRecord) -> Result<(), WarehouseError> {
        record.validate()?;

        let connection = self.pool.checkout()?;
        let params: [&dyn ToSql; 6] = [
            &record.exchange,
            &record.ticker,
            &record.success,
            &record.payload,
            &record.error,
            &record.analyzed_at,
        ];
        connection.execute(
            "INSERT OR REPLACE INTO analysis_results \
             (exchange, ticker, success, payload, error, analyzed_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, CURRENT_TIMESTAMP)",
            params.as_slice(),
        )?;
        Ok(())
    }

    /// Fetch the stored result for `(exchange, ticker)`, if any.
    pub fn get_result(
        &self,
        exchange: &str,
        ticker: &str,
    ) -> Result<Option<ResultRecord>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let mut statement = connection.prepare(
            "SELECT exchange, ticker, success, payload, error, analyzed_at \
             FROM analysis_results WHERE exchange = ? AND ticker = ?",
        )?;
        let params: [&dyn ToSql; 2] = [&exchange, &ticker];
        let mut rows = statement.query(params.as_slice())?;

        match rows.next()? {
            Some(row) => Ok(Some(read_record(row)?)),
            None => Ok(None),
        }
    }

    /// Tickers whose latest stored result for `exchange` succeeded, sorted.
    pub fn completed_tickers(&self, exchange: &str) -> Result<Vec<String>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let mut statement = connection.prepare(
            "SELECT ticker FROM analysis_results \
             WHERE exchange = ? AND success = TRUE ORDER BY ticker",
        )?;
        let params: [&dyn ToSql; 1] = [&exchange];
        let mut rows = statement.query(params.as_slice())?;

        let mut tickers = Vec::new();
        while let Some(row) = rows.next()? {
            tickers.push(row.get(0)?);
        }
        Ok(tickers)
    }

    /// Every stored result for `exchange`, ordered by ticker.
    pub fn list_results(&self, exchange: &str) -> Result<Vec<ResultRecord>, WarehouseError> {
        let connection = self.pool.checkout()?;
        let mut statement = connection.prepare(
            "SELECT exchange, ticker, success, payload, error, analyzed_at \
             FROM analysis_results WHERE exchange = ? ORDER BY ticker",
        )?;
        let params: [&dyn ToSql; 1] = [&exchange];
        let mut rows = statement.query(params.as_slice())?;

        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(read_record(row)?);
        }
        Ok(records)
    }
}

fn read_record(row: &::duckdb::Row<'_>) -> Result<ResultRecord, ::duckdb::Error> {
    Ok(ResultRecord {
        exchange: row.get(0)?,
        ticker: row.get(1)?,
        success: row.get(2)?,
        payload: row.get(3)?,
        error: row.get(4)?,
        analyzed_at: row.get(5)?,
    })
}

/// Resolve the tickval home directory.
///
/// Priority:
/// 1. `TICKVAL_HOME`
/// 2. `$HOME/.tickval`
/// 3. `.tickval` in the current directory
fn resolve_tickval_home() -> PathBuf {
    if let Some(path) = env::var_os("TICKVAL_HOME") {
        let path = PathBuf::from(path);
        if !path.as_os_str().is_empty() {
            return path;
        }
    }

    if let Some(home) = env::var_os("HOME") {
        return PathBuf::from(home).join(".tickval");
    }

    PathBuf::from(".tickval")
}
