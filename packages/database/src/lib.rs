#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! `DuckDB` storage for foundation geography and scoring.
//!
//! A single [`FoundationDb`] file holds the filing tables populated by the
//! upstream 990-PF ETL (`filer`, `grants`, `key_contacts`,
//! `grant_semantic_score`), the ZIP reference data, and the tables this
//! engine writes (`grant_geo_score`, `grant_analysis_results`). It
//! implements every storage trait the geo engine and scorer consume.

pub mod geo_scores;
pub mod paths;
pub mod scores;
pub mod zip_coordinates;

use std::path::Path;

use duckdb::Connection;

/// Errors that can occur during database operations.
#[derive(Debug, thiserror::Error)]
pub enum DbError {
    /// `DuckDB` query error.
    #[error("Database error: {0}")]
    Duckdb(#[from] duckdb::Error),

    /// Filesystem error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV reference-data parse error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// Data conversion error.
    #[error("Data conversion error: {message}")]
    Conversion {
        /// Description of what went wrong.
        message: String,
    },
}

/// Handle to the foundation `DuckDB`.
pub struct FoundationDb {
    conn: Connection,
}

impl FoundationDb {
    /// Opens (or creates) the database at `path` and ensures the schema
    /// exists.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            paths::ensure_dir(parent)?;
        }

        let conn = Connection::open(path)?;
        conn.execute_batch("SET threads = 4; SET memory_limit = '1GB';")?;

        Self::from_connection(conn)
    }

    /// Opens the database at the default path.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if the connection or schema creation fails.
    pub fn open_default() -> Result<Self, DbError> {
        Self::open(&paths::default_db_path())
    }

    /// Opens a throwaway in-memory database with the full schema.
    ///
    /// # Errors
    ///
    /// Returns [`DbError`] if schema creation fails.
    pub fn open_in_memory() -> Result<Self, DbError> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self, DbError> {
        create_schema(&conn)?;
        Ok(Self { conn })
    }

    /// The underlying connection.
    #[must_use]
    pub const fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs `f` inside a transaction, rolling back if it fails.
    fn in_transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DbError>,
    ) -> Result<T, DbError> {
        self.conn.execute_batch("BEGIN TRANSACTION")?;
        match f(&self.conn) {
            Ok(value) => {
                self.conn.execute_batch("COMMIT")?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = self.conn.execute_batch("ROLLBACK") {
                    log::error!("Rollback failed: {rollback}");
                }
                Err(e)
            }
        }
    }
}

fn create_schema(conn: &Connection) -> Result<(), DbError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS filer (
            ein TEXT PRIMARY KEY,
            name TEXT,
            zipcode TEXT,
            state TEXT
        );

        CREATE TABLE IF NOT EXISTS grants (
            ein TEXT NOT NULL,
            zipcode TEXT,
            amount DOUBLE,
            purpose TEXT
        );

        CREATE TABLE IF NOT EXISTS key_contacts (
            ein TEXT NOT NULL,
            zipcode TEXT,
            title TEXT
        );

        CREATE TABLE IF NOT EXISTS grant_semantic_score (
            ein TEXT NOT NULL,
            similarity_score DOUBLE
        );

        CREATE TABLE IF NOT EXISTS zip_coordinates (
            zipcode TEXT PRIMARY KEY,
            latitude DOUBLE NOT NULL,
            longitude DOUBLE NOT NULL
        );

        CREATE TABLE IF NOT EXISTS unknown_zipcodes (
            zipcode TEXT PRIMARY KEY,
            first_seen TIMESTAMPTZ DEFAULT CURRENT_TIMESTAMP
        );

        CREATE TABLE IF NOT EXISTS grant_geo_score (
            ein TEXT PRIMARY KEY,
            grant_count BIGINT,
            grant_resolved BIGINT,
            latitude DOUBLE,
            longitude DOUBLE,
            deviation DOUBLE,
            filer_to_centroid DOUBLE,
            key_count BIGINT,
            key_resolved BIGINT,
            key_latitude DOUBLE,
            key_longitude DOUBLE,
            key_deviation DOUBLE,
            filer_to_key_centroid DOUBLE
        );

        CREATE TABLE IF NOT EXISTS grant_analysis_results (
            ein TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            score DOUBLE NOT NULL,
            semantic_similarity DOUBLE,
            total_relevant_grants BIGINT NOT NULL,
            avg_grant_size DOUBLE NOT NULL,
            geographic_coverage DOUBLE,
            grant_center TEXT,
            distance_to_target DOUBLE,
            scored_date TIMESTAMP NOT NULL,
            run_id TEXT NOT NULL
        );",
    )?;

    Ok(())
}

/// Converts a stored count to `u32`, saturating on out-of-range values.
fn count_u32(value: i64) -> u32 {
    u32::try_from(value.max(0)).unwrap_or(u32::MAX)
}
