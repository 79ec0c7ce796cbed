//! SQLite storage engine for the reminder queue.
//!
//! # Responsibility
//! - Open and configure SQLite connections shared by repositories.
//! - Own the persistent schema and its forward-only migrations.
//!
//! # Invariants
//! - Applied versions are recorded in `schema_version`, one row per version.
//! - A connection is only handed out after every known migration is applied.
//! - A failed migration leaves the schema exactly as it was before startup.

use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod migrations;
mod open;

pub use open::{open_db, open_db_in_memory};

pub type DbResult<T> = Result<T, DbError>;

/// Storage engine failure.
#[derive(Debug)]
pub enum DbError {
    /// Driver-level failure outside of a specific migration step.
    Sqlite(rusqlite::Error),
    /// One migration step failed; the whole migration run was rolled back.
    MigrationFailed {
        version: u32,
        source: rusqlite::Error,
    },
    /// The database was written by a newer binary.
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::MigrationFailed { version, source } => {
                write!(f, "schema migration {version} failed: {source}")
            }
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::MigrationFailed { source, .. } => Some(source),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
