//! SQLite migration registry and executor.
//!
//! # Responsibility
//! - Register schema migrations in strictly increasing order.
//! - Apply pending migrations atomically and record each applied version.
//!
//! # Invariants
//! - `version` values must remain monotonic and are never reused.
//! - Version table creation, version lookup and every pending step share one
//!   transaction: either all pending versions land or none do.

use crate::db::{DbError, DbResult};
use crate::model::timestamp::format_timestamp;
use chrono::Utc;
use log::info;
use rusqlite::{params, Connection, Transaction, TransactionBehavior};

#[derive(Debug, Clone, Copy)]
struct Migration {
    version: u32,
    sql: &'static str,
}

const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        sql: include_str!("0001_init.sql"),
    },
    Migration {
        version: 2,
        sql: include_str!("0002_claim_indexes.sql"),
    },
];

const VERSION_TABLE_SQL: &str = "CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY NOT NULL,
    applied_at TEXT NOT NULL
);";

/// Returns the latest migration version known by this binary.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map_or(0, |migration| migration.version)
}

/// Returns the highest version recorded in `schema_version`.
///
/// A database without the version table reports `0`.
pub fn current_version(conn: &Connection) -> DbResult<u32> {
    let has_table: i64 = conn.query_row(
        "SELECT EXISTS(
            SELECT 1
            FROM sqlite_master
            WHERE type = 'table' AND name = 'schema_version'
        );",
        [],
        |row| row.get(0),
    )?;
    if has_table == 0 {
        return Ok(0);
    }
    recorded_version(conn)
}

/// Applies all pending migrations on the provided connection.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the database is ahead of this binary.
/// - `MigrationFailed` naming the first step that failed.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<()> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
    tx.execute_batch(VERSION_TABLE_SQL)?;

    let current = recorded_version(&tx)?;
    let latest = latest_version();

    if current > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: current,
            latest_supported: latest,
        });
    }

    let mut applied = 0usize;
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        apply_one(&tx, migration).map_err(|source| DbError::MigrationFailed {
            version: migration.version,
            source,
        })?;
        applied += 1;
    }

    tx.commit()?;

    if applied > 0 {
        info!(
            "event=db_migrate module=db status=ok from_version={} to_version={} applied={}",
            current, latest, applied
        );
    }
    Ok(())
}

fn apply_one(tx: &Transaction<'_>, migration: &Migration) -> rusqlite::Result<()> {
    tx.execute_batch(migration.sql)?;
    tx.execute(
        "INSERT INTO schema_version (version, applied_at) VALUES (?1, ?2);",
        params![migration.version, format_timestamp(Utc::now())],
    )?;
    Ok(())
}

fn recorded_version(conn: &Connection) -> DbResult<u32> {
    let version: Option<u32> =
        conn.query_row("SELECT MAX(version) FROM schema_version;", [], |row| {
            row.get(0)
        })?;
    Ok(version.unwrap_or(0))
}
