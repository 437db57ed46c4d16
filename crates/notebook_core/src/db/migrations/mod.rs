//! Schema registry for per-notebook SQLite stores.
//!
//! # Responsibility
//! - Keep the ordered list of `documents`/`blobs` schema steps.
//! - Bring a freshly opened notebook file up to the latest layout.
//!
//! # Invariants
//! - Step versions are strictly increasing.
//! - All pending steps commit together or not at all.
//! - `PRAGMA user_version` always equals the last committed step.

use crate::db::{DbError, DbResult};
use log::info;
use rusqlite::Connection;

#[derive(Debug, Clone, Copy)]
struct SchemaStep {
    version: u32,
    label: &'static str,
    sql: &'static str,
}

const SCHEMA_STEPS: &[SchemaStep] = &[SchemaStep {
    version: 1,
    label: "documents_and_blobs",
    sql: include_str!("0001_init.sql"),
}];

/// Returns the newest notebook schema version this build understands.
pub fn latest_version() -> u32 {
    SCHEMA_STEPS.last().map_or(0, |step| step.version)
}

/// Upgrades `conn` to [`latest_version`] and returns how many steps ran.
///
/// # Errors
/// - `UnsupportedSchemaVersion` when the file was written by a newer build.
/// - `Sqlite` when any step fails; nothing is committed in that case.
pub fn apply_migrations(conn: &mut Connection) -> DbResult<usize> {
    let stored = stored_schema_version(conn)?;
    let latest = latest_version();

    if stored > latest {
        return Err(DbError::UnsupportedSchemaVersion {
            db_version: stored,
            latest_supported: latest,
        });
    }

    let pending: Vec<&SchemaStep> = SCHEMA_STEPS
        .iter()
        .filter(|step| step.version > stored)
        .collect();
    if pending.is_empty() {
        return Ok(0);
    }

    let tx = conn.transaction()?;
    for step in &pending {
        tx.execute_batch(step.sql)?;
        tx.pragma_update(None, "user_version", step.version)?;
    }
    tx.commit()?;

    for step in &pending {
        info!(
            "event=schema_step module=db status=ok version={} label={}",
            step.version, step.label
        );
    }

    Ok(pending.len())
}

/// Reads the schema version recorded in the notebook file.
pub fn stored_schema_version(conn: &Connection) -> DbResult<u32> {
    let version = conn.pragma_query_value(None, "user_version", |row| row.get::<_, u32>(0))?;
    Ok(version)
}
