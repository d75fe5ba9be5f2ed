//! Connection setup and the embedded schema.

use crate::errors::{ImportError, ImportResult};
use anyhow::{Context, Result};
use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
};
use std::str::FromStr;

const INIT_SQL: &str = include_str!("../migrations/0001_init.sql");

/// Open a pool against `url`, creating the SQLite file when missing.
pub async fn connect(url: &str) -> ImportResult<SqlitePool> {
    tracing::debug!("Connecting using raw URL => {}", url);
    let connect_failed = |source| ImportError::ConnectFailed {
        url: url.to_string(),
        source,
    };

    let options = SqliteConnectOptions::from_str(url)
        .map_err(connect_failed)?
        .create_if_missing(true);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(connect_failed)
}

/// Apply the embedded schema statement by statement. Idempotent.
pub async fn run_migrations(db: &SqlitePool) -> Result<()> {
    let statements = migration_statements(INIT_SQL);

    tracing::info!("Running {} migration statements...", statements.len());

    for stmt in statements {
        tracing::debug!("Executing migration SQL: {}", stmt);
        sqlx::query(&stmt)
            .execute(db)
            .await
            .with_context(|| format!("executing migration statement `{}`", stmt))?;
    }

    Ok(())
}

/// Split a schema script into statements. Whole-line `--` comments are
/// dropped first so a `;` inside one cannot cut a statement.
fn migration_statements(sql: &str) -> Vec<String> {
    let without_comments = sql
        .lines()
        .filter(|line| !line.trim_start().starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n");

    without_comments
        .split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}
