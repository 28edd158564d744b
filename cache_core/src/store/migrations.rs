//! Per-kind DDL and its migration bookkeeping, grounded in the same
//! ensure-table/current-version/migrate-vN shape a raw-`sqlx` SQLite store uses elsewhere in this
//! codebase's broader example pool.

use resource_model::{Error, Schema};
use sqlx::{Row, SqlitePool};

const CURRENT_VERSION: i64 = 1;

/// Create every table this kind's Store owns if missing, and bring an existing on-disk schema up
/// to `CURRENT_VERSION`.
pub async fn ensure_schema(pool: &SqlitePool, table_prefix: &str, schema: &Schema) -> Result<(), Error> {
    ensure_migrations_table(pool).await?;
    let version = current_version(pool).await?;

    if version > CURRENT_VERSION {
        return Err(Error::InvalidConfig {
            message: format!(
                "on-disk schema for {table_prefix} is at version {version}, newer than this binary's {CURRENT_VERSION}"
            ),
        });
    }

    if version < 1 {
        migrate_v1(pool, table_prefix, schema).await?;
        record_version(pool, 1).await?;
    }

    Ok(())
}

/// Drop every table this kind owns (used by [`crate::store::Store::reset`]).
pub async fn drop_all(pool: &SqlitePool, table_prefix: &str) -> Result<(), Error> {
    for table in ["objects", "fields", "labels", "indices"] {
        sqlx::query(&format!("DROP TABLE IF EXISTS {table_prefix}_{table}"))
            .execute(pool)
            .await
            .map_err(|e| Error::Sql { source: Box::new(e) })?;
    }
    sqlx::query("DELETE FROM schema_migrations")
        .execute(pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;
    Ok(())
}

async fn ensure_migrations_table(pool: &SqlitePool) -> Result<(), Error> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS schema_migrations (
            version INTEGER PRIMARY KEY,
            applied_at INTEGER NOT NULL
         )",
    )
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<i64, Error> {
    let row = sqlx::query("SELECT MAX(version) as v FROM schema_migrations")
        .fetch_one(pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;
    Ok(row.try_get::<Option<i64>, _>("v").map_err(|e| Error::Sql { source: Box::new(e) })?.unwrap_or(0))
}

async fn record_version(pool: &SqlitePool, version: i64) -> Result<(), Error> {
    sqlx::query("INSERT INTO schema_migrations (version, applied_at) VALUES (?, strftime('%s', 'now'))")
        .bind(version)
        .execute(pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;
    Ok(())
}

async fn migrate_v1(pool: &SqlitePool, table_prefix: &str, schema: &Schema) -> Result<(), Error> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table_prefix}_objects (
            key TEXT PRIMARY KEY,
            revision INTEGER NOT NULL,
            blob BLOB NOT NULL,
            dek_id INTEGER,
            nonce BLOB,
            deleted_revision INTEGER
         )"
    ))
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;

    let mut field_cols = vec!["key TEXT PRIMARY KEY".to_string()];
    for field in &schema.indexed_fields {
        field_cols.push(format!("{} TEXT", field.column_name()));
    }
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table_prefix}_fields ({})",
        field_cols.join(", ")
    ))
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table_prefix}_labels (
            key TEXT NOT NULL,
            label TEXT NOT NULL,
            value TEXT NOT NULL
         )"
    ))
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS {table_prefix}_labels_label_value_idx
         ON {table_prefix}_labels (label, value)"
    ))
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;

    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {table_prefix}_indices (
            name TEXT NOT NULL,
            value TEXT NOT NULL,
            key TEXT NOT NULL
         )"
    ))
    .execute(pool)
    .await
    .map_err(|e| Error::Sql { source: Box::new(e) })?;

    Ok(())
}
