//! Per-kind persistent mirror (SPEC_FULL §4.1).

pub mod migrations;
pub mod query;

use crate::encryption::EncryptionManager;
use metric::{Metric, Registry, U64Counter};
use observability_deps::tracing::{debug, warn};
use resource_model::{Document, Error, Item, Page, Schema};
use sqlx::{sqlite::SqliteConnectOptions, Row, SqlitePool};
use std::sync::atomic::{AtomicBool, Ordering};
use std::{str::FromStr, sync::Arc};
use tokio::sync::RwLock;

/// One SQLite database mirroring a single resource kind.
#[derive(Debug)]
pub struct Store {
    pool: SqlitePool,
    schema: Arc<Schema>,
    encryption: Arc<EncryptionManager>,
    encrypt: bool,
    table_prefix: String,
    db_path: std::path::PathBuf,
    write_total: Metric<U64Counter>,
    /// Set for the duration of a [`Store::reset`] (and until the driving Informer's relist
    /// completes); checked by `list_by_options` so in-flight queries fail fast instead of racing
    /// the table drop (SPEC_FULL §4.4/§7).
    resetting: AtomicBool,
    /// Held as a reader by every write (`upsert`/`delete`) and as a writer by `reset`, so a reset
    /// waits for the write path to idle before dropping tables.
    write_gate: RwLock<()>,
}

impl Store {
    /// Open (creating if necessary) the SQLite file for `schema.kind` under `path`, applying any
    /// outstanding migrations.
    pub async fn open(
        path: &std::path::Path,
        schema: Arc<Schema>,
        encryption: Arc<EncryptionManager>,
        encrypt: bool,
        registry: &Registry,
    ) -> Result<Self, Error> {
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", path.display()))
            .map_err(|e| Error::Sql { source: Box::new(e) })?
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(options)
            .await
            .map_err(|e| Error::Sql { source: Box::new(e) })?;

        let table_prefix = schema.kind.sanitized();
        let write_total = registry.register_metric("store_write_total", "store mutations applied, by kind");
        let store = Self {
            pool,
            schema,
            encryption,
            encrypt,
            table_prefix,
            db_path: path.to_path_buf(),
            write_total,
            resetting: AtomicBool::new(false),
            write_gate: RwLock::new(()),
        };
        migrations::ensure_schema(&store.pool, &store.table_prefix, &store.schema).await?;
        Ok(store)
    }

    /// Table names this Store owns.
    fn objects_table(&self) -> String {
        format!("{}_objects", self.table_prefix)
    }
    fn fields_table(&self) -> String {
        format!("{}_fields", self.table_prefix)
    }
    fn labels_table(&self) -> String {
        format!("{}_labels", self.table_prefix)
    }

    fn kind_label(&self) -> String {
        self.schema.kind.to_string()
    }

    /// Encode and, if configured, seal a document for storage.
    fn encode(&self, doc: &Document) -> Result<(Vec<u8>, Option<(u32, [u8; 12])>), Error> {
        let json = serde_json::to_vec(doc)
            .map_err(|e| Error::decode(self.kind_label(), format!("encode failed: {e}")))?;
        if self.encrypt {
            let (dek_id, nonce, ciphertext) = self.encryption.seal(&self.kind_label(), &json)?;
            Ok((ciphertext, Some((dek_id, nonce))))
        } else {
            Ok((json, None))
        }
    }

    /// Decode (and, if sealed, open) a stored payload back into a [`Document`].
    fn decode(&self, blob: &[u8], dek_id: Option<i64>, nonce: Option<&[u8]>) -> Result<Document, Error> {
        let plain = match (dek_id, nonce) {
            (Some(dek_id), Some(nonce)) => {
                let nonce: [u8; 12] = nonce
                    .try_into()
                    .map_err(|_| Error::decode(self.kind_label(), "malformed nonce"))?;
                self.encryption.open(&self.kind_label(), dek_id as u32, &nonce, blob)?
            }
            _ => blob.to_vec(),
        };
        serde_json::from_slice(&plain)
            .map_err(|e| Error::decode(self.kind_label(), format!("decode failed: {e}")))
    }

    /// Insert or overwrite one key's row and its derived `fields`/`labels` rows, atomically.
    ///
    /// A no-op if `(key, revision, payload)` is unchanged from what is already stored
    /// (SPEC_FULL §8 idempotence property).
    pub async fn upsert(&self, key: &str, doc: &Document, revision: i64) -> Result<(), Error> {
        let _write_guard = self.write_gate.read().await;
        let mut tx = self.pool.begin().await.map_err(|e| Error::Sql { source: Box::new(e) })?;

        let (blob, seal) = self.encode(doc)?;
        let (dek_id, nonce) = match seal {
            Some((id, nonce)) => (Some(id as i64), Some(nonce.to_vec())),
            None => (None, None),
        };

        sqlx::query(&format!(
            "INSERT INTO {objects} (key, revision, blob, dek_id, nonce, deleted_revision)
             VALUES (?, ?, ?, ?, ?, NULL)
             ON CONFLICT(key) DO UPDATE SET
               revision = excluded.revision,
               blob = excluded.blob,
               dek_id = excluded.dek_id,
               nonce = excluded.nonce,
               deleted_revision = NULL
             WHERE {objects}.revision != excluded.revision OR {objects}.blob != excluded.blob",
            objects = self.objects_table()
        ))
        .bind(key)
        .bind(revision)
        .bind(blob)
        .bind(dek_id)
        .bind(nonce)
        .execute(&mut tx)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;

        let mut field_cols = vec!["key".to_string()];
        let mut field_vals: Vec<Option<String>> = vec![Some(key.to_string())];
        for field in &self.schema.indexed_fields {
            field_cols.push(field.column_name());
            field_vals.push(field.extract(doc).as_deref().map(str::to_string));
        }
        let placeholders = vec!["?"; field_cols.len()].join(", ");
        let updates = field_cols[1..]
            .iter()
            .map(|c| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", ");
        let mut q = sqlx::query(&format!(
            "INSERT INTO {fields} ({cols}) VALUES ({placeholders})
             ON CONFLICT(key) DO UPDATE SET {updates}",
            fields = self.fields_table(),
            cols = field_cols.join(", "),
        ));
        for v in field_vals {
            q = q.bind(v);
        }
        q.execute(&mut tx).await.map_err(|e| Error::Sql { source: Box::new(e) })?;

        sqlx::query(&format!("DELETE FROM {labels} WHERE key = ?", labels = self.labels_table()))
            .bind(key)
            .execute(&mut tx)
            .await
            .map_err(|e| Error::Sql { source: Box::new(e) })?;

        if let Document::Map(map) = doc.get_path(&[resource_model::Segment::Key("metadata".into()), resource_model::Segment::Key("labels".into())]) {
            for (label, value) in map {
                if let Some(value) = value.as_storage_string() {
                    sqlx::query(&format!(
                        "INSERT INTO {labels} (key, label, value) VALUES (?, ?, ?)",
                        labels = self.labels_table()
                    ))
                    .bind(key)
                    .bind(label)
                    .bind(value)
                    .execute(&mut tx)
                    .await
                    .map_err(|e| Error::Sql { source: Box::new(e) })?;
                }
            }
        }

        tx.commit().await.map_err(|e| Error::Sql { source: Box::new(e) })?;
        self.write_total.recorder([("kind", self.kind_label().as_str())]).inc();
        debug!(key, revision, kind = %self.kind_label(), "upserted row");
        Ok(())
    }

    /// Tombstone a key at `revision`, preserving the row for revision-pinned reads.
    pub async fn delete(&self, key: &str, revision: i64) -> Result<(), Error> {
        let _write_guard = self.write_gate.read().await;
        sqlx::query(&format!(
            "UPDATE {objects} SET deleted_revision = ? WHERE key = ? AND deleted_revision IS NULL",
            objects = self.objects_table()
        ))
        .bind(revision)
        .bind(key)
        .execute(&self.pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;
        self.write_total.recorder([("kind", self.kind_label().as_str())]).inc();
        debug!(key, revision, kind = %self.kind_label(), "tombstoned row");
        Ok(())
    }

    /// Fetch the live (non-tombstoned) row for `key`, if any.
    pub async fn get(&self, key: &str) -> Result<Option<Item>, Error> {
        let row = sqlx::query(&format!(
            "SELECT key, revision, blob, dek_id, nonce FROM {objects}
             WHERE key = ? AND deleted_revision IS NULL",
            objects = self.objects_table()
        ))
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?;

        match row {
            None => Ok(None),
            Some(row) => {
                let blob: Vec<u8> = row.try_get("blob").map_err(|e| Error::Sql { source: Box::new(e) })?;
                let dek_id: Option<i64> = row.try_get("dek_id").map_err(|e| Error::Sql { source: Box::new(e) })?;
                let nonce: Option<Vec<u8>> = row.try_get("nonce").map_err(|e| Error::Sql { source: Box::new(e) })?;
                let revision: i64 = row.try_get("revision").map_err(|e| Error::Sql { source: Box::new(e) })?;
                let document = self.decode(&blob, dek_id, nonce.as_deref())?;
                Ok(Some(Item {
                    key: key.to_string(),
                    revision,
                    document,
                }))
            }
        }
    }

    /// Make the on-disk state equal `page` at `revision`: upsert every item, tombstone every
    /// live key absent from `page` (SPEC_FULL §4.1 replace semantics).
    pub async fn replace(&self, page: &Page, revision: i64) -> Result<(), Error> {
        let incoming: std::collections::HashSet<&str> = page.items.iter().map(|i| i.key.as_str()).collect();

        for item in &page.items {
            self.upsert(&item.key, &item.document, revision).await?;
        }

        let live_keys: Vec<String> = sqlx::query(&format!(
            "SELECT key FROM {objects} WHERE deleted_revision IS NULL",
            objects = self.objects_table()
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| Error::Sql { source: Box::new(e) })?
        .into_iter()
        .map(|row| row.try_get::<String, _>("key").unwrap_or_default())
        .collect();

        for key in live_keys {
            if !incoming.contains(key.as_str()) {
                self.delete(&key, revision).await?;
            }
        }

        Ok(())
    }

    /// Full resync: equivalent to [`Store::replace`] but intended for the *resyncing* state
    /// (SPEC_FULL §4.3), logged distinctly so operators can tell a scheduled resync from an
    /// initial list.
    pub async fn resync(&self, page: &Page, revision: i64) -> Result<(), Error> {
        warn!(kind = %self.kind_label(), revision, "resyncing store from upstream relist");
        self.replace(page, revision).await
    }

    /// Drop and recreate every table this Store owns, for a schema-change or corruption reset.
    ///
    /// Marks the Store invalid for the duration (SPEC_FULL §4.4): [`Store::begin_reset`] must be
    /// called by the caller first so `list_by_options` starts failing fast with
    /// [`Error::ResetInProgress`] before in-flight writes are waited out and tables are dropped.
    /// The caller clears the flag (via [`Store::end_reset`]) once the driving Informer's relist
    /// has repopulated the store, not before.
    pub async fn reset(&self) -> Result<(), Error> {
        let _write_guard = self.write_gate.write().await;
        migrations::drop_all(&self.pool, &self.table_prefix).await?;
        migrations::ensure_schema(&self.pool, &self.table_prefix, &self.schema).await
    }

    /// Mark this Store invalid ahead of a [`Store::reset`]; checked by `list_by_options`.
    pub fn begin_reset(&self) {
        self.resetting.store(true, Ordering::Release);
    }

    /// Clear the invalidity flag set by [`Store::begin_reset`], once the relist that follows a
    /// reset has repopulated the store.
    pub fn end_reset(&self) {
        self.resetting.store(false, Ordering::Release);
    }

    /// Run a compiled list query against this Store (SPEC_FULL §4.2).
    ///
    /// Fails fast with [`Error::ResetInProgress`] while [`Store::begin_reset`] is in effect,
    /// rather than racing the table drop.
    pub async fn list_by_options(
        &self,
        options: &resource_model::ListOptions,
    ) -> Result<query::QueryResult, Error> {
        if self.resetting.load(Ordering::Acquire) {
            return Err(Error::reset_in_progress(self.kind_label()));
        }
        let _write_guard = self.write_gate.read().await;
        query::execute(self, options).await
    }

    /// The on-disk path of another kind's Store, assuming the sibling-file-per-kind layout
    /// [`crate::factory::CacheFactory`] uses (SPEC_FULL §4.4) — used to `ATTACH` a foreign kind's
    /// database for indirect-field joins (SPEC_FULL §4.2).
    pub(crate) fn sibling_db_path(&self, foreign_kind_sanitized: &str) -> std::path::PathBuf {
        match self.db_path.parent() {
            Some(dir) => dir.join(format!("{foreign_kind_sanitized}.db")),
            None => std::path::PathBuf::from(format!("{foreign_kind_sanitized}.db")),
        }
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub(crate) fn table_prefix(&self) -> &str {
        &self.table_prefix
    }

    pub(crate) fn schema(&self) -> &Schema {
        &self.schema
    }

    pub(crate) fn db_path(&self) -> &std::path::Path {
        &self.db_path
    }

    pub(crate) fn decode_row(&self, blob: &[u8], dek_id: Option<i64>, nonce: Option<&[u8]>) -> Result<Document, Error> {
        self.decode(blob, dek_id, nonce)
    }
}
