//! Compiles a [`ListOptions`] into one parameterized SQL statement and evaluates it
//! (SPEC_FULL §4.2).
//!
//! Every table/column identifier that ends up in the generated SQL comes from
//! [`Schema::column_whitelist`] or a small fixed set of structural names (`objects`, `fields`,
//! `labels`, `o`, `f`, …); user-supplied *values* always travel as bind parameters. A field path
//! that does not resolve against the whitelist is rejected as [`Error::BadRequest`] before any
//! SQL is built.
//!
//! Indirect (foreign-key-joined) fields additionally `ATTACH` the foreign kind's own database
//! file under a generated schema alias (`fk_<kind>`) and reference its `fields` table fully
//! qualified (`fk_<kind>.<kind>_fields.<column>`, which SQLite accepts directly in expressions);
//! the attach/detach pair brackets the whole query on one pooled connection so it is returned
//! clean either way.

use super::Store;
use resource_model::{
    Filter, FilterOp, Item, ListOptions, OrFilter, ResumeToken, Sort, SortDirection, Summary,
};
use resource_model::Error;
use sqlx::pool::PoolConnection;
use sqlx::{Row, Sqlite};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The outcome of one [`execute`] call.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Matching items for this page.
    pub items: Vec<Item>,
    /// Grand total of matching rows across all pages.
    pub total: i64,
    /// `property -> value -> count`, one entry per requested [`Summary`] path.
    pub summary: BTreeMap<String, BTreeMap<String, i64>>,
    /// Opaque continuation token for the next chunked page, if more rows remain.
    pub continue_token: Option<String>,
}

fn sql_err(e: sqlx::Error) -> Error {
    Error::Sql { source: Box::new(e) }
}

/// Every foreign kind's database this query needs `ATTACH`ed, keyed by the schema alias it is
/// attached under (`fk_<sanitized kind>`).
type Attaches = BTreeMap<String, PathBuf>;

/// Resolve a dotted field path to the SQL expression it reads from, pushing any `JOIN` (and, for
/// indirect fields, the `ATTACH` it needs) as a side effect. This is the single place a field
/// path becomes part of a SQL string and the single place its joins are recorded, so filters,
/// sorts, and summaries that reference the same path always get the same column and the same
/// join — rather than each re-deriving (and potentially missing) it independently.
fn resolve_field(
    store: &Store,
    path: &str,
    indirect: bool,
    joins: &mut Vec<String>,
    join_binds: &mut Vec<BindValue>,
    attaches: &mut Attaches,
) -> Result<String, Error> {
    if path == "metadata.name" {
        return Ok("f.key".to_string());
    }
    if let Some(label) = path.strip_prefix("metadata.labels.") {
        let alias = format!("lbl_{}", resource_model::field::sanitize_identifier(label));
        joins.push(format!(
            "LEFT JOIN {labels} {alias} ON {alias}.key = o.key AND {alias}.label = ?",
            labels = store.labels_table(),
        ));
        join_binds.push(BindValue::Text(label.to_string()));
        return Ok(format!("{alias}.value"));
    }
    if indirect {
        return resolve_indirect_field(store, path, joins, join_binds, attaches);
    }
    let field = store
        .schema()
        .field(path)
        .ok_or_else(|| Error::bad_request(format!("field not indexed: {path}")))?;
    Ok(format!("f.{}", field.column_name()))
}

/// Resolve an indirect (foreign-key-joined) field by attaching the foreign kind's database under
/// a `fk_<kind>` alias and joining its `fields` table on the declared local/foreign match columns
/// (the worked join example in SPEC_FULL §4.2).
fn resolve_indirect_field(
    store: &Store,
    path: &str,
    joins: &mut Vec<String>,
    join_binds: &mut Vec<BindValue>,
    attaches: &mut Attaches,
) -> Result<String, Error> {
    let indirect_field = store
        .schema()
        .indirect_field(path)
        .ok_or_else(|| Error::bad_request(format!("field not indexed: {path}")))?;

    let foreign_kind = resource_model::field::sanitize_identifier(&indirect_field.foreign_kind);
    let attach_alias = format!("fk_{foreign_kind}");
    attaches
        .entry(attach_alias.clone())
        .or_insert_with(|| store.sibling_db_path(&foreign_kind));

    let local_expr = if indirect_field.local_field_is_label {
        let local_alias = format!(
            "lbl_join_{}",
            resource_model::field::sanitize_identifier(&indirect_field.local_field)
        );
        joins.push(format!(
            "LEFT JOIN {labels} {local_alias} ON {local_alias}.key = o.key AND {local_alias}.label = ?",
            labels = store.labels_table(),
        ));
        join_binds.push(BindValue::Text(indirect_field.local_field.clone()));
        format!("{local_alias}.value")
    } else {
        let local_field = store.schema().field(&indirect_field.local_field).ok_or_else(|| {
            Error::bad_request(format!(
                "indirect field {path} references unindexed local field {}",
                indirect_field.local_field
            ))
        })?;
        format!("f.{}", local_field.column_name())
    };

    let match_col = resource_model::field::sanitize_identifier(&indirect_field.foreign_match_field);
    let projected_col = resource_model::field::sanitize_identifier(&indirect_field.foreign_projected_field);
    let foreign_table = format!("{attach_alias}.{foreign_kind}_fields");

    joins.push(format!(
        "LEFT JOIN {foreign_table} ON {foreign_table}.{match_col} = {local_expr}"
    ));
    Ok(format!("{foreign_table}.{projected_col}"))
}

#[derive(Clone)]
enum BindValue {
    Text(String),
    Int(i64),
}

fn escape_like(raw: &str) -> String {
    raw.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_")
}

fn compile_filter(
    store: &Store,
    filter: &Filter,
    predicate_binds: &mut Vec<BindValue>,
    joins: &mut Vec<String>,
    join_binds: &mut Vec<BindValue>,
    attaches: &mut Attaches,
) -> Result<String, Error> {
    let column = resolve_field(store, &filter.field_path, filter.indirect, joins, join_binds, attaches)?;

    match filter.op {
        FilterOp::Eq => {
            if filter.partial {
                let escaped = escape_like(&filter.match_values[0]);
                predicate_binds.push(BindValue::Text(format!("%{escaped}%")));
                Ok(format!("{column} LIKE ? ESCAPE '\\'"))
            } else {
                predicate_binds.push(BindValue::Text(filter.match_values[0].clone()));
                Ok(format!("{column} = ?"))
            }
        }
        FilterOp::Ne => {
            predicate_binds.push(BindValue::Text(filter.match_values[0].clone()));
            Ok(format!("({column} IS NULL OR {column} != ?)"))
        }
        FilterOp::Lt => {
            predicate_binds.push(BindValue::Text(filter.match_values[0].clone()));
            Ok(format!("{column} < ?"))
        }
        FilterOp::Gt => {
            predicate_binds.push(BindValue::Text(filter.match_values[0].clone()));
            Ok(format!("{column} > ?"))
        }
        FilterOp::Exists => Ok(format!("({column} IS NOT NULL AND {column} != '')")),
        FilterOp::NotExists => Ok(format!("({column} IS NULL OR {column} = '')")),
        FilterOp::In => {
            let placeholders = vec!["?"; filter.match_values.len()].join(", ");
            for v in &filter.match_values {
                predicate_binds.push(BindValue::Text(v.clone()));
            }
            Ok(format!("{column} IN ({placeholders})"))
        }
        FilterOp::NotIn => {
            let placeholders = vec!["?"; filter.match_values.len()].join(", ");
            for v in &filter.match_values {
                predicate_binds.push(BindValue::Text(v.clone()));
            }
            Ok(format!("({column} IS NULL OR {column} NOT IN ({placeholders}))"))
        }
    }
}

fn compile_or_filter(
    store: &Store,
    or_filter: &OrFilter,
    predicate_binds: &mut Vec<BindValue>,
    joins: &mut Vec<String>,
    join_binds: &mut Vec<BindValue>,
    attaches: &mut Attaches,
) -> Result<String, Error> {
    if or_filter.filters.is_empty() {
        return Ok("1 = 1".to_string());
    }
    let mut parts = Vec::with_capacity(or_filter.filters.len());
    for f in &or_filter.filters {
        parts.push(compile_filter(store, f, predicate_binds, joins, join_binds, attaches)?);
    }
    Ok(format!("({})", parts.join(" OR ")))
}

fn compile_sort(
    store: &Store,
    sort: &Sort,
    joins: &mut Vec<String>,
    join_binds: &mut Vec<BindValue>,
    attaches: &mut Attaches,
) -> Result<String, Error> {
    let column = resolve_field(store, &sort.field_path, sort.indirect, joins, join_binds, attaches)?;
    let dir = match sort.direction {
        SortDirection::Asc => "ASC",
        SortDirection::Desc => "DESC",
    };
    Ok(format!("{column} {dir}"))
}

/// The namespace of a row: the `metadata.namespace` indexed field if the kind declares one,
/// otherwise the `namespace/` prefix of the key itself (SPEC_FULL §3's "namespace/name or name"
/// key convention).
fn namespace_expr(store: &Store) -> String {
    match store.schema().field("metadata.namespace") {
        Some(field) => format!("f.{}", field.column_name()),
        None => "CASE WHEN instr(f.key, '/') > 0 THEN substr(f.key, 1, instr(f.key, '/') - 1) ELSE NULL END".to_string(),
    }
}

fn compile_partitions(store: &Store, options: &ListOptions, predicate_binds: &mut Vec<BindValue>) -> String {
    if options.partitions.is_empty() {
        return "FALSE".to_string();
    }
    let ns_expr = namespace_expr(store);
    let mut parts = Vec::with_capacity(options.partitions.len());
    for p in &options.partitions {
        if p.passthrough {
            parts.push("1 = 1".to_string());
            continue;
        }
        let Some(ns) = &p.namespace else {
            parts.push("FALSE".to_string());
            continue;
        };
        predicate_binds.push(BindValue::Text(ns.clone()));
        if p.all {
            parts.push(format!("({ns_expr} = ?)"));
        } else if p.names.is_empty() {
            parts.push("FALSE".to_string());
        } else {
            let placeholders = vec!["?"; p.names.len()].join(", ");
            for n in &p.names {
                predicate_binds.push(BindValue::Text(n.clone()));
            }
            parts.push(format!("({ns_expr} = ? AND f.key IN ({placeholders}))"));
        }
    }
    format!("({})", parts.join(" OR "))
}

fn bind_all<'q>(
    mut q: sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>>,
    binds: &'q [BindValue],
) -> sqlx::query::Query<'q, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'q>> {
    for b in binds {
        q = match b {
            BindValue::Text(s) => q.bind(s.as_str()),
            BindValue::Int(i) => q.bind(*i),
        };
    }
    q
}

async fn attach_all(conn: &mut PoolConnection<Sqlite>, attaches: &Attaches) -> Result<(), Error> {
    for (alias, path) in attaches {
        sqlx::query(&format!("ATTACH DATABASE ? AS {alias}"))
            .bind(path.to_string_lossy().into_owned())
            .execute(&mut **conn)
            .await
            .map_err(sql_err)?;
    }
    Ok(())
}

/// Run after every attached query regardless of outcome, so a pooled connection never goes back
/// with a foreign database still attached under a generated alias.
async fn detach_all(conn: &mut PoolConnection<Sqlite>, attaches: &Attaches) {
    for alias in attaches.keys() {
        let _ = sqlx::query(&format!("DETACH DATABASE {alias}")).execute(&mut **conn).await;
    }
}

/// Compile and execute `options` against `store` (SPEC_FULL §4.2).
pub async fn execute(store: &Store, options: &ListOptions) -> Result<QueryResult, Error> {
    let objects = format!("{}_objects", store.table_prefix());
    let fields = format!("{}_fields", store.table_prefix());

    let mut joins: Vec<String> = vec![format!("JOIN {fields} f ON f.key = o.key")];
    let mut join_binds: Vec<BindValue> = Vec::new();
    let mut predicate_binds: Vec<BindValue> = Vec::new();
    let mut attaches: Attaches = BTreeMap::new();

    let mut where_parts = Vec::new();

    // Revision predicate (compilation rule 4).
    match options.revision {
        None => {
            where_parts.push(format!(
                "o.revision = (SELECT MAX(revision) FROM {objects} WHERE key = o.key) AND o.deleted_revision IS NULL"
            ));
        }
        Some(revision) => {
            predicate_binds.push(BindValue::Int(revision));
            predicate_binds.push(BindValue::Int(revision));
            where_parts.push(format!(
                "o.revision = (SELECT MAX(revision) FROM {objects} x WHERE x.key = o.key AND x.revision <= ?)
                 AND (o.deleted_revision IS NULL OR o.deleted_revision > ?)"
            ));
        }
    }

    // Filters (rule 5).
    for or_filter in &options.filters {
        where_parts.push(compile_or_filter(
            store,
            or_filter,
            &mut predicate_binds,
            &mut joins,
            &mut join_binds,
            &mut attaches,
        )?);
    }

    // Namespace / partitions (rule 6).
    if let Some(ns) = &options.namespace {
        predicate_binds.push(BindValue::Text(ns.clone()));
        where_parts.push(format!("{} = ?", namespace_expr(store)));
    }
    where_parts.push(compile_partitions(store, options, &mut predicate_binds));

    let where_clause = where_parts.join(" AND ");

    // ORDER BY (rule 7): requested directives, then stable tie-breakers.
    let mut order_parts = Vec::new();
    for sort in &options.sort {
        order_parts.push(compile_sort(store, sort, &mut joins, &mut join_binds, &mut attaches)?);
    }
    order_parts.push("f.key ASC".to_string());
    order_parts.push("o.key ASC".to_string());
    let order_by = order_parts.join(", ");

    // Summary columns (rule 11), resolved up front so any join they need lands in the same
    // `joins_sql` the count/select/summary queries all share. A LEFT JOIN on a to-one match key
    // never changes row cardinality, so folding these in here (rather than compiling a
    // summary-specific join set) keeps every query on one plan without widening the result.
    let mut summary_columns: Vec<(String, String)> = Vec::new();
    for Summary { field_path } in &options.summary {
        let column = resolve_field(store, field_path, false, &mut joins, &mut join_binds, &mut attaches)?;
        summary_columns.push((field_path.clone(), column));
    }

    // LIMIT/OFFSET (rule 8).
    let page_size = options
        .pagination
        .map(|p| p.page_size)
        .or(options.chunk_size)
        .unwrap_or(100_000);
    let limit = options
        .chunk_size
        .map(|c| c.min(page_size))
        .unwrap_or(page_size);

    let mut conn = store.pool().acquire().await.map_err(sql_err)?;

    // Resume-token offsets are only trustworthy against the revision they were minted for
    // (SPEC_FULL §8): a token naming a revision older than anything still retained would silently
    // resume into rows that have since aged out, so reject it instead of guessing an offset.
    let resume = match &options.resume_token {
        Some(token) => {
            let token = ResumeToken::decode(token)?;
            let oldest: Option<i64> = sqlx::query(&format!("SELECT MIN(revision) as m FROM {objects}"))
                .fetch_one(&mut *conn)
                .await
                .map_err(sql_err)?
                .try_get("m")
                .map_err(sql_err)?;
            if let Some(oldest) = oldest {
                if token.revision < oldest {
                    return Err(Error::bad_request(format!(
                        "resume token revision {} predates the oldest retained revision {oldest}",
                        token.revision
                    )));
                }
            }
            Some(token)
        }
        None => None,
    };
    let page_offset = options
        .pagination
        .map(|p| u64::from(p.page_size) * u64::from(p.page.saturating_sub(1)))
        .unwrap_or(0);
    let offset = page_offset + resume.map(|r| r.offset).unwrap_or(0);

    let joins_sql = joins.join("\n");
    let mut binds = join_binds.clone();
    binds.extend(predicate_binds.clone());

    if let Err(e) = attach_all(&mut conn, &attaches).await {
        detach_all(&mut conn, &attaches).await;
        return Err(e);
    }

    let result = run_queries(
        &mut conn,
        &objects,
        &joins_sql,
        &where_clause,
        &order_by,
        limit,
        offset,
        &binds,
        &summary_columns,
        store,
    )
    .await;

    detach_all(&mut conn, &attaches).await;

    let (total, items, next_offset, summary) = result?;

    let continue_token = next_offset.map(|offset| {
        let revision = options.revision.unwrap_or(0);
        ResumeToken { revision, offset }.encode()
    });

    Ok(QueryResult {
        items,
        total,
        summary,
        continue_token,
    })
}

#[allow(clippy::too_many_arguments)]
async fn run_queries(
    conn: &mut PoolConnection<Sqlite>,
    objects: &str,
    joins_sql: &str,
    where_clause: &str,
    order_by: &str,
    limit: u32,
    offset: u64,
    binds: &[BindValue],
    summary_columns: &[(String, String)],
    store: &Store,
) -> Result<(i64, Vec<Item>, Option<u64>, BTreeMap<String, BTreeMap<String, i64>>), Error> {
    let count_sql = format!("SELECT COUNT(*) as c FROM {objects} o {joins_sql} WHERE {where_clause}");
    let total: i64 = {
        let mut q = sqlx::query(&count_sql);
        q = bind_all(q, binds);
        q.fetch_one(&mut **conn).await.map_err(sql_err)?.try_get::<i64, _>("c").map_err(sql_err)?
    };

    let select_sql = format!(
        "SELECT o.key as key, o.revision as revision, o.blob as blob, o.dek_id as dek_id, o.nonce as nonce
         FROM {objects} o {joins_sql}
         WHERE {where_clause}
         ORDER BY {order_by}
         LIMIT {limit_plus_one} OFFSET {offset}",
        limit_plus_one = limit as i64 + 1,
    );

    let rows = {
        let mut q = sqlx::query(&select_sql);
        q = bind_all(q, binds);
        q.fetch_all(&mut **conn).await.map_err(sql_err)?
    };

    let has_more = rows.len() as u32 > limit;
    let mut items = Vec::with_capacity(rows.len().min(limit as usize));
    for row in rows.into_iter().take(limit as usize) {
        let key: String = row.try_get("key").map_err(sql_err)?;
        let revision: i64 = row.try_get("revision").map_err(sql_err)?;
        let blob: Vec<u8> = row.try_get("blob").map_err(sql_err)?;
        let dek_id: Option<i64> = row.try_get("dek_id").map_err(sql_err)?;
        let nonce: Option<Vec<u8>> = row.try_get("nonce").map_err(sql_err)?;
        let document = store.decode_row(&blob, dek_id, nonce.as_deref())?;
        items.push(Item { key, revision, document });
    }

    let next_offset = has_more.then_some(offset + limit as u64);

    // Summaries (rule 11): one extra query per summary path, same predicate, GROUP BY column.
    let mut summary: BTreeMap<String, BTreeMap<String, i64>> = BTreeMap::new();
    for (field_path, column) in summary_columns {
        let sql = format!(
            "SELECT {column} as v, COUNT(*) as c FROM {objects} o {joins_sql}
             WHERE {where_clause} GROUP BY {column}"
        );
        let mut q = sqlx::query(&sql);
        q = bind_all(q, binds);
        let rows = q.fetch_all(&mut **conn).await.map_err(sql_err)?;
        let mut counts = BTreeMap::new();
        for row in rows {
            let value: Option<String> = row.try_get("v").map_err(sql_err)?;
            let count: i64 = row.try_get("c").map_err(sql_err)?;
            counts.insert(value.unwrap_or_default(), count);
        }
        summary.insert(field_path.clone(), counts);
    }

    Ok((total, items, next_offset, summary))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_like_escapes_percent_and_underscore() {
        assert_eq!(escape_like("c%%l_value"), "c\\%\\%l\\_value");
    }
}
