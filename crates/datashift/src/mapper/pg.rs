//! PostgreSQL-backed mapping store.
//!
//! Mapping tables live in the `_datashift` schema, one table per mapping
//! key, shaped `source_<field>..., dest_<field>..., updated, status`. The
//! destination columns form the primary key; supporting indexes cover the
//! source column set and the full id set. This shape is the engine's one
//! persisted artifact and must stay compatible across versions.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::error::SqlState;
use tokio_postgres::types::ToSql;

use crate::core::ids::{IdKind, IdTuple, IdValue};
use crate::error::{MigrateError, Result};

use super::store::{
    status_to_str, MappingColumn, MappingStatus, MappingStore, MappingTableSpec,
};

const SCHEMA: &str = "_datashift";

/// PostgreSQL mapping store over a deadpool connection pool.
pub struct PgMappingStore {
    pool: Pool,
    schema: String,
}

impl PgMappingStore {
    /// Create a new PostgreSQL mapping store.
    pub fn new(pool: Pool) -> Self {
        Self {
            pool,
            schema: SCHEMA.to_string(),
        }
    }

    fn qualified(&self, table: &str) -> String {
        // Derived names are snake_case output of the naming module; nothing
        // user-controlled reaches this format string unquoted.
        format!("{}.{}", self.schema, table)
    }
}

/// Build a NULL-safe equality predicate over id columns.
///
/// A NULL value becomes `col IS NULL`; anything else becomes a numbered
/// placeholder appended to `params`. `offset` is the number of parameters
/// already bound ahead of these.
fn predicate(
    values: &[(&MappingColumn, IdValue)],
    params: &mut Vec<IdValue>,
    offset: usize,
) -> String {
    let mut clauses = Vec::with_capacity(values.len());
    for (col, value) in values {
        if value.is_null() {
            clauses.push(format!("{} IS NULL", col.column));
        } else {
            params.push(value.clone());
            clauses.push(format!("{} = ${}", col.column, offset + params.len()));
        }
    }
    clauses.join(" AND ")
}

fn id_param_refs(params: &[IdValue]) -> Vec<&(dyn ToSql + Sync)> {
    params.iter().map(|v| v as &(dyn ToSql + Sync)).collect()
}

fn tuple_from_row(row: &tokio_postgres::Row, columns: &[MappingColumn]) -> Result<IdTuple> {
    let mut tuple = IdTuple::new();
    for (i, col) in columns.iter().enumerate() {
        let value = match col.kind {
            IdKind::Int => row
                .try_get::<_, Option<i64>>(i)?
                .map_or(IdValue::Null, IdValue::Int),
            IdKind::Str => row
                .try_get::<_, Option<String>>(i)?
                .map_or(IdValue::Null, IdValue::Str),
        };
        tuple.set(col.field.clone(), value);
    }
    Ok(tuple)
}

/// Whether a query error means the mapping table has never been conformed.
fn is_missing_table(e: &tokio_postgres::Error) -> bool {
    e.code() == Some(&SqlState::UNDEFINED_TABLE)
}

#[async_trait]
impl MappingStore for PgMappingStore {
    async fn conform(&self, spec: &MappingTableSpec) -> Result<()> {
        let conn = self.pool.get().await?;
        let table = self.qualified(&spec.table);

        conn.execute(&format!("CREATE SCHEMA IF NOT EXISTS {}", self.schema), &[])
            .await?;

        // Destination columns are NOT NULL: they form the primary key and a
        // written entity always has real destination ids. Source columns are
        // nullable for orphan re-writes.
        let mut columns: Vec<String> = spec
            .source_columns
            .iter()
            .map(|c| format!("{} {}", c.column, c.kind.sql_type()))
            .collect();
        columns.extend(
            spec.dest_columns
                .iter()
                .map(|c| format!("{} {} NOT NULL", c.column, c.kind.sql_type())),
        );
        let pk: Vec<&str> = spec.dest_columns.iter().map(|c| c.column.as_str()).collect();

        conn.execute(
            &format!(
                "CREATE TABLE IF NOT EXISTS {} (
                    {},
                    updated TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                    status TEXT NOT NULL CHECK (status IN ('migrated', 'stub')),
                    PRIMARY KEY ({})
                )",
                table,
                columns.join(",\n                    "),
                pk.join(", ")
            ),
            &[],
        )
        .await?;

        // Extend an existing table when the id field set has grown.
        for col in spec.source_columns.iter().chain(&spec.dest_columns) {
            conn.execute(
                &format!(
                    "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
                    table,
                    col.column,
                    col.kind.sql_type()
                ),
                &[],
            )
            .await?;
        }

        let source_cols: Vec<&str> = spec
            .source_columns
            .iter()
            .map(|c| c.column.as_str())
            .collect();
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_source ON {} ({})",
                spec.table,
                table,
                source_cols.join(", ")
            ),
            &[],
        )
        .await?;

        let all_cols: Vec<&str> = source_cols.iter().chain(&pk).copied().collect();
        conn.execute(
            &format!(
                "CREATE INDEX IF NOT EXISTS idx_{}_ids ON {} ({})",
                spec.table,
                table,
                all_cols.join(", ")
            ),
            &[],
        )
        .await?;

        Ok(())
    }

    async fn upsert(
        &self,
        spec: &MappingTableSpec,
        source: &IdTuple,
        dest: &IdTuple,
        status: MappingStatus,
    ) -> Result<()> {
        let mut conn = self.pool.get().await?;
        let tx = conn.transaction().await?;
        let table = self.qualified(&spec.table);
        let status_str = status_to_str(status);

        let source_values = spec.source_values(source);
        let dest_values = spec.dest_values(dest);

        // NULL-safe exact match over all source + dest id columns.
        let mut match_params: Vec<IdValue> = Vec::new();
        let mut all_values = source_values.clone();
        all_values.extend(dest_values.clone());
        let match_pred = predicate(&all_values, &mut match_params, 0);

        let existing = tx
            .query_opt(
                &format!("SELECT 1 FROM {} WHERE {} LIMIT 1", table, match_pred),
                &id_param_refs(&match_params),
            )
            .await?;

        if existing.is_some() {
            // Re-adding the same pair updates timestamp and status in place.
            let mut params: Vec<IdValue> = Vec::new();
            let pred = predicate(&all_values, &mut params, 1);
            let mut refs: Vec<&(dyn ToSql + Sync)> = vec![&status_str];
            refs.extend(params.iter().map(|v| v as &(dyn ToSql + Sync)));
            tx.execute(
                &format!(
                    "UPDATE {} SET updated = NOW(), status = $1 WHERE {}",
                    table, pred
                ),
                &refs,
            )
            .await?;
        } else {
            // The destination tuple is the primary key: drop any row that
            // holds it before inserting the new pair.
            let mut dest_params: Vec<IdValue> = Vec::new();
            let dest_pred = predicate(&dest_values, &mut dest_params, 0);
            tx.execute(
                &format!("DELETE FROM {} WHERE {}", table, dest_pred),
                &id_param_refs(&dest_params),
            )
            .await?;

            let mut insert_cols: Vec<&str> = Vec::new();
            let mut insert_params: Vec<IdValue> = Vec::new();
            for (col, value) in all_values {
                insert_cols.push(col.column.as_str());
                insert_params.push(value);
            }
            insert_cols.push("status");
            let placeholders: Vec<String> =
                (1..=insert_cols.len()).map(|i| format!("${}", i)).collect();

            let mut refs = id_param_refs(&insert_params);
            refs.push(&status_str);
            tx.execute(
                &format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    table,
                    insert_cols.join(", "),
                    placeholders.join(", ")
                ),
                &refs,
            )
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn dest_by_source(&self, spec: &MappingTableSpec, source: &IdTuple) -> Result<IdTuple> {
        let conn = self.pool.get().await?;
        let table = self.qualified(&spec.table);

        let source_values = spec.source_values(source);
        let mut params: Vec<IdValue> = Vec::new();
        let pred = predicate(&source_values, &mut params, 0);
        let cols: Vec<&str> = spec.dest_columns.iter().map(|c| c.column.as_str()).collect();

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE {} LIMIT 1",
                    cols.join(", "),
                    table,
                    pred
                ),
                &id_param_refs(&params),
            )
            .await;

        match row {
            Ok(Some(row)) => tuple_from_row(&row, &spec.dest_columns),
            Ok(None) => Err(MigrateError::no_mapping(&spec.table, source)),
            Err(e) if is_missing_table(&e) => Err(MigrateError::no_mapping(&spec.table, source)),
            Err(e) => Err(e.into()),
        }
    }

    async fn source_by_dest(&self, spec: &MappingTableSpec, dest: &IdTuple) -> Result<IdTuple> {
        let conn = self.pool.get().await?;
        let table = self.qualified(&spec.table);

        let dest_values = spec.dest_values(dest);
        let mut params: Vec<IdValue> = Vec::new();
        let pred = predicate(&dest_values, &mut params, 0);
        let cols: Vec<&str> = spec
            .source_columns
            .iter()
            .map(|c| c.column.as_str())
            .collect();

        let row = conn
            .query_opt(
                &format!(
                    "SELECT {} FROM {} WHERE {} LIMIT 1",
                    cols.join(", "),
                    table,
                    pred
                ),
                &id_param_refs(&params),
            )
            .await;

        match row {
            Ok(Some(row)) => tuple_from_row(&row, &spec.source_columns),
            Ok(None) => Err(MigrateError::no_mapping(&spec.table, dest)),
            Err(e) if is_missing_table(&e) => Err(MigrateError::no_mapping(&spec.table, dest)),
            Err(e) => Err(e.into()),
        }
    }

    fn backend_type(&self) -> &'static str {
        "postgres"
    }
}
