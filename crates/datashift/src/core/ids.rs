//! Identity fields, values, and tuples.
//!
//! Every migration declares ordered source and destination id field lists.
//! Id values are restricted to int/string and coerced to their declared kind
//! wherever they cross a boundary: row extraction, mapping storage, driver
//! reads and writes.

use std::collections::BTreeMap;
use std::fmt;

use bytes::BytesMut;
use serde::{Deserialize, Serialize};
use tokio_postgres::types::{to_sql_checked, IsNull, ToSql, Type};

use crate::core::value::Value;
use crate::error::{MigrateError, Result};

/// Declared type of an id field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdKind {
    /// Coerced to a 64-bit integer; stored as BIGINT.
    Int,
    /// Coerced to a string; stored as TEXT.
    Str,
}

impl IdKind {
    /// Coerce a row value to this kind.
    ///
    /// A null value cannot identify anything and is rejected by the caller
    /// before coercion.
    pub fn coerce(&self, value: &Value) -> Result<IdValue> {
        match (self, value) {
            (IdKind::Int, Value::Int(i)) => Ok(IdValue::Int(*i)),
            (IdKind::Int, Value::Bool(b)) => Ok(IdValue::Int(*b as i64)),
            (IdKind::Int, Value::Float(f)) => Ok(IdValue::Int(*f as i64)),
            (IdKind::Int, Value::Str(s)) => s.trim().parse::<i64>().map(IdValue::Int).map_err(|_| {
                MigrateError::Config(format!("Cannot coerce '{}' to an integer id", s))
            }),
            (IdKind::Str, Value::Str(s)) => Ok(IdValue::Str(s.clone())),
            (IdKind::Str, Value::Int(i)) => Ok(IdValue::Str(i.to_string())),
            (IdKind::Str, Value::Bool(b)) => Ok(IdValue::Str(b.to_string())),
            (IdKind::Str, Value::Float(f)) => Ok(IdValue::Str(f.to_string())),
            (_, Value::Null) => Err(MigrateError::Config(
                "Cannot coerce NULL to an id value".to_string(),
            )),
        }
    }

    /// SQL column type for mapping table columns of this kind.
    pub fn sql_type(&self) -> &'static str {
        match self {
            IdKind::Int => "BIGINT",
            IdKind::Str => "TEXT",
        }
    }
}

/// An id field declaration: name plus kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdField {
    /// Field name as it appears in rows and entities.
    pub name: String,

    /// Declared kind, governing coercion and storage type.
    #[serde(default = "default_id_kind")]
    pub kind: IdKind,
}

impl IdField {
    /// Create an integer id field.
    pub fn int(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdKind::Int,
        }
    }

    /// Create a string id field.
    pub fn str(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: IdKind::Str,
        }
    }
}

fn default_id_kind() -> IdKind {
    IdKind::Int
}

/// A coerced id value.
///
/// Unlike [`Value`] this carries no floats, so exact equality and hashing
/// are sound. `Null` appears only in synthetic mappings (orphan re-writes
/// record all-null source ids).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdValue {
    Null,
    Int(i64),
    Str(String),
}

impl IdValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, IdValue::Null)
    }
}

impl fmt::Display for IdValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IdValue::Null => write!(f, "NULL"),
            IdValue::Int(i) => write!(f, "{}", i),
            IdValue::Str(s) => write!(f, "{}", s),
        }
    }
}

impl From<IdValue> for Value {
    fn from(v: IdValue) -> Self {
        match v {
            IdValue::Null => Value::Null,
            IdValue::Int(i) => Value::Int(i),
            IdValue::Str(s) => Value::Str(s),
        }
    }
}

impl From<i64> for IdValue {
    fn from(v: i64) -> Self {
        IdValue::Int(v)
    }
}

impl From<&str> for IdValue {
    fn from(v: &str) -> Self {
        IdValue::Str(v.to_string())
    }
}

impl From<String> for IdValue {
    fn from(v: String) -> Self {
        IdValue::Str(v)
    }
}

// Parameter binding for the PostgreSQL mapping store. NULL-safe lookups
// never bind a Null; it only reaches the wire in INSERT value lists.
impl ToSql for IdValue {
    fn to_sql(
        &self,
        ty: &Type,
        out: &mut BytesMut,
    ) -> std::result::Result<IsNull, Box<dyn std::error::Error + Sync + Send>> {
        match self {
            IdValue::Null => Ok(IsNull::Yes),
            IdValue::Int(i) => i.to_sql(ty, out),
            IdValue::Str(s) => s.to_sql(ty, out),
        }
    }

    fn accepts(ty: &Type) -> bool {
        <i64 as ToSql>::accepts(ty) || <String as ToSql>::accepts(ty)
    }

    to_sql_checked!();
}

/// An ordered tuple of id values keyed by field name.
///
/// Field-name ordering is the map's natural order, which doubles as the
/// "sorted source id tuple" key for stub deduplication. Equality is exact
/// and field-wise (a NULL only equals a NULL in the same field).
#[derive(Debug, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct IdTuple(BTreeMap<String, IdValue>);

impl IdTuple {
    /// Create an empty tuple.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a tuple with every declared field set to NULL.
    ///
    /// Used when an orphan entity is re-written: the mapping records
    /// synthetic null-valued source ids so later runs still recognize the
    /// entity as destination-truth-only.
    pub fn nulls(fields: &[IdField]) -> Self {
        Self(
            fields
                .iter()
                .map(|f| (f.name.clone(), IdValue::Null))
                .collect(),
        )
    }

    /// Get a field's value.
    pub fn get(&self, field: &str) -> Option<&IdValue> {
        self.0.get(field)
    }

    /// Set a field's value.
    pub fn set(&mut self, field: impl Into<String>, value: impl Into<IdValue>) {
        self.0.insert(field.into(), value.into());
    }

    /// Builder-style field assignment.
    #[must_use]
    pub fn with(mut self, field: impl Into<String>, value: impl Into<IdValue>) -> Self {
        self.set(field, value);
        self
    }

    /// Iterate over (field, value) pairs in field-name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &IdValue)> {
        self.0.iter()
    }

    /// Number of id fields.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check if the tuple is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy these ids into a record, overwriting existing fields.
    pub fn apply_to(&self, record: &mut crate::core::value::Record) {
        for (name, value) in &self.0 {
            record.set(name.clone(), Value::from(value.clone()));
        }
    }
}

impl fmt::Display for IdTuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(")?;
        for (i, (name, value)) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{}={}", name, value)?;
        }
        write!(f, ")")
    }
}

impl FromIterator<(String, IdValue)> for IdTuple {
    fn from_iter<I: IntoIterator<Item = (String, IdValue)>>(iter: I) -> Self {
        Self(iter.into_iter().collect())
    }
}

/// Extract and coerce a row's id tuple using declared id fields.
///
/// Fails with [`MigrateError::NoIdSet`] if any declared field is absent from
/// the row or holds NULL.
pub fn extract_ids(migration: &str, row: &crate::core::value::Record, fields: &[IdField]) -> Result<IdTuple> {
    let mut tuple = IdTuple::new();
    for field in fields {
        let value = row
            .get(&field.name)
            .filter(|v| !v.is_null())
            .ok_or_else(|| MigrateError::no_id_set(migration, &field.name))?;
        tuple.set(field.name.clone(), field.kind.coerce(value)?);
    }
    Ok(tuple)
}
