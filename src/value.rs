//! Payload values carried in `Insert`/`Update` calls and returned from
//! `Where`/`Select`.
//!
//! A closed sum type sits at the `sqlx` bind/decode boundary so arbitrary
//! application-table columns can be bound and read back without each
//! caller needing its own generated row type.

use serde::Serialize;
use sqlx::postgres::{PgArguments, PgRow};
use sqlx::query::Query;
use sqlx::{Postgres, Row};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Value {
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
    Null,
}

impl Value {
    /// Bind a non-`Null` value as a query parameter. `Null` has no single
    /// wire type Postgres can infer for an arbitrary target column (a
    /// bound parameter fixes its type, and there's no implicit cast from
    /// e.g. text to bigint), so callers building dynamic INSERT/UPDATE
    /// statements must emit a literal `NULL` in the SQL text instead of
    /// calling this for `Value::Null` — see `sql_value` below.
    pub(crate) fn bind<'q>(
        &'q self,
        query: Query<'q, Postgres, PgArguments>,
    ) -> Query<'q, Postgres, PgArguments> {
        match self {
            Value::Int(v) => query.bind(v),
            Value::Float(v) => query.bind(v),
            Value::Bool(v) => query.bind(v),
            Value::Text(v) => query.bind(v),
            Value::Null => unreachable!("Value::Null must be emitted as a SQL literal, not bound"),
        }
    }

    /// Decode a single named column of a fetched row into a `Value`,
    /// trying progressively narrower-to-wider integer/float/text types
    /// until one matches the column's actual encoding.
    pub(crate) fn from_row_column(row: &PgRow, column: &str) -> Value {
        if let Ok(v) = row.try_get::<i64, _>(column) {
            return Value::Int(v);
        }
        if let Ok(v) = row.try_get::<i32, _>(column) {
            return Value::Int(v as i64);
        }
        if let Ok(v) = row.try_get::<f64, _>(column) {
            return Value::Float(v);
        }
        if let Ok(v) = row.try_get::<bool, _>(column) {
            return Value::Bool(v);
        }
        if let Ok(v) = row.try_get::<String, _>(column) {
            return Value::Text(v);
        }
        Value::Null
    }
}

pub type Payload = HashMap<String, Value>;

/// Build a payload row-map from the fetched payload columns (everything
/// past the six MVCC bookkeeping columns).
pub(crate) fn payload_from_row(row: &PgRow, payload_columns: &[String]) -> Payload {
    payload_columns
        .iter()
        .map(|c| (c.clone(), Value::from_row_column(row, c)))
        .collect()
}

/// Build the `VALUES (...)` clause for a dynamic INSERT, one entry per
/// value starting at parameter index `start`. `Null` values are emitted
/// as the literal `NULL` rather than a bound placeholder, since binding a
/// typed `NULL` parameter fixes its wire type and Postgres has no
/// implicit cast from that type to an arbitrary target column's type.
/// Returns the clause list alongside the subset of values that still need
/// binding, in the same order as their placeholders.
pub(crate) fn value_clauses(values: &[Value], start: usize) -> (Vec<String>, Vec<&Value>) {
    let mut clauses = Vec::with_capacity(values.len());
    let mut to_bind = Vec::with_capacity(values.len());
    let mut next = start;
    for v in values {
        if matches!(v, Value::Null) {
            clauses.push("NULL".to_string());
        } else {
            clauses.push(format!("${next}"));
            next += 1;
            to_bind.push(v);
        }
    }
    (clauses, to_bind)
}

/// Render a field/value pair list as a JSON object, for attaching a
/// structured payload snapshot to tracing events.
pub(crate) fn payload_json(fields: &[String], values: &[Value]) -> serde_json::Value {
    let map: serde_json::Map<String, serde_json::Value> = fields
        .iter()
        .cloned()
        .zip(
            values
                .iter()
                .map(|v| serde_json::to_value(v).unwrap_or(serde_json::Value::Null)),
        )
        .collect();
    serde_json::Value::Object(map)
}
