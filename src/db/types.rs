//! Row decoding.
//!
//! Column values arriving through the `Any` driver are classified into a
//! [`TypeCategory`] and decoded into [`Value`]s.

use crate::error::{DbError, DbResult};
use crate::models::Value;
use sqlx::any::AnyRow;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use std::sync::Arc;

/// Logical category for a column value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Boolean,
    Text,
    Binary,
    Null,
}

/// Classify a type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower == "null" {
        return TypeCategory::Null;
    }

    if lower.contains("int") || lower.contains("serial") {
        return TypeCategory::Integer;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    TypeCategory::Text
}

/// Column names of a row, shared by every row of a result set.
pub(crate) fn column_names(row: &AnyRow) -> Arc<[String]> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every column of a row.
pub(crate) fn decode_row(row: &AnyRow) -> DbResult<Vec<Value>> {
    (0..row.len()).map(|idx| decode_column(row, idx)).collect()
}

fn decode_column(row: &AnyRow, idx: usize) -> DbResult<Value> {
    let column = || {
        row.columns()
            .get(idx)
            .map(|c| c.name().to_string())
            .unwrap_or_else(|| idx.to_string())
    };

    let raw = row
        .try_get_raw(idx)
        .map_err(|e| DbError::scan(column(), "value", e.to_string()))?;
    if raw.is_null() {
        return Ok(Value::Null);
    }
    let type_name = raw.type_info().name().to_string();

    let decoded = match categorize_type(&type_name) {
        TypeCategory::Null => Some(Value::Null),
        TypeCategory::Integer => row.try_get::<i64, _>(idx).ok().map(Value::Int),
        TypeCategory::Float => row.try_get::<f64, _>(idx).ok().map(Value::Float),
        TypeCategory::Boolean => row.try_get::<bool, _>(idx).ok().map(Value::Bool),
        TypeCategory::Binary => row.try_get::<Vec<u8>, _>(idx).ok().map(Value::Bytes),
        TypeCategory::Text => row.try_get::<String, _>(idx).ok().map(Value::String),
    };

    decoded
        .or_else(|| row.try_get::<String, _>(idx).ok().map(Value::String))
        .ok_or_else(|| DbError::scan(column(), "decodable value", type_name))
}
