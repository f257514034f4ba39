//! Parameter binding utilities for database queries.
//!
//! This module binds [`Value`] arguments to sqlx queries for the `Any` driver,
//! which forwards them to whichever backend the pool is connected to.

use crate::models::{Statement, Value};
use sqlx::Any;
use sqlx::any::AnyArguments;
use sqlx::query::Query;

/// Bind a parameter to a query.
pub(crate) fn bind_param<'q>(
    query: Query<'q, Any, AnyArguments<'q>>,
    param: &'q Value,
) -> Query<'q, Any, AnyArguments<'q>> {
    match param {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::String(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
    }
}

/// Build a sqlx query from a statement, binding arguments in order.
pub(crate) fn build_query(statement: &Statement) -> Query<'_, Any, AnyArguments<'_>> {
    statement
        .args()
        .iter()
        .fold(sqlx::query(statement.text()), bind_param)
}
