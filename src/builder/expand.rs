//! List expansion and multi-row inserts.

use super::scan::{Token, positional_count, tokenize};
use crate::db::mapper::Record;
use crate::error::{DbError, DbResult};
use crate::models::{Statement, Value};

/// A positional argument that is either a single value or a list to be
/// spread over an `IN (...)` clause.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    Scalar(Value),
    List(Vec<Value>),
}

impl Arg {
    pub fn scalar(value: impl Into<Value>) -> Self {
        Self::Scalar(value.into())
    }

    pub fn list<I>(items: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<Value>,
    {
        Self::List(items.into_iter().map(Into::into).collect())
    }
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Scalar(value)
    }
}

fn placeholder_list(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Expand list arguments in place.
///
/// Each `?` consumes one argument. A scalar keeps its `?`; a list of N
/// values replaces its `?` with N comma-separated `?`. Arguments stay in
/// order.
pub fn expand_in(template: &str, args: Vec<Arg>) -> DbResult<Statement> {
    let tokens = tokenize(template);
    if tokens.iter().any(|t| matches!(t, Token::Named(_))) {
        return Err(DbError::invalid_template(
            "named placeholders must be bound before list expansion",
        ));
    }
    let placeholders = positional_count(&tokens);
    if placeholders != args.len() {
        return Err(DbError::arity(placeholders, args.len()));
    }

    let mut text = String::with_capacity(template.len());
    let mut values = Vec::with_capacity(args.len());
    let mut args = args.into_iter().enumerate();
    for token in tokens {
        match token {
            Token::Sql(s) | Token::Quoted(s) => text.push_str(s),
            Token::Named(name) => {
                text.push(':');
                text.push_str(name);
            }
            Token::Positional => match args.next() {
                Some((_, Arg::Scalar(v))) => {
                    text.push('?');
                    values.push(v);
                }
                Some((position, Arg::List(list))) => {
                    if list.is_empty() {
                        return Err(DbError::EmptyList { position });
                    }
                    text.push_str(&placeholder_list(list.len()));
                    values.extend(list);
                }
                None => return Err(DbError::arity(placeholders, values.len())),
            },
        }
    }
    Ok(Statement::from_parts(text, values))
}

/// Expand a single-placeholder template over a list.
///
/// `SELECT * FROM t WHERE id IN (?)` with `[1, 2, 3]` becomes
/// `SELECT * FROM t WHERE id IN (?, ?, ?)`.
pub fn expand_in_clause<I>(template: &str, list: I) -> DbResult<Statement>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let placeholders = positional_count(&tokenize(template));
    if placeholders != 1 {
        return Err(DbError::arity(placeholders, 1));
    }
    expand_in(template, vec![Arg::list(list)])
}

/// Build `head VALUES (?, ..), (?, ..)` with row-major arguments.
///
/// `head` is everything before `VALUES`, e.g.
/// `INSERT INTO person (name, age)`. A head that already ends in `VALUES`
/// is accepted as well.
pub fn build_multi_row_insert(
    head: &str,
    rows: Vec<Vec<Value>>,
    per_row_arity: usize,
) -> DbResult<Statement> {
    if rows.is_empty() {
        return Err(DbError::EmptyBatch);
    }
    if per_row_arity == 0 {
        return Err(DbError::invalid_template("rows must have at least one column"));
    }
    if tokenize(head)
        .iter()
        .any(|t| matches!(t, Token::Positional | Token::Named(_)))
    {
        return Err(DbError::invalid_template(
            "insert head must not contain placeholders",
        ));
    }

    let head = head.trim_end();
    let ends_with_values = head.len() >= 6
        && head.is_char_boundary(head.len() - 6)
        && head[head.len() - 6..].eq_ignore_ascii_case("values");

    let tuple = format!("({})", placeholder_list(per_row_arity));
    let mut args = Vec::with_capacity(rows.len() * per_row_arity);
    for row in rows {
        if row.len() != per_row_arity {
            return Err(DbError::arity(per_row_arity, row.len()));
        }
        args.extend(row);
    }
    let tuples = vec![tuple.as_str(); args.len() / per_row_arity].join(", ");

    let text = if ends_with_values {
        format!("{head} {tuples}")
    } else {
        format!("{head} VALUES {tuples}")
    };
    Ok(Statement::from_parts(text, args))
}

/// Build a multi-row insert for records, with columns from `R::COLUMNS`.
pub fn insert_records<R: Record>(table: &str, records: &[R]) -> DbResult<Statement> {
    let head = format!("INSERT INTO {} ({})", table, R::COLUMNS.join(", "));
    let rows = records.iter().map(R::values).collect();
    build_multi_row_insert(&head, rows, R::COLUMNS.len())
}
