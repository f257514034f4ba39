//! Positional and named argument binding.

use super::scan::{Token, mask, positional_count, tokenize};
use crate::db::mapper::Record;
use crate::error::{DbError, DbResult};
use crate::models::{Statement, Value};

/// Bind positional arguments to a `?` template.
///
/// The number of arguments must equal the number of `?` placeholders
/// outside literals and comments.
pub fn bind_positional<I>(template: &str, args: I) -> DbResult<Statement>
where
    I: IntoIterator,
    I::Item: Into<Value>,
{
    let args: Vec<Value> = args.into_iter().map(Into::into).collect();
    let tokens = tokenize(template);
    if tokens.iter().any(|t| matches!(t, Token::Named(_))) {
        return Err(DbError::invalid_template(
            "named placeholders cannot be bound positionally",
        ));
    }
    let placeholders = positional_count(&tokens);
    if placeholders != args.len() {
        return Err(DbError::arity(placeholders, args.len()));
    }
    Ok(Statement::from_parts(template.to_string(), args))
}

/// An ordered association of placeholder names to values.
///
/// Names are stored without the leading colon; `":id"` and `"id"` refer to
/// the same placeholder.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedArgs {
    entries: Vec<(String, Value)>,
}

impl NamedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, replacing any previous value for the same name.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a binding, returning the value it replaced.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        let name = normalize(name.into());
        let value = value.into();
        match self.entries.iter_mut().find(|(n, _)| *n == name) {
            Some((_, slot)) => Some(std::mem::replace(slot, value)),
            None => {
                self.entries.push((name, value));
                None
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        let name = name.strip_prefix(':').unwrap_or(name);
        self.entries.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Names in insertion order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(n, _)| n.as_str())
    }
}

impl<K, V> FromIterator<(K, V)> for NamedArgs
where
    K: Into<String>,
    V: Into<Value>,
{
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        let mut args = NamedArgs::new();
        for (k, v) in iter {
            args.insert(k, v);
        }
        args
    }
}

fn normalize(name: String) -> String {
    match name.strip_prefix(':') {
        Some(stripped) => stripped.to_string(),
        None => name,
    }
}

/// Rewrite `:name` placeholders to `?`, resolving each occurrence with
/// `lookup`. Positional placeholders are rejected.
fn resolve_named<F>(template: &str, mut lookup: F) -> DbResult<Statement>
where
    F: FnMut(&str) -> Option<Value>,
{
    let mut text = String::with_capacity(template.len());
    let mut args = Vec::new();
    for token in tokenize(template) {
        match token {
            Token::Sql(s) | Token::Quoted(s) => text.push_str(s),
            Token::Positional => {
                return Err(DbError::invalid_template(
                    "positional '?' placeholder in a named template",
                ));
            }
            Token::Named(name) => {
                let value = lookup(name).ok_or_else(|| DbError::UnboundName {
                    name: name.to_string(),
                })?;
                text.push('?');
                args.push(value);
            }
        }
    }
    Ok(Statement::from_parts(text, args))
}

/// Bind a `:name` template against an association list.
///
/// Every placeholder must have a value and every supplied name must be
/// used. A name may appear several times; each occurrence gets its own
/// positional argument.
pub fn bind_named(template: &str, args: &NamedArgs) -> DbResult<Statement> {
    let mut used = vec![false; args.entries.len()];
    let stmt = resolve_named(template, |name| {
        let idx = args.entries.iter().position(|(n, _)| n == name)?;
        used[idx] = true;
        Some(args.entries[idx].1.clone())
    })?;
    if let Some(idx) = used.iter().position(|u| !u) {
        return Err(DbError::UnknownName {
            name: args.entries[idx].0.clone(),
        });
    }
    Ok(stmt)
}

/// Bind a `:name` template against a record's column bindings.
///
/// Columns the template does not mention are ignored.
pub fn bind_record<R: Record>(template: &str, record: &R) -> DbResult<Statement> {
    let values = record.values();
    resolve_named(template, |name| {
        R::COLUMNS
            .iter()
            .position(|c| *c == name)
            .and_then(|idx| values.get(idx).cloned())
    })
}

/// Bind one `VALUES (...)` tuple per record.
///
/// The template must contain a single `VALUES (...)` group holding all of
/// its placeholders, e.g. `INSERT INTO person (name, age) VALUES (:name, :age)`.
/// The group is repeated for each record and the tuples are joined with
/// `", "`.
pub fn bind_named_batch<R: Record>(template: &str, records: &[R]) -> DbResult<Statement> {
    if records.is_empty() {
        return Err(DbError::EmptyBatch);
    }

    let (open, close) = values_group(template)?;
    let (head, group, tail) = (
        &template[..open],
        &template[open..=close],
        &template[close + 1..],
    );
    if has_placeholders(head) || has_placeholders(tail) {
        return Err(DbError::invalid_template(
            "placeholders outside the VALUES group cannot be repeated",
        ));
    }

    let mut tuples = Vec::with_capacity(records.len());
    let mut args = Vec::new();
    for record in records {
        let (text, mut values) = bind_record(group, record)?.into_parts();
        tuples.push(text);
        args.append(&mut values);
    }

    let text = format!("{head}{}{tail}", tuples.join(", "));
    Ok(Statement::from_parts(text, args))
}

fn has_placeholders(sql: &str) -> bool {
    tokenize(sql)
        .iter()
        .any(|t| matches!(t, Token::Positional | Token::Named(_)))
}

/// Byte offsets of the parentheses enclosing the last `VALUES (...)` group.
fn values_group(template: &str) -> DbResult<(usize, usize)> {
    let masked = mask(template).to_ascii_lowercase();
    let bytes = masked.as_bytes();
    let is_word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';

    let keyword = masked
        .match_indices("values")
        .map(|(i, _)| i)
        .filter(|&i| {
            let before = i.checked_sub(1).map(|p| bytes[p]);
            let after = bytes.get(i + "values".len()).copied();
            !before.is_some_and(is_word) && !after.is_some_and(is_word)
        })
        .last()
        .ok_or_else(|| DbError::invalid_template("no VALUES clause found"))?;

    let rest = &masked[keyword + "values".len()..];
    let open_rel = rest
        .find(|c: char| !c.is_whitespace())
        .filter(|&p| rest.as_bytes()[p] == b'(')
        .ok_or_else(|| DbError::invalid_template("VALUES must be followed by '('"))?;
    let open = keyword + "values".len() + open_rel;

    let mut depth = 0usize;
    for (i, &b) in bytes.iter().enumerate().skip(open) {
        match b {
            b'(' => depth += 1,
            b')' => {
                depth -= 1;
                if depth == 0 {
                    return Ok((open, i));
                }
            }
            _ => {}
        }
    }
    Err(DbError::invalid_template("unbalanced parentheses in VALUES group"))
}
