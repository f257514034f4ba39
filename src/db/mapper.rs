//! Row to record mapping.
//!
//! A [`Row`] is a decoded result row. Types implementing [`Record`] declare
//! the columns they bind to and how to build themselves from a row; the
//! [`impl_record!`](crate::impl_record) macro writes that impl for plain
//! structs.

use crate::db::executor::RowCursor;
use crate::error::{DbError, DbResult};
use crate::models::Value;
use std::marker::PhantomData;
use std::sync::Arc;

/// One decoded result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Value>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Value>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Value of a column by name. Exact matches win over case-insensitive ones.
    pub fn value(&self, column: &str) -> Option<&Value> {
        let idx = self
            .columns
            .iter()
            .position(|c| c == column)
            .or_else(|| {
                self.columns
                    .iter()
                    .position(|c| c.eq_ignore_ascii_case(column))
            })?;
        self.values.get(idx)
    }

    /// Decode a column by name.
    pub fn get<T: FromValue>(&self, column: &str) -> DbResult<T> {
        let value = self
            .value(column)
            .ok_or_else(|| DbError::scan(column, T::EXPECTED, "missing column"))?;
        T::from_value(value).ok_or_else(|| DbError::scan(column, T::EXPECTED, value.type_name()))
    }

    /// Decode a column by position.
    pub fn get_index<T: FromValue>(&self, idx: usize) -> DbResult<T> {
        let column = self
            .columns
            .get(idx)
            .cloned()
            .unwrap_or_else(|| idx.to_string());
        let value = self
            .values
            .get(idx)
            .ok_or_else(|| DbError::scan(&column, T::EXPECTED, "missing column"))?;
        T::from_value(value).ok_or_else(|| DbError::scan(column, T::EXPECTED, value.type_name()))
    }

    pub fn into_values(self) -> Vec<Value> {
        self.values
    }
}

/// Conversion from a column value.
pub trait FromValue: Sized {
    /// Type name used in scan errors.
    const EXPECTED: &'static str;

    /// `None` when the value has an incompatible type or is out of range.
    fn from_value(value: &Value) -> Option<Self>;
}

impl FromValue for Value {
    const EXPECTED: &'static str = "any";

    fn from_value(value: &Value) -> Option<Self> {
        Some(value.clone())
    }
}

impl FromValue for i64 {
    const EXPECTED: &'static str = "int";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Int(v) => Some(*v),
            _ => None,
        }
    }
}

macro_rules! from_int_value {
    ($($ty:ty),+) => {
        $(
            impl FromValue for $ty {
                const EXPECTED: &'static str = stringify!($ty);

                fn from_value(value: &Value) -> Option<Self> {
                    match value {
                        Value::Int(v) => <$ty>::try_from(*v).ok(),
                        _ => None,
                    }
                }
            }
        )+
    };
}

// Only types with a lossless `Into<Value>`, so records stay writable.
from_int_value!(i32, u32);

impl FromValue for f64 {
    const EXPECTED: &'static str = "float";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Float(v) => Some(*v),
            Value::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl FromValue for bool {
    const EXPECTED: &'static str = "bool";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bool(v) => Some(*v),
            // SQLite and MySQL store booleans as integers
            Value::Int(0) => Some(false),
            Value::Int(1) => Some(true),
            _ => None,
        }
    }
}

impl FromValue for String {
    const EXPECTED: &'static str = "string";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl FromValue for Vec<u8> {
    const EXPECTED: &'static str = "bytes";

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Bytes(v) => Some(v.clone()),
            _ => None,
        }
    }
}

impl<T: FromValue> FromValue for Option<T> {
    const EXPECTED: &'static str = T::EXPECTED;

    fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Null => Some(None),
            other => T::from_value(other).map(Some),
        }
    }
}

/// A type that maps to and from a set of columns.
pub trait Record: Sized {
    /// Bound column names, in the order [`values`](Record::values) returns them.
    const COLUMNS: &'static [&'static str];

    fn from_row(row: &Row) -> DbResult<Self>;

    /// Column values in `COLUMNS` order.
    fn values(&self) -> Vec<Value>;
}

/// Map a row into a record.
///
/// Every bound column must be present in the row; extra columns are ignored.
pub fn map<R: Record>(row: &Row) -> DbResult<R> {
    if let Some(missing) = R::COLUMNS.iter().find(|c| row.value(c).is_none()) {
        return Err(DbError::scan(*missing, "bound column", "missing column"));
    }
    R::from_row(row)
}

/// Lazily map every row of a cursor.
pub fn map_all<R: Record>(cursor: RowCursor<'_>) -> RecordStream<'_, R> {
    RecordStream {
        cursor,
        failed: false,
        _record: PhantomData,
    }
}

/// Records mapped from a [`RowCursor`], in row order.
///
/// The stream ends at the first cursor or mapping error, which is returned
/// once; records already yielded stay with the caller.
pub struct RecordStream<'c, R> {
    cursor: RowCursor<'c>,
    failed: bool,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> RecordStream<'_, R> {
    pub async fn next(&mut self) -> DbResult<Option<R>> {
        if self.failed {
            return Ok(None);
        }
        let result = match self.cursor.next().await {
            Ok(Some(row)) => map::<R>(&row).map(Some),
            Ok(None) => Ok(None),
            Err(e) => Err(e),
        };
        if result.is_err() {
            self.failed = true;
            self.cursor.finish();
        }
        result
    }

    /// Collect every record, failing on the first error.
    pub async fn try_collect(mut self) -> DbResult<Vec<R>> {
        let mut records = Vec::new();
        while let Some(record) = self.next().await? {
            records.push(record);
        }
        Ok(records)
    }

    /// Discard the remaining rows.
    pub fn close(self) {
        self.cursor.close();
    }
}
