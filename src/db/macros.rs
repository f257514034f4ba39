//! Declarative macros for records and argument lists.

/// Implement [`Record`](crate::db::Record) for a struct by listing its
/// fields and the columns they bind to.
///
/// Field types must implement [`FromValue`](crate::db::FromValue) and
/// `Clone + Into<Value>`.
///
/// # Example
///
/// ```ignore
/// struct Person {
///     id: i64,
///     name: String,
///     nick: Option<String>,
/// }
///
/// sqlkit::impl_record!(Person {
///     id => "id",
///     name => "name",
///     nick => "nickname",
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ident { $($field:ident => $column:literal),+ $(,)? }) => {
        impl $crate::db::Record for $ty {
            const COLUMNS: &'static [&'static str] = &[$($column),+];

            fn from_row(row: &$crate::db::Row) -> $crate::error::DbResult<Self> {
                Ok(Self {
                    $($field: row.get($column)?,)+
                })
            }

            fn values(&self) -> ::std::vec::Vec<$crate::models::Value> {
                ::std::vec![$($crate::models::Value::from(::std::clone::Clone::clone(&self.$field))),+]
            }
        }
    };
}

/// Build a `Vec<Value>` from heterogeneous arguments.
///
/// ```ignore
/// let stmt = bind_positional("select * from t where a = ? and b = ?", args![1, "x"])?;
/// ```
#[macro_export]
macro_rules! args {
    () => {
        ::std::vec::Vec::<$crate::models::Value>::new()
    };
    ($($value:expr),+ $(,)?) => {
        ::std::vec![$($crate::models::Value::from($value)),+]
    };
}
