//! Statement-related data models.
//!
//! This module defines argument values, statement descriptors and mutation
//! results.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A parameter or column value.
///
/// In JSON, scalars map to their natural form and bytes to a
/// `{"$bytes": "<base64>"}` object, so every variant reads back as itself.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value
    Float(f64),
    /// String value
    String(String),
    /// Binary data (`{"$bytes": "<base64>"}` in JSON)
    #[serde(with = "base64_bytes")]
    Bytes(Vec<u8>),
}

impl Value {
    /// Check if this value is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this value for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Bytes(_) => "bytes",
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),+ $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v.into())
                }
            }
        )+
    };
}

value_from! {
    bool => Bool,
    i64 => Int,
    i32 => Int,
    i16 => Int,
    u32 => Int,
    f64 => Float,
    f32 => Float,
    String => String,
    Vec<u8> => Bytes,
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<&String> for Value {
    fn from(v: &String) -> Self {
        Value::String(v.clone())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(Value::Null)
    }
}

/// Binary data as a single-key object holding base64 text.
mod base64_bytes {
    use base64::{Engine as _, engine::general_purpose::STANDARD};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    #[derive(Serialize, Deserialize)]
    #[serde(deny_unknown_fields)]
    struct Tagged {
        #[serde(rename = "$bytes")]
        base64: String,
    }

    pub fn serialize<S>(bytes: &Vec<u8>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        Tagged {
            base64: STANDARD.encode(bytes),
        }
        .serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let tagged = Tagged::deserialize(deserializer)?;
        STANDARD.decode(&tagged.base64).map_err(serde::de::Error::custom)
    }
}

/// An immutable statement descriptor: text plus ordered arguments.
///
/// Built by the functions in [`crate::builder`], which guarantee that the
/// argument count matches the placeholder count.
#[derive(Debug, Clone, PartialEq)]
pub struct Statement {
    text: String,
    args: Vec<Value>,
}

impl Statement {
    /// Create a descriptor without placeholder validation.
    ///
    /// Use [`crate::builder::bind_positional`] when the arity should be checked.
    pub fn raw(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            args: Vec::new(),
        }
    }

    pub(crate) fn from_parts(text: String, args: Vec<Value>) -> Self {
        Self { text, args }
    }

    /// Statement text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Ordered arguments.
    pub fn args(&self) -> &[Value] {
        &self.args
    }

    /// Number of arguments.
    pub fn arity(&self) -> usize {
        self.args.len()
    }

    /// Leading keyword of the statement, upper-cased (e.g. `SELECT`).
    ///
    /// Used as error and log context instead of the full text, which may
    /// be long or contain sensitive literals.
    pub fn class(&self) -> String {
        self.text
            .split_whitespace()
            .next()
            .map(|w| {
                w.trim_start_matches('(')
                    .chars()
                    .take_while(|c| c.is_ascii_alphabetic())
                    .collect::<String>()
                    .to_ascii_uppercase()
            })
            .filter(|w| !w.is_empty())
            .unwrap_or_else(|| "UNKNOWN".to_string())
    }

    /// Split into text and arguments.
    pub fn into_parts(self) -> (String, Vec<Value>) {
        (self.text, self.args)
    }
}

impl fmt::Display for Statement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{} arg(s)]", self.text, self.args.len())
    }
}

/// Outcome of a mutation statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MutationResult {
    pub rows_affected: u64,
    /// Generated identifier, when the store reports one.
    pub last_insert_id: Option<i64>,
}
