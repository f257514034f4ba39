//! Connection-related data models.
//!
//! This module defines the supported store backends and their placeholder
//! dialects.

use serde::{Deserialize, Serialize};

/// Supported database types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    PostgreSQL,
    /// Includes MariaDB
    MySQL,
    SQLite,
}

impl DatabaseType {
    /// Parse database type from a connection string.
    pub fn from_connection_string(connection_string: &str) -> Option<Self> {
        let lower = connection_string.to_lowercase();
        if lower.starts_with("postgres://") || lower.starts_with("postgresql://") {
            Some(Self::PostgreSQL)
        } else if lower.starts_with("mysql://") || lower.starts_with("mariadb://") {
            Some(Self::MySQL)
        } else if lower.starts_with("sqlite://") || lower.starts_with("sqlite:") {
            Some(Self::SQLite)
        } else {
            None
        }
    }

    /// Get the display name for this database type.
    pub fn display_name(&self) -> &'static str {
        match self {
            Self::PostgreSQL => "PostgreSQL",
            Self::MySQL => "MySQL",
            Self::SQLite => "SQLite",
        }
    }

    /// Placeholder dialect understood by this backend.
    pub fn bind_style(&self) -> BindStyle {
        match self {
            Self::PostgreSQL => BindStyle::Dollar,
            Self::MySQL | Self::SQLite => BindStyle::Question,
        }
    }
}

impl std::fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

/// Positional placeholder dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindStyle {
    /// `?` (MySQL, SQLite)
    #[default]
    Question,
    /// `$1, $2, ...` (PostgreSQL)
    Dollar,
    /// `:arg1, :arg2, ...` (Oracle)
    Named,
    /// `@p1, @p2, ...` (SQL Server)
    At,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_connection_string() {
        assert_eq!(
            DatabaseType::from_connection_string("postgres://u:p@localhost/db"),
            Some(DatabaseType::PostgreSQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("MYSQL://root@127.0.0.1:3306/test"),
            Some(DatabaseType::MySQL)
        );
        assert_eq!(
            DatabaseType::from_connection_string("sqlite::memory:"),
            Some(DatabaseType::SQLite)
        );
        assert_eq!(DatabaseType::from_connection_string("redis://x"), None);
    }

    #[test]
    fn test_bind_style_per_backend() {
        assert_eq!(DatabaseType::PostgreSQL.bind_style(), BindStyle::Dollar);
        assert_eq!(DatabaseType::MySQL.bind_style(), BindStyle::Question);
        assert_eq!(DatabaseType::SQLite.bind_style(), BindStyle::Question);
    }

    #[test]
    fn test_display() {
        assert_eq!(DatabaseType::SQLite.to_string(), "SQLite");
    }
}
