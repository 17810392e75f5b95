//! Connection configuration.

use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file; `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    /// Enforce foreign key constraints (off by default in SQLite).
    pub foreign_keys: bool,
    pub busy_timeout_ms: u64,
}

impl SqliteConfig {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        SqliteConfig {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    pub fn memory() -> Self {
        Self::default()
    }
}

impl Default for SqliteConfig {
    fn default() -> Self {
        SqliteConfig {
            path: None,
            foreign_keys: true,
            busy_timeout_ms: 5_000,
        }
    }
}
