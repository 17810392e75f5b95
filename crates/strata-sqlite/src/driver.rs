//! [`Driver`] implementation over a rusqlite connection.

use std::time::Duration;

use rusqlite::types::ValueRef;
use rusqlite::Connection;
use strata_core::{Driver, DriverError, Row, Value};

use crate::config::SqliteConfig;

pub struct SqliteDriver {
    conn: Connection,
}

impl SqliteDriver {
    pub fn open(config: &SqliteConfig) -> Result<Self, DriverError> {
        let conn = match &config.path {
            Some(path) => Connection::open(path),
            None => Connection::open_in_memory(),
        }
        .map_err(|err| DriverError::Connection(err.to_string()))?;

        if config.foreign_keys {
            conn.pragma_update(None, "foreign_keys", true)
                .map_err(|err| DriverError::Connection(err.to_string()))?;
        }
        conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))
            .map_err(|err| DriverError::Connection(err.to_string()))?;

        tracing::debug!(path = ?config.path, "opened sqlite connection");
        Ok(SqliteDriver { conn })
    }

    pub fn memory() -> Result<Self, DriverError> {
        Self::open(&SqliteConfig::memory())
    }

    /// Run several semicolon-separated statements, typically schema DDL.
    pub fn execute_batch(&self, sql: &str) -> Result<(), DriverError> {
        self.conn.execute_batch(sql).map_err(map_error)
    }
}

impl Driver for SqliteDriver {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        let affected = self
            .conn
            .execute(sql, rusqlite::params_from_iter(params.iter().map(to_sql)))
            .map_err(map_error)?;
        Ok(affected as u64)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        let mut stmt = self.conn.prepare(sql).map_err(map_error)?;
        let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

        let mut rows = stmt
            .query(rusqlite::params_from_iter(params.iter().map(to_sql)))
            .map_err(map_error)?;
        let mut result = Vec::new();
        while let Some(row) = rows.next().map_err(map_error)? {
            let mut record = Row::with_capacity(columns.len());
            for (index, column) in columns.iter().enumerate() {
                let value = row.get_ref(index).map_err(map_error)?;
                record.insert(column.clone(), from_sql(value));
            }
            result.push(record);
        }
        Ok(result)
    }

    fn last_insert_id(&mut self) -> Result<i64, DriverError> {
        Ok(self.conn.last_insert_rowid())
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.conn.execute_batch("BEGIN").map_err(map_error)
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.conn.execute_batch("COMMIT").map_err(map_error)
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.conn.execute_batch("ROLLBACK").map_err(map_error)
    }
}

fn to_sql(value: &Value) -> rusqlite::types::Value {
    match value {
        Value::Null => rusqlite::types::Value::Null,
        Value::Int(i) => rusqlite::types::Value::Integer(*i),
        Value::Float(f) => rusqlite::types::Value::Real(*f),
        // SQLite has no boolean affinity
        Value::Bool(b) => rusqlite::types::Value::Integer(i64::from(*b)),
        Value::Str(s) => rusqlite::types::Value::Text(s.clone()),
    }
}

fn from_sql(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Int(i),
        ValueRef::Real(f) => Value::Float(f),
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => {
            Value::Str(String::from_utf8_lossy(bytes).into_owned())
        }
    }
}

fn map_error(err: rusqlite::Error) -> DriverError {
    match &err {
        rusqlite::Error::SqliteFailure(failure, _)
            if failure.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            DriverError::Constraint(err.to_string())
        }
        _ => DriverError::Execution(err.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_each_value_kind() {
        let mut driver = SqliteDriver::memory().unwrap();
        driver
            .execute_batch("CREATE TABLE t (i INTEGER, f REAL, b INTEGER, s TEXT, n TEXT)")
            .unwrap();
        driver
            .execute(
                "INSERT INTO t (i, f, b, s, n) VALUES (?, ?, ?, ?, ?)",
                &[
                    Value::Int(42),
                    Value::Float(1.5),
                    Value::Bool(true),
                    Value::from("hello"),
                    Value::Null,
                ],
            )
            .unwrap();

        let rows = driver.query("SELECT i, f, b, s, n FROM t", &[]).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["i"], Value::Int(42));
        assert_eq!(rows[0]["f"], Value::Float(1.5));
        // booleans come back as integers
        assert_eq!(rows[0]["b"], Value::Int(1));
        assert_eq!(rows[0]["s"], Value::from("hello"));
        assert_eq!(rows[0]["n"], Value::Null);
    }

    #[test]
    fn last_insert_id_tracks_rowids() {
        let mut driver = SqliteDriver::memory().unwrap();
        driver
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY AUTOINCREMENT, s TEXT)")
            .unwrap();
        driver
            .execute("INSERT INTO t (s) VALUES (?)", &[Value::from("a")])
            .unwrap();
        assert_eq!(driver.last_insert_id().unwrap(), 1);
        driver
            .execute("INSERT INTO t (s) VALUES (?)", &[Value::from("b")])
            .unwrap();
        assert_eq!(driver.last_insert_id().unwrap(), 2);
    }

    #[test]
    fn constraint_violations_map_to_constraint_errors() {
        let mut driver = SqliteDriver::memory().unwrap();
        driver
            .execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY)")
            .unwrap();
        driver
            .execute("INSERT INTO t (id) VALUES (?)", &[Value::Int(1)])
            .unwrap();
        let err = driver
            .execute("INSERT INTO t (id) VALUES (?)", &[Value::Int(1)])
            .unwrap_err();
        assert!(matches!(err, DriverError::Constraint(_)));
    }

    #[test]
    fn transactions_roll_back() {
        let mut driver = SqliteDriver::memory().unwrap();
        driver.execute_batch("CREATE TABLE t (id INTEGER)").unwrap();
        driver.begin().unwrap();
        driver
            .execute("INSERT INTO t (id) VALUES (?)", &[Value::Int(1)])
            .unwrap();
        driver.rollback().unwrap();
        assert!(driver.query("SELECT id FROM t", &[]).unwrap().is_empty());
    }
}
