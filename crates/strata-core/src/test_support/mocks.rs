//! Observable, deterministic mock driver.

use crate::driver::{Driver, DriverError, Row};
use crate::value::Value;
use std::collections::VecDeque;

/// One statement as it reached the driver.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<Value>,
}

/// Records every statement it receives and answers queries from a queue of
/// canned row sets. Insert ids are handed out monotonically: each executed
/// `INSERT` advances the counter, `last_insert_id` returns the most recent.
#[derive(Debug, Default)]
pub struct RecordingDriver {
    pub statements: Vec<RecordedStatement>,
    canned_rows: VecDeque<Vec<Row>>,
    next_insert_id: i64,
    last_id: i64,
    /// Affected-row count reported by `execute`.
    pub rows_affected: u64,
    /// When set, any statement containing this substring fails with a
    /// constraint error.
    pub fail_on: Option<String>,
}

impl RecordingDriver {
    pub fn new() -> Self {
        RecordingDriver {
            statements: Vec::new(),
            canned_rows: VecDeque::new(),
            next_insert_id: 1,
            last_id: 0,
            rows_affected: 1,
            fail_on: None,
        }
    }

    /// Queue one result set; consumed in order by `query`.
    pub fn push_rows(&mut self, rows: Vec<Row>) {
        self.canned_rows.push_back(rows);
    }

    pub fn sql_log(&self) -> Vec<&str> {
        self.statements.iter().map(|s| s.sql.as_str()).collect()
    }

    pub fn statements_matching(&self, needle: &str) -> Vec<&RecordedStatement> {
        self.statements
            .iter()
            .filter(|s| s.sql.contains(needle))
            .collect()
    }

    fn record(&mut self, sql: &str, params: &[Value]) -> Result<(), DriverError> {
        if let Some(needle) = &self.fail_on {
            if sql.contains(needle.as_str()) {
                return Err(DriverError::Constraint(format!(
                    "mock failure triggered by {needle:?}"
                )));
            }
        }
        self.statements.push(RecordedStatement {
            sql: sql.to_string(),
            params: params.to_vec(),
        });
        Ok(())
    }
}

impl Driver for RecordingDriver {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError> {
        self.record(sql, params)?;
        if sql.trim_start().to_ascii_uppercase().starts_with("INSERT") {
            self.last_id = self.next_insert_id;
            self.next_insert_id += 1;
        }
        Ok(self.rows_affected)
    }

    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError> {
        self.record(sql, params)?;
        Ok(self.canned_rows.pop_front().unwrap_or_default())
    }

    fn last_insert_id(&mut self) -> Result<i64, DriverError> {
        Ok(self.last_id)
    }

    fn begin(&mut self) -> Result<(), DriverError> {
        self.record("BEGIN", &[])?;
        Ok(())
    }

    fn commit(&mut self) -> Result<(), DriverError> {
        self.record("COMMIT", &[])?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), DriverError> {
        self.record("ROLLBACK", &[])?;
        Ok(())
    }
}
