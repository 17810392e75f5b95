//! The narrow interface the ORM executes SQL through.

use crate::value::Value;
use indexmap::IndexMap;
use thiserror::Error;

/// One result row, columns in select order.
pub type Row = IndexMap<String, Value>;

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("constraint violation: {0}")]
    Constraint(String),

    #[error("execution error: {0}")]
    Execution(String),
}

/// Synchronous, single-owner SQL execution. The unit of work and the query
/// layer speak to the database exclusively through this trait; tests
/// substitute a recording mock.
pub trait Driver {
    /// Execute a statement that returns no rows; yields the affected row
    /// count.
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<u64, DriverError>;

    /// Execute a statement that returns rows.
    fn query(&mut self, sql: &str, params: &[Value]) -> Result<Vec<Row>, DriverError>;

    /// Identifier generated by the most recent insert.
    fn last_insert_id(&mut self) -> Result<i64, DriverError>;

    fn begin(&mut self) -> Result<(), DriverError>;

    fn commit(&mut self) -> Result<(), DriverError>;

    fn rollback(&mut self) -> Result<(), DriverError>;
}
