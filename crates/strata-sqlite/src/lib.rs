//! SQLite backend for the strata ORM.
//!
//! [`SqliteDriver`] implements [`strata_core::Driver`] over a rusqlite
//! connection, in-memory or file-backed. Schema management stays with the
//! application; [`SqliteDriver::execute_batch`] runs DDL scripts.

pub mod config;
pub mod driver;

pub use config::SqliteConfig;
pub use driver::SqliteDriver;
