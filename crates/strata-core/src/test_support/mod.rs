//! Shared test doubles and metadata fixtures.
//!
//! Compiled unconditionally so downstream crates can use them in their own
//! test suites.

pub mod fixtures;
pub mod mocks;

pub use mocks::{RecordedStatement, RecordingDriver};
