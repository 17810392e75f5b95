//! Core types shared across the strata ORM.
//!
//! This crate defines the abstractions the higher layers build on:
//!
//! - [`Value`] — the scalar type bound to SQL parameters and entity fields
//! - the entity metadata model ([`EntityMetadata`], [`MetadataRegistry`]) —
//!   consumed read-only by the query parser and the persisters
//! - the narrow [`Driver`] interface the ORM executes SQL through
//!
//! Core defines the seams; `strata-query`, `strata-orm` and `strata-sqlite`
//! implement against them. The [`test_support`] module carries a recording
//! mock driver and shared metadata fixtures used by the test suites of all
//! downstream crates.

pub mod driver;
pub mod metadata;
pub mod test_support;
pub mod value;

pub use driver::{Driver, DriverError, Row};
pub use metadata::{
    AssociationKind, AssociationMetadata, CascadeFlags, EntityMetadata, EntityMetadataBuilder,
    FieldMetadata, IdStrategy, JoinColumn, JoinTable, MetadataRegistry,
};
pub use value::Value;
