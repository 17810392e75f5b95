//! Unit-of-work errors.

use strata_core::DriverError;
use strata_query::QueryError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum OrmError {
    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Query(#[from] QueryError),

    #[error("'{0}' is not a mapped entity class")]
    UnknownEntity(String),

    #[error("entity {entity} has no identifier value")]
    MissingIdentifier { entity: String },

    #[error("another instance of {entity} with the same identifier is already managed")]
    DuplicateIdentity { entity: String },

    #[error("{operation} of {entity} affected no rows")]
    Concurrency { entity: String, operation: String },

    #[error("association cycle detected while ordering {entity} for commit")]
    CycleDetected { entity: String },

    #[error("entity {entity} is referenced through an owning association but was never saved")]
    UnregisteredEntity { entity: String },

    #[error("entity is not managed by this unit of work")]
    NotManaged,
}
