//! Query compilation errors.
//!
//! Two families: syntax errors carry the character position of the
//! offending token, semantic errors name the entity class and field so the
//! message is actionable without the query text at hand.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum QueryError {
    #[error("line 0, col {position}: error: expected {expected}, got '{got}'")]
    Syntax {
        expected: String,
        got: String,
        position: usize,
    },

    #[error(transparent)]
    Semantical(#[from] SemanticalError),

    #[error("no value bound for parameter {name}")]
    UnboundParameter { name: String },
}

#[derive(Debug, Error)]
pub enum SemanticalError {
    #[error("'{name}' is not a mapped entity class")]
    UnknownEntity { name: String },

    #[error("class {class} has no field or association named '{field}'")]
    UnknownField { class: String, field: String },

    #[error("class {class} has no simple state field named '{field}'")]
    NotAStateField { class: String, field: String },

    #[error("class {class} has no association named '{field}'")]
    UnknownAssociation { class: String, field: String },

    #[error("cannot traverse collection-valued association '{field}' of class {class} in a path expression")]
    CollectionTraversal { class: String, field: String },

    #[error("'{alias}' is not defined as an identification variable")]
    UndeclaredAlias { alias: String },

    #[error("'{alias}' is already defined as an identification variable")]
    DuplicateAlias { alias: String },

    #[error("'{name}' is not a registered function")]
    UnknownFunction { name: String },
}

impl QueryError {
    pub fn is_syntax(&self) -> bool {
        matches!(self, QueryError::Syntax { .. })
    }

    pub fn is_semantical(&self) -> bool {
        matches!(self, QueryError::Semantical(_))
    }
}
