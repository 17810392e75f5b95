//! Query language for the strata ORM.
//!
//! The pipeline: [`lexer`] tokenizes the query string, [`parser`] builds an
//! immutable AST while validating identifiers and paths against the entity
//! metadata, and [`walker`] translates the AST into SQL text with ordered
//! bound parameters and a result-column layout for hydration. The whole
//! compilation runs in one call:
//!
//! ```
//! use strata_core::test_support::fixtures::cms_registry;
//! use strata_query::{parse, ParserConfig};
//!
//! let registry = cms_registry();
//! let config = ParserConfig::default();
//! let query = parse(
//!     "SELECT u FROM CmsUser u WHERE u.username = ?1",
//!     &registry,
//!     &config,
//! )
//! .unwrap();
//! assert!(query.plan.sql.starts_with("SELECT"));
//! ```
//!
//! Functions are extensible through [`FunctionRegistry`]; the SQL dialect
//! through [`SqlDialect`]. Both hang off [`ParserConfig`].

pub mod ast;
pub mod components;
pub mod error;
pub mod functions;
pub mod lexer;
pub mod parser;
pub mod plan;
pub mod token;
pub mod walker;

pub use ast::{InputParameter, Statement};
pub use components::{QueryComponent, ScopeStack};
pub use error::{QueryError, SemanticalError};
pub use functions::{FunctionHandler, FunctionRegistry, ParserConfig};
pub use parser::{parse, ParsedQuery, Parser};
pub use plan::{ExecutablePlan, ParameterBag, ResultColumn};
pub use walker::{DefaultDialect, SqlDialect, SqlWalker};
