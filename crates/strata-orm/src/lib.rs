//! Object persistence on top of `strata-query` and a [`strata_core::Driver`].
//!
//! The central piece is the [`UnitOfWork`]: an arena of entity data with an
//! identity map and snapshot-based change tracking. Code works with plain
//! [`EntityData`] values addressed by [`EntityHandle`]; on
//! [`UnitOfWork::flush`] the pending inserts, updates, and deletes are
//! written out in dependency order through per-entity persisters.
//!
//! [`Session`] wraps a unit of work together with a metadata registry and a
//! parser configuration, and adds query execution with entity hydration:
//!
//! ```
//! use strata_core::test_support::fixtures::cms_registry;
//! use strata_core::test_support::mocks::RecordingDriver;
//! use strata_orm::{EntityData, Session};
//!
//! let mut session = Session::new(cms_registry());
//! let mut driver = RecordingDriver::new();
//!
//! let user = session
//!     .create(
//!         EntityData::new("CmsUser")
//!             .with_field("username", "romanb")
//!             .with_field("status", "developer")
//!             .with_field("name", "Roman"),
//!     )
//!     .unwrap();
//! session.save(user).unwrap();
//! session.flush(&mut driver).unwrap();
//!
//! assert!(session.contains(user));
//! assert_eq!(driver.sql_log().len(), 1);
//! ```

pub mod changeset;
pub mod entity;
pub mod error;
pub mod persister;
pub mod session;
pub mod uow;

pub use changeset::{Changeset, FieldChange};
pub use entity::{AssociationValue, EntityData, EntityHandle, EntityState};
pub use error::OrmError;
pub use persister::{JoinTablePersister, StandardEntityPersister};
pub use session::Session;
pub use uow::UnitOfWork;
