//! In-memory entity representation.
//!
//! Entities live in the unit of work's arena; the rest of the program holds
//! [`EntityHandle`]s. Associations reference other entities by handle, so
//! object graphs need no shared ownership or interior mutability.

use indexmap::IndexMap;
use strata_core::Value;

/// Opaque index into the unit of work's entity arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityHandle(pub(crate) u32);

impl EntityHandle {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// Lifecycle state of an entity within a unit of work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityState {
    /// Known to the arena but not yet scheduled for persistence.
    New,
    /// Tracked; changes are written out on flush.
    Managed,
    /// Scheduled for deletion on flush.
    Removed,
    /// No longer tracked.
    Detached,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AssociationValue {
    One(Option<EntityHandle>),
    Many(Vec<EntityHandle>),
}

/// Field and association values of one entity instance.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityData {
    /// Entity type name, e.g. `CmsUser`.
    pub entity: String,
    pub fields: IndexMap<String, Value>,
    pub associations: IndexMap<String, AssociationValue>,
}

impl EntityData {
    pub fn new(entity: impl Into<String>) -> Self {
        EntityData {
            entity: entity.into(),
            fields: IndexMap::new(),
            associations: IndexMap::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.fields.insert(name.into(), value.into());
    }

    pub fn get_field(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// Point a to-one association at another entity (or clear it).
    pub fn set_one(&mut self, field: impl Into<String>, target: Option<EntityHandle>) {
        self.associations
            .insert(field.into(), AssociationValue::One(target));
    }

    /// Append to a collection association.
    pub fn add_to(&mut self, field: impl Into<String>, target: EntityHandle) {
        let entry = self
            .associations
            .entry(field.into())
            .or_insert_with(|| AssociationValue::Many(Vec::new()));
        if let AssociationValue::Many(handles) = entry {
            handles.push(target);
        }
    }

    pub fn remove_from(&mut self, field: &str, target: EntityHandle) {
        if let Some(AssociationValue::Many(handles)) = self.associations.get_mut(field) {
            handles.retain(|h| *h != target);
        }
    }
}
