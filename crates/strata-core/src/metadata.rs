//! Entity metadata: the mapping descriptors the query parser validates
//! against and the persisters generate SQL from.
//!
//! Metadata is built once through [`EntityMetadataBuilder`], registered in a
//! [`MetadataRegistry`], and consumed read-only afterwards. Field and
//! association order is preserved (insertion order) so generated column
//! lists are deterministic.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// How identifier values come into being.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdStrategy {
    /// The application assigns identifiers before save.
    Assigned,
    /// The database generates the identifier on insert; the unit of work
    /// reads it back and writes it into the entity.
    AutoIncrement,
}

/// A simple state field mapped to one column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldMetadata {
    pub column: String,
    pub is_identifier: bool,
    pub generated: bool,
}

/// A join column on the owning side of a to-one association, or one half of
/// a join table mapping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinColumn {
    /// Column on the owning table (or join table).
    pub name: String,
    /// Column it references on the target table.
    pub referenced_column: String,
}

impl JoinColumn {
    pub fn new(name: impl Into<String>, referenced_column: impl Into<String>) -> Self {
        JoinColumn {
            name: name.into(),
            referenced_column: referenced_column.into(),
        }
    }
}

/// Join table mapping for many-to-many associations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinTable {
    pub name: String,
    /// Columns referencing the owning side.
    pub join_columns: Vec<JoinColumn>,
    /// Columns referencing the target side.
    pub inverse_join_columns: Vec<JoinColumn>,
}

/// Which unit-of-work operations propagate across an association.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CascadeFlags {
    pub save: bool,
    pub delete: bool,
}

impl CascadeFlags {
    pub fn save_only() -> Self {
        CascadeFlags {
            save: true,
            delete: false,
        }
    }

    pub fn save_and_delete() -> Self {
        CascadeFlags {
            save: true,
            delete: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AssociationKind {
    /// Owning to-one reference through join columns on this entity's table.
    ManyToOne,
    /// One-to-one; owning side when `mapped_by` is `None`, inverse side
    /// otherwise.
    OneToOne { mapped_by: Option<String> },
    /// Inverse collection side of a many-to-one; `mapped_by` names the
    /// owning field on the target entity.
    OneToMany { mapped_by: String },
    /// Many-to-many through a join table; owning side carries the table,
    /// inverse side carries `mapped_by`.
    ManyToMany {
        join_table: Option<JoinTable>,
        mapped_by: Option<String>,
    },
}

/// Mapping of one association field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssociationMetadata {
    pub field: String,
    pub target_entity: String,
    pub kind: AssociationKind,
    /// Join columns on the owning side of a to-one association. Empty for
    /// inverse sides and many-to-many.
    pub join_columns: Vec<JoinColumn>,
    pub cascade: CascadeFlags,
}

impl AssociationMetadata {
    pub fn is_single_valued(&self) -> bool {
        matches!(
            self.kind,
            AssociationKind::ManyToOne | AssociationKind::OneToOne { .. }
        )
    }

    pub fn is_collection_valued(&self) -> bool {
        !self.is_single_valued()
    }

    /// Owning side means this entity's table (or a join table it controls)
    /// carries the foreign key.
    pub fn is_owning_side(&self) -> bool {
        match &self.kind {
            AssociationKind::ManyToOne => true,
            AssociationKind::OneToOne { mapped_by } => mapped_by.is_none(),
            AssociationKind::OneToMany { .. } => false,
            AssociationKind::ManyToMany { mapped_by, .. } => mapped_by.is_none(),
        }
    }
}

/// Complete mapping for one entity type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityMetadata {
    pub name: String,
    pub table: String,
    pub fields: IndexMap<String, FieldMetadata>,
    pub associations: IndexMap<String, AssociationMetadata>,
    pub identifier: Vec<String>,
    pub id_strategy: IdStrategy,
}

impl EntityMetadata {
    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn has_association(&self, name: &str) -> bool {
        self.associations.contains_key(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldMetadata> {
        self.fields.get(name)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationMetadata> {
        self.associations.get(name)
    }

    /// The single identifier field. Composite identifiers are not modeled.
    pub fn single_identifier(&self) -> &str {
        &self.identifier[0]
    }

    pub fn identifier_column(&self) -> &str {
        &self.fields[self.single_identifier()].column
    }
}

/// Builds [`EntityMetadata`] field by field.
pub struct EntityMetadataBuilder {
    name: String,
    table: String,
    fields: IndexMap<String, FieldMetadata>,
    associations: IndexMap<String, AssociationMetadata>,
    identifier: Vec<String>,
    id_strategy: IdStrategy,
}

impl EntityMetadataBuilder {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        EntityMetadataBuilder {
            name: name.into(),
            table: table.into(),
            fields: IndexMap::new(),
            associations: IndexMap::new(),
            identifier: Vec::new(),
            id_strategy: IdStrategy::Assigned,
        }
    }

    /// Database-generated identifier field.
    pub fn generated_id(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldMetadata {
                column: name.clone(),
                is_identifier: true,
                generated: true,
            },
        );
        self.identifier.push(name);
        self.id_strategy = IdStrategy::AutoIncrement;
        self
    }

    /// Application-assigned identifier field.
    pub fn assigned_id(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldMetadata {
                column: name.clone(),
                is_identifier: true,
                generated: false,
            },
        );
        self.identifier.push(name);
        self.id_strategy = IdStrategy::Assigned;
        self
    }

    /// Plain state field; the column name equals the field name.
    pub fn field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        self.fields.insert(
            name.clone(),
            FieldMetadata {
                column: name,
                is_identifier: false,
                generated: false,
            },
        );
        self
    }

    /// State field mapped to a differently named column.
    pub fn field_column(mut self, name: impl Into<String>, column: impl Into<String>) -> Self {
        self.fields.insert(
            name.into(),
            FieldMetadata {
                column: column.into(),
                is_identifier: false,
                generated: false,
            },
        );
        self
    }

    pub fn many_to_one(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        join_columns: Vec<JoinColumn>,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::ManyToOne,
                join_columns,
                cascade: CascadeFlags::default(),
            },
        );
        self
    }

    pub fn one_to_one_owning(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        join_columns: Vec<JoinColumn>,
        cascade: CascadeFlags,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::OneToOne { mapped_by: None },
                join_columns,
                cascade,
            },
        );
        self
    }

    pub fn one_to_one_inverse(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
        cascade: CascadeFlags,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::OneToOne {
                    mapped_by: Some(mapped_by.into()),
                },
                join_columns: Vec::new(),
                cascade,
            },
        );
        self
    }

    pub fn one_to_many(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
        cascade: CascadeFlags,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::OneToMany {
                    mapped_by: mapped_by.into(),
                },
                join_columns: Vec::new(),
                cascade,
            },
        );
        self
    }

    pub fn many_to_many_owning(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        join_table: JoinTable,
        cascade: CascadeFlags,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::ManyToMany {
                    join_table: Some(join_table),
                    mapped_by: None,
                },
                join_columns: Vec::new(),
                cascade,
            },
        );
        self
    }

    pub fn many_to_many_inverse(
        mut self,
        field: impl Into<String>,
        target: impl Into<String>,
        mapped_by: impl Into<String>,
    ) -> Self {
        let field = field.into();
        self.associations.insert(
            field.clone(),
            AssociationMetadata {
                field,
                target_entity: target.into(),
                kind: AssociationKind::ManyToMany {
                    join_table: None,
                    mapped_by: Some(mapped_by.into()),
                },
                join_columns: Vec::new(),
                cascade: CascadeFlags::default(),
            },
        );
        self
    }

    pub fn build(self) -> EntityMetadata {
        EntityMetadata {
            name: self.name,
            table: self.table,
            fields: self.fields,
            associations: self.associations,
            identifier: self.identifier,
            id_strategy: self.id_strategy,
        }
    }
}

/// Lookup table of all mapped entity types.
#[derive(Debug, Default, Clone)]
pub struct MetadataRegistry {
    entities: HashMap<String, Arc<EntityMetadata>>,
}

impl MetadataRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, metadata: EntityMetadata) {
        self.entities
            .insert(metadata.name.clone(), Arc::new(metadata));
    }

    pub fn get(&self, name: &str) -> Option<Arc<EntityMetadata>> {
        self.entities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entities.contains_key(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_preserves_field_order() {
        let meta = EntityMetadataBuilder::new("CmsUser", "cms_users")
            .generated_id("id")
            .field("status")
            .field("username")
            .field("name")
            .build();
        let names: Vec<&str> = meta.fields.keys().map(String::as_str).collect();
        assert_eq!(names, vec!["id", "status", "username", "name"]);
        assert_eq!(meta.single_identifier(), "id");
        assert_eq!(meta.id_strategy, IdStrategy::AutoIncrement);
        assert!(meta.fields["id"].generated);
    }

    #[test]
    fn owning_side_resolution() {
        let owning = AssociationMetadata {
            field: "user".into(),
            target_entity: "CmsUser".into(),
            kind: AssociationKind::OneToOne { mapped_by: None },
            join_columns: vec![JoinColumn::new("user_id", "id")],
            cascade: CascadeFlags::default(),
        };
        let inverse = AssociationMetadata {
            field: "address".into(),
            target_entity: "CmsAddress".into(),
            kind: AssociationKind::OneToOne {
                mapped_by: Some("user".into()),
            },
            join_columns: Vec::new(),
            cascade: CascadeFlags::default(),
        };
        assert!(owning.is_owning_side());
        assert!(!inverse.is_owning_side());
        assert!(owning.is_single_valued());
    }

    #[test]
    fn registry_lookup() {
        let mut registry = MetadataRegistry::new();
        registry.register(
            EntityMetadataBuilder::new("CmsGroup", "cms_groups")
                .generated_id("id")
                .field("name")
                .build(),
        );
        assert!(registry.contains("CmsGroup"));
        assert!(registry.get("Nope").is_none());
        let meta = registry.get("CmsGroup").unwrap();
        assert_eq!(meta.table, "cms_groups");
    }
}
