//! Field-level change detection against a snapshot.

use indexmap::IndexMap;
use strata_core::Value;

use crate::entity::EntityData;

#[derive(Debug, Clone, PartialEq)]
pub struct FieldChange {
    /// Value at snapshot time. `None` when the field was absent.
    pub old: Option<Value>,
    pub new: Value,
}

/// Fields whose current value differs from the snapshot taken at the last
/// flush (or at load time).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Changeset {
    pub changes: IndexMap<String, FieldChange>,
}

impl Changeset {
    pub fn compute(original: &EntityData, current: &EntityData) -> Changeset {
        let mut changes = IndexMap::new();
        for (field, value) in &current.fields {
            let old = original.fields.get(field);
            if old != Some(value) {
                changes.insert(
                    field.clone(),
                    FieldChange {
                        old: old.cloned(),
                        new: value.clone(),
                    },
                );
            }
        }
        Changeset { changes }
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_data_yields_an_empty_changeset() {
        let data = EntityData::new("CmsUser")
            .with_field("id", 1i64)
            .with_field("name", "Roman");
        assert!(Changeset::compute(&data, &data.clone()).is_empty());
    }

    #[test]
    fn only_modified_fields_are_reported() {
        let original = EntityData::new("CmsUser")
            .with_field("id", 1i64)
            .with_field("name", "Roman")
            .with_field("status", "developer");
        let mut current = original.clone();
        current.set_field("name", "Guilherme");

        let changeset = Changeset::compute(&original, &current);
        assert_eq!(changeset.changes.len(), 1);
        let change = &changeset.changes["name"];
        assert_eq!(change.old, Some(Value::from("Roman")));
        assert_eq!(change.new, Value::from("Guilherme"));
    }

    #[test]
    fn newly_set_fields_have_no_old_value() {
        let original = EntityData::new("CmsUser").with_field("id", 1i64);
        let mut current = original.clone();
        current.set_field("name", "Benjamin");

        let changeset = Changeset::compute(&original, &current);
        assert_eq!(changeset.changes["name"].old, None);
    }
}
