//! Query components: what each identification variable resolves to.

use crate::error::SemanticalError;
use indexmap::IndexMap;
use std::sync::Arc;
use strata_core::{AssociationMetadata, EntityMetadata};

/// What one identification variable stands for. Root range variables carry
/// only the entity; join variables additionally record the parent alias and
/// the association they were reached through.
#[derive(Debug, Clone)]
pub struct QueryComponent {
    pub entity: Arc<EntityMetadata>,
    pub parent_alias: Option<String>,
    pub association: Option<AssociationMetadata>,
    /// Field the hydrated collection is keyed by, from INDEX BY.
    pub index_by: Option<String>,
}

impl QueryComponent {
    pub fn root(entity: Arc<EntityMetadata>) -> Self {
        QueryComponent {
            entity,
            parent_alias: None,
            association: None,
            index_by: None,
        }
    }

    pub fn joined(
        entity: Arc<EntityMetadata>,
        parent_alias: String,
        association: AssociationMetadata,
    ) -> Self {
        QueryComponent {
            entity,
            parent_alias: Some(parent_alias),
            association: Some(association),
            index_by: None,
        }
    }
}

/// Stack of alias scopes. Each subselect pushes a scope; aliases shadow
/// outer declarations, and unshadowed outer aliases stay visible for
/// correlated subqueries.
#[derive(Debug, Default)]
pub struct ScopeStack {
    scopes: Vec<IndexMap<String, QueryComponent>>,
}

impl ScopeStack {
    pub fn new() -> Self {
        ScopeStack {
            scopes: vec![IndexMap::new()],
        }
    }

    pub fn push(&mut self) {
        self.scopes.push(IndexMap::new());
    }

    pub fn pop(&mut self) -> IndexMap<String, QueryComponent> {
        self.scopes.pop().unwrap_or_default()
    }

    /// Declare an alias in the innermost scope. Redeclaring within the same
    /// scope is an error; shadowing an outer scope is not.
    pub fn declare(
        &mut self,
        alias: String,
        component: QueryComponent,
    ) -> Result<(), SemanticalError> {
        let scope = self
            .scopes
            .last_mut()
            .expect("scope stack is never empty");
        if scope.contains_key(&alias) {
            return Err(SemanticalError::DuplicateAlias { alias });
        }
        scope.insert(alias, component);
        Ok(())
    }

    /// Resolve innermost-first.
    pub fn resolve(&self, alias: &str) -> Option<&QueryComponent> {
        self.scopes.iter().rev().find_map(|s| s.get(alias))
    }

    pub fn resolve_mut(&mut self, alias: &str) -> Option<&mut QueryComponent> {
        self.scopes.iter_mut().rev().find_map(|s| s.get_mut(alias))
    }

    pub fn is_declared(&self, alias: &str) -> bool {
        self.resolve(alias).is_some()
    }

    /// The root scope's components, cloned for the parse result.
    pub fn root_components(&self) -> IndexMap<String, QueryComponent> {
        self.scopes.first().cloned().unwrap_or_default()
    }

    /// The innermost scope's components, cloned for a subselect node.
    pub fn current_components(&self) -> IndexMap<String, QueryComponent> {
        self.scopes.last().cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata_core::test_support::fixtures::cms_registry;

    #[test]
    fn shadowing_across_scopes_is_allowed() {
        let registry = cms_registry();
        let user = registry.get("CmsUser").unwrap();
        let mut scopes = ScopeStack::new();
        scopes
            .declare("u".to_string(), QueryComponent::root(user.clone()))
            .unwrap();
        scopes.push();
        scopes
            .declare("u".to_string(), QueryComponent::root(user.clone()))
            .unwrap();
        assert!(scopes.resolve("u").is_some());
        scopes.pop();
        assert!(scopes.resolve("u").is_some());
    }

    #[test]
    fn duplicate_in_same_scope_is_rejected() {
        let registry = cms_registry();
        let user = registry.get("CmsUser").unwrap();
        let mut scopes = ScopeStack::new();
        scopes
            .declare("u".to_string(), QueryComponent::root(user.clone()))
            .unwrap();
        let err = scopes.declare("u".to_string(), QueryComponent::root(user));
        assert!(matches!(err, Err(SemanticalError::DuplicateAlias { .. })));
    }

    #[test]
    fn outer_aliases_remain_visible_in_inner_scopes() {
        let registry = cms_registry();
        let user = registry.get("CmsUser").unwrap();
        let group = registry.get("CmsGroup").unwrap();
        let mut scopes = ScopeStack::new();
        scopes
            .declare("u".to_string(), QueryComponent::root(user))
            .unwrap();
        scopes.push();
        scopes
            .declare("g".to_string(), QueryComponent::root(group))
            .unwrap();
        assert!(scopes.resolve("u").is_some());
        assert!(scopes.resolve("g").is_some());
        let inner = scopes.pop();
        assert!(inner.contains_key("g"));
        assert!(!inner.contains_key("u"));
        assert!(scopes.resolve("g").is_none());
    }
}
