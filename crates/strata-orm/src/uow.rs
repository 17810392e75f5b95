//! The unit of work: tracks entities, computes what changed, and commits the
//! changes in a database-safe order.
//!
//! Entities are stored in a slot arena; the identity map guarantees at most
//! one managed instance per (entity type, identifier) pair. `flush` runs the
//! commit sequence: cascade saves to a fixpoint, schedule inserts, updates
//! and deletes, order inserts so referenced rows exist before the rows that
//! reference them, and deletes in the reverse of that order. Snapshots are
//! refreshed per entity as each write succeeds, so a failed flush leaves the
//! already-written entities consistent.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use strata_core::metadata::{AssociationKind, JoinTable, MetadataRegistry};
use strata_core::{Driver, EntityMetadata, Value};

use crate::changeset::Changeset;
use crate::entity::{AssociationValue, EntityData, EntityHandle, EntityState};
use crate::error::OrmError;
use crate::persister::{JoinTablePersister, StandardEntityPersister};

#[derive(Debug)]
struct Slot {
    data: EntityData,
    /// Snapshot taken at load time or after the last successful write.
    /// `None` means the entity has never been persisted.
    original: Option<EntityData>,
    state: EntityState,
}

/// A pending join-table row addition or removal, resolved to identifier
/// values only at execution time so database-generated ids are available.
struct LinkOp {
    table: JoinTable,
    owner: EntityHandle,
    target: EntityHandle,
}

pub struct UnitOfWork {
    registry: Arc<MetadataRegistry>,
    slots: Vec<Slot>,
    identity: HashMap<(String, Value), EntityHandle>,
}

impl UnitOfWork {
    pub fn new(registry: Arc<MetadataRegistry>) -> Self {
        UnitOfWork {
            registry,
            slots: Vec::new(),
            identity: HashMap::new(),
        }
    }

    /// Put entity data into the arena in the NEW state.
    pub fn create(&mut self, data: EntityData) -> Result<EntityHandle, OrmError> {
        if !self.registry.contains(&data.entity) {
            return Err(OrmError::UnknownEntity(data.entity));
        }
        let handle = EntityHandle(self.slots.len() as u32);
        self.slots.push(Slot {
            data,
            original: None,
            state: EntityState::New,
        });
        Ok(handle)
    }

    /// Schedule an entity for persistence, cascading along `cascade: save`
    /// associations.
    pub fn save(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let mut stack = vec![handle];
        let mut visited = HashSet::new();
        while let Some(h) = stack.pop() {
            if !visited.insert(h) {
                continue;
            }
            match self.slots[h.index()].state {
                EntityState::New | EntityState::Removed => {
                    self.slots[h.index()].state = EntityState::Managed;
                    self.try_register_identity(h)?;
                }
                EntityState::Managed => {}
                EntityState::Detached => return Err(OrmError::NotManaged),
            }
            stack.extend(self.cascade_targets(h, |cascade| cascade.save)?);
        }
        Ok(())
    }

    /// Schedule an entity for deletion, cascading along `cascade: delete`
    /// associations. Entities that were never persisted are simply detached.
    pub fn delete(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let mut stack = vec![handle];
        let mut visited = HashSet::new();
        while let Some(h) = stack.pop() {
            if !visited.insert(h) {
                continue;
            }
            match self.slots[h.index()].state {
                EntityState::Managed => self.slots[h.index()].state = EntityState::Removed,
                EntityState::New => self.slots[h.index()].state = EntityState::Detached,
                EntityState::Removed | EntityState::Detached => {}
            }
            stack.extend(self.cascade_targets(h, |cascade| cascade.delete)?);
        }
        Ok(())
    }

    /// Detach everything and empty the identity map.
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.state = EntityState::Detached;
        }
        self.identity.clear();
    }

    pub fn state(&self, handle: EntityHandle) -> EntityState {
        self.slots[handle.index()].state
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.slots[handle.index()].state == EntityState::Managed
    }

    /// Number of identities currently managed.
    pub fn size(&self) -> usize {
        self.identity.len()
    }

    /// Identity map lookup.
    pub fn find(&self, entity: &str, id: &Value) -> Option<EntityHandle> {
        self.identity
            .get(&(entity.to_string(), id.clone()))
            .copied()
    }

    pub fn data(&self, handle: EntityHandle) -> &EntityData {
        &self.slots[handle.index()].data
    }

    pub fn data_mut(&mut self, handle: EntityHandle) -> &mut EntityData {
        &mut self.slots[handle.index()].data
    }

    /// Register data loaded from the database. If the identity is already
    /// managed the existing handle is returned and the managed copy wins.
    pub fn register_loaded(&mut self, data: EntityData) -> Result<EntityHandle, OrmError> {
        let meta = self.metadata(&data.entity)?;
        let id = match data.fields.get(meta.single_identifier()) {
            Some(value) if !value.is_null() => value.clone(),
            _ => {
                return Err(OrmError::MissingIdentifier {
                    entity: data.entity,
                })
            }
        };
        let key = (data.entity.clone(), id);
        if let Some(&handle) = self.identity.get(&key) {
            return Ok(handle);
        }
        let handle = EntityHandle(self.slots.len() as u32);
        self.slots.push(Slot {
            original: Some(data.clone()),
            data,
            state: EntityState::Managed,
        });
        self.identity.insert(key, handle);
        Ok(handle)
    }

    /// Wire an association observed while hydrating query results. Both the
    /// live data and the snapshot are updated: the link reflects database
    /// state, so it must not show up as a pending change.
    pub(crate) fn link_loaded(
        &mut self,
        parent: EntityHandle,
        field: &str,
        target: EntityHandle,
        collection: bool,
    ) {
        fn apply(data: &mut EntityData, field: &str, target: EntityHandle, collection: bool) {
            if collection {
                let entry = data
                    .associations
                    .entry(field.to_string())
                    .or_insert_with(|| AssociationValue::Many(Vec::new()));
                if let AssociationValue::Many(handles) = entry {
                    if !handles.contains(&target) {
                        handles.push(target);
                    }
                }
            } else {
                data.associations
                    .insert(field.to_string(), AssociationValue::One(Some(target)));
            }
        }
        let slot = &mut self.slots[parent.index()];
        apply(&mut slot.data, field, target, collection);
        if let Some(original) = slot.original.as_mut() {
            apply(original, field, target, collection);
        }
    }

    /// Write all pending changes to the database.
    pub fn flush(&mut self, driver: &mut dyn Driver) -> Result<(), OrmError> {
        self.cascade_saves_to_fixpoint()?;

        let mut inserts = Vec::new();
        let mut updates = Vec::new();
        let mut deletes = Vec::new();
        for index in 0..self.slots.len() {
            let handle = EntityHandle(index as u32);
            let slot = &self.slots[index];
            match (slot.state, slot.original.is_some()) {
                (EntityState::Managed, false) => inserts.push(handle),
                (EntityState::Managed, true) => updates.push(handle),
                (EntityState::Removed, true) => deletes.push(handle),
                // removed before it was ever written: nothing to delete
                (EntityState::Removed, false) => {
                    self.slots[index].state = EntityState::Detached
                }
                _ => {}
            }
        }

        // owning references must point at entities that will exist after
        // this flush
        for &handle in inserts.iter().chain(updates.iter()) {
            for dep in self.owning_to_one_targets(handle)? {
                match self.slots[dep.index()].state {
                    EntityState::New | EntityState::Detached => {
                        return Err(OrmError::UnregisteredEntity {
                            entity: self.slots[dep.index()].data.entity.clone(),
                        });
                    }
                    _ => {}
                }
            }
        }

        // link deltas diff against pre-flush snapshots, so collect them
        // before any snapshot is refreshed
        let (link_inserts, link_deletes) = self.collect_link_ops(&inserts, &updates)?;

        tracing::debug!(
            inserts = inserts.len(),
            updates = updates.len(),
            deletes = deletes.len(),
            "flushing unit of work"
        );

        for handle in self.commit_order(&inserts)? {
            self.execute_insert(driver, handle)?;
        }
        for &handle in &updates {
            self.execute_update(driver, handle)?;
        }
        for op in &link_deletes {
            let owner_id = self.identifier_value(op.owner)?;
            let target_id = self.identifier_value(op.target)?;
            JoinTablePersister::new(op.table.clone()).delete_link(driver, &owner_id, &target_id)?;
        }
        for op in &link_inserts {
            let owner_id = self.identifier_value(op.owner)?;
            let target_id = self.identifier_value(op.target)?;
            JoinTablePersister::new(op.table.clone()).insert_link(driver, &owner_id, &target_id)?;
        }
        // owners with link-only changes still need a fresh snapshot
        for op in link_deletes.iter().chain(link_inserts.iter()) {
            let slot = &mut self.slots[op.owner.index()];
            slot.original = Some(slot.data.clone());
        }

        // foreign key holders go first, so deletes run in reverse insert
        // order
        let mut delete_order = self.commit_order(&deletes)?;
        delete_order.reverse();
        for handle in delete_order {
            self.execute_delete(driver, handle)?;
        }
        Ok(())
    }

    fn metadata(&self, entity: &str) -> Result<Arc<EntityMetadata>, OrmError> {
        self.registry
            .get(entity)
            .ok_or_else(|| OrmError::UnknownEntity(entity.to_string()))
    }

    fn identifier_value(&self, handle: EntityHandle) -> Result<Value, OrmError> {
        let slot = &self.slots[handle.index()];
        let meta = self.metadata(&slot.data.entity)?;
        match slot.data.fields.get(meta.single_identifier()) {
            Some(value) if !value.is_null() => Ok(value.clone()),
            _ => Err(OrmError::MissingIdentifier {
                entity: slot.data.entity.clone(),
            }),
        }
    }

    /// Register the identity if the entity already has an identifier value.
    /// Entities with generated identifiers are registered after insert
    /// instead.
    fn try_register_identity(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        let slot = &self.slots[handle.index()];
        let meta = self.metadata(&slot.data.entity)?;
        let id = match slot.data.fields.get(meta.single_identifier()) {
            Some(value) if !value.is_null() => value.clone(),
            _ => return Ok(()),
        };
        let key = (slot.data.entity.clone(), id);
        match self.identity.get(&key) {
            Some(existing) if *existing != handle => Err(OrmError::DuplicateIdentity {
                entity: key.0,
            }),
            Some(_) => Ok(()),
            None => {
                self.identity.insert(key, handle);
                Ok(())
            }
        }
    }

    /// Handles reachable from `handle` over associations selected by
    /// `wanted`.
    fn cascade_targets(
        &self,
        handle: EntityHandle,
        wanted: impl Fn(strata_core::metadata::CascadeFlags) -> bool,
    ) -> Result<Vec<EntityHandle>, OrmError> {
        let slot = &self.slots[handle.index()];
        let meta = self.metadata(&slot.data.entity)?;
        let mut targets = Vec::new();
        for (field, assoc) in &meta.associations {
            if !wanted(assoc.cascade) {
                continue;
            }
            match slot.data.associations.get(field) {
                Some(AssociationValue::One(Some(target))) => targets.push(*target),
                Some(AssociationValue::Many(handles)) => targets.extend(handles.iter().copied()),
                _ => {}
            }
        }
        Ok(targets)
    }

    fn cascade_saves_to_fixpoint(&mut self) -> Result<(), OrmError> {
        loop {
            let mut pending = Vec::new();
            for index in 0..self.slots.len() {
                if self.slots[index].state != EntityState::Managed {
                    continue;
                }
                let handle = EntityHandle(index as u32);
                for target in self.cascade_targets(handle, |cascade| cascade.save)? {
                    if self.slots[target.index()].state == EntityState::New {
                        pending.push(target);
                    }
                }
            }
            if pending.is_empty() {
                return Ok(());
            }
            for handle in pending {
                self.save(handle)?;
            }
        }
    }

    /// Targets of populated owning to-one associations; these rows must
    /// exist before (and outlive) the referencing row.
    fn owning_to_one_targets(
        &self,
        handle: EntityHandle,
    ) -> Result<Vec<EntityHandle>, OrmError> {
        let slot = &self.slots[handle.index()];
        let meta = self.metadata(&slot.data.entity)?;
        let mut targets = Vec::new();
        for (field, assoc) in &meta.associations {
            if !assoc.is_owning_side() || !assoc.is_single_valued() {
                continue;
            }
            if let Some(AssociationValue::One(Some(target))) = slot.data.associations.get(field) {
                targets.push(*target);
            }
        }
        Ok(targets)
    }

    /// Stable topological order over foreign key dependencies: every handle
    /// comes after the handles it references. Order among independent
    /// handles is the input order.
    fn commit_order(&self, handles: &[EntityHandle]) -> Result<Vec<EntityHandle>, OrmError> {
        let members: HashSet<EntityHandle> = handles.iter().copied().collect();
        let mut remaining: Vec<EntityHandle> = handles.to_vec();
        let mut placed: HashSet<EntityHandle> = HashSet::new();
        let mut ordered = Vec::with_capacity(handles.len());
        while !remaining.is_empty() {
            let mut progressed = false;
            let mut deferred = Vec::new();
            for &handle in &remaining {
                let ready = self
                    .owning_to_one_targets(handle)?
                    .iter()
                    .all(|dep| !members.contains(dep) || placed.contains(dep));
                if ready {
                    ordered.push(handle);
                    placed.insert(handle);
                    progressed = true;
                } else {
                    deferred.push(handle);
                }
            }
            if !progressed {
                return Err(OrmError::CycleDetected {
                    entity: self.slots[remaining[0].index()].data.entity.clone(),
                });
            }
            remaining = deferred;
        }
        Ok(ordered)
    }

    fn collect_link_ops(
        &self,
        inserts: &[EntityHandle],
        updates: &[EntityHandle],
    ) -> Result<(Vec<LinkOp>, Vec<LinkOp>), OrmError> {
        let mut additions = Vec::new();
        let mut removals = Vec::new();
        for &handle in inserts.iter().chain(updates.iter()) {
            let slot = &self.slots[handle.index()];
            let meta = self.metadata(&slot.data.entity)?;
            for (field, assoc) in &meta.associations {
                let table = match &assoc.kind {
                    AssociationKind::ManyToMany {
                        join_table: Some(table),
                        ..
                    } => table,
                    _ => continue,
                };
                let current: Vec<EntityHandle> = match slot.data.associations.get(field) {
                    Some(AssociationValue::Many(handles)) => handles.clone(),
                    _ => Vec::new(),
                };
                let previous: Vec<EntityHandle> = match slot
                    .original
                    .as_ref()
                    .and_then(|original| original.associations.get(field))
                {
                    Some(AssociationValue::Many(handles)) => handles.clone(),
                    _ => Vec::new(),
                };
                for target in &current {
                    if !previous.contains(target) {
                        additions.push(LinkOp {
                            table: table.clone(),
                            owner: handle,
                            target: *target,
                        });
                    }
                }
                for target in &previous {
                    if !current.contains(target) {
                        removals.push(LinkOp {
                            table: table.clone(),
                            owner: handle,
                            target: *target,
                        });
                    }
                }
            }
        }
        Ok((additions, removals))
    }

    fn execute_insert(
        &mut self,
        driver: &mut dyn Driver,
        handle: EntityHandle,
    ) -> Result<(), OrmError> {
        let meta = self.metadata(&self.slots[handle.index()].data.entity)?;

        let mut columns: Vec<(String, Value)> = Vec::new();
        for (field, mapping) in &meta.fields {
            let value = self.slots[handle.index()]
                .data
                .fields
                .get(field)
                .cloned()
                .unwrap_or(Value::Null);
            if mapping.generated && value.is_null() {
                continue;
            }
            columns.push((mapping.column.clone(), value));
        }
        for (field, assoc) in &meta.associations {
            if !assoc.is_owning_side() || !assoc.is_single_valued() || assoc.join_columns.is_empty()
            {
                continue;
            }
            if let Some(AssociationValue::One(Some(target))) =
                self.slots[handle.index()].data.associations.get(field)
            {
                let target_id = self.identifier_value(*target)?;
                columns.push((assoc.join_columns[0].name.clone(), target_id));
            }
        }

        let generated = StandardEntityPersister::new(Arc::clone(&meta)).insert(driver, &columns)?;
        if let Some(id) = generated {
            let id_field = meta.single_identifier().to_string();
            self.slots[handle.index()]
                .data
                .fields
                .insert(id_field, Value::Int(id));
        }
        self.try_register_identity(handle)?;
        self.slots[handle.index()].original = Some(self.slots[handle.index()].data.clone());
        Ok(())
    }

    fn execute_update(
        &mut self,
        driver: &mut dyn Driver,
        handle: EntityHandle,
    ) -> Result<(), OrmError> {
        let meta = self.metadata(&self.slots[handle.index()].data.entity)?;
        let slot = &self.slots[handle.index()];
        let original = match &slot.original {
            Some(original) => original,
            None => return Ok(()),
        };

        let mut columns: Vec<(String, Value)> = Vec::new();
        let changeset = Changeset::compute(original, &slot.data);
        for (field, change) in &changeset.changes {
            if let Some(mapping) = meta.field(field) {
                // identifiers are immutable
                if mapping.is_identifier {
                    continue;
                }
                columns.push((mapping.column.clone(), change.new.clone()));
            }
        }
        for (field, assoc) in &meta.associations {
            if !assoc.is_owning_side() || !assoc.is_single_valued() || assoc.join_columns.is_empty()
            {
                continue;
            }
            let current = match slot.data.associations.get(field) {
                Some(AssociationValue::One(target)) => *target,
                _ => None,
            };
            let previous = match original.associations.get(field) {
                Some(AssociationValue::One(target)) => *target,
                _ => None,
            };
            if current != previous {
                let value = match current {
                    Some(target) => self.identifier_value(target)?,
                    None => Value::Null,
                };
                columns.push((assoc.join_columns[0].name.clone(), value));
            }
        }
        if columns.is_empty() {
            return Ok(());
        }

        let id = self.identifier_value(handle)?;
        StandardEntityPersister::new(Arc::clone(&meta)).update(driver, &id, &columns)?;
        self.slots[handle.index()].original = Some(self.slots[handle.index()].data.clone());
        Ok(())
    }

    fn execute_delete(
        &mut self,
        driver: &mut dyn Driver,
        handle: EntityHandle,
    ) -> Result<(), OrmError> {
        let meta = self.metadata(&self.slots[handle.index()].data.entity)?;
        let id = self.identifier_value(handle)?;

        // link rows referencing this row go first
        for assoc in meta.associations.values() {
            if let AssociationKind::ManyToMany {
                join_table: Some(table),
                ..
            } = &assoc.kind
            {
                JoinTablePersister::new(table.clone()).delete_links_for_owner(driver, &id)?;
            }
        }

        StandardEntityPersister::new(Arc::clone(&meta)).delete(driver, &id)?;

        let entity = self.slots[handle.index()].data.entity.clone();
        self.identity.remove(&(entity, id));
        self.slots[handle.index()].state = EntityState::New;
        self.slots[handle.index()].original = None;
        Ok(())
    }
}
