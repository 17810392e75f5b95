//! Session: the front door tying query compilation, execution, and the unit
//! of work together.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use strata_core::metadata::MetadataRegistry;
use strata_core::{Driver, Row, Value};
use strata_query::{parse, ParameterBag, ParsedQuery, ParserConfig, QueryError};

use crate::entity::{EntityData, EntityHandle, EntityState};
use crate::error::OrmError;
use crate::uow::UnitOfWork;

pub struct Session {
    registry: Arc<MetadataRegistry>,
    config: ParserConfig,
    uow: UnitOfWork,
}

impl Session {
    pub fn new(registry: MetadataRegistry) -> Self {
        Self::with_config(registry, ParserConfig::default())
    }

    pub fn with_config(registry: MetadataRegistry, config: ParserConfig) -> Self {
        let registry = Arc::new(registry);
        Session {
            uow: UnitOfWork::new(Arc::clone(&registry)),
            registry,
            config,
        }
    }

    pub fn registry(&self) -> &MetadataRegistry {
        &self.registry
    }

    pub fn unit_of_work(&mut self) -> &mut UnitOfWork {
        &mut self.uow
    }

    /// Compile a query without executing it.
    pub fn create_query(&self, dql: &str) -> Result<ParsedQuery, QueryError> {
        parse(dql, &self.registry, &self.config)
    }

    /// Compile, execute, and hydrate. Entity rows are registered in the
    /// identity map; the returned handles are the distinct root entities in
    /// result order.
    pub fn query(
        &mut self,
        driver: &mut dyn Driver,
        dql: &str,
        params: &ParameterBag,
    ) -> Result<Vec<EntityHandle>, OrmError> {
        let parsed = self.create_query(dql)?;
        let values = parsed.plan.bind(params)?;
        let rows = driver.query(&parsed.plan.sql, &values)?;
        self.hydrate(&parsed, rows)
    }

    fn hydrate(
        &mut self,
        parsed: &ParsedQuery,
        rows: Vec<Row>,
    ) -> Result<Vec<EntityHandle>, OrmError> {
        // column layout per selected entity alias: field name -> column alias
        let mut per_alias: IndexMap<&str, Vec<(&str, &str)>> = IndexMap::new();
        for column in &parsed.plan.result_columns {
            if let (Some(alias), Some(field)) = (&column.dql_alias, &column.field) {
                per_alias
                    .entry(alias.as_str())
                    .or_default()
                    .push((field.as_str(), column.column_alias.as_str()));
            }
        }
        // only aliases whose identifier was selected can be hydrated as
        // entities
        per_alias.retain(|alias, columns| match parsed.components.get(*alias) {
            Some(component) => {
                let id = component.entity.single_identifier();
                columns.iter().any(|(field, _)| *field == id)
            }
            None => false,
        });

        let root_alias = parsed
            .components
            .iter()
            .find(|(alias, component)| {
                component.parent_alias.is_none() && per_alias.contains_key(alias.as_str())
            })
            .map(|(alias, _)| alias.clone());

        let mut roots = Vec::new();
        let mut seen = HashSet::new();
        for row in rows {
            // declaration order guarantees parents are hydrated before the
            // entities joined off them
            let mut row_handles: IndexMap<&str, EntityHandle> = IndexMap::new();
            for (alias, component) in &parsed.components {
                let columns = match per_alias.get(alias.as_str()) {
                    Some(columns) => columns,
                    None => continue,
                };
                let mut data = EntityData::new(component.entity.name.clone());
                let mut all_null = true;
                for (field, column_alias) in columns {
                    let value = row.get(*column_alias).cloned().unwrap_or(Value::Null);
                    if !value.is_null() {
                        all_null = false;
                    }
                    data.fields.insert((*field).to_string(), value);
                }
                // an all-null block is an unmatched outer join, not a row
                if all_null {
                    continue;
                }
                let handle = self.uow.register_loaded(data)?;
                // a row matching an entity scheduled for deletion is not a
                // result and must not be linked anywhere
                if self.uow.state(handle) == EntityState::Removed {
                    continue;
                }
                row_handles.insert(alias.as_str(), handle);
                if Some(alias.as_str()) == root_alias.as_deref() && seen.insert(handle) {
                    roots.push(handle);
                }

                // attach the loaded entity to its parent's association
                if let (Some(parent_alias), Some(assoc)) =
                    (&component.parent_alias, &component.association)
                {
                    if let Some(parent) = row_handles.get(parent_alias.as_str()).copied() {
                        self.uow.link_loaded(
                            parent,
                            &assoc.field,
                            handle,
                            assoc.is_collection_valued(),
                        );
                    }
                }
            }
        }
        Ok(roots)
    }

    pub fn create(&mut self, data: EntityData) -> Result<EntityHandle, OrmError> {
        self.uow.create(data)
    }

    pub fn save(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        self.uow.save(handle)
    }

    pub fn delete(&mut self, handle: EntityHandle) -> Result<(), OrmError> {
        self.uow.delete(handle)
    }

    pub fn flush(&mut self, driver: &mut dyn Driver) -> Result<(), OrmError> {
        self.uow.flush(driver)
    }

    pub fn clear(&mut self) {
        self.uow.clear();
    }

    pub fn find(&self, entity: &str, id: &Value) -> Option<EntityHandle> {
        self.uow.find(entity, id)
    }

    pub fn contains(&self, handle: EntityHandle) -> bool {
        self.uow.contains(handle)
    }

    pub fn state(&self, handle: EntityHandle) -> EntityState {
        self.uow.state(handle)
    }

    pub fn data(&self, handle: EntityHandle) -> &EntityData {
        self.uow.data(handle)
    }

    pub fn data_mut(&mut self, handle: EntityHandle) -> &mut EntityData {
        self.uow.data_mut(handle)
    }
}
