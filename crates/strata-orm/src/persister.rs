//! SQL emission for single-entity and join-table writes.
//!
//! Persisters build parameterized INSERT/UPDATE/DELETE statements straight
//! from entity metadata. The unit of work decides *what* to write and in
//! which order; persisters only know *how* one row is written.

use std::sync::Arc;

use strata_core::metadata::{EntityMetadata, IdStrategy, JoinTable};
use strata_core::{Driver, Value};

use crate::error::OrmError;

pub struct StandardEntityPersister {
    metadata: Arc<EntityMetadata>,
}

impl StandardEntityPersister {
    pub fn new(metadata: Arc<EntityMetadata>) -> Self {
        StandardEntityPersister { metadata }
    }

    /// Insert one row. Returns the database-generated identifier when the
    /// entity uses an auto-increment strategy and no identifier column was
    /// supplied.
    pub fn insert(
        &self,
        driver: &mut dyn Driver,
        columns: &[(String, Value)],
    ) -> Result<Option<i64>, OrmError> {
        let sql = if columns.is_empty() {
            // every column is database-generated
            format!("INSERT INTO {} DEFAULT VALUES", self.metadata.table)
        } else {
            let names: Vec<&str> = columns.iter().map(|(name, _)| name.as_str()).collect();
            let placeholders = vec!["?"; columns.len()].join(", ");
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.metadata.table,
                names.join(", "),
                placeholders
            )
        };
        let params: Vec<Value> = columns.iter().map(|(_, value)| value.clone()).collect();
        driver.execute(&sql, &params)?;

        let id_column = self.metadata.identifier_column();
        let id_supplied = columns.iter().any(|(name, _)| name == id_column);
        if self.metadata.id_strategy == IdStrategy::AutoIncrement && !id_supplied {
            Ok(Some(driver.last_insert_id()?))
        } else {
            Ok(None)
        }
    }

    /// Update one row by identifier. Zero affected rows means the row was
    /// changed or removed behind our back.
    pub fn update(
        &self,
        driver: &mut dyn Driver,
        id: &Value,
        columns: &[(String, Value)],
    ) -> Result<(), OrmError> {
        let assignments: Vec<String> = columns
            .iter()
            .map(|(name, _)| format!("{name} = ?"))
            .collect();
        let sql = format!(
            "UPDATE {} SET {} WHERE {} = ?",
            self.metadata.table,
            assignments.join(", "),
            self.metadata.identifier_column()
        );
        let mut params: Vec<Value> = columns.iter().map(|(_, value)| value.clone()).collect();
        params.push(id.clone());

        let affected = driver.execute(&sql, &params)?;
        if affected == 0 {
            return Err(OrmError::Concurrency {
                entity: self.metadata.name.clone(),
                operation: "UPDATE".to_string(),
            });
        }
        Ok(())
    }

    pub fn delete(&self, driver: &mut dyn Driver, id: &Value) -> Result<(), OrmError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.metadata.table,
            self.metadata.identifier_column()
        );
        let affected = driver.execute(&sql, &[id.clone()])?;
        if affected == 0 {
            return Err(OrmError::Concurrency {
                entity: self.metadata.name.clone(),
                operation: "DELETE".to_string(),
            });
        }
        Ok(())
    }
}

/// Writes link rows for owning many-to-many associations.
pub struct JoinTablePersister {
    table: JoinTable,
}

impl JoinTablePersister {
    pub fn new(table: JoinTable) -> Self {
        JoinTablePersister { table }
    }

    pub fn insert_link(
        &self,
        driver: &mut dyn Driver,
        owner_id: &Value,
        target_id: &Value,
    ) -> Result<(), OrmError> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            self.table.name,
            self.table.join_columns[0].name,
            self.table.inverse_join_columns[0].name
        );
        driver.execute(&sql, &[owner_id.clone(), target_id.clone()])?;
        Ok(())
    }

    pub fn delete_link(
        &self,
        driver: &mut dyn Driver,
        owner_id: &Value,
        target_id: &Value,
    ) -> Result<(), OrmError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            self.table.name,
            self.table.join_columns[0].name,
            self.table.inverse_join_columns[0].name
        );
        driver.execute(&sql, &[owner_id.clone(), target_id.clone()])?;
        Ok(())
    }

    /// Removes every link row held by one owner, used when the owner itself
    /// is deleted.
    pub fn delete_links_for_owner(
        &self,
        driver: &mut dyn Driver,
        owner_id: &Value,
    ) -> Result<(), OrmError> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            self.table.name, self.table.join_columns[0].name
        );
        driver.execute(&sql, &[owner_id.clone()])?;
        Ok(())
    }
}
