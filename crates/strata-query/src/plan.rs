//! The executable output of query compilation.

use crate::ast::InputParameter;
use crate::error::QueryError;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use strata_core::Value;

/// One column of the result set and what it hydrates into.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultColumn {
    /// Column alias in the generated SQL.
    pub column_alias: String,
    /// Identification variable this column belongs to, when it maps back to
    /// an entity field.
    pub dql_alias: Option<String>,
    /// Entity field name, when it maps back to an entity field. Scalar
    /// columns (aggregates, functions) leave both unset.
    pub field: Option<String>,
}

/// SQL text plus the parameters it expects, in placeholder order, plus the
/// result-column layout for hydration. Serializable, so plans can be cached
/// outside the process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutablePlan {
    pub sql: String,
    /// Input parameters in the order their `?` placeholders occur.
    pub parameters: Vec<InputParameter>,
    pub result_columns: Vec<ResultColumn>,
}

impl ExecutablePlan {
    /// Resolve the placeholder sequence against bound values.
    pub fn bind(&self, bag: &ParameterBag) -> Result<Vec<Value>, QueryError> {
        self.parameters
            .iter()
            .map(|param| {
                bag.get(param).ok_or_else(|| QueryError::UnboundParameter {
                    name: param.to_string(),
                })
            })
            .collect()
    }

    /// Cache key over the SQL text and a caller-supplied salt (metadata
    /// generation, dialect, hydration mode).
    pub fn cache_key(&self, salt: &str) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.sql.hash(&mut hasher);
        salt.hash(&mut hasher);
        hasher.finish()
    }
}

/// Values bound by the caller, positional and named.
#[derive(Debug, Default, Clone)]
pub struct ParameterBag {
    positional: HashMap<u32, Value>,
    named: HashMap<String, Value>,
}

impl ParameterBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_positional(&mut self, position: u32, value: impl Into<Value>) -> &mut Self {
        self.positional.insert(position, value.into());
        self
    }

    pub fn set_named(&mut self, name: impl Into<String>, value: impl Into<Value>) -> &mut Self {
        self.named.insert(name.into(), value.into());
        self
    }

    pub fn get(&self, param: &InputParameter) -> Option<Value> {
        match param {
            InputParameter::Positional(n) => self.positional.get(n).cloned(),
            InputParameter::Named(name) => self.named.get(name).cloned(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan(params: Vec<InputParameter>) -> ExecutablePlan {
        ExecutablePlan {
            sql: "SELECT 1 WHERE a = ? AND b = ?".to_string(),
            parameters: params,
            result_columns: Vec::new(),
        }
    }

    #[test]
    fn bind_orders_values_by_placeholder() {
        let plan = plan(vec![
            InputParameter::Named("name".to_string()),
            InputParameter::Positional(1),
        ]);
        let mut bag = ParameterBag::new();
        bag.set_positional(1, 42i64).set_named("name", "gblanco");
        let values = plan.bind(&bag).unwrap();
        assert_eq!(values, vec![Value::from("gblanco"), Value::Int(42)]);
    }

    #[test]
    fn bind_reports_the_missing_parameter() {
        let plan = plan(vec![InputParameter::Positional(2)]);
        let err = plan.bind(&ParameterBag::new()).unwrap_err();
        assert!(matches!(err, QueryError::UnboundParameter { ref name } if name == "?2"));
    }

    #[test]
    fn cache_key_depends_on_salt() {
        let plan = plan(Vec::new());
        assert_ne!(plan.cache_key("v1"), plan.cache_key("v2"));
        assert_eq!(plan.cache_key("v1"), plan.cache_key("v1"));
    }
}
