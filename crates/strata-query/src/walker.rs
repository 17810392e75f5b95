//! AST to SQL translation.
//!
//! The walker visits clauses in the order they appear in the generated SQL
//! text, so the collected input parameters line up with their `?`
//! placeholders. Implicit joins produced by to-one path traversal carry no
//! parameters and are spliced into the FROM clause after the fact.

use crate::ast::*;
use crate::components::QueryComponent;
use crate::error::{QueryError, SemanticalError};
use crate::functions::ParserConfig;
use crate::plan::{ExecutablePlan, ResultColumn};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::Arc;
use strata_core::{AssociationKind, AssociationMetadata, EntityMetadata, MetadataRegistry};

/// Database-specific SQL details. The default emits portable SQL with
/// unquoted identifiers.
pub trait SqlDialect: Send + Sync {
    /// Quote an identifier if the dialect requires it.
    fn quote_identifier(&self, identifier: &str) -> String {
        identifier.to_string()
    }
}

pub struct DefaultDialect;

impl SqlDialect for DefaultDialect {}

struct ImplicitJoin {
    sql_alias: String,
    fragment: String,
}

struct Frame {
    components: IndexMap<String, QueryComponent>,
    /// DQL alias to SQL table alias. `None` means unqualified column
    /// references (single-table UPDATE/DELETE).
    sql_aliases: HashMap<String, Option<String>>,
    /// Keyed by (path chain, association field); deduplicates traversals of
    /// the same to-one association.
    implicit_joins: IndexMap<(String, String), ImplicitJoin>,
}

pub struct SqlWalker<'a> {
    registry: &'a MetadataRegistry,
    config: &'a ParserConfig,
    frames: Vec<Frame>,
    alias_counter: usize,
    scalar_counter: usize,
    parameters: Vec<InputParameter>,
    result_columns: Vec<ResultColumn>,
}

impl<'a> SqlWalker<'a> {
    pub fn new(registry: &'a MetadataRegistry, config: &'a ParserConfig) -> Self {
        SqlWalker {
            registry,
            config,
            frames: Vec::new(),
            alias_counter: 0,
            scalar_counter: 0,
            parameters: Vec::new(),
            result_columns: Vec::new(),
        }
    }

    pub fn walk(
        mut self,
        statement: &Statement,
        components: &IndexMap<String, QueryComponent>,
    ) -> Result<ExecutablePlan, QueryError> {
        let sql = match statement {
            Statement::Select(stmt) => self.walk_select(stmt, components)?,
            Statement::Update(stmt) => self.walk_update(stmt, components)?,
            Statement::Delete(stmt) => self.walk_delete(stmt, components)?,
        };
        tracing::debug!(
            sql = %sql,
            parameters = self.parameters.len(),
            "generated sql"
        );
        Ok(ExecutablePlan {
            sql,
            parameters: self.parameters,
            result_columns: self.result_columns,
        })
    }

    // frames and aliases

    fn push_frame(&mut self, components: &IndexMap<String, QueryComponent>, qualified: bool) {
        let mut sql_aliases = HashMap::new();
        for alias in components.keys() {
            let sql = if qualified {
                Some(self.next_sql_alias())
            } else {
                None
            };
            sql_aliases.insert(alias.clone(), sql);
        }
        self.frames.push(Frame {
            components: components.clone(),
            sql_aliases,
            implicit_joins: IndexMap::new(),
        });
    }

    fn pop_frame(&mut self) -> Frame {
        self.frames.pop().expect("walker frame stack is never empty")
    }

    fn next_sql_alias(&mut self) -> String {
        let alias = format!("t{}", self.alias_counter);
        self.alias_counter += 1;
        alias
    }

    fn next_scalar_alias(&mut self) -> String {
        let alias = format!("expr{}", self.scalar_counter);
        self.scalar_counter += 1;
        alias
    }

    fn quoted(&self, identifier: &str) -> String {
        self.config.dialect.quote_identifier(identifier)
    }

    fn push_parameter(&mut self, parameter: &InputParameter) -> &'static str {
        self.parameters.push(parameter.clone());
        "?"
    }

    /// SQL alias and metadata for a DQL alias, innermost frame first.
    fn component_info(
        &self,
        alias: &str,
    ) -> Result<(Option<String>, Arc<EntityMetadata>), QueryError> {
        for frame in self.frames.iter().rev() {
            if let Some(component) = frame.components.get(alias) {
                let sql = frame.sql_aliases.get(alias).cloned().flatten();
                return Ok((sql, Arc::clone(&component.entity)));
            }
        }
        Err(SemanticalError::UndeclaredAlias {
            alias: alias.to_string(),
        }
        .into())
    }

    // select statements

    fn walk_select(
        &mut self,
        stmt: &SelectStatement,
        components: &IndexMap<String, QueryComponent>,
    ) -> Result<String, QueryError> {
        self.push_frame(components, true);
        let is_root = self.frames.len() == 1;

        let select_sql = self.walk_select_clause(&stmt.select, is_root)?;
        let from_sql = self.walk_from_clause(&stmt.from)?;
        let where_sql = match &stmt.where_clause {
            Some(cond) => Some(self.walk_conditional(cond)?),
            None => None,
        };
        let group_sql = self.walk_group_by(&stmt.group_by)?;
        let having_sql = match &stmt.having {
            Some(cond) => Some(self.walk_conditional(cond)?),
            None => None,
        };
        let order_sql = self.walk_order_by(&stmt.order_by)?;

        let frame = self.pop_frame();
        Ok(assemble_select(
            &select_sql,
            &from_sql,
            &frame,
            where_sql,
            group_sql,
            having_sql,
            order_sql,
        ))
    }

    fn walk_subselect(&mut self, sub: &Subselect) -> Result<String, QueryError> {
        self.push_frame(&sub.components, true);

        let item_sql = self.walk_subselect_item(&sub.select.expression.item)?;
        let select_sql = if sub.select.distinct {
            format!("DISTINCT {item_sql}")
        } else {
            item_sql
        };
        let from_sql = self.walk_from_clause(&sub.from)?;
        let where_sql = match &sub.where_clause {
            Some(cond) => Some(self.walk_conditional(cond)?),
            None => None,
        };
        let group_sql = self.walk_group_by(&sub.group_by)?;
        let having_sql = match &sub.having {
            Some(cond) => Some(self.walk_conditional(cond)?),
            None => None,
        };

        let frame = self.pop_frame();
        Ok(assemble_select(
            &select_sql,
            &from_sql,
            &frame,
            where_sql,
            group_sql,
            having_sql,
            None,
        ))
    }

    /// A subselect projects a single column; an identification variable
    /// collapses to its identifier column.
    fn walk_subselect_item(&mut self, item: &SelectItem) -> Result<String, QueryError> {
        match item {
            SelectItem::IdentificationVariable(alias) => {
                let (sql_alias, meta) = self.component_info(alias)?;
                Ok(column_ref(&sql_alias, meta.identifier_column()))
            }
            SelectItem::Path(path) => self.resolve_path(path),
            SelectItem::Aggregate(agg) => self.walk_aggregate(agg),
            SelectItem::Function(func) => self.walk_function(func),
            SelectItem::Subselect(sub) => Ok(format!("({})", self.walk_subselect(sub)?)),
        }
    }

    fn walk_select_clause(
        &mut self,
        clause: &SelectClause,
        is_root: bool,
    ) -> Result<String, QueryError> {
        let mut parts = Vec::new();
        for expression in &clause.expressions {
            parts.push(self.walk_select_expression(expression, is_root)?);
        }
        let distinct = if clause.distinct { "DISTINCT " } else { "" };
        Ok(format!("{}{}", distinct, parts.join(", ")))
    }

    fn walk_select_expression(
        &mut self,
        expression: &SelectExpression,
        is_root: bool,
    ) -> Result<String, QueryError> {
        match &expression.item {
            SelectItem::IdentificationVariable(alias) => {
                self.expand_entity_columns(alias, is_root)
            }
            SelectItem::Path(path) => {
                let column = self.resolve_path(path)?;
                if path.fields.len() == 1 {
                    let column_alias = expression
                        .alias
                        .clone()
                        .unwrap_or_else(|| format!("{}_{}", path.alias, path.fields[0]));
                    if is_root {
                        self.result_columns.push(ResultColumn {
                            column_alias: column_alias.clone(),
                            dql_alias: Some(path.alias.clone()),
                            field: Some(path.fields[0].clone()),
                        });
                    }
                    Ok(format!("{column} AS {column_alias}"))
                } else {
                    let column_alias = self.scalar_alias(expression, is_root);
                    Ok(format!("{column} AS {column_alias}"))
                }
            }
            SelectItem::Aggregate(agg) => {
                let sql = self.walk_aggregate(agg)?;
                let column_alias = self.scalar_alias(expression, is_root);
                Ok(format!("{sql} AS {column_alias}"))
            }
            SelectItem::Function(func) => {
                let sql = self.walk_function(func)?;
                let column_alias = self.scalar_alias(expression, is_root);
                Ok(format!("{sql} AS {column_alias}"))
            }
            SelectItem::Subselect(sub) => {
                let sql = self.walk_subselect(sub)?;
                let column_alias = self.scalar_alias(expression, is_root);
                Ok(format!("({sql}) AS {column_alias}"))
            }
        }
    }

    fn scalar_alias(&mut self, expression: &SelectExpression, is_root: bool) -> String {
        let column_alias = expression
            .alias
            .clone()
            .unwrap_or_else(|| self.next_scalar_alias());
        if is_root {
            self.result_columns.push(ResultColumn {
                column_alias: column_alias.clone(),
                dql_alias: None,
                field: None,
            });
        }
        column_alias
    }

    /// `SELECT u` expands to all state-field columns of `u`'s entity.
    fn expand_entity_columns(&mut self, alias: &str, is_root: bool) -> Result<String, QueryError> {
        let (sql_alias, meta) = self.component_info(alias)?;
        let mut parts = Vec::new();
        for (field, mapping) in &meta.fields {
            let column_alias = format!("{alias}_{field}");
            parts.push(format!(
                "{} AS {}",
                column_ref(&sql_alias, &mapping.column),
                column_alias
            ));
            if is_root {
                self.result_columns.push(ResultColumn {
                    column_alias,
                    dql_alias: Some(alias.to_string()),
                    field: Some(field.clone()),
                });
            }
        }
        Ok(parts.join(", "))
    }

    // from clause and joins

    fn walk_from_clause(&mut self, from: &FromClause) -> Result<String, QueryError> {
        let mut declarations = Vec::new();
        for declaration in &from.declarations {
            let mut sql = self.walk_range(&declaration.range)?;
            for join_declaration in &declaration.joins {
                sql.push(' ');
                sql.push_str(&self.walk_join(&join_declaration.join)?);
            }
            declarations.push(sql);
        }
        Ok(declarations.join(", "))
    }

    fn walk_range(&mut self, range: &RangeVariableDeclaration) -> Result<String, QueryError> {
        let (sql_alias, meta) = self.component_info(&range.alias)?;
        match sql_alias {
            Some(alias) => Ok(format!("{} {}", self.quoted(&meta.table), alias)),
            None => Ok(self.quoted(&meta.table)),
        }
    }

    fn walk_join(&mut self, join: &Join) -> Result<String, QueryError> {
        let keyword = match join.kind {
            JoinKind::Inner => "INNER JOIN",
            JoinKind::Left | JoinKind::LeftOuter => "LEFT JOIN",
        };
        let (parent_sql, parent_meta) = self.component_info(&join.parent_alias)?;
        let parent_sql = parent_sql.ok_or_else(|| SemanticalError::UndeclaredAlias {
            alias: join.parent_alias.clone(),
        })?;
        let (child_sql, target) = self.component_info(&join.alias)?;
        let child_sql = child_sql.ok_or_else(|| SemanticalError::UndeclaredAlias {
            alias: join.alias.clone(),
        })?;
        let assoc = parent_meta
            .association(&join.association)
            .cloned()
            .ok_or_else(|| SemanticalError::UnknownAssociation {
                class: parent_meta.name.clone(),
                field: join.association.clone(),
            })?;

        let mut sql = match &assoc.kind {
            AssociationKind::ManyToMany { .. } => {
                self.many_to_many_join(keyword, &assoc, &target, &parent_sql, &child_sql)?
            }
            _ => {
                let predicate =
                    self.to_one_join_predicate(&assoc, &target, &parent_sql, &child_sql)?;
                format!(
                    "{keyword} {} {child_sql} ON {predicate}",
                    self.quoted(&target.table)
                )
            }
        };

        if let Some((_, condition)) = &join.condition {
            let condition_sql = self.walk_conditional(condition)?;
            sql.push_str(&format!(" AND ({condition_sql})"));
        }
        Ok(sql)
    }

    /// Join predicate for to-one and one-to-many associations. The owning
    /// side's join columns determine the direction.
    fn to_one_join_predicate(
        &self,
        assoc: &AssociationMetadata,
        target: &EntityMetadata,
        parent_sql: &str,
        child_sql: &str,
    ) -> Result<String, QueryError> {
        if assoc.is_owning_side() {
            Ok(assoc
                .join_columns
                .iter()
                .map(|jc| format!("{parent_sql}.{} = {child_sql}.{}", jc.name, jc.referenced_column))
                .collect::<Vec<_>>()
                .join(" AND "))
        } else {
            let mapped_by = match &assoc.kind {
                AssociationKind::OneToOne {
                    mapped_by: Some(field),
                } => field,
                AssociationKind::OneToMany { mapped_by } => mapped_by,
                _ => {
                    return Err(SemanticalError::UnknownAssociation {
                        class: target.name.clone(),
                        field: assoc.field.clone(),
                    }
                    .into())
                }
            };
            let owning = target.association(mapped_by).ok_or_else(|| {
                SemanticalError::UnknownAssociation {
                    class: target.name.clone(),
                    field: mapped_by.clone(),
                }
            })?;
            Ok(owning
                .join_columns
                .iter()
                .map(|jc| format!("{child_sql}.{} = {parent_sql}.{}", jc.name, jc.referenced_column))
                .collect::<Vec<_>>()
                .join(" AND "))
        }
    }

    /// Many-to-many joins pass through the join table: one fragment for the
    /// join table, one for the target table.
    fn many_to_many_join(
        &mut self,
        keyword: &str,
        assoc: &AssociationMetadata,
        target: &EntityMetadata,
        parent_sql: &str,
        child_sql: &str,
    ) -> Result<String, QueryError> {
        let missing = || SemanticalError::UnknownAssociation {
            class: target.name.clone(),
            field: assoc.field.clone(),
        };
        // (join table, columns matching the parent, columns matching the child)
        let (table, parent_columns, child_columns) = match &assoc.kind {
            AssociationKind::ManyToMany {
                join_table: Some(jt),
                ..
            } => (jt, &jt.join_columns, &jt.inverse_join_columns),
            AssociationKind::ManyToMany {
                mapped_by: Some(field),
                ..
            } => {
                let owning = target.association(field).ok_or_else(missing)?;
                match &owning.kind {
                    AssociationKind::ManyToMany {
                        join_table: Some(jt),
                        ..
                    } => (jt, &jt.inverse_join_columns, &jt.join_columns),
                    _ => return Err(missing().into()),
                }
            }
            _ => return Err(missing().into()),
        };

        // the table and column refs borrow from assoc/target; build strings
        // before allocating the alias
        let table_name = self.quoted(&table.name);
        let target_table = self.quoted(&target.table);
        let jt_sql = self.next_sql_alias();
        let on_parent = parent_columns
            .iter()
            .map(|jc| format!("{jt_sql}.{} = {parent_sql}.{}", jc.name, jc.referenced_column))
            .collect::<Vec<_>>()
            .join(" AND ");
        let on_child = child_columns
            .iter()
            .map(|jc| format!("{jt_sql}.{} = {child_sql}.{}", jc.name, jc.referenced_column))
            .collect::<Vec<_>>()
            .join(" AND ");

        Ok(format!(
            "{keyword} {table_name} {jt_sql} ON {on_parent} {keyword} {target_table} {child_sql} ON {on_child}"
        ))
    }

    fn walk_group_by(&mut self, paths: &[PathExpression]) -> Result<Option<String>, QueryError> {
        if paths.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::new();
        for path in paths {
            parts.push(self.resolve_path(path)?);
        }
        Ok(Some(parts.join(", ")))
    }

    fn walk_order_by(&mut self, items: &[OrderByItem]) -> Result<Option<String>, QueryError> {
        if items.is_empty() {
            return Ok(None);
        }
        let mut parts = Vec::new();
        for item in items {
            let column = self.resolve_path(&item.path)?;
            let direction = if item.descending { "DESC" } else { "ASC" };
            parts.push(format!("{column} {direction}"));
        }
        Ok(Some(parts.join(", ")))
    }

    // conditional expressions

    fn walk_conditional(&mut self, expr: &ConditionalExpression) -> Result<String, QueryError> {
        let mut terms = Vec::new();
        for term in &expr.terms {
            terms.push(self.walk_conditional_term(term)?);
        }
        Ok(terms.join(" OR "))
    }

    fn walk_conditional_term(&mut self, term: &ConditionalTerm) -> Result<String, QueryError> {
        let mut factors = Vec::new();
        for factor in &term.factors {
            factors.push(self.walk_conditional_factor(factor)?);
        }
        Ok(factors.join(" AND "))
    }

    fn walk_conditional_factor(&mut self, factor: &ConditionalFactor) -> Result<String, QueryError> {
        let primary = match &factor.primary {
            ConditionalPrimary::Simple(simple) => self.walk_simple_conditional(simple)?,
            ConditionalPrimary::Nested(inner) => format!("({})", self.walk_conditional(inner)?),
        };
        if factor.not {
            Ok(format!("NOT ({primary})"))
        } else {
            Ok(primary)
        }
    }

    fn walk_simple_conditional(&mut self, simple: &SimpleConditional) -> Result<String, QueryError> {
        match simple {
            SimpleConditional::Comparison(cmp) => {
                let left = self.walk_arithmetic(&cmp.left)?;
                let right = match &cmp.right {
                    ComparisonOperand::Arithmetic(expr) => self.walk_arithmetic(expr)?,
                    ComparisonOperand::Quantified(quant) => {
                        let sub = self.walk_subselect(&quant.subselect)?;
                        let word = match quant.quantifier {
                            Quantifier::All => "ALL",
                            Quantifier::Any => "ANY",
                            Quantifier::Some => "SOME",
                        };
                        format!("{word} ({sub})")
                    }
                };
                Ok(format!("{left} {} {right}", cmp.operator.as_sql()))
            }
            SimpleConditional::Between(between) => {
                let subject = self.walk_arithmetic(&between.subject)?;
                let lower = self.walk_arithmetic(&between.lower)?;
                let upper = self.walk_arithmetic(&between.upper)?;
                let not = if between.not { "NOT " } else { "" };
                Ok(format!("{subject} {not}BETWEEN {lower} AND {upper}"))
            }
            SimpleConditional::Like(like) => {
                let subject = self.walk_arithmetic(&like.subject)?;
                let pattern = match &like.pattern {
                    LikePattern::Literal(s) => string_literal(s),
                    LikePattern::Parameter(p) => self.push_parameter(p).to_string(),
                };
                let not = if like.not { "NOT " } else { "" };
                let mut sql = format!("{subject} {not}LIKE {pattern}");
                if let Some(escape) = &like.escape {
                    sql.push_str(&format!(" ESCAPE {}", string_literal(escape)));
                }
                Ok(sql)
            }
            SimpleConditional::In(in_expr) => {
                let column = self.resolve_path(&in_expr.path)?;
                let not = if in_expr.not { "NOT " } else { "" };
                let values = match &in_expr.values {
                    InValues::Literals(items) => {
                        let mut parts = Vec::new();
                        for item in items {
                            parts.push(match item {
                                InLiteral::Literal(literal) => literal_sql(literal),
                                InLiteral::Parameter(p) => self.push_parameter(p).to_string(),
                            });
                        }
                        parts.join(", ")
                    }
                    InValues::Subselect(sub) => self.walk_subselect(sub)?,
                };
                Ok(format!("{column} {not}IN ({values})"))
            }
            SimpleConditional::NullComparison(null_cmp) => {
                let subject = match &null_cmp.subject {
                    NullSubject::Path(path) => self.resolve_path(path)?,
                    NullSubject::Parameter(p) => self.push_parameter(p).to_string(),
                };
                let not = if null_cmp.not { "NOT " } else { "" };
                Ok(format!("{subject} IS {not}NULL"))
            }
            SimpleConditional::Exists(exists) => {
                let sub = self.walk_subselect(&exists.subselect)?;
                Ok(format!("EXISTS ({sub})"))
            }
        }
    }

    // arithmetic expressions

    fn walk_arithmetic(&mut self, expr: &ArithmeticExpression) -> Result<String, QueryError> {
        match expr {
            ArithmeticExpression::Simple(simple) => self.walk_simple_arithmetic(simple),
            ArithmeticExpression::Subselect(sub) => {
                Ok(format!("({})", self.walk_subselect(sub)?))
            }
        }
    }

    /// Render an additive expression; also the entry point for
    /// [`FunctionHandler::emit`] implementations.
    ///
    /// [`FunctionHandler::emit`]: crate::functions::FunctionHandler::emit
    pub fn walk_simple_arithmetic(
        &mut self,
        expr: &SimpleArithmeticExpression,
    ) -> Result<String, QueryError> {
        let mut sql = self.walk_arithmetic_term(&expr.first)?;
        for (op, term) in &expr.rest {
            let symbol = match op {
                AdditiveOperator::Add => "+",
                AdditiveOperator::Subtract => "-",
            };
            sql.push_str(&format!(" {symbol} {}", self.walk_arithmetic_term(term)?));
        }
        Ok(sql)
    }

    fn walk_arithmetic_term(&mut self, term: &ArithmeticTerm) -> Result<String, QueryError> {
        let mut sql = self.walk_arithmetic_factor(&term.first)?;
        for (op, factor) in &term.rest {
            let symbol = match op {
                MultiplicativeOperator::Multiply => "*",
                MultiplicativeOperator::Divide => "/",
            };
            sql.push_str(&format!(" {symbol} {}", self.walk_arithmetic_factor(factor)?));
        }
        Ok(sql)
    }

    fn walk_arithmetic_factor(&mut self, factor: &ArithmeticFactor) -> Result<String, QueryError> {
        let primary = match &factor.primary {
            ArithmeticPrimary::Path(path) => self.resolve_path(path)?,
            ArithmeticPrimary::Literal(literal) => literal_sql(literal),
            ArithmeticPrimary::Parameter(p) => self.push_parameter(p).to_string(),
            ArithmeticPrimary::Parenthesized(inner) => {
                format!("({})", self.walk_simple_arithmetic(inner)?)
            }
            ArithmeticPrimary::Function(func) => self.walk_function(func)?,
            ArithmeticPrimary::Aggregate(agg) => self.walk_aggregate(agg)?,
        };
        match factor.sign {
            Some(Sign::Minus) => Ok(format!("-{primary}")),
            _ => Ok(primary),
        }
    }

    fn walk_function(&mut self, func: &FunctionExpression) -> Result<String, QueryError> {
        let handler = self.config.functions.get(&func.name).ok_or_else(|| {
            SemanticalError::UnknownFunction {
                name: func.name.clone(),
            }
        })?;
        handler.emit(&func.args, self)
    }

    fn walk_aggregate(&mut self, agg: &AggregateExpression) -> Result<String, QueryError> {
        let operand = match &agg.operand {
            AggregateOperand::Path(path) => self.resolve_path(path)?,
            AggregateOperand::IdentificationVariable(alias) => {
                let (sql_alias, meta) = self.component_info(alias)?;
                column_ref(&sql_alias, meta.identifier_column())
            }
        };
        let distinct = if agg.distinct { "DISTINCT " } else { "" };
        Ok(format!("{}({distinct}{operand})", agg.function.as_sql()))
    }

    // path resolution

    /// Translate a dotted path to a column reference, allocating implicit
    /// INNER JOINs for intermediate to-one associations. A terminal
    /// single-valued owning association resolves to its foreign key column.
    fn resolve_path(&mut self, path: &PathExpression) -> Result<String, QueryError> {
        let frame_index = self
            .frames
            .iter()
            .rposition(|f| f.components.contains_key(&path.alias))
            .ok_or_else(|| SemanticalError::UndeclaredAlias {
                alias: path.alias.clone(),
            })?;
        let mut meta = Arc::clone(&self.frames[frame_index].components[&path.alias].entity);
        let mut sql_alias = self.frames[frame_index]
            .sql_aliases
            .get(&path.alias)
            .cloned()
            .flatten();
        let mut chain = path.alias.clone();

        for field in &path.fields[..path.fields.len() - 1] {
            let assoc = meta.association(field).cloned().ok_or_else(|| {
                SemanticalError::UnknownField {
                    class: meta.name.clone(),
                    field: field.clone(),
                }
            })?;
            let target = self.registry.get(&assoc.target_entity).ok_or_else(|| {
                SemanticalError::UnknownEntity {
                    name: assoc.target_entity.clone(),
                }
            })?;
            let parent_sql = sql_alias.clone().ok_or_else(|| {
                SemanticalError::UndeclaredAlias {
                    alias: chain.clone(),
                }
            })?;

            let key = (chain.clone(), field.clone());
            let existing = self.frames[frame_index]
                .implicit_joins
                .get(&key)
                .map(|join| join.sql_alias.clone());
            let join_alias = match existing {
                Some(alias) => alias,
                None => {
                    let new_alias = self.next_sql_alias();
                    let predicate =
                        self.to_one_join_predicate(&assoc, &target, &parent_sql, &new_alias)?;
                    let fragment = format!(
                        "INNER JOIN {} {new_alias} ON {predicate}",
                        self.quoted(&target.table)
                    );
                    self.frames[frame_index].implicit_joins.insert(
                        key,
                        ImplicitJoin {
                            sql_alias: new_alias.clone(),
                            fragment,
                        },
                    );
                    new_alias
                }
            };

            chain = format!("{chain}.{field}");
            sql_alias = Some(join_alias);
            meta = target;
        }

        let field = &path.fields[path.fields.len() - 1];
        if let Some(mapping) = meta.field(field) {
            return Ok(column_ref(&sql_alias, &mapping.column));
        }
        if let Some(assoc) = meta.association(field) {
            if assoc.is_single_valued() && assoc.is_owning_side() {
                return Ok(column_ref(&sql_alias, &assoc.join_columns[0].name));
            }
            return Err(SemanticalError::NotAStateField {
                class: meta.name.clone(),
                field: field.clone(),
            }
            .into());
        }
        Err(SemanticalError::UnknownField {
            class: meta.name.clone(),
            field: field.clone(),
        }
        .into())
    }

    // update / delete

    fn walk_update(
        &mut self,
        stmt: &UpdateStatement,
        components: &IndexMap<String, QueryComponent>,
    ) -> Result<String, QueryError> {
        self.push_frame(components, false);
        let (_, meta) = self.component_info(&stmt.alias)?;

        let mut sets = Vec::new();
        for item in &stmt.items {
            let field = &item.path.fields[0];
            let column = meta
                .field(field)
                .map(|f| f.column.clone())
                .ok_or_else(|| SemanticalError::UnknownField {
                    class: meta.name.clone(),
                    field: field.clone(),
                })?;
            let value = match &item.value {
                NewValue::Null => "NULL".to_string(),
                NewValue::Parameter(p) => self.push_parameter(p).to_string(),
                NewValue::Arithmetic(expr) => self.walk_simple_arithmetic(expr)?,
            };
            sets.push(format!("{column} = {value}"));
        }

        let mut sql = format!("UPDATE {} SET {}", self.quoted(&meta.table), sets.join(", "));
        if let Some(cond) = &stmt.where_clause {
            let where_sql = self.walk_conditional(cond)?;
            sql.push_str(&format!(" WHERE {where_sql}"));
        }
        self.pop_frame();
        Ok(sql)
    }

    fn walk_delete(
        &mut self,
        stmt: &DeleteStatement,
        components: &IndexMap<String, QueryComponent>,
    ) -> Result<String, QueryError> {
        self.push_frame(components, false);
        let (_, meta) = self.component_info(&stmt.alias)?;

        let mut sql = format!("DELETE FROM {}", self.quoted(&meta.table));
        if let Some(cond) = &stmt.where_clause {
            let where_sql = self.walk_conditional(cond)?;
            sql.push_str(&format!(" WHERE {where_sql}"));
        }
        self.pop_frame();
        Ok(sql)
    }
}

fn assemble_select(
    select_sql: &str,
    from_sql: &str,
    frame: &Frame,
    where_sql: Option<String>,
    group_sql: Option<String>,
    having_sql: Option<String>,
    order_sql: Option<String>,
) -> String {
    let mut sql = format!("SELECT {select_sql} FROM {from_sql}");
    for join in frame.implicit_joins.values() {
        sql.push(' ');
        sql.push_str(&join.fragment);
    }
    if let Some(clause) = where_sql {
        sql.push_str(&format!(" WHERE {clause}"));
    }
    if let Some(clause) = group_sql {
        sql.push_str(&format!(" GROUP BY {clause}"));
    }
    if let Some(clause) = having_sql {
        sql.push_str(&format!(" HAVING {clause}"));
    }
    if let Some(clause) = order_sql {
        sql.push_str(&format!(" ORDER BY {clause}"));
    }
    sql
}

fn column_ref(sql_alias: &Option<String>, column: &str) -> String {
    match sql_alias {
        Some(alias) => format!("{alias}.{column}"),
        None => column.to_string(),
    }
}

fn string_literal(s: &str) -> String {
    format!("'{}'", s.replace('\'', "''"))
}

fn literal_sql(literal: &Literal) -> String {
    match literal {
        Literal::Str(s) => string_literal(s),
        Literal::Int(n) => n.to_string(),
        Literal::Float(x) => x.to_string(),
    }
}
