//! Recursive-descent parser with semantic validation.
//!
//! One method per grammar production. The grammar is LL(1) except for a few
//! documented spots where a fixed peek sequence disambiguates:
//!
//! - a conditional primary starting with `(` is an arithmetic grouping when
//!   the token after the matching `)` is a comparison or arithmetic
//!   operator, otherwise a nested conditional;
//! - a simple conditional is routed by peeking past the leading operand
//!   (dotted path, function call) to the deciding keyword (`BETWEEN`,
//!   `LIKE`, `IN`, `IS`) or a comparison operator;
//! - `(` followed by `SELECT` starts a subselect.
//!
//! Path expressions in the SELECT clause refer to aliases declared later in
//! the FROM clause, so they are collected during the SELECT clause and
//! resolved in a second pass once the scope is populated. Everything after
//! the FROM clause validates inline.

use crate::ast::*;
use crate::components::{QueryComponent, ScopeStack};
use crate::error::{QueryError, SemanticalError};
use crate::functions::ParserConfig;
use crate::lexer::Lexer;
use crate::plan::ExecutablePlan;
use crate::token::{Token, TokenKind};
use crate::walker::SqlWalker;
use indexmap::IndexMap;
use std::sync::Arc;
use strata_core::MetadataRegistry;

/// The complete result of compiling one query string.
#[derive(Debug, Clone)]
pub struct ParsedQuery {
    pub statement: Statement,
    /// Root-scope query components, keyed by identification variable.
    pub components: IndexMap<String, QueryComponent>,
    pub plan: ExecutablePlan,
}

/// Parse and compile a query string in one step.
pub fn parse(
    source: &str,
    registry: &MetadataRegistry,
    config: &ParserConfig,
) -> Result<ParsedQuery, QueryError> {
    Parser::new(source, registry, config)?.parse()
}

struct DeferredPath {
    alias: String,
    /// Empty for a bare identification-variable reference.
    fields: Vec<String>,
}

struct DeferredFrame {
    pending: Vec<DeferredPath>,
    collecting: bool,
}

pub struct Parser<'a> {
    lexer: Lexer,
    registry: &'a MetadataRegistry,
    config: &'a ParserConfig,
    scopes: ScopeStack,
    deferred: Vec<DeferredFrame>,
}

impl<'a> Parser<'a> {
    pub fn new(
        source: &str,
        registry: &'a MetadataRegistry,
        config: &'a ParserConfig,
    ) -> Result<Self, QueryError> {
        Ok(Parser {
            lexer: Lexer::new(source)?,
            registry,
            config,
            scopes: ScopeStack::new(),
            deferred: Vec::new(),
        })
    }

    pub fn parse(mut self) -> Result<ParsedQuery, QueryError> {
        let statement = match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::Select) => Statement::Select(self.select_statement()?),
            Some(TokenKind::Update) => Statement::Update(self.update_statement()?),
            Some(TokenKind::Delete) => Statement::Delete(self.delete_statement()?),
            _ => return Err(self.syntax_error("SELECT, UPDATE or DELETE")),
        };
        if self.lexer.lookahead().is_some() {
            return Err(self.syntax_error("end of string"));
        }

        let components = self.scopes.root_components();
        let plan = SqlWalker::new(self.registry, self.config).walk(&statement, &components)?;
        Ok(ParsedQuery {
            statement,
            components,
            plan,
        })
    }

    // token plumbing

    pub fn is_next(&self, kind: TokenKind) -> bool {
        self.lexer.is_next(kind)
    }

    pub fn glimpse_is(&self, kind: TokenKind) -> bool {
        self.lexer.glimpse().map(|t| t.kind == kind).unwrap_or(false)
    }

    pub fn expect(&mut self, kind: TokenKind) -> Result<Token, QueryError> {
        match self.lexer.lookahead() {
            Some(t) if t.kind == kind => {
                let token = t.clone();
                self.lexer.move_next();
                Ok(token)
            }
            _ => Err(self.syntax_error(kind.describe())),
        }
    }

    pub fn consume_if(&mut self, kind: TokenKind) -> bool {
        if self.is_next(kind) {
            self.lexer.move_next();
            true
        } else {
            false
        }
    }

    /// Consume an identifier token spelling `word` (case-insensitive).
    pub fn consume_identifier_if(&mut self, word: &str) -> bool {
        if let Some(t) = self.lexer.lookahead() {
            if t.kind == TokenKind::Identifier && t.value.eq_ignore_ascii_case(word) {
                self.lexer.move_next();
                return true;
            }
        }
        false
    }

    fn syntax_error(&self, expected: &str) -> QueryError {
        let got = self
            .lexer
            .lookahead()
            .map(|t| t.value.clone())
            .unwrap_or_else(|| "end of string".to_string());
        QueryError::Syntax {
            expected: expected.to_string(),
            got,
            position: self.lexer.offset(),
        }
    }

    // statements

    fn select_statement(&mut self) -> Result<SelectStatement, QueryError> {
        self.deferred.push(DeferredFrame {
            pending: Vec::new(),
            collecting: true,
        });
        let select = self.select_clause()?;
        if let Some(frame) = self.deferred.last_mut() {
            frame.collecting = false;
        }
        let from = self.from_clause()?;
        self.resolve_deferred()?;

        let where_clause = self.optional_where()?;
        let group_by = self.optional_group_by()?;
        let having = self.optional_having()?;
        let order_by = self.optional_order_by()?;

        Ok(SelectStatement {
            select,
            from,
            where_clause,
            group_by,
            having,
            order_by,
        })
    }

    fn update_statement(&mut self) -> Result<UpdateStatement, QueryError> {
        self.expect(TokenKind::Update)?;
        let entity = self.expect(TokenKind::Identifier)?.value;
        let meta = self
            .registry
            .get(&entity)
            .ok_or_else(|| SemanticalError::UnknownEntity {
                name: entity.clone(),
            })?;
        self.consume_if(TokenKind::As);
        let alias = if self.is_next(TokenKind::Identifier) {
            self.expect(TokenKind::Identifier)?.value
        } else {
            entity.clone()
        };
        self.scopes
            .declare(alias.clone(), QueryComponent::root(meta))?;

        self.expect(TokenKind::Set)?;
        let mut items = vec![self.update_item()?];
        while self.consume_if(TokenKind::Comma) {
            items.push(self.update_item()?);
        }
        let where_clause = self.optional_where()?;

        Ok(UpdateStatement {
            entity,
            alias,
            items,
            where_clause,
        })
    }

    fn update_item(&mut self) -> Result<UpdateItem, QueryError> {
        let alias = self.expect(TokenKind::Identifier)?.value;
        if !self.is_next(TokenKind::Dot) {
            // bare field names are not accepted in SET items
            return Err(self.syntax_error("alias-qualified field (alias.field)"));
        }
        self.expect(TokenKind::Dot)?;
        let field = self.expect(TokenKind::Identifier)?.value;
        let path = PathExpression {
            alias,
            fields: vec![field],
        };
        self.validate_path(&path.alias, &path.fields, false)?;
        self.expect(TokenKind::Equal)?;
        let value = self.new_value()?;
        Ok(UpdateItem { path, value })
    }

    fn new_value(&mut self) -> Result<NewValue, QueryError> {
        if self.consume_if(TokenKind::Null) {
            Ok(NewValue::Null)
        } else if self.is_next(TokenKind::InputParameter) {
            Ok(NewValue::Parameter(self.input_parameter()?))
        } else {
            Ok(NewValue::Arithmetic(self.simple_arithmetic_expression()?))
        }
    }

    fn delete_statement(&mut self) -> Result<DeleteStatement, QueryError> {
        self.expect(TokenKind::Delete)?;
        self.consume_if(TokenKind::From);
        let entity = self.expect(TokenKind::Identifier)?.value;
        let meta = self
            .registry
            .get(&entity)
            .ok_or_else(|| SemanticalError::UnknownEntity {
                name: entity.clone(),
            })?;
        self.consume_if(TokenKind::As);
        let alias = if self.is_next(TokenKind::Identifier) {
            self.expect(TokenKind::Identifier)?.value
        } else {
            entity.clone()
        };
        self.scopes
            .declare(alias.clone(), QueryComponent::root(meta))?;
        let where_clause = self.optional_where()?;

        Ok(DeleteStatement {
            entity,
            alias,
            where_clause,
        })
    }

    // clauses

    fn select_clause(&mut self) -> Result<SelectClause, QueryError> {
        self.expect(TokenKind::Select)?;
        let distinct = self.consume_if(TokenKind::Distinct);
        let mut expressions = vec![self.select_expression()?];
        while self.consume_if(TokenKind::Comma) {
            expressions.push(self.select_expression()?);
        }
        Ok(SelectClause {
            distinct,
            expressions,
        })
    }

    fn select_expression(&mut self) -> Result<SelectExpression, QueryError> {
        let item = self.select_item()?;
        let alias = if self.consume_if(TokenKind::As) {
            Some(self.expect(TokenKind::Identifier)?.value)
        } else if self.is_next(TokenKind::Identifier) {
            Some(self.expect(TokenKind::Identifier)?.value)
        } else {
            None
        };
        Ok(SelectExpression { item, alias })
    }

    fn select_item(&mut self) -> Result<SelectItem, QueryError> {
        match self.lexer.lookahead().map(|t| t.kind) {
            Some(k) if k.is_aggregate() => Ok(SelectItem::Aggregate(self.aggregate_expression()?)),
            Some(TokenKind::OpenParen) => {
                self.expect(TokenKind::OpenParen)?;
                let sub = self.subselect()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(SelectItem::Subselect(Box::new(sub)))
            }
            Some(TokenKind::Identifier) => {
                if self.glimpse_is(TokenKind::Dot) {
                    Ok(SelectItem::Path(self.path_expression()?))
                } else if self.glimpse_is(TokenKind::OpenParen) {
                    Ok(SelectItem::Function(self.function_expression()?))
                } else {
                    let alias = self.expect(TokenKind::Identifier)?.value;
                    self.record_variable_reference(&alias)?;
                    Ok(SelectItem::IdentificationVariable(alias))
                }
            }
            _ => Err(self.syntax_error("select expression")),
        }
    }

    fn from_clause(&mut self) -> Result<FromClause, QueryError> {
        self.expect(TokenKind::From)?;
        let mut declarations = vec![self.identification_variable_declaration()?];
        while self.consume_if(TokenKind::Comma) {
            declarations.push(self.identification_variable_declaration()?);
        }
        Ok(FromClause { declarations })
    }

    fn identification_variable_declaration(
        &mut self,
    ) -> Result<IdentificationVariableDeclaration, QueryError> {
        let range = self.range_variable_declaration()?;
        let index_by = if self.is_next(TokenKind::Index) {
            Some(self.index_by()?)
        } else {
            None
        };
        let mut joins = Vec::new();
        while self.is_next(TokenKind::Left)
            || self.is_next(TokenKind::Inner)
            || self.is_next(TokenKind::Join)
        {
            let join = self.join()?;
            let join_index_by = if self.is_next(TokenKind::Index) {
                Some(self.index_by()?)
            } else {
                None
            };
            joins.push(JoinVariableDeclaration {
                join,
                index_by: join_index_by,
            });
        }
        Ok(IdentificationVariableDeclaration {
            range,
            index_by,
            joins,
        })
    }

    fn range_variable_declaration(&mut self) -> Result<RangeVariableDeclaration, QueryError> {
        let entity = self.expect(TokenKind::Identifier)?.value;
        let meta = self
            .registry
            .get(&entity)
            .ok_or_else(|| SemanticalError::UnknownEntity {
                name: entity.clone(),
            })?;
        self.consume_if(TokenKind::As);
        let alias = if self.is_next(TokenKind::Identifier) {
            self.expect(TokenKind::Identifier)?.value
        } else {
            entity.clone()
        };
        self.scopes
            .declare(alias.clone(), QueryComponent::root(meta))?;
        Ok(RangeVariableDeclaration { entity, alias })
    }

    /// `INDEX BY alias.field`: records the hydration key on the component
    /// the path's alias names, which is the immediately preceding range or
    /// join variable declaration.
    fn index_by(&mut self) -> Result<PathExpression, QueryError> {
        self.expect(TokenKind::Index)?;
        self.expect(TokenKind::By)?;
        let alias = self.expect(TokenKind::Identifier)?.value;
        self.expect(TokenKind::Dot)?;
        let field = self.expect(TokenKind::Identifier)?.value;
        self.validate_path(&alias, std::slice::from_ref(&field), false)?;
        if let Some(component) = self.scopes.resolve_mut(&alias) {
            component.index_by = Some(field.clone());
        }
        Ok(PathExpression {
            alias,
            fields: vec![field],
        })
    }

    fn join(&mut self) -> Result<Join, QueryError> {
        let kind = if self.consume_if(TokenKind::Left) {
            if self.consume_if(TokenKind::Outer) {
                JoinKind::LeftOuter
            } else {
                JoinKind::Left
            }
        } else {
            self.consume_if(TokenKind::Inner);
            JoinKind::Inner
        };
        self.expect(TokenKind::Join)?;

        let parent_alias = self.expect(TokenKind::Identifier)?.value;
        self.expect(TokenKind::Dot)?;
        let field = self.expect(TokenKind::Identifier)?.value;

        let (class, association) = {
            let component = self.scopes.resolve(&parent_alias).ok_or_else(|| {
                SemanticalError::UndeclaredAlias {
                    alias: parent_alias.clone(),
                }
            })?;
            (
                component.entity.name.clone(),
                component.entity.association(&field).cloned(),
            )
        };
        let association = association.ok_or(SemanticalError::UnknownAssociation {
            class,
            field: field.clone(),
        })?;
        let target = self.registry.get(&association.target_entity).ok_or_else(|| {
            SemanticalError::UnknownEntity {
                name: association.target_entity.clone(),
            }
        })?;

        self.consume_if(TokenKind::As);
        let alias = self.expect(TokenKind::Identifier)?.value;
        self.scopes.declare(
            alias.clone(),
            QueryComponent::joined(target, parent_alias.clone(), association),
        )?;

        let condition = if self.consume_if(TokenKind::On) {
            Some((JoinConditionKind::On, self.conditional_expression()?))
        } else if self.consume_if(TokenKind::With) {
            Some((JoinConditionKind::With, self.conditional_expression()?))
        } else {
            None
        };

        Ok(Join {
            kind,
            parent_alias,
            association: field,
            alias,
            condition,
        })
    }

    fn optional_where(&mut self) -> Result<Option<ConditionalExpression>, QueryError> {
        if self.consume_if(TokenKind::Where) {
            Ok(Some(self.conditional_expression()?))
        } else {
            Ok(None)
        }
    }

    fn optional_group_by(&mut self) -> Result<Vec<PathExpression>, QueryError> {
        if !self.consume_if(TokenKind::Group) {
            return Ok(Vec::new());
        }
        self.expect(TokenKind::By)?;
        let mut paths = vec![self.path_expression()?];
        while self.consume_if(TokenKind::Comma) {
            paths.push(self.path_expression()?);
        }
        Ok(paths)
    }

    fn optional_having(&mut self) -> Result<Option<ConditionalExpression>, QueryError> {
        if self.consume_if(TokenKind::Having) {
            Ok(Some(self.conditional_expression()?))
        } else {
            Ok(None)
        }
    }

    fn optional_order_by(&mut self) -> Result<Vec<OrderByItem>, QueryError> {
        if !self.consume_if(TokenKind::Order) {
            return Ok(Vec::new());
        }
        self.expect(TokenKind::By)?;
        let mut items = vec![self.order_by_item()?];
        while self.consume_if(TokenKind::Comma) {
            items.push(self.order_by_item()?);
        }
        Ok(items)
    }

    fn order_by_item(&mut self) -> Result<OrderByItem, QueryError> {
        let path = self.path_expression()?;
        let descending = if self.consume_if(TokenKind::Desc) {
            true
        } else {
            self.consume_if(TokenKind::Asc);
            false
        };
        Ok(OrderByItem { path, descending })
    }

    // subselects

    fn subselect(&mut self) -> Result<Subselect, QueryError> {
        self.scopes.push();
        self.deferred.push(DeferredFrame {
            pending: Vec::new(),
            collecting: true,
        });

        // errors abort the whole parse, so no unwinding is needed here
        self.subselect_body()
    }

    fn subselect_body(&mut self) -> Result<Subselect, QueryError> {
        let select = self.simple_select_clause()?;
        if let Some(frame) = self.deferred.last_mut() {
            frame.collecting = false;
        }
        let from = self.from_clause()?;
        self.resolve_deferred()?;

        let where_clause = self.optional_where()?;
        let group_by = self.optional_group_by()?;
        let having = self.optional_having()?;

        let components = self.scopes.current_components();
        self.scopes.pop();

        Ok(Subselect {
            select,
            from,
            where_clause,
            group_by,
            having,
            components,
        })
    }

    fn simple_select_clause(&mut self) -> Result<SimpleSelectClause, QueryError> {
        self.expect(TokenKind::Select)?;
        let distinct = self.consume_if(TokenKind::Distinct);
        let item = self.select_item()?;
        Ok(SimpleSelectClause {
            distinct,
            expression: SelectExpression { item, alias: None },
        })
    }

    // conditional expressions

    fn conditional_expression(&mut self) -> Result<ConditionalExpression, QueryError> {
        let mut terms = vec![self.conditional_term()?];
        while self.consume_if(TokenKind::Or) {
            terms.push(self.conditional_term()?);
        }
        Ok(ConditionalExpression { terms })
    }

    fn conditional_term(&mut self) -> Result<ConditionalTerm, QueryError> {
        let mut factors = vec![self.conditional_factor()?];
        while self.consume_if(TokenKind::And) {
            factors.push(self.conditional_factor()?);
        }
        Ok(ConditionalTerm { factors })
    }

    fn conditional_factor(&mut self) -> Result<ConditionalFactor, QueryError> {
        let not = self.consume_if(TokenKind::Not);
        let primary = self.conditional_primary()?;
        Ok(ConditionalFactor { not, primary })
    }

    fn conditional_primary(&mut self) -> Result<ConditionalPrimary, QueryError> {
        if !self.is_next(TokenKind::OpenParen) {
            return Ok(ConditionalPrimary::Simple(Box::new(
                self.simple_conditional()?,
            )));
        }
        // `(` is ambiguous: arithmetic grouping or nested conditional.
        // Decide by what follows the matching `)`.
        match self.token_after_matching_paren() {
            Some(k)
                if k.is_comparison_operator()
                    || matches!(
                        k,
                        TokenKind::Plus | TokenKind::Minus | TokenKind::Star | TokenKind::Slash
                    ) =>
            {
                Ok(ConditionalPrimary::Simple(Box::new(
                    self.simple_conditional()?,
                )))
            }
            _ => {
                self.expect(TokenKind::OpenParen)?;
                let inner = self.conditional_expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(ConditionalPrimary::Nested(Box::new(inner)))
            }
        }
    }

    /// Peek past the `(` at the lookahead to its matching `)` and return
    /// the kind of the token after it. Leaves the lookahead untouched.
    fn token_after_matching_paren(&mut self) -> Option<TokenKind> {
        let mut depth = 1;
        let result = loop {
            match self.lexer.peek().map(|t| t.kind) {
                Some(TokenKind::OpenParen) => depth += 1,
                Some(TokenKind::CloseParen) => {
                    depth -= 1;
                    if depth == 0 {
                        break self.lexer.peek().map(|t| t.kind);
                    }
                }
                Some(_) => {}
                None => break None,
            }
        };
        self.lexer.reset_peek();
        result
    }

    fn simple_conditional(&mut self) -> Result<SimpleConditional, QueryError> {
        if self.is_next(TokenKind::Exists) {
            return Ok(SimpleConditional::Exists(self.exists_expression()?));
        }
        match self.deciding_token() {
            Some(TokenKind::Between) => Ok(SimpleConditional::Between(self.between_expression()?)),
            Some(TokenKind::Like) => Ok(SimpleConditional::Like(self.like_expression()?)),
            Some(TokenKind::In) => Ok(SimpleConditional::In(self.in_expression()?)),
            Some(TokenKind::Is) => {
                Ok(SimpleConditional::NullComparison(self.null_comparison()?))
            }
            _ => Ok(SimpleConditional::Comparison(self.comparison_expression()?)),
        }
    }

    /// Peek past the first operand (a dotted path, a parameter, or a
    /// function call) to the token that selects the conditional form.
    fn deciding_token(&mut self) -> Option<TokenKind> {
        let start = self.lexer.lookahead().map(|t| t.kind);
        let deciding = match start {
            Some(TokenKind::Identifier) | Some(TokenKind::InputParameter) => {
                let mut next = self.lexer.peek().map(|t| t.kind);
                while next == Some(TokenKind::Dot) {
                    self.lexer.peek();
                    next = self.lexer.peek().map(|t| t.kind);
                }
                if next == Some(TokenKind::OpenParen) {
                    // function call: skip the argument list
                    let mut depth = 1;
                    next = loop {
                        match self.lexer.peek().map(|t| t.kind) {
                            Some(TokenKind::OpenParen) => depth += 1,
                            Some(TokenKind::CloseParen) => {
                                depth -= 1;
                                if depth == 0 {
                                    break self.lexer.peek().map(|t| t.kind);
                                }
                            }
                            Some(_) => {}
                            None => break None,
                        }
                    };
                }
                if next == Some(TokenKind::Not) {
                    next = self.lexer.peek().map(|t| t.kind);
                }
                next
            }
            _ => None,
        };
        self.lexer.reset_peek();
        deciding
    }

    fn comparison_expression(&mut self) -> Result<ComparisonExpression, QueryError> {
        let left = self.arithmetic_expression()?;
        let operator = self.comparison_operator()?;
        let right = match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::All) | Some(TokenKind::Any) | Some(TokenKind::Some) => {
                ComparisonOperand::Quantified(self.quantified_expression()?)
            }
            _ => ComparisonOperand::Arithmetic(self.arithmetic_expression()?),
        };
        Ok(ComparisonExpression {
            left,
            operator,
            right,
        })
    }

    fn comparison_operator(&mut self) -> Result<ComparisonOperator, QueryError> {
        let op = match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::Equal) => ComparisonOperator::Equal,
            Some(TokenKind::NotEqual) => ComparisonOperator::NotEqual,
            Some(TokenKind::LessThan) => ComparisonOperator::LessThan,
            Some(TokenKind::LessOrEqual) => ComparisonOperator::LessOrEqual,
            Some(TokenKind::GreaterThan) => ComparisonOperator::GreaterThan,
            Some(TokenKind::GreaterOrEqual) => ComparisonOperator::GreaterOrEqual,
            _ => return Err(self.syntax_error("comparison operator")),
        };
        self.lexer.move_next();
        Ok(op)
    }

    fn between_expression(&mut self) -> Result<BetweenExpression, QueryError> {
        let subject = self.arithmetic_expression()?;
        let not = self.consume_if(TokenKind::Not);
        self.expect(TokenKind::Between)?;
        let lower = self.arithmetic_expression()?;
        self.expect(TokenKind::And)?;
        let upper = self.arithmetic_expression()?;
        Ok(BetweenExpression {
            subject,
            not,
            lower,
            upper,
        })
    }

    fn like_expression(&mut self) -> Result<LikeExpression, QueryError> {
        let subject = self.arithmetic_expression()?;
        let not = self.consume_if(TokenKind::Not);
        self.expect(TokenKind::Like)?;
        let pattern = if self.is_next(TokenKind::InputParameter) {
            LikePattern::Parameter(self.input_parameter()?)
        } else {
            LikePattern::Literal(self.expect(TokenKind::StringLiteral)?.value)
        };
        let escape = if self.consume_if(TokenKind::Escape) {
            Some(self.expect(TokenKind::StringLiteral)?.value)
        } else {
            None
        };
        Ok(LikeExpression {
            subject,
            not,
            pattern,
            escape,
        })
    }

    fn in_expression(&mut self) -> Result<InExpression, QueryError> {
        let path = self.path_expression()?;
        let not = self.consume_if(TokenKind::Not);
        self.expect(TokenKind::In)?;
        self.expect(TokenKind::OpenParen)?;
        let values = if self.is_next(TokenKind::Select) {
            InValues::Subselect(Box::new(self.subselect()?))
        } else {
            let mut items = vec![self.in_literal()?];
            while self.consume_if(TokenKind::Comma) {
                items.push(self.in_literal()?);
            }
            InValues::Literals(items)
        };
        self.expect(TokenKind::CloseParen)?;
        Ok(InExpression { path, not, values })
    }

    fn in_literal(&mut self) -> Result<InLiteral, QueryError> {
        if self.is_next(TokenKind::InputParameter) {
            Ok(InLiteral::Parameter(self.input_parameter()?))
        } else {
            Ok(InLiteral::Literal(self.literal()?))
        }
    }

    fn null_comparison(&mut self) -> Result<NullComparisonExpression, QueryError> {
        let subject = if self.is_next(TokenKind::InputParameter) {
            NullSubject::Parameter(self.input_parameter()?)
        } else {
            NullSubject::Path(self.single_valued_path_expression()?)
        };
        self.expect(TokenKind::Is)?;
        let not = self.consume_if(TokenKind::Not);
        self.expect(TokenKind::Null)?;
        Ok(NullComparisonExpression { subject, not })
    }

    fn exists_expression(&mut self) -> Result<ExistsExpression, QueryError> {
        self.expect(TokenKind::Exists)?;
        self.expect(TokenKind::OpenParen)?;
        let subselect = Box::new(self.subselect()?);
        self.expect(TokenKind::CloseParen)?;
        Ok(ExistsExpression { subselect })
    }

    fn quantified_expression(&mut self) -> Result<QuantifiedExpression, QueryError> {
        let quantifier = match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::All) => Quantifier::All,
            Some(TokenKind::Any) => Quantifier::Any,
            Some(TokenKind::Some) => Quantifier::Some,
            _ => return Err(self.syntax_error("ALL, ANY or SOME")),
        };
        self.lexer.move_next();
        self.expect(TokenKind::OpenParen)?;
        let subselect = Box::new(self.subselect()?);
        self.expect(TokenKind::CloseParen)?;
        Ok(QuantifiedExpression {
            quantifier,
            subselect,
        })
    }

    // arithmetic expressions

    fn arithmetic_expression(&mut self) -> Result<ArithmeticExpression, QueryError> {
        if self.is_next(TokenKind::OpenParen) && self.glimpse_is(TokenKind::Select) {
            self.expect(TokenKind::OpenParen)?;
            let sub = self.subselect()?;
            self.expect(TokenKind::CloseParen)?;
            Ok(ArithmeticExpression::Subselect(Box::new(sub)))
        } else {
            Ok(ArithmeticExpression::Simple(
                self.simple_arithmetic_expression()?,
            ))
        }
    }

    fn simple_arithmetic_expression(
        &mut self,
    ) -> Result<SimpleArithmeticExpression, QueryError> {
        let first = self.arithmetic_term()?;
        let mut rest = Vec::new();
        loop {
            if self.consume_if(TokenKind::Plus) {
                rest.push((AdditiveOperator::Add, self.arithmetic_term()?));
            } else if self.consume_if(TokenKind::Minus) {
                rest.push((AdditiveOperator::Subtract, self.arithmetic_term()?));
            } else {
                break;
            }
        }
        Ok(SimpleArithmeticExpression { first, rest })
    }

    fn arithmetic_term(&mut self) -> Result<ArithmeticTerm, QueryError> {
        let first = self.arithmetic_factor()?;
        let mut rest = Vec::new();
        loop {
            if self.consume_if(TokenKind::Star) {
                rest.push((MultiplicativeOperator::Multiply, self.arithmetic_factor()?));
            } else if self.consume_if(TokenKind::Slash) {
                rest.push((MultiplicativeOperator::Divide, self.arithmetic_factor()?));
            } else {
                break;
            }
        }
        Ok(ArithmeticTerm { first, rest })
    }

    fn arithmetic_factor(&mut self) -> Result<ArithmeticFactor, QueryError> {
        let sign = if self.consume_if(TokenKind::Plus) {
            Some(Sign::Plus)
        } else if self.consume_if(TokenKind::Minus) {
            Some(Sign::Minus)
        } else {
            None
        };
        let primary = self.arithmetic_primary()?;
        Ok(ArithmeticFactor { sign, primary })
    }

    fn arithmetic_primary(&mut self) -> Result<ArithmeticPrimary, QueryError> {
        match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::OpenParen) => {
                self.expect(TokenKind::OpenParen)?;
                let inner = self.simple_arithmetic_expression()?;
                self.expect(TokenKind::CloseParen)?;
                Ok(ArithmeticPrimary::Parenthesized(Box::new(inner)))
            }
            Some(TokenKind::InputParameter) => {
                Ok(ArithmeticPrimary::Parameter(self.input_parameter()?))
            }
            Some(TokenKind::IntegerLiteral)
            | Some(TokenKind::FloatLiteral)
            | Some(TokenKind::StringLiteral) => Ok(ArithmeticPrimary::Literal(self.literal()?)),
            Some(k) if k.is_aggregate() => Ok(ArithmeticPrimary::Aggregate(Box::new(
                self.aggregate_expression()?,
            ))),
            Some(TokenKind::Identifier) => {
                if self.glimpse_is(TokenKind::Dot) {
                    Ok(ArithmeticPrimary::Path(self.arithmetic_path_expression()?))
                } else if self.glimpse_is(TokenKind::OpenParen) {
                    Ok(ArithmeticPrimary::Function(self.function_expression()?))
                } else {
                    Err(self.syntax_error("path expression or function"))
                }
            }
            _ => Err(self.syntax_error("arithmetic primary")),
        }
    }

    fn literal(&mut self) -> Result<Literal, QueryError> {
        match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::IntegerLiteral) => {
                let token = self.expect(TokenKind::IntegerLiteral)?;
                let n = token
                    .value
                    .parse::<i64>()
                    .map_err(|_| self.syntax_error("integer literal"))?;
                Ok(Literal::Int(n))
            }
            Some(TokenKind::FloatLiteral) => {
                let token = self.expect(TokenKind::FloatLiteral)?;
                let x = token
                    .value
                    .parse::<f64>()
                    .map_err(|_| self.syntax_error("float literal"))?;
                Ok(Literal::Float(x))
            }
            Some(TokenKind::StringLiteral) => {
                Ok(Literal::Str(self.expect(TokenKind::StringLiteral)?.value))
            }
            _ => Err(self.syntax_error("literal")),
        }
    }

    fn input_parameter(&mut self) -> Result<InputParameter, QueryError> {
        let token = self.expect(TokenKind::InputParameter)?;
        if let Some(rest) = token.value.strip_prefix('?') {
            let n = rest
                .parse::<u32>()
                .map_err(|_| self.syntax_error("parameter position"))?;
            Ok(InputParameter::Positional(n))
        } else {
            Ok(InputParameter::Named(token.value[1..].to_string()))
        }
    }

    // functions and aggregates

    fn function_expression(&mut self) -> Result<FunctionExpression, QueryError> {
        let name = self
            .expect(TokenKind::Identifier)?
            .value
            .to_ascii_lowercase();
        let handler =
            self.config
                .functions
                .get(&name)
                .ok_or_else(|| SemanticalError::UnknownFunction {
                    name: name.clone(),
                })?;
        let args = handler.parse_args(self)?;
        Ok(FunctionExpression {
            name,
            return_type: handler.return_type(),
            args,
        })
    }

    fn aggregate_expression(&mut self) -> Result<AggregateExpression, QueryError> {
        let function = match self.lexer.lookahead().map(|t| t.kind) {
            Some(TokenKind::Avg) => AggregateFunction::Avg,
            Some(TokenKind::Count) => AggregateFunction::Count,
            Some(TokenKind::Max) => AggregateFunction::Max,
            Some(TokenKind::Min) => AggregateFunction::Min,
            Some(TokenKind::Sum) => AggregateFunction::Sum,
            _ => return Err(self.syntax_error("aggregate function")),
        };
        self.lexer.move_next();
        self.expect(TokenKind::OpenParen)?;
        let distinct = self.consume_if(TokenKind::Distinct);
        let operand = if self.is_next(TokenKind::Identifier) && self.glimpse_is(TokenKind::Dot) {
            AggregateOperand::Path(self.path_expression()?)
        } else {
            let alias = self.expect(TokenKind::Identifier)?.value;
            self.record_variable_reference(&alias)?;
            AggregateOperand::IdentificationVariable(alias)
        };
        self.expect(TokenKind::CloseParen)?;
        Ok(AggregateExpression {
            function,
            distinct,
            operand,
        })
    }

    /// Parse one arithmetic function argument; for [`FunctionHandler`]
    /// implementations.
    ///
    /// [`FunctionHandler`]: crate::functions::FunctionHandler
    pub fn parse_function_argument(
        &mut self,
    ) -> Result<SimpleArithmeticExpression, QueryError> {
        self.simple_arithmetic_expression()
    }

    /// Parse `( arg, arg, ... )` with an arity bound; for
    /// [`FunctionHandler`] implementations.
    ///
    /// [`FunctionHandler`]: crate::functions::FunctionHandler
    pub fn function_argument_list(
        &mut self,
        min: usize,
        max: usize,
    ) -> Result<Vec<FunctionArg>, QueryError> {
        self.expect(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        if !self.is_next(TokenKind::CloseParen) {
            args.push(FunctionArg::Arithmetic(self.parse_function_argument()?));
            while self.consume_if(TokenKind::Comma) {
                args.push(FunctionArg::Arithmetic(self.parse_function_argument()?));
            }
        }
        if args.len() < min || args.len() > max {
            return Err(self.syntax_error(&if min == max {
                format!("{min} function arguments")
            } else {
                format!("between {min} and {max} function arguments")
            }));
        }
        self.expect(TokenKind::CloseParen)?;
        Ok(args)
    }

    // path expressions and semantic validation

    fn parse_path(&mut self) -> Result<PathExpression, QueryError> {
        let alias = self.expect(TokenKind::Identifier)?.value;
        self.expect(TokenKind::Dot)?;
        let mut fields = vec![self.expect(TokenKind::Identifier)?.value];
        while self.is_next(TokenKind::Dot) {
            self.expect(TokenKind::Dot)?;
            fields.push(self.expect(TokenKind::Identifier)?.value);
        }
        Ok(PathExpression { alias, fields })
    }

    /// Path that must end in a state field.
    fn path_expression(&mut self) -> Result<PathExpression, QueryError> {
        let path = self.parse_path()?;
        self.record_or_validate(&path)?;
        Ok(path)
    }

    /// Path that may end in a single-valued association, e.g. the subject
    /// of `IS NULL`.
    fn single_valued_path_expression(&mut self) -> Result<PathExpression, QueryError> {
        let path = self.parse_path()?;
        self.validate_path(&path.alias, &path.fields, true)?;
        Ok(path)
    }

    /// Arithmetic operands may also end in a single-valued association,
    /// which compares through the foreign key column. In the SELECT clause
    /// the path is deferred and must end in a state field.
    fn arithmetic_path_expression(&mut self) -> Result<PathExpression, QueryError> {
        let path = self.parse_path()?;
        if let Some(frame) = self.deferred.last_mut() {
            if frame.collecting {
                frame.pending.push(DeferredPath {
                    alias: path.alias.clone(),
                    fields: path.fields.clone(),
                });
                return Ok(path);
            }
        }
        self.validate_path(&path.alias, &path.fields, true)?;
        Ok(path)
    }

    fn record_or_validate(&mut self, path: &PathExpression) -> Result<(), QueryError> {
        if let Some(frame) = self.deferred.last_mut() {
            if frame.collecting {
                frame.pending.push(DeferredPath {
                    alias: path.alias.clone(),
                    fields: path.fields.clone(),
                });
                return Ok(());
            }
        }
        self.validate_path(&path.alias, &path.fields, false)
    }

    fn record_variable_reference(&mut self, alias: &str) -> Result<(), QueryError> {
        if let Some(frame) = self.deferred.last_mut() {
            if frame.collecting {
                frame.pending.push(DeferredPath {
                    alias: alias.to_string(),
                    fields: Vec::new(),
                });
                return Ok(());
            }
        }
        if !self.scopes.is_declared(alias) {
            return Err(SemanticalError::UndeclaredAlias {
                alias: alias.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Second pass over paths collected during the SELECT clause, once the
    /// FROM clause has populated the scope.
    fn resolve_deferred(&mut self) -> Result<(), QueryError> {
        let frame = match self.deferred.pop() {
            Some(frame) => frame,
            None => return Ok(()),
        };
        for pending in &frame.pending {
            if pending.fields.is_empty() {
                if !self.scopes.is_declared(&pending.alias) {
                    return Err(SemanticalError::UndeclaredAlias {
                        alias: pending.alias.clone(),
                    }
                    .into());
                }
            } else {
                self.validate_path(&pending.alias, &pending.fields, false)?;
            }
        }
        Ok(())
    }

    /// Validate a dotted path against the metadata. Intermediate parts must
    /// be single-valued associations; the final part must be a state field,
    /// or a single-valued association when `allow_association_terminal`.
    fn validate_path(
        &self,
        alias: &str,
        fields: &[String],
        allow_association_terminal: bool,
    ) -> Result<(), QueryError> {
        let component =
            self.scopes
                .resolve(alias)
                .ok_or_else(|| SemanticalError::UndeclaredAlias {
                    alias: alias.to_string(),
                })?;
        let mut current = Arc::clone(&component.entity);

        for (i, field) in fields.iter().enumerate() {
            let terminal = i + 1 == fields.len();
            if terminal {
                if current.has_field(field) {
                    return Ok(());
                }
                return Err(match current.association(field) {
                    Some(assoc) if allow_association_terminal && assoc.is_single_valued() => {
                        return Ok(())
                    }
                    Some(assoc) if assoc.is_collection_valued() && allow_association_terminal => {
                        SemanticalError::CollectionTraversal {
                            class: current.name.clone(),
                            field: field.clone(),
                        }
                    }
                    Some(_) => SemanticalError::NotAStateField {
                        class: current.name.clone(),
                        field: field.clone(),
                    },
                    None => SemanticalError::UnknownField {
                        class: current.name.clone(),
                        field: field.clone(),
                    },
                }
                .into());
            }

            match current.association(field) {
                Some(assoc) if assoc.is_single_valued() => {
                    current = self.registry.get(&assoc.target_entity).ok_or_else(|| {
                        SemanticalError::UnknownEntity {
                            name: assoc.target_entity.clone(),
                        }
                    })?;
                }
                Some(_) => {
                    return Err(SemanticalError::CollectionTraversal {
                        class: current.name.clone(),
                        field: field.clone(),
                    }
                    .into());
                }
                None => {
                    return Err(if current.has_field(field) {
                        SemanticalError::UnknownAssociation {
                            class: current.name.clone(),
                            field: field.clone(),
                        }
                    } else {
                        SemanticalError::UnknownField {
                            class: current.name.clone(),
                            field: field.clone(),
                        }
                    }
                    .into());
                }
            }
        }
        Ok(())
    }
}
