//! Abstract syntax tree for the query language.
//!
//! Nodes are plain data, immutable after parsing. Semantic resolution does
//! not annotate the tree; the SQL walker re-resolves path expressions
//! against the query components recorded per scope.

use crate::components::QueryComponent;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone)]
pub enum Statement {
    Select(SelectStatement),
    Update(UpdateStatement),
    Delete(DeleteStatement),
}

#[derive(Debug, Clone)]
pub struct SelectStatement {
    pub select: SelectClause,
    pub from: FromClause,
    pub where_clause: Option<ConditionalExpression>,
    pub group_by: Vec<PathExpression>,
    pub having: Option<ConditionalExpression>,
    pub order_by: Vec<OrderByItem>,
}

#[derive(Debug, Clone)]
pub struct SelectClause {
    pub distinct: bool,
    pub expressions: Vec<SelectExpression>,
}

#[derive(Debug, Clone)]
pub struct SelectExpression {
    pub item: SelectItem,
    pub alias: Option<String>,
}

#[derive(Debug, Clone)]
pub enum SelectItem {
    IdentificationVariable(String),
    Path(PathExpression),
    Aggregate(AggregateExpression),
    Function(FunctionExpression),
    Subselect(Box<Subselect>),
}

#[derive(Debug, Clone)]
pub struct FromClause {
    pub declarations: Vec<IdentificationVariableDeclaration>,
}

#[derive(Debug, Clone)]
pub struct IdentificationVariableDeclaration {
    pub range: RangeVariableDeclaration,
    pub index_by: Option<PathExpression>,
    pub joins: Vec<JoinVariableDeclaration>,
}

#[derive(Debug, Clone)]
pub struct RangeVariableDeclaration {
    pub entity: String,
    pub alias: String,
}

#[derive(Debug, Clone)]
pub struct JoinVariableDeclaration {
    pub join: Join,
    pub index_by: Option<PathExpression>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
    LeftOuter,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinConditionKind {
    On,
    With,
}

#[derive(Debug, Clone)]
pub struct Join {
    pub kind: JoinKind,
    pub parent_alias: String,
    pub association: String,
    pub alias: String,
    pub condition: Option<(JoinConditionKind, ConditionalExpression)>,
}

#[derive(Debug, Clone)]
pub struct OrderByItem {
    pub path: PathExpression,
    pub descending: bool,
}

// conditional expression tower: Or -> And -> Not -> primary

#[derive(Debug, Clone)]
pub struct ConditionalExpression {
    /// OR-joined terms.
    pub terms: Vec<ConditionalTerm>,
}

#[derive(Debug, Clone)]
pub struct ConditionalTerm {
    /// AND-joined factors.
    pub factors: Vec<ConditionalFactor>,
}

#[derive(Debug, Clone)]
pub struct ConditionalFactor {
    pub not: bool,
    pub primary: ConditionalPrimary,
}

#[derive(Debug, Clone)]
pub enum ConditionalPrimary {
    Simple(Box<SimpleConditional>),
    Nested(Box<ConditionalExpression>),
}

#[derive(Debug, Clone)]
pub enum SimpleConditional {
    Comparison(ComparisonExpression),
    Between(BetweenExpression),
    Like(LikeExpression),
    In(InExpression),
    NullComparison(NullComparisonExpression),
    Exists(ExistsExpression),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
}

impl ComparisonOperator {
    pub fn as_sql(self) -> &'static str {
        match self {
            ComparisonOperator::Equal => "=",
            ComparisonOperator::NotEqual => "<>",
            ComparisonOperator::LessThan => "<",
            ComparisonOperator::LessOrEqual => "<=",
            ComparisonOperator::GreaterThan => ">",
            ComparisonOperator::GreaterOrEqual => ">=",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ComparisonExpression {
    pub left: ArithmeticExpression,
    pub operator: ComparisonOperator,
    pub right: ComparisonOperand,
}

#[derive(Debug, Clone)]
pub enum ComparisonOperand {
    Arithmetic(ArithmeticExpression),
    Quantified(QuantifiedExpression),
}

#[derive(Debug, Clone)]
pub struct BetweenExpression {
    pub subject: ArithmeticExpression,
    pub not: bool,
    pub lower: ArithmeticExpression,
    pub upper: ArithmeticExpression,
}

#[derive(Debug, Clone)]
pub struct LikeExpression {
    pub subject: ArithmeticExpression,
    pub not: bool,
    pub pattern: LikePattern,
    pub escape: Option<String>,
}

#[derive(Debug, Clone)]
pub enum LikePattern {
    Literal(String),
    Parameter(InputParameter),
}

#[derive(Debug, Clone)]
pub struct InExpression {
    pub path: PathExpression,
    pub not: bool,
    pub values: InValues,
}

#[derive(Debug, Clone)]
pub enum InValues {
    Literals(Vec<InLiteral>),
    Subselect(Box<Subselect>),
}

#[derive(Debug, Clone)]
pub enum InLiteral {
    Literal(Literal),
    Parameter(InputParameter),
}

#[derive(Debug, Clone)]
pub struct NullComparisonExpression {
    pub subject: NullSubject,
    pub not: bool,
}

#[derive(Debug, Clone)]
pub enum NullSubject {
    Path(PathExpression),
    Parameter(InputParameter),
}

#[derive(Debug, Clone)]
pub struct ExistsExpression {
    pub subselect: Box<Subselect>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantifier {
    All,
    Any,
    Some,
}

#[derive(Debug, Clone)]
pub struct QuantifiedExpression {
    pub quantifier: Quantifier,
    pub subselect: Box<Subselect>,
}

// arithmetic tower: additive -> multiplicative -> factor -> primary

#[derive(Debug, Clone)]
pub enum ArithmeticExpression {
    Simple(SimpleArithmeticExpression),
    Subselect(Box<Subselect>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdditiveOperator {
    Add,
    Subtract,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MultiplicativeOperator {
    Multiply,
    Divide,
}

#[derive(Debug, Clone)]
pub struct SimpleArithmeticExpression {
    pub first: ArithmeticTerm,
    pub rest: Vec<(AdditiveOperator, ArithmeticTerm)>,
}

#[derive(Debug, Clone)]
pub struct ArithmeticTerm {
    pub first: ArithmeticFactor,
    pub rest: Vec<(MultiplicativeOperator, ArithmeticFactor)>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sign {
    Plus,
    Minus,
}

#[derive(Debug, Clone)]
pub struct ArithmeticFactor {
    pub sign: Option<Sign>,
    pub primary: ArithmeticPrimary,
}

#[derive(Debug, Clone)]
pub enum ArithmeticPrimary {
    Path(PathExpression),
    Literal(Literal),
    Parameter(InputParameter),
    Parenthesized(Box<SimpleArithmeticExpression>),
    Function(FunctionExpression),
    Aggregate(Box<AggregateExpression>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Str(String),
    Int(i64),
    Float(f64),
}

/// A positional (`?1`) or named (`:name`) input parameter.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InputParameter {
    Positional(u32),
    Named(String),
}

impl std::fmt::Display for InputParameter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            InputParameter::Positional(n) => write!(f, "?{n}"),
            InputParameter::Named(name) => write!(f, ":{name}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    Avg,
    Count,
    Max,
    Min,
    Sum,
}

impl AggregateFunction {
    pub fn as_sql(self) -> &'static str {
        match self {
            AggregateFunction::Avg => "AVG",
            AggregateFunction::Count => "COUNT",
            AggregateFunction::Max => "MAX",
            AggregateFunction::Min => "MIN",
            AggregateFunction::Sum => "SUM",
        }
    }
}

#[derive(Debug, Clone)]
pub struct AggregateExpression {
    pub function: AggregateFunction,
    pub distinct: bool,
    pub operand: AggregateOperand,
}

#[derive(Debug, Clone)]
pub enum AggregateOperand {
    Path(PathExpression),
    IdentificationVariable(String),
}

/// Return type family of a registered function; used by callers that need
/// to know the shape of the resulting scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionReturnType {
    String,
    Numeric,
    Datetime,
}

#[derive(Debug, Clone)]
pub struct FunctionExpression {
    /// Lowercased function name as registered.
    pub name: String,
    pub return_type: FunctionReturnType,
    pub args: Vec<FunctionArg>,
}

#[derive(Debug, Clone)]
pub enum FunctionArg {
    Arithmetic(SimpleArithmeticExpression),
    /// A bare keyword argument such as a TRIM mode.
    Keyword(String),
}

/// Dotted path rooted at an identification variable, e.g. `u.address.zip`.
/// Intermediate parts must be single-valued associations; the final part's
/// kind (state field vs association) is re-derived from metadata wherever
/// the path is consumed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathExpression {
    pub alias: String,
    pub fields: Vec<String>,
}

impl std::fmt::Display for PathExpression {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.alias)?;
        for field in &self.fields {
            write!(f, ".{field}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Subselect {
    pub select: SimpleSelectClause,
    pub from: FromClause,
    pub where_clause: Option<ConditionalExpression>,
    pub group_by: Vec<PathExpression>,
    pub having: Option<ConditionalExpression>,
    /// Query components declared in this subselect's scope, captured at
    /// parse time for the SQL walker.
    pub components: IndexMap<String, QueryComponent>,
}

#[derive(Debug, Clone)]
pub struct SimpleSelectClause {
    pub distinct: bool,
    pub expression: SelectExpression,
}

#[derive(Debug, Clone)]
pub struct UpdateStatement {
    pub entity: String,
    pub alias: String,
    pub items: Vec<UpdateItem>,
    pub where_clause: Option<ConditionalExpression>,
}

#[derive(Debug, Clone)]
pub struct UpdateItem {
    pub path: PathExpression,
    pub value: NewValue,
}

#[derive(Debug, Clone)]
pub enum NewValue {
    Null,
    Parameter(InputParameter),
    Arithmetic(SimpleArithmeticExpression),
}

#[derive(Debug, Clone)]
pub struct DeleteStatement {
    pub entity: String,
    pub alias: String,
    pub where_clause: Option<ConditionalExpression>,
}
