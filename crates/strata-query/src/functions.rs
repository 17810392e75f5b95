//! Extensible query-language functions.
//!
//! Each function is a [`FunctionHandler`]: it parses its own argument list
//! and emits its own SQL. The built-in set covers the string, numeric and
//! datetime families; applications register additional handlers on the
//! [`ParserConfig`] before parsing. There is no global mutable registry.

use crate::ast::{
    ArithmeticFactor, ArithmeticPrimary, ArithmeticTerm, FunctionArg, FunctionReturnType,
    Literal, SimpleArithmeticExpression,
};
use crate::error::QueryError;
use crate::parser::Parser;
use crate::token::TokenKind;
use crate::walker::{DefaultDialect, SqlDialect, SqlWalker};
use once_cell::sync::Lazy;
use std::collections::HashMap;
use std::sync::Arc;

/// One query-language function. Handlers own both ends of the pipeline:
/// argument parsing inside `name(...)` and SQL emission.
pub trait FunctionHandler: Send + Sync {
    fn name(&self) -> &str;

    fn return_type(&self) -> FunctionReturnType;

    /// Parse the argument list. Called with the lookahead on the opening
    /// parenthesis; must consume through the closing parenthesis.
    fn parse_args(&self, parser: &mut Parser<'_>) -> Result<Vec<FunctionArg>, QueryError>;

    /// Emit SQL for the parsed arguments.
    fn emit(&self, args: &[FunctionArg], walker: &mut SqlWalker<'_>) -> Result<String, QueryError>;
}

/// Fixed-name function with a bounded number of comma-separated arithmetic
/// arguments, emitted verbatim as `SQL_NAME(a, b, ...)`.
pub struct SimpleFunction {
    name: &'static str,
    sql_name: &'static str,
    return_type: FunctionReturnType,
    min_args: usize,
    max_args: usize,
}

impl SimpleFunction {
    pub fn new(
        name: &'static str,
        sql_name: &'static str,
        return_type: FunctionReturnType,
        min_args: usize,
        max_args: usize,
    ) -> Self {
        SimpleFunction {
            name,
            sql_name,
            return_type,
            min_args,
            max_args,
        }
    }
}

impl FunctionHandler for SimpleFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn return_type(&self) -> FunctionReturnType {
        self.return_type
    }

    fn parse_args(&self, parser: &mut Parser<'_>) -> Result<Vec<FunctionArg>, QueryError> {
        parser.function_argument_list(self.min_args, self.max_args)
    }

    fn emit(&self, args: &[FunctionArg], walker: &mut SqlWalker<'_>) -> Result<String, QueryError> {
        let mut parts = Vec::with_capacity(args.len());
        for arg in args {
            match arg {
                FunctionArg::Arithmetic(expr) => parts.push(walker.walk_simple_arithmetic(expr)?),
                FunctionArg::Keyword(word) => parts.push(word.clone()),
            }
        }
        Ok(format!("{}({})", self.sql_name, parts.join(", ")))
    }
}

/// Zero-argument function written `name()` in the query and emitted as a
/// bare SQL keyword such as `CURRENT_DATE`.
pub struct NiladicFunction {
    name: &'static str,
    sql_name: &'static str,
    return_type: FunctionReturnType,
}

impl NiladicFunction {
    pub fn new(name: &'static str, sql_name: &'static str, return_type: FunctionReturnType) -> Self {
        NiladicFunction {
            name,
            sql_name,
            return_type,
        }
    }
}

impl FunctionHandler for NiladicFunction {
    fn name(&self) -> &str {
        self.name
    }

    fn return_type(&self) -> FunctionReturnType {
        self.return_type
    }

    fn parse_args(&self, parser: &mut Parser<'_>) -> Result<Vec<FunctionArg>, QueryError> {
        parser.expect(TokenKind::OpenParen)?;
        parser.expect(TokenKind::CloseParen)?;
        Ok(Vec::new())
    }

    fn emit(&self, _args: &[FunctionArg], _walker: &mut SqlWalker<'_>) -> Result<String, QueryError> {
        Ok(self.sql_name.to_string())
    }
}

/// `trim([[LEADING | TRAILING | BOTH] [pad] FROM] subject)`.
///
/// Arguments are encoded as an optional `Keyword` trim mode, an optional
/// pad-character literal, and the subject expression last.
pub struct TrimFunction;

const TRIM_MODES: [&str; 3] = ["LEADING", "TRAILING", "BOTH"];

impl FunctionHandler for TrimFunction {
    fn name(&self) -> &str {
        "trim"
    }

    fn return_type(&self) -> FunctionReturnType {
        FunctionReturnType::String
    }

    fn parse_args(&self, parser: &mut Parser<'_>) -> Result<Vec<FunctionArg>, QueryError> {
        parser.expect(TokenKind::OpenParen)?;
        let mut args = Vec::new();
        let mut saw_spec = false;

        for mode in TRIM_MODES {
            if parser.consume_identifier_if(mode) {
                args.push(FunctionArg::Keyword(mode.to_string()));
                saw_spec = true;
                break;
            }
        }

        // a pad character before FROM
        if parser.is_next(TokenKind::StringLiteral) && parser.glimpse_is(TokenKind::From) {
            let pad = parser.expect(TokenKind::StringLiteral)?;
            args.push(FunctionArg::Arithmetic(literal_expression(Literal::Str(
                pad.value,
            ))));
            saw_spec = true;
        }

        if saw_spec {
            parser.expect(TokenKind::From)?;
        } else if parser.is_next(TokenKind::From) {
            parser.expect(TokenKind::From)?;
        }

        args.push(FunctionArg::Arithmetic(parser.parse_function_argument()?));
        parser.expect(TokenKind::CloseParen)?;
        Ok(args)
    }

    fn emit(&self, args: &[FunctionArg], walker: &mut SqlWalker<'_>) -> Result<String, QueryError> {
        let mut spec = String::new();
        let mut rest = args;

        if let Some(FunctionArg::Keyword(mode)) = rest.first() {
            spec.push_str(mode);
            rest = &rest[1..];
        }
        // everything but the last remaining argument is the pad character
        while rest.len() > 1 {
            if !spec.is_empty() {
                spec.push(' ');
            }
            if let FunctionArg::Arithmetic(pad) = &rest[0] {
                spec.push_str(&walker.walk_simple_arithmetic(pad)?);
            }
            rest = &rest[1..];
        }

        let subject = match rest.first() {
            Some(FunctionArg::Arithmetic(expr)) => walker.walk_simple_arithmetic(expr)?,
            _ => String::new(),
        };

        if spec.is_empty() {
            Ok(format!("TRIM({subject})"))
        } else {
            Ok(format!("TRIM({spec} FROM {subject})"))
        }
    }
}

fn literal_expression(literal: Literal) -> SimpleArithmeticExpression {
    SimpleArithmeticExpression {
        first: ArithmeticTerm {
            first: ArithmeticFactor {
                sign: None,
                primary: ArithmeticPrimary::Literal(literal),
            },
            rest: Vec::new(),
        },
        rest: Vec::new(),
    }
}

static BUILTINS: Lazy<Vec<Arc<dyn FunctionHandler>>> = Lazy::new(|| {
    use FunctionReturnType::{Datetime, Numeric, String as Str};
    vec![
        // string functions
        Arc::new(SimpleFunction::new("concat", "CONCAT", Str, 2, 2)),
        Arc::new(SimpleFunction::new("substring", "SUBSTRING", Str, 3, 3)),
        Arc::new(TrimFunction),
        Arc::new(SimpleFunction::new("lower", "LOWER", Str, 1, 1)),
        Arc::new(SimpleFunction::new("upper", "UPPER", Str, 1, 1)),
        // numeric functions
        Arc::new(SimpleFunction::new("length", "LENGTH", Numeric, 1, 1)),
        Arc::new(SimpleFunction::new("locate", "LOCATE", Numeric, 2, 3)),
        Arc::new(SimpleFunction::new("abs", "ABS", Numeric, 1, 1)),
        Arc::new(SimpleFunction::new("sqrt", "SQRT", Numeric, 1, 1)),
        Arc::new(SimpleFunction::new("mod", "MOD", Numeric, 2, 2)),
        // datetime functions
        Arc::new(NiladicFunction::new("current_date", "CURRENT_DATE", Datetime)),
        Arc::new(NiladicFunction::new("current_time", "CURRENT_TIME", Datetime)),
        Arc::new(NiladicFunction::new(
            "current_timestamp",
            "CURRENT_TIMESTAMP",
            Datetime,
        )),
    ]
});

/// Lookup table of function handlers, keyed by lowercase name.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    handlers: HashMap<String, Arc<dyn FunctionHandler>>,
}

impl FunctionRegistry {
    /// Empty registry; no functions parse.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with the built-in function set.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        for handler in BUILTINS.iter() {
            registry.handlers
                .insert(handler.name().to_string(), Arc::clone(handler));
        }
        registry
    }

    pub fn register(&mut self, handler: Arc<dyn FunctionHandler>) {
        self.handlers
            .insert(handler.name().to_ascii_lowercase(), handler);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn FunctionHandler>> {
        self.handlers.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(&name.to_ascii_lowercase())
    }
}

impl std::fmt::Debug for FunctionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.handlers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("FunctionRegistry")
            .field("functions", &names)
            .finish()
    }
}

/// Everything the parser needs besides the query text and the entity
/// metadata: the function set and the SQL dialect.
#[derive(Clone)]
pub struct ParserConfig {
    pub functions: FunctionRegistry,
    pub dialect: Arc<dyn SqlDialect>,
}

impl Default for ParserConfig {
    fn default() -> Self {
        ParserConfig {
            functions: FunctionRegistry::with_builtins(),
            dialect: Arc::new(DefaultDialect),
        }
    }
}

impl std::fmt::Debug for ParserConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParserConfig")
            .field("functions", &self.functions)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtins_cover_the_three_families() {
        let registry = FunctionRegistry::with_builtins();
        for name in ["concat", "substring", "trim", "lower", "upper"] {
            assert_eq!(
                registry.get(name).unwrap().return_type(),
                FunctionReturnType::String
            );
        }
        for name in ["length", "locate", "abs", "sqrt", "mod"] {
            assert_eq!(
                registry.get(name).unwrap().return_type(),
                FunctionReturnType::Numeric
            );
        }
        for name in ["current_date", "current_time", "current_timestamp"] {
            assert_eq!(
                registry.get(name).unwrap().return_type(),
                FunctionReturnType::Datetime
            );
        }
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let registry = FunctionRegistry::with_builtins();
        assert!(registry.contains("UPPER"));
        assert!(registry.contains("Trim"));
        assert!(!registry.contains("nope"));
    }

    #[test]
    fn empty_registry_has_nothing() {
        let registry = FunctionRegistry::new();
        assert!(!registry.contains("concat"));
    }
}
