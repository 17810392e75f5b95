//! Token inventory for the query language.

/// Kinds of lexical tokens. Keywords are matched case-insensitively; the
/// token keeps the spelling as written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Identifier,
    IntegerLiteral,
    FloatLiteral,
    StringLiteral,
    InputParameter,

    // keywords
    Select,
    From,
    Where,
    Update,
    Set,
    Delete,
    Join,
    Left,
    Outer,
    Inner,
    Group,
    By,
    Having,
    Order,
    Asc,
    Desc,
    In,
    Between,
    Like,
    Escape,
    Null,
    Is,
    Not,
    And,
    Or,
    Exists,
    All,
    Any,
    Some,
    As,
    On,
    With,
    Distinct,
    Index,
    Avg,
    Count,
    Max,
    Min,
    Sum,

    // punctuation and operators
    Dot,
    Comma,
    OpenParen,
    CloseParen,
    Equal,
    NotEqual,
    LessThan,
    LessOrEqual,
    GreaterThan,
    GreaterOrEqual,
    Plus,
    Minus,
    Star,
    Slash,
}

impl TokenKind {
    /// Keyword lookup, case-insensitive.
    pub fn keyword(word: &str) -> Option<TokenKind> {
        let kind = match word.to_ascii_uppercase().as_str() {
            "SELECT" => TokenKind::Select,
            "FROM" => TokenKind::From,
            "WHERE" => TokenKind::Where,
            "UPDATE" => TokenKind::Update,
            "SET" => TokenKind::Set,
            "DELETE" => TokenKind::Delete,
            "JOIN" => TokenKind::Join,
            "LEFT" => TokenKind::Left,
            "OUTER" => TokenKind::Outer,
            "INNER" => TokenKind::Inner,
            "GROUP" => TokenKind::Group,
            "BY" => TokenKind::By,
            "HAVING" => TokenKind::Having,
            "ORDER" => TokenKind::Order,
            "ASC" => TokenKind::Asc,
            "DESC" => TokenKind::Desc,
            "IN" => TokenKind::In,
            "BETWEEN" => TokenKind::Between,
            "LIKE" => TokenKind::Like,
            "ESCAPE" => TokenKind::Escape,
            "NULL" => TokenKind::Null,
            "IS" => TokenKind::Is,
            "NOT" => TokenKind::Not,
            "AND" => TokenKind::And,
            "OR" => TokenKind::Or,
            "EXISTS" => TokenKind::Exists,
            "ALL" => TokenKind::All,
            "ANY" => TokenKind::Any,
            "SOME" => TokenKind::Some,
            "AS" => TokenKind::As,
            "ON" => TokenKind::On,
            "WITH" => TokenKind::With,
            "DISTINCT" => TokenKind::Distinct,
            "INDEX" => TokenKind::Index,
            "AVG" => TokenKind::Avg,
            "COUNT" => TokenKind::Count,
            "MAX" => TokenKind::Max,
            "MIN" => TokenKind::Min,
            "SUM" => TokenKind::Sum,
            _ => return None,
        };
        Some(kind)
    }

    pub fn is_aggregate(self) -> bool {
        matches!(
            self,
            TokenKind::Avg | TokenKind::Count | TokenKind::Max | TokenKind::Min | TokenKind::Sum
        )
    }

    pub fn is_comparison_operator(self) -> bool {
        matches!(
            self,
            TokenKind::Equal
                | TokenKind::NotEqual
                | TokenKind::LessThan
                | TokenKind::LessOrEqual
                | TokenKind::GreaterThan
                | TokenKind::GreaterOrEqual
        )
    }

    /// Human-readable name for error messages.
    pub fn describe(self) -> &'static str {
        match self {
            TokenKind::Identifier => "identifier",
            TokenKind::IntegerLiteral => "integer literal",
            TokenKind::FloatLiteral => "float literal",
            TokenKind::StringLiteral => "string literal",
            TokenKind::InputParameter => "input parameter",
            TokenKind::Select => "SELECT",
            TokenKind::From => "FROM",
            TokenKind::Where => "WHERE",
            TokenKind::Update => "UPDATE",
            TokenKind::Set => "SET",
            TokenKind::Delete => "DELETE",
            TokenKind::Join => "JOIN",
            TokenKind::Left => "LEFT",
            TokenKind::Outer => "OUTER",
            TokenKind::Inner => "INNER",
            TokenKind::Group => "GROUP",
            TokenKind::By => "BY",
            TokenKind::Having => "HAVING",
            TokenKind::Order => "ORDER",
            TokenKind::Asc => "ASC",
            TokenKind::Desc => "DESC",
            TokenKind::In => "IN",
            TokenKind::Between => "BETWEEN",
            TokenKind::Like => "LIKE",
            TokenKind::Escape => "ESCAPE",
            TokenKind::Null => "NULL",
            TokenKind::Is => "IS",
            TokenKind::Not => "NOT",
            TokenKind::And => "AND",
            TokenKind::Or => "OR",
            TokenKind::Exists => "EXISTS",
            TokenKind::All => "ALL",
            TokenKind::Any => "ANY",
            TokenKind::Some => "SOME",
            TokenKind::As => "AS",
            TokenKind::On => "ON",
            TokenKind::With => "WITH",
            TokenKind::Distinct => "DISTINCT",
            TokenKind::Index => "INDEX",
            TokenKind::Avg => "AVG",
            TokenKind::Count => "COUNT",
            TokenKind::Max => "MAX",
            TokenKind::Min => "MIN",
            TokenKind::Sum => "SUM",
            TokenKind::Dot => ".",
            TokenKind::Comma => ",",
            TokenKind::OpenParen => "(",
            TokenKind::CloseParen => ")",
            TokenKind::Equal => "=",
            TokenKind::NotEqual => "<>",
            TokenKind::LessThan => "<",
            TokenKind::LessOrEqual => "<=",
            TokenKind::GreaterThan => ">",
            TokenKind::GreaterOrEqual => ">=",
            TokenKind::Plus => "+",
            TokenKind::Minus => "-",
            TokenKind::Star => "*",
            TokenKind::Slash => "/",
        }
    }
}

/// A token with its source spelling and byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub value: String,
    pub position: usize,
}
