//! Token kinds produced by the lexer (spec section 3, "Token").
//!
//! Kinds are disjoint by construction — the lexer never has to choose
//! between two kinds for the same lexeme; each recognition rule commits to
//! exactly one kind before advancing.

use ouro_core::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Char(char),
    Bool(bool),
    Null,
    /// A numeric literal with a trailing unit suffix, e.g. `3.0 m/s`.
    UnitNumber(f64, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Register {
    High,
    Medium,
    Low,
    Asm,
}

impl Register {
    pub fn marker(self) -> &'static str {
        match self {
            Register::High => "@high",
            Register::Medium => "@medium",
            Register::Low => "@low",
            Register::Asm => "@asm",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Keyword {
    // Control
    If,
    Then,
    Else,
    End,
    While,
    For,
    Each,
    In,
    Iterate,
    From,
    Through,
    Step,
    Repeat,
    Times,
    Match,
    Return,
    Break,
    Continue,
    Throw,
    Try,
    Catch,
    Finally,
    Async,
    Await,
    Yield,
    Print,
    // Aggregation
    Sum,
    Product,
    Min,
    Max,
    Average,
    Of,
    All,
    // Declaration
    Let,
    Const,
    Var,
    Fn,
    Class,
    Struct,
    Enum,
    Interface,
    Namespace,
    Import,
    Export,
    Union,
    // Modifier / type
    Public,
    Private,
    Static,
    Mutable,
    Is,
    Greater,
    Less,
    Than,
    As,
    Where,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    // Arithmetic
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    StarStar,
    // Comparison
    EqEq,
    NotEq,
    Lt,
    Gt,
    Le,
    Ge,
    // Logical
    AndAnd,
    OrOr,
    Bang,
    // Bitwise
    Amp,
    Pipe,
    Caret,
    Tilde,
    Shl,
    Shr,
    // Assignment
    Assign,
    PlusAssign,
    MinusAssign,
    StarAssign,
    SlashAssign,
    AmpAssign,
    PipeAssign,
    CaretAssign,
    // Pointer (low register)
    Arrow,
    Ampersand,
    /// `=>`, used as the match-arm separator.
    FatArrow,
    // Triple-identity
    Identical,
    NotIdentical,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Punctuation {
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Comma,
    Semicolon,
    Colon,
    Dot,
    DotDot,
    Question,
    At,
}

/// A Greek letter or mathematical operator symbol (spec section 4.1).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MathSymbol {
    Sum,         // ∑
    Product,     // ∏
    Integral,    // ∫
    PartialDiff, // ∂
    Nabla,       // ∇
    Sqrt,        // √
    In,          // ∈
    NotIn,       // ∉
    Subset,      // ⊆
    Superset,    // ⊇
    Union,       // ∪
    Intersect,   // ∩
    Le,          // ≤
    Ge,          // ≥
    Ne,          // ≠
    And,         // ∧
    Or,          // ∨
    Not,         // ¬
    Infinity,    // ∞ (lexed as a float literal, kept here for completeness)
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Literal(Literal),
    Identifier(String),
    /// A single Greek-letter identifier, e.g. `λ`, `τ` (spec: kept as its
    /// own kind rather than plain `Identifier`).
    GreekSymbol(String),
    Keyword(Keyword),
    Operator(Operator),
    Punctuation(Punctuation),
    RegisterMarker(Register),
    MathSymbol(MathSymbol),
    /// A natural-language multi-word token recognised in `@high` register,
    /// e.g. "is greater than", "for each", "iterate", "repeat", "sum of all".
    NaturalPhrase(String),
    /// The raw text of an `@asm { ... }` block, plus the line it opened on.
    AsmBlock { raw_text: String, origin_line: u32 },
    /// A chunk of an interpolated string: literal text, or markers for the
    /// interpolation boundaries (spec section 4.1).
    InterpLiteral(String),
    InterpOpen,
    InterpClose,
    Eof,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub lexeme: String,
    pub span: Span,
}

impl Token {
    pub fn new(kind: TokenKind, lexeme: impl Into<String>, span: Span) -> Self {
        Token {
            kind,
            lexeme: lexeme.into(),
            span,
        }
    }
}
