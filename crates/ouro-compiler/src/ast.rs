//! Abstract syntax tree (spec section 3, "AST Node").
//!
//! One tree shape serves all three registers: a `@high` for-each loop and a
//! `@medium` C-style for loop both lower to `Stmt::ForEach`/`Stmt::For`
//! nodes built by different parser entry points. Every node carries the
//! `Span` of its first token, so later phases (emitter, diagnostics) never
//! need to re-derive position from children.

use ouro_core::Span;

#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Int(i64),
    Float(f64),
    Str(String),
    Bool(bool),
    Null,
    UnitNumber(f64, String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterTier {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub items: Vec<Item>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Item {
    Import { path: String, alias: Option<String>, span: Span },
    Export { item: Box<Item>, span: Span },
    Function(FunctionDecl),
    Class(ClassDecl),
    Struct(StructDecl),
    Enum(EnumDecl),
    Interface(InterfaceDecl),
    Namespace { name: String, items: Vec<Item>, span: Span },
    Statement(Stmt),
    AsmBlock { raw_text: String, origin_line: u32, span: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionDecl {
    pub name: String,
    pub params: Vec<Param>,
    pub body: Block,
    pub is_async: bool,
    pub is_public: bool,
    pub register: RegisterTier,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Param {
    pub name: String,
    pub type_name: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassDecl {
    pub name: String,
    pub parent: Option<String>,
    pub fields: Vec<FieldDecl>,
    pub methods: Vec<FunctionDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FieldDecl {
    pub name: String,
    pub type_name: Option<String>,
    pub is_mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterfaceDecl {
    pub name: String,
    pub method_names: Vec<String>,
    pub span: Span,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Let {
        name: String,
        is_mutable: bool,
        value: Expr,
        span: Span,
    },
    Assign {
        target: Expr,
        value: Expr,
        span: Span,
    },
    ExprStmt(Expr),
    If {
        cond: Expr,
        then_branch: Block,
        else_branch: Option<Block>,
        span: Span,
    },
    While {
        cond: Expr,
        body: Block,
        span: Span,
    },
    /// `@medium`/`@low` C-style counted loop, or the `@high` "repeat N times".
    For {
        var: String,
        from: Expr,
        through: Expr,
        step: Option<Expr>,
        body: Block,
        span: Span,
    },
    /// `@high` "for each x in xs" / `foreach`.
    ForEach {
        var: String,
        iterable: Expr,
        body: Block,
        span: Span,
    },
    Match {
        scrutinee: Expr,
        arms: Vec<MatchArm>,
        span: Span,
    },
    Return { value: Option<Expr>, span: Span },
    Break { span: Span },
    Continue { span: Span },
    Throw { value: Expr, span: Span },
    /// `print expr` (spec section 6, S1/S2) — the one built-in form of
    /// output this language has; there is no general native-call mechanism.
    Print { value: Expr, span: Span },
    Try {
        body: Block,
        catches: Vec<CatchClause>,
        finally: Option<Block>,
        span: Span,
    },
    Block { body: Block, span: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub struct CatchClause {
    pub exception_type: Option<String>,
    pub binding: Option<String>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: Pattern,
    pub guard: Option<Expr>,
    pub body: Block,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Pattern {
    Wildcard,
    Literal(Literal),
    Binding(String),
    EnumVariant { enum_name: Option<String>, variant: String },
    List(Vec<Pattern>),
}

#[derive(Debug, Clone, PartialEq)]
pub enum AggregateOp {
    Sum,
    Product,
    Min,
    Max,
    Average,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Eq,
    NotEq,
    Identical,
    NotIdentical,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    Shl,
    Shr,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnaryOp {
    Neg,
    Not,
    BitNot,
    AddressOf,
    Deref,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal { value: Literal, span: Span },
    Identifier { name: String, span: Span },
    GreekSymbol { name: String, span: Span },
    Binary {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Unary { op: UnaryOp, operand: Box<Expr>, span: Span },
    Call {
        callee: Box<Expr>,
        args: Vec<Expr>,
        span: Span,
    },
    FieldAccess { object: Box<Expr>, field: String, span: Span },
    Index { object: Box<Expr>, index: Box<Expr>, span: Span },
    ListLiteral { elements: Vec<Expr>, span: Span },
    MapLiteral { entries: Vec<(Expr, Expr)>, span: Span },
    StructLiteral {
        type_name: String,
        fields: Vec<(String, Expr)>,
        span: Span,
    },
    /// `sum of all x in xs` / `∑` notation.
    Aggregate {
        op: AggregateOp,
        var: String,
        iterable: Box<Expr>,
        body: Box<Expr>,
        span: Span,
    },
    /// A natural-language comparison phrase ("x is greater than y").
    NaturalComparison {
        op: BinaryOp,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
        span: Span,
    },
    Await { value: Box<Expr>, span: Span },
    Yield { value: Option<Box<Expr>>, span: Span },
    Lambda { params: Vec<Param>, body: Block, span: Span },
    InterpolatedString { segments: Vec<InterpSegment>, span: Span },
    /// Low-register raw memory dereference expressed as an expression
    /// (`*ptr`, `ptr->field`), distinct from the statement-level pointer
    /// assignment handled via `Stmt::Assign`.
    Deref { pointer: Box<Expr>, span: Span },
}

#[derive(Debug, Clone, PartialEq)]
pub enum InterpSegment {
    Literal(String),
    Expr(Expr),
}

impl Expr {
    pub fn span(&self) -> Span {
        match self {
            Expr::Literal { span, .. }
            | Expr::Identifier { span, .. }
            | Expr::GreekSymbol { span, .. }
            | Expr::Binary { span, .. }
            | Expr::Unary { span, .. }
            | Expr::Call { span, .. }
            | Expr::FieldAccess { span, .. }
            | Expr::Index { span, .. }
            | Expr::ListLiteral { span, .. }
            | Expr::MapLiteral { span, .. }
            | Expr::StructLiteral { span, .. }
            | Expr::Aggregate { span, .. }
            | Expr::NaturalComparison { span, .. }
            | Expr::Await { span, .. }
            | Expr::Yield { span, .. }
            | Expr::Lambda { span, .. }
            | Expr::InterpolatedString { span, .. }
            | Expr::Deref { span, .. } => *span,
        }
    }
}
