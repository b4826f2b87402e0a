//! Recursive-descent parser (spec section 4.2).
//!
//! One grammar serves all three registers; `@low`/`@medium`/`@high` markers
//! only gate which surface forms are reachable (e.g. `Deref`/`AddressOf`
//! expressions only parse inside `@low`, natural-language comparisons only
//! inside `@high`) and record `RegisterTier` on each `FunctionDecl` so the
//! emitter can pick the right lowering strategy.

use ouro_core::Span;

use crate::ast::*;
use crate::token::{Keyword, Literal as TokLit, MathSymbol, Operator, Punctuation, Register, Token, TokenKind};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("parse error at {line}:{col}: {message}")]
pub struct ParseError {
    pub line: u32,
    pub col: u32,
    pub message: String,
}

pub struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
    register: RegisterTier,
    pub errors: Vec<ParseError>,
}

type PResult<T> = Result<T, ParseError>;

impl<'a> Parser<'a> {
    pub fn new(tokens: &'a [Token]) -> Self {
        Parser {
            tokens,
            pos: 0,
            register: RegisterTier::Medium,
            errors: Vec::new(),
        }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> &TokenKind {
        &self.peek().kind
    }

    fn at_eof(&self) -> bool {
        matches!(self.peek().kind, TokenKind::Eof)
    }

    fn advance(&mut self) -> Token {
        let tok = self.peek().clone();
        if !self.at_eof() {
            self.pos += 1;
        }
        tok
    }

    fn check_kw(&self, kw: &Keyword) -> bool {
        matches!(self.peek_kind(), TokenKind::Keyword(k) if k == kw)
    }

    fn check_punct(&self, p: &Punctuation) -> bool {
        matches!(self.peek_kind(), TokenKind::Punctuation(x) if x == p)
    }

    fn check_op(&self, op: &Operator) -> bool {
        matches!(self.peek_kind(), TokenKind::Operator(x) if x == op)
    }

    fn eat_kw(&mut self, kw: &Keyword) -> bool {
        if self.check_kw(kw) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_punct(&mut self, p: &Punctuation) -> bool {
        if self.check_punct(p) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn eat_op(&mut self, op: &Operator) -> bool {
        if self.check_op(op) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn expect_punct(&mut self, p: Punctuation) -> PResult<()> {
        if self.eat_punct(&p) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", p, self.peek_kind())))
        }
    }

    fn expect_kw(&mut self, kw: Keyword) -> PResult<()> {
        if self.eat_kw(&kw) {
            Ok(())
        } else {
            Err(self.error(format!("expected {:?}, found {:?}", kw, self.peek_kind())))
        }
    }

    fn error(&self, message: impl Into<String>) -> ParseError {
        let span = self.peek().span;
        ParseError {
            line: span.line + 1,
            col: span.col + 1,
            message: message.into(),
        }
    }

    /// Skip to the next statement boundary after a parse error (panic-mode
    /// recovery, spec section 4.2 "Error recovery").
    fn synchronize(&mut self) {
        while !self.at_eof() {
            if self.check_punct(&Punctuation::Semicolon) {
                self.advance();
                return;
            }
            if matches!(
                self.peek_kind(),
                TokenKind::Keyword(Keyword::Let)
                    | TokenKind::Keyword(Keyword::Fn)
                    | TokenKind::Keyword(Keyword::If)
                    | TokenKind::Keyword(Keyword::While)
                    | TokenKind::Keyword(Keyword::For)
                    | TokenKind::Keyword(Keyword::Return)
                    | TokenKind::Keyword(Keyword::Class)
                    | TokenKind::RegisterMarker(_)
            ) {
                return;
            }
            self.advance();
        }
    }

    fn expect_ident(&mut self) -> PResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            _ => Err(self.error("expected identifier")),
        }
    }

    pub fn parse_program(&mut self) -> Program {
        let mut items = Vec::new();
        while !self.at_eof() {
            match self.parse_item() {
                Ok(item) => items.push(item),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        Program { items }
    }

    fn parse_item(&mut self) -> PResult<Item> {
        if let TokenKind::RegisterMarker(reg) = self.peek_kind().clone() {
            self.advance();
            self.register = match reg {
                Register::High => RegisterTier::High,
                Register::Medium => RegisterTier::Medium,
                Register::Low => RegisterTier::Low,
                Register::Asm => RegisterTier::Low,
            };
            return self.parse_item();
        }
        if let TokenKind::AsmBlock { raw_text, origin_line } = self.peek_kind().clone() {
            let span = self.peek().span;
            self.advance();
            return Ok(Item::AsmBlock { raw_text, origin_line, span });
        }
        if self.eat_kw(&Keyword::Import) {
            let span = self.prev_span();
            let path = self.expect_string_like()?;
            let alias = if self.eat_kw(&Keyword::As) { Some(self.expect_ident()?) } else { None };
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Item::Import { path, alias, span });
        }
        if self.eat_kw(&Keyword::Export) {
            let span = self.prev_span();
            let inner = self.parse_item()?;
            return Ok(Item::Export { item: Box::new(inner), span });
        }
        if self.eat_kw(&Keyword::Namespace) {
            let span = self.prev_span();
            let name = self.expect_ident()?;
            self.expect_punct(Punctuation::LBrace)?;
            let mut items = Vec::new();
            while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
                items.push(self.parse_item()?);
            }
            self.expect_punct(Punctuation::RBrace)?;
            return Ok(Item::Namespace { name, items, span });
        }
        if self.check_kw(&Keyword::Public) || self.check_kw(&Keyword::Private) {
            self.advance();
        }
        if self.check_kw(&Keyword::Fn) || self.check_kw(&Keyword::Async) {
            return Ok(Item::Function(self.parse_function()?));
        }
        if self.check_kw(&Keyword::Class) {
            return Ok(Item::Class(self.parse_class()?));
        }
        if self.check_kw(&Keyword::Struct) {
            return Ok(Item::Struct(self.parse_struct()?));
        }
        if self.check_kw(&Keyword::Enum) {
            return Ok(Item::Enum(self.parse_enum()?));
        }
        if self.check_kw(&Keyword::Interface) {
            return Ok(Item::Interface(self.parse_interface()?));
        }
        Ok(Item::Statement(self.parse_stmt()?))
    }

    fn expect_string_like(&mut self) -> PResult<String> {
        match self.peek_kind().clone() {
            TokenKind::Literal(TokLit::Str(s)) => {
                self.advance();
                Ok(s)
            }
            _ => Err(self.error("expected string literal")),
        }
    }

    fn prev_span(&self) -> Span {
        self.tokens[self.pos.saturating_sub(1).min(self.tokens.len() - 1)].span
    }

    fn parse_function(&mut self) -> PResult<FunctionDecl> {
        let span = self.peek().span;
        let is_async = self.eat_kw(&Keyword::Async);
        self.expect_kw(Keyword::Fn)?;
        let name = self.expect_ident()?;
        self.expect_punct(Punctuation::LParen)?;
        let mut params = Vec::new();
        while !self.check_punct(&Punctuation::RParen) {
            let pspan = self.peek().span;
            let pname = self.expect_ident()?;
            let type_name = if self.eat_punct(&Punctuation::Colon) {
                Some(self.expect_ident()?)
            } else {
                None
            };
            params.push(Param { name: pname, type_name, span: pspan });
            if !self.eat_punct(&Punctuation::Comma) {
                break;
            }
        }
        self.expect_punct(Punctuation::RParen)?;
        if self.eat_op(&Operator::Arrow) {
            let _ = self.expect_ident()?;
        }
        let body = self.parse_block()?;
        Ok(FunctionDecl {
            name,
            params,
            body,
            is_async,
            is_public: true,
            register: self.register,
            span,
        })
    }

    fn parse_class(&mut self) -> PResult<ClassDecl> {
        let span = self.peek().span;
        self.expect_kw(Keyword::Class)?;
        let name = self.expect_ident()?;
        let parent = if self.eat_punct(&Punctuation::Colon) { Some(self.expect_ident()?) } else { None };
        self.expect_punct(Punctuation::LBrace)?;
        let mut fields = Vec::new();
        let mut methods = Vec::new();
        while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
            if self.check_kw(&Keyword::Public) || self.check_kw(&Keyword::Private) || self.check_kw(&Keyword::Static) {
                self.advance();
            }
            if self.check_kw(&Keyword::Fn) || self.check_kw(&Keyword::Async) {
                methods.push(self.parse_function()?);
            } else {
                fields.push(self.parse_field()?);
            }
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(ClassDecl { name, parent, fields, methods, span })
    }

    fn parse_field(&mut self) -> PResult<FieldDecl> {
        let span = self.peek().span;
        let is_mutable = self.eat_kw(&Keyword::Mutable) || self.eat_kw(&Keyword::Var);
        if !is_mutable {
            self.eat_kw(&Keyword::Let);
            self.eat_kw(&Keyword::Const);
        }
        let name = self.expect_ident()?;
        let type_name = if self.eat_punct(&Punctuation::Colon) { Some(self.expect_ident()?) } else { None };
        self.eat_punct(&Punctuation::Semicolon);
        Ok(FieldDecl { name, type_name, is_mutable, span })
    }

    fn parse_struct(&mut self) -> PResult<StructDecl> {
        let span = self.peek().span;
        self.expect_kw(Keyword::Struct)?;
        let name = self.expect_ident()?;
        self.expect_punct(Punctuation::LBrace)?;
        let mut fields = Vec::new();
        while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
            fields.push(self.parse_field()?);
            self.eat_punct(&Punctuation::Comma);
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(StructDecl { name, fields, span })
    }

    fn parse_enum(&mut self) -> PResult<EnumDecl> {
        let span = self.peek().span;
        self.expect_kw(Keyword::Enum)?;
        let name = self.expect_ident()?;
        self.expect_punct(Punctuation::LBrace)?;
        let mut variants = Vec::new();
        while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
            variants.push(self.expect_ident()?);
            if !self.eat_punct(&Punctuation::Comma) {
                break;
            }
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(EnumDecl { name, variants, span })
    }

    fn parse_interface(&mut self) -> PResult<InterfaceDecl> {
        let span = self.peek().span;
        self.expect_kw(Keyword::Interface)?;
        let name = self.expect_ident()?;
        self.expect_punct(Punctuation::LBrace)?;
        let mut method_names = Vec::new();
        while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
            self.eat_kw(&Keyword::Fn);
            method_names.push(self.expect_ident()?);
            if self.eat_punct(&Punctuation::LParen) {
                while !self.eat_punct(&Punctuation::RParen) && !self.at_eof() {
                    self.advance();
                }
            }
            self.eat_punct(&Punctuation::Semicolon);
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(InterfaceDecl { name, method_names, span })
    }

    fn parse_block(&mut self) -> PResult<Block> {
        self.expect_punct(Punctuation::LBrace)?;
        let mut stmts = Vec::new();
        while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        self.expect_punct(Punctuation::RBrace)?;
        Ok(stmts)
    }

    /// `@high` blocks may end a loop/conditional with `end`/`end for`/`end if`
    /// instead of braces; both forms parse to the same `Block`.
    fn parse_block_or_end(&mut self) -> PResult<Block> {
        if self.check_punct(&Punctuation::LBrace) {
            return self.parse_block();
        }
        let mut stmts = Vec::new();
        while !self.check_kw(&Keyword::End) && !self.check_kw(&Keyword::Else) && !self.at_eof() {
            match self.parse_stmt() {
                Ok(s) => stmts.push(s),
                Err(e) => {
                    self.errors.push(e);
                    self.synchronize();
                }
            }
        }
        if self.eat_kw(&Keyword::End) {
            // Consume an optional trailing keyword, e.g. `end if`, `end for`.
            if matches!(
                self.peek_kind(),
                TokenKind::Keyword(Keyword::If)
                    | TokenKind::Keyword(Keyword::For)
                    | TokenKind::Keyword(Keyword::While)
                    | TokenKind::Keyword(Keyword::Each)
            ) {
                self.advance();
            }
        }
        Ok(stmts)
    }

    fn parse_stmt(&mut self) -> PResult<Stmt> {
        if let TokenKind::RegisterMarker(reg) = self.peek_kind().clone() {
            self.advance();
            self.register = match reg {
                Register::High => RegisterTier::High,
                Register::Medium => RegisterTier::Medium,
                Register::Low => RegisterTier::Low,
                Register::Asm => RegisterTier::Low,
            };
            return self.parse_stmt();
        }
        let span = self.peek().span;
        if self.check_kw(&Keyword::Let) || self.check_kw(&Keyword::Const) || self.check_kw(&Keyword::Var) {
            let is_mutable = self.check_kw(&Keyword::Var) || self.check_kw(&Keyword::Mutable);
            self.advance();
            let name = self.expect_ident()?;
            if self.eat_punct(&Punctuation::Colon) {
                let _ = self.expect_ident()?;
            }
            self.expect_op(Operator::Assign)?;
            let value = self.parse_expr()?;
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Let { name, is_mutable, value, span });
        }
        if self.eat_kw(&Keyword::If) {
            let cond = self.parse_expr()?;
            self.eat_kw(&Keyword::Then);
            let then_branch = self.parse_block_or_end()?;
            let else_branch = if self.eat_kw(&Keyword::Else) {
                if self.check_kw(&Keyword::If) {
                    Some(vec![self.parse_stmt()?])
                } else {
                    Some(self.parse_block_or_end()?)
                }
            } else {
                None
            };
            return Ok(Stmt::If { cond, then_branch, else_branch, span });
        }
        if self.eat_kw(&Keyword::While) {
            let cond = self.parse_expr()?;
            let body = self.parse_block_or_end()?;
            return Ok(Stmt::While { cond, body, span });
        }
        if self.eat_kw(&Keyword::Repeat) {
            let count = self.parse_expr()?;
            self.eat_kw(&Keyword::Times);
            let body = self.parse_block_or_end()?;
            return Ok(Stmt::For {
                var: "__repeat_i".to_string(),
                from: Expr::Literal { value: Literal::Int(0), span },
                through: count,
                step: None,
                body,
                span,
            });
        }
        if self.eat_kw(&Keyword::For) || self.eat_kw(&Keyword::Iterate) {
            self.eat_kw(&Keyword::Each);
            let var = self.expect_ident()?;
            if self.eat_kw(&Keyword::In) {
                let iterable = self.parse_expr()?;
                let body = self.parse_block_or_end()?;
                return Ok(Stmt::ForEach { var, iterable, body, span });
            }
            self.expect_kw(Keyword::From)?;
            let from = self.parse_expr()?;
            self.expect_kw(Keyword::Through)?;
            let through = self.parse_expr()?;
            let step = if self.eat_kw(&Keyword::Step) { Some(self.parse_expr()?) } else { None };
            let body = self.parse_block_or_end()?;
            return Ok(Stmt::For { var, from, through, step, body, span });
        }
        if self.eat_kw(&Keyword::Match) {
            let scrutinee = self.parse_expr()?;
            self.expect_punct(Punctuation::LBrace)?;
            let mut arms = Vec::new();
            while !self.check_punct(&Punctuation::RBrace) && !self.at_eof() {
                arms.push(self.parse_match_arm()?);
            }
            self.expect_punct(Punctuation::RBrace)?;
            return Ok(Stmt::Match { scrutinee, arms, span });
        }
        if self.eat_kw(&Keyword::Return) {
            let value = if self.check_punct(&Punctuation::Semicolon) || self.check_punct(&Punctuation::RBrace) {
                None
            } else {
                Some(self.parse_expr()?)
            };
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Return { value, span });
        }
        if self.eat_kw(&Keyword::Break) {
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Break { span });
        }
        if self.eat_kw(&Keyword::Continue) {
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Continue { span });
        }
        if self.eat_kw(&Keyword::Throw) {
            let value = self.parse_expr()?;
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Throw { value, span });
        }
        if self.eat_kw(&Keyword::Print) {
            let value = self.parse_expr()?;
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Print { value, span });
        }
        if self.eat_kw(&Keyword::Try) {
            let body = self.parse_block()?;
            let mut catches = Vec::new();
            while self.eat_kw(&Keyword::Catch) {
                let cspan = self.prev_span();
                let (exception_type, binding) = if self.eat_punct(&Punctuation::LParen) {
                    let name = self.expect_ident()?;
                    let (ty, bind) = if self.eat_punct(&Punctuation::Colon) {
                        (Some(self.expect_ident()?), Some(name))
                    } else {
                        (None, Some(name))
                    };
                    self.expect_punct(Punctuation::RParen)?;
                    (ty, bind)
                } else {
                    (None, None)
                };
                let cbody = self.parse_block()?;
                catches.push(CatchClause { exception_type, binding, body: cbody, span: cspan });
            }
            let finally = if self.eat_kw(&Keyword::Finally) { Some(self.parse_block()?) } else { None };
            return Ok(Stmt::Try { body, catches, finally, span });
        }
        if self.check_punct(&Punctuation::LBrace) {
            let body = self.parse_block()?;
            return Ok(Stmt::Block { body, span });
        }
        let expr = self.parse_expr()?;
        if self.eat_op(&Operator::Assign) {
            let value = self.parse_expr()?;
            self.eat_punct(&Punctuation::Semicolon);
            return Ok(Stmt::Assign { target: expr, value, span });
        }
        for (op, compound) in [
            (Operator::PlusAssign, BinaryOp::Add),
            (Operator::MinusAssign, BinaryOp::Sub),
            (Operator::StarAssign, BinaryOp::Mul),
            (Operator::SlashAssign, BinaryOp::Div),
            (Operator::AmpAssign, BinaryOp::BitAnd),
            (Operator::PipeAssign, BinaryOp::BitOr),
            (Operator::CaretAssign, BinaryOp::BitXor),
        ] {
            if self.eat_op(&op) {
                let rhs = self.parse_expr()?;
                let value = Expr::Binary {
                    op: compound,
                    lhs: Box::new(expr.clone()),
                    rhs: Box::new(rhs),
                    span,
                };
                self.eat_punct(&Punctuation::Semicolon);
                return Ok(Stmt::Assign { target: expr, value, span });
            }
        }
        self.eat_punct(&Punctuation::Semicolon);
        Ok(Stmt::ExprStmt(expr))
    }

    fn expect_op(&mut self, op: Operator) -> PResult<()> {
        if self.eat_op(&op) {
            Ok(())
        } else {
            Err(self.error(format!("expected operator {:?}", op)))
        }
    }

    fn parse_match_arm(&mut self) -> PResult<MatchArm> {
        let span = self.peek().span;
        let pattern = self.parse_pattern()?;
        let guard = if self.eat_kw(&Keyword::If) { Some(self.parse_expr()?) } else { None };
        self.eat_op(&Operator::FatArrow);
        let body = if self.check_punct(&Punctuation::LBrace) {
            self.parse_block()?
        } else {
            let e = self.parse_expr()?;
            vec![Stmt::ExprStmt(e)]
        };
        self.eat_punct(&Punctuation::Comma);
        Ok(MatchArm { pattern, guard, body, span })
    }

    fn parse_pattern(&mut self) -> PResult<Pattern> {
        if let TokenKind::Identifier(name) = self.peek_kind().clone() {
            if name == "_" {
                self.advance();
                return Ok(Pattern::Wildcard);
            }
            self.advance();
            if self.eat_punct(&Punctuation::Dot) {
                let variant = self.expect_ident()?;
                return Ok(Pattern::EnumVariant { enum_name: Some(name), variant });
            }
            return Ok(Pattern::Binding(name));
        }
        if self.check_punct(&Punctuation::LBracket) {
            self.advance();
            let mut elems = Vec::new();
            while !self.check_punct(&Punctuation::RBracket) {
                elems.push(self.parse_pattern()?);
                if !self.eat_punct(&Punctuation::Comma) {
                    break;
                }
            }
            self.expect_punct(Punctuation::RBracket)?;
            return Ok(Pattern::List(elems));
        }
        let lit = self.parse_literal_token()?;
        Ok(Pattern::Literal(lit))
    }

    fn parse_literal_token(&mut self) -> PResult<Literal> {
        match self.peek_kind().clone() {
            TokenKind::Literal(TokLit::Int(n)) => {
                self.advance();
                Ok(Literal::Int(n))
            }
            TokenKind::Literal(TokLit::Float(n)) => {
                self.advance();
                Ok(Literal::Float(n))
            }
            TokenKind::Literal(TokLit::Str(s)) => {
                self.advance();
                Ok(Literal::Str(s))
            }
            TokenKind::Literal(TokLit::Bool(b)) => {
                self.advance();
                Ok(Literal::Bool(b))
            }
            TokenKind::Literal(TokLit::Null) => {
                self.advance();
                Ok(Literal::Null)
            }
            _ => Err(self.error("expected a pattern")),
        }
    }

    // --- Expressions: precedence-climbing ---

    pub fn parse_expr(&mut self) -> PResult<Expr> {
        self.parse_or()
    }

    fn parse_or(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_and()?;
        loop {
            if self.eat_op(&Operator::OrOr) || self.eat_math(&MathSymbol::Or) {
                let span = lhs.span();
                let rhs = self.parse_and()?;
                lhs = Expr::Binary { op: BinaryOp::Or, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn eat_math(&mut self, sym: &MathSymbol) -> bool {
        if matches!(self.peek_kind(), TokenKind::MathSymbol(s) if s == sym) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn parse_and(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_equality()?;
        loop {
            if self.eat_op(&Operator::AndAnd) || self.eat_math(&MathSymbol::And) {
                let span = lhs.span();
                let rhs = self.parse_equality()?;
                lhs = Expr::Binary { op: BinaryOp::And, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
            } else {
                break;
            }
        }
        Ok(lhs)
    }

    fn parse_equality(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_comparison()?;
        loop {
            let op = if self.eat_op(&Operator::EqEq) {
                BinaryOp::Eq
            } else if self.eat_op(&Operator::NotEq) {
                BinaryOp::NotEq
            } else if self.eat_op(&Operator::Identical) {
                BinaryOp::Identical
            } else if self.eat_op(&Operator::NotIdentical) {
                BinaryOp::NotIdentical
            } else {
                break;
            };
            let span = lhs.span();
            let rhs = self.parse_comparison()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_comparison(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitor()?;
        loop {
            if let TokenKind::NaturalPhrase(phrase) = self.peek_kind().clone() {
                let op = match phrase.as_str() {
                    "is greater than" => Some(BinaryOp::Gt),
                    "is less than" => Some(BinaryOp::Lt),
                    _ => None,
                };
                if let Some(op) = op {
                    self.advance();
                    let span = lhs.span();
                    let rhs = self.parse_bitor()?;
                    lhs = Expr::NaturalComparison { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
                    continue;
                }
            }
            let op = if self.eat_op(&Operator::Lt) {
                BinaryOp::Lt
            } else if self.eat_op(&Operator::Gt) {
                BinaryOp::Gt
            } else if self.eat_op(&Operator::Le) || self.eat_math(&MathSymbol::Le) {
                BinaryOp::Le
            } else if self.eat_op(&Operator::Ge) || self.eat_math(&MathSymbol::Ge) {
                BinaryOp::Ge
            } else {
                break;
            };
            let span = lhs.span();
            let rhs = self.parse_bitor()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bitor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitxor()?;
        while self.eat_op(&Operator::Pipe) {
            let span = lhs.span();
            let rhs = self.parse_bitxor()?;
            lhs = Expr::Binary { op: BinaryOp::BitOr, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bitxor(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_bitand()?;
        while self.eat_op(&Operator::Caret) {
            let span = lhs.span();
            let rhs = self.parse_bitand()?;
            lhs = Expr::Binary { op: BinaryOp::BitXor, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_bitand(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_shift()?;
        while self.eat_op(&Operator::Amp) {
            let span = lhs.span();
            let rhs = self.parse_shift()?;
            lhs = Expr::Binary { op: BinaryOp::BitAnd, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_shift(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_additive()?;
        loop {
            let op = if self.eat_op(&Operator::Shl) {
                BinaryOp::Shl
            } else if self.eat_op(&Operator::Shr) {
                BinaryOp::Shr
            } else {
                break;
            };
            let span = lhs.span();
            let rhs = self.parse_additive()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_additive(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_multiplicative()?;
        loop {
            let op = if self.eat_op(&Operator::Plus) {
                BinaryOp::Add
            } else if self.eat_op(&Operator::Minus) {
                BinaryOp::Sub
            } else {
                break;
            };
            let span = lhs.span();
            let rhs = self.parse_multiplicative()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_multiplicative(&mut self) -> PResult<Expr> {
        let mut lhs = self.parse_power()?;
        loop {
            let op = if self.eat_op(&Operator::Star) {
                BinaryOp::Mul
            } else if self.eat_op(&Operator::Slash) {
                BinaryOp::Div
            } else if self.eat_op(&Operator::Percent) {
                BinaryOp::Mod
            } else {
                break;
            };
            let span = lhs.span();
            let rhs = self.parse_power()?;
            lhs = Expr::Binary { op, lhs: Box::new(lhs), rhs: Box::new(rhs), span };
        }
        Ok(lhs)
    }

    fn parse_power(&mut self) -> PResult<Expr> {
        let lhs = self.parse_unary()?;
        if self.eat_op(&Operator::StarStar) {
            let span = lhs.span();
            let rhs = self.parse_power()?;
            return Ok(Expr::Binary { op: BinaryOp::Pow, lhs: Box::new(lhs), rhs: Box::new(rhs), span });
        }
        Ok(lhs)
    }

    fn parse_unary(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        if self.eat_op(&Operator::Minus) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Neg, operand: Box::new(operand), span });
        }
        if self.eat_op(&Operator::Bang) || self.eat_math(&MathSymbol::Not) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::Not, operand: Box::new(operand), span });
        }
        if self.eat_op(&Operator::Tilde) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::BitNot, operand: Box::new(operand), span });
        }
        if matches!(self.register, RegisterTier::Low) && self.eat_op(&Operator::Amp) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Unary { op: UnaryOp::AddressOf, operand: Box::new(operand), span });
        }
        if matches!(self.register, RegisterTier::Low) && self.eat_op(&Operator::Star) {
            let operand = self.parse_unary()?;
            return Ok(Expr::Deref { pointer: Box::new(operand), span });
        }
        if self.eat_kw(&Keyword::Await) {
            let value = self.parse_unary()?;
            return Ok(Expr::Await { value: Box::new(value), span });
        }
        if self.eat_kw(&Keyword::Yield) {
            let value = if self.check_punct(&Punctuation::Semicolon) {
                None
            } else {
                Some(Box::new(self.parse_unary()?))
            };
            return Ok(Expr::Yield { value, span });
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> PResult<Expr> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat_punct(&Punctuation::Dot) {
                let span = expr.span();
                let field = self.expect_ident()?;
                if self.check_punct(&Punctuation::LParen) {
                    let args = self.parse_args()?;
                    expr = Expr::Call {
                        callee: Box::new(Expr::FieldAccess { object: Box::new(expr), field, span }),
                        args,
                        span,
                    };
                } else {
                    expr = Expr::FieldAccess { object: Box::new(expr), field, span };
                }
            } else if self.check_op(&Operator::Arrow) && matches!(self.register, RegisterTier::Low) {
                self.advance();
                let span = expr.span();
                let field = self.expect_ident()?;
                expr = Expr::FieldAccess { object: Box::new(Expr::Deref { pointer: Box::new(expr), span }), field, span };
            } else if self.check_punct(&Punctuation::LParen) {
                let span = expr.span();
                let args = self.parse_args()?;
                expr = Expr::Call { callee: Box::new(expr), args, span };
            } else if self.eat_punct(&Punctuation::LBracket) {
                let span = expr.span();
                let index = self.parse_expr()?;
                self.expect_punct(Punctuation::RBracket)?;
                expr = Expr::Index { object: Box::new(expr), index: Box::new(index), span };
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_args(&mut self) -> PResult<Vec<Expr>> {
        self.expect_punct(Punctuation::LParen)?;
        let mut args = Vec::new();
        while !self.check_punct(&Punctuation::RParen) {
            args.push(self.parse_expr()?);
            if !self.eat_punct(&Punctuation::Comma) {
                break;
            }
        }
        self.expect_punct(Punctuation::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        match self.peek_kind().clone() {
            TokenKind::Literal(TokLit::Int(n)) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Int(n), span })
            }
            TokenKind::Literal(TokLit::Float(n)) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Float(n), span })
            }
            TokenKind::Literal(TokLit::Str(s)) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Str(s), span })
            }
            TokenKind::Literal(TokLit::Bool(b)) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Bool(b), span })
            }
            TokenKind::Literal(TokLit::Null) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::Null, span })
            }
            TokenKind::Literal(TokLit::UnitNumber(n, u)) => {
                self.advance();
                Ok(Expr::Literal { value: Literal::UnitNumber(n, u), span })
            }
            TokenKind::InterpLiteral(raw) => {
                self.advance();
                Ok(Expr::InterpolatedString { segments: parse_interp_segments(&raw, span), span })
            }
            TokenKind::GreekSymbol(name) => {
                self.advance();
                Ok(Expr::GreekSymbol { name, span })
            }
            TokenKind::MathSymbol(MathSymbol::Sum)
            | TokenKind::MathSymbol(MathSymbol::Product) => self.parse_math_aggregate(),
            TokenKind::Keyword(Keyword::Sum)
            | TokenKind::Keyword(Keyword::Product)
            | TokenKind::Keyword(Keyword::Min)
            | TokenKind::Keyword(Keyword::Max)
            | TokenKind::Keyword(Keyword::Average) => self.parse_word_aggregate(),
            TokenKind::Identifier(name) => {
                self.advance();
                Ok(Expr::Identifier { name, span })
            }
            TokenKind::Punctuation(Punctuation::LParen) => {
                self.advance();
                let inner = self.parse_expr()?;
                self.expect_punct(Punctuation::RParen)?;
                Ok(inner)
            }
            TokenKind::Punctuation(Punctuation::LBracket) => {
                self.advance();
                let mut elements = Vec::new();
                while !self.check_punct(&Punctuation::RBracket) {
                    elements.push(self.parse_expr()?);
                    if !self.eat_punct(&Punctuation::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punctuation::RBracket)?;
                Ok(Expr::ListLiteral { elements, span })
            }
            TokenKind::Punctuation(Punctuation::LBrace) => {
                self.advance();
                let mut entries = Vec::new();
                while !self.check_punct(&Punctuation::RBrace) {
                    let key = self.parse_expr()?;
                    self.expect_punct(Punctuation::Colon)?;
                    let value = self.parse_expr()?;
                    entries.push((key, value));
                    if !self.eat_punct(&Punctuation::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punctuation::RBrace)?;
                Ok(Expr::MapLiteral { entries, span })
            }
            TokenKind::Keyword(Keyword::Fn) => {
                self.advance();
                self.expect_punct(Punctuation::LParen)?;
                let mut params = Vec::new();
                while !self.check_punct(&Punctuation::RParen) {
                    let pspan = self.peek().span;
                    let pname = self.expect_ident()?;
                    params.push(Param { name: pname, type_name: None, span: pspan });
                    if !self.eat_punct(&Punctuation::Comma) {
                        break;
                    }
                }
                self.expect_punct(Punctuation::RParen)?;
                let body = self.parse_block()?;
                Ok(Expr::Lambda { params, body, span })
            }
            _ => Err(self.error(format!("unexpected token {:?}", self.peek_kind()))),
        }
    }

    fn parse_word_aggregate(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        let op = match self.advance().kind {
            TokenKind::Keyword(Keyword::Sum) => AggregateOp::Sum,
            TokenKind::Keyword(Keyword::Product) => AggregateOp::Product,
            TokenKind::Keyword(Keyword::Min) => AggregateOp::Min,
            TokenKind::Keyword(Keyword::Max) => AggregateOp::Max,
            TokenKind::Keyword(Keyword::Average) => AggregateOp::Average,
            _ => unreachable!(),
        };
        self.eat_kw(&Keyword::Of);
        self.eat_kw(&Keyword::All);
        let var = if self.check_kw(&Keyword::In) {
            "__it".to_string()
        } else {
            self.expect_ident()?
        };
        self.expect_kw(Keyword::In)?;
        let iterable = self.parse_bitor()?;
        let body = if self.eat_kw(&Keyword::Where) {
            self.parse_expr()?
        } else {
            Expr::Identifier { name: var.clone(), span }
        };
        Ok(Expr::Aggregate {
            op,
            var,
            iterable: Box::new(iterable),
            body: Box::new(body),
            span,
        })
    }

    fn parse_math_aggregate(&mut self) -> PResult<Expr> {
        let span = self.peek().span;
        let op = match self.advance().kind {
            TokenKind::MathSymbol(MathSymbol::Sum) => AggregateOp::Sum,
            TokenKind::MathSymbol(MathSymbol::Product) => AggregateOp::Product,
            _ => unreachable!(),
        };
        let var = self.expect_ident()?;
        self.expect_kw(Keyword::In)?;
        let iterable = self.parse_bitor()?;
        let body = self.parse_unary()?;
        Ok(Expr::Aggregate { op, var, iterable: Box::new(iterable), body: Box::new(body), span })
    }
}

/// Split an interpolated-string's raw template text into literal/expr
/// segments (the lexer keeps the whole `$"..."` body as one token; the
/// parser re-lexes the `{ ... }` spans as nested expressions).
fn parse_interp_segments(raw: &str, span: Span) -> Vec<InterpSegment> {
    let mut segments = Vec::new();
    let mut literal = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '{' {
            if !literal.is_empty() {
                segments.push(InterpSegment::Literal(std::mem::take(&mut literal)));
            }
            let mut inner = String::new();
            let mut depth = 1;
            for c2 in chars.by_ref() {
                if c2 == '{' {
                    depth += 1;
                } else if c2 == '}' {
                    depth -= 1;
                    if depth == 0 {
                        break;
                    }
                }
                inner.push(c2);
            }
            let mut sub_lexer = crate::lexer::Lexer::new(&inner, span.source);
            let tokens = sub_lexer.tokenize();
            let mut sub_parser = Parser::new(&tokens);
            if let Ok(expr) = sub_parser.parse_expr() {
                segments.push(InterpSegment::Expr(expr));
            }
        } else {
            literal.push(c);
        }
    }
    if !literal.is_empty() {
        segments.push(InterpSegment::Literal(literal));
    }
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::Lexer;
    use ouro_core::SourceId;

    fn parse(src: &str) -> Program {
        let mut lexer = Lexer::new(src, SourceId(0));
        let tokens = lexer.tokenize();
        let mut parser = Parser::new(&tokens);
        parser.parse_program()
    }

    #[test]
    fn parses_let_and_arithmetic_precedence() {
        let program = parse("let x = 1 + 2 * 3;");
        assert_eq!(program.items.len(), 1);
        match &program.items[0] {
            Item::Statement(Stmt::Let { value, .. }) => match value {
                Expr::Binary { op: BinaryOp::Add, rhs, .. } => {
                    assert!(matches!(**rhs, Expr::Binary { op: BinaryOp::Mul, .. }));
                }
                other => panic!("unexpected expr {other:?}"),
            },
            other => panic!("unexpected item {other:?}"),
        }
    }

    #[test]
    fn parses_if_else_block() {
        let program = parse("if x > 0 { let y = 1; } else { let y = 2; }");
        assert!(matches!(&program.items[0], Item::Statement(Stmt::If { else_branch: Some(_), .. })));
    }

    #[test]
    fn parses_foreach_loop() {
        let program = parse("@high for each item in items { }");
        assert!(program.items.iter().any(|i| matches!(i, Item::Statement(Stmt::ForEach { .. }))));
    }

    #[test]
    fn parses_function_with_params() {
        let program = parse("fn add(a, b) { return a + b; }");
        match &program.items[0] {
            Item::Function(f) => {
                assert_eq!(f.name, "add");
                assert_eq!(f.params.len(), 2);
            }
            other => panic!("expected function, got {other:?}"),
        }
    }

    #[test]
    fn parses_try_catch_finally() {
        let program = parse("try { throw 1; } catch (e) { } finally { }");
        assert!(matches!(&program.items[0], Item::Statement(Stmt::Try { finally: Some(_), .. })));
    }

    #[test]
    fn recovers_from_malformed_statement() {
        let mut lexer = Lexer::new("let = ; let y = 2;", SourceId(0));
        let tokens = lexer.tokenize();
        let mut parser = Parser::new(&tokens);
        let program = parser.parse_program();
        assert!(!parser.errors.is_empty());
        assert!(program.items.iter().any(|i| matches!(i, Item::Statement(Stmt::Let { name, .. }) if name == "y")));
    }
}
