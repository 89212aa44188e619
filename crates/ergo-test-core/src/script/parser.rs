//! ErgoScript parser: token stream to typed expression tree
//!
//! Recursive descent with Scala operator precedence:
//!
//! ```text
//!   ||  <  &&  <  == !=  <  < > <= >=  <  + -  <  * / %  <  prefix ! -  <  postfix
//! ```
//!
//! Statement separation inside blocks follows line breaks: a token on a new
//! line that could start a statement (`(`, `-`, `!`) ends the current
//! expression, while binary operators and `.` continue it. Inside `( )`
//! line breaks are insignificant.
//!
//! Names are resolved while parsing. An unknown identifier is a compile
//! error, and `f(x)` becomes an application when `f` names a function and an
//! index lookup otherwise.

use std::collections::HashMap;
use std::sync::Arc;

use super::ast::{
    BinOp, Builtin, Expr, ExprKind, GlobalVar, MethodKind, Param, SType, SourceContext, UnaryOp,
};
use super::tokenizer::{SpannedToken, Token, Tokenizer};
use super::value::Value;
use super::CompileError;

/// Parsed top-level script
#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    /// `ValDef` nodes for every top-level `val` / `def` (and template parameter)
    pub items: Vec<Expr>,
    /// The contract expression, when the script has one
    pub result: Option<Expr>,
    /// Position (line, column) where the contract expression starts
    pub contract_start: Option<(usize, usize)>,
}

impl Program {
    /// Fold the program into a single expression tree.
    ///
    /// Without a contract expression the tree reduces to `true`.
    pub fn into_expr(self) -> Expr {
        let result = self
            .result
            .unwrap_or_else(|| Expr::new(ExprKind::Const(Value::Boolean(true)), None));
        if self.items.is_empty() {
            return result;
        }
        let source = self.items.first().and_then(|e| e.source.clone());
        Expr::new(
            ExprKind::Block {
                items: self.items,
                result: Box::new(result),
            },
            source,
        )
    }
}

/// Parse a complete script.
pub fn parse_program(source: &str) -> Result<Program, CompileError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, source);
    parser.parse_program()
}

/// Parse a single expression (no top-level definitions).
pub fn parse_expression(source: &str) -> Result<Expr, CompileError> {
    let tokens = Tokenizer::new(source).tokenize()?;
    let mut parser = Parser::new(tokens, source);
    let expr = parser.parse_expr()?;
    parser.expect_eof()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<SpannedToken>,
    pos: usize,
    lines: Vec<String>,
    /// name -> whether the binding is a function
    scopes: Vec<HashMap<String, bool>>,
    newline_sensitive: Vec<bool>,
}

impl Parser {
    fn new(tokens: Vec<SpannedToken>, source: &str) -> Self {
        Parser {
            tokens,
            pos: 0,
            lines: source.split('\n').map(|l| l.trim_end_matches('\r').to_string()).collect(),
            scopes: vec![HashMap::new()],
            newline_sensitive: vec![true],
        }
    }

    // ── Token helpers ──────────────────────────────────────

    fn peek(&self) -> &Token {
        self.peek_at(0)
    }

    fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len().saturating_sub(1));
        self.tokens.get(idx).map(|t| &t.token).unwrap_or(&Token::Eof)
    }

    fn current(&self) -> Option<&SpannedToken> {
        self.tokens
            .get(self.pos.min(self.tokens.len().saturating_sub(1)))
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        token
    }

    fn position(&self) -> (usize, usize) {
        self.current()
            .map(|t| (t.span.line, t.span.column))
            .unwrap_or((1, 1))
    }

    fn context_here(&self) -> SourceContext {
        let (line, column) = self.position();
        self.context_at(line, column)
    }

    fn context_at(&self, line: usize, column: usize) -> SourceContext {
        SourceContext {
            line,
            column,
            source_line: self.lines.get(line - 1).cloned().unwrap_or_default(),
        }
    }

    fn newline_before(&self) -> bool {
        self.current().map(|t| t.newline_before).unwrap_or(false)
    }

    /// A line break before the current token ends the expression here.
    fn stops_at_newline(&self) -> bool {
        self.newline_before() && self.newline_sensitive.last().copied().unwrap_or(true)
    }

    fn error(&self, message: impl Into<String>) -> CompileError {
        let (line, column) = self.position();
        CompileError::at(message, line, column)
    }

    fn expect(&mut self, expected: Token) -> Result<(), CompileError> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("Expected {}, found {}", expected, self.peek())))
        }
    }

    fn expect_identifier(&mut self) -> Result<String, CompileError> {
        match self.peek().clone() {
            Token::Identifier(name) => {
                self.advance();
                Ok(name)
            }
            other => Err(self.error(format!("Expected identifier, found {}", other))),
        }
    }

    fn expect_eof(&mut self) -> Result<(), CompileError> {
        self.skip_semicolons();
        match self.peek() {
            Token::Eof => Ok(()),
            other => Err(self.error(format!("Unexpected {} after expression", other))),
        }
    }

    fn skip_semicolons(&mut self) {
        while *self.peek() == Token::Semicolon {
            self.advance();
        }
    }

    // ── Scopes ─────────────────────────────────────────────

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, name: &str, is_function: bool) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), is_function);
        }
    }

    fn lookup(&self, name: &str) -> Option<bool> {
        self.scopes.iter().rev().find_map(|s| s.get(name).copied())
    }

    // ── Top level ──────────────────────────────────────────

    fn parse_program(&mut self) -> Result<Program, CompileError> {
        let mut items = Vec::new();
        let mut result = None;
        let mut contract_start = None;

        loop {
            self.skip_semicolons();
            match self.peek() {
                Token::Eof => break,
                Token::Val => items.push(self.parse_val_def()?),
                Token::Def => items.push(self.parse_def()?),
                Token::At => {
                    contract_start = Some(self.position());
                    let (params, body) = self.parse_template()?;
                    items.extend(params);
                    result = Some(body);
                    self.expect_eof()?;
                    break;
                }
                _ => {
                    contract_start = Some(self.position());
                    result = Some(self.parse_expr()?);
                    self.skip_semicolons();
                    if *self.peek() != Token::Eof {
                        return Err(self.error(format!(
                            "Unexpected {}: a bare expression must be the last item of a script",
                            self.peek()
                        )));
                    }
                    break;
                }
            }
        }

        Ok(Program {
            items,
            result,
            contract_start,
        })
    }

    /// `@contract def name(p: T = default, ...) = body`
    fn parse_template(&mut self) -> Result<(Vec<Expr>, Expr), CompileError> {
        self.expect(Token::At)?;
        let annotation = self.expect_identifier()?;
        if annotation != "contract" {
            return Err(self.error(format!("Unknown annotation '@{}'", annotation)));
        }
        self.expect(Token::Def)?;
        let _name = self.expect_identifier()?;

        let mut params = Vec::new();
        self.expect(Token::LParen)?;
        self.newline_sensitive.push(false);
        while *self.peek() != Token::RParen {
            let ctx = self.context_here();
            let name = self.expect_identifier()?;
            if *self.peek() == Token::Colon {
                self.advance();
                self.parse_type()?;
            }
            if *self.peek() != Token::Assign {
                return Err(self.error(format!(
                    "Template parameter '{}' has no default value",
                    name
                )));
            }
            self.advance();
            let default = self.parse_expr()?;
            let is_function = matches!(default.kind, ExprKind::Lambda { .. });
            self.declare(&name, is_function);
            params.push(Expr::new(
                ExprKind::ValDef {
                    name,
                    rhs: Box::new(default),
                },
                Some(ctx),
            ));
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.newline_sensitive.pop();
        self.expect(Token::RParen)?;
        if *self.peek() == Token::Colon {
            self.advance();
            self.parse_type()?;
        }
        self.expect(Token::Assign)?;
        let body = self.parse_expr()?;
        Ok((params, body))
    }

    /// `val name [: T] = expr`
    fn parse_val_def(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        self.expect(Token::Val)?;
        let name = self.expect_identifier()?;
        if *self.peek() == Token::Colon {
            self.advance();
            self.parse_type()?;
        }
        self.expect(Token::Assign)?;
        let rhs = self.parse_expr()?;
        let is_function = matches!(rhs.kind, ExprKind::Lambda { .. });
        self.declare(&name, is_function);
        Ok(Expr::new(
            ExprKind::ValDef {
                name,
                rhs: Box::new(rhs),
            },
            Some(ctx),
        ))
    }

    /// `def name(a: T, ...)[: R] = body`, bound as a lambda value
    fn parse_def(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        self.expect(Token::Def)?;
        let name = self.expect_identifier()?;

        if *self.peek() != Token::LParen {
            if *self.peek() == Token::Colon {
                self.advance();
                self.parse_type()?;
            }
            self.expect(Token::Assign)?;
            let rhs = self.parse_expr()?;
            self.declare(&name, false);
            return Ok(Expr::new(
                ExprKind::ValDef {
                    name,
                    rhs: Box::new(rhs),
                },
                Some(ctx),
            ));
        }

        let params = self.parse_param_list()?;
        if *self.peek() == Token::Colon {
            self.advance();
            self.parse_type()?;
        }
        self.expect(Token::Assign)?;

        self.push_scope();
        for p in &params {
            let is_function = matches!(p.tpe, SType::Func(..));
            self.declare(&p.name, is_function);
        }
        let body = self.parse_expr();
        self.pop_scope();
        let body = body?;

        self.declare(&name, true);
        let lambda = Expr::new(
            ExprKind::Lambda {
                params,
                body: Arc::new(body),
            },
            Some(ctx.clone()),
        );
        Ok(Expr::new(
            ExprKind::ValDef {
                name,
                rhs: Box::new(lambda),
            },
            Some(ctx),
        ))
    }

    /// `(a: T, b: U)`
    fn parse_param_list(&mut self) -> Result<Vec<Param>, CompileError> {
        self.expect(Token::LParen)?;
        self.newline_sensitive.push(false);
        let mut params = Vec::new();
        while *self.peek() != Token::RParen {
            let name = self.expect_identifier()?;
            let tpe = if *self.peek() == Token::Colon {
                self.advance();
                self.parse_type()?
            } else {
                SType::Any
            };
            params.push(Param { name, tpe });
            if *self.peek() == Token::Comma {
                self.advance();
            } else {
                break;
            }
        }
        self.newline_sensitive.pop();
        self.expect(Token::RParen)?;
        Ok(params)
    }

    // ── Types ──────────────────────────────────────────────

    fn parse_type(&mut self) -> Result<SType, CompileError> {
        let base = if *self.peek() == Token::LParen {
            self.advance();
            let mut items = Vec::new();
            while *self.peek() != Token::RParen {
                items.push(self.parse_type()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            self.expect(Token::RParen)?;
            if *self.peek() == Token::Arrow {
                self.advance();
                let ret = self.parse_type()?;
                return Ok(SType::Func(items, Box::new(ret)));
            }
            SType::Tuple(items)
        } else {
            let name = self.expect_identifier()?;
            match name.as_str() {
                "Unit" => SType::Unit,
                "Boolean" => SType::Boolean,
                "Byte" => SType::Byte,
                "Int" => SType::Int,
                "Long" => SType::Long,
                "BigInt" => SType::BigInt,
                "GroupElement" => SType::GroupElement,
                "SigmaProp" => SType::SigmaProp,
                "Box" => SType::Box,
                "PreHeader" => SType::PreHeader,
                "Context" => SType::Context,
                "Any" => SType::Any,
                "Coll" | "Option" => {
                    self.expect(Token::LBracket)?;
                    let inner = self.parse_type()?;
                    self.expect(Token::RBracket)?;
                    if name == "Coll" {
                        SType::Coll(Box::new(inner))
                    } else {
                        SType::Option(Box::new(inner))
                    }
                }
                other => return Err(self.error(format!("Unknown type '{}'", other))),
            }
        };

        if *self.peek() == Token::Arrow {
            self.advance();
            let ret = self.parse_type()?;
            return Ok(SType::Func(vec![base], Box::new(ret)));
        }
        Ok(base)
    }

    // ── Expressions ────────────────────────────────────────

    fn parse_expr(&mut self) -> Result<Expr, CompileError> {
        match self.peek() {
            Token::If => self.parse_if(),
            Token::LParen if self.paren_lambda_ahead() => self.parse_paren_lambda(),
            Token::Identifier(_) if *self.peek_at(1) == Token::Arrow => self.parse_untyped_lambda(),
            _ => self.parse_or(),
        }
    }

    fn paren_lambda_ahead(&self) -> bool {
        matches!(
            (self.peek_at(1), self.peek_at(2)),
            (Token::Identifier(_), Token::Colon) | (Token::RParen, Token::Arrow)
        )
    }

    /// `(x: T, ...) => body`
    fn parse_paren_lambda(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        let params = self.parse_param_list()?;
        self.expect(Token::Arrow)?;
        self.lambda_body(params, ctx, |p| p.parse_expr())
    }

    /// `x => body`
    fn parse_untyped_lambda(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        let name = self.expect_identifier()?;
        self.expect(Token::Arrow)?;
        let params = vec![Param {
            name,
            tpe: SType::Any,
        }];
        self.lambda_body(params, ctx, |p| p.parse_expr())
    }

    fn lambda_body(
        &mut self,
        params: Vec<Param>,
        ctx: SourceContext,
        body: impl FnOnce(&mut Self) -> Result<Expr, CompileError>,
    ) -> Result<Expr, CompileError> {
        self.push_scope();
        for p in &params {
            let is_function = matches!(p.tpe, SType::Func(..));
            self.declare(&p.name, is_function);
        }
        let body = body(self);
        self.pop_scope();
        Ok(Expr::new(
            ExprKind::Lambda {
                params,
                body: Arc::new(body?),
            },
            Some(ctx),
        ))
    }

    fn parse_if(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        self.expect(Token::If)?;
        self.expect(Token::LParen)?;
        self.newline_sensitive.push(false);
        let cond = self.parse_expr();
        self.newline_sensitive.pop();
        let cond = cond?;
        self.expect(Token::RParen)?;
        let then_branch = self.parse_expr()?;
        self.skip_semicolons();
        if *self.peek() != Token::Else {
            return Err(self.error("'if' expression requires an 'else' branch"));
        }
        self.advance();
        let else_branch = self.parse_expr()?;
        Ok(Expr::new(
            ExprKind::If {
                cond: Box::new(cond),
                then_branch: Box::new(then_branch),
                else_branch: Box::new(else_branch),
            },
            Some(ctx),
        ))
    }

    fn binary_level(
        &mut self,
        next: fn(&mut Self) -> Result<Expr, CompileError>,
        ops: &[(Token, BinOp)],
    ) -> Result<Expr, CompileError> {
        let mut left = next(self)?;
        loop {
            let op = match ops.iter().find(|(t, _)| t == self.peek()) {
                Some((_, op)) => *op,
                None => break,
            };
            if op == BinOp::Minus && self.stops_at_newline() {
                break;
            }
            let ctx = self.context_here();
            self.advance();
            let right = next(self)?;
            left = Expr::new(
                ExprKind::Binary {
                    op,
                    left: Box::new(left),
                    right: Box::new(right),
                },
                Some(ctx),
            );
        }
        Ok(left)
    }

    fn parse_or(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(Self::parse_and, &[(Token::OrOr, BinOp::Or)])
    }

    fn parse_and(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(Self::parse_equality, &[(Token::AndAnd, BinOp::And)])
    }

    fn parse_equality(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            Self::parse_relational,
            &[(Token::EqEq, BinOp::Eq), (Token::NotEq, BinOp::Neq)],
        )
    }

    fn parse_relational(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            Self::parse_additive,
            &[
                (Token::Lt, BinOp::Lt),
                (Token::Gt, BinOp::Gt),
                (Token::Le, BinOp::Le),
                (Token::Ge, BinOp::Ge),
            ],
        )
    }

    fn parse_additive(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            Self::parse_multiplicative,
            &[(Token::Plus, BinOp::Plus), (Token::Minus, BinOp::Minus)],
        )
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, CompileError> {
        self.binary_level(
            Self::parse_unary,
            &[
                (Token::Star, BinOp::Multiply),
                (Token::Slash, BinOp::Division),
                (Token::Percent, BinOp::Modulo),
            ],
        )
    }

    fn parse_unary(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        match self.peek().clone() {
            Token::Bang => {
                self.advance();
                let operand = self.parse_unary()?;
                Ok(Expr::new(
                    ExprKind::Unary {
                        op: UnaryOp::Not,
                        operand: Box::new(operand),
                    },
                    Some(ctx),
                ))
            }
            Token::Minus => {
                self.advance();
                match self.peek().clone() {
                    Token::IntLiteral(n) => {
                        self.advance();
                        let value = i32::try_from(-n)
                            .map_err(|_| self.error(format!("Int literal -{} out of range", n)))?;
                        self.parse_postfix(Expr::new(ExprKind::Const(Value::Int(value)), Some(ctx)))
                    }
                    Token::LongLiteral(n) => {
                        self.advance();
                        self.parse_postfix(Expr::new(ExprKind::Const(Value::Long(-n)), Some(ctx)))
                    }
                    _ => {
                        let operand = self.parse_unary()?;
                        Ok(Expr::new(
                            ExprKind::Unary {
                                op: UnaryOp::Negate,
                                operand: Box::new(operand),
                            },
                            Some(ctx),
                        ))
                    }
                }
            }
            _ => {
                let primary = self.parse_primary()?;
                self.parse_postfix(primary)
            }
        }
    }

    fn parse_postfix(&mut self, mut expr: Expr) -> Result<Expr, CompileError> {
        loop {
            match self.peek() {
                Token::Dot => {
                    self.advance();
                    expr = self.parse_member(expr)?;
                }
                Token::LParen if !self.stops_at_newline() => {
                    let ctx = self.context_here();
                    let args = self.parse_args()?;
                    expr = self.parse_call(expr, args, ctx)?;
                }
                _ => break,
            }
        }
        Ok(expr)
    }

    fn parse_call(
        &mut self,
        callee: Expr,
        mut args: Vec<Expr>,
        ctx: SourceContext,
    ) -> Result<Expr, CompileError> {
        let is_function = match &callee.kind {
            ExprKind::ValUse(name) => self.lookup(name).unwrap_or(false),
            ExprKind::Lambda { .. } => true,
            _ => false,
        };
        if is_function {
            return Ok(Expr::new(
                ExprKind::Apply {
                    func: Box::new(callee),
                    args,
                },
                Some(ctx),
            ));
        }
        if args.len() != 1 {
            return Err(CompileError::at(
                format!("Expected a single index argument, found {}", args.len()),
                ctx.line,
                ctx.column,
            ));
        }
        Ok(Expr::new(
            ExprKind::ByIndex {
                coll: Box::new(callee),
                index: Box::new(args.remove(0)),
            },
            Some(ctx),
        ))
    }

    /// Member access after `.`
    fn parse_member(&mut self, obj: Expr) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        let name = self.expect_identifier()?;

        if let Some(index) = name.strip_prefix('_').and_then(|n| n.parse::<usize>().ok()) {
            if index == 0 {
                return Err(CompileError::at("Tuple fields start at _1", ctx.line, ctx.column));
            }
            return Ok(Expr::new(
                ExprKind::SelectField {
                    obj: Box::new(obj),
                    index: index - 1,
                },
                Some(ctx),
            ));
        }

        if let Some(reg) = register_index(&name) {
            self.expect(Token::LBracket)?;
            let tpe = self.parse_type()?;
            self.expect(Token::RBracket)?;
            return Ok(Expr::new(
                ExprKind::Method {
                    obj: Box::new(obj),
                    method: MethodKind::Register(reg, tpe),
                    args: Vec::new(),
                },
                Some(ctx),
            ));
        }

        let args = match self.peek() {
            Token::LParen if !self.newline_before() => self.parse_args()?,
            Token::LBrace if !self.newline_before() => vec![self.parse_brace_expr()?],
            _ => Vec::new(),
        };

        let method = MethodKind::resolve(&name, args.len()).ok_or_else(|| {
            CompileError::at(
                format!("Unknown member '{}' with {} argument(s)", name, args.len()),
                ctx.line,
                ctx.column,
            )
        })?;
        Ok(Expr::new(
            ExprKind::Method {
                obj: Box::new(obj),
                method,
                args,
            },
            Some(ctx),
        ))
    }

    /// `( expr, ... )`
    fn parse_args(&mut self) -> Result<Vec<Expr>, CompileError> {
        self.expect(Token::LParen)?;
        self.newline_sensitive.push(false);
        let mut args = Vec::new();
        let result = (|| -> Result<(), CompileError> {
            while *self.peek() != Token::RParen {
                args.push(self.parse_expr()?);
                if *self.peek() == Token::Comma {
                    self.advance();
                } else {
                    break;
                }
            }
            Ok(())
        })();
        self.newline_sensitive.pop();
        result?;
        self.expect(Token::RParen)?;
        Ok(args)
    }

    fn parse_primary(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        match self.peek().clone() {
            Token::IntLiteral(n) => {
                self.advance();
                let value = i32::try_from(n).map_err(|_| {
                    CompileError::at(
                        format!("Int literal {} out of range, use {}L for a Long", n, n),
                        ctx.line,
                        ctx.column,
                    )
                })?;
                Ok(Expr::new(ExprKind::Const(Value::Int(value)), Some(ctx)))
            }
            Token::LongLiteral(n) => {
                self.advance();
                Ok(Expr::new(ExprKind::Const(Value::Long(n)), Some(ctx)))
            }
            Token::BooleanLiteral(b) => {
                self.advance();
                Ok(Expr::new(ExprKind::Const(Value::Boolean(b)), Some(ctx)))
            }
            Token::StringLiteral(_) => Err(self.error(
                "String literals are only supported as the argument of fromBase16",
            )),
            Token::LParen => self.parse_paren_expr(),
            Token::LBrace => self.parse_brace_expr(),
            Token::If => self.parse_if(),
            Token::Identifier(name) => {
                self.advance();
                self.parse_identifier(name, ctx)
            }
            other => Err(self.error(format!("Unexpected {}", other))),
        }
    }

    fn parse_identifier(&mut self, name: String, ctx: SourceContext) -> Result<Expr, CompileError> {
        if self.lookup(&name).is_some() {
            return Ok(Expr::new(ExprKind::ValUse(name), Some(ctx)));
        }
        if let Some(global) = GlobalVar::from_name(&name) {
            return Ok(Expr::new(ExprKind::Global(global), Some(ctx)));
        }
        match name.as_str() {
            "fromBase16" => {
                self.expect(Token::LParen)?;
                let text = match self.advance() {
                    Token::StringLiteral(s) => s,
                    other => {
                        return Err(self.error(format!(
                            "fromBase16 expects a string literal, found {}",
                            other
                        )))
                    }
                };
                self.expect(Token::RParen)?;
                let bytes = hex::decode(&text).map_err(|e| {
                    CompileError::at(
                        format!("Invalid base16 string \"{}\": {}", text, e),
                        ctx.line,
                        ctx.column,
                    )
                })?;
                Ok(Expr::new(ExprKind::Const(Value::bytes(&bytes)), Some(ctx)))
            }
            "Coll" => {
                if *self.peek() == Token::LBracket {
                    self.advance();
                    self.parse_type()?;
                    self.expect(Token::RBracket)?;
                }
                let items = self.parse_args()?;
                Ok(Expr::new(ExprKind::Coll(items), Some(ctx)))
            }
            _ => match Builtin::from_name(&name) {
                Some(func) => {
                    let args = self.parse_args()?;
                    if args.len() != func.arity() {
                        return Err(CompileError::at(
                            format!(
                                "{} expects {} argument(s), found {}",
                                name,
                                func.arity(),
                                args.len()
                            ),
                            ctx.line,
                            ctx.column,
                        ));
                    }
                    Ok(Expr::new(ExprKind::Builtin { func, args }, Some(ctx)))
                }
                None => Err(CompileError::at(
                    format!(
                        "Cannot assign type for variable '{}' because it is not found in env",
                        name
                    ),
                    ctx.line,
                    ctx.column,
                )),
            },
        }
    }

    /// `( expr )`, `( a, b, ... )` or `()`
    fn parse_paren_expr(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        self.expect(Token::LParen)?;
        if *self.peek() == Token::RParen {
            self.advance();
            return Ok(Expr::new(ExprKind::Const(Value::Unit), Some(ctx)));
        }
        self.newline_sensitive.push(false);
        let result = (|| -> Result<Expr, CompileError> {
            let first = self.parse_expr()?;
            if *self.peek() != Token::Comma {
                return Ok(first);
            }
            let mut items = vec![first];
            while *self.peek() == Token::Comma {
                self.advance();
                items.push(self.parse_expr()?);
            }
            Ok(Expr::new(ExprKind::Tuple(items), Some(ctx)))
        })();
        self.newline_sensitive.pop();
        let expr = result?;
        self.expect(Token::RParen)?;
        Ok(expr)
    }

    /// `{ ... }`: a block, or a lambda written `{ (x: T) => body }`
    fn parse_brace_expr(&mut self) -> Result<Expr, CompileError> {
        let ctx = self.context_here();
        self.expect(Token::LBrace)?;
        self.newline_sensitive.push(true);
        let result = (|| -> Result<Expr, CompileError> {
            if *self.peek() == Token::LParen && self.paren_lambda_ahead() {
                let params = self.parse_param_list()?;
                self.expect(Token::Arrow)?;
                return self.lambda_body(params, ctx.clone(), |p| p.parse_block_body(ctx.clone()));
            }
            if matches!(self.peek(), Token::Identifier(_)) && *self.peek_at(1) == Token::Arrow {
                let name = self.expect_identifier()?;
                self.advance();
                let params = vec![Param {
                    name,
                    tpe: SType::Any,
                }];
                return self.lambda_body(params, ctx.clone(), |p| p.parse_block_body(ctx.clone()));
            }
            self.push_scope();
            let body = self.parse_block_body(ctx.clone());
            self.pop_scope();
            body
        })();
        self.newline_sensitive.pop();
        let expr = result?;
        self.expect(Token::RBrace)?;
        Ok(expr)
    }

    /// Block items up to (not including) the closing brace
    fn parse_block_body(&mut self, ctx: SourceContext) -> Result<Expr, CompileError> {
        let mut items = Vec::new();
        loop {
            self.skip_semicolons();
            match self.peek() {
                Token::Val => items.push(self.parse_val_def()?),
                Token::Def => items.push(self.parse_def()?),
                Token::RBrace | Token::Eof => {
                    return Err(self.error("Block must end with an expression"));
                }
                _ => {
                    let result = self.parse_expr()?;
                    self.skip_semicolons();
                    if *self.peek() != Token::RBrace {
                        return Err(self.error(format!(
                            "Unexpected {}: expected '}}' after the block result",
                            self.peek()
                        )));
                    }
                    if items.is_empty() {
                        return Ok(result);
                    }
                    return Ok(Expr::new(
                        ExprKind::Block {
                            items,
                            result: Box::new(result),
                        },
                        Some(ctx),
                    ));
                }
            }
        }
    }
}

fn register_index(name: &str) -> Option<u8> {
    match name {
        "R4" => Some(4),
        "R5" => Some(5),
        "R6" => Some(6),
        "R7" => Some(7),
        "R8" => Some(8),
        "R9" => Some(9),
        _ => None,
    }
}
