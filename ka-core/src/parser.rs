//! Speculative recursive-descent parser.
//!
//! The grammar is not LL(1). Where two readings are possible the parser
//! tries the first one inside [`Parser::speculate`], which restores the
//! token cursor and both arenas together if the attempt fails, and then
//! parses the second reading from the same spot:
//!
//! - structure member: `Type name;`, else a variant `tag { ... }`
//! - `[ ... ]` / `{ ... }`: array / struct literal, else deref / access
//! - block line starting with a type: inline closure, else expression
//! - `sizeof`: a type, else an expression
//!
//! Operators have no precedence. Each operator takes everything gathered
//! so far as its first argument, so `a + b * c` reads `(a + b) * c`.

use tracing::{debug, trace};

use crate::ast::{
    ConstValue, Constant, ExprId, ExprKind, Function, Lambda, LiteralKind, Numeral, Program,
    SizeofTarget, Statement, StatementKind, TypeDecl,
};
use crate::config::Limits;
use crate::error::{CoreError, CoreResult};
use crate::lexer::{self, Token, TokenKind, TokenStream};
use crate::loader::ModuleLoader;
use crate::span::Position;
use crate::types::{BufferCount, Field, Primitive, Structure, Type, TypeKind, Variant};

/// Lex and parse `source` into `program`, following `using` imports
/// through `loader`.
pub fn parse_unit(
    unit: &str,
    source: &str,
    program: &mut Program,
    loader: &mut dyn ModuleLoader,
    limits: &Limits,
) -> CoreResult<()> {
    let tokens = lexer::lex(source)?;
    let mut parser = Parser::new(&tokens, program, loader, limits);
    parser.parse_declarations()?;
    debug!(unit, functions = program.functions.len(), "parsed unit");
    Ok(())
}

pub struct Parser<'a> {
    tokens: &'a TokenStream,
    cursor: usize,
    program: &'a mut Program,
    loader: &'a mut dyn ModuleLoader,
    limits: &'a Limits,
    depth: usize,
    /// Furthest failure among rolled-back attempts, by token index.
    discarded: Option<(usize, CoreError)>,
}

impl<'a> Parser<'a> {
    pub fn new(
        tokens: &'a TokenStream,
        program: &'a mut Program,
        loader: &'a mut dyn ModuleLoader,
        limits: &'a Limits,
    ) -> Self {
        Parser {
            tokens,
            cursor: 0,
            program,
            loader,
            limits,
            depth: 0,
            discarded: None,
        }
    }

    // ------------------------------------------------------------------
    // Declarations
    // ------------------------------------------------------------------

    pub fn parse_declarations(&mut self) -> CoreResult<()> {
        while self.peek_kind() != TokenKind::Eof {
            if let Err(err) = self.parse_declaration() {
                return Err(self.most_specific(err));
            }
            self.discarded = None;
        }
        Ok(())
    }

    fn parse_declaration(&mut self) -> CoreResult<()> {
        match self.peek_kind() {
            TokenKind::Using => self.parse_using(),
            TokenKind::Type | TokenKind::Alias => self.parse_type_declaration(),
            TokenKind::Constant => self.parse_constant(),
            _ => self.parse_function(),
        }
    }

    fn parse_using(&mut self) -> CoreResult<()> {
        let position = self.advance().position;
        let (name, _) = self.expect_ident("module name after `using`")?;
        self.expect(TokenKind::Semi, "`;` after import")?;

        if !self.program.add_import(&name, position) {
            trace!(module = %name, "module already imported");
            return Ok(());
        }
        if self.program.imports.len() > self.limits.max_imports {
            return Err(CoreError::limit("imports", self.limits.max_imports));
        }

        debug!(module = %name, "importing module");
        let source = self.loader.load(&name)?;
        parse_unit(&name, &source, &mut *self.program, &mut *self.loader, self.limits).map_err(
            |source| CoreError::InModule {
                module: name,
                source: Box::new(source),
            },
        )
    }

    fn parse_type_declaration(&mut self) -> CoreResult<()> {
        let keyword = self.advance();
        let (name, position) = self.expect_ident("type name")?;
        let ty = self.parse_type()?;
        if self.peek_kind() == TokenKind::Semi {
            self.advance();
        }
        let decl = TypeDecl { name, ty, position };
        debug!(name = %decl.name, ty = %decl.ty, "parsed type declaration");
        if keyword.kind == TokenKind::Type {
            self.program.define_type(decl)
        } else {
            self.program.define_alias(decl)
        }
    }

    fn parse_constant(&mut self) -> CoreResult<()> {
        self.advance();
        let (name, position) = self.expect_ident("constant name")?;
        self.expect(TokenKind::Assign, "`=` after constant name")?;
        let token = self.advance();
        let value = match token.kind {
            TokenKind::Integer => ConstValue::Integer(self.integer_value(&token)?),
            TokenKind::Char => ConstValue::Integer(self.char_value(&token)),
            TokenKind::Float => ConstValue::Float(self.float_value(&token)?),
            TokenKind::String => {
                let text = self.text(&token);
                ConstValue::String(self.program.strings.push_str(text)?)
            }
            _ => return Err(self.error_at(&token, "constant value must be a literal")),
        };
        self.expect(TokenKind::Semi, "`;` after constant")?;
        debug!(name = %name, "parsed constant");
        self.program.define_constant(Constant {
            name,
            value,
            position,
        })
    }

    /// `Type name = application ;`
    fn parse_function(&mut self) -> CoreResult<()> {
        let position = self.peek().position;
        let ty = self.parse_type()?;
        let name = self.expect_name()?;
        match self.peek_kind() {
            TokenKind::Assign => {
                self.advance();
            }
            TokenKind::Hash => {
                return Err(self.error("`#` is only allowed for closures defined inside a block"));
            }
            _ => return Err(self.error("expected `=` after function name")),
        }
        let body = self.parse_application(&[TokenKind::Semi])?;
        self.expect(TokenKind::Semi, "`;` after function body")?;
        debug!(name = %name, ty = %ty, "parsed function");
        self.program.define_function(Function {
            name,
            ty,
            body,
            enclosing: false,
            lifted: false,
            position,
        })?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    pub fn parse_type(&mut self) -> CoreResult<Type> {
        self.nested(|p| {
            let mut ty = p.parse_type_base()?;
            loop {
                match p.peek_kind() {
                    TokenKind::Mut => {
                        p.advance();
                        ty.mutable = true;
                    }
                    TokenKind::Arrow => {
                        p.advance();
                        let right = p.parse_type()?;
                        return Ok(Type::function(ty, right));
                    }
                    _ => return Ok(ty),
                }
            }
        })
    }

    fn parse_type_base(&mut self) -> CoreResult<Type> {
        let token = *self.peek();
        if let Some(primitive) = primitive_of(token.kind) {
            self.advance();
            return Ok(Type::primitive(primitive));
        }
        match token.kind {
            TokenKind::Ident => {
                self.advance();
                Ok(Type::user(self.text(&token)))
            }
            TokenKind::LParen => {
                self.advance();
                let inner = self.parse_type()?;
                self.expect(TokenKind::RParen, "`)` to close type")?;
                Ok(inner)
            }
            TokenKind::LBrace => {
                self.advance();
                Ok(Type::structure(self.parse_structure()?))
            }
            TokenKind::LBracket => {
                self.advance();
                let base = self.parse_type()?;
                let next = self.advance();
                match next.kind {
                    TokenKind::RBracket => Ok(Type::pointer(base)),
                    TokenKind::Integer => {
                        let count = self.integer_value(&next)?;
                        self.expect(TokenKind::RBracket, "`]` after buffer size")?;
                        Ok(Type::buffer(base, count))
                    }
                    TokenKind::Ident => {
                        let name = self.text(&next).to_string();
                        self.expect(TokenKind::RBracket, "`]` after buffer size")?;
                        Ok(Type::new(TypeKind::Buffer(
                            Box::new(base),
                            BufferCount::Constant(name),
                        )))
                    }
                    _ => Err(self.error_at(&next, "expected `]`, a size or a constant name in buffer type")),
                }
            }
            TokenKind::Procedure => {
                self.advance();
                // `procedure` alone is a procedure returning nothing. A name
                // right after it is the declared binding, not a base type.
                let base = match self.peek_kind() {
                    k if primitive_of(k).is_some() => self.parse_type_base()?,
                    TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => {
                        self.parse_type_base()?
                    }
                    _ => Type::none(),
                };
                Ok(Type::procedure(base))
            }
            _ => Err(self.error("expected a type")),
        }
    }

    /// Members up to and including the closing `}`.
    fn parse_structure(&mut self) -> CoreResult<Structure> {
        self.nested(|p| {
            let mut structure = Structure::default();
            let mut next_discriminant: i64 = 0;
            loop {
                if p.peek_kind() == TokenKind::RBrace {
                    p.advance();
                    return Ok(structure);
                }
                if structure.fields.len() + structure.variants.len() >= p.limits.max_members {
                    return Err(CoreError::limit("structure members", p.limits.max_members));
                }

                let field = p.speculate(|p| {
                    let ty = p.parse_type()?;
                    let (name, _) = p.expect_ident("member name")?;
                    p.expect(TokenKind::Semi, "`;` after member")?;
                    Ok(Field { name, ty })
                })?;
                if let Some(field) = field {
                    if structure.field(&field.name).is_some() {
                        return Err(p.error(&format!("duplicate member `{}`", field.name)));
                    }
                    structure.fields.push(field);
                    continue;
                }

                let (tag, _) = p.expect_ident("member type or variant tag")?;
                if p.peek_kind() == TokenKind::Assign {
                    p.advance();
                    let token = p.expect(TokenKind::Integer, "variant discriminant")?;
                    next_discriminant = p.integer_value(&token)? as i64;
                }
                p.expect(TokenKind::LBrace, "`{` to open variant")?;
                let body = p.parse_structure()?;
                if p.peek_kind() == TokenKind::Semi {
                    p.advance();
                }
                if structure.variant(&tag).is_some() {
                    return Err(p.error(&format!("duplicate variant `{tag}`")));
                }
                structure.variants.push(Variant {
                    name: tag,
                    discriminant: next_discriminant,
                    body,
                });
                next_discriminant += 1;
            }
        })
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Everything up to (not including) one of `ends`.
    pub fn parse_application(&mut self, ends: &[TokenKind]) -> CoreResult<ExprId> {
        let position = self.peek().position;
        let mut terms: Vec<ExprId> = Vec::new();
        loop {
            let token = *self.peek();
            if ends.contains(&token.kind) {
                break;
            }
            match token.kind {
                TokenKind::Eof => return Err(self.error("unexpected end of input")),
                TokenKind::Return => {
                    if !terms.is_empty() {
                        return Err(self.error("`return` must start an expression"));
                    }
                    self.advance();
                    let value = self.nested(|p| p.parse_application(ends))?;
                    let node = self.alloc(ExprKind::Return { value, ty: None }, token.position)?;
                    terms.push(node);
                    break;
                }
                TokenKind::Assign => {
                    let assignable = terms.len() == 1
                        && matches!(
                            self.program.expr(terms[0]).kind,
                            ExprKind::Binding { .. } | ExprKind::Deref { .. } | ExprKind::Access { .. }
                        );
                    if !assignable {
                        return Err(self.error(
                            "`=` must follow exactly one binding, dereference or access",
                        ));
                    }
                    self.advance();
                    let marker = self.alloc(ExprKind::Nop, token.position)?;
                    let value = self.nested(|p| p.parse_application(ends))?;
                    terms.push(marker);
                    terms.push(value);
                    break;
                }
                TokenKind::Dollar => {
                    if terms.is_empty() {
                        return Err(self.error("`$` needs a function on its left"));
                    }
                    self.advance();
                    let rest = self.nested(|p| p.parse_application(ends))?;
                    terms.push(rest);
                    break;
                }
                kind if kind.is_operator() => {
                    self.advance();
                    let op = self.binding(&token)?;
                    if terms.is_empty() {
                        terms.push(op);
                    } else {
                        let left = self.wrap(std::mem::take(&mut terms), position)?;
                        terms.push(op);
                        terms.push(left);
                    }
                }
                TokenKind::Backslash => {
                    let lambda = self.nested(|p| p.parse_lambda(ends))?;
                    terms.push(lambda);
                }
                _ => {
                    let term = self.parse_term()?;
                    terms.push(term);
                }
            }
        }
        if terms.is_empty() {
            return Err(self.error("expected an expression"));
        }
        self.wrap(terms, position)
    }

    /// At most `cap` plain terms. Used for `if` / `for` argument lists.
    fn parse_terms(&mut self, cap: usize) -> CoreResult<Vec<ExprId>> {
        let mut terms = Vec::with_capacity(cap);
        while terms.len() < cap {
            let token = *self.peek();
            let term = if token.kind.is_operator() {
                self.advance();
                self.binding(&token)?
            } else {
                self.parse_term()?
            };
            terms.push(term);
        }
        Ok(terms)
    }

    fn parse_term(&mut self) -> CoreResult<ExprId> {
        self.nested(|p| {
            let token = *p.peek();
            match token.kind {
                TokenKind::Ident => {
                    p.advance();
                    p.binding(&token)
                }
                TokenKind::Integer => {
                    p.advance();
                    let value = p.integer_value(&token)?;
                    p.value(Numeral::Integer(value), token.position)
                }
                TokenKind::Char => {
                    p.advance();
                    let value = p.char_value(&token);
                    p.value(Numeral::Integer(value), token.position)
                }
                TokenKind::Float => {
                    p.advance();
                    let value = p.float_value(&token)?;
                    p.value(Numeral::Float(value), token.position)
                }
                TokenKind::String => {
                    p.advance();
                    let text = p.text(&token);
                    let range = p.program.strings.push_str(text)?;
                    p.alloc(
                        ExprKind::Literal {
                            literal: LiteralKind::String(range),
                            ty: None,
                        },
                        token.position,
                    )
                }
                TokenKind::LParen => {
                    p.advance();
                    p.parse_group(TokenKind::RParen)
                }
                TokenKind::LBracket => {
                    p.advance();
                    p.parse_bracketed(TokenKind::RBracket)
                }
                TokenKind::LBrace => {
                    p.advance();
                    p.parse_bracketed(TokenKind::RBrace)
                }
                TokenKind::Backslash => p.parse_lambda(&[]),
                TokenKind::Ref => {
                    p.advance();
                    let target = p.parse_term()?;
                    p.alloc(ExprKind::Ref { target, ty: None }, token.position)
                }
                TokenKind::Cast => {
                    p.advance();
                    let target = p.parse_type()?;
                    let operand = p.parse_term()?;
                    p.alloc(
                        ExprKind::Cast {
                            target,
                            operand,
                            ty: None,
                        },
                        token.position,
                    )
                }
                TokenKind::Sizeof => {
                    p.advance();
                    p.parse_sizeof(token.position)
                }
                TokenKind::If => p.parse_if(None),
                TokenKind::For => p.parse_for(None),
                TokenKind::Label => {
                    p.advance();
                    let label = Some(p.text(&token).to_string());
                    match p.peek_kind() {
                        TokenKind::If => p.parse_if(label),
                        TokenKind::For => p.parse_for(label),
                        _ => Err(p.error("a label must be followed by `if` or `for`")),
                    }
                }
                TokenKind::Break | TokenKind::Continue => {
                    p.advance();
                    let target = if p.peek_kind() == TokenKind::LabelJump {
                        let jump = p.advance();
                        Some(p.text(&jump).to_string())
                    } else {
                        None
                    };
                    let kind = if token.kind == TokenKind::Break {
                        StatementKind::Break(target)
                    } else {
                        StatementKind::Continue(target)
                    };
                    p.statement(kind, token.position)
                }
                _ => Err(p.error("unexpected token in expression")),
            }
        })
    }

    /// After an opening `(`: a single expression, or a block when `;`
    /// separates lines.
    fn parse_group(&mut self, close: TokenKind) -> CoreResult<ExprId> {
        let position = self.peek().position;
        let ends = [close, TokenKind::Semi];
        let first = self.parse_line(&ends)?;
        if self.peek_kind() == close {
            self.advance();
            return Ok(first);
        }

        let mut lines = vec![first];
        while self.peek_kind() == TokenKind::Semi {
            self.advance();
            if self.peek_kind() == close {
                break;
            }
            lines.push(self.parse_line(&ends)?);
        }
        self.expect(close, "closing `)` of block")?;
        self.alloc(ExprKind::Block { lines, ty: None }, position)
    }

    /// One block line: an inline closure definition if it parses as one,
    /// otherwise an expression.
    fn parse_line(&mut self, ends: &[TokenKind]) -> CoreResult<ExprId> {
        if self.peek_kind().starts_type() {
            if let Some(closure) = self.speculate(|p| p.parse_closure(ends))? {
                return Ok(closure);
            }
        }
        self.parse_application(ends)
    }

    /// `Type name (= | #) application`
    fn parse_closure(&mut self, ends: &[TokenKind]) -> CoreResult<ExprId> {
        let position = self.peek().position;
        let ty = self.parse_type()?;
        let name = self.expect_name()?;
        let enclosing = match self.peek_kind() {
            TokenKind::Assign => false,
            TokenKind::Hash => true,
            _ => return Err(self.error("expected `=` or `#` in closure definition")),
        };
        self.advance();
        let body = self.parse_application(ends)?;
        let function = Function {
            name,
            ty,
            body,
            enclosing,
            lifted: false,
            position,
        };
        self.alloc(
            ExprKind::Closure {
                function,
                captures: Vec::new(),
            },
            position,
        )
    }

    /// After `[` or `{`: a literal if the contents are comma separated,
    /// otherwise a dereference / member access.
    fn parse_bracketed(&mut self, close: TokenKind) -> CoreResult<ExprId> {
        let position = self.peek().position;
        let literal = self.speculate(|p| p.parse_literal_members(close))?;
        if let Some(members) = literal {
            let literal = if close == TokenKind::RBracket {
                LiteralKind::Array(members)
            } else {
                LiteralKind::Struct(members)
            };
            return self.alloc(ExprKind::Literal { literal, ty: None }, position);
        }

        let inner = self.parse_application(&[close])?;
        self.expect(close, "closing bracket")?;
        let kind = if close == TokenKind::RBracket {
            ExprKind::Deref { inner, ty: None }
        } else {
            ExprKind::Access { inner, ty: None }
        };
        self.alloc(kind, position)
    }

    fn parse_literal_members(&mut self, close: TokenKind) -> CoreResult<Vec<ExprId>> {
        let mut members = Vec::new();
        let mut separated = false;
        loop {
            members.push(self.parse_application(&[TokenKind::Comma, close])?);
            if members.len() > self.limits.max_members {
                return Err(CoreError::limit("literal members", self.limits.max_members));
            }
            if self.peek_kind() == TokenKind::Comma {
                self.advance();
                separated = true;
                if self.peek_kind() == close {
                    break;
                }
                continue;
            }
            break;
        }
        if !separated {
            return Err(self.error("literal members must be separated by `,`"));
        }
        self.expect(close, "closing bracket of literal")?;
        Ok(members)
    }

    /// `\a b (body)` or `\a b -> body`.
    fn parse_lambda(&mut self, ends: &[TokenKind]) -> CoreResult<ExprId> {
        let position = self.advance().position;
        let mut params = Vec::new();
        let body = loop {
            let token = *self.peek();
            match token.kind {
                TokenKind::Ident => {
                    self.advance();
                    params.push(self.text(&token).to_string());
                }
                TokenKind::LParen => break self.parse_term()?,
                TokenKind::Arrow => {
                    self.advance();
                    break self.parse_application(ends)?;
                }
                _ => return Err(self.error("expected a parameter name, `(` or `->` in lambda")),
            }
        };
        if params.is_empty() {
            return Err(CoreError::Parse {
                position,
                token: "\\".to_string(),
                message: "a lambda needs at least one parameter".to_string(),
            });
        }
        if params.len() > self.limits.max_params {
            return Err(CoreError::limit("lambda parameters", self.limits.max_params));
        }
        self.alloc(
            ExprKind::Lambda(Lambda {
                params,
                body,
                ty: None,
            }),
            position,
        )
    }

    fn parse_sizeof(&mut self, position: Position) -> CoreResult<ExprId> {
        let target = match self.peek_kind() {
            TokenKind::Ident => SizeofTarget::Expr(self.parse_term()?),
            _ => match self.speculate(|p| p.parse_type())? {
                Some(ty) => SizeofTarget::Type(ty),
                None => SizeofTarget::Expr(self.parse_term()?),
            },
        };
        self.alloc(ExprKind::Sizeof { target, size: None }, position)
    }

    /// `if pred branch [else alternate]`
    fn parse_if(&mut self, label: Option<String>) -> CoreResult<ExprId> {
        let position = self.advance().position;
        let terms = self.parse_terms(2)?;
        let alternate = if self.peek_kind() == TokenKind::Else {
            self.advance();
            Some(self.parse_terms(1)?[0])
        } else {
            None
        };
        self.statement(
            StatementKind::If {
                predicate: terms[0],
                branch: terms[1],
                alternate,
                label,
            },
            position,
        )
    }

    /// `for start end step body`
    fn parse_for(&mut self, label: Option<String>) -> CoreResult<ExprId> {
        let position = self.advance().position;
        let terms = self.parse_terms(4)?;
        self.statement(
            StatementKind::For {
                start: terms[0],
                end: terms[1],
                step: terms[2],
                body: terms[3],
                label,
            },
            position,
        )
    }

    // ------------------------------------------------------------------
    // Speculation
    // ------------------------------------------------------------------

    /// Runs `attempt`; if it fails with a parse error, restores the cursor
    /// and both arenas to where they were and returns `Ok(None)`. Other
    /// errors (limits, imports) are fatal and propagate.
    pub fn speculate<T>(
        &mut self,
        attempt: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<Option<T>> {
        let cursor = self.cursor;
        let exprs = self.program.exprs.checkpoint();
        let strings = self.program.strings.checkpoint();
        match attempt(self) {
            Ok(value) => Ok(Some(value)),
            Err(err @ CoreError::Parse { .. }) => {
                let reached = self.cursor;
                trace!(from = cursor, reached, "speculative parse rolled back");
                if self.discarded.as_ref().is_none_or(|(at, _)| reached > *at) {
                    self.discarded = Some((reached, err));
                }
                self.cursor = cursor;
                self.program.exprs.rollback(exprs);
                self.program.strings.rollback(strings);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }

    /// Prefers a rolled-back failure that got further than `err`.
    fn most_specific(&mut self, err: CoreError) -> CoreError {
        if !matches!(err, CoreError::Parse { .. }) {
            return err;
        }
        match self.discarded.take() {
            Some((at, deeper)) if at > self.cursor => deeper,
            _ => err,
        }
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> CoreResult<T>) -> CoreResult<T> {
        if self.depth >= self.limits.max_depth {
            return Err(CoreError::limit("parser nesting depth", self.limits.max_depth));
        }
        self.depth += 1;
        let result = f(self);
        self.depth -= 1;
        result
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn alloc(&mut self, kind: ExprKind, position: Position) -> CoreResult<ExprId> {
        self.program.alloc(kind, position)
    }

    fn binding(&mut self, token: &Token) -> CoreResult<ExprId> {
        let name = self.text(token).to_string();
        self.alloc(ExprKind::Binding { name, ty: None }, token.position)
    }

    fn value(&mut self, numeral: Numeral, position: Position) -> CoreResult<ExprId> {
        self.alloc(ExprKind::Value { numeral, ty: None }, position)
    }

    fn statement(&mut self, kind: StatementKind, position: Position) -> CoreResult<ExprId> {
        self.alloc(ExprKind::Statement(Statement { kind, ty: None }), position)
    }

    fn wrap(&mut self, terms: Vec<ExprId>, position: Position) -> CoreResult<ExprId> {
        if terms.len() == 1 {
            return Ok(terms[0]);
        }
        self.alloc(ExprKind::Application { terms, ty: None }, position)
    }

    fn integer_value(&self, token: &Token) -> CoreResult<u64> {
        self.text(token)
            .parse::<u64>()
            .map_err(|_| self.error_at(token, "integer literal out of range"))
    }

    fn float_value(&self, token: &Token) -> CoreResult<f64> {
        self.text(token)
            .parse::<f64>()
            .map_err(|_| self.error_at(token, "malformed float literal"))
    }

    fn char_value(&self, token: &Token) -> u64 {
        self.text(token).bytes().next().map_or(0, u64::from)
    }

    fn text(&self, token: &Token) -> &'a str {
        self.tokens.text(token)
    }

    fn peek(&self) -> &'a Token {
        self.tokens.get(self.cursor)
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn advance(&mut self) -> Token {
        let token = *self.peek();
        if token.kind != TokenKind::Eof {
            self.cursor += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind, what: &str) -> CoreResult<Token> {
        if self.peek_kind() == kind {
            Ok(self.advance())
        } else {
            Err(self.error(&format!("expected {what}")))
        }
    }

    fn expect_ident(&mut self, what: &str) -> CoreResult<(String, Position)> {
        let token = self.expect(TokenKind::Ident, what)?;
        Ok((self.text(&token).to_string(), token.position))
    }

    /// A function name: identifier or operator.
    fn expect_name(&mut self) -> CoreResult<String> {
        let token = *self.peek();
        if token.kind == TokenKind::Ident || token.kind.is_operator() {
            self.advance();
            Ok(self.text(&token).to_string())
        } else {
            Err(self.error("expected a name"))
        }
    }

    fn error(&self, message: &str) -> CoreError {
        self.error_at(self.peek(), message)
    }

    fn error_at(&self, token: &Token, message: &str) -> CoreError {
        let text = match token.kind {
            TokenKind::Eof => "<eof>",
            _ => self.text(token),
        };
        CoreError::Parse {
            position: token.position,
            token: text.to_string(),
            message: message.to_string(),
        }
    }
}

fn primitive_of(kind: TokenKind) -> Option<Primitive> {
    Some(match kind {
        TokenKind::U8 => Primitive::U8,
        TokenKind::U16 => Primitive::U16,
        TokenKind::U32 => Primitive::U32,
        TokenKind::U64 => Primitive::U64,
        TokenKind::I8 => Primitive::I8,
        TokenKind::I16 => Primitive::I16,
        TokenKind::I32 => Primitive::I32,
        TokenKind::I64 => Primitive::I64,
        TokenKind::F32 => Primitive::F32,
        TokenKind::F64 => Primitive::F64,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;

    fn parse_with(source: &str, loader: &mut MemoryLoader) -> CoreResult<Program> {
        let limits = Limits::default();
        let mut program = Program::new(&limits);
        program.add_import("main", Position::default());
        parse_unit("main", source, &mut program, loader, &limits)?;
        Ok(program)
    }

    fn parse(source: &str) -> Program {
        parse_with(source, &mut MemoryLoader::new()).expect("parse")
    }

    fn parse_err(source: &str) -> CoreError {
        parse_with(source, &mut MemoryLoader::new()).unwrap_err()
    }

    /// Renders an expression as an s-expression for compact assertions.
    fn show(program: &Program, id: ExprId) -> String {
        let list = |ids: &[ExprId]| {
            ids.iter()
                .map(|&i| show(program, i))
                .collect::<Vec<_>>()
                .join(" ")
        };
        match &program.expr(id).kind {
            ExprKind::Binding { name, .. } => name.clone(),
            ExprKind::Value { numeral, .. } => match numeral {
                Numeral::Integer(v) => v.to_string(),
                Numeral::Float(v) => format!("{v:?}"),
            },
            ExprKind::Application { terms, .. } => format!("({})", list(terms)),
            ExprKind::Block { lines, .. } => format!("{{{}}}", list(lines)),
            ExprKind::Return { value, .. } => format!("(return {})", show(program, *value)),
            ExprKind::Lambda(l) => format!("(\\{} {})", l.params.join(" "), show(program, l.body)),
            ExprKind::Deref { inner, .. } => format!("[{}]", show(program, *inner)),
            ExprKind::Access { inner, .. } => format!("{{. {}}}", show(program, *inner)),
            ExprKind::Literal { literal, .. } => match literal {
                LiteralKind::String(r) => format!("{:?}", program.string(*r)),
                LiteralKind::Array(m) => format!("[, {}]", list(m)),
                LiteralKind::Struct(m) => format!("{{, {}}}", list(m)),
            },
            ExprKind::Nop => "=".into(),
            ExprKind::Closure { function, .. } => {
                format!("(def {} {})", function.name, show(program, function.body))
            }
            ExprKind::Statement(s) => match &s.kind {
                StatementKind::If { predicate, branch, alternate, label } => format!(
                    "(if{} {} {}{})",
                    label.as_ref().map(|l| format!(":{l}")).unwrap_or_default(),
                    show(program, *predicate),
                    show(program, *branch),
                    alternate.map(|a| format!(" {}", show(program, a))).unwrap_or_default()
                ),
                StatementKind::For { start, end, step, body, .. } => format!(
                    "(for {} {} {} {})",
                    show(program, *start),
                    show(program, *end),
                    show(program, *step),
                    show(program, *body)
                ),
                StatementKind::Break(l) => format!("(break {})", l.clone().unwrap_or_default()),
                StatementKind::Continue(l) => format!("(continue {})", l.clone().unwrap_or_default()),
            },
            ExprKind::Ref { target, .. } => format!("(ref {})", show(program, *target)),
            ExprKind::Cast { target, operand, .. } => format!("(cast {target} {})", show(program, *operand)),
            ExprKind::Sizeof { target, .. } => match target {
                SizeofTarget::Type(t) => format!("(sizeof {t})"),
                SizeofTarget::Expr(e) => format!("(sizeof {})", show(program, *e)),
            },
        }
    }

    fn body(program: &Program, name: &str) -> String {
        let f = program.function(name).expect("function");
        show(program, f.body)
    }

    #[test]
    fn parses_function_declaration() {
        let program = parse("i32 -> i32 inc = \\x (x + 1);");
        let f = program.function("inc").expect("inc");
        assert_eq!(f.ty.to_string(), "i32 -> i32");
        assert_eq!(body(&program, "inc"), "(\\x (+ x 1))");
    }

    #[test]
    fn operators_fold_left_without_precedence() {
        let program = parse("i32 r = a + b * c - d;");
        assert_eq!(body(&program, "r"), "(- (* (+ a b) c) d)");
    }

    #[test]
    fn dollar_splits_the_chain() {
        let program = parse("i32 r = f x $ g $ h y;");
        assert_eq!(body(&program, "r"), "(f x (g (h y)))");
    }

    #[test]
    fn lambda_arrow_form_takes_the_rest() {
        let program = parse("i32 -> i32 main = \\x -> x + 1;");
        assert_eq!(body(&program, "main"), "(\\x (+ x 1))");
    }

    #[test]
    fn semicolons_in_a_group_make_a_block() {
        let program = parse("i32 -> i32 f = \\x (i32 y = x + 1; y = y * 2; return y;);");
        assert_eq!(
            body(&program, "f"),
            "(\\x {(def y (+ x 1)) (y = (* y 2)) (return y)})"
        );
    }

    #[test]
    fn literal_or_access_is_decided_by_commas() {
        let program = parse("i32 a = {p x}; Pair b = {1, 2}; i32 c = [q]; [i32] d = [1, 2,];");
        assert_eq!(body(&program, "a"), "{. (p x)}");
        assert_eq!(body(&program, "b"), "{, 1 2}");
        assert_eq!(body(&program, "c"), "[q]");
        assert_eq!(body(&program, "d"), "[, 1 2]");
    }

    #[test]
    fn control_forms_gather_bounded_terms() {
        let program = parse(
            "i32 -> procedure f = \\n (outer: for 0 n (\\i (i + 1)) (\\i (if (i == 3) (break :outer) else (continue);););",
        );
        assert_eq!(
            body(&program, "f"),
            "(\\n {(for 0 n (\\i (+ i 1)) (\\i {(if (== i 3) (break outer) (continue ))}))})"
        );
    }

    #[test]
    fn else_if_chains() {
        let program = parse("i32 -> i32 f = \\x (if (x) (1) else if (x - 1) (2) else (3));");
        assert_eq!(body(&program, "f"), "(\\x (if x 1 (if (- x 1) 2 3)))");
    }

    #[test]
    fn parses_types() {
        let program = parse(
            "type Node { i32 value; [Node] next; [u8 16] name; };\n\
             alias Bytes [u8 N];\n\
             type Shape { i32 kind; circle { f64 r; } square = 4 { f64 side; } rect { f64 w; f64 h; } }\n\
             (i32 -> i32) -> i32 mut -> procedure apply = \\f x (f x);",
        );
        assert_eq!(
            program.types[0].ty.to_string(),
            "{ i32 value; [Node] next; [u8 16] name; }"
        );
        assert_eq!(program.aliases[0].ty.to_string(), "[u8 N]");
        let TypeKind::Struct(shape) = &program.types[1].ty.kind else {
            panic!("expected structure");
        };
        let tags: Vec<_> = shape
            .variants
            .iter()
            .map(|v| (v.name.as_str(), v.discriminant))
            .collect();
        assert_eq!(tags, vec![("circle", 0), ("square", 4), ("rect", 5)]);
        assert_eq!(
            program.function("apply").expect("apply").ty.to_string(),
            "(i32 -> i32) -> i32 mut -> procedure none"
        );
    }

    #[test]
    fn parses_constants_strings_and_chars() {
        let program = parse("constant N = 8; constant PI = 3.5; constant HELLO = \"hi\"; u8 c = 'a';");
        assert_eq!(program.constants.len(), 3);
        assert_eq!(program.constants[0].value, ConstValue::Integer(8));
        let ConstValue::String(range) = program.constants[2].value else {
            panic!("expected string constant");
        };
        assert_eq!(program.string(range), "hi");
        assert_eq!(body(&program, "c"), "97");
    }

    #[test]
    fn parses_ref_cast_and_sizeof() {
        let program = parse("u64 a = sizeof [i32 4]; u64 b = sizeof x; [i32] c = ref x; i64 d = cast i64 (y + 1);");
        assert_eq!(body(&program, "a"), "(sizeof [i32 4])");
        assert_eq!(body(&program, "b"), "(sizeof x)");
        assert_eq!(body(&program, "c"), "(ref x)");
        assert_eq!(body(&program, "d"), "(cast i64 (+ y 1))");
    }

    #[test]
    fn failed_speculation_restores_cursor_and_arena() {
        let limits = Limits::default();
        let mut program = Program::new(&limits);
        let mut loader = MemoryLoader::new();
        let tokens = lexer::lex("a b c").expect("lex");
        let mut parser = Parser::new(&tokens, &mut program, &mut loader, &limits);
        parser.advance();
        let before = parser.cursor;

        let mut sentinel = None;
        let attempt = parser
            .speculate(|p| {
                sentinel = Some(p.alloc(ExprKind::Nop, Position::default())?);
                p.program.strings.push_str("sentinel")?;
                p.advance();
                p.advance();
                Err::<(), _>(p.error("forced failure"))
            })
            .expect("not fatal");

        assert!(attempt.is_none());
        assert_eq!(parser.cursor, before);
        let sentinel = sentinel.expect("sentinel allocated");
        assert!(parser.program.exprs.try_get(sentinel).is_none());
        assert!(parser.program.strings.is_empty());
    }

    #[test]
    fn duplicate_names_across_kinds_are_rejected() {
        for source in [
            "type T i32; i32 T = 1;",
            "i32 T = 1; alias T i32;",
            "constant T = 1; type T i32;",
            "alias T i32; constant T = 2;",
        ] {
            let err = parse_err(source);
            assert!(matches!(err, CoreError::Semantic { .. }), "{source}: {err}");
        }
    }

    #[test]
    fn top_level_hash_is_rejected() {
        let err = parse_err("i32 x # 1;");
        assert!(matches!(err, CoreError::Parse { .. }));
    }

    #[test]
    fn reports_the_deepest_failure() {
        // The closure attempt gets as far as `]`; the expression fallback
        // fails right at `i32`. The closure's failure is the one reported.
        let err = parse_err("i32 -> i32 f = \\x (i32 y = x + ]; return y;);");
        match err {
            CoreError::Parse { token, position, .. } => {
                assert_eq!(token, "]");
                assert_eq!(position, Position::new(1, 32));
            }
            other => panic!("unexpected error {other}"),
        }
    }

    #[test]
    fn imports_are_merged_once() {
        let mut loader = MemoryLoader::new()
            .with_module("a", "using b; i32 from_a = 1;")
            .with_module("b", "using a; using main; i32 from_b = 2;");
        let program = parse_with("using a; using b; using a; i32 x = from_a;", &mut loader)
            .expect("parse");
        assert!(program.function("from_a").is_some());
        assert!(program.function("from_b").is_some());
        assert_eq!(program.functions.len(), 3);
        assert_eq!(loader.load_count("a"), 1);
        assert_eq!(loader.load_count("b"), 1);
        assert_eq!(loader.load_count("main"), 0);
    }

    #[test]
    fn errors_in_imports_name_the_module() {
        let mut loader = MemoryLoader::new().with_module("broken", "i32 x = ;");
        let err = parse_with("using broken;", &mut loader).unwrap_err();
        assert!(matches!(err, CoreError::InModule { ref module, .. } if module == "broken"));
        assert!(matches!(err.root(), CoreError::Parse { .. }));
    }

    #[test]
    fn missing_import_is_fatal() {
        let err = parse_err("using nowhere;");
        assert!(matches!(err, CoreError::ModuleNotFound { .. }));
    }

    #[test]
    fn nesting_depth_is_bounded() {
        let limits = Limits {
            max_depth: 16,
            ..Limits::default()
        };
        let mut program = Program::new(&limits);
        let source = format!("i32 x = {}1{};", "(".repeat(40), ")".repeat(40));
        let err = parse_unit("main", &source, &mut program, &mut MemoryLoader::new(), &limits)
            .unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded { .. }));
    }

    #[test]
    fn right_nested_chains_are_depth_bounded() {
        let limits = Limits {
            max_depth: 64,
            ..Limits::default()
        };
        let sources = [
            format!("i32 y = {}1;", "\\a -> ".repeat(20_000)),
            format!("i32 y = {}1;", "f $ ".repeat(20_000)),
            format!("i32 y = {}1;", "return ".repeat(20_000)),
            format!("i32 y = {}1;", "x = ".repeat(20_000)),
        ];
        for source in &sources {
            let mut program = Program::new(&limits);
            let err = parse_unit("main", source, &mut program, &mut MemoryLoader::new(), &limits)
                .unwrap_err();
            assert!(
                matches!(err, CoreError::LimitExceeded { limit: 64, .. }),
                "{}: {err}",
                &source[..16]
            );
        }
    }

    #[test]
    fn short_right_nested_chains_still_parse() {
        parse("i32 y = f $ g $ h 1;");
        parse("i32 -> i32 -> i32 add = \\a -> \\b -> a + b;");
    }
}
