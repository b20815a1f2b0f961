//! Semantic analysis.
//!
//! A single recursive pass over every top-level function resolves names,
//! checks types bidirectionally (`resolve(expr, expected)`), records
//! captures, lifts lambdas (see [`crate::lift`]) and validates jumps.
//! Every type-carrying node caches its type the first time it is resolved;
//! later resolutions only re-check the cached type against the new
//! expectation.

use tracing::{debug, info};

use crate::ast::{
    Capture, ConstValue, ExprId, ExprKind, Lambda, LiteralKind, Numeral, Program, SizeofTarget,
    Statement, StatementKind,
};
use crate::builtins::find_builtin;
use crate::config::Limits;
use crate::error::{CoreError, CoreResult};
use crate::layout::{self, layout_of};
use crate::scope::{CaptureFrame, Scope};
use crate::span::Position;
use crate::types::{
    resolve_named, types_match, BufferCount, CmpPurpose, Primitive, Structure, Type, TypeKind,
};

/// Runs the declaration checks and analyses every function of `program`.
pub fn analyze(program: &mut Program, limits: &Limits) -> CoreResult<()> {
    layout::prepare(program, limits)?;
    let mut analyzer = Analyzer::new(program, limits);
    let mut index = 0;
    // Lifted functions are appended while we go and are already analysed.
    while index < analyzer.program.functions.len() {
        let function = &analyzer.program.functions[index];
        if !function.lifted {
            let (name, ty, body) = (function.name.clone(), function.ty.clone(), function.body);
            debug!(name = %name, ty = %ty, "analysing function");
            analyzer.check_function(&ty, body)?;
        }
        index += 1;
    }
    info!(
        functions = analyzer.program.functions.len(),
        lifted = analyzer.program.lifted_functions().count(),
        "analysis complete"
    );
    Ok(())
}

/// How a lambda relates to the code around it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LambdaRole {
    /// Direct body of a top-level function.
    TopLevel,
    /// `for` step or body: sees the enclosing bindings and labels directly.
    Inline,
    /// Everything else: becomes a top-level function of its own.
    Lifted,
}

/// Parameter types and (if known) result type a lambda is checked against.
#[derive(Debug, Clone)]
pub(crate) struct Signature {
    pub params: Vec<Type>,
    pub result: Option<Type>,
}

pub(crate) struct Analyzer<'p> {
    pub(crate) program: &'p mut Program,
    pub(crate) scope: Scope,
    limits: &'p Limits,
    depth: usize,
}

impl<'p> Analyzer<'p> {
    pub(crate) fn new(program: &'p mut Program, limits: &'p Limits) -> Self {
        Analyzer {
            program,
            scope: Scope::new(limits),
            limits,
            depth: 0,
        }
    }

    fn check_function(&mut self, ty: &Type, body: ExprId) -> CoreResult<()> {
        let at = self.position(body);
        match self.lambda_arity(body) {
            Some(arity) => {
                let signature = self.signature_for(arity, ty, at)?;
                self.resolve_lambda(body, signature, LambdaRole::TopLevel, None)?;
            }
            None => {
                self.resolve_body(body, Some(ty))?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    fn with_frame<T>(&mut self, f: impl FnOnce(&mut Self) -> CoreResult<T>) -> CoreResult<T> {
        let mark = self.scope.mark();
        let result = f(self);
        self.scope.restore(mark);
        result
    }

    fn with_label<T>(
        &mut self,
        label: Option<&str>,
        is_loop: bool,
        at: Position,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<T> {
        self.scope.push_label(label, is_loop, at)?;
        let result = f(self);
        self.scope.pop_label();
        result
    }

    /// Runs `f` inside a fresh capture frame and closure boundary and
    /// returns the captures it recorded.
    fn with_capture_frame<T>(
        &mut self,
        self_binding: Option<usize>,
        at: Position,
        f: impl FnOnce(&mut Self) -> CoreResult<T>,
    ) -> CoreResult<(T, CaptureFrame)> {
        self.scope.push_capture_frame(self_binding)?;
        self.scope.push_boundary();
        let result = f(self);
        self.scope.pop_boundary();
        let frame = self.scope.pop_capture_frame();
        let value = result?;
        let frame = frame.ok_or_else(|| CoreError::semantic(at, "capture frame stack underflow"))?;
        Ok((value, frame))
    }

    // ------------------------------------------------------------------
    // Type helpers
    // ------------------------------------------------------------------

    pub(crate) fn position(&self, id: ExprId) -> Position {
        self.program.expr(id).position
    }

    /// Parameter count of `id` if it is a lambda not analysed yet.
    fn lambda_arity(&self, id: ExprId) -> Option<usize> {
        match &self.program.expr(id).kind {
            ExprKind::Lambda(Lambda { params, ty: None, .. }) => Some(params.len()),
            _ => None,
        }
    }

    /// `ty` with type names followed to their definition.
    fn structural(&self, ty: &Type, at: Position) -> CoreResult<Type> {
        resolve_named(ty, &*self.program, self.limits.max_alias_depth, at).cloned()
    }

    fn compatible(&self, expected: &Type, actual: &Type, purpose: CmpPurpose, at: Position) -> CoreResult<bool> {
        types_match(expected, actual, purpose, &*self.program, self.limits.max_alias_depth, at)
    }

    fn expect_type(&self, expected: &Type, actual: &Type, at: Position) -> CoreResult<()> {
        if self.compatible(expected, actual, CmpPurpose::Application, at)? {
            Ok(())
        } else {
            Err(CoreError::semantic(
                at,
                format!("mismatched types: expected `{expected}`, found `{actual}`"),
            ))
        }
    }

    /// Checks `actual` against `expected` and lets a concrete expected
    /// primitive replace a placeholder.
    fn check_against(&self, expected: Option<&Type>, actual: Type, at: Position) -> CoreResult<Type> {
        let Some(expected) = expected else {
            return Ok(actual);
        };
        self.expect_type(expected, &actual, at)?;
        if actual.is_placeholder() {
            let concrete = self.structural(expected, at)?;
            if concrete.as_primitive().is_some_and(|p| !p.is_placeholder()) {
                return Ok(expected.clone().with_mut(actual.mutable));
            }
        }
        Ok(actual)
    }

    fn require_integer(&self, ty: &Type, at: Position) -> CoreResult<()> {
        match self.structural(ty, at)?.as_primitive() {
            Some(p) if p.is_integer() => Ok(()),
            _ => Err(CoreError::semantic(
                at,
                format!("expected an integer, found `{ty}`"),
            )),
        }
    }

    /// Peels `params` arrows off `expected`.
    pub(crate) fn signature_for(&self, params: usize, expected: &Type, at: Position) -> CoreResult<Signature> {
        let mut types = Vec::with_capacity(params);
        let mut current = expected.clone();
        for _ in 0..params {
            let function = self.structural(&current, at)?;
            let Some((param, rest)) = function.as_function() else {
                return Err(CoreError::semantic(
                    at,
                    format!(
                        "lambda takes {params} parameters but `{expected}` accepts only {}",
                        types.len()
                    ),
                ));
            };
            types.push(param.clone());
            current = rest.clone();
        }
        Ok(Signature {
            params: types,
            result: Some(current),
        })
    }

    fn store(&mut self, id: ExprId, resolved: Type) -> Type {
        let slot = match &mut self.program.expr_mut(id).kind {
            ExprKind::Block { ty, .. }
            | ExprKind::Application { ty, .. }
            | ExprKind::Binding { ty, .. }
            | ExprKind::Value { ty, .. }
            | ExprKind::Literal { ty, .. }
            | ExprKind::Deref { ty, .. }
            | ExprKind::Access { ty, .. }
            | ExprKind::Return { ty, .. }
            | ExprKind::Ref { ty, .. }
            | ExprKind::Cast { ty, .. } => ty,
            ExprKind::Lambda(lambda) => &mut lambda.ty,
            ExprKind::Statement(statement) => &mut statement.ty,
            ExprKind::Closure { .. } | ExprKind::Sizeof { .. } | ExprKind::Nop => return resolved,
        };
        *slot = Some(resolved.clone());
        resolved
    }

    // ------------------------------------------------------------------
    // Expressions
    // ------------------------------------------------------------------

    /// Resolves the type of `id`, checking it against `expected` if given.
    pub(crate) fn resolve(&mut self, id: ExprId, expected: Option<&Type>) -> CoreResult<Type> {
        let at = self.position(id);
        let cached = match &self.program.expr(id).kind {
            ExprKind::Sizeof { size: Some(_), .. } => Some(Type::primitive(Primitive::U64)),
            kind => kind.cached_type().cloned(),
        };
        if let Some(cached) = cached {
            if let Some(expected) = expected {
                self.expect_type(expected, &cached, at)?;
            }
            return Ok(cached);
        }
        if self.depth >= self.limits.max_depth {
            return Err(CoreError::limit("analysis depth", self.limits.max_depth));
        }
        self.depth += 1;
        let result = self.resolve_uncached(id, expected, at);
        self.depth -= 1;
        let resolved = result?;
        Ok(self.store(id, resolved))
    }

    fn resolve_uncached(&mut self, id: ExprId, expected: Option<&Type>, at: Position) -> CoreResult<Type> {
        let kind = self.program.expr(id).kind.clone();
        match kind {
            ExprKind::Value { numeral, .. } => {
                let ty = match numeral {
                    Numeral::Integer(_) => Type::int_any(),
                    Numeral::Float(_) => Type::float_any(),
                };
                self.check_against(expected, ty, at)
            }
            ExprKind::Binding { name, .. } => {
                let ty = self.resolve_name(id, &name, at)?;
                self.check_against(expected, ty, at)
            }
            ExprKind::Application { terms, .. } => self.resolve_application(&terms, expected, at),
            ExprKind::Block { lines, .. } => self.resolve_block(&lines, expected),
            ExprKind::Statement(statement) => self.resolve_statement_value(statement, expected, at),
            ExprKind::Literal { literal, .. } => self.resolve_literal(literal, expected, at),
            ExprKind::Deref { inner, .. } => {
                let ty = self.resolve_deref(inner, at)?;
                self.check_against(expected, ty, at)
            }
            ExprKind::Access { inner, .. } => {
                let ty = self.resolve_access(inner, at)?;
                self.check_against(expected, ty, at)
            }
            ExprKind::Lambda(lambda) => {
                let Some(expected) = expected else {
                    return Err(CoreError::semantic(
                        at,
                        "cannot infer the parameter types of this lambda",
                    ));
                };
                let signature = self.signature_for(lambda.params.len(), expected, at)?;
                let (ty, _) = self.resolve_lambda(id, signature, LambdaRole::Lifted, None)?;
                self.check_against(Some(expected), ty, at)
            }
            ExprKind::Return { value, .. } => self.resolve(value, expected),
            ExprKind::Ref { target, .. } => {
                if !matches!(
                    self.program.expr(target).kind,
                    ExprKind::Binding { .. } | ExprKind::Deref { .. } | ExprKind::Access { .. }
                ) {
                    return Err(CoreError::semantic(
                        at,
                        "`ref` needs a binding, dereference or member access",
                    ));
                }
                let ty = self.resolve(target, None)?;
                self.check_against(expected, Type::pointer(ty), at)
            }
            ExprKind::Cast { target, operand, .. } => {
                let from = self.resolve(operand, None)?;
                self.check_cast(&from, &target, at)?;
                self.check_against(expected, target, at)
            }
            ExprKind::Sizeof { target, .. } => {
                let size = self.resolve_sizeof(target, at)?;
                if let ExprKind::Sizeof { size: slot, .. } = &mut self.program.expr_mut(id).kind {
                    *slot = Some(size);
                }
                self.check_against(expected, Type::primitive(Primitive::U64), at)
            }
            ExprKind::Closure { .. } => {
                self.resolve_closure(id)?;
                Ok(Type::none())
            }
            ExprKind::Nop => Ok(Type::none()),
        }
    }

    /// Scope bindings first, then functions and constants.
    fn resolve_name(&mut self, id: ExprId, name: &str, at: Position) -> CoreResult<Type> {
        let local = self
            .scope
            .lookup(name)
            .map(|(index, entry)| (index, entry.ty.clone()));
        if let Some((index, ty)) = local {
            self.scope.note_reference(index, id)?;
            return Ok(ty);
        }
        if let Some(function) = self.program.function(name) {
            return Ok(function.ty.clone());
        }
        if let Some(constant) = self.program.constant(name) {
            return Ok(match constant.value {
                ConstValue::Integer(_) => Type::int_any(),
                ConstValue::Float(_) => Type::float_any(),
                ConstValue::String(_) => Type::pointer(Type::primitive(Primitive::I8)),
            });
        }
        Err(CoreError::semantic(at, format!("unknown name `{name}`")))
    }

    fn is_mutation(&self, terms: &[ExprId]) -> bool {
        terms.len() == 3 && matches!(self.program.expr(terms[1]).kind, ExprKind::Nop)
    }

    fn resolve_application(&mut self, terms: &[ExprId], expected: Option<&Type>, at: Position) -> CoreResult<Type> {
        if self.is_mutation(terms) {
            return self.resolve_mutation(terms[0], terms[2], expected, at);
        }
        let Some((&head, args)) = terms.split_first() else {
            return Err(CoreError::semantic(at, "empty application"));
        };

        let mut current = match self.lambda_arity(head) {
            Some(arity) => {
                if args.len() < arity {
                    return Err(CoreError::semantic(
                        at,
                        format!("lambda takes {arity} parameters but is applied to {}", args.len()),
                    ));
                }
                let result = if args.len() == arity { expected.cloned() } else { None };
                let mut params = Vec::with_capacity(arity);
                for &arg in &args[..arity] {
                    let ty = self.resolve(arg, None)?;
                    params.push(self.settle_placeholder(ty, result.as_ref(), at)?);
                }
                let signature = Signature { params, result };
                self.resolve_lambda(head, signature, LambdaRole::Lifted, None)?.0
            }
            None => self.resolve(head, None)?,
        };

        for &arg in args {
            let function = self.structural(&current, at)?;
            let Some((param, rest)) = function.as_function() else {
                return Err(CoreError::semantic(
                    self.position(arg),
                    format!("`{current}` cannot be applied to another argument"),
                ));
            };
            let (param, rest) = (param.clone(), rest.clone());
            let arg_ty = self.resolve(arg, Some(&param))?;
            current = match self.structural(&param, at)?.as_primitive() {
                Some(p) if p.is_placeholder() => {
                    let concrete = self.structural(&arg_ty, at)?;
                    if concrete.as_primitive().is_some_and(|q| !q.is_placeholder()) {
                        rest.specialize(p, &concrete.with_mut(false))
                    } else {
                        rest
                    }
                }
                _ => rest,
            };
        }
        self.check_against(expected, current, at)
    }

    /// Parameter type for an untyped literal passed to an applied lambda:
    /// the expected result's primitive if it belongs to the same family,
    /// otherwise `i64` / `f64`.
    fn settle_placeholder(&self, ty: Type, hint: Option<&Type>, at: Position) -> CoreResult<Type> {
        let Some(placeholder) = ty.as_primitive().filter(|p| p.is_placeholder()) else {
            return Ok(ty);
        };
        if let Some(hint) = hint {
            if let Some(p) = self.structural(hint, at)?.as_primitive() {
                if !p.is_placeholder() && p.is_integer() == placeholder.is_integer() {
                    return Ok(Type::primitive(p));
                }
            }
        }
        Ok(Type::primitive(if placeholder.is_integer() {
            Primitive::I64
        } else {
            Primitive::F64
        }))
    }

    fn resolve_mutation(
        &mut self,
        target: ExprId,
        value: ExprId,
        expected: Option<&Type>,
        at: Position,
    ) -> CoreResult<Type> {
        if let Some(expected) = expected.filter(|t| !t.is_none() && !t.is_procedure()) {
            return Err(CoreError::semantic(
                at,
                format!("assignment does not produce a value of type `{expected}`"),
            ));
        }
        let target_ty = self.resolve(target, None)?;
        let value_ty = self.resolve(value, Some(&target_ty))?;
        if !self.compatible(&target_ty, &value_ty, CmpPurpose::Mutation, at)? {
            return Err(CoreError::semantic(
                at,
                format!("cannot assign through a value of type `{target_ty}`: it is not `mut`"),
            ));
        }
        Ok(Type::none())
    }

    // ------------------------------------------------------------------
    // Blocks and statements
    // ------------------------------------------------------------------

    /// A block yields the value of its final `return`. Untyped and
    /// procedure blocks may end in any line.
    fn resolve_block(&mut self, lines: &[ExprId], expected: Option<&Type>) -> CoreResult<Type> {
        let expected = expected.filter(|t| !t.is_none());
        let procedure = match expected {
            Some(t) => match &t.kind {
                TypeKind::Procedure(base) => Some(base.as_ref().clone()),
                _ => None,
            },
            None => None,
        };
        let returns = match (&procedure, expected) {
            (Some(base), _) => Some(base.clone()),
            (None, other) => other.cloned(),
        };

        self.with_frame(|a| {
            let Some((&last, init)) = lines.split_last() else {
                return Ok(Type::none());
            };
            for &line in init {
                a.resolve_line(line, returns.as_ref())?;
            }
            if a.program.expr(last).kind.is_return() {
                let value = a.resolve_return(last, returns.as_ref())?;
                return Ok(match (procedure.is_some(), expected) {
                    (true, Some(t)) => t.clone(),
                    _ => value,
                });
            }
            match expected {
                None => {
                    a.resolve_line(last, None)?;
                    Ok(Type::none())
                }
                Some(t) if procedure.is_some() => {
                    a.resolve_line(last, returns.as_ref())?;
                    Ok(t.clone())
                }
                Some(t) => Err(CoreError::semantic(
                    a.position(last),
                    format!("a block of type `{t}` must end with `return`"),
                )),
            }
        })
    }

    /// One line of a block. `returns` is the type a `return` anywhere in it
    /// must produce.
    fn resolve_line(&mut self, line: ExprId, returns: Option<&Type>) -> CoreResult<()> {
        match &self.program.expr(line).kind {
            ExprKind::Statement(_) => self.resolve_statement_line(line, returns),
            ExprKind::Closure { .. } => self.resolve_closure(line),
            ExprKind::Return { .. } => self.resolve_return(line, returns).map(drop),
            _ => self.resolve(line, None).map(drop),
        }
    }

    /// `return value` where the enclosing body produces `returns`. A
    /// procedure returning nothing has nothing to return.
    fn resolve_return(&mut self, id: ExprId, returns: Option<&Type>) -> CoreResult<Type> {
        if returns.is_some_and(Type::is_none) {
            return Err(CoreError::semantic(
                self.position(id),
                "`return` with a value inside a procedure that returns nothing",
            ));
        }
        self.resolve(id, returns)
    }

    /// A statement branch: a block's lines are lines of the enclosing block
    /// as far as `return` is concerned.
    fn resolve_branch(&mut self, branch: ExprId, returns: Option<&Type>) -> CoreResult<()> {
        match &self.program.expr(branch).kind {
            ExprKind::Block { lines, ty: None } => {
                let lines = lines.clone();
                self.with_frame(|a| {
                    for line in lines {
                        a.resolve_line(line, returns)?;
                    }
                    Ok(())
                })?;
                self.store(branch, Type::none());
                Ok(())
            }
            ExprKind::Block { .. } => Ok(()),
            _ => self.resolve_line(branch, returns),
        }
    }

    fn check_predicate(&mut self, predicate: ExprId) -> CoreResult<()> {
        let ty = self.resolve(predicate, None)?;
        self.require_integer(&ty, self.position(predicate))
    }

    fn resolve_statement_line(&mut self, id: ExprId, returns: Option<&Type>) -> CoreResult<()> {
        let at = self.position(id);
        let ExprKind::Statement(Statement { kind, ty: None }) = self.program.expr(id).kind.clone() else {
            return Ok(());
        };
        match kind {
            StatementKind::If {
                predicate,
                branch,
                alternate,
                label,
            } => {
                self.check_predicate(predicate)?;
                self.with_label(label.as_deref(), false, at, |a| {
                    a.resolve_branch(branch, returns)?;
                    if let Some(alternate) = alternate {
                        a.resolve_branch(alternate, returns)?;
                    }
                    Ok(())
                })?;
            }
            StatementKind::For {
                start,
                end,
                step,
                body,
                label,
            } => self.resolve_for(start, end, step, body, label.as_deref(), at)?,
            StatementKind::Break(label) => self.scope.check_jump(label.as_deref(), false, at)?,
            StatementKind::Continue(label) => self.scope.check_jump(label.as_deref(), true, at)?,
        }
        self.store(id, Type::none());
        Ok(())
    }

    /// A statement used where a value is expected.
    fn resolve_statement_value(
        &mut self,
        statement: Statement,
        expected: Option<&Type>,
        at: Position,
    ) -> CoreResult<Type> {
        let procedure = expected.filter(|t| t.is_procedure() || t.is_none());
        match statement.kind {
            StatementKind::If {
                predicate,
                branch,
                alternate,
                label,
            } => {
                self.check_predicate(predicate)?;
                self.with_label(label.as_deref(), false, at, |a| match alternate {
                    None => match procedure {
                        Some(t) => {
                            let returns = match &t.kind {
                                TypeKind::Procedure(base) => base.as_ref().clone(),
                                _ => Type::none(),
                            };
                            a.resolve_branch(branch, Some(&returns))?;
                            Ok(t.clone())
                        }
                        None => Err(CoreError::semantic(
                            at,
                            "`if` used as a value needs an `else` branch",
                        )),
                    },
                    Some(alternate) => {
                        let then = a.resolve(branch, expected)?;
                        let other = a.resolve(alternate, expected.or(Some(&then)))?;
                        if expected.is_none()
                            && !a.compatible(&then, &other, CmpPurpose::Equality, at)?
                        {
                            return Err(CoreError::semantic(
                                at,
                                format!("`if` branches have different types: `{then}` and `{other}`"),
                            ));
                        }
                        Ok(if then.is_placeholder() { other } else { then })
                    }
                })
            }
            StatementKind::For {
                start,
                end,
                step,
                body,
                label,
            } => {
                if expected.is_some() && procedure.is_none() {
                    return Err(CoreError::semantic(at, "`for` does not produce a value"));
                }
                self.resolve_for(start, end, step, body, label.as_deref(), at)?;
                Ok(procedure.cloned().unwrap_or_else(Type::none))
            }
            // Jumps never produce a value, so they fit any expectation.
            StatementKind::Break(label) => {
                self.scope.check_jump(label.as_deref(), false, at)?;
                Ok(Type::any())
            }
            StatementKind::Continue(label) => {
                self.scope.check_jump(label.as_deref(), true, at)?;
                Ok(Type::any())
            }
        }
    }

    /// `for start end step body`: `step : I -> I`, `body : I -> procedure`.
    fn resolve_for(
        &mut self,
        start: ExprId,
        end: ExprId,
        step: ExprId,
        body: ExprId,
        label: Option<&str>,
        at: Position,
    ) -> CoreResult<()> {
        let start_ty = self.resolve(start, None)?;
        self.require_integer(&start_ty, self.position(start))?;
        let end_ty = self.resolve(end, Some(&start_ty))?;
        let index = (if start_ty.is_placeholder() { end_ty } else { start_ty }).with_mut(false);

        self.with_label(label, true, at, |a| {
            let step_ty = Type::function(index.clone(), index.clone());
            a.resolve_inline(step, &step_ty)?;
            let body_ty = Type::function(index.clone(), Type::procedure(Type::none()));
            a.resolve_inline(body, &body_ty)
        })
    }

    fn resolve_inline(&mut self, id: ExprId, expected: &Type) -> CoreResult<()> {
        let at = self.position(id);
        match self.lambda_arity(id) {
            Some(arity) => {
                let signature = self.signature_for(arity, expected, at)?;
                self.resolve_lambda(id, signature, LambdaRole::Inline, None)?;
            }
            None => {
                self.resolve(id, Some(expected))?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Lambdas and closures
    // ------------------------------------------------------------------

    /// Checks a lambda against `signature`. Lifted lambdas are rewritten
    /// into a reference to their new top-level function; the captures that
    /// function takes are returned alongside the lambda's type.
    pub(crate) fn resolve_lambda(
        &mut self,
        id: ExprId,
        signature: Signature,
        role: LambdaRole,
        self_binding: Option<usize>,
    ) -> CoreResult<(Type, Vec<Capture>)> {
        let at = self.position(id);
        let Lambda { params, body, ty } = match &self.program.expr(id).kind {
            ExprKind::Lambda(lambda) => lambda.clone(),
            _ => return Err(CoreError::semantic(at, "expected a lambda")),
        };
        if let Some(ty) = ty {
            return Ok((ty, Vec::new()));
        }
        if params.len() > self.limits.max_params {
            return Err(CoreError::limit("lambda parameters", self.limits.max_params));
        }

        match role {
            LambdaRole::TopLevel | LambdaRole::Inline => {
                let result = self.lambda_body(&params, &signature, body)?;
                let ty = Type::curried(signature.params, result);
                Ok((self.store(id, ty), Vec::new()))
            }
            LambdaRole::Lifted => {
                let (result, frame) = self.with_capture_frame(self_binding, at, |a| {
                    a.lambda_body(&params, &signature, body)
                })?;
                let ty = Type::curried(signature.params.iter().cloned(), result);
                let captures = self.lift(id, &params, body, ty.clone(), frame)?;
                Ok((ty, captures))
            }
        }
    }

    fn lambda_body(&mut self, params: &[String], signature: &Signature, body: ExprId) -> CoreResult<Type> {
        self.with_frame(|a| {
            for (name, ty) in params.iter().zip(&signature.params) {
                a.scope.push(name, ty.clone())?;
            }
            a.resolve_body(body, signature.result.as_ref())
        })
    }

    /// Body of a function or lambda returning `result`.
    fn resolve_body(&mut self, body: ExprId, result: Option<&Type>) -> CoreResult<Type> {
        match result {
            Some(r) if r.is_procedure() => {
                if matches!(self.program.expr(body).kind, ExprKind::Block { .. }) {
                    self.resolve(body, Some(r))?;
                } else {
                    let base = match &r.kind {
                        TypeKind::Procedure(base) => Some(base.as_ref().clone()),
                        _ => None,
                    };
                    self.resolve_line(body, base.as_ref())?;
                }
                Ok(r.clone())
            }
            _ => self.resolve(body, result),
        }
    }

    /// `T name = value` inside a block. The name is bound before a lambda
    /// value is analysed so the lambda can call itself.
    fn resolve_closure(&mut self, id: ExprId) -> CoreResult<()> {
        let at = self.position(id);
        let ExprKind::Closure { function, .. } = self.program.expr(id).kind.clone() else {
            return Ok(());
        };
        if find_builtin(&function.name).is_some() {
            return Err(CoreError::semantic(
                at,
                format!("cannot redefine builtin operator `{}`", function.name),
            ));
        }
        if self.scope.binds_local(&function.name) {
            return Err(CoreError::semantic(
                at,
                format!("`{}` shadows a binding already in scope", function.name),
            ));
        }

        match self.lambda_arity(function.body) {
            Some(arity) => {
                let index = self.scope.push(&function.name, function.ty.clone())?;
                let signature = self.signature_for(arity, &function.ty, at)?;
                let (_, captures) =
                    self.resolve_lambda(function.body, signature, LambdaRole::Lifted, Some(index))?;
                if let ExprKind::Closure { captures: slot, .. } = &mut self.program.expr_mut(id).kind {
                    *slot = captures;
                }
            }
            None => {
                self.resolve(function.body, Some(&function.ty))?;
                self.scope.push(&function.name, function.ty.clone())?;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Literals
    // ------------------------------------------------------------------

    fn resolve_literal(&mut self, literal: LiteralKind, expected: Option<&Type>, at: Position) -> CoreResult<Type> {
        match literal {
            LiteralKind::String(range) => self.resolve_string(range.len(), expected, at),
            LiteralKind::Array(members) => self.resolve_array(&members, expected, at),
            LiteralKind::Struct(members) => {
                let Some(expected) = expected else {
                    return Err(CoreError::semantic(
                        at,
                        "cannot infer the type of a struct literal",
                    ));
                };
                let Type {
                    kind: TypeKind::Struct(structure),
                    ..
                } = self.structural(expected, at)?
                else {
                    return Err(CoreError::semantic(
                        at,
                        format!("expected `{expected}`, found a struct literal"),
                    ));
                };
                self.bind_struct_members(*structure, &members, at)?;
                Ok(expected.clone())
            }
        }
    }

    fn resolve_string(&mut self, len: usize, expected: Option<&Type>, at: Position) -> CoreResult<Type> {
        let Some(expected) = expected else {
            return Ok(Type::pointer(Type::primitive(Primitive::I8)));
        };
        let mismatch = || CoreError::semantic(at, format!("expected `{expected}`, found a string literal"));
        let (base, capacity) = match self.structural(expected, at)?.kind {
            TypeKind::Pointer(base) => (base, None),
            TypeKind::Buffer(base, BufferCount::Known(n)) => (base, Some(n)),
            _ => return Err(mismatch()),
        };
        if !matches!(
            self.structural(&base, at)?.as_primitive(),
            Some(Primitive::I8 | Primitive::U8)
        ) {
            return Err(mismatch());
        }
        if capacity.is_some_and(|n| (len as u64) > n) {
            return Err(CoreError::semantic(
                at,
                format!("string literal of {len} bytes does not fit in `{expected}`"),
            ));
        }
        Ok(expected.clone())
    }

    fn resolve_array(&mut self, members: &[ExprId], expected: Option<&Type>, at: Position) -> CoreResult<Type> {
        let Some(expected) = expected else {
            let Some((&first, rest)) = members.split_first() else {
                return Err(CoreError::semantic(at, "cannot infer the type of an empty array"));
            };
            let mut element = self.resolve(first, None)?;
            for &member in rest {
                let ty = self.resolve(member, Some(&element))?;
                if element.is_placeholder() && !ty.is_placeholder() {
                    element = ty;
                }
            }
            return Ok(Type::buffer(element, members.len() as u64));
        };
        let (element, capacity) = match self.structural(expected, at)?.kind {
            TypeKind::Pointer(base) => (*base, None),
            TypeKind::Buffer(base, BufferCount::Known(n)) => (*base, Some(n)),
            _ => {
                return Err(CoreError::semantic(
                    at,
                    format!("expected `{expected}`, found an array literal"),
                ))
            }
        };
        if let Some(capacity) = capacity {
            if members.len() as u64 > capacity {
                return Err(CoreError::semantic(
                    at,
                    format!(
                        "array literal has {} elements but `{expected}` holds {capacity}",
                        members.len()
                    ),
                ));
            }
        }
        for &member in members {
            self.resolve(member, Some(&element))?;
        }
        Ok(expected.clone())
    }

    /// Binds positional values to fields. A bare variant tag descends into
    /// that variant; once a variant's fields are used up, binding continues
    /// in the structure that contains it.
    fn bind_struct_members(&mut self, root: Structure, members: &[ExprId], at: Position) -> CoreResult<()> {
        let mut frames: Vec<(Structure, usize)> = vec![(root, 0)];
        for &member in members {
            let tag = match &self.program.expr(member).kind {
                ExprKind::Binding { name, ty: None } => frames
                    .last()
                    .and_then(|(s, _)| s.variant(name))
                    .map(|v| v.body.clone()),
                _ => None,
            };
            if let Some(body) = tag {
                if frames.len() > self.limits.max_struct_nesting {
                    return Err(CoreError::limit(
                        "variant nesting in a struct literal",
                        self.limits.max_struct_nesting,
                    ));
                }
                frames.push((body, 0));
                continue;
            }

            loop {
                match frames.last() {
                    Some((s, used)) if *used < s.fields.len() => break,
                    _ if frames.len() > 1 => {
                        frames.pop();
                    }
                    _ => {
                        return Err(CoreError::semantic(
                            self.position(member),
                            format!("too many values in struct literal ({} given)", members.len()),
                        ))
                    }
                }
            }
            let Some((s, used)) = frames.last_mut() else {
                return Err(CoreError::semantic(at, "struct literal lost its structure"));
            };
            let field_ty = s.fields[*used].ty.clone();
            *used += 1;
            self.resolve(member, Some(&field_ty))?;
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Memory access
    // ------------------------------------------------------------------

    /// Terms of a bracketed expression.
    fn inner_terms(&self, inner: ExprId) -> Vec<ExprId> {
        match &self.program.expr(inner).kind {
            ExprKind::Application { terms, .. } if !self.is_mutation(terms) => terms.clone(),
            _ => vec![inner],
        }
    }

    fn names_member(&self, structure: &Type, term: ExprId) -> bool {
        let (TypeKind::Struct(s), ExprKind::Binding { name, .. }) =
            (&structure.kind, &self.program.expr(term).kind)
        else {
            return false;
        };
        s.field(name).is_some() || s.variant(name).is_some()
    }

    fn pointee(&self, ty: &Type, at: Position) -> CoreResult<Type> {
        match self.structural(ty, at)?.kind {
            TypeKind::Pointer(base) | TypeKind::Buffer(base, _) => Ok(*base),
            _ => Err(CoreError::semantic(at, format!("cannot dereference `{ty}`"))),
        }
    }

    /// `[p]`, `[buffer index]`, `[p member ...]`.
    fn resolve_deref(&mut self, inner: ExprId, at: Position) -> CoreResult<Type> {
        let terms = self.inner_terms(inner);
        let head_ty = self.resolve(terms[0], None)?;
        if terms.len() > 1 && self.structural(&head_ty, at)?.as_function().is_some() {
            let ty = self.resolve(inner, None)?;
            return self.pointee(&ty, at);
        }
        let base = self.pointee(&head_ty, at)?;
        let Some(&second) = terms.get(1) else {
            return Ok(base);
        };
        let structure = self.structural(&base, at)?;
        if self.names_member(&structure, second) {
            return self.member_path(base, &terms[1..], at);
        }
        if terms.len() > 2 {
            return Err(CoreError::semantic(
                self.position(terms[2]),
                "unexpected term after buffer index",
            ));
        }
        let index = self.resolve(second, None)?;
        self.require_integer(&index, self.position(second))?;
        Ok(base)
    }

    /// `{value member ...}`.
    fn resolve_access(&mut self, inner: ExprId, at: Position) -> CoreResult<Type> {
        let terms = self.inner_terms(inner);
        let head_ty = self.resolve(terms[0], None)?;
        if terms.len() == 1 {
            return Ok(head_ty);
        }
        if self.structural(&head_ty, at)?.as_function().is_some() {
            return self.resolve(inner, None);
        }
        self.member_path(head_ty, &terms[1..], at)
    }

    /// Walks field names (and variant tags) starting from `base`. Member
    /// bindings get the member's type cached instead of a scope lookup.
    fn member_path(&mut self, base: Type, names: &[ExprId], at: Position) -> CoreResult<Type> {
        let mut current = base;
        for (i, &term) in names.iter().enumerate() {
            let ExprKind::Binding { name, .. } = self.program.expr(term).kind.clone() else {
                return Err(CoreError::semantic(self.position(term), "expected a member name"));
            };
            let TypeKind::Struct(structure) = self.structural(&current, at)?.kind else {
                return Err(CoreError::semantic(
                    self.position(term),
                    format!("`{current}` has no members"),
                ));
            };
            current = if let Some((_, field)) = structure.field(&name) {
                let mutable = field.ty.mutable || current.mutable;
                field.ty.clone().with_mut(mutable)
            } else if let Some(variant) = structure.variant(&name) {
                if i + 1 == names.len() {
                    return Err(CoreError::semantic(
                        self.position(term),
                        format!("`{name}` is a variant tag; name one of its fields"),
                    ));
                }
                Type::structure(variant.body.clone()).with_mut(current.mutable)
            } else {
                return Err(CoreError::semantic(
                    self.position(term),
                    format!("`{current}` has no member `{name}`"),
                ));
            };
            self.store(term, current.clone());
        }
        Ok(current)
    }

    // ------------------------------------------------------------------
    // cast / sizeof
    // ------------------------------------------------------------------

    fn check_cast(&self, from: &Type, to: &Type, at: Position) -> CoreResult<()> {
        let source = self.structural(from, at)?;
        let target = self.structural(to, at)?;
        use TypeKind as K;
        let allowed = match (&source.kind, &target.kind) {
            (K::Primitive(_), K::Primitive(_)) => true,
            (K::Pointer(_) | K::Buffer(..), K::Pointer(_)) => true,
            (K::Pointer(_), K::Primitive(Primitive::U64)) => true,
            (K::Primitive(Primitive::U64 | Primitive::IntAny), K::Pointer(_)) => true,
            _ => self.compatible(&target, &source, CmpPurpose::Equality, at)?,
        };
        if allowed {
            Ok(())
        } else {
            Err(CoreError::semantic(at, format!("cannot cast `{from}` to `{to}`")))
        }
    }

    /// A bare name that is not a value but a type measures the type.
    fn resolve_sizeof(&mut self, target: SizeofTarget, at: Position) -> CoreResult<u64> {
        let ty = match target {
            SizeofTarget::Type(ty) => ty,
            SizeofTarget::Expr(expr) => {
                let type_name = match &self.program.expr(expr).kind {
                    ExprKind::Binding { name, ty: None }
                        if self.scope.lookup(name).is_none()
                            && self.program.function(name).is_none()
                            && self.program.constant(name).is_none() =>
                    {
                        Some(name.clone())
                    }
                    _ => None,
                };
                match type_name {
                    Some(name) => Type::user(name),
                    None => self.resolve(expr, None)?,
                }
            }
        };
        Ok(layout_of(&ty, &*self.program, self.limits.max_alias_depth, at)?.size)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Function;
    use crate::loader::MemoryLoader;
    use crate::parser::parse_unit;

    fn analyze_with(source: &str, limits: &Limits) -> CoreResult<Program> {
        let mut program = Program::new(limits);
        let mut loader = MemoryLoader::new();
        parse_unit("main", source, &mut program, &mut loader, limits)?;
        analyze(&mut program, limits)?;
        Ok(program)
    }

    fn ok(source: &str) -> Program {
        analyze_with(source, &Limits::default()).expect("analysis succeeds")
    }

    fn err(source: &str) -> String {
        analyze_with(source, &Limits::default())
            .expect_err("analysis fails")
            .to_string()
    }

    fn function<'a>(program: &'a Program, name: &str) -> &'a Function {
        program.function(name).expect("function exists")
    }

    fn body_type(program: &Program, name: &str) -> String {
        program
            .expr(function(program, name).body)
            .kind
            .cached_type()
            .expect("body resolved")
            .to_string()
    }

    #[test]
    fn lambda_body_matches_its_signature() {
        let program = ok("i32 -> i32 main = \\x (x + 1);");
        assert_eq!(body_type(&program, "main"), "i32 -> i32");
    }

    #[test]
    fn blocks_bind_and_mutate() {
        ok("i32 -> i32 f = \\x (i32 mut y = x + 1; y = y * 2; return y;);");
        let message = err("i32 -> i32 f = \\x (i32 y = x; y = 2; return y;);");
        assert!(message.contains("not `mut`"), "{message}");
    }

    #[test]
    fn value_blocks_must_return() {
        let message = err("i32 -> i32 f = \\x (i32 y = x;);");
        assert!(message.contains("must end with `return`"), "{message}");
    }

    #[test]
    fn literal_families_do_not_mix() {
        ok("f32 -> f32 g = \\x (x .+ 1.5);");
        ok("i64 -> i64 h = \\x (x * 3);");
        let message = err("f32 -> f32 f = \\x (x .+ 1);");
        assert!(message.contains("mismatched types"), "{message}");
    }

    #[test]
    fn first_concrete_argument_fixes_the_operator() {
        let message = err("i32 -> i64 -> i32 f = \\a b (a + b);");
        assert!(message.contains("expected `i32`, found `i64`"), "{message}");
    }

    #[test]
    fn unknown_names_are_reported() {
        let message = err("i32 -> i32 f = \\x (y);");
        assert!(message.contains("unknown name `y`"), "{message}");
    }

    #[test]
    fn partial_application_leaves_a_function() {
        let program = ok("i32 -> i32 -> i32 add = \\a b (a + b); i32 -> i32 inc = add 1;");
        assert_eq!(body_type(&program, "inc"), "i32 -> i32");
        let message = err("i32 -> i32 -> i32 add = \\a b (a + b); i32 bad = add 1 2 3;");
        assert!(message.contains("cannot be applied"), "{message}");
    }

    #[test]
    fn applied_lambda_takes_argument_types() {
        let program = ok("i32 main = (\\x (x + 1)) 5;");
        assert_eq!(body_type(&program, "main"), "i32");
        assert_eq!(program.lifted_functions().count(), 1);
    }

    #[test]
    fn unannotated_lambda_is_rejected() {
        let message = err("i32 main = (\\x (x); return 0;);");
        assert!(message.contains("cannot infer the parameter types"), "{message}");
    }

    #[test]
    fn if_expressions_need_both_branches() {
        ok("i32 -> i32 pick = \\x (if (x > 0) (x) else (0 - x));");
        let message = err("i32 -> i32 bad = \\x (if (x > 0) (x));");
        assert!(message.contains("needs an `else`"), "{message}");
        let message = err("i32 -> i32 bad = \\x (if (x > 0) (x) else (1.5));");
        assert!(message.contains("mismatched types"), "{message}");
    }

    #[test]
    fn predicates_must_be_integers() {
        let message = err("f32 -> f32 bad = \\x (if x (x) else (x));");
        assert!(message.contains("expected an integer"), "{message}");
        let message = err("procedure main = (for 0.5 10 (\\i (i)) (\\i (i)););");
        assert!(message.contains("expected an integer"), "{message}");
    }

    #[test]
    fn loops_accept_labelled_jumps() {
        ok("procedure main = (
                outer: for 0 10 (\\i (i + 1)) (\\i (
                    if (i == 5) (break :outer;);
                    continue;
                ));
            );");
    }

    #[test]
    fn jumps_are_validated() {
        let message = err("procedure main = (break;);");
        assert!(message.contains("outside of a loop"), "{message}");

        let message = err("procedure main = (
                for 0 3 (\\i (i + 1)) (\\i (check: if (i == 1) (continue :check;);));
            );");
        assert!(message.contains("does not label a loop"), "{message}");

        let message = err("procedure main = (
                a: for 0 3 (\\i (i + 1)) (\\i (a: if (i == 1) (break;);));
            );");
        assert!(message.contains("already in use"), "{message}");
    }

    #[test]
    fn lifted_lambdas_cannot_jump_out() {
        let message = err("procedure main = (
                outer: for 0 3 (\\i (i + 1)) (\\i (
                    i32 -> procedure stop = \\k (break :outer;);
                ));
            );");
        assert!(message.contains("no label `outer` is visible"), "{message}");
    }

    #[test]
    fn struct_literals_bind_positionally() {
        let program = ok("type Pair { i32 a; i32 b; } Pair make = {1, 2};");
        assert_eq!(body_type(&program, "make"), "Pair");
        let message = err("type Pair { i32 a; i32 b; } Pair bad = {1, 2, 3};");
        assert!(message.contains("too many values"), "{message}");
    }

    #[test]
    fn variant_tags_select_fields() {
        ok("type Shape { a { i32 x; } b { i32 y; } } Shape s = {a, 5}; Shape t = {b, 7};");
        let message = err("type Shape { a { i32 x; } b { i32 y; } } Shape s = {a, 5, 6};");
        assert!(message.contains("too many values"), "{message}");
        ok("type S { i32 k; a { i32 x; } } S s = {1, a, 2};");
    }

    #[test]
    fn variant_nesting_is_bounded() {
        let limits = Limits {
            max_struct_nesting: 1,
            ..Limits::default()
        };
        let source = "type N { a { b { i32 x; } } } N v = {a, b, 1};";
        let err = analyze_with(source, &limits).expect_err("too deep");
        assert!(matches!(err, CoreError::LimitExceeded { .. }));
        analyze_with(source, &Limits::default()).expect("default nesting");
    }

    #[test]
    fn struct_literals_need_an_expected_type() {
        let message = err("i32 -> i32 f = \\x ({1, 2}; return x;);");
        assert!(message.contains("cannot infer the type of a struct literal"), "{message}");
    }

    #[test]
    fn members_and_dereferences() {
        ok("type Pair { i32 a; i32 b; }
            Pair -> i32 first = \\p ({p a});
            [Pair] -> i32 second = \\p ([p b]);
            [i32] -> i32 load = \\p ([p]);
            [i32] -> i32 -> i32 at = \\p i ([p i]);");
        let message = err("type Pair { i32 a; i32 b; } Pair -> i32 f = \\p ({p c});");
        assert!(message.contains("has no member `c`"), "{message}");
        let message = err("i32 -> i32 f = \\x ([x]);");
        assert!(message.contains("cannot dereference"), "{message}");
    }

    #[test]
    fn buffers_pass_where_pointers_are_expected() {
        ok("[i32] -> i32 load = \\p ([p]);
            i32 main = ([i32 4] xs = [1, 2, 3, 4]; return load xs;);");
        let message = err("i32 main = ([i32 2] xs = [1, 2, 3]; return 0;);");
        assert!(message.contains("holds 2"), "{message}");
    }

    #[test]
    fn array_literals_infer_from_their_elements() {
        let program = ok("i64 main = (i64 x = 5; return [[x, 2, 3] 0];);");
        assert_eq!(body_type(&program, "main"), "i64");
        let inferred = program
            .exprs
            .iter()
            .filter_map(|(_, e)| match &e.kind {
                ExprKind::Literal { ty: Some(ty), .. } => Some(ty.to_string()),
                _ => None,
            })
            .collect::<Vec<_>>();
        assert_eq!(inferred, vec!["[i64 3]".to_string()]);
    }

    #[test]
    fn string_literals() {
        let program = ok("[i8] greeting = \"hi\"; [u8 8] buffer = \"hello\";");
        assert_eq!(body_type(&program, "greeting"), "[i8]");
        let message = err("[u8 1] small = \"hello\";");
        assert!(message.contains("does not fit"), "{message}");
        let message = err("[i32] wrong = \"hello\";");
        assert!(message.contains("found a string literal"), "{message}");
    }

    #[test]
    fn constants_are_values() {
        ok("constant LIMIT = 10; i32 -> i32 f = \\x (x + LIMIT);");
        ok("constant N = 4; [i32 N] xs = [1, 2, 3, 4];");
        let message = err("constant N = 2; [i32 N] xs = [1, 2, 3];");
        assert!(message.contains("holds 2"), "{message}");
    }

    #[test]
    fn sizeof_measures_types_and_values() {
        let program = ok("type P { i8 a; i32 b; }
            u64 p = sizeof P;
            u64 b = sizeof [i32 4];
            i32 -> u64 x = \\v (sizeof v);");
        let sizes: Vec<u64> = program
            .exprs
            .iter()
            .filter_map(|(_, e)| match e.kind {
                ExprKind::Sizeof { size, .. } => size,
                _ => None,
            })
            .collect();
        assert_eq!(sizes, vec![8, 16, 4]);
    }

    #[test]
    fn casts_and_refs() {
        ok("i32 -> f64 f = \\x (cast f64 x);
            [i32] -> u64 addr = \\p (cast u64 p);
            i32 -> [i32] r = \\x (ref x);");
        let message = err("[i32] -> f32 bad = \\p (cast f32 p);");
        assert!(message.contains("cannot cast"), "{message}");
    }

    #[test]
    fn closures_cannot_shadow() {
        let message = err("i32 -> i32 f = \\x (i32 x = 1; return x;);");
        assert!(message.contains("shadows"), "{message}");
    }

    #[test]
    fn resolution_is_memoized() {
        let limits = Limits::default();
        let mut program = analyze_with("i32 -> i32 outer = \\a (return (\\x -> x + a) 1;);", &limits)
            .expect("analysis");
        let calls_lifted = |program: &Program, id: ExprId| match &program.expr(id).kind {
            ExprKind::Application { terms, .. } => matches!(
                &program.expr(terms[0]).kind,
                ExprKind::Binding { name, .. } if name == "__lifted_0"
            ),
            _ => false,
        };
        let site = program
            .exprs
            .iter()
            .map(|(id, _)| id)
            .find(|&id| calls_lifted(&program, id))
            .expect("rewritten lambda");
        let call = program
            .exprs
            .iter()
            .find_map(|(id, e)| match &e.kind {
                ExprKind::Application { terms, .. } if terms[0] == site => Some(id),
                _ => None,
            })
            .expect("application of the lifted lambda");

        let functions = program.functions.len();
        let nodes = program.exprs.len();
        let site_before = format!("{:?}", program.expr(site).kind);
        let call_before = format!("{:?}", program.expr(call).kind);
        assert!(site_before.contains("\"a\""), "{site_before}");

        let i32t = Type::primitive(Primitive::I32);
        {
            let mut analyzer = Analyzer::new(&mut program, &limits);
            for _ in 0..2 {
                let ty = analyzer.resolve(call, Some(&i32t)).expect("resolve call");
                assert_eq!(ty, i32t);
                analyzer.resolve(site, None).expect("resolve site");
            }
        }
        analyze(&mut program, &limits).expect("second analysis");

        assert_eq!(program.functions.len(), functions);
        assert_eq!(program.lifted_functions().count(), 1);
        assert_eq!(program.exprs.len(), nodes);
        assert_eq!(format!("{:?}", program.expr(site).kind), site_before);
        assert_eq!(format!("{:?}", program.expr(call).kind), call_before);
    }

    #[test]
    fn procedures_cannot_return_values() {
        let message = err("procedure f = (return 5;);");
        assert!(message.contains("procedure that returns nothing"), "{message}");
        let message = err("i32 -> procedure g = \\x (i32 y = x; return y;);");
        assert!(message.contains("procedure that returns nothing"), "{message}");
        ok("procedure main = (i32 y = 1;);");
    }

    #[test]
    fn applied_lambda_literals_get_concrete_types() {
        let program = ok("i32 main = (\\x (x + 1)) 5;");
        assert_eq!(function(&program, "__lifted_0").ty.to_string(), "i32 -> i32");

        let program = ok("i32 -> i32 g = \\k (
                (\\x -> x) 5;
                (\\y -> y) 2.5;
                return k;
            );");
        assert_eq!(function(&program, "__lifted_0").ty.to_string(), "i64 -> i64");
        assert_eq!(function(&program, "__lifted_1").ty.to_string(), "f64 -> f64");
    }

    #[test]
    fn closures_cannot_take_builtin_names() {
        let message = err("i32 -> i32 f = \\x (i32 -> i32 -> i32 + = \\a b (a); return x;);");
        assert!(message.contains("cannot redefine builtin operator `+`"), "{message}");
    }

    #[test]
    fn sizeof_overflow_is_an_error() {
        let message = err(
            "type S { [u8 18446744073709551615] a; [u8 18446744073709551615] b; }
             u64 n = sizeof S;",
        );
        assert!(message.contains("overflows"), "{message}");
    }
}
