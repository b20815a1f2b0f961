//! Lambda lifting.
//!
//! A lambda that is not the direct body of a top-level function becomes a
//! top-level function of its own. Its captures turn into leading
//! parameters, so `\x (x + a + b)` with captures `a`, `b` becomes
//! `__lifted_n : A -> B -> X -> T` and the lambda itself is replaced by the
//! partial application `__lifted_n a b`.

use tracing::debug;

use crate::ast::{Capture, ExprId, ExprKind, Function, Lambda};
use crate::error::CoreResult;
use crate::scope::CaptureFrame;
use crate::span::Position;
use crate::typecheck::Analyzer;
use crate::types::Type;

impl Analyzer<'_> {
    /// Lifts the lambda at `site` (parameters `params`, body `body`, type
    /// `ty`) using the captures recorded in `frame`, and returns those
    /// captures.
    pub(crate) fn lift(
        &mut self,
        site: ExprId,
        params: &[String],
        body: ExprId,
        ty: Type,
        frame: CaptureFrame,
    ) -> CoreResult<Vec<Capture>> {
        let at = self.position(site);
        let CaptureFrame {
            captures,
            self_refs,
            ..
        } = frame;

        let name = self.program.fresh_lifted_name();
        let lifted_ty = Type::curried(captures.iter().map(|c| c.ty.clone()), ty.clone());
        let lifted_params = captures
            .iter()
            .map(|c| c.name.clone())
            .chain(params.iter().cloned())
            .collect();
        let lambda = self.program.alloc(
            ExprKind::Lambda(Lambda {
                params: lifted_params,
                body,
                ty: Some(lifted_ty.clone()),
            }),
            at,
        )?;
        self.program.define_function(Function {
            name: name.clone(),
            ty: lifted_ty.clone(),
            body: lambda,
            enclosing: false,
            lifted: true,
            position: at,
        })?;
        debug!(name = %name, captures = captures.len(), ty = %lifted_ty, "lifted lambda");

        // Inside the body the captures are the lifted function's own
        // leading parameters.
        for node in self_refs {
            let position = self.position(node);
            let mut args = Vec::with_capacity(captures.len());
            for capture in &captures {
                args.push(self.program.alloc(
                    ExprKind::Binding {
                        name: capture.name.clone(),
                        ty: Some(capture.ty.clone()),
                    },
                    position,
                )?);
            }
            let call = self.call(&name, &lifted_ty, &ty, args, position)?;
            self.program.expr_mut(node).kind = call;
        }

        // At the site the captured values come from the enclosing code,
        // which may itself be a lambda that has to capture them.
        let mut args = Vec::with_capacity(captures.len());
        for capture in &captures {
            let arg = self.program.alloc(
                ExprKind::Binding {
                    name: capture.name.clone(),
                    ty: None,
                },
                at,
            )?;
            self.resolve(arg, Some(&capture.ty))?;
            args.push(arg);
        }
        let call = self.call(&name, &lifted_ty, &ty, args, at)?;
        self.program.expr_mut(site).kind = call;
        Ok(captures)
    }

    /// `name args...` with type `ty`, or a bare reference when there are no
    /// arguments.
    fn call(
        &mut self,
        name: &str,
        lifted_ty: &Type,
        ty: &Type,
        args: Vec<ExprId>,
        at: Position,
    ) -> CoreResult<ExprKind> {
        if args.is_empty() {
            return Ok(ExprKind::Binding {
                name: name.to_string(),
                ty: Some(ty.clone()),
            });
        }
        let head = self.program.alloc(
            ExprKind::Binding {
                name: name.to_string(),
                ty: Some(lifted_ty.clone()),
            },
            at,
        )?;
        let mut terms = Vec::with_capacity(args.len() + 1);
        terms.push(head);
        terms.extend(args);
        Ok(ExprKind::Application {
            terms,
            ty: Some(ty.clone()),
        })
    }
}
