//! Analysis-time scope: bindings, capture frames and jump labels.
//!
//! All three are plain growable stacks. Frames are remembered as a saved
//! length ([`ScopeMark`]) and restored by truncation, so they nest
//! strictly.

use crate::ast::{Capture, ExprId};
use crate::builtins::BUILTINS;
use crate::config::Limits;
use crate::error::{CoreError, CoreResult};
use crate::span::Position;
use crate::types::Type;

#[derive(Debug, Clone)]
pub struct ScopeEntry {
    pub name: String,
    pub ty: Type,
}

/// Outer names referenced from inside one lifted lambda.
#[derive(Debug, Clone)]
pub struct CaptureFrame {
    /// Bindings below this index belong to enclosing code.
    pub start: usize,
    pub captures: Vec<Capture>,
    /// Binding of the closure being defined; references to it are
    /// recursion, not captures.
    pub self_binding: Option<usize>,
    pub self_refs: Vec<ExprId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum LabelEntry {
    Statement { name: Option<String>, is_loop: bool },
    /// Jumps cannot see past this entry.
    Boundary,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScopeMark(usize);

#[derive(Debug)]
pub struct Scope {
    bindings: Vec<ScopeEntry>,
    builtin_end: usize,
    frames: Vec<CaptureFrame>,
    labels: Vec<LabelEntry>,
    max_bindings: usize,
    max_captures: usize,
    max_depth: usize,
}

impl Scope {
    /// A scope holding only the builtin operators.
    pub fn new(limits: &Limits) -> Self {
        let bindings: Vec<ScopeEntry> = BUILTINS
            .iter()
            .map(|b| ScopeEntry {
                name: b.name.to_string(),
                ty: b.ty(),
            })
            .collect();
        Scope {
            builtin_end: bindings.len(),
            bindings,
            frames: Vec::new(),
            labels: Vec::new(),
            max_bindings: limits.max_bindings,
            max_captures: limits.max_captures,
            max_depth: limits.max_depth,
        }
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.len() == self.builtin_end
    }

    pub fn mark(&self) -> ScopeMark {
        ScopeMark(self.bindings.len())
    }

    pub fn restore(&mut self, mark: ScopeMark) {
        debug_assert!(mark.0 >= self.builtin_end);
        self.bindings.truncate(mark.0);
    }

    pub fn push(&mut self, name: &str, ty: Type) -> CoreResult<usize> {
        if self.bindings.len() >= self.max_bindings {
            return Err(CoreError::limit("bindings in scope", self.max_bindings));
        }
        self.bindings.push(ScopeEntry {
            name: name.to_string(),
            ty,
        });
        Ok(self.bindings.len() - 1)
    }

    /// Innermost binding called `name`.
    pub fn lookup(&self, name: &str) -> Option<(usize, &ScopeEntry)> {
        self.bindings
            .iter()
            .enumerate()
            .rev()
            .find(|(_, entry)| entry.name == name)
    }

    /// Whether `name` is bound by user code (builtins excluded).
    pub fn binds_local(&self, name: &str) -> bool {
        self.lookup(name).is_some_and(|(index, _)| index >= self.builtin_end)
    }

    // ------------------------------------------------------------------
    // Capture frames
    // ------------------------------------------------------------------

    pub fn push_capture_frame(&mut self, self_binding: Option<usize>) -> CoreResult<()> {
        if self.frames.len() >= self.max_depth {
            return Err(CoreError::limit("nested lambdas", self.max_depth));
        }
        self.frames.push(CaptureFrame {
            start: self.bindings.len(),
            captures: Vec::new(),
            self_binding,
            self_refs: Vec::new(),
        });
        Ok(())
    }

    pub fn pop_capture_frame(&mut self) -> Option<CaptureFrame> {
        self.frames.pop()
    }

    /// Records a reference from `node` to the binding at `index`. If the
    /// binding lies outside the innermost lifted lambda it becomes a
    /// capture of that lambda.
    pub fn note_reference(&mut self, index: usize, node: ExprId) -> CoreResult<()> {
        let Some(frame) = self.frames.last_mut() else {
            return Ok(());
        };
        if frame.self_binding == Some(index) {
            frame.self_refs.push(node);
            return Ok(());
        }
        if index < self.builtin_end || index >= frame.start {
            return Ok(());
        }
        let entry = &self.bindings[index];
        if frame.captures.iter().any(|c| c.name == entry.name) {
            return Ok(());
        }
        if frame.captures.len() >= self.max_captures {
            return Err(CoreError::limit("captured bindings", self.max_captures));
        }
        frame.captures.push(Capture {
            name: entry.name.clone(),
            ty: entry.ty.clone(),
        });
        Ok(())
    }

    // ------------------------------------------------------------------
    // Labels
    // ------------------------------------------------------------------

    /// Opens an `if` / `for` statement frame, optionally labelled.
    pub fn push_label(&mut self, name: Option<&str>, is_loop: bool, at: Position) -> CoreResult<()> {
        if let Some(name) = name {
            if self.visible_label(name).is_some() {
                return Err(CoreError::semantic(
                    at,
                    format!("label `{name}` is already in use by an enclosing statement"),
                ));
            }
        }
        if self.labels.len() >= self.max_depth {
            return Err(CoreError::limit("nested statements", self.max_depth));
        }
        self.labels.push(LabelEntry::Statement {
            name: name.map(str::to_string),
            is_loop,
        });
        Ok(())
    }

    pub fn pop_label(&mut self) {
        self.labels.pop();
    }

    pub fn push_boundary(&mut self) {
        self.labels.push(LabelEntry::Boundary);
    }

    pub fn pop_boundary(&mut self) {
        debug_assert_eq!(self.labels.last(), Some(&LabelEntry::Boundary));
        self.labels.pop();
    }

    /// Entries above the innermost closure boundary, innermost first.
    fn visible(&self) -> impl Iterator<Item = (&Option<String>, bool)> {
        self.labels
            .iter()
            .rev()
            .take_while(|entry| **entry != LabelEntry::Boundary)
            .filter_map(|entry| match entry {
                LabelEntry::Statement { name, is_loop } => Some((name, *is_loop)),
                LabelEntry::Boundary => None,
            })
    }

    fn visible_label(&self, name: &str) -> Option<bool> {
        self.visible()
            .find(|(label, _)| label.as_deref() == Some(name))
            .map(|(_, is_loop)| is_loop)
    }

    /// Validates a `break` / `continue` against the statements enclosing it
    /// in the current closure.
    pub fn check_jump(&self, label: Option<&str>, is_continue: bool, at: Position) -> CoreResult<()> {
        let keyword = if is_continue { "continue" } else { "break" };
        match label {
            None => {
                if self.visible().any(|(_, is_loop)| is_loop) {
                    Ok(())
                } else {
                    Err(CoreError::semantic(
                        at,
                        format!("`{keyword}` outside of a loop"),
                    ))
                }
            }
            Some(name) => match self.visible_label(name) {
                Some(true) => Ok(()),
                Some(false) if !is_continue => Ok(()),
                Some(false) => Err(CoreError::semantic(
                    at,
                    format!("cannot `continue` to `{name}`, which does not label a loop"),
                )),
                None => Err(CoreError::semantic(
                    at,
                    format!("no label `{name}` is visible from this `{keyword}`"),
                )),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    fn scope() -> Scope {
        Scope::new(&Limits::default())
    }

    fn i32t() -> Type {
        Type::primitive(Primitive::I32)
    }

    fn node(program: &mut crate::ast::Program) -> ExprId {
        program
            .alloc(crate::ast::ExprKind::Nop, Position::default())
            .expect("alloc")
    }

    #[test]
    fn builtins_form_the_bottom_frame() {
        let scope = scope();
        assert!(scope.is_empty());
        assert!(scope.lookup("+").is_some());
        assert!(!scope.binds_local("+"));
    }

    #[test]
    fn restore_drops_inner_bindings() {
        let mut scope = scope();
        scope.push("a", i32t()).expect("push");
        let mark = scope.mark();
        scope.push("b", i32t()).expect("push");
        scope.restore(mark);
        assert!(scope.lookup("b").is_none());
        assert!(scope.lookup("a").is_some());
    }

    #[test]
    fn references_below_the_frame_are_captured_once() {
        let mut program = crate::ast::Program::new(&Limits::default());
        let mut scope = scope();
        let a = scope.push("a", i32t()).expect("push");
        let b = scope.push("b", i32t()).expect("push");
        scope.push_capture_frame(None).expect("frame");
        let x = scope.push("x", i32t()).expect("push");

        let (plus, _) = scope.lookup("+").expect("builtin");
        for index in [b, a, b, x, plus] {
            let id = node(&mut program);
            scope.note_reference(index, id).expect("note");
        }

        let frame = scope.pop_capture_frame().expect("frame");
        let names: Vec<_> = frame.captures.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["b", "a"]);
    }

    #[test]
    fn self_references_are_not_captured() {
        let mut program = crate::ast::Program::new(&Limits::default());
        let mut scope = scope();
        let f = scope.push("f", i32t()).expect("push");
        scope.push_capture_frame(Some(f)).expect("frame");
        let id = node(&mut program);
        scope.note_reference(f, id).expect("note");
        let frame = scope.pop_capture_frame().expect("frame");
        assert!(frame.captures.is_empty());
        assert_eq!(frame.self_refs, vec![id]);
    }

    #[test]
    fn capture_limit_is_enforced() {
        let limits = Limits {
            max_captures: 1,
            ..Limits::default()
        };
        let mut program = crate::ast::Program::new(&limits);
        let mut scope = Scope::new(&limits);
        let a = scope.push("a", i32t()).expect("push");
        let b = scope.push("b", i32t()).expect("push");
        scope.push_capture_frame(None).expect("frame");
        let first = node(&mut program);
        scope.note_reference(a, first).expect("first capture");
        let second = node(&mut program);
        let err = scope.note_reference(b, second).unwrap_err();
        assert!(matches!(err, CoreError::LimitExceeded { .. }));
    }

    #[test]
    fn jumps_respect_loops_labels_and_boundaries() {
        let mut scope = scope();
        let at = Position::default();
        assert!(scope.check_jump(None, false, at).is_err());

        scope.push_label(Some("outer"), true, at).expect("label");
        scope.push_label(Some("check"), false, at).expect("label");
        scope.check_jump(None, false, at).expect("break to loop");
        scope.check_jump(Some("outer"), true, at).expect("continue outer");
        scope.check_jump(Some("check"), false, at).expect("break out of if");
        assert!(scope.check_jump(Some("check"), true, at).is_err());
        assert!(scope.push_label(Some("outer"), false, at).is_err());

        scope.push_boundary();
        assert!(scope.check_jump(Some("outer"), false, at).is_err());
        assert!(scope.check_jump(None, true, at).is_err());
        scope.pop_boundary();
        scope.check_jump(Some("outer"), false, at).expect("visible again");
    }
}
