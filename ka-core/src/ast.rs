//! Syntax tree and the program it belongs to.
//!
//! Expressions live in the program's [`Arena`] and point at each other
//! through [`ExprId`]. Nodes that carry a type keep it in an
//! `Option<Type>` cache filled in once by the analyzer.

use std::collections::HashMap;

use crate::arena::{Arena, Idx, TextArena, TextRange};
use crate::config::Limits;
use crate::error::{CoreError, CoreResult};
use crate::span::Position;
use crate::types::{Type, TypeLookup};

pub type ExprId = Idx<Expr>;

#[derive(Debug, Clone)]
pub struct Expr {
    pub kind: ExprKind,
    pub position: Position,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Numeral {
    Integer(u64),
    Float(f64),
}

#[derive(Debug, Clone, PartialEq)]
pub enum LiteralKind {
    String(TextRange),
    Array(Vec<ExprId>),
    /// Positional values; a bare variant tag selects that variant.
    Struct(Vec<ExprId>),
}

#[derive(Debug, Clone)]
pub enum SizeofTarget {
    Type(Type),
    Expr(ExprId),
}

/// Outer binding referenced from inside a lambda.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub name: String,
    pub ty: Type,
}

#[derive(Debug, Clone)]
pub struct Lambda {
    pub params: Vec<String>,
    pub body: ExprId,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone)]
pub enum ExprKind {
    Block {
        lines: Vec<ExprId>,
        ty: Option<Type>,
    },
    /// `head arg1 arg2 ...`, applied left to right.
    Application {
        terms: Vec<ExprId>,
        ty: Option<Type>,
    },
    /// Function defined inline in a block.
    Closure {
        function: Function,
        captures: Vec<Capture>,
    },
    Statement(Statement),
    Binding {
        name: String,
        ty: Option<Type>,
    },
    Value {
        numeral: Numeral,
        ty: Option<Type>,
    },
    Literal {
        literal: LiteralKind,
        ty: Option<Type>,
    },
    /// `[ ... ]`: load through a pointer, index a buffer, reach a member
    /// through a pointer. `inner` is the bracketed application.
    Deref {
        inner: ExprId,
        ty: Option<Type>,
    },
    /// `{ ... }`: member access on a structure value.
    Access {
        inner: ExprId,
        ty: Option<Type>,
    },
    Lambda(Lambda),
    Return {
        value: ExprId,
        ty: Option<Type>,
    },
    Ref {
        target: ExprId,
        ty: Option<Type>,
    },
    Cast {
        target: Type,
        operand: ExprId,
        ty: Option<Type>,
    },
    Sizeof {
        target: SizeofTarget,
        size: Option<u64>,
    },
    /// Placeholder for the `=` marker in a mutation and for empty lines.
    Nop,
}

impl ExprKind {
    /// Type cached on this node by a previous resolution, if any.
    pub fn cached_type(&self) -> Option<&Type> {
        match self {
            ExprKind::Block { ty, .. }
            | ExprKind::Application { ty, .. }
            | ExprKind::Binding { ty, .. }
            | ExprKind::Value { ty, .. }
            | ExprKind::Literal { ty, .. }
            | ExprKind::Deref { ty, .. }
            | ExprKind::Access { ty, .. }
            | ExprKind::Return { ty, .. }
            | ExprKind::Ref { ty, .. }
            | ExprKind::Cast { ty, .. } => ty.as_ref(),
            ExprKind::Lambda(lambda) => lambda.ty.as_ref(),
            ExprKind::Statement(statement) => statement.ty.as_ref(),
            ExprKind::Closure { .. } | ExprKind::Sizeof { .. } | ExprKind::Nop => None,
        }
    }

    pub fn is_return(&self) -> bool {
        matches!(self, ExprKind::Return { .. })
    }
}

#[derive(Debug, Clone)]
pub enum StatementKind {
    If {
        predicate: ExprId,
        branch: ExprId,
        alternate: Option<ExprId>,
        label: Option<String>,
    },
    /// `for start end step body`; `step : I -> I`, `body : I -> procedure`.
    For {
        start: ExprId,
        end: ExprId,
        step: ExprId,
        body: ExprId,
        label: Option<String>,
    },
    Break(Option<String>),
    Continue(Option<String>),
}

#[derive(Debug, Clone)]
pub struct Statement {
    pub kind: StatementKind,
    pub ty: Option<Type>,
}

#[derive(Debug, Clone)]
pub struct Function {
    pub name: String,
    pub ty: Type,
    pub body: ExprId,
    /// Declared with `#` instead of `=`.
    pub enclosing: bool,
    /// Synthesized from a lambda that captured outer bindings.
    pub lifted: bool,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct TypeDecl {
    pub name: String,
    pub ty: Type,
    pub position: Position,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ConstValue {
    Integer(u64),
    Float(f64),
    String(TextRange),
}

#[derive(Debug, Clone)]
pub struct Constant {
    pub name: String,
    pub value: ConstValue,
    pub position: Position,
}

#[derive(Debug, Clone)]
pub struct Import {
    pub name: String,
    pub position: Position,
}

/// Which of the four declaration tables a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeclKind {
    Function,
    Type,
    Alias,
    Constant,
}

impl DeclKind {
    fn describe(self) -> &'static str {
        match self {
            DeclKind::Function => "function",
            DeclKind::Type => "type",
            DeclKind::Alias => "alias",
            DeclKind::Constant => "constant",
        }
    }
}

/// Everything parsed from a unit and its imports.
#[derive(Debug)]
pub struct Program {
    pub exprs: Arena<Expr>,
    pub strings: TextArena,
    pub functions: Vec<Function>,
    pub types: Vec<TypeDecl>,
    pub aliases: Vec<Alias>,
    pub constants: Vec<Constant>,
    pub imports: Vec<Import>,
    names: HashMap<String, (DeclKind, usize)>,
    lifted_count: u64,
}

pub type Alias = TypeDecl;

impl Program {
    pub fn new(limits: &Limits) -> Self {
        Program {
            exprs: Arena::with_capacity(limits.max_nodes),
            strings: TextArena::with_capacity(limits.max_text),
            functions: Vec::new(),
            types: Vec::new(),
            aliases: Vec::new(),
            constants: Vec::new(),
            imports: Vec::new(),
            names: HashMap::new(),
            lifted_count: 0,
        }
    }

    pub fn alloc(&mut self, kind: ExprKind, position: Position) -> CoreResult<ExprId> {
        self.exprs.alloc(Expr { kind, position })
    }

    pub fn expr(&self, id: ExprId) -> &Expr {
        self.exprs.get(id)
    }

    pub fn expr_mut(&mut self, id: ExprId) -> &mut Expr {
        self.exprs.get_mut(id)
    }

    pub fn string(&self, range: TextRange) -> &str {
        self.strings.get(range)
    }

    /// Reserves `name` in the shared function/type/alias/constant namespace.
    fn claim(&mut self, name: &str, kind: DeclKind, index: usize, at: Position) -> CoreResult<()> {
        if let Some((existing, _)) = self.names.get(name) {
            return Err(CoreError::semantic(
                at,
                format!(
                    "`{name}` is already defined as a {}; cannot redefine it as a {}",
                    existing.describe(),
                    kind.describe()
                ),
            ));
        }
        self.names.insert(name.to_string(), (kind, index));
        Ok(())
    }

    pub fn define_function(&mut self, function: Function) -> CoreResult<usize> {
        let index = self.functions.len();
        self.claim(&function.name, DeclKind::Function, index, function.position)?;
        self.functions.push(function);
        Ok(index)
    }

    pub fn define_type(&mut self, decl: TypeDecl) -> CoreResult<()> {
        self.claim(&decl.name, DeclKind::Type, self.types.len(), decl.position)?;
        self.types.push(decl);
        Ok(())
    }

    pub fn define_alias(&mut self, decl: Alias) -> CoreResult<()> {
        self.claim(&decl.name, DeclKind::Alias, self.aliases.len(), decl.position)?;
        self.aliases.push(decl);
        Ok(())
    }

    pub fn define_constant(&mut self, constant: Constant) -> CoreResult<()> {
        self.claim(&constant.name, DeclKind::Constant, self.constants.len(), constant.position)?;
        self.constants.push(constant);
        Ok(())
    }

    pub fn declared(&self, name: &str) -> Option<DeclKind> {
        self.names.get(name).map(|(kind, _)| *kind)
    }

    pub fn function(&self, name: &str) -> Option<&Function> {
        match self.names.get(name) {
            Some((DeclKind::Function, index)) => self.functions.get(*index),
            _ => None,
        }
    }

    pub fn constant(&self, name: &str) -> Option<&Constant> {
        match self.names.get(name) {
            Some((DeclKind::Constant, index)) => self.constants.get(*index),
            _ => None,
        }
    }

    /// Records an import. Returns `false` if `name` was already imported.
    pub fn add_import(&mut self, name: &str, position: Position) -> bool {
        if self.imports.iter().any(|i| i.name == name) {
            return false;
        }
        self.imports.push(Import {
            name: name.to_string(),
            position,
        });
        true
    }

    /// Next unused `__lifted_<n>` name.
    pub fn fresh_lifted_name(&mut self) -> String {
        loop {
            let name = format!("__lifted_{}", self.lifted_count);
            self.lifted_count += 1;
            if !self.names.contains_key(&name) {
                return name;
            }
        }
    }

    pub fn lifted_functions(&self) -> impl Iterator<Item = &Function> {
        self.functions.iter().filter(|f| f.lifted)
    }
}

impl TypeLookup for Program {
    fn lookup_type(&self, name: &str) -> Option<&Type> {
        match self.names.get(name) {
            Some((DeclKind::Type, index)) => self.types.get(*index).map(|d| &d.ty),
            Some((DeclKind::Alias, index)) => self.aliases.get(*index).map(|d| &d.ty),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Primitive;

    fn program() -> Program {
        Program::new(&Limits::default())
    }

    fn function(program: &mut Program, name: &str) -> Function {
        let body = program.alloc(ExprKind::Nop, Position::default()).expect("alloc");
        Function {
            name: name.to_string(),
            ty: Type::primitive(Primitive::I32),
            body,
            enclosing: false,
            lifted: false,
            position: Position::default(),
        }
    }

    #[test]
    fn names_are_shared_across_declaration_kinds() {
        let mut program = program();
        program
            .define_type(TypeDecl {
                name: "thing".into(),
                ty: Type::primitive(Primitive::I32),
                position: Position::default(),
            })
            .expect("type");
        let f = function(&mut program, "thing");
        let err = program.define_function(f).unwrap_err();
        assert!(matches!(err, CoreError::Semantic { .. }));

        let err = program
            .define_constant(Constant {
                name: "thing".into(),
                value: ConstValue::Integer(1),
                position: Position::default(),
            })
            .unwrap_err();
        assert!(err.to_string().contains("already defined as a type"));
    }

    #[test]
    fn lifted_names_skip_taken_names() {
        let mut program = program();
        let f = function(&mut program, "__lifted_0");
        program.define_function(f).expect("define");
        assert_eq!(program.fresh_lifted_name(), "__lifted_1");
        assert_eq!(program.fresh_lifted_name(), "__lifted_2");
    }

    #[test]
    fn imports_are_deduplicated() {
        let mut program = program();
        assert!(program.add_import("io", Position::default()));
        assert!(!program.add_import("io", Position::default()));
        assert_eq!(program.imports.len(), 1);
    }

    #[test]
    fn type_lookup_sees_types_and_aliases() {
        let mut program = program();
        program
            .define_alias(TypeDecl {
                name: "byte".into(),
                ty: Type::primitive(Primitive::U8),
                position: Position::default(),
            })
            .expect("alias");
        assert_eq!(program.lookup_type("byte"), Some(&Type::primitive(Primitive::U8)));
        assert!(program.lookup_type("missing").is_none());
    }
}
