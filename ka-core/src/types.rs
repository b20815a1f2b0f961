//! Type representation and structural comparison.
//!
//! Named types and aliases are transparent: comparison always happens on
//! the structure they resolve to, through a [`TypeLookup`] supplied by the
//! program. `mut` is a storage flag orthogonal to the type tag; only
//! [`CmpPurpose::Mutation`] looks at it.

use std::fmt;

use crate::error::{CoreError, CoreResult};
use crate::span::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Primitive {
    I8,
    I16,
    I32,
    I64,
    U8,
    U16,
    U32,
    U64,
    F32,
    F64,
    /// Type of an untyped integer literal until a concrete integer fixes it.
    IntAny,
    /// Same for float literals.
    FloatAny,
}

impl Primitive {
    pub fn is_integer(self) -> bool {
        use Primitive::*;
        matches!(self, I8 | I16 | I32 | I64 | U8 | U16 | U32 | U64 | IntAny)
    }

    pub fn is_float(self) -> bool {
        matches!(self, Primitive::F32 | Primitive::F64 | Primitive::FloatAny)
    }

    pub fn is_placeholder(self) -> bool {
        matches!(self, Primitive::IntAny | Primitive::FloatAny)
    }

    /// Placeholders unify with every member of their family; concrete
    /// primitives only with themselves.
    pub fn unifies_with(self, other: Primitive) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (Primitive::IntAny, o) | (o, Primitive::IntAny) => o.is_integer(),
            (Primitive::FloatAny, o) | (o, Primitive::FloatAny) => o.is_float(),
            _ => false,
        }
    }

    pub fn byte_size(self) -> u64 {
        use Primitive::*;
        match self {
            I8 | U8 => 1,
            I16 | U16 => 2,
            I32 | U32 | F32 => 4,
            I64 | U64 | F64 | IntAny | FloatAny => 8,
        }
    }

    pub fn name(self) -> &'static str {
        use Primitive::*;
        match self {
            I8 => "i8",
            I16 => "i16",
            I32 => "i32",
            I64 => "i64",
            U8 => "u8",
            U16 => "u16",
            U32 => "u32",
            U64 => "u64",
            F32 => "f32",
            F64 => "f64",
            IntAny => "{integer}",
            FloatAny => "{float}",
        }
    }
}

/// Element count of a fixed buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BufferCount {
    Known(u64),
    /// Named integer constant, replaced by `Known` before analysis.
    Constant(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Field {
    pub name: String,
    pub ty: Type,
}

/// Tagged alternative nested in a structure.
#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub name: String,
    pub discriminant: i64,
    pub body: Structure,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Structure {
    pub fields: Vec<Field>,
    pub variants: Vec<Variant>,
}

impl Structure {
    pub fn field(&self, name: &str) -> Option<(usize, &Field)> {
        self.fields.iter().enumerate().find(|(_, f)| f.name == name)
    }

    pub fn variant(&self, name: &str) -> Option<&Variant> {
        self.variants.iter().find(|v| v.name == name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TypeKind {
    Function(Box<Type>, Box<Type>),
    Primitive(Primitive),
    Pointer(Box<Type>),
    Buffer(Box<Type>, BufferCount),
    User(String),
    Struct(Box<Structure>),
    Procedure(Box<Type>),
    None,
    /// Matches anything. Only produced internally.
    InternalAny,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Type {
    pub kind: TypeKind,
    pub mutable: bool,
}

impl Type {
    pub fn new(kind: TypeKind) -> Self {
        Type {
            kind,
            mutable: false,
        }
    }

    pub fn primitive(p: Primitive) -> Self {
        Type::new(TypeKind::Primitive(p))
    }

    pub fn int_any() -> Self {
        Type::primitive(Primitive::IntAny)
    }

    pub fn float_any() -> Self {
        Type::primitive(Primitive::FloatAny)
    }

    pub fn none() -> Self {
        Type::new(TypeKind::None)
    }

    pub fn any() -> Self {
        Type::new(TypeKind::InternalAny)
    }

    pub fn pointer(base: Type) -> Self {
        Type::new(TypeKind::Pointer(Box::new(base)))
    }

    pub fn buffer(base: Type, count: u64) -> Self {
        Type::new(TypeKind::Buffer(Box::new(base), BufferCount::Known(count)))
    }

    pub fn function(left: Type, right: Type) -> Self {
        Type::new(TypeKind::Function(Box::new(left), Box::new(right)))
    }

    /// Curried function type `a -> b -> ... -> result`.
    pub fn curried(params: impl IntoIterator<Item = Type>, result: Type) -> Self {
        let params: Vec<Type> = params.into_iter().collect();
        params
            .into_iter()
            .rev()
            .fold(result, |acc, param| Type::function(param, acc))
    }

    pub fn procedure(base: Type) -> Self {
        Type::new(TypeKind::Procedure(Box::new(base)))
    }

    pub fn user(name: impl Into<String>) -> Self {
        Type::new(TypeKind::User(name.into()))
    }

    pub fn structure(s: Structure) -> Self {
        Type::new(TypeKind::Struct(Box::new(s)))
    }

    pub fn with_mut(mut self, mutable: bool) -> Self {
        self.mutable = mutable;
        self
    }

    pub fn is_none(&self) -> bool {
        matches!(self.kind, TypeKind::None)
    }

    pub fn is_procedure(&self) -> bool {
        matches!(self.kind, TypeKind::Procedure(_))
    }

    pub fn as_primitive(&self) -> Option<Primitive> {
        match self.kind {
            TypeKind::Primitive(p) => Some(p),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<(&Type, &Type)> {
        match &self.kind {
            TypeKind::Function(l, r) => Some((l, r)),
            _ => None,
        }
    }

    pub fn is_placeholder(&self) -> bool {
        self.as_primitive().is_some_and(Primitive::is_placeholder)
    }

    pub fn contains_placeholder(&self) -> bool {
        match &self.kind {
            TypeKind::Primitive(p) => p.is_placeholder(),
            TypeKind::Function(l, r) => l.contains_placeholder() || r.contains_placeholder(),
            TypeKind::Pointer(b) | TypeKind::Buffer(b, _) | TypeKind::Procedure(b) => {
                b.contains_placeholder()
            }
            _ => false,
        }
    }

    /// Replaces every occurrence of `placeholder` with `concrete`.
    pub fn specialize(&self, placeholder: Primitive, concrete: &Type) -> Type {
        let kind = match &self.kind {
            TypeKind::Primitive(p) if *p == placeholder => {
                return concrete.clone().with_mut(self.mutable);
            }
            TypeKind::Function(l, r) => TypeKind::Function(
                Box::new(l.specialize(placeholder, concrete)),
                Box::new(r.specialize(placeholder, concrete)),
            ),
            TypeKind::Pointer(b) => TypeKind::Pointer(Box::new(b.specialize(placeholder, concrete))),
            TypeKind::Buffer(b, n) => {
                TypeKind::Buffer(Box::new(b.specialize(placeholder, concrete)), n.clone())
            }
            TypeKind::Procedure(b) => {
                TypeKind::Procedure(Box::new(b.specialize(placeholder, concrete)))
            }
            other => other.clone(),
        };
        Type {
            kind,
            mutable: self.mutable,
        }
    }

    /// Visits this type and every type nested in it.
    pub fn walk(&self, f: &mut impl FnMut(&Type)) {
        f(self);
        match &self.kind {
            TypeKind::Function(l, r) => {
                l.walk(f);
                r.walk(f);
            }
            TypeKind::Pointer(b) | TypeKind::Buffer(b, _) | TypeKind::Procedure(b) => b.walk(f),
            TypeKind::Struct(s) => walk_structure(s, f),
            _ => {}
        }
    }

    pub fn walk_mut(&mut self, f: &mut impl FnMut(&mut Type)) {
        f(self);
        match &mut self.kind {
            TypeKind::Function(l, r) => {
                l.walk_mut(f);
                r.walk_mut(f);
            }
            TypeKind::Pointer(b) | TypeKind::Buffer(b, _) | TypeKind::Procedure(b) => {
                b.walk_mut(f)
            }
            TypeKind::Struct(s) => walk_structure_mut(s, f),
            _ => {}
        }
    }
}

fn walk_structure(s: &Structure, f: &mut impl FnMut(&Type)) {
    for field in &s.fields {
        field.ty.walk(f);
    }
    for variant in &s.variants {
        walk_structure(&variant.body, f);
    }
}

fn walk_structure_mut(s: &mut Structure, f: &mut impl FnMut(&mut Type)) {
    for field in &mut s.fields {
        field.ty.walk_mut(f);
    }
    for variant in &mut s.variants {
        walk_structure_mut(&mut variant.body, f);
    }
}

/// How two types are being compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpPurpose {
    /// Strict structural equality.
    Equality,
    /// Argument or return position: a pointer and a buffer of the same
    /// base are interchangeable.
    Application,
    /// Assignment target: must be `mut`, otherwise like `Application`.
    Mutation,
}

/// Resolves user type names to their definitions.
pub trait TypeLookup {
    fn lookup_type(&self, name: &str) -> Option<&Type>;
}

/// Follows alias / named-type links until a structural type is reached.
pub fn resolve_named<'a>(
    ty: &'a Type,
    env: &'a dyn TypeLookup,
    max_depth: usize,
    at: Position,
) -> CoreResult<&'a Type> {
    let mut current = ty;
    let mut steps = 0;
    while let TypeKind::User(name) = &current.kind {
        if steps >= max_depth {
            return Err(CoreError::semantic(
                at,
                format!("type `{name}` does not resolve to a structural type (cycle or chain deeper than {max_depth})"),
            ));
        }
        current = env
            .lookup_type(name)
            .ok_or_else(|| CoreError::semantic(at, format!("unknown type `{name}`")))?;
        steps += 1;
    }
    Ok(current)
}

/// Checks whether a value of type `actual` is acceptable where `expected`
/// is required.
pub fn types_match(
    expected: &Type,
    actual: &Type,
    purpose: CmpPurpose,
    env: &dyn TypeLookup,
    max_depth: usize,
    at: Position,
) -> CoreResult<bool> {
    if purpose == CmpPurpose::Mutation && !expected.mutable {
        return Ok(false);
    }
    let purpose = match purpose {
        CmpPurpose::Mutation => CmpPurpose::Application,
        other => other,
    };
    Comparer {
        env,
        max_depth,
        at,
    }
    .compare(expected, actual, purpose, 0)
}

struct Comparer<'a> {
    env: &'a dyn TypeLookup,
    max_depth: usize,
    at: Position,
}

impl Comparer<'_> {
    fn compare(&self, expected: &Type, actual: &Type, purpose: CmpPurpose, depth: usize) -> CoreResult<bool> {
        if depth > self.max_depth {
            return Err(CoreError::semantic(self.at, "type nesting too deep to compare"));
        }
        if let (TypeKind::User(a), TypeKind::User(b)) = (&expected.kind, &actual.kind) {
            if a == b {
                return Ok(true);
            }
        }
        let expected = resolve_named(expected, self.env, self.max_depth, self.at)?;
        let actual = resolve_named(actual, self.env, self.max_depth, self.at)?;
        let depth = depth + 1;

        use TypeKind as K;
        Ok(match (&expected.kind, &actual.kind) {
            (K::InternalAny, _) | (_, K::InternalAny) => true,
            (K::None, K::None) => true,
            (K::Primitive(a), K::Primitive(b)) => a.unifies_with(*b),
            (K::Function(al, ar), K::Function(bl, br)) => {
                self.compare(al, bl, CmpPurpose::Equality, depth)?
                    && self.compare(ar, br, CmpPurpose::Equality, depth)?
            }
            (K::Procedure(a), K::Procedure(b)) => self.compare(a, b, CmpPurpose::Equality, depth)?,
            (K::Pointer(a), K::Pointer(b)) => self.compare(a, b, CmpPurpose::Equality, depth)?,
            (K::Buffer(a, n), K::Buffer(b, m)) => {
                n == m && self.compare(a, b, CmpPurpose::Equality, depth)?
            }
            (K::Pointer(a), K::Buffer(b, _)) | (K::Buffer(a, _), K::Pointer(b))
                if purpose == CmpPurpose::Application =>
            {
                self.compare(a, b, CmpPurpose::Equality, depth)?
            }
            (K::Struct(a), K::Struct(b)) => self.compare_structures(a, b, depth)?,
            _ => false,
        })
    }

    /// Order-sensitive: same field names and types in the same order, same
    /// variant tags in the same order.
    fn compare_structures(&self, a: &Structure, b: &Structure, depth: usize) -> CoreResult<bool> {
        if a.fields.len() != b.fields.len() || a.variants.len() != b.variants.len() {
            return Ok(false);
        }
        for (x, y) in a.fields.iter().zip(&b.fields) {
            if x.name != y.name || !self.compare(&x.ty, &y.ty, CmpPurpose::Equality, depth)? {
                return Ok(false);
            }
        }
        for (x, y) in a.variants.iter().zip(&b.variants) {
            if x.name != y.name
                || x.discriminant != y.discriminant
                || !self.compare_structures(&x.body, &y.body, depth + 1)?
            {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.kind {
            TypeKind::Function(l, r) => {
                if matches!(l.kind, TypeKind::Function(..)) {
                    write!(f, "({l}) -> {r}")?;
                } else {
                    write!(f, "{l} -> {r}")?;
                }
            }
            TypeKind::Primitive(p) => f.write_str(p.name())?,
            TypeKind::Pointer(b) => write!(f, "[{b}]")?,
            TypeKind::Buffer(b, BufferCount::Known(n)) => write!(f, "[{b} {n}]")?,
            TypeKind::Buffer(b, BufferCount::Constant(c)) => write!(f, "[{b} {c}]")?,
            TypeKind::User(name) => f.write_str(name)?,
            TypeKind::Struct(s) => write!(f, "{s}")?,
            TypeKind::Procedure(b) => write!(f, "procedure {b}")?,
            TypeKind::None => f.write_str("none")?,
            TypeKind::InternalAny => f.write_str("any")?,
        }
        if self.mutable {
            f.write_str(" mut")?;
        }
        Ok(())
    }
}

impl fmt::Display for Structure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for field in &self.fields {
            write!(f, " {} {};", field.ty, field.name)?;
        }
        for variant in &self.variants {
            write!(f, " {} = {} {}", variant.name, variant.discriminant, variant.body)?;
        }
        f.write_str(" }")
    }
}
