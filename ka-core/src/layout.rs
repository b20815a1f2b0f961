//! Program-level type checks and memory layout.
//!
//! [`prepare`] runs once before analysis: it validates every type written in
//! the source, replaces named buffer counts with their constant values and
//! rejects structures that contain themselves by value. [`layout_of`]
//! computes the sizes reported by `sizeof`.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::ast::{ConstValue, ExprKind, Program, SizeofTarget};
use crate::builtins::find_builtin;
use crate::config::Limits;
use crate::error::{CoreError, CoreResult};
use crate::span::Position;
use crate::types::{resolve_named, BufferCount, Structure, Type, TypeKind, TypeLookup};

/// Size of the tag stored in front of variant payloads.
const DISCRIMINANT_SIZE: u64 = 4;
const POINTER_SIZE: u64 = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Layout {
    pub size: u64,
    pub align: u64,
}

impl Layout {
    const EMPTY: Layout = Layout { size: 0, align: 1 };

    fn scalar(size: u64) -> Self {
        Layout { size, align: size }
    }
}

fn round_up(value: u64, align: u64) -> Option<u64> {
    value.div_ceil(align).checked_mul(align)
}

/// Offset just past a member of layout `member` placed after `offset`.
fn place(offset: u64, member: Layout) -> Option<u64> {
    round_up(offset, member.align)?.checked_add(member.size)
}

/// Computes the layout of `ty`, following type names through `env`.
pub fn layout_of(ty: &Type, env: &dyn TypeLookup, max_depth: usize, at: Position) -> CoreResult<Layout> {
    let ty = resolve_named(ty, env, max_depth, at)?;
    match &ty.kind {
        TypeKind::Primitive(p) => Ok(Layout::scalar(p.byte_size())),
        TypeKind::Pointer(_) | TypeKind::Function(..) | TypeKind::Procedure(_) => {
            Ok(Layout::scalar(POINTER_SIZE))
        }
        TypeKind::Buffer(base, BufferCount::Known(count)) => {
            let element = layout_of(base, env, max_depth, at)?;
            let size = element
                .size
                .checked_mul(*count)
                .ok_or_else(|| overflow(&ty, at))?;
            Ok(Layout {
                size,
                align: element.align,
            })
        }
        TypeKind::Buffer(_, BufferCount::Constant(name)) => Err(CoreError::semantic(
            at,
            format!("buffer size `{name}` was never resolved"),
        )),
        TypeKind::Struct(s) => structure_layout(s, env, max_depth, at),
        TypeKind::None => Ok(Layout::EMPTY),
        TypeKind::InternalAny => Err(CoreError::semantic(at, "size of `any` is unknown")),
        TypeKind::User(_) => unreachable!("resolve_named returned a named type"),
    }
}

fn overflow(what: &dyn std::fmt::Display, at: Position) -> CoreError {
    CoreError::semantic(at, format!("size of `{what}` overflows"))
}

/// Fields in order at natural alignment, then a `u32` discriminant and the
/// largest variant payload when variants exist.
fn structure_layout(s: &Structure, env: &dyn TypeLookup, max_depth: usize, at: Position) -> CoreResult<Layout> {
    let too_large = || overflow(&Type::structure(s.clone()), at);
    let mut offset = 0;
    let mut align = 1;
    for field in &s.fields {
        let field = layout_of(&field.ty, env, max_depth, at)?;
        offset = place(offset, field).ok_or_else(too_large)?;
        align = align.max(field.align);
    }
    if !s.variants.is_empty() {
        offset = place(offset, Layout::scalar(DISCRIMINANT_SIZE)).ok_or_else(too_large)?;
        align = align.max(DISCRIMINANT_SIZE);
        let mut payload = Layout::EMPTY;
        for variant in &s.variants {
            let body = structure_layout(&variant.body, env, max_depth, at)?;
            payload.size = payload.size.max(body.size);
            payload.align = payload.align.max(body.align);
        }
        offset = place(offset, payload).ok_or_else(too_large)?;
        align = align.max(payload.align);
    }
    Ok(Layout {
        size: round_up(offset, align).ok_or_else(too_large)?,
        align,
    })
}

/// Declaration checks that must hold before any body is analysed.
pub fn prepare(program: &mut Program, limits: &Limits) -> CoreResult<()> {
    for function in &program.functions {
        if find_builtin(&function.name).is_some() {
            return Err(CoreError::semantic(
                function.position,
                format!("cannot redefine builtin operator `{}`", function.name),
            ));
        }
    }

    let normalizer = Normalizer::new(program);
    for decl in program.types.iter_mut().chain(program.aliases.iter_mut()) {
        normalizer.normalize(&mut decl.ty, decl.position)?;
    }
    for function in &mut program.functions {
        normalizer.normalize(&mut function.ty, function.position)?;
    }
    for (_, expr) in program.exprs.iter_mut() {
        let at = expr.position;
        match &mut expr.kind {
            ExprKind::Closure { function, .. } => normalizer.normalize(&mut function.ty, at)?,
            ExprKind::Cast { target, .. } => normalizer.normalize(target, at)?,
            ExprKind::Sizeof {
                target: SizeofTarget::Type(ty),
                ..
            } => normalizer.normalize(ty, at)?,
            _ => {}
        }
    }

    let program = &*program;
    for decl in program.types.iter().chain(&program.aliases) {
        let mut path = vec![decl.name.as_str()];
        reject_self_containment(program, &decl.ty, &mut path, limits.max_alias_depth, decl.position)?;
    }
    debug!(
        types = program.types.len(),
        aliases = program.aliases.len(),
        "declarations validated"
    );
    Ok(())
}

/// Resolves named buffer counts and checks that type names exist.
struct Normalizer {
    /// Constant name to its integer value, `None` for non-integer constants.
    counts: HashMap<String, Option<u64>>,
    type_names: HashSet<String>,
}

impl Normalizer {
    fn new(program: &Program) -> Self {
        let counts = program
            .constants
            .iter()
            .map(|c| {
                let value = match c.value {
                    ConstValue::Integer(n) => Some(n),
                    ConstValue::Float(_) | ConstValue::String(_) => None,
                };
                (c.name.clone(), value)
            })
            .collect();
        let type_names = program
            .types
            .iter()
            .chain(&program.aliases)
            .map(|d| d.name.clone())
            .collect();
        Normalizer { counts, type_names }
    }

    fn normalize(&self, ty: &mut Type, at: Position) -> CoreResult<()> {
        let mut failure = None;
        ty.walk_mut(&mut |t| {
            if failure.is_some() {
                return;
            }
            match &mut t.kind {
                TypeKind::Buffer(_, count) => {
                    let BufferCount::Constant(name) = &*count else {
                        return;
                    };
                    match self.counts.get(name.as_str()) {
                        Some(Some(n)) => *count = BufferCount::Known(*n),
                        Some(None) => {
                            failure = Some(CoreError::semantic(
                                at,
                                format!("buffer size `{name}` is not an integer constant"),
                            ))
                        }
                        None => {
                            failure = Some(CoreError::semantic(
                                at,
                                format!("unknown constant `{name}` used as a buffer size"),
                            ))
                        }
                    }
                }
                TypeKind::User(name) if !self.type_names.contains(name.as_str()) => {
                    failure = Some(CoreError::semantic(at, format!("unknown type `{name}`")));
                }
                _ => {}
            }
        });
        failure.map_or(Ok(()), Err)
    }
}

/// Follows by-value containment (fields, variants, buffer elements) and
/// fails if a name on `path` is reached again.
fn reject_self_containment<'p>(
    program: &'p Program,
    ty: &'p Type,
    path: &mut Vec<&'p str>,
    max_depth: usize,
    at: Position,
) -> CoreResult<()> {
    match &ty.kind {
        TypeKind::User(name) => {
            if path.contains(&name.as_str()) {
                return Err(CoreError::semantic(
                    at,
                    format!("type `{}` contains itself by value through `{name}`", path[0]),
                ));
            }
            if path.len() > max_depth {
                return Err(CoreError::limit("type name chain", max_depth));
            }
            let Some(inner) = program.lookup_type(name) else {
                return Ok(());
            };
            path.push(name.as_str());
            let result = reject_self_containment(program, inner, path, max_depth, at);
            path.pop();
            result
        }
        TypeKind::Buffer(base, _) => reject_self_containment(program, base, path, max_depth, at),
        TypeKind::Struct(s) => structure_containment(program, s, path, max_depth, at),
        _ => Ok(()),
    }
}

fn structure_containment<'p>(
    program: &'p Program,
    s: &'p Structure,
    path: &mut Vec<&'p str>,
    max_depth: usize,
    at: Position,
) -> CoreResult<()> {
    for field in &s.fields {
        reject_self_containment(program, &field.ty, path, max_depth, at)?;
    }
    for variant in &s.variants {
        structure_containment(program, &variant.body, path, max_depth, at)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::MemoryLoader;
    use crate::parser::parse_unit;
    use crate::types::Primitive;

    fn program(source: &str) -> CoreResult<Program> {
        let limits = Limits::default();
        let mut program = Program::new(&limits);
        let mut loader = MemoryLoader::new();
        parse_unit("main", source, &mut program, &mut loader, &limits)?;
        prepare(&mut program, &limits)?;
        Ok(program)
    }

    fn size(program: &Program, name: &str) -> u64 {
        layout_of(&Type::user(name), program, 64, Position::default())
            .expect("layout")
            .size
    }

    #[test]
    fn primitive_and_pointer_sizes() {
        let env = program("").expect("empty program");
        let at = Position::default();
        let cases = [
            (Type::primitive(Primitive::U8), 1),
            (Type::primitive(Primitive::I16), 2),
            (Type::primitive(Primitive::F32), 4),
            (Type::primitive(Primitive::U64), 8),
            (Type::int_any(), 8),
            (Type::pointer(Type::primitive(Primitive::I8)), 8),
            (Type::procedure(Type::none()), 8),
            (Type::buffer(Type::primitive(Primitive::I16), 3), 6),
        ];
        for (ty, expected) in cases {
            assert_eq!(layout_of(&ty, &env, 64, at).expect("layout").size, expected, "{ty}");
        }
    }

    #[test]
    fn fields_are_padded_to_natural_alignment() {
        let env = program("type P { i8 a; i32 b; i8 c; }").expect("program");
        assert_eq!(size(&env, "P"), 12);
    }

    #[test]
    fn variants_follow_a_u32_discriminant() {
        let env = program("type S { i32 x; a { i64 y; } b { i8 z; } }").expect("program");
        assert_eq!(size(&env, "S"), 16);
        let env = program("type T { a { i8 y; } }").expect("program");
        assert_eq!(size(&env, "T"), 8);
    }

    #[test]
    fn oversized_structures_are_an_error() {
        let env = program(
            "type S { [u8 18446744073709551615] a; [u8 18446744073709551615] b; }",
        )
        .expect("program");
        let err = layout_of(&Type::user("S"), &env, 64, Position::default()).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let env = program("type W { [i64 2305843009213693952] a; }").expect("program");
        let err = layout_of(&Type::user("W"), &env, 64, Position::default()).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");

        let env = program("type V { i8 k; a { [u8 18446744073709551614] x; } }").expect("program");
        let err = layout_of(&Type::user("V"), &env, 64, Position::default()).unwrap_err();
        assert!(err.to_string().contains("overflows"), "{err}");
    }

    #[test]
    fn named_buffer_counts_are_resolved() {
        let env = program("constant N = 4; type B { [i32 N] data; }").expect("program");
        let ty = env.lookup_type("B").expect("B").to_string();
        assert_eq!(ty, "{ [i32 4] data; }");
        assert_eq!(size(&env, "B"), 16);
    }

    #[test]
    fn non_integer_buffer_counts_are_rejected() {
        let err = program("constant N = 1.5; type B { [i32 N] data; }").unwrap_err();
        assert!(err.to_string().contains("not an integer constant"));
        let err = program("type B { [i32 M] data; }").unwrap_err();
        assert!(err.to_string().contains("unknown constant `M`"));
    }

    #[test]
    fn unknown_type_names_are_rejected() {
        let err = program("i32 -> Missing f = \\x (return x;);").unwrap_err();
        assert!(err.to_string().contains("unknown type `Missing`"));
    }

    #[test]
    fn self_containment_is_rejected_but_pointers_are_fine() {
        let err = program("type Node { i32 v; Node next; }").unwrap_err();
        assert!(err.to_string().contains("contains itself"));
        let err = program("type A { B b; } type B { [A 2] items; }").unwrap_err();
        assert!(err.to_string().contains("contains itself"));
        program("type List { i32 v; [List] next; }").expect("pointer recursion");
    }

    #[test]
    fn builtin_names_cannot_be_redefined() {
        let err = program("i32 -> i32 -> i32 + = \\a b (return a;);").unwrap_err();
        assert!(err.to_string().contains("builtin operator `+`"));
    }
}
