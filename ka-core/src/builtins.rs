//! Builtin operators.
//!
//! These are bound in the permanent bottom frame of every scope. Integer
//! operators are typed over the untyped-integer placeholder, so the first
//! concrete argument fixes the family member for the rest of the
//! application.

use crate::types::Type;

/// Signature family of a builtin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuiltinShape {
    /// `{integer} -> {integer} -> {integer}`
    BinaryInt,
    /// `{float} -> {float} -> {float}`
    BinaryFloat,
    /// `{float} -> {float} -> {integer}`
    FloatCompare,
    /// `{integer} -> {integer}`
    UnaryInt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuiltinDescriptor {
    pub name: &'static str,
    pub shape: BuiltinShape,
}

impl BuiltinDescriptor {
    pub fn ty(&self) -> Type {
        let int = Type::int_any;
        let float = Type::float_any;
        match self.shape {
            BuiltinShape::BinaryInt => Type::curried([int(), int()], int()),
            BuiltinShape::BinaryFloat => Type::curried([float(), float()], float()),
            BuiltinShape::FloatCompare => Type::curried([float(), float()], int()),
            BuiltinShape::UnaryInt => Type::function(int(), int()),
        }
    }
}

const fn binary(name: &'static str) -> BuiltinDescriptor {
    BuiltinDescriptor {
        name,
        shape: BuiltinShape::BinaryInt,
    }
}

const fn float(name: &'static str, shape: BuiltinShape) -> BuiltinDescriptor {
    BuiltinDescriptor { name, shape }
}

pub const BUILTINS: &[BuiltinDescriptor] = &[
    binary("+"),
    binary("-"),
    binary("*"),
    binary("/"),
    binary("%"),
    binary("<<"),
    binary(">>"),
    binary("<"),
    binary(">"),
    binary("<="),
    binary(">="),
    binary("=="),
    binary("!="),
    binary("&&"),
    binary("||"),
    binary("&"),
    binary("|"),
    binary("^"),
    BuiltinDescriptor {
        name: "~",
        shape: BuiltinShape::UnaryInt,
    },
    BuiltinDescriptor {
        name: "!",
        shape: BuiltinShape::UnaryInt,
    },
    float(".+", BuiltinShape::BinaryFloat),
    float(".-", BuiltinShape::BinaryFloat),
    float(".*", BuiltinShape::BinaryFloat),
    float("./", BuiltinShape::BinaryFloat),
    float(".<", BuiltinShape::FloatCompare),
    float(".>", BuiltinShape::FloatCompare),
    float(".<=", BuiltinShape::FloatCompare),
    float(".>=", BuiltinShape::FloatCompare),
    float(".==", BuiltinShape::FloatCompare),
    float(".!=", BuiltinShape::FloatCompare),
];

pub fn find_builtin(name: &str) -> Option<&'static BuiltinDescriptor> {
    BUILTINS.iter().find(|b| b.name == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_operators_are_curried_placeholders() {
        let plus = find_builtin("+").expect("+ exists");
        assert_eq!(plus.ty().to_string(), "{integer} -> {integer} -> {integer}");
        assert_eq!(
            find_builtin(".<").expect(".< exists").ty().to_string(),
            "{float} -> {float} -> {integer}"
        );
        assert_eq!(find_builtin("!").expect("! exists").shape, BuiltinShape::UnaryInt);
    }

    #[test]
    fn every_builtin_is_a_lexer_operator() {
        for builtin in BUILTINS {
            let stream = crate::lexer::lex(builtin.name).expect("lex");
            assert!(stream.tokens[0].kind.is_operator(), "{}", builtin.name);
            assert_eq!(stream.tokens.len(), 2);
        }
    }
}
