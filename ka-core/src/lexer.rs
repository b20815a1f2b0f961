//! Lexer for ka sources.
//!
//! One pass over the source bytes. Every token's text is copied once
//! into a side buffer owned by the [`TokenStream`]; tokens only carry a
//! [`TextRange`] into it. String and character literals are stored
//! already decoded.
//!
//! Keywords and operators are classified by a djb2 hash computed while
//! the identifier (or symbol run) is being scanned, so classification is
//! a single table probe.

use std::collections::HashMap;
use std::sync::LazyLock;

use crate::arena::TextRange;
use crate::error::{CoreError, CoreResult};
use crate::span::Position;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Eof,

    // Identifiers and literals
    Ident,
    Integer,
    Float,
    Char,
    String,
    /// `name:` in front of `if` / `for`.
    Label,
    /// `:name` after `break` / `continue`.
    LabelJump,
    /// Operator run with no builtin meaning (user-definable).
    Symbol,

    // Always single-character tokens
    LParen,
    RParen,
    LBrace,
    RBrace,
    LBracket,
    RBracket,
    Semi,
    Comma,

    // Structural operators
    Assign,    // =
    Arrow,     // ->
    Backslash, // \
    Dollar,    // $
    Hash,      // #
    Dot,       // .
    PipeLeft,  // <|
    PipeRight, // |>

    // Integer operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Shl,
    Shr,
    Lt,
    Gt,
    Le,
    Ge,
    EqEq,
    NotEq,
    AndAnd,
    OrOr,
    Amp,
    Bar,
    Caret,
    Tilde,
    Bang,

    // Float operators
    FPlus,
    FMinus,
    FStar,
    FSlash,
    FLt,
    FGt,
    FLe,
    FGe,
    FEqEq,
    FNotEq,

    // Keywords
    Using,
    Type,
    Alias,
    Constant,
    If,
    Else,
    For,
    Break,
    Continue,
    Return,
    Ref,
    Mut,
    Procedure,
    Cast,
    Sizeof,

    // Primitive type keywords
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
}

impl TokenKind {
    /// Operators that can be referenced and defined like ordinary names.
    pub fn is_operator(self) -> bool {
        use TokenKind::*;
        matches!(
            self,
            Symbol
                | Dot
                | PipeLeft
                | PipeRight
                | Plus
                | Minus
                | Star
                | Slash
                | Percent
                | Shl
                | Shr
                | Lt
                | Gt
                | Le
                | Ge
                | EqEq
                | NotEq
                | AndAnd
                | OrOr
                | Amp
                | Bar
                | Caret
                | Tilde
                | Bang
                | FPlus
                | FMinus
                | FStar
                | FSlash
                | FLt
                | FGt
                | FLe
                | FGe
                | FEqEq
                | FNotEq
        )
    }

    pub fn is_primitive(self) -> bool {
        use TokenKind::*;
        matches!(self, U8 | U16 | U32 | U64 | I8 | I16 | I32 | I64 | F32 | F64)
    }

    /// Tokens a type can start with. Used to decide whether a closure
    /// definition is worth attempting.
    pub fn starts_type(self) -> bool {
        self.is_primitive()
            || matches!(
                self,
                TokenKind::Ident
                    | TokenKind::LBracket
                    | TokenKind::LParen
                    | TokenKind::LBrace
                    | TokenKind::Procedure
            )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    /// Range into [`TokenStream::text`].
    pub text: TextRange,
    pub position: Position,
}

/// Result of lexing one source unit.
#[derive(Debug)]
pub struct TokenStream {
    pub tokens: Vec<Token>,
    text: String,
}

impl TokenStream {
    pub fn text(&self, token: &Token) -> &str {
        &self.text[token.text.as_range()]
    }

    /// Token at `index`, clamped to the trailing `Eof`.
    pub fn get(&self, index: usize) -> &Token {
        let last = self.tokens.len() - 1;
        &self.tokens[index.min(last)]
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.len() <= 1
    }
}

/// Incremental djb2: `h * 33 + byte`, seeded with 5381.
pub const HASH_SEED: u64 = 5381;

#[inline]
pub fn hash_step(hash: u64, byte: u8) -> u64 {
    hash.wrapping_mul(33).wrapping_add(byte as u64)
}

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(HASH_SEED, |h, &b| hash_step(h, b))
}

const RESERVED: &[(&str, TokenKind)] = &[
    ("using", TokenKind::Using),
    ("type", TokenKind::Type),
    ("alias", TokenKind::Alias),
    ("constant", TokenKind::Constant),
    ("if", TokenKind::If),
    ("else", TokenKind::Else),
    ("for", TokenKind::For),
    ("break", TokenKind::Break),
    ("continue", TokenKind::Continue),
    ("return", TokenKind::Return),
    ("ref", TokenKind::Ref),
    ("mut", TokenKind::Mut),
    ("procedure", TokenKind::Procedure),
    ("cast", TokenKind::Cast),
    ("sizeof", TokenKind::Sizeof),
    ("u8", TokenKind::U8),
    ("u16", TokenKind::U16),
    ("u32", TokenKind::U32),
    ("u64", TokenKind::U64),
    ("i8", TokenKind::I8),
    ("i16", TokenKind::I16),
    ("i32", TokenKind::I32),
    ("i64", TokenKind::I64),
    ("f32", TokenKind::F32),
    ("f64", TokenKind::F64),
    ("=", TokenKind::Assign),
    ("->", TokenKind::Arrow),
    ("\\", TokenKind::Backslash),
    ("$", TokenKind::Dollar),
    ("#", TokenKind::Hash),
    (".", TokenKind::Dot),
    ("<|", TokenKind::PipeLeft),
    ("|>", TokenKind::PipeRight),
    ("+", TokenKind::Plus),
    ("-", TokenKind::Minus),
    ("*", TokenKind::Star),
    ("/", TokenKind::Slash),
    ("%", TokenKind::Percent),
    ("<<", TokenKind::Shl),
    (">>", TokenKind::Shr),
    ("<", TokenKind::Lt),
    (">", TokenKind::Gt),
    ("<=", TokenKind::Le),
    (">=", TokenKind::Ge),
    ("==", TokenKind::EqEq),
    ("!=", TokenKind::NotEq),
    ("&&", TokenKind::AndAnd),
    ("||", TokenKind::OrOr),
    ("&", TokenKind::Amp),
    ("|", TokenKind::Bar),
    ("^", TokenKind::Caret),
    ("~", TokenKind::Tilde),
    ("!", TokenKind::Bang),
    (".+", TokenKind::FPlus),
    (".-", TokenKind::FMinus),
    (".*", TokenKind::FStar),
    ("./", TokenKind::FSlash),
    (".<", TokenKind::FLt),
    (".>", TokenKind::FGt),
    (".<=", TokenKind::FLe),
    (".>=", TokenKind::FGe),
    (".==", TokenKind::FEqEq),
    (".!=", TokenKind::FNotEq),
];

static RESERVED_BY_HASH: LazyLock<HashMap<u64, TokenKind>> = LazyLock::new(|| {
    RESERVED
        .iter()
        .map(|(text, kind)| (hash_bytes(text.as_bytes()), *kind))
        .collect()
});

/// Lex a whole source unit. The first malformed token aborts the unit.
pub fn lex(source: &str) -> CoreResult<TokenStream> {
    let mut lexer = Lexer {
        chars: source.as_bytes(),
        index: 0,
        line: 1,
        col: 1,
        text: String::with_capacity(source.len()),
        tokens: Vec::new(),
    };
    lexer.run()?;
    tracing::trace!(tokens = lexer.tokens.len(), "lexed unit");
    Ok(TokenStream {
        tokens: lexer.tokens,
        text: lexer.text,
    })
}

struct Lexer<'src> {
    chars: &'src [u8],
    index: usize,
    line: u32,
    col: u32,
    text: String,
    tokens: Vec<Token>,
}

impl<'src> Lexer<'src> {
    fn run(&mut self) -> CoreResult<()> {
        while let Some(ch) = self.peek_char() {
            if is_whitespace(ch) {
                self.consume_char();
                continue;
            }
            if ch == b'/' && self.peek_next() == Some(b'/') {
                self.skip_line_comment();
                continue;
            }
            if ch == b'/' && self.peek_next() == Some(b'*') {
                self.skip_block_comment()?;
                continue;
            }

            let position = self.position();
            let start = self.index;
            match ch {
                b'(' => self.single(TokenKind::LParen, position),
                b')' => self.single(TokenKind::RParen, position),
                b'{' => self.single(TokenKind::LBrace, position),
                b'}' => self.single(TokenKind::RBrace, position),
                b'[' => self.single(TokenKind::LBracket, position),
                b']' => self.single(TokenKind::RBracket, position),
                b';' => self.single(TokenKind::Semi, position),
                b',' => self.single(TokenKind::Comma, position),
                b'"' => self.lex_string(position)?,
                b'\'' => self.lex_char(position)?,
                b'0'..=b'9' => self.lex_number(start, position),
                b':' if self.peek_next().is_some_and(is_ident_start) => {
                    self.consume_char();
                    let name_start = self.index;
                    while self.peek_char().is_some_and(is_ident_continue) {
                        self.consume_char();
                    }
                    self.push_source(TokenKind::LabelJump, name_start, position);
                }
                _ if is_ident_start(ch) => self.lex_ident_or_keyword(start, position),
                _ if is_symbol(ch) => self.lex_symbol(start, position),
                _ => {
                    return Err(CoreError::Lex {
                        position,
                        message: format!("unexpected character {:?}", ch as char),
                    });
                }
            }
        }

        let position = self.position();
        let at = self.text.len() as u32;
        self.tokens.push(Token {
            kind: TokenKind::Eof,
            text: TextRange { start: at, end: at },
            position,
        });
        Ok(())
    }

    fn single(&mut self, kind: TokenKind, position: Position) {
        let start = self.index;
        self.consume_char();
        self.push_source(kind, start, position);
    }

    /// Copies `source[start..index]` into the side buffer.
    fn push_source(&mut self, kind: TokenKind, start: usize, position: Position) {
        let bytes = &self.chars[start..self.index];
        // Token boundaries always fall on ASCII bytes.
        let piece = std::str::from_utf8(bytes).unwrap_or_default();
        self.push_text(kind, piece, position);
    }

    fn push_text(&mut self, kind: TokenKind, piece: &str, position: Position) {
        let begin = self.text.len() as u32;
        self.text.push_str(piece);
        self.tokens.push(Token {
            kind,
            text: TextRange {
                start: begin,
                end: self.text.len() as u32,
            },
            position,
        });
    }

    fn lex_number(&mut self, start: usize, position: Position) {
        while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
            self.consume_char();
        }

        let mut kind = TokenKind::Integer;
        if self.peek_char() == Some(b'.') && self.peek_next().is_some_and(|c| c.is_ascii_digit()) {
            kind = TokenKind::Float;
            self.consume_char(); // '.'
            while self.peek_char().is_some_and(|c| c.is_ascii_digit()) {
                self.consume_char();
            }
        }
        self.push_source(kind, start, position);
    }

    fn lex_ident_or_keyword(&mut self, start: usize, position: Position) {
        let mut hash = HASH_SEED;
        while let Some(ch) = self.peek_char() {
            if !is_ident_continue(ch) {
                break;
            }
            hash = hash_step(hash, ch);
            self.consume_char();
        }

        if self.peek_char() == Some(b':') && self.peek_next() != Some(b':') {
            self.push_source(TokenKind::Label, start, position);
            self.consume_char(); // ':'
            return;
        }

        let kind = match RESERVED_BY_HASH.get(&hash) {
            Some(kind) if !is_operator_kind(*kind) => *kind,
            _ => TokenKind::Ident,
        };
        self.push_source(kind, start, position);
    }

    fn lex_symbol(&mut self, start: usize, position: Position) {
        let mut hash = HASH_SEED;
        while let Some(ch) = self.peek_char() {
            if !is_symbol(ch) || self.index > start && starts_comment(ch, self.peek_next()) {
                break;
            }
            hash = hash_step(hash, ch);
            self.consume_char();
        }

        let kind = match RESERVED_BY_HASH.get(&hash) {
            Some(kind) if is_operator_kind(*kind) => *kind,
            _ => TokenKind::Symbol,
        };
        self.push_source(kind, start, position);
    }

    fn lex_string(&mut self, position: Position) -> CoreResult<()> {
        self.consume_char(); // opening quote
        let mut buf = Vec::new();
        loop {
            match self.peek_char() {
                None => {
                    return Err(CoreError::Lex {
                        position,
                        message: "unterminated string literal".to_string(),
                    });
                }
                Some(b'"') => {
                    self.consume_char();
                    break;
                }
                Some(b'\\') => buf.push(self.lex_escape(position)?),
                Some(ch) => {
                    buf.push(ch);
                    self.consume_char();
                }
            }
        }
        let decoded = String::from_utf8(buf).map_err(|_| CoreError::Lex {
            position,
            message: "string literal is not valid UTF-8".to_string(),
        })?;
        self.push_text(TokenKind::String, &decoded, position);
        Ok(())
    }

    fn lex_char(&mut self, position: Position) -> CoreResult<()> {
        self.consume_char(); // opening quote
        let value = match self.peek_char() {
            Some(b'\\') => self.lex_escape(position)?,
            Some(ch) if ch.is_ascii() && ch != b'\'' => {
                self.consume_char();
                ch
            }
            _ => {
                return Err(CoreError::Lex {
                    position,
                    message: "malformed character literal".to_string(),
                });
            }
        };
        if self.peek_char() != Some(b'\'') {
            return Err(CoreError::Lex {
                position,
                message: "unterminated character literal".to_string(),
            });
        }
        self.consume_char();
        let piece = (value as char).to_string();
        self.push_text(TokenKind::Char, &piece, position);
        Ok(())
    }

    /// Consumes `\x` and returns the decoded byte.
    fn lex_escape(&mut self, position: Position) -> CoreResult<u8> {
        self.consume_char(); // '\\'
        let decoded = match self.peek_char() {
            Some(b'n') => b'\n',
            Some(b't') => b'\t',
            Some(b'r') => b'\r',
            Some(b'0') => 0,
            Some(b'\\') => b'\\',
            Some(b'\'') => b'\'',
            Some(b'"') => b'"',
            Some(other) => {
                return Err(CoreError::Lex {
                    position,
                    message: format!("unknown escape sequence \\{}", other as char),
                });
            }
            None => {
                return Err(CoreError::Lex {
                    position,
                    message: "unterminated escape sequence".to_string(),
                });
            }
        };
        self.consume_char();
        Ok(decoded)
    }

    fn skip_line_comment(&mut self) {
        while let Some(ch) = self.peek_char() {
            if ch == b'\n' {
                break;
            }
            self.consume_char();
        }
    }

    fn skip_block_comment(&mut self) -> CoreResult<()> {
        let position = self.position();
        self.consume_char();
        self.consume_char();
        loop {
            match self.peek_char() {
                None => {
                    return Err(CoreError::Lex {
                        position,
                        message: "unterminated block comment".to_string(),
                    });
                }
                Some(b'*') if self.peek_next() == Some(b'/') => {
                    self.consume_char();
                    self.consume_char();
                    return Ok(());
                }
                Some(_) => self.consume_char(),
            }
        }
    }

    fn position(&self) -> Position {
        Position::new(self.line, self.col)
    }

    fn peek_char(&self) -> Option<u8> {
        self.chars.get(self.index).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.chars.get(self.index + 1).copied()
    }

    fn consume_char(&mut self) {
        if let Some(&ch) = self.chars.get(self.index) {
            self.index += 1;
            if ch == b'\n' {
                self.line += 1;
                self.col = 1;
            } else {
                self.col += 1;
            }
        }
    }
}

fn is_operator_kind(kind: TokenKind) -> bool {
    kind.is_operator()
        || matches!(
            kind,
            TokenKind::Assign
                | TokenKind::Arrow
                | TokenKind::Backslash
                | TokenKind::Dollar
                | TokenKind::Hash
        )
}

fn starts_comment(ch: u8, next: Option<u8>) -> bool {
    ch == b'/' && matches!(next, Some(b'/') | Some(b'*'))
}

fn is_whitespace(ch: u8) -> bool {
    matches!(ch, b' ' | b'\t' | b'\n' | b'\r')
}

fn is_ident_start(ch: u8) -> bool {
    ch.is_ascii_alphabetic() || ch == b'_'
}

fn is_ident_continue(ch: u8) -> bool {
    is_ident_start(ch) || ch.is_ascii_digit()
}

fn is_symbol(ch: u8) -> bool {
    matches!(
        ch,
        b'!' | b'#'
            | b'$'
            | b'%'
            | b'&'
            | b'*'
            | b'+'
            | b'-'
            | b'.'
            | b'/'
            | b':'
            | b'<'
            | b'='
            | b'>'
            | b'?'
            | b'@'
            | b'\\'
            | b'^'
            | b'|'
            | b'~'
            | b'`'
    )
}
