//! Front end for the ka language.
//!
//! The pipeline is:
//!
//!   source .ka
//!     -> lexer     (tokens, djb2-hashed keywords)
//!     -> parser    (speculative descent into the expression arena)
//!     -> layout    (declaration checks, buffer counts, sizes)
//!     -> typecheck (names, types, captures, labels)
//!     -> lift      (nested lambdas become top-level functions)
//!
//! Code generation is out of scope; the result is an analysed [`ast::Program`].

// ---------------------------------------------------------------------
// Error handling, positions and configuration
// ---------------------------------------------------------------------

pub mod span;
pub mod error;
pub mod config;

// ---------------------------------------------------------------------
// Front-end: storage, lexing and parsing
// ---------------------------------------------------------------------

pub mod arena;
pub mod lexer;
pub mod ast;
pub mod parser;

// ---------------------------------------------------------------------
// Semantic layers: types, scopes, analysis, lifting, layout
// ---------------------------------------------------------------------

pub mod types;
pub mod builtins;
pub mod scope;
pub mod typecheck;
pub mod lift;
pub mod layout;

// ---------------------------------------------------------------------
// Module loading and compiler orchestration
// ---------------------------------------------------------------------

pub mod loader;
pub mod compiler;

// ---------------------------------------------------------------------
// Public API re-exports
// ---------------------------------------------------------------------

pub use compiler::{Compilation, FunctionSummary, compile_file, compile_source};
pub use config::{CompileOptions, Limits};
pub use error::{CoreError, CoreResult};
pub use loader::{FsLoader, MemoryLoader, ModuleLoader, collect_sources};
