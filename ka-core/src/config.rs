//! Compilation options and configured maxima.

use std::path::PathBuf;

/// Upper bounds enforced while lexing, parsing and analyzing a unit.
///
/// Every bound turns into `CoreError::LimitExceeded` when crossed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Limits {
    /// Expression arena capacity, in nodes.
    pub max_nodes: usize,
    /// String-literal arena capacity, in bytes.
    pub max_text: usize,
    /// Parser and analyzer recursion depth.
    pub max_depth: usize,
    pub max_bindings: usize,
    /// Distinct outer names a single lambda may capture.
    pub max_captures: usize,
    pub max_params: usize,
    pub max_members: usize,
    pub max_struct_nesting: usize,
    pub max_imports: usize,
    pub max_alias_depth: usize,
}

impl Default for Limits {
    fn default() -> Self {
        Limits {
            max_nodes: 0x10_0000,
            max_text: 0x10_0000,
            max_depth: 256,
            max_bindings: 10_000,
            max_captures: 256,
            max_params: 16,
            max_members: 256,
            max_struct_nesting: 8,
            max_imports: 100,
            max_alias_depth: 64,
        }
    }
}

#[derive(Debug, Clone)]
pub struct CompileOptions {
    pub limits: Limits,
    /// Directory `using` imports are resolved against.
    pub search_dir: PathBuf,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            limits: Limits::default(),
            search_dir: PathBuf::from("."),
        }
    }
}

impl CompileOptions {
    pub fn with_search_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.search_dir = dir.into();
        self
    }

    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }
}
