//! Compiler orchestration: one source unit through lexing, parsing (with its
//! imports) and analysis.

use std::fs;
use std::path::Path;

use tracing::info;

use crate::ast::Program;
use crate::config::CompileOptions;
use crate::error::CoreResult;
use crate::loader::{FsLoader, ModuleLoader};
use crate::parser::parse_unit;
use crate::span::Position;
use crate::typecheck::analyze;

/// An analysed unit together with everything it imported.
#[derive(Debug)]
pub struct Compilation {
    pub unit: String,
    pub program: Program,
}

/// Name and rendered type of one function in a [`Compilation`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FunctionSummary {
    pub name: String,
    pub ty: String,
    pub lifted: bool,
}

impl Compilation {
    /// Every function in declaration order, lifted ones last.
    pub fn summary(&self) -> Vec<FunctionSummary> {
        self.program
            .functions
            .iter()
            .map(|f| FunctionSummary {
                name: f.name.clone(),
                ty: f.ty.to_string(),
                lifted: f.lifted,
            })
            .collect()
    }

    pub fn declared_count(&self) -> usize {
        self.program.functions.iter().filter(|f| !f.lifted).count()
    }

    pub fn lifted_count(&self) -> usize {
        self.program.lifted_functions().count()
    }
}

pub fn compile_source(
    unit: &str,
    source: &str,
    loader: &mut dyn ModuleLoader,
    options: &CompileOptions,
) -> CoreResult<Compilation> {
    let limits = &options.limits;
    let mut program = Program::new(limits);
    // A unit that imports itself (directly or through a cycle) is already
    // being parsed.
    program.add_import(unit, Position::synthetic());
    parse_unit(unit, source, &mut program, loader, limits)?;
    analyze(&mut program, limits)?;

    let compilation = Compilation {
        unit: unit.to_string(),
        program,
    };
    info!(
        unit,
        functions = compilation.declared_count(),
        lifted = compilation.lifted_count(),
        "compiled unit"
    );
    Ok(compilation)
}

/// Compiles the file at `path`. Imports are looked up in
/// `options.search_dir`.
pub fn compile_file(path: impl AsRef<Path>, options: &CompileOptions) -> CoreResult<Compilation> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)?;
    let unit = path
        .file_stem()
        .and_then(|stem| stem.to_str())
        .unwrap_or("main");
    let mut loader = FsLoader::new(&options.search_dir);
    compile_source(unit, &source, &mut loader, options)
}
