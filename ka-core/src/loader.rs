//! Module loading for `using` imports.

use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{CoreError, CoreResult};

/// File extension of ka source units.
pub const SOURCE_EXTENSION: &str = "ka";

/// Supplies the source text of imported modules.
pub trait ModuleLoader {
    fn load(&mut self, name: &str) -> CoreResult<String>;
}

/// Reads `<root>/<name>.ka`.
#[derive(Debug, Clone)]
pub struct FsLoader {
    root: PathBuf,
}

impl FsLoader {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsLoader { root: root.into() }
    }

    pub fn module_path(&self, name: &str) -> PathBuf {
        self.root.join(format!("{name}.{SOURCE_EXTENSION}"))
    }
}

impl ModuleLoader for FsLoader {
    fn load(&mut self, name: &str) -> CoreResult<String> {
        let path = self.module_path(name);
        match fs::read_to_string(&path) {
            Ok(source) => Ok(source),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                Err(CoreError::ModuleNotFound {
                    name: name.to_string(),
                    path,
                })
            }
            Err(err) => Err(CoreError::SourceIo(err)),
        }
    }
}

/// In-memory modules. Counts how often each module was requested.
#[derive(Debug, Default)]
pub struct MemoryLoader {
    modules: HashMap<String, String>,
    loads: HashMap<String, usize>,
}

impl MemoryLoader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_module(mut self, name: &str, source: &str) -> Self {
        self.modules.insert(name.to_string(), source.to_string());
        self
    }

    pub fn load_count(&self, name: &str) -> usize {
        self.loads.get(name).copied().unwrap_or(0)
    }
}

impl ModuleLoader for MemoryLoader {
    fn load(&mut self, name: &str) -> CoreResult<String> {
        *self.loads.entry(name.to_string()).or_default() += 1;
        self.modules
            .get(name)
            .cloned()
            .ok_or_else(|| CoreError::ModuleNotFound {
                name: name.to_string(),
                path: PathBuf::from(format!("{name}.{SOURCE_EXTENSION}")),
            })
    }
}

/// Every `.ka` file under `root`, sorted by path.
pub fn collect_sources(root: impl AsRef<Path>) -> Result<Vec<PathBuf>, io::Error> {
    let root = root.as_ref();
    let mut files = Vec::new();
    for entry in WalkDir::new(root) {
        let entry = entry.map_err(io::Error::other)?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == SOURCE_EXTENSION) {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
