//! Model discovery from disk.
//!
//! The crate consumes raw declarations through the `ModelSource` trait so
//! callers can plug in whatever loading strategy they have. The bundled
//! implementation reads `.json` declaration files from a directory tree in a
//! deterministic order.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::error::{Error, Result};

use super::definition::RawModel;

/// Source of raw model declarations.
pub trait ModelSource {
    fn load(&self) -> Result<Vec<RawModel>>;
}

/// Loads `*.json` model declarations from a directory, recursively, sorted
/// alphabetically for deterministic plan output.
#[derive(Debug, Clone)]
pub struct JsonModelSource {
    models_dir: PathBuf,
}

impl JsonModelSource {
    pub fn new(models_dir: impl Into<PathBuf>) -> Self {
        Self {
            models_dir: models_dir.into(),
        }
    }

    fn discover(&self) -> Result<Vec<PathBuf>> {
        let pattern = format!("{}/**/*.json", self.models_dir.display());
        let mut files: Vec<PathBuf> = glob::glob(&pattern)
            .map_err(|e| Error::ModelSource(format!("invalid model glob {pattern}: {e}")))?
            .filter_map(|entry| entry.ok())
            .collect();
        files.sort();

        // Symlinks must stay inside the models directory.
        let root = fs::canonicalize(&self.models_dir)
            .map_err(|e| Error::ModelSource(format!("unresolvable models dir: {e}")))?;
        for file in &files {
            if file.is_symlink() {
                let real = fs::canonicalize(file)
                    .map_err(|e| Error::ModelSource(format!("unresolvable symlink: {e}")))?;
                if !real.starts_with(&root) {
                    return Err(Error::ModelSource(format!(
                        "symlink points outside the models directory: {} -> {}",
                        file.display(),
                        real.display()
                    )));
                }
            }
        }
        Ok(files)
    }

    fn parse_file(path: &Path) -> Result<RawModel> {
        let content = fs::read_to_string(path)
            .map_err(|e| Error::ModelSource(format!("failed to read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::ModelSource(format!("failed to parse {}: {e}", path.display())))
    }
}

impl ModelSource for JsonModelSource {
    fn load(&self) -> Result<Vec<RawModel>> {
        let files = self.discover()?;
        info!(count = files.len(), dir = %self.models_dir.display(), "loading model declarations");
        let mut models = Vec::with_capacity(files.len());
        for file in files {
            debug!(file = %file.display(), "parsing model declaration");
            models.push(Self::parse_file(&file)?);
        }
        Ok(models)
    }
}

/// A fixed in-memory set of declarations; the usual source in tests and for
/// callers that assemble definitions programmatically.
#[derive(Debug, Clone, Default)]
pub struct StaticModelSource {
    models: Vec<RawModel>,
}

impl StaticModelSource {
    pub fn new(models: Vec<RawModel>) -> Self {
        Self { models }
    }
}

impl ModelSource for StaticModelSource {
    fn load(&self) -> Result<Vec<RawModel>> {
        Ok(self.models.clone())
    }
}
