//! Template source loaders.
//!
//! Loaders resolve `{% include %}` / `{% import %}` names to template text.
//! Text loaded here is trusted by construction: the loader is the authority
//! that decides which sources may contain template syntax, so everything it
//! returns is a trusted scalar.

use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::error::{Result, TemplateError};
use crate::trust::Trustable;
use crate::value::TaggedStr;

/// Resolves template names to trusted template text.
pub trait TemplateLoader: Send + Sync + std::fmt::Debug {
    /// Load the named source. Fails with
    /// [`TemplateError::SourceNotFound`] when the name is unknown.
    fn load(&self, name: &str) -> Result<TaggedStr>;

    /// Base directory for relative path resolution, when the loader is
    /// filesystem-backed.
    fn basedir(&self) -> Option<&Path> {
        None
    }
}

/// Loads templates from files under a base directory.
#[derive(Debug)]
pub struct FileSystemLoader {
    basedir: PathBuf,
}

impl FileSystemLoader {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: basedir.into(),
        }
    }
}

impl TemplateLoader for FileSystemLoader {
    fn load(&self, name: &str) -> Result<TaggedStr> {
        // Reject absolute names and parent traversal; includes are always
        // relative to the base directory.
        let rel = Path::new(name);
        if rel.is_absolute()
            || rel
                .components()
                .any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(TemplateError::SourceNotFound {
                name: name.to_string(),
            });
        }

        let path = self.basedir.join(rel);
        if !path.is_file() {
            return Err(TemplateError::SourceNotFound {
                name: name.to_string(),
            });
        }

        let file = fs::File::open(&path)?;
        Trustable::Stream(Box::new(file)).into_trusted()
    }

    fn basedir(&self) -> Option<&Path> {
        Some(&self.basedir)
    }
}

/// Loads templates from an in-memory name-to-text map. Used by tests and by
/// embedders that assemble template sets programmatically.
#[derive(Debug, Default)]
pub struct DictLoader {
    sources: IndexMap<String, String>,
}

impl DictLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a named source, replacing any existing entry.
    pub fn insert(&mut self, name: impl Into<String>, text: impl Into<String>) {
        self.sources.insert(name.into(), text.into());
    }

    /// Builder-style variant of [`insert`](Self::insert).
    pub fn with_source(mut self, name: impl Into<String>, text: impl Into<String>) -> Self {
        self.insert(name, text);
        self
    }
}

impl TemplateLoader for DictLoader {
    fn load(&self, name: &str) -> Result<TaggedStr> {
        self.sources
            .get(name)
            .map(|text| TaggedStr::trusted(text.clone()))
            .ok_or_else(|| TemplateError::SourceNotFound {
                name: name.to_string(),
            })
    }
}
