//! File content lookup.
//!
//! ```jinja2
//! {{ lookup('file', '/etc/hostname') }}
//! ```
//!
//! Content is returned with trailing newlines stripped. Text read through
//! this lookup is data, never a template; it is not trusted for templating.

use std::path::PathBuf;

use super::{LookupPlugin, LookupResult};

/// Reads file contents, resolving relative paths against an optional base
/// directory.
#[derive(Debug, Default)]
pub struct FileLookup {
    basedir: Option<PathBuf>,
}

impl FileLookup {
    pub fn new(basedir: impl Into<PathBuf>) -> Self {
        Self {
            basedir: Some(basedir.into()),
        }
    }
}

impl LookupPlugin for FileLookup {
    fn name(&self) -> &'static str {
        "file"
    }

    fn description(&self) -> &'static str {
        "Read file contents"
    }

    fn run(&self, terms: &[String]) -> LookupResult<Vec<minijinja::Value>> {
        terms
            .iter()
            .map(|term| {
                let path = PathBuf::from(term);
                let path = match (&self.basedir, path.is_absolute()) {
                    (Some(base), false) => base.join(&path),
                    _ => path,
                };
                let content = std::fs::read_to_string(&path)?;
                Ok(minijinja::Value::from(content.trim_end_matches('\n')))
            })
            .collect()
    }
}
