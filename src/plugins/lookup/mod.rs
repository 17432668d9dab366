//! Lookup plugins.
//!
//! Lookups retrieve data from outside the variable scope during evaluation,
//! exposed in templates through the `lookup(...)` and `query(...)` globals.
//! `lookup` joins multiple results with a comma for single-value use;
//! `query` always returns the full result list.
//!
//! Implement [`LookupPlugin`] and register it with a [`LookupRegistry`] to
//! add custom lookups.

pub mod env;
pub mod file;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// Errors raised by lookup plugins.
#[derive(Error, Debug)]
pub enum LookupError {
    /// The requested lookup plugin was not found.
    #[error("Lookup plugin not found: {0}")]
    NotFound(String),

    /// Invalid lookup term or argument.
    #[error("Invalid lookup term: {0}")]
    InvalidTerm(String),

    /// Environment variable not found.
    #[error("Environment variable not found: {0}")]
    EnvNotFound(String),

    /// IO error during lookup.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for lookup operations.
pub type LookupResult<T> = Result<T, LookupError>;

/// Trait implemented by all lookup plugins.
pub trait LookupPlugin: Send + Sync + fmt::Debug {
    /// The name used to invoke this lookup from templates.
    fn name(&self) -> &'static str;

    /// A one-line description of what the lookup does.
    fn description(&self) -> &'static str;

    /// Execute the lookup, returning one value per term.
    fn run(&self, terms: &[String]) -> LookupResult<Vec<minijinja::Value>>;
}

/// Registry of lookup plugins, shared with the template environment.
#[derive(Debug, Default)]
pub struct LookupRegistry {
    plugins: HashMap<String, Arc<dyn LookupPlugin>>,
}

impl LookupRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in lookups (`env`, `file`) registered.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(env::EnvLookup);
        registry.register(file::FileLookup::default());
        registry
    }

    /// Register a plugin, replacing any existing plugin with the same name.
    pub fn register<P: LookupPlugin + 'static>(&mut self, plugin: P) {
        self.plugins.insert(plugin.name().to_string(), Arc::new(plugin));
    }

    /// Look up a plugin by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn LookupPlugin>> {
        self.plugins.get(name).cloned()
    }

    /// Names of all registered plugins.
    pub fn list(&self) -> Vec<&str> {
        self.plugins.keys().map(|s| s.as_str()).collect()
    }

    /// Execute the named lookup.
    pub fn run(&self, name: &str, terms: &[String]) -> LookupResult<Vec<minijinja::Value>> {
        let plugin = self
            .plugins
            .get(name)
            .ok_or_else(|| LookupError::NotFound(name.to_string()))?;
        plugin.run(terms)
    }
}
