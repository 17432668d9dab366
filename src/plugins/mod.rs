//! Filter and lookup plugins for the template environment.
//!
//! Plugins are registered into the `minijinja` environment at engine
//! construction. A plugin failure during evaluation is wrapped in a
//! [`PluginError`] carried on the engine error's source chain, so callers can
//! recover the original failure object from the collapsed template error.

pub mod filter;
pub mod lookup;

use std::error::Error as StdError;
use std::fmt;

use minijinja::{Error as MjError, ErrorKind};

/// A plugin failure, preserving the plugin name and the original error.
///
/// Travels on a `minijinja::Error` source chain across the render boundary;
/// [`find_plugin_error`] recovers it on the other side.
#[derive(Debug)]
pub struct PluginError {
    /// Name of the failing plugin.
    pub plugin: String,
    /// The original failure raised by the plugin.
    pub source: Box<dyn StdError + Send + Sync>,
}

impl fmt::Display for PluginError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "plugin '{}' failed: {}", self.plugin, self.source)
    }
}

impl StdError for PluginError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        Some(self.source.as_ref())
    }
}

/// Wrap a plugin failure in an engine error that preserves the original
/// cause on its source chain.
pub fn plugin_error(
    plugin: &str,
    source: impl Into<Box<dyn StdError + Send + Sync>>,
) -> MjError {
    let inner = PluginError {
        plugin: plugin.to_string(),
        source: source.into(),
    };
    MjError::new(
        ErrorKind::InvalidOperation,
        format!("error in plugin '{plugin}'"),
    )
    .with_source(inner)
}

/// Walk an engine error's source chain looking for a [`PluginError`].
pub fn find_plugin_error(err: &MjError) -> Option<&PluginError> {
    let mut cursor: Option<&(dyn StdError + 'static)> = err.source();
    while let Some(e) = cursor {
        if let Some(plugin) = e.downcast_ref::<PluginError>() {
            return Some(plugin);
        }
        cursor = e.source();
    }
    None
}
