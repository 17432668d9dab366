//! Process-wide templating policy knobs.
//!
//! These settings relax strict conditional and embedded-template checks for
//! callers migrating old content. They are read once per evaluation through
//! [`TemplateConfig::current`]; tests adjust them with [`TemplateConfig::set`]
//! and must serialize access.

use once_cell::sync::Lazy;
use parking_lot::RwLock;

static CONFIG: Lazy<RwLock<TemplateConfig>> = Lazy::new(|| RwLock::new(TemplateConfig::from_env()));

/// Policy toggles consulted during conditional evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TemplateConfig {
    /// Accept non-boolean conditional results via truthiness, with a
    /// deprecation notice, instead of failing.
    pub allow_broken_conditionals: bool,
    /// Accept conditional inputs containing template delimiters by rendering
    /// them as a template first, with a deprecation notice, instead of
    /// failing.
    pub allow_embedded_templates: bool,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            allow_broken_conditionals: false,
            allow_embedded_templates: false,
        }
    }
}

impl TemplateConfig {
    /// Build the initial configuration from the environment.
    fn from_env() -> Self {
        Self {
            allow_broken_conditionals: env_flag("TEMPLAR_ALLOW_BROKEN_CONDITIONALS"),
            allow_embedded_templates: env_flag("TEMPLAR_ALLOW_EMBEDDED_TEMPLATES"),
        }
    }

    /// A snapshot of the current process-wide configuration.
    pub fn current() -> Self {
        *CONFIG.read()
    }

    /// Replace the process-wide configuration. Intended for tests and
    /// embedding applications during startup.
    pub fn set(config: TemplateConfig) {
        *CONFIG.write() = config;
    }
}

fn env_flag(name: &str) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
