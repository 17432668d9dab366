//! Built-in filter plugins.
//!
//! Filters are organized into categories:
//!
//! - **strings**: Casing, path manipulation, type coercion
//! - **collections**: Dict/list reshaping (combine, dict2items, flatten)
//! - **serialization**: JSON/YAML encoding and decoding
//! - **encoding**: Base64 encoding/decoding
//! - **regex**: Regular expression operations
//!
//! Fallible filters fail with an engine error carrying a
//! [`PluginError`](crate::plugins::PluginError) on its source chain, so the
//! original cause survives to the collapsed template error.

pub mod collections;
pub mod encoding;
pub mod regex;
pub mod serialization;
pub mod strings;

use minijinja::Environment;

/// Registry for registering filter plugins into an environment.
pub struct FilterRegistry;

impl FilterRegistry {
    /// Register all built-in filters with the given environment.
    pub fn register_all(env: &mut Environment<'static>) {
        strings::register_filters(env);
        collections::register_filters(env);
        serialization::register_filters(env);
        encoding::register_filters(env);
        regex::register_filters(env);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_all_filters() {
        let mut env = Environment::new();
        FilterRegistry::register_all(&mut env);

        env.add_template("t", "{{ {'a': 1} | to_json }}{{ 'x' | b64encode }}")
            .unwrap();
        env.add_template("r", "{{ 'abc123' | regex_search('[0-9]+') }}")
            .unwrap();
    }
}
