//! Environment variable lookup.
//!
//! ```jinja2
//! {{ lookup('env', 'HOME') }}
//! ```

use super::{LookupError, LookupPlugin, LookupResult};

/// Looks up environment variables. A missing variable is an error; use
/// `| default('...')` in the template for optional variables.
#[derive(Debug, Default)]
pub struct EnvLookup;

impl LookupPlugin for EnvLookup {
    fn name(&self) -> &'static str {
        "env"
    }

    fn description(&self) -> &'static str {
        "Read environment variables"
    }

    fn run(&self, terms: &[String]) -> LookupResult<Vec<minijinja::Value>> {
        terms
            .iter()
            .map(|name| {
                std::env::var(name)
                    .map(minijinja::Value::from)
                    .map_err(|_| LookupError::EnvNotFound(name.clone()))
            })
            .collect()
    }
}
