//! High-level templating facade.
//!
//! [`Templar`] bundles a [`TemplateEngine`] with a current override set and
//! an undefined-handling policy, and exposes thin delegations for the
//! engine's operations. It exists for callers that hold one templating
//! object across many evaluations: playbook-style drivers, test harnesses,
//! embedding applications.

use std::sync::Arc;

use indexmap::IndexMap;

use crate::engine::{TemplateEngine, TemplateMode, TemplateOptions};
use crate::error::{Result, TemplateError};
use crate::loader::TemplateLoader;
use crate::overrides::TemplateOverrides;
use crate::value::Value;

pub struct Templar {
    engine: TemplateEngine,
    overrides: TemplateOverrides,
    fail_on_undefined: bool,
}

impl Default for Templar {
    fn default() -> Self {
        Self::new()
    }
}

impl Templar {
    pub fn new() -> Self {
        Self {
            engine: TemplateEngine::new(),
            overrides: TemplateOverrides::default(),
            fail_on_undefined: true,
        }
    }

    /// Build a facade around an existing engine.
    pub fn with_engine(engine: TemplateEngine) -> Self {
        Self {
            engine,
            overrides: TemplateOverrides::default(),
            fail_on_undefined: true,
        }
    }

    pub fn with_overrides(mut self, overrides: TemplateOverrides) -> Self {
        self.overrides = overrides;
        self
    }

    /// With `false`, templating that fails on an undefined variable returns
    /// the original input unchanged instead of erroring.
    pub fn with_fail_on_undefined(mut self, fail_on_undefined: bool) -> Self {
        self.fail_on_undefined = fail_on_undefined;
        self
    }

    pub fn with_loader(self, loader: Arc<dyn TemplateLoader>) -> Self {
        self.engine.set_loader(loader);
        self
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &TemplateEngine {
        &self.engine
    }

    /// The facade's current override set.
    pub fn overrides(&self) -> &TemplateOverrides {
        &self.overrides
    }

    pub fn available_variables(&self) -> IndexMap<String, Value> {
        self.engine.available_variables()
    }

    pub fn set_available_variables(&self, variables: IndexMap<String, Value>) {
        self.engine.set_available_variables(variables);
    }

    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.engine.set_variable(name, value);
    }

    fn options(&self) -> TemplateOptions {
        TemplateOptions {
            overrides: self.overrides.clone(),
            ..Default::default()
        }
    }

    /// Template a value under the facade's overrides. With
    /// `fail_on_undefined` off, an undefined failure yields the original
    /// input byte-for-byte.
    pub fn template(&self, value: &Value) -> Result<Value> {
        self.template_with_options(value, &self.options())
    }

    /// Template with explicit per-call options.
    pub fn template_with_options(&self, value: &Value, options: &TemplateOptions) -> Result<Value> {
        match self.engine.template(value, options, TemplateMode::Default) {
            Err(TemplateError::UndefinedVariable { .. }) if !self.fail_on_undefined => {
                Ok(value.clone())
            }
            other => other,
        }
    }

    pub fn evaluate_expression(
        &self,
        expression: &Value,
        local_variables: Option<&IndexMap<String, Value>>,
    ) -> Result<Value> {
        self.engine
            .evaluate_expression(expression, local_variables, true)
    }

    pub fn resolve_variable_expression(
        &self,
        expression: &str,
        local_variables: Option<&IndexMap<String, Value>>,
    ) -> Result<Value> {
        self.engine
            .resolve_variable_expression(expression, local_variables)
    }

    pub fn evaluate_conditional(&self, value: &Value) -> Result<bool> {
        self.engine.evaluate_conditional(value)
    }

    pub fn is_template(&self, value: &Value) -> bool {
        self.engine.is_template(value, &self.overrides)
    }

    pub fn resolve_to_container(&self, value: &Value) -> Result<Value> {
        self.engine.resolve_to_container(value, &self.options())
    }

    /// A new facade sharing this one's variables, loader, behavior and
    /// deprecation sink, with selective replacements. The original facade is
    /// untouched.
    pub fn copy_with_new_env(
        &self,
        overrides: Option<TemplateOverrides>,
        loader: Option<Arc<dyn TemplateLoader>>,
        fail_on_undefined: Option<bool>,
    ) -> Templar {
        let engine = self.engine.copy(true);
        if let Some(loader) = loader {
            engine.set_loader(loader);
        }
        Templar {
            engine,
            overrides: overrides.unwrap_or_else(|| self.overrides.clone()),
            fail_on_undefined: fail_on_undefined.unwrap_or(self.fail_on_undefined),
        }
    }

    /// Swap in a temporary variable set; the returned guard restores the
    /// previous variables when dropped, on every exit path.
    pub fn set_temporary_context(
        &self,
        variables: IndexMap<String, Value>,
    ) -> TemporaryContext<'_> {
        let saved = self.engine.available_variables();
        self.engine.set_available_variables(variables);
        TemporaryContext {
            engine: &self.engine,
            saved: Some(saved),
        }
    }

    /// Former `template(value, convert_bare=...)` entry point. Bare-variable
    /// conversion is gone; use [`resolve_variable_expression`](Self::resolve_variable_expression)
    /// to look up a bare name.
    #[deprecated(note = "use template(); convert bare names with resolve_variable_expression")]
    pub fn template_with_convert_bare(&self, value: &Value, convert_bare: bool) -> Result<Value> {
        if convert_bare {
            self.engine.deprecations().deprecated(
                "the convert_bare templating option",
                Some("use resolve_variable_expression for bare variable names"),
                Some("2.0"),
            );
            if let Value::String(s) = value {
                if !self.is_template(value) {
                    return self.resolve_variable_expression(s.as_str(), None);
                }
            }
        }
        self.template(value)
    }

    /// Former `template(value, disable_lookups=...)` entry point. Lookup
    /// execution can no longer be toggled per call; build the engine with a
    /// restricted [`LookupRegistry`](crate::plugins::lookup::LookupRegistry)
    /// instead.
    #[deprecated(note = "build the engine with a restricted lookup registry")]
    pub fn template_with_disable_lookups(
        &self,
        value: &Value,
        disable_lookups: bool,
    ) -> Result<Value> {
        if disable_lookups {
            self.engine.deprecations().deprecated(
                "the disable_lookups templating option",
                Some("build the engine with a restricted lookup registry"),
                Some("2.0"),
            );
        }
        self.template(value)
    }

    /// Former `template(value, convert_data=...)` entry point. Results are
    /// always native now; the flag is ignored.
    #[deprecated(note = "use template(); results are always native values")]
    pub fn template_with_convert_data(&self, value: &Value, _convert_data: bool) -> Result<Value> {
        self.engine.deprecations().deprecated(
            "the convert_data templating option",
            Some("template results are always native values"),
            Some("2.0"),
        );
        self.template(value)
    }
}

/// Guard produced by [`Templar::set_temporary_context`].
pub struct TemporaryContext<'a> {
    engine: &'a TemplateEngine,
    saved: Option<IndexMap<String, Value>>,
}

impl Drop for TemporaryContext<'_> {
    fn drop(&mut self) {
        if let Some(saved) = self.saved.take() {
            self.engine.set_available_variables(saved);
        }
    }
}
