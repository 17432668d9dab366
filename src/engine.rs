//! Template and expression evaluation.
//!
//! [`TemplateEngine`] walks data-model values, compiles trusted template
//! strings through `minijinja`, and rebuilds container shapes around the
//! results. Untrusted text never reaches the compiler. Evaluation failures
//! inside the engine are deferred as markers and collapse through the
//! engine's [`MarkerBehavior`] only at the public operation boundary.
//!
//! Undefined values use the engine's chainable undefined: `x is defined`
//! never raises; printing or otherwise consuming an undefined value raises
//! at the collapse point through a custom formatter.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use minijinja::value::{Object, ObjectRepr, Rest, Value as MjValue, ValueKind};
use minijinja::{Environment, Error as MjError, ErrorKind, UndefinedBehavior};
use once_cell::sync::Lazy;
use parking_lot::{Mutex, RwLock};
use regex::Regex;

use crate::access::{FragmentRenderer, LazyList, LazyMap, VarLayer, VarsProxy};
use crate::config::TemplateConfig;
use crate::deprecation::DeprecationContext;
use crate::error::{Result, TemplateError};
use crate::marker::{create_template_error, defer_template_error, FailOnUndefined, MarkerBehavior};
use crate::overrides::{is_possibly_template, TemplateOverrides};
use crate::plugins::filter::FilterRegistry;
use crate::plugins::lookup::LookupRegistry;
use crate::plugins::{find_plugin_error, plugin_error};
use crate::trust::trust_as_template;
use crate::value::{TaggedStr, Value};

/// Nesting limit for template-in-variable rendering.
const MAX_TEMPLATE_DEPTH: usize = 100;

/// Per-call evaluation options. These never persist on the engine.
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    /// Double backslashes inside string constants in variable regions before
    /// compiling. Applies to the top-level compile only.
    pub escape_backslashes: bool,
    /// Re-append trailing newlines the renderer stripped, using the active
    /// override set's newline sequence.
    pub preserve_trailing_newlines: bool,
    /// Substitute for an omitted top-level result; without one, a top-level
    /// omit is an error.
    pub value_for_omit: Option<Value>,
    /// Template syntax for this call.
    pub overrides: TemplateOverrides,
}

impl Default for TemplateOptions {
    fn default() -> Self {
        Self {
            escape_backslashes: true,
            preserve_trailing_newlines: true,
            value_for_omit: None,
            overrides: TemplateOverrides::default(),
        }
    }
}

/// How far templating recurses into the input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TemplateMode {
    /// Template everything, rebuilding containers same-shaped.
    Default,
    /// Abort with an internal probe signal on the first trusted template
    /// string encountered. Backs `is_template`.
    StopOnTemplate,
    /// Return containers without templating their members.
    StopOnContainer,
}

/// Result of templating one value; omitted entries are dropped from
/// containers and handled by policy at top level.
pub(crate) enum Templated {
    Value(Value),
    Omitted,
}

/// The `omit` sentinel exposed as a template global.
#[derive(Debug)]
pub(crate) struct OmitSentinel;

impl Object for OmitSentinel {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Plain
    }
}

pub(crate) struct EngineCore {
    env: Environment<'static>,
    loader_slot: Arc<RwLock<Option<Arc<dyn crate::loader::TemplateLoader>>>>,
    lookups: Arc<LookupRegistry>,
    pub(crate) marker_behavior: Arc<dyn MarkerBehavior>,
    pub(crate) deprecations: Arc<DeprecationContext>,
    /// Errors raised inside infallible access paths (lazy variable renders),
    /// drained when the surrounding evaluation fails.
    pending: Mutex<Vec<TemplateError>>,
    depth: AtomicUsize,
    /// Root context of the evaluation in flight; nested fragment renders
    /// resolve names against it.
    current_root: Mutex<Option<MjValue>>,
}

impl EngineCore {
    pub(crate) fn new(
        lookups: Arc<LookupRegistry>,
        marker_behavior: Arc<dyn MarkerBehavior>,
        deprecations: Arc<DeprecationContext>,
    ) -> Arc<Self> {
        let loader_slot: Arc<RwLock<Option<Arc<dyn crate::loader::TemplateLoader>>>> =
            Arc::new(RwLock::new(None));
        let env = build_environment(&loader_slot, &lookups);
        Arc::new(Self {
            env,
            loader_slot,
            lookups,
            marker_behavior,
            deprecations,
            pending: Mutex::new(Vec::new()),
            depth: AtomicUsize::new(0),
            current_root: Mutex::new(None),
        })
    }

    pub(crate) fn set_loader(&self, loader: Option<Arc<dyn crate::loader::TemplateLoader>>) {
        *self.loader_slot.write() = loader;
    }

    pub(crate) fn loader(&self) -> Option<Arc<dyn crate::loader::TemplateLoader>> {
        self.loader_slot.read().clone()
    }

    pub(crate) fn lookups(&self) -> Arc<LookupRegistry> {
        Arc::clone(&self.lookups)
    }

    pub(crate) fn take_pending(&self) -> Vec<TemplateError> {
        std::mem::take(&mut *self.pending.lock())
    }

    /// Run `f` against the environment for the given override set. The base
    /// environment serves default overrides; anything else gets a customized
    /// clone.
    fn with_env<R>(
        &self,
        overrides: &TemplateOverrides,
        f: impl FnOnce(&Environment<'static>) -> R,
    ) -> Result<R> {
        if overrides.is_default() {
            Ok(f(&self.env))
        } else {
            let mut env = self.env.clone();
            apply_overrides(&mut env, overrides)?;
            Ok(f(&env))
        }
    }

    fn map_engine_error(&self, err: MjError, is_expression: bool) -> TemplateError {
        // A failure recorded by a nested render is the real cause; the outer
        // engine error is just its undefined collapsing.
        if let Some(nested) = self.take_pending().into_iter().next() {
            return create_template_error(nested, is_expression);
        }

        let kind = if is_expression { "expression" } else { "template" };

        if let Some(plugin) = find_plugin_error(&err) {
            let plugin = plugin.plugin.clone();
            return TemplateError::PluginRuntime {
                plugin,
                source: err,
            };
        }

        match err.kind() {
            ErrorKind::UndefinedError => TemplateError::UndefinedVariable {
                message: err.to_string(),
            },
            ErrorKind::SyntaxError => TemplateError::Syntax {
                kind,
                message: err.to_string(),
                source: Some(err),
            },
            _ => TemplateError::Engine { kind, source: err },
        }
    }

    fn eval_expression_text(
        &self,
        expr: &str,
        overrides: &TemplateOverrides,
        root: &MjValue,
    ) -> Result<MjValue> {
        let _depth = DepthGuard::enter(&self.depth, "expression")?;
        let result = self.with_env(overrides, |env| {
            env.compile_expression_owned(expr.to_string())
                .and_then(|compiled| compiled.eval(root.clone()))
        })?;
        result.map_err(|e| self.map_engine_error(e, true))
    }

    /// Evaluate a template body that is known to contain template syntax.
    /// All-template single expressions take the native-result path; anything
    /// else renders to a string with trailing newlines repaired.
    fn eval_body(
        &self,
        body: &str,
        overrides: &TemplateOverrides,
        options: &TemplateOptions,
        root: &MjValue,
    ) -> Result<MjValue> {
        if let Some(expr) = as_single_expression(body, overrides) {
            let expr = if options.escape_backslashes {
                escape_string_backslashes(&expr)
            } else {
                expr
            };
            return self.eval_expression_text(&expr, overrides, root);
        }

        let _depth = DepthGuard::enter(&self.depth, "template")?;
        let src = if options.escape_backslashes {
            escape_backslashes_in_variables(body, overrides)
        } else {
            body.to_string()
        };

        let rendered = self.with_env(overrides, |env| env.render_str(&src, root.clone()))?;
        let mut out = rendered.map_err(|e| self.map_engine_error(e, false))?;

        if options.preserve_trailing_newlines {
            let missing =
                count_newlines_from_end(body).saturating_sub(count_newlines_from_end(&out));
            for _ in 0..missing {
                out.push_str(&overrides.newline_sequence);
            }
        }

        Ok(MjValue::from(out))
    }

    /// Recursive templating walk over a data-model value.
    pub(crate) fn template_value(
        &self,
        value: &Value,
        options: &TemplateOptions,
        mode: TemplateMode,
        root: &MjValue,
    ) -> Result<Templated> {
        match value {
            Value::String(s) if s.is_trusted() => {
                let (body, overrides) = options.overrides.extract_template_overrides(s.as_str())?;
                if !is_possibly_template(body, &overrides) {
                    // The overrides header, if any, is consumed even when the
                    // remainder is plain text.
                    if body.len() == s.as_str().len() {
                        return Ok(Templated::Value(value.clone()));
                    }
                    return Ok(Templated::Value(Value::String(s.tag_copy(body))));
                }
                if mode == TemplateMode::StopOnTemplate {
                    return Err(TemplateError::TemplateEncountered);
                }
                let mj = self.eval_body(body, &overrides, options, root)?;
                self.finalize(mj, options, mode, root)
            }
            Value::List(items) => {
                if mode == TemplateMode::StopOnContainer {
                    return Ok(Templated::Value(value.clone()));
                }
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    if let Templated::Value(v) = self.template_value(item, options, mode, root)? {
                        out.push(v);
                    }
                }
                Ok(Templated::Value(Value::List(out)))
            }
            Value::Dict(map) => {
                if mode == TemplateMode::StopOnContainer {
                    return Ok(Templated::Value(value.clone()));
                }
                let mut out = IndexMap::with_capacity(map.len());
                for (key, item) in map {
                    if let Templated::Value(v) = self.template_value(item, options, mode, root)? {
                        out.insert(key.clone(), v);
                    }
                }
                Ok(Templated::Value(Value::Dict(out)))
            }
            other => Ok(Templated::Value(other.clone())),
        }
    }

    /// Convert an engine result back into the data model, resolving lazy
    /// wrappers and routing undefined and omit results.
    pub(crate) fn finalize(
        &self,
        mj: MjValue,
        options: &TemplateOptions,
        mode: TemplateMode,
        root: &MjValue,
    ) -> Result<Templated> {
        if mj.is_undefined() {
            if let Some(nested) = self.take_pending().into_iter().next() {
                return Err(nested);
            }
            return Err(TemplateError::UndefinedVariable {
                message: "the result was undefined".to_string(),
            });
        }

        if mj.downcast_object_ref::<OmitSentinel>().is_some() {
            return Ok(Templated::Omitted);
        }

        if let Some(map) = mj.downcast_object_ref::<LazyMap>() {
            let dict = Value::Dict(map.raw().clone());
            return self.template_value(&dict, options, mode, root);
        }

        if let Some(list) = mj.downcast_object_ref::<LazyList>() {
            let items = Value::List(list.raw().to_vec());
            return self.template_value(&items, options, mode, root);
        }

        let value = match mj.kind() {
            ValueKind::None => Value::Null,
            ValueKind::Bool => Value::Bool(mj.is_true()),
            ValueKind::Number => {
                if let Ok(n) = i64::try_from(mj.clone()) {
                    Value::Int(n)
                } else if let Ok(f) = f64::try_from(mj.clone()) {
                    Value::Float(f)
                } else {
                    Value::untrusted(mj.to_string())
                }
            }
            ValueKind::String => Value::untrusted(mj.as_str().unwrap_or_default()),
            ValueKind::Seq | ValueKind::Iterable => {
                let mut out = Vec::new();
                let iter = mj
                    .try_iter()
                    .map_err(|e| self.map_engine_error(e, true))?;
                for item in iter {
                    if let Templated::Value(v) = self.finalize(item, options, mode, root)? {
                        out.push(v);
                    }
                }
                Value::List(out)
            }
            ValueKind::Map => {
                let mut out = IndexMap::new();
                let keys = mj
                    .try_iter()
                    .map_err(|e| self.map_engine_error(e, true))?;
                for key in keys {
                    let item = mj.get_item(&key).unwrap_or(MjValue::UNDEFINED);
                    if let Templated::Value(v) = self.finalize(item, options, mode, root)? {
                        out.insert(key.to_string(), v);
                    }
                }
                Value::Dict(out)
            }
            _ => Value::untrusted(mj.to_string()),
        };

        Ok(Templated::Value(value))
    }
}

impl FragmentRenderer for EngineCore {
    fn render_fragment(&self, text: &str) -> Option<MjValue> {
        let root = self
            .current_root
            .lock()
            .clone()
            .unwrap_or_else(|| MjValue::from(()));
        let options = TemplateOptions::default();

        let result = options
            .overrides
            .extract_template_overrides(text)
            .and_then(|(body, overrides)| self.eval_body(body, &overrides, &options, &root));

        match result {
            Ok(value) => Some(value),
            Err(err) if err.is_undefined() => Some(MjValue::UNDEFINED),
            Err(err) => {
                self.pending.lock().push(err);
                None
            }
        }
    }
}

struct DepthGuard<'a>(&'a AtomicUsize);

impl<'a> DepthGuard<'a> {
    fn enter(depth: &'a AtomicUsize, kind: &'static str) -> Result<Self> {
        if depth.fetch_add(1, Ordering::SeqCst) >= MAX_TEMPLATE_DEPTH {
            depth.fetch_sub(1, Ordering::SeqCst);
            return Err(TemplateError::RecursiveLoop { kind });
        }
        Ok(Self(depth))
    }
}

impl Drop for DepthGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct RootGuard<'a> {
    core: &'a EngineCore,
    prev: Option<MjValue>,
}

impl<'a> RootGuard<'a> {
    fn new(core: &'a EngineCore, root: MjValue) -> Self {
        let prev = core.current_root.lock().replace(root);
        Self { core, prev }
    }
}

impl Drop for RootGuard<'_> {
    fn drop(&mut self) {
        *self.core.current_root.lock() = self.prev.take();
    }
}

/// The trust-aware templating engine.
#[derive(Clone)]
pub struct TemplateEngine {
    core: Arc<EngineCore>,
    variables: VarLayer,
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl TemplateEngine {
    /// An engine with strict undefined handling and the built-in lookups.
    pub fn new() -> Self {
        Self::with_behavior(Arc::new(FailOnUndefined))
    }

    /// An engine with a custom marker behavior.
    pub fn with_behavior(behavior: Arc<dyn MarkerBehavior>) -> Self {
        Self::assemble(
            Arc::new(LookupRegistry::with_builtins()),
            behavior,
            Arc::new(DeprecationContext::new()),
        )
    }

    /// An engine with a custom lookup registry, replacing the built-ins.
    pub fn with_lookups(lookups: Arc<LookupRegistry>) -> Self {
        Self::assemble(
            lookups,
            Arc::new(FailOnUndefined),
            Arc::new(DeprecationContext::new()),
        )
    }

    fn assemble(
        lookups: Arc<LookupRegistry>,
        behavior: Arc<dyn MarkerBehavior>,
        deprecations: Arc<DeprecationContext>,
    ) -> Self {
        Self {
            core: EngineCore::new(lookups, behavior, deprecations),
            variables: Arc::new(RwLock::new(IndexMap::new())),
        }
    }

    /// Attach a template source loader, replacing any existing one.
    pub fn set_loader(&self, loader: Arc<dyn crate::loader::TemplateLoader>) {
        self.core.set_loader(Some(loader));
    }

    /// Builder-style variant of [`set_loader`](Self::set_loader).
    pub fn with_loader(self, loader: Arc<dyn crate::loader::TemplateLoader>) -> Self {
        self.core.set_loader(Some(loader));
        self
    }

    /// A new engine sharing this one's behavior, lookups, deprecation sink
    /// and loader. Variables are shared when `share_variables` is set,
    /// otherwise snapshotted.
    pub fn copy(&self, share_variables: bool) -> Self {
        let copy = Self::assemble(
            self.core.lookups(),
            Arc::clone(&self.core.marker_behavior),
            Arc::clone(&self.core.deprecations),
        );
        copy.core.set_loader(self.core.loader());
        let variables = if share_variables {
            Arc::clone(&self.variables)
        } else {
            Arc::new(RwLock::new(self.variables.read().clone()))
        };
        Self {
            core: copy.core,
            variables,
        }
    }

    /// Snapshot of the engine's variables.
    pub fn available_variables(&self) -> IndexMap<String, Value> {
        self.variables.read().clone()
    }

    /// Replace the engine's variables.
    pub fn set_available_variables(&self, variables: IndexMap<String, Value>) {
        *self.variables.write() = variables;
    }

    /// Set a single variable.
    pub fn set_variable(&self, name: impl Into<String>, value: Value) {
        self.variables.write().insert(name.into(), value);
    }

    /// The deprecation sink shared by this engine and its copies.
    pub fn deprecations(&self) -> Arc<DeprecationContext> {
        Arc::clone(&self.core.deprecations)
    }

    fn build_root(&self, locals: Option<&IndexMap<String, Value>>) -> MjValue {
        let mut layers: Vec<VarLayer> = Vec::new();
        if let Some(locals) = locals {
            layers.push(Arc::new(RwLock::new(locals.clone())));
        }
        layers.push(Arc::clone(&self.variables));
        let renderer: Arc<dyn FragmentRenderer> = Arc::clone(&self.core) as _;
        MjValue::from_object(VarsProxy::new(layers, renderer))
    }

    fn collapse(&self, err: TemplateError, is_expression: bool) -> Result<Value> {
        match err {
            e @ (TemplateError::TemplateEncountered
            | TemplateError::OverrideParse { .. }
            | TemplateError::Untrusted { .. }
            | TemplateError::Trust { .. }
            | TemplateError::InvalidVariableExpression { .. }
            | TemplateError::BrokenConditional { .. }
            | TemplateError::ValueOmitted) => Err(e),
            other => self
                .core
                .marker_behavior
                .handle_marker(defer_template_error(other, is_expression)),
        }
    }

    /// Template a value under the default options and mode.
    pub fn template_default(&self, value: &Value) -> Result<Value> {
        self.template(value, &TemplateOptions::default(), TemplateMode::Default)
    }

    /// Template a value: trusted template strings are compiled and rendered,
    /// containers are rebuilt same-shaped, everything else passes through
    /// unchanged.
    pub fn template(
        &self,
        value: &Value,
        options: &TemplateOptions,
        mode: TemplateMode,
    ) -> Result<Value> {
        self.core.take_pending();
        let root = self.build_root(None);
        let _root = RootGuard::new(&self.core, root.clone());
        match self.core.template_value(value, options, mode, &root) {
            Ok(Templated::Value(v)) => Ok(v),
            Ok(Templated::Omitted) => options
                .value_for_omit
                .clone()
                .ok_or(TemplateError::ValueOmitted),
            Err(err) => self.collapse(err, false),
        }
    }

    /// Evaluate a trusted expression to a native value. The trust check is
    /// mandatory; untagged input fails before any compilation.
    pub fn evaluate_expression(
        &self,
        expression: &Value,
        local_variables: Option<&IndexMap<String, Value>>,
        escape_backslashes: bool,
    ) -> Result<Value> {
        let tagged = require_trusted(expression)?;
        self.core.take_pending();
        let root = self.build_root(local_variables);
        let _root = RootGuard::new(&self.core, root.clone());

        let expr = if escape_backslashes {
            escape_string_backslashes(tagged.as_str())
        } else {
            tagged.as_str().to_string()
        };

        let result = self
            .core
            .eval_expression_text(&expr, TemplateOverrides::default_instance(), &root)
            .and_then(|mj| {
                self.core
                    .finalize(mj, &TemplateOptions::default(), TemplateMode::Default, &root)
            });

        match result {
            Ok(Templated::Value(v)) => Ok(v),
            Ok(Templated::Omitted) => Err(TemplateError::ValueOmitted),
            Err(err) => self.collapse(err, true),
        }
    }

    /// Resolve a restricted variable-navigation expression: dotted names,
    /// integer indexes and bracket chains only. Anything outside that grammar
    /// is rejected before evaluation.
    pub fn resolve_variable_expression(
        &self,
        expression: &str,
        local_variables: Option<&IndexMap<String, Value>>,
    ) -> Result<Value> {
        validate_variable_expression(expression)?;
        let trusted = trust_as_template(&Value::untrusted(expression))?;
        self.evaluate_expression(&trusted, local_variables, true)
    }

    /// Evaluate a conditional to a boolean under the current policy
    /// configuration.
    pub fn evaluate_conditional(&self, value: &Value) -> Result<bool> {
        let config = TemplateConfig::current();

        let broken = |message: String| -> Result<bool> {
            if config.allow_broken_conditionals {
                self.core.deprecations.deprecated(
                    format!("accepting broken conditional: {message}"),
                    Some("conditionals must be expressions producing a boolean"),
                    None,
                );
                Ok(true)
            } else {
                Err(TemplateError::BrokenConditional { message })
            }
        };

        match value {
            Value::Bool(b) => Ok(*b),
            Value::Null => broken("conditional was null".to_string()),
            Value::String(s) if s.as_str().trim().is_empty() => {
                broken("conditional was empty".to_string())
            }
            Value::String(s) => {
                let tagged = require_trusted(value)?;
                let overrides = TemplateOverrides::default_instance();

                let expr_text: TaggedStr = if overrides.contains_start_string(s.as_str()) {
                    if !config.allow_embedded_templates {
                        return Err(TemplateError::BrokenConditional {
                            message: "conditional contains template delimiters; pass a bare expression instead".to_string(),
                        });
                    }
                    self.core.deprecations.deprecated(
                        "conditionals with embedded template delimiters",
                        Some("pass a bare expression instead"),
                        None,
                    );
                    let options = TemplateOptions {
                        escape_backslashes: false,
                        ..Default::default()
                    };
                    match self.template(value, &options, TemplateMode::Default)? {
                        Value::Bool(b) => return Ok(b),
                        Value::String(rendered) => TaggedStr::trusted(rendered.as_str()),
                        other => {
                            return if config.allow_broken_conditionals {
                                self.core.deprecations.deprecated(
                                    "non-boolean conditional results",
                                    Some("conditionals must produce a boolean"),
                                    None,
                                );
                                Ok(other.is_truthy())
                            } else {
                                Err(TemplateError::BrokenConditional {
                                    message: format!(
                                        "conditional produced a {} instead of a boolean",
                                        other.type_name()
                                    ),
                                })
                            }
                        }
                    }
                } else {
                    tagged.clone()
                };

                let result =
                    self.evaluate_expression(&Value::String(expr_text), None, false)?;
                match result {
                    Value::Bool(b) => Ok(b),
                    other => {
                        if config.allow_broken_conditionals {
                            self.core.deprecations.deprecated(
                                "non-boolean conditional results",
                                Some("conditionals must produce a boolean"),
                                None,
                            );
                            Ok(other.is_truthy())
                        } else {
                            Err(TemplateError::BrokenConditional {
                                message: format!(
                                    "conditional produced a {} instead of a boolean",
                                    other.type_name()
                                ),
                            })
                        }
                    }
                }
            }
            other => broken(format!(
                "conditional input was a {} instead of a boolean or expression",
                other.type_name()
            )),
        }
    }

    /// Recursive, trust-aware template detection: true when the value or any
    /// nested value is a trusted string containing template syntax.
    pub fn is_template(&self, value: &Value, overrides: &TemplateOverrides) -> bool {
        let options = TemplateOptions {
            overrides: overrides.clone(),
            ..Default::default()
        };
        matches!(
            self.template(value, &options, TemplateMode::StopOnTemplate),
            Err(TemplateError::TemplateEncountered)
        )
    }

    /// Template the top level only: a trusted template string resolving to a
    /// container is returned without templating its members.
    pub fn resolve_to_container(&self, value: &Value, options: &TemplateOptions) -> Result<Value> {
        self.template(value, options, TemplateMode::StopOnContainer)
    }
}

fn require_trusted(value: &Value) -> Result<&TaggedStr> {
    match value {
        Value::String(s) if s.is_trusted() => Ok(s),
        Value::String(s) => Err(TemplateError::Untrusted {
            value: truncate_for_display(s.as_str()),
        }),
        other => Err(TemplateError::Trust {
            type_name: other.type_name(),
        }),
    }
}

fn truncate_for_display(text: &str) -> String {
    const LIMIT: usize = 80;
    if text.chars().count() <= LIMIT {
        text.to_string()
    } else {
        let head: String = text.chars().take(LIMIT).collect();
        format!("{head}...")
    }
}

fn build_environment(
    loader_slot: &Arc<RwLock<Option<Arc<dyn crate::loader::TemplateLoader>>>>,
    lookups: &Arc<LookupRegistry>,
) -> Environment<'static> {
    let mut env = Environment::new();
    env.set_undefined_behavior(UndefinedBehavior::Chainable);
    env.set_trim_blocks(true);
    env.set_lstrip_blocks(true);
    env.set_keep_trailing_newline(false);

    // Printing an undefined value is the strict consumption point; tests
    // like `is defined` never reach the formatter.
    env.set_formatter(|out, state, value| {
        if value.is_undefined() {
            return Err(MjError::new(
                ErrorKind::UndefinedError,
                "tried to render an undefined value",
            ));
        }
        minijinja::escape_formatter(out, state, value)
    });

    let slot = Arc::clone(loader_slot);
    env.set_loader(move |name: &str| -> std::result::Result<Option<String>, MjError> {
        let loader = slot.read().clone();
        match loader {
            None => Ok(None),
            Some(loader) => match loader.load(name) {
                Ok(tagged) => Ok(Some(tagged.into_string())),
                Err(TemplateError::SourceNotFound { .. }) => Ok(None),
                Err(err) => Err(MjError::new(
                    ErrorKind::InvalidOperation,
                    format!("failed to load template '{name}'"),
                )
                .with_source(err)),
            },
        }
    });

    FilterRegistry::register_all(&mut env);

    let registry = Arc::clone(lookups);
    env.add_function(
        "lookup",
        move |name: String, terms: Rest<MjValue>| -> std::result::Result<MjValue, MjError> {
            let terms = lookup_terms(&terms);
            let mut results = registry
                .run(&name, &terms)
                .map_err(|e| plugin_error(&format!("lookup/{name}"), e))?;
            Ok(if results.len() == 1 {
                results.remove(0)
            } else {
                MjValue::from(
                    results
                        .iter()
                        .map(|v| v.to_string())
                        .collect::<Vec<_>>()
                        .join(","),
                )
            })
        },
    );

    let registry = Arc::clone(lookups);
    let query = move |name: String, terms: Rest<MjValue>| -> std::result::Result<MjValue, MjError> {
        let terms = lookup_terms(&terms);
        let results = registry
            .run(&name, &terms)
            .map_err(|e| plugin_error(&format!("lookup/{name}"), e))?;
        Ok(MjValue::from(results))
    };
    env.add_function("query", query.clone());
    env.add_function("q", query);

    env.add_function("now", || chrono::Utc::now().to_rfc3339());
    env.add_function("undef", |_hint: Option<String>| MjValue::UNDEFINED);
    env.add_global("omit", MjValue::from_object(OmitSentinel));

    env
}

fn lookup_terms(terms: &[MjValue]) -> Vec<String> {
    terms
        .iter()
        .map(|t| {
            t.as_str()
                .map(str::to_string)
                .unwrap_or_else(|| t.to_string())
        })
        .collect()
}

fn apply_overrides(env: &mut Environment<'static>, overrides: &TemplateOverrides) -> Result<()> {
    let syntax = minijinja::syntax::SyntaxConfig::builder()
        .block_delimiters(
            overrides.block_start_string.clone(),
            overrides.block_end_string.clone(),
        )
        .variable_delimiters(
            overrides.variable_start_string.clone(),
            overrides.variable_end_string.clone(),
        )
        .comment_delimiters(
            overrides.comment_start_string.clone(),
            overrides.comment_end_string.clone(),
        )
        .build()
        .map_err(|e| TemplateError::OverrideParse {
            message: e.to_string(),
        })?;
    env.set_syntax(syntax);
    env.set_trim_blocks(overrides.trim_blocks);
    env.set_lstrip_blocks(overrides.lstrip_blocks);
    env.set_keep_trailing_newline(overrides.keep_trailing_newline);
    Ok(())
}

/// If the body is exactly one variable block, return the inner expression.
fn as_single_expression(body: &str, overrides: &TemplateOverrides) -> Option<String> {
    let inner = body
        .strip_prefix(overrides.variable_start_string.as_str())?
        .strip_suffix(overrides.variable_end_string.as_str())?;
    if inner.contains(overrides.variable_start_string.as_str())
        || inner.contains(overrides.variable_end_string.as_str())
        || inner.contains(overrides.block_start_string.as_str())
        || inner.contains(overrides.comment_start_string.as_str())
    {
        return None;
    }
    Some(inner.trim().to_string())
}

/// Double backslashes inside quoted string constants. Used on bare
/// expression text, where the whole input is expression context.
fn escape_string_backslashes(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut quote: Option<char> = None;
    for c in expr.chars() {
        match quote {
            Some(q) => {
                if c == '\\' {
                    out.push_str("\\\\");
                } else {
                    out.push(c);
                    if c == q {
                        quote = None;
                    }
                }
            }
            None => {
                out.push(c);
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
            }
        }
    }
    out
}

/// Double backslashes inside string constants within variable regions only;
/// literal text and statement blocks are untouched.
fn escape_backslashes_in_variables(text: &str, overrides: &TemplateOverrides) -> String {
    let vs = overrides.variable_start_string.as_str();
    let ve = overrides.variable_end_string.as_str();
    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    loop {
        let Some(start) = rest.find(vs) else {
            out.push_str(rest);
            return out;
        };
        out.push_str(&rest[..start]);
        let after = &rest[start + vs.len()..];
        let Some(end) = after.find(ve) else {
            out.push_str(&rest[start..]);
            return out;
        };
        out.push_str(vs);
        out.push_str(&escape_string_backslashes(&after[..end]));
        out.push_str(ve);
        rest = &after[end + ve.len()..];
    }
}

/// Count the trailing newlines of a string, treating `\r\n` as one.
fn count_newlines_from_end(text: &str) -> usize {
    let mut count = 0;
    let mut rest = text;
    loop {
        if let Some(stripped) = rest.strip_suffix("\r\n") {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_suffix('\n') {
            rest = stripped;
        } else if let Some(stripped) = rest.strip_suffix('\r') {
            rest = stripped;
        } else {
            return count;
        }
        count += 1;
    }
}

static IDENTIFIER: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap());

const RESERVED_WORDS: &[&str] = &[
    "True", "False", "None", "true", "false", "none", "and", "or", "not", "in", "is", "if",
    "else",
];

fn validate_variable_expression(expression: &str) -> Result<()> {
    let invalid = || TemplateError::InvalidVariableExpression {
        expression: expression.to_string(),
    };

    if expression.trim().is_empty() {
        return Err(invalid());
    }

    for component in expression.split(['.', '[', ']']) {
        if component.is_empty() {
            continue;
        }
        if component.bytes().all(|b| b.is_ascii_digit()) {
            continue;
        }
        if IDENTIFIER.is_match(component) && !RESERVED_WORDS.contains(&component) {
            continue;
        }
        return Err(invalid());
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_as_single_expression() {
        let overrides = TemplateOverrides::default();
        assert_eq!(
            as_single_expression("{{ foo }}", &overrides),
            Some("foo".to_string())
        );
        assert_eq!(as_single_expression("{{ a }} {{ b }}", &overrides), None);
        assert_eq!(as_single_expression("x {{ a }}", &overrides), None);
        assert_eq!(as_single_expression("{{ a }} x", &overrides), None);
        assert_eq!(
            as_single_expression("{% if x %}{{ a }}{% endif %}", &overrides),
            None
        );
    }

    #[test]
    fn test_escape_backslashes_scoping() {
        let overrides = TemplateOverrides::default();
        let text = r"\valid {{ '\some' }} also \valid";
        let escaped = escape_backslashes_in_variables(text, &overrides);
        assert_eq!(escaped, r"\valid {{ '\\some' }} also \valid");
    }

    #[test]
    fn test_escape_only_inside_string_constants() {
        let overrides = TemplateOverrides::default();
        let text = r"{{ a + '\n' + b }}";
        let escaped = escape_backslashes_in_variables(text, &overrides);
        assert_eq!(escaped, r"{{ a + '\\n' + b }}");

        // Outside quotes nothing changes.
        let text = "{{ a | d }}";
        assert_eq!(escape_backslashes_in_variables(text, &overrides), text);
    }

    #[test]
    fn test_count_newlines_from_end() {
        assert_eq!(count_newlines_from_end("abc"), 0);
        assert_eq!(count_newlines_from_end("abc\n"), 1);
        assert_eq!(count_newlines_from_end("abc\n\n\n"), 3);
        assert_eq!(count_newlines_from_end("abc\r\n\r\n"), 2);
        assert_eq!(count_newlines_from_end(""), 0);
    }

    #[test]
    fn test_validate_variable_expression() {
        for accepted in [
            "hostname",
            "a.b.c",
            "servers[0]",
            "servers[0].name",
            "a.0.b",
            "_private",
        ] {
            assert!(
                validate_variable_expression(accepted).is_ok(),
                "should accept {accepted}"
            );
        }

        for rejected in [
            "",
            "  ",
            "a['quoted']",
            "a + b",
            "lookup('env', 'HOME')",
            "a|upper",
            "not a",
            "a.b if c else d",
            "true",
            "None",
        ] {
            assert!(
                validate_variable_expression(rejected).is_err(),
                "should reject {rejected}"
            );
        }
    }

    #[test]
    fn test_truncate_for_display() {
        assert_eq!(truncate_for_display("short"), "short");
        let long = "x".repeat(100);
        let shown = truncate_for_display(&long);
        assert!(shown.ends_with("..."));
        assert_eq!(shown.chars().count(), 83);
    }
}
