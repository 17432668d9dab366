//! Error types for Templar.
//!
//! This module defines the error taxonomy used throughout the crate. Failures
//! internal to expression evaluation (undefined names, plugin exceptions) are
//! recovered into [`Marker`](crate::marker::Marker)s and only escalate to one
//! of these errors at a collapse point; override-parse and trust errors are
//! always immediate.

use thiserror::Error;

/// Result type alias for templating operations.
pub type Result<T> = std::result::Result<T, TemplateError>;

/// The main error type for Templar.
#[derive(Error, Debug)]
pub enum TemplateError {
    // ========================================================================
    // Evaluation Errors
    // ========================================================================
    /// A marker reached a strict consumption point.
    #[error("Undefined variable: {message}")]
    UndefinedVariable {
        /// Description of the failing lookup, including the name when known.
        message: String,
    },

    /// A conditional expression did not produce a boolean result under strict
    /// policy, or was not a valid conditional input at all.
    #[error("Broken conditional: {message}")]
    BrokenConditional {
        /// Why the conditional was rejected.
        message: String,
    },

    /// A filter, test or lookup plugin raised during evaluation. The original
    /// error is preserved through the source chain.
    #[error("Error in template plugin '{plugin}'")]
    PluginRuntime {
        /// Name of the failing plugin.
        plugin: String,
        /// The captured engine error; its own source chain terminates in the
        /// original plugin error object.
        #[source]
        source: minijinja::Error,
    },

    /// Syntax error while compiling a template or expression.
    #[error("Syntax error in {kind}: {message}")]
    Syntax {
        /// "template" or "expression".
        kind: &'static str,
        /// Error detail from the compiler.
        message: String,
        /// Compiler error, when one was raised.
        #[source]
        source: Option<minijinja::Error>,
    },

    /// Template or expression recursed past the nesting limit.
    #[error("Recursive loop detected in {kind}")]
    RecursiveLoop {
        /// "template" or "expression".
        kind: &'static str,
    },

    // ========================================================================
    // Trust Errors
    // ========================================================================
    /// Attempted to grant template trust to an unsupported value type.
    #[error("Values of type '{type_name}' cannot be trusted as a template; trust is a per-scalar fact")]
    Trust {
        /// Name of the offending value type.
        type_name: &'static str,
    },

    /// A string passed where a trusted template/expression is mandatory was
    /// not tagged as trusted.
    #[error("Encountered untrusted template or expression: {value}")]
    Untrusted {
        /// The offending text, shortened for display.
        value: String,
    },

    // ========================================================================
    // Input Errors
    // ========================================================================
    /// A variable expression used syntax outside the restricted navigation
    /// grammar (identifiers, integers, dotted access, indexing).
    #[error("Invalid variable expression: {expression}")]
    InvalidVariableExpression {
        /// The rejected expression text.
        expression: String,
    },

    /// Malformed or unrecognized `#jinja2:` override header. Always fatal;
    /// no partial overrides are applied.
    #[error("Invalid '#jinja2:' override header: {message}")]
    OverrideParse {
        /// Which key or token failed and why.
        message: String,
    },

    /// The `omit` sentinel reached a top-level scalar result with no
    /// substitute value configured.
    #[error("The value was omitted and no substitute was provided")]
    ValueOmitted,

    // ========================================================================
    // Source Errors
    // ========================================================================
    /// A named template source could not be found by the loader.
    #[error("Template source '{name}' not found")]
    SourceNotFound {
        /// Requested source name.
        name: String,
    },

    /// IO error while reading a template source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Any other engine-level rendering error.
    #[error("Error rendering {kind}")]
    Engine {
        /// "template" or "expression".
        kind: &'static str,
        /// Underlying engine error.
        #[source]
        source: minijinja::Error,
    },

    /// Internal probe signal used by `is_template`; never surfaced to callers.
    #[doc(hidden)]
    #[error("template encountered")]
    TemplateEncountered,
}

impl TemplateError {
    /// True if this error originated from an undefined-variable lookup.
    pub fn is_undefined(&self) -> bool {
        matches!(self, TemplateError::UndefinedVariable { .. })
    }
}
