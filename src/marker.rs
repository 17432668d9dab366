//! The Marker model: deferred evaluation failures.
//!
//! When evaluation cannot produce a value - an unresolvable name, a plugin
//! that failed - the failure is recovered locally into a [`Marker`] instead of
//! escaping mid-expression. Markers thread through the evaluator and are
//! resolved only at collapse points (expression completion, conditional
//! evaluation, top-level template finalization), where the engine's
//! [`MarkerBehavior`] decides whether to raise the typed error or substitute
//! a placeholder.

use std::fmt;

use parking_lot::Mutex;

use crate::error::TemplateError;
use crate::value::Value;

/// A placeholder for a value that could not be computed.
#[derive(Debug)]
pub enum Marker {
    /// A name lookup failed. Carries the failing name or a description of
    /// the lookup when the name is not known.
    Undefined {
        /// Human-readable description of what was undefined.
        hint: String,
    },
    /// An exception was captured during evaluation (plugin failure, syntax
    /// error in a nested template, recursion limit). The original error is
    /// preserved as the cause.
    CapturedException {
        /// The captured error.
        source: Box<TemplateError>,
    },
}

impl Marker {
    /// Collapse the marker into the typed error identifying the original
    /// cause. This is the strict consumption path.
    pub fn into_error(self) -> TemplateError {
        match self {
            Marker::Undefined { hint } => TemplateError::UndefinedVariable { message: hint },
            Marker::CapturedException { source } => *source,
        }
    }

    /// A one-line description, used by replacing behaviors and warnings.
    pub fn message(&self) -> String {
        match self {
            Marker::Undefined { hint } => hint.clone(),
            Marker::CapturedException { source } => source.to_string(),
        }
    }

    /// True if this marker originated from an undefined-variable lookup.
    pub fn is_undefined(&self) -> bool {
        matches!(self, Marker::Undefined { .. })
    }
}

/// Produce the marker to propagate for a previously-raised error.
///
/// Undefined-variable errors become [`Marker::Undefined`] directly so they are
/// not double-wrapped; everything else is normalized through
/// [`create_template_error`] and captured.
pub fn defer_template_error(err: TemplateError, is_expression: bool) -> Marker {
    match err {
        TemplateError::UndefinedVariable { message } => Marker::Undefined { hint: message },
        other => Marker::CapturedException {
            source: Box::new(create_template_error(other, is_expression)),
        },
    }
}

/// Normalize an arbitrary evaluation error into the template error taxonomy,
/// labelling it as template- or expression-originated.
pub fn create_template_error(err: TemplateError, is_expression: bool) -> TemplateError {
    let kind = if is_expression { "expression" } else { "template" };

    match err {
        TemplateError::Engine { source, .. } => TemplateError::Engine { kind, source },
        TemplateError::Syntax {
            message, source, ..
        } => TemplateError::Syntax {
            kind,
            message,
            source,
        },
        TemplateError::RecursiveLoop { .. } => TemplateError::RecursiveLoop { kind },
        other => other,
    }
}

/// Policy applied when a marker reaches a collapse point.
pub trait MarkerBehavior: fmt::Debug + Send + Sync {
    /// Resolve the marker: either raise its error or substitute a value.
    fn handle_marker(&self, marker: Marker) -> Result<Value, TemplateError>;
}

/// The default behavior: any marker reaching a collapse point raises its
/// underlying error.
#[derive(Debug, Default, Clone, Copy)]
pub struct FailOnUndefined;

impl MarkerBehavior for FailOnUndefined {
    fn handle_marker(&self, marker: Marker) -> Result<Value, TemplateError> {
        Err(marker.into_error())
    }
}

/// A diagnostic behavior that substitutes a visible placeholder for each
/// marker and accumulates the messages for later emission, instead of
/// failing the render. Useful for callers that want best-effort output with
/// a warning trail.
#[derive(Debug, Default)]
pub struct ReplacingMarkerBehavior {
    warnings: Mutex<Vec<String>>,
}

impl ReplacingMarkerBehavior {
    /// Create a new replacing behavior with an empty warning trail.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain the accumulated warning messages.
    pub fn take_warnings(&self) -> Vec<String> {
        std::mem::take(&mut *self.warnings.lock())
    }
}

impl MarkerBehavior for ReplacingMarkerBehavior {
    fn handle_marker(&self, marker: Marker) -> Result<Value, TemplateError> {
        let message = marker.message();
        self.warnings.lock().push(message.clone());
        Ok(Value::untrusted(format!("<< error: {message} >>")))
    }
}
