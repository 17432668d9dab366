//! Attribute-access safety shim and lazy variable exposure.
//!
//! Dicts and lists cross into the expression engine wrapped in objects that
//! enforce the access rules:
//!
//! - An exact key match wins for both `.name` and `["name"]` access, even
//!   when the key shadows a well-known container method name.
//! - An absent key resolves to undefined, never to a live method; names in
//!   [`MASKED_NAMES`] and names with a leading underscore are not callable.
//! - Integer attribute access on a list (`items.0`) behaves as indexing,
//!   with negative indexes counted from the end.
//!
//! The wrappers are also the lazy-templating boundary: a trusted string that
//! looks like a template is rendered at the moment it is accessed, through
//! the [`FragmentRenderer`] the engine supplies. Untrusted strings pass
//! through as inert text no matter what they contain.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use minijinja::value::{Enumerator, Object, ObjectRepr, Value as MjValue};
use minijinja::{Error as MjError, ErrorKind, State};
use parking_lot::RwLock;

use crate::overrides::{is_possibly_template, TemplateOverrides};
use crate::value::Value;

/// Container method names that never resolve through attribute access.
///
/// An explicitly enumerated policy rather than anything reflective: these are
/// the mutating-method names of the mapping and sequence types, kept
/// reviewable in one place.
pub const MASKED_NAMES: &[&str] = &[
    "append",
    "clear",
    "copy",
    "extend",
    "fromkeys",
    "insert",
    "pop",
    "popitem",
    "remove",
    "reverse",
    "setdefault",
    "sort",
    "update",
];

/// True for names that must never resolve to a callable on a container.
pub fn is_masked_name(name: &str) -> bool {
    name.starts_with('_') || MASKED_NAMES.contains(&name)
}

/// Renders a trusted template fragment encountered inside variable data.
///
/// `None` signals that the render failed; the failure has been recorded with
/// the engine and the access site resolves to undefined so the error
/// surfaces at the collapse point.
pub(crate) trait FragmentRenderer: Send + Sync {
    fn render_fragment(&self, text: &str) -> Option<MjValue>;
}

/// Convert a data-model value into an engine value, wrapping containers and
/// deferring trusted template strings to access time.
pub(crate) fn wrap_value(value: &Value, renderer: &Arc<dyn FragmentRenderer>) -> MjValue {
    match value {
        Value::Null => MjValue::from(()),
        Value::Bool(b) => MjValue::from(*b),
        Value::Int(n) => MjValue::from(*n),
        Value::Float(f) => MjValue::from(*f),
        Value::String(s) => {
            if s.is_trusted() && is_possibly_template(s.as_str(), TemplateOverrides::default_instance())
            {
                renderer
                    .render_fragment(s.as_str())
                    .unwrap_or(MjValue::UNDEFINED)
            } else {
                MjValue::from(s.as_str())
            }
        }
        Value::List(items) => MjValue::from_object(LazyList {
            items: items.clone(),
            renderer: Arc::clone(renderer),
        }),
        Value::Dict(map) => MjValue::from_object(LazyMap {
            map: map.clone(),
            renderer: Arc::clone(renderer),
        }),
    }
}

fn masked_call_method(name: &str) -> MjError {
    if is_masked_name(name) {
        MjError::new(
            ErrorKind::UndefinedError,
            format!("'{name}' is not accessible on containers; mutating methods are masked"),
        )
    } else {
        MjError::new(
            ErrorKind::UnknownMethod,
            format!("container has no method named '{name}'"),
        )
    }
}

/// A dict exposed to the engine under the access rules.
pub(crate) struct LazyMap {
    map: IndexMap<String, Value>,
    renderer: Arc<dyn FragmentRenderer>,
}

impl LazyMap {
    /// The underlying entries, untemplated.
    pub(crate) fn raw(&self) -> &IndexMap<String, Value> {
        &self.map
    }
}

impl fmt::Debug for LazyMap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.map.iter()).finish()
    }
}

impl Object for LazyMap {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &MjValue) -> Option<MjValue> {
        // Exact key match wins unconditionally, masked names included.
        let key = key.as_str()?;
        self.map.get(key).map(|v| wrap_value(v, &self.renderer))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Values(self.map.keys().map(MjValue::from).collect())
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        name: &str,
        _args: &[MjValue],
    ) -> Result<MjValue, MjError> {
        Err(masked_call_method(name))
    }
}

/// A list exposed to the engine under the access rules.
pub(crate) struct LazyList {
    items: Vec<Value>,
    renderer: Arc<dyn FragmentRenderer>,
}

impl LazyList {
    /// The underlying items, untemplated.
    pub(crate) fn raw(&self) -> &[Value] {
        &self.items
    }
}

impl fmt::Debug for LazyList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.items.iter()).finish()
    }
}

impl Object for LazyList {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Seq
    }

    fn get_value(self: &Arc<Self>, key: &MjValue) -> Option<MjValue> {
        let idx = i64::try_from(key.clone()).ok()?;
        let idx = if idx < 0 {
            idx.checked_add(self.items.len() as i64)?
        } else {
            idx
        };
        let item = self.items.get(usize::try_from(idx).ok()?)?;
        Some(wrap_value(item, &self.renderer))
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        Enumerator::Seq(self.items.len())
    }

    fn call_method(
        self: &Arc<Self>,
        _state: &State,
        name: &str,
        _args: &[MjValue],
    ) -> Result<MjValue, MjError> {
        Err(masked_call_method(name))
    }
}

/// Shared variable storage, layered for local overlays.
pub(crate) type VarLayer = Arc<RwLock<IndexMap<String, Value>>>;

/// The root lookup object for a render: local layers shadow engine
/// variables, first hit wins.
pub(crate) struct VarsProxy {
    layers: Vec<VarLayer>,
    renderer: Arc<dyn FragmentRenderer>,
}

impl VarsProxy {
    pub(crate) fn new(layers: Vec<VarLayer>, renderer: Arc<dyn FragmentRenderer>) -> Self {
        Self { layers, renderer }
    }
}

impl fmt::Debug for VarsProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VarsProxy({} layers)", self.layers.len())
    }
}

impl Object for VarsProxy {
    fn repr(self: &Arc<Self>) -> ObjectRepr {
        ObjectRepr::Map
    }

    fn get_value(self: &Arc<Self>, key: &MjValue) -> Option<MjValue> {
        let key = key.as_str()?;
        for layer in &self.layers {
            if let Some(value) = layer.read_recursive().get(key) {
                return Some(wrap_value(value, &self.renderer));
            }
        }
        None
    }

    fn enumerate(self: &Arc<Self>) -> Enumerator {
        let mut keys: Vec<MjValue> = Vec::new();
        let mut seen: Vec<String> = Vec::new();
        for layer in &self.layers {
            for key in layer.read_recursive().keys() {
                if !seen.contains(key) {
                    seen.push(key.clone());
                    keys.push(MjValue::from(key.as_str()));
                }
            }
        }
        Enumerator::Values(keys)
    }
}
