//! String and scalar filters.
//!
//! Casing and length come from the engine builtins; this module adds the
//! coercion and path filters the builtins lack:
//!
//! - `bool`: Loose boolean coercion ("yes"/"true"/1 and friends)
//! - `ternary`: Pick one of two values from a condition
//! - `basename` / `dirname`: Path components
//! - `expanduser`: Tilde expansion
//! - `type_debug`: Name of a value's type

use minijinja::value::ValueKind;
use minijinja::{Environment, Value};

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("bool", bool_filter);
    env.add_filter("ternary", ternary);
    env.add_filter("basename", basename);
    env.add_filter("dirname", dirname);
    env.add_filter("expanduser", expanduser);
    env.add_filter("type_debug", type_debug);
}

/// Coerce a value to a boolean, accepting the usual loose string spellings.
fn bool_filter(value: Value) -> bool {
    match value.kind() {
        ValueKind::Bool => value.is_true(),
        ValueKind::Number => i64::try_from(value.clone()).map(|n| n != 0).unwrap_or(true),
        ValueKind::String => matches!(
            value.as_str().unwrap_or("").to_lowercase().as_str(),
            "true" | "yes" | "on" | "1"
        ),
        _ => false,
    }
}

/// Return `if_true` when the input is truthy, otherwise `if_false`.
fn ternary(value: Value, if_true: Value, if_false: Value) -> Value {
    if value.is_true() {
        if_true
    } else {
        if_false
    }
}

fn basename(path: String) -> String {
    std::path::Path::new(&path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}

fn dirname(path: String) -> String {
    std::path::Path::new(&path)
        .parent()
        .map(|p| p.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Expand a leading tilde to the user's home directory.
fn expanduser(path: String) -> String {
    shellexpand::tilde(&path).into_owned()
}

/// Name of the value's type, for debugging templates.
fn type_debug(value: Value) -> &'static str {
    match value.kind() {
        ValueKind::Undefined => "undefined",
        ValueKind::None => "none",
        ValueKind::Bool => "bool",
        ValueKind::Number => "number",
        ValueKind::String => "string",
        ValueKind::Bytes => "bytes",
        ValueKind::Seq => "list",
        ValueKind::Map => "dict",
        _ => "object",
    }
}
