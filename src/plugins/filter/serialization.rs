//! JSON and YAML serialization filters.

use minijinja::{Environment, Error as MjError, Value};

use crate::plugins::plugin_error;

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("to_json", to_json);
    env.add_filter("to_nice_json", to_nice_json);
    env.add_filter("from_json", from_json);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("from_yaml", from_yaml);
}

fn to_json(value: Value) -> Result<String, MjError> {
    serde_json::to_string(&value).map_err(|e| plugin_error("to_json", e))
}

/// Pretty-printed JSON with 4-space indentation.
fn to_nice_json(value: Value) -> Result<String, MjError> {
    let json: serde_json::Value =
        serde_json::to_value(&value).map_err(|e| plugin_error("to_nice_json", e))?;
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    serde::Serialize::serialize(&json, &mut ser).map_err(|e| plugin_error("to_nice_json", e))?;
    String::from_utf8(buf).map_err(|e| plugin_error("to_nice_json", e))
}

fn from_json(text: String) -> Result<Value, MjError> {
    let parsed: serde_json::Value =
        serde_json::from_str(&text).map_err(|e| plugin_error("from_json", e))?;
    Ok(Value::from_serialize(&parsed))
}

fn to_yaml(value: Value) -> Result<String, MjError> {
    serde_yaml::to_string(&value).map_err(|e| plugin_error("to_yaml", e))
}

fn from_yaml(text: String) -> Result<Value, MjError> {
    let parsed: serde_yaml::Value =
        serde_yaml::from_str(&text).map_err(|e| plugin_error("from_yaml", e))?;
    Ok(Value::from_serialize(&parsed))
}
