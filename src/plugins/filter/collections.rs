//! Collection reshaping filters.
//!
//! - `combine`: Merge dicts, optionally recursively
//! - `dict2items` / `items2dict`: Dict and key/value-pair list conversion
//! - `flatten`: Flatten nested lists
//! - `unique_list`: Order-preserving dedup

use indexmap::IndexMap;
use minijinja::value::{Kwargs, Rest, ValueKind};
use minijinja::{Environment, Error as MjError, ErrorKind, Value};

use crate::plugins::plugin_error;

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("combine", combine);
    env.add_filter("dict2items", dict2items);
    env.add_filter("items2dict", items2dict);
    env.add_filter("flatten", flatten);
    env.add_filter("unique_list", unique_list);
}

fn value_to_map(value: &Value, filter: &str) -> Result<IndexMap<String, Value>, MjError> {
    if value.kind() != ValueKind::Map {
        return Err(plugin_error(
            filter,
            MjError::new(
                ErrorKind::InvalidOperation,
                format!("expected a dict, got {}", value.kind()),
            ),
        ));
    }
    let mut map = IndexMap::new();
    if let Ok(iter) = value.try_iter() {
        for key in iter {
            let k = key.to_string();
            let v = value.get_item(&key).unwrap_or(Value::UNDEFINED);
            map.insert(k, v);
        }
    }
    Ok(map)
}

/// Merge one or more dicts into the input dict. With `recursive=true`,
/// nested dicts are merged key-wise instead of replaced.
fn combine(value: Value, others: Rest<Value>, kwargs: Kwargs) -> Result<Value, MjError> {
    let recursive = kwargs.get::<Option<bool>>("recursive")?.unwrap_or(false);
    kwargs.assert_all_used()?;

    let mut merged = value_to_map(&value, "combine")?;
    for other in &*others {
        let other = value_to_map(other, "combine")?;
        merge_into(&mut merged, other, recursive);
    }

    Ok(Value::from_iter(merged))
}

fn merge_into(target: &mut IndexMap<String, Value>, source: IndexMap<String, Value>, recursive: bool) {
    for (key, value) in source {
        if recursive && value.kind() == ValueKind::Map {
            if let Some(existing) = target.get(&key) {
                if existing.kind() == ValueKind::Map {
                    let mut nested = value_to_map(existing, "combine").unwrap_or_default();
                    let incoming = value_to_map(&value, "combine").unwrap_or_default();
                    merge_into(&mut nested, incoming, true);
                    target.insert(key, Value::from_iter(nested));
                    continue;
                }
            }
        }
        target.insert(key, value);
    }
}

/// Convert a dict into a list of `{key, value}` items.
fn dict2items(value: Value) -> Result<Value, MjError> {
    let map = value_to_map(&value, "dict2items")?;
    let items: Vec<Value> = map
        .into_iter()
        .map(|(k, v)| {
            Value::from_iter([
                ("key".to_string(), Value::from(k)),
                ("value".to_string(), v),
            ])
        })
        .collect();
    Ok(Value::from(items))
}

/// Convert a list of `{key, value}` items back into a dict.
fn items2dict(value: Value, kwargs: Kwargs) -> Result<Value, MjError> {
    let key_name = kwargs
        .get::<Option<String>>("key_name")?
        .unwrap_or_else(|| "key".to_string());
    let value_name = kwargs
        .get::<Option<String>>("value_name")?
        .unwrap_or_else(|| "value".to_string());
    kwargs.assert_all_used()?;

    let mut map = IndexMap::new();
    let iter = value.try_iter().map_err(|e| plugin_error("items2dict", e))?;
    for item in iter {
        let key = item.get_attr(&key_name).map_err(|e| plugin_error("items2dict", e))?;
        let val = item
            .get_attr(&value_name)
            .map_err(|e| plugin_error("items2dict", e))?;
        if key.is_undefined() {
            return Err(plugin_error(
                "items2dict",
                MjError::new(
                    ErrorKind::InvalidOperation,
                    format!("item is missing the '{key_name}' attribute"),
                ),
            ));
        }
        map.insert(key.to_string(), val);
    }
    Ok(Value::from_iter(map))
}

/// Flatten nested lists. `levels` bounds the depth; absent means fully flat.
fn flatten(value: Value, levels: Option<i64>) -> Result<Value, MjError> {
    let mut out = Vec::new();
    flatten_into(&value, levels, &mut out).map_err(|e| plugin_error("flatten", e))?;
    Ok(Value::from(out))
}

fn flatten_into(value: &Value, levels: Option<i64>, out: &mut Vec<Value>) -> Result<(), MjError> {
    for item in value.try_iter()? {
        if item.kind() == ValueKind::Seq && levels.map(|l| l > 0).unwrap_or(true) {
            flatten_into(&item, levels.map(|l| l - 1), out)?;
        } else {
            out.push(item);
        }
    }
    Ok(())
}

/// Remove duplicates, keeping first occurrences in order.
fn unique_list(value: Value) -> Result<Value, MjError> {
    let mut seen = Vec::new();
    let iter = value.try_iter().map_err(|e| plugin_error("unique_list", e))?;
    for item in iter {
        if !seen.contains(&item) {
            seen.push(item);
        }
    }
    Ok(Value::from(seen))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn render(template: &str) -> String {
        let mut env = Environment::new();
        register_filters(&mut env);
        env.render_str(template, ()).unwrap()
    }

    #[test]
    fn test_combine_shallow() {
        let out = render("{{ {'a': 1, 'b': 1} | combine({'b': 2}) | tojson }}");
        assert_eq!(out, r#"{"a":1,"b":2}"#);
    }

    #[test]
    fn test_combine_recursive() {
        let out = render(
            "{{ {'a': {'x': 1}} | combine({'a': {'y': 2}}, recursive=true) | tojson }}",
        );
        assert_eq!(out, r#"{"a":{"x":1,"y":2}}"#);
    }

    #[test]
    fn test_dict2items_round_trip() {
        let out = render("{{ {'a': 1} | dict2items | items2dict | tojson }}");
        assert_eq!(out, r#"{"a":1}"#);
    }

    #[test]
    fn test_flatten() {
        let out = render("{{ [1, [2, [3]]] | flatten | tojson }}");
        assert_eq!(out, "[1,2,3]");
        let out = render("{{ [1, [2, [3]]] | flatten(1) | tojson }}");
        assert_eq!(out, "[1,2,[3]]");
    }

    #[test]
    fn test_unique_list() {
        let out = render("{{ [1, 2, 1, 3, 2] | unique_list | tojson }}");
        assert_eq!(out, "[1,2,3]");
    }

    #[test]
    fn test_combine_rejects_non_dict() {
        let mut env = Environment::new();
        register_filters(&mut env);
        assert!(env.render_str("{{ [1] | combine({'a': 1}) }}", ()).is_err());
    }
}
