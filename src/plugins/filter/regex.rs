//! Regular expression filters.
//!
//! - `regex_search`: First match, or the requested capture group
//! - `regex_replace`: Replace all matches, supporting `\1` backreferences
//! - `regex_findall`: All matches as a list
//! - `regex_escape`: Escape regex metacharacters

use minijinja::{Environment, Error as MjError, Value};
use regex::Regex;

use crate::plugins::plugin_error;

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("regex_search", regex_search);
    env.add_filter("regex_replace", regex_replace);
    env.add_filter("regex_findall", regex_findall);
    env.add_filter("regex_escape", regex_escape);
}

fn compile(filter: &str, pattern: &str, ignorecase: bool) -> Result<Regex, MjError> {
    let pattern = if ignorecase {
        format!("(?i){pattern}")
    } else {
        pattern.to_string()
    };
    Regex::new(&pattern).map_err(|e| plugin_error(filter, e))
}

fn regex_search(
    input: String,
    pattern: String,
    group: Option<i64>,
    ignorecase: Option<bool>,
) -> Result<Value, MjError> {
    let re = compile("regex_search", &pattern, ignorecase.unwrap_or(false))?;
    let Some(captures) = re.captures(&input) else {
        return Ok(Value::from(()));
    };
    let group = group.unwrap_or(0).max(0) as usize;
    Ok(captures
        .get(group)
        .map(|m| Value::from(m.as_str()))
        .unwrap_or(Value::from(())))
}

fn regex_replace(
    input: String,
    pattern: String,
    replacement: String,
    ignorecase: Option<bool>,
) -> Result<String, MjError> {
    let re = compile("regex_replace", &pattern, ignorecase.unwrap_or(false))?;
    // Translate Python-style \1 backreferences into ${1}.
    let replacement = Regex::new(r"\\(\d+)")
        .map_err(|e| plugin_error("regex_replace", e))?
        .replace_all(&replacement, "$${$1}")
        .into_owned();
    Ok(re.replace_all(&input, replacement.as_str()).into_owned())
}

fn regex_findall(
    input: String,
    pattern: String,
    ignorecase: Option<bool>,
) -> Result<Value, MjError> {
    let re = compile("regex_findall", &pattern, ignorecase.unwrap_or(false))?;
    let matches: Vec<Value> = re
        .find_iter(&input)
        .map(|m| Value::from(m.as_str()))
        .collect();
    Ok(Value::from(matches))
}

fn regex_escape(input: String) -> String {
    regex::escape(&input)
}
