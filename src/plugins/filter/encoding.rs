//! Base64 encoding filters.

use base64::Engine as _;
use minijinja::{Environment, Error as MjError};

use crate::plugins::plugin_error;

pub fn register_filters(env: &mut Environment<'static>) {
    env.add_filter("b64encode", b64encode);
    env.add_filter("b64decode", b64decode);
}

fn b64encode(input: String) -> String {
    base64::engine::general_purpose::STANDARD.encode(input.as_bytes())
}

/// Decode Base64 text. Invalid input or non-UTF-8 content fails the render
/// rather than silently producing an empty string.
fn b64decode(input: String) -> Result<String, MjError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(input.trim())
        .map_err(|e| plugin_error("b64decode", e))?;
    String::from_utf8(bytes).map_err(|e| plugin_error("b64decode", e))
}
