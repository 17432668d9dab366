//! Trust tagging for template inputs.
//!
//! A value must carry the "trusted for templating" tag before the engine will
//! compile it; everything else is inert data, no matter how template-shaped
//! it looks. Trust is granted to exactly two shapes: text scalars and UTF-8
//! streams (readers whose entire content is trusted, e.g. a template file
//! opened by a loader). The closed [`Trustable`] capability makes that set
//! exhaustive at compile time; granting trust to a container is rejected with
//! a typed error because trust is a per-scalar fact.

use std::io::Read;

use crate::error::{Result, TemplateError};
use crate::value::{TaggedStr, Value};

/// The closed set of shapes that may be trusted for templating.
pub enum Trustable {
    /// A text scalar.
    Text(String),
    /// A UTF-8 stream whose full content is trusted, e.g. an opened
    /// template file.
    Stream(Box<dyn Read + Send>),
}

impl Trustable {
    /// Consume the capability, producing a trusted string scalar. Stream
    /// content is read to the end and must be valid UTF-8.
    pub fn into_trusted(self) -> Result<TaggedStr> {
        match self {
            Trustable::Text(text) => Ok(TaggedStr::trusted(text)),
            Trustable::Stream(mut reader) => {
                let mut buf = String::new();
                reader.read_to_string(&mut buf)?;
                Ok(TaggedStr::trusted(buf))
            }
        }
    }
}

impl From<String> for Trustable {
    fn from(text: String) -> Self {
        Trustable::Text(text)
    }
}

impl From<&str> for Trustable {
    fn from(text: &str) -> Self {
        Trustable::Text(text.to_string())
    }
}

/// Grant template trust to a string value.
///
/// Returns a trusted copy for string inputs; any other value type fails with
/// a trust error. The contract is deliberately narrow - trusting a dict would
/// be meaningless, since containers are never implicitly tagged.
pub fn trust_as_template(value: &Value) -> Result<Value> {
    match value {
        Value::String(s) => Ok(Value::String(TaggedStr::trusted(s.as_str()))),
        other => Err(TemplateError::Trust {
            type_name: other.type_name(),
        }),
    }
}

/// Check whether a value carries the template-trust tag.
///
/// Returns true only for trusted string scalars. Never fails; containers are
/// not walked.
pub fn is_trusted_as_template(value: &Value) -> bool {
    match value {
        Value::String(s) => s.is_trusted(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    #[test]
    fn test_trust_round_trip() {
        let plain = Value::untrusted("{{ foo }}");
        assert!(!is_trusted_as_template(&plain));

        let trusted = trust_as_template(&plain).unwrap();
        assert!(is_trusted_as_template(&trusted));

        // An untagged copy of the same text stays untrusted.
        let copy = Value::untrusted("{{ foo }}");
        assert!(!is_trusted_as_template(&copy));
    }

    #[test]
    fn test_trust_rejects_non_strings() {
        for value in [
            Value::Null,
            Value::Bool(true),
            Value::Int(1),
            Value::List(vec![Value::trusted("{{ x }}")]),
            Value::Dict(IndexMap::new()),
        ] {
            let err = trust_as_template(&value).unwrap_err();
            assert!(matches!(err, TemplateError::Trust { .. }));
        }
    }

    #[test]
    fn test_is_trusted_never_walks_containers() {
        // A container full of trusted strings is itself not trusted.
        let value = Value::List(vec![Value::trusted("{{ x }}")]);
        assert!(!is_trusted_as_template(&value));
    }

    #[test]
    fn test_trustable_stream() {
        let reader: Box<dyn Read + Send> = Box::new(std::io::Cursor::new("{{ x }}"));
        let tagged = Trustable::Stream(reader).into_trusted().unwrap();
        assert!(tagged.is_trusted());
        assert_eq!(tagged.as_str(), "{{ x }}");
    }

    #[test]
    fn test_trustable_stream_rejects_invalid_utf8() {
        let reader: Box<dyn Read + Send> = Box::new(std::io::Cursor::new(vec![0xff, 0xfe]));
        assert!(Trustable::Stream(reader).into_trusted().is_err());
    }
}
