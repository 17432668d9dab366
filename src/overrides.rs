//! Per-template syntax overrides.
//!
//! A [`TemplateOverrides`] value customizes the template syntax for a single
//! document or call: delimiters, whitespace-trim flags, and newline handling.
//! Instances are immutable; [`TemplateOverrides::merge`] produces a new
//! instance, and an all-default construction short-circuits to the shared
//! [`TemplateOverrides::default_instance`] singleton so downstream code can
//! skip overlay work by identity.
//!
//! Templates may embed their own overrides in a leading header line:
//!
//! ```text
//! #jinja2:trim_blocks:False,variable_start_string:'<<'
//! ```
//!
//! Header parsing is strict - an unknown key, malformed literal, or type
//! mismatch fails the whole parse with no partial application.

use once_cell::sync::Lazy;

use crate::error::{Result, TemplateError};

/// Prefix that introduces an overrides header line.
pub const OVERRIDE_HEADER_PREFIX: &str = "#jinja2:";

static DEFAULT_OVERRIDES: Lazy<TemplateOverrides> = Lazy::new(TemplateOverrides::default);

/// Immutable record of template-syntax options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TemplateOverrides {
    /// Start delimiter for statement blocks.
    pub block_start_string: String,
    /// End delimiter for statement blocks.
    pub block_end_string: String,
    /// Start delimiter for variable substitution.
    pub variable_start_string: String,
    /// End delimiter for variable substitution.
    pub variable_end_string: String,
    /// Start delimiter for comments.
    pub comment_start_string: String,
    /// End delimiter for comments.
    pub comment_end_string: String,
    /// Remove the first newline after a block.
    pub trim_blocks: bool,
    /// Strip whitespace from the start of a line to a block tag.
    pub lstrip_blocks: bool,
    /// Sequence used when re-appending stripped trailing newlines. Must be
    /// one of `"\n"`, `"\r\n"`, `"\r"`.
    pub newline_sequence: String,
    /// Keep the trailing newline when rendering, instead of the engine's
    /// default strip-one behavior.
    pub keep_trailing_newline: bool,
}

impl Default for TemplateOverrides {
    fn default() -> Self {
        Self {
            block_start_string: "{%".to_string(),
            block_end_string: "%}".to_string(),
            variable_start_string: "{{".to_string(),
            variable_end_string: "}}".to_string(),
            comment_start_string: "{#".to_string(),
            comment_end_string: "#}".to_string(),
            trim_blocks: true,
            lstrip_blocks: true,
            newline_sequence: "\n".to_string(),
            keep_trailing_newline: false,
        }
    }
}

/// A sparse set of override fields for merging; absent fields are no-ops.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OverridesPatch {
    pub block_start_string: Option<String>,
    pub block_end_string: Option<String>,
    pub variable_start_string: Option<String>,
    pub variable_end_string: Option<String>,
    pub comment_start_string: Option<String>,
    pub comment_end_string: Option<String>,
    pub trim_blocks: Option<bool>,
    pub lstrip_blocks: Option<bool>,
    pub newline_sequence: Option<String>,
    pub keep_trailing_newline: Option<bool>,
}

impl OverridesPatch {
    /// True when every field is absent.
    pub fn is_empty(&self) -> bool {
        *self == OverridesPatch::default()
    }
}

impl TemplateOverrides {
    /// The shared default instance.
    pub fn default_instance() -> &'static TemplateOverrides {
        &DEFAULT_OVERRIDES
    }

    /// True when this instance equals the default set.
    pub fn is_default(&self) -> bool {
        self == &*DEFAULT_OVERRIDES
    }

    /// Build an override record from a sparse patch, short-circuiting to the
    /// shared default instance when every supplied value equals the
    /// corresponding default. Downstream merge/overlay code relies on that
    /// identity to skip copies.
    pub fn from_patch(patch: &OverridesPatch) -> Result<TemplateOverrides> {
        if patch.is_empty() {
            return Ok(DEFAULT_OVERRIDES.clone());
        }
        DEFAULT_OVERRIDES.merge(patch)
    }

    /// Return a new instance with the patch's present fields overridden.
    /// Absent fields are a per-key no-op; the receiver is never mutated.
    pub fn merge(&self, patch: &OverridesPatch) -> Result<TemplateOverrides> {
        if patch.is_empty() {
            return Ok(self.clone());
        }

        let merged = TemplateOverrides {
            block_start_string: patch
                .block_start_string
                .clone()
                .unwrap_or_else(|| self.block_start_string.clone()),
            block_end_string: patch
                .block_end_string
                .clone()
                .unwrap_or_else(|| self.block_end_string.clone()),
            variable_start_string: patch
                .variable_start_string
                .clone()
                .unwrap_or_else(|| self.variable_start_string.clone()),
            variable_end_string: patch
                .variable_end_string
                .clone()
                .unwrap_or_else(|| self.variable_end_string.clone()),
            comment_start_string: patch
                .comment_start_string
                .clone()
                .unwrap_or_else(|| self.comment_start_string.clone()),
            comment_end_string: patch
                .comment_end_string
                .clone()
                .unwrap_or_else(|| self.comment_end_string.clone()),
            trim_blocks: patch.trim_blocks.unwrap_or(self.trim_blocks),
            lstrip_blocks: patch.lstrip_blocks.unwrap_or(self.lstrip_blocks),
            newline_sequence: patch
                .newline_sequence
                .clone()
                .unwrap_or_else(|| self.newline_sequence.clone()),
            keep_trailing_newline: patch
                .keep_trailing_newline
                .unwrap_or(self.keep_trailing_newline),
        };

        merged.validate()?;
        Ok(merged)
    }

    fn validate(&self) -> Result<()> {
        if self.block_start_string == self.variable_start_string
            || self.variable_start_string == self.comment_start_string
            || self.block_start_string == self.comment_start_string
        {
            return Err(TemplateError::OverrideParse {
                message: "block, variable and comment start strings must be different".to_string(),
            });
        }

        if !matches!(self.newline_sequence.as_str(), "\n" | "\r\n" | "\r") {
            return Err(TemplateError::OverrideParse {
                message: format!(
                    "newline_sequence must be one of '\\n', '\\r\\n', '\\r', got {:?}",
                    self.newline_sequence
                ),
            });
        }

        Ok(())
    }

    /// Scan `template` for a leading overrides header. On a match, parse it
    /// strictly and return the template with the header line (including its
    /// trailing newline) stripped, plus the merged override record. Without a
    /// header the input and `self` are returned unchanged.
    pub fn extract_template_overrides<'a>(
        &self,
        template: &'a str,
    ) -> Result<(&'a str, TemplateOverrides)> {
        let Some(header) = template.strip_prefix(OVERRIDE_HEADER_PREFIX) else {
            return Ok((template, self.clone()));
        };

        let Some(eol) = header.find('\n') else {
            return Err(TemplateError::OverrideParse {
                message: format!("missing newline after '{OVERRIDE_HEADER_PREFIX}' header"),
            });
        };

        let line = &header[..eol];
        let body = &header[eol + 1..];
        let mut patch = OverridesPatch::default();

        for pair in line.split(',') {
            if pair.trim().is_empty() {
                return Err(TemplateError::OverrideParse {
                    message: "empty override pair not allowed".to_string(),
                });
            }

            let Some((key, raw_value)) = pair.split_once(':') else {
                return Err(TemplateError::OverrideParse {
                    message: format!("missing key-value separator ':' in override pair '{pair}'"),
                });
            };

            let key = key.trim();
            apply_header_value(&mut patch, key, raw_value.trim())?;
        }

        let overrides = self.merge(&patch)?;
        Ok((body, overrides))
    }

    /// Returns true if `value` contains a variable, block or comment start
    /// string.
    pub fn contains_start_string(&self, value: &str) -> bool {
        value.contains(&self.block_start_string)
            || value.contains(&self.variable_start_string)
            || value.contains(&self.comment_start_string)
    }

    /// Returns true if `value` starts and ends with template delimiters.
    pub fn starts_and_ends_with_delimiters(&self, value: &str) -> bool {
        let starts = value.starts_with(&self.block_start_string)
            || value.starts_with(&self.variable_start_string)
            || value.starts_with(&self.comment_start_string);

        starts
            && (value.ends_with(&self.block_end_string)
                || value.ends_with(&self.variable_end_string)
                || value.ends_with(&self.comment_end_string))
    }
}

/// A lightweight check to determine if the given string looks like it
/// contains a template, even if that template is invalid. False positives
/// are acceptable; false negatives are not - callers use this as a fast-path
/// short-circuit before compiling.
pub fn is_possibly_template(value: &str, overrides: &TemplateOverrides) -> bool {
    value.starts_with(OVERRIDE_HEADER_PREFIX) || overrides.contains_start_string(value)
}

/// A lightweight check to determine if the given string looks like it is
/// *only* a template: it starts with an overrides header or is bracketed by
/// template delimiters.
pub fn is_possibly_all_template(value: &str, overrides: &TemplateOverrides) -> bool {
    value.starts_with(OVERRIDE_HEADER_PREFIX) || overrides.starts_and_ends_with_delimiters(value)
}

/// A parsed Python-style literal from an overrides header value.
enum HeaderLiteral {
    Bool(bool),
    Str(String),
}

fn parse_header_literal(raw: &str) -> Result<HeaderLiteral> {
    match raw {
        "True" => return Ok(HeaderLiteral::Bool(true)),
        "False" => return Ok(HeaderLiteral::Bool(false)),
        _ => {}
    }

    let bytes = raw.as_bytes();
    if bytes.len() >= 2 && (bytes[0] == b'\'' || bytes[0] == b'"') && bytes[bytes.len() - 1] == bytes[0]
    {
        let inner = &raw[1..raw.len() - 1];
        let mut out = String::with_capacity(inner.len());
        let mut chars = inner.chars();

        while let Some(c) = chars.next() {
            if c != '\\' {
                out.push(c);
                continue;
            }
            match chars.next() {
                Some('n') => out.push('\n'),
                Some('r') => out.push('\r'),
                Some('t') => out.push('\t'),
                Some('\\') => out.push('\\'),
                Some('\'') => out.push('\''),
                Some('"') => out.push('"'),
                other => {
                    return Err(TemplateError::OverrideParse {
                        message: format!("invalid escape sequence in literal {raw:?}: {other:?}"),
                    })
                }
            }
        }

        return Ok(HeaderLiteral::Str(out));
    }

    Err(TemplateError::OverrideParse {
        message: format!("invalid literal {raw:?}"),
    })
}

fn expect_bool(key: &str, raw: &str) -> Result<bool> {
    match parse_header_literal(raw)? {
        HeaderLiteral::Bool(b) => Ok(b),
        HeaderLiteral::Str(_) => Err(TemplateError::OverrideParse {
            message: format!("override key '{key}' expects a boolean, got {raw:?}"),
        }),
    }
}

fn expect_str(key: &str, raw: &str) -> Result<String> {
    match parse_header_literal(raw)? {
        HeaderLiteral::Str(s) => Ok(s),
        HeaderLiteral::Bool(_) => Err(TemplateError::OverrideParse {
            message: format!("override key '{key}' expects a string, got {raw:?}"),
        }),
    }
}

fn apply_header_value(patch: &mut OverridesPatch, key: &str, raw: &str) -> Result<()> {
    match key {
        "block_start_string" => patch.block_start_string = Some(expect_str(key, raw)?),
        "block_end_string" => patch.block_end_string = Some(expect_str(key, raw)?),
        "variable_start_string" => patch.variable_start_string = Some(expect_str(key, raw)?),
        "variable_end_string" => patch.variable_end_string = Some(expect_str(key, raw)?),
        "comment_start_string" => patch.comment_start_string = Some(expect_str(key, raw)?),
        "comment_end_string" => patch.comment_end_string = Some(expect_str(key, raw)?),
        "trim_blocks" => patch.trim_blocks = Some(expect_bool(key, raw)?),
        "lstrip_blocks" => patch.lstrip_blocks = Some(expect_bool(key, raw)?),
        "newline_sequence" => patch.newline_sequence = Some(expect_str(key, raw)?),
        "keep_trailing_newline" => patch.keep_trailing_newline = Some(expect_bool(key, raw)?),
        unknown => {
            return Err(TemplateError::OverrideParse {
                message: format!("invalid override key '{unknown}'"),
            })
        }
    }
    Ok(())
}
