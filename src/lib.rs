//! # Templar
//!
//! A trust-aware Jinja2-style templating engine built on `minijinja`.
//!
//! Template syntax in a string means nothing by itself: only strings tagged
//! as *trusted for templating* are ever compiled, and everything else flows
//! through evaluation as inert data. On top of that trust boundary the crate
//! provides:
//!
//! - **Trust tagging** ([`trust`]): granting and checking the per-scalar
//!   trust tag, with a closed capability type for trusted sources.
//! - **Template evaluation** ([`engine`]): recursive templating of value
//!   trees with shape preservation, native results for all-template strings,
//!   expression evaluation, restricted variable navigation, and strict
//!   conditional evaluation.
//! - **Deferred failures** ([`marker`]): evaluation failures become markers
//!   that collapse at operation boundaries, so `x is defined` never raises
//!   while direct consumption fails with the original cause intact.
//! - **Per-template syntax overrides** ([`overrides`]): delimiter and
//!   whitespace options, including strict `#jinja2:` header parsing.
//! - **Safe attribute access** ([`access`]): container keys always win over
//!   method names; mutating methods are masked.
//! - **A facade** ([`templar`]): one object carrying variables, overrides
//!   and undefined policy across many evaluations.
//!
//! # Example
//!
//! ```rust,ignore
//! use templar::{Templar, Value};
//!
//! let templar = Templar::new();
//! templar.set_variable("name", Value::untrusted("world"));
//!
//! let out = templar.template(&Value::trusted("hello {{ name }}"))?;
//! assert_eq!(out.as_str(), Some("hello world"));
//!
//! // Untrusted template-shaped text is inert.
//! let inert = templar.template(&Value::untrusted("hello {{ name }}"))?;
//! assert_eq!(inert.as_str(), Some("hello {{ name }}"));
//! # Ok::<(), templar::TemplateError>(())
//! ```

pub mod access;
pub mod config;
pub mod deprecation;
pub mod engine;
pub mod error;
pub mod loader;
pub mod marker;
pub mod overrides;
pub mod plugins;
pub mod templar;
pub mod trust;
pub mod value;

pub use config::TemplateConfig;
pub use deprecation::{DeprecationContext, DeprecationNotice};
pub use engine::{TemplateEngine, TemplateMode, TemplateOptions};
pub use error::{Result, TemplateError};
pub use loader::{DictLoader, FileSystemLoader, TemplateLoader};
pub use marker::{FailOnUndefined, Marker, MarkerBehavior, ReplacingMarkerBehavior};
pub use overrides::{is_possibly_template, OverridesPatch, TemplateOverrides};
pub use templar::{Templar, TemporaryContext};
pub use trust::{is_trusted_as_template, trust_as_template, Trustable};
pub use value::{TaggedStr, Value};
