//! End-to-end templating behavior: trust boundaries, native results,
//! undefined handling, container shapes, and failure-cause preservation.

use std::error::Error as StdError;
use std::sync::Arc;

use indexmap::IndexMap;
use pretty_assertions::assert_eq;
use templar::plugins::lookup::{LookupPlugin, LookupRegistry, LookupResult};
use templar::plugins::PluginError;
use templar::{
    DictLoader, ReplacingMarkerBehavior, TaggedStr, Templar, TemplateEngine, TemplateError,
    TemplateMode, TemplateOptions, Value,
};

fn templar_with(vars: &[(&str, Value)]) -> Templar {
    let templar = Templar::new();
    for (name, value) in vars {
        templar.set_variable(*name, value.clone());
    }
    templar
}

#[test]
fn test_untrusted_template_text_is_inert() {
    let templar = templar_with(&[("name", Value::untrusted("world"))]);
    let input = Value::untrusted("hello {{ name }}");
    let out = templar.template(&input).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_trusted_plain_text_passes_through() {
    let templar = templar_with(&[]);
    let input = Value::trusted("no syntax here");
    let out = templar.template(&input).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_trusted_template_renders() {
    let templar = templar_with(&[("name", Value::untrusted("world"))]);
    let out = templar.template(&Value::trusted("hello {{ name }}")).unwrap();
    assert_eq!(out.as_str(), Some("hello world"));
}

#[test]
fn test_all_template_string_yields_native_value() {
    let templar = templar_with(&[("count", Value::Int(3))]);
    assert_eq!(
        templar.template(&Value::trusted("{{ count }}")).unwrap(),
        Value::Int(3)
    );
    assert_eq!(
        templar.template(&Value::trusted("{{ count > 1 }}")).unwrap(),
        Value::Bool(true)
    );
    assert_eq!(
        templar.template(&Value::trusted("{{ [1, 2] }}")).unwrap(),
        Value::List(vec![Value::Int(1), Value::Int(2)])
    );
    assert_eq!(
        templar.template(&Value::trusted("{{ none }}")).unwrap(),
        Value::Null
    );
}

#[test]
fn test_mixed_template_concatenates_to_string() {
    let templar = templar_with(&[("count", Value::Int(3))]);
    let out = templar.template(&Value::trusted("n = {{ count }}")).unwrap();
    assert_eq!(out.as_str(), Some("n = 3"));
}

#[test]
fn test_container_shape_preserved() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    let mut inner = IndexMap::new();
    inner.insert("templated".to_string(), Value::trusted("{{ x }}"));
    inner.insert("inert".to_string(), Value::untrusted("{{ x }}"));
    let input = Value::List(vec![Value::Dict(inner), Value::Int(9)]);

    let out = templar.template(&input).unwrap();
    let Value::List(items) = out else {
        panic!("expected list");
    };
    assert_eq!(items.len(), 2);
    let Value::Dict(map) = &items[0] else {
        panic!("expected dict");
    };
    assert_eq!(map["templated"], Value::Int(1));
    assert_eq!(map["inert"], Value::untrusted("{{ x }}"));
    assert_eq!(items[1], Value::Int(9));
}

#[test]
fn test_nested_trusted_variable_is_templated_on_access() {
    let templar = templar_with(&[
        ("a", Value::trusted("{{ b }}")),
        ("b", Value::untrusted("data")),
        ("c", Value::untrusted("{{ b }}")),
    ]);
    // Trusted nested template renders.
    let out = templar.template(&Value::trusted("{{ a }}")).unwrap();
    assert_eq!(out.as_str(), Some("data"));
    // Untrusted nested text stays literal.
    let out = templar.template(&Value::trusted("{{ c }}")).unwrap();
    assert_eq!(out.as_str(), Some("{{ b }}"));
}

#[test]
fn test_undefined_is_defined_never_raises() {
    let templar = templar_with(&[]);
    assert_eq!(
        templar
            .template(&Value::trusted("{{ missing is defined }}"))
            .unwrap(),
        Value::Bool(false)
    );
    assert_eq!(
        templar
            .template(&Value::trusted("{{ missing | default('fallback') }}"))
            .unwrap()
            .as_str(),
        Some("fallback")
    );
}

#[test]
fn test_undefined_consumption_raises_strict() {
    let templar = templar_with(&[]);
    let err = templar
        .template(&Value::trusted("value: {{ missing }}"))
        .unwrap_err();
    assert!(matches!(err, TemplateError::UndefinedVariable { .. }));

    let err = templar
        .template(&Value::trusted("{{ missing }}"))
        .unwrap_err();
    assert!(matches!(err, TemplateError::UndefinedVariable { .. }));
}

#[test]
fn test_non_strict_returns_original_input() {
    let templar = templar_with(&[]).with_fail_on_undefined(false);
    let input = Value::trusted("value: {{ missing }}");
    let out = templar.template(&input).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_replacing_behavior_substitutes_placeholder() {
    let behavior = Arc::new(ReplacingMarkerBehavior::new());
    let engine = TemplateEngine::with_behavior(behavior.clone());
    let out = engine.template_default(&Value::trusted("{{ missing }}")).unwrap();
    assert!(out.as_str().unwrap().starts_with("<< error:"));
    assert_eq!(behavior.take_warnings().len(), 1);
}

#[test]
fn test_plugin_failure_preserves_original_cause() {
    let templar = templar_with(&[]);
    let err = templar
        .template(&Value::trusted("{{ 'not json' | from_json }}"))
        .unwrap_err();

    let TemplateError::PluginRuntime { ref plugin, .. } = err else {
        panic!("expected plugin error, got {err:?}");
    };
    assert_eq!(plugin, "from_json");

    // The original serde error object is reachable through the source chain.
    let mut cursor: Option<&(dyn StdError + 'static)> = err.source();
    let mut found = false;
    while let Some(e) = cursor {
        if let Some(plugin) = e.downcast_ref::<PluginError>() {
            assert!(plugin.source.downcast_ref::<serde_json::Error>().is_some());
            found = true;
            break;
        }
        cursor = e.source();
    }
    assert!(found, "plugin error not found on source chain");
}

#[test]
fn test_backslash_escaping_default_on() {
    let templar = templar_with(&[]);
    let out = templar
        .template(&Value::trusted(r"{{ '\some' }}"))
        .unwrap();
    assert_eq!(out.as_str(), Some(r"\some"));
}

#[test]
fn test_backslash_escaping_opt_out() {
    let templar = templar_with(&[]);
    let options = TemplateOptions {
        escape_backslashes: false,
        ..Default::default()
    };
    // Without escaping, `\s` is an invalid escape sequence in the string
    // constant and the compile fails.
    assert!(templar
        .template_with_options(&Value::trusted(r"{{ '\some' }}"), &options)
        .is_err());
}

#[test]
fn test_backslash_escaping_opt_out_accepts_predoubled() {
    // With escaping off, the caller supplies already-doubled backslashes and
    // gets a single backslash out.
    let templar = templar_with(&[]);
    let options = TemplateOptions {
        escape_backslashes: false,
        ..Default::default()
    };
    let out = templar
        .template_with_options(&Value::trusted(r"{{ '\\some' }}"), &options)
        .unwrap();
    assert_eq!(out.as_str(), Some(r"\some"));
}

#[test]
fn test_indirect_template_escaped_under_default_options() {
    // A template substituted from a variable is compiled under default
    // options; the top-level opt-out does not reach it.
    let templar = templar_with(&[("p", Value::trusted(r"{{ '\some' }}"))]);
    let options = TemplateOptions {
        escape_backslashes: false,
        ..Default::default()
    };
    let out = templar
        .template_with_options(&Value::trusted("{{ p }}"), &options)
        .unwrap();
    assert_eq!(out.as_str(), Some(r"\some"));
}

#[test]
fn test_trailing_newlines_preserved() {
    let templar = templar_with(&[("x", Value::untrusted("a"))]);
    let out = templar.template(&Value::trusted("{{ x }}!\n")).unwrap();
    assert_eq!(out.as_str(), Some("a!\n"));
    let out = templar.template(&Value::trusted("{{ x }}!\n\n\n")).unwrap();
    assert_eq!(out.as_str(), Some("a!\n\n\n"));
}

#[test]
fn test_recursive_template_detected() {
    let templar = templar_with(&[("a", Value::trusted("{{ a }}"))]);
    let err = templar.template(&Value::trusted("{{ a }}")).unwrap_err();
    assert!(matches!(err, TemplateError::RecursiveLoop { .. }), "{err:?}");
}

#[test]
fn test_omit_top_level() {
    let templar = templar_with(&[]);
    let err = templar.template(&Value::trusted("{{ omit }}")).unwrap_err();
    assert!(matches!(err, TemplateError::ValueOmitted));

    let options = TemplateOptions {
        value_for_omit: Some(Value::Null),
        ..Default::default()
    };
    let out = templar
        .template_with_options(&Value::trusted("{{ omit }}"), &options)
        .unwrap();
    assert_eq!(out, Value::Null);
}

#[test]
fn test_omit_dropped_from_containers() {
    let templar = templar_with(&[]);
    let mut map = IndexMap::new();
    map.insert("keep".to_string(), Value::Int(1));
    map.insert("drop".to_string(), Value::trusted("{{ omit }}"));
    let out = templar.template(&Value::Dict(map)).unwrap();
    let Value::Dict(out) = out else {
        panic!("expected dict");
    };
    assert_eq!(out.len(), 1);
    assert_eq!(out["keep"], Value::Int(1));
}

#[test]
fn test_evaluate_expression_requires_trust() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    let err = templar
        .evaluate_expression(&Value::untrusted("x + 1"), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::Untrusted { .. }));

    let err = templar
        .evaluate_expression(&Value::Int(1), None)
        .unwrap_err();
    assert!(matches!(err, TemplateError::Trust { .. }));

    assert_eq!(
        templar
            .evaluate_expression(&Value::trusted("x + 1"), None)
            .unwrap(),
        Value::Int(2)
    );
}

#[test]
fn test_evaluate_expression_local_variables_shadow() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    let locals: IndexMap<String, Value> = [("x".to_string(), Value::Int(10))].into_iter().collect();
    assert_eq!(
        templar
            .evaluate_expression(&Value::trusted("x + 1"), Some(&locals))
            .unwrap(),
        Value::Int(11)
    );
    // Engine variables untouched.
    assert_eq!(templar.available_variables()["x"], Value::Int(1));
}

#[test]
fn test_resolve_variable_expression() {
    let mut server = IndexMap::new();
    server.insert("name".to_string(), Value::untrusted("web1"));
    let templar = templar_with(&[("servers", Value::List(vec![Value::Dict(server)]))]);

    let out = templar
        .resolve_variable_expression("servers[0].name", None)
        .unwrap();
    assert_eq!(out.as_str(), Some("web1"));

    for rejected in ["servers | length", "lookup('env', 'HOME')", "a + b", "a['k']"] {
        let err = templar
            .resolve_variable_expression(rejected, None)
            .unwrap_err();
        assert!(
            matches!(err, TemplateError::InvalidVariableExpression { .. }),
            "{rejected} should be rejected, got {err:?}"
        );
    }
}

#[test]
fn test_is_template() {
    let templar = templar_with(&[]);
    assert!(templar.is_template(&Value::trusted("{{ x }}")));
    assert!(templar.is_template(&Value::trusted("{% if x %}y{% endif %}")));
    assert!(!templar.is_template(&Value::untrusted("{{ x }}")));
    assert!(!templar.is_template(&Value::trusted("plain")));
    assert!(!templar.is_template(&Value::Int(3)));

    // Recursive: a trusted template anywhere in the tree counts.
    let nested = Value::List(vec![Value::Int(1), Value::trusted("{{ x }}")]);
    assert!(templar.is_template(&nested));
    let inert = Value::List(vec![Value::Int(1), Value::untrusted("{{ x }}")]);
    assert!(!templar.is_template(&inert));
}

#[test]
fn test_resolve_to_container_keeps_members_untemplated() {
    let mut cfg = IndexMap::new();
    cfg.insert("raw".to_string(), Value::trusted("{{ x }}"));
    let templar = templar_with(&[("cfg", Value::Dict(cfg)), ("x", Value::Int(1))]);

    let out = templar
        .resolve_to_container(&Value::trusted("{{ cfg }}"))
        .unwrap();
    let Value::Dict(out) = out else {
        panic!("expected dict");
    };
    // The member template string is intact, trust tag included.
    assert_eq!(out["raw"], Value::String(TaggedStr::trusted("{{ x }}")));
}

#[test]
fn test_include_through_loader() {
    let loader = DictLoader::new().with_source("inc.j2", "inc {{ x }}");
    let templar = templar_with(&[("x", Value::Int(1))]).with_loader(Arc::new(loader));
    let out = templar
        .template(&Value::trusted("[{% include 'inc.j2' %}]"))
        .unwrap();
    assert_eq!(out.as_str(), Some("[inc 1]"));
}

#[test]
fn test_missing_include_fails() {
    let templar = templar_with(&[]);
    assert!(templar
        .template(&Value::trusted("{% include 'absent.j2' %}"))
        .is_err());
}

#[test]
fn test_lookup_and_query_globals() {
    std::env::set_var("TEMPLAR_IT_LOOKUP", "hit");
    let templar = templar_with(&[]);

    let out = templar
        .template(&Value::trusted("{{ lookup('env', 'TEMPLAR_IT_LOOKUP') }}"))
        .unwrap();
    assert_eq!(out.as_str(), Some("hit"));

    let out = templar
        .template(&Value::trusted("{{ query('env', 'TEMPLAR_IT_LOOKUP') }}"))
        .unwrap();
    assert_eq!(out, Value::List(vec![Value::untrusted("hit")]));

    std::env::remove_var("TEMPLAR_IT_LOOKUP");
}

#[test]
fn test_lookup_failure_is_plugin_error() {
    let templar = templar_with(&[]);
    let err = templar
        .template(&Value::trusted("{{ lookup('env', 'TEMPLAR_IT_ABSENT_XYZ') }}"))
        .unwrap_err();
    let TemplateError::PluginRuntime { plugin, .. } = err else {
        panic!("expected plugin error, got {err:?}");
    };
    assert_eq!(plugin, "lookup/env");
}

#[test]
fn test_copy_with_new_env_shares_variables() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    let copy = templar.copy_with_new_env(None, None, Some(false));

    copy.set_variable("x", Value::Int(2));
    assert_eq!(templar.available_variables()["x"], Value::Int(2));

    // Undefined policy differs per copy.
    let input = Value::trusted("{{ missing }}");
    assert!(templar.template(&input).is_err());
    assert_eq!(copy.template(&input).unwrap(), input);
}

#[test]
fn test_temporary_context_restores_on_drop() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    {
        let temp: IndexMap<String, Value> =
            [("x".to_string(), Value::Int(42))].into_iter().collect();
        let _guard = templar.set_temporary_context(temp);
        assert_eq!(
            templar.template(&Value::trusted("{{ x }}")).unwrap(),
            Value::Int(42)
        );
    }
    assert_eq!(
        templar.template(&Value::trusted("{{ x }}")).unwrap(),
        Value::Int(1)
    );
}

#[test]
#[allow(deprecated)]
fn test_deprecated_shims_record_notices() {
    let templar = templar_with(&[("x", Value::Int(5))]);

    let out = templar
        .template_with_convert_bare(&Value::trusted("x"), true)
        .unwrap();
    assert_eq!(out, Value::Int(5));

    let out = templar
        .template_with_convert_data(&Value::trusted("{{ x }}"), false)
        .unwrap();
    assert_eq!(out, Value::Int(5));

    let notices = templar.engine().deprecations().drain();
    assert_eq!(notices.len(), 2);
}

#[test]
fn test_custom_lookup_registry() {
    #[derive(Debug)]
    struct Shout;

    impl LookupPlugin for Shout {
        fn name(&self) -> &'static str {
            "shout"
        }
        fn description(&self) -> &'static str {
            "Uppercase each term"
        }
        fn run(&self, terms: &[String]) -> LookupResult<Vec<minijinja::Value>> {
            Ok(terms
                .iter()
                .map(|t| minijinja::Value::from(t.to_uppercase()))
                .collect())
        }
    }

    let mut registry = LookupRegistry::new();
    registry.register(Shout);
    let engine = TemplateEngine::with_lookups(Arc::new(registry));
    let templar = Templar::with_engine(engine);

    let out = templar
        .template(&Value::trusted("{{ lookup('shout', 'hi') }}"))
        .unwrap();
    assert_eq!(out.as_str(), Some("HI"));

    // The built-ins were replaced, not extended.
    let err = templar
        .template(&Value::trusted("{{ lookup('env', 'HOME') }}"))
        .unwrap_err();
    assert!(matches!(err, TemplateError::PluginRuntime { .. }));
}

#[test]
#[allow(deprecated)]
fn test_disable_lookups_shim_records_notice() {
    let templar = templar_with(&[("x", Value::Int(1))]);
    let out = templar
        .template_with_disable_lookups(&Value::trusted("{{ x }}"), true)
        .unwrap();
    assert_eq!(out, Value::Int(1));
    assert_eq!(templar.engine().deprecations().drain().len(), 1);
}

#[test]
fn test_template_mode_stop_on_template_probe_is_internal() {
    // StopOnTemplate is only reachable through is_template; the public
    // template entry points never leak the probe signal on success paths.
    let templar = templar_with(&[("x", Value::Int(1))]);
    let out = templar
        .engine()
        .template(
            &Value::trusted("plain"),
            &TemplateOptions::default(),
            TemplateMode::StopOnTemplate,
        )
        .unwrap();
    assert_eq!(out, Value::trusted("plain"));
}
