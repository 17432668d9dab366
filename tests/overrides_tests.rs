//! Template-syntax overrides end to end: header parsing, custom delimiters,
//! and newline handling through the engine.

use pretty_assertions::assert_eq;
use templar::{
    OverridesPatch, Templar, TemplateError, TemplateOptions, TemplateOverrides, Value,
};

fn templar() -> Templar {
    let templar = Templar::new();
    templar.set_variable("x", Value::Int(1));
    templar
}

fn custom_delimiters() -> TemplateOverrides {
    let patch = OverridesPatch {
        variable_start_string: Some("<<".to_string()),
        variable_end_string: Some(">>".to_string()),
        ..Default::default()
    };
    TemplateOverrides::from_patch(&patch).unwrap()
}

#[test]
fn test_custom_delimiters_via_options() {
    let templar = templar();
    let options = TemplateOptions {
        overrides: custom_delimiters(),
        ..Default::default()
    };

    let out = templar
        .template_with_options(&Value::trusted("value << x >> end"), &options)
        .unwrap();
    assert_eq!(out.as_str(), Some("value 1 end"));

    // The all-template form still produces a native result.
    let out = templar
        .template_with_options(&Value::trusted("<< x >>"), &options)
        .unwrap();
    assert_eq!(out, Value::Int(1));

    // Default delimiters are not recognized under these overrides.
    let input = Value::trusted("{{ x }}");
    let out = templar.template_with_options(&input, &options).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_header_switches_delimiters() {
    let templar = templar();
    let out = templar
        .template(&Value::trusted(
            "#jinja2:variable_start_string:'<<',variable_end_string:'>>'\n<< x >>",
        ))
        .unwrap();
    assert_eq!(out, Value::Int(1));
}

#[test]
fn test_header_trim_blocks_off() {
    let templar = templar();
    // trim_blocks defaults on, eating the newline after a block tag.
    let trimmed = templar
        .template(&Value::trusted("{% if true %}\nx{% endif %}\n"))
        .unwrap();
    assert_eq!(trimmed.as_str(), Some("x\n"));

    let untrimmed = templar
        .template(&Value::trusted(
            "#jinja2:trim_blocks:False\n{% if true %}\nx{% endif %}",
        ))
        .unwrap();
    assert_eq!(untrimmed.as_str(), Some("\nx"));
}

#[test]
fn test_header_stripped_from_plain_body() {
    let templar = templar();
    let out = templar
        .template(&Value::trusted("#jinja2:trim_blocks:False\njust text"))
        .unwrap();
    assert_eq!(out.as_str(), Some("just text"));
}

#[test]
fn test_bad_header_is_fatal() {
    let templar = templar();
    for input in [
        "#jinja2:unknown_key:True\n{{ x }}",
        "#jinja2:trim_blocks:maybe\n{{ x }}",
        "#jinja2:trim_blocks:False{{ x }}",
    ] {
        let err = templar.template(&Value::trusted(input)).unwrap_err();
        assert!(
            matches!(err, TemplateError::OverrideParse { .. }),
            "expected override parse failure for {input:?}, got {err:?}"
        );
    }
}

#[test]
fn test_header_on_untrusted_string_is_inert() {
    let templar = templar();
    let input = Value::untrusted("#jinja2:bogus:True\n{{ x }}");
    let out = templar.template(&input).unwrap();
    assert_eq!(out, input);
}

#[test]
fn test_newline_sequence_override() {
    let templar = templar();
    let options = TemplateOptions {
        overrides: TemplateOverrides::from_patch(&OverridesPatch {
            newline_sequence: Some("\r\n".to_string()),
            ..Default::default()
        })
        .unwrap(),
        ..Default::default()
    };
    let out = templar
        .template_with_options(&Value::trusted("{{ x }}!\n"), &options)
        .unwrap();
    assert_eq!(out.as_str(), Some("1!\r\n"));
}

#[test]
fn test_is_template_respects_facade_overrides() {
    let templar = Templar::new().with_overrides(custom_delimiters());
    assert!(templar.is_template(&Value::trusted("<< x >>")));
    assert!(!templar.is_template(&Value::trusted("{{ x }}")));
}
