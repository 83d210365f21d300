use farmctl::template::{interpolate, interpolate_object, Interpolator, TemplateError};
use serde_json::{json, Map, Value};

fn context() -> Map<String, Value> {
    json!({
        "device": { "serial": "emulator-5554", "apps": ["maps", "mail"] },
        "user": { "name": "ada", "empty": "" },
        "pi": 3.14159,
        "retries": 3,
        "flag": false
    })
    .as_object()
    .cloned()
    .expect("object context")
}

#[test]
fn placeholders_resolve_nested_paths_and_indexes() {
    let ctx = context();
    assert_eq!(
        interpolate("adb -s {{device.serial}} open {{device.apps[1]}}", &ctx).expect("render"),
        "adb -s emulator-5554 open mail"
    );
    assert_eq!(
        interpolate("{{ user.name | upper }}!", &ctx).expect("render"),
        "ADA!"
    );
}

#[test]
fn default_filter_fills_missing_and_empty_values() {
    let ctx = context();
    assert_eq!(interpolate("{{missing|default:'x'}}", &ctx).expect("render"), "x");
    assert_eq!(interpolate("{{user.empty|default:anon}}", &ctx).expect("render"), "anon");
    assert_eq!(interpolate("{{flag|default:'x'}}", &ctx).expect("render"), "false");
}

#[test]
fn numeric_filters_chain_left_to_right() {
    let ctx = context();
    assert_eq!(interpolate("{{pi|round:2}}", &ctx).expect("render"), "3.14");
    assert_eq!(interpolate("{{pi|floor|pad_start:3:0}}", &ctx).expect("render"), "003");
}

#[test]
fn lenient_mode_keeps_unresolved_placeholders_verbatim() {
    let ctx = context();
    assert_eq!(
        interpolate("hello {{nobody.here}} and {{user.name}}", &ctx).expect("render"),
        "hello {{nobody.here}} and ada"
    );
    let mut warnings = Vec::new();
    let rendered = Interpolator::new()
        .interpolate_with_warnings("{{user.name|shout}}", &ctx, &mut warnings)
        .expect("render");
    assert_eq!(rendered, "ada");
    assert_eq!(warnings.len(), 1);
    assert!(warnings[0].contains("shout"));
}

#[test]
fn strict_mode_rejects_unresolved_and_unknown_filters() {
    let ctx = context();
    let strict = Interpolator::new().strict(true);
    assert_eq!(
        strict.interpolate("{{nobody}}", &ctx),
        Err(TemplateError::Unresolved {
            expr: "nobody".to_string()
        })
    );
    assert_eq!(
        strict.interpolate("{{user.name|shout}}", &ctx),
        Err(TemplateError::UnknownFilter {
            name: "shout".to_string()
        })
    );
    assert_eq!(strict.interpolate("{{user.name", &ctx), Err(TemplateError::Unclosed));
}

#[test]
fn custom_filters_shadow_builtins() {
    let ctx = context();
    let mut interpolator = Interpolator::new();
    interpolator.register_filter("upper", |value, _args| {
        Ok(value.map(|v| Value::String(format!("<{}>", v.as_str().unwrap_or_default()))))
    });
    interpolator.register_filter("times", |value, args| {
        let factor: i64 = args
            .first()
            .and_then(|a| a.parse().ok())
            .ok_or_else(|| "times needs an integer".to_string())?;
        Ok(value.and_then(|v| v.as_i64()).map(|n| Value::from(n * factor)))
    });
    assert_eq!(interpolator.interpolate("{{user.name|upper}}", &ctx).expect("render"), "<ada>");
    assert_eq!(interpolator.interpolate("{{retries|times:4}}", &ctx).expect("render"), "12");
}

#[test]
fn object_interpolation_preserves_types_of_sole_placeholders() {
    let ctx = context();
    let rendered = interpolate_object(
        &json!({
            "count": "{{retries}}",
            "label": "try {{retries}}",
            "apps": "{{device.apps}}",
            "nested": [{ "{{user.name}}": "{{flag}}" }]
        }),
        &ctx,
    )
    .expect("render");
    assert_eq!(
        rendered,
        json!({
            "count": 3,
            "label": "try 3",
            "apps": ["maps", "mail"],
            "nested": [{ "ada": false }]
        })
    );
}
