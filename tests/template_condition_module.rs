use farmctl::template::{evaluate_condition, truthy, Condition};
use serde_json::{json, Map, Value};

fn context() -> Map<String, Value> {
    json!({
        "battery": 42,
        "level": "17",
        "os": "android",
        "charging": true,
        "steps": { "boot": { "status": "succeeded" } },
        "tags": [],
        "loop_index": 0
    })
    .as_object()
    .cloned()
    .expect("object context")
}

fn eval(src: &str) -> bool {
    Condition::parse(src).expect("condition").evaluate(&context())
}

#[test]
fn comparisons_cover_numbers_strings_and_booleans() {
    assert!(eval("battery > 20"));
    assert!(eval("battery <= 42"));
    assert!(eval("level < 20"));
    assert!(eval("os == 'android'"));
    assert!(eval("os != \"ios\""));
    assert!(eval("charging == true"));
    assert!(eval("steps.boot.status == 'succeeded'"));
}

#[test]
fn boolean_operators_and_grouping() {
    assert!(eval("battery > 50 || charging"));
    assert!(!eval("battery > 50 && charging"));
    assert!(eval("!(battery > 50) && os == 'android'"));
    assert!(eval("(battery > 50 || level < 20) && charging"));
}

#[test]
fn bare_variables_use_truthiness() {
    assert!(eval("charging"));
    assert!(eval("tags"));
    assert!(!eval("loop_index"));
    assert!(!eval("unknown.var"));
    assert!(truthy(&json!("no")));
    assert!(!truthy(&json!("")));
    assert!(!truthy(&Value::Null));
    assert!(truthy(&json!({"a": 1})));
}

#[test]
fn malformed_conditions_are_rejected_at_parse_time() {
    for bad in ["", "battery >", "os == 'android", "(charging", "battery >> 2", "a && || b"] {
        assert!(Condition::parse(bad).is_err(), "`{bad}` should not parse");
    }
}

#[test]
fn free_function_reports_parse_errors() {
    let ctx = context();
    assert_eq!(evaluate_condition("battery == 42", &ctx), Ok(true));
    assert!(evaluate_condition("battery ==", &ctx).is_err());
}
