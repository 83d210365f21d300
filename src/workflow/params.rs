use super::definition::{ParamSpec, WorkflowDefinition};
use super::document::ParamType;
use super::ValidationError;
use serde_json::{Map, Value};

/// Applies defaults, coerces string inputs to the declared type and enforces validation rules.
/// Params the definition does not declare are passed through untouched.
pub fn resolve_params(
    definition: &WorkflowDefinition,
    supplied: &Map<String, Value>,
) -> Result<Map<String, Value>, ValidationError> {
    let mut resolved = supplied.clone();
    for spec in &definition.params {
        let value = match supplied.get(&spec.name) {
            Some(Value::Null) | None => match &spec.default {
                Some(default) => default.clone(),
                None if spec.required => {
                    return Err(ValidationError::Params(format!(
                        "missing required param `{}`",
                        spec.name
                    )))
                }
                None => continue,
            },
            Some(value) => coerce(spec, value).map_err(ValidationError::Params)?,
        };
        check_value(spec, &value).map_err(ValidationError::Params)?;
        resolved.insert(spec.name.clone(), value);
    }
    Ok(resolved)
}

fn coerce(spec: &ParamSpec, value: &Value) -> Result<Value, String> {
    let Value::String(raw) = value else {
        return Ok(value.clone());
    };
    let invalid = || {
        format!(
            "param `{}` expects {}, got `{raw}`",
            spec.name,
            spec.param_type.as_str()
        )
    };
    match spec.param_type {
        ParamType::String => Ok(value.clone()),
        ParamType::Integer => raw
            .trim()
            .parse::<i64>()
            .map(Value::from)
            .map_err(|_| invalid()),
        ParamType::Number => raw
            .trim()
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(Value::Number)
            .ok_or_else(invalid),
        ParamType::Boolean => match raw.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Value::Bool(true)),
            "false" | "0" | "no" => Ok(Value::Bool(false)),
            _ => Err(invalid()),
        },
        ParamType::Object | ParamType::Array => {
            serde_json::from_str(raw).map_err(|_| invalid())
        }
    }
}

pub(crate) fn check_value(spec: &ParamSpec, value: &Value) -> Result<(), String> {
    let type_ok = match spec.param_type {
        ParamType::String => value.is_string(),
        ParamType::Number => value.is_number(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Object => value.is_object(),
        ParamType::Array => value.is_array(),
    };
    if !type_ok {
        return Err(format!(
            "param `{}` must be of type {}",
            spec.name,
            spec.param_type.as_str()
        ));
    }

    let rules = &spec.validation;
    if let Some(number) = value.as_f64() {
        if rules.min.is_some_and(|min| number < min) {
            return Err(format!("param `{}` is below the minimum", spec.name));
        }
        if rules.max.is_some_and(|max| number > max) {
            return Err(format!("param `{}` is above the maximum", spec.name));
        }
    }
    let length = match value {
        Value::String(s) => Some(s.chars().count()),
        Value::Array(items) => Some(items.len()),
        _ => None,
    };
    if let Some(length) = length {
        if rules.min_length.is_some_and(|min| length < min) {
            return Err(format!("param `{}` is shorter than allowed", spec.name));
        }
        if rules.max_length.is_some_and(|max| length > max) {
            return Err(format!("param `{}` is longer than allowed", spec.name));
        }
    }
    if !rules.one_of.is_empty() && !rules.one_of.contains(value) {
        return Err(format!(
            "param `{}` must be one of {}",
            spec.name,
            Value::Array(rules.one_of.clone())
        ));
    }
    Ok(())
}
