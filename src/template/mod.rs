//! `{{path|filter:arg}}` placeholder substitution over a JSON context.

pub mod condition;
pub mod filters;
pub mod path;

pub use condition::{evaluate_condition, truthy, CompareOp, Condition, ConditionError, Expr};
pub use filters::{builtin_filters, FilterFn};
pub use path::resolve_path;

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TemplateError {
    #[error("unclosed placeholder in template")]
    Unclosed,
    #[error("empty placeholder in template")]
    EmptyPlaceholder,
    #[error("placeholder `{expr}` did not resolve")]
    Unresolved { expr: String },
    #[error("unknown filter `{name}`")]
    UnknownFilter { name: String },
    #[error("filter `{name}` failed: {reason}")]
    Filter { name: String, reason: String },
}

/// Stateless renderer holding the filter table. Clones share filter closures.
#[derive(Clone)]
pub struct Interpolator {
    filters: HashMap<String, FilterFn>,
    strict: bool,
}

impl std::fmt::Debug for Interpolator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.filters.keys().collect();
        names.sort();
        f.debug_struct("Interpolator")
            .field("filters", &names)
            .field("strict", &self.strict)
            .finish()
    }
}

impl Default for Interpolator {
    fn default() -> Self {
        Self::new()
    }
}

impl Interpolator {
    pub fn new() -> Self {
        Self {
            filters: builtin_filters(),
            strict: false,
        }
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn is_strict(&self) -> bool {
        self.strict
    }

    /// Registers or overrides a filter. Custom filters shadow built-ins of the same name.
    pub fn register_filter<F>(&mut self, name: &str, filter: F)
    where
        F: Fn(Option<Value>, &[String]) -> Result<Option<Value>, String> + Send + Sync + 'static,
    {
        self.filters.insert(name.to_string(), Arc::new(filter));
    }

    pub fn has_filter(&self, name: &str) -> bool {
        self.filters.contains_key(name)
    }

    pub fn interpolate(&self, template: &str, context: &Map<String, Value>) -> Result<String, TemplateError> {
        self.interpolate_with_warnings(template, context, &mut Vec::new())
    }

    pub fn interpolate_with_warnings(
        &self,
        template: &str,
        context: &Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<String, TemplateError> {
        let mut rendered = String::with_capacity(template.len());
        let mut cursor = template;

        while let Some(start) = cursor.find("{{") {
            rendered.push_str(&cursor[..start]);
            let after_open = &cursor[start + 2..];
            let Some(close_offset) = after_open.find("}}") else {
                if self.strict {
                    return Err(TemplateError::Unclosed);
                }
                warnings.push("unclosed placeholder left as text".to_string());
                rendered.push_str(&cursor[start..]);
                return Ok(rendered);
            };
            let raw = &cursor[start..start + 2 + close_offset + 2];
            let expr = after_open[..close_offset].trim();
            cursor = &after_open[close_offset + 2..];

            if expr.is_empty() {
                if self.strict {
                    return Err(TemplateError::EmptyPlaceholder);
                }
                rendered.push_str(raw);
                continue;
            }
            match self.evaluate(expr, context, warnings)? {
                Some(value) => rendered.push_str(&render_value(&value)),
                None if self.strict => {
                    return Err(TemplateError::Unresolved {
                        expr: expr.to_string(),
                    })
                }
                None => rendered.push_str(raw),
            }
        }

        rendered.push_str(cursor);
        Ok(rendered)
    }

    /// Recursively interpolates string values and object keys. A string consisting of exactly
    /// one placeholder yields the resolved value with its JSON type preserved.
    pub fn interpolate_value(&self, value: &Value, context: &Map<String, Value>) -> Result<Value, TemplateError> {
        self.interpolate_value_with_warnings(value, context, &mut Vec::new())
    }

    pub fn interpolate_value_with_warnings(
        &self,
        value: &Value,
        context: &Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<Value, TemplateError> {
        match value {
            Value::String(text) => {
                if let Some(expr) = sole_placeholder(text) {
                    if let Some(resolved) = self.evaluate(expr, context, warnings)? {
                        return Ok(resolved);
                    }
                }
                self.interpolate_with_warnings(text, context, warnings)
                    .map(Value::String)
            }
            Value::Array(items) => items
                .iter()
                .map(|item| self.interpolate_value_with_warnings(item, context, warnings))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, item) in map {
                    let key = self.interpolate_with_warnings(key, context, warnings)?;
                    let item = self.interpolate_value_with_warnings(item, context, warnings)?;
                    out.insert(key, item);
                }
                Ok(Value::Object(out))
            }
            other => Ok(other.clone()),
        }
    }

    /// Resolves one placeholder body (`path|filter:arg|...`). `Ok(None)` means unresolved.
    pub fn evaluate(
        &self,
        expr: &str,
        context: &Map<String, Value>,
        warnings: &mut Vec<String>,
    ) -> Result<Option<Value>, TemplateError> {
        let mut parts = split_unquoted(expr, '|').into_iter();
        let path = parts.next().unwrap_or_default();
        let mut value = resolve_path(context, path.trim()).cloned();

        for filter_src in parts {
            let pieces = split_unquoted(&filter_src, ':');
            let name = pieces.first().map(|n| n.trim()).unwrap_or_default();
            let args: Vec<String> = pieces.iter().skip(1).map(|a| unquote(a)).collect();
            let Some(filter) = self.filters.get(name) else {
                if self.strict {
                    return Err(TemplateError::UnknownFilter {
                        name: name.to_string(),
                    });
                }
                warnings.push(format!("unknown filter `{name}` ignored in `{expr}`"));
                continue;
            };
            match filter(value.clone(), &args) {
                Ok(next) => value = next,
                Err(reason) if self.strict => {
                    return Err(TemplateError::Filter {
                        name: name.to_string(),
                        reason,
                    })
                }
                Err(reason) => warnings.push(format!("filter `{name}` skipped: {reason}")),
            }
        }
        Ok(value)
    }
}

/// Renders a resolved value as placeholder text.
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}

/// Interpolates with the built-in filters in non-strict mode.
pub fn interpolate(template: &str, context: &Map<String, Value>) -> Result<String, TemplateError> {
    Interpolator::new().interpolate(template, context)
}

pub fn interpolate_object(value: &Value, context: &Map<String, Value>) -> Result<Value, TemplateError> {
    Interpolator::new().interpolate_value(value, context)
}

fn sole_placeholder(text: &str) -> Option<&str> {
    let trimmed = text.trim();
    let inner = trimmed.strip_prefix("{{")?.strip_suffix("}}")?;
    if inner.contains("{{") || inner.contains("}}") || inner.trim().is_empty() {
        return None;
    }
    Some(inner.trim())
}

fn split_unquoted(raw: &str, separator: char) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;
    for ch in raw.chars() {
        match quote {
            Some(q) if ch == q => {
                quote = None;
                current.push(ch);
            }
            Some(_) => current.push(ch),
            None if ch == '\'' || ch == '"' => {
                quote = Some(ch);
                current.push(ch);
            }
            None if ch == separator => parts.push(std::mem::take(&mut current)),
            None => current.push(ch),
        }
    }
    parts.push(current);
    parts
}

fn unquote(raw: &str) -> String {
    let trimmed = raw.trim();
    for quote in ['\'', '"'] {
        if trimmed.len() >= 2 && trimmed.starts_with(quote) && trimmed.ends_with(quote) {
            return trimmed[1..trimmed.len() - 1].to_string();
        }
    }
    trimmed.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn quoted_arguments_keep_separators() {
        let context = ctx(json!({"ts": 0}));
        let out = interpolate("{{ts|date:'%H:%M'}}", &context).expect("render");
        assert_eq!(out, "00:00");
        assert_eq!(
            split_unquoted("a|replace:'|':'-'", '|'),
            vec!["a".to_string(), "replace:'|':'-'".to_string()]
        );
    }

    #[test]
    fn sole_placeholder_preserves_type() {
        let context = ctx(json!({"n": 3, "items": [1, 2]}));
        let out = interpolate_object(&json!({"count": "{{n}}", "list": "{{ items }}"}), &context)
            .expect("render");
        assert_eq!(out, json!({"count": 3, "list": [1, 2]}));
    }

    #[test]
    fn strict_mode_reports_each_failure_kind() {
        let strict = Interpolator::new().strict(true);
        let context = ctx(json!({"a": "x"}));
        assert_eq!(
            strict.interpolate("{{missing}}", &context),
            Err(TemplateError::Unresolved {
                expr: "missing".to_string()
            })
        );
        assert_eq!(
            strict.interpolate("{{a|nope}}", &context),
            Err(TemplateError::UnknownFilter {
                name: "nope".to_string()
            })
        );
        assert_eq!(strict.interpolate("{{a", &context), Err(TemplateError::Unclosed));
        assert!(matches!(
            strict.interpolate("{{a|round}}", &context),
            Err(TemplateError::Filter { .. })
        ));
    }
}
