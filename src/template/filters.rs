use super::render_value;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, Utc};
use serde_json::{Number, Value};
use std::collections::HashMap;
use std::sync::Arc;

/// A named transform. `None` input means the placeholder path did not resolve.
pub type FilterFn =
    Arc<dyn Fn(Option<Value>, &[String]) -> Result<Option<Value>, String> + Send + Sync>;

pub const DEFAULT_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn builtin_filters() -> HashMap<String, FilterFn> {
    let mut table: HashMap<String, FilterFn> = HashMap::new();
    table.insert("default".to_string(), Arc::new(default_filter));
    table.insert("upper".to_string(), text_filter(|s| s.to_uppercase()));
    table.insert("lower".to_string(), text_filter(|s| s.to_lowercase()));
    table.insert("trim".to_string(), text_filter(|s| s.trim().to_string()));
    table.insert("capitalize".to_string(), text_filter(capitalize));
    table.insert("round".to_string(), present(round_filter));
    table.insert("floor".to_string(), present(|v, _| Ok(integral(numeric(&v)?.floor()))));
    table.insert("ceil".to_string(), present(|v, _| Ok(integral(numeric(&v)?.ceil()))));
    table.insert("json".to_string(), present(json_filter));
    table.insert("parse_json".to_string(), present(parse_json_filter));
    table.insert("date".to_string(), present(date_filter));
    table.insert(
        "base64".to_string(),
        text_filter(|s| BASE64.encode(s.as_bytes())),
    );
    table.insert("base64_decode".to_string(), present(base64_decode_filter));
    table.insert("slice".to_string(), present(slice_filter));
    table.insert("replace".to_string(), present(replace_filter));
    table.insert("pad_start".to_string(), present(|v, args| pad(v, args, true)));
    table.insert("pad_end".to_string(), present(|v, args| pad(v, args, false)));
    table.insert("length".to_string(), present(length_filter));
    table
}

fn present<F>(f: F) -> FilterFn
where
    F: Fn(Value, &[String]) -> Result<Value, String> + Send + Sync + 'static,
{
    Arc::new(move |value, args| match value {
        Some(value) => f(value, args).map(Some),
        None => Ok(None),
    })
}

fn text_filter<F>(f: F) -> FilterFn
where
    F: Fn(&str) -> String + Send + Sync + 'static,
{
    present(move |value, _| Ok(Value::String(f(&render_value(&value)))))
}

fn default_filter(value: Option<Value>, args: &[String]) -> Result<Option<Value>, String> {
    let fallback = args.first().cloned().unwrap_or_default();
    Ok(match value {
        None | Some(Value::Null) => Some(Value::String(fallback)),
        Some(Value::String(s)) if s.is_empty() => Some(Value::String(fallback)),
        other => other,
    })
}

fn capitalize(raw: &str) -> String {
    let mut chars = raw.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

fn numeric(value: &Value) -> Result<f64, String> {
    match value {
        Value::Number(n) => n.as_f64().ok_or_else(|| "number out of range".to_string()),
        Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| format!("`{s}` is not numeric")),
        other => Err(format!("{} is not numeric", type_name(other))),
    }
}

fn integral(value: f64) -> Value {
    if value.is_finite() && value.abs() < i64::MAX as f64 {
        Value::from(value as i64)
    } else {
        Number::from_f64(value).map_or(Value::Null, Value::Number)
    }
}

fn round_filter(value: Value, args: &[String]) -> Result<Value, String> {
    let number = numeric(&value)?;
    let digits = match args.first() {
        Some(raw) => raw
            .trim()
            .parse::<i32>()
            .map_err(|_| format!("round digits `{raw}` must be an integer"))?,
        None => 0,
    };
    if !(0..=15).contains(&digits) {
        return Err("round digits must be between 0 and 15".to_string());
    }
    if digits == 0 {
        return Ok(integral(number.round()));
    }
    let factor = 10_f64.powi(digits);
    let rounded = (number * factor).round() / factor;
    Number::from_f64(rounded)
        .map(Value::Number)
        .ok_or_else(|| "rounded value is not finite".to_string())
}

fn json_filter(value: Value, _args: &[String]) -> Result<Value, String> {
    serde_json::to_string(&value)
        .map(Value::String)
        .map_err(|err| err.to_string())
}

fn parse_json_filter(value: Value, _args: &[String]) -> Result<Value, String> {
    match value {
        Value::String(raw) => serde_json::from_str(&raw).map_err(|err| err.to_string()),
        other => Ok(other),
    }
}

fn date_filter(value: Value, args: &[String]) -> Result<Value, String> {
    let format = args
        .first()
        .map(String::as_str)
        .filter(|f| !f.is_empty())
        .unwrap_or(DEFAULT_DATE_FORMAT);
    if StrftimeItems::new(format).any(|item| matches!(item, Item::Error)) {
        return Err(format!("invalid date format `{format}`"));
    }
    let timestamp = match &value {
        Value::String(raw) if raw.trim().eq_ignore_ascii_case("now") => Utc::now(),
        Value::String(raw) => match raw.trim().parse::<i64>() {
            Ok(number) => from_epoch(number)?,
            Err(_) => DateTime::parse_from_rfc3339(raw.trim())
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|err| format!("`{raw}` is not a timestamp: {err}"))?,
        },
        Value::Number(n) => from_epoch(
            n.as_i64()
                .or_else(|| n.as_f64().map(|f| f as i64))
                .ok_or_else(|| "timestamp out of range".to_string())?,
        )?,
        other => return Err(format!("{} is not a timestamp", type_name(other))),
    };
    Ok(Value::String(timestamp.format(format).to_string()))
}

/// Values at or above 1e11 are epoch milliseconds, smaller ones epoch seconds.
fn from_epoch(number: i64) -> Result<DateTime<Utc>, String> {
    let millis = if number.abs() >= 100_000_000_000 {
        number
    } else {
        number.saturating_mul(1000)
    };
    DateTime::<Utc>::from_timestamp_millis(millis)
        .ok_or_else(|| format!("timestamp `{number}` out of range"))
}

fn base64_decode_filter(value: Value, _args: &[String]) -> Result<Value, String> {
    let encoded = render_value(&value);
    let bytes = BASE64
        .decode(encoded.trim().as_bytes())
        .map_err(|err| format!("invalid base64: {err}"))?;
    String::from_utf8(bytes)
        .map(Value::String)
        .map_err(|_| "decoded base64 is not utf-8".to_string())
}

fn slice_bounds(len: usize, args: &[String]) -> Result<(usize, usize), String> {
    let parse = |raw: &String| {
        raw.trim()
            .parse::<i64>()
            .map_err(|_| format!("slice bound `{raw}` must be an integer"))
    };
    let normalize = |index: i64| -> usize {
        if index < 0 {
            len.saturating_sub(index.unsigned_abs() as usize)
        } else {
            (index as usize).min(len)
        }
    };
    let start = args.first().map(parse).transpose()?.map_or(0, normalize);
    let end = args.get(1).map(parse).transpose()?.map_or(len, normalize);
    Ok((start, end.max(start)))
}

fn slice_filter(value: Value, args: &[String]) -> Result<Value, String> {
    match value {
        Value::Array(items) => {
            let (start, end) = slice_bounds(items.len(), args)?;
            Ok(Value::Array(items[start..end].to_vec()))
        }
        other => {
            let chars: Vec<char> = render_value(&other).chars().collect();
            let (start, end) = slice_bounds(chars.len(), args)?;
            Ok(Value::String(chars[start..end].iter().collect()))
        }
    }
}

fn replace_filter(value: Value, args: &[String]) -> Result<Value, String> {
    let (Some(from), Some(to)) = (args.first(), args.get(1)) else {
        return Err("replace needs two arguments: from and to".to_string());
    };
    let text = render_value(&value);
    if from.is_empty() {
        return Ok(Value::String(text));
    }
    Ok(Value::String(text.replace(from.as_str(), to)))
}

fn pad(value: Value, args: &[String], at_start: bool) -> Result<Value, String> {
    let width = match args.first() {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|_| format!("pad width `{raw}` must be a non-negative integer"))?,
        None => return Err("pad needs a width argument".to_string()),
    };
    let fill = args.get(1).and_then(|f| f.chars().next()).unwrap_or(' ');
    let text = render_value(&value);
    let missing = width.saturating_sub(text.chars().count());
    let padding: String = std::iter::repeat(fill).take(missing).collect();
    Ok(Value::String(if at_start {
        format!("{padding}{text}")
    } else {
        format!("{text}{padding}")
    }))
}

fn length_filter(value: Value, _args: &[String]) -> Result<Value, String> {
    match value {
        Value::String(s) => Ok(Value::from(s.chars().count())),
        Value::Array(items) => Ok(Value::from(items.len())),
        Value::Object(map) => Ok(Value::from(map.len())),
        other => Err(format!("{} has no length", type_name(&other))),
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn apply(name: &str, value: Option<Value>, args: &[&str]) -> Result<Option<Value>, String> {
        let table = builtin_filters();
        let filter = table.get(name).expect("builtin filter");
        let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        filter(value, &args)
    }

    #[test]
    fn default_covers_missing_null_and_empty() {
        assert_eq!(apply("default", None, &["x"]), Ok(Some(json!("x"))));
        assert_eq!(apply("default", Some(Value::Null), &["x"]), Ok(Some(json!("x"))));
        assert_eq!(apply("default", Some(json!("")), &["x"]), Ok(Some(json!("x"))));
        assert_eq!(apply("default", Some(json!(0)), &["x"]), Ok(Some(json!(0))));
    }

    #[test]
    fn numeric_filters() {
        assert_eq!(apply("round", Some(json!(3.14159)), &["2"]), Ok(Some(json!(3.14))));
        assert_eq!(apply("round", Some(json!("2.5")), &[]), Ok(Some(json!(3))));
        assert_eq!(apply("floor", Some(json!(2.9)), &[]), Ok(Some(json!(2))));
        assert_eq!(apply("ceil", Some(json!(2.1)), &[]), Ok(Some(json!(3))));
        assert!(apply("round", Some(json!("abc")), &[]).is_err());
    }

    #[test]
    fn string_filters() {
        assert_eq!(apply("upper", Some(json!("ab")), &[]), Ok(Some(json!("AB"))));
        assert_eq!(apply("capitalize", Some(json!("hello")), &[]), Ok(Some(json!("Hello"))));
        assert_eq!(apply("slice", Some(json!("abcdef")), &["1", "3"]), Ok(Some(json!("bc"))));
        assert_eq!(apply("slice", Some(json!("abcdef")), &["-2"]), Ok(Some(json!("ef"))));
        assert_eq!(apply("slice", Some(json!([1, 2, 3])), &["1"]), Ok(Some(json!([2, 3]))));
        assert_eq!(
            apply("replace", Some(json!("a.b.c")), &[".", "-"]),
            Ok(Some(json!("a-b-c")))
        );
        assert_eq!(apply("pad_start", Some(json!(7)), &["3", "0"]), Ok(Some(json!("007"))));
        assert_eq!(apply("pad_end", Some(json!("ab")), &["4"]), Ok(Some(json!("ab  "))));
        assert_eq!(apply("length", Some(json!("héllo")), &[]), Ok(Some(json!(5))));
    }

    #[test]
    fn encoding_filters() {
        assert_eq!(apply("base64", Some(json!("hi")), &[]), Ok(Some(json!("aGk="))));
        assert_eq!(apply("base64_decode", Some(json!("aGk=")), &[]), Ok(Some(json!("hi"))));
        assert_eq!(apply("json", Some(json!({"a": 1})), &[]), Ok(Some(json!("{\"a\":1}"))));
        assert_eq!(
            apply("parse_json", Some(json!("[1,2]")), &[]),
            Ok(Some(json!([1, 2])))
        );
    }

    #[test]
    fn date_filter_formats_seconds_and_millis() {
        assert_eq!(
            apply("date", Some(json!(0)), &["%Y-%m-%d"]),
            Ok(Some(json!("1970-01-01")))
        );
        assert_eq!(
            apply("date", Some(json!(1_700_000_000_000_i64)), &["%Y"]),
            Ok(Some(json!("2023")))
        );
        assert_eq!(
            apply("date", Some(json!("2024-02-29T10:00:00Z")), &["%d/%m"]),
            Ok(Some(json!("29/02")))
        );
        assert!(apply("date", Some(json!(0)), &["%Q"]).is_err());
    }

    #[test]
    fn non_default_filters_pass_unresolved_through() {
        assert_eq!(apply("upper", None, &[]), Ok(None));
        assert_eq!(apply("round", None, &["2"]), Ok(None));
    }
}
