use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

/// Splits `a.b[2].c` into segments. Numeric dotted segments (`items.0`) stay keys and
/// are resolved against arrays at lookup time.
pub fn parse_path(raw: &str) -> Result<Vec<PathSegment>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err("path must be non-empty".to_string());
    }
    let mut segments = Vec::new();
    for part in raw.split('.') {
        if part.is_empty() {
            return Err(format!("path `{raw}` has an empty segment"));
        }
        let (name, mut rest) = match part.find('[') {
            Some(pos) => (&part[..pos], &part[pos..]),
            None => (part, ""),
        };
        if !name.is_empty() {
            if !name
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '_' || ch == '-')
            {
                return Err(format!("path `{raw}` has invalid segment `{name}`"));
            }
            segments.push(PathSegment::Key(name.to_string()));
        } else if segments.is_empty() && rest.is_empty() {
            return Err(format!("path `{raw}` has an empty segment"));
        }
        while !rest.is_empty() {
            let Some(close) = rest.find(']') else {
                return Err(format!("path `{raw}` has an unclosed `[`"));
            };
            if !rest.starts_with('[') {
                return Err(format!("path `{raw}` has unexpected text `{rest}`"));
            }
            let index = rest[1..close]
                .trim()
                .parse::<usize>()
                .map_err(|_| format!("path `{raw}` has a non-numeric index"))?;
            segments.push(PathSegment::Index(index));
            rest = &rest[close + 1..];
        }
    }
    Ok(segments)
}

pub fn resolve_segments<'a>(
    root: &'a Map<String, Value>,
    segments: &[PathSegment],
) -> Option<&'a Value> {
    let (first, rest) = segments.split_first()?;
    let mut current = match first {
        PathSegment::Key(key) => root.get(key)?,
        PathSegment::Index(_) => return None,
    };
    for segment in rest {
        current = match (segment, current) {
            (PathSegment::Key(key), Value::Object(map)) => map.get(key)?,
            (PathSegment::Key(key), Value::Array(items)) => items.get(key.parse::<usize>().ok()?)?,
            (PathSegment::Index(index), Value::Array(items)) => items.get(*index)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Resolves a dotted/indexed path against the context. Malformed paths resolve to `None`.
pub fn resolve_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let segments = parse_path(path).ok()?;
    resolve_segments(root, &segments)
}
