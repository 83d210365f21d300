/// Parses `key=value` pairs, rejecting duplicates and empty keys.
pub fn parse_key_value_pairs(
    pairs: &[String],
) -> Result<serde_json::Map<String, serde_json::Value>, String> {
    let mut out = serde_json::Map::new();
    for pair in pairs {
        let Some((key, value)) = pair.split_once('=') else {
            return Err(format!("expected key=value, got `{pair}`"));
        };
        let key = key.trim();
        if key.is_empty() {
            return Err(format!("expected key=value, got `{pair}`"));
        }
        if out.contains_key(key) {
            return Err(format!("duplicate key `{key}`"));
        }
        out.insert(
            key.to_string(),
            serde_json::Value::String(value.to_string()),
        );
    }
    Ok(out)
}
