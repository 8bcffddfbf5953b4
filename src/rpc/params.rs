/// Helpers for shaping positional params with optional trailing config objects

use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Appends `config` to `params` unless it serializes to an empty object.
///
/// Config structs mark every optional field with `skip_serializing_if`, so an
/// all-absent config disappears entirely instead of being sent as `{}`.
pub fn push_config<T: Serialize>(params: &mut Vec<Value>, config: &T) -> Result<()> {
    let value = serde_json::to_value(config)?;
    match &value {
        Value::Object(map) if map.is_empty() => {}
        Value::Null => {}
        _ => params.push(value),
    }
    Ok(())
}

/// Treats blank strings as absent
pub fn non_blank(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Serialize)]
    struct Sample {
        #[serde(skip_serializing_if = "Option::is_none")]
        commitment: Option<String>,
    }

    #[test]
    fn test_empty_config_is_not_pushed() {
        let mut params = vec![json!("key")];
        push_config(&mut params, &Sample { commitment: None }).unwrap();
        assert_eq!(params, vec![json!("key")]);

        push_config(&mut params, &Sample { commitment: Some("finalized".into()) }).unwrap();
        assert_eq!(params, vec![json!("key"), json!({"commitment": "finalized"})]);
    }

    #[test]
    fn test_non_blank() {
        assert_eq!(non_blank(Some("  ")), None);
        assert_eq!(non_blank(None), None);
        assert_eq!(non_blank(Some(" x ")), Some("x".to_string()));
    }
}
