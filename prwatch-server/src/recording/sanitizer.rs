use serde_json::Value;
use std::collections::HashMap;

/// Headers that carry credentials or signatures and must be redacted.
pub const SENSITIVE_HEADERS: &[&str] = &[
    "authorization",
    "cookie",
    "set-cookie",
    "x-slack-signature",
];

/// JSON keys whose values are redacted wherever they appear.
const SENSITIVE_KEYS: &[&str] = &["token", "secret", "password", "challenge"];

pub struct Sanitizer;

impl Sanitizer {
    pub fn is_sensitive_header(header_name: &str) -> bool {
        let lower = header_name.to_lowercase();
        SENSITIVE_HEADERS.contains(&lower.as_str())
    }

    pub fn sanitize_headers(headers: &HashMap<String, String>) -> HashMap<String, String> {
        headers
            .iter()
            .map(|(key, value)| {
                let value = if Self::is_sensitive_header(key) {
                    "[REDACTED]".to_string()
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect()
    }

    pub fn sanitize_json(value: &Value) -> Value {
        match value {
            Value::Object(map) => Value::Object(
                map.iter()
                    .map(|(key, val)| {
                        let val = if SENSITIVE_KEYS.contains(&key.as_str()) {
                            Value::String("[REDACTED]".to_string())
                        } else {
                            Self::sanitize_json(val)
                        };
                        (key.clone(), val)
                    })
                    .collect(),
            ),
            Value::Array(arr) => Value::Array(arr.iter().map(Self::sanitize_json).collect()),
            _ => value.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sensitive_headers_are_redacted() {
        let mut headers = HashMap::new();
        headers.insert("Authorization".to_string(), "Bearer xoxb-1".to_string());
        headers.insert("X-Slack-Signature".to_string(), "v0=abc".to_string());
        headers.insert("Content-Type".to_string(), "application/json".to_string());

        let sanitized = Sanitizer::sanitize_headers(&headers);

        assert_eq!(sanitized["Authorization"], "[REDACTED]");
        assert_eq!(sanitized["X-Slack-Signature"], "[REDACTED]");
        assert_eq!(sanitized["Content-Type"], "application/json");
    }

    #[test]
    fn test_nested_secrets_are_redacted() {
        let value = json!({
            "token": "verification-token",
            "event": {"text": "hi", "secret": "s"},
            "items": [{"password": "p", "name": "n"}]
        });

        let sanitized = Sanitizer::sanitize_json(&value);

        assert_eq!(sanitized["token"], "[REDACTED]");
        assert_eq!(sanitized["event"]["text"], "hi");
        assert_eq!(sanitized["event"]["secret"], "[REDACTED]");
        assert_eq!(sanitized["items"][0]["password"], "[REDACTED]");
        assert_eq!(sanitized["items"][0]["name"], "n");
    }
}
