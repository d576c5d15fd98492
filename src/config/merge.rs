//! Field-by-field merging of configuration tiers.
//!
//! Tiers are parsed into `serde_json::Value` and folded together so a higher tier
//! only needs to mention the keys it changes.

use serde_json::Value;

/// Merge `overlay` onto `base`.
///
/// Objects merge key by key. Any other overlay value replaces the base value,
/// except `null`, which leaves the base untouched.
///
/// ```
/// use serde_json::json;
/// use taskboard::config::deep_merge;
///
/// let defaults = json!({"server": {"host": "127.0.0.1", "port": 8080}});
/// let project = json!({"server": {"port": 9000}});
/// assert_eq!(
///     deep_merge(defaults, project),
///     json!({"server": {"host": "127.0.0.1", "port": 9000}})
/// );
/// ```
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_value) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_value) => deep_merge(base_value, overlay_value),
                    None => overlay_value,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        // An empty YAML key parses as null
        (base, Value::Null) => base,
        (_, overlay) => overlay,
    }
}

/// Merge tiers in order; later tiers win.
pub fn deep_merge_all(values: impl IntoIterator<Item = Value>) -> Value {
    values.into_iter().fold(Value::Null, deep_merge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sections_merge_independently() {
        let defaults = json!({
            "server": {"host": "127.0.0.1", "port": 8080},
            "tasks": {"page_size": 10}
        });
        let user = json!({"tasks": {"page_size": 25}});
        assert_eq!(
            deep_merge(defaults, user),
            json!({
                "server": {"host": "127.0.0.1", "port": 8080},
                "tasks": {"page_size": 25}
            })
        );
    }

    #[test]
    fn test_empty_key_keeps_lower_tier() {
        let base = json!({"google": {"client_id": "abc", "timeout": 10}});
        let overlay = json!({"google": {"client_id": null}});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"google": {"client_id": "abc", "timeout": 10}})
        );
    }

    #[test]
    fn test_scalar_replaces_section() {
        let base = json!({"auth": {"cookie_secure": false}});
        let overlay = json!({"auth": "broken"});
        assert_eq!(deep_merge(base, overlay), json!({"auth": "broken"}));
    }

    #[test]
    fn test_merge_all_later_tiers_win() {
        let tiers = vec![
            json!({"server": {"port": 8080}}),
            json!({"server": {"port": 9000, "host": "0.0.0.0"}}),
            json!({"server": {"port": 9100}}),
        ];
        assert_eq!(
            deep_merge_all(tiers),
            json!({"server": {"port": 9100, "host": "0.0.0.0"}})
        );
    }
}
