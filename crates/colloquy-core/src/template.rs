//! Prompt template interpolation
//!
//! Templates reference slots as `{name}`. Placeholders for missing
//! slots are left literal - a degraded render, not an error.

use serde_json::Value;
use std::collections::HashMap;

/// Render a slot value for inclusion in user-facing text
pub fn render_value(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        other => other.to_string(),
    }
}

/// Interpolate `{slot}` placeholders from the given values
pub fn interpolate(template: &str, slots: &HashMap<String, Value>) -> String {
    let mut rendered = template.to_string();
    for (name, value) in slots {
        let placeholder = format!("{{{name}}}");
        if rendered.contains(&placeholder) {
            rendered = rendered.replace(&placeholder, &render_value(value));
        }
    }
    rendered
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_interpolates_known_slots() {
        let slots = HashMap::from([
            ("origin".to_string(), json!("Madrid")),
            ("count".to_string(), json!(2)),
        ]);
        assert_eq!(
            interpolate("{count} tickets from {origin}", &slots),
            "2 tickets from Madrid"
        );
    }

    #[test]
    fn test_missing_slots_stay_literal() {
        let slots = HashMap::from([("origin".to_string(), json!("Madrid"))]);
        assert_eq!(
            interpolate("From {origin} on {date}", &slots),
            "From Madrid on {date}"
        );
    }
}
