//! Instruction template rendering
//!
//! Templates use `{{name}}` placeholders substituted from the normalized
//! input variables. Unmatched placeholders render as the empty string.

use serde_json::{Map, Value};

/// Substitute `{{name}}` placeholders with variable values
pub fn render(template: &str, vars: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find("}}") {
            Some(close) => {
                let name = after[..close].trim();
                out.push_str(&render_value(vars.get(name)));
                rest = &after[close + 2..];
            }
            None => {
                // Unterminated placeholder, emit literally
                out.push_str(&rest[open..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_value(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!("test vars must be an object"),
        }
    }

    #[test]
    fn test_substitutes_variables() {
        let rendered = render(
            "Summarize in {{tone}} tone: {{text}}",
            &vars(json!({"tone": "neutral", "text": "the report"})),
        );
        assert_eq!(rendered, "Summarize in neutral tone: the report");
    }

    #[test]
    fn test_unmatched_placeholder_renders_empty() {
        let rendered = render("Hello {{name}}!", &vars(json!({})));
        assert_eq!(rendered, "Hello !");
    }

    #[test]
    fn test_whitespace_inside_placeholder() {
        let rendered = render("{{ text }}", &vars(json!({"text": "ok"})));
        assert_eq!(rendered, "ok");
    }

    #[test]
    fn test_non_string_values_serialized() {
        let rendered = render("count={{n}}", &vars(json!({"n": 3})));
        assert_eq!(rendered, "count=3");
    }

    #[test]
    fn test_unterminated_placeholder_left_literal() {
        let rendered = render("broken {{text", &vars(json!({"text": "x"})));
        assert_eq!(rendered, "broken {{text");
    }
}
