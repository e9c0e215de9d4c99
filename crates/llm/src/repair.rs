//! Best-effort repair of almost-JSON model output.
//!
//! Steps run in a fixed order, each on the output of the previous one, and
//! repair stops at the first step that yields valid JSON.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

static FENCE_OPEN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)^```(?:json)?\s*\n?").expect("valid regex"));
static FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?m)\n?```\s*$").expect("valid regex"));
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",(\s*[}\]])").expect("valid regex"));
static ADJACENT_OBJECTS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\}\s*\{").expect("valid regex"));
static ADJACENT_ARRAYS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\]\s*\[").expect("valid regex"));
static ADJACENT_STRINGS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""\s*"([^"]*)"\s*:"#).expect("valid regex"));
static HTML_ATTRIBUTE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"\b(href|src|alt|title|class|id)="([^"]*)""#).expect("valid regex"));

type Step = fn(&str) -> String;

const STEPS: &[Step] = &[
    strip_code_fences,
    remove_trailing_commas,
    comma_between_structures,
    comma_between_strings,
    single_quote_html_attributes,
    single_quote_inner_quotes,
    comma_between_lines,
];

/// Parse `text` as JSON, repairing it if needed. `None` when every step
/// still leaves it invalid.
pub fn parse_structured(text: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str(text) {
        return Some(value);
    }
    let mut current = text.to_string();
    for step in STEPS {
        current = step(&current);
        if let Ok(value) = serde_json::from_str(&current) {
            return Some(value);
        }
    }
    None
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let opened = FENCE_OPEN.replace_all(trimmed, "");
    FENCE_CLOSE.replace_all(&opened, "").trim().to_string()
}

fn remove_trailing_commas(text: &str) -> String {
    TRAILING_COMMA.replace_all(text, "$1").into_owned()
}

fn comma_between_structures(text: &str) -> String {
    let objects = ADJACENT_OBJECTS.replace_all(text, "},{");
    ADJACENT_ARRAYS.replace_all(&objects, "],[").into_owned()
}

fn comma_between_strings(text: &str) -> String {
    ADJACENT_STRINGS.replace_all(text, r#"","${1}":"#).into_owned()
}

fn single_quote_html_attributes(text: &str) -> String {
    HTML_ATTRIBUTE.replace_all(text, "${1}='${2}'").into_owned()
}

/// `"key": "say "hi" now"` -> `"key": "say 'hi' now"`, one line at a time.
fn single_quote_inner_quotes(text: &str) -> String {
    text.split('\n')
        .map(|line| {
            if !line.contains("\": \"") || line.matches('"').count() <= 4 {
                return line.to_string();
            }
            let Some((key, value)) = line.split_once(": \"") else {
                return line.to_string();
            };
            match value.rfind('"') {
                Some(last) if last > 0 && value[..last].contains('"') => {
                    let inner = value[..last].replace('"', "'");
                    format!("{key}: \"{inner}\"{}", &value[last + 1..])
                }
                _ => line.to_string(),
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

fn comma_between_lines(text: &str) -> String {
    let lines: Vec<&str> = text.split('\n').collect();
    lines
        .iter()
        .enumerate()
        .map(|(i, line)| {
            let next_starts_with_quote = lines.get(i + 1).is_some_and(|next| next.trim_start().starts_with('"'));
            if line.trim_end().ends_with('"') && next_starts_with_quote {
                format!("{},", line.trim_end())
            } else {
                (*line).to_string()
            }
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn valid_json_is_untouched() {
        assert_eq!(parse_structured(r#"{"a":1}"#), Some(json!({"a": 1})));
    }

    #[test]
    fn code_fences_are_stripped() {
        let text = "```json\n{\"answer\": 42}\n```";
        assert_eq!(parse_structured(text), Some(json!({"answer": 42})));
    }

    #[test]
    fn trailing_commas_are_removed() {
        let text = r#"{"items": [1, 2, 3,], "done": true,}"#;
        assert_eq!(parse_structured(text), Some(json!({"items": [1, 2, 3], "done": true})));
    }

    #[test]
    fn adjacent_objects_get_a_comma() {
        let text = r#"[{"a": 1} {"a": 2}]"#;
        assert_eq!(parse_structured(text), Some(json!([{"a": 1}, {"a": 2}])));
    }

    #[test]
    fn html_attributes_switch_to_single_quotes() {
        let text = r#"{"html": "<a href="https://x.test">x</a>"}"#;
        assert_eq!(
            parse_structured(text),
            Some(json!({"html": "<a href='https://x.test'>x</a>"}))
        );
    }

    #[test]
    fn inner_quotes_become_single_quotes() {
        let text = "{\n  \"quote\": \"she said \"hello\" twice\"\n}";
        assert_eq!(parse_structured(text), Some(json!({"quote": "she said 'hello' twice"})));
    }

    #[test]
    fn missing_line_commas_are_added() {
        let text = "{\n  \"a\": \"x\"\n  \"b\": \"y\"\n}";
        assert_eq!(parse_structured(text), Some(json!({"a": "x", "b": "y"})));
    }

    #[test]
    fn hopeless_text_stays_invalid() {
        assert_eq!(parse_structured("I'm sorry, I can't produce JSON for that."), None);
    }
}
