//! Locates the JSON object inside free-form model output.

/// Returns the first balanced `{...}` span in `text`.
///
/// Braces inside string literals are ignored, honoring backslash escapes.
/// `None` when no opening brace exists or the object never closes.
pub fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    let end = start + offset + ch.len_utf8();
                    return Some(&text[start..end]);
                }
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_object_between_prose() {
        let json = r#"{"title":"T","steps":[{"title":"a","description":"b"}]}"#;
        let text = format!("{}\n{}\n{}", "x".repeat(200), json, "y".repeat(50));
        assert_eq!(extract_object(&text), Some(json));
    }

    #[test]
    fn handles_code_fences() {
        let text = "```json\n{\"a\": 1}\n```";
        assert_eq!(extract_object(text), Some("{\"a\": 1}"));
    }

    #[test]
    fn ignores_braces_inside_strings() {
        let text = r#"Sure! {"code": "fn main() { println!(\"}\"); }", "n": 2} trailing }"#;
        assert_eq!(
            extract_object(text),
            Some(r#"{"code": "fn main() { println!(\"}\"); }", "n": 2}"#)
        );
    }

    #[test]
    fn nested_objects_stay_together() {
        let text = r#"{"a": {"b": {"c": 1}}, "d": [ {"e": 2} ]} {"second": true}"#;
        assert_eq!(
            extract_object(text),
            Some(r#"{"a": {"b": {"c": 1}}, "d": [ {"e": 2} ]}"#)
        );
    }

    #[test]
    fn missing_or_unclosed_object() {
        assert_eq!(extract_object("no json here"), None);
        assert_eq!(extract_object(r#"{"steps": [ {"title": "a""#), None);
        assert_eq!(extract_object(""), None);
    }

    #[test]
    fn multibyte_text_around_object() {
        let text = "Voilà ✨ {\"titre\": \"été\"} ✓";
        assert_eq!(extract_object(text), Some("{\"titre\": \"été\"}"));
    }
}
