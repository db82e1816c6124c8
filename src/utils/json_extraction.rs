//! JSON extraction from free-form model responses.
//!
//! Responses may wrap the JSON in markdown fences or surround it with prose.
//! Extraction scans for the first `{` and returns the balanced object that
//! starts there, honoring string literals and escapes.
//!
//! # Example
//!
//! ```
//! use skill_forge::utils::json_extraction::extract_first_json_object;
//!
//! let response = "Verdict follows.\n```json\n{\"score\": 0.7, \"reasoning\": \"ok\"}\n```";
//! assert_eq!(
//!     extract_first_json_object(response),
//!     Some("{\"score\": 0.7, \"reasoning\": \"ok\"}")
//! );
//! ```

/// Finds the index of the `}` that closes the object opening at `s[0]`.
///
/// Returns `None` if the object is never closed.
pub fn find_matching_brace(s: &str) -> Option<usize> {
    let mut depth = 0;
    let mut in_string = false;
    let mut escape_next = false;

    for (i, c) in s.char_indices() {
        if escape_next {
            escape_next = false;
            continue;
        }

        match c {
            '\\' if in_string => {
                escape_next = true;
            }
            '"' => {
                in_string = !in_string;
            }
            '{' if !in_string => {
                depth += 1;
            }
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }

    None
}

/// Returns the first balanced JSON-object-shaped substring, if any.
///
/// Only the shape is checked here; callers parse the result.
pub fn extract_first_json_object(content: &str) -> Option<&str> {
    let start = content.find('{')?;
    let rest = &content[start..];
    let end = find_matching_brace(rest)?;
    Some(&rest[..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_matching_brace_nested() {
        let s = r#"{"a": {"b": 1}} trailing"#;
        assert_eq!(find_matching_brace(s), Some(14));
    }

    #[test]
    fn test_braces_inside_strings_are_ignored() {
        let s = r#"{"reasoning": "used } and { freely", "score": 1}"#;
        assert_eq!(extract_first_json_object(s), Some(s));
    }

    #[test]
    fn test_escaped_quotes() {
        let s = r#"prefix {"reasoning": "said \"}\"", "score": 0.5} suffix"#;
        let json = extract_first_json_object(s).unwrap();
        assert!(json.ends_with("0.5}"));
        let value: serde_json::Value = serde_json::from_str(json).unwrap();
        assert_eq!(value["score"], 0.5);
    }

    #[test]
    fn test_first_object_wins() {
        let s = r#"{"score": 0.2} then {"score": 0.9}"#;
        assert_eq!(extract_first_json_object(s), Some(r#"{"score": 0.2}"#));
    }

    #[test]
    fn test_no_object() {
        assert_eq!(extract_first_json_object("no json here"), None);
        assert_eq!(extract_first_json_object("{\"score\": 0.4"), None);
    }
}
