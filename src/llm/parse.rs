use super::types::Summary;
use super::LlmError;

/// Remove a surrounding markdown code fence (```` ```json ... ``` ````) if present.
///
/// The language tag after the opening fence is dropped. Text without a leading
/// fence is returned trimmed but otherwise unchanged.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(after_open) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    // Skip the language tag line.
    let body = match after_open.find('\n') {
        Some(pos) => &after_open[pos + 1..],
        None => after_open.trim_start_matches(|c: char| c.is_ascii_alphanumeric()),
    };
    let body = match body.rfind("```") {
        Some(end) => &body[..end],
        None => body,
    };
    body.trim()
}

/// Parse model output into a [`Summary`].
///
/// Tries the raw text first, then the fence-stripped text, then the outermost
/// `{...}` span.
pub fn parse_summary(text: &str) -> Result<Summary, LlmError> {
    let raw = text.trim();
    if let Ok(summary) = serde_json::from_str::<Summary>(raw) {
        return Ok(summary);
    }

    let unfenced = strip_code_fence(raw);
    let first_err = match serde_json::from_str::<Summary>(unfenced) {
        Ok(summary) => return Ok(summary),
        Err(e) => e,
    };

    if let Some(object) = outermost_object(unfenced) {
        if let Ok(summary) = serde_json::from_str::<Summary>(object) {
            return Ok(summary);
        }
    }

    Err(LlmError::Malformed(format!(
        "{} (response starts with {:?})",
        first_err,
        raw.chars().take(80).collect::<String>()
    )))
}

fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

#[cfg(test)]
mod tests {
    use super::*;

    const BODY: &str =
        r#"{"tldr":["a"],"file_summaries":["f"],"impact":"none","key_snippet":"x = 1"}"#;

    #[test]
    fn test_strip_fence_with_language_tag() {
        let text = format!("```json\n{}\n```", BODY);
        assert_eq!(strip_code_fence(&text), BODY);
    }

    #[test]
    fn test_strip_fence_without_fence() {
        assert_eq!(strip_code_fence("  {\"a\":1}\n"), "{\"a\":1}");
    }

    #[test]
    fn test_strip_fence_single_line() {
        assert_eq!(strip_code_fence("```json{\"a\":1}```"), "{\"a\":1}");
    }

    #[test]
    fn test_parse_plain_json() {
        let summary = parse_summary(BODY).unwrap();
        assert_eq!(summary.tldr, vec!["a".to_string()]);
        assert_eq!(summary.key_snippet, "x = 1");
    }

    #[test]
    fn test_parse_fenced_json() {
        let text = format!("```json\n{}\n```", BODY);
        let summary = parse_summary(&text).unwrap();
        assert_eq!(summary.impact, "none");
    }

    #[test]
    fn test_parse_json_with_preamble() {
        let text = format!("Here is the report:\n{}\nThanks!", BODY);
        assert!(parse_summary(&text).is_ok());
    }

    #[test]
    fn test_parse_rejects_non_json() {
        assert!(matches!(
            parse_summary("I cannot help with that."),
            Err(LlmError::Malformed(_))
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_shape() {
        assert!(matches!(
            parse_summary(r#"{"summary":"nope"}"#),
            Err(LlmError::Malformed(_))
        ));
    }
}
