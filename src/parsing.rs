use serde::de::DeserializeOwned;

use crate::errors::ParseError;

/// Cleans a free-text completion. Only an empty body is an error.
pub fn parse_content(raw: &str) -> Result<String, ParseError> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    Ok(text.to_string())
}

/// Pulls the outermost JSON object out of a completion and deserializes it.
pub fn parse_json<T: DeserializeOwned>(raw: &str) -> Result<T, ParseError> {
    let text = strip_fences(raw);
    if text.is_empty() {
        return Err(ParseError::Empty);
    }
    let object = extract_json_object(text).ok_or(ParseError::MissingJson)?;
    Ok(serde_json::from_str(object)?)
}

/// Removes a surrounding markdown code fence, with or without a language tag.
fn strip_fences(text: &str) -> &str {
    let text = text.trim();
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    // Drop the info string ("json", "markdown", ...) on the opening line.
    let body = match rest.find('\n') {
        Some(newline) if !rest[..newline].contains(' ') => &rest[newline + 1..],
        _ => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}
