//! Best-effort recovery of a JSON object from model output.
//!
//! Model output arrives as prose, as a fenced ```json block, or as raw JSON
//! with commentary around it. While streaming, the object is usually
//! truncated. Every function here fails soft: `None` means "no JSON yet" and
//! callers simply retry on the next delta.

use serde_json::Value;

const FENCE: &str = "```";

/// A JSON object recovered from text, with the prose around it.
#[derive(Debug, Clone, PartialEq)]
pub struct Extracted<'a> {
    /// The parsed object.
    pub value: Value,
    /// Text before the opening brace (empty when the whole input was the object).
    pub leading: &'a str,
    /// Text after the matching closing brace.
    pub trailing: &'a str,
}

/// Removes a surrounding markdown code fence and trims the result.
///
/// The opening line (fence plus optional language tag) is dropped; the last
/// line is dropped only when it is a bare closing fence, so a fence that has
/// not been closed yet still yields its partial body.
pub fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if !trimmed.starts_with(FENCE) {
        return trimmed;
    }
    let Some(newline) = trimmed.find('\n') else {
        return "";
    };
    let body = trimmed[newline + 1..].trim_end();
    let body = match body.rfind('\n') {
        Some(idx) if body[idx + 1..].trim() == FENCE => &body[..idx],
        None if body.trim() == FENCE => "",
        _ => body,
    };
    body.trim()
}

/// Extracts the embedded JSON object from `text`, if one is complete.
pub fn extract_json(text: &str) -> Option<Value> {
    extract(text).map(|found| found.value)
}

/// Extracts the embedded JSON object along with its leading and trailing prose.
pub fn extract(text: &str) -> Option<Extracted<'_>> {
    let unfenced = strip_code_fence(text);
    if unfenced.starts_with('{')
        && let Ok(value @ Value::Object(_)) = serde_json::from_str::<Value>(unfenced)
    {
        return Some(Extracted {
            value,
            leading: "",
            trailing: "",
        });
    }

    let start = text.find('{')?;
    let end = matching_brace(text, start)?;
    let value = match serde_json::from_str::<Value>(&text[start..=end]) {
        Ok(value @ Value::Object(_)) => value,
        _ => return None,
    };
    Some(Extracted {
        value,
        leading: text[..start].trim(),
        trailing: text[end + 1..].trim(),
    })
}

/// Returns the byte index of the `}` closing the `{` at `start`.
///
/// Braces inside JSON string literals are skipped, so `{"a":"}"}` balances.
fn matching_brace(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0_usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, byte) in text.as_bytes()[start..].iter().enumerate() {
        if in_string {
            match byte {
                _ if escaped => escaped = false,
                b'\\' => escaped = true,
                b'"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match byte {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}
