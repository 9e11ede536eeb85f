//! Permissive parsing of JSON embedded in LLM output.
//!
//! Models are prompted for strict JSON but routinely wrap it in fenced
//! blocks or surrounding prose. The extractor scans for the first balanced
//! `{...}` object, preferring a ```json fence when one is present.

use serde::de::DeserializeOwned;

/// Extract the first balanced JSON object from free-form text.
///
/// Returns the raw object slice, or `None` when no balanced object exists.
pub fn extract_json_object(text: &str) -> Option<&str> {
    // Prefer a fenced block when present
    if let Some(fenced) = extract_fenced(text) {
        if let Some(obj) = balanced_object(fenced) {
            return Some(obj);
        }
    }
    balanced_object(text)
}

/// Extract and deserialize the first JSON object found in `text`.
pub fn parse_lenient<T: DeserializeOwned>(text: &str) -> Option<T> {
    let raw = extract_json_object(text)?;
    serde_json::from_str(raw).ok()
}

fn extract_fenced(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag up to the first newline
    let body_start = after_fence.find('\n').map(|i| i + 1).unwrap_or(0);
    let body = &after_fence[body_start..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// Find the first balanced `{...}` span, respecting string literals.
fn balanced_object(text: &str) -> Option<&str> {
    let bytes = text.as_bytes();
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(start) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=i]);
                }
            }
            _ => {}
        }
    }
    None
}
