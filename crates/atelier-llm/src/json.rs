use atelier_core::{AtelierError, AtelierResult};
use serde::de::DeserializeOwned;

/// Parse a model reply that should be JSON but may be wrapped in code fences
/// or prose.
///
/// First attempts a strict parse, then extracts the outermost balanced
/// `{...}` from the body and retries. Any remaining failure surfaces as
/// `AtelierError::Parse` so the caller can apply its role-specific default.
pub fn parse_loose<T: DeserializeOwned>(text: &str) -> AtelierResult<T> {
    if let Ok(value) = serde_json::from_str::<T>(text.trim()) {
        return Ok(value);
    }

    let candidate = extract_object(text)
        .ok_or_else(|| AtelierError::Parse("no JSON object found in reply".into()))?;
    serde_json::from_str::<T>(candidate)
        .map_err(|e| AtelierError::Parse(format!("malformed JSON object in reply: {e}")))
}

/// Locate the outermost balanced `{...}` span, respecting string literals and
/// escapes so braces inside strings do not confuse the scan.
fn extract_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &b) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match b {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}
