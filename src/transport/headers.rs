//! Retry-context header synthesis.
//!
//! Attempts past the first carry a JSON header telling the collector which
//! retry this is and which status code caused it, so the server can
//! correlate duplicates.

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use std::collections::HashMap;

#[derive(Serialize)]
struct RetryContext {
    attempt: u32,
    #[serde(rename = "errorCode", skip_serializing_if = "Option::is_none")]
    error_code: Option<u16>,
}

/// Convert a caller header map into a `HeaderMap`, skipping entries that
/// are not valid header names or values.
pub fn to_header_map(map: &HashMap<String, String>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    for (k, v) in map {
        if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(k.as_bytes()), HeaderValue::from_str(v)) {
            headers.insert(name, value);
        }
    }
    headers
}

/// Build the headers for one outgoing attempt.
///
/// `attempt` is the 0-based attempt index. With no configured header name,
/// or on the first attempt, the caller headers pass through untouched.
/// Otherwise a `{"attempt":<n>,"errorCode":<m>}` JSON string is inserted
/// under `header_name`; `errorCode` is omitted when absent.
pub fn build_send_headers(
    caller_headers: Option<&HashMap<String, String>>,
    header_name: Option<&str>,
    attempt: u32,
    error_code: Option<u16>,
) -> HeaderMap {
    let mut headers = caller_headers.map(to_header_map).unwrap_or_default();

    let Some(name) = header_name else {
        return headers;
    };
    if attempt < 1 {
        return headers;
    }

    let context = RetryContext { attempt, error_code };
    let value = serde_json::to_string(&context).unwrap_or_default();
    if let (Ok(name), Ok(value)) = (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
        headers.insert(name, value);
    }
    headers
}
