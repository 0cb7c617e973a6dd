//! HTTP `Authorization` / `WWW-Authenticate` carrier for SRD messages
//!
//! ```text
//! Authorization: SRD <base64(message)>
//! ```

use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::error::{Result, SrdError};

pub const SCHEME: &str = "SRD";

/// Header value carrying `message`
pub fn encode(message: &[u8]) -> String {
    format!("{SCHEME} {}", STANDARD.encode(message))
}

/// Extract the message from a header value. The scheme is matched
/// case-insensitively.
pub fn decode(value: &str) -> Result<Vec<u8>> {
    let (scheme, token) = value
        .trim()
        .split_once(' ')
        .ok_or_else(|| SrdError::Format("missing SRD token".to_string()))?;

    if !scheme.eq_ignore_ascii_case(SCHEME) {
        return Err(SrdError::Format(format!("unexpected scheme {scheme:?}")));
    }

    Ok(STANDARD.decode(token.trim())?)
}
