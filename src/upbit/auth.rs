//! JWT authentication envelope for private endpoints
//!
//! Upbit authenticates with a short-lived HS256 bearer token. Claims carry
//! the access key, a UUID nonce and a millisecond timestamp; when the
//! request has parameters, a SHA-512 hex digest of the url-encoded,
//! key-sorted query string is added as `query_hash`.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde_json::json;
use sha2::{Digest, Sha256, Sha512};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Percent-encode a single form component (RFC 3986 unreserved set)
fn percent_encode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for byte in s.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{:02X}", byte)),
        }
    }
    out
}

/// Url-encode parameters sorted by key, the canonical form the hash covers
pub fn canonical_query(params: &[(String, String)]) -> String {
    let mut sorted: Vec<&(String, String)> = params.iter().collect();
    sorted.sort();
    sorted
        .iter()
        .map(|(k, v)| format!("{}={}", percent_encode(k), percent_encode(v)))
        .collect::<Vec<_>>()
        .join("&")
}

/// SHA-512 hex digest of the canonical query string
pub fn query_hash(params: &[(String, String)]) -> String {
    let mut hasher = Sha512::new();
    hasher.update(canonical_query(params).as_bytes());
    hex::encode(hasher.finalize())
}

/// Build the bearer token for one request.
///
/// `params` must contain every query/body parameter the request carries;
/// pass an empty slice for parameterless endpoints.
pub fn build_jwt(access_key: &str, secret_key: &str, params: &[(String, String)]) -> String {
    let mut payload = json!({
        "access_key": access_key,
        "nonce": Uuid::new_v4().to_string(),
        "timestamp": Utc::now().timestamp_millis(),
    });

    if !params.is_empty() {
        payload["query_hash"] = json!(query_hash(params));
        payload["query_hash_alg"] = json!("SHA512");
    }

    let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"HS256","typ":"JWT"}"#);
    let body = URL_SAFE_NO_PAD.encode(payload.to_string());
    let signing_input = format!("{}.{}", header, body);

    let mut mac = HmacSha256::new_from_slice(secret_key.as_bytes())
        .expect("HMAC can take key of any size");
    mac.update(signing_input.as_bytes());
    let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());

    format!("{}.{}", signing_input, signature)
}
