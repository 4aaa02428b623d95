//! Gateway parameter signatures.
//!
//! The signature covers every non-empty string field of a payload except
//! `signature` itself, sorted by key, URL-encoded with spaces as `+`, joined
//! as `key=value&...`, with `&passphrase=<encoded>` appended when a passphrase
//! is configured. The SHA-256 digest of that string, hex-encoded, is the
//! signature.

use serde_json::Value;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Field carrying the signature inside a payload.
pub const SIGNATURE_FIELD: &str = "signature";

/// URL-encode a value the way gateway forms are encoded.
fn encode(value: &str) -> String {
    urlencoding::encode(value).replace("%20", "+")
}

/// Build the string that gets hashed.
#[must_use]
pub fn canonical_string<'a, I>(fields: I, passphrase: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut pairs: Vec<(&str, &str)> = fields
        .into_iter()
        .filter(|(k, v)| *k != SIGNATURE_FIELD && !v.trim().is_empty())
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(b.0));

    let mut message = pairs
        .iter()
        .map(|(k, v)| format!("{k}={}", encode(v.trim())))
        .collect::<Vec<_>>()
        .join("&");

    if let Some(passphrase) = passphrase.filter(|p| !p.is_empty()) {
        message.push_str("&passphrase=");
        message.push_str(&encode(passphrase.trim()));
    }

    message
}

/// Sign a set of string fields.
#[must_use]
pub fn sign<'a, I>(fields: I, passphrase: Option<&str>) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let message = canonical_string(fields, passphrase);
    hex::encode(Sha256::digest(message.as_bytes()))
}

/// Sign the string fields of a JSON object payload.
///
/// Non-string values are not part of the signature. A payload that is not an
/// object signs as if it were empty.
#[must_use]
pub fn sign_payload(payload: &Value, passphrase: Option<&str>) -> String {
    let fields = payload
        .as_object()
        .into_iter()
        .flatten()
        .filter_map(|(k, v)| v.as_str().map(|s| (k.as_str(), s)));
    sign(fields, passphrase)
}

/// Check a payload's signature in constant time.
#[must_use]
pub fn verify_payload(payload: &Value, signature: &str, passphrase: Option<&str>) -> bool {
    let computed = sign_payload(payload, passphrase);
    let presented = signature.trim().to_ascii_lowercase();
    computed.as_bytes().ct_eq(presented.as_bytes()).into()
}
