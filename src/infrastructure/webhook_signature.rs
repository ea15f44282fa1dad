use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::domain::errors::SignatureError;

type HmacSha256 = Hmac<Sha256>;

/// GitHub `X-Hub-Signature-256`: `sha256=<hex>` over the raw body.
pub fn verify_github_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    let digest_hex = header
        .trim()
        .strip_prefix("sha256=")
        .ok_or_else(|| SignatureError::Malformed("expected sha256=<hex>".to_string()))?;
    verify_hex_digest(payload, digest_hex, secret)
}

/// Asana `X-Hook-Signature`: plain hex HMAC-SHA256 over the raw body.
pub fn verify_asana_signature(
    payload: &[u8],
    header: Option<&str>,
    secret: &str,
) -> Result<(), SignatureError> {
    let header = header.ok_or(SignatureError::Missing)?;
    verify_hex_digest(payload, header.trim(), secret)
}

fn verify_hex_digest(payload: &[u8], digest_hex: &str, secret: &str) -> Result<(), SignatureError> {
    if digest_hex.is_empty() {
        return Err(SignatureError::Malformed("empty digest".to_string()));
    }
    let expected =
        hex::decode(digest_hex).map_err(|e| SignatureError::Malformed(format!("bad hex: {e}")))?;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SignatureError::Malformed(format!("bad secret: {e}")))?;
    mac.update(payload);
    mac.verify_slice(&expected)
        .map_err(|_| SignatureError::Invalid)
}

#[cfg(test)]
pub fn sign_hex(payload: &[u8], secret: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).expect("hmac key");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}
