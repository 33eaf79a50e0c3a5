//! # Webhook Payload Signing
//!
//! HMAC-SHA256 over the raw serialized payload, hex-encoded into the
//! `X-Webhook-Signature` header. Verification is exposed for inbound
//! webhook validation and compares in constant time.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex HMAC-SHA256 signature of `payload` under `secret`.
pub fn compute_signature(secret: &str, payload: &[u8]) -> String {
    // HMAC accepts keys of any length.
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC key of any length is valid");
    mac.update(payload);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a hex signature against payload and secret in constant time.
pub fn verify_signature(secret: &str, payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex) else {
        return false;
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return false,
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}
