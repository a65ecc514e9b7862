//! HMAC-SHA256 helpers shared by payment verification and file URL signing.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `message` under `secret`.
#[must_use]
pub fn sign_hex(secret: &[u8], message: &[u8]) -> String {
    // HMAC accepts keys of any length, so construction cannot fail.
    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return String::new();
    };
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Check a hex signature against `message` in constant time.
///
/// Hex case is ignored; an empty signature never verifies.
#[must_use]
pub fn verify_hex(secret: &[u8], message: &[u8], signature: &str) -> bool {
    if signature.is_empty() {
        return false;
    }
    let expected = sign_hex(secret, message);
    constant_time_compare(&expected, &signature.to_ascii_lowercase())
}

/// Constant-time string comparison to prevent timing attacks.
fn constant_time_compare(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }

    let mut result: u8 = 0;
    for (x, y) in a.bytes().zip(b.bytes()) {
        result |= x ^ y;
    }

    result == 0
}
