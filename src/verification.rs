use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Hex-encoded HMAC-SHA256 of `body` keyed by `secret`.
pub fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .expect("HMAC accepts keys of any length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

/// Verify a Novu-style signature: hex HMAC-SHA256 of the raw body, no prefix
/// and no timestamp component.
///
/// The comparison runs in constant time over the decoded digest. Empty,
/// non-hex or wrong-length signatures are rejected.
pub fn verify_novu_hmac(secret: &str, body: &[u8], signature_header: &str) -> bool {
    let signature = signature_header.trim();
    if signature.is_empty() {
        return false;
    }

    let expected = match hex::decode(signature) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(m) => m,
        Err(_) => return false,
    };
    mac.update(body);
    // verify_slice rejects length mismatches up front and compares equal-length
    // digests with a constant-time equality.
    mac.verify_slice(&expected).is_ok()
}
