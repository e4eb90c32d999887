//! HMAC-SHA256 payload signatures.
//!
//! Outbound notifications are signed with [`sign_payload`]; inbound network
//! webhooks are checked with [`verify_signature`].

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Generate HMAC-SHA256 signature for a payload.
///
/// # Format
///
/// `sha256=<hex_encoded_hmac>`
///
/// # Verification
///
/// Receivers should:
/// 1. Extract signature from `X-Webhook-Signature` header
/// 2. Compute HMAC-SHA256(secret, request_body)
/// 3. Compare using constant-time comparison
pub fn sign_payload(secret: &str, payload: &[u8]) -> String {
    let mut mac = mac_for(secret);
    mac.update(payload);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Check a hex HMAC-SHA256 signature of `body`, with or without the
/// `sha256=` prefix. Comparison is constant time.
pub fn verify_signature(secret: &str, body: &[u8], signature: &str) -> bool {
    let hex_digest = signature.trim();
    let hex_digest = hex_digest.strip_prefix("sha256=").unwrap_or(hex_digest);

    let Ok(expected) = hex::decode(hex_digest) else {
        return false;
    };

    let mut mac = mac_for(secret);
    mac.update(body);
    mac.verify_slice(&expected).is_ok()
}

fn mac_for(secret: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(secret.as_bytes()).expect("HMAC key length is valid")
}

#[cfg(test)]
mod tests {
    use super::*;

    const DIGEST: &str = "51426af50a41dd7ff2cd3f116594734766d4018d15d6fb07169aee5d2959adf5";

    #[test]
    fn signature_matches_known_digest() {
        assert_eq!(
            sign_payload("whsec_test", br#"{"a":1}"#),
            format!("sha256={}", DIGEST)
        );
    }

    #[test]
    fn verification_accepts_bare_and_prefixed_hex() {
        assert!(verify_signature("whsec_test", br#"{"a":1}"#, DIGEST));
        assert!(verify_signature(
            "whsec_test",
            br#"{"a":1}"#,
            &format!("sha256={}", DIGEST)
        ));
    }

    #[test]
    fn verification_rejects_wrong_body_secret_or_encoding() {
        assert!(!verify_signature("whsec_test", br#"{"a":2}"#, DIGEST));
        assert!(!verify_signature("other", br#"{"a":1}"#, DIGEST));
        assert!(!verify_signature("whsec_test", br#"{"a":1}"#, "not-hex"));
        assert!(!verify_signature("whsec_test", br#"{"a":1}"#, ""));
    }
}
