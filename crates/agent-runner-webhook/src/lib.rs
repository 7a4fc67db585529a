//! HMAC-SHA256 signature verification for inbound webhook deliveries.
//!
//! The teacher (`shipper::webhook`) only ever signs outbound payloads
//! (`HmacSha256::new_from_slice` + `mac.finalize()` + `hex::encode`); this
//! is the mirror-image verifier for a payload this process *receives*.

use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// The header name the platform sends the signature in.
pub const SIGNATURE_HEADER: &str = "X-Hub-Signature-256";

/// Compute `sha256=<hex>` the way the platform computes its own signature,
/// for tests and for re-signing forwarded payloads.
pub fn sign(secret: &[u8], body: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts a key of any size");
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

/// Verify `header_value` (the raw `X-Hub-Signature-256` header, including
/// the `sha256=` prefix) against `body` using `secret`.
///
/// Returns `false` on any malformed input rather than erroring — signature
/// mismatch and malformed signature are both just "reject" to the caller
/// (spec.md §4.8 step 3 / invariant I5: no state mutation on mismatch).
pub fn verify(secret: &[u8], body: &[u8], header_value: &str) -> bool {
    let Some(hex_sig) = header_value.strip_prefix("sha256=") else {
        return false;
    };
    let Ok(sig_bytes) = hex::decode(hex_sig) else {
        return false;
    };

    let Ok(mut mac) = HmacSha256::new_from_slice(secret) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&sig_bytes).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_accepts_a_correctly_signed_payload() {
        let secret = b"top-secret";
        let body = br#"{"action":"opened"}"#;
        let header = sign(secret, body);
        assert!(verify(secret, body, &header));
    }

    #[test]
    fn verify_rejects_wrong_secret() {
        let body = br#"{"action":"opened"}"#;
        let header = sign(b"secret-a", body);
        assert!(!verify(b"secret-b", body, &header));
    }

    #[test]
    fn verify_rejects_tampered_body() {
        let secret = b"top-secret";
        let header = sign(secret, br#"{"action":"opened"}"#);
        assert!(!verify(secret, br#"{"action":"closed"}"#, &header));
    }

    #[test]
    fn verify_rejects_missing_prefix_i5() {
        let secret = b"top-secret";
        let body = b"payload";
        let bare_hex = hex::encode(
            HmacSha256::new_from_slice(secret)
                .unwrap()
                .chain_update(body)
                .finalize()
                .into_bytes(),
        );
        assert!(!verify(secret, body, &bare_hex));
    }

    #[test]
    fn verify_rejects_non_hex_signature() {
        assert!(!verify(b"secret", b"body", "sha256=not-hex-at-all!"));
    }

    proptest::proptest! {
        #[test]
        fn verify_round_trips_for_arbitrary_bodies(body in proptest::collection::vec(proptest::num::u8::ANY, 0..512)) {
            let secret = b"a-shared-secret";
            let header = sign(secret, &body);
            assert!(verify(secret, &body, &header));
        }
    }
}
