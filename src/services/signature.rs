use ring::hmac;

/// Signs a payload with HMAC-SHA256 and returns the signature as a hex
/// string.
pub fn sign(payload: &str, key: &[u8]) -> String {
    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    let tag = hmac::sign(&key, payload.as_bytes());
    hex::encode(tag.as_ref())
}

/// Verifies a hex-encoded HMAC-SHA256 signature over the payload.
pub fn verify(payload: &str, signature: &str, key: &[u8]) -> bool {
    let decoded = match hex::decode(signature) {
        Ok(d) => d,
        Err(_) => return false,
    };

    let key = hmac::Key::new(hmac::HMAC_SHA256, key);
    hmac::verify(&key, payload.as_bytes(), &decoded).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_verify_roundtrip() {
        let key = b"test-signing-key";
        let signature = sign("booking:member:1700000000", key);

        assert!(signature.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(verify("booking:member:1700000000", &signature, key));
    }

    #[test]
    fn test_tampered_payload_fails() {
        let key = b"test-signing-key";
        let signature = sign("booking:member:1700000000", key);

        assert!(!verify("booking:member:1700000001", &signature, key));
    }

    #[test]
    fn test_wrong_key_fails() {
        let signature = sign("payload", b"key-one");
        assert!(!verify("payload", &signature, b"key-two"));
    }

    #[test]
    fn test_malformed_signature_fails() {
        assert!(!verify("payload", "not-hex", b"key"));
    }
}
