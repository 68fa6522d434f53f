//! Tests for [`SharedSecretVerifier`] and [`RelayPolicy`].
//!
//! Verifies HMAC-SHA256 checking behaviour, header format handling, secret
//! redaction, and the production gate on the relay bypass.

use super::*;

// ============================================================================
// Helpers
// ============================================================================

/// Compute the HMAC-SHA256 of `payload` keyed by `secret` and return it as a
/// `sha256=<hex>` string, the exact format GitHub sends.
fn compute_sha256_signature(secret: &str, payload: &[u8]) -> String {
    type HmacSha256 = Hmac<Sha256>;
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(payload);
    let result = mac.finalize();
    format!("sha256={}", hex::encode(result.into_bytes()))
}

// ============================================================================
// check tests
// ============================================================================

mod check_tests {
    use super::*;

    /// A valid HMAC-SHA256 signature with the `sha256=` prefix must be accepted.
    #[test]
    fn test_valid_signature_with_prefix_accepted() {
        let secret = "my-test-secret";
        let payload = b"hello world";
        let signature = compute_sha256_signature(secret, payload);

        let verifier = SharedSecretVerifier::new(secret.to_string());
        let result = verifier.check(payload, &signature);

        assert!(result.is_ok(), "valid signature should be accepted");
    }

    /// A valid hex digest without the `sha256=` prefix must also be accepted.
    #[test]
    fn test_valid_signature_without_prefix_accepted() {
        let secret = "my-test-secret";
        let payload = b"hello world";
        let full_sig = compute_sha256_signature(secret, payload);
        let no_prefix = full_sig.strip_prefix("sha256=").unwrap();

        let verifier = SharedSecretVerifier::new(secret.to_string());
        let result = verifier.check(payload, no_prefix);

        assert!(result.is_ok(), "signature without prefix should be accepted");
    }

    /// The wrong secret must cause verification to fail with a mismatch.
    #[test]
    fn test_signature_wrong_secret_rejected() {
        let payload = b"some payload";
        let signature = compute_sha256_signature("correct-secret", payload);

        let verifier = SharedSecretVerifier::new("wrong-secret".to_string());
        let result = verifier.check(payload, &signature);

        assert!(
            matches!(result, Err(SignatureError::Mismatch)),
            "expected Mismatch, got {:?}",
            result
        );
    }

    /// A digest over different payload bytes must fail.
    #[test]
    fn test_signature_over_other_payload_rejected() {
        let secret = "my-secret";
        let signature = compute_sha256_signature(secret, b"original payload");

        let verifier = SharedSecretVerifier::new(secret.to_string());
        let result = verifier.check(b"tampered payload", &signature);

        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    /// A well-formed but wrong hex digest (same length, altered bytes) must fail.
    #[test]
    fn test_tampered_signature_rejected() {
        let tampered = format!("sha256={}", "0".repeat(64));

        let verifier = SharedSecretVerifier::new("my-secret".to_string());
        let result = verifier.check(b"original payload", &tampered);

        assert!(matches!(result, Err(SignatureError::Mismatch)));
    }

    /// A signature that is not valid hex must return `InvalidFormat`.
    #[test]
    fn test_non_hex_signature_returns_invalid_format() {
        let verifier = SharedSecretVerifier::new("secret".to_string());
        let result = verifier.check(b"payload", "sha256=not-valid-hex!!");

        assert!(
            matches!(result, Err(SignatureError::InvalidFormat { .. })),
            "expected InvalidFormat, got {:?}",
            result
        );
    }

    /// An empty signature header must return `MissingSignature`.
    #[test]
    fn test_empty_header_returns_missing_signature() {
        let verifier = SharedSecretVerifier::new("secret".to_string());
        let result = verifier.check(b"payload", "");

        assert!(matches!(result, Err(SignatureError::MissingSignature)));
    }

    /// An empty payload still verifies correctly (edge case).
    #[test]
    fn test_empty_payload_verifies() {
        let secret = "empty-payload-secret";
        let payload = b"";
        let signature = compute_sha256_signature(secret, payload);

        let verifier = SharedSecretVerifier::new(secret.to_string());

        assert!(verifier.check(payload, &signature).is_ok());
    }

    /// The boolean form mirrors `check` without panicking on bad input.
    #[test]
    fn test_verify_boolean_form() {
        let secret = "bool-secret";
        let payload = b"payload";
        let signature = compute_sha256_signature(secret, payload);

        let verifier = SharedSecretVerifier::new(secret.to_string());

        assert!(verifier.verify(payload, &signature));
        assert!(!verifier.verify(payload, "sha256=deadbeef"));
        assert!(!verifier.verify(payload, "garbage"));
        assert!(!verifier.verify(payload, ""));
    }
}

// ============================================================================
// Debug redaction tests
// ============================================================================

mod debug_tests {
    use super::*;

    /// The Debug form must never leak the secret.
    #[test]
    fn test_debug_redacts_secret() {
        let verifier = SharedSecretVerifier::new("super-secret-value".to_string());
        let debug_output = format!("{:?}", verifier);

        assert!(!debug_output.contains("super-secret-value"));
        assert!(debug_output.contains("<REDACTED>"));
    }
}

// ============================================================================
// RelayPolicy tests
// ============================================================================

mod relay_policy_tests {
    use super::*;

    /// The bypass is available outside production when enabled.
    #[test]
    fn test_bypass_allowed_in_development() {
        let policy = RelayPolicy::new(true, Environment::Development);
        assert!(policy.bypass_allowed());

        let policy = RelayPolicy::new(true, Environment::Staging);
        assert!(policy.bypass_allowed());
    }

    /// The bypass is never available in production, even when configured.
    #[test]
    fn test_bypass_never_allowed_in_production() {
        let policy = RelayPolicy::new(true, Environment::Production);
        assert!(!policy.bypass_allowed());
    }

    /// With the flag off the bypass is unavailable everywhere.
    #[test]
    fn test_bypass_disabled_by_default_flag() {
        let policy = RelayPolicy::new(false, Environment::Development);
        assert!(!policy.bypass_allowed());

        let policy = RelayPolicy::new(false, Environment::Production);
        assert!(!policy.bypass_allowed());
    }

    /// The strict constructor ignores relay detection in every environment.
    #[test]
    fn test_strict_policy_never_bypasses() {
        assert!(!RelayPolicy::strict(Environment::Development).bypass_allowed());
        assert!(!RelayPolicy::strict(Environment::Staging).bypass_allowed());
        assert!(!RelayPolicy::strict(Environment::Production).bypass_allowed());
    }
}
