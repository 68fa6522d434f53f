//! Signature verification for webhook intake.
//!
//! GitHub signs each delivery with HMAC-SHA256 over the raw request body and
//! sends the digest in the `X-Hub-Signature-256` header as `sha256=<hex>`.
//! Verification is a hard gate: it runs before any payload parsing and before
//! any store mutation.

use crate::Environment;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

// ============================================================================
// Trait Definition
// ============================================================================

/// Interface for webhook signature verification
///
/// Implementations must compare against the exact raw bytes they are given
/// (never a re-serialized form) using a constant-time comparison. Both
/// methods are pure: no side effects, no suspension.
pub trait SignatureVerifier: Send + Sync {
    /// Check a signature header against the payload
    ///
    /// # Errors
    ///
    /// Returns the rejection reason. Every reason maps to the same
    /// authentication failure at the HTTP boundary; the variants exist so
    /// rejections are loggable.
    fn check(&self, payload: &[u8], signature_header: &str) -> Result<(), SignatureError>;

    /// Boolean form of [`check`](Self::check)
    ///
    /// Malformed signature headers yield `false`, never a panic or an error.
    fn verify(&self, payload: &[u8], signature_header: &str) -> bool {
        self.check(payload, signature_header).is_ok()
    }
}

// ============================================================================
// SharedSecretVerifier
// ============================================================================

/// HMAC-SHA256 verifier backed by the shared webhook secret
///
/// Accepts signatures in the GitHub `sha256=<hex-digest>` header format (the
/// prefix is stripped when present). The digest comparison is performed in
/// constant time to prevent timing-based secret recovery.
pub struct SharedSecretVerifier {
    secret: String,
}

impl SharedSecretVerifier {
    /// Construct a verifier from the configured shared secret
    pub fn new(secret: String) -> Self {
        Self { secret }
    }
}

impl std::fmt::Debug for SharedSecretVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SharedSecretVerifier")
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

impl SignatureVerifier for SharedSecretVerifier {
    fn check(&self, payload: &[u8], signature_header: &str) -> Result<(), SignatureError> {
        type HmacSha256 = Hmac<Sha256>;

        if signature_header.is_empty() {
            return Err(SignatureError::MissingSignature);
        }

        let hex_part = signature_header
            .strip_prefix("sha256=")
            .unwrap_or(signature_header);
        let sig_bytes = hex::decode(hex_part).map_err(|_| SignatureError::InvalidFormat {
            message: "signature is not valid hex".to_string(),
        })?;

        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .map_err(|_| SignatureError::InvalidKey)?;
        mac.update(payload);

        mac.verify_slice(&sig_bytes)
            .map_err(|_| SignatureError::Mismatch)
    }
}

// ============================================================================
// RelayPolicy
// ============================================================================

/// Gate for the development-only relay verification bypass
///
/// Relay envelopes re-wrap the sender-signed payload, so the sender's
/// signature cannot match the wrapped bytes. For local development behind a
/// trusted tunnel, the bypass skips verification for detected relay traffic.
///
/// The production gate lives in this type rather than in configuration
/// validation: [`bypass_allowed`](Self::bypass_allowed) can never return
/// `true` in a production environment, regardless of configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayPolicy {
    allow_unverified: bool,
    environment: Environment,
}

impl RelayPolicy {
    /// Create a policy from configuration
    ///
    /// Setting `allow_unverified` in a production environment is accepted but
    /// inert; a `WARN` is emitted so the misconfiguration is visible.
    pub fn new(allow_unverified: bool, environment: Environment) -> Self {
        if allow_unverified && environment.is_production() {
            warn!("allow_unverified_relay is set but has no effect in production");
        }
        Self {
            allow_unverified,
            environment,
        }
    }

    /// Policy that always verifies, regardless of relay detection
    pub fn strict(environment: Environment) -> Self {
        Self {
            allow_unverified: false,
            environment,
        }
    }

    /// Whether detected relay traffic may skip verification
    pub fn bypass_allowed(&self) -> bool {
        self.allow_unverified && !self.environment.is_production()
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors from signature verification
#[derive(Debug, Clone, thiserror::Error)]
pub enum SignatureError {
    #[error("Signature header is missing")]
    MissingSignature,

    #[error("Signature header has invalid format: {message}")]
    InvalidFormat { message: String },

    #[error("HMAC-SHA256 digest does not match")]
    Mismatch,

    #[error("Secret cannot be used as HMAC key")]
    InvalidKey,
}

#[cfg(test)]
#[path = "signature_tests.rs"]
mod tests;
