//! Sender authentication for raw inbound events.
//!
//! Signatures arrive as `sha256=<hex-digest>` headers computed as
//! HMAC-SHA256 over the raw payload bytes. Digest comparison is constant
//! time. Freshness of the claimed origination timestamp is validated
//! separately; both checks must pass.

use std::time::Duration;

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use thiserror::Error;

type HmacSha256 = Hmac<Sha256>;

/// Default replay-defense tolerance for the claimed origination time.
pub const DEFAULT_TIMESTAMP_TOLERANCE: Duration = Duration::from_secs(300);

/// Errors constructing a [`SignatureVerifier`].
#[derive(Debug, Error)]
pub enum SignatureError {
    /// No signing secret was provisioned. Construction fails fast so
    /// verification can never be silently skipped.
    #[error("webhook signing secret is not configured")]
    MissingSecret,

    /// The provisioned secret was rejected by the MAC implementation.
    #[error("webhook signing secret is invalid")]
    InvalidSecret,
}

/// Why a signature was rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    /// The header is not of the form `<algorithm>=<hex-digest>`.
    #[error("malformed signature")]
    MalformedSignature,

    /// The header names an algorithm other than `sha256`.
    #[error("unsupported signature algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// The digest does not match the payload.
    #[error("signature mismatch")]
    Mismatch,
}

/// Required headers accompanying a raw inbound event.
#[derive(Debug, Clone, Default)]
pub struct IntakeHeaders {
    /// `<algorithm>=<hex-digest>` signature header.
    pub signature: Option<String>,
    /// Sender-assigned event id, used for idempotency.
    pub event_id: Option<String>,
    /// Claimed origination time, unix seconds.
    pub timestamp: Option<i64>,
}

/// A missing required header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum HeaderError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("missing event-id header")]
    MissingEventId,

    #[error("missing timestamp header")]
    MissingTimestamp,
}

/// Header values after presence validation.
#[derive(Debug, Clone, Copy)]
pub struct RequiredHeaders<'a> {
    pub signature: &'a str,
    pub event_id: &'a str,
    /// Absent only when the caller explicitly opted in to skipping the
    /// freshness check.
    pub timestamp: Option<i64>,
}

impl IntakeHeaders {
    /// Validate header presence. Signature and event id are always
    /// required; a missing timestamp passes only when
    /// `allow_missing_timestamp` is set.
    pub fn require(
        &self,
        allow_missing_timestamp: bool,
    ) -> Result<RequiredHeaders<'_>, HeaderError> {
        let signature = self
            .signature
            .as_deref()
            .ok_or(HeaderError::MissingSignature)?;
        let event_id = self.event_id.as_deref().ok_or(HeaderError::MissingEventId)?;
        if self.timestamp.is_none() && !allow_missing_timestamp {
            return Err(HeaderError::MissingTimestamp);
        }
        Ok(RequiredHeaders {
            signature,
            event_id,
            timestamp: self.timestamp,
        })
    }
}

/// Verifies HMAC-SHA256 signatures over raw payload bytes.
pub struct SignatureVerifier {
    mac: HmacSha256,
}

impl SignatureVerifier {
    /// Create a verifier from the provisioned signing secret.
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, SignatureError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(SignatureError::MissingSecret);
        }
        let mac =
            HmacSha256::new_from_slice(secret).map_err(|_| SignatureError::InvalidSecret)?;
        Ok(Self { mac })
    }

    /// Verify `signature_header` against the raw payload bytes.
    pub fn verify(&self, payload: &[u8], signature_header: &str) -> Result<(), VerifyError> {
        let (algorithm, digest) = signature_header
            .split_once('=')
            .ok_or(VerifyError::MalformedSignature)?;
        if algorithm != "sha256" {
            return Err(VerifyError::UnsupportedAlgorithm(algorithm.to_owned()));
        }
        let provided = hex::decode(digest).map_err(|_| VerifyError::MalformedSignature)?;
        let expected = self.compute(payload);

        // Constant-time comparison: a plain `==` would leak how many digest
        // bytes matched through timing.
        if bool::from(expected.as_slice().ct_eq(provided.as_slice())) {
            Ok(())
        } else {
            Err(VerifyError::Mismatch)
        }
    }

    /// Compute the HMAC-SHA256 digest of `payload`.
    fn compute(&self, payload: &[u8]) -> Vec<u8> {
        let mut mac = self.mac.clone();
        mac.update(payload);
        mac.finalize().into_bytes().to_vec()
    }

    /// Render the signature header value for `payload` (test fixtures,
    /// outbound mirroring).
    pub fn sign(&self, payload: &[u8]) -> String {
        format!("sha256={}", hex::encode(self.compute(payload)))
    }
}

impl std::fmt::Debug for SignatureVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureVerifier")
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Check that a claimed origination time is within `tolerance` of now.
/// The boundary is inclusive: a skew of exactly `tolerance` passes.
pub fn validate_timestamp(timestamp_secs: i64, tolerance: Duration) -> bool {
    let now = Utc::now().timestamp();
    now.abs_diff(timestamp_secs) <= tolerance.as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn verifier() -> SignatureVerifier {
        SignatureVerifier::new("test-secret").unwrap()
    }

    #[test]
    fn empty_secret_fails_construction() {
        assert!(matches!(
            SignatureVerifier::new(""),
            Err(SignatureError::MissingSecret)
        ));
    }

    #[test]
    fn valid_signature_round_trip() {
        let v = verifier();
        let payload = br#"{"event_id":"evt-1","event_type":"price_change"}"#;
        let header = v.sign(payload);
        assert!(header.starts_with("sha256="));
        assert_eq!(v.verify(payload, &header), Ok(()));
    }

    #[test]
    fn wrong_secret_is_rejected() {
        let payload = b"payload";
        let header = SignatureVerifier::new("other-secret").unwrap().sign(payload);
        assert_eq!(verifier().verify(payload, &header), Err(VerifyError::Mismatch));
    }

    #[test]
    fn tampered_payload_is_rejected() {
        let v = verifier();
        let header = v.sign(b"original");
        assert_eq!(v.verify(b"tampered", &header), Err(VerifyError::Mismatch));
    }

    #[test]
    fn missing_separator_is_malformed() {
        assert_eq!(
            verifier().verify(b"x", "deadbeef"),
            Err(VerifyError::MalformedSignature)
        );
    }

    #[test]
    fn non_hex_digest_is_malformed() {
        assert_eq!(
            verifier().verify(b"x", "sha256=not-hex!"),
            Err(VerifyError::MalformedSignature)
        );
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        assert_eq!(
            verifier().verify(b"x", "sha512=deadbeef"),
            Err(VerifyError::UnsupportedAlgorithm("sha512".into()))
        );
    }

    #[test]
    fn truncated_digest_is_rejected_not_panicking() {
        let v = verifier();
        let header = v.sign(b"x");
        let truncated = &header[..header.len() - 10];
        assert_eq!(v.verify(b"x", truncated), Err(VerifyError::Mismatch));
    }

    #[test]
    fn timestamp_within_tolerance() {
        let now = Utc::now().timestamp();
        assert!(validate_timestamp(now, DEFAULT_TIMESTAMP_TOLERANCE));
        assert!(validate_timestamp(now - 200, DEFAULT_TIMESTAMP_TOLERANCE));
        assert!(validate_timestamp(now + 200, DEFAULT_TIMESTAMP_TOLERANCE));
    }

    #[test]
    fn timestamp_outside_tolerance() {
        let now = Utc::now().timestamp();
        assert!(!validate_timestamp(now - 301, DEFAULT_TIMESTAMP_TOLERANCE));
        assert!(!validate_timestamp(now + 301, DEFAULT_TIMESTAMP_TOLERANCE));
    }

    #[test]
    fn timestamp_boundary_is_inclusive() {
        let now = Utc::now().timestamp();
        // Exactly the tolerance away passes.
        assert!(validate_timestamp(now - 300, DEFAULT_TIMESTAMP_TOLERANCE));
    }

    #[test]
    fn headers_require_signature_and_event_id() {
        let headers = IntakeHeaders {
            signature: None,
            event_id: Some("evt-1".into()),
            timestamp: Some(0),
        };
        assert_eq!(
            headers.require(false).unwrap_err(),
            HeaderError::MissingSignature
        );

        let headers = IntakeHeaders {
            signature: Some("sha256=00".into()),
            event_id: None,
            timestamp: Some(0),
        };
        assert_eq!(
            headers.require(false).unwrap_err(),
            HeaderError::MissingEventId
        );
    }

    #[test]
    fn missing_timestamp_needs_explicit_opt_in() {
        let headers = IntakeHeaders {
            signature: Some("sha256=00".into()),
            event_id: Some("evt-1".into()),
            timestamp: None,
        };
        assert_eq!(
            headers.require(false).unwrap_err(),
            HeaderError::MissingTimestamp
        );
        let required = headers.require(true).unwrap();
        assert!(required.timestamp.is_none());
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", verifier());
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("test-secret"));
    }
}
