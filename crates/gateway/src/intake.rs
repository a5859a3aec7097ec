//! Boundary pipeline for raw inbound events.
//!
//! Order matters: sender authentication and freshness first, then admission
//! control, then envelope validation, and only then durable side effects
//! (event insert + enqueue). A rejected submission leaves no trace in the
//! store or the queue.

use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, warn};

use feedgate_core::{EventId, EventKind, InboundEvent};
use feedgate_state::EventStore;

use crate::error::GatewayError;
use crate::flags::{FeatureFlags, FlagKey};
use crate::queue::ProcessingQueue;
use crate::ratelimit::RateLimiter;
use crate::signature::{
    HeaderError, IntakeHeaders, SignatureVerifier, VerifyError, validate_timestamp,
    DEFAULT_TIMESTAMP_TOLERANCE,
};

/// Configuration for the intake boundary.
#[derive(Debug, Clone)]
pub struct IntakeConfig {
    /// Tolerance for the claimed origination timestamp.
    pub timestamp_tolerance: std::time::Duration,
    /// Explicit opt-in to accept events without a timestamp header,
    /// skipping the freshness check for them.
    pub allow_missing_timestamp: bool,
}

impl Default for IntakeConfig {
    fn default() -> Self {
        Self {
            timestamp_tolerance: DEFAULT_TIMESTAMP_TOLERANCE,
            allow_missing_timestamp: false,
        }
    }
}

/// Why a submission was rejected at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IntakeRejection {
    #[error(transparent)]
    MissingHeader(HeaderError),

    #[error("invalid signature: {0}")]
    InvalidSignature(VerifyError),

    #[error("stale timestamp")]
    StaleTimestamp,

    #[error("rate limit exceeded")]
    RateLimited,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),
}

/// Outcome of a submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IntakeOutcome {
    /// Verified, recorded, and enqueued.
    Accepted { event_id: EventId },
    /// Already recorded under this event id; not enqueued again.
    Duplicate { event_id: EventId },
    /// Rejected at the boundary with no side effects.
    Rejected(IntakeRejection),
}

/// Minimal envelope every feed notification carries.
#[derive(Debug, Deserialize)]
struct Envelope {
    event_id: String,
    event_type: String,
}

/// The intake boundary: authentication, admission, validation, then
/// durable accept.
pub struct EventIntake {
    verifier: SignatureVerifier,
    limiter: Arc<RateLimiter>,
    flags: Arc<FeatureFlags>,
    events: Arc<dyn EventStore>,
    queue: Arc<ProcessingQueue>,
    config: IntakeConfig,
}

impl EventIntake {
    /// Create the intake boundary.
    pub fn new(
        verifier: SignatureVerifier,
        limiter: Arc<RateLimiter>,
        flags: Arc<FeatureFlags>,
        events: Arc<dyn EventStore>,
        queue: Arc<ProcessingQueue>,
        config: IntakeConfig,
    ) -> Self {
        Self {
            verifier,
            limiter,
            flags,
            events,
            queue,
            config,
        }
    }

    /// Submit one raw notification.
    ///
    /// `source` identifies the sender for rate limiting (IP or API key).
    /// Boundary rejections come back as `Ok(Rejected(..))`; only store
    /// failures surface as `Err`.
    pub async fn submit(
        &self,
        source: &str,
        headers: &IntakeHeaders,
        raw_body: &[u8],
    ) -> Result<IntakeOutcome, GatewayError> {
        let required = match headers.require(self.config.allow_missing_timestamp) {
            Ok(required) => required,
            Err(e) => {
                warn!(source, error = %e, "submission rejected: missing header");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::MissingHeader(e)));
            }
        };

        if self.flags.get_bool(FlagKey::SignatureRequired).await {
            if let Err(e) = self.verifier.verify(raw_body, required.signature) {
                warn!(source, error = %e, "submission rejected: signature");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::InvalidSignature(e)));
            }
            // Freshness is independent of signature validity; both must
            // pass. A missing timestamp got here only via explicit opt-in.
            if let Some(timestamp) = required.timestamp
                && !validate_timestamp(timestamp, self.config.timestamp_tolerance)
            {
                warn!(source, timestamp, "submission rejected: stale timestamp");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::StaleTimestamp));
            }
        }

        // The stored flag governs admission when present; an absent or
        // unreadable row falls back to the limiter's configured maximum.
        let admitted = match self.flags.get_required(FlagKey::RateLimitPerMinute).await {
            Ok(value) => {
                let max = usize::try_from(value.as_integer()).unwrap_or(0);
                self.limiter.check_with_limit(source, max)
            }
            Err(_) => self.limiter.check(source),
        };
        if !admitted {
            warn!(source, "submission rejected: rate limited");
            return Ok(IntakeOutcome::Rejected(IntakeRejection::RateLimited));
        }

        let payload: serde_json::Value = match serde_json::from_slice(raw_body) {
            Ok(payload) => payload,
            Err(e) => {
                warn!(source, error = %e, "submission rejected: unparseable body");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(
                    e.to_string(),
                )));
            }
        };
        let envelope: Envelope = match serde_json::from_value(payload.clone()) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(source, error = %e, "submission rejected: incomplete envelope");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(
                    e.to_string(),
                )));
            }
        };
        if envelope.event_id != required.event_id {
            warn!(source, "submission rejected: event id mismatch");
            return Ok(IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(
                "event id header does not match envelope".into(),
            )));
        }
        let kind: EventKind = match envelope.event_type.parse() {
            Ok(kind) => kind,
            Err(e) => {
                warn!(source, error = %e, "submission rejected: unknown event type");
                return Ok(IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(
                    e.to_string(),
                )));
            }
        };

        let event = InboundEvent::new(envelope.event_id.clone(), kind, payload);
        let event_id = event.id.clone();

        if !self.events.insert_event(event).await? {
            debug!(source, event = %event_id, "duplicate delivery ignored");
            return Ok(IntakeOutcome::Duplicate { event_id });
        }

        self.queue.enqueue(event_id.clone(), 0, None).await?;
        debug!(source, event = %event_id, kind = %kind, "event accepted");
        Ok(IntakeOutcome::Accepted { event_id })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use feedgate_state_memory::MemoryStore;

    use feedgate_state::QueueStore;

    use crate::flags::{FeatureFlagsConfig, FlagValue};
    use crate::queue::QueueConfig;
    use crate::ratelimit::RateLimiterConfig;
    use crate::test_support::NoopProcessor;

    use super::*;

    const SECRET: &str = "intake-secret";

    struct Fixture {
        store: Arc<MemoryStore>,
        flags: Arc<FeatureFlags>,
        intake: EventIntake,
    }

    fn fixture_with(config: IntakeConfig, limiter: RateLimiterConfig) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let flags = Arc::new(FeatureFlags::new(
            Arc::clone(&store) as _,
            FeatureFlagsConfig::default(),
        ));
        let queue = Arc::new(ProcessingQueue::new(
            Arc::clone(&store) as _,
            Arc::clone(&store) as _,
            Arc::new(NoopProcessor),
            QueueConfig::default(),
        ));
        let intake = EventIntake::new(
            SignatureVerifier::new(SECRET).unwrap(),
            Arc::new(RateLimiter::new(limiter)),
            Arc::clone(&flags),
            Arc::clone(&store) as _,
            queue,
            config,
        );
        Fixture {
            store,
            flags,
            intake,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(IntakeConfig::default(), RateLimiterConfig::default())
    }

    fn body(event_id: &str) -> Vec<u8> {
        serde_json::to_vec(&serde_json::json!({
            "event_id": event_id,
            "event_type": "price_change",
            "sku": "SKU-1",
            "price_cents": 2599,
        }))
        .unwrap()
    }

    fn signed_headers(body: &[u8], event_id: &str) -> IntakeHeaders {
        let verifier = SignatureVerifier::new(SECRET).unwrap();
        IntakeHeaders {
            signature: Some(verifier.sign(body)),
            event_id: Some(event_id.to_owned()),
            timestamp: Some(Utc::now().timestamp()),
        }
    }

    #[tokio::test]
    async fn valid_submission_is_accepted_and_enqueued() {
        let f = fixture();
        let body = body("evt-1");
        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body, "evt-1"), &body)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            IntakeOutcome::Accepted {
                event_id: EventId::new("evt-1")
            }
        );
        assert!(
            f.store
                .get_event(&EventId::new("evt-1"))
                .await
                .unwrap()
                .is_some()
        );
        let claimed = f.store.claim_next(Utc::now()).await.unwrap();
        assert!(claimed.is_some(), "accepted event is enqueued");
    }

    #[tokio::test]
    async fn bad_signature_is_rejected_with_no_side_effects() {
        let f = fixture();
        let body = body("evt-1");
        let mut headers = signed_headers(&body, "evt-1");
        headers.signature = Some("sha256=00000000".into());

        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert!(matches!(
            outcome,
            IntakeOutcome::Rejected(IntakeRejection::InvalidSignature(_))
        ));
        assert!(
            f.store
                .get_event(&EventId::new("evt-1"))
                .await
                .unwrap()
                .is_none(),
            "rejected events are never recorded"
        );
    }

    #[tokio::test]
    async fn stale_timestamp_is_rejected_despite_valid_signature() {
        let f = fixture();
        let body = body("evt-1");
        let mut headers = signed_headers(&body, "evt-1");
        headers.timestamp = Some(Utc::now().timestamp() - 400);

        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert_eq!(
            outcome,
            IntakeOutcome::Rejected(IntakeRejection::StaleTimestamp)
        );
    }

    #[tokio::test]
    async fn missing_timestamp_rejected_without_opt_in() {
        let f = fixture();
        let body = body("evt-1");
        let mut headers = signed_headers(&body, "evt-1");
        headers.timestamp = None;

        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert_eq!(
            outcome,
            IntakeOutcome::Rejected(IntakeRejection::MissingHeader(
                HeaderError::MissingTimestamp
            ))
        );
    }

    #[tokio::test]
    async fn missing_timestamp_allowed_with_opt_in() {
        let f = fixture_with(
            IntakeConfig {
                allow_missing_timestamp: true,
                ..IntakeConfig::default()
            },
            RateLimiterConfig::default(),
        );
        let body = body("evt-1");
        let mut headers = signed_headers(&body, "evt-1");
        headers.timestamp = None;

        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn signature_not_required_when_flag_disabled() {
        let f = fixture();
        f.flags
            .set(FlagKey::SignatureRequired, FlagValue::Bool(false))
            .await
            .unwrap();

        let body = body("evt-1");
        let headers = IntakeHeaders {
            signature: Some("sha256=ffff".into()),
            event_id: Some("evt-1".into()),
            timestamp: Some(Utc::now().timestamp()),
        };
        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));
    }

    #[tokio::test]
    async fn rate_limit_rejects_without_recording_event() {
        let f = fixture_with(
            IntakeConfig::default(),
            RateLimiterConfig {
                max_requests: 1,
                window: std::time::Duration::from_secs(60),
            },
        );

        let body1 = body("evt-1");
        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body1, "evt-1"), &body1)
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));

        let body2 = body("evt-2");
        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body2, "evt-2"), &body2)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Rejected(IntakeRejection::RateLimited));
        assert!(
            f.store
                .get_event(&EventId::new("evt-2"))
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn stored_rate_limit_flag_governs_admission() {
        let f = fixture();
        f.flags
            .set(FlagKey::RateLimitPerMinute, FlagValue::Integer(1))
            .await
            .unwrap();

        let body1 = body("evt-1");
        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body1, "evt-1"), &body1)
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));

        let body2 = body("evt-2");
        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body2, "evt-2"), &body2)
            .await
            .unwrap();
        assert_eq!(outcome, IntakeOutcome::Rejected(IntakeRejection::RateLimited));
    }

    #[tokio::test]
    async fn duplicate_delivery_is_not_re_enqueued() {
        let f = fixture();
        let body = body("evt-1");

        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body, "evt-1"), &body)
            .await
            .unwrap();
        assert!(matches!(outcome, IntakeOutcome::Accepted { .. }));

        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body, "evt-1"), &body)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            IntakeOutcome::Duplicate {
                event_id: EventId::new("evt-1")
            }
        );

        // Exactly one queue item exists for the event.
        assert!(f.store.claim_next(Utc::now()).await.unwrap().is_some());
        assert!(f.store.claim_next(Utc::now()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn unknown_event_type_is_malformed() {
        let f = fixture();
        let body = serde_json::to_vec(&serde_json::json!({
            "event_id": "evt-1",
            "event_type": "price_drop",
        }))
        .unwrap();

        let outcome = f
            .intake
            .submit("1.2.3.4", &signed_headers(&body, "evt-1"), &body)
            .await
            .unwrap();
        assert!(matches!(
            outcome,
            IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(_))
        ));
    }

    #[tokio::test]
    async fn event_id_header_mismatch_is_malformed() {
        let f = fixture();
        let body = body("evt-1");
        let headers = signed_headers(&body, "evt-other");

        let outcome = f.intake.submit("1.2.3.4", &headers, &body).await.unwrap();
        assert!(matches!(
            outcome,
            IntakeOutcome::Rejected(IntakeRejection::MalformedEnvelope(_))
        ));
    }
}
