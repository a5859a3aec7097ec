//! Feature flag gate: typed, cached switches in front of the config store.
//!
//! Raw rows are string-encoded; the typed decode happens here, at the only
//! boundary that reads them. Defaulted reads never fail — a store error or
//! an unreadable row falls back to the caller's default — and the
//! security-critical stock-update flag defaults to disabled, so absence of
//! data can never fail open into a permissive state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, warn};

use feedgate_state::{ConfigStore, StateError};

/// Typed flag keys. Each key carries its expected value kind and its safe
/// default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlagKey {
    /// May the feed apply price changes to the catalog.
    PriceUpdatesEnabled,
    /// May the feed record stock observations (tracking only).
    StockMonitoringEnabled,
    /// May the feed create products for unknown listings.
    NewItemDetectionEnabled,
    /// May the feed directly overwrite live stock quantities.
    /// Security-critical; defaults to disabled.
    StockUpdatesEnabled,
    /// Whether intake requires a valid signature.
    SignatureRequired,
    /// Requests admitted per source per minute.
    RateLimitPerMinute,
    /// Days of audit log history retained by maintenance.
    LogRetentionDays,
    /// Days of terminal queue item history retained by maintenance.
    QueueRetentionDays,
}

/// Kind of value a flag holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlagKind {
    Bool,
    Integer,
}

/// A decoded flag value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FlagValue {
    Bool(bool),
    Integer(i64),
}

impl FlagValue {
    /// Interpret as bool; integers are truthy when non-zero.
    #[must_use]
    pub fn as_bool(self) -> bool {
        match self {
            Self::Bool(b) => b,
            Self::Integer(i) => i != 0,
        }
    }

    /// Interpret as integer; bools map to 0/1.
    #[must_use]
    pub fn as_integer(self) -> i64 {
        match self {
            Self::Bool(b) => i64::from(b),
            Self::Integer(i) => i,
        }
    }

    /// Encode for storage as a raw row value.
    #[must_use]
    pub fn encode(self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
        }
    }

    /// Decode a raw row value against the expected kind.
    pub fn decode(kind: FlagKind, raw: &str) -> Result<Self, FlagDecodeError> {
        match kind {
            FlagKind::Bool => match raw {
                "true" => Ok(Self::Bool(true)),
                "false" => Ok(Self::Bool(false)),
                _ => Err(FlagDecodeError {
                    raw: raw.to_owned(),
                    expected: kind,
                }),
            },
            FlagKind::Integer => raw.parse::<i64>().map(Self::Integer).map_err(|_| {
                FlagDecodeError {
                    raw: raw.to_owned(),
                    expected: kind,
                }
            }),
        }
    }
}

/// A raw row value that does not decode as the key's expected kind.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("flag value {raw:?} does not decode as {expected:?}")]
pub struct FlagDecodeError {
    pub raw: String,
    pub expected: FlagKind,
}

impl FlagKey {
    /// Every known flag, in seeding order.
    pub const ALL: [Self; 8] = [
        Self::PriceUpdatesEnabled,
        Self::StockMonitoringEnabled,
        Self::NewItemDetectionEnabled,
        Self::StockUpdatesEnabled,
        Self::SignatureRequired,
        Self::RateLimitPerMinute,
        Self::LogRetentionDays,
        Self::QueueRetentionDays,
    ];

    /// Storage key of this flag.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PriceUpdatesEnabled => "price_updates_enabled",
            Self::StockMonitoringEnabled => "stock_monitoring_enabled",
            Self::NewItemDetectionEnabled => "new_item_detection_enabled",
            Self::StockUpdatesEnabled => "stock_updates_enabled",
            Self::SignatureRequired => "signature_required",
            Self::RateLimitPerMinute => "rate_limit_per_minute",
            Self::LogRetentionDays => "log_retention_days",
            Self::QueueRetentionDays => "queue_retention_days",
        }
    }

    /// Expected value kind.
    #[must_use]
    pub fn kind(self) -> FlagKind {
        match self {
            Self::PriceUpdatesEnabled
            | Self::StockMonitoringEnabled
            | Self::NewItemDetectionEnabled
            | Self::StockUpdatesEnabled
            | Self::SignatureRequired => FlagKind::Bool,
            Self::RateLimitPerMinute | Self::LogRetentionDays | Self::QueueRetentionDays => {
                FlagKind::Integer
            }
        }
    }

    /// Safe default when the row is absent or unreadable.
    #[must_use]
    pub fn default_value(self) -> FlagValue {
        match self {
            Self::PriceUpdatesEnabled
            | Self::StockMonitoringEnabled
            | Self::NewItemDetectionEnabled
            | Self::SignatureRequired => FlagValue::Bool(true),
            // The feed may never overwrite live stock unless an operator
            // explicitly turns this on.
            Self::StockUpdatesEnabled => FlagValue::Bool(false),
            Self::RateLimitPerMinute => FlagValue::Integer(100),
            Self::LogRetentionDays => FlagValue::Integer(30),
            Self::QueueRetentionDays => FlagValue::Integer(7),
        }
    }

    /// Operator-facing description seeded alongside the default.
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            Self::PriceUpdatesEnabled => "Apply marketplace price changes to the catalog",
            Self::StockMonitoringEnabled => "Record marketplace stock observations (tracking only)",
            Self::NewItemDetectionEnabled => "Create catalog products for unknown listings",
            Self::StockUpdatesEnabled => {
                "Allow the feed to directly overwrite live stock quantities"
            }
            Self::SignatureRequired => "Require a valid webhook signature at intake",
            Self::RateLimitPerMinute => "Requests admitted per source per minute",
            Self::LogRetentionDays => "Days of audit history kept by maintenance",
            Self::QueueRetentionDays => "Days of terminal queue history kept by maintenance",
        }
    }
}

impl std::fmt::Display for FlagKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from flag reads that cannot fall back to a default.
#[derive(Debug, Error)]
pub enum FlagError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("flag {0} has no stored value")]
    Missing(FlagKey),

    #[error(transparent)]
    Decode(#[from] FlagDecodeError),
}

/// Configuration for the flag gate.
#[derive(Debug, Clone)]
pub struct FeatureFlagsConfig {
    /// How long a cached entry stays fresh.
    pub cache_ttl: Duration,
}

impl Default for FeatureFlagsConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
        }
    }
}

/// The typed monitoring configuration bundle, so call sites never read raw
/// keys directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoringSettings {
    pub price_updates_enabled: bool,
    pub stock_monitoring_enabled: bool,
    pub new_item_detection_enabled: bool,
    pub stock_updates_enabled: bool,
    pub signature_required: bool,
    pub rate_limit_per_minute: i64,
}

/// A cached decoded flag.
struct CachedFlag {
    value: FlagValue,
    fetched_at: Instant,
}

/// Time-boxed cache in front of the durable config store.
pub struct FeatureFlags {
    store: Arc<dyn ConfigStore>,
    cache: DashMap<FlagKey, CachedFlag>,
    config: FeatureFlagsConfig,
}

impl FeatureFlags {
    /// Create a flag gate over `store`.
    pub fn new(store: Arc<dyn ConfigStore>, config: FeatureFlagsConfig) -> Self {
        Self {
            store,
            cache: DashMap::new(),
            config,
        }
    }

    /// Read a flag, falling back to its safe default when the row is
    /// absent, unreadable, or the store read fails.
    pub async fn get(&self, key: FlagKey) -> FlagValue {
        if let Some(cached) = self.cached(key) {
            return cached;
        }

        match self.store.get(key.as_str()).await {
            Ok(Some(row)) => match FlagValue::decode(key.kind(), &row.value) {
                Ok(value) => {
                    self.cache_put(key, value);
                    value
                }
                Err(e) => {
                    warn!(flag = %key, error = %e, "stored flag value unreadable, using default");
                    key.default_value()
                }
            },
            Ok(None) => key.default_value(),
            Err(e) => {
                warn!(flag = %key, error = %e, "flag store read failed, using default");
                key.default_value()
            }
        }
    }

    /// Read a flag, propagating store and decode failures instead of
    /// defaulting. For callers that must not act on a guess.
    pub async fn get_required(&self, key: FlagKey) -> Result<FlagValue, FlagError> {
        if let Some(cached) = self.cached(key) {
            return Ok(cached);
        }
        let row = self
            .store
            .get(key.as_str())
            .await?
            .ok_or(FlagError::Missing(key))?;
        let value = FlagValue::decode(key.kind(), &row.value)?;
        self.cache_put(key, value);
        Ok(value)
    }

    /// Read a boolean flag with its safe default.
    pub async fn get_bool(&self, key: FlagKey) -> bool {
        self.get(key).await.as_bool()
    }

    /// Read an integer flag with its safe default.
    pub async fn get_integer(&self, key: FlagKey) -> i64 {
        self.get(key).await.as_integer()
    }

    /// Read several flags at once.
    pub async fn get_many(&self, keys: &[FlagKey]) -> HashMap<FlagKey, FlagValue> {
        let mut values = HashMap::with_capacity(keys.len());
        for &key in keys {
            values.insert(key, self.get(key).await);
        }
        values
    }

    /// Write a flag through to the store and refresh the cache entry.
    pub async fn set(&self, key: FlagKey, value: FlagValue) -> Result<(), FlagError> {
        self.store
            .put(key.as_str(), &value.encode(), Some(key.description()))
            .await?;
        self.cache_put(key, value);
        Ok(())
    }

    /// The typed monitoring bundle.
    pub async fn monitoring_settings(&self) -> MonitoringSettings {
        MonitoringSettings {
            price_updates_enabled: self.get_bool(FlagKey::PriceUpdatesEnabled).await,
            stock_monitoring_enabled: self.get_bool(FlagKey::StockMonitoringEnabled).await,
            new_item_detection_enabled: self.get_bool(FlagKey::NewItemDetectionEnabled).await,
            stock_updates_enabled: self.get_bool(FlagKey::StockUpdatesEnabled).await,
            signature_required: self.get_bool(FlagKey::SignatureRequired).await,
            rate_limit_per_minute: self.get_integer(FlagKey::RateLimitPerMinute).await,
        }
    }

    /// Seed missing flag rows with their defaults. Idempotent: existing
    /// values are never overwritten. Returns how many rows were created.
    pub async fn ensure_defaults(&self) -> Result<usize, FlagError> {
        let mut created = 0;
        for key in FlagKey::ALL {
            let was_created = self
                .store
                .create_if_missing(
                    key.as_str(),
                    &key.default_value().encode(),
                    Some(key.description()),
                )
                .await?;
            if was_created {
                debug!(flag = %key, "seeded default flag value");
                created += 1;
            }
        }
        Ok(created)
    }

    /// Drop every cached entry, forcing the next reads through the store.
    pub fn invalidate(&self) {
        self.cache.clear();
    }

    fn cached(&self, key: FlagKey) -> Option<FlagValue> {
        let entry = self.cache.get(&key)?;
        if entry.fetched_at.elapsed() < self.config.cache_ttl {
            Some(entry.value)
        } else {
            drop(entry);
            self.cache.remove(&key);
            None
        }
    }

    fn cache_put(&self, key: FlagKey, value: FlagValue) {
        self.cache.insert(
            key,
            CachedFlag {
                value,
                fetched_at: Instant::now(),
            },
        );
    }
}

impl std::fmt::Debug for FeatureFlags {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureFlags")
            .field("cached", &self.cache.len())
            .field("cache_ttl", &self.config.cache_ttl)
            .finish_non_exhaustive()
    }
}
