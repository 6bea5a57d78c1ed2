// src/state/traits.rs
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fmt;

/// Opaque backend key derived from slot identity and grouping dimensions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StateKey(Vec<u8>);

impl StateKey {
    /// Key for the stateful operation `kind` of `slot`, grouped by `dimensions`.
    ///
    /// The encoding is deterministic: equal inputs always produce equal keys.
    pub fn new(kind: &str, slot: &str, dimensions: &[Value]) -> Self {
        StateKey(json!([kind, slot, dimensions]).to_string().into_bytes())
    }

    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        StateKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Hex form, as used by the in-memory backend.
    pub fn to_hex(&self) -> String {
        hex::encode(&self.0)
    }
}

impl fmt::Display for StateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

/// Token bucket parameters for [`StateBackend::rate_limit_fetch`].
#[derive(Debug, Clone)]
pub struct RateLimitOptions {
    pub max_amount: i64,
    pub refill_time_ms: i64,
    pub refill_amount: i64,
    /// Units consumed by this call
    pub take: i64,
    pub at: DateTime<Utc>,
    pub strict: bool,
}

impl RateLimitOptions {
    /// Take one token from a bucket of `max_amount`, refilled fully per minute.
    pub fn take_one(max_amount: i64) -> Self {
        RateLimitOptions {
            max_amount,
            refill_time_ms: 60_000,
            refill_amount: max_amount,
            take: 1,
            at: Utc::now(),
            strict: false,
        }
    }
}

/// Conditional write mode for [`StateBackend::set`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SetMode {
    #[default]
    Always,
    /// Only when the key is absent (`NX`)
    IfAbsent,
    /// Only when the key is present (`XX`)
    IfPresent,
}

/// Key-value and aggregate store behind stateful slot kinds.
#[async_trait]
pub trait StateBackend: Send + Sync {
    // Rate limiting
    /// Amount available before consuming `opts.take` units.
    async fn rate_limit_fetch(&self, key: &StateKey, opts: &RateLimitOptions) -> anyhow::Result<i64>;

    // Counters and scalars
    async fn increment(&self, key: &StateKey) -> anyhow::Result<i64>;
    async fn get(&self, key: &StateKey) -> anyhow::Result<Option<String>>;
    async fn del(&self, keys: &[StateKey]) -> anyhow::Result<usize>;
    async fn set(&self, key: &StateKey, value: &str, mode: SetMode) -> anyhow::Result<bool>;
    async fn mget_numbers(&self, keys: &[StateKey]) -> anyhow::Result<Vec<Option<i64>>>;

    // Lists
    async fn get_list(&self, key: &StateKey) -> anyhow::Result<Vec<String>>;
    async fn list_push(&self, key: &StateKey, values: &[String]) -> anyhow::Result<()>;

    // Approximate cardinality
    async fn pfadd(&self, key: &StateKey, values: &[String]) -> anyhow::Result<()>;
    async fn pfcount(&self, keys: &[StateKey]) -> anyhow::Result<u64>;

    async fn expire(&self, key: &StateKey, seconds: u64) -> anyhow::Result<()>;
}
