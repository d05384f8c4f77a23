//! Aggregate store and notification facades.
//!
//! The dispatch pipeline never talks to a concrete backend: it issues the
//! narrow set of operations below and moves on. Every operation is
//! commutative and fire-and-forget — the core never reads a counter back,
//! so concurrent instances against a shared backend only need the backend's
//! own primitives to be atomic. Failures are the implementation's concern.
//!
//! [`MemoryStore`] is the in-process implementation: the daemon's default
//! backend and the test double for the pipeline, with enough inspection
//! surface to assert on aggregate state.

use chrono::Utc;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// Abstract operations the pipeline issues against the aggregate store.
pub trait AggregateStore: Send + Sync {
    /// Add `by` to `member`'s score under the sorted-set `key`.
    fn zincr(&self, key: &str, member: &str, by: f64);

    /// Add `member` to the unordered set `key`.
    fn sadd(&self, key: &str, member: &str);

    /// Insert `member` under `key`, scored by an epoch timestamp.
    fn zadd(&self, key: &str, member: &str, epoch: i64);

    /// Arm (or re-arm) an expiry on `key`.
    fn expire_in(&self, key: &str, ttl: Duration);

    /// Set a boolean flag key carrying its own expiry.
    fn set_flag(&self, key: &str, ttl: Duration);

    /// Add `by` to the plain counter `key`.
    fn incr(&self, key: &str, by: u64);

    /// Add a position-keyed entry to the geospatial index `key`.
    fn geo_add(&self, key: &str, lon: f64, lat: f64, member: &str);
}

/// Outbound notification channel.
pub trait Publisher: Send + Sync {
    /// Publish a JSON payload on `channel`.
    fn publish(&self, channel: &str, payload: Value);
}

/// Build the `{name, log, zmqName}` notification envelope.
///
/// `log` carries the JSON-serialized content, not the content itself: the
/// downstream consumers re-parse it per record.
pub fn log_envelope(name: &str, content: &impl serde::Serialize, feed_name: &str) -> Value {
    serde_json::json!({
        "name": name,
        "log": serde_json::to_string(content).unwrap_or_default(),
        "zmqName": feed_name,
    })
}

/// An entry in a geospatial index.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoEntry {
    pub lon: f64,
    pub lat: f64,
    pub member: String,
}

/// Expiry bookkeeping: the armed deadline plus the TTL that produced it.
#[derive(Debug, Clone, Copy)]
struct Expiry {
    deadline: i64,
    ttl: Duration,
}

#[derive(Default)]
struct MemoryState {
    zsets: HashMap<String, BTreeMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
    counters: HashMap<String, u64>,
    flags: HashSet<String>,
    geo: HashMap<String, Vec<GeoEntry>>,
    expiries: HashMap<String, Expiry>,
}

/// In-memory aggregate store.
///
/// All state lives behind a single mutex; expiry deadlines are honoured
/// lazily when a key is read back through the inspection accessors.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Score of `member` under the sorted-set `key`, if present.
    pub fn zscore(&self, key: &str, member: &str) -> Option<f64> {
        let inner = self.inner.lock();
        inner.zsets.get(key)?.get(member).copied()
    }

    /// Members of the sorted-set `key`, in member order.
    pub fn zmembers(&self, key: &str) -> Vec<String> {
        let inner = self.inner.lock();
        inner
            .zsets
            .get(key)
            .map(|z| z.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `member` is in the unordered set `key`.
    pub fn set_contains(&self, key: &str, member: &str) -> bool {
        let inner = self.inner.lock();
        inner.sets.get(key).is_some_and(|s| s.contains(member))
    }

    /// Current value of the plain counter `key` (0 when absent).
    pub fn counter(&self, key: &str) -> u64 {
        let inner = self.inner.lock();
        inner.counters.get(key).copied().unwrap_or(0)
    }

    /// Whether the flag `key` is set and not yet expired.
    pub fn flag(&self, key: &str) -> bool {
        let now = Utc::now().timestamp();
        let inner = self.inner.lock();
        if !inner.flags.contains(key) {
            return false;
        }
        match inner.expiries.get(key) {
            Some(exp) => exp.deadline > now,
            None => true,
        }
    }

    /// The TTL most recently armed on `key`, if any.
    pub fn ttl(&self, key: &str) -> Option<Duration> {
        let inner = self.inner.lock();
        inner.expiries.get(key).map(|exp| exp.ttl)
    }

    /// Entries of the geospatial index `key`.
    pub fn geo_entries(&self, key: &str) -> Vec<GeoEntry> {
        let inner = self.inner.lock();
        inner.geo.get(key).cloned().unwrap_or_default()
    }

    /// Drop every key whose expiry deadline has passed.
    pub fn purge_expired(&self) {
        let now = Utc::now().timestamp();
        let mut inner = self.inner.lock();
        let dead: Vec<String> = inner
            .expiries
            .iter()
            .filter(|(_, exp)| exp.deadline <= now)
            .map(|(k, _)| k.clone())
            .collect();
        for key in dead {
            inner.expiries.remove(&key);
            inner.flags.remove(&key);
            inner.zsets.remove(&key);
            inner.sets.remove(&key);
            inner.counters.remove(&key);
            inner.geo.remove(&key);
        }
    }
}

impl AggregateStore for MemoryStore {
    fn zincr(&self, key: &str, member: &str, by: f64) {
        let mut inner = self.inner.lock();
        *inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .entry(member.to_string())
            .or_insert(0.0) += by;
    }

    fn sadd(&self, key: &str, member: &str) {
        let mut inner = self.inner.lock();
        inner
            .sets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string());
    }

    fn zadd(&self, key: &str, member: &str, epoch: i64) {
        let mut inner = self.inner.lock();
        inner
            .zsets
            .entry(key.to_string())
            .or_default()
            .insert(member.to_string(), epoch as f64);
    }

    fn expire_in(&self, key: &str, ttl: Duration) {
        let deadline = Utc::now().timestamp() + ttl.as_secs() as i64;
        let mut inner = self.inner.lock();
        inner.expiries.insert(key.to_string(), Expiry { deadline, ttl });
    }

    fn set_flag(&self, key: &str, ttl: Duration) {
        let deadline = Utc::now().timestamp() + ttl.as_secs() as i64;
        let mut inner = self.inner.lock();
        inner.flags.insert(key.to_string());
        inner.expiries.insert(key.to_string(), Expiry { deadline, ttl });
    }

    fn incr(&self, key: &str, by: u64) {
        let mut inner = self.inner.lock();
        *inner.counters.entry(key.to_string()).or_insert(0) += by;
    }

    fn geo_add(&self, key: &str, lon: f64, lat: f64, member: &str) {
        let mut inner = self.inner.lock();
        inner.geo.entry(key.to_string()).or_default().push(GeoEntry {
            lon,
            lat,
            member: member.to_string(),
        });
    }
}

/// Publisher that buffers envelopes in memory, keyed by channel.
#[derive(Default)]
pub struct MemoryPublisher {
    published: Mutex<Vec<(String, Value)>>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every published payload, in publish order.
    pub fn published(&self) -> Vec<(String, Value)> {
        self.published.lock().clone()
    }

    /// Payloads published on one channel, in publish order.
    pub fn on_channel(&self, channel: &str) -> Vec<Value> {
        self.published
            .lock()
            .iter()
            .filter(|(c, _)| c == channel)
            .map(|(_, v)| v.clone())
            .collect()
    }
}

impl Publisher for MemoryPublisher {
    fn publish(&self, channel: &str, payload: Value) {
        self.published.lock().push((channel.to_string(), payload));
    }
}

/// Publisher that emits envelopes as structured log lines.
///
/// The fallback sink when no outbound file is configured.
#[derive(Default)]
pub struct TracingPublisher;

impl Publisher for TracingPublisher {
    fn publish(&self, channel: &str, payload: Value) {
        tracing::debug!(channel, %payload, "notification published");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zincr_accumulates() {
        let store = MemoryStore::new();
        store.zincr("CONTRIB_DAY:20240307", "CIRCL", 5.0);
        store.zincr("CONTRIB_DAY:20240307", "CIRCL", 2.0);
        assert_eq!(store.zscore("CONTRIB_DAY:20240307", "CIRCL"), Some(7.0));
        assert_eq!(store.zscore("CONTRIB_DAY:20240307", "other"), None);
    }

    #[test]
    fn zadd_overwrites_the_score() {
        let store = MemoryStore::new();
        store.zadd("CONTRIB_LAST:20240307", "CIRCL", 100);
        store.zadd("CONTRIB_LAST:20240307", "CIRCL", 200);
        assert_eq!(store.zscore("CONTRIB_LAST:20240307", "CIRCL"), Some(200.0));
    }

    #[test]
    fn sets_deduplicate() {
        let store = MemoryStore::new();
        store.sadd("CONTRIB_ALL_ORG", "CIRCL");
        store.sadd("CONTRIB_ALL_ORG", "CIRCL");
        assert!(store.set_contains("CONTRIB_ALL_ORG", "CIRCL"));
    }

    #[test]
    fn counters_accumulate() {
        let store = MemoryStore::new();
        store.incr("CONTRIB_ORG:CIRCL:points", 5);
        store.incr("CONTRIB_ORG:CIRCL:points", 10);
        assert_eq!(store.counter("CONTRIB_ORG:CIRCL:points"), 15);
    }

    #[test]
    fn flags_expire() {
        let store = MemoryStore::new();
        store.set_flag("k", Duration::from_secs(3600));
        assert!(store.flag("k"));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(3600)));

        // Already-past deadline reads as unset
        store.set_flag("gone", Duration::from_secs(0));
        assert!(!store.flag("gone"));
    }

    #[test]
    fn set_flag_rearms_the_ttl() {
        let store = MemoryStore::new();
        store.set_flag("k", Duration::from_secs(60));
        store.set_flag("k", Duration::from_secs(7200));
        assert_eq!(store.ttl("k"), Some(Duration::from_secs(7200)));
    }

    #[test]
    fn purge_drops_expired_keys_only() {
        let store = MemoryStore::new();
        store.zadd("old", "m", 1);
        store.expire_in("old", Duration::from_secs(0));
        store.zadd("fresh", "m", 1);
        store.expire_in("fresh", Duration::from_secs(3600));

        store.purge_expired();
        assert!(store.zmembers("old").is_empty());
        assert_eq!(store.zmembers("fresh"), vec!["m".to_string()]);
    }

    #[test]
    fn geo_entries_keep_positions() {
        let store = MemoryStore::new();
        store.geo_add("GEO_RAD:20240307", 2.3522, 48.8566, r#"{"categ":"Network activity"}"#);
        let entries = store.geo_entries("GEO_RAD:20240307");
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].lat, 48.8566);
        assert_eq!(entries[0].lon, 2.3522);
    }

    #[test]
    fn memory_publisher_filters_by_channel() {
        let publisher = MemoryPublisher::new();
        publisher.publish("a", serde_json::json!({"n": 1}));
        publisher.publish("b", serde_json::json!({"n": 2}));
        publisher.publish("a", serde_json::json!({"n": 3}));

        assert_eq!(publisher.published().len(), 3);
        assert_eq!(publisher.on_channel("a").len(), 2);
        assert_eq!(publisher.on_channel("b").len(), 1);
    }
}
