//! Frame classification, expansion, and routing.
//!
//! One dispatcher instance owns the whole downstream pipeline: every inbound
//! frame is matched on its topic, composite events are expanded into one
//! attribute invocation per leaf, and each leaf flows through field
//! extraction, geo enrichment, and the contribution pipeline before the
//! next frame is read.

use crate::config::Config;
use crate::contrib::{ContributionPipeline, SIGHTING_MULTIPLIER};
use crate::geo::{GeoEnricher, GeoResolver};
use crate::rank::ContributionEvent;
use crate::store::{log_envelope, AggregateStore, Publisher};
use chrono::Utc;
use intelflow_core::{render_record, ContributionType, Frame, Topic, NETWORK_ACTIVITY_CATEGORY};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Threat level the upstream system uses for "undefined".
const UNDEFINED_THREAT_LEVEL: i64 = 4;

/// Counters accumulated over one dispatch run.
#[derive(Debug, Clone, Default)]
pub struct DispatchStats {
    /// Frames fed to the dispatcher.
    pub frames: usize,

    /// Event documents seen (direct or via generic dispatch).
    pub events: usize,

    /// Attribute-handler invocations, after expansion.
    pub attributes: usize,

    /// Sighting frames processed.
    pub sightings: usize,

    /// Keepalive frames processed.
    pub keepalives: usize,

    /// Frames acknowledged on log-only topics.
    pub log_only: usize,

    /// Contribution records produced.
    pub contributions: usize,

    /// Successful geo enrichments.
    pub geo_enriched: usize,
}

/// Routes frames to their handlers.
pub struct Dispatcher {
    config: Config,
    feed_name: String,
    publisher: Arc<dyn Publisher>,
    geo: GeoEnricher,
    contrib: ContributionPipeline,
    stats: DispatchStats,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        feed_name: impl Into<String>,
        store: Arc<dyn AggregateStore>,
        publisher: Arc<dyn Publisher>,
        resolver: Arc<dyn GeoResolver>,
    ) -> Self {
        let feed_name = feed_name.into();
        let geo = GeoEnricher::new(
            resolver,
            Arc::clone(&store),
            Arc::clone(&publisher),
            config.channel_map.clone(),
        );
        let contrib = ContributionPipeline::new(
            &config,
            feed_name.clone(),
            store,
            Arc::clone(&publisher),
        );
        Self {
            config,
            feed_name,
            publisher,
            geo,
            contrib,
            stats: DispatchStats::default(),
        }
    }

    /// Classify one frame and run it to completion.
    pub fn dispatch(&mut self, frame: &Frame) {
        self.stats.frames += 1;
        metrics::counter!("dispatch_frames_total").increment(1);

        match frame.topic {
            Topic::Generic => self.handle_generic(&frame.payload),
            Topic::Event => self.handle_event(&frame.payload),
            Topic::Keepalive => self.handle_keepalive(&frame.payload),
            Topic::Attribute => self.handle_attribute(&frame.payload),
            Topic::Sighting => self.handle_sighting(&frame.payload),
            Topic::Object | Topic::Organisation | Topic::User | Topic::Conversation => {
                self.handle_log_only(frame.topic)
            }
        }
    }

    /// Counters accumulated so far.
    pub fn stats(&self) -> &DispatchStats {
        &self.stats
    }

    /// Rolling recent contributors, most recent first.
    pub fn recent_contributors(&self) -> Vec<String> {
        self.contrib
            .recent_contributors()
            .map(str::to_string)
            .collect()
    }

    /// Generic feed entries route on content: only payloads carrying an
    /// Event object are forwarded.
    fn handle_generic(&mut self, payload: &Value) {
        if payload.get("Event").is_some() {
            self.handle_event(payload);
        } else {
            tracing::debug!("generic frame without an Event object, not forwarded");
        }
    }

    /// Expand an event into one attribute invocation per leaf.
    ///
    /// Each invocation receives the event context with the single attribute
    /// substituted in, so downstream handlers still see event-level fields
    /// such as the owning organisation.
    fn handle_event(&mut self, payload: &Value) {
        let Some(event) = payload.get("Event") else {
            tracing::debug!("event frame without an Event object");
            return;
        };
        self.stats.events += 1;

        match event.get("Attribute") {
            Some(Value::Array(attributes)) => {
                for attribute in attributes {
                    let context = with_attribute(payload, attribute);
                    self.handle_attribute(&context);
                }
            }
            Some(single) => {
                let context = with_attribute(payload, single);
                self.handle_attribute(&context);
            }
            None => {}
        }
    }

    fn handle_attribute(&mut self, context: &Value) {
        let Some(attribute) = context.get("Attribute") else {
            tracing::warn!("attribute frame without an Attribute object, dropped");
            return;
        };
        self.stats.attributes += 1;
        metrics::counter!("dispatch_attributes_total").increment(1);

        let record = render_record(
            context,
            &self.config.field_order,
            &self.config.field_separator,
        );

        let categ = attribute
            .get("category")
            .and_then(Value::as_str)
            .unwrap_or_default();

        if categ == NETWORK_ACTIVITY_CATEGORY {
            if let Some(value) = attribute.get("value").and_then(Value::as_str) {
                if self.geo.enrich(categ, value) {
                    self.stats.geo_enriched += 1;
                }
            }
        }

        let action = context
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();

        match context.pointer("/Event/Orgc/name").and_then(Value::as_str) {
            Some(org) => {
                let event = contribution_context(context, ContributionType::Attribute);
                self.contrib.handle(org, categ, action, 1, event);
                self.stats.contributions += 1;
            }
            None => tracing::debug!("attribute without an owning organisation, not scored"),
        }

        self.publish_log("Attribute", &record);
    }

    /// Sightings are valued higher than generic edits.
    fn handle_sighting(&mut self, payload: &Value) {
        self.stats.sightings += 1;
        metrics::counter!("dispatch_sightings_total").increment(1);

        let Some(org) = payload.get("org").and_then(Value::as_str) else {
            tracing::warn!("sighting without an organisation, dropped");
            return;
        };
        let categ = payload
            .get("categ")
            .and_then(Value::as_str)
            .unwrap_or_default();
        let action = payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or_default();

        let event = ContributionEvent {
            contrib_type: ContributionType::Sighting,
            event_timestamp: Utc::now().timestamp(),
            is_classified: false,
        };
        self.contrib
            .handle(org, categ, action, SIGHTING_MULTIPLIER, event);
        self.stats.contributions += 1;
    }

    fn handle_keepalive(&mut self, payload: &Value) {
        self.stats.keepalives += 1;
        metrics::counter!("dispatch_keepalives_total").increment(1);

        let uptime = payload.get("uptime").cloned().unwrap_or(Value::Null);
        self.publish_log("Keepalive", &vec![uptime]);
    }

    /// Reserved extension points: acknowledged, nothing aggregated.
    fn handle_log_only(&mut self, topic: Topic) {
        self.stats.log_only += 1;
        metrics::counter!("dispatch_log_only_total").increment(1);
        tracing::debug!(topic = %topic, "log-only topic acknowledged");
    }

    fn publish_log(&self, name: &str, content: &impl Serialize) {
        self.publisher.publish(
            &self.config.channel_log,
            log_envelope(name, content, &self.feed_name),
        );
        metrics::counter!("publish_envelopes_total").increment(1);
    }
}

/// Event context with the single attribute substituted at the top level.
fn with_attribute(payload: &Value, attribute: &Value) -> Value {
    let mut context = payload.clone();
    if let Value::Object(map) = &mut context {
        map.insert("Attribute".to_string(), attribute.clone());
    }
    context
}

/// Rank-relevant context pulled from the Event, when present.
fn contribution_context(context: &Value, contrib_type: ContributionType) -> ContributionEvent {
    let event = context.get("Event");
    let event_timestamp = event
        .and_then(|e| e.get("timestamp"))
        .and_then(lenient_i64)
        .unwrap_or_else(|| Utc::now().timestamp());
    let is_classified = event
        .and_then(|e| e.get("threat_level_id"))
        .and_then(lenient_i64)
        .is_some_and(|level| level != UNDEFINED_THREAT_LEVEL);

    ContributionEvent {
        contrib_type,
        event_timestamp,
        is_classified,
    }
}

/// Upstream serializes numbers as strings as often as not.
fn lenient_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::{GeoError, ResolvedLocation};
    use crate::store::{MemoryPublisher, MemoryStore};
    use intelflow_core::keys;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Resolver that counts invocations and never resolves.
    #[derive(Default)]
    struct CountingResolver {
        calls: AtomicUsize,
    }

    impl GeoResolver for CountingResolver {
        fn resolve(&self, ip: &str) -> Result<ResolvedLocation, GeoError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(GeoError::NotFound(ip.to_string()))
        }
    }

    struct Fixture {
        store: Arc<MemoryStore>,
        publisher: Arc<MemoryPublisher>,
        resolver: Arc<CountingResolver>,
        dispatcher: Dispatcher,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let publisher = Arc::new(MemoryPublisher::new());
        let resolver = Arc::new(CountingResolver::default());
        let dispatcher = Dispatcher::new(
            Config::default(),
            "test feed",
            Arc::clone(&store) as Arc<dyn AggregateStore>,
            Arc::clone(&publisher) as Arc<dyn Publisher>,
            Arc::clone(&resolver) as Arc<dyn GeoResolver>,
        );
        Fixture {
            store,
            publisher,
            resolver,
            dispatcher,
        }
    }

    fn event_payload(attributes: Value) -> Value {
        json!({
            "action": "add",
            "Event": {
                "id": "42",
                "info": "campaign",
                "timestamp": "1700000000",
                "threat_level_id": 1,
                "Orgc": {"name": "CIRCL"},
                "Attribute": attributes,
            }
        })
    }

    fn frame(topic: &str, payload: Value) -> Frame {
        Frame::parse(&format!("{topic} {payload}")).unwrap()
    }

    #[test]
    fn event_with_attribute_list_expands_one_invocation_per_element() {
        let mut f = fixture();
        let payload = event_payload(json!([
            {"category": "Other", "type": "text", "value": "a"},
            {"category": "Other", "type": "text", "value": "b"},
            {"category": "Other", "type": "text", "value": "c"},
        ]));
        f.dispatcher.dispatch(&frame("intel_json_event", payload));

        assert_eq!(f.dispatcher.stats().attributes, 3);
        assert_eq!(f.dispatcher.stats().contributions, 3);

        // Every expansion saw the event-level organisation
        let today = Utc::now().date_naive();
        let day_key = keys::day_bucket(keys::CONTRIB_DAY, today);
        assert_eq!(
            f.store.zscore(&day_key, "CIRCL"),
            Some(3.0 * Config::default().default_points as f64)
        );

        // One Attribute envelope per leaf, each with a distinct value column
        let logs = f.publisher.on_channel(&Config::default().channel_log);
        assert_eq!(logs.len(), 3);
        let rendered: Vec<String> = logs
            .iter()
            .map(|e| e["log"].as_str().unwrap().to_string())
            .collect();
        assert!(rendered[0].contains("\"a\""));
        assert!(rendered[1].contains("\"b\""));
        assert!(rendered[2].contains("\"c\""));
    }

    #[test]
    fn event_with_single_attribute_expands_once() {
        let mut f = fixture();
        let payload = event_payload(json!({"category": "Other", "type": "text", "value": "solo"}));
        f.dispatcher.dispatch(&frame("intel_json_event", payload));

        assert_eq!(f.dispatcher.stats().attributes, 1);
        assert_eq!(f.dispatcher.stats().contributions, 1);
    }

    #[test]
    fn event_without_attributes_does_no_further_work() {
        let mut f = fixture();
        let payload = json!({
            "Event": {"id": "7", "info": "empty", "Orgc": {"name": "CIRCL"}}
        });
        f.dispatcher.dispatch(&frame("intel_json_event", payload));

        assert_eq!(f.dispatcher.stats().events, 1);
        assert_eq!(f.dispatcher.stats().attributes, 0);
        assert!(f.publisher.published().is_empty());
    }

    #[test]
    fn generic_frames_route_on_content() {
        let mut f = fixture();
        let with_event = event_payload(json!([{"category": "Other", "value": "x"}]));
        f.dispatcher.dispatch(&frame("intel_json", with_event));
        assert_eq!(f.dispatcher.stats().events, 1);

        f.dispatcher
            .dispatch(&frame("intel_json", json!({"unrelated": true})));
        assert_eq!(f.dispatcher.stats().events, 1);
        assert_eq!(f.dispatcher.stats().frames, 2);
    }

    #[test]
    fn network_activity_invokes_the_resolver_exactly_once_per_attribute() {
        let mut f = fixture();
        let payload = event_payload(json!([
            {"category": "Network activity", "type": "ip-dst", "value": "198.51.100.7"},
            {"category": "Other", "type": "text", "value": "not an ip"},
        ]));
        f.dispatcher.dispatch(&frame("intel_json_event", payload));

        assert_eq!(f.resolver.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn sighting_scores_with_multiplier_two() {
        let mut f = fixture();
        let payload = json!({"org": "CIRCL", "categ": "Other", "action": "add"});
        f.dispatcher.dispatch(&frame("intel_json_sighting", payload));

        let today = Utc::now().date_naive();
        let day_key = keys::day_bucket(keys::CONTRIB_DAY, today);
        assert_eq!(
            f.store.zscore(&day_key, "CIRCL"),
            Some((Config::default().default_points * 2) as f64)
        );
        assert_eq!(f.dispatcher.stats().sightings, 1);

        // Contribution record went to the dedicated channel
        let contrib = f
            .publisher
            .on_channel(&Config::default().channel_last_contributor);
        assert_eq!(contrib.len(), 1);
        assert_eq!(contrib[0]["name"], "CONTRIBUTION");
    }

    #[test]
    fn keepalive_publishes_the_uptime_and_nothing_else() {
        let mut f = fixture();
        f.dispatcher
            .dispatch(&frame("intel_json_self", json!({"uptime": 3600})));

        let logs = f.publisher.on_channel(&Config::default().channel_log);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0]["name"], "Keepalive");
        assert_eq!(logs[0]["log"], "[3600]");

        assert!(!f.store.set_contains(keys::CONTRIB_ALL_ORG, "CIRCL"));
    }

    #[test]
    fn log_only_topics_are_acknowledged_without_side_effects() {
        let mut f = fixture();
        for topic in [
            "intel_json_object",
            "intel_json_organisation",
            "intel_json_user",
            "intel_json_conversation",
        ] {
            f.dispatcher.dispatch(&frame(topic, json!({"whatever": 1})));
        }

        assert_eq!(f.dispatcher.stats().log_only, 4);
        assert!(f.publisher.published().is_empty());
    }

    #[test]
    fn direct_attribute_frame_is_handled_like_an_expansion() {
        let mut f = fixture();
        let payload = json!({
            "action": "edit",
            "Event": {"id": "9", "info": "direct", "Orgc": {"name": "ORG2"}},
            "Attribute": {"category": "Other", "type": "text", "value": "direct"}
        });
        f.dispatcher.dispatch(&frame("intel_json_attribute", payload));

        assert_eq!(f.dispatcher.stats().attributes, 1);
        assert!(f.store.set_contains(keys::CONTRIB_ALL_ORG, "ORG2"));
    }

    #[test]
    fn classification_context_reads_event_fields() {
        let context = json!({
            "Event": {"timestamp": "1700000000", "threat_level_id": "2"}
        });
        let ev = contribution_context(&context, ContributionType::Attribute);
        assert_eq!(ev.event_timestamp, 1_700_000_000);
        assert!(ev.is_classified);

        let undefined = json!({
            "Event": {"timestamp": 1700000000, "threat_level_id": UNDEFINED_THREAT_LEVEL}
        });
        let ev = contribution_context(&undefined, ContributionType::Attribute);
        assert!(!ev.is_classified);

        // No event context: arrival time, unclassified
        let bare = json!({"Attribute": {}});
        let ev = contribution_context(&bare, ContributionType::Attribute);
        assert!(!ev.is_classified);
        assert!(ev.event_timestamp > 1_600_000_000);
    }
}
