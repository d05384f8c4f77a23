//! Topic enumeration and inbound frame parsing.
//!
//! Every inbound message is a single frame of the form
//! `"<topic> <jsonPayload>"`: the topic is a whitespace-delimited token, the
//! remainder is a JSON document. The topic identifies the domain-object kind
//! and must be one of the nine enumerated values below — an unknown topic is
//! a hard error, never a default route.

use crate::error::{Error, Result};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// Domain-object kind tag carried by every inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Generic feed entry: payload content decides the route.
    Generic,
    /// A full event document, possibly carrying many attributes.
    Event,
    /// Publisher keepalive (uptime report).
    Keepalive,
    /// A single attribute change.
    Attribute,
    /// A sighting report.
    Sighting,
    /// Object change. Log-only.
    Object,
    /// Organisation change. Log-only.
    Organisation,
    /// User change. Log-only.
    User,
    /// Conversation change. Log-only.
    Conversation,
}

impl Topic {
    /// All topics, in wire order.
    pub const ALL: [Topic; 9] = [
        Topic::Generic,
        Topic::Event,
        Topic::Keepalive,
        Topic::Attribute,
        Topic::Sighting,
        Topic::Object,
        Topic::Organisation,
        Topic::User,
        Topic::Conversation,
    ];

    /// The wire string for this topic.
    pub fn as_str(&self) -> &'static str {
        match self {
            Topic::Generic => "intel_json",
            Topic::Event => "intel_json_event",
            Topic::Keepalive => "intel_json_self",
            Topic::Attribute => "intel_json_attribute",
            Topic::Sighting => "intel_json_sighting",
            Topic::Object => "intel_json_object",
            Topic::Organisation => "intel_json_organisation",
            Topic::User => "intel_json_user",
            Topic::Conversation => "intel_json_conversation",
        }
    }

    /// Whether this topic is acknowledged without any aggregation.
    pub fn is_log_only(&self) -> bool {
        matches!(
            self,
            Topic::Object | Topic::Organisation | Topic::User | Topic::Conversation
        )
    }
}

impl FromStr for Topic {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "intel_json" => Ok(Topic::Generic),
            "intel_json_event" => Ok(Topic::Event),
            "intel_json_self" => Ok(Topic::Keepalive),
            "intel_json_attribute" => Ok(Topic::Attribute),
            "intel_json_sighting" => Ok(Topic::Sighting),
            "intel_json_object" => Ok(Topic::Object),
            "intel_json_organisation" => Ok(Topic::Organisation),
            "intel_json_user" => Ok(Topic::User),
            "intel_json_conversation" => Ok(Topic::Conversation),
            other => Err(Error::UnknownTopic(other.to_string())),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A split inbound frame: topic tag plus parsed JSON payload.
#[derive(Debug, Clone)]
pub struct Frame {
    pub topic: Topic,
    pub payload: Value,
}

impl Frame {
    /// Split a raw frame into topic and payload.
    ///
    /// The split is on the first whitespace only — the payload may contain
    /// any amount of whitespace of its own.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        let (topic, rest) = raw
            .split_once(char::is_whitespace)
            .ok_or_else(|| Error::MalformedFrame(format!("no payload after topic: {raw:?}")))?;

        let topic = topic.parse()?;
        let payload = serde_json::from_str(rest.trim_start())?;

        Ok(Self { topic, payload })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn topic_round_trips_through_wire_strings() {
        for topic in Topic::ALL {
            assert_eq!(topic.as_str().parse::<Topic>().unwrap(), topic);
        }
    }

    #[test]
    fn unknown_topic_is_rejected() {
        let err = "intel_json_widget".parse::<Topic>().unwrap_err();
        assert!(matches!(err, Error::UnknownTopic(t) if t == "intel_json_widget"));
    }

    #[test]
    fn log_only_topics() {
        assert!(Topic::Organisation.is_log_only());
        assert!(Topic::User.is_log_only());
        assert!(Topic::Conversation.is_log_only());
        assert!(Topic::Object.is_log_only());
        assert!(!Topic::Event.is_log_only());
        assert!(!Topic::Sighting.is_log_only());
    }

    #[test]
    fn frame_splits_on_first_whitespace_only() {
        let frame = Frame::parse(r#"intel_json_event {"Event": {"info": "two words here"}}"#).unwrap();
        assert_eq!(frame.topic, Topic::Event);
        assert_eq!(frame.payload, json!({"Event": {"info": "two words here"}}));
    }

    #[test]
    fn frame_without_payload_is_malformed() {
        let err = Frame::parse("intel_json_event").unwrap_err();
        assert!(matches!(err, Error::MalformedFrame(_)));
    }

    #[test]
    fn frame_with_invalid_json_is_an_error() {
        let err = Frame::parse("intel_json_event {not json").unwrap_err();
        assert!(matches!(err, Error::Json(_)));
    }

    #[test]
    fn frame_with_unknown_topic_is_an_error() {
        let err = Frame::parse(r#"totally_unknown {"a": 1}"#).unwrap_err();
        assert!(matches!(err, Error::UnknownTopic(_)));
    }
}
