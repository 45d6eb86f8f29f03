//! Log filters for `logs` subscriptions.
//!
//! Filters arrive in the loose shape clients send (`address` as a string or
//! an array, each topic position as `null`, a string or an array) and are
//! normalized once, at subscribe time, into lowercase string sets. Matching
//! never looks at raw JSON.

use hlgate_rpc::Log;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;

/// Canonical log filter.
///
/// An empty `addresses` set accepts any address. A `None` or empty topic
/// position accepts any topic at that index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LogFilter {
    pub addresses: HashSet<String>,
    pub topics: Vec<Option<HashSet<String>>>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    fn into_set(self) -> HashSet<String> {
        match self {
            OneOrMany::One(s) => HashSet::from([s.to_lowercase()]),
            OneOrMany::Many(items) => items.into_iter().map(|s| s.to_lowercase()).collect(),
        }
    }
}

#[derive(Deserialize)]
struct RawLogFilter {
    #[serde(default)]
    address: Option<OneOrMany>,
    #[serde(default)]
    topics: Option<Vec<Option<OneOrMany>>>,
}

impl LogFilter {
    /// Parse a client-supplied filter object
    pub fn parse(value: &Value) -> Result<Self, serde_json::Error> {
        let raw = RawLogFilter::deserialize(value)?;

        Ok(Self {
            addresses: raw.address.map(OneOrMany::into_set).unwrap_or_default(),
            topics: raw
                .topics
                .unwrap_or_default()
                .into_iter()
                .map(|position| position.map(OneOrMany::into_set))
                .collect(),
        })
    }

    /// Whether `log` passes this filter
    pub fn matches(&self, log: &Log) -> bool {
        if !self.addresses.is_empty() && !self.addresses.contains(&log.address.to_lowercase()) {
            return false;
        }

        for (i, position) in self.topics.iter().enumerate() {
            let Some(accepted) = position else { continue };
            if accepted.is_empty() {
                continue;
            }
            match log.topics.get(i) {
                Some(topic) if accepted.contains(&topic.to_lowercase()) => {}
                _ => return false,
            }
        }

        true
    }
}

/// Match `log` against an optional filter; no filter matches every log
pub fn matches(log: &Log, filter: Option<&LogFilter>) -> bool {
    filter.map_or(true, |f| f.matches(log))
}

/// Effective filter stored with a subscription
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SubscriptionFilter {
    /// No filter supplied
    #[default]
    All,
    Log(LogFilter),
    /// Supplied but unparseable; matches nothing
    Invalid,
}

impl SubscriptionFilter {
    pub fn from_params(params: Option<&Value>) -> Self {
        match params {
            None | Some(Value::Null) => SubscriptionFilter::All,
            Some(value) => match LogFilter::parse(value) {
                Ok(filter) => SubscriptionFilter::Log(filter),
                Err(_) => SubscriptionFilter::Invalid,
            },
        }
    }

    pub fn matches(&self, log: &Log) -> bool {
        match self {
            SubscriptionFilter::All => true,
            SubscriptionFilter::Log(filter) => filter.matches(log),
            SubscriptionFilter::Invalid => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn log(address: &str, topics: &[&str]) -> Log {
        Log {
            address: address.to_string(),
            topics: topics.iter().map(|t| t.to_string()).collect(),
            ..Default::default()
        }
    }

    fn filter(value: Value) -> LogFilter {
        LogFilter::parse(&value).unwrap()
    }

    #[test]
    fn test_no_filter_matches_everything() {
        assert!(matches(&log("0x1", &[]), None));
        assert!(matches(&log("0xdead", &["0xa", "0xb"]), None));
    }

    #[test]
    fn test_address_is_case_insensitive() {
        let f = filter(json!({"address": "0xabc"}));
        assert!(f.matches(&log("0xABC", &[])));

        let f = filter(json!({"address": "0xABC"}));
        assert!(f.matches(&log("0xabc", &[])));
        assert!(!f.matches(&log("0xabd", &[])));
    }

    #[test]
    fn test_address_array() {
        let f = filter(json!({"address": ["0x1", "0x2"]}));
        assert!(f.matches(&log("0x2", &[])));
        assert!(!f.matches(&log("0x3", &[])));
    }

    #[test]
    fn test_topic_mismatch() {
        let f = filter(json!({"topics": ["0xdef"]}));
        assert!(!f.matches(&log("0x1", &["0xother"])));
    }

    #[test]
    fn test_wildcard_position() {
        let f = filter(json!({"topics": [null, "0xaaa"]}));
        assert!(f.matches(&log("0x1", &["anything", "0xaaa"])));
        assert!(f.matches(&log("0x1", &["anything", "0xAAA"])));
        assert!(!f.matches(&log("0x1", &["anything", "0xbbb"])));
    }

    #[test]
    fn test_empty_topic_array_is_wildcard() {
        let f = filter(json!({"topics": [[], "0xaaa"]}));
        assert!(f.matches(&log("0x1", &["x", "0xaaa"])));
    }

    #[test]
    fn test_or_within_position() {
        let f = filter(json!({"topics": [["0xa", "0xb"]]}));
        assert!(f.matches(&log("0x1", &["0xb"])));
        assert!(!f.matches(&log("0x1", &["0xc"])));
    }

    #[test]
    fn test_more_positions_than_log_topics() {
        let f = filter(json!({"topics": ["0xa", "0xb"]}));
        assert!(!f.matches(&log("0x1", &["0xa"])));

        // trailing wildcards do not require topics to be present
        let f = filter(json!({"topics": ["0xa", null]}));
        assert!(f.matches(&log("0x1", &["0xa"])));
    }

    #[test]
    fn test_address_and_topics_combined() {
        let f = filter(json!({"address": "0x1", "topics": ["0xa"]}));
        assert!(f.matches(&log("0x1", &["0xa"])));
        assert!(!f.matches(&log("0x2", &["0xa"])));
        assert!(!f.matches(&log("0x1", &["0xb"])));
    }

    #[test]
    fn test_unrelated_fields_are_ignored() {
        let f = filter(json!({"fromBlock": "latest", "address": "0x1"}));
        assert_eq!(f.addresses.len(), 1);
        assert!(f.topics.is_empty());
    }

    #[test]
    fn test_subscription_filter_from_params() {
        let any = log("0x9", &["0x1"]);

        assert_eq!(SubscriptionFilter::from_params(None), SubscriptionFilter::All);
        assert_eq!(SubscriptionFilter::from_params(Some(&Value::Null)), SubscriptionFilter::All);
        assert!(SubscriptionFilter::from_params(Some(&json!({}))).matches(&any));

        let invalid = SubscriptionFilter::from_params(Some(&json!({"address": 42})));
        assert_eq!(invalid, SubscriptionFilter::Invalid);
        assert!(!invalid.matches(&any));

        let invalid = SubscriptionFilter::from_params(Some(&json!("0x9")));
        assert!(!invalid.matches(&any));
    }
}
