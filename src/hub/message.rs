//! Messages routed through the hub

use std::collections::BTreeSet;

use bytes::Bytes;

/// A payload to deliver to subscribers
///
/// Cheap to clone: `Bytes` is reference counted, so every subscriber shares
/// the same allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Payload sent verbatim to each subscriber
    pub data: Bytes,
    /// Topic filter; `None` means every subscriber receives it
    pub topic: Option<String>,
}

impl Message {
    /// A message for every subscriber regardless of topics followed
    pub fn broadcast(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            topic: None,
        }
    }

    /// A message for subscribers following `topic`
    ///
    /// An empty topic is treated as a broadcast.
    pub fn to_topic(data: impl Into<Bytes>, topic: &str) -> Self {
        Self {
            data: data.into(),
            topic: (!topic.is_empty()).then(|| topic.to_string()),
        }
    }

    /// Whether this message goes to every subscriber
    pub fn is_broadcast(&self) -> bool {
        self.topic.is_none()
    }

    /// Whether a subscriber following `topics` should receive this message
    pub fn is_for(&self, topics: &BTreeSet<String>) -> bool {
        match &self.topic {
            None => true,
            Some(topic) => topics.contains(topic),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topics(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|t| t.to_string()).collect()
    }

    #[test]
    fn test_empty_topic_is_broadcast() {
        let msg = Message::to_topic("x", "");
        assert!(msg.is_broadcast());
        assert!(msg.is_for(&topics(&[])));
        assert!(msg.is_for(&topics(&["a"])));
    }

    #[test]
    fn test_topic_filter() {
        let msg = Message::to_topic("x", "t");
        assert!(!msg.is_broadcast());
        assert!(msg.is_for(&topics(&["s", "t"])));
        assert!(!msg.is_for(&topics(&["s"])));
        assert!(!msg.is_for(&topics(&[])));
    }
}
