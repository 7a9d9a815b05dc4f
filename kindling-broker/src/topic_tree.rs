//! Hierarchical topic index: a trie keyed by `/`-delimited path segments.
//!
//! Subscriptions are stored at the trie position reached by descending the
//! filter's own segments, treating `+` and `#` as ordinary (if special)
//! path components — the same trie a literal topic name would occupy.
//! Matching a published topic against the installed filters therefore
//! reduces to a single descent that, at each level, also tries the `+` and
//! `#` children alongside the exact-segment child. This mirrors the
//! single-writer discipline of the broker: the whole structure is owned
//! exclusively by the protocol worker, so no interior locking is needed.

use std::collections::HashMap;
use std::sync::Arc;

use kindling_core::qos::QoS;
use smallvec::SmallVec;

/// A subscriber entry living inside one topic node.
#[derive(Debug, Clone)]
pub struct Subscriber {
    pub qos: QoS,
}

#[derive(Debug, Default)]
struct TopicNode {
    subscribers: HashMap<Arc<str>, Subscriber>,
    children: HashMap<String, TopicNode>,
}

#[derive(Debug, Default)]
pub struct TopicTree {
    root: TopicNode,
}

impl TopicTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs (or replaces) `client_id`'s subscription to `filter` with
    /// `qos`. Returns `true` if this is a new subscription for that client
    /// at that filter.
    pub fn subscribe(&mut self, client_id: Arc<str>, filter: &str, qos: QoS) -> bool {
        let mut node = &mut self.root;
        for level in filter.split('/') {
            node = node.children.entry(level.to_string()).or_default();
        }

        node.subscribers.insert(client_id, Subscriber { qos }).is_none()
    }

    /// Removes `client_id`'s subscription to the exact filter `filter`.
    /// Returns `true` if a subscription existed and was removed.
    pub fn unsubscribe(&mut self, client_id: &str, filter: &str) -> bool {
        let mut node = &mut self.root;
        for level in filter.split('/') {
            match node.children.get_mut(level) {
                Some(child) => node = child,
                None => return false,
            }
        }

        node.subscribers.remove(client_id).is_some()
    }

    /// Removes every subscription held by `client_id`, across all filters.
    /// Used when a clean-session client disconnects (spec I3/I4).
    pub fn remove_client(&mut self, client_id: &str) {
        fn walk(node: &mut TopicNode, client_id: &str) {
            node.subscribers.remove(client_id);
            for child in node.children.values_mut() {
                walk(child, client_id);
            }
        }
        walk(&mut self.root, client_id);
    }

    /// Returns the `(client_id, subscribed_qos)` pairs of every subscriber
    /// whose filter matches `topic`, honoring `+` and `#` wildcards.
    pub fn matching_subscribers(&self, topic: &str) -> Vec<(Arc<str>, QoS)> {
        let levels: SmallVec<[&str; 8]> = topic.split('/').collect();
        let mut out = Vec::new();
        self.collect(&self.root, &levels, 0, &mut out);
        out
    }

    fn collect<'a>(
        &self,
        node: &TopicNode,
        levels: &SmallVec<[&'a str; 8]>,
        depth: usize,
        out: &mut Vec<(Arc<str>, QoS)>,
    ) {
        if depth == levels.len() {
            out.extend(node.subscribers.iter().map(|(id, sub)| (Arc::clone(id), sub.qos)));
            if let Some(hash) = node.children.get("#") {
                out.extend(hash.subscribers.iter().map(|(id, sub)| (Arc::clone(id), sub.qos)));
            }
            return;
        }

        let level = levels[depth];

        if let Some(child) = node.children.get(level) {
            self.collect(child, levels, depth + 1, out);
        }
        if level != "+" {
            if let Some(child) = node.children.get("+") {
                self.collect(child, levels, depth + 1, out);
            }
        }
        if let Some(hash) = node.children.get("#") {
            out.extend(hash.subscribers.iter().map(|(id, sub)| (Arc::clone(id), sub.qos)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> Arc<str> {
        Arc::from(s)
    }

    #[test]
    fn exact_match() {
        let mut tree = TopicTree::new();
        tree.subscribe(id("c1"), "a/b/c", QoS::AtMostOnce);

        let matches = tree.matching_subscribers("a/b/c");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].0.as_ref(), "c1");
    }

    #[test]
    fn single_level_wildcard_matches_one_segment() {
        let mut tree = TopicTree::new();
        tree.subscribe(id("c1"), "sport/tennis/+", QoS::AtMostOnce);

        assert_eq!(tree.matching_subscribers("sport/tennis/player1").len(), 1);
        assert_eq!(tree.matching_subscribers("sport/tennis/player1/ranking").len(), 0);
    }

    #[test]
    fn multi_level_wildcard_matches_any_depth() {
        let mut tree = TopicTree::new();
        tree.subscribe(id("c1"), "sport/#", QoS::AtLeastOnce);

        assert_eq!(tree.matching_subscribers("sport").len(), 1);
        assert_eq!(tree.matching_subscribers("sport/tennis/player1").len(), 1);
    }

    #[test]
    fn unsubscribe_removes_exact_filter_only() {
        let mut tree = TopicTree::new();
        tree.subscribe(id("c1"), "a/b", QoS::AtMostOnce);

        assert!(tree.unsubscribe("c1", "a/b"));
        assert!(!tree.unsubscribe("c1", "a/b"));
        assert_eq!(tree.matching_subscribers("a/b").len(), 0);
    }

    #[test]
    fn remove_client_clears_every_filter() {
        let mut tree = TopicTree::new();
        tree.subscribe(id("c1"), "a/b", QoS::AtMostOnce);
        tree.subscribe(id("c1"), "x/#", QoS::AtMostOnce);

        tree.remove_client("c1");

        assert_eq!(tree.matching_subscribers("a/b").len(), 0);
        assert_eq!(tree.matching_subscribers("x/y/z").len(), 0);
    }
}
