//! Recognition feed: bounded event log plus per-subject grouping.
//!
//! Groups only cover events still in the log. An event pushed out of the
//! log leaves its group too, and a group with no events left is dropped.

use chrono::{DateTime, Utc};
use relay_protocol::event::RecognitionEvent;
use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tracing::trace;

/// Default number of events kept in the log.
pub const DEFAULT_FEED_CAPACITY: usize = 100;

/// Default window for [`RecognitionFeed::is_recent`].
pub const DEFAULT_RECENT_THRESHOLD: Duration = Duration::from_secs(30);

/// Group key for events that arrived without a subject identity.
pub const UNIDENTIFIED_GROUP_KEY: &str = "unknown";

/// Logged events for one subject.
#[derive(Debug, Clone, PartialEq)]
pub struct RecognitionGroup {
    /// Subject id, or [`UNIDENTIFIED_GROUP_KEY`]
    pub key: String,
    /// Name from the oldest event held
    pub display_name: String,
    /// Earliest timestamp among held events
    pub first_seen: Option<DateTime<Utc>>,
    /// Timestamp of the latest event that carried one
    pub last_seen: Option<DateTime<Utc>>,
    /// Mean over held events with positive confidence; 0 when there are none
    pub mean_confidence: f64,
    positive_count: u64,
    events: VecDeque<RecognitionEvent>,
}

impl RecognitionGroup {
    fn new(key: String, display_name: String) -> Self {
        Self {
            key,
            display_name,
            first_seen: None,
            last_seen: None,
            mean_confidence: 0.0,
            positive_count: 0,
            events: VecDeque::new(),
        }
    }

    /// Events in arrival order (oldest first)
    pub fn events(&self) -> impl Iterator<Item = &RecognitionEvent> {
        self.events.iter()
    }

    /// Number of events held
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// Whether the group holds no events
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Whether this group collects events without identity
    #[must_use]
    pub fn is_unidentified(&self) -> bool {
        self.key == UNIDENTIFIED_GROUP_KEY
    }

    fn push(&mut self, event: RecognitionEvent) {
        if let Some(ts) = event.timestamp {
            let earliest = match self.first_seen {
                Some(first) => ts < first,
                None => true,
            };
            if earliest {
                self.first_seen = Some(ts);
            }
            self.last_seen = Some(ts);
        }

        if event.has_positive_confidence() {
            self.positive_count += 1;
            #[allow(clippy::cast_precision_loss)]
            let n = self.positive_count as f64;
            self.mean_confidence += (event.confidence - self.mean_confidence) / n;
        }

        self.events.push_back(event);
    }

    /// Drop the oldest event and recompute the aggregates over the rest.
    fn pop_oldest(&mut self) {
        self.events.pop_front();

        if let Some(oldest) = self.events.front() {
            self.display_name.clone_from(&oldest.display_name);
        }
        self.first_seen = self.events.iter().filter_map(|e| e.timestamp).min();
        self.last_seen = self.events.iter().rev().find_map(|e| e.timestamp);

        let (count, sum) = self
            .events
            .iter()
            .filter(|e| e.has_positive_confidence())
            .fold((0u64, 0.0), |(count, sum), e| (count + 1, sum + e.confidence));
        self.positive_count = count;
        #[allow(clippy::cast_precision_loss)]
        let mean = if count == 0 { 0.0 } else { sum / count as f64 };
        self.mean_confidence = mean;
    }
}

/// Aggregate counts over the event log.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FeedStats {
    pub total: usize,
    /// Events whose subject matched an enrolled identity
    pub recognized: usize,
    pub unknown: usize,
    /// Mean confidence over all logged events (absent counts as 0)
    pub mean_confidence: f64,
}

/// Ordered, bounded log of recognition events.
#[derive(Debug, Clone)]
pub struct RecognitionFeed {
    capacity: usize,
    log: VecDeque<RecognitionEvent>,
    groups: Vec<RecognitionGroup>,
    group_index: HashMap<String, usize>,
}

impl Default for RecognitionFeed {
    fn default() -> Self {
        Self::new(DEFAULT_FEED_CAPACITY)
    }
}

impl RecognitionFeed {
    /// Create a feed holding at most `capacity` events (minimum 1).
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            log: VecDeque::new(),
            groups: Vec::new(),
            group_index: HashMap::new(),
        }
    }

    /// Log capacity
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Record an event: newest first in the log, appended to its group.
    ///
    /// When the log is full the oldest event is dropped from the log and
    /// from its group.
    pub fn ingest(&mut self, event: RecognitionEvent) {
        let key = group_key(&event);

        let index = match self.group_index.get(&key) {
            Some(&index) => index,
            None => {
                let index = self.groups.len();
                self.groups
                    .push(RecognitionGroup::new(key.clone(), event.display_name.clone()));
                self.group_index.insert(key.clone(), index);
                index
            }
        };

        trace!(
            target: "client.feed",
            subject = %key,
            confidence = event.confidence,
            "Recognition ingested"
        );

        if let Some(group) = self.groups.get_mut(index) {
            group.push(event.clone());
        }

        self.log.push_front(event);
        while self.log.len() > self.capacity {
            if let Some(evicted) = self.log.pop_back() {
                self.evict(&evicted);
            }
        }
    }

    /// Remove an event that left the log from its group.
    fn evict(&mut self, evicted: &RecognitionEvent) {
        let key = group_key(evicted);
        let Some(&index) = self.group_index.get(&key) else {
            return;
        };
        let Some(group) = self.groups.get_mut(index) else {
            return;
        };

        // The log drops its oldest event, which is also the group's oldest
        group.pop_oldest();
        if group.is_empty() {
            self.groups.remove(index);
            self.group_index = self
                .groups
                .iter()
                .enumerate()
                .map(|(i, g)| (g.key.clone(), i))
                .collect();
            trace!(target: "client.feed", subject = %key, "Group dropped");
        }
    }

    /// Whether an event happened within `threshold` of now.
    #[must_use]
    pub fn is_recent(event: &RecognitionEvent, threshold: Duration) -> bool {
        Self::is_recent_at(event, threshold, Utc::now())
    }

    /// Whether an event happened within `threshold` of `now`. Events without
    /// a timestamp are never recent.
    #[must_use]
    pub fn is_recent_at(event: &RecognitionEvent, threshold: Duration, now: DateTime<Utc>) -> bool {
        let Some(timestamp) = event.timestamp else {
            return false;
        };
        let Ok(threshold) = chrono::Duration::from_std(threshold) else {
            return true;
        };
        now.signed_duration_since(timestamp) <= threshold
    }

    /// Groups in first-seen order.
    #[must_use]
    pub fn grouped_view(&self) -> &[RecognitionGroup] {
        &self.groups
    }

    /// Group for one key
    #[must_use]
    pub fn group(&self, key: &str) -> Option<&RecognitionGroup> {
        self.group_index
            .get(key)
            .and_then(|&index| self.groups.get(index))
    }

    /// Up to `limit` newest events, newest first.
    pub fn recent(&self, limit: usize) -> impl Iterator<Item = &RecognitionEvent> {
        self.log.iter().take(limit)
    }

    /// Number of logged events
    #[must_use]
    pub fn len(&self) -> usize {
        self.log.len()
    }

    /// Whether the log is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.log.is_empty()
    }

    /// Counts over the current log.
    #[must_use]
    pub fn stats(&self) -> FeedStats {
        let total = self.log.len();
        if total == 0 {
            return FeedStats::default();
        }

        let recognized = self.log.iter().filter(|e| e.matched).count();
        let sum: f64 = self.log.iter().map(|e| e.confidence).sum();
        #[allow(clippy::cast_precision_loss)]
        let mean_confidence = sum / total as f64;

        FeedStats {
            total,
            recognized,
            unknown: total - recognized,
            mean_confidence,
        }
    }

    /// Drop every event and group.
    pub fn clear(&mut self) {
        self.log.clear();
        self.groups.clear();
        self.group_index.clear();
    }
}

fn group_key(event: &RecognitionEvent) -> String {
    if event.subject_id.is_generated() {
        UNIDENTIFIED_GROUP_KEY.to_string()
    } else {
        event.subject_id.as_str().to_string()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use common::types::SubjectId;

    fn event(id: &str, confidence: f64) -> RecognitionEvent {
        RecognitionEvent::new(SubjectId::known(id), format!("Student {id}")).with_confidence(confidence)
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_792_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_mean_confidence_ignores_zero() {
        let mut feed = RecognitionFeed::default();
        feed.ingest(event("S123", 0.8));
        feed.ingest(event("S123", 0.6));

        let mean = feed.group("S123").unwrap().mean_confidence;
        assert!((mean - 0.7).abs() < 1e-9);

        feed.ingest(event("S123", 0.0));
        let group = feed.group("S123").unwrap();
        assert!((group.mean_confidence - 0.7).abs() < 1e-9);
        assert_eq!(group.len(), 3);
    }

    #[test]
    fn test_group_without_positive_confidence_has_zero_mean() {
        let mut feed = RecognitionFeed::default();
        feed.ingest(event("S1", 0.0));
        assert!(feed.group("S1").unwrap().mean_confidence.abs() < f64::EPSILON);
    }

    #[test]
    fn test_log_is_newest_first_and_bounded() {
        let mut feed = RecognitionFeed::new(3);
        for i in 0..5 {
            feed.ingest(event(&format!("S{i}"), 0.5));
        }

        let ids: Vec<&str> = feed.recent(10).map(|e| e.subject_id.as_str()).collect();
        assert_eq!(ids, vec!["S4", "S3", "S2"]);
        assert_eq!(feed.len(), 3);

        let first_two: Vec<&str> = feed.recent(2).map(|e| e.subject_id.as_str()).collect();
        assert_eq!(first_two, vec!["S4", "S3"]);
    }

    #[test]
    fn test_group_mean_covers_only_logged_events() {
        let mut feed = RecognitionFeed::new(2);
        feed.ingest(event("S1", 0.9));
        feed.ingest(event("S1", 0.1));
        feed.ingest(event("S1", 0.1));

        let group = feed.group("S1").unwrap();
        assert_eq!(group.len(), 2);
        assert!(group.events().all(|e| (e.confidence - 0.1).abs() < 1e-9));
        assert!((group.mean_confidence - 0.1).abs() < 1e-9);
    }

    #[test]
    fn test_groups_are_bounded_by_log() {
        let mut feed = RecognitionFeed::new(3);
        for i in 0..1000 {
            feed.ingest(event(&format!("S{i}"), 0.5));
        }

        assert_eq!(feed.len(), 3);
        let keys: Vec<&str> = feed.grouped_view().iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["S997", "S998", "S999"]);
        assert!(feed.group("S0").is_none());
        assert_eq!(feed.group("S998").unwrap().len(), 1);
    }

    #[test]
    fn test_evicted_event_updates_group_bounds() {
        let mut feed = RecognitionFeed::new(3);
        feed.ingest(event("A", 0.9).with_timestamp(at(0)));
        feed.ingest(event("B", 0.5).with_timestamp(at(1)));
        feed.ingest(event("A", 0.0).with_timestamp(at(2)));
        feed.ingest(event("B", 0.5).with_timestamp(at(3)));

        // A's first event left the log; only the zero-confidence one remains
        let group = feed.group("A").unwrap();
        assert_eq!(group.len(), 1);
        assert_eq!(group.first_seen, Some(at(2)));
        assert_eq!(group.last_seen, Some(at(2)));
        assert!(group.mean_confidence.abs() < f64::EPSILON);

        let keys: Vec<&str> = feed.grouped_view().iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);
        assert_eq!(feed.group("B").unwrap().len(), 2);
    }

    #[test]
    fn test_groups_preserve_arrival_order() {
        let mut feed = RecognitionFeed::default();
        feed.ingest(event("A", 0.9).with_timestamp(at(0)));
        feed.ingest(event("B", 0.5).with_timestamp(at(1)));
        feed.ingest(event("A", 0.7).with_timestamp(at(2)));

        let keys: Vec<&str> = feed.grouped_view().iter().map(|g| g.key.as_str()).collect();
        assert_eq!(keys, vec!["A", "B"]);

        let group = feed.group("A").unwrap();
        let stamps: Vec<_> = group.events().map(|e| e.timestamp).collect();
        assert_eq!(stamps, vec![Some(at(0)), Some(at(2))]);
        assert_eq!(group.first_seen, Some(at(0)));
        assert_eq!(group.last_seen, Some(at(2)));
        assert_eq!(group.display_name, "Student A");
    }

    #[test]
    fn test_unidentified_events_share_a_group() {
        let mut feed = RecognitionFeed::default();
        feed.ingest(RecognitionEvent::new(SubjectId::generated(), RecognitionEvent::UNKNOWN_NAME));
        feed.ingest(RecognitionEvent::new(SubjectId::generated(), RecognitionEvent::UNKNOWN_NAME));

        assert_eq!(feed.grouped_view().len(), 1);
        let group = feed.group(UNIDENTIFIED_GROUP_KEY).unwrap();
        assert!(group.is_unidentified());
        assert_eq!(group.len(), 2);
    }

    #[test]
    fn test_is_recent_threshold() {
        let now = at(100);
        let threshold = DEFAULT_RECENT_THRESHOLD;

        let fresh = event("S1", 0.9).with_timestamp(at(100 - 29));
        let stale = event("S1", 0.9).with_timestamp(at(100 - 31));
        let edge = event("S1", 0.9).with_timestamp(at(100 - 30));
        let undated = event("S1", 0.9);

        assert!(RecognitionFeed::is_recent_at(&fresh, threshold, now));
        assert!(!RecognitionFeed::is_recent_at(&stale, threshold, now));
        assert!(RecognitionFeed::is_recent_at(&edge, threshold, now));
        assert!(!RecognitionFeed::is_recent_at(&undated, threshold, now));
    }

    #[test]
    fn test_stats() {
        let mut feed = RecognitionFeed::default();
        assert_eq!(feed.stats(), FeedStats::default());

        let mut matched = event("S1", 0.9);
        matched.matched = true;
        feed.ingest(matched);
        feed.ingest(event("S2", 0.3));
        feed.ingest(event("S3", 0.0));

        let stats = feed.stats();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.recognized, 1);
        assert_eq!(stats.unknown, 2);
        assert!((stats.mean_confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn test_clear() {
        let mut feed = RecognitionFeed::default();
        feed.ingest(event("S1", 0.9));
        feed.clear();

        assert!(feed.is_empty());
        assert!(feed.grouped_view().is_empty());
        assert!(feed.group("S1").is_none());
    }
}
