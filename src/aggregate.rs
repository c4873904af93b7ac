//! Streaming per-key aggregation.
//!
//! One `MessageAgg` per grouping key accumulates counters, online variance
//! for message sizes and inter-arrival gaps, and a bounded heavy-hitters
//! map over subject templates. Everything is O(1) per message (the top-k
//! eviction scans at most K entries) and nothing here performs I/O or
//! blocks, so disjoint key shards can be driven from separate workers
//! without any locking.

use chrono::{DateTime, FixedOffset};
use std::collections::HashMap;
use std::hash::Hash;

/// Default capacity of the per-key subject template tracker.
pub const DEFAULT_TOPK_SUBJECTS: usize = 64;

/// Numerically stable running mean and variance (Welford).
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    pub n: u64,
    pub mean: f64,
    m2: f64,
}

impl RunningStats {
    pub fn add(&mut self, x: f64) {
        self.n += 1;
        let delta = x - self.mean;
        self.mean += delta / self.n as f64;
        let delta2 = x - self.mean;
        self.m2 += delta * delta2;
    }

    /// Sample variance; 0 with fewer than two observations.
    pub fn variance(&self) -> f64 {
        if self.n > 1 {
            self.m2 / (self.n - 1) as f64
        } else {
            0.0
        }
    }

    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// Coefficient of variation; 0 when the mean is not positive.
    pub fn cv(&self) -> f64 {
        if self.mean > 0.0 {
            self.std_dev() / self.mean
        } else {
            0.0
        }
    }
}

/// Approximate count plus the first-seen original string for one template.
#[derive(Debug, Clone)]
pub struct PatternEntry {
    pub count: u64,
    pub sample: String,
}

/// Bounded heavy-hitters map over subject templates (Space-Saving).
///
/// Holds at most `k` templates. Tracked counts never underestimate the
/// true occurrence count, and `total - sum(tracked)` recovers the mass of
/// everything that was evicted or never tracked.
#[derive(Debug, Clone)]
pub struct TopKTracker {
    k: usize,
    patterns: HashMap<String, PatternEntry>,
}

impl TopKTracker {
    pub fn new(k: usize) -> Self {
        Self {
            k: k.max(1),
            patterns: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.patterns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.patterns.is_empty()
    }

    /// Record one occurrence of `template`. Empty templates are ignored.
    ///
    /// At capacity, the minimum-count entry is evicted and the newcomer
    /// inherits min+1 as its carry-forward error bound. Ties on the
    /// minimum break on the lexicographically smallest template so runs
    /// are reproducible regardless of map iteration order.
    pub fn add(&mut self, template: &str, sample: &str) {
        if template.is_empty() {
            return;
        }

        if let Some(entry) = self.patterns.get_mut(template) {
            entry.count += 1;
            return;
        }

        let sample = if sample.is_empty() { template } else { sample };

        if self.patterns.len() < self.k {
            self.patterns.insert(
                template.to_string(),
                PatternEntry {
                    count: 1,
                    sample: sample.to_string(),
                },
            );
            return;
        }

        let evict = self
            .patterns
            .iter()
            .min_by(|(ka, ea), (kb, eb)| ea.count.cmp(&eb.count).then_with(|| ka.cmp(kb)))
            .map(|(key, entry)| (key.clone(), entry.count))
            .expect("tracker at capacity is non-empty");

        self.patterns.remove(&evict.0);
        self.patterns.insert(
            template.to_string(),
            PatternEntry {
                count: evict.1 + 1,
                sample: sample.to_string(),
            },
        );
    }

    /// The `n` highest-count entries, count descending, template ascending
    /// among equals.
    pub fn top_items(&self, n: usize) -> Vec<(&str, &PatternEntry)> {
        let mut items: Vec<(&str, &PatternEntry)> = self
            .patterns
            .iter()
            .map(|(k, e)| (k.as_str(), e))
            .collect();
        items.sort_by(|(ka, ea), (kb, eb)| eb.count.cmp(&ea.count).then_with(|| ka.cmp(kb)));
        items.truncate(n);
        items
    }

    pub fn counts(&self) -> impl Iterator<Item = u64> + '_ {
        self.patterns.values().map(|e| e.count)
    }
}

impl Default for TopKTracker {
    fn default() -> Self {
        Self::new(DEFAULT_TOPK_SUBJECTS)
    }
}

/// Accumulated behavior for one grouping key.
#[derive(Debug, Clone)]
pub struct MessageAgg {
    pub messages: u64,
    pub total_bytes: u64,
    pub total_recipients: u64,
    /// Size multiplied by recipient count, summed.
    pub delivery_bytes: u64,
    /// Messages whose subject carried a reply/forward marker.
    pub responses: u64,
    pub last_seen: Option<DateTime<FixedOffset>>,
    /// Inter-arrival gaps in seconds.
    pub gap_stats: RunningStats,
    pub size_stats: RunningStats,
    pub patterns: TopKTracker,
}

impl MessageAgg {
    pub fn new(topk: usize) -> Self {
        Self {
            messages: 0,
            total_bytes: 0,
            total_recipients: 0,
            delivery_bytes: 0,
            responses: 0,
            last_seen: None,
            gap_stats: RunningStats::default(),
            size_stats: RunningStats::default(),
            patterns: TopKTracker::new(topk),
        }
    }

    /// Fold one message into the aggregate. Negative sizes are rejected
    /// outright; a recipient count below 1 is treated as 1. Out-of-order
    /// timestamps never produce a gap and never reset the gap series.
    #[allow(clippy::too_many_arguments)]
    pub fn add_message(
        &mut self,
        size: i64,
        template: &str,
        sample_subject: &str,
        is_response: bool,
        timestamp: Option<DateTime<FixedOffset>>,
        recipient_count: usize,
    ) {
        if size < 0 {
            return;
        }
        let size = size as u64;
        let rcpts = recipient_count.max(1) as u64;

        self.messages += 1;
        self.total_bytes += size;
        self.size_stats.add(size as f64);

        if is_response {
            self.responses += 1;
        }

        if let Some(ts) = timestamp {
            match self.last_seen {
                Some(prev) => {
                    if ts >= prev {
                        let gap = (ts - prev).num_milliseconds() as f64 / 1000.0;
                        self.gap_stats.add(gap);
                        self.last_seen = Some(ts);
                    }
                }
                None => self.last_seen = Some(ts),
            }
        }

        self.total_recipients += rcpts;
        self.delivery_bytes += size * rcpts;

        self.patterns.add(template, sample_subject);
    }
}

impl Default for MessageAgg {
    fn default() -> Self {
        Self::new(DEFAULT_TOPK_SUBJECTS)
    }
}

/// Lazily-populated map from grouping key to `MessageAgg`.
///
/// Exactly one aggregate exists per distinct key; insertion order never
/// affects the result. The factory fixes per-instance parameters such as
/// the template tracker capacity.
pub struct KeyedAggregator<K, F = fn() -> MessageAgg>
where
    K: Eq + Hash,
    F: Fn() -> MessageAgg,
{
    factory: F,
    data: HashMap<K, MessageAgg>,
}

impl<K: Eq + Hash> KeyedAggregator<K> {
    pub fn new() -> Self {
        KeyedAggregator {
            factory: MessageAgg::default as fn() -> MessageAgg,
            data: HashMap::new(),
        }
    }
}

impl<K: Eq + Hash> Default for KeyedAggregator<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, F> KeyedAggregator<K, F>
where
    K: Eq + Hash,
    F: Fn() -> MessageAgg,
{
    pub fn with_factory(factory: F) -> Self {
        KeyedAggregator {
            factory,
            data: HashMap::new(),
        }
    }

    pub fn get_or_create(&mut self, key: K) -> &mut MessageAgg {
        let KeyedAggregator { factory, data } = self;
        data.entry(key).or_insert_with(|| factory())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, &MessageAgg)> {
        self.data.iter()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<FixedOffset> {
        FixedOffset::east_opt(0)
            .unwrap()
            .timestamp_opt(1_700_000_000 + secs, 0)
            .unwrap()
    }

    #[test]
    fn test_running_stats_matches_two_pass() {
        let xs = [4.0, 7.0, 13.0, 16.0, 1.5, 9.25, 1024.0, 0.0];
        let mut rs = RunningStats::default();
        for x in xs {
            rs.add(x);
        }

        let mean = xs.iter().sum::<f64>() / xs.len() as f64;
        let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (xs.len() - 1) as f64;

        assert!((rs.mean - mean).abs() / mean.abs() < 1e-9);
        assert!((rs.variance() - var).abs() / var.abs() < 1e-9);
    }

    #[test]
    fn test_running_stats_degenerate() {
        let mut rs = RunningStats::default();
        assert_eq!(rs.variance(), 0.0);
        assert_eq!(rs.cv(), 0.0);
        rs.add(5.0);
        assert_eq!(rs.variance(), 0.0);
    }

    #[test]
    fn test_topk_counts_exact_under_capacity() {
        let mut t = TopKTracker::new(8);
        for _ in 0..5 {
            t.add("invoice {i}", "Invoice 1");
        }
        t.add("hello", "Hello");

        let top = t.top_items(10);
        assert_eq!(top[0].0, "invoice {i}");
        assert_eq!(top[0].1.count, 5);
        assert_eq!(top[0].1.sample, "Invoice 1");
        assert_eq!(top[1].1.count, 1);
    }

    #[test]
    fn test_topk_eviction_inherits_min_plus_one() {
        let mut t = TopKTracker::new(2);
        t.add("a", "A");
        t.add("a", "A");
        t.add("b", "B");
        // capacity reached; "c" evicts "b" (min count 1) and starts at 2
        t.add("c", "C");
        assert_eq!(t.len(), 2);
        let top = t.top_items(2);
        let c = top.iter().find(|(k, _)| *k == "c").unwrap();
        assert_eq!(c.1.count, 2);
    }

    #[test]
    fn test_topk_min_tie_breaks_lexicographically() {
        let mut t = TopKTracker::new(2);
        t.add("beta", "B");
        t.add("alpha", "A");
        // both at count 1; "alpha" is evicted first
        t.add("zed", "Z");
        assert!(t.top_items(2).iter().any(|(k, _)| *k == "beta"));
        assert!(t.top_items(2).iter().all(|(k, _)| *k != "alpha"));
    }

    #[test]
    fn test_topk_mass_conservation() {
        // sum(tracked) + tail == total inserts, whatever the eviction churn
        let mut t = TopKTracker::new(4);
        let mut total = 0u64;
        for i in 0..100 {
            let key = format!("template-{}", i % 13);
            t.add(&key, "sample");
            total += 1;
        }
        let tracked: u64 = t.counts().sum();
        assert!(t.len() <= 4);
        assert!(tracked <= total);
        let tail = total - tracked;
        assert_eq!(tracked + tail, total);
    }

    #[test]
    fn test_topk_ignores_empty_template() {
        let mut t = TopKTracker::new(4);
        t.add("", "Some subject");
        assert!(t.is_empty());
    }

    #[test]
    fn test_topk_sample_is_first_seen() {
        let mut t = TopKTracker::new(4);
        t.add("order {i}", "Order 1");
        t.add("order {i}", "Order 2");
        assert_eq!(t.top_items(1)[0].1.sample, "Order 1");
        // empty sample falls back to the template itself
        t.add("plain", "");
        let plain = t.top_items(4).into_iter().find(|(k, _)| *k == "plain").unwrap();
        assert_eq!(plain.1.sample, "plain");
    }

    #[test]
    fn test_add_message_counters() {
        let mut agg = MessageAgg::default();
        agg.add_message(1000, "invoice {i}", "Invoice 1", false, Some(ts(0)), 3);
        agg.add_message(2000, "invoice {i}", "Invoice 2", true, Some(ts(60)), 1);

        assert_eq!(agg.messages, 2);
        assert_eq!(agg.total_bytes, 3000);
        assert_eq!(agg.total_recipients, 4);
        assert_eq!(agg.delivery_bytes, 1000 * 3 + 2000);
        assert_eq!(agg.responses, 1);
        assert_eq!(agg.gap_stats.n, 1);
        assert!((agg.gap_stats.mean - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_add_message_rejects_negative_size() {
        let mut agg = MessageAgg::default();
        agg.add_message(-5, "t", "s", false, None, 1);
        assert_eq!(agg.messages, 0);
    }

    #[test]
    fn test_add_message_recipient_floor() {
        let mut agg = MessageAgg::default();
        agg.add_message(100, "t", "s", false, None, 0);
        assert_eq!(agg.total_recipients, 1);
        assert_eq!(agg.delivery_bytes, 100);
    }

    #[test]
    fn test_out_of_order_timestamps_never_go_negative() {
        let mut agg = MessageAgg::default();
        agg.add_message(1, "t", "s", false, Some(ts(100)), 1);
        // earlier timestamp: no gap recorded, series not reset
        agg.add_message(1, "t", "s", false, Some(ts(50)), 1);
        assert_eq!(agg.gap_stats.n, 0);
        // duplicate timestamp contributes a zero gap
        agg.add_message(1, "t", "s", false, Some(ts(100)), 1);
        assert_eq!(agg.gap_stats.n, 1);
        assert_eq!(agg.gap_stats.mean, 0.0);
        // and the series continues from there
        agg.add_message(1, "t", "s", false, Some(ts(160)), 1);
        assert_eq!(agg.gap_stats.n, 2);
        assert!(agg.gap_stats.mean >= 0.0);
    }

    #[test]
    fn test_missing_timestamp_skips_gap() {
        let mut agg = MessageAgg::default();
        agg.add_message(1, "t", "s", false, None, 1);
        agg.add_message(1, "t", "s", false, Some(ts(0)), 1);
        assert_eq!(agg.gap_stats.n, 0);
        agg.add_message(1, "t", "s", false, Some(ts(30)), 1);
        assert_eq!(agg.gap_stats.n, 1);
    }

    #[test]
    fn test_keyed_aggregator_one_agg_per_key() {
        let mut ka: KeyedAggregator<String> = KeyedAggregator::new();
        ka.get_or_create("a@x.com".to_string()).add_message(1, "t", "s", false, None, 1);
        ka.get_or_create("a@x.com".to_string()).add_message(1, "t", "s", false, None, 1);
        ka.get_or_create("b@x.com".to_string()).add_message(1, "t", "s", false, None, 1);

        assert_eq!(ka.len(), 2);
        let a = ka.iter().find(|(k, _)| k.as_str() == "a@x.com").unwrap().1;
        assert_eq!(a.messages, 2);
    }

    #[test]
    fn test_keyed_aggregator_factory_capacity() {
        let mut ka: KeyedAggregator<(String, String), _> =
            KeyedAggregator::with_factory(|| MessageAgg::new(2));
        let agg = ka.get_or_create(("a".into(), "b".into()));
        for i in 0..5 {
            agg.add_message(1, &format!("t{i}"), "s", false, None, 1);
        }
        assert!(agg.patterns.len() <= 2);
    }
}
