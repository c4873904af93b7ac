//! Derived per-key report features.

use crate::aggregate::MessageAgg;
use crate::scoring::normalized_entropy;

/// Snapshot of derived features for one aggregated key.
#[derive(Debug, Clone)]
pub struct AggMetrics {
    pub total_messages: u64,
    pub messages_per_day: f64,
    pub total_bytes: u64,
    pub avg_size: f64,
    pub total_recipients: u64,
    pub delivery_bytes: u64,
    pub reply_ratio: f64,
    /// Top templates as (template, approximate count, sample subject),
    /// count descending.
    pub top_items: Vec<(String, u64, String)>,
    pub top_mass: f64,
    pub top3_mass: f64,
    pub top1_ratio: f64,
    pub entropy: f64,
    pub gap_mean: f64,
    pub gap_cv: f64,
    pub avg_recipients: f64,
}

impl AggMetrics {
    pub fn compute(agg: &MessageAgg, days: f64, top_n: usize) -> Self {
        let total = agg.messages;
        let totalf = total as f64;

        let messages_per_day = if days > 0.0 { totalf / days } else { 0.0 };
        let avg_size = if total > 0 {
            agg.total_bytes as f64 / totalf
        } else {
            0.0
        };
        let reply_ratio = if total > 0 {
            agg.responses as f64 / totalf
        } else {
            0.0
        };

        let top_items: Vec<(String, u64, String)> = agg
            .patterns
            .top_items(top_n)
            .into_iter()
            .map(|(k, e)| (k.to_string(), e.count, e.sample.clone()))
            .collect();

        let top_counts: Vec<u64> = top_items.iter().map(|(_, c, _)| *c).collect();
        let top_sum: u64 = top_counts.iter().sum();

        let top_mass = if total > 0 { top_sum as f64 / totalf } else { 0.0 };
        let top1_ratio = if total > 0 && !top_counts.is_empty() {
            top_counts[0] as f64 / totalf
        } else {
            0.0
        };
        let top3_mass = if total > 0 {
            top_counts.iter().take(3).sum::<u64>() as f64 / totalf
        } else {
            0.0
        };

        let tracked: Vec<u64> = agg.patterns.counts().collect();
        let entropy = normalized_entropy(&tracked, total);

        let gap_mean = if agg.gap_stats.n > 0 { agg.gap_stats.mean } else { 0.0 };
        let gap_cv = if agg.gap_stats.n > 1 { agg.gap_stats.cv() } else { 0.0 };

        let avg_recipients = if total > 0 {
            agg.total_recipients as f64 / totalf
        } else {
            0.0
        };

        AggMetrics {
            total_messages: total,
            messages_per_day,
            total_bytes: agg.total_bytes,
            avg_size,
            total_recipients: agg.total_recipients,
            delivery_bytes: agg.delivery_bytes,
            reply_ratio,
            top_items,
            top_mass,
            top3_mass,
            top1_ratio,
            entropy,
            gap_mean,
            gap_cv,
            avg_recipients,
        }
    }
}
