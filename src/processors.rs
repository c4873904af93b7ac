//! Per-dimension aggregation processors.
//!
//! Every report dimension is the same machinery instantiated over a
//! different key shape: one `KeyedAggregator` plus the key extraction.
//! Each processor owns its aggregates exclusively; nothing else mutates
//! them.

use std::collections::BTreeMap;

use chrono::NaiveDate;

use crate::aggregate::{KeyedAggregator, MessageAgg};
use crate::record::MessageRecord;
use crate::report::{ReportBuilder, ReportTable};

type AggFactory = Box<dyn Fn() -> MessageAgg>;

fn factory(topk: usize) -> AggFactory {
    Box::new(move || MessageAgg::new(topk))
}

fn observe_into(agg: &mut MessageAgg, r: &MessageRecord, expand_recipients: bool) {
    let rcpts = if expand_recipients { r.recipient_count() } else { 1 };
    agg.add_message(
        r.msgsz,
        &r.subject_template,
        &r.subject,
        r.is_response,
        r.date,
        rcpts,
    );
}

/// Aggregation keyed by envelope sender.
pub struct SenderProcessor {
    agg: KeyedAggregator<String, AggFactory>,
    expand: bool,
}

impl SenderProcessor {
    pub fn new(topk: usize, expand: bool) -> Self {
        Self {
            agg: KeyedAggregator::with_factory(factory(topk)),
            expand,
        }
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        observe_into(self.agg.get_or_create(r.mfrom.clone()), r, self.expand);
    }

    pub fn table(&self, builder: &ReportBuilder) -> ReportTable {
        builder.table(
            "Envelope Senders",
            &["Sender"],
            self.agg.iter().map(|(k, a)| (vec![k.clone()], a)),
        )
    }

    pub fn key_count(&self) -> usize {
        self.agg.len()
    }
}

/// Aggregation keyed by header From.
pub struct HeaderFromProcessor {
    agg: KeyedAggregator<String, AggFactory>,
    expand: bool,
}

impl HeaderFromProcessor {
    pub fn new(topk: usize, expand: bool) -> Self {
        Self {
            agg: KeyedAggregator::with_factory(factory(topk)),
            expand,
        }
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        observe_into(self.agg.get_or_create(r.hfrom.clone()), r, self.expand);
    }

    pub fn table(&self, builder: &ReportBuilder) -> ReportTable {
        builder.table(
            "Header From",
            &["Header From"],
            self.agg.iter().map(|(k, a)| (vec![k.clone()], a)),
        )
    }
}

/// Aggregation keyed by return path.
pub struct ReturnPathProcessor {
    agg: KeyedAggregator<String, AggFactory>,
    expand: bool,
}

impl ReturnPathProcessor {
    pub fn new(topk: usize, expand: bool) -> Self {
        Self {
            agg: KeyedAggregator::with_factory(factory(topk)),
            expand,
        }
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        observe_into(self.agg.get_or_create(r.rpath.clone()), r, self.expand);
    }

    pub fn table(&self, builder: &ReportBuilder) -> ReportTable {
        builder.table(
            "Return Path",
            &["Return Path"],
            self.agg.iter().map(|(k, a)| (vec![k.clone()], a)),
        )
    }
}

/// Aggregation keyed by the sender and header From pair, surfacing
/// alignment between the two identities.
pub struct AlignmentProcessor {
    agg: KeyedAggregator<(String, String), AggFactory>,
    expand: bool,
}

impl AlignmentProcessor {
    pub fn new(topk: usize, expand: bool) -> Self {
        Self {
            agg: KeyedAggregator::with_factory(factory(topk)),
            expand,
        }
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        let key = (r.mfrom.clone(), r.hfrom.clone());
        observe_into(self.agg.get_or_create(key), r, self.expand);
    }

    pub fn table(&self, builder: &ReportBuilder) -> ReportTable {
        builder.table(
            "Sender + Header From (Alignment)",
            &["Sender", "Header From"],
            self.agg
                .iter()
                .map(|(k, a)| (vec![k.0.clone(), k.1.clone()], a)),
        )
    }
}

/// Aggregation keyed by sender and the Message-ID host infrastructure.
pub struct MessageIdProcessor {
    agg: KeyedAggregator<(String, String, String), AggFactory>,
    expand: bool,
}

impl MessageIdProcessor {
    pub fn new(topk: usize, expand: bool) -> Self {
        Self {
            agg: KeyedAggregator::with_factory(factory(topk)),
            expand,
        }
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        let key = (r.mfrom.clone(), r.mid_host.clone(), r.mid_domain.clone());
        observe_into(self.agg.get_or_create(key), r, self.expand);
    }

    pub fn table(&self, builder: &ReportBuilder) -> ReportTable {
        builder.table(
            "Sender + Message ID",
            &["Sender", "Message ID Host", "Message ID Domain"],
            self.agg
                .iter()
                .map(|(k, a)| (vec![k.0.clone(), k.1.clone(), k.2.clone()], a)),
        )
    }
}

/// Counts messages per calendar date and per hour. The distinct-date
/// count is the `days` divisor used by scoring.
#[derive(Debug, Default)]
pub struct DateTally {
    daily: BTreeMap<NaiveDate, u64>,
    hourly: BTreeMap<(NaiveDate, u32), u64>,
}

impl DateTally {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, r: &MessageRecord) {
        if let Some(date) = r.date {
            use chrono::Timelike;
            let day = date.date_naive();
            *self.daily.entry(day).or_insert(0) += 1;
            *self.hourly.entry((day, date.time().hour())).or_insert(0) += 1;
        }
    }

    /// Number of distinct calendar dates observed.
    pub fn days(&self) -> f64 {
        self.daily.len() as f64
    }

    pub fn daily_counts(&self) -> impl Iterator<Item = (&NaiveDate, &u64)> {
        self.daily.iter()
    }

    pub fn hourly_counts(&self) -> impl Iterator<Item = (&(NaiveDate, u32), &u64)> {
        self.hourly.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, FixedOffset};

    fn record(mfrom: &str, hfrom: &str, date: &str) -> MessageRecord {
        MessageRecord {
            mfrom: mfrom.to_string(),
            hfrom: hfrom.to_string(),
            subject: "Invoice 1".to_string(),
            subject_template: "invoice {i}".to_string(),
            msgsz: 100,
            date: DateTime::<FixedOffset>::parse_from_rfc3339(date).ok(),
            rcpts: vec!["a@x.com".to_string(), "b@x.com".to_string()],
            ..MessageRecord::default()
        }
    }

    #[test]
    fn test_sender_processor_groups_by_sender() {
        let mut p = SenderProcessor::new(16, false);
        p.observe(&record("app@x.com", "", "2024-03-01T10:00:00+00:00"));
        p.observe(&record("app@x.com", "", "2024-03-01T11:00:00+00:00"));
        p.observe(&record("other@x.com", "", "2024-03-01T12:00:00+00:00"));
        assert_eq!(p.key_count(), 2);
    }

    #[test]
    fn test_alignment_processor_key_shape() {
        let mut p = AlignmentProcessor::new(16, false);
        p.observe(&record("a@x.com", "a@x.com", "2024-03-01T10:00:00+00:00"));
        p.observe(&record("a@x.com", "other@y.com", "2024-03-01T10:05:00+00:00"));
        assert_eq!(p.agg.len(), 2);
    }

    #[test]
    fn test_expand_recipients() {
        let mut p = SenderProcessor::new(16, true);
        p.observe(&record("a@x.com", "", "2024-03-01T10:00:00+00:00"));
        let agg = p.agg.iter().next().unwrap().1;
        assert_eq!(agg.total_recipients, 2);
        assert_eq!(agg.delivery_bytes, 200);
    }

    #[test]
    fn test_date_tally_counts_distinct_days() {
        let mut tally = DateTally::new();
        tally.observe(&record("a@x.com", "", "2024-03-01T10:00:00+00:00"));
        tally.observe(&record("a@x.com", "", "2024-03-01T23:00:00+00:00"));
        tally.observe(&record("a@x.com", "", "2024-03-02T01:00:00+00:00"));
        // records without a parseable date do not count
        tally.observe(&MessageRecord::default());
        assert_eq!(tally.days(), 2.0);
        assert_eq!(tally.daily_counts().count(), 2);
        assert_eq!(tally.hourly_counts().count(), 3);
    }
}
