//! Record filtering and transformation.
//!
//! The ingestion side applies an explicit ordered list of stages to each
//! record before it reaches the aggregators: filters drop records, pure
//! transforms rewrite fields in place. Stage order matters; the empty
//! sender filter runs before sender canonicalization, the domain filters
//! after it so they see the canonical address.

use std::collections::HashSet;
use std::sync::Arc;

use crate::address::{decode_srs, normalize_bounce, parse_email_details, remove_prvs, score_entropy};
use crate::config::{Config, DEFAULT_DOMAIN_EXCLUSIONS};
use crate::mid::MessageIdParser;
use crate::record::MessageRecord;
use crate::subject::SubjectNormalizer;
use crate::suffix_trie::SuffixTrie;

fn sender_domain(addr: &str) -> &str {
    addr.rsplit_once('@').map(|(_, d)| d).unwrap_or("")
}

/// Drop-or-keep decisions over a record.
pub enum RecordFilter {
    ExcludeEmptySender,
    ExcludeDomains(HashSet<String>),
    ExcludeSenders(HashSet<String>),
    RestrictDomains(HashSet<String>),
}

impl RecordFilter {
    pub fn accept(&self, r: &MessageRecord) -> bool {
        match self {
            RecordFilter::ExcludeEmptySender => !r.mfrom.is_empty(),
            RecordFilter::ExcludeDomains(domains) => {
                !domains.contains(&sender_domain(&r.mfrom).to_lowercase())
            }
            RecordFilter::ExcludeSenders(senders) => !senders.contains(&r.mfrom.to_lowercase()),
            RecordFilter::RestrictDomains(domains) => {
                domains.contains(&sender_domain(&r.mfrom).to_lowercase())
            }
        }
    }
}

/// Which address rewriting schemes to undo on a sender field.
#[derive(Debug, Clone, Default)]
pub struct AddressCleanup {
    pub decode_srs: bool,
    pub remove_prvs: bool,
    pub normalize_bounces: bool,
    pub normalize_entropy: bool,
    pub entropy_threshold: f64,
    pub hex_pair_threshold: usize,
}

impl AddressCleanup {
    fn apply(&self, addr: String) -> String {
        let mut addr = addr;
        if self.decode_srs {
            addr = decode_srs(&addr).0;
        }
        if self.remove_prvs {
            addr = remove_prvs(&addr).0;
        }
        if self.normalize_bounces {
            addr = normalize_bounce(&addr).0;
        }
        if self.normalize_entropy {
            addr = score_entropy(&addr, self.entropy_threshold, self.hex_pair_threshold).0;
        }
        addr
    }
}

/// Field rewrites applied to a record in pipeline order.
pub enum RecordTransform {
    /// Extract the bare sender address and undo bounce rewriting.
    CanonicalizeSender(AddressCleanup),
    /// Optionally reduce the header From to its address, and fall back to
    /// the envelope sender when the header is empty.
    HeaderFrom {
        strip_display: bool,
        backfill_empty: bool,
    },
    CanonicalizeReturnPath(AddressCleanup),
    NormalizeSubject(SubjectNormalizer),
    ParseMessageId(MessageIdParser),
}

impl RecordTransform {
    pub fn apply(&self, mut r: MessageRecord) -> MessageRecord {
        match self {
            RecordTransform::CanonicalizeSender(cleanup) => {
                let parts = parse_email_details(&r.mfrom);
                r.mfrom = cleanup.apply(parts.email_address);
            }
            RecordTransform::HeaderFrom {
                strip_display,
                backfill_empty,
            } => {
                if *strip_display {
                    r.hfrom = parse_email_details(&r.hfrom).email_address;
                }
                if *backfill_empty && r.hfrom.is_empty() {
                    r.hfrom = r.mfrom.clone();
                }
            }
            RecordTransform::CanonicalizeReturnPath(cleanup) => {
                let parts = parse_email_details(&r.rpath);
                r.rpath = cleanup.apply(parts.email_address);
            }
            RecordTransform::NormalizeSubject(normalizer) => {
                let (template, is_response) = normalizer.normalize(&r.subject);
                r.subject_template = template;
                r.is_response = is_response;
            }
            RecordTransform::ParseMessageId(parser) => {
                let parts = parser.parse(&r.msgid);
                r.mid_host = parts.host;
                r.mid_domain = parts.domain;
            }
        }
        r
    }
}

pub enum Stage {
    Filter(RecordFilter),
    Transform(RecordTransform),
}

/// Ordered list of stages; `process` returns the transformed record or
/// none when a filter dropped it.
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new(stages: Vec<Stage>) -> Self {
        Pipeline { stages }
    }

    /// Assemble the standard stage order from the configuration.
    pub fn from_config(config: &Config, trie: Arc<SuffixTrie>) -> Self {
        let p = &config.processing;

        let cleanup = AddressCleanup {
            decode_srs: p.decode_srs,
            remove_prvs: p.remove_prvs,
            normalize_bounces: p.normalize_bounces,
            normalize_entropy: p.normalize_entropy,
            entropy_threshold: p.entropy_threshold,
            hex_pair_threshold: p.hex_pair_threshold,
        };

        let mut exclude_domains: HashSet<String> =
            p.exclude_domains.iter().map(|d| d.to_lowercase()).collect();
        if !p.no_default_exclusions {
            exclude_domains.extend(DEFAULT_DOMAIN_EXCLUSIONS.iter().map(|d| d.to_string()));
        }
        let exclude_senders: HashSet<String> =
            p.exclude_senders.iter().map(|s| s.to_lowercase()).collect();
        let restrict_domains: HashSet<String> =
            p.restrict_domains.iter().map(|d| d.to_lowercase()).collect();

        let mut stages = vec![
            Stage::Filter(RecordFilter::ExcludeEmptySender),
            Stage::Transform(RecordTransform::CanonicalizeSender(cleanup.clone())),
        ];
        if !exclude_domains.is_empty() {
            stages.push(Stage::Filter(RecordFilter::ExcludeDomains(exclude_domains)));
        }
        if !exclude_senders.is_empty() {
            stages.push(Stage::Filter(RecordFilter::ExcludeSenders(exclude_senders)));
        }
        if !restrict_domains.is_empty() {
            stages.push(Stage::Filter(RecordFilter::RestrictDomains(restrict_domains)));
        }
        if p.gen_hfrom || p.gen_alignment {
            stages.push(Stage::Transform(RecordTransform::HeaderFrom {
                strip_display: p.strip_display_names,
                backfill_empty: p.backfill_empty_hfrom,
            }));
        }
        if p.gen_rpath {
            stages.push(Stage::Transform(RecordTransform::CanonicalizeReturnPath(
                cleanup,
            )));
        }
        if p.gen_msgid {
            stages.push(Stage::Transform(RecordTransform::ParseMessageId(
                MessageIdParser::new(trie),
            )));
        }
        stages.push(Stage::Transform(RecordTransform::NormalizeSubject(
            SubjectNormalizer::new(),
        )));

        Pipeline { stages }
    }

    pub fn process(&self, record: MessageRecord) -> Option<MessageRecord> {
        let mut r = record;
        for stage in &self.stages {
            match stage {
                Stage::Filter(f) => {
                    if !f.accept(&r) {
                        return None;
                    }
                }
                Stage::Transform(t) => r = t.apply(r),
            }
        }
        Some(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn record(mfrom: &str) -> MessageRecord {
        MessageRecord {
            mfrom: mfrom.to_string(),
            subject: "Re: Invoice 123".to_string(),
            msgsz: 100,
            ..MessageRecord::default()
        }
    }

    fn test_config() -> Config {
        let mut config = Config::default();
        config.processing.decode_srs = true;
        config.processing.remove_prvs = true;
        config.processing.normalize_bounces = true;
        config.processing.gen_hfrom = true;
        config.processing.strip_display_names = true;
        config.processing.backfill_empty_hfrom = true;
        config
    }

    fn pipeline(config: &Config) -> Pipeline {
        Pipeline::from_config(config, Arc::new(SuffixTrie::builtin()))
    }

    #[test]
    fn test_empty_sender_dropped() {
        let p = pipeline(&test_config());
        assert!(p.process(record("")).is_none());
        assert!(p.process(record("a@example.com")).is_some());
    }

    #[test]
    fn test_sender_canonicalization_chain() {
        let p = pipeline(&test_config());
        let out = p
            .process(record("Relay <srs0=AAA=BBB=orig.com=alice@relay.net>"))
            .unwrap();
        assert_eq!(out.mfrom, "alice@orig.com");

        let out = p.process(record("prvs=deadbeef=svc@example.com")).unwrap();
        assert_eq!(out.mfrom, "svc@example.com");

        let out = p.process(record("bounce+xyz@example.com")).unwrap();
        assert_eq!(out.mfrom, "bounce@example.com");
    }

    #[test]
    fn test_default_domain_exclusions_apply() {
        let p = pipeline(&test_config());
        assert!(p.process(record("relay@pphosted.com")).is_none());
    }

    #[test]
    fn test_restrict_domains() {
        let mut config = test_config();
        config.processing.restrict_domains = vec!["example.com".to_string()];
        let p = pipeline(&config);
        assert!(p.process(record("a@example.com")).is_some());
        assert!(p.process(record("a@other.org")).is_none());
    }

    #[test]
    fn test_hfrom_backfill_and_subject_template() {
        let p = pipeline(&test_config());
        let out = p.process(record("a@example.com")).unwrap();
        // empty header From falls back to the canonical sender
        assert_eq!(out.hfrom, "a@example.com");
        assert_eq!(out.subject_template, "{r} invoice {i}");
        assert!(out.is_response);
    }

    #[test]
    fn test_message_id_transform() {
        let mut config = test_config();
        config.processing.gen_msgid = true;
        let p = pipeline(&config);
        let mut rec = record("a@example.com");
        rec.msgid = "<x.1@mail.example.com>".to_string();
        let out = p.process(rec).unwrap();
        assert_eq!(out.mid_host, "mail.example.com");
        assert_eq!(out.mid_domain, "example.com");
    }

    #[test]
    fn test_entropy_stage_collapses_random_senders() {
        let mut config = test_config();
        config.processing.normalize_entropy = true;
        let p = pipeline(&config);
        let a = p.process(record("a1b2c3d4e5f6@example.com")).unwrap();
        let b = p.process(record("0f9e8d7c6b5a@example.com")).unwrap();
        assert_eq!(a.mfrom, b.mfrom);
    }
}
