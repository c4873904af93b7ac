use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::record::FieldMapConfig;
use crate::scoring::ScoringParams;

/// Relay domains that dominate most logs without saying anything about
/// the original sender. Excluded unless explicitly kept.
pub const DEFAULT_DOMAIN_EXCLUSIONS: &[&str] = &["ppops.net", "pphosted.com", "knowledgefront.com"];

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fields: FieldMapConfig,
    pub processing: ProcessingOptions,
    pub report: ReportConfig,
    pub scoring: ScoringParams,
    /// Optional path to a public-suffix rule file (text rules, or a
    /// pre-built `.json` trie). The embedded snapshot is used otherwise.
    pub suffix_rules_path: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            fields: FieldMapConfig::default(),
            processing: ProcessingOptions::default(),
            report: ReportConfig::default(),
            scoring: ScoringParams::default(),
            suffix_rules_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingOptions {
    pub decode_srs: bool,
    pub remove_prvs: bool,
    pub normalize_bounces: bool,
    pub normalize_entropy: bool,
    pub entropy_threshold: f64,
    pub hex_pair_threshold: usize,

    /// Reduce header From values to the bare address.
    pub strip_display_names: bool,
    /// Use the envelope sender when the header From is empty.
    pub backfill_empty_hfrom: bool,

    // Report dimensions beyond the always-on sender report
    pub gen_hfrom: bool,
    pub gen_rpath: bool,
    pub gen_alignment: bool,
    pub gen_msgid: bool,

    /// Weight totals by recipient count instead of per message.
    pub expand_recipients: bool,

    pub exclude_domains: Vec<String>,
    pub exclude_senders: Vec<String>,
    pub restrict_domains: Vec<String>,
    /// Skip the built-in relay domain exclusions.
    pub no_default_exclusions: bool,

    /// Capacity of the per-key subject template tracker.
    pub topk_subjects: usize,
}

impl Default for ProcessingOptions {
    fn default() -> Self {
        ProcessingOptions {
            decode_srs: false,
            remove_prvs: false,
            normalize_bounces: false,
            normalize_entropy: false,
            entropy_threshold: 0.6,
            hex_pair_threshold: 6,
            strip_display_names: false,
            backfill_empty_hfrom: false,
            gen_hfrom: false,
            gen_rpath: false,
            gen_alignment: false,
            gen_msgid: false,
            expand_recipients: false,
            exclude_domains: Vec::new(),
            exclude_senders: Vec::new(),
            restrict_domains: Vec::new(),
            no_default_exclusions: false,
            topk_subjects: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Top templates considered per key when deriving masses and samples.
    pub top_n: usize,
    pub sample_subjects: bool,
    pub with_probability: bool,
    pub debug: bool,
}

impl Default for ReportConfig {
    fn default() -> Self {
        ReportConfig {
            top_n: 50,
            sample_subjects: false,
            with_probability: false,
            debug: false,
        }
    }
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("cannot read config file {path}"))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("cannot parse config file {path}"))?;
        Ok(config)
    }

    pub fn to_file(&self, path: &str) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)
            .with_context(|| format!("cannot write config file {path}"))?;
        Ok(())
    }
}
