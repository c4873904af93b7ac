//! Typed message records and CSV field mapping.
//!
//! The aggregation core only ever sees a `MessageRecord`; mapping the
//! free-form columns of a mail log onto its fields happens here, once per
//! file header. Column names are configurable since every log export
//! names them differently.

use anyhow::{bail, Result};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// One mail transmission, as delivered by the ingestion layer.
#[derive(Debug, Clone, Default)]
pub struct MessageRecord {
    /// Envelope sender.
    pub mfrom: String,
    /// Header From value, free-form.
    pub hfrom: String,
    /// Return-Path header value.
    pub rpath: String,
    /// Message-ID header value.
    pub msgid: String,
    pub rcpts: Vec<String>,
    pub subject: String,
    /// Message size in bytes; upstream coerces unparseable sizes to 0.
    pub msgsz: i64,
    pub date: Option<DateTime<FixedOffset>>,

    // Derived by the transform pipeline
    pub subject_template: String,
    pub is_response: bool,
    pub mid_host: String,
    pub mid_domain: String,
}

impl MessageRecord {
    pub fn recipient_count(&self) -> usize {
        self.rcpts.len().max(1)
    }
}

/// Configurable column names for the supported log fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FieldMapConfig {
    pub mfrom: String,
    pub hfrom: String,
    pub rpath: String,
    pub msgid: String,
    pub rcpts: String,
    pub subject: String,
    pub msgsz: String,
    pub date: String,
    /// chrono format string for the date column.
    pub date_format: String,
}

impl Default for FieldMapConfig {
    fn default() -> Self {
        Self {
            mfrom: "Sender".to_string(),
            hfrom: "Header_From".to_string(),
            rpath: "Header_Return-Path".to_string(),
            msgid: "Message_ID".to_string(),
            rcpts: "Recipients".to_string(),
            subject: "Subject".to_string(),
            msgsz: "Message_Size".to_string(),
            date: "Date".to_string(),
            date_format: "%Y-%m-%dT%H:%M:%S%.f%z".to_string(),
        }
    }
}

/// Column indices resolved against one file's header row.
#[derive(Debug, Clone)]
pub struct FieldMap {
    mfrom: usize,
    hfrom: Option<usize>,
    rpath: Option<usize>,
    msgid: Option<usize>,
    rcpts: Option<usize>,
    subject: Option<usize>,
    msgsz: Option<usize>,
    date: Option<usize>,
    date_format: String,
}

impl FieldMap {
    /// Resolve the configured column names against a header row. Only the
    /// sender column is mandatory; reports over missing columns simply see
    /// empty values.
    pub fn resolve(config: &FieldMapConfig, headers: &[String]) -> Result<Self> {
        let find = |name: &str| headers.iter().position(|h| h.trim() == name);

        let mfrom = match find(&config.mfrom) {
            Some(idx) => idx,
            None => bail!("input is missing the sender column {:?}", config.mfrom),
        };

        Ok(FieldMap {
            mfrom,
            hfrom: find(&config.hfrom),
            rpath: find(&config.rpath),
            msgid: find(&config.msgid),
            rcpts: find(&config.rcpts),
            subject: find(&config.subject),
            msgsz: find(&config.msgsz),
            date: find(&config.date),
            date_format: config.date_format.clone(),
        })
    }

    /// Build a typed record from one CSV row. Field coercion failures are
    /// benign: sizes default to 0, unparseable dates to none.
    pub fn extract(&self, row: &[String]) -> MessageRecord {
        let get = |idx: Option<usize>| -> String {
            idx.and_then(|i| row.get(i)).map(|s| s.trim().to_string()).unwrap_or_default()
        };

        let msgsz = get(self.msgsz).parse::<i64>().unwrap_or(0);

        let date_raw = get(self.date);
        let date = if date_raw.is_empty() {
            None
        } else {
            DateTime::parse_from_str(&date_raw, &self.date_format).ok()
        };

        let rcpts_raw = get(self.rcpts);
        let rcpts: Vec<String> = rcpts_raw
            .split(',')
            .map(|r| r.trim().to_string())
            .filter(|r| !r.is_empty())
            .collect();

        MessageRecord {
            mfrom: row.get(self.mfrom).map(|s| s.trim().to_string()).unwrap_or_default(),
            hfrom: get(self.hfrom),
            rpath: get(self.rpath),
            msgid: get(self.msgid),
            rcpts,
            subject: get(self.subject),
            msgsz,
            date,
            subject_template: String::new(),
            is_response: false,
            mid_host: String::new(),
            mid_domain: String::new(),
        }
    }
}
