//! Report table assembly and CSV output.
//!
//! Turns aggregated keys into ordered report rows: volume columns always,
//! scoring columns and subject samples when enabled, and the raw feature
//! columns in debug mode. One CSV file is written per report dimension.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::aggregate::MessageAgg;
use crate::metrics::AggMetrics;
use crate::scoring::ScoringEngine;

/// Output shaping switches for one run.
#[derive(Debug, Clone)]
pub struct ReportOptions {
    /// Distinct calendar dates observed, the messages/day divisor.
    pub days: f64,
    /// Top templates considered per key.
    pub top_n: usize,
    pub sample_subjects: bool,
    pub with_probability: bool,
    pub debug: bool,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            days: 0.0,
            top_n: 50,
            sample_subjects: false,
            with_probability: false,
            debug: false,
        }
    }
}

/// One rendered report: title, header row, data rows.
#[derive(Debug, Clone)]
pub struct ReportTable {
    pub title: String,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

pub struct ReportBuilder {
    opts: ReportOptions,
    engine: ScoringEngine,
}

impl ReportBuilder {
    pub fn new(opts: ReportOptions, engine: ScoringEngine) -> Self {
        Self { opts, engine }
    }

    /// Assemble one table from keyed aggregates. Rows sort by the scoring
    /// band when probability output is on, by message volume otherwise.
    pub fn table<'a, I>(&self, title: &str, key_columns: &[&str], items: I) -> ReportTable
    where
        I: Iterator<Item = (Vec<String>, &'a MessageAgg)>,
    {
        let o = &self.opts;

        let mut headers: Vec<String> = key_columns.iter().map(|c| c.to_string()).collect();
        headers.extend(
            [
                "Messages",
                "Avg Msg Size",
                "Messages Per Day",
                "Total Bytes",
                "Total Recipients",
                "Delivery Bytes",
            ]
            .map(String::from),
        );
        if o.with_probability {
            headers.extend(["Autonomy Score (%)", "Label"].map(String::from));
        }
        if o.sample_subjects {
            headers.push("Sample Subjects".to_string());
        }
        if o.sample_subjects && o.debug {
            headers.push("Top Normalized Subjects".to_string());
            if o.with_probability {
                headers.extend(
                    [
                        "App Probability",
                        "Reply/Fwd Ratio",
                        "TopN Mass",
                        "Top3 Mass",
                        "Top1 Ratio",
                        "Entropy",
                        "P Template",
                        "P Volume",
                        "P AppLike",
                        "P Human",
                        "Avg Rcpts/Msg",
                        "Gap Mean (s)",
                        "Gap CV",
                    ]
                    .map(String::from),
                );
            }
        }

        let mut sortable: Vec<(f64, Vec<String>)> = Vec::new();

        for (key_cells, agg) in items {
            let m = AggMetrics::compute(agg, o.days, o.top_n);
            let score = if o.with_probability {
                Some(self.engine.compute_from_metrics(&m))
            } else {
                None
            };

            let mut row = key_cells;
            row.push(m.total_messages.to_string());
            row.push(format!("{:.2}", m.avg_size));
            row.push(format!("{:.4}", m.messages_per_day));
            row.push(m.total_bytes.to_string());
            row.push(m.total_recipients.to_string());
            row.push(m.delivery_bytes.to_string());

            if let Some(s) = &score {
                row.push(format!("{:.2}", s.sort_score * 100.0));
                row.push(s.label.as_str().to_string());
            }

            if o.sample_subjects {
                let samples: Vec<String> = m
                    .top_items
                    .iter()
                    .map(|(_, count, sample)| format!("[{count}] {sample}"))
                    .collect();
                row.push(samples.join("\n"));
            }

            if o.sample_subjects && o.debug {
                let templates: Vec<String> = m
                    .top_items
                    .iter()
                    .map(|(template, count, _)| format!("[{count}] {template}"))
                    .collect();
                row.push(templates.join("\n"));

                if let Some(s) = &score {
                    for v in [
                        s.p_final,
                        m.reply_ratio,
                        m.top_mass,
                        m.top3_mass,
                        m.top1_ratio,
                        m.entropy,
                        s.p_template,
                        s.p_volume,
                        s.p_app_like,
                        s.p_human,
                        m.avg_recipients,
                        m.gap_mean,
                        m.gap_cv,
                    ] {
                        row.push(format!("{v:.6}"));
                    }
                }
            }

            let sort_key = match &score {
                Some(s) => s.sort_score,
                None => m.total_messages as f64,
            };
            sortable.push((sort_key, row));
        }

        sortable.sort_by(|(a, ra), (b, rb)| {
            b.partial_cmp(a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| ra.cmp(rb))
        });

        ReportTable {
            title: title.to_string(),
            headers,
            rows: sortable.into_iter().map(|(_, row)| row).collect(),
        }
    }
}

fn slug(title: &str) -> String {
    let mut out = String::with_capacity(title.len());
    let mut last_dash = true;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            out.push(c.to_ascii_lowercase());
            last_dash = false;
        } else if !last_dash {
            out.push('-');
            last_dash = true;
        }
    }
    out.trim_end_matches('-').to_string()
}

/// Write each table to `<prefix>_<slug>.csv`. Returns the written paths.
pub fn write_reports(tables: &[ReportTable], prefix: &Path) -> Result<Vec<PathBuf>> {
    let mut written = Vec::with_capacity(tables.len());

    for table in tables {
        let file_name = match prefix.file_name() {
            Some(stem) => format!("{}_{}.csv", stem.to_string_lossy(), slug(&table.title)),
            None => format!("{}.csv", slug(&table.title)),
        };
        let path = prefix.with_file_name(file_name);

        let mut writer = csv::Writer::from_path(&path)
            .with_context(|| format!("cannot create report file {}", path.display()))?;
        writer.write_record(&table.headers)?;
        for row in &table.rows {
            writer.write_record(row)?;
        }
        writer
            .flush()
            .with_context(|| format!("cannot flush report file {}", path.display()))?;

        written.push(path);
    }

    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::MessageAgg;
    use crate::scoring::{ScoringEngine, ScoringParams};

    fn builder(with_probability: bool, sample: bool, debug: bool) -> ReportBuilder {
        ReportBuilder::new(
            ReportOptions {
                days: 2.0,
                top_n: 10,
                sample_subjects: sample,
                with_probability,
                debug,
            },
            ScoringEngine::new(ScoringParams::default(), 10),
        )
    }

    fn automated_agg() -> MessageAgg {
        let mut agg = MessageAgg::default();
        for _ in 0..100 {
            agg.add_message(1000, "alert {i}", "Alert 7", false, None, 1);
        }
        agg
    }

    fn human_agg() -> MessageAgg {
        let mut agg = MessageAgg::default();
        for i in 0..4 {
            agg.add_message(500, &format!("note {i}"), "note", true, None, 1);
        }
        agg
    }

    #[test]
    fn test_basic_table_shape() {
        let b = builder(false, false, false);
        let auto = automated_agg();
        let table = b.table(
            "Envelope Senders",
            &["Sender"],
            [(vec!["a@x.com".to_string()], &auto)].into_iter(),
        );
        assert_eq!(table.headers.len(), 7);
        assert_eq!(table.rows.len(), 1);
        assert_eq!(table.rows[0][0], "a@x.com");
        assert_eq!(table.rows[0][1], "100");
        assert_eq!(table.rows[0][2], "1000.00");
        assert_eq!(table.rows[0][3], "50.0000");
    }

    #[test]
    fn test_probability_columns_and_sorting() {
        let b = builder(true, false, false);
        let auto = automated_agg();
        let human = human_agg();
        let table = b.table(
            "Envelope Senders",
            &["Sender"],
            [
                (vec!["human@x.com".to_string()], &human),
                (vec!["app@x.com".to_string()], &auto),
            ]
            .into_iter(),
        );
        assert!(table.headers.contains(&"Label".to_string()));
        // the automated sender sorts first
        assert_eq!(table.rows[0][0], "app@x.com");
        assert_eq!(table.rows[0][8], "High Probability App");
    }

    #[test]
    fn test_debug_columns_present() {
        let b = builder(true, true, true);
        let auto = automated_agg();
        let table = b.table(
            "Envelope Senders",
            &["Sender"],
            [(vec!["a@x.com".to_string()], &auto)].into_iter(),
        );
        assert!(table.headers.contains(&"Sample Subjects".to_string()));
        assert!(table.headers.contains(&"Entropy".to_string()));
        assert!(table.headers.contains(&"Gap CV".to_string()));
        let samples_idx = table
            .headers
            .iter()
            .position(|h| h == "Sample Subjects")
            .unwrap();
        assert!(table.rows[0][samples_idx].contains("[100] Alert 7"));
    }

    #[test]
    fn test_slug() {
        assert_eq!(slug("Sender + Message ID"), "sender-message-id");
        assert_eq!(slug("Envelope Senders"), "envelope-senders");
    }

    #[test]
    fn test_write_reports_to_disk() {
        let dir = std::env::temp_dir().join("senderstats-report-test");
        std::fs::create_dir_all(&dir).unwrap();
        let prefix = dir.join("out");

        let b = builder(false, false, false);
        let auto = automated_agg();
        let table = b.table(
            "Envelope Senders",
            &["Sender"],
            [(vec!["a@x.com".to_string()], &auto)].into_iter(),
        );

        let written = write_reports(&[table], &prefix).unwrap();
        assert_eq!(written.len(), 1);
        let content = std::fs::read_to_string(&written[0]).unwrap();
        assert!(content.starts_with("Sender,Messages"));
        assert!(content.contains("a@x.com"));

        std::fs::remove_dir_all(&dir).ok();
    }
}
