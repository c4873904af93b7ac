//! CSV mail-log ingestion.
//!
//! Reads exported mail logs row by row, resolves the configured column
//! names against each file's header and hands typed records to the
//! caller. All field coercion is lenient; only an unreadable file or a
//! missing sender column is an error.

use anyhow::{Context, Result};
use std::path::Path;

use crate::record::{FieldMap, FieldMapConfig, MessageRecord};

/// Read one CSV file, invoking `sink` per record. Returns the row count.
pub fn read_file<F>(path: &Path, fields: &FieldMapConfig, mut sink: F) -> Result<u64>
where
    F: FnMut(MessageRecord),
{
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("cannot open input file {}", path.display()))?;

    let headers: Vec<String> = reader
        .headers()
        .with_context(|| format!("cannot read header row of {}", path.display()))?
        .iter()
        .map(str::to_string)
        .collect();
    let map = FieldMap::resolve(fields, &headers)
        .with_context(|| format!("cannot map columns of {}", path.display()))?;

    let mut rows = 0u64;
    for result in reader.records() {
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                log::warn!("skipping malformed row in {}: {e}", path.display());
                continue;
            }
        };
        let row: Vec<String> = record.iter().map(str::to_string).collect();
        sink(map.extract(&row));
        rows += 1;
    }

    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(name: &str, content: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join("senderstats-ingest-test");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        path
    }

    #[test]
    fn test_read_file_maps_rows() {
        let path = write_temp(
            "basic.csv",
            "Sender,Subject,Message_Size,Date\n\
             app@x.com,\"Invoice, 5\",100,2024-03-01T10:00:00.000+0000\n\
             app@x.com,Invoice 6,200,2024-03-01T11:00:00.000+0000\n",
        );

        let mut records = Vec::new();
        let rows = read_file(&path, &FieldMapConfig::default(), |r| records.push(r)).unwrap();
        assert_eq!(rows, 2);
        assert_eq!(records[0].mfrom, "app@x.com");
        // quoted commas survive CSV parsing
        assert_eq!(records[0].subject, "Invoice, 5");
        assert_eq!(records[0].msgsz, 100);
        assert!(records[0].date.is_some());
    }

    #[test]
    fn test_read_file_missing_sender_column() {
        let path = write_temp("nosender.csv", "Subject\nhello\n");
        let err = read_file(&path, &FieldMapConfig::default(), |_| {});
        assert!(err.is_err());
    }

    #[test]
    fn test_read_file_missing_file() {
        let path = std::path::PathBuf::from("/nonexistent/senderstats.csv");
        assert!(read_file(&path, &FieldMapConfig::default(), |_| {}).is_err());
    }
}
