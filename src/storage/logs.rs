//! Append-only reading and access logs
//!
//! Plain delimited-text rows, one per event, newest appended last. The
//! header row is written only when the file does not yet exist. Readers
//! presenting these logs reverse them so the newest entry comes first.

use anyhow::{Context, Result};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::vision::Reading;

const READINGS_HEADER: &str = "timestamp,reading,digits,source";
const ACCESS_HEADER: &str = "timestamp,width,height,bytes,source";

/// One row of the readings log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReadingRecord {
    pub timestamp: u64,
    pub reading: String,
    pub digits: usize,
    pub source: String,
}

/// Append-only record of successful readings
pub struct ReadingLog {
    path: PathBuf,
}

impl ReadingLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one successful reading. Empty readings are valid rows: a
    /// "no reading" event is worth recording too.
    pub fn append(&self, reading: &Reading, source: &str) -> Result<()> {
        let row = format!(
            "{},{},{},{}",
            crate::storage::unix_timestamp(),
            reading.as_str(),
            reading.digit_count(),
            sanitize_field(source)
        );
        append_row(&self.path, READINGS_HEADER, &row)
    }

    /// Up to `limit` parsed rows, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ReadingRecord>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read readings log at {:?}", self.path))?;

        let mut records: Vec<ReadingRecord> = content
            .lines()
            .skip(1) // header
            .filter_map(parse_reading_row)
            .collect();

        // Rows are appended oldest-first; present newest-first
        records.reverse();
        records.truncate(limit);
        Ok(records)
    }
}

/// Append-only record of upload attempts
pub struct AccessLog {
    path: PathBuf,
}

impl AccessLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, width: u32, height: u32, bytes: usize, source: &str) -> Result<()> {
        let row = format!(
            "{},{},{},{},{}",
            crate::storage::unix_timestamp(),
            width,
            height,
            bytes,
            sanitize_field(source)
        );
        append_row(&self.path, ACCESS_HEADER, &row)
    }
}

/// Append one row, writing the header first when the file is new.
fn append_row(path: &Path, header: &str, row: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let is_new = !path.exists();

    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log at {:?}", path))?;

    if is_new {
        writeln!(file, "{}", header)?;
    }
    writeln!(file, "{}", row)?;

    Ok(())
}

/// Free-text fields must not carry the row delimiter
fn sanitize_field(field: &str) -> String {
    field.replace([',', '\n', '\r'], ";")
}

fn parse_reading_row(line: &str) -> Option<ReadingRecord> {
    let mut parts = line.splitn(4, ',');
    Some(ReadingRecord {
        timestamp: parts.next()?.parse().ok()?,
        reading: parts.next()?.to_string(),
        digits: parts.next()?.parse().ok()?,
        source: parts.next().unwrap_or("").to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{assemble, DigitToken};

    fn reading(digits: &[u8]) -> Reading {
        let tokens = digits
            .iter()
            .enumerate()
            .map(|(i, &value)| DigitToken {
                value,
                position: i as f32,
                score: 1.0,
            })
            .collect();
        assemble(tokens)
    }

    #[test]
    fn test_header_written_exactly_once() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReadingLog::new(dir.path().join("readings.csv"));

        log.append(&reading(&[1, 2, 3]), "camera-1").unwrap();
        log.append(&reading(&[4, 5]), "camera-1").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[0], READINGS_HEADER);
        assert!(lines[1].ends_with(",123,3,camera-1"));
        assert!(lines[2].ends_with(",45,2,camera-1"));
    }

    #[test]
    fn test_recent_returns_newest_first() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReadingLog::new(dir.path().join("readings.csv"));

        log.append(&reading(&[1]), "a").unwrap();
        log.append(&reading(&[2]), "a").unwrap();
        log.append(&reading(&[3]), "a").unwrap();

        let records = log.recent(2).unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].reading, "3");
        assert_eq!(records[1].reading, "2");
    }

    #[test]
    fn test_recent_on_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReadingLog::new(dir.path().join("nothing-here.csv"));
        assert!(log.recent(10).unwrap().is_empty());
    }

    #[test]
    fn test_empty_reading_is_a_valid_row() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReadingLog::new(dir.path().join("readings.csv"));

        log.append(&Reading::empty(), "camera-2").unwrap();

        let records = log.recent(10).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reading, "");
        assert_eq!(records[0].digits, 0);
    }

    #[test]
    fn test_source_delimiters_are_sanitized() {
        let dir = tempfile::tempdir().unwrap();
        let log = ReadingLog::new(dir.path().join("readings.csv"));

        log.append(&reading(&[7]), "weird,source\nname").unwrap();

        let records = log.recent(1).unwrap();
        assert_eq!(records[0].source, "weird;source;name");
    }

    #[test]
    fn test_access_log_rows() {
        let dir = tempfile::tempdir().unwrap();
        let log = AccessLog::new(dir.path().join("access.csv"));

        log.append(640, 480, 12345, "camera-1").unwrap();
        log.append(800, 600, 999, "camera-2").unwrap();

        let content = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines[0], ACCESS_HEADER);
        assert!(lines[1].ends_with(",640,480,12345,camera-1"));
        assert!(lines[2].ends_with(",800,600,999,camera-2"));
    }
}
