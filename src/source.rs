//! CSV and JSON-lines readers.
//!
//! Both readers expose `(byte_offset, record)` pairs so the builder can
//! populate the per-document source offset table, and both read bytes
//! verbatim without coercing numeric types (spec.md §6).

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// A single ingested row: every column present in the source, keyed by
/// column name.
pub type Document = HashMap<String, String>;

/// Streams `(byte_offset, Document)` pairs from an RFC-4180-ish CSV file.
///
/// The first row is a header naming columns. A malformed row (field count
/// mismatch, unreadable bytes) yields `Err` from the iterator rather than
/// panicking; the caller decides how to treat a skipped row.
pub struct CsvReader {
    inner: csv::Reader<BufReader<File>>,
    headers: Vec<String>,
}

impl CsvReader {
    /// Open `path` and read its header row.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        let mut inner = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(BufReader::new(file));
        let headers = inner
            .headers()
            .map_err(|e| Error::Format(format!("invalid CSV header: {e}")))?
            .iter()
            .map(str::to_string)
            .collect();
        Ok(Self { inner, headers })
    }

    /// Column names in file order.
    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    /// Iterate over `(byte_offset, row)`, `row` being `Err` for malformed
    /// records.
    pub fn rows(&mut self) -> impl Iterator<Item = (u64, Result<Document>)> + '_ {
        let headers = self.headers.clone();
        self.inner.records().map(move |rec| match rec {
            Ok(record) => {
                let offset = record.position().map(|p| p.byte()).unwrap_or(u64::MAX);
                if record.len() != headers.len() {
                    return (
                        offset,
                        Err(Error::Format(format!(
                            "row has {} fields but header has {}",
                            record.len(),
                            headers.len()
                        ))),
                    );
                }
                let doc = headers
                    .iter()
                    .cloned()
                    .zip(record.iter().map(str::to_string))
                    .collect();
                (offset, Ok(doc))
            }
            Err(e) => (
                u64::MAX,
                Err(Error::Format(format!("CSV parse error: {e}"))),
            ),
        })
    }
}

/// Streams `(byte_offset, Document)` pairs from a newline-delimited JSON
/// file, one object per line.
pub struct JsonlReader {
    reader: BufReader<File>,
    pos: u64,
}

impl JsonlReader {
    /// Open `path` for line-by-line JSON parsing.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = File::open(path.as_ref())?;
        Ok(Self {
            reader: BufReader::new(file),
            pos: 0,
        })
    }

    /// Iterate over `(byte_offset, row)`, `row` being `Err` for a line that
    /// is not a valid JSON object.
    pub fn rows(&mut self) -> JsonlRows<'_> {
        JsonlRows { inner: self }
    }
}

/// Iterator returned by [`JsonlReader::rows`].
pub struct JsonlRows<'a> {
    inner: &'a mut JsonlReader,
}

impl Iterator for JsonlRows<'_> {
    type Item = (u64, Result<Document>);

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let offset = self.inner.pos;
            let mut line = String::new();
            let n = match self.inner.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(n) => n,
                Err(e) => return Some((offset, Err(Error::Io(e)))),
            };
            self.inner.pos += n as u64;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.is_empty() {
                continue;
            }
            let parsed: std::result::Result<serde_json::Value, _> = serde_json::from_str(trimmed);
            return Some(match parsed {
                Ok(serde_json::Value::Object(map)) => {
                    let doc = map
                        .into_iter()
                        .map(|(k, v)| (k, json_value_to_string(&v)))
                        .collect();
                    (offset, Ok(doc))
                }
                Ok(_) => (
                    offset,
                    Err(Error::Format("JSON line is not an object".to_string())),
                ),
                Err(e) => (offset, Err(Error::Format(format!("JSON parse error: {e}")))),
            });
        }
    }
}

fn json_value_to_string(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Identifies where a document's row bytes can be re-read from for
/// materialization in [`crate::engine::Bm25Engine::get_topk_docs`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceOrigin {
    Csv(PathBuf),
    Jsonl(PathBuf),
    /// Rows supplied via `index_documents`, persisted to a synthetic JSONL
    /// file alongside the index on save.
    Memory,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn csv_reader_yields_all_columns_and_offsets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "title,artist").unwrap();
        writeln!(file, "the wall,pink floyd").unwrap();
        writeln!(file, "pink moon,nick drake").unwrap();
        let mut reader = CsvReader::open(file.path()).unwrap();
        assert_eq!(
            reader.headers(),
            &["title".to_string(), "artist".to_string()]
        );
        let rows: Vec<_> = reader.rows().collect();
        assert_eq!(rows.len(), 2);
        let (offset0, doc0) = &rows[0];
        assert_eq!(*offset0, "title,artist\n".len() as u64);
        let doc0 = doc0.as_ref().unwrap();
        assert_eq!(doc0.get("title").unwrap(), "the wall");
        assert_eq!(doc0.get("artist").unwrap(), "pink floyd");
    }

    #[test]
    fn csv_reader_flags_wrong_field_count() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "a,b").unwrap();
        writeln!(file, "1").unwrap();
        let mut reader = CsvReader::open(file.path()).unwrap();
        let rows: Vec<_> = reader.rows().collect();
        assert!(rows[0].1.is_err());
    }

    #[test]
    fn jsonl_reader_parses_objects_and_tracks_offsets() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"title": "hello world"}}"#).unwrap();
        writeln!(file, r#"{{"title": "goodbye world"}}"#).unwrap();
        let mut reader = JsonlReader::open(file.path()).unwrap();
        let rows: Vec<_> = reader.rows().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].0, 0);
        assert_eq!(
            rows[0].1.as_ref().unwrap().get("title").unwrap(),
            "hello world"
        );
        assert!(rows[1].0 > 0);
    }

    #[test]
    fn jsonl_reader_flags_non_object_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[1,2,3]").unwrap();
        let mut reader = JsonlReader::open(file.path()).unwrap();
        let rows: Vec<_> = reader.rows().collect();
        assert!(rows[0].1.is_err());
    }

    #[test]
    fn jsonl_reader_skips_blank_lines() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"a": "1"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"a": "2"}}"#).unwrap();
        let mut reader = JsonlReader::open(file.path()).unwrap();
        let rows: Vec<_> = reader.rows().collect();
        assert_eq!(rows.len(), 2);
    }
}
