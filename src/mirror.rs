//! Line-oriented mirror format.
//!
//! One JSON object per line. The first non-empty line may be a metadata
//! record of the form `{"_meta":{...}}`; readers skip it without looking at
//! any other line specially. Files may be gzip-compressed as a whole.

use crate::timestamp::serde_ts;
use crate::types::ContextValue;
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use flate2::bufread::MultiGzDecoder;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Schema name written into the metadata line.
pub const SCHEMA_NAME: &str = "tasksync-mirror";

/// Version of the record layout.
pub const SCHEMA_VERSION: u32 = 1;

/// Key that marks the metadata line.
pub const META_KEY: &str = "_meta";

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Contents of the optional leading metadata line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorMeta {
    pub schema: String,
    pub schema_version: u32,
    #[serde(default, with = "serde_ts::option", skip_serializing_if = "Option::is_none")]
    pub exported_at: Option<DateTime<Utc>>,
    pub record_count: usize,
}

impl MirrorMeta {
    pub fn new(exported_at: Option<DateTime<Utc>>, record_count: usize) -> Self {
        Self {
            schema: SCHEMA_NAME.to_string(),
            schema_version: SCHEMA_VERSION,
            exported_at,
            record_count,
        }
    }

    /// Render as a single mirror line (without the newline).
    pub fn to_line(&self) -> Result<String> {
        #[derive(Serialize)]
        struct MetaLine<'a> {
            #[serde(rename = "_meta")]
            meta: &'a MirrorMeta,
        }
        serde_json::to_string(&MetaLine { meta: self }).context("Failed to serialize mirror metadata")
    }
}

/// A task record as it appears on disk, before validation.
///
/// Every field is optional and enums and timestamps stay textual so that a
/// bad value is reported by field instead of failing the whole line.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RawRecord {
    pub id: Option<String>,
    pub title: Option<String>,
    pub description: Option<String>,
    pub status: Option<String>,
    pub priority: Option<String>,
    pub tags: Option<Vec<String>>,
    pub depends_on: Option<Vec<String>>,
    pub assignee: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub completed_at: Option<String>,
    pub due_date: Option<String>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub context: Option<BTreeMap<String, ContextValue>>,
    pub origin_id: Option<String>,
}

/// A line that could not be used. Returned in import reports, never raised.
#[derive(Debug, Clone, PartialEq)]
pub struct CorruptRecordWarning {
    pub line: usize,
    pub id: Option<String>,
    pub reason: String,
}

impl CorruptRecordWarning {
    pub fn new(line: usize, id: Option<String>, reason: impl Into<String>) -> Self {
        Self {
            line,
            id,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for CorruptRecordWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.id {
            Some(id) => write!(f, "line {} ({}): {}", self.line, id, self.reason),
            None => write!(f, "line {}: {}", self.line, self.reason),
        }
    }
}

/// One item produced by [`MirrorReader`].
#[derive(Debug, Clone, PartialEq)]
pub enum MirrorEntry {
    Record { line: usize, record: RawRecord },
    Corrupt(CorruptRecordWarning),
}

/// Streaming reader: one line in memory at a time.
///
/// Malformed lines come back as [`MirrorEntry::Corrupt`] and reading
/// continues; only I/O failures end the stream with an error.
pub struct MirrorReader<R> {
    reader: R,
    buf: Vec<u8>,
    line: usize,
    seen_content: bool,
    meta: Option<MirrorMeta>,
}

impl<R: BufRead> MirrorReader<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: Vec::new(),
            line: 0,
            seen_content: false,
            meta: None,
        }
    }

    /// Metadata, once the first line has been read.
    pub fn meta(&self) -> Option<&MirrorMeta> {
        self.meta.as_ref()
    }

    fn parse_line(&mut self, text: &str) -> Option<MirrorEntry> {
        let line = self.line;
        let first = !self.seen_content;
        self.seen_content = true;

        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(value) => value,
            Err(e) => {
                return Some(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                    line,
                    None,
                    format!("invalid JSON: {}", e),
                )));
            }
        };

        let Some(object) = value.as_object() else {
            return Some(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                line,
                None,
                "record is not a JSON object",
            )));
        };

        if let Some(meta) = object.get(META_KEY) {
            if !first {
                return Some(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                    line,
                    None,
                    "metadata line after the first line",
                )));
            }
            return match MirrorMeta::deserialize(meta) {
                Ok(meta) => {
                    if meta.schema_version > SCHEMA_VERSION {
                        log::warn!(
                            "Mirror schema version {} is newer than supported version {}",
                            meta.schema_version,
                            SCHEMA_VERSION
                        );
                    }
                    self.meta = Some(meta);
                    None
                }
                Err(e) => Some(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                    line,
                    None,
                    format!("invalid metadata: {}", e),
                ))),
            };
        }

        let id = object.get("id").and_then(|v| v.as_str()).map(String::from);
        match RawRecord::deserialize(&value) {
            Ok(record) => Some(MirrorEntry::Record { line, record }),
            Err(e) => Some(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                line,
                id,
                format!("invalid record: {}", e),
            ))),
        }
    }
}

impl<R: BufRead> Iterator for MirrorReader<R> {
    type Item = Result<MirrorEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            self.buf.clear();
            match self.reader.read_until(b'\n', &mut self.buf) {
                Ok(0) => return None,
                Ok(_) => {}
                Err(e) => {
                    return Some(Err(e).with_context(|| format!("Failed to read mirror line {}", self.line + 1)));
                }
            }
            self.line += 1;

            let text = match std::str::from_utf8(&self.buf) {
                Ok(text) => text.trim().to_string(),
                Err(e) => {
                    self.seen_content = true;
                    return Some(Ok(MirrorEntry::Corrupt(CorruptRecordWarning::new(
                        self.line,
                        None,
                        format!("invalid UTF-8: {}", e),
                    ))));
                }
            };
            if text.is_empty() {
                continue;
            }

            if let Some(entry) = self.parse_line(&text) {
                return Some(Ok(entry));
            }
        }
    }
}

/// Whether a path names a compressed mirror.
pub fn is_gzip_path(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == "gz")
}

/// Open a mirror file for reading, decompressing when it starts with the
/// gzip magic bytes regardless of its name.
pub fn open_snapshot(path: &Path) -> Result<MirrorReader<Box<dyn BufRead>>> {
    let file = File::open(path).with_context(|| format!("Failed to open snapshot {}", path.display()))?;
    let mut reader = BufReader::new(file);
    let head = reader
        .fill_buf()
        .with_context(|| format!("Failed to read snapshot {}", path.display()))?;

    let inner: Box<dyn BufRead> = if head.starts_with(&GZIP_MAGIC) {
        log::debug!("Reading gzip snapshot {}", path.display());
        Box::new(BufReader::new(MultiGzDecoder::new(reader)))
    } else {
        Box::new(reader)
    };
    Ok(MirrorReader::new(inner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::Compression;
    use flate2::write::GzEncoder;
    use std::io::{Cursor, Write};
    use tempfile::TempDir;

    fn entries(text: &str) -> (Vec<MirrorEntry>, Option<MirrorMeta>) {
        let mut reader = MirrorReader::new(Cursor::new(text.as_bytes().to_vec()));
        let entries = reader.by_ref().map(|e| e.unwrap()).collect();
        (entries, reader.meta().cloned())
    }

    #[test]
    fn test_meta_line_skipped() {
        let meta = MirrorMeta::new(None, 1).to_line().unwrap();
        assert_eq!(
            meta,
            r#"{"_meta":{"schema":"tasksync-mirror","schema_version":1,"record_count":1}}"#
        );

        let text = format!("{}\n{{\"id\":\"tk-a\",\"title\":\"Hello world\"}}\n", meta);
        let (entries, meta) = entries(&text);
        assert_eq!(meta.unwrap().record_count, 1);
        assert_eq!(entries.len(), 1);
        match &entries[0] {
            MirrorEntry::Record { line, record } => {
                assert_eq!(*line, 2);
                assert_eq!(record.id.as_deref(), Some("tk-a"));
                assert_eq!(record.title.as_deref(), Some("Hello world"));
            }
            other => panic!("expected record, got {:?}", other),
        }
    }

    #[test]
    fn test_corrupt_lines_reported_and_reading_continues() {
        let text = concat!(
            "{\"id\":\"tk-a\",\"title\":\"First task\"}\n",
            "{not json\n",
            "\n",
            "[1, 2]\n",
            "{\"id\":\"tk-b\",\"title\":42}\n",
            "{\"_meta\":{\"schema\":\"tasksync-mirror\",\"schema_version\":1,\"record_count\":0}}\n",
            "{\"id\":\"tk-c\",\"title\":\"Third task\"}\n",
        );
        let (entries, meta) = entries(text);
        assert!(meta.is_none());

        let lines: Vec<(usize, bool)> = entries
            .iter()
            .map(|e| match e {
                MirrorEntry::Record { line, .. } => (*line, true),
                MirrorEntry::Corrupt(w) => (w.line, false),
            })
            .collect();
        assert_eq!(
            lines,
            vec![(1, true), (2, false), (4, false), (5, false), (6, false), (7, true)]
        );

        match &entries[3] {
            MirrorEntry::Corrupt(w) => assert_eq!(w.id.as_deref(), Some("tk-b")),
            other => panic!("expected corrupt entry, got {:?}", other),
        }
    }

    #[test]
    fn test_invalid_utf8_is_a_warning() {
        let mut bytes = b"{\"id\":\"tk-a\",\"title\":\"First task\"}\n".to_vec();
        bytes.extend_from_slice(&[0xff, 0xfe, b'\n']);
        bytes.extend_from_slice(b"{\"id\":\"tk-b\",\"title\":\"Second task\"}\n");

        let reader = MirrorReader::new(Cursor::new(bytes));
        let entries: Vec<MirrorEntry> = reader.map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 3);
        assert!(matches!(&entries[1], MirrorEntry::Corrupt(w) if w.line == 2));
    }

    #[test]
    fn test_open_snapshot_detects_gzip_by_content() {
        let temp_dir = TempDir::new().unwrap();
        let text = "{\"id\":\"tk-a\",\"title\":\"First task\"}\n";

        // Deliberately no .gz extension
        let path = temp_dir.path().join("snapshot.jsonl");
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(text.as_bytes()).unwrap();
        std::fs::write(&path, encoder.finish().unwrap()).unwrap();

        let entries: Vec<MirrorEntry> = open_snapshot(&path).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries.len(), 1);

        let plain = temp_dir.path().join("plain.jsonl");
        std::fs::write(&plain, text).unwrap();
        let plain_entries: Vec<MirrorEntry> = open_snapshot(&plain).unwrap().map(|e| e.unwrap()).collect();
        assert_eq!(entries, plain_entries);
    }

    #[test]
    fn test_is_gzip_path() {
        assert!(is_gzip_path(Path::new("tasks.jsonl.gz")));
        assert!(!is_gzip_path(Path::new("tasks.jsonl")));
    }
}
