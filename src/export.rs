//! Export tasks to the line-oriented mirror format.

use crate::atomic::AtomicFile;
use crate::mirror::{MirrorMeta, is_gzip_path};
use crate::query::{SortKey, TaskFilter};
use crate::store::Store;
use crate::timestamp;
use crate::types::{Priority, Status, Task};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use flate2::GzBuilder;
use std::collections::BTreeSet;
use std::fmt;
use std::io::{self, Write};
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

/// Selections at or below this size are measured exactly by `estimate_size`.
pub const EXACT_ESTIMATE_LIMIT: usize = 500;

/// Records serialized when sampling a larger selection.
const ESTIMATE_SAMPLE: usize = 100;

/// Optional fields that can be left out of an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ExportField {
    Description,
    Tags,
    DependsOn,
    Assignee,
    CompletedAt,
    DueDate,
    EstimatedHours,
    ActualHours,
    Context,
    OriginId,
}

impl ExportField {
    pub const ALL: [ExportField; 10] = [
        ExportField::Description,
        ExportField::Tags,
        ExportField::DependsOn,
        ExportField::Assignee,
        ExportField::CompletedAt,
        ExportField::DueDate,
        ExportField::EstimatedHours,
        ExportField::ActualHours,
        ExportField::Context,
        ExportField::OriginId,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ExportField::Description => "description",
            ExportField::Tags => "tags",
            ExportField::DependsOn => "depends_on",
            ExportField::Assignee => "assignee",
            ExportField::CompletedAt => "completed_at",
            ExportField::DueDate => "due_date",
            ExportField::EstimatedHours => "estimated_hours",
            ExportField::ActualHours => "actual_hours",
            ExportField::Context => "context",
            ExportField::OriginId => "origin_id",
        }
    }

    fn clear(&self, task: &mut Task) {
        match self {
            ExportField::Description => task.description = None,
            ExportField::Tags => task.tags.clear(),
            ExportField::DependsOn => task.depends_on.clear(),
            ExportField::Assignee => task.assignee = None,
            ExportField::CompletedAt => task.completed_at = None,
            ExportField::DueDate => task.due_date = None,
            ExportField::EstimatedHours => task.estimated_hours = None,
            ExportField::ActualHours => task.actual_hours = None,
            ExportField::Context => task.context.clear(),
            ExportField::OriginId => task.origin_id = None,
        }
    }
}

impl fmt::Display for ExportField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExportField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        ExportField::ALL
            .into_iter()
            .find(|field| field.as_str() == s)
            .ok_or_else(|| format!("'{}' is not an optional field that can be excluded", s))
    }
}

/// What the metadata line reports as `exported_at`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportStamp {
    /// Latest `updated_at` among the exported records; stable for unchanged data.
    #[default]
    Watermark,
    /// Wall clock at export time.
    Now,
}

/// Whole-file compression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

impl Compression {
    /// Gzip for `.gz` paths, plain otherwise.
    pub fn from_path(path: &Path) -> Self {
        if is_gzip_path(path) {
            Compression::Gzip
        } else {
            Compression::None
        }
    }
}

/// Caller-supplied record filter.
#[derive(Clone)]
pub struct TaskPredicate(Arc<dyn Fn(&Task) -> bool + Send + Sync>);

impl TaskPredicate {
    pub fn new(f: impl Fn(&Task) -> bool + Send + Sync + 'static) -> Self {
        Self(Arc::new(f))
    }

    pub fn test(&self, task: &Task) -> bool {
        (self.0)(task)
    }
}

impl fmt::Debug for TaskPredicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("TaskPredicate(..)")
    }
}

/// Export options.
#[derive(Debug, Clone)]
pub struct ExportOptions {
    pub include_metadata: bool,
    pub stamp: ExportStamp,
    pub exclude: BTreeSet<ExportField>,
    pub filter: TaskFilter,
    pub predicate: Option<TaskPredicate>,
    /// Only records with `updated_at` strictly after this watermark.
    pub since: Option<DateTime<Utc>>,
    /// Record order; `None` keeps the input order.
    pub sort: Option<SortKey>,
    pub compression: Compression,
}

impl Default for ExportOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            stamp: ExportStamp::Watermark,
            exclude: BTreeSet::new(),
            filter: TaskFilter::default(),
            predicate: None,
            since: None,
            sort: None,
            compression: Compression::None,
        }
    }
}

impl ExportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Canonical form used for the mirror and backups: creation order, metadata on.
    pub fn canonical() -> Self {
        Self::new().sort(SortKey::CreatedAt)
    }

    pub fn metadata(mut self, include: bool) -> Self {
        self.include_metadata = include;
        self
    }

    pub fn stamp(mut self, stamp: ExportStamp) -> Self {
        self.stamp = stamp;
        self
    }

    pub fn exclude(mut self, field: ExportField) -> Self {
        self.exclude.insert(field);
        self
    }

    pub fn filter(mut self, filter: TaskFilter) -> Self {
        self.filter = filter;
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.filter = self.filter.status(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.filter = self.filter.priority(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.filter = self.filter.assignee(assignee);
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.filter = self.filter.tag(tag);
        self
    }

    pub fn predicate(mut self, f: impl Fn(&Task) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(TaskPredicate::new(f));
        self
    }

    pub fn since(mut self, watermark: DateTime<Utc>) -> Self {
        self.since = Some(watermark);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    fn selects(&self, task: &Task) -> bool {
        self.filter.matches(task)
            && self.since.is_none_or(|since| task.updated_at > since)
            && self.predicate.as_ref().is_none_or(|p| p.test(task))
    }

    /// Filtered, sorted and limited view of `tasks`.
    fn select<'t>(&self, tasks: &'t [Task]) -> Vec<&'t Task> {
        let mut selected: Vec<&Task> = tasks.iter().filter(|t| self.selects(t)).collect();
        if let Some(key) = self.sort.or(self.filter.sort) {
            selected.sort_by(|a, b| key.compare(a, b));
        }
        if let Some(limit) = self.filter.limit {
            selected.truncate(limit);
        }
        selected
    }

    fn render(&self, task: &Task) -> Result<String> {
        let line = if self.exclude.is_empty() {
            serde_json::to_string(task)
        } else {
            let mut projected = task.clone();
            for field in &self.exclude {
                field.clear(&mut projected);
            }
            serde_json::to_string(&projected)
        };
        line.with_context(|| format!("Failed to serialize task {}", task.id))
    }

    fn meta_line(&self, selected: &[&Task]) -> Result<Option<String>> {
        if !self.include_metadata {
            return Ok(None);
        }
        let exported_at = match self.stamp {
            ExportStamp::Watermark => selected.iter().map(|t| t.updated_at).max(),
            ExportStamp::Now => Some(timestamp::now()),
        };
        MirrorMeta::new(exported_at, selected.len()).to_line().map(Some)
    }
}

/// Result of an export.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportSummary {
    pub records: usize,
    /// Uncompressed bytes written, metadata line included.
    pub bytes: u64,
    /// Latest `updated_at` among exported records; feed back as `since`
    /// for the next incremental export.
    pub watermark: Option<DateTime<Utc>>,
}

/// Preview of an export's size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SizeEstimate {
    pub records: usize,
    /// Bytes on disk, after compression when enabled.
    pub bytes: u64,
    /// False when extrapolated from a sample.
    pub exact: bool,
}

/// Serialize `tasks` to `writer`, one record per line.
pub fn export<W: Write>(tasks: &[Task], opts: &ExportOptions, writer: W) -> Result<ExportSummary> {
    export_selected(&opts.select(tasks), opts, writer)
}

fn export_selected<W: Write>(selected: &[&Task], opts: &ExportOptions, writer: W) -> Result<ExportSummary> {
    match opts.compression {
        Compression::None => write_lines(selected, opts, writer),
        Compression::Gzip => {
            // Zero mtime and no file name keep the output deterministic
            let mut encoder = GzBuilder::new().mtime(0).write(writer, flate2::Compression::default());
            let summary = write_lines(selected, opts, &mut encoder)?;
            encoder.finish().context("Failed to finish gzip stream")?;
            Ok(summary)
        }
    }
}

fn write_lines<W: Write>(selected: &[&Task], opts: &ExportOptions, mut writer: W) -> Result<ExportSummary> {
    let mut bytes = 0u64;
    let mut emit = |line: &str| -> Result<()> {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        bytes += line.len() as u64 + 1;
        Ok(())
    };

    if let Some(meta) = opts.meta_line(selected)? {
        emit(&meta)?;
    }
    for task in selected {
        emit(&opts.render(task)?)?;
    }
    writer.flush().context("Failed to flush export")?;

    Ok(ExportSummary {
        records: selected.len(),
        bytes,
        watermark: selected.iter().map(|t| t.updated_at).max(),
    })
}

/// Export into memory.
pub fn export_to_vec(tasks: &[Task], opts: &ExportOptions) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    export(tasks, opts, &mut out)?;
    Ok(out)
}

/// Export into a string, ignoring any compression setting.
pub fn export_to_string(tasks: &[Task], opts: &ExportOptions) -> Result<String> {
    let plain = ExportOptions {
        compression: Compression::None,
        ..opts.clone()
    };
    let bytes = export_to_vec(tasks, &plain)?;
    String::from_utf8(bytes).context("Export produced invalid UTF-8")
}

/// Export to a file, replacing it atomically.
pub fn export_to_path(tasks: &[Task], opts: &ExportOptions, path: &Path) -> Result<ExportSummary> {
    let mut file = AtomicFile::create(path)?;
    let summary = export(tasks, opts, &mut file)?;
    file.commit()?;
    log::info!("Exported {} task(s) to {}", summary.records, path.display());
    Ok(summary)
}

/// Byte counter standing in for a file.
#[derive(Default)]
struct CountingWriter {
    bytes: u64,
}

impl Write for CountingWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Size of an export without writing it anywhere.
///
/// Exact up to [`EXACT_ESTIMATE_LIMIT`] records. Above that an evenly spaced
/// sample is serialized and scaled up, including its compression ratio.
pub fn estimate_size(tasks: &[Task], opts: &ExportOptions) -> Result<SizeEstimate> {
    let selected = opts.select(tasks);
    let records = selected.len();

    if records <= EXACT_ESTIMATE_LIMIT {
        let mut counter = CountingWriter::default();
        export_selected(&selected, opts, &mut counter)?;
        return Ok(SizeEstimate {
            records,
            bytes: counter.bytes,
            exact: true,
        });
    }

    let step = records.div_ceil(ESTIMATE_SAMPLE);
    let sample: Vec<&Task> = selected.iter().step_by(step).copied().collect();

    let mut sample_bytes = 0u64;
    for task in &sample {
        sample_bytes += opts.render(task)?.len() as u64 + 1;
    }
    let meta_bytes = opts.meta_line(&selected)?.map_or(0, |m| m.len() as u64 + 1);
    let plain = meta_bytes + sample_bytes * records as u64 / sample.len() as u64;

    let bytes = match opts.compression {
        Compression::None => plain,
        Compression::Gzip => {
            let mut counter = CountingWriter::default();
            export_selected(&sample, &opts.clone().metadata(false), &mut counter)?;
            (plain as f64 * counter.bytes as f64 / sample_bytes.max(1) as f64).ceil() as u64
        }
    };

    Ok(SizeEstimate {
        records,
        bytes,
        exact: false,
    })
}

/// Extension trait to export straight from a Store.
pub trait StoreExportExt {
    fn export_to<W: Write>(&self, opts: &ExportOptions, writer: W) -> Result<ExportSummary>;
    fn export_path(&self, opts: &ExportOptions, path: &Path) -> Result<ExportSummary>;
    fn estimate_export(&self, opts: &ExportOptions) -> Result<SizeEstimate>;
}

impl Store {
    /// Candidate tasks for an export; the SQL side applies the filter, sort
    /// and limit are applied afterwards.
    fn export_candidates(&self, opts: &ExportOptions) -> Result<Vec<Task>> {
        let filter = TaskFilter {
            sort: None,
            limit: None,
            ..opts.filter.clone()
        };
        self.list(&filter)
    }
}

impl StoreExportExt for Store {
    fn export_to<W: Write>(&self, opts: &ExportOptions, writer: W) -> Result<ExportSummary> {
        export(&self.export_candidates(opts)?, opts, writer)
    }

    fn export_path(&self, opts: &ExportOptions, path: &Path) -> Result<ExportSummary> {
        export_to_path(&self.export_candidates(opts)?, opts, path)
    }

    fn estimate_export(&self, opts: &ExportOptions) -> Result<SizeEstimate> {
        estimate_size(&self.export_candidates(opts)?, opts)
    }
}
