//! Import mirror snapshots into the store.
//!
//! The whole import runs in one transaction: records stream in line by line,
//! each is validated and resolved against the local copy, and the graph is
//! re-checked at the end. A cycle or (in strict mode) a dangling dependency
//! rolls everything back. Corrupt lines are reported and skipped.

use crate::error::StoreError;
use crate::graph::DependencyGraph;
use crate::merge::merge;
use crate::mirror::{CorruptRecordWarning, MirrorEntry, MirrorReader, RawRecord, open_snapshot};
use crate::storage::{Repo, Storage};
use crate::store::{Store, check_fields, fresh_id};
use crate::timestamp;
use crate::types::{Priority, Status, Task, ValidationError, duplicate_tags};
use chrono::{DateTime, Utc};
use eyre::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::io::BufRead;
use std::path::Path;
use std::str::FromStr;

/// What to do when an incoming id already exists locally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictResolution {
    /// Local wins.
    Skip,
    /// Incoming wins.
    Overwrite,
    /// Field-level merge, see [`crate::merge::merge`].
    Merge,
    /// Insert incoming under a fresh id that remembers the original.
    CreateNew,
}

impl ConflictResolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConflictResolution::Skip => "skip",
            ConflictResolution::Overwrite => "overwrite",
            ConflictResolution::Merge => "merge",
            ConflictResolution::CreateNew => "create_new",
        }
    }
}

impl fmt::Display for ConflictResolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConflictResolution {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "skip" => Ok(ConflictResolution::Skip),
            "overwrite" => Ok(ConflictResolution::Overwrite),
            "merge" => Ok(ConflictResolution::Merge),
            "create_new" | "create-new" => Ok(ConflictResolution::CreateNew),
            other => Err(format!(
                "unknown conflict resolution '{}' (expected skip, overwrite, merge or create_new)",
                other
            )),
        }
    }
}

/// Import options.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportOptions {
    /// `None` with `strict` fails on the first collision; without `strict`
    /// colliding records are skipped.
    pub resolution: Option<ConflictResolution>,
    pub strict: bool,
    /// Run everything, report, then roll back.
    pub dry_run: bool,
}

impl ImportOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolution(mut self, resolution: ConflictResolution) -> Self {
        self.resolution = Some(resolution);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Per-record outcome.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordAction {
    Created,
    Updated,
    Unchanged,
    Skipped,
    CreatedNew { new_id: String },
    Rejected,
}

impl RecordAction {
    /// Whether this outcome writes to the store.
    pub fn is_change(&self) -> bool {
        matches!(
            self,
            RecordAction::Created | RecordAction::Updated | RecordAction::CreatedNew { .. }
        )
    }
}

/// One diff entry in an import report.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordChange {
    pub line: usize,
    pub id: Option<String>,
    pub action: RecordAction,
    /// Fields that differ from the local copy (updates only).
    pub fields: Vec<&'static str>,
    pub note: Option<String>,
}

/// What an import did, or would do for a dry run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ImportReport {
    pub dry_run: bool,
    pub records_read: usize,
    pub changes: Vec<RecordChange>,
    pub warnings: Vec<CorruptRecordWarning>,
}

impl ImportReport {
    fn count(&self, f: impl Fn(&RecordAction) -> bool) -> usize {
        self.changes.iter().filter(|c| f(&c.action)).count()
    }

    pub fn created(&self) -> usize {
        self.count(|a| *a == RecordAction::Created)
    }

    pub fn updated(&self) -> usize {
        self.count(|a| *a == RecordAction::Updated)
    }

    pub fn unchanged(&self) -> usize {
        self.count(|a| *a == RecordAction::Unchanged)
    }

    pub fn skipped(&self) -> usize {
        self.count(|a| *a == RecordAction::Skipped)
    }

    pub fn created_new(&self) -> usize {
        self.count(|a| matches!(a, RecordAction::CreatedNew { .. }))
    }

    pub fn rejected(&self) -> usize {
        self.count(|a| *a == RecordAction::Rejected)
    }

    /// Records that were (or would be) written.
    pub fn applied(&self) -> usize {
        self.count(RecordAction::is_change)
    }

    pub fn has_changes(&self) -> bool {
        self.applied() > 0
    }

    fn push(&mut self, line: usize, id: Option<String>, action: RecordAction) -> &mut RecordChange {
        self.changes.push(RecordChange {
            line,
            id,
            action,
            fields: Vec::new(),
            note: None,
        });
        let last = self.changes.len() - 1;
        &mut self.changes[last]
    }

    fn warn(&mut self, line: usize, id: Option<String>, reason: impl Into<String>) {
        let warning = CorruptRecordWarning::new(line, id, reason);
        log::warn!("Import: {}", warning);
        self.warnings.push(warning);
    }
}

fn parse_timestamp(
    field: &'static str,
    value: &Option<String>,
    errors: &mut Vec<ValidationError>,
) -> Option<DateTime<Utc>> {
    let value = value.as_deref()?;
    match timestamp::parse(value) {
        Ok(ts) => Some(ts),
        Err(_) => {
            errors.push(ValidationError::InvalidTimestamp {
                field,
                value: value.to_string(),
            });
            None
        }
    }
}

/// Turn a raw record into a task.
///
/// Both modes reject a missing or invalid id or title, values outside the
/// status and priority vocabularies, unparseable timestamps, self-dependency
/// and any length or size limit. Strict mode also requires status, priority
/// and both timestamps, and rejects duplicate tags and inconsistent
/// `completed_at`; lenient mode fills those in.
pub fn validate(raw: &RawRecord, strict: bool) -> Result<Task, Vec<ValidationError>> {
    let mut errors = Vec::new();

    let id = match raw.id.as_deref().map(str::trim) {
        Some(id) if !id.is_empty() => id.to_string(),
        _ => {
            errors.push(ValidationError::MissingField("id"));
            String::new()
        }
    };
    let title = match &raw.title {
        Some(title) => title.clone(),
        None => {
            errors.push(ValidationError::MissingField("title"));
            String::new()
        }
    };

    let status = match raw.status.as_deref() {
        Some(s) => s.parse::<Status>().map_err(|e| errors.push(ValidationError::InvalidStatus(e.value))).ok(),
        None if strict => {
            errors.push(ValidationError::MissingField("status"));
            None
        }
        None => Some(Status::default()),
    };
    let priority = match raw.priority.as_deref() {
        Some(p) => p
            .parse::<Priority>()
            .map_err(|e| errors.push(ValidationError::InvalidPriority(e.value)))
            .ok(),
        None if strict => {
            errors.push(ValidationError::MissingField("priority"));
            None
        }
        None => Some(Priority::default()),
    };

    let created_at = parse_timestamp("created_at", &raw.created_at, &mut errors);
    let updated_at = parse_timestamp("updated_at", &raw.updated_at, &mut errors);
    let mut completed_at = parse_timestamp("completed_at", &raw.completed_at, &mut errors);
    let due_date = parse_timestamp("due_date", &raw.due_date, &mut errors);
    if strict {
        if raw.created_at.is_none() {
            errors.push(ValidationError::MissingField("created_at"));
        }
        if raw.updated_at.is_none() {
            errors.push(ValidationError::MissingField("updated_at"));
        }
    }

    let tags = raw.tags.clone().unwrap_or_default();
    if strict {
        errors.extend(duplicate_tags(&tags));
    }

    let depends_on = raw.depends_on.clone().unwrap_or_default();
    if !id.is_empty() && depends_on.contains(&id) {
        errors.push(ValidationError::SelfDependency(id.clone()));
    }

    let mut assignee = raw.assignee.clone();
    if !strict && assignee.as_deref().is_some_and(|a| a.trim().is_empty()) {
        assignee = None;
    }

    // Timestamp defaults for lenient mode
    let (created_at, mut updated_at) = match (created_at, updated_at) {
        (Some(c), Some(u)) => (c, u),
        (Some(c), None) => (c, c),
        (None, Some(u)) => (u, u),
        (None, None) => {
            let now = timestamp::now();
            (now, now)
        }
    };
    if !strict && updated_at < created_at {
        updated_at = created_at;
    }

    if !errors.is_empty() {
        // Still run field checks so the caller sees every problem at once
        let probe = Task {
            id: id.clone(),
            title: title.clone(),
            ..placeholder(created_at)
        };
        errors.extend(probe.validate().into_iter().filter(|e| {
            matches!(
                e,
                ValidationError::TitleTooShort { .. }
                    | ValidationError::TitleTooLong { .. }
                    | ValidationError::InvalidCharacters("title")
            )
        }));
        return Err(errors);
    }

    let status = status.unwrap_or_default();
    if !strict {
        if status != Status::Done {
            completed_at = None;
        } else if completed_at.is_none() {
            completed_at = Some(updated_at);
        }
    } else if status == Status::Done && completed_at.is_none() {
        errors.push(ValidationError::MissingField("completed_at"));
    }

    let task = Task {
        id,
        title,
        description: raw.description.clone(),
        status,
        priority: priority.unwrap_or_default(),
        tags: tags.into_iter().collect(),
        depends_on: depends_on.into_iter().collect(),
        assignee,
        created_at,
        updated_at,
        completed_at,
        due_date,
        estimated_hours: raw.estimated_hours,
        actual_hours: raw.actual_hours,
        context: raw.context.clone().unwrap_or_default(),
        origin_id: raw.origin_id.clone(),
    };

    errors.extend(task.validate());
    if errors.is_empty() { Ok(task) } else { Err(errors) }
}

fn placeholder(at: DateTime<Utc>) -> Task {
    Task {
        id: String::new(),
        title: String::new(),
        description: None,
        status: Status::default(),
        priority: Priority::default(),
        tags: Default::default(),
        depends_on: Default::default(),
        assignee: None,
        created_at: at,
        updated_at: at,
        completed_at: None,
        due_date: None,
        estimated_hours: None,
        actual_hours: None,
        context: Default::default(),
        origin_id: None,
    }
}

fn describe(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(|e| format!("{}: {}", e.field(), e))
        .collect::<Vec<_>>()
        .join("; ")
}

/// Import a mirror stream into `storage`.
pub(crate) fn import_records<R: BufRead>(
    storage: &mut Storage,
    reader: MirrorReader<R>,
    opts: &ImportOptions,
) -> Result<ImportReport> {
    let report = storage.transaction(!opts.dry_run, |repo| {
        let mut report = ImportReport {
            dry_run: opts.dry_run,
            ..ImportReport::default()
        };
        let mut seen: HashSet<String> = HashSet::new();

        for entry in reader {
            match entry? {
                MirrorEntry::Corrupt(warning) => {
                    log::warn!("Import: {}", warning);
                    report.warnings.push(warning);
                }
                MirrorEntry::Record { line, record } => {
                    report.records_read += 1;
                    apply_record(repo, &mut report, &mut seen, line, &record, opts)?;
                }
            }
        }

        check_integrity(repo, &mut report, opts.strict)?;
        Ok(report)
    })?;

    log::info!(
        "Import{}: {} read, {} created, {} updated, {} unchanged, {} skipped, {} copied, {} rejected, {} warning(s)",
        if report.dry_run { " (dry run)" } else { "" },
        report.records_read,
        report.created(),
        report.updated(),
        report.unchanged(),
        report.skipped(),
        report.created_new(),
        report.rejected(),
        report.warnings.len()
    );
    Ok(report)
}

fn apply_record(
    repo: &Repo<'_>,
    report: &mut ImportReport,
    seen: &mut HashSet<String>,
    line: usize,
    record: &RawRecord,
    opts: &ImportOptions,
) -> Result<()> {
    let incoming = match validate(record, opts.strict) {
        Ok(task) => task,
        Err(errors) => {
            let reason = format!("rejected: {}", describe(&errors));
            report.warn(line, record.id.clone(), reason.clone());
            report.push(line, record.id.clone(), RecordAction::Rejected).note = Some(reason);
            return Ok(());
        }
    };
    let id = incoming.id.clone();

    if !seen.insert(id.clone()) {
        report.warn(line, Some(id.clone()), "duplicate id in snapshot, earlier line kept");
        report.push(line, Some(id), RecordAction::Skipped).note = Some("duplicate id in snapshot".to_string());
        return Ok(());
    }

    if repo.is_retired(&id)? {
        report.push(line, Some(id), RecordAction::Skipped).note = Some("deleted locally".to_string());
        return Ok(());
    }

    // Deleting a task cleaned it out of every dependent; the snapshot may predate that
    let mut incoming = incoming;
    let mut deleted_deps = Vec::new();
    for dep in &incoming.depends_on {
        if repo.is_retired(dep)? {
            deleted_deps.push(dep.clone());
        }
    }
    for dep in &deleted_deps {
        log::debug!("Import: {} loses dependency on deleted task {}", id, dep);
        incoming.depends_on.remove(dep);
    }

    let Some(local) = repo.get_task(&id)? else {
        repo.put_task(&incoming)?;
        repo.append_audit(&id, "imported", Some("created"))?;
        report.push(line, Some(id), RecordAction::Created);
        return Ok(());
    };

    if local == incoming {
        report.push(line, Some(id), RecordAction::Unchanged);
        return Ok(());
    }

    let resolution = match opts.resolution {
        Some(resolution) => resolution,
        None if opts.strict => return Err(eyre::eyre!(StoreError::Conflict { id })),
        None => {
            report.push(line, Some(id), RecordAction::Skipped).note = Some("no resolution strategy".to_string());
            return Ok(());
        }
    };

    let resolved = match resolution {
        ConflictResolution::Skip => {
            report.push(line, Some(id), RecordAction::Skipped).note = Some("local kept".to_string());
            return Ok(());
        }
        ConflictResolution::Overwrite => Task {
            updated_at: incoming.updated_at.max(local.updated_at),
            ..incoming
        },
        ConflictResolution::Merge => merge(&local, &incoming),
        ConflictResolution::CreateNew => {
            let now = timestamp::now();
            let new_id = fresh_id(repo, &incoming.title, now)?;
            let completed_at = (incoming.status == Status::Done).then_some(now);
            let copy = Task {
                id: new_id.clone(),
                origin_id: Some(id.clone()),
                created_at: now,
                updated_at: now,
                completed_at,
                ..incoming
            };
            if let Err(e) = check_fields(&copy, Vec::new()) {
                return reject(report, line, id, &e);
            }
            repo.put_task(&copy)?;
            repo.append_audit(&new_id, "imported", Some(&format!("copy of {}", id)))?;
            report.push(line, Some(id), RecordAction::CreatedNew { new_id });
            return Ok(());
        }
    };

    // Merged sets can break limits a single side respected
    if let Err(e) = check_fields(&resolved, Vec::new()) {
        return reject(report, line, id, &e);
    }

    let fields = resolved.changed_fields(&local);
    if resolved == local {
        report.push(line, Some(id), RecordAction::Unchanged);
        return Ok(());
    }

    repo.put_task(&resolved)?;
    repo.append_audit(&id, "imported", Some(&format!("{}: {}", resolution, fields.join(","))))?;
    report.push(line, Some(id), RecordAction::Updated).fields = fields;
    Ok(())
}

fn reject(report: &mut ImportReport, line: usize, id: String, err: &eyre::Report) -> Result<()> {
    let reason = format!("rejected after resolution: {}", err);
    report.warn(line, Some(id.clone()), reason.clone());
    report.push(line, Some(id), RecordAction::Rejected).note = Some(reason);
    Ok(())
}

/// Whole-graph checks after every record is applied.
fn check_integrity(repo: &Repo<'_>, report: &mut ImportReport, strict: bool) -> Result<()> {
    let tasks = repo.all_tasks()?;
    let graph = DependencyGraph::from_tasks(&tasks);

    let dangling = graph.dangling();
    if let Some((task_id, dep)) = dangling.first()
        && strict
    {
        return Err(eyre::eyre!(StoreError::dangling(dep.as_str(), task_id.as_str())));
    }
    for (task_id, dep) in &dangling {
        if let Some(mut task) = repo.get_task(task_id)? {
            task.depends_on.remove(dep);
            repo.put_task(&task)?;
            let line = report
                .changes
                .iter()
                .rev()
                .find(|c| c.id.as_deref() == Some(task_id.as_str()))
                .map_or(0, |c| c.line);
            report.warn(
                line,
                Some(task_id.clone()),
                format!("dropped dependency on unknown task {}", dep),
            );
        }
    }

    if let Some(cycle) = graph.detect_cycles().into_iter().next() {
        return Err(eyre::eyre!(StoreError::Cycle(cycle)));
    }
    Ok(())
}

/// Extension trait to import into a Store.
pub trait StoreImportExt {
    fn import_reader<R: BufRead>(&mut self, reader: R, opts: &ImportOptions) -> Result<ImportReport>;
    fn import_path(&mut self, path: &Path, opts: &ImportOptions) -> Result<ImportReport>;
}

impl StoreImportExt for Store {
    fn import_reader<R: BufRead>(&mut self, reader: R, opts: &ImportOptions) -> Result<ImportReport> {
        import_records(self.storage_mut(), MirrorReader::new(reader), opts)
    }

    fn import_path(&mut self, path: &Path, opts: &ImportOptions) -> Result<ImportReport> {
        log::debug!("Importing {}", path.display());
        import_records(self.storage_mut(), open_snapshot(path)?, opts)
    }
}
