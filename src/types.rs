//! Core data types for the task store.

use crate::timestamp::serde_ts;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::fmt;
use std::str::FromStr;

/// Minimum title length in characters.
pub const TITLE_MIN_CHARS: usize = 5;
/// Maximum title length in characters.
pub const TITLE_MAX_CHARS: usize = 200;
/// Maximum description length in characters.
pub const DESCRIPTION_MAX_CHARS: usize = 10_000;
/// Maximum number of tags on a task.
pub const MAX_TAGS: usize = 20;
/// Maximum length of one tag.
pub const TAG_MAX_CHARS: usize = 50;
/// Maximum number of context keys.
pub const MAX_CONTEXT_KEYS: usize = 32;
/// Maximum length of one context key.
pub const CONTEXT_KEY_MAX_CHARS: usize = 64;
/// Maximum serialized size of the context map, in bytes.
pub const MAX_CONTEXT_BYTES: usize = 4096;

/// The sole entity: one unit of trackable work.
///
/// `blocks` is deliberately absent. It is derived from every other task's
/// `depends_on` and is only available through [`crate::DependencyGraph::blocks`]
/// and [`crate::Store::blocks`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    /// Unique identifier: "tk-" + 10 hex chars
    pub id: String,

    pub title: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    pub status: Status,

    pub priority: Priority,

    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub tags: BTreeSet<String>,

    /// Ids of tasks that must be `done` before this one is ready
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub depends_on: BTreeSet<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assignee: Option<String>,

    #[serde(with = "serde_ts")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "serde_ts")]
    pub updated_at: DateTime<Utc>,

    /// Set while status == Done
    #[serde(default, with = "serde_ts::option", skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default, with = "serde_ts::option", skip_serializing_if = "Option::is_none")]
    pub due_date: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_hours: Option<f64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actual_hours: Option<f64>,

    /// Open-ended scalar metadata
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, ContextValue>,

    /// Foreign id this task was copied from by a `create_new` import
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_id: Option<String>,
}

/// Task status states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Status {
    Todo,
    Doing,
    TechnicalComplete,
    RuatValidation,
    Review,
    Done,
    Blocked,
    Cancelled,
}

impl Status {
    pub const ALL: [Status; 8] = [
        Status::Todo,
        Status::Doing,
        Status::TechnicalComplete,
        Status::RuatValidation,
        Status::Review,
        Status::Done,
        Status::Blocked,
        Status::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Todo => "todo",
            Status::Doing => "doing",
            Status::TechnicalComplete => "technical-complete",
            Status::RuatValidation => "ruat-validation",
            Status::Review => "review",
            Status::Done => "done",
            Status::Blocked => "blocked",
            Status::Cancelled => "cancelled",
        }
    }

    /// Done and cancelled tasks never become ready or blocked again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Done | Status::Cancelled)
    }
}

impl Default for Status {
    fn default() -> Self {
        Status::Todo
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Status::ALL
            .into_iter()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("status", s))
    }
}

/// Task priority, ordered from least to most pressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
    Urgent,
}

impl Priority {
    pub const ALL: [Priority; 4] = [Priority::Low, Priority::Medium, Priority::High, Priority::Urgent];

    pub fn as_str(&self) -> &'static str {
        match self {
            Priority::Low => "low",
            Priority::Medium => "medium",
            Priority::High => "high",
            Priority::Urgent => "urgent",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::Medium
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::ALL
            .into_iter()
            .find(|priority| priority.as_str() == s)
            .ok_or_else(|| ParseEnumError::new("priority", s))
    }
}

/// A value outside an enum's fixed vocabulary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseEnumError {
    pub field: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(field: &'static str, value: &str) -> Self {
        Self {
            field,
            value: value.to_string(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {} '{}'", self.field, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

/// Scalar value stored in a task's context map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ContextValue {
    Bool(bool),
    Integer(i64),
    Float(f64),
    Text(String),
}

impl From<&str> for ContextValue {
    fn from(value: &str) -> Self {
        ContextValue::Text(value.to_string())
    }
}

impl From<String> for ContextValue {
    fn from(value: String) -> Self {
        ContextValue::Text(value)
    }
}

impl From<i64> for ContextValue {
    fn from(value: i64) -> Self {
        ContextValue::Integer(value)
    }
}

impl From<f64> for ContextValue {
    fn from(value: f64) -> Self {
        ContextValue::Float(value)
    }
}

impl From<bool> for ContextValue {
    fn from(value: bool) -> Self {
        ContextValue::Bool(value)
    }
}

/// Fields accepted when creating a task.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NewTask {
    pub title: String,
    pub description: Option<String>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub depends_on: Vec<String>,
    pub assignee: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub estimated_hours: Option<f64>,
    pub actual_hours: Option<f64>,
    pub context: BTreeMap<String, ContextValue>,
}

impl NewTask {
    /// Create a new task with just a title.
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn with_tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn with_due_date(mut self, due: DateTime<Utc>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn with_estimate(mut self, hours: f64) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Partial update. `None` leaves a field alone; for nullable fields
/// `Some(None)` clears it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskPatch {
    pub title: Option<String>,
    pub description: Option<Option<String>>,
    pub status: Option<Status>,
    pub priority: Option<Priority>,
    pub tags: Option<Vec<String>>,
    pub depends_on: Option<Vec<String>>,
    pub assignee: Option<Option<String>>,
    pub due_date: Option<Option<DateTime<Utc>>>,
    pub estimated_hours: Option<Option<f64>>,
    pub actual_hours: Option<Option<f64>>,
    pub context: Option<BTreeMap<String, ContextValue>>,
}

impl TaskPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn description(mut self, description: Option<&str>) -> Self {
        self.description = Some(description.map(String::from));
        self
    }

    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.tags = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn depends_on(mut self, ids: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.depends_on = Some(ids.into_iter().map(Into::into).collect());
        self
    }

    pub fn assignee(mut self, assignee: Option<&str>) -> Self {
        self.assignee = Some(assignee.map(String::from));
        self
    }

    pub fn due_date(mut self, due: Option<DateTime<Utc>>) -> Self {
        self.due_date = Some(due);
        self
    }

    pub fn estimated_hours(mut self, hours: Option<f64>) -> Self {
        self.estimated_hours = Some(hours);
        self
    }

    pub fn actual_hours(mut self, hours: Option<f64>) -> Self {
        self.actual_hours = Some(hours);
        self
    }

    pub fn context(mut self, context: BTreeMap<String, ContextValue>) -> Self {
        self.context = Some(context);
        self
    }
}

/// Validation errors for tasks. Each variant names the offending field.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    MissingField(&'static str),
    TitleTooShort { chars: usize },
    TitleTooLong { chars: usize },
    InvalidCharacters(&'static str),
    DescriptionTooLong { chars: usize },
    TooManyTags { count: usize },
    DuplicateTag(String),
    InvalidTag(String),
    InvalidStatus(String),
    InvalidPriority(String),
    InvalidTimestamp { field: &'static str, value: String },
    UpdatedBeforeCreated,
    CompletedAtWithoutDone,
    InvalidHours { field: &'static str },
    EmptyAssignee,
    TooManyContextKeys { count: usize },
    InvalidContextKey(String),
    InvalidContextValue(String),
    ContextTooLarge { bytes: usize },
    InvalidId(String),
    SelfDependency(String),
}

impl ValidationError {
    /// The task field this error refers to.
    pub fn field(&self) -> &'static str {
        match self {
            ValidationError::MissingField(field) => field,
            ValidationError::TitleTooShort { .. } | ValidationError::TitleTooLong { .. } => "title",
            ValidationError::InvalidCharacters(field) => field,
            ValidationError::DescriptionTooLong { .. } => "description",
            ValidationError::TooManyTags { .. }
            | ValidationError::DuplicateTag(_)
            | ValidationError::InvalidTag(_) => "tags",
            ValidationError::InvalidStatus(_) => "status",
            ValidationError::InvalidPriority(_) => "priority",
            ValidationError::InvalidTimestamp { field, .. } => field,
            ValidationError::UpdatedBeforeCreated => "updated_at",
            ValidationError::CompletedAtWithoutDone => "completed_at",
            ValidationError::InvalidHours { field } => field,
            ValidationError::EmptyAssignee => "assignee",
            ValidationError::TooManyContextKeys { .. }
            | ValidationError::InvalidContextKey(_)
            | ValidationError::InvalidContextValue(_)
            | ValidationError::ContextTooLarge { .. } => "context",
            ValidationError::InvalidId(_) => "id",
            ValidationError::SelfDependency(_) => "depends_on",
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::MissingField(field) => write!(f, "{} is required", field),
            ValidationError::TitleTooShort { chars } => {
                write!(f, "title has {} characters, minimum is {}", chars, TITLE_MIN_CHARS)
            }
            ValidationError::TitleTooLong { chars } => {
                write!(f, "title has {} characters, maximum is {}", chars, TITLE_MAX_CHARS)
            }
            ValidationError::InvalidCharacters(field) => write!(f, "{} contains control characters", field),
            ValidationError::DescriptionTooLong { chars } => write!(
                f,
                "description has {} characters, maximum is {}",
                chars, DESCRIPTION_MAX_CHARS
            ),
            ValidationError::TooManyTags { count } => write!(f, "{} tags given, maximum is {}", count, MAX_TAGS),
            ValidationError::DuplicateTag(tag) => write!(f, "duplicate tag '{}'", tag),
            ValidationError::InvalidTag(tag) => write!(
                f,
                "invalid tag '{}': must be 1-{} alphanumeric characters or -_.:/",
                tag, TAG_MAX_CHARS
            ),
            ValidationError::InvalidStatus(value) => write!(f, "invalid status '{}'", value),
            ValidationError::InvalidPriority(value) => write!(f, "invalid priority '{}'", value),
            ValidationError::InvalidTimestamp { field, value } => {
                write!(f, "{} is not an RFC 3339 timestamp: '{}'", field, value)
            }
            ValidationError::UpdatedBeforeCreated => write!(f, "updated_at cannot be before created_at"),
            ValidationError::CompletedAtWithoutDone => write!(f, "completed_at set but status is not done"),
            ValidationError::InvalidHours { field } => write!(f, "{} must be a finite, non-negative number", field),
            ValidationError::EmptyAssignee => write!(f, "assignee cannot be blank"),
            ValidationError::TooManyContextKeys { count } => {
                write!(f, "context has {} keys, maximum is {}", count, MAX_CONTEXT_KEYS)
            }
            ValidationError::InvalidContextKey(key) => write!(
                f,
                "invalid context key '{}': must be 1-{} characters without control characters",
                key, CONTEXT_KEY_MAX_CHARS
            ),
            ValidationError::InvalidContextValue(key) => {
                write!(f, "context value for '{}' must be a finite number", key)
            }
            ValidationError::ContextTooLarge { bytes } => {
                write!(f, "context serializes to {} bytes, maximum is {}", bytes, MAX_CONTEXT_BYTES)
            }
            ValidationError::InvalidId(id) => write!(f, "invalid id '{}'", id),
            ValidationError::SelfDependency(id) => write!(f, "task {} cannot depend on itself", id),
        }
    }
}

impl std::error::Error for ValidationError {}

/// Check a raw tag list for duplicates before it collapses into a set.
pub fn duplicate_tags(tags: &[String]) -> Vec<ValidationError> {
    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    let mut errors = Vec::new();
    for tag in tags {
        if !seen.insert(tag.as_str()) && reported.insert(tag.as_str()) {
            errors.push(ValidationError::DuplicateTag(tag.clone()));
        }
    }
    errors
}

fn is_valid_tag(tag: &str) -> bool {
    !tag.is_empty()
        && tag.chars().count() <= TAG_MAX_CHARS
        && tag
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '.' | ':' | '/'))
}

fn valid_hours(hours: Option<f64>) -> bool {
    hours.is_none_or(|h| h.is_finite() && h >= 0.0)
}

impl Task {
    /// Validate the task's fields, reporting every violation found.
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut errors = Vec::new();

        if self.id.trim().is_empty() || self.id.chars().any(|c| c.is_whitespace() || c.is_control()) {
            errors.push(ValidationError::InvalidId(self.id.clone()));
        }

        // Title: 5-200 chars, no control characters
        let title_chars = self.title.trim().chars().count();
        if title_chars < TITLE_MIN_CHARS {
            errors.push(ValidationError::TitleTooShort { chars: title_chars });
        }
        if title_chars > TITLE_MAX_CHARS {
            errors.push(ValidationError::TitleTooLong { chars: title_chars });
        }
        if self.title.chars().any(|c| c.is_control()) {
            errors.push(ValidationError::InvalidCharacters("title"));
        }

        if let Some(description) = &self.description {
            let chars = description.chars().count();
            if chars > DESCRIPTION_MAX_CHARS {
                errors.push(ValidationError::DescriptionTooLong { chars });
            }
        }

        if self.tags.len() > MAX_TAGS {
            errors.push(ValidationError::TooManyTags { count: self.tags.len() });
        }
        for tag in &self.tags {
            if !is_valid_tag(tag) {
                errors.push(ValidationError::InvalidTag(tag.clone()));
            }
        }

        if let Some(assignee) = &self.assignee {
            if assignee.trim().is_empty() {
                errors.push(ValidationError::EmptyAssignee);
            } else if assignee.chars().any(|c| c.is_control()) {
                errors.push(ValidationError::InvalidCharacters("assignee"));
            }
        }

        if self.updated_at < self.created_at {
            errors.push(ValidationError::UpdatedBeforeCreated);
        }
        if self.completed_at.is_some() && self.status != Status::Done {
            errors.push(ValidationError::CompletedAtWithoutDone);
        }

        if !valid_hours(self.estimated_hours) {
            errors.push(ValidationError::InvalidHours {
                field: "estimated_hours",
            });
        }
        if !valid_hours(self.actual_hours) {
            errors.push(ValidationError::InvalidHours { field: "actual_hours" });
        }

        errors.extend(validate_context(&self.context));
        errors
    }

    /// Names of the user-facing fields that differ from `other`.
    /// Bookkeeping timestamps and the id are not compared.
    pub fn changed_fields(&self, other: &Task) -> Vec<&'static str> {
        let mut fields = Vec::new();
        let mut check = |name: &'static str, differs: bool| {
            if differs {
                fields.push(name);
            }
        };
        check("title", self.title != other.title);
        check("description", self.description != other.description);
        check("status", self.status != other.status);
        check("priority", self.priority != other.priority);
        check("tags", self.tags != other.tags);
        check("depends_on", self.depends_on != other.depends_on);
        check("assignee", self.assignee != other.assignee);
        check("due_date", self.due_date != other.due_date);
        check("estimated_hours", self.estimated_hours != other.estimated_hours);
        check("actual_hours", self.actual_hours != other.actual_hours);
        check("context", self.context != other.context);
        check("origin_id", self.origin_id != other.origin_id);
        fields
    }
}

fn validate_context(context: &BTreeMap<String, ContextValue>) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    if context.len() > MAX_CONTEXT_KEYS {
        errors.push(ValidationError::TooManyContextKeys { count: context.len() });
    }
    for (key, value) in context {
        if key.trim().is_empty() || key.chars().count() > CONTEXT_KEY_MAX_CHARS || key.chars().any(|c| c.is_control())
        {
            errors.push(ValidationError::InvalidContextKey(key.clone()));
        }
        if let ContextValue::Float(f) = value
            && !f.is_finite()
        {
            errors.push(ValidationError::InvalidContextValue(key.clone()));
        }
    }
    let bytes = serde_json::to_string(context).map(|s| s.len()).unwrap_or(usize::MAX);
    if bytes > MAX_CONTEXT_BYTES {
        errors.push(ValidationError::ContextTooLarge { bytes });
    }
    errors
}
