//! Task filters, sort orders and the fluent query API.

use crate::storage::Storage;
use crate::store::Store;
use crate::types::{Priority, Status, Task};
use eyre::Result;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Deterministic sort orders. Ties always fall back to the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SortKey {
    /// Oldest first.
    CreatedAt,
    /// Least recently changed first.
    UpdatedAt,
    /// Urgent first, then oldest first.
    Priority,
    /// Byte-wise title order.
    Title,
}

impl SortKey {
    pub fn compare(&self, a: &Task, b: &Task) -> Ordering {
        match self {
            SortKey::CreatedAt => a.created_at.cmp(&b.created_at),
            SortKey::UpdatedAt => a.updated_at.cmp(&b.updated_at),
            SortKey::Priority => b
                .priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at)),
            SortKey::Title => a.title.cmp(&b.title),
        }
        .then_with(|| a.id.cmp(&b.id))
    }

    pub fn sort(&self, tasks: &mut [Task]) {
        tasks.sort_by(|a, b| self.compare(a, b));
    }

    pub(crate) fn order_by_sql(&self) -> &'static str {
        match self {
            SortKey::CreatedAt => "ORDER BY created_at ASC, id ASC",
            SortKey::UpdatedAt => "ORDER BY updated_at ASC, id ASC",
            SortKey::Priority => {
                "ORDER BY CASE priority WHEN 'urgent' THEN 0 WHEN 'high' THEN 1 WHEN 'medium' THEN 2 ELSE 3 END, \
                 created_at ASC, id ASC"
            }
            SortKey::Title => "ORDER BY title ASC, id ASC",
        }
    }
}

impl fmt::Display for SortKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SortKey::CreatedAt => "created_at",
            SortKey::UpdatedAt => "updated_at",
            SortKey::Priority => "priority",
            SortKey::Title => "title",
        })
    }
}

impl FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" | "created" => Ok(SortKey::CreatedAt),
            "updated_at" | "updated" => Ok(SortKey::UpdatedAt),
            "priority" => Ok(SortKey::Priority),
            "title" => Ok(SortKey::Title),
            other => Err(format!("unknown sort key '{}'", other)),
        }
    }
}

/// Filter for listing tasks. Empty sets mean "no restriction".
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskFilter {
    pub statuses: BTreeSet<Status>,
    pub priorities: BTreeSet<Priority>,
    pub assignee: Option<String>,
    /// A task must carry every one of these tags.
    pub tags: BTreeSet<String>,
    pub sort: Option<SortKey>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(mut self, status: Status) -> Self {
        self.statuses.insert(status);
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.priorities.insert(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.assignee = Some(assignee.into());
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.sort = Some(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// In-memory equivalent of the SQL filter (sort and limit excluded).
    pub fn matches(&self, task: &Task) -> bool {
        (self.statuses.is_empty() || self.statuses.contains(&task.status))
            && (self.priorities.is_empty() || self.priorities.contains(&task.priority))
            && self
                .assignee
                .as_ref()
                .is_none_or(|a| task.assignee.as_deref() == Some(a.as_str()))
            && self.tags.is_subset(&task.tags)
    }
}

/// Query builder for fluent queries.
pub struct Query<'a> {
    storage: &'a Storage,
    filter: TaskFilter,
}

impl<'a> Query<'a> {
    pub(crate) fn new(storage: &'a Storage) -> Self {
        Self {
            storage,
            filter: TaskFilter::new(),
        }
    }

    /// Filter by status (repeat to allow several).
    pub fn status(mut self, status: Status) -> Self {
        self.filter = self.filter.status(status);
        self
    }

    /// Filter by priority (repeat to allow several).
    pub fn priority(mut self, priority: Priority) -> Self {
        self.filter = self.filter.priority(priority);
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.filter = self.filter.assignee(assignee);
        self
    }

    /// Require a tag (repeat to require several).
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.filter = self.filter.tag(tag);
        self
    }

    pub fn sort(mut self, key: SortKey) -> Self {
        self.filter = self.filter.sort(key);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.filter = self.filter.limit(limit);
        self
    }

    /// Execute the query and return matching tasks.
    pub fn execute(self) -> Result<Vec<Task>> {
        self.storage.repo().list_tasks(&self.filter)
    }

    /// Count matching tasks (limit applies).
    pub fn count(self) -> Result<usize> {
        Ok(self.execute()?.len())
    }
}

/// Extension trait to add query method to Store.
pub trait StoreQueryExt {
    /// Start building a query.
    fn query(&self) -> Query<'_>;
}

impl StoreQueryExt for Store {
    fn query(&self) -> Query<'_> {
        Query::new(self.storage())
    }
}
