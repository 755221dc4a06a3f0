//! Builder pattern API for creating tasks.

use crate::store::Store;
use crate::types::{ContextValue, NewTask, Priority, Status, Task};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};

/// Builder for creating tasks with a fluent API.
///
/// # Example
///
/// ```ignore
/// let task = store.build("Implement feature")
///     .priority(Priority::High)
///     .tag("backend")
///     .depends_on(&design.id)
///     .description("Add the new authentication flow")
///     .create()?;
/// ```
pub struct TaskBuilder<'a> {
    store: &'a mut Store,
    new: NewTask,
}

impl<'a> TaskBuilder<'a> {
    /// Create a new builder with the given title.
    pub fn new(store: &'a mut Store, title: impl Into<String>) -> Self {
        Self {
            store,
            new: NewTask::new(title),
        }
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.new.priority = Some(priority);
        self
    }

    /// Initial status (defaults to todo).
    pub fn status(mut self, status: Status) -> Self {
        self.new.status = Some(status);
        self
    }

    /// Add a tag.
    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.new.tags.push(tag.into());
        self
    }

    /// Add multiple tags.
    pub fn tags(mut self, tags: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.new.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    /// Add a dependency on an existing task.
    pub fn depends_on(mut self, id: impl Into<String>) -> Self {
        self.new.depends_on.push(id.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.new.description = Some(description.into());
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.new.assignee = Some(assignee.into());
        self
    }

    pub fn due(mut self, due: DateTime<Utc>) -> Self {
        self.new.due_date = Some(due);
        self
    }

    pub fn estimate(mut self, hours: f64) -> Self {
        self.new.estimated_hours = Some(hours);
        self
    }

    /// Set one context entry.
    pub fn context(mut self, key: impl Into<String>, value: impl Into<ContextValue>) -> Self {
        self.new.context.insert(key.into(), value.into());
        self
    }

    /// Create the task.
    pub fn create(self) -> Result<Task> {
        let title = self.new.title.clone();
        self.store
            .create(self.new)
            .with_context(|| format!("Failed to create task '{}'", title))
    }
}

/// Extension trait to add builder method to Store.
pub trait StoreBuilderExt {
    /// Start building a new task with the given title.
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_>;
}

impl StoreBuilderExt for Store {
    fn build(&mut self, title: impl Into<String>) -> TaskBuilder<'_> {
        TaskBuilder::new(self, title)
    }
}
