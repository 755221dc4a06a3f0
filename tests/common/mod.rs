//! Shared test infrastructure for tasksync integration tests.
//!
//! Provides TestEnv helper for consistent test setup/teardown.

#![allow(dead_code)]

use std::path::PathBuf;
use tasksync::{
    Config, ExportOptions, NewTask, Priority, Status, Store, StoreError, StoreExportExt, Task, TaskFilter, TaskPatch,
};
use tempfile::TempDir;

/// Test environment with automatic cleanup.
pub struct TestEnv {
    pub temp_dir: TempDir,
    pub store: Store,
}

impl TestEnv {
    /// Create a new test environment with an initialized store.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        Self { temp_dir, store }
    }

    /// Create a test environment whose store is opened with an adjusted config.
    pub fn with_config(adjust: impl FnOnce(Config) -> Config) -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let store = Store::init(temp_dir.path()).expect("Failed to init store");
        let config = adjust(store.config().clone());
        config.save(&store.store_dir()).expect("Failed to save config");
        drop(store);

        let store = Store::open(temp_dir.path()).expect("Failed to reopen store");
        Self { temp_dir, store }
    }

    /// Path inside the temp dir.
    pub fn path(&self, name: &str) -> PathBuf {
        self.temp_dir.path().join(name)
    }

    /// Create a task with default priority and no tags.
    pub fn create_task(&mut self, title: &str) -> Task {
        self.store.create(NewTask::new(title)).expect("Failed to create task")
    }

    /// Create a task with specified priority.
    pub fn create_task_with_priority(&mut self, title: &str, priority: Priority) -> Task {
        self.store
            .create(NewTask::new(title).with_priority(priority))
            .expect("Failed to create task")
    }

    /// Create a task with tags.
    pub fn create_task_with_tags(&mut self, title: &str, tags: &[&str]) -> Task {
        self.store
            .create(NewTask::new(title).with_tags(tags.iter().copied()))
            .expect("Failed to create task")
    }

    /// Create a task depending on others.
    pub fn create_task_depending_on(&mut self, title: &str, deps: &[&Task]) -> Task {
        self.store
            .create(NewTask::new(title).with_depends_on(deps.iter().map(|t| t.id.as_str())))
            .expect("Failed to create task")
    }

    /// Make `task` depend on `dep`.
    pub fn add_dep(&mut self, task: &Task, dep: &Task) -> Task {
        self.store
            .add_dependency(&task.id, &dep.id)
            .expect("Failed to add dependency")
    }

    pub fn set_status(&mut self, task: &Task, status: Status) -> Task {
        self.store.set_status(&task.id, status).expect("Failed to set status")
    }

    /// Mark a task done.
    pub fn finish(&mut self, task: &Task) -> Task {
        self.set_status(task, Status::Done)
    }

    pub fn update(&mut self, task: &Task, patch: TaskPatch) -> Task {
        self.store.update(&task.id, patch).expect("Failed to update task")
    }

    /// Re-read a task from the store.
    pub fn reload(&self, task: &Task) -> Task {
        self.store.get(&task.id).expect("Failed to get task")
    }

    /// Assert that a task is in the ready list.
    pub fn assert_ready(&self, task: &Task) {
        let ready = self.store.ready().expect("Failed to get ready tasks");
        assert!(
            ready.iter().any(|t| t.id == task.id),
            "Expected task {} to be ready, but it wasn't. Ready tasks: {:?}",
            task.id,
            ready.iter().map(|t| &t.id).collect::<Vec<_>>()
        );
    }

    /// Assert that a task is NOT in the ready list.
    pub fn assert_not_ready(&self, task: &Task) {
        let ready = self.store.ready().expect("Failed to get ready tasks");
        assert!(
            !ready.iter().any(|t| t.id == task.id),
            "Expected task {} to NOT be ready, but it was",
            task.id
        );
    }

    /// Assert that a task is in the blocked list.
    pub fn assert_blocked(&self, task: &Task) {
        let blocked = self.store.blocked().expect("Failed to get blocked tasks");
        assert!(
            blocked.iter().any(|t| t.id == task.id),
            "Expected task {} to be blocked, but it wasn't",
            task.id
        );
    }

    /// Ready task ids in returned order.
    pub fn ready_ids(&self) -> Vec<String> {
        self.store
            .ready()
            .expect("Failed to get ready tasks")
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    pub fn ready_count(&self) -> usize {
        self.store.ready().expect("Failed to get ready tasks").len()
    }

    pub fn total_count(&self) -> usize {
        self.store.count().expect("Failed to count tasks")
    }

    pub fn count_by_status(&self, status: Status) -> usize {
        self.store
            .list(&TaskFilter::new().status(status))
            .expect("Failed to list tasks")
            .len()
    }

    /// Canonical export of the whole store as text.
    pub fn export_text(&self) -> String {
        let mut out = Vec::new();
        self.store
            .export_to(&ExportOptions::canonical(), &mut out)
            .expect("Failed to export");
        String::from_utf8(out).expect("Export is not UTF-8")
    }
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

/// The domain error carried by a report.
pub fn store_err(err: &eyre::Report) -> &StoreError {
    err.downcast_ref::<StoreError>()
        .unwrap_or_else(|| panic!("expected a StoreError, got: {:#}", err))
}
