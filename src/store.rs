//! High-level store API for tasksync.

use crate::config::Config;
use crate::error::StoreError;
use crate::graph::{CriticalPath, DependencyGraph};
use crate::id::generate_id;
use crate::lock::StoreLock;
use crate::query::{SortKey, TaskFilter};
use crate::storage::{AuditEntry, Repo, Storage};
use crate::timestamp;
use crate::types::{NewTask, Status, Task, TaskPatch, ValidationError, duplicate_tags};
use eyre::{Context, Result};
use std::collections::{BTreeSet, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Store directory under the project root.
pub const STORE_DIR: &str = ".tasksync";

const GITIGNORE: &str = "# Local state; the mirror file is what gets committed\ntasks.db\ntasks.db-journal\nlock\nbackups/\n";

/// Outcome of a delete.
#[derive(Debug, Clone, PartialEq)]
pub struct DeleteReport {
    pub id: String,
    /// Tasks whose `depends_on` lost the deleted id.
    pub cleaned: Vec<String>,
}

/// The main task store.
///
/// Field order matters: the database closes before the lock file is removed.
pub struct Store {
    storage: Storage,
    config: Config,
    root: PathBuf,
    _lock: StoreLock,
}

impl Store {
    /// Initialize a store under `root` (idempotent) and open it.
    pub fn init(root: &Path) -> Result<Self> {
        let store_dir = root.join(STORE_DIR);
        fs::create_dir_all(&store_dir)
            .with_context(|| format!("Failed to create store directory {}", store_dir.display()))?;

        if !store_dir.join(crate::config::CONFIG_FILE).exists() {
            Config::default().save(&store_dir)?;
        }
        let gitignore = store_dir.join(".gitignore");
        if !gitignore.exists() {
            fs::write(&gitignore, GITIGNORE).context("Failed to write .gitignore")?;
        }

        log::info!("Initialized task store in {}", store_dir.display());
        Self::open(root)
    }

    /// Open an existing store.
    pub fn open(root: &Path) -> Result<Self> {
        let store_dir = root.join(STORE_DIR);
        if !store_dir.is_dir() {
            return Err(eyre::eyre!(StoreError::NotInitialized(root.to_path_buf())));
        }

        let config = Config::load(&store_dir)?;
        let lock = StoreLock::acquire(&store_dir)?;
        let storage = Storage::open(&store_dir)?;
        log::debug!("Opened task store {}", store_dir.display());

        Ok(Self {
            storage,
            config,
            root: root.to_path_buf(),
            _lock: lock,
        })
    }

    /// Project root the store lives under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn storage(&self) -> &Storage {
        &self.storage
    }

    pub(crate) fn storage_mut(&mut self) -> &mut Storage {
        &mut self.storage
    }

    /// Create a new task.
    pub fn create(&mut self, new: NewTask) -> Result<Task> {
        let task = self.storage.transaction(true, |repo| {
            let now = timestamp::now();
            let id = fresh_id(repo, &new.title, now)?;
            let status = new.status.unwrap_or_default();

            let task = Task {
                id,
                title: new.title.clone(),
                description: new.description.clone(),
                status,
                priority: new.priority.unwrap_or_default(),
                tags: new.tags.iter().cloned().collect(),
                depends_on: new.depends_on.iter().cloned().collect(),
                assignee: new.assignee.clone(),
                created_at: now,
                updated_at: now,
                completed_at: (status == Status::Done).then_some(now),
                due_date: new.due_date,
                estimated_hours: new.estimated_hours,
                actual_hours: new.actual_hours,
                context: new.context.clone(),
                origin_id: None,
            };

            check_fields(&task, duplicate_tags(&new.tags))?;
            check_dependencies(repo, &task, &BTreeSet::new())?;

            repo.put_task(&task).context("Failed to persist task")?;
            repo.append_audit(&task.id, "created", None)?;
            Ok(task)
        })?;

        log::info!("Created task {} '{}'", task.id, task.title);
        Ok(task)
    }

    /// Get a task by ID, failing if it does not exist.
    pub fn get(&self, id: &str) -> Result<Task> {
        self.find(id)?
            .ok_or_else(|| eyre::eyre!(StoreError::not_found(id)))
    }

    /// Get a task by ID.
    pub fn find(&self, id: &str) -> Result<Option<Task>> {
        self.storage.repo().get_task(id)
    }

    /// Apply a partial update.
    ///
    /// Any failure (validation, missing dependency, self-dependency, cycle)
    /// leaves the stored task untouched.
    pub fn update(&mut self, id: &str, patch: TaskPatch) -> Result<Task> {
        let (task, changed) = self.storage.transaction(true, |repo| {
            let existing = repo
                .get_task(id)?
                .ok_or_else(|| eyre::eyre!(StoreError::not_found(id)))?;

            let mut task = existing.clone();
            let mut errors = Vec::new();
            if let Some(title) = &patch.title {
                task.title = title.clone();
            }
            if let Some(description) = &patch.description {
                task.description = description.clone();
            }
            if let Some(status) = patch.status {
                task.status = status;
            }
            if let Some(priority) = patch.priority {
                task.priority = priority;
            }
            if let Some(tags) = &patch.tags {
                errors.extend(duplicate_tags(tags));
                task.tags = tags.iter().cloned().collect();
            }
            if let Some(deps) = &patch.depends_on {
                task.depends_on = deps.iter().cloned().collect();
            }
            if let Some(assignee) = &patch.assignee {
                task.assignee = assignee.clone();
            }
            if let Some(due_date) = patch.due_date {
                task.due_date = due_date;
            }
            if let Some(hours) = patch.estimated_hours {
                task.estimated_hours = hours;
            }
            if let Some(hours) = patch.actual_hours {
                task.actual_hours = hours;
            }
            if let Some(context) = &patch.context {
                task.context = context.clone();
            }

            let now = timestamp::now();
            task.updated_at = now.max(existing.updated_at);
            task.completed_at = match (existing.status, task.status) {
                (_, status) if status != Status::Done => None,
                (Status::Done, Status::Done) => existing.completed_at.or(Some(task.updated_at)),
                _ => Some(task.updated_at),
            };

            check_fields(&task, errors)?;
            check_dependencies(repo, &task, &existing.depends_on)?;

            let changed = task.changed_fields(&existing);
            repo.put_task(&task).context("Failed to persist updated task")?;
            repo.append_audit(&task.id, "updated", Some(&changed.join(",")))?;
            Ok((task, changed))
        })?;

        log::info!("Updated task {} ({})", task.id, changed.join(", "));
        Ok(task)
    }

    /// Change a task's status.
    pub fn set_status(&mut self, id: &str, status: Status) -> Result<Task> {
        self.update(id, TaskPatch::new().status(status))
    }

    /// Add one `depends_on` edge. Adding an existing edge is a no-op.
    pub fn add_dependency(&mut self, id: &str, dep_id: &str) -> Result<Task> {
        let task = self.get(id)?;
        if task.depends_on.contains(dep_id) {
            return Ok(task);
        }
        let mut deps = task.depends_on;
        deps.insert(dep_id.to_string());
        self.update(id, TaskPatch::new().depends_on(deps))
    }

    /// Remove one `depends_on` edge. Removing a missing edge is a no-op.
    pub fn remove_dependency(&mut self, id: &str, dep_id: &str) -> Result<Task> {
        let task = self.get(id)?;
        if !task.depends_on.contains(dep_id) {
            return Ok(task);
        }
        let mut deps = task.depends_on;
        deps.remove(dep_id);
        self.update(id, TaskPatch::new().depends_on(deps))
    }

    /// Delete a task, removing its id from every dependent's `depends_on`.
    /// The id is retired and never issued again.
    pub fn delete(&mut self, id: &str) -> Result<DeleteReport> {
        let report = self.storage.transaction(true, |repo| {
            let task = repo
                .get_task(id)?
                .ok_or_else(|| eyre::eyre!(StoreError::not_found(id)))?;

            let now = timestamp::now();
            let cleaned = repo.dependents_of(id)?;
            for dependent_id in &cleaned {
                if let Some(mut dependent) = repo.get_task(dependent_id)? {
                    dependent.depends_on.remove(id);
                    dependent.updated_at = now.max(dependent.updated_at);
                    repo.put_task(&dependent)?;
                    repo.append_audit(dependent_id, "dependency_removed", Some(id))?;
                }
            }

            repo.delete_task(id)?;
            repo.retire_id(id, &now)?;
            repo.append_audit(id, "deleted", Some(&task.title))?;

            Ok(DeleteReport {
                id: id.to_string(),
                cleaned,
            })
        })?;

        log::info!(
            "Deleted task {} (cleaned {} dependent(s))",
            report.id,
            report.cleaned.len()
        );
        Ok(report)
    }

    /// List tasks matching a filter.
    pub fn list(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        self.storage.repo().list_tasks(filter)
    }

    /// All tasks, oldest first.
    pub fn all(&self) -> Result<Vec<Task>> {
        self.storage.repo().all_tasks()
    }

    pub fn count(&self) -> Result<usize> {
        self.storage.repo().count_tasks()
    }

    /// Dependency graph over the current task set.
    pub fn graph(&self) -> Result<DependencyGraph> {
        Ok(DependencyGraph::from_tasks(&self.all()?))
    }

    /// Tasks with no unmet dependency, most pressing first.
    pub fn ready(&self) -> Result<Vec<Task>> {
        let tasks = self.all()?;
        let graph = DependencyGraph::from_tasks(&tasks);
        Ok(select(tasks, graph.ready_tasks()))
    }

    /// Non-terminal tasks waiting on at least one dependency, most pressing first.
    pub fn blocked(&self) -> Result<Vec<Task>> {
        let tasks = self.all()?;
        let graph = DependencyGraph::from_tasks(&tasks);
        Ok(select(tasks, graph.blocked_tasks()))
    }

    /// Ids of tasks that depend on `id`.
    pub fn blocks(&self, id: &str) -> Result<Vec<String>> {
        let repo = self.storage.repo();
        if !repo.task_exists(id)? {
            return Err(eyre::eyre!(StoreError::not_found(id)));
        }
        repo.dependents_of(id)
    }

    /// All tasks with dependencies before dependents.
    pub fn topological_order(&self) -> Result<Vec<Task>> {
        let tasks = self.all()?;
        let order = DependencyGraph::from_tasks(&tasks).topological_sort()?;
        let mut by_id: HashMap<String, Task> = tasks.into_iter().map(|t| (t.id.clone(), t)).collect();
        Ok(order.into_iter().filter_map(|id| by_id.remove(&id)).collect())
    }

    pub fn critical_path(&self) -> Result<CriticalPath> {
        self.graph()?.critical_path()
    }

    /// Audit entries, oldest first, optionally for one task.
    pub fn audit_log(&self, task_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        self.storage.repo().audit_log(task_id)
    }
}

/// Keep the tasks named in `ids`, most pressing first.
fn select(tasks: Vec<Task>, ids: Vec<String>) -> Vec<Task> {
    let wanted: BTreeSet<String> = ids.into_iter().collect();
    let mut selected: Vec<Task> = tasks.into_iter().filter(|t| wanted.contains(&t.id)).collect();
    SortKey::Priority.sort(&mut selected);
    selected
}

/// Issue an id that is neither live nor retired.
pub(crate) fn fresh_id(repo: &Repo<'_>, title: &str, at: chrono::DateTime<chrono::Utc>) -> Result<String> {
    loop {
        let id = generate_id(title, at);
        if !repo.id_taken(&id)? {
            return Ok(id);
        }
        log::debug!("Id collision on {}, regenerating", id);
    }
}

/// Field-level validation, reporting every violation at once.
pub(crate) fn check_fields(task: &Task, mut errors: Vec<ValidationError>) -> Result<()> {
    errors.extend(task.validate());
    if errors.is_empty() {
        Ok(())
    } else {
        Err(eyre::eyre!(StoreError::Validation(errors)))
    }
}

/// Structural checks for a task's `depends_on` against the stored graph:
/// no self-dependency, every target exists, no cycle.
pub(crate) fn check_dependencies(repo: &Repo<'_>, task: &Task, previous: &BTreeSet<String>) -> Result<()> {
    if task.depends_on.contains(&task.id) {
        return Err(eyre::eyre!(StoreError::SelfDependency(task.id.clone())));
    }
    for dep in &task.depends_on {
        if !repo.task_exists(dep)? {
            return Err(eyre::eyre!(StoreError::dangling(dep.as_str(), task.id.as_str())));
        }
    }

    let added: Vec<&String> = task.depends_on.difference(previous).collect();
    if added.is_empty() {
        return Ok(());
    }

    let mut graph = DependencyGraph::from_tasks(&repo.all_tasks()?);
    for dep in previous.difference(&task.depends_on) {
        graph.remove_edge(&task.id, dep);
    }
    for dep in added {
        graph.add_edge(&task.id, dep)?;
    }
    Ok(())
}

/// Store handle shareable across threads; one mutation at a time.
#[derive(Clone)]
pub struct SharedStore {
    inner: Arc<Mutex<Store>>,
}

impl SharedStore {
    pub fn new(store: Store) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    /// Run `f` with exclusive access to the store.
    pub fn with<T>(&self, f: impl FnOnce(&mut Store) -> Result<T>) -> Result<T> {
        let mut store = self
            .inner
            .lock()
            .map_err(|_| eyre::eyre!("task store mutex poisoned by a panicking thread"))?;
        f(&mut store)
    }
}
