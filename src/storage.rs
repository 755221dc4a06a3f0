//! Storage layer: SQLite persistence for tasks, retired ids and the audit log.

use crate::error::StoreError;
use crate::query::{SortKey, TaskFilter};
use crate::timestamp;
use crate::types::{ContextValue, Task};
use chrono::{DateTime, Utc};
use eyre::{Context, Result};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, params, params_from_iter};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// SQLite database file within the store directory.
pub const DB_FILE: &str = "tasks.db";

/// Current on-disk schema version.
pub const SCHEMA_VERSION: i64 = 1;

const TASK_COLUMNS: &str = "id, title, description, status, priority, assignee, created_at, updated_at, \
                            completed_at, due_date, estimated_hours, actual_hours, context, origin_id";

/// One audit log row.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditEntry {
    pub seq: i64,
    pub at: DateTime<Utc>,
    pub task_id: String,
    pub action: String,
    pub detail: Option<String>,
}

/// Storage handle owning the SQLite connection.
pub struct Storage {
    path: PathBuf,
    db: Connection,
}

impl Storage {
    /// Open (creating if needed) the database in a store directory.
    pub fn open(store_dir: &Path) -> Result<Self> {
        let path = store_dir.join(DB_FILE);
        let db = Connection::open(&path).with_context(|| format!("Failed to open SQLite database {}", path.display()))?;
        db.busy_timeout(Duration::from_millis(250))
            .context("Failed to set busy timeout")?;

        let storage = Self { path, db };
        storage.init_schema()?;
        Ok(storage)
    }

    /// Initialize SQLite schema.
    fn init_schema(&self) -> Result<()> {
        self.db
            .execute_batch(
                r#"
                CREATE TABLE IF NOT EXISTS tasks (
                    id TEXT PRIMARY KEY,
                    title TEXT NOT NULL,
                    description TEXT,
                    status TEXT NOT NULL CHECK (status IN ('todo', 'doing', 'technical-complete',
                        'ruat-validation', 'review', 'done', 'blocked', 'cancelled')),
                    priority TEXT NOT NULL CHECK (priority IN ('low', 'medium', 'high', 'urgent')),
                    assignee TEXT,
                    created_at TEXT NOT NULL,
                    updated_at TEXT NOT NULL,
                    completed_at TEXT,
                    due_date TEXT,
                    estimated_hours REAL,
                    actual_hours REAL,
                    context TEXT NOT NULL DEFAULT '{}',
                    origin_id TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status);

                CREATE TABLE IF NOT EXISTS task_tags (
                    task_id TEXT NOT NULL,
                    tag TEXT NOT NULL,
                    PRIMARY KEY (task_id, tag)
                );
                CREATE INDEX IF NOT EXISTS idx_task_tags_tag ON task_tags(tag);

                CREATE TABLE IF NOT EXISTS task_deps (
                    task_id TEXT NOT NULL,
                    depends_on TEXT NOT NULL,
                    PRIMARY KEY (task_id, depends_on)
                );
                CREATE INDEX IF NOT EXISTS idx_task_deps_target ON task_deps(depends_on);

                CREATE TABLE IF NOT EXISTS retired_ids (
                    id TEXT PRIMARY KEY,
                    retired_at TEXT NOT NULL
                );

                CREATE TABLE IF NOT EXISTS audit_log (
                    seq INTEGER PRIMARY KEY AUTOINCREMENT,
                    at TEXT NOT NULL,
                    task_id TEXT NOT NULL,
                    action TEXT NOT NULL,
                    detail TEXT
                );
                CREATE INDEX IF NOT EXISTS idx_audit_task ON audit_log(task_id);

                CREATE TABLE IF NOT EXISTS meta (
                    key TEXT PRIMARY KEY,
                    value TEXT NOT NULL
                );
            "#,
            )
            .map_err(|e| map_busy(e, &self.path))
            .context("Failed to initialize schema")?;

        self.db.execute(
            "INSERT OR IGNORE INTO meta (key, value) VALUES ('schema_version', ?)",
            params![SCHEMA_VERSION.to_string()],
        )?;

        Ok(())
    }

    /// Read-only access outside a transaction.
    pub fn repo(&self) -> Repo<'_> {
        Repo { conn: &self.db }
    }

    /// Run `f` inside a transaction. Any error rolls back; otherwise the
    /// transaction commits when `commit` is true and rolls back when false.
    pub fn transaction<T>(&mut self, commit: bool, f: impl FnOnce(&Repo<'_>) -> Result<T>) -> Result<T> {
        let path = self.path.clone();
        let tx = self
            .db
            .transaction()
            .map_err(|e| map_busy(e, &path))
            .context("Failed to begin transaction")?;

        let value = f(&Repo { conn: &tx })?;

        if commit {
            tx.commit()
                .map_err(|e| map_busy(e, &path))
                .context("Failed to commit transaction")?;
        } else {
            tx.rollback().context("Failed to roll back transaction")?;
        }
        Ok(value)
    }

    /// Schema version recorded in the database.
    pub fn schema_version(&self) -> Result<i64> {
        let value: String = self
            .db
            .query_row("SELECT value FROM meta WHERE key = 'schema_version'", [], |row| row.get(0))?;
        value.parse().context("Corrupt schema_version in meta table")
    }
}

/// SQLite reports contention as BUSY; surface it as a lock error.
fn map_busy(e: rusqlite::Error, path: &Path) -> eyre::Report {
    if e.sqlite_error_code() == Some(ErrorCode::DatabaseBusy) {
        eyre::eyre!(StoreError::Locked {
            path: path.to_path_buf(),
            holder: None
        })
    } else {
        eyre::Report::new(e)
    }
}

/// Row-level operations over a connection or an open transaction.
pub struct Repo<'c> {
    conn: &'c Connection,
}

impl Repo<'_> {
    /// Insert or replace a task with its tags and dependencies.
    pub fn put_task(&self, task: &Task) -> Result<()> {
        let context = serde_json::to_string(&task.context).context("Failed to serialize context")?;

        self.conn.execute(
            &format!(
                "INSERT OR REPLACE INTO tasks ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                TASK_COLUMNS
            ),
            params![
                task.id,
                task.title,
                task.description,
                task.status.as_str(),
                task.priority.as_str(),
                task.assignee,
                timestamp::format(&task.created_at),
                timestamp::format(&task.updated_at),
                task.completed_at.as_ref().map(timestamp::format),
                task.due_date.as_ref().map(timestamp::format),
                task.estimated_hours,
                task.actual_hours,
                context,
                task.origin_id,
            ],
        )?;

        // Delete existing tags/deps and insert new ones
        self.conn
            .execute("DELETE FROM task_tags WHERE task_id = ?", params![task.id])?;
        for tag in &task.tags {
            self.conn.execute(
                "INSERT INTO task_tags (task_id, tag) VALUES (?, ?)",
                params![task.id, tag],
            )?;
        }

        self.conn
            .execute("DELETE FROM task_deps WHERE task_id = ?", params![task.id])?;
        for dep in &task.depends_on {
            self.conn.execute(
                "INSERT INTO task_deps (task_id, depends_on) VALUES (?, ?)",
                params![task.id, dep],
            )?;
        }

        Ok(())
    }

    /// Get a task by ID.
    pub fn get_task(&self, id: &str) -> Result<Option<Task>> {
        let task = self
            .conn
            .query_row(
                &format!("SELECT {} FROM tasks WHERE id = ?", TASK_COLUMNS),
                params![id],
                row_to_task,
            )
            .optional()?;

        match task {
            Some(mut task) => {
                task.tags = self.string_set("SELECT tag FROM task_tags WHERE task_id = ?", id)?;
                task.depends_on = self.string_set("SELECT depends_on FROM task_deps WHERE task_id = ?", id)?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    pub fn task_exists(&self, id: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM tasks WHERE id = ?", params![id], |row| row.get(0))?;
        Ok(count > 0)
    }

    pub fn count_tasks(&self) -> Result<usize> {
        let count: i64 = self.conn.query_row("SELECT COUNT(*) FROM tasks", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// All tasks, oldest first.
    pub fn all_tasks(&self) -> Result<Vec<Task>> {
        self.list_tasks(&TaskFilter::default())
    }

    /// Filtered scan. Sorting defaults to creation order.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {} FROM tasks WHERE 1 = 1", TASK_COLUMNS);
        let mut args: Vec<String> = Vec::new();

        if !filter.statuses.is_empty() {
            sql.push_str(&format!(" AND status IN ({})", placeholders(filter.statuses.len())));
            args.extend(filter.statuses.iter().map(|s| s.as_str().to_string()));
        }
        if !filter.priorities.is_empty() {
            sql.push_str(&format!(" AND priority IN ({})", placeholders(filter.priorities.len())));
            args.extend(filter.priorities.iter().map(|p| p.as_str().to_string()));
        }
        if let Some(assignee) = &filter.assignee {
            sql.push_str(" AND assignee = ?");
            args.push(assignee.clone());
        }
        if !filter.tags.is_empty() {
            sql.push_str(&format!(
                " AND (SELECT COUNT(*) FROM task_tags t WHERE t.task_id = tasks.id AND t.tag IN ({})) = {}",
                placeholders(filter.tags.len()),
                filter.tags.len()
            ));
            args.extend(filter.tags.iter().cloned());
        }

        sql.push(' ');
        sql.push_str(filter.sort.unwrap_or(SortKey::CreatedAt).order_by_sql());
        if let Some(limit) = filter.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut tasks = stmt
            .query_map(params_from_iter(args.iter()), row_to_task)?
            .collect::<rusqlite::Result<Vec<Task>>>()?;

        self.attach_sets(&mut tasks)?;
        Ok(tasks)
    }

    /// Fill tags and depends_on for a batch of rows with two scans.
    fn attach_sets(&self, tasks: &mut [Task]) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }
        let mut tags = self.grouped("SELECT task_id, tag FROM task_tags")?;
        let mut deps = self.grouped("SELECT task_id, depends_on FROM task_deps")?;
        for task in tasks.iter_mut() {
            task.tags = tags.remove(&task.id).unwrap_or_default();
            task.depends_on = deps.remove(&task.id).unwrap_or_default();
        }
        Ok(())
    }

    fn grouped(&self, sql: &str) -> Result<HashMap<String, BTreeSet<String>>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut groups: HashMap<String, BTreeSet<String>> = HashMap::new();
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?;
        for row in rows {
            let (key, value) = row?;
            groups.entry(key).or_default().insert(value);
        }
        Ok(groups)
    }

    fn string_set(&self, sql: &str, id: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare(sql)?;
        let values = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(values)
    }

    /// Ids of tasks whose depends_on contains `id`.
    pub fn dependents_of(&self, id: &str) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT task_id FROM task_deps WHERE depends_on = ? ORDER BY task_id")?;
        let ids = stmt
            .query_map(params![id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    /// Remove a task row with its tags and dependencies.
    pub fn delete_task(&self, id: &str) -> Result<bool> {
        self.conn.execute("DELETE FROM task_tags WHERE task_id = ?", params![id])?;
        self.conn.execute("DELETE FROM task_deps WHERE task_id = ?", params![id])?;
        let removed = self.conn.execute("DELETE FROM tasks WHERE id = ?", params![id])?;
        Ok(removed > 0)
    }

    /// Record that an id must never be issued again.
    pub fn retire_id(&self, id: &str, at: &DateTime<Utc>) -> Result<()> {
        self.conn.execute(
            "INSERT OR IGNORE INTO retired_ids (id, retired_at) VALUES (?, ?)",
            params![id, timestamp::format(at)],
        )?;
        Ok(())
    }

    pub fn is_retired(&self, id: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM retired_ids WHERE id = ?", params![id], |row| row.get(0))?;
        Ok(count > 0)
    }

    /// True when an id is live or retired.
    pub fn id_taken(&self, id: &str) -> Result<bool> {
        Ok(self.task_exists(id)? || self.is_retired(id)?)
    }

    pub fn append_audit(&self, task_id: &str, action: &str, detail: Option<&str>) -> Result<()> {
        self.conn.execute(
            "INSERT INTO audit_log (at, task_id, action, detail) VALUES (?, ?, ?, ?)",
            params![timestamp::format(&timestamp::now()), task_id, action, detail],
        )?;
        Ok(())
    }

    /// Audit entries, oldest first, optionally for a single task.
    pub fn audit_log(&self, task_id: Option<&str>) -> Result<Vec<AuditEntry>> {
        let (sql, args): (&str, Vec<&str>) = match task_id {
            Some(id) => (
                "SELECT seq, at, task_id, action, detail FROM audit_log WHERE task_id = ? ORDER BY seq",
                vec![id],
            ),
            None => ("SELECT seq, at, task_id, action, detail FROM audit_log ORDER BY seq", vec![]),
        };
        let mut stmt = self.conn.prepare(sql)?;
        let entries = stmt
            .query_map(params_from_iter(args.iter()), |row| {
                Ok(AuditEntry {
                    seq: row.get(0)?,
                    at: parse_ts(row, 1)?,
                    task_id: row.get(2)?,
                    action: row.get(3)?,
                    detail: row.get(4)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(entries)
    }
}

fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

fn conversion_error(idx: usize, e: impl std::error::Error + Send + Sync + 'static) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e))
}

fn parse_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = row.get(idx)?;
    timestamp::parse(&s).map_err(|e| conversion_error(idx, e))
}

fn parse_opt_ts(row: &rusqlite::Row, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    let s: Option<String> = row.get(idx)?;
    s.map(|s| timestamp::parse(&s).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

/// Convert a database row to a Task (tags and depends_on left empty).
fn row_to_task(row: &rusqlite::Row) -> rusqlite::Result<Task> {
    let status: String = row.get(3)?;
    let priority: String = row.get(4)?;
    let context: String = row.get(12)?;

    Ok(Task {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        status: status.parse().map_err(|e| conversion_error(3, e))?,
        priority: priority.parse().map_err(|e| conversion_error(4, e))?,
        tags: BTreeSet::new(),
        depends_on: BTreeSet::new(),
        assignee: row.get(5)?,
        created_at: parse_ts(row, 6)?,
        updated_at: parse_ts(row, 7)?,
        completed_at: parse_opt_ts(row, 8)?,
        due_date: parse_opt_ts(row, 9)?,
        estimated_hours: row.get(10)?,
        actual_hours: row.get(11)?,
        context: serde_json::from_str::<BTreeMap<String, ContextValue>>(&context)
            .map_err(|e| conversion_error(12, e))?,
        origin_id: row.get(13)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Priority, Status};
    use tempfile::TempDir;

    fn setup_test_storage() -> (TempDir, Storage) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();
        (temp_dir, storage)
    }

    fn make_task(id: &str, title: &str) -> Task {
        let now = timestamp::now();
        Task {
            id: id.to_string(),
            title: title.to_string(),
            description: Some("A test description".to_string()),
            status: Status::Todo,
            priority: Priority::Medium,
            tags: ["test", "example"].into_iter().map(String::from).collect(),
            depends_on: BTreeSet::new(),
            assignee: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
            due_date: None,
            estimated_hours: Some(1.5),
            actual_hours: None,
            context: [("points".to_string(), ContextValue::Integer(3))].into_iter().collect(),
            origin_id: None,
        }
    }

    #[test]
    fn test_open_creates_database() {
        let temp_dir = TempDir::new().unwrap();
        let storage = Storage::open(temp_dir.path()).unwrap();

        assert!(temp_dir.path().join(DB_FILE).exists());
        assert_eq!(storage.schema_version().unwrap(), SCHEMA_VERSION);
    }

    #[test]
    fn test_put_and_get_task() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let task = make_task("tk-test000001", "Test task");

        storage.transaction(true, |repo| repo.put_task(&task)).unwrap();

        let retrieved = storage.repo().get_task("tk-test000001").unwrap().unwrap();
        assert_eq!(retrieved, task);
        assert!(storage.repo().get_task("tk-missing0001").unwrap().is_none());
    }

    #[test]
    fn test_rollback_on_error() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let task = make_task("tk-test000001", "Test task");

        let result: Result<()> = storage.transaction(true, |repo| {
            repo.put_task(&task)?;
            eyre::bail!("boom")
        });
        assert!(result.is_err());
        assert_eq!(storage.repo().count_tasks().unwrap(), 0);
    }

    #[test]
    fn test_rollback_when_not_committing() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let task = make_task("tk-test000001", "Test task");

        let count = storage
            .transaction(false, |repo| {
                repo.put_task(&task)?;
                repo.count_tasks()
            })
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(storage.repo().count_tasks().unwrap(), 0);
    }

    #[test]
    fn test_dependents_and_delete() {
        let (_temp_dir, mut storage) = setup_test_storage();
        let a = make_task("tk-aaaaaaaaaa", "Task A here");
        let mut b = make_task("tk-bbbbbbbbbb", "Task B here");
        b.depends_on.insert(a.id.clone());

        storage
            .transaction(true, |repo| {
                repo.put_task(&a)?;
                repo.put_task(&b)
            })
            .unwrap();

        assert_eq!(storage.repo().dependents_of(&a.id).unwrap(), vec![b.id.clone()]);

        storage
            .transaction(true, |repo| {
                assert!(repo.delete_task(&b.id)?);
                repo.retire_id(&b.id, &timestamp::now())
            })
            .unwrap();

        assert!(storage.repo().dependents_of(&a.id).unwrap().is_empty());
        assert!(storage.repo().is_retired(&b.id).unwrap());
        assert!(storage.repo().id_taken(&b.id).unwrap());
        assert!(storage.repo().id_taken(&a.id).unwrap());
        assert!(!storage.repo().id_taken("tk-cccccccccc").unwrap());
    }

    #[test]
    fn test_list_filters() {
        let (_temp_dir, mut storage) = setup_test_storage();

        storage
            .transaction(true, |repo| {
                for i in 0..3 {
                    let mut task = make_task(&format!("tk-test00000{}", i), &format!("Test task {}", i));
                    if i == 2 {
                        task.status = Status::Done;
                        task.completed_at = Some(task.updated_at);
                        task.tags.insert("late".to_string());
                    }
                    repo.put_task(&task)?;
                }
                Ok(())
            })
            .unwrap();

        let repo = storage.repo();
        assert_eq!(repo.all_tasks().unwrap().len(), 3);
        assert_eq!(repo.list_tasks(&TaskFilter::new().status(Status::Todo)).unwrap().len(), 2);
        assert_eq!(repo.list_tasks(&TaskFilter::new().status(Status::Done)).unwrap().len(), 1);
        assert_eq!(
            repo.list_tasks(&TaskFilter::new().tag("late").tag("test")).unwrap().len(),
            1
        );
        assert_eq!(repo.list_tasks(&TaskFilter::new().limit(2)).unwrap().len(), 2);
    }

    #[test]
    fn test_audit_log() {
        let (_temp_dir, mut storage) = setup_test_storage();

        storage
            .transaction(true, |repo| {
                repo.append_audit("tk-a", "created", None)?;
                repo.append_audit("tk-b", "deleted", Some("cleanup"))?;
                repo.append_audit("tk-a", "updated", Some("title"))
            })
            .unwrap();

        let all = storage.repo().audit_log(None).unwrap();
        assert_eq!(all.len(), 3);
        let for_a = storage.repo().audit_log(Some("tk-a")).unwrap();
        let actions: Vec<&str> = for_a.iter().map(|e| e.action.as_str()).collect();
        assert_eq!(actions, vec!["created", "updated"]);
    }
}
