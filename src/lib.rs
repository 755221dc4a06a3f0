//! Tasksync: a local task graph with a version-controlled mirror.
//!
//! Tasks live in an embedded SQLite store under `.tasksync/`. Their
//! `depends_on` edges always form a DAG. The store can be exported to a
//! line-oriented JSON mirror that is committed alongside the project, and
//! edits arriving through that mirror are merged back with `sync`.
//!
//! # Example
//!
//! ```no_run
//! use tasksync::{NewTask, Status, Store, StoreSyncExt};
//! use std::path::Path;
//!
//! // Initialize a new store
//! let mut store = Store::init(Path::new(".")).unwrap();
//!
//! // Create tasks
//! let login = store.create(NewTask::new("Implement login")).unwrap();
//! let tests = store
//!     .create(NewTask::new("Write login tests").with_depends_on([login.id.as_str()]))
//!     .unwrap();
//!
//! // Query ready work
//! let ready = store.ready().unwrap();
//! assert_eq!(ready.len(), 1);
//! assert_eq!(ready[0].id, login.id);
//!
//! // Finish a task; its dependent becomes ready
//! store.set_status(&login.id, Status::Done).unwrap();
//! assert_eq!(store.ready().unwrap()[0].id, tests.id);
//!
//! // Round-trip through the mirror file
//! store.sync(None, None).unwrap();
//! ```

mod atomic;
mod id;
mod lock;
mod storage;
mod timestamp;

pub mod backup;
pub mod builder;
pub mod config;
pub mod error;
pub mod export;
pub mod graph;
pub mod import;
pub mod merge;
pub mod mirror;
pub mod query;
pub mod store;
pub mod sync;
pub mod types;

// Re-export public API
pub use backup::BackupInfo;
pub use builder::{StoreBuilderExt, TaskBuilder};
pub use config::Config;
pub use error::{StoreError, store_error};
pub use export::{Compression, ExportField, ExportOptions, ExportStamp, ExportSummary, SizeEstimate, StoreExportExt};
pub use graph::{CriticalPath, DependencyGraph, PathMetric};
pub use id::{ID_PREFIX, content_digest};
pub use import::{ConflictResolution, ImportOptions, ImportReport, RecordAction, RecordChange, StoreImportExt};
pub use merge::merge;
pub use mirror::{CorruptRecordWarning, MirrorMeta, RawRecord};
pub use query::{Query, SortKey, StoreQueryExt, TaskFilter};
pub use storage::AuditEntry;
pub use store::{DeleteReport, STORE_DIR, SharedStore, Store};
pub use sync::{StoreSyncExt, SyncReport};
pub use timestamp::{format as format_timestamp, parse as parse_timestamp};
pub use types::{ContextValue, NewTask, Priority, Status, Task, TaskPatch, ValidationError};
