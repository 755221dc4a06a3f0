//! Domain errors raised by the store, graph, importer and sync.
//!
//! Operations return `eyre::Result`; domain failures are raised as
//! `eyre::eyre!(StoreError::..)` and can be recovered with
//! `report.downcast_ref::<StoreError>()`.

use crate::types::ValidationError;
use std::fmt;
use std::path::PathBuf;

/// Errors that can occur during store operations.
#[derive(Debug, Clone, PartialEq)]
pub enum StoreError {
    /// One or more field constraints violated.
    Validation(Vec<ValidationError>),
    /// A `depends_on` edge set is not acyclic. Ids follow `depends_on` order.
    Cycle(Vec<String>),
    /// A task listed itself as a dependency.
    SelfDependency(String),
    /// Task not found, either directly or as a dependency target.
    NotFound {
        id: String,
        referenced_by: Option<String>,
    },
    /// Strict import hit an existing id without a resolution strategy.
    Conflict { id: String },
    /// The store is held by another process or handle.
    Locked { path: PathBuf, holder: Option<u32> },
    /// No store has been initialized at this root.
    NotInitialized(PathBuf),
}

impl StoreError {
    pub fn not_found(id: impl Into<String>) -> Self {
        StoreError::NotFound {
            id: id.into(),
            referenced_by: None,
        }
    }

    pub fn dangling(id: impl Into<String>, referenced_by: impl Into<String>) -> Self {
        StoreError::NotFound {
            id: id.into(),
            referenced_by: Some(referenced_by.into()),
        }
    }
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Validation(errors) => {
                write!(f, "validation failed: ")?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}: {}", e.field(), e)?;
                }
                Ok(())
            }
            StoreError::Cycle(ids) => write!(f, "dependency cycle: {}", ids.join(" -> ")),
            StoreError::SelfDependency(id) => write!(f, "task {} cannot depend on itself", id),
            StoreError::NotFound {
                id,
                referenced_by: None,
            } => write!(f, "task not found: {}", id),
            StoreError::NotFound {
                id,
                referenced_by: Some(by),
            } => write!(f, "task not found: {} (referenced by depends_on of {})", id, by),
            StoreError::Conflict { id } => {
                write!(f, "task {} already exists and no conflict resolution was given", id)
            }
            StoreError::Locked { path, holder: Some(pid) } => {
                write!(f, "store is locked by process {} ({})", pid, path.display())
            }
            StoreError::Locked { path, holder: None } => write!(f, "store is locked ({})", path.display()),
            StoreError::NotInitialized(path) => {
                write!(f, "no task store at {}. Run 'tsk init' first.", path.display())
            }
        }
    }
}

impl std::error::Error for StoreError {}

/// Extract the domain error from a report, if there is one.
pub fn store_error(report: &eyre::Report) -> Option<&StoreError> {
    report.downcast_ref::<StoreError>()
}
