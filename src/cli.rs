//! CLI argument parsing for tsk.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tasksync::{ConflictResolution, ExportField, Priority, SortKey, Status};

#[derive(Parser)]
#[command(
    name = "tsk",
    about = "Local task graph with a version-controlled mirror",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/tasksync/logs/tasksync.log"
)]
pub struct Cli {
    /// Project root holding the .tasksync store (default: current directory)
    #[arg(short = 'd', long, global = true)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize a task store in the project root
    Init,

    /// Create a new task
    Create {
        /// Task title
        title: String,

        /// Priority (low, medium, high, urgent)
        #[arg(short, long)]
        priority: Option<Priority>,

        /// Initial status
        #[arg(short, long)]
        status: Option<Status>,

        /// Tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Ids of tasks this one depends on (comma-separated)
        #[arg(long, value_delimiter = ',')]
        depends_on: Vec<String>,

        /// Description
        #[arg(short = 'D', long)]
        description: Option<String>,

        /// Assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Estimated hours
        #[arg(short, long)]
        estimate: Option<f64>,
    },

    /// Show one task
    Get {
        /// Task ID
        id: String,
    },

    /// List tasks
    List {
        /// Only these statuses (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        status: Vec<Status>,

        /// Only these priorities (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        priority: Vec<Priority>,

        /// Only tasks with this assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Only tasks carrying every one of these tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Sort key (created_at, updated_at, priority, title)
        #[arg(long, default_value = "created_at")]
        sort: SortKey,

        /// Maximum number of tasks
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Change task fields
    Update {
        /// Task ID
        id: String,

        #[arg(long)]
        title: Option<String>,

        #[arg(short = 'D', long)]
        description: Option<String>,

        #[arg(short, long)]
        priority: Option<Priority>,

        /// Replace tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Option<Vec<String>>,

        #[arg(short, long)]
        assignee: Option<String>,

        /// Clear the assignee
        #[arg(long, conflicts_with = "assignee")]
        unassign: bool,

        #[arg(short, long)]
        estimate: Option<f64>,

        /// Hours actually spent
        #[arg(long)]
        actual: Option<f64>,
    },

    /// Set a task's status
    Status {
        /// Task ID
        id: String,

        /// New status
        status: Status,
    },

    /// Make a task depend on another
    Depend {
        /// Task that waits
        id: String,

        /// Task that must be done first
        dep_id: String,
    },

    /// Remove a dependency
    Undepend {
        /// Task that waits
        id: String,

        /// Dependency to drop
        dep_id: String,
    },

    /// Delete a task and remove it from every dependent
    Delete {
        /// Task ID
        id: String,
    },

    /// Show tasks that are ready to work on
    Ready,

    /// Show tasks waiting on unfinished dependencies
    Blocked,

    /// Show every task with dependencies first
    Order,

    /// Show the longest dependency chain
    CriticalPath,

    /// Export tasks to the mirror format
    Export {
        /// Output file (stdout when omitted; a .gz extension compresses)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Only these statuses (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        status: Vec<Status>,

        /// Only tasks with this assignee
        #[arg(short, long)]
        assignee: Option<String>,

        /// Only tasks carrying every one of these tags (comma-separated)
        #[arg(short, long, value_delimiter = ',')]
        tags: Vec<String>,

        /// Only tasks updated after this RFC 3339 timestamp
        #[arg(long)]
        since: Option<String>,

        /// Sort key (created_at, updated_at, priority, title)
        #[arg(long, default_value = "created_at")]
        sort: SortKey,

        /// Optional fields to leave out (comma-separated)
        #[arg(long, value_delimiter = ',')]
        exclude: Vec<ExportField>,

        /// Omit the leading metadata line
        #[arg(long)]
        no_meta: bool,

        /// Print the estimated size instead of exporting
        #[arg(long)]
        estimate: bool,
    },

    /// Import a mirror snapshot
    Import {
        /// Snapshot file (plain or gzip)
        path: PathBuf,

        /// Conflict resolution (skip, overwrite, merge, create_new)
        #[arg(short, long)]
        resolution: Option<ConflictResolution>,

        /// Reject records that violate any invariant
        #[arg(long)]
        strict: bool,

        /// Report what would change without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Back up, import the mirror, and rewrite it
    Sync {
        /// Snapshot to import (default: the configured mirror)
        path: Option<PathBuf>,

        /// Conflict resolution (default from config.yaml)
        #[arg(short, long)]
        resolution: Option<ConflictResolution>,
    },
}
