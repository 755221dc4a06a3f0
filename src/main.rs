//! tsk - command line front end for tasksync.

use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tasksync::{
    ExportOptions, ImportOptions, ImportReport, NewTask, PathMetric, Priority, RecordAction, Status, Store,
    StoreExportExt, StoreImportExt, StoreSyncExt, Task, TaskFilter, TaskPatch, parse_timestamp,
};

mod cli;

use cli::{Cli, Command};

fn setup_logging() -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tasksync")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("tasksync.log");

    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    env_logger::Builder::from_default_env()
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

fn get_root(cli: &Cli) -> PathBuf {
    cli.dir
        .clone()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")))
}

fn open(root: &Path) -> Result<Store> {
    Store::open(root).context("Failed to open store")
}

fn format_status(status: Status) -> ColoredString {
    let text = status.as_str();
    match status {
        Status::Todo => text.normal(),
        Status::Doing | Status::TechnicalComplete | Status::RuatValidation | Status::Review => text.yellow(),
        Status::Done => text.green(),
        Status::Blocked => text.red(),
        Status::Cancelled => text.dimmed(),
    }
}

fn format_priority(priority: Priority) -> ColoredString {
    let text = priority.as_str();
    match priority {
        Priority::Urgent => text.red().bold(),
        Priority::High => text.red(),
        Priority::Medium => text.yellow(),
        Priority::Low => text.dimmed(),
    }
}

fn print_line(task: &Task) {
    let tags = if task.tags.is_empty() {
        String::new()
    } else {
        format!(" [{}]", task.tags.iter().cloned().collect::<Vec<_>>().join(", "))
    };
    println!(
        "{} {} {} {}{}",
        format_status(task.status),
        task.id.cyan(),
        format_priority(task.priority),
        task.title,
        tags.dimmed()
    );
}

fn print_list(tasks: &[Task], empty: &str) {
    if tasks.is_empty() {
        println!("{}", empty.dimmed());
    }
    for task in tasks {
        print_line(task);
    }
}

fn print_task(task: &Task, blocks: &[String]) {
    println!("{}: {}", "ID".bold(), task.id.cyan());
    println!("{}: {}", "Title".bold(), task.title);
    println!("{}: {}", "Status".bold(), format_status(task.status));
    println!("{}: {}", "Priority".bold(), format_priority(task.priority));
    if !task.tags.is_empty() {
        println!("{}: {}", "Tags".bold(), task.tags.iter().cloned().collect::<Vec<_>>().join(", "));
    }
    if !task.depends_on.is_empty() {
        println!(
            "{}: {}",
            "Depends on".bold(),
            task.depends_on.iter().cloned().collect::<Vec<_>>().join(", ")
        );
    }
    if !blocks.is_empty() {
        println!("{}: {}", "Blocks".bold(), blocks.join(", "));
    }
    if let Some(assignee) = &task.assignee {
        println!("{}: {}", "Assignee".bold(), assignee);
    }
    if let Some(desc) = &task.description {
        println!("{}: {}", "Description".bold(), desc);
    }
    if let Some(hours) = task.estimated_hours {
        println!("{}: {}h", "Estimate".bold(), hours);
    }
    if let Some(hours) = task.actual_hours {
        println!("{}: {}h", "Actual".bold(), hours);
    }
    for (key, value) in &task.context {
        println!("{}: {} = {:?}", "Context".bold(), key, value);
    }
    println!("{}: {}", "Created".bold(), task.created_at);
    println!("{}: {}", "Updated".bold(), task.updated_at);
    if let Some(completed_at) = &task.completed_at {
        println!("{}: {}", "Completed".bold(), completed_at);
    }
    if let Some(origin) = &task.origin_id {
        println!("{}: {}", "Copied from".bold(), origin);
    }
}

fn print_import(report: &ImportReport) {
    let verb = if report.dry_run { "Would import" } else { "Imported" };
    println!(
        "{} {} {} record(s): {} created, {} updated, {} unchanged, {} skipped, {} copied, {} rejected",
        "✓".green(),
        verb,
        report.records_read,
        report.created(),
        report.updated(),
        report.unchanged(),
        report.skipped(),
        report.created_new(),
        report.rejected()
    );
    for change in &report.changes {
        let id = change.id.as_deref().unwrap_or("?");
        match &change.action {
            RecordAction::Updated => println!("  {} {} ({})", "~".yellow(), id.cyan(), change.fields.join(", ")),
            RecordAction::Created => println!("  {} {}", "+".green(), id.cyan()),
            RecordAction::CreatedNew { new_id } => println!("  {} {} as {}", "+".green(), id.cyan(), new_id.cyan()),
            _ => {}
        }
    }
    for warning in &report.warnings {
        println!("  {} {}", "!".red(), warning);
    }
}

fn run(cli: Cli) -> Result<()> {
    let root = get_root(&cli);

    match cli.command {
        Command::Init => {
            Store::init(&root).context("Failed to initialize task store")?;
            println!("{} Initialized task store in {}", "✓".green(), root.display());
        }

        Command::Create {
            title,
            priority,
            status,
            tags,
            depends_on,
            description,
            assignee,
            estimate,
        } => {
            let mut store = open(&root)?;
            let new = NewTask {
                title,
                description,
                status,
                priority,
                tags,
                depends_on,
                assignee,
                estimated_hours: estimate,
                ..NewTask::default()
            };
            let task = store.create(new).context("Failed to create task")?;
            println!("{} Created: {} {}", "✓".green(), task.id.cyan(), task.title);
        }

        Command::Get { id } => {
            let store = open(&root)?;
            let task = store.get(&id)?;
            let blocks = store.blocks(&id)?;
            print_task(&task, &blocks);
        }

        Command::List {
            status,
            priority,
            assignee,
            tags,
            sort,
            limit,
        } => {
            let store = open(&root)?;
            let filter = TaskFilter {
                statuses: status.into_iter().collect(),
                priorities: priority.into_iter().collect(),
                assignee,
                tags: tags.into_iter().collect(),
                sort: Some(sort),
                limit,
            };
            let tasks = store.list(&filter).context("Failed to list tasks")?;
            print_list(&tasks, "No tasks found");
        }

        Command::Update {
            id,
            title,
            description,
            priority,
            tags,
            assignee,
            unassign,
            estimate,
            actual,
        } => {
            let mut store = open(&root)?;
            let patch = TaskPatch {
                title,
                description: description.map(Some),
                priority,
                tags,
                assignee: if unassign { Some(None) } else { assignee.map(Some) },
                estimated_hours: estimate.map(Some),
                actual_hours: actual.map(Some),
                ..TaskPatch::default()
            };
            let task = store.update(&id, patch).context("Failed to update task")?;
            println!("{} Updated: {} {}", "✓".green(), task.id.cyan(), task.title);
        }

        Command::Status { id, status } => {
            let mut store = open(&root)?;
            let task = store.set_status(&id, status).context("Failed to set status")?;
            println!(
                "{} {} is now {}",
                "✓".green(),
                task.id.cyan(),
                format_status(task.status)
            );
        }

        Command::Depend { id, dep_id } => {
            let mut store = open(&root)?;
            store.add_dependency(&id, &dep_id).context("Failed to add dependency")?;
            println!("{} {} now depends on {}", "✓".green(), id.cyan(), dep_id.cyan());
        }

        Command::Undepend { id, dep_id } => {
            let mut store = open(&root)?;
            store
                .remove_dependency(&id, &dep_id)
                .context("Failed to remove dependency")?;
            println!("{} {} no longer depends on {}", "✓".green(), id.cyan(), dep_id.cyan());
        }

        Command::Delete { id } => {
            let mut store = open(&root)?;
            let report = store.delete(&id).context("Failed to delete task")?;
            println!("{} Deleted: {}", "✓".green(), report.id.cyan());
            for cleaned in &report.cleaned {
                println!("  {} removed from {}", "-".dimmed(), cleaned.cyan());
            }
        }

        Command::Ready => {
            let store = open(&root)?;
            let tasks = store.ready().context("Failed to get ready tasks")?;
            if !tasks.is_empty() {
                println!("{} {} task(s) ready to work on:", "→".blue(), tasks.len());
            }
            print_list(&tasks, "No ready tasks");
        }

        Command::Blocked => {
            let store = open(&root)?;
            let tasks = store.blocked().context("Failed to get blocked tasks")?;
            if !tasks.is_empty() {
                println!("{} {} task(s) blocked:", "⊘".red(), tasks.len());
            }
            print_list(&tasks, "No blocked tasks");
        }

        Command::Order => {
            let store = open(&root)?;
            let tasks = store.topological_order()?;
            print_list(&tasks, "No tasks found");
        }

        Command::CriticalPath => {
            let store = open(&root)?;
            let path = store.critical_path()?;
            if path.tasks.is_empty() {
                println!("{}", "No tasks found".dimmed());
            } else {
                let unit = match path.metric {
                    PathMetric::EstimatedHours => "estimated hours",
                    PathMetric::EdgeCount => "dependency steps",
                };
                println!("{} {} {}:", "→".blue(), path.length, unit);
                for id in &path.tasks {
                    match store.find(id)? {
                        Some(task) => print_line(&task),
                        None => println!("{}", id.cyan()),
                    }
                }
            }
        }

        Command::Export {
            output,
            status,
            assignee,
            tags,
            since,
            sort,
            exclude,
            no_meta,
            estimate,
        } => {
            let store = open(&root)?;
            let mut opts = ExportOptions::new().sort(sort).metadata(!no_meta);
            opts.filter.statuses = status.into_iter().collect();
            opts.filter.assignee = assignee;
            opts.filter.tags = tags.into_iter().collect();
            opts.exclude = exclude.into_iter().collect();
            if let Some(since) = since {
                let watermark = parse_timestamp(&since).with_context(|| format!("Invalid --since '{}'", since))?;
                opts = opts.since(watermark);
            }
            if let Some(path) = &output {
                opts = opts.compression(tasksync::Compression::from_path(path));
            }

            if estimate {
                let size = store.estimate_export(&opts)?;
                println!(
                    "{} record(s), {}{} bytes",
                    size.records,
                    if size.exact { "" } else { "~" },
                    size.bytes
                );
            } else if let Some(path) = output {
                let summary = store.export_path(&opts, &path)?;
                println!(
                    "{} Exported {} task(s) to {}",
                    "✓".green(),
                    summary.records,
                    path.display()
                );
            } else {
                store.export_to(&opts, io::stdout().lock())?;
            }
        }

        Command::Import {
            path,
            resolution,
            strict,
            dry_run,
        } => {
            let mut store = open(&root)?;
            let opts = ImportOptions {
                resolution: resolution.or(Some(store.config().default_resolution)),
                strict: strict || store.config().strict_import,
                dry_run,
            };
            let report = store
                .import_path(&path, &opts)
                .with_context(|| format!("Failed to import {}", path.display()))?;
            print_import(&report);
        }

        Command::Sync { path, resolution } => {
            let mut store = open(&root)?;
            let report = store.sync(path.as_deref(), resolution)?;
            if let Some(import) = &report.import {
                print_import(import);
            }
            if let Some(backup) = &report.backup {
                println!("{} Backup: {}", "✓".green(), backup.display());
            }
            if report.mirror_written {
                println!("{} Mirror written: {}", "✓".green(), report.mirror_path.display());
            } else {
                println!("{}", "Mirror already up to date".dimmed());
            }
        }
    }

    Ok(())
}

fn main() -> Result<()> {
    setup_logging().context("Failed to setup logging")?;

    let cli = Cli::parse();
    info!("Command: {:?}", std::env::args().collect::<Vec<_>>());

    if let Err(e) = run(cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }

    Ok(())
}
