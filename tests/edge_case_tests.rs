//! Integration tests for edge cases.
//!
//! Tests boundary values, unicode handling, and unusual inputs.

mod common;

use common::TestEnv;
use tasksync::{ContextValue, NewTask, Priority, SortKey, Status, StoreQueryExt, TaskFilter, TaskPatch};

// =============================================================================
// Empty Store Operations
// =============================================================================

#[test]
fn test_empty_store_ready() {
    let env = TestEnv::new();
    assert!(env.store.ready().unwrap().is_empty());
}

#[test]
fn test_empty_store_blocked() {
    let env = TestEnv::new();
    assert!(env.store.blocked().unwrap().is_empty());
}

#[test]
fn test_empty_store_list() {
    let env = TestEnv::new();
    assert!(env.store.list(&TaskFilter::new()).unwrap().is_empty());
    assert_eq!(env.count_by_status(Status::Todo), 0);
}

#[test]
fn test_empty_store_query_and_order() {
    let env = TestEnv::new();
    assert!(env.store.query().execute().unwrap().is_empty());
    assert!(env.store.topological_order().unwrap().is_empty());
    assert!(env.store.critical_path().unwrap().tasks.is_empty());
}

// =============================================================================
// Unicode and Special Characters
// =============================================================================

#[test]
fn test_unicode_title_emoji() {
    let mut env = TestEnv::new();

    let task = env.create_task("Task with emoji: \u{1F680}");
    assert_eq!(env.reload(&task).title, task.title);
}

#[test]
fn test_unicode_title_counts_characters_not_bytes() {
    let mut env = TestEnv::new();

    // Five characters, fifteen bytes
    let task = env.create_task("\u{4E2D}\u{6587}\u{4EFB}\u{52A1}\u{4E00}");
    assert!(task.id.starts_with("tk-"));
    assert_eq!(env.reload(&task).title.chars().count(), 5);
}

#[test]
fn test_unicode_tag_accepted() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_tags("Localized tags", &["\u{00E9}t\u{00E9}", "\u{4E2D}\u{6587}"]);
    assert_eq!(task.tags.len(), 2);
}

#[test]
fn test_emoji_tag_rejected() {
    let mut env = TestEnv::new();
    let result = env
        .store
        .create(NewTask::new("Emoji tagged").with_tags(["\u{1F3F7}\u{FE0F}tag"]));
    assert!(result.is_err());
}

#[test]
fn test_unicode_description() {
    let mut env = TestEnv::new();
    let task = env
        .store
        .create(NewTask::new("Described task").with_description("Description with \u{1F4DD} emoji"))
        .unwrap();
    assert!(task.description.unwrap().contains('\u{1F4DD}'));
}

// =============================================================================
// Title Length Boundaries
// =============================================================================

#[test]
fn test_title_length_min_valid() {
    let mut env = TestEnv::new();
    let task = env.create_task("Xxxxx");
    assert_eq!(task.title, "Xxxxx");
    assert!(env.store.create(NewTask::new("Xxxx")).is_err());
}

#[test]
fn test_title_length_max_valid() {
    let mut env = TestEnv::new();
    let task = env.create_task(&"x".repeat(200));
    assert_eq!(task.title.len(), 200);
    assert!(env.store.create(NewTask::new("x".repeat(201))).is_err());
}

// =============================================================================
// Description Edge Cases
// =============================================================================

#[test]
fn test_description_at_limit() {
    let mut env = TestEnv::new();
    let task = env
        .store
        .create(NewTask::new("Long description").with_description("x".repeat(10_000)))
        .unwrap();
    assert_eq!(task.description.unwrap().len(), 10_000);
}

#[test]
fn test_description_with_newlines() {
    let mut env = TestEnv::new();
    let desc = "Line 1\nLine 2\nLine 3";
    let task = env
        .store
        .create(NewTask::new("Multiline task").with_description(desc))
        .unwrap();
    assert_eq!(env.reload(&task).description.as_deref(), Some(desc));
}

#[test]
fn test_description_removal() {
    let mut env = TestEnv::new();
    let task = env
        .store
        .create(NewTask::new("Described task").with_description("Original description"))
        .unwrap();

    let updated = env.update(&task, TaskPatch::new().description(None));
    assert!(updated.description.is_none());
}

// =============================================================================
// Tag Edge Cases
// =============================================================================

#[test]
fn test_max_tags() {
    let mut env = TestEnv::new();
    let tags: Vec<String> = (0..20).map(|i| format!("tag{:02}", i)).collect();
    let task = env.store.create(NewTask::new("Many tags task").with_tags(tags)).unwrap();
    assert_eq!(task.tags.len(), 20);
}

#[test]
fn test_tag_punctuation() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_tags("Punctuated tags", &["my-tag", "my_tag", "v1.2", "area:api", "team/core"]);
    assert_eq!(task.tags.len(), 5);
}

#[test]
fn test_tags_come_back_sorted() {
    let mut env = TestEnv::new();
    let task = env.create_task_with_tags("Unsorted tags", &["zeta", "alpha", "mid"]);
    let tags: Vec<String> = env.reload(&task).tags.into_iter().collect();
    assert_eq!(tags, vec!["alpha", "mid", "zeta"]);
}

// =============================================================================
// Context Edge Cases
// =============================================================================

#[test]
fn test_context_scalars_roundtrip() {
    let mut env = TestEnv::new();
    let task = env
        .store
        .create(
            NewTask::new("Context task")
                .with_context("points", 3i64)
                .with_context("ratio", 0.25)
                .with_context("flag", true)
                .with_context("note", "free text"),
        )
        .unwrap();

    let stored = env.reload(&task);
    assert_eq!(stored.context["points"], ContextValue::Integer(3));
    assert_eq!(stored.context["ratio"], ContextValue::Float(0.25));
    assert_eq!(stored.context["flag"], ContextValue::Bool(true));
    assert_eq!(stored.context["note"], ContextValue::from("free text"));
}

#[test]
fn test_context_size_limit() {
    let mut env = TestEnv::new();
    let result = env
        .store
        .create(NewTask::new("Huge context").with_context("blob", "x".repeat(5000)));
    assert!(result.is_err());
}

// =============================================================================
// ID Generation
// =============================================================================

#[test]
fn test_id_format() {
    let mut env = TestEnv::new();
    let task = env.create_task("Test task");
    assert!(task.id.starts_with("tk-"));
    assert_eq!(task.id.len(), 13);
    assert!(task.id[3..].chars().all(|c| c.is_ascii_hexdigit()));
}

#[test]
fn test_unique_ids_for_same_title() {
    let mut env = TestEnv::new();
    let first = env.create_task("Same title");
    let second = env.create_task("Same title");
    assert_ne!(first.id, second.id);
}

// =============================================================================
// Timestamps
// =============================================================================

#[test]
fn test_timestamps_monotonic() {
    let mut env = TestEnv::new();
    let task = env.create_task("Timed task");
    let updated = env.update(&task, TaskPatch::new().title("Timed task renamed"));
    assert!(updated.updated_at >= task.updated_at);
    assert_eq!(updated.created_at, task.created_at);

    let json = serde_json::to_string(&updated).unwrap();
    let stamp = tasksync::format_timestamp(&updated.created_at);
    assert!(stamp.ends_with('Z'));
    assert_eq!(stamp.len(), "2026-01-01T00:00:00.000000Z".len());
    assert!(json.contains(&stamp));
}

// =============================================================================
// Query Edge Cases
// =============================================================================

#[test]
fn test_query_with_all_filters() {
    let mut env = TestEnv::new();

    env.store
        .create(
            NewTask::new("Backend task")
                .with_tags(["backend", "api"])
                .with_assignee("ana")
                .with_priority(Priority::High),
        )
        .unwrap();
    env.create_task_with_tags("Frontend task", &["frontend"]);
    env.create_task_with_tags("Backend only", &["backend"]);

    let results = env
        .store
        .query()
        .status(Status::Todo)
        .priority(Priority::High)
        .assignee("ana")
        .tag("backend")
        .tag("api")
        .limit(10)
        .execute()
        .unwrap();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].title, "Backend task");
}

#[test]
fn test_tag_filter_is_intersection() {
    let mut env = TestEnv::new();
    env.create_task_with_tags("Both tags", &["a", "b"]);
    env.create_task_with_tags("Only first", &["a"]);

    assert_eq!(env.store.query().tag("a").count().unwrap(), 2);
    assert_eq!(env.store.query().tag("a").tag("b").count().unwrap(), 1);
    assert_eq!(env.store.query().tag("c").count().unwrap(), 0);
}

#[test]
fn test_status_filter_is_union() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task("Task B here");
    env.create_task("Task C here");
    env.finish(&a);
    env.set_status(&b, Status::Review);

    let filter = TaskFilter::new().status(Status::Done).status(Status::Review);
    assert_eq!(env.store.list(&filter).unwrap().len(), 2);
}

#[test]
fn test_sort_and_limit() {
    let mut env = TestEnv::new();
    for title in ["Charlie task", "Alpha task", "Bravo task"] {
        env.create_task(title);
    }

    let titles: Vec<String> = env
        .store
        .list(&TaskFilter::new().sort(SortKey::Title).limit(2))
        .unwrap()
        .into_iter()
        .map(|t| t.title)
        .collect();
    assert_eq!(titles, vec!["Alpha task", "Bravo task"]);
}

#[test]
fn test_limit_beyond_results() {
    let mut env = TestEnv::new();
    env.create_task("Task one here");
    env.create_task("Task two here");

    assert_eq!(env.store.query().limit(100).execute().unwrap().len(), 2);
}

// =============================================================================
// Completion Timestamps
// =============================================================================

#[test]
fn test_completed_at_on_done_and_cleared_on_reopen() {
    let mut env = TestEnv::new();
    let task = env.create_task("Finish me later");

    let done = env.finish(&task);
    assert!(done.completed_at.is_some());

    let reopened = env.set_status(&task, Status::Todo);
    assert!(reopened.completed_at.is_none());
}

#[test]
fn test_cancelled_has_no_completed_at() {
    let mut env = TestEnv::new();
    let task = env.create_task("Never finished");
    let cancelled = env.set_status(&task, Status::Cancelled);
    assert!(cancelled.completed_at.is_none());
}
