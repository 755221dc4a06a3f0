//! Integration tests for graph operations.
//!
//! Tests dependency management, cycle detection, ordering and ready work calculation.

mod common;

use common::{TestEnv, store_err};
use tasksync::{NewTask, PathMetric, Priority, Status, StoreError, TaskPatch};

// =============================================================================
// Ready Work Calculation Tests
// =============================================================================

#[test]
fn test_ready_empty_store() {
    let env = TestEnv::new();
    assert!(env.store.ready().unwrap().is_empty());
}

#[test]
fn test_ready_single_task() {
    let mut env = TestEnv::new();
    let task = env.create_task("Single task");

    env.assert_ready(&task);
    assert_eq!(env.ready_count(), 1);
}

#[test]
fn test_ready_scenario_two_tasks() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);

    assert_eq!(env.ready_ids(), vec![a.id.clone()]);

    env.finish(&a);
    assert_eq!(env.ready_ids(), vec![b.id.clone()]);
}

#[test]
fn test_ready_chain_of_dependencies() {
    let mut env = TestEnv::new();

    // C depends on B depends on A
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);
    let c = env.create_task_depending_on("Task C here", &[&b]);

    env.assert_ready(&a);
    env.assert_not_ready(&b);
    env.assert_not_ready(&c);

    env.finish(&a);
    env.assert_ready(&b);
    env.assert_not_ready(&c);

    env.finish(&b);
    env.assert_ready(&c);
}

#[test]
fn test_ready_multiple_dependencies() {
    let mut env = TestEnv::new();

    let a = env.create_task("Dependency A");
    let b = env.create_task("Dependency B");
    let c = env.create_task_depending_on("Waits on both", &[&a, &b]);

    env.assert_not_ready(&c);
    env.finish(&a);
    env.assert_not_ready(&c);
    env.finish(&b);
    env.assert_ready(&c);
}

#[test]
fn test_ready_requires_done_not_just_progress() {
    let mut env = TestEnv::new();
    let a = env.create_task("Dependency A");
    let b = env.create_task_depending_on("Dependent B", &[&a]);

    for status in [
        Status::Doing,
        Status::TechnicalComplete,
        Status::RuatValidation,
        Status::Review,
        Status::Blocked,
    ] {
        env.set_status(&a, status);
        env.assert_not_ready(&b);
        env.assert_blocked(&b);
    }
}

#[test]
fn test_cancelled_dependency_stays_unmet() {
    let mut env = TestEnv::new();
    let a = env.create_task("Dependency A");
    let b = env.create_task_depending_on("Dependent B", &[&a]);

    env.set_status(&a, Status::Cancelled);
    env.assert_not_ready(&b);
    env.assert_blocked(&b);
}

#[test]
fn test_terminal_tasks_neither_ready_nor_blocked() {
    let mut env = TestEnv::new();
    let done = env.create_task("Finished task");
    let cancelled = env.create_task("Dropped task");
    env.finish(&done);
    env.set_status(&cancelled, Status::Cancelled);

    assert!(env.store.ready().unwrap().is_empty());
    assert!(env.store.blocked().unwrap().is_empty());
}

#[test]
fn test_in_progress_without_dependencies_is_ready() {
    let mut env = TestEnv::new();
    let task = env.create_task("Being worked on");
    env.set_status(&task, Status::Doing);
    env.assert_ready(&task);
}

#[test]
fn test_marked_blocked_is_not_ready() {
    let mut env = TestEnv::new();
    let a = env.create_task("Dependency A");
    let b = env.create_task_depending_on("Dependent B", &[&a]);
    let c = env.create_task("Waiting on vendor");
    env.finish(&a);
    env.set_status(&b, Status::Blocked);
    env.set_status(&c, Status::Blocked);

    env.assert_not_ready(&b);
    env.assert_not_ready(&c);
    env.assert_blocked(&b);
    env.assert_blocked(&c);

    env.set_status(&c, Status::Todo);
    env.assert_ready(&c);
}

#[test]
fn test_ready_ordered_by_priority() {
    let mut env = TestEnv::new();

    let low = env.create_task_with_priority("Low priority", Priority::Low);
    let urgent = env.create_task_with_priority("Urgent priority", Priority::Urgent);
    let medium = env.create_task_with_priority("Medium priority", Priority::Medium);

    assert_eq!(env.ready_ids(), vec![urgent.id, medium.id, low.id]);
}

// =============================================================================
// Blocked Query Tests
// =============================================================================

#[test]
fn test_blocked_is_complement_of_ready() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);
    let c = env.create_task("Task C here");

    let blocked: Vec<String> = env.store.blocked().unwrap().into_iter().map(|t| t.id).collect();
    assert_eq!(blocked, vec![b.id.clone()]);

    let mut ready = env.ready_ids();
    ready.sort();
    let mut expected = vec![a.id, c.id];
    expected.sort();
    assert_eq!(ready, expected);
}

#[test]
fn test_blocks_is_transpose() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);
    let c = env.create_task_depending_on("Task C here", &[&a]);

    let mut blocks = env.store.blocks(&a.id).unwrap();
    blocks.sort();
    let mut expected = vec![b.id.clone(), c.id.clone()];
    expected.sort();
    assert_eq!(blocks, expected);

    let graph = env.store.graph().unwrap();
    assert!(graph.blocks(&a.id).contains(&b.id));
    assert!(graph.depends_on(&b.id).contains(&a.id));
    assert!(graph.blocks(&c.id).is_empty());
}

// =============================================================================
// Cycle Detection Tests
// =============================================================================

#[test]
fn test_cycle_scenario_cites_both_tasks() {
    let mut env = TestEnv::new();
    let b = env.create_task("Task B here");
    let a = env.create_task_depending_on("Task A here", &[&b]);

    let err = env
        .store
        .update(&b.id, TaskPatch::new().depends_on([a.id.as_str()]))
        .unwrap_err();
    assert_eq!(store_err(&err), &StoreError::Cycle(vec![a.id.clone(), b.id.clone()]));

    assert_eq!(env.reload(&a), a);
    assert_eq!(env.reload(&b), b);
}

#[test]
fn test_cycle_detection_chain() {
    let mut env = TestEnv::new();

    // A -> B -> C
    let c = env.create_task("Task C here");
    let b = env.create_task_depending_on("Task B here", &[&c]);
    let a = env.create_task_depending_on("Task A here", &[&b]);

    // C -> A would close the loop
    let err = env.store.add_dependency(&c.id, &a.id).unwrap_err();
    match store_err(&err) {
        StoreError::Cycle(ids) => {
            assert_eq!(ids.len(), 3);
            assert!(ids.contains(&a.id) && ids.contains(&b.id) && ids.contains(&c.id));
        }
        other => panic!("expected Cycle, got {:?}", other),
    }
    assert!(env.reload(&c).depends_on.is_empty());
    assert!(env.store.graph().unwrap().detect_cycles().is_empty());
}

#[test]
fn test_self_reference_rejected() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");

    let err = env.store.add_dependency(&a.id, &a.id).unwrap_err();
    assert_eq!(store_err(&err), &StoreError::SelfDependency(a.id.clone()));
}

#[test]
fn test_diamond_is_not_a_cycle() {
    let mut env = TestEnv::new();

    // A depends on B and C, both depend on D
    let d = env.create_task("Task D here");
    let b = env.create_task_depending_on("Task B here", &[&d]);
    let c = env.create_task_depending_on("Task C here", &[&d]);
    let a = env.create_task_depending_on("Task A here", &[&b, &c]);

    env.assert_not_ready(&a);
    env.assert_ready(&d);
    assert!(env.store.graph().unwrap().detect_cycles().is_empty());
}

// =============================================================================
// Edge Removal Tests
// =============================================================================

#[test]
fn test_remove_dependency_unblocks_task() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);

    env.assert_not_ready(&b);
    env.store.remove_dependency(&b.id, &a.id).unwrap();
    env.assert_ready(&b);
}

#[test]
fn test_remove_dependency_idempotent() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task("Task B here");
    env.add_dep(&b, &a);

    env.store.remove_dependency(&b.id, &a.id).unwrap();
    let after = env.store.remove_dependency(&b.id, &a.id).unwrap();
    assert!(after.depends_on.is_empty());
}

#[test]
fn test_add_dependency_idempotent() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task("Task B here");

    env.add_dep(&b, &a);
    let again = env.add_dep(&b, &a);
    assert_eq!(again.depends_on.len(), 1);
    env.assert_not_ready(&b);
}

#[test]
fn test_delete_cleans_dependents() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);

    env.store.delete(&a.id).unwrap();
    assert!(env.reload(&b).depends_on.is_empty());
    env.assert_ready(&b);
    assert!(env.store.graph().unwrap().dangling().is_empty());
}

// =============================================================================
// Ordering Tests
// =============================================================================

#[test]
fn test_topological_order_respects_edges() {
    let mut env = TestEnv::new();
    let c = env.create_task("Task C here");
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a, &c]);
    let d = env.create_task_depending_on("Task D here", &[&b]);

    let order: Vec<String> = env
        .store
        .topological_order()
        .unwrap()
        .into_iter()
        .map(|t| t.id)
        .collect();
    let pos = |id: &str| order.iter().position(|x| x == id).unwrap();

    assert_eq!(order.len(), 4);
    assert!(pos(&a.id) < pos(&b.id));
    assert!(pos(&c.id) < pos(&b.id));
    assert!(pos(&b.id) < pos(&d.id));
    // Oldest available task first
    assert_eq!(order[0], c.id);
}

#[test]
fn test_critical_path_by_edges_and_hours() {
    let mut env = TestEnv::new();
    let a = env.create_task("Task A here");
    let b = env.create_task_depending_on("Task B here", &[&a]);
    let c = env.create_task_depending_on("Task C here", &[&b]);
    env.create_task("Standalone task");

    let path = env.store.critical_path().unwrap();
    assert_eq!(path.metric, PathMetric::EdgeCount);
    assert_eq!(path.tasks, vec![a.id.clone(), b.id.clone(), c.id.clone()]);
    assert_eq!(path.length, 2.0);

    // Every task estimated: a single long task outweighs the chain
    let mut env = TestEnv::new();
    let short1 = env.store.create(NewTask::new("Short first").with_estimate(1.0)).unwrap();
    let short2 = env
        .store
        .create(
            NewTask::new("Short second")
                .with_estimate(1.0)
                .with_depends_on([short1.id.as_str()]),
        )
        .unwrap();
    let long = env.store.create(NewTask::new("Long standalone").with_estimate(5.0)).unwrap();

    let path = env.store.critical_path().unwrap();
    assert_eq!(path.metric, PathMetric::EstimatedHours);
    assert_eq!(path.tasks, vec![long.id]);
    assert_eq!(path.length, 5.0);
    assert_ne!(path.tasks, vec![short1.id, short2.id]);

    // A stray unestimated task does not switch the chain back to edges
    env.create_task("Unestimated note");
    let path = env.store.critical_path().unwrap();
    assert_eq!(path.metric, PathMetric::EstimatedHours);
    assert_eq!(path.length, 5.0);
}
