//! Field-level merge of two versions of the same task.

use crate::types::{ContextValue, Task};
use std::collections::BTreeMap;

/// Merge `incoming` into `local`.
///
/// Scalars (title, description, status, priority, assignee, dates, hours)
/// come from whichever side has the later `updated_at`; a tie keeps local.
/// `tags` and `depends_on` are unioned. Context keys from incoming replace
/// local ones only when incoming is newer, and keys only incoming has are
/// always added.
pub fn merge(local: &Task, incoming: &Task) -> Task {
    let incoming_newer = incoming.updated_at > local.updated_at;
    let newer = if incoming_newer { incoming } else { local };

    Task {
        id: local.id.clone(),
        title: newer.title.clone(),
        description: newer.description.clone(),
        status: newer.status,
        priority: newer.priority,
        tags: local.tags.union(&incoming.tags).cloned().collect(),
        depends_on: local.depends_on.union(&incoming.depends_on).cloned().collect(),
        assignee: newer.assignee.clone(),
        created_at: local.created_at.min(incoming.created_at),
        updated_at: local.updated_at.max(incoming.updated_at),
        completed_at: newer.completed_at,
        due_date: newer.due_date,
        estimated_hours: newer.estimated_hours,
        actual_hours: newer.actual_hours,
        context: merge_context(&local.context, &incoming.context, incoming_newer),
        origin_id: local.origin_id.clone().or_else(|| incoming.origin_id.clone()),
    }
}

fn merge_context(
    local: &BTreeMap<String, ContextValue>,
    incoming: &BTreeMap<String, ContextValue>,
    incoming_newer: bool,
) -> BTreeMap<String, ContextValue> {
    let mut merged = local.clone();
    for (key, value) in incoming {
        if incoming_newer || !merged.contains_key(key) {
            merged.insert(key.clone(), value.clone());
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timestamp;
    use crate::types::{Priority, Status};
    use chrono::Duration;
    use std::collections::BTreeSet;

    fn version(title: &str, minutes: i64, tags: &[&str]) -> Task {
        let created = timestamp::parse("2026-05-01T12:00:00Z").unwrap();
        Task {
            id: "tk-0000000001".to_string(),
            title: title.to_string(),
            description: None,
            status: Status::Todo,
            priority: Priority::Medium,
            tags: tags.iter().map(|t| t.to_string()).collect(),
            depends_on: BTreeSet::new(),
            assignee: None,
            created_at: created,
            updated_at: created + Duration::minutes(minutes),
            completed_at: None,
            due_date: None,
            estimated_hours: None,
            actual_hours: None,
            context: BTreeMap::new(),
            origin_id: None,
        }
    }

    #[test]
    fn test_newer_incoming_wins_scalars_and_sets_union() {
        let local = version("old", 1, &["a"]);
        let incoming = version("new", 2, &["b"]);

        let merged = merge(&local, &incoming);
        assert_eq!(merged.title, "new");
        assert_eq!(merged.tags, ["a", "b"].into_iter().map(String::from).collect());
        assert_eq!(merged.updated_at, incoming.updated_at);
    }

    #[test]
    fn test_newer_local_wins_scalars() {
        let mut local = version("local title", 5, &[]);
        local.status = Status::Done;
        local.completed_at = Some(local.updated_at);
        let mut incoming = version("incoming title", 2, &[]);
        incoming.priority = Priority::Urgent;

        let merged = merge(&local, &incoming);
        assert_eq!(merged.title, "local title");
        assert_eq!(merged.status, Status::Done);
        assert_eq!(merged.completed_at, local.completed_at);
        assert_eq!(merged.priority, Priority::Medium);
        assert_eq!(merged.updated_at, local.updated_at);
    }

    #[test]
    fn test_tie_keeps_local() {
        let local = version("local title", 3, &[]);
        let incoming = version("incoming title", 3, &[]);
        assert_eq!(merge(&local, &incoming).title, "local title");
    }

    #[test]
    fn test_context_key_by_key() {
        let mut local = version("Context task", 1, &[]);
        local.context.insert("shared".into(), ContextValue::from("local"));
        local.context.insert("local_only".into(), ContextValue::from(1i64));
        let mut incoming = version("Context task", 2, &[]);
        incoming.context.insert("shared".into(), ContextValue::from("incoming"));
        incoming.context.insert("incoming_only".into(), ContextValue::from(true));

        let merged = merge(&local, &incoming);
        assert_eq!(merged.context["shared"], ContextValue::from("incoming"));
        assert_eq!(merged.context["local_only"], ContextValue::from(1i64));
        assert_eq!(merged.context["incoming_only"], ContextValue::from(true));

        // Older incoming only contributes keys local lacks
        let merged = merge(&incoming, &local);
        assert_eq!(merged.context["shared"], ContextValue::from("incoming"));
        assert_eq!(merged.context.len(), 3);
    }

    #[test]
    fn test_merge_is_identity_on_equal_tasks() {
        let task = version("Same everywhere", 4, &["x"]);
        assert_eq!(merge(&task, &task), task);
    }
}
