//! Dependency graph derived from every task's `depends_on` set.
//!
//! The graph is rebuilt from the store whenever it is needed and is never
//! persisted. `blocks` is always the transpose of `depends_on`.

use crate::error::StoreError;
use crate::types::{Status, Task};
use chrono::{DateTime, Utc};
use eyre::Result;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::LazyLock;

static EMPTY: LazyLock<BTreeSet<String>> = LazyLock::new(BTreeSet::new);

#[derive(Debug, Clone)]
struct Node {
    status: Status,
    created_at: DateTime<Utc>,
    estimated_hours: Option<f64>,
}

/// How a critical path was measured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathMetric {
    /// Number of `depends_on` edges in the chain.
    EdgeCount,
    /// Sum of `estimated_hours` over the chain; used when every task with a
    /// dependency edge has an estimate.
    EstimatedHours,
}

/// Longest dependency chain, root dependency first.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticalPath {
    pub tasks: Vec<String>,
    pub metric: PathMetric,
    pub length: f64,
}

/// In-memory adjacency over a task set.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, Node>,
    depends_on: BTreeMap<String, BTreeSet<String>>,
    blocks: BTreeMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn from_tasks<'a>(tasks: impl IntoIterator<Item = &'a Task>) -> Self {
        let mut graph = Self::default();
        for task in tasks {
            graph.nodes.insert(
                task.id.clone(),
                Node {
                    status: task.status,
                    created_at: task.created_at,
                    estimated_hours: task.estimated_hours,
                },
            );
            for dep in &task.depends_on {
                graph.insert_edge(&task.id, dep);
            }
        }
        graph
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    /// Ids `id` depends on.
    pub fn depends_on(&self, id: &str) -> &BTreeSet<String> {
        self.depends_on.get(id).unwrap_or(&EMPTY)
    }

    /// Ids that depend on `id`.
    pub fn blocks(&self, id: &str) -> &BTreeSet<String> {
        self.blocks.get(id).unwrap_or(&EMPTY)
    }

    /// Edges whose target is not a known task, as `(task, missing dependency)`.
    pub fn dangling(&self) -> Vec<(String, String)> {
        self.depends_on
            .iter()
            .flat_map(|(task, deps)| {
                deps.iter()
                    .filter(|dep| !self.nodes.contains_key(*dep))
                    .map(move |dep| (task.clone(), dep.clone()))
            })
            .collect()
    }

    /// Check that `task_id -> dep_id` can be added without a self-loop or a cycle.
    ///
    /// A cycle exists if `task_id` is already reachable from `dep_id`; the
    /// error carries that path, which the new edge would close.
    pub fn validate_new_edge(&self, task_id: &str, dep_id: &str) -> Result<()> {
        if task_id == dep_id {
            return Err(eyre::eyre!(StoreError::SelfDependency(task_id.to_string())));
        }

        // BFS from dep_id along depends_on edges
        let mut parent: HashMap<&str, &str> = HashMap::new();
        let mut queue = VecDeque::from([dep_id]);
        parent.insert(dep_id, dep_id);

        while let Some(current) = queue.pop_front() {
            if current == task_id {
                let mut path = vec![current.to_string()];
                let mut node = current;
                while node != dep_id {
                    node = parent[node];
                    path.push(node.to_string());
                }
                path.reverse();
                return Err(eyre::eyre!(StoreError::Cycle(path)));
            }
            for next in self.depends_on(current) {
                if !parent.contains_key(next.as_str()) {
                    parent.insert(next.as_str(), current);
                    queue.push_back(next.as_str());
                }
            }
        }

        Ok(())
    }

    /// Validate and insert an edge.
    pub fn add_edge(&mut self, task_id: &str, dep_id: &str) -> Result<()> {
        if self.depends_on(task_id).contains(dep_id) {
            return Ok(());
        }
        self.validate_new_edge(task_id, dep_id)?;
        self.insert_edge(task_id, dep_id);
        Ok(())
    }

    pub fn remove_edge(&mut self, task_id: &str, dep_id: &str) {
        if let Some(deps) = self.depends_on.get_mut(task_id) {
            deps.remove(dep_id);
        }
        if let Some(dependents) = self.blocks.get_mut(dep_id) {
            dependents.remove(task_id);
        }
    }

    fn insert_edge(&mut self, task_id: &str, dep_id: &str) {
        self.depends_on
            .entry(task_id.to_string())
            .or_default()
            .insert(dep_id.to_string());
        self.blocks
            .entry(dep_id.to_string())
            .or_default()
            .insert(task_id.to_string());
    }

    /// Every elementary cycle, each starting at its smallest id and listed in
    /// `depends_on` order. Cycles sharing tasks are reported separately.
    pub fn detect_cycles(&self) -> Vec<Vec<String>> {
        let mut cycles = Vec::new();

        for start in self.nodes.keys().map(String::as_str) {
            // Larger ids that lead back to start
            let mut reach: HashSet<&str> = HashSet::new();
            let mut queue = VecDeque::from([start]);
            while let Some(current) = queue.pop_front() {
                for dependent in self.blocks(current).iter().map(String::as_str) {
                    if dependent > start && self.nodes.contains_key(dependent) && reach.insert(dependent) {
                        queue.push_back(dependent);
                    }
                }
            }

            let steps = |id: &str| {
                self.known_deps(id)
                    .into_iter()
                    .filter(|next| *next == start || reach.contains(next))
                    .collect::<Vec<_>>()
            };

            // Iterative DFS: path holds the current chain, stack the pending neighbours
            let mut path: Vec<&str> = vec![start];
            let mut stack: Vec<Vec<&str>> = vec![steps(start)];
            while let Some(pending) = stack.last_mut() {
                match pending.pop() {
                    Some(next) if next == start => {
                        cycles.push(path.iter().map(|id| id.to_string()).collect());
                    }
                    Some(next) => {
                        if !path.contains(&next) {
                            path.push(next);
                            stack.push(steps(next));
                        }
                    }
                    None => {
                        stack.pop();
                        path.pop();
                    }
                }
            }
        }

        cycles.sort();
        cycles
    }

    fn known_deps(&self, id: &str) -> Vec<&str> {
        // Reversed so pop() visits in ascending order
        self.depends_on(id)
            .iter()
            .rev()
            .filter(|dep| self.nodes.contains_key(*dep))
            .map(String::as_str)
            .collect()
    }

    /// Whether every dependency of `id` exists and is done.
    fn dependencies_met(&self, id: &str) -> bool {
        self.depends_on(id)
            .iter()
            .all(|dep| self.nodes.get(dep).is_some_and(|node| node.status == Status::Done))
    }

    fn ordered(&self, mut ids: Vec<&String>) -> Vec<String> {
        ids.sort_by(|a, b| self.creation_order(a, b));
        ids.into_iter().cloned().collect()
    }

    fn creation_order(&self, a: &str, b: &str) -> Ordering {
        self.nodes[a].created_at.cmp(&self.nodes[b].created_at).then_with(|| a.cmp(b))
    }

    fn is_ready(&self, id: &str, node: &Node) -> bool {
        node.status != Status::Blocked && self.dependencies_met(id)
    }

    /// Non-terminal tasks with no unmet dependency, oldest first.
    ///
    /// A task marked `blocked` is never ready, whatever its dependencies.
    pub fn ready_tasks(&self) -> Vec<String> {
        self.ordered(
            self.nodes
                .iter()
                .filter(|(id, node)| !node.status.is_terminal() && self.is_ready(id, node))
                .map(|(id, _)| id)
                .collect(),
        )
    }

    /// Non-terminal tasks that are not ready, oldest first.
    pub fn blocked_tasks(&self) -> Vec<String> {
        self.ordered(
            self.nodes
                .iter()
                .filter(|(id, node)| !node.status.is_terminal() && !self.is_ready(id, node))
                .map(|(id, _)| id)
                .collect(),
        )
    }

    /// Dependencies before dependents; among available tasks the oldest goes first.
    pub fn topological_sort(&self) -> Result<Vec<String>> {
        let mut in_degree: HashMap<&str, usize> = self
            .nodes
            .keys()
            .map(|id| (id.as_str(), self.known_deps(id).len()))
            .collect();

        let mut heap: BinaryHeap<Reverse<(DateTime<Utc>, &str)>> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| Reverse((self.nodes[*id].created_at, *id)))
            .collect();

        let mut order = Vec::with_capacity(self.nodes.len());
        while let Some(Reverse((_, id))) = heap.pop() {
            order.push(id.to_string());
            for dependent in self.blocks(id) {
                if let Some(degree) = in_degree.get_mut(dependent.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        heap.push(Reverse((self.nodes[dependent].created_at, dependent.as_str())));
                    }
                }
            }
        }

        if order.len() < self.nodes.len() {
            let cycle = self.detect_cycles().into_iter().next().unwrap_or_default();
            return Err(eyre::eyre!(StoreError::Cycle(cycle)));
        }
        Ok(order)
    }

    /// Longest dependency chain.
    ///
    /// Measured in summed `estimated_hours` when every task on a dependency
    /// edge carries an estimate, otherwise in edges. Unlinked tasks without
    /// an estimate weigh nothing. Ties prefer the chain whose oldest task is
    /// oldest, then the smaller id.
    pub fn critical_path(&self) -> Result<CriticalPath> {
        let order = self.topological_sort()?;
        let linked = |id: &str| {
            !self.known_deps(id).is_empty() || self.blocks(id).iter().any(|d| self.nodes.contains_key(d))
        };
        let any_estimate = self.nodes.values().any(|n| n.estimated_hours.is_some());
        let linked_estimated = self
            .nodes
            .iter()
            .filter(|(id, _)| linked(id.as_str()))
            .all(|(_, n)| n.estimated_hours.is_some());
        let metric = if any_estimate && linked_estimated {
            PathMetric::EstimatedHours
        } else {
            PathMetric::EdgeCount
        };
        let weight = |id: &str| match metric {
            PathMetric::EstimatedHours => self.nodes[id].estimated_hours.unwrap_or(0.0),
            PathMetric::EdgeCount => 1.0,
        };

        struct Best<'g> {
            length: f64,
            oldest: DateTime<Utc>,
            prev: Option<&'g str>,
        }

        fn better(a: &Best<'_>, a_id: &str, b: &Best<'_>, b_id: &str) -> bool {
            a.length > b.length
                || (a.length == b.length && (a.oldest < b.oldest || (a.oldest == b.oldest && a_id < b_id)))
        }

        let mut best: HashMap<&str, Best> = HashMap::new();
        for id in &order {
            let node = &self.nodes[id];
            let mut chosen = Best {
                length: match metric {
                    PathMetric::EstimatedHours => weight(id),
                    PathMetric::EdgeCount => 0.0,
                },
                oldest: node.created_at,
                prev: None,
            };
            let mut chosen_via = id.as_str();

            for dep in self.known_deps(id) {
                let via = &best[dep];
                let candidate = Best {
                    length: via.length + weight(id),
                    oldest: via.oldest.min(node.created_at),
                    prev: Some(dep),
                };
                if better(&candidate, dep, &chosen, chosen_via) {
                    chosen = candidate;
                    chosen_via = dep;
                }
            }
            best.insert(id.as_str(), chosen);
        }

        let Some(end) = order
            .iter()
            .map(String::as_str)
            .reduce(|a, b| if better(&best[b], b, &best[a], a) { b } else { a })
        else {
            return Ok(CriticalPath {
                tasks: Vec::new(),
                metric,
                length: 0.0,
            });
        };

        let length = best[end].length;
        let mut tasks = vec![end.to_string()];
        let mut cursor = best[end].prev;
        while let Some(id) = cursor {
            tasks.push(id.to_string());
            cursor = best[id].prev;
        }
        tasks.reverse();

        Ok(CriticalPath { tasks, metric, length })
    }
}
