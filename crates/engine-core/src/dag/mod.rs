//! Dependency graph validation and ordering for a run's task set.
//!
//! Two distinct algorithms, each suited to its job: [`validate_dag`] uses a
//! depth-first search with a recursion-stack set to reject self-references
//! and cycles with a pinpoint error; [`topological_sort`] uses Kahn's
//! algorithm so that ties are broken by insertion order, giving scheduling a
//! stable, reproducible execution order.

use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::Result;
use sqlx::PgPool;
use uuid::Uuid;

use engine_db::models::TaskStatus;
use engine_db::queries::tasks as db;

/// A task node together with its declared dependencies, as seen by the
/// resolver. Order of `nodes` as passed in is the insertion order used to
/// break ties in [`topological_sort`].
#[derive(Debug, Clone)]
pub struct TaskNode {
    pub id: Uuid,
    pub depends_on: Vec<Uuid>,
}

/// Result of [`validate_dag`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DagValidation {
    pub valid: bool,
    pub error: Option<String>,
    /// The cycle found, as a sequence of task ids, when `valid` is `false`
    /// and the cause was a cycle (not a self-reference).
    pub cycle: Option<Vec<Uuid>>,
}

impl DagValidation {
    fn ok() -> Self {
        Self {
            valid: true,
            error: None,
            cycle: None,
        }
    }

    fn self_reference(id: Uuid) -> Self {
        Self {
            valid: false,
            error: Some(format!("task {id} depends on itself")),
            cycle: None,
        }
    }

    fn cyclic(cycle: Vec<Uuid>) -> Self {
        let rendered = cycle
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        Self {
            valid: false,
            error: Some(format!("dependency cycle detected: {rendered}")),
            cycle: Some(cycle),
        }
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    InProgress,
    Done,
}

/// Validate that `nodes` forms a DAG: no self-references, no cycles.
///
/// Uses depth-first search with a recursion-stack set. The first
/// self-reference or cycle encountered is reported; `nodes` earlier in the
/// slice are visited first, so the result is deterministic for a given
/// input order.
pub fn validate_dag(nodes: &[TaskNode]) -> DagValidation {
    let adjacency: HashMap<Uuid, &[Uuid]> = nodes
        .iter()
        .map(|n| (n.id, n.depends_on.as_slice()))
        .collect();

    for node in nodes {
        if node.depends_on.contains(&node.id) {
            return DagValidation::self_reference(node.id);
        }
    }

    let mut marks: HashMap<Uuid, Mark> = HashMap::new();
    let mut stack: Vec<Uuid> = Vec::new();

    for node in nodes {
        if marks.contains_key(&node.id) {
            continue;
        }
        if let Some(cycle) = visit(node.id, &adjacency, &mut marks, &mut stack) {
            return DagValidation::cyclic(cycle);
        }
    }

    DagValidation::ok()
}

fn visit(
    id: Uuid,
    adjacency: &HashMap<Uuid, &[Uuid]>,
    marks: &mut HashMap<Uuid, Mark>,
    stack: &mut Vec<Uuid>,
) -> Option<Vec<Uuid>> {
    if let Some(pos) = stack.iter().position(|&s| s == id) {
        let mut cycle = stack[pos..].to_vec();
        cycle.push(id);
        return Some(cycle);
    }
    if marks.get(&id) == Some(&Mark::Done) {
        return None;
    }

    stack.push(id);
    marks.insert(id, Mark::InProgress);

    if let Some(deps) = adjacency.get(&id) {
        for &dep in deps.iter() {
            if !adjacency.contains_key(&dep) {
                // Dependency outside this node set; not this resolver's concern.
                continue;
            }
            if let Some(cycle) = visit(dep, adjacency, marks, stack) {
                return Some(cycle);
            }
        }
    }

    stack.pop();
    marks.insert(id, Mark::Done);
    None
}

/// Compute a topological order over `nodes` using Kahn's algorithm.
///
/// Ties (multiple nodes with no remaining unresolved dependencies at the
/// same step) are broken by the order the nodes appear in `nodes`, so the
/// result is stable across runs for the same input.
///
/// Returns `None` if the graph contains a cycle (callers are expected to
/// have already run [`validate_dag`]).
pub fn topological_sort(nodes: &[TaskNode]) -> Option<Vec<Uuid>> {
    let order_index: HashMap<Uuid, usize> =
        nodes.iter().enumerate().map(|(i, n)| (n.id, i)).collect();

    let mut in_degree: HashMap<Uuid, usize> = nodes.iter().map(|n| (n.id, 0)).collect();
    let mut dependents: HashMap<Uuid, Vec<Uuid>> = nodes.iter().map(|n| (n.id, Vec::new())).collect();

    for node in nodes {
        for dep in &node.depends_on {
            if !in_degree.contains_key(dep) {
                continue;
            }
            *in_degree.get_mut(&node.id).unwrap() += 1;
            dependents.get_mut(dep).unwrap().push(node.id);
        }
    }

    let mut ready: Vec<Uuid> = in_degree
        .iter()
        .filter(|(_, &deg)| deg == 0)
        .map(|(&id, _)| id)
        .collect();
    ready.sort_by_key(|id| order_index[id]);
    let mut queue: VecDeque<Uuid> = ready.into();

    let mut result = Vec::with_capacity(nodes.len());
    let mut in_degree_remaining = in_degree;

    while let Some(id) = queue.pop_front() {
        result.push(id);

        let mut newly_ready: Vec<Uuid> = Vec::new();
        for &dependent in dependents.get(&id).into_iter().flatten() {
            let deg = in_degree_remaining.get_mut(&dependent).unwrap();
            *deg -= 1;
            if *deg == 0 {
                newly_ready.push(dependent);
            }
        }
        newly_ready.sort_by_key(|id| order_index[id]);

        // Re-merge into the queue, keeping overall insertion-order tie-break:
        // rebuild as a sorted vec since `newly_ready` may interleave with
        // items already queued from an earlier step.
        let mut combined: Vec<Uuid> = queue.into_iter().chain(newly_ready).collect();
        combined.sort_by_key(|id| order_index[id]);
        queue = combined.into();
    }

    if result.len() != nodes.len() {
        return None;
    }

    Some(result)
}

/// Check whether every id in `deps` belongs to `run_id` and is `DONE`.
///
/// Returns `false` (not an error) if a dependency id does not exist in the
/// run at all -- a missing dependency can never be met.
pub async fn are_met(pool: &PgPool, deps: &[Uuid], run_id: Uuid) -> Result<bool> {
    for &dep_id in deps {
        match db::get_task(pool, dep_id).await? {
            Some(task) if task.run_id == run_id && task.status == TaskStatus::Done => continue,
            _ => return Ok(false),
        }
    }
    Ok(true)
}
