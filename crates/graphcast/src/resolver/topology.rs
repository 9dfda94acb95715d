use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap, HashSet, VecDeque};

use crate::graph::{Graph, NodeId};

/// Distinct successors of `node` in id order.
fn successors(graph: &Graph, node: NodeId) -> Vec<NodeId> {
    let Ok(current) = graph.node(node) else {
        return Vec::new();
    };
    let mut next: Vec<NodeId> = current
        .outputs
        .iter()
        .flat_map(|value| graph.uses_of(*value).iter().map(|u| u.node))
        .collect();
    next.sort();
    next.dedup();
    next
}

/// Kahn's algorithm with a min-heap on node ids, so ready nodes leave in insertion order.
///
/// On failure returns the nodes that never became ready, in id order.
pub(crate) fn sort(graph: &Graph) -> Result<Vec<NodeId>, Vec<NodeId>> {
    let mut indegree: HashMap<NodeId, usize> = HashMap::new();
    for node in graph.nodes() {
        let produced = node
            .inputs
            .iter()
            .filter(|value| graph.producer_of(**value).is_some())
            .count();
        indegree.insert(node.id, produced);
    }

    let mut ready: BinaryHeap<Reverse<NodeId>> = indegree
        .iter()
        .filter(|(_, degree)| **degree == 0)
        .map(|(id, _)| Reverse(*id))
        .collect();

    let mut order = Vec::with_capacity(indegree.len());
    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        let Ok(current) = graph.node(node) else {
            continue;
        };
        for value in &current.outputs {
            for use_ in graph.uses_of(*value) {
                if let Some(degree) = indegree.get_mut(&use_.node) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push(Reverse(use_.node));
                    }
                }
            }
        }
    }

    if order.len() == indegree.len() {
        return Ok(order);
    }
    let placed: HashSet<NodeId> = order.into_iter().collect();
    let mut remaining: Vec<NodeId> = indegree
        .into_keys()
        .filter(|id| !placed.contains(id))
        .collect();
    remaining.sort();
    Err(remaining)
}

/// Shortest cycle among `remaining`, starting at its lowest id on ties.
pub(crate) fn minimal_cycle(graph: &Graph, remaining: &[NodeId]) -> Vec<NodeId> {
    let members: HashSet<NodeId> = remaining.iter().copied().collect();
    let mut best: Option<Vec<NodeId>> = None;

    for &start in remaining {
        let mut parent: HashMap<NodeId, NodeId> = HashMap::new();
        let mut queue = VecDeque::from([start]);
        let mut visited = HashSet::from([start]);
        let mut closing = None;

        'bfs: while let Some(node) = queue.pop_front() {
            for next in successors(graph, node) {
                if !members.contains(&next) {
                    continue;
                }
                if next == start {
                    closing = Some(node);
                    break 'bfs;
                }
                if visited.insert(next) {
                    parent.insert(next, node);
                    queue.push_back(next);
                }
            }
        }

        let Some(last) = closing else {
            continue;
        };
        let mut cycle = vec![last];
        let mut cursor = last;
        while cursor != start {
            cursor = parent[&cursor];
            cycle.push(cursor);
        }
        cycle.reverse();
        if best.as_ref().map_or(true, |b| cycle.len() < b.len()) {
            best = Some(cycle);
        }
    }

    best.unwrap_or_else(|| remaining.to_vec())
}
