//! Execution order for a workflow graph
//!
//! Kahn's algorithm over a petgraph `DiGraph`, tuned for determinism rather
//! than strictness:
//! - the FIFO is seeded with zero in-degree nodes in input order,
//! - successors are released in edge input order,
//! - a graph with no zero in-degree node starts from the first input node,
//! - nodes never released (cycle members) are appended in input order.
//!
//! Every input node appears exactly once in the output. Every edge between
//! known nodes constrains order, whatever its kind; edges that name an
//! unknown node are ignored. Within a cycle the edge order is not guaranteed
//! to hold.

use crate::workflow::types::{Edge, Node};
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;
use std::collections::{HashMap, VecDeque};

/// Linear execution order for `nodes` constrained by `edges`
pub fn build_execution_order<'a>(nodes: &'a [Node], edges: &[Edge]) -> Vec<&'a Node> {
    if nodes.is_empty() {
        return Vec::new();
    }

    // One vertex per input position; the weight is that position
    let mut graph: DiGraph<usize, ()> = DiGraph::with_capacity(nodes.len(), edges.len());
    let mut node_id_to_index: HashMap<&str, NodeIndex> = HashMap::with_capacity(nodes.len());
    for (position, node) in nodes.iter().enumerate() {
        let index = graph.add_node(position);
        node_id_to_index.entry(node.id.as_str()).or_insert(index);
    }

    let mut ignored = 0usize;
    for edge in edges {
        match (
            node_id_to_index.get(edge.from.as_str()),
            node_id_to_index.get(edge.to.as_str()),
        ) {
            (Some(&from), Some(&to)) => {
                graph.add_edge(from, to, ());
            }
            _ => ignored += 1,
        }
    }
    if ignored > 0 {
        tracing::debug!("Ignored {} edges referencing unknown nodes", ignored);
    }

    let mut in_degree: Vec<usize> = graph
        .node_indices()
        .map(|index| graph.neighbors_directed(index, Direction::Incoming).count())
        .collect();

    let mut queue: VecDeque<NodeIndex> = graph
        .node_indices()
        .filter(|index| in_degree[index.index()] == 0)
        .collect();
    if queue.is_empty() {
        tracing::warn!("⚠️ No node without predecessors; starting from the first node");
        queue.push_back(NodeIndex::new(0));
    }

    let mut placed = vec![false; nodes.len()];
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(index) = queue.pop_front() {
        if placed[index.index()] {
            continue;
        }
        placed[index.index()] = true;
        order.push(&nodes[graph[index]]);

        // petgraph walks outgoing edges newest first
        let mut successors: Vec<NodeIndex> = graph.neighbors(index).collect();
        successors.reverse();
        for successor in successors {
            let degree = &mut in_degree[successor.index()];
            *degree = degree.saturating_sub(1);
            if *degree == 0 && !placed[successor.index()] {
                queue.push_back(successor);
            }
        }
    }

    if order.len() < nodes.len() {
        tracing::warn!(
            "⚠️ Cycle detected; appending {} remaining nodes in input order",
            nodes.len() - order.len()
        );
        for (position, node) in nodes.iter().enumerate() {
            if !placed[position] {
                order.push(node);
            }
        }
    }

    tracing::debug!(
        "📋 Execution order: {:?}",
        order.iter().map(|node| node.id.as_str()).collect::<Vec<_>>()
    );
    order
}
