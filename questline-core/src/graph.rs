//! In-memory view of a blueprint's node/link graph.
//!
//! Built either from a submitted [`GraphPayload`] (for validation) or from
//! stored rows (for group derivation). Both paths share one adjacency
//! representation so the rules are checked against the same shape that is
//! later aggregated.

use std::collections::{HashMap, HashSet};

use petgraph::Direction;
use petgraph::graph::{DiGraph, NodeIndex};

use crate::error::ValidationError;
use crate::types::{GraphPayload, NodeId, QuestLink, QuestNode};

#[derive(Debug, Clone, Default)]
pub struct QuestGraph {
    pub graph: DiGraph<NodeId, ()>,
    pub node_to_index: HashMap<NodeId, NodeIndex>,
    groups: HashSet<NodeId>,
}

impl QuestGraph {
    /// Build from `(id, is_group)` pairs and `(parent, child)` pairs.
    /// Links whose endpoints are unknown are skipped.
    pub fn new<'a>(
        nodes: impl IntoIterator<Item = (&'a NodeId, bool)>,
        links: impl IntoIterator<Item = (&'a NodeId, &'a NodeId)>,
    ) -> Self {
        let mut graph = DiGraph::<NodeId, ()>::new();
        let mut node_to_index = HashMap::new();
        let mut groups = HashSet::new();

        for (id, is_group) in nodes {
            node_to_index
                .entry(id.clone())
                .or_insert_with(|| graph.add_node(id.clone()));
            if is_group {
                groups.insert(id.clone());
            }
        }

        for (parent, child) in links {
            if let (Some(&src), Some(&tgt)) = (node_to_index.get(parent), node_to_index.get(child))
            {
                graph.add_edge(src, tgt, ());
            }
        }

        Self {
            graph,
            node_to_index,
            groups,
        }
    }

    pub fn from_stored(nodes: &[QuestNode], links: &[QuestLink]) -> Self {
        Self::new(
            nodes.iter().map(|n| (&n.id, n.is_group())),
            links.iter().map(|l| (&l.parent_node_id, &l.child_node_id)),
        )
    }

    pub fn from_payload(payload: &GraphPayload) -> Self {
        Self::new(
            payload.nodes.iter().map(|n| (&n.id, n.is_group())),
            payload
                .links
                .iter()
                .map(|l| (&l.parent_node_id, &l.child_node_id)),
        )
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.node_to_index.contains_key(id)
    }

    pub fn is_group(&self, id: &NodeId) -> bool {
        self.groups.contains(id)
    }

    /// Group nodes in insertion order.
    pub fn group_nodes(&self) -> impl Iterator<Item = &NodeId> {
        self.graph
            .node_indices()
            .map(|idx| &self.graph[idx])
            .filter(|id| self.groups.contains(*id))
    }

    /// Immediate link-children of `id`; empty for unknown nodes.
    pub fn direct_children(&self, id: &NodeId) -> Vec<&NodeId> {
        self.node_to_index
            .get(id)
            .map(|&idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Outgoing)
                    .map(|child| &self.graph[child])
                    .collect()
            })
            .unwrap_or_default()
    }

    /// A node lying on some directed cycle, if the graph has one.
    pub fn find_cycle(&self) -> Option<NodeId> {
        petgraph::algo::toposort(&self.graph, None)
            .err()
            .map(|cycle| self.graph[cycle.node_id()].clone())
    }
}

/// Structural checks on a full-graph replacement, run before any write.
pub fn validate_payload(payload: &GraphPayload, reject_cycles: bool) -> Result<(), ValidationError> {
    let mut node_ids = HashSet::with_capacity(payload.nodes.len());
    let mut group_ids = HashSet::new();
    for node in &payload.nodes {
        if !node_ids.insert(&node.id) {
            return Err(ValidationError::DuplicateNode(node.id.clone()));
        }
        if node.is_group() {
            group_ids.insert(&node.id);
        }
    }

    let mut pairs = HashSet::with_capacity(payload.links.len());
    let mut link_ids = HashSet::with_capacity(payload.links.len());
    for link in &payload.links {
        let (parent, child) = (&link.parent_node_id, &link.child_node_id);
        if !node_ids.contains(parent) || !node_ids.contains(child) {
            return Err(ValidationError::UnknownLinkEndpoint {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        if parent == child {
            return Err(ValidationError::SelfLink(parent.clone()));
        }
        if !pairs.insert((parent, child)) {
            return Err(ValidationError::DuplicateLink {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
        // blank ids get a generated one on write
        if let Some(id) = link.id.as_ref().filter(|id| !id.as_str().trim().is_empty()) {
            if !link_ids.insert(id) {
                return Err(ValidationError::DuplicateLinkId(id.clone()));
            }
        }
        if group_ids.contains(parent) && group_ids.contains(child) {
            return Err(ValidationError::NestedGroup {
                parent: parent.clone(),
                child: child.clone(),
            });
        }
    }

    if reject_cycles {
        if let Some(node) = QuestGraph::from_payload(payload).find_cycle() {
            return Err(ValidationError::Cycle(node));
        }
    }

    Ok(())
}
