// Copyright Amazon.com, Inc. or its affiliates. All Rights Reserved.
// SPDX-License-Identifier: Apache-2.0

//! Dependency graph of a page load.
//!
//! Nodes are either network requests or main-thread CPU tasks. The graph is
//! arena-backed: callers hold [`NodeId`]s, the scheduler borrows the graph
//! and keys its bookkeeping by id. Two distinct nodes may describe the same
//! URL; identity is the id, not the content.

use std::collections::VecDeque;

/// Identifies a node within its [`PageGraph`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct NodeId(usize);

/// Identifies a reusable transport.
///
/// Requests with the same id take turns on one connection and find it warm
/// after the first completed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<u64> for ConnectionId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// URL scheme of a request, reduced to what the transport cares about.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Https,
}

impl Scheme {
    /// Whether the transport performs a TLS handshake
    pub fn is_secure(self) -> bool {
        matches!(self, Self::Https)
    }
}

/// The captured request backing a network node.
#[derive(Clone, Debug)]
pub struct NetworkRecord {
    /// Transport the request was observed on
    pub connection_id: ConnectionId,
    /// Wire size of the response including headers, in bytes
    pub transfer_size: u64,
    /// Scheme of the request URL
    pub scheme: Scheme,
    /// Measured server response time (`receiveHeadersEnd - sendEnd`), when
    /// the capture recorded one
    pub response_time_ms: Option<f64>,
}

/// The captured main-thread task backing a CPU node.
#[derive(Clone, Copy, Debug)]
pub struct CpuTask {
    /// Recorded task duration in milliseconds
    pub duration_ms: f64,
}

/// Kind of work a node represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeKind {
    Network,
    Cpu,
}

/// A vertex of the dependency graph.
#[derive(Clone, Debug)]
pub enum Node {
    Network(NetworkRecord),
    Cpu(CpuTask),
}

impl Node {
    pub fn kind(&self) -> NodeKind {
        match self {
            Self::Network(_) => NodeKind::Network,
            Self::Cpu(_) => NodeKind::Cpu,
        }
    }
}

#[derive(Clone, Debug)]
struct Vertex {
    node: Node,
    dependencies: Vec<NodeId>,
    dependents: Vec<NodeId>,
}

impl Vertex {
    fn new(node: Node) -> Self {
        Self {
            node,
            dependencies: Vec::new(),
            dependents: Vec::new(),
        }
    }
}

/// Dependency graph rooted at the document request.
#[derive(Clone, Debug)]
pub struct PageGraph {
    vertices: Vec<Vertex>,
}

impl PageGraph {
    /// Creates a graph containing only the root node.
    pub fn new(root: Node) -> Self {
        Self {
            vertices: vec![Vertex::new(root)],
        }
    }

    /// The node the load starts from.
    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    /// Adds a node with no edges and returns its id.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let id = NodeId(self.vertices.len());
        self.vertices.push(Vertex::new(node));
        id
    }

    /// Records that `to` cannot start until `from` has completed.
    pub fn add_dependency(&mut self, from: NodeId, to: NodeId) {
        debug_assert_ne!(from, to, "a node cannot depend on itself");
        self.vertices[from.0].dependents.push(to);
        self.vertices[to.0].dependencies.push(from);
    }

    pub fn node(&self, id: NodeId) -> &Node {
        &self.vertices[id.0].node
    }

    /// The record backing `id`, when it is a network node.
    pub fn network_record(&self, id: NodeId) -> Option<&NetworkRecord> {
        match self.node(id) {
            Node::Network(record) => Some(record),
            Node::Cpu(_) => None,
        }
    }

    /// Nodes that must complete before `id` may start.
    pub fn dependencies(&self, id: NodeId) -> &[NodeId] {
        &self.vertices[id.0].dependencies
    }

    /// Nodes waiting on `id`.
    pub fn dependents(&self, id: NodeId) -> &[NodeId] {
        &self.vertices[id.0].dependents
    }

    /// Number of nodes in the graph, reachable or not.
    pub fn node_count(&self) -> usize {
        self.vertices.len()
    }

    /// Visits every node reachable from the root exactly once, breadth
    /// first, in insertion order within each layer.
    pub fn traverse<'graph>(&'graph self, mut visitor: impl FnMut(NodeId, &'graph Node)) {
        let mut visited = vec![false; self.vertices.len()];
        let mut queue = VecDeque::new();

        visited[self.root().0] = true;
        queue.push_back(self.root());

        while let Some(id) = queue.pop_front() {
            visitor(id, &self.vertices[id.0].node);

            for &dependent in &self.vertices[id.0].dependents {
                if !visited[dependent.0] {
                    visited[dependent.0] = true;
                    queue.push_back(dependent);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(connection: u64, transfer_size: u64) -> Node {
        Node::Network(NetworkRecord {
            connection_id: connection.into(),
            transfer_size,
            scheme: Scheme::Https,
            response_time_ms: None,
        })
    }

    #[test]
    fn edges_are_mirrored() {
        let mut graph = PageGraph::new(network(1, 1_000));
        let script = graph.add_node(network(2, 5_000));
        let image = graph.add_node(network(3, 20_000));
        graph.add_dependency(graph.root(), script);
        graph.add_dependency(script, image);

        assert_eq!(graph.dependents(graph.root()), [script]);
        assert_eq!(graph.dependencies(script), [graph.root()]);
        assert_eq!(graph.dependents(script), [image]);
        assert_eq!(graph.dependencies(image), [script]);
        assert_eq!(graph.node_count(), 3);
    }

    #[test]
    fn traverse_is_breadth_first_in_insertion_order() {
        let mut graph = PageGraph::new(network(1, 1_000));
        let a = graph.add_node(network(2, 1));
        let b = graph.add_node(network(3, 1));
        let c = graph.add_node(network(4, 1));
        graph.add_dependency(graph.root(), a);
        graph.add_dependency(graph.root(), b);
        graph.add_dependency(a, c);
        graph.add_dependency(b, c);

        let mut order = Vec::new();
        graph.traverse(|id, _| order.push(id));

        assert_eq!(order, [graph.root(), a, b, c]);
    }

    #[test]
    fn traverse_skips_unreachable_nodes_and_tolerates_cycles() {
        let mut graph = PageGraph::new(network(1, 1_000));
        let a = graph.add_node(network(2, 1));
        let b = graph.add_node(network(3, 1));
        let orphan = graph.add_node(network(4, 1));
        graph.add_dependency(graph.root(), a);
        graph.add_dependency(a, b);
        // back edge
        graph.add_dependency(b, a);

        let mut order = Vec::new();
        graph.traverse(|id, _| order.push(id));

        assert_eq!(order, [graph.root(), a, b]);
        assert!(!order.contains(&orphan));
    }

    #[test]
    fn network_record_is_kind_gated() {
        let mut graph = PageGraph::new(network(1, 1_000));
        let task = graph.add_node(Node::Cpu(CpuTask { duration_ms: 8.0 }));

        assert!(graph.network_record(graph.root()).is_some());
        assert!(graph.network_record(task).is_none());
        assert_eq!(graph.node(task).kind(), NodeKind::Cpu);
    }
}
