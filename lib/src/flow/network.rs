//! Residual flow network with explicitly paired reverse edges.
//!
//! Edges live in a single arena and are addressed through [`EdgeId`] handles.
//! Every forward edge is created together with a reverse edge (capacity 0,
//! negated cost) and each of the two stores the id of the other, so pushing
//! flow along a path never relies on insertion-order parity tricks.

use std::fmt;

/// Opaque handle to a node of a [`FlowNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

impl NodeId {
    /// Position of the node in the network's node table.
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Opaque handle to an edge of a [`FlowNetwork`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EdgeId(usize);

impl EdgeId {
    /// Position of the edge in the network's edge arena.
    pub fn index(self) -> usize {
        self.0
    }
}

/// A directed edge carrying flow.
#[derive(Debug, Clone)]
pub struct FlowEdge {
    from: NodeId,
    to: NodeId,
    capacity: i64,
    flow: i64,
    cost: f64,
    reverse: EdgeId,
}

impl FlowEdge {
    pub fn from(&self) -> NodeId {
        self.from
    }

    pub fn to(&self) -> NodeId {
        self.to
    }

    pub fn capacity(&self) -> i64 {
        self.capacity
    }

    pub fn flow(&self) -> i64 {
        self.flow
    }

    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// The paired edge running in the opposite direction.
    pub fn reverse(&self) -> EdgeId {
        self.reverse
    }

    /// Remaining capacity before the edge saturates.
    pub fn residual(&self) -> i64 {
        self.capacity - self.flow
    }
}

/// Directed graph with capacities, flows and optional per-edge costs.
#[derive(Debug, Clone, Default)]
pub struct FlowNetwork {
    edges: Vec<FlowEdge>,
    adjacency: Vec<Vec<EdgeId>>,
}

impl FlowNetwork {
    /// Create a network with `node_count` isolated nodes.
    pub fn new(node_count: usize) -> Self {
        Self {
            edges: Vec::new(),
            adjacency: vec![Vec::new(); node_count],
        }
    }

    /// Append a node and return its handle.
    pub fn add_node(&mut self) -> NodeId {
        self.adjacency.push(Vec::new());
        NodeId(self.adjacency.len() - 1)
    }

    /// Handle of the node at `index`.
    ///
    /// # Panics
    ///
    /// Panics if `index` is not a node of this network.
    pub fn node(&self, index: usize) -> NodeId {
        assert!(index < self.adjacency.len(), "node {index} out of range");
        NodeId(index)
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Number of edges in the arena, reverse edges included.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Add an uncosted edge and its reverse; returns the forward edge.
    pub fn add_edge(&mut self, from: NodeId, to: NodeId, capacity: i64) -> EdgeId {
        self.add_costed_edge(from, to, capacity, 0.0)
    }

    /// Add a costed edge and its reverse (capacity 0, cost negated).
    pub fn add_costed_edge(&mut self, from: NodeId, to: NodeId, capacity: i64, cost: f64) -> EdgeId {
        let forward = EdgeId(self.edges.len());
        let backward = EdgeId(self.edges.len() + 1);

        self.edges.push(FlowEdge {
            from,
            to,
            capacity,
            flow: 0,
            cost,
            reverse: backward,
        });
        self.edges.push(FlowEdge {
            from: to,
            to: from,
            capacity: 0,
            flow: 0,
            cost: -cost,
            reverse: forward,
        });

        self.adjacency[from.0].push(forward);
        self.adjacency[to.0].push(backward);
        forward
    }

    pub fn edge(&self, id: EdgeId) -> &FlowEdge {
        &self.edges[id.0]
    }

    /// Edges leaving `node` (reverse edges included), in insertion order.
    pub fn outgoing(&self, node: NodeId) -> &[EdgeId] {
        &self.adjacency[node.0]
    }

    /// Push `amount` units along `id`, cancelling the same amount on its reverse.
    pub fn push(&mut self, id: EdgeId, amount: i64) {
        let reverse = self.edges[id.0].reverse;
        self.edges[id.0].flow += amount;
        self.edges[reverse.0].flow -= amount;
    }

    /// Push `amount` along a path given sink-first as predecessor edges.
    pub(crate) fn push_path(&mut self, source: NodeId, sink: NodeId, via: &[Option<EdgeId>], amount: i64) {
        let mut at = sink;
        while at != source {
            let Some(edge) = via[at.0] else {
                break;
            };
            self.push(edge, amount);
            at = self.edges[edge.0].from;
        }
    }

    /// Net flow leaving `node` through forward edges.
    pub fn outflow(&self, node: NodeId) -> i64 {
        self.adjacency[node.0]
            .iter()
            .map(|&e| &self.edges[e.0])
            .filter(|e| e.capacity > 0)
            .map(|e| e.flow)
            .sum()
    }

    /// Sum of `flow * cost` over forward edges.
    pub fn total_cost(&self) -> f64 {
        self.edges
            .iter()
            .filter(|e| e.capacity > 0 && e.flow > 0)
            .map(|e| e.flow as f64 * e.cost)
            .sum()
    }
}
