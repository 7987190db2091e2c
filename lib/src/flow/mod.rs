//! # Network Flow Module
//!
//! Max-flow and min-cost max-flow solvers used to assign filaments to
//! nozzles (or any left/right assignment with capacities).
//!
//! ## Network Layout
//!
//! Every bipartite instance is turned into the same layered network:
//!
//! ```text
//! source ──cap(u)──▶ left u ──1──▶ right v ──cap(v)──▶ sink
//!                                         └──cap(v)──▶ group g ──cap(g)──▶ sink
//! ```
//!
//! Right nodes that belong to a capacity group are routed through a
//! synthetic group node whose edge to the sink carries the combined
//! capacity of the group. Allow/deny lists prune the left → right edges.
//!
//! A network is built fresh for every `solve` call and dropped afterwards.

mod max_flow;
mod min_cost;
mod network;

use std::collections::{BTreeSet, HashMap};

use thiserror::Error;

pub use max_flow::MaxBipartiteMatcher;
pub use min_cost::MinCostBipartiteMatcher;
pub use network::{EdgeId, FlowEdge, FlowNetwork, NodeId};

/// Matching construction errors.
///
/// These are contract violations by the caller; nothing is solved when one
/// is reported.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchingError {
    /// Left capacity array does not have one entry per left node.
    #[error("left capacity list has {actual} entries, expected {expected}")]
    LeftCapacityMismatch { expected: usize, actual: usize },

    /// Right capacity array does not have one entry per right node.
    #[error("right capacity list has {actual} entries, expected {expected}")]
    RightCapacityMismatch { expected: usize, actual: usize },

    /// An allow/deny list was registered for a left node that does not exist.
    #[error("link limits reference left node {0}, which does not exist")]
    UnknownLeftNode(usize),

    /// An allow/deny list names a right node that does not exist.
    #[error("left node {left} is limited to right node {right}, which does not exist")]
    UnknownRightNode { left: usize, right: usize },

    /// A capacity group names a right node that does not exist.
    #[error("capacity group {group} contains right node {right}, which does not exist")]
    UnknownGroupMember { group: usize, right: usize },

    /// Cost matrix shape differs from the left/right node counts.
    #[error("cost matrix is {rows}x{cols}, expected {expected_rows}x{expected_cols}")]
    CostMatrixShape {
        rows: usize,
        cols: usize,
        expected_rows: usize,
        expected_cols: usize,
    },
}

/// Result type for matching construction.
pub type MatchingResult<T> = Result<T, MatchingError>;

/// A subset of right nodes sharing one combined capacity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupCapacity {
    pub members: BTreeSet<usize>,
    pub capacity: u32,
}

impl GroupCapacity {
    pub fn new(members: impl IntoIterator<Item = usize>, capacity: u32) -> Self {
        Self {
            members: members.into_iter().collect(),
            capacity,
        }
    }
}

/// Description of a bipartite assignment instance.
///
/// Left and right nodes are identified by their position (`0..left_count`,
/// `0..right_count`); callers keep their own labels alongside.
#[derive(Debug, Clone, Default)]
pub struct MatchingProblem {
    left_count: usize,
    right_count: usize,
    left_capacity: Vec<u32>,
    right_capacity: Vec<u32>,
    allow: HashMap<usize, Vec<usize>>,
    deny: HashMap<usize, Vec<usize>>,
    groups: Vec<GroupCapacity>,
}

impl MatchingProblem {
    /// Unit-capacity problem with no link limits.
    pub fn new(left_count: usize, right_count: usize) -> Self {
        Self {
            left_count,
            right_count,
            ..Default::default()
        }
    }

    /// Per-left capacities. An empty list means capacity 1 everywhere.
    pub fn with_left_capacity(mut self, capacity: Vec<u32>) -> Self {
        self.left_capacity = capacity;
        self
    }

    /// Per-right capacities. An empty list means capacity 1 everywhere.
    pub fn with_right_capacity(mut self, capacity: Vec<u32>) -> Self {
        self.right_capacity = capacity;
        self
    }

    /// Restrict `left` to exactly the listed right nodes.
    ///
    /// Takes precedence over any deny list registered for the same node.
    pub fn allow(mut self, left: usize, rights: Vec<usize>) -> Self {
        self.allow.insert(left, rights);
        self
    }

    /// Forbid `left` from linking to the listed right nodes.
    pub fn deny(mut self, left: usize, rights: Vec<usize>) -> Self {
        self.deny.insert(left, rights);
        self
    }

    /// Add a shared capacity over a subset of right nodes.
    ///
    /// A right node listed by several groups is routed through the last one.
    pub fn with_group(mut self, group: GroupCapacity) -> Self {
        self.groups.push(group);
        self
    }

    pub fn left_count(&self) -> usize {
        self.left_count
    }

    pub fn right_count(&self) -> usize {
        self.right_count
    }

    pub fn groups(&self) -> &[GroupCapacity] {
        &self.groups
    }

    /// Capacity of left node `u`.
    pub fn left_capacity(&self, u: usize) -> u32 {
        self.left_capacity.get(u).copied().unwrap_or(1)
    }

    /// Capacity of right node `v`.
    pub fn right_capacity(&self, v: usize) -> u32 {
        self.right_capacity.get(v).copied().unwrap_or(1)
    }

    /// Check every index and array size against the node counts.
    pub fn validate(&self) -> MatchingResult<()> {
        if !self.left_capacity.is_empty() && self.left_capacity.len() != self.left_count {
            return Err(MatchingError::LeftCapacityMismatch {
                expected: self.left_count,
                actual: self.left_capacity.len(),
            });
        }
        if !self.right_capacity.is_empty() && self.right_capacity.len() != self.right_count {
            return Err(MatchingError::RightCapacityMismatch {
                expected: self.right_count,
                actual: self.right_capacity.len(),
            });
        }
        for limits in [&self.allow, &self.deny] {
            for (&left, rights) in limits {
                if left >= self.left_count {
                    return Err(MatchingError::UnknownLeftNode(left));
                }
                if let Some(&right) = rights.iter().find(|&&r| r >= self.right_count) {
                    return Err(MatchingError::UnknownRightNode { left, right });
                }
            }
        }
        for (group, g) in self.groups.iter().enumerate() {
            if let Some(&right) = g.members.iter().find(|&&r| r >= self.right_count) {
                return Err(MatchingError::UnknownGroupMember { group, right });
            }
        }
        Ok(())
    }

    /// Right nodes `left` may link to, in ascending order unless an
    /// allow-list dictates its own order.
    fn candidates(&self, left: usize) -> Vec<usize> {
        if let Some(allowed) = self.allow.get(&left) {
            return allowed.clone();
        }
        let denied = self.deny.get(&left);
        (0..self.right_count)
            .filter(|r| denied.map_or(true, |d| !d.contains(r)))
            .collect()
    }
}

/// Outcome of a matching: the right nodes assigned to every left node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BipartiteMatching {
    assignments: Vec<Vec<usize>>,
    total_cost: f64,
}

impl BipartiteMatching {
    /// Right nodes assigned to `left`, in edge-insertion order.
    pub fn assigned(&self, left: usize) -> &[usize] {
        &self.assignments[left]
    }

    /// First right node assigned to `left`, if any.
    pub fn first(&self, left: usize) -> Option<usize> {
        self.assignments[left].first().copied()
    }

    /// One entry per left node; `None` when unmatched.
    pub fn as_single(&self) -> Vec<Option<usize>> {
        self.assignments.iter().map(|a| a.first().copied()).collect()
    }

    /// Total number of left → right pairs carrying flow.
    pub fn matched_count(&self) -> usize {
        self.assignments.iter().map(Vec::len).sum()
    }

    pub fn left_count(&self) -> usize {
        self.assignments.len()
    }

    /// Sum of pair costs (0 for the uncosted matcher).
    pub fn total_cost(&self) -> f64 {
        self.total_cost
    }
}

/// A [`MatchingProblem`] laid out as a flow network.
#[derive(Debug, Clone)]
pub(crate) struct BipartiteNetwork {
    pub(crate) network: FlowNetwork,
    pub(crate) source: NodeId,
    pub(crate) sink: NodeId,
    /// Left → right edges per left node, paired with the right index.
    links: Vec<Vec<(EdgeId, usize)>>,
}

impl BipartiteNetwork {
    /// Build the layered network; `cost(u, v)` prices the left → right edges.
    pub(crate) fn build(problem: &MatchingProblem, cost: impl Fn(usize, usize) -> f64) -> Self {
        let left = problem.left_count;
        let right = problem.right_count;
        let groups = problem.groups.len();

        let mut network = FlowNetwork::new(left + right + groups + 2);
        let source = network.node(left + right + groups);
        let sink = network.node(left + right + groups + 1);

        let mut right_target = vec![sink; right];
        for (gid, group) in problem.groups.iter().enumerate() {
            for &member in &group.members {
                right_target[member] = network.node(left + right + gid);
            }
        }

        for u in 0..left {
            let node = network.node(u);
            network.add_edge(source, node, problem.left_capacity(u) as i64);
        }
        for (v, &target) in right_target.iter().enumerate() {
            let node = network.node(left + v);
            network.add_edge(node, target, problem.right_capacity(v) as i64);
        }
        for (gid, group) in problem.groups.iter().enumerate() {
            let node = network.node(left + right + gid);
            network.add_edge(node, sink, group.capacity as i64);
        }

        let mut links = Vec::with_capacity(left);
        for u in 0..left {
            let from = network.node(u);
            let edges = problem
                .candidates(u)
                .into_iter()
                .map(|v| {
                    let to = network.node(left + v);
                    (network.add_costed_edge(from, to, 1, cost(u, v)), v)
                })
                .collect();
            links.push(edges);
        }

        Self {
            network,
            source,
            sink,
            links,
        }
    }

    /// Read the assignment off the flow-carrying left → right edges.
    pub(crate) fn matching(&self) -> BipartiteMatching {
        let mut total_cost = 0.0;
        let assignments = self
            .links
            .iter()
            .map(|edges| {
                edges
                    .iter()
                    .filter(|(e, _)| self.network.edge(*e).flow() > 0)
                    .map(|&(e, v)| {
                        total_cost += self.network.edge(e).cost();
                        v
                    })
                    .collect()
            })
            .collect();

        BipartiteMatching {
            assignments,
            total_cost,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_capacity_sizes() {
        let p = MatchingProblem::new(2, 3).with_left_capacity(vec![1, 1, 1]);
        assert_eq!(
            p.validate(),
            Err(MatchingError::LeftCapacityMismatch { expected: 2, actual: 3 })
        );

        let p = MatchingProblem::new(2, 3).with_right_capacity(vec![2]);
        assert_eq!(
            p.validate(),
            Err(MatchingError::RightCapacityMismatch { expected: 3, actual: 1 })
        );

        let p = MatchingProblem::new(2, 3)
            .with_left_capacity(vec![2, 1])
            .with_right_capacity(vec![1, 1, 1]);
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_validate_link_limits() {
        let p = MatchingProblem::new(2, 2).allow(0, vec![0, 2]);
        assert_eq!(p.validate(), Err(MatchingError::UnknownRightNode { left: 0, right: 2 }));

        let p = MatchingProblem::new(2, 2).deny(5, vec![0]);
        assert_eq!(p.validate(), Err(MatchingError::UnknownLeftNode(5)));

        let p = MatchingProblem::new(1, 2).with_group(GroupCapacity::new([1, 4], 1));
        assert_eq!(
            p.validate(),
            Err(MatchingError::UnknownGroupMember { group: 0, right: 4 })
        );
    }

    #[test]
    fn test_allow_list_wins_over_deny_list() {
        let p = MatchingProblem::new(1, 3).deny(0, vec![1]).allow(0, vec![1]);
        assert_eq!(p.candidates(0), vec![1]);

        let p = MatchingProblem::new(1, 3).deny(0, vec![1]);
        assert_eq!(p.candidates(0), vec![0, 2]);
    }

    #[test]
    fn test_network_layout_with_group_node() {
        let p = MatchingProblem::new(2, 2).with_group(GroupCapacity::new([0, 1], 1));
        let net = BipartiteNetwork::build(&p, |_, _| 0.0);

        // 2 left + 2 right + 1 group + source + sink
        assert_eq!(net.network.node_count(), 7);
        // (2 source + 2 right + 1 group + 4 links) edges, each paired
        assert_eq!(net.network.edge_count(), 18);
        // Both right nodes drain into the group node, not the sink.
        let group = net.network.node(4);
        for v in 2..4 {
            let out = net.network.outgoing(net.network.node(v));
            assert!(out
                .iter()
                .any(|&e| net.network.edge(e).to() == group && net.network.edge(e).capacity() == 1));
        }
    }
}
