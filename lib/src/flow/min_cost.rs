//! Min-cost bipartite matching via successive shortest augmenting paths.
//!
//! Shortest paths are found with a label-correcting queue (SPFA). Residual
//! reverse edges carry negated costs, so a Dijkstra pass without potentials
//! would be unsound here.

use std::collections::VecDeque;

use tracing::trace;

use super::{
    BipartiteMatching, BipartiteNetwork, EdgeId, MatchingError, MatchingProblem, MatchingResult,
};

/// Relaxations must improve a label by more than this to count.
const COST_EPSILON: f64 = 1e-9;

/// Maximum-cardinality assignment of minimum total cost.
///
/// `costs[u][v]` prices linking left node `u` to right node `v`. Among
/// equal-cost augmenting paths the one discovered first in edge-insertion
/// order wins, so results are deterministic.
#[derive(Debug, Clone)]
pub struct MinCostBipartiteMatcher {
    problem: MatchingProblem,
    costs: Vec<Vec<f64>>,
}

impl MinCostBipartiteMatcher {
    /// Validate `problem` and the shape of `costs`.
    pub fn new(problem: MatchingProblem, costs: Vec<Vec<f64>>) -> MatchingResult<Self> {
        problem.validate()?;

        let rows = costs.len();
        let bad_row = costs.iter().find(|row| row.len() != problem.right_count());
        if rows != problem.left_count() || bad_row.is_some() {
            return Err(MatchingError::CostMatrixShape {
                rows,
                cols: bad_row.or(costs.first()).map_or(0, Vec::len),
                expected_rows: problem.left_count(),
                expected_cols: problem.right_count(),
            });
        }

        Ok(Self { problem, costs })
    }

    pub fn problem(&self) -> &MatchingProblem {
        &self.problem
    }

    pub fn solve(&self) -> BipartiteMatching {
        let mut graph = BipartiteNetwork::build(&self.problem, |u, v| self.costs[u][v]);
        let node_count = graph.network.node_count();
        let source = graph.source.index();
        let sink = graph.sink.index();
        let mut augmentations = 0usize;

        loop {
            let mut dist = vec![f64::INFINITY; node_count];
            let mut bottleneck = vec![0i64; node_count];
            let mut via: Vec<Option<EdgeId>> = vec![None; node_count];
            let mut in_queue = vec![false; node_count];
            let mut queue = VecDeque::new();

            dist[source] = 0.0;
            bottleneck[source] = i64::MAX;
            in_queue[source] = true;
            queue.push_back(graph.source);

            while let Some(at) = queue.pop_front() {
                in_queue[at.index()] = false;
                for &edge_id in graph.network.outgoing(at) {
                    let edge = graph.network.edge(edge_id);
                    let to = edge.to().index();
                    let candidate = dist[at.index()] + edge.cost();
                    if edge.residual() > 0 && candidate < dist[to] - COST_EPSILON {
                        dist[to] = candidate;
                        via[to] = Some(edge_id);
                        bottleneck[to] = bottleneck[at.index()].min(edge.residual());
                        if !in_queue[to] {
                            in_queue[to] = true;
                            queue.push_back(edge.to());
                        }
                    }
                }
            }

            if dist[sink].is_infinite() {
                break;
            }
            graph
                .network
                .push_path(graph.source, graph.sink, &via, bottleneck[sink]);
            augmentations += 1;
        }

        let matching = graph.matching();
        trace!(
            augmentations,
            cost = matching.total_cost(),
            "min-cost matching finished"
        );
        matching
    }
}
