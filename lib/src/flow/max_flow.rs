//! Uncosted bipartite matching via BFS augmenting paths (Edmonds–Karp).

use std::collections::VecDeque;

use tracing::trace;

use super::{BipartiteMatching, BipartiteNetwork, EdgeId, MatchingProblem, MatchingResult};

/// Maximum-cardinality assignment honoring capacities and link limits.
///
/// # Example
///
/// ```
/// use sequencer::flow::{MatchingProblem, MaxBipartiteMatcher};
///
/// // Two nozzles, three filaments; nozzle 0 may only take filament 2.
/// let problem = MatchingProblem::new(2, 3).allow(0, vec![2]);
/// let matching = MaxBipartiteMatcher::new(problem).unwrap().solve();
/// assert_eq!(matching.first(0), Some(2));
/// assert!(matching.first(1).is_some());
/// ```
#[derive(Debug, Clone)]
pub struct MaxBipartiteMatcher {
    problem: MatchingProblem,
}

impl MaxBipartiteMatcher {
    /// Validate `problem` and wrap it for solving.
    pub fn new(problem: MatchingProblem) -> MatchingResult<Self> {
        problem.validate()?;
        Ok(Self { problem })
    }

    pub fn problem(&self) -> &MatchingProblem {
        &self.problem
    }

    /// Run augmentations until the sink is unreachable.
    pub fn solve(&self) -> BipartiteMatching {
        let mut graph = BipartiteNetwork::build(&self.problem, |_, _| 0.0);
        let node_count = graph.network.node_count();
        let mut augmentations = 0usize;

        loop {
            let mut bottleneck = vec![0i64; node_count];
            let mut via: Vec<Option<EdgeId>> = vec![None; node_count];
            let mut queue = VecDeque::new();

            bottleneck[graph.source.index()] = i64::MAX;
            queue.push_back(graph.source);

            'search: while let Some(at) = queue.pop_front() {
                for &edge_id in graph.network.outgoing(at) {
                    let edge = graph.network.edge(edge_id);
                    let to = edge.to();
                    if bottleneck[to.index()] == 0 && edge.residual() > 0 {
                        via[to.index()] = Some(edge_id);
                        bottleneck[to.index()] = bottleneck[at.index()].min(edge.residual());
                        queue.push_back(to);
                    }
                }
                if bottleneck[graph.sink.index()] != 0 {
                    break 'search;
                }
            }

            let amount = bottleneck[graph.sink.index()];
            if amount == 0 {
                break;
            }
            graph.network.push_path(graph.source, graph.sink, &via, amount);
            augmentations += 1;
        }

        trace!(augmentations, "max-flow matching finished");
        graph.matching()
    }
}
