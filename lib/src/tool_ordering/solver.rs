//! Per-layer filament ordering for a single feed path.
//!
//! [`order_filaments`] is a pure function: given the filaments a layer needs,
//! the filaments the next layer needs, and the filament currently loaded, it
//! returns a load order and its flush cost. Which [`OrderStrategy`] to use is
//! decided by the caller (see [`OrderStrategy::select`]).
//!
//! Tie-break policy, per strategy:
//!
//! - `Exact`: the first minimum found scanning predecessors and end points
//!   in ascending filament order.
//! - `Lookahead`: lowest combined (current + next layer) cost, then fewest
//!   filament changes across both layers, then the lexicographically
//!   smallest current-layer order.
//! - `Greedy`: lowest transition cost, then staying on the same filament,
//!   then the lowest filament id.

use tracing::debug;

use super::{calculate_flush_volume, FilamentId, FlushMatrix};

/// Largest layer handled by the exact subset DP (2ⁿ·n² work).
pub const MAX_EXACT_FILAMENTS: usize = 20;

/// Largest current/next layer handled by the permutation lookahead (n!·m! work).
pub const MAX_LOOKAHEAD_FILAMENTS: usize = 6;

/// Ordering strategy for a single layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OrderStrategy {
    /// Held-Karp dynamic program over subsets; optimal for the layer alone.
    Exact,
    /// Exhaustive search over current and next layer permutations.
    Lookahead,
    /// Nearest-neighbour heuristic.
    Greedy,
}

/// Size ceilings used to pick an [`OrderStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StrategyLimits {
    pub max_exact_filaments: usize,
    pub max_lookahead_filaments: usize,
}

impl Default for StrategyLimits {
    fn default() -> Self {
        Self {
            max_exact_filaments: 20,
            max_lookahead_filaments: 5,
        }
    }
}

impl OrderStrategy {
    /// Strategy for a layer with `current` filaments followed by `next`.
    pub fn select(current: usize, next: usize, limits: &StrategyLimits) -> Self {
        if current <= limits.max_lookahead_filaments && next <= limits.max_lookahead_filaments {
            OrderStrategy::Lookahead
        } else if current <= limits.max_exact_filaments {
            OrderStrategy::Exact
        } else {
            OrderStrategy::Greedy
        }
    }
}

/// A layer's load order and the flush volume it costs.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerOrder {
    pub sequence: Vec<FilamentId>,
    pub cost: f32,
}

/// Order the filaments of one layer.
///
/// `now` is treated as a set: it is sorted before solving, so the result
/// depends only on which filaments are present. `next` is only read by the
/// lookahead strategy. The reported cost includes the transition out of
/// `prev` when one is given.
///
/// Strategies are clamped to their hard ceilings; a request above a ceiling
/// falls back to the next cheaper strategy.
pub fn order_filaments(
    now: &[FilamentId],
    next: &[FilamentId],
    prev: Option<FilamentId>,
    flush_matrix: &FlushMatrix,
    strategy: OrderStrategy,
) -> LayerOrder {
    if now.is_empty() {
        return LayerOrder::default();
    }
    if now.len() == 1 {
        return LayerOrder {
            sequence: now.to_vec(),
            cost: calculate_flush_volume(now, prev, flush_matrix),
        };
    }

    let mut items = now.to_vec();
    items.sort_unstable();

    let mut strategy = strategy;
    if strategy == OrderStrategy::Lookahead
        && (items.len() > MAX_LOOKAHEAD_FILAMENTS || next.len() > MAX_LOOKAHEAD_FILAMENTS)
    {
        strategy = OrderStrategy::Exact;
    }
    if strategy == OrderStrategy::Exact && items.len() > MAX_EXACT_FILAMENTS {
        debug!(
            filaments = items.len(),
            "layer too large for exact ordering, using greedy"
        );
        strategy = OrderStrategy::Greedy;
    }

    let sequence = match strategy {
        OrderStrategy::Exact => solve_exact(&items, prev, flush_matrix),
        OrderStrategy::Lookahead => solve_lookahead(items, next, prev, flush_matrix),
        OrderStrategy::Greedy => solve_greedy(&items, prev, flush_matrix),
    };
    let cost = calculate_flush_volume(&sequence, prev, flush_matrix);
    LayerOrder { sequence, cost }
}

/// Shortest asymmetric Hamiltonian path over `items`, entered from `prev`.
///
/// `prev` sits outside the layer, so a loaded filament the layer also needs
/// is not forced to come first.
fn solve_exact(items: &[FilamentId], prev: Option<FilamentId>, flush: &FlushMatrix) -> Vec<FilamentId> {
    const NO_PARENT: u8 = u8::MAX;

    let n = items.len();
    let full = (1usize << n) - 1;
    let mut dp = vec![f32::INFINITY; (full + 1) * n];
    let mut parent = vec![NO_PARENT; (full + 1) * n];

    for (j, &f) in items.iter().enumerate() {
        dp[(1 << j) * n + j] = prev.map_or(0.0, |p| flush.get(p, f));
    }

    for mask in 1..=full {
        for j in 0..n {
            let bit = 1 << j;
            let rest = mask ^ bit;
            if mask & bit == 0 || rest == 0 {
                continue;
            }
            let mut best = f32::INFINITY;
            let mut best_from = NO_PARENT;
            for i in (0..n).filter(|i| rest & (1 << i) != 0) {
                let candidate = dp[rest * n + i] + flush.get(items[i], items[j]);
                if candidate < best {
                    best = candidate;
                    best_from = i as u8;
                }
            }
            dp[mask * n + j] = best;
            parent[mask * n + j] = best_from;
        }
    }

    let mut end = 0;
    for j in 1..n {
        if dp[full * n + j] < dp[full * n + end] {
            end = j;
        }
    }

    let mut path = Vec::with_capacity(n);
    let mut mask = full;
    let mut at = end;
    loop {
        path.push(items[at]);
        let from = parent[mask * n + at];
        mask ^= 1 << at;
        if from == NO_PARENT {
            break;
        }
        at = from as usize;
    }
    path.reverse();
    path
}

/// Best current-layer order when the next layer is ordered optimally after it.
fn solve_lookahead(
    mut current: Vec<FilamentId>,
    next: &[FilamentId],
    prev: Option<FilamentId>,
    flush: &FlushMatrix,
) -> Vec<FilamentId> {
    let mut following = next.to_vec();
    following.sort_unstable();

    let mut best_cost = f32::INFINITY;
    let mut best_changes = usize::MAX;
    let mut best = current.clone();

    loop {
        let current_cost = calculate_flush_volume(&current, prev, flush);
        if current_cost <= best_cost {
            let tail = current.last().copied();
            following.sort_unstable();
            loop {
                let total = current_cost + calculate_flush_volume(&following, tail, flush);
                let changes = count_changes(prev, &current, &following);
                if total < best_cost || (total == best_cost && changes < best_changes) {
                    best_cost = total;
                    best_changes = changes;
                    best.clone_from(&current);
                }
                if !next_permutation(&mut following) {
                    break;
                }
            }
        }
        if !next_permutation(&mut current) {
            break;
        }
    }
    best
}

/// Number of adjacent pairs that switch filament across `prev`, `current`, `next`.
fn count_changes(prev: Option<FilamentId>, current: &[FilamentId], next: &[FilamentId]) -> usize {
    let mut changes = 0;
    let mut last = prev;
    for &f in current.iter().chain(next) {
        if last.is_some_and(|l| l != f) {
            changes += 1;
        }
        last = Some(f);
    }
    changes
}

/// Nearest-neighbour order starting from `prev` (or the smallest id).
fn solve_greedy(items: &[FilamentId], prev: Option<FilamentId>, flush: &FlushMatrix) -> Vec<FilamentId> {
    let mut placed = vec![false; items.len()];
    let mut sequence = Vec::with_capacity(items.len());
    let mut last = prev;

    for _ in 0..items.len() {
        let pick = match last {
            None => placed.iter().position(|p| !p),
            Some(from) => {
                let mut best: Option<(usize, f32)> = None;
                for (k, &f) in items.iter().enumerate().filter(|(k, _)| !placed[*k]) {
                    let cost = flush.get(from, f);
                    let better = match best {
                        None => true,
                        Some((_, best_cost)) => cost < best_cost || (cost == best_cost && f == from),
                    };
                    if better {
                        best = Some((k, cost));
                    }
                }
                best.map(|(k, _)| k)
            }
        };
        let Some(k) = pick else {
            break;
        };
        placed[k] = true;
        sequence.push(items[k]);
        last = Some(items[k]);
    }
    sequence
}

/// Rearrange `items` into the next lexicographic permutation.
///
/// Returns false (leaving `items` sorted ascending) once the last
/// permutation has been passed.
pub fn next_permutation<T: Ord>(items: &mut [T]) -> bool {
    if items.len() < 2 {
        return false;
    }
    let mut i = items.len() - 1;
    while i > 0 && items[i - 1] >= items[i] {
        i -= 1;
    }
    if i == 0 {
        items.reverse();
        return false;
    }
    let mut j = items.len() - 1;
    while items[j] <= items[i - 1] {
        j -= 1;
    }
    items.swap(i - 1, j);
    items[i..].reverse();
    true
}

/// Generate all possible orderings of a set of filaments
/// Warning: This has O(n!) complexity, only use for small sets
pub fn generate_all_orderings(filaments: &[FilamentId]) -> Vec<Vec<FilamentId>> {
    let mut current = filaments.to_vec();
    current.sort_unstable();
    let mut result = vec![current.clone()];
    while next_permutation(&mut current) {
        result.push(current.clone());
    }
    result
}
