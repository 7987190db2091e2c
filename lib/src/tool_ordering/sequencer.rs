//! Cross-layer driver for one feed path.
//!
//! [`LayerSequencer`] walks the layers of a print in order, carrying the last
//! loaded filament from one layer into the next, and memoizes solver results
//! keyed on the local context that determines them.

use std::collections::{BTreeMap, HashMap};

use tracing::{debug, trace};

use super::{
    calculate_flush_volume, order_filaments, validate_layer_filaments, FilamentId, FlushMatrix,
    LayerOrder, OrderStrategy, StrategyLimits, ToolOrderError, ToolOrderResult, MAX_FILAMENTS,
};

/// Set of filament ids packed into a 64-bit mask.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct FilamentMask(u64);

impl FilamentMask {
    pub const EMPTY: FilamentMask = FilamentMask(0);

    /// Ids at or above [`MAX_FILAMENTS`] are ignored.
    pub fn from_filaments<I: IntoIterator<Item = FilamentId>>(filaments: I) -> Self {
        let mut mask = Self::EMPTY;
        for filament in filaments {
            mask.insert(filament);
        }
        mask
    }

    pub fn contains(&self, filament: FilamentId) -> bool {
        (filament as usize) < MAX_FILAMENTS && self.0 & (1u64 << filament) != 0
    }

    pub fn insert(&mut self, filament: FilamentId) {
        if (filament as usize) < MAX_FILAMENTS {
            self.0 |= 1u64 << filament;
        }
    }

    pub fn len(&self) -> usize {
        self.0.count_ones() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    pub fn bits(&self) -> u64 {
        self.0
    }

    /// Members in ascending order.
    pub fn iter(&self) -> impl Iterator<Item = FilamentId> + '_ {
        let bits = self.0;
        (0..MAX_FILAMENTS as FilamentId).filter(move |&f| bits & (1u64 << f) != 0)
    }
}

/// Everything a cached layer order depends on.
///
/// `next` is only part of the key when the lookahead strategy produced the
/// order; it stays 0 otherwise so layers with different successors share
/// exact-DP and greedy results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OrderingCacheKey {
    pub prev: u64,
    pub current: u64,
    pub next: u64,
    pub lookahead: bool,
}

impl OrderingCacheKey {
    pub fn new(
        prev: Option<FilamentId>,
        current: FilamentMask,
        next: FilamentMask,
        lookahead: bool,
    ) -> Self {
        Self {
            prev: prev.map_or(0, |p| FilamentMask::from_filaments([p]).bits()),
            current: current.bits(),
            next: if lookahead { next.bits() } else { 0 },
            lookahead,
        }
    }
}

/// Caller-supplied explicit per-layer orders.
///
/// Returned ids are 0-based. `None` or an empty list means the layer is
/// free to be reordered.
pub trait CustomSequenceSource {
    fn custom_sequence(&self, layer: usize) -> Option<Vec<FilamentId>>;
}

impl<F> CustomSequenceSource for F
where
    F: Fn(usize) -> Option<Vec<FilamentId>>,
{
    fn custom_sequence(&self, layer: usize) -> Option<Vec<FilamentId>> {
        self(layer)
    }
}

/// Source that never overrides a layer.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCustomSequence;

impl CustomSequenceSource for NoCustomSequence {
    fn custom_sequence(&self, _layer: usize) -> Option<Vec<FilamentId>> {
        None
    }
}

/// Custom sequences resolved against the layers of one print.
///
/// Every stored sequence is a permutation of its layer's filament set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CustomSequences {
    layers: BTreeMap<usize, Vec<FilamentId>>,
}

impl CustomSequences {
    /// Query `source` for every layer and drop the ids the layer does not
    /// need, keeping the order.
    ///
    /// Fails if a filtered override is not exactly a permutation of the
    /// layer: a wrong length or a repeated id is a mismatch.
    pub fn resolve(
        layer_filaments: &[Vec<FilamentId>],
        source: &dyn CustomSequenceSource,
    ) -> ToolOrderResult<Self> {
        let mut layers = BTreeMap::new();
        for (layer, required) in layer_filaments.iter().enumerate() {
            let Some(requested) = source.custom_sequence(layer) else {
                continue;
            };
            if requested.is_empty() {
                continue;
            }

            let wanted = FilamentMask::from_filaments(required.iter().copied());
            let filtered: Vec<FilamentId> = requested
                .into_iter()
                .filter(|&f| wanted.contains(f))
                .collect();

            if filtered.len() != required.len() {
                return Err(ToolOrderError::CustomSequenceMismatch {
                    layer,
                    expected: required.len(),
                    actual: filtered.len(),
                });
            }
            let distinct = FilamentMask::from_filaments(filtered.iter().copied()).len();
            if distinct != required.len() {
                return Err(ToolOrderError::CustomSequenceMismatch {
                    layer,
                    expected: required.len(),
                    actual: distinct,
                });
            }
            if !filtered.is_empty() {
                layers.insert(layer, filtered);
            }
        }
        Ok(Self { layers })
    }

    pub fn get(&self, layer: usize) -> Option<&[FilamentId]> {
        self.layers.get(&layer).map(Vec::as_slice)
    }

    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.layers.len()
    }
}

/// Per-layer orders for one group.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupSchedule {
    /// Load order per layer, restricted to the group.
    pub sequences: Vec<Vec<FilamentId>>,
    /// Flush volume spent entering and walking each layer.
    pub layer_costs: Vec<f32>,
    /// Whether the layer came from a custom sequence.
    pub overridden: Vec<bool>,
    pub total_cost: f32,
    pub cache_hits: usize,
    /// Filament loaded after the last non-empty layer.
    pub last_filament: Option<FilamentId>,
}

/// Orders the layers of one group in sequence.
pub struct LayerSequencer<'a> {
    flush_matrix: &'a FlushMatrix,
    members: FilamentMask,
    limits: StrategyLimits,
    start_filament: Option<FilamentId>,
    cache: HashMap<OrderingCacheKey, LayerOrder>,
}

impl<'a> LayerSequencer<'a> {
    /// Sequencer for the filaments in `members`, priced by `flush_matrix`.
    pub fn new(flush_matrix: &'a FlushMatrix, members: FilamentMask, limits: StrategyLimits) -> Self {
        Self {
            flush_matrix,
            members,
            limits,
            start_filament: None,
            cache: HashMap::new(),
        }
    }

    /// Filament assumed loaded before the first layer.
    pub fn with_start_filament(mut self, filament: Option<FilamentId>) -> Self {
        self.start_filament = filament;
        self
    }

    pub fn run(
        mut self,
        layer_filaments: &[Vec<FilamentId>],
        custom: &CustomSequences,
    ) -> ToolOrderResult<GroupSchedule> {
        validate_layer_filaments(layer_filaments)?;
        if let Some(start) = self.start_filament {
            if start as usize >= MAX_FILAMENTS {
                return Err(ToolOrderError::FilamentOutOfRange {
                    filament: start,
                    max: MAX_FILAMENTS,
                });
            }
        }

        let restricted: Vec<Vec<FilamentId>> = layer_filaments
            .iter()
            .map(|layer| {
                layer
                    .iter()
                    .copied()
                    .filter(|&f| self.members.contains(f))
                    .collect()
            })
            .collect();
        self.flush_matrix.check_covers(
            restricted
                .iter()
                .flatten()
                .copied()
                .chain(self.start_filament),
        )?;

        let mut schedule = GroupSchedule {
            sequences: Vec::with_capacity(restricted.len()),
            layer_costs: Vec::with_capacity(restricted.len()),
            overridden: Vec::with_capacity(restricted.len()),
            ..GroupSchedule::default()
        };
        let mut last = self.start_filament;

        for (layer, current) in restricted.iter().enumerate() {
            let (order, overridden) = match custom.get(layer) {
                Some(sequence) => {
                    let sequence: Vec<FilamentId> = sequence
                        .iter()
                        .copied()
                        .filter(|&f| self.members.contains(f))
                        .collect();
                    let cost = calculate_flush_volume(&sequence, last, self.flush_matrix);
                    (LayerOrder { sequence, cost }, true)
                }
                None if current.is_empty() => (LayerOrder::default(), false),
                None => {
                    let next = restricted.get(layer + 1).map_or(&[][..], Vec::as_slice);
                    (self.solve_layer(layer, current, next, last, &mut schedule.cache_hits), false)
                }
            };

            if let Some(&tail) = order.sequence.last() {
                last = Some(tail);
            }
            schedule.total_cost += order.cost;
            schedule.layer_costs.push(order.cost);
            schedule.overridden.push(overridden);
            schedule.sequences.push(order.sequence);
        }

        schedule.last_filament = last;
        debug!(
            layers = schedule.sequences.len(),
            filaments = self.members.len(),
            total_cost = schedule.total_cost,
            cache_hits = schedule.cache_hits,
            cache_entries = self.cache.len(),
            "group sequencing finished"
        );
        Ok(schedule)
    }

    fn solve_layer(
        &mut self,
        layer: usize,
        current: &[FilamentId],
        next: &[FilamentId],
        last: Option<FilamentId>,
        cache_hits: &mut usize,
    ) -> LayerOrder {
        let strategy = OrderStrategy::select(current.len(), next.len(), &self.limits);
        let key = OrderingCacheKey::new(
            last,
            FilamentMask::from_filaments(current.iter().copied()),
            FilamentMask::from_filaments(next.iter().copied()),
            strategy == OrderStrategy::Lookahead,
        );

        if let Some(order) = self.cache.get(&key) {
            trace!(layer, "layer order cache hit");
            *cache_hits += 1;
            return order.clone();
        }

        let order = order_filaments(current, next, last, self.flush_matrix, strategy);
        self.cache.insert(key, order.clone());
        order
    }
}
