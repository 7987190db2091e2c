//! Nozzle assignment for a group with several physical nozzles.
//!
//! A group with K nozzles can hold K filaments loaded at once. For every
//! layer the required filaments are assigned to nozzles in **epochs**: one
//! min-cost matching places up to K filaments, the remainder is matched
//! again against the contents the first epoch left behind, and so on until
//! the layer is covered. The transition cost into a nozzle is the flush from
//! whatever it currently holds, or nothing if it is empty.

use tracing::{debug, trace};

use super::multi_group::{matrix_for_group, merge_group_orders};
use super::{
    validate_layer_filaments, CustomSequenceSource, CustomSequences, FilamentGrouping,
    FilamentId, FilamentMask, FlushMatrix, GroupId, GroupSchedule, LayerSequencer,
    StrategyLimits, ToolOrderError, ToolOrderResult, MAX_GROUPS,
};
use crate::config::ToolOrderingConfig;
use crate::flow::{MatchingProblem, MinCostBipartiteMatcher};

/// One epoch: the filament each nozzle receives, by nozzle index.
pub type NozzleMatch = Vec<Option<FilamentId>>;

/// Nozzle assignment for one layer.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LayerAssignment {
    pub epochs: Vec<NozzleMatch>,
    pub cost: f32,
}

impl LayerAssignment {
    /// Load order implied by the epochs: epoch by epoch, nozzles ascending.
    pub fn flatten(&self) -> Vec<FilamentId> {
        self.epochs.iter().flatten().flatten().copied().collect()
    }
}

/// Tracks nozzle contents across layers and assigns each layer's filaments.
#[derive(Debug, Clone)]
pub struct NozzleAssigner<'a> {
    flush_matrix: &'a FlushMatrix,
    members: FilamentMask,
    nozzle_state: Vec<Option<FilamentId>>,
}

impl<'a> NozzleAssigner<'a> {
    /// Assigner for `members` over `nozzle_count` initially empty nozzles.
    pub fn new(
        flush_matrix: &'a FlushMatrix,
        members: FilamentMask,
        nozzle_count: usize,
    ) -> ToolOrderResult<Self> {
        if nozzle_count == 0 {
            return Err(ToolOrderError::NoNozzles);
        }
        Ok(Self {
            flush_matrix,
            members,
            nozzle_state: vec![None; nozzle_count],
        })
    }

    pub fn nozzle_state(&self) -> &[Option<FilamentId>] {
        &self.nozzle_state
    }

    pub fn nozzle_count(&self) -> usize {
        self.nozzle_state.len()
    }

    fn entry_cost(&self, loaded: Option<FilamentId>, filament: FilamentId) -> f32 {
        loaded.map_or(0.0, |from| self.flush_matrix.get(from, filament))
    }

    /// Assign the group's share of `filaments` by repeated min-cost matching.
    ///
    /// Nozzle state is committed only once every epoch of the layer is placed.
    pub fn assign_layer(&mut self, layer: usize, filaments: &[FilamentId]) -> ToolOrderResult<LayerAssignment> {
        let mut pool: Vec<FilamentId> = filaments
            .iter()
            .copied()
            .filter(|&f| self.members.contains(f))
            .collect();
        pool.sort_unstable();

        let nozzle_count = self.nozzle_count();
        let mut working = self.nozzle_state.clone();
        let mut assignment = LayerAssignment::default();

        while !pool.is_empty() {
            let costs: Vec<Vec<f64>> = working
                .iter()
                .map(|&loaded| {
                    pool.iter()
                        .map(|&f| f64::from(self.entry_cost(loaded, f)))
                        .collect()
                })
                .collect();
            let matching = MinCostBipartiteMatcher::new(MatchingProblem::new(nozzle_count, pool.len()), costs)?
                .solve();

            let mut row: NozzleMatch = vec![None; nozzle_count];
            let mut placed = vec![false; pool.len()];
            for (nozzle, slot) in row.iter_mut().enumerate() {
                let Some(index) = matching.first(nozzle) else {
                    continue;
                };
                let filament = pool[index];
                assignment.cost += self.entry_cost(working[nozzle], filament);
                working[nozzle] = Some(filament);
                *slot = Some(filament);
                placed[index] = true;
            }

            let placed_count = placed.iter().filter(|&&p| p).count();
            if placed_count == 0 {
                return Err(ToolOrderError::NozzleAssignmentStalled { layer });
            }
            trace!(
                layer,
                epoch = assignment.epochs.len(),
                placed = placed_count,
                remaining = pool.len() - placed_count,
                "nozzle epoch assigned"
            );

            let mut index = 0;
            pool.retain(|_| {
                let keep = !placed[index];
                index += 1;
                keep
            });
            assignment.epochs.push(row);
        }

        self.nozzle_state = working;
        Ok(assignment)
    }

    /// Place a fixed load order online: each filament goes to the nozzle
    /// that is cheapest to enter (lowest index on ties). A new epoch begins
    /// whenever the chosen nozzle index does not increase.
    pub fn assign_in_order(&mut self, sequence: &[FilamentId]) -> LayerAssignment {
        let nozzle_count = self.nozzle_count();
        let mut working = self.nozzle_state.clone();
        let mut assignment = LayerAssignment::default();
        let mut row: NozzleMatch = vec![None; nozzle_count];
        let mut last_nozzle: Option<usize> = None;

        for &filament in sequence.iter().filter(|&&f| self.members.contains(f)) {
            let mut best = 0;
            let mut best_cost = self.entry_cost(working[0], filament);
            for (nozzle, &loaded) in working.iter().enumerate().skip(1) {
                let cost = self.entry_cost(loaded, filament);
                if cost < best_cost {
                    best = nozzle;
                    best_cost = cost;
                }
            }

            if last_nozzle.is_some_and(|last| best <= last) {
                assignment
                    .epochs
                    .push(std::mem::replace(&mut row, vec![None; nozzle_count]));
            }
            row[best] = Some(filament);
            working[best] = Some(filament);
            assignment.cost += best_cost;
            last_nozzle = Some(best);
        }

        if last_nozzle.is_some() {
            assignment.epochs.push(row);
        }
        self.nozzle_state = working;
        assignment
    }
}

/// Merged schedule when one group drives several nozzles.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiNozzleSchedule {
    pub total_cost: f32,
    pub filament_sequences: Vec<Vec<FilamentId>>,
    /// Epoch rows per layer for the multi-nozzle group.
    pub nozzle_match_per_layer: Vec<Vec<NozzleMatch>>,
    /// Nozzle contents after the last layer.
    pub final_nozzle_state: Vec<Option<FilamentId>>,
    pub group_costs: [f32; MAX_GROUPS],
}

/// Schedules a print where one logical group owns several nozzles and the
/// other (if any) a single feed path.
#[derive(Debug, Clone)]
pub struct MultiNozzleAssignmentScheduler {
    limits: StrategyLimits,
    parallel: bool,
    multi_nozzle_group: GroupId,
    nozzle_count: usize,
}

impl MultiNozzleAssignmentScheduler {
    pub fn new(
        config: &ToolOrderingConfig,
        multi_nozzle_group: GroupId,
        nozzle_count: usize,
    ) -> ToolOrderResult<Self> {
        if nozzle_count == 0 {
            return Err(ToolOrderError::NoNozzles);
        }
        if multi_nozzle_group >= MAX_GROUPS {
            return Err(ToolOrderError::UnknownGroup(multi_nozzle_group));
        }
        Ok(Self {
            limits: config.limits(),
            parallel: config.parallel_groups,
            multi_nozzle_group,
            nozzle_count,
        })
    }

    pub fn schedule(
        &self,
        grouping: &FilamentGrouping,
        layer_filaments: &[Vec<FilamentId>],
        flush_matrices: &[FlushMatrix],
        custom: &dyn CustomSequenceSource,
    ) -> ToolOrderResult<MultiNozzleSchedule> {
        validate_layer_filaments(layer_filaments)?;
        grouping.check_layers(layer_filaments)?;
        let custom = CustomSequences::resolve(layer_filaments, custom)?;

        let nozzle_group = self.multi_nozzle_group;
        let single_group = 1 - nozzle_group;

        let run_nozzles = || self.assign_nozzle_group(grouping, layer_filaments, flush_matrices, &custom);
        let run_single = || -> ToolOrderResult<GroupSchedule> {
            let members = grouping.members(single_group);
            if members.is_empty() {
                return Ok(GroupSchedule::default());
            }
            let matrix = matrix_for_group(flush_matrices, single_group)?;
            LayerSequencer::new(matrix, members, self.limits).run(layer_filaments, &custom)
        };

        let (nozzles, single) = if self.parallel {
            rayon::join(run_nozzles, run_single)
        } else {
            (run_nozzles(), run_single())
        };
        let (nozzles, single) = (nozzles?, single?);

        let mut group_sequences: [&[Vec<FilamentId>]; MAX_GROUPS] = [&[], &[]];
        group_sequences[nozzle_group] = nozzles.sequences.as_slice();
        group_sequences[single_group] = single.sequences.as_slice();
        let filament_sequences = merge_group_orders(layer_filaments.len(), group_sequences, &custom, grouping);

        let mut group_costs = [0.0; MAX_GROUPS];
        group_costs[nozzle_group] = nozzles.total_cost;
        group_costs[single_group] = single.total_cost;
        let total_cost: f32 = group_costs.iter().sum();

        debug!(
            layers = layer_filaments.len(),
            nozzles = self.nozzle_count,
            total_cost,
            "multi-nozzle schedule finished"
        );
        Ok(MultiNozzleSchedule {
            total_cost,
            filament_sequences,
            nozzle_match_per_layer: nozzles.epochs,
            final_nozzle_state: nozzles.final_state,
            group_costs,
        })
    }

    fn assign_nozzle_group(
        &self,
        grouping: &FilamentGrouping,
        layer_filaments: &[Vec<FilamentId>],
        flush_matrices: &[FlushMatrix],
        custom: &CustomSequences,
    ) -> ToolOrderResult<NozzleGroupRun> {
        let members = grouping.members(self.multi_nozzle_group);
        let mut run = NozzleGroupRun {
            final_state: vec![None; self.nozzle_count],
            ..NozzleGroupRun::default()
        };
        if members.is_empty() {
            run.sequences = vec![Vec::new(); layer_filaments.len()];
            run.epochs = vec![Vec::new(); layer_filaments.len()];
            return Ok(run);
        }

        let matrix = matrix_for_group(flush_matrices, self.multi_nozzle_group)?;
        matrix.check_covers(members.iter())?;
        let mut assigner = NozzleAssigner::new(matrix, members, self.nozzle_count)?;

        for (layer, filaments) in layer_filaments.iter().enumerate() {
            let assignment = match custom.get(layer) {
                Some(sequence) => assigner.assign_in_order(sequence),
                None => assigner.assign_layer(layer, filaments)?,
            };
            run.total_cost += assignment.cost;
            run.sequences.push(assignment.flatten());
            run.epochs.push(assignment.epochs);
        }
        run.final_state = assigner.nozzle_state().to_vec();
        Ok(run)
    }
}

#[derive(Debug, Default)]
struct NozzleGroupRun {
    sequences: Vec<Vec<FilamentId>>,
    epochs: Vec<Vec<NozzleMatch>>,
    final_state: Vec<Option<FilamentId>>,
    total_cost: f32,
}
