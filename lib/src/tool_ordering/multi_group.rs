//! Two-group (two-extruder) scheduling.
//!
//! Each logical group owns its own feed path, so the groups are ordered
//! independently and only interleaved afterwards.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{
    validate_layer_filaments, CustomSequenceSource, CustomSequences, FilamentId, FilamentMask,
    FlushMatrix, GroupSchedule, LayerSequencer, StrategyLimits, ToolOrderError, ToolOrderResult,
    MAX_FILAMENTS,
};
use crate::config::ToolOrderingConfig;

/// Logical group (extruder) index.
pub type GroupId = usize;

/// Number of logical groups a printer can expose.
pub const MAX_GROUPS: usize = 2;

/// Fixed filament → logical group mapping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilamentGrouping {
    groups: BTreeMap<FilamentId, GroupId>,
}

impl FilamentGrouping {
    /// Pair `filament_ids[i]` with `filament_to_group[i]`.
    pub fn new(filament_ids: &[FilamentId], filament_to_group: &[GroupId]) -> ToolOrderResult<Self> {
        if filament_ids.len() != filament_to_group.len() {
            return Err(ToolOrderError::GroupingLengthMismatch {
                filaments: filament_ids.len(),
                groups: filament_to_group.len(),
            });
        }

        let mut groups = BTreeMap::new();
        for (&filament, &group) in filament_ids.iter().zip(filament_to_group) {
            if filament as usize >= MAX_FILAMENTS {
                return Err(ToolOrderError::FilamentOutOfRange {
                    filament,
                    max: MAX_FILAMENTS,
                });
            }
            if group >= MAX_GROUPS {
                return Err(ToolOrderError::InvalidGroup { filament, group });
            }
            groups.insert(filament, group);
        }
        Ok(Self { groups })
    }

    /// Every filament in group 0.
    pub fn single_group(filament_ids: &[FilamentId]) -> ToolOrderResult<Self> {
        Self::new(filament_ids, &vec![0; filament_ids.len()])
    }

    pub fn group_of(&self, filament: FilamentId) -> Option<GroupId> {
        self.groups.get(&filament).copied()
    }

    pub fn members(&self, group: GroupId) -> FilamentMask {
        FilamentMask::from_filaments(
            self.groups
                .iter()
                .filter(|(_, &g)| g == group)
                .map(|(&f, _)| f),
        )
    }

    /// All grouped filaments, ascending.
    pub fn filaments(&self) -> impl Iterator<Item = FilamentId> + '_ {
        self.groups.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Fail on the first layer filament without a group.
    pub(crate) fn check_layers(&self, layer_filaments: &[Vec<FilamentId>]) -> ToolOrderResult<()> {
        for (layer, filaments) in layer_filaments.iter().enumerate() {
            if let Some(&filament) = filaments.iter().find(|f| !self.groups.contains_key(f)) {
                return Err(ToolOrderError::UnknownFilament { layer, filament });
            }
        }
        Ok(())
    }
}

/// Merged schedule for a whole print.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScheduleResult {
    /// Sum of the per-group flush volumes.
    pub total_cost: f32,
    /// Global load order per layer.
    pub filament_sequences: Vec<Vec<FilamentId>>,
    pub group_costs: [f32; MAX_GROUPS],
}

/// Schedules up to two logical groups and interleaves their layers.
#[derive(Debug, Clone)]
pub struct MultiGroupScheduler {
    limits: StrategyLimits,
    parallel: bool,
}

impl MultiGroupScheduler {
    pub fn new(config: &ToolOrderingConfig) -> Self {
        Self {
            limits: config.limits(),
            parallel: config.parallel_groups,
        }
    }

    /// Order every layer of the print.
    ///
    /// `flush_matrices[g]` prices group `g`; a single matrix is shared by
    /// both groups.
    pub fn schedule(
        &self,
        grouping: &FilamentGrouping,
        layer_filaments: &[Vec<FilamentId>],
        flush_matrices: &[FlushMatrix],
        custom: &dyn CustomSequenceSource,
    ) -> ToolOrderResult<ScheduleResult> {
        validate_layer_filaments(layer_filaments)?;
        grouping.check_layers(layer_filaments)?;
        let custom = CustomSequences::resolve(layer_filaments, custom)?;

        let run_group = |group: GroupId| -> ToolOrderResult<GroupSchedule> {
            let members = grouping.members(group);
            if members.is_empty() {
                return Ok(GroupSchedule::default());
            }
            let matrix = matrix_for_group(flush_matrices, group)?;
            LayerSequencer::new(matrix, members, self.limits).run(layer_filaments, &custom)
        };

        let (first, second) = if self.parallel {
            rayon::join(|| run_group(0), || run_group(1))
        } else {
            (run_group(0), run_group(1))
        };
        let schedules = [first?, second?];

        let filament_sequences = merge_group_orders(
            layer_filaments.len(),
            [&schedules[0].sequences, &schedules[1].sequences],
            &custom,
            grouping,
        );
        let group_costs = [schedules[0].total_cost, schedules[1].total_cost];
        let total_cost: f32 = group_costs.iter().sum();

        debug!(
            layers = layer_filaments.len(),
            total_cost,
            overrides = custom.len(),
            "multi-group schedule finished"
        );
        Ok(ScheduleResult {
            total_cost,
            filament_sequences,
            group_costs,
        })
    }
}

pub(crate) fn matrix_for_group(flush_matrices: &[FlushMatrix], group: GroupId) -> ToolOrderResult<&FlushMatrix> {
    match flush_matrices {
        [shared] => Ok(shared),
        _ => flush_matrices
            .get(group)
            .ok_or(ToolOrderError::MissingFlushMatrix(group)),
    }
}

/// Interleave per-group layer orders into one sequence per layer.
///
/// The group that printed last keeps going first while it still has work;
/// a custom layer is emitted whole and hands "last group" to the group of
/// its final filament.
pub(crate) fn merge_group_orders(
    layer_count: usize,
    group_sequences: [&[Vec<FilamentId>]; MAX_GROUPS],
    custom: &CustomSequences,
    grouping: &FilamentGrouping,
) -> Vec<Vec<FilamentId>> {
    let mut last_group: GroupId = 0;
    let mut merged = Vec::with_capacity(layer_count);
    for layer in 0..layer_count {
        if let Some(sequence) = custom.get(layer) {
            if let Some(group) = sequence.last().and_then(|&f| grouping.group_of(f)) {
                last_group = group;
            }
            merged.push(sequence.to_vec());
            continue;
        }

        let other = 1 - last_group;
        let lead = group_sequences[last_group].get(layer).map_or(&[][..], Vec::as_slice);
        let follow = group_sequences[other].get(layer).map_or(&[][..], Vec::as_slice);
        let mut sequence = Vec::with_capacity(lead.len() + follow.len());
        sequence.extend_from_slice(lead);
        sequence.extend_from_slice(follow);
        if !follow.is_empty() {
            last_group = other;
        }
        merged.push(sequence);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_ordering::NoCustomSequence;

    fn scheduler() -> MultiGroupScheduler {
        MultiGroupScheduler::new(&ToolOrderingConfig::default())
    }

    #[test]
    fn test_grouping_validation() {
        assert_eq!(
            FilamentGrouping::new(&[0, 1], &[0]),
            Err(ToolOrderError::GroupingLengthMismatch { filaments: 2, groups: 1 })
        );
        assert_eq!(
            FilamentGrouping::new(&[0, 1], &[0, 2]),
            Err(ToolOrderError::InvalidGroup { filament: 1, group: 2 })
        );
        assert_eq!(
            FilamentGrouping::new(&[70], &[0]),
            Err(ToolOrderError::FilamentOutOfRange { filament: 70, max: 64 })
        );

        let grouping = FilamentGrouping::new(&[0, 1, 2], &[0, 1, 0]).unwrap();
        assert_eq!(grouping.group_of(1), Some(1));
        assert_eq!(grouping.group_of(5), None);
        assert_eq!(grouping.members(0).iter().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(grouping.filaments().collect::<Vec<_>>(), vec![0, 1, 2]);
    }

    #[test]
    fn test_unknown_filament_rejected() {
        let grouping = FilamentGrouping::single_group(&[0, 1]).unwrap();
        let result = scheduler().schedule(
            &grouping,
            &[vec![0], vec![1, 3]],
            &[FlushMatrix::new(4, 1.0)],
            &NoCustomSequence,
        );
        assert_eq!(result, Err(ToolOrderError::UnknownFilament { layer: 1, filament: 3 }));
    }

    #[test]
    fn test_missing_matrix_for_second_group() {
        let grouping = FilamentGrouping::new(&[0, 1, 2], &[0, 1, 0]).unwrap();
        let matrices = vec![FlushMatrix::new(3, 1.0), FlushMatrix::new(3, 1.0)];
        assert!(matrix_for_group(&matrices, 1).is_ok());
        assert_eq!(
            matrix_for_group(&matrices, 2),
            Err(ToolOrderError::MissingFlushMatrix(2))
        );
        assert!(scheduler()
            .schedule(&grouping, &[vec![0, 1]], &matrices[..0], &NoCustomSequence)
            .is_err());
    }

    #[test]
    fn test_single_group_matches_sequencer() {
        let grouping = FilamentGrouping::single_group(&[0, 1, 2]).unwrap();
        let matrix = FlushMatrix::new(3, 1.0);
        let result = scheduler()
            .schedule(&grouping, &[vec![0, 1, 2], vec![0, 2]], &[matrix], &NoCustomSequence)
            .unwrap();

        assert_eq!(result.filament_sequences, vec![vec![0, 1, 2], vec![2, 0]]);
        assert_eq!(result.total_cost, 3.0);
        assert_eq!(result.group_costs, [3.0, 0.0]);
    }

    #[test]
    fn test_merge_keeps_last_group_first() {
        // Group 0: {0, 1}, group 1: {2, 3}.
        let grouping = FilamentGrouping::new(&[0, 1, 2, 3], &[0, 0, 1, 1]).unwrap();
        let group0 = vec![vec![0, 1], vec![1], vec![], vec![0]];
        let group1 = vec![vec![2], vec![3], vec![2, 3], vec![]];
        let merged = merge_group_orders(4, [&group0, &group1], &CustomSequences::default(), &grouping);

        assert_eq!(
            merged,
            vec![
                vec![0, 1, 2], // group 0 leads, group 1 ends the layer
                vec![3, 1],    // group 1 leads, group 0 ends the layer
                vec![2, 3],    // only group 1 has work and becomes last
                vec![0],
            ]
        );
    }

    #[test]
    fn test_merge_only_other_group_flips() {
        let grouping = FilamentGrouping::new(&[0, 1], &[0, 1]).unwrap();
        let group0 = vec![vec![], vec![0]];
        let group1 = vec![vec![1], vec![1]];
        let merged = merge_group_orders(2, [&group0, &group1], &CustomSequences::default(), &grouping);
        assert_eq!(merged, vec![vec![1], vec![1, 0]]);
    }

    #[test]
    fn test_override_layer_sets_last_group() {
        let grouping = FilamentGrouping::new(&[0, 1], &[0, 1]).unwrap();
        let layers = vec![vec![0, 1], vec![0, 1]];
        let source = |layer: usize| -> Option<Vec<FilamentId>> { (layer == 0).then(|| vec![0, 1]) };
        let result = scheduler()
            .schedule(&grouping, &layers, &[FlushMatrix::new(2, 1.0)], &source)
            .unwrap();

        assert_eq!(result.filament_sequences[0], vec![0, 1]);
        // Group 1 ended the custom layer, so it leads the next one.
        assert_eq!(result.filament_sequences[1], vec![1, 0]);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let grouping = FilamentGrouping::new(&[0, 1, 2, 3, 4], &[0, 1, 0, 1, 0]).unwrap();
        let layers = vec![vec![0, 1, 2], vec![3, 4], vec![], vec![0, 1, 2, 3, 4]];
        let mut matrix = FlushMatrix::new(5, 10.0);
        matrix.set(0, 2, 1.0);
        matrix.set(4, 0, 2.0);
        let matrices = vec![matrix.clone(), matrix];

        let sequential = scheduler()
            .schedule(&grouping, &layers, &matrices, &NoCustomSequence)
            .unwrap();
        let config = ToolOrderingConfig {
            parallel_groups: true,
            ..ToolOrderingConfig::default()
        };
        let parallel = MultiGroupScheduler::new(&config)
            .schedule(&grouping, &layers, &matrices, &NoCustomSequence)
            .unwrap();
        assert_eq!(sequential, parallel);
    }
}
