//! Filament change statistics for produced schedules.

use std::collections::BTreeMap;

use super::multi_group::matrix_for_group;
use super::{
    FilamentGrouping, FilamentId, FlushMatrix, NozzleGroupResult, ToolOrderError,
    ToolOrderResult, MAX_GROUPS,
};
use crate::disjoint_set::DisjointSet;

/// Filament change statistics
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FilamentChangeStats {
    /// Total flush volume in mm³
    pub flush_volume: f32,
    /// Number of filament changes
    pub filament_change_count: usize,
    /// Number of extruder changes (for multi-extruder systems)
    pub extruder_change_count: usize,
}

impl FilamentChangeStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.flush_volume = 0.0;
        self.filament_change_count = 0;
        self.extruder_change_count = 0;
    }
}

impl std::ops::Add for FilamentChangeStats {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            flush_volume: self.flush_volume + other.flush_volume,
            filament_change_count: self.filament_change_count + other.filament_change_count,
            extruder_change_count: self.extruder_change_count + other.extruder_change_count,
        }
    }
}

impl std::ops::AddAssign for FilamentChangeStats {
    fn add_assign(&mut self, other: Self) {
        self.flush_volume += other.flush_volume;
        self.filament_change_count += other.filament_change_count;
        self.extruder_change_count += other.extruder_change_count;
    }
}

/// Replay merged per-layer sequences and count what they cost.
///
/// Each group keeps its own loaded filament; loading a different one is a
/// filament change priced by that group's matrix, and moving to another
/// group is an extruder change.
pub fn collect_change_stats(
    sequences: &[Vec<FilamentId>],
    grouping: &FilamentGrouping,
    flush_matrices: &[FlushMatrix],
) -> ToolOrderResult<FilamentChangeStats> {
    let mut stats = FilamentChangeStats::new();
    let mut loaded: [Option<FilamentId>; MAX_GROUPS] = [None; MAX_GROUPS];
    let mut active_group = None;

    for (layer, sequence) in sequences.iter().enumerate() {
        for &filament in sequence {
            let group = grouping
                .group_of(filament)
                .ok_or(ToolOrderError::UnknownFilament { layer, filament })?;
            let matrix = matrix_for_group(flush_matrices, group)?;
            matrix.check_covers([filament])?;

            if active_group.is_some_and(|g| g != group) {
                stats.extruder_change_count += 1;
            }
            active_group = Some(group);

            if let Some(previous) = loaded[group] {
                if previous != filament {
                    stats.filament_change_count += 1;
                    stats.flush_volume += matrix.get(previous, filament);
                }
            }
            loaded[group] = Some(filament);
        }
    }
    Ok(stats)
}

/// Extruder switches a schedule cannot avoid: every non-empty layer needs
/// one switch per extra extruder it uses.
pub fn estimate_extruder_change_count(
    layer_filaments: &[Vec<FilamentId>],
    nozzle_result: &NozzleGroupResult,
) -> usize {
    layer_filaments
        .iter()
        .map(|layer| nozzle_result.used_extruders(layer).len().saturating_sub(1))
        .sum()
}

/// Nozzle switches within extruders a schedule cannot avoid.
pub fn estimate_nozzle_change_count(
    layer_filaments: &[Vec<FilamentId>],
    nozzle_result: &NozzleGroupResult,
) -> usize {
    let extruders = nozzle_result.extruder_list();
    layer_filaments
        .iter()
        .map(|layer| {
            extruders
                .iter()
                .map(|&e| nozzle_result.used_nozzles(layer, Some(e)).len().saturating_sub(1))
                .sum::<usize>()
        })
        .sum()
}

/// Connected components of filaments that share at least one layer.
///
/// Components are sorted ascending and ordered by their smallest id.
pub fn co_usage_groups(layer_filaments: &[Vec<FilamentId>]) -> Vec<Vec<FilamentId>> {
    let index: BTreeMap<FilamentId, usize> = layer_filaments
        .iter()
        .flatten()
        .copied()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .enumerate()
        .map(|(i, f)| (f, i))
        .collect();
    let ids: Vec<FilamentId> = index.keys().copied().collect();

    let mut sets = DisjointSet::new(ids.len());
    for layer in layer_filaments {
        for pair in layer.windows(2) {
            sets.union(index[&pair[0]], index[&pair[1]]);
        }
    }

    sets.groups()
        .into_iter()
        .map(|group| group.into_iter().map(|i| ids[i]).collect())
        .collect()
}
