//! Scheduling driven by a filament → nozzle group mapping.
//!
//! On printers where each extruder carries several nozzle groups, a slicer
//! front end has already decided which nozzle group every filament lives
//! in. Each nozzle group is then an independent feed path: it is ordered by
//! its own [`LayerSequencer`], and the fragments are interleaved per layer
//! by rotating through extruders and, within an extruder, through its
//! nozzle groups, starting from whichever printed last.

use std::collections::{BTreeMap, BTreeSet};

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::multi_group::matrix_for_group;
use super::{
    validate_layer_filaments, CustomSequenceSource, CustomSequences, FilamentId, FilamentMask,
    FlushMatrix, GroupSchedule, LayerSequencer, StrategyLimits, ToolOrderError, ToolOrderResult,
    MAX_FILAMENTS,
};
use crate::config::ToolOrderingConfig;

/// Physical nozzle a filament is loaded through.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NozzleInfo {
    /// Logical extruder the nozzle belongs to.
    pub extruder_id: usize,
    /// Nozzle group id, unique across extruders.
    pub group_id: usize,
    /// Nozzle diameter in mm.
    #[serde(default = "default_nozzle_diameter")]
    pub diameter: f32,
}

fn default_nozzle_diameter() -> f32 {
    0.4
}

impl NozzleInfo {
    pub fn new(extruder_id: usize, group_id: usize) -> Self {
        Self {
            extruder_id,
            group_id,
            diameter: default_nozzle_diameter(),
        }
    }
}

/// Read-only filament → nozzle mapping.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NozzleGroupResult {
    nozzles: BTreeMap<FilamentId, NozzleInfo>,
}

impl NozzleGroupResult {
    pub fn new<I: IntoIterator<Item = (FilamentId, NozzleInfo)>>(nozzles: I) -> Self {
        Self {
            nozzles: nozzles.into_iter().collect(),
        }
    }

    /// Build from `filament_nozzle_map[filament] = index into nozzle_list`.
    pub fn from_filament_nozzle_map(
        filament_nozzle_map: &[usize],
        nozzle_list: &[NozzleInfo],
    ) -> ToolOrderResult<Self> {
        let mut nozzles = BTreeMap::new();
        for (filament, &nozzle) in filament_nozzle_map.iter().enumerate() {
            if filament >= MAX_FILAMENTS {
                return Err(ToolOrderError::FilamentOutOfRange {
                    filament: filament as FilamentId,
                    max: MAX_FILAMENTS,
                });
            }
            let filament = filament as FilamentId;
            let info = nozzle_list
                .get(nozzle)
                .ok_or(ToolOrderError::UnknownNozzle { filament, nozzle })?;
            nozzles.insert(filament, *info);
        }
        Ok(Self { nozzles })
    }

    pub fn get_nozzle_for_filament(&self, filament: FilamentId) -> Option<NozzleInfo> {
        self.nozzles.get(&filament).copied()
    }

    pub fn get_extruder_id(&self, filament: FilamentId) -> Option<usize> {
        self.nozzles.get(&filament).map(|n| n.extruder_id)
    }

    /// False if either filament is unmapped.
    pub fn are_filaments_same_extruder(&self, a: FilamentId, b: FilamentId) -> bool {
        match (self.get_extruder_id(a), self.get_extruder_id(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        }
    }

    /// False if either filament is unmapped.
    pub fn are_filaments_same_nozzle(&self, a: FilamentId, b: FilamentId) -> bool {
        match (self.get_nozzle_for_filament(a), self.get_nozzle_for_filament(b)) {
            (Some(x), Some(y)) => x.group_id == y.group_id,
            _ => false,
        }
    }

    pub fn extruder_count(&self) -> usize {
        self.extruder_list().len()
    }

    /// Distinct nozzle groups in use, on one extruder or on all of them.
    pub fn nozzle_count(&self, extruder: Option<usize>) -> usize {
        self.nozzles
            .values()
            .filter(|n| extruder.map_or(true, |e| n.extruder_id == e))
            .map(|n| n.group_id)
            .collect::<BTreeSet<_>>()
            .len()
    }

    /// Nozzles the given filaments use, one entry per nozzle group, ascending.
    pub fn used_nozzles(&self, filaments: &[FilamentId], extruder: Option<usize>) -> Vec<NozzleInfo> {
        let mut used: BTreeMap<usize, NozzleInfo> = BTreeMap::new();
        for info in filaments.iter().filter_map(|&f| self.get_nozzle_for_filament(f)) {
            if extruder.map_or(true, |e| info.extruder_id == e) {
                used.entry(info.group_id).or_insert(info);
            }
        }
        used.into_values().collect()
    }

    /// Extruders the given filaments use, ascending.
    pub fn used_extruders(&self, filaments: &[FilamentId]) -> Vec<usize> {
        filaments
            .iter()
            .filter_map(|&f| self.get_extruder_id(f))
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn extruder_list(&self) -> Vec<usize> {
        self.nozzles
            .values()
            .map(|n| n.extruder_id)
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Extruder → its nozzle group ids, both ascending.
    pub fn extruder_nozzle_list(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut list: BTreeMap<usize, BTreeSet<usize>> = BTreeMap::new();
        for info in self.nozzles.values() {
            list.entry(info.extruder_id).or_default().insert(info.group_id);
        }
        list.into_iter()
            .map(|(extruder, nozzles)| (extruder, nozzles.into_iter().collect()))
            .collect()
    }
}

/// Schedule produced by [`NozzleGroupScheduler`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NozzleGroupSchedule {
    pub total_cost: f32,
    pub filament_sequences: Vec<Vec<FilamentId>>,
    /// Flush volume per nozzle group id.
    pub nozzle_costs: BTreeMap<usize, f32>,
}

/// One nozzle group's feed path.
#[derive(Debug, Clone, Copy)]
struct NozzlePath {
    group_id: usize,
    extruder_id: usize,
    members: FilamentMask,
}

/// Orders every nozzle group independently and interleaves the results.
#[derive(Debug, Clone)]
pub struct NozzleGroupScheduler {
    limits: StrategyLimits,
    parallel: bool,
}

impl NozzleGroupScheduler {
    pub fn new(config: &ToolOrderingConfig) -> Self {
        Self {
            limits: config.limits(),
            parallel: config.parallel_groups,
        }
    }

    /// `flush_matrices[e]` prices the nozzles of extruder `e`; a single
    /// matrix is shared by all extruders.
    pub fn schedule(
        &self,
        filament_ids: &[FilamentId],
        nozzle_result: &NozzleGroupResult,
        layer_filaments: &[Vec<FilamentId>],
        flush_matrices: &[FlushMatrix],
        custom: &dyn CustomSequenceSource,
    ) -> ToolOrderResult<NozzleGroupSchedule> {
        validate_layer_filaments(layer_filaments)?;
        let known = FilamentMask::from_filaments(filament_ids.iter().copied());
        for (layer, filaments) in layer_filaments.iter().enumerate() {
            for &filament in filaments {
                if !known.contains(filament) {
                    return Err(ToolOrderError::UnknownFilament { layer, filament });
                }
                if nozzle_result.get_nozzle_for_filament(filament).is_none() {
                    return Err(ToolOrderError::MissingNozzle(filament));
                }
            }
        }
        let custom = CustomSequences::resolve(layer_filaments, custom)?;

        let mut paths: BTreeMap<usize, NozzlePath> = BTreeMap::new();
        for &filament in filament_ids {
            let Some(info) = nozzle_result.get_nozzle_for_filament(filament) else {
                warn!(filament, "filament has no nozzle group, skipping");
                continue;
            };
            paths
                .entry(info.group_id)
                .or_insert(NozzlePath {
                    group_id: info.group_id,
                    extruder_id: info.extruder_id,
                    members: FilamentMask::EMPTY,
                })
                .members
                .insert(filament);
        }
        let paths: Vec<NozzlePath> = paths.into_values().collect();

        let run_path = |path: &NozzlePath| -> ToolOrderResult<GroupSchedule> {
            let matrix = matrix_for_group(flush_matrices, path.extruder_id)?;
            LayerSequencer::new(matrix, path.members, self.limits).run(layer_filaments, &custom)
        };
        let schedules: Vec<GroupSchedule> = if self.parallel {
            paths.par_iter().map(run_path).collect::<ToolOrderResult<_>>()?
        } else {
            paths.iter().map(run_path).collect::<ToolOrderResult<_>>()?
        };

        let nozzle_costs: BTreeMap<usize, f32> = paths
            .iter()
            .zip(&schedules)
            .map(|(path, schedule)| (path.group_id, schedule.total_cost))
            .collect();
        let total_cost: f32 = nozzle_costs.values().sum();

        let filament_sequences = merge_nozzle_orders(
            layer_filaments.len(),
            &paths,
            &schedules,
            &custom,
            nozzle_result,
        );

        debug!(
            layers = layer_filaments.len(),
            nozzle_groups = paths.len(),
            total_cost,
            "nozzle-group schedule finished"
        );
        Ok(NozzleGroupSchedule {
            total_cost,
            filament_sequences,
            nozzle_costs,
        })
    }
}

/// Interleave per-nozzle fragments by extruder rotation, then nozzle rotation.
fn merge_nozzle_orders(
    layer_count: usize,
    paths: &[NozzlePath],
    schedules: &[GroupSchedule],
    custom: &CustomSequences,
    nozzle_result: &NozzleGroupResult,
) -> Vec<Vec<FilamentId>> {
    // extruders[e] = (extruder id, indices into `paths` in nozzle order)
    let mut by_extruder: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
    for (index, path) in paths.iter().enumerate() {
        by_extruder.entry(path.extruder_id).or_default().push(index);
    }
    let extruders: Vec<(usize, Vec<usize>)> = by_extruder.into_iter().collect();

    let position_of = |filament: FilamentId| -> Option<(usize, usize)> {
        let info = nozzle_result.get_nozzle_for_filament(filament)?;
        let e = extruders.iter().position(|(id, _)| *id == info.extruder_id)?;
        let n = extruders[e].1.iter().position(|&p| paths[p].group_id == info.group_id)?;
        Some((e, n))
    };

    let mut last_extruder = 0;
    let mut last_nozzle = vec![0usize; extruders.len()];
    let mut merged = Vec::with_capacity(layer_count);

    for layer in 0..layer_count {
        if let Some(sequence) = custom.get(layer) {
            for &filament in sequence {
                if let Some((e, n)) = position_of(filament) {
                    last_nozzle[e] = n;
                    last_extruder = e;
                }
            }
            merged.push(sequence.to_vec());
            continue;
        }

        let mut sequence = Vec::new();
        let mut next_extruder = last_extruder;
        let mut next_nozzle = last_nozzle.clone();
        for i in 0..extruders.len() {
            let e = (last_extruder + i) % extruders.len();
            let nozzles = &extruders[e].1;
            let mut emitted = false;
            for j in 0..nozzles.len() {
                let n = (last_nozzle[e] + j) % nozzles.len();
                let fragment = schedules[nozzles[n]]
                    .sequences
                    .get(layer)
                    .map_or(&[][..], Vec::as_slice);
                if fragment.is_empty() {
                    continue;
                }
                sequence.extend_from_slice(fragment);
                next_nozzle[e] = n;
                emitted = true;
            }
            if emitted {
                next_extruder = e;
            }
        }
        last_extruder = next_extruder;
        last_nozzle = next_nozzle;
        merged.push(sequence);
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tool_ordering::NoCustomSequence;

    /// Extruder 0 carries nozzle groups 0 and 1, extruder 1 carries group 2.
    fn two_extruder_result() -> NozzleGroupResult {
        let nozzles = [NozzleInfo::new(0, 0), NozzleInfo::new(0, 1), NozzleInfo::new(1, 2)];
        // filaments 0,1 -> group 0; 2 -> group 1; 3 -> group 2
        NozzleGroupResult::from_filament_nozzle_map(&[0, 0, 1, 2], &nozzles).unwrap()
    }

    #[test]
    fn test_queries() {
        let result = two_extruder_result();
        assert_eq!(result.get_extruder_id(2), Some(0));
        assert_eq!(result.get_extruder_id(9), None);
        assert!(result.are_filaments_same_extruder(0, 2));
        assert!(!result.are_filaments_same_nozzle(0, 2));
        assert!(result.are_filaments_same_nozzle(0, 1));
        assert!(!result.are_filaments_same_extruder(0, 9));

        assert_eq!(result.extruder_count(), 2);
        assert_eq!(result.nozzle_count(None), 3);
        assert_eq!(result.nozzle_count(Some(0)), 2);
        assert_eq!(result.extruder_list(), vec![0, 1]);
        assert_eq!(result.used_extruders(&[3, 1, 0]), vec![0, 1]);

        let used: Vec<usize> = result.used_nozzles(&[0, 1, 2, 3], Some(0)).iter().map(|n| n.group_id).collect();
        assert_eq!(used, vec![0, 1]);
        assert_eq!(result.used_nozzles(&[0, 1, 2, 3], None).len(), 3);

        let list = result.extruder_nozzle_list();
        assert_eq!(list[&0], vec![0, 1]);
        assert_eq!(list[&1], vec![2]);
    }

    #[test]
    fn test_from_map_rejects_unknown_nozzle() {
        let nozzles = [NozzleInfo::new(0, 0)];
        assert_eq!(
            NozzleGroupResult::from_filament_nozzle_map(&[0, 3], &nozzles),
            Err(ToolOrderError::UnknownNozzle { filament: 1, nozzle: 3 })
        );
    }

    #[test]
    fn test_nozzle_info_serde_default_diameter() {
        let info: NozzleInfo = serde_json::from_str(r#"{ "extruder_id": 1, "group_id": 4 }"#).unwrap();
        assert_eq!(info, NozzleInfo::new(1, 4));
    }

    #[test]
    fn test_schedule_interleaves_by_rotation() {
        let result = two_extruder_result();
        let matrix = FlushMatrix::new(4, 10.0);
        let layers = vec![vec![0, 1, 2, 3], vec![3, 0], vec![2]];
        let schedule = NozzleGroupScheduler::new(&ToolOrderingConfig::default())
            .schedule(&[0, 1, 2, 3], &result, &layers, &[matrix], &NoCustomSequence)
            .unwrap();

        // Layer 0: extruder 0 (group 0 then group 1), then extruder 1.
        let layer0 = &schedule.filament_sequences[0];
        assert_eq!(layer0.len(), 4);
        assert_eq!(&layer0[2..], &[2, 3]);
        // Extruder 1 printed last, so it leads layer 1.
        assert_eq!(schedule.filament_sequences[1], vec![3, 0]);
        assert_eq!(schedule.filament_sequences[2], vec![2]);

        // Only nozzle group 0 ever switches filament (0 <-> 1).
        assert_eq!(schedule.nozzle_costs[&1], 0.0);
        assert_eq!(schedule.nozzle_costs[&2], 0.0);
        assert_eq!(schedule.total_cost, schedule.nozzle_costs[&0]);
    }

    #[test]
    fn test_layer_filament_without_nozzle_fails() {
        let result = NozzleGroupResult::new([(0, NozzleInfo::new(0, 0))]);
        let err = NozzleGroupScheduler::new(&ToolOrderingConfig::default())
            .schedule(&[0, 1], &result, &[vec![0, 1]], &[FlushMatrix::new(2, 1.0)], &NoCustomSequence)
            .unwrap_err();
        assert_eq!(err, ToolOrderError::MissingNozzle(1));
    }

    #[test]
    fn test_unused_filament_without_nozzle_is_skipped() {
        let result = NozzleGroupResult::new([(0, NozzleInfo::new(0, 0))]);
        let schedule = NozzleGroupScheduler::new(&ToolOrderingConfig::default())
            .schedule(&[0, 1], &result, &[vec![0]], &[FlushMatrix::new(2, 1.0)], &NoCustomSequence)
            .unwrap();
        assert_eq!(schedule.filament_sequences, vec![vec![0]]);
    }

    #[test]
    fn test_override_sets_rotation_start() {
        let result = two_extruder_result();
        let layers = vec![vec![2, 3], vec![2, 3]];
        let source = |layer: usize| -> Option<Vec<FilamentId>> { (layer == 0).then(|| vec![2, 3]) };
        let config = ToolOrderingConfig {
            parallel_groups: true,
            ..ToolOrderingConfig::default()
        };
        let schedule = NozzleGroupScheduler::new(&config)
            .schedule(&[0, 1, 2, 3], &result, &layers, &[FlushMatrix::new(4, 1.0)], &source)
            .unwrap();

        assert_eq!(schedule.filament_sequences[0], vec![2, 3]);
        // Extruder 1 ended the custom layer and leads the next one.
        assert_eq!(schedule.filament_sequences[1], vec![3, 2]);
    }
}
