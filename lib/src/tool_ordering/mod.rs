//! Tool Ordering Module for Multi-Material Flush Minimization
//!
//! Decides, for every layer of a print, the order in which filaments are
//! loaded into each feed path and (on multi-nozzle hardware) which nozzle
//! holds which filament, so that the total purge volume is minimized.
//!
//! ## Key Concepts
//!
//! - **Flush Volume**: material purged when switching from one filament to
//!   another, looked up in an asymmetric [`FlushMatrix`]
//! - **Logical Group**: filaments sharing one feed path (one extruder);
//!   printers have one or two
//! - **Custom Sequence**: a user-fixed per-layer order that is never
//!   reordered, only filtered and accounted for
//!
//! ## Algorithm Overview
//!
//! 1. Validate layer sets and resolve custom sequences for every layer
//! 2. For every logical group, walk the layers in order and pick each
//!    layer's order with [`order_filaments`] (exact DP, one-layer
//!    lookahead, or greedy, chosen by problem size), memoizing results
//! 3. Merge the per-group orders into one sequence per layer, keeping the
//!    group that finished the previous layer first
//! 4. For multi-nozzle groups, assign filaments to nozzles per layer with a
//!    min-cost matching instead of a single-path order

mod flush_matrix;
mod multi_group;
mod multi_nozzle;
mod nozzle_groups;
mod sequencer;
mod solver;
pub mod stats;

use thiserror::Error;

use crate::flow::MatchingError;

pub use flush_matrix::{calculate_flush_volume, FlushMatrix};
pub use multi_group::{FilamentGrouping, GroupId, MultiGroupScheduler, ScheduleResult, MAX_GROUPS};
pub use multi_nozzle::{
    LayerAssignment, MultiNozzleAssignmentScheduler, MultiNozzleSchedule, NozzleAssigner,
    NozzleMatch,
};
pub use nozzle_groups::{NozzleGroupResult, NozzleGroupSchedule, NozzleGroupScheduler, NozzleInfo};
pub use sequencer::{
    CustomSequenceSource, CustomSequences, FilamentMask, GroupSchedule, LayerSequencer,
    NoCustomSequence, OrderingCacheKey,
};
pub use solver::{
    generate_all_orderings, next_permutation, order_filaments, LayerOrder, OrderStrategy,
    StrategyLimits, MAX_EXACT_FILAMENTS, MAX_LOOKAHEAD_FILAMENTS,
};
pub use stats::FilamentChangeStats;

/// Stable 0-based filament identifier.
pub type FilamentId = u32;

/// Filament ids must stay below this bound (cache keys are 64-bit masks).
pub const MAX_FILAMENTS: usize = 64;

/// Tool ordering errors.
///
/// Every variant reports malformed input from upstream; none of them is
/// recoverable by retrying.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ToolOrderError {
    #[error("filament {filament} exceeds the supported maximum of {max} filaments")]
    FilamentOutOfRange { filament: FilamentId, max: usize },

    #[error("layer {layer} lists filament {filament} more than once")]
    DuplicateFilament { layer: usize, filament: FilamentId },

    #[error("layer {layer} uses filament {filament}, which has no group assignment")]
    UnknownFilament { layer: usize, filament: FilamentId },

    #[error("filament {filament} is mapped to group {group}; only groups 0 and 1 exist")]
    InvalidGroup { filament: FilamentId, group: usize },

    #[error("group {0} does not exist; only groups 0 and 1 exist")]
    UnknownGroup(usize),

    #[error("{filaments} filaments but {groups} group entries")]
    GroupingLengthMismatch { filaments: usize, groups: usize },

    #[error("no flush matrix supplied for group {0}")]
    MissingFlushMatrix(usize),

    #[error("flush matrix of size {size} cannot price filament {filament}")]
    FlushMatrixTooSmall { size: usize, filament: FilamentId },

    #[error("flush matrix row {row} has {len} entries, expected {size}")]
    NonSquareFlushMatrix { row: usize, len: usize, size: usize },

    /// The filtered custom sequence is not a permutation of the layer set.
    #[error("custom sequence for layer {layer} covers {actual} of {expected} required filaments")]
    CustomSequenceMismatch {
        layer: usize,
        expected: usize,
        actual: usize,
    },

    #[error("a multi-nozzle group needs at least one nozzle")]
    NoNozzles,

    #[error("nozzle assignment for layer {layer} made no progress")]
    NozzleAssignmentStalled { layer: usize },

    #[error("filament {0} has no nozzle assignment")]
    MissingNozzle(FilamentId),

    #[error("filament {filament} refers to nozzle {nozzle}, which does not exist")]
    UnknownNozzle { filament: FilamentId, nozzle: usize },

    #[error(transparent)]
    Matching(#[from] MatchingError),
}

/// Result type for tool ordering operations.
pub type ToolOrderResult<T> = Result<T, ToolOrderError>;

/// Check the structural invariants of per-layer filament sets.
pub fn validate_layer_filaments(layer_filaments: &[Vec<FilamentId>]) -> ToolOrderResult<()> {
    for (layer, filaments) in layer_filaments.iter().enumerate() {
        let mut seen = 0u64;
        for &filament in filaments {
            if filament as usize >= MAX_FILAMENTS {
                return Err(ToolOrderError::FilamentOutOfRange {
                    filament,
                    max: MAX_FILAMENTS,
                });
            }
            let bit = 1u64 << filament;
            if seen & bit != 0 {
                return Err(ToolOrderError::DuplicateFilament { layer, filament });
            }
            seen |= bit;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_layer_filaments() {
        assert!(validate_layer_filaments(&[vec![0, 3], vec![], vec![63]]).is_ok());

        assert_eq!(
            validate_layer_filaments(&[vec![1], vec![2, 4, 2]]),
            Err(ToolOrderError::DuplicateFilament { layer: 1, filament: 2 })
        );
        assert_eq!(
            validate_layer_filaments(&[vec![64]]),
            Err(ToolOrderError::FilamentOutOfRange { filament: 64, max: 64 })
        );
    }

    #[test]
    fn test_matching_error_converts() {
        let err: ToolOrderError = MatchingError::UnknownLeftNode(3).into();
        assert!(matches!(err, ToolOrderError::Matching(MatchingError::UnknownLeftNode(3))));
        assert_eq!(err.to_string(), "link limits reference left node 3, which does not exist");
    }
}
