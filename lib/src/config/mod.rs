//! Configuration for tool ordering.
//!
//! [`ToolOrderingConfig`] holds the solver size ceilings, the parallelism
//! toggle, and the user-fixed print sequences as a slicer front end stores
//! them (1-based filament numbers, 1-based inclusive layer ranges).
//!
//! ## Example
//!
//! ```rust
//! use sequencer::config::ToolOrderingConfig;
//! use sequencer::tool_ordering::CustomSequenceSource;
//!
//! let config = ToolOrderingConfig::from_json_str(
//!     r#"{ "other_layers_print_sequences": [
//!            { "first_layer": 2, "last_layer": 10, "sequence": [2, 1] }
//!        ] }"#,
//! )?;
//! let overrides = config.print_sequence_overrides();
//! assert_eq!(overrides.custom_sequence(1), Some(vec![1, 0]));
//! assert_eq!(overrides.custom_sequence(0), None);
//! # Ok::<(), sequencer::config::ConfigError>(())
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::tool_ordering::{
    CustomSequenceSource, FilamentId, StrategyLimits, MAX_EXACT_FILAMENTS,
    MAX_LOOKAHEAD_FILAMENTS,
};

/// Error type for configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A fixed print sequence for an inclusive range of 1-based layers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayerRangeSequence {
    pub first_layer: u32,
    pub last_layer: u32,
    /// 1-based filament numbers in print order.
    pub sequence: Vec<u32>,
}

impl LayerRangeSequence {
    pub fn new(first_layer: u32, last_layer: u32, sequence: Vec<u32>) -> Self {
        Self {
            first_layer,
            last_layer,
            sequence,
        }
    }

    fn contains(&self, layer_num: u32) -> bool {
        layer_num >= self.first_layer && layer_num <= self.last_layer
    }
}

/// Tool ordering configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolOrderingConfig {
    /// Largest layer ordered with the exact subset DP. 0 sends every
    /// layer the lookahead does not take to the greedy heuristic.
    pub max_exact_filaments: usize,

    /// Largest current/next layer pair ordered with the lookahead search.
    /// 0 disables the lookahead.
    pub max_lookahead_filaments: usize,

    /// Solve independent groups on the rayon thread pool.
    pub parallel_groups: bool,

    /// Print sequence for the first layer (1-based filament numbers).
    pub first_layer_print_sequence: Vec<u32>,

    /// Print sequences for other layer ranges. Later entries win.
    pub other_layers_print_sequences: Vec<LayerRangeSequence>,
}

impl Default for ToolOrderingConfig {
    fn default() -> Self {
        let limits = StrategyLimits::default();
        Self {
            max_exact_filaments: limits.max_exact_filaments,
            max_lookahead_filaments: limits.max_lookahead_filaments,
            parallel_groups: false,
            first_layer_print_sequence: Vec::new(),
            other_layers_print_sequences: Vec::new(),
        }
    }
}

impl ToolOrderingConfig {
    /// Load a configuration from a JSON file.
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_json_str(&content)
    }

    /// Parse a configuration from a JSON string.
    pub fn from_json_str(json: &str) -> ConfigResult<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> ConfigResult<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> ConfigResult<()> {
        if self.max_exact_filaments > MAX_EXACT_FILAMENTS {
            return Err(ConfigError::Invalid(format!(
                "max_exact_filaments must be at most {MAX_EXACT_FILAMENTS}, got {}",
                self.max_exact_filaments
            )));
        }
        if self.max_lookahead_filaments > MAX_LOOKAHEAD_FILAMENTS {
            return Err(ConfigError::Invalid(format!(
                "max_lookahead_filaments must be at most {MAX_LOOKAHEAD_FILAMENTS}, got {}",
                self.max_lookahead_filaments
            )));
        }
        if self.first_layer_print_sequence.contains(&0) {
            return Err(ConfigError::Invalid(
                "first_layer_print_sequence uses 1-based filament numbers".to_string(),
            ));
        }
        for range in &self.other_layers_print_sequences {
            if range.first_layer == 0 || range.first_layer > range.last_layer {
                return Err(ConfigError::Invalid(format!(
                    "layer range {}..={} is empty or not 1-based",
                    range.first_layer, range.last_layer
                )));
            }
            if range.sequence.contains(&0) {
                return Err(ConfigError::Invalid(format!(
                    "sequence for layers {}..={} uses 1-based filament numbers",
                    range.first_layer, range.last_layer
                )));
            }
        }
        Ok(())
    }

    pub fn limits(&self) -> StrategyLimits {
        StrategyLimits {
            max_exact_filaments: self.max_exact_filaments,
            max_lookahead_filaments: self.max_lookahead_filaments,
        }
    }

    /// Custom sequence source backed by the configured print sequences.
    pub fn print_sequence_overrides(&self) -> PrintSequenceOverrides {
        PrintSequenceOverrides {
            first_layer: self.first_layer_print_sequence.clone(),
            ranges: self.other_layers_print_sequences.clone(),
        }
    }
}

/// Configured print sequences, answering per 0-based layer index with
/// 0-based filament ids.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PrintSequenceOverrides {
    first_layer: Vec<u32>,
    ranges: Vec<LayerRangeSequence>,
}

impl PrintSequenceOverrides {
    fn sequence_for_layer(&self, layer_idx: usize) -> Option<&[u32]> {
        if layer_idx == 0 && !self.first_layer.is_empty() {
            return Some(&self.first_layer);
        }

        let layer_num = u32::try_from(layer_idx + 1).ok()?;
        self.ranges
            .iter()
            .rev()
            .find(|range| range.contains(layer_num))
            .map(|range| range.sequence.as_slice())
    }
}

impl CustomSequenceSource for PrintSequenceOverrides {
    fn custom_sequence(&self, layer: usize) -> Option<Vec<FilamentId>> {
        self.sequence_for_layer(layer)
            .map(|sequence| sequence.iter().filter(|&&f| f > 0).map(|&f| f - 1).collect())
    }
}
