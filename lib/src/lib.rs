//! Filament sequencing and nozzle assignment for multi-material FDM printing.
//!
//! Every filament switch purges material, and how much depends on the
//! (from, to) pair. This crate decides, layer by layer, the order in which
//! filaments are loaded and, on multi-nozzle hardware, which nozzle holds
//! which filament, so that the total purge volume of a print is minimized.
//!
//! ## Modules
//!
//! - [`flow`]: flow network substrate with max-flow and min-cost bipartite
//!   matchers
//! - [`tool_ordering`]: per-layer ordering strategies, the cross-layer
//!   sequencer and the multi-group / multi-nozzle schedulers
//! - [`config`]: serde-backed scheduler configuration
//! - [`disjoint_set`]: union-find used for co-usage statistics
//!
//! ## Example
//!
//! ```rust
//! use sequencer::config::ToolOrderingConfig;
//! use sequencer::tool_ordering::{FilamentGrouping, FlushMatrix, MultiGroupScheduler, NoCustomSequence};
//!
//! let grouping = FilamentGrouping::single_group(&[0, 1, 2])?;
//! let flush = FlushMatrix::new(3, 1.0);
//! let layers = vec![vec![0, 1, 2], vec![0, 2]];
//!
//! let result = MultiGroupScheduler::new(&ToolOrderingConfig::default())
//!     .schedule(&grouping, &layers, &[flush], &NoCustomSequence)?;
//! assert_eq!(result.filament_sequences, vec![vec![0, 1, 2], vec![2, 0]]);
//! assert_eq!(result.total_cost, 3.0);
//! # Ok::<(), sequencer::tool_ordering::ToolOrderError>(())
//! ```

pub mod config;
pub mod disjoint_set;
pub mod flow;
pub mod tool_ordering;

pub use config::{ConfigError, ConfigResult, ToolOrderingConfig};
pub use tool_ordering::{FilamentId, FlushMatrix, ToolOrderError, ToolOrderResult};
