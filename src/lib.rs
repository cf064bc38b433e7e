//! Compatibility and ranking engine for DJ libraries.
//!
//! A library is modelled as a weighted, directed graph: every track is a node,
//! every good transition an edge. On top of that graph the engine groups
//! tracks into vibe islands, orders hand-picked sets and ranks what to play
//! next.
//!
//! Core modules:
//! - [`scoring`] - Directional six-factor compatibility between two tracks
//! - [`edges`] - Sparse edge index over a whole library
//! - [`cluster`] - Density-based vibe islands
//! - [`pathfinding`] - Greedy + 2-opt set ordering
//! - [`suggest`] - Next-track suggestion pipeline
//!
//! ### Supporting Modules
//!
//! - [`track`] - Track records, Camelot keys and validation
//! - [`state`] - Cluster assignments and usage counts keyed by track id
//! - [`strategy`] - The five ranking strategies
//! - [`set_builder`] - Energy-profile set generation
//! - [`jobs`] - Cancellation, progress and background jobs
//! - [`config`] - Engine configuration file
//! - [`cli`] / [`completion`] - Inspection binary definitions
//!
//! ## Quick Start Example
//!
//! ```
//! use std::sync::Arc;
//! use vibegraph::{
//!     CompatibilityScorer, PathPlanner, SuggestionConfig, SuggestionEngine, Track, TrackId,
//!     TrackStateTable,
//! };
//!
//! let tracks = vec![
//!     Track { id: TrackId(1), bpm: 128.0, key: "8A".parse()?, ..Track::default() },
//!     Track { id: TrackId(2), bpm: 127.0, key: "9A".parse()?, ..Track::default() },
//!     Track { id: TrackId(3), bpm: 126.0, key: "8B".parse()?, ..Track::default() },
//! ];
//!
//! // How well does track 1 flow into track 2?
//! let breakdown = CompatibilityScorer::default().score(&tracks[0], &tracks[1]);
//! assert_eq!(breakdown.harmonic, 0.85);
//!
//! // Best order for the three of them
//! let order = PathPlanner::default().order(&tracks, None, None)?;
//! assert_eq!(order.len(), 3);
//!
//! // What should follow track 1?
//! let engine = SuggestionEngine::new(tracks.clone(), Arc::new(TrackStateTable::new()));
//! let next = engine.suggest(&tracks[0], &[], &SuggestionConfig::default())?;
//! assert_eq!(next.len(), 2);
//! # Ok::<(), vibegraph::EngineError>(())
//! ```
//!
//! ## Background Work
//!
//! Edge building and clustering over thousands of tracks can take a while.
//! Both can run on a worker thread with cooperative cancellation:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use vibegraph::{CompatibilityScorer, EdgeConfig, EdgeIndex, Track};
//! # let library: Vec<Track> = Vec::new();
//! let index = Arc::new(EdgeIndex::new(CompatibilityScorer::default(), EdgeConfig::default())?);
//! let job = index.spawn_build(library, 0.3)?;
//! println!("{:.0}% scored", job.progress().fraction() * 100.0);
//! let edge_count = job.join()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! Readers always see a complete edge set: a rebuild is swapped in only once
//! it finishes, and a cancelled rebuild leaves the previous one in place.
//!
//! ## Error Handling
//!
//! Engine operations return [`Result`] with an [`EngineError`]. Empty
//! suggestion lists, unclustered tracks and below-threshold pairs are normal
//! results, not errors. The configuration layer and the binary use `anyhow`.
//!
//! ## Logging
//!
//! The engine logs through the `log` facade; the binary installs
//! `env_logger`, so `RUST_LOG=vibegraph=debug` shows phase boundaries and
//! progress, and `trace` shows every scored pair.

pub mod cli;
pub mod cluster;
pub mod completion;
pub mod config;
pub mod edges;
pub mod error;
pub mod jobs;
pub mod pathfinding;
pub mod scoring;
pub mod set_builder;
pub mod state;
pub mod strategy;
pub mod suggest;
pub mod track;

pub use cluster::{Cluster, ClusterConfig, ClusterEngine, ClusterId};
pub use config::EngineConfig;
pub use edges::{Edge, EdgeConfig, EdgeIndex, EdgeSet};
pub use error::{EngineError, Result};
pub use jobs::{BackgroundJob, CancelToken, JobControl, Progress};
pub use pathfinding::{total_compatibility, PathPlanner, PlannerConfig, SetPlan};
pub use scoring::{score, CompatibilityBreakdown, CompatibilityScorer, ScoringWeights};
pub use set_builder::{EnergyProfile, SetBuilder, SetBuilderConfig};
pub use state::{TrackState, TrackStateTable};
pub use strategy::SuggestionStrategy;
pub use suggest::{SuggestionConfig, SuggestionEngine, SuggestionResult};
pub use track::{CamelotKey, FrequencyWeight, GrooveType, Mode, Track, TrackId};
