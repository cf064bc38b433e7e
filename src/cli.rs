//! # Command-Line Interface Module
//!
//! Clap derive definitions for the `vibegraph` inspection binary. The binary
//! stands in for a track store: it reads a JSON array of track records and
//! runs one engine operation over it.
//!
//! ## Commands
//!
//! - `score`: Breakdown of one directed transition
//! - `edges`: Build the edge index and show the strongest links
//! - `cluster`: Group the library into vibe islands
//! - `order`: Plan the best order for a handful of tracks
//! - `suggest`: Rank next tracks after the current one
//! - `build-set`: Generate a set along an energy profile
//!
//! ## Examples
//!
//! ```bash
//! vibegraph --library tracks.json score 12 40
//! vibegraph --library tracks.json suggest 12 --history 3,7 --strategy energy-arc
//! vibegraph --library tracks.json build-set --minutes 90 --profile rollercoaster
//! ```

use crate::set_builder::EnergyProfile;
use crate::strategy::SuggestionStrategy;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

/// Shell types supported for completion generation
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug)]
#[allow(clippy::enum_variant_names)]
pub enum Shell {
    /// Bash shell
    Bash,
    /// Zsh shell
    Zsh,
    /// Fish shell
    Fish,
    /// PowerShell
    PowerShell,
    /// Elvish shell
    Elvish,
}

/// Ranking strategy names accepted on the command line.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum StrategyArg {
    HarmonicFlow,
    EnergyArc,
    Discovery,
    GrooveLock,
    Contrast,
}

impl From<StrategyArg> for SuggestionStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::HarmonicFlow => Self::HarmonicFlow,
            StrategyArg::EnergyArc => Self::EnergyArc,
            StrategyArg::Discovery => Self::Discovery,
            StrategyArg::GrooveLock => Self::GrooveLock,
            StrategyArg::Contrast => Self::Contrast,
        }
    }
}

/// Built-in energy profiles.
#[derive(Copy, Clone, PartialEq, Eq, ValueEnum, Debug)]
pub enum ProfileArg {
    WarmUpPeakCool,
    HighEnergy,
    ChillLounge,
    Rollercoaster,
}

impl From<ProfileArg> for EnergyProfile {
    fn from(arg: ProfileArg) -> Self {
        match arg {
            ProfileArg::WarmUpPeakCool => Self::WarmUpPeakCool,
            ProfileArg::HighEnergy => Self::HighEnergy,
            ProfileArg::ChillLounge => Self::ChillLounge,
            ProfileArg::Rollercoaster => Self::Rollercoaster,
        }
    }
}

/// Main application arguments structure.
#[derive(Parser, Debug)]
#[command(name = "vibegraph")]
#[command(about = "vibegraph: compatibility scoring, clustering and set planning for DJ libraries")]
#[command(version)]
pub struct Args {
    /// JSON file holding an array of analysed tracks
    #[arg(short, long, global = true, env = "VIBEGRAPH_LIBRARY", value_hint = clap::ValueHint::FilePath)]
    pub library: Option<PathBuf>,

    /// Engine configuration file (defaults to the platform config directory)
    #[arg(short, long, global = true, value_hint = clap::ValueHint::FilePath)]
    pub config: Option<PathBuf>,

    /// The subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// Enumeration of all available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Score the transition from one track into another
    ///
    /// Prints all six component scores and the weighted aggregate. The
    /// score is directional: `score A B` and `score B A` may differ.
    Score {
        /// Outgoing track id
        from: u64,
        /// Incoming track id
        to: u64,
    },

    /// Build the edge index over the whole library
    ///
    /// Pairs are pre-filtered on tempo (and optionally key) before scoring.
    /// Progress is logged at debug level (`RUST_LOG=debug`).
    Edges {
        /// Minimum aggregate score for an edge (defaults to the configured threshold)
        #[arg(long)]
        threshold: Option<f64>,

        /// How many of the strongest edges to print
        #[arg(long, default_value = "10")]
        top: usize,
    },

    /// Group the library into density-based clusters
    Cluster {
        /// Neighbourhood radius in cosine distance
        #[arg(long)]
        eps: Option<f64>,

        /// Minimum neighbourhood size for a core track
        #[arg(long)]
        min_size: Option<usize>,
    },

    /// Order a set of tracks for maximum transition quality
    ///
    /// Greedy construction followed by 2-opt refinement.
    Order {
        /// Track ids to order
        #[arg(required = true)]
        ids: Vec<u64>,

        /// Pin this track first
        #[arg(long)]
        start: Option<u64>,

        /// Pin this track last
        #[arg(long)]
        end: Option<u64>,
    },

    /// Suggest the next tracks after the current one
    Suggest {
        /// Currently playing track id
        current: u64,

        /// Previously played track ids, oldest first
        #[arg(long, value_delimiter = ',')]
        history: Vec<u64>,

        /// Ranking strategy
        #[arg(long, value_enum)]
        strategy: Option<StrategyArg>,

        /// Number of suggestions
        #[arg(short = 'n', long)]
        count: Option<usize>,

        /// Only harmonically compatible keys
        #[arg(long)]
        key_lock: bool,

        /// Only the current groove
        #[arg(long)]
        groove_lock: bool,

        /// Lowest tempo allowed
        #[arg(long)]
        bpm_min: Option<f64>,

        /// Highest tempo allowed
        #[arg(long)]
        bpm_max: Option<f64>,

        /// Cluster the library first so cluster-aware modifiers apply
        #[arg(long)]
        with_clusters: bool,
    },

    /// Generate a full set along an energy profile
    BuildSet {
        /// Target length in minutes
        #[arg(long)]
        minutes: Option<f64>,

        /// Energy curve to follow
        #[arg(long, value_enum)]
        profile: Option<ProfileArg>,

        /// Opening track id
        #[arg(long)]
        start: Option<u64>,
    },

    /// Generate shell completions
    ///
    /// Usage: vibegraph completion bash > ~/.local/share/bash-completion/completions/vibegraph
    Completion {
        /// Shell to generate completions for
        shell: Shell,
    },

    /// List track ids for completion (hidden command)
    #[command(hide = true)]
    CompleteTracks,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_suggest() {
        let args = Args::try_parse_from([
            "vibegraph", "--library", "lib.json", "suggest", "4", "--history", "1,2,3", "--strategy", "energy-arc",
            "--key-lock",
        ])
        .unwrap();
        match args.command {
            Command::Suggest { current, history, strategy, key_lock, .. } => {
                assert_eq!(current, 4);
                assert_eq!(history, vec![1, 2, 3]);
                assert_eq!(strategy, Some(StrategyArg::EnergyArc));
                assert!(key_lock);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_order_requires_ids() {
        assert!(Args::try_parse_from(["vibegraph", "order"]).is_err());
    }

    #[test]
    fn test_strategy_conversion() {
        assert_eq!(SuggestionStrategy::from(StrategyArg::Contrast), SuggestionStrategy::Contrast);
        assert_eq!(EnergyProfile::from(ProfileArg::ChillLounge), EnergyProfile::ChillLounge);
    }
}
