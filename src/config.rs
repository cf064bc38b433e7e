//! # Configuration Module
//!
//! Engine tunables, loaded from an optional JSON file. Every section and
//! every field has a default, so a partial file only overrides what it names.
//!
//! ## Location
//!
//! Without `--config`, the file is looked up in the platform config directory:
//! - Linux: `~/.config/vibegraph/engine.json`
//! - macOS: `~/Library/Application Support/vibegraph/engine.json`
//! - Windows: `%APPDATA%\vibegraph\engine.json`
//!
//! ## Example
//!
//! ```json
//! {
//!   "weights": { "harmonic": 0.4, "tempo": 0.3 },
//!   "edges": { "threshold": 0.45, "key_window": 2 },
//!   "clustering": { "eps": 0.4 },
//!   "suggestions": { "strategy": "energy_arc", "num_suggestions": 12 }
//! }
//! ```

use crate::cluster::ClusterConfig;
use crate::edges::EdgeConfig;
use crate::pathfinding::PlannerConfig;
use crate::scoring::ScoringWeights;
use crate::set_builder::SetBuilderConfig;
use crate::suggest::SuggestionConfig;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Returns the platform-appropriate configuration file path.
///
/// Creates the `vibegraph` directory under the system config directory if
/// it does not exist yet.
///
/// # Errors
///
/// Fails when the config directory cannot be determined or created.
///
/// # Examples
///
/// ```no_run
/// use vibegraph::config::default_config_path;
///
/// let path = default_config_path()?;
/// println!("Config location: {}", path.display());
/// # Ok::<(), anyhow::Error>(())
/// ```
pub fn default_config_path() -> Result<PathBuf> {
    let config_dir = dirs::config_dir().ok_or_else(|| {
        anyhow::anyhow!("Could not determine system config directory. Please pass --config explicitly.")
    })?;

    let app_dir = config_dir.join("vibegraph");
    fs::create_dir_all(&app_dir).with_context(|| {
        format!(
            "Failed to create vibegraph config directory at {}. Please check file permissions.",
            app_dir.display()
        )
    })?;

    Ok(app_dir.join("engine.json"))
}

/// All engine tunables, grouped by component.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Scoring weights for edge building, ordering and set generation.
    pub weights: ScoringWeights,
    pub edges: EdgeConfig,
    pub clustering: ClusterConfig,
    pub planner: PlannerConfig,
    /// Defaults for suggestion queries.
    pub suggestions: SuggestionConfig,
    pub set_builder: SetBuilderConfig,
}

impl EngineConfig {
    /// Read and validate a configuration file.
    ///
    /// # Errors
    ///
    /// Fails if the file cannot be read, is not valid JSON, or holds invalid values.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config
            .validate()
            .with_context(|| format!("Invalid configuration in {}", path.display()))?;
        log::debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Load `path` if given, else the default location; defaults when no file exists.
    ///
    /// An explicitly given path must exist.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::load`].
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }
        let default_path = default_config_path()?;
        if default_path.exists() {
            Self::load(&default_path)
        } else {
            log::debug!("no config at {}, using defaults", default_path.display());
            Ok(Self::default())
        }
    }

    /// Check every section.
    ///
    /// # Errors
    ///
    /// The first invalid value found.
    pub fn validate(&self) -> Result<()> {
        self.weights.normalized().context("weights")?;
        self.edges.validate().context("edges")?;
        self.clustering.validate().context("clustering")?;
        self.suggestions.validate().context("suggestions")?;
        self.set_builder.validate().context("set_builder")?;
        Ok(())
    }
}
