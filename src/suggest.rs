//! # Suggestion Pipeline
//!
//! Ranks next-track candidates for the track that is playing now.
//!
//! 1. Pool: every known track not already in the history (nor the current one).
//! 2. Filters: tempo range, key lock, groove lock, excluded clusters.
//! 3. Base score: directional compatibility `current -> candidate`.
//! 4. Strategy modifier (see [`crate::strategy`]).
//! 5. Context modifier: penalties for repeating recent keys, clusters and grooves.
//! 6. Diversity bonus for leaving the recently played clusters.
//! 7. `final = base * strategy * context + bonus`, best first, truncated.
//!
//! Each component stays separate in [`SuggestionResult`] so a ranking can be
//! explained. [`SuggestionEngine::suggest`] has no side effects; usage is
//! recorded explicitly with [`SuggestionEngine::record_used`].

use crate::cluster::ClusterId;
use crate::edges::EdgeIndex;
use crate::error::{EngineError, Result};
use crate::scoring::{CompatibilityBreakdown, CompatibilityScorer, ScoringWeights};
use crate::state::{StateView, TrackStateTable};
use crate::strategy::{StrategyContext, SuggestionStrategy};
use crate::track::{Track, TrackId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;

/// Upper clamp on the final score. It is a ranking key, not a probability.
pub const MAX_FINAL_SCORE: f64 = 10.0;

/// Per-query ranking options.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SuggestionConfig {
    /// Renormalised before use.
    pub weights: ScoringWeights,
    pub strategy: SuggestionStrategy,
    pub bpm_min: Option<f64>,
    pub bpm_max: Option<f64>,
    pub key_lock: bool,
    pub groove_lock: bool,
    pub exclude_cluster_ids: BTreeSet<ClusterId>,
    pub num_suggestions: usize,
    pub diversity_bonus: f64,
    /// Set length the energy arc is stretched over.
    pub estimated_set_length: usize,
    /// Only rank tracks the edge index links from the current track.
    pub prune_with_edges: bool,
}

impl Default for SuggestionConfig {
    fn default() -> Self {
        Self {
            weights: ScoringWeights::default(),
            strategy: SuggestionStrategy::default(),
            bpm_min: None,
            bpm_max: None,
            key_lock: false,
            groove_lock: false,
            exclude_cluster_ids: BTreeSet::new(),
            num_suggestions: 8,
            diversity_bonus: 0.1,
            estimated_set_length: 20,
            prune_with_edges: false,
        }
    }
}

impl SuggestionConfig {
    /// # Errors
    ///
    /// [`EngineError::DegenerateWeights`] or [`EngineError::InvalidParameter`].
    pub fn validate(&self) -> Result<()> {
        self.weights.normalized()?;
        if let (Some(min), Some(max)) = (self.bpm_min, self.bpm_max) {
            if min > max {
                return Err(EngineError::invalid_parameter(format!(
                    "bpm_min {min} is above bpm_max {max}"
                )));
            }
        }
        if !self.diversity_bonus.is_finite() || self.diversity_bonus < 0.0 {
            return Err(EngineError::invalid_parameter(format!(
                "diversity_bonus must be non-negative, got {}",
                self.diversity_bonus
            )));
        }
        Ok(())
    }
}

/// One ranked candidate with every scoring component kept apart.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SuggestionResult {
    pub track_id: TrackId,
    pub final_score: f64,
    pub base_compatibility: f64,
    pub strategy_modifier: f64,
    pub context_modifier: f64,
    pub diversity_bonus: f64,
    pub breakdown: CompatibilityBreakdown,
}

/// Whether `candidate` survives the user filters.
#[must_use]
pub fn passes_filters(
    candidate: &Track,
    candidate_cluster: Option<ClusterId>,
    current: &Track,
    config: &SuggestionConfig,
) -> bool {
    if config.bpm_min.is_some_and(|min| candidate.bpm < min) {
        return false;
    }
    if config.bpm_max.is_some_and(|max| candidate.bpm > max) {
        return false;
    }
    if config.key_lock && !current.key.compatible_keys().contains(&candidate.key) {
        return false;
    }
    if config.groove_lock && candidate.groove != current.groove {
        return false;
    }
    !candidate_cluster.is_some_and(|cluster| config.exclude_cluster_ids.contains(&cluster))
}

fn recent_clusters(history: &[Track], view: &StateView<'_>) -> HashSet<ClusterId> {
    let skip = history.len().saturating_sub(3);
    history[skip..]
        .iter()
        .filter_map(|t| view.cluster_of(t.id))
        .collect()
}

/// Penalty multiplier for repeating what was just played.
#[must_use]
pub fn sequence_context_modifier(
    candidate: &Track,
    candidate_cluster: Option<ClusterId>,
    history: &[Track],
    view: &StateView<'_>,
) -> f64 {
    let mut modifier = 1.0;

    let last_two = &history[history.len().saturating_sub(2)..];
    if last_two.iter().any(|t| t.key == candidate.key) {
        modifier *= 0.8;
    }

    if candidate_cluster.is_some_and(|cluster| recent_clusters(history, view).contains(&cluster)) {
        modifier *= 0.85;
    }

    if history.len() >= 4 && history[history.len() - 4..].iter().all(|t| t.groove == candidate.groove) {
        modifier *= 0.9;
    }

    modifier
}

/// `bonus` when the candidate belongs to a cluster none of the last three tracks were in.
#[must_use]
pub fn diversity_bonus(
    candidate_cluster: Option<ClusterId>,
    history: &[Track],
    view: &StateView<'_>,
    bonus: f64,
) -> f64 {
    if bonus <= 0.0 || history.is_empty() {
        return 0.0;
    }
    match candidate_cluster {
        Some(cluster) if !recent_clusters(history, view).contains(&cluster) => bonus,
        _ => 0.0,
    }
}

/// Ranks candidates from a fixed library snapshot.
#[derive(Debug)]
pub struct SuggestionEngine {
    tracks: Vec<Track>,
    state: Arc<TrackStateTable>,
    edges: Option<Arc<EdgeIndex>>,
}

impl SuggestionEngine {
    #[must_use]
    pub fn new(tracks: Vec<Track>, state: Arc<TrackStateTable>) -> Self {
        Self { tracks, state, edges: None }
    }

    /// Use `edges` for candidate pruning when a query asks for it.
    #[must_use]
    pub fn with_edge_index(mut self, edges: Arc<EdgeIndex>) -> Self {
        self.edges = Some(edges);
        self
    }

    pub fn set_tracks(&mut self, tracks: Vec<Track>) {
        self.tracks = tracks;
    }

    #[must_use]
    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Rank next tracks after `current`. `history` is oldest first.
    ///
    /// An empty result is a normal outcome when the filters leave nothing.
    ///
    /// # Errors
    ///
    /// [`EngineError::DegenerateWeights`] or [`EngineError::InvalidParameter`]
    /// when `config` does not validate.
    pub fn suggest(
        &self,
        current: &Track,
        history: &[Track],
        config: &SuggestionConfig,
    ) -> Result<Vec<SuggestionResult>> {
        config.validate()?;
        let scorer = CompatibilityScorer::new(&config.weights)?;
        let view = self.state.view();

        let mut seen: HashSet<TrackId> = history.iter().map(|t| t.id).collect();
        seen.insert(current.id);

        let linked = self.linked_targets(current, config);

        let pool: Vec<(&Track, Option<ClusterId>)> = self
            .tracks
            .iter()
            .filter(|t| !seen.contains(&t.id))
            .filter(|t| linked.as_ref().map_or(true, |ids| ids.contains(&t.id)))
            .map(|t| (t, view.cluster_of(t.id)))
            .filter(|(t, cluster)| passes_filters(t, *cluster, current, config))
            .collect();

        if pool.is_empty() {
            log::debug!("no candidates left after filtering for {}", current.id);
            return Ok(Vec::new());
        }

        let mut results: Vec<SuggestionResult> = pool
            .par_iter()
            .map(|&(candidate, cluster)| {
                let breakdown = scorer.score(current, candidate);
                let context = StrategyContext {
                    position: history.len(),
                    estimated_set_length: config.estimated_set_length,
                    times_used: view.times_used(candidate.id),
                };
                let strategy_modifier = config.strategy.modifier(candidate, current, &context);
                let context_modifier = sequence_context_modifier(candidate, cluster, history, &view);
                let bonus = diversity_bonus(cluster, history, &view, config.diversity_bonus);
                let final_score = (breakdown.aggregate * strategy_modifier * context_modifier + bonus)
                    .clamp(0.0, MAX_FINAL_SCORE);

                SuggestionResult {
                    track_id: candidate.id,
                    final_score,
                    base_compatibility: breakdown.aggregate,
                    strategy_modifier,
                    context_modifier,
                    diversity_bonus: bonus,
                    breakdown,
                }
            })
            .collect();

        // Stable: ties keep pool order.
        results.sort_by(|a, b| b.final_score.partial_cmp(&a.final_score).unwrap_or(Ordering::Equal));
        results.truncate(config.num_suggestions);

        log::debug!(
            "ranked {} candidates for {} with {:?}, returning {}",
            pool.len(),
            current.id,
            config.strategy,
            results.len()
        );
        Ok(results)
    }

    /// Outgoing edge targets of `current`, when pruning is on and the index knows the track.
    fn linked_targets(&self, current: &Track, config: &SuggestionConfig) -> Option<HashSet<TrackId>> {
        if !config.prune_with_edges {
            return None;
        }
        let snapshot = self.edges.as_ref()?.snapshot();
        let targets: HashSet<TrackId> = snapshot.outgoing(current.id).iter().map(|e| e.target).collect();
        if targets.is_empty() {
            log::debug!("{} has no outgoing edges, ranking the full pool", current.id);
            return None;
        }
        Some(targets)
    }

    /// Count one use of `id`. Returns the new count.
    pub fn record_used(&self, id: TrackId) -> u32 {
        self.state.increment_usage(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{AudioFeatures, GrooveType};

    fn track(id: u64, bpm: f64, key: &str, energy: f64) -> Track {
        Track {
            id: TrackId(id),
            bpm,
            key: key.parse().unwrap(),
            features: AudioFeatures { energy, ..AudioFeatures::default() },
            ..Track::default()
        }
    }

    fn library() -> Vec<Track> {
        vec![
            track(1, 128.0, "8A", 0.8),
            track(2, 127.0, "9A", 0.75),
            track(3, 129.0, "7A", 0.7),
            track(4, 128.0, "8B", 0.8),
            track(5, 140.0, "2B", 0.3),
            track(6, 100.0, "11A", 0.5),
        ]
    }

    fn engine() -> SuggestionEngine {
        SuggestionEngine::new(library(), Arc::new(TrackStateTable::new()))
    }

    #[test]
    fn test_excludes_current_and_history() {
        let engine = engine();
        let lib = library();
        let results = engine
            .suggest(&lib[0], &[lib[1].clone()], &SuggestionConfig::default())
            .unwrap();
        assert!(results.iter().all(|r| r.track_id != TrackId(1) && r.track_id != TrackId(2)));
        assert_eq!(results.len(), 4);
    }

    #[test]
    fn test_results_sorted_and_truncated() {
        let engine = engine();
        let config = SuggestionConfig { num_suggestions: 2, ..SuggestionConfig::default() };
        let results = engine.suggest(&library()[0], &[], &config).unwrap();
        assert_eq!(results.len(), 2);
        assert!(results[0].final_score >= results[1].final_score);
    }

    #[test]
    fn test_bpm_and_key_filters() {
        let engine = engine();
        let config = SuggestionConfig {
            bpm_min: Some(125.0),
            bpm_max: Some(130.0),
            key_lock: true,
            ..SuggestionConfig::default()
        };
        let results = engine.suggest(&library()[0], &[], &config).unwrap();
        let ids: Vec<TrackId> = results.iter().map(|r| r.track_id).collect();
        assert_eq!(ids.len(), 3);
        assert!(!ids.contains(&TrackId(5)));
        assert!(!ids.contains(&TrackId(6)));
    }

    #[test]
    fn test_empty_pool_is_not_an_error() {
        let engine = engine();
        let config = SuggestionConfig { bpm_min: Some(200.0), ..SuggestionConfig::default() };
        assert!(engine.suggest(&library()[0], &[], &config).unwrap().is_empty());
    }

    #[test]
    fn test_degenerate_weights_fail() {
        let engine = engine();
        let config = SuggestionConfig {
            weights: ScoringWeights {
                harmonic: 0.0,
                tempo: 0.0,
                energy: 0.0,
                groove: 0.0,
                frequency: 0.0,
                mix_quality: 0.0,
            },
            ..SuggestionConfig::default()
        };
        assert_eq!(
            engine.suggest(&library()[0], &[], &config),
            Err(EngineError::DegenerateWeights)
        );
    }

    #[test]
    fn test_context_modifier_penalties() {
        let table = TrackStateTable::new();
        table.replace_clusters([(TrackId(10), Some(ClusterId(2))), (TrackId(13), Some(ClusterId(1)))]);
        let view = table.view();
        let history: Vec<Track> = (10..14).map(|i| track(i, 128.0, "5A", 0.5)).collect();

        let candidate = track(20, 128.0, "5A", 0.5);
        // key repeat, shared cluster, and four identical grooves
        let modifier = sequence_context_modifier(&candidate, Some(ClusterId(1)), &history, &view);
        assert!((modifier - 0.8 * 0.85 * 0.9).abs() < 1e-12);

        // Only the last three tracks count for clusters; the oldest one's cluster is no penalty.
        let modifier = sequence_context_modifier(&candidate, Some(ClusterId(2)), &history, &view);
        assert!((modifier - 0.8 * 0.9).abs() < 1e-12);

        let fresh = Track { groove: GrooveType::Breakbeat, ..track(21, 128.0, "1B", 0.5) };
        assert_eq!(sequence_context_modifier(&fresh, None, &history, &view), 1.0);
    }

    #[test]
    fn test_diversity_bonus_needs_new_cluster() {
        let table = TrackStateTable::new();
        table.replace_clusters([(TrackId(1), Some(ClusterId(0)))]);
        let view = table.view();
        let history = vec![track(1, 128.0, "8A", 0.5)];
        assert_eq!(diversity_bonus(Some(ClusterId(2)), &history, &view, 0.1), 0.1);
        assert_eq!(diversity_bonus(Some(ClusterId(0)), &history, &view, 0.1), 0.0);
        assert_eq!(diversity_bonus(None, &history, &view, 0.1), 0.0);
        assert_eq!(diversity_bonus(Some(ClusterId(2)), &[], &view, 0.1), 0.0);
    }

    #[test]
    fn test_record_used_feeds_discovery() {
        let engine = engine();
        let lib = library();
        assert_eq!(engine.record_used(TrackId(2)), 1);
        let config = SuggestionConfig { strategy: SuggestionStrategy::Discovery, ..SuggestionConfig::default() };
        let results = engine.suggest(&lib[0], &[], &config).unwrap();
        let used = results.iter().find(|r| r.track_id == TrackId(2)).unwrap();
        assert_eq!(used.strategy_modifier, 1.15);
    }

    #[test]
    fn test_excluded_clusters_are_dropped() {
        let state = Arc::new(TrackStateTable::new());
        state.replace_clusters([(TrackId(2), Some(ClusterId(7)))]);
        let engine = SuggestionEngine::new(library(), state);
        let config = SuggestionConfig {
            exclude_cluster_ids: BTreeSet::from([ClusterId(7)]),
            ..SuggestionConfig::default()
        };
        let results = engine.suggest(&library()[0], &[], &config).unwrap();
        assert!(results.iter().all(|r| r.track_id != TrackId(2)));
    }
}
