//! # Edge Index
//!
//! The sparse, directed compatibility graph over a library. Each track maps
//! to a short list of outgoing edges whose aggregate score reached the
//! threshold; everything below it is discarded rather than stored.
//!
//! ## Keeping O(n²) tractable
//!
//! Before a pair reaches the scorer it must pass cheap pre-filters:
//!
//! - tempo ratio within ±10% (half/double-time blends optionally allowed),
//! - optionally, wheel distance within a configured window.
//!
//! Surviving rows are scored in parallel with rayon, one source track per
//! batch, checking the cancellation token between batches.
//!
//! ## Publication
//!
//! Readers hold an `Arc<EdgeSet>` snapshot. Rebuilds compute into a fresh
//! set and swap it in under the write lock on success, so a reader sees
//! either the old graph or the new one, never a half-built one. User-authored
//! edges are carried across every rebuild regardless of their score.

use crate::error::{EngineError, Result};
use crate::jobs::{BackgroundJob, JobControl};
use crate::scoring::{CompatibilityBreakdown, CompatibilityScorer};
use crate::track::{Track, TrackId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock};

/// Pairs between progress log lines.
const PROGRESS_LOG_INTERVAL: usize = 100_000;

/// A directed edge `source -> target`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Edge {
    pub source: TrackId,
    pub target: TrackId,
    pub breakdown: CompatibilityBreakdown,
    pub user_authored: bool,
}

impl Edge {
    #[must_use]
    pub fn score(&self) -> f64 {
        self.breakdown.aggregate
    }
}

/// Edge construction tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EdgeConfig {
    /// Minimum aggregate score for a computed edge.
    pub threshold: f64,
    /// Largest tempo deviation (as a ratio) a pair may have before scoring.
    pub max_tempo_deviation: f64,
    /// Let half/double-time pairs through the tempo pre-filter.
    pub allow_half_double: bool,
    /// Skip pairs whose keys are further apart on the wheel than this.
    pub key_window: Option<u8>,
}

impl Default for EdgeConfig {
    fn default() -> Self {
        Self {
            threshold: 0.3,
            max_tempo_deviation: 0.10,
            allow_half_double: true,
            key_window: None,
        }
    }
}

impl EdgeConfig {
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a threshold outside `[0, 1]` or a negative deviation.
    pub fn validate(&self) -> Result<()> {
        validate_threshold(self.threshold)?;
        if !self.max_tempo_deviation.is_finite() || self.max_tempo_deviation < 0.0 {
            return Err(EngineError::invalid_parameter(format!(
                "max_tempo_deviation must be non-negative, got {}",
                self.max_tempo_deviation
            )));
        }
        Ok(())
    }

    /// Cheap test run before any pair is scored.
    #[must_use]
    pub fn passes_prefilter(&self, a: &Track, b: &Track) -> bool {
        let (low, high) = if a.bpm <= b.bpm { (a.bpm, b.bpm) } else { (b.bpm, a.bpm) };
        if low <= 0.0 {
            return false;
        }
        let ratio = high / low;
        let tempo_ok = ratio - 1.0 <= self.max_tempo_deviation
            || (self.allow_half_double && (1.95..=2.05).contains(&ratio));
        if !tempo_ok {
            return false;
        }
        self.key_window
            .map_or(true, |window| a.key.distance(b.key) <= window)
    }
}

fn validate_threshold(threshold: f64) -> Result<()> {
    if (0.0..=1.0).contains(&threshold) {
        Ok(())
    } else {
        Err(EngineError::invalid_parameter(format!(
            "edge threshold must be within [0, 1], got {threshold}"
        )))
    }
}

/// Adjacency map from a track to its outgoing edges.
///
/// Per ordered pair there is at most one computed edge and at most one
/// user-authored edge.
#[derive(Debug, Clone, Default)]
pub struct EdgeSet {
    outgoing: HashMap<TrackId, Vec<Edge>>,
}

impl EdgeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn find(&self, source: TrackId, target: TrackId, user_authored: bool) -> Option<&Edge> {
        self.outgoing
            .get(&source)?
            .iter()
            .find(|edge| edge.target == target && edge.user_authored == user_authored)
    }

    /// Insert a computed edge unless one already exists for the pair.
    pub fn insert_computed(&mut self, edge: Edge) -> bool {
        debug_assert!(!edge.user_authored);
        if self.find(edge.source, edge.target, false).is_some() {
            return false;
        }
        self.outgoing.entry(edge.source).or_default().push(edge);
        true
    }

    /// Insert or replace the user-authored edge for the pair.
    pub fn insert_user(&mut self, edge: Edge) {
        debug_assert!(edge.user_authored);
        let row = self.outgoing.entry(edge.source).or_default();
        row.retain(|existing| !(existing.target == edge.target && existing.user_authored));
        row.push(edge);
    }

    pub fn remove_user(&mut self, source: TrackId, target: TrackId) -> bool {
        let Some(row) = self.outgoing.get_mut(&source) else {
            return false;
        };
        let before = row.len();
        row.retain(|edge| !(edge.target == target && edge.user_authored));
        let removed = row.len() != before;
        if row.is_empty() {
            self.outgoing.remove(&source);
        }
        removed
    }

    #[must_use]
    pub fn computed_edge(&self, source: TrackId, target: TrackId) -> Option<&Edge> {
        self.find(source, target, false)
    }

    #[must_use]
    pub fn user_edge(&self, source: TrackId, target: TrackId) -> Option<&Edge> {
        self.find(source, target, true)
    }

    /// The user edge for a pair if present, else the computed one.
    #[must_use]
    pub fn edge(&self, source: TrackId, target: TrackId) -> Option<&Edge> {
        self.user_edge(source, target)
            .or_else(|| self.computed_edge(source, target))
    }

    #[must_use]
    pub fn has_computed(&self, source: TrackId, target: TrackId) -> bool {
        self.computed_edge(source, target).is_some()
    }

    #[must_use]
    pub fn outgoing(&self, source: TrackId) -> &[Edge] {
        self.outgoing.get(&source).map_or(&[], Vec::as_slice)
    }

    /// Up to `n` outgoing edges, best first.
    #[must_use]
    pub fn strongest(&self, source: TrackId, n: usize) -> Vec<&Edge> {
        let mut edges: Vec<&Edge> = self.outgoing(source).iter().collect();
        edges.sort_by(|a, b| {
            b.score()
                .partial_cmp(&a.score())
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.target.cmp(&b.target))
        });
        edges.truncate(n);
        edges
    }

    pub fn iter(&self) -> impl Iterator<Item = &Edge> {
        self.outgoing.values().flatten()
    }

    pub fn user_edges(&self) -> impl Iterator<Item = &Edge> {
        self.iter().filter(|edge| edge.user_authored)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.outgoing.values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.outgoing.is_empty()
    }

    #[must_use]
    pub fn computed_count(&self) -> usize {
        self.iter().filter(|edge| !edge.user_authored).count()
    }

    fn sort_rows(&mut self) {
        for row in self.outgoing.values_mut() {
            row.sort_by_key(|edge| (edge.target, edge.user_authored));
        }
    }
}

/// One source track and the tracks it may link to. Candidates are shared
/// between rows and pre-filtered lazily while the row is scored.
struct ScoringRow<'a> {
    source: &'a Track,
    candidates: &'a [&'a Track],
}

fn admissible_targets<'r, F>(row: &'r ScoringRow<'r>, admissible: &'r F) -> impl Iterator<Item = &'r Track> + 'r
where
    F: Fn(&Track, &Track) -> bool,
{
    let source = row.source;
    row.candidates
        .iter()
        .copied()
        .filter(move |&target| admissible(source, target))
}

/// Shared slot holding the current edge graph.
#[derive(Debug)]
pub struct EdgeIndex {
    scorer: CompatibilityScorer,
    config: EdgeConfig,
    current: RwLock<Arc<EdgeSet>>,
}

impl EdgeIndex {
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] when `config` does not validate.
    pub fn new(scorer: CompatibilityScorer, config: EdgeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            scorer,
            config,
            current: RwLock::new(Arc::new(EdgeSet::new())),
        })
    }

    #[must_use]
    pub fn config(&self) -> &EdgeConfig {
        &self.config
    }

    /// The published graph. Cheap; holds no lock after returning.
    #[must_use]
    pub fn snapshot(&self) -> Arc<EdgeSet> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.snapshot().len()
    }

    /// Score all admissible ordered pairs of `tracks` and replace the
    /// computed edges. User-authored edges survive. Returns the number of
    /// computed edges now published.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a bad threshold,
    /// [`EngineError::Cancelled`] if `control` was cancelled (the previous
    /// graph stays published).
    pub fn build(&self, tracks: &[Track], threshold: f64, control: &JobControl) -> Result<usize> {
        validate_threshold(threshold)?;
        log::debug!("building edge index over {} tracks", tracks.len());

        let candidates: Vec<&Track> = tracks.iter().collect();
        let rows: Vec<ScoringRow<'_>> = tracks
            .iter()
            .map(|source| ScoringRow { source, candidates: &candidates })
            .collect();
        let admissible =
            |source: &Track, target: &Track| source.id != target.id && self.config.passes_prefilter(source, target);

        let edges = self.score_rows(&rows, admissible, threshold, control)?;

        let mut fresh = EdgeSet::new();
        for edge in edges {
            fresh.insert_computed(edge);
        }
        let computed = fresh.computed_count();

        self.publish(|current| {
            for edge in current.user_edges() {
                fresh.insert_user(*edge);
            }
            fresh.sort_rows();
            fresh
        });

        log::info!("built {computed} edges over {} tracks", tracks.len());
        Ok(computed)
    }

    /// Score only pairs that touch a track in `new_tracks`: new against
    /// new and new against existing, in both directions. Pairs that already
    /// have a computed edge are never re-scored. Returns the added edges.
    ///
    /// # Errors
    ///
    /// Same as [`EdgeIndex::build`].
    pub fn extend(
        &self,
        new_tracks: &[Track],
        existing: &[Track],
        threshold: f64,
        control: &JobControl,
    ) -> Result<Vec<Edge>> {
        validate_threshold(threshold)?;
        let known = self.snapshot();
        let new_ids: HashSet<TrackId> = new_tracks.iter().map(|t| t.id).collect();
        let old_tracks: Vec<&Track> = existing.iter().filter(|t| !new_ids.contains(&t.id)).collect();
        let admissible = |source: &Track, target: &Track| {
            source.id != target.id
                && !known.has_computed(source.id, target.id)
                && self.config.passes_prefilter(source, target)
        };

        let new_refs: Vec<&Track> = new_tracks.iter().collect();
        let everyone: Vec<&Track> = new_refs.iter().chain(&old_tracks).copied().collect();
        let rows: Vec<ScoringRow<'_>> = new_tracks
            .iter()
            .map(|source| ScoringRow { source, candidates: &everyone })
            .chain(old_tracks.iter().map(|&source| ScoringRow { source, candidates: &new_refs }))
            .collect();

        let edges = self.score_rows(&rows, admissible, threshold, control)?;

        let mut added = Vec::with_capacity(edges.len());
        self.publish(|current| {
            let mut next = current.clone();
            for edge in edges {
                if next.insert_computed(edge) {
                    added.push(edge);
                }
            }
            next.sort_rows();
            next
        });

        log::info!(
            "extended edge index with {} edges for {} new tracks",
            added.len(),
            new_tracks.len()
        );
        Ok(added)
    }

    /// Pin a user-authored edge, scored for explanation but kept regardless of score.
    pub fn add_user_edge(&self, from: &Track, to: &Track) -> Edge {
        let edge = Edge {
            source: from.id,
            target: to.id,
            breakdown: self.scorer.score(from, to),
            user_authored: true,
        };
        self.publish(|current| {
            let mut next = current.clone();
            next.insert_user(edge);
            next
        });
        edge
    }

    pub fn remove_user_edge(&self, source: TrackId, target: TrackId) -> bool {
        let mut removed = false;
        self.publish(|current| {
            let mut next = current.clone();
            removed = next.remove_user(source, target);
            next
        });
        removed
    }

    /// Rebuild on a worker thread.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn the thread.
    pub fn spawn_build(
        self: &Arc<Self>,
        tracks: Vec<Track>,
        threshold: f64,
    ) -> std::io::Result<BackgroundJob<usize>> {
        let index = Arc::clone(self);
        BackgroundJob::spawn("edge-build", move |control| {
            index.build(&tracks, threshold, control).map_err(|err| {
                log::warn!("edge rebuild abandoned: {err}");
                err
            })
        })
    }

    /// Incremental extension on a worker thread.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn the thread.
    pub fn spawn_extend(
        self: &Arc<Self>,
        new_tracks: Vec<Track>,
        existing: Vec<Track>,
        threshold: f64,
    ) -> std::io::Result<BackgroundJob<Vec<Edge>>> {
        let index = Arc::clone(self);
        BackgroundJob::spawn("edge-extend", move |control| {
            index.extend(&new_tracks, &existing, threshold, control)
        })
    }

    /// Score every admissible `(row.source, candidate)` pair. A counting pass
    /// sizes the progress total first, so no per-row target list is ever stored.
    fn score_rows<F>(
        &self,
        rows: &[ScoringRow<'_>],
        admissible: F,
        threshold: f64,
        control: &JobControl,
    ) -> Result<Vec<Edge>>
    where
        F: Fn(&Track, &Track) -> bool + Sync,
    {
        let total: usize = rows
            .par_iter()
            .map(|row| admissible_targets(row, &admissible).count())
            .sum();
        control.progress.start(total);
        log::debug!("{total} candidate pairs after pre-filtering");

        let batches = rows
            .par_iter()
            .map(|row| {
                control.cancel.check()?;
                let mut scored = 0;
                let edges: Vec<Edge> = admissible_targets(row, &admissible)
                    .filter_map(|target| {
                        scored += 1;
                        let breakdown = self.scorer.score(row.source, target);
                        (breakdown.aggregate >= threshold).then_some(Edge {
                            source: row.source.id,
                            target: target.id,
                            breakdown,
                            user_authored: false,
                        })
                    })
                    .collect();

                let progress = control.progress.advance(scored);
                if progress.scored / PROGRESS_LOG_INTERVAL
                    != (progress.scored - scored) / PROGRESS_LOG_INTERVAL
                {
                    log::debug!("scored {}/{} pairs", progress.scored, progress.total);
                }
                Ok(edges)
            })
            .collect::<Result<Vec<Vec<Edge>>>>()?;

        control.cancel.check()?;
        Ok(batches.into_iter().flatten().collect())
    }

    /// Swap in the set produced by `next` while holding the write lock.
    fn publish<F>(&self, next: F)
    where
        F: FnOnce(&EdgeSet) -> EdgeSet,
    {
        let mut slot = self.current.write().unwrap_or_else(PoisonError::into_inner);
        let replacement = next(slot.as_ref());
        *slot = Arc::new(replacement);
    }
}
