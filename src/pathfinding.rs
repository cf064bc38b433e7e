//! Set ordering: greedy nearest-neighbour construction followed by 2-opt.
//!
//! The input is a hand-picked subset (tens of tracks), so every pairwise
//! score is computed once into a dense matrix and the objective is evaluated
//! exactly from it. The first track of the greedy seed never moves during
//! 2-opt; a pinned `end` never moves either.

use crate::error::{EngineError, Result};
use crate::scoring::CompatibilityScorer;
use crate::track::Track;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};

/// Smallest gain a reversal must bring to be accepted.
const IMPROVEMENT_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlannerConfig {
    /// Cap on full 2-opt sweeps.
    pub max_passes: usize,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self { max_passes: 1000 }
    }
}

/// An ordering plus how it was reached.
#[derive(Debug, Clone, PartialEq)]
pub struct SetPlan {
    pub order: Vec<Track>,
    /// Objective of the greedy seed.
    pub greedy_total: f64,
    /// Objective of `order`.
    pub total: f64,
    /// 2-opt sweeps performed.
    pub passes: usize,
    /// `false` when the sweep cap stopped the search before a local optimum.
    pub converged: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PathPlanner {
    scorer: CompatibilityScorer,
    config: PlannerConfig,
}

/// Dense `from x to` aggregate scores for a subset.
struct ScoreMatrix {
    n: usize,
    scores: Vec<f64>,
}

impl ScoreMatrix {
    fn new(scorer: &CompatibilityScorer, tracks: &[Track]) -> Self {
        let n = tracks.len();
        let scores = tracks
            .par_iter()
            .flat_map_iter(|from| tracks.iter().map(move |to| scorer.aggregate(from, to)))
            .collect();
        Self { n, scores }
    }

    #[inline]
    fn get(&self, from: usize, to: usize) -> f64 {
        self.scores[from * self.n + to]
    }

    fn total(&self, order: &[usize]) -> f64 {
        order.windows(2).map(|pair| self.get(pair[0], pair[1])).sum()
    }

    /// Exact change in the objective from reversing `order[i..=j]`.
    fn reversal_gain(&self, order: &[usize], i: usize, j: usize) -> f64 {
        let mut before = 0.0;
        let mut after = 0.0;
        if i > 0 {
            before += self.get(order[i - 1], order[i]);
            after += self.get(order[i - 1], order[j]);
        }
        if j + 1 < order.len() {
            before += self.get(order[j], order[j + 1]);
            after += self.get(order[i], order[j + 1]);
        }
        for k in i..j {
            before += self.get(order[k], order[k + 1]);
            after += self.get(order[k + 1], order[k]);
        }
        after - before
    }
}

impl PathPlanner {
    #[must_use]
    pub fn new(scorer: CompatibilityScorer, config: PlannerConfig) -> Self {
        Self { scorer, config }
    }

    /// Order `tracks` for maximum cumulative transition quality.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidConstraint`] when `start` or `end` is not in
    /// `tracks`, or when both name the same track in a set of two or more.
    pub fn order(&self, tracks: &[Track], start: Option<&Track>, end: Option<&Track>) -> Result<Vec<Track>> {
        self.plan(tracks, start, end).map(|plan| plan.order)
    }

    /// Like [`PathPlanner::order`] but also reports the objective before and after 2-opt.
    ///
    /// # Errors
    ///
    /// See [`PathPlanner::order`].
    pub fn plan(&self, tracks: &[Track], start: Option<&Track>, end: Option<&Track>) -> Result<SetPlan> {
        let position = |track: &Track, role: &str| {
            tracks
                .iter()
                .position(|t| t.id == track.id)
                .ok_or_else(|| EngineError::invalid_constraint(format!("{role} track {} is not in the set", track.id)))
        };
        let start_idx = start.map(|t| position(t, "start")).transpose()?;
        let end_idx = end.map(|t| position(t, "end")).transpose()?;

        if let (Some(s), Some(e)) = (start_idx, end_idx) {
            if s == e && tracks.len() > 1 {
                return Err(EngineError::invalid_constraint(
                    "start and end are the same track in a multi-track set",
                ));
            }
        }

        if tracks.is_empty() {
            return Ok(SetPlan {
                order: Vec::new(),
                greedy_total: 0.0,
                total: 0.0,
                passes: 0,
                converged: true,
            });
        }

        let matrix = ScoreMatrix::new(&self.scorer, tracks);
        let seed = greedy(&matrix, tracks, start_idx, end_idx);
        let greedy_total = matrix.total(&seed);

        let movable_end = if end_idx.is_some() { seed.len() - 1 } else { seed.len() };
        let (order, passes, converged) = two_opt(&matrix, seed, movable_end, self.config.max_passes);
        let total = matrix.total(&order);

        log::debug!(
            "planned {} tracks: greedy {greedy_total:.3} -> 2-opt {total:.3} after {passes} passes",
            tracks.len()
        );
        if !converged {
            log::debug!("2-opt stopped at the {}-pass cap", self.config.max_passes);
        }

        Ok(SetPlan {
            order: order.into_iter().map(|i| tracks[i].clone()).collect(),
            greedy_total,
            total,
            passes,
            converged,
        })
    }

    /// Sum of `score(order[i], order[i+1])` over adjacent pairs.
    #[must_use]
    pub fn total_compatibility(&self, order: &[Track]) -> f64 {
        order
            .windows(2)
            .map(|pair| self.scorer.aggregate(&pair[0], &pair[1]))
            .sum()
    }
}

/// Total compatibility under default weights.
#[must_use]
pub fn total_compatibility(order: &[Track]) -> f64 {
    PathPlanner::default().total_compatibility(order)
}

/// Index of the first maximum, so ties resolve by input order.
fn first_max_by<I, F>(candidates: I, mut key: F) -> Option<usize>
where
    I: IntoIterator<Item = usize>,
    F: FnMut(usize) -> f64,
{
    let mut best: Option<(usize, f64)> = None;
    for candidate in candidates {
        let value = key(candidate);
        if best.map_or(true, |(_, best_value)| value > best_value) {
            best = Some((candidate, value));
        }
    }
    best.map(|(index, _)| index)
}

fn greedy(matrix: &ScoreMatrix, tracks: &[Track], start: Option<usize>, end: Option<usize>) -> Vec<usize> {
    let mut remaining: Vec<usize> = (0..tracks.len()).filter(|&i| Some(i) != end).collect();
    let mut order = Vec::with_capacity(tracks.len());

    let first = start.or_else(|| first_max_by(remaining.iter().copied(), |i| tracks[i].energy()));
    if let Some(first) = first {
        remaining.retain(|&i| i != first);
        order.push(first);
    }

    while let Some(&current) = order.last() {
        let Some(next) = first_max_by(remaining.iter().copied(), |i| matrix.get(current, i)) else {
            break;
        };
        remaining.retain(|&i| i != next);
        order.push(next);
    }

    // A one-track set may name the same track as start and end.
    if let Some(end) = end.filter(|&e| Some(e) != start) {
        order.push(end);
    }
    order
}

/// Reverse sub-ranges of `order[1..movable_end]` while that strictly helps.
fn two_opt(matrix: &ScoreMatrix, mut order: Vec<usize>, movable_end: usize, max_passes: usize) -> (Vec<usize>, usize, bool) {
    if movable_end < 3 {
        return (order, 0, true);
    }
    let mut passes = 0;
    let mut improved = true;
    while improved && passes < max_passes {
        improved = false;
        for i in 1..movable_end - 1 {
            for j in i + 1..movable_end {
                if matrix.reversal_gain(&order, i, j) > IMPROVEMENT_EPSILON {
                    order[i..=j].reverse();
                    improved = true;
                }
            }
        }
        passes += 1;
    }
    (order, passes, !improved)
}
