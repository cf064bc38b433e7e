//! Energy-profile set generation.
//!
//! Builds a full set from a pool by walking an energy curve: each step picks
//! the unused track that best balances compatibility with the previous
//! track, closeness to the curve's target energy at that point of the set,
//! and a small key-distance bonus. Tempo jumps beyond `bpm_tolerance` are
//! avoided unless nothing else is left. Sets of four or more tracks are then
//! re-ordered by the [`PathPlanner`] with the opening track pinned.

use crate::error::{EngineError, Result};
use crate::pathfinding::{PathPlanner, PlannerConfig};
use crate::scoring::CompatibilityScorer;
use crate::track::{CamelotKey, Track, TrackId};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::HashSet;

const WARM_UP_PEAK_COOL: &[(f64, f64)] = &[(0.0, 0.4), (0.3, 0.65), (0.7, 0.9), (1.0, 0.5)];
const HIGH_ENERGY: &[(f64, f64)] = &[(0.0, 0.7), (0.5, 0.85), (1.0, 0.75)];
const CHILL_LOUNGE: &[(f64, f64)] = &[(0.0, 0.3), (0.5, 0.45), (1.0, 0.35)];
const ROLLERCOASTER: &[(f64, f64)] = &[(0.0, 0.4), (0.25, 0.9), (0.5, 0.5), (0.75, 0.85), (1.0, 0.4)];

/// Shape of the energy curve across the set.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnergyProfile {
    #[default]
    WarmUpPeakCool,
    HighEnergy,
    ChillLounge,
    Rollercoaster,
    /// `(position 0-1, energy 0-1)` control points in position order.
    Custom(Vec<(f64, f64)>),
}

impl EnergyProfile {
    /// Control points. An empty custom curve falls back to warm-up/peak/cool.
    #[must_use]
    pub fn points(&self) -> Cow<'_, [(f64, f64)]> {
        match self {
            Self::WarmUpPeakCool => Cow::Borrowed(WARM_UP_PEAK_COOL),
            Self::HighEnergy => Cow::Borrowed(HIGH_ENERGY),
            Self::ChillLounge => Cow::Borrowed(CHILL_LOUNGE),
            Self::Rollercoaster => Cow::Borrowed(ROLLERCOASTER),
            Self::Custom(points) if points.is_empty() => Cow::Borrowed(WARM_UP_PEAK_COOL),
            Self::Custom(points) => Cow::Borrowed(points.as_slice()),
        }
    }

    #[must_use]
    pub fn target_energy(&self, position: f64) -> f64 {
        interpolate(&self.points(), position)
    }
}

/// Piecewise-linear interpolation, flat beyond the first and last points.
#[must_use]
pub fn interpolate(curve: &[(f64, f64)], position: f64) -> f64 {
    let (Some(&(first_x, first_y)), Some(&(last_x, last_y))) = (curve.first(), curve.last()) else {
        return 0.5;
    };
    if position <= first_x {
        return first_y;
    }
    if position >= last_x {
        return last_y;
    }
    curve
        .windows(2)
        .find(|pair| pair[0].0 <= position && position <= pair[1].0)
        .map_or(last_y, |pair| {
            let ((x0, y0), (x1, y1)) = (pair[0], pair[1]);
            let t = if x1 > x0 { (position - x0) / (x1 - x0) } else { 0.0 };
            y0 + t * (y1 - y0)
        })
}

/// Wheel steps between keys, counting a change of mode as one extra step.
/// Parallel keys are one step apart.
#[must_use]
pub fn mixing_distance(a: CamelotKey, b: CamelotKey) -> u8 {
    let steps = a.distance(b);
    if a.mode() == b.mode() {
        steps
    } else {
        steps + 1
    }
}

fn key_bonus(a: CamelotKey, b: CamelotKey) -> f64 {
    match mixing_distance(a, b) {
        0 | 1 => 1.0,
        2 => 0.7,
        _ => 0.4,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetBuilderConfig {
    pub target_minutes: f64,
    /// Opening track; otherwise the track closest to the curve's starting energy.
    pub start: Option<TrackId>,
    pub profile: EnergyProfile,
    /// Largest tempo ratio deviation between consecutive tracks.
    pub bpm_tolerance: f64,
    /// Overlap subtracted per transition when accumulating set length.
    pub crossfade_seconds: f64,
    /// 2-opt sweep cap for the final refinement.
    pub refine_passes: usize,
}

impl Default for SetBuilderConfig {
    fn default() -> Self {
        Self {
            target_minutes: 60.0,
            start: None,
            profile: EnergyProfile::default(),
            bpm_tolerance: 0.06,
            crossfade_seconds: 8.0,
            refine_passes: 500,
        }
    }
}

impl SetBuilderConfig {
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a non-positive length or a negative tolerance.
    pub fn validate(&self) -> Result<()> {
        if !self.target_minutes.is_finite() || self.target_minutes <= 0.0 {
            return Err(EngineError::invalid_parameter(format!(
                "target_minutes must be positive, got {}",
                self.target_minutes
            )));
        }
        if !self.bpm_tolerance.is_finite() || self.bpm_tolerance < 0.0 {
            return Err(EngineError::invalid_parameter(format!(
                "bpm_tolerance must be non-negative, got {}",
                self.bpm_tolerance
            )));
        }
        if !self.crossfade_seconds.is_finite() || self.crossfade_seconds < 0.0 {
            return Err(EngineError::invalid_parameter("crossfade_seconds must be non-negative"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct GeneratedSet {
    pub tracks: Vec<Track>,
    /// Playing time with crossfades taken off.
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SetBuilder {
    scorer: CompatibilityScorer,
}

fn closest_energy<'a, I>(tracks: I, target: f64) -> Option<&'a Track>
where
    I: IntoIterator<Item = &'a Track>,
{
    let mut best: Option<(&Track, f64)> = None;
    for track in tracks {
        let gap = (track.energy() - target).abs();
        if best.map_or(true, |(_, best_gap)| gap < best_gap) {
            best = Some((track, gap));
        }
    }
    best.map(|(track, _)| track)
}

impl SetBuilder {
    #[must_use]
    pub fn new(scorer: CompatibilityScorer) -> Self {
        Self { scorer }
    }

    /// Generate a set from `pool`.
    ///
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a bad configuration,
    /// [`EngineError::InvalidConstraint`] when `config.start` is not in the pool.
    pub fn generate(&self, pool: &[Track], config: &SetBuilderConfig) -> Result<GeneratedSet> {
        config.validate()?;
        let curve = config.profile.points();

        let start = match config.start {
            Some(id) => Some(pool.iter().find(|t| t.id == id).ok_or_else(|| {
                EngineError::invalid_constraint(format!("start track {id} is not in the pool"))
            })?),
            None => closest_energy(pool, interpolate(&curve, 0.0)),
        };
        let Some(start) = start else {
            return Ok(GeneratedSet { tracks: Vec::new(), duration_seconds: 0.0 });
        };

        let target_seconds = config.target_minutes * 60.0;
        let mut sequence = vec![start];
        let mut used: HashSet<TrackId> = HashSet::from([start.id]);
        let mut duration = start.duration_seconds;

        while duration < target_seconds && used.len() < pool.len() {
            let current = sequence[sequence.len() - 1];
            let target_energy = interpolate(&curve, duration / target_seconds);
            let remaining = pool.iter().filter(|t| !used.contains(&t.id));

            let Some(next) = self
                .best_candidate(current, remaining.clone(), target_energy, config.bpm_tolerance)
                .or_else(|| closest_energy(remaining, target_energy))
            else {
                break;
            };

            used.insert(next.id);
            duration += next.duration_seconds - config.crossfade_seconds;
            sequence.push(next);
        }

        let mut tracks: Vec<Track> = sequence.into_iter().cloned().collect();
        if tracks.len() >= 4 {
            let planner = PathPlanner::new(
                self.scorer,
                PlannerConfig { max_passes: config.refine_passes },
            );
            let opener = tracks[0].clone();
            tracks = planner.order(&tracks, Some(&opener), None)?;
        }

        log::info!(
            "generated a {}-track set lasting {:.1} minutes",
            tracks.len(),
            duration / 60.0
        );
        Ok(GeneratedSet { tracks, duration_seconds: duration })
    }

    fn best_candidate<'a, I>(&self, current: &Track, candidates: I, target_energy: f64, bpm_tolerance: f64) -> Option<&'a Track>
    where
        I: Iterator<Item = &'a Track>,
    {
        let mut best: Option<(&Track, f64)> = None;
        for candidate in candidates {
            let ratio = current.bpm.max(candidate.bpm) / current.bpm.min(candidate.bpm);
            if (ratio - 1.0).abs() > bpm_tolerance {
                continue;
            }
            let compat = self.scorer.aggregate(current, candidate);
            let energy_fit = (1.0 - 2.0 * (candidate.energy() - target_energy).abs()).max(0.0);
            let score = 0.4 * compat + 0.4 * energy_fit + 0.2 * key_bonus(current.key, candidate.key);
            if best.map_or(true, |(_, best_score)| score > best_score) {
                best = Some((candidate, score));
            }
        }
        best.map(|(track, _)| track)
    }
}
