//! The five ranking strategies.
//!
//! A strategy turns a candidate into a multiplier on its base compatibility.
//! They are a closed set, so dispatch is a `match` on the enum.

use crate::track::Track;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStrategy {
    /// Rank on compatibility alone.
    #[default]
    HarmonicFlow,
    /// Chase a build, peak and cool-down energy curve.
    EnergyArc,
    /// Favour tracks that have rarely been used.
    Discovery,
    /// Strongly prefer the current groove.
    GrooveLock,
    /// Reward energy jumps and a change of spectral balance.
    Contrast,
}

impl SuggestionStrategy {
    pub const ALL: [Self; 5] = [
        Self::HarmonicFlow,
        Self::EnergyArc,
        Self::Discovery,
        Self::GrooveLock,
        Self::Contrast,
    ];
}

/// Per-query facts a strategy may look at beyond the two tracks.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StrategyContext {
    /// Tracks already played.
    pub position: usize,
    pub estimated_set_length: usize,
    pub times_used: u32,
}

/// Target energy at a point in the set.
///
/// Ramps 0.5 to 0.65 over the first 30%, climbs 0.79 to 0.91 through the
/// middle, and falls 0.9 to 0.45 over the last 30%.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn energy_arc_target(position: usize, estimated_set_length: usize) -> f64 {
    let progress = (position as f64 / estimated_set_length.max(1) as f64).min(1.0);
    let target = if progress < 0.3 {
        0.5 + progress * 0.5
    } else if progress < 0.7 {
        0.7 + progress * 0.3
    } else {
        0.9 - (progress - 0.7) * 1.5
    };
    target.clamp(0.0, 1.0)
}

#[must_use]
pub fn energy_arc_modifier(candidate: &Track, context: &StrategyContext) -> f64 {
    if context.estimated_set_length == 0 {
        return 1.0;
    }
    let target = energy_arc_target(context.position, context.estimated_set_length);
    0.5 + 0.5 * (1.0 - (candidate.energy() - target).abs())
}

#[must_use]
pub fn discovery_modifier(times_used: u32) -> f64 {
    match times_used {
        0 => 1.3,
        1 | 2 => 1.15,
        _ => 1.0,
    }
}

#[must_use]
pub fn groove_lock_modifier(candidate: &Track, current: &Track) -> f64 {
    if candidate.groove == current.groove {
        1.2
    } else {
        0.6
    }
}

#[must_use]
pub fn contrast_modifier(candidate: &Track, current: &Track) -> f64 {
    let mut modifier = 1.0;
    if (candidate.energy() - current.energy()).abs() > 0.3 {
        modifier *= 1.2;
    }
    if candidate.frequency != current.frequency {
        modifier *= 1.1;
    }
    modifier
}

impl SuggestionStrategy {
    /// Multiplier for `candidate` following `current`.
    #[must_use]
    pub fn modifier(self, candidate: &Track, current: &Track, context: &StrategyContext) -> f64 {
        match self {
            Self::HarmonicFlow => 1.0,
            Self::EnergyArc => energy_arc_modifier(candidate, context),
            Self::Discovery => discovery_modifier(context.times_used),
            Self::GrooveLock => groove_lock_modifier(candidate, current),
            Self::Contrast => contrast_modifier(candidate, current),
        }
    }
}
