//! Directional compatibility scoring between two tracks.
//!
//! Six sub-scores, each in `[0, 1]`, combined by normalised weights:
//!
//! | Component | Default weight | Source |
//! |-----------|----------------|--------|
//! | harmonic  | 0.30 | Camelot wheel relationship, damped by key confidence |
//! | tempo     | 0.25 | BPM ratio bands with half/double-time detection |
//! | energy    | 0.15 | energy difference bands |
//! | groove    | 0.10 | symmetric groove table |
//! | frequency | 0.10 | symmetric frequency-balance table |
//! | mix       | 0.10 | `(mix_out(from) + mix_in(to)) / 2` |
//!
//! Scoring is pure and total for validated tracks. It is asymmetric because
//! the mix component reads the outgoing track's outro and the incoming
//! track's intro.

use crate::error::{EngineError, Result};
use crate::track::{CamelotKey, FrequencyWeight, GrooveType, Track};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Relative importance of each sub-score. Need not sum to one.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringWeights {
    pub harmonic: f64,
    pub tempo: f64,
    pub energy: f64,
    pub groove: f64,
    pub frequency: f64,
    pub mix_quality: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            harmonic: 0.30,
            tempo: 0.25,
            energy: 0.15,
            groove: 0.10,
            frequency: 0.10,
            mix_quality: 0.10,
        }
    }
}

impl ScoringWeights {
    fn as_array(&self) -> [f64; 6] {
        [
            self.harmonic,
            self.tempo,
            self.energy,
            self.groove,
            self.frequency,
            self.mix_quality,
        ]
    }

    /// Rescale the weights so they sum to one.
    ///
    /// # Errors
    ///
    /// [`EngineError::DegenerateWeights`] when any weight is negative or
    /// non-finite, or when they are all zero.
    pub fn normalized(&self) -> Result<Self> {
        let weights = self.as_array();
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::DegenerateWeights);
        }
        let total: f64 = weights.iter().sum();
        if total <= 0.0 {
            return Err(EngineError::DegenerateWeights);
        }
        Ok(Self {
            harmonic: self.harmonic / total,
            tempo: self.tempo / total,
            energy: self.energy / total,
            groove: self.groove / total,
            frequency: self.frequency / total,
            mix_quality: self.mix_quality / total,
        })
    }
}

/// Per-component scores for one directed transition.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CompatibilityBreakdown {
    pub harmonic: f64,
    pub tempo: f64,
    pub energy: f64,
    pub groove: f64,
    pub frequency: f64,
    pub mix_quality: f64,
    /// Weighted sum of the six components, in `[0, 1]`.
    pub aggregate: f64,
}

lazy_static::lazy_static! {
    /// Groove pairs listed once; lookups try both orderings.
    static ref GROOVE_TABLE: HashMap<(GrooveType, GrooveType), f64> = {
        use GrooveType::*;
        let mut table = HashMap::new();
        for groove in GrooveType::ALL {
            table.insert((groove, groove), 1.0);
        }
        table.insert((FourOnFloor, Straight), 0.7);
        table.insert((Breakbeat, Syncopated), 0.7);
        table.insert((Breakbeat, Complex), 0.6);
        table.insert((FourOnFloor, HalfTime), 0.5);
        table.insert((Straight, HalfTime), 0.5);
        table.insert((Syncopated, Complex), 0.5);
        table.insert((FourOnFloor, Breakbeat), 0.3);
        table.insert((FourOnFloor, Syncopated), 0.3);
        table.insert((HalfTime, Breakbeat), 0.3);
        table.insert((Straight, Syncopated), 0.3);
        table.insert((Straight, Breakbeat), 0.3);
        table.insert((FourOnFloor, Complex), 0.2);
        table.insert((HalfTime, Complex), 0.2);
        table.insert((HalfTime, Syncopated), 0.2);
        table.insert((Straight, Complex), 0.2);
        table
    };

    static ref FREQUENCY_TABLE: HashMap<(FrequencyWeight, FrequencyWeight), f64> = {
        use FrequencyWeight::*;
        let mut table = HashMap::new();
        for weight in FrequencyWeight::ALL {
            table.insert((weight, weight), 1.0);
        }
        table.insert((Balanced, BassHeavy), 0.7);
        table.insert((Balanced, Bright), 0.7);
        table.insert((Balanced, MidFocused), 0.7);
        table.insert((MidFocused, BassHeavy), 0.5);
        table.insert((MidFocused, Bright), 0.5);
        table.insert((BassHeavy, Bright), 0.3);
        table
    };
}

const GROOVE_FALLBACK: f64 = 0.3;
const FREQUENCY_FALLBACK: f64 = 0.5;

fn symmetric_lookup<K: Copy + Eq + std::hash::Hash>(
    table: &HashMap<(K, K), f64>,
    a: K,
    b: K,
    fallback: f64,
) -> f64 {
    table
        .get(&(a, b))
        .or_else(|| table.get(&(b, a)))
        .copied()
        .unwrap_or(fallback)
}

/// Camelot wheel compatibility.
///
/// Low-confidence key detection (below 0.7 on either side) scales the
/// result by the lower confidence.
///
/// ```
/// use vibegraph::scoring::harmonic_score;
///
/// let score = harmonic_score("12A".parse()?, "1A".parse()?, 1.0, 1.0);
/// assert_eq!(score, 0.85);
/// # Ok::<(), vibegraph::EngineError>(())
/// ```
#[must_use]
pub fn harmonic_score(a: CamelotKey, b: CamelotKey, conf_a: f64, conf_b: f64) -> f64 {
    let distance = a.distance(b);
    let same_mode = a.mode() == b.mode();

    let score = match (distance, same_mode) {
        (0, true) => 1.0,
        (0, false) => 0.80,
        (1, true) => 0.85,
        (1, false) => 0.40,
        (2, true) => 0.5,
        _ => 0.1,
    };

    let confidence = conf_a.min(conf_b);
    if confidence < 0.7 {
        score * confidence
    } else {
        score
    }
}

/// Tempo compatibility from the BPM ratio.
///
/// A ratio in `[1.95, 2.05]` is a half/double-time blend and scores 0.6
/// before the percentage bands are consulted. Unstable tempo on either side
/// then costs 20%.
#[must_use]
pub fn tempo_score(bpm_a: f64, bpm_b: f64, stability_a: f64, stability_b: f64) -> f64 {
    let (low, high) = if bpm_a <= bpm_b { (bpm_a, bpm_b) } else { (bpm_b, bpm_a) };

    let score = if low <= 0.0 {
        0.05
    } else {
        let ratio = high / low;
        if (1.95..=2.05).contains(&ratio) {
            0.6
        } else {
            match (ratio - 1.0).abs() {
                d if d <= 0.02 => 1.0,
                d if d <= 0.04 => 0.8,
                d if d <= 0.06 => 0.5,
                d if d <= 0.10 => 0.2,
                _ => 0.05,
            }
        }
    };

    if stability_a < 0.8 || stability_b < 0.8 {
        score * 0.8
    } else {
        score
    }
}

/// Energy similarity bands.
#[must_use]
pub fn energy_score(energy_a: f64, energy_b: f64) -> f64 {
    match (energy_a - energy_b).abs() {
        d if d <= 0.10 => 1.0,
        d if d <= 0.20 => 0.8,
        d if d <= 0.35 => 0.5,
        _ => 0.2,
    }
}

#[must_use]
pub fn groove_score(a: GrooveType, b: GrooveType) -> f64 {
    symmetric_lookup(&*GROOVE_TABLE, a, b, GROOVE_FALLBACK)
}

#[must_use]
pub fn frequency_score(a: FrequencyWeight, b: FrequencyWeight) -> f64 {
    symmetric_lookup(&*FREQUENCY_TABLE, a, b, FREQUENCY_FALLBACK)
}

/// Directional: the outgoing track's outro against the incoming track's intro.
#[inline]
#[must_use]
pub fn mix_quality_score(mix_out_from: f64, mix_in_to: f64) -> f64 {
    (mix_out_from + mix_in_to) / 2.0
}

/// Stateless scorer bound to a set of normalised weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompatibilityScorer {
    weights: ScoringWeights,
}

impl Default for CompatibilityScorer {
    fn default() -> Self {
        Self {
            // Defaults already sum to one.
            weights: ScoringWeights::default(),
        }
    }
}

impl CompatibilityScorer {
    /// Build a scorer, normalising `weights` once up front.
    ///
    /// # Errors
    ///
    /// [`EngineError::DegenerateWeights`] when the weights cannot be normalised.
    pub fn new(weights: &ScoringWeights) -> Result<Self> {
        Ok(Self {
            weights: weights.normalized()?,
        })
    }

    #[must_use]
    pub fn weights(&self) -> &ScoringWeights {
        &self.weights
    }

    /// Score the transition `from -> to`.
    ///
    /// ```
    /// use vibegraph::scoring::CompatibilityScorer;
    /// use vibegraph::track::{Track, TrackId};
    ///
    /// let a = Track { id: TrackId(1), bpm: 128.0, key: "8A".parse()?, ..Track::default() };
    /// let b = Track { id: TrackId(2), bpm: 127.0, key: "9A".parse()?, ..Track::default() };
    /// let breakdown = CompatibilityScorer::default().score(&a, &b);
    /// assert_eq!(breakdown.harmonic, 0.85);
    /// assert!((0.0..=1.0).contains(&breakdown.aggregate));
    /// # Ok::<(), vibegraph::EngineError>(())
    /// ```
    #[must_use]
    pub fn score(&self, from: &Track, to: &Track) -> CompatibilityBreakdown {
        let harmonic = harmonic_score(from.key, to.key, from.key_confidence, to.key_confidence);
        let tempo = tempo_score(from.bpm, to.bpm, from.bpm_stability, to.bpm_stability);
        let energy = energy_score(from.energy(), to.energy());
        let groove = groove_score(from.groove, to.groove);
        let frequency = frequency_score(from.frequency, to.frequency);
        let mix_quality = mix_quality_score(from.mix_out, to.mix_in);

        let w = &self.weights;
        let aggregate = (harmonic * w.harmonic
            + tempo * w.tempo
            + energy * w.energy
            + groove * w.groove
            + frequency * w.frequency
            + mix_quality * w.mix_quality)
            .clamp(0.0, 1.0);

        log::trace!(
            "score {} -> {}: h={harmonic:.2} t={tempo:.2} e={energy:.2} g={groove:.2} f={frequency:.2} m={mix_quality:.2} => {aggregate:.3}",
            from.id,
            to.id
        );

        CompatibilityBreakdown {
            harmonic,
            tempo,
            energy,
            groove,
            frequency,
            mix_quality,
            aggregate,
        }
    }

    /// Aggregate only.
    #[inline]
    #[must_use]
    pub fn aggregate(&self, from: &Track, to: &Track) -> f64 {
        self.score(from, to).aggregate
    }

    /// Score `from` against every candidate, preserving candidate order.
    #[must_use = "Iterator should be consumed to calculate scores"]
    pub fn score_all<'a>(
        &'a self,
        from: &'a Track,
        candidates: &'a [Track],
    ) -> impl Iterator<Item = (&'a Track, CompatibilityBreakdown)> + 'a {
        candidates
            .iter()
            .map(move |candidate| (candidate, self.score(from, candidate)))
    }
}

/// Score with the default weights.
#[must_use]
pub fn score(from: &Track, to: &Track) -> CompatibilityBreakdown {
    CompatibilityScorer::default().score(from, to)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{AudioFeatures, TrackId};

    fn key(raw: &str) -> CamelotKey {
        raw.parse().unwrap()
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_same_key_is_perfect_for_every_key() {
        for number in 1..=12 {
            for letter in ['A', 'B'] {
                let k = key(&format!("{number}{letter}"));
                assert_eq!(harmonic_score(k, k, 1.0, 1.0), 1.0);
            }
        }
    }

    #[test]
    fn test_harmonic_relationships() {
        assert_eq!(harmonic_score(key("8A"), key("8B"), 1.0, 1.0), 0.80);
        assert_eq!(harmonic_score(key("8A"), key("9A"), 1.0, 1.0), 0.85);
        assert_eq!(harmonic_score(key("8A"), key("9B"), 1.0, 1.0), 0.40);
        assert_eq!(harmonic_score(key("8A"), key("10A"), 1.0, 1.0), 0.5);
        assert_eq!(harmonic_score(key("8A"), key("10B"), 1.0, 1.0), 0.1);
        assert_eq!(harmonic_score(key("8A"), key("2A"), 1.0, 1.0), 0.1);
    }

    #[test]
    fn test_harmonic_wraps_around_wheel() {
        assert_eq!(
            harmonic_score(key("12A"), key("1A"), 1.0, 1.0),
            harmonic_score(key("1A"), key("2A"), 1.0, 1.0)
        );
        assert_eq!(harmonic_score(key("11B"), key("1B"), 1.0, 1.0), 0.5);
    }

    #[test]
    fn test_low_key_confidence_damps_score() {
        assert!(close(harmonic_score(key("8A"), key("8A"), 0.5, 0.9), 0.5));
        assert!(close(harmonic_score(key("8A"), key("9A"), 0.6, 0.65), 0.85 * 0.6));
        // 0.7 is not below the cutoff.
        assert_eq!(harmonic_score(key("8A"), key("8A"), 0.7, 0.7), 1.0);
    }

    #[test]
    fn test_tempo_bands() {
        assert_eq!(tempo_score(128.0, 127.0, 1.0, 1.0), 1.0);
        assert_eq!(tempo_score(128.0, 124.0, 1.0, 1.0), 0.8);
        assert_eq!(tempo_score(128.0, 121.5, 1.0, 1.0), 0.5);
        assert_eq!(tempo_score(128.0, 118.0, 1.0, 1.0), 0.2);
        assert_eq!(tempo_score(128.0, 100.0, 1.0, 1.0), 0.05);
    }

    #[test]
    fn test_half_and_double_time_override_bands() {
        assert_eq!(tempo_score(128.0, 64.0, 1.0, 1.0), 0.6);
        assert_eq!(tempo_score(128.0, 256.0, 1.0, 1.0), 0.6);
        assert_eq!(tempo_score(64.0, 126.0, 1.0, 1.0), 0.6);
    }

    #[test]
    fn test_stability_penalty_applies_after_ratio_classification() {
        assert!(close(tempo_score(128.0, 64.0, 0.5, 1.0), 0.6 * 0.8));
        assert!(close(tempo_score(128.0, 128.0, 1.0, 0.79), 0.8));
        assert_eq!(tempo_score(128.0, 128.0, 0.8, 0.8), 1.0);
    }

    #[test]
    fn test_energy_bands() {
        assert_eq!(energy_score(0.5, 0.6), 1.0);
        assert_eq!(energy_score(0.5, 0.68), 0.8);
        assert_eq!(energy_score(0.9, 0.6), 0.5);
        assert_eq!(energy_score(0.1, 0.9), 0.2);
    }

    #[test]
    fn test_tables_are_symmetric_with_fallbacks() {
        for a in GrooveType::ALL {
            for b in GrooveType::ALL {
                assert_eq!(groove_score(a, b), groove_score(b, a));
            }
        }
        assert_eq!(groove_score(GrooveType::Straight, GrooveType::FourOnFloor), 0.7);
        assert_eq!(groove_score(GrooveType::Breakbeat, GrooveType::HalfTime), 0.3);

        for a in FrequencyWeight::ALL {
            for b in FrequencyWeight::ALL {
                assert_eq!(frequency_score(a, b), frequency_score(b, a));
            }
        }
        assert_eq!(frequency_score(FrequencyWeight::Bright, FrequencyWeight::BassHeavy), 0.3);
    }

    #[test]
    fn test_mix_quality_is_directional() {
        let a = Track { id: TrackId(1), mix_in: 0.2, mix_out: 1.0, ..Track::default() };
        let b = Track { id: TrackId(2), mix_in: 1.0, mix_out: 0.2, ..Track::default() };
        let scorer = CompatibilityScorer::default();
        assert!(close(scorer.score(&a, &b).mix_quality, 1.0));
        assert!(close(scorer.score(&b, &a).mix_quality, 0.2));
        assert!(scorer.aggregate(&a, &b) > scorer.aggregate(&b, &a));
    }

    #[test]
    fn test_weights_normalise_and_reject_degenerate() {
        let doubled = ScoringWeights {
            harmonic: 0.6,
            tempo: 0.5,
            energy: 0.3,
            groove: 0.2,
            frequency: 0.2,
            mix_quality: 0.2,
        };
        let normalized = doubled.normalized().unwrap();
        assert!(close(normalized.as_array().iter().sum::<f64>(), 1.0));
        assert!(close(normalized.harmonic, 0.30));

        let zero = ScoringWeights {
            harmonic: 0.0,
            tempo: 0.0,
            energy: 0.0,
            groove: 0.0,
            frequency: 0.0,
            mix_quality: 0.0,
        };
        assert_eq!(CompatibilityScorer::new(&zero), Err(EngineError::DegenerateWeights));

        let negative = ScoringWeights { tempo: -1.0, ..ScoringWeights::default() };
        assert_eq!(negative.normalized(), Err(EngineError::DegenerateWeights));
    }

    #[test]
    fn test_single_component_weighting() {
        let harmonic_only = ScoringWeights {
            harmonic: 2.0,
            tempo: 0.0,
            energy: 0.0,
            groove: 0.0,
            frequency: 0.0,
            mix_quality: 0.0,
        };
        let scorer = CompatibilityScorer::new(&harmonic_only).unwrap();
        let a = Track { id: TrackId(1), key: key("8A"), ..Track::default() };
        let b = Track { id: TrackId(2), key: key("9A"), bpm: 60.0, ..Track::default() };
        assert!(close(scorer.aggregate(&a, &b), 0.85));
    }

    #[test]
    fn test_reference_transition() {
        let a = Track {
            id: TrackId(1),
            bpm: 128.0,
            bpm_stability: 0.97,
            key: key("8A"),
            key_confidence: 0.85,
            features: AudioFeatures { energy: 0.82, ..AudioFeatures::default() },
            groove: GrooveType::FourOnFloor,
            frequency: FrequencyWeight::BassHeavy,
            mix_in: 0.90,
            mix_out: 0.85,
            ..Track::default()
        };
        let b = Track {
            id: TrackId(2),
            bpm: 127.0,
            bpm_stability: 0.95,
            key: key("9A"),
            key_confidence: 0.90,
            features: AudioFeatures { energy: 0.70, ..AudioFeatures::default() },
            groove: GrooveType::FourOnFloor,
            frequency: FrequencyWeight::Balanced,
            mix_in: 0.85,
            mix_out: 0.80,
            ..Track::default()
        };
        let breakdown = score(&a, &b);
        assert_eq!(breakdown.harmonic, 0.85);
        assert_eq!(breakdown.tempo, 1.0);
        assert_eq!(breakdown.energy, 0.8);
        assert_eq!(breakdown.groove, 1.0);
        assert_eq!(breakdown.frequency, 0.7);
        assert!(close(breakdown.mix_quality, 0.85));
        assert!(close(breakdown.aggregate, 0.88));
    }

    #[test]
    fn test_score_all_preserves_order() {
        let from = Track { id: TrackId(1), ..Track::default() };
        let candidates: Vec<Track> = (2..6).map(|i| Track { id: TrackId(i), ..Track::default() }).collect();
        let scorer = CompatibilityScorer::default();
        let ids: Vec<TrackId> = scorer.score_all(&from, &candidates).map(|(t, _)| t.id).collect();
        assert_eq!(ids, vec![TrackId(2), TrackId(3), TrackId(4), TrackId(5)]);
    }
}
