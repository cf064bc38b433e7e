//! # Track Records
//!
//! The immutable analysis record the engine consumes. Tracks are produced by
//! an external analysis provider and handed over by the track store; the
//! engine never mutates them. Graph-assigned state (cluster membership and
//! usage counts) lives in [`crate::state::TrackStateTable`] instead.
//!
//! Malformed input is rejected here, once, by [`Track::validate`] and by
//! parsing keys into [`CamelotKey`]. Everything downstream assumes valid
//! tracks and never re-checks them.

use crate::error::{EngineError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable unique track handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Wheel mode: `A` is minor, `B` is major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Mode {
    Minor,
    Major,
}

impl Mode {
    #[must_use]
    pub const fn letter(self) -> char {
        match self {
            Self::Minor => 'A',
            Self::Major => 'B',
        }
    }

    #[must_use]
    pub const fn flipped(self) -> Self {
        match self {
            Self::Minor => Self::Major,
            Self::Major => Self::Minor,
        }
    }
}

/// A key on the 12-position Camelot wheel, e.g. `8A`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct CamelotKey {
    number: u8,
    mode: Mode,
}

impl CamelotKey {
    /// Build a key from its wheel position (1-12) and mode.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::MalformedKey`] when `number` is outside 1-12.
    pub fn new(number: u8, mode: Mode) -> Result<Self> {
        if !(1..=12).contains(&number) {
            return Err(EngineError::malformed_key(format!("{number}{}", mode.letter())));
        }
        Ok(Self { number, mode })
    }

    #[must_use]
    pub const fn number(self) -> u8 {
        self.number
    }

    #[must_use]
    pub const fn mode(self) -> Mode {
        self.mode
    }

    /// Circular distance between wheel positions, ignoring mode. `12` and `1` are 1 apart.
    #[must_use]
    pub fn distance(self, other: Self) -> u8 {
        let diff = self.number.abs_diff(other.number);
        diff.min(12 - diff)
    }

    /// Keys a DJ can mix into without a harmonic clash: same key, the two
    /// neighbours in the same mode, and the parallel key.
    #[must_use]
    pub fn compatible_keys(self) -> [Self; 4] {
        let up = self.number % 12 + 1;
        let down = (self.number + 10) % 12 + 1;
        [
            self,
            Self { number: up, mode: self.mode },
            Self { number: down, mode: self.mode },
            Self { number: self.number, mode: self.mode.flipped() },
        ]
    }

    #[must_use]
    pub fn is_compatible_with(self, other: Self) -> bool {
        self.compatible_keys().contains(&other)
    }
}

impl FromStr for CamelotKey {
    type Err = EngineError;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim().to_ascii_uppercase();
        if trimmed.len() < 2 || !trimmed.is_ascii() {
            return Err(EngineError::malformed_key(raw));
        }
        let (number, letter) = trimmed.split_at(trimmed.len() - 1);
        let mode = match letter {
            "A" => Mode::Minor,
            "B" => Mode::Major,
            _ => return Err(EngineError::malformed_key(raw)),
        };
        if number.starts_with('0') || !number.bytes().all(|b| b.is_ascii_digit()) {
            return Err(EngineError::malformed_key(raw));
        }
        let number: u8 = number.parse().map_err(|_| EngineError::malformed_key(raw))?;
        Self::new(number, mode).map_err(|_| EngineError::malformed_key(raw))
    }
}

impl TryFrom<String> for CamelotKey {
    type Error = EngineError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<CamelotKey> for String {
    fn from(key: CamelotKey) -> Self {
        key.to_string()
    }
}

impl fmt::Display for CamelotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.number, self.mode.letter())
    }
}

/// Rhythmic feel of a track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrooveType {
    FourOnFloor,
    Straight,
    HalfTime,
    Breakbeat,
    Syncopated,
    Complex,
}

impl GrooveType {
    pub const ALL: [Self; 6] = [
        Self::FourOnFloor,
        Self::Straight,
        Self::HalfTime,
        Self::Breakbeat,
        Self::Syncopated,
        Self::Complex,
    ];

    /// Ordinal position on the regular-to-irregular axis, used as a clustering feature.
    #[must_use]
    pub const fn ordinal(self) -> f64 {
        match self {
            Self::FourOnFloor => 0.0,
            Self::Straight => 0.17,
            Self::HalfTime => 0.33,
            Self::Breakbeat => 0.50,
            Self::Syncopated => 0.67,
            Self::Complex => 0.83,
        }
    }

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::FourOnFloor => "Four On Floor",
            Self::Straight => "Straight",
            Self::HalfTime => "Half Time",
            Self::Breakbeat => "Breakbeat",
            Self::Syncopated => "Syncopated",
            Self::Complex => "Complex",
        }
    }
}

/// Where the spectral weight of a track sits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FrequencyWeight {
    BassHeavy,
    Bright,
    MidFocused,
    Balanced,
}

impl FrequencyWeight {
    pub const ALL: [Self; 4] = [Self::BassHeavy, Self::Bright, Self::MidFocused, Self::Balanced];

    #[must_use]
    pub const fn display_name(self) -> &'static str {
        match self {
            Self::BassHeavy => "Bass Heavy",
            Self::Bright => "Bright",
            Self::MidFocused => "Mid Focused",
            Self::Balanced => "Balanced",
        }
    }
}

/// Normalised 0-1 perceptual metrics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioFeatures {
    pub energy: f64,
    pub danceability: f64,
    pub valence: f64,
    pub acousticness: f64,
    pub instrumentalness: f64,
    pub liveness: f64,
}

impl Default for AudioFeatures {
    fn default() -> Self {
        Self {
            energy: 0.5,
            danceability: 0.5,
            valence: 0.5,
            acousticness: 0.1,
            instrumentalness: 0.5,
            liveness: 0.1,
        }
    }
}

/// Analysis record for one track.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub artist: String,
    #[serde(default = "default_duration")]
    pub duration_seconds: f64,
    /// Tempo in beats per minute.
    pub bpm: f64,
    pub bpm_stability: f64,
    pub key: CamelotKey,
    pub key_confidence: f64,
    pub features: AudioFeatures,
    pub groove: GrooveType,
    pub frequency: FrequencyWeight,
    /// How friendly the intro is for mixing in.
    pub mix_in: f64,
    /// How friendly the outro is for mixing out.
    pub mix_out: f64,
}

fn default_duration() -> f64 {
    300.0
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: TrackId::default(),
            title: String::new(),
            artist: String::new(),
            duration_seconds: default_duration(),
            bpm: 120.0,
            bpm_stability: 1.0,
            key: CamelotKey { number: 1, mode: Mode::Minor },
            key_confidence: 1.0,
            features: AudioFeatures::default(),
            groove: GrooveType::FourOnFloor,
            frequency: FrequencyWeight::Balanced,
            mix_in: 0.8,
            mix_out: 0.8,
        }
    }
}

impl Track {
    #[must_use]
    pub fn energy(&self) -> f64 {
        self.features.energy
    }

    /// Check every numeric field against its contract.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidTrack`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        let invalid = |field: &'static str, value: f64| EngineError::InvalidTrack {
            id: self.id,
            field,
            value,
        };

        if !self.bpm.is_finite() || self.bpm <= 0.0 {
            return Err(invalid("bpm", self.bpm));
        }
        if !self.duration_seconds.is_finite() || self.duration_seconds < 0.0 {
            return Err(invalid("duration_seconds", self.duration_seconds));
        }

        let unit_fields = [
            ("bpm_stability", self.bpm_stability),
            ("key_confidence", self.key_confidence),
            ("energy", self.features.energy),
            ("danceability", self.features.danceability),
            ("valence", self.features.valence),
            ("acousticness", self.features.acousticness),
            ("instrumentalness", self.features.instrumentalness),
            ("liveness", self.features.liveness),
            ("mix_in", self.mix_in),
            ("mix_out", self.mix_out),
        ];
        unit_fields
            .into_iter()
            .find(|(_, value)| !(0.0..=1.0).contains(value))
            .map_or(Ok(()), |(field, value)| Err(invalid(field, value)))
    }
}

/// Validate a whole batch, failing on the first bad record.
///
/// # Errors
///
/// Propagates the first [`EngineError::InvalidTrack`].
pub fn validate_all(tracks: &[Track]) -> Result<()> {
    tracks.iter().try_for_each(Track::validate)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(raw: &str) -> CamelotKey {
        raw.parse().unwrap()
    }

    #[test]
    fn test_parse_valid_keys() {
        assert_eq!(key("8A").number(), 8);
        assert_eq!(key("8A").mode(), Mode::Minor);
        assert_eq!(key("12b").mode(), Mode::Major);
        assert_eq!(key(" 1B ").to_string(), "1B");
    }

    #[test]
    fn test_reject_malformed_keys() {
        for raw in ["", "A", "0A", "13A", "8C", "xA", "8", "-1A", "8AA", "+8A", "08A", "1 2A"] {
            let parsed = raw.parse::<CamelotKey>();
            assert!(
                matches!(parsed, Err(EngineError::MalformedKey { .. })),
                "{raw:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_wheel_distance_wraps() {
        assert_eq!(key("12A").distance(key("1A")), 1);
        assert_eq!(key("1A").distance(key("12B")), 1);
        assert_eq!(key("8A").distance(key("2A")), 6);
        assert_eq!(key("3B").distance(key("3A")), 0);
    }

    #[test]
    fn test_compatible_keys_cover_neighbours_and_parallel() {
        let compatible = key("1A").compatible_keys();
        assert!(compatible.contains(&key("1A")));
        assert!(compatible.contains(&key("2A")));
        assert!(compatible.contains(&key("12A")));
        assert!(compatible.contains(&key("1B")));
        assert!(!key("1A").is_compatible_with(key("2B")));
        assert!(!key("1A").is_compatible_with(key("3A")));
    }

    #[test]
    fn test_key_serde_uses_wheel_notation() {
        let json = serde_json::to_string(&key("9B")).unwrap();
        assert_eq!(json, "\"9B\"");
        let back: CamelotKey = serde_json::from_str(&json).unwrap();
        assert_eq!(back, key("9B"));
        assert!(serde_json::from_str::<CamelotKey>("\"14A\"").is_err());
    }

    #[test]
    fn test_validate_rejects_out_of_range_metrics() {
        let track = Track::default();
        assert!(track.validate().is_ok());

        let loud = Track {
            features: AudioFeatures { energy: 1.2, ..AudioFeatures::default() },
            ..Track::default()
        };
        assert!(matches!(
            loud.validate(),
            Err(EngineError::InvalidTrack { field: "energy", .. })
        ));

        let stopped = Track { bpm: 0.0, ..Track::default() };
        assert!(matches!(
            stopped.validate(),
            Err(EngineError::InvalidTrack { field: "bpm", .. })
        ));
    }

    #[test]
    fn test_track_deserializes_from_library_json() {
        let json = r#"{
            "id": 42,
            "title": "Night Drive",
            "bpm": 124.0,
            "bpm_stability": 0.95,
            "key": "5A",
            "key_confidence": 0.9,
            "features": {
                "energy": 0.7, "danceability": 0.8, "valence": 0.4,
                "acousticness": 0.05, "instrumentalness": 0.9, "liveness": 0.1
            },
            "groove": "four_on_floor",
            "frequency": "bass_heavy",
            "mix_in": 0.9,
            "mix_out": 0.85
        }"#;
        let track: Track = serde_json::from_str(json).unwrap();
        assert_eq!(track.id, TrackId(42));
        assert_eq!(track.key, key("5A"));
        assert_eq!(track.groove, GrooveType::FourOnFloor);
        assert_eq!(track.frequency, FrequencyWeight::BassHeavy);
        assert!((track.duration_seconds - 300.0).abs() < f64::EPSILON);
        assert!(track.validate().is_ok());
    }
}
