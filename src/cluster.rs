//! # Vibe Islands
//!
//! Density-based grouping of a library into clusters of similar-sounding
//! tracks. Every run is whole-library: assignments from earlier runs are
//! replaced, never merged.
//!
//! ## Feature vector
//!
//! Seven dimensions per track, standardised to zero mean and unit variance
//! across the input before clustering:
//!
//! | dim | value |
//! |-----|-------|
//! | 0 | energy |
//! | 1 | danceability |
//! | 2 | valence |
//! | 3 | bpm / 200 |
//! | 4 | acousticness |
//! | 5 | instrumentalness (0 when disabled) |
//! | 6 | groove ordinal |
//!
//! ## Algorithm
//!
//! DBSCAN with cosine distance. A point is a core point when at least
//! `min_size` points (itself included) lie within `eps`. Clusters grow from
//! core points in input order, so ids follow discovery order. Points reached
//! by no core point stay unclustered.

use crate::error::{EngineError, Result};
use crate::jobs::{BackgroundJob, JobControl};
use crate::state::TrackStateTable;
use crate::track::{CamelotKey, FrequencyWeight, GrooveType, Track, TrackId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

pub const FEATURE_DIMENSIONS: usize = 7;

pub type FeatureVector = [f64; FEATURE_DIMENSIONS];

/// Identifier of a cluster within one clustering run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClusterId(pub u32);

impl fmt::Display for ClusterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cluster {}", self.0)
    }
}

/// Clustering tunables.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// Neighbourhood radius in cosine distance.
    pub eps: f64,
    /// Minimum neighbourhood size for a core point, the point itself included.
    pub min_size: usize,
    pub include_instrumentalness: bool,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            eps: 0.5,
            min_size: 3,
            include_instrumentalness: true,
        }
    }
}

impl ClusterConfig {
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a non-positive `eps` or a zero `min_size`.
    pub fn validate(&self) -> Result<()> {
        if !self.eps.is_finite() || self.eps <= 0.0 {
            return Err(EngineError::invalid_parameter(format!(
                "eps must be positive, got {}",
                self.eps
            )));
        }
        if self.min_size == 0 {
            return Err(EngineError::invalid_parameter("min_size must be at least 1"));
        }
        Ok(())
    }
}

/// One vibe island.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub id: ClusterId,
    pub label: String,
    pub track_ids: Vec<TrackId>,
    /// Mean of the members' raw (unstandardised) feature vectors.
    pub centroid: FeatureVector,
    pub mean_bpm: f64,
    pub mean_energy: f64,
    pub dominant_key: CamelotKey,
    pub dominant_groove: GrooveType,
    pub dominant_frequency: FrequencyWeight,
    pub track_count: usize,
}

/// Result of one run: clusters plus every track's assignment, in input order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Clustering {
    pub clusters: Vec<Cluster>,
    pub assignments: Vec<(TrackId, Option<ClusterId>)>,
}

impl Clustering {
    #[must_use]
    pub fn noise_count(&self) -> usize {
        self.assignments.iter().filter(|(_, c)| c.is_none()).count()
    }
}

#[must_use]
pub fn feature_vector(track: &Track, include_instrumentalness: bool) -> FeatureVector {
    let f = &track.features;
    [
        f.energy,
        f.danceability,
        f.valence,
        track.bpm / 200.0,
        f.acousticness,
        if include_instrumentalness { f.instrumentalness } else { 0.0 },
        track.groove.ordinal(),
    ]
}

/// Zero mean, unit (population) variance per dimension. Constant dimensions become 0.
#[allow(clippy::cast_precision_loss)]
#[must_use]
pub fn standardize(vectors: &[FeatureVector]) -> Vec<FeatureVector> {
    if vectors.is_empty() {
        return Vec::new();
    }
    let n = vectors.len() as f64;
    let mut mean = [0.0; FEATURE_DIMENSIONS];
    let mut std_dev = [0.0; FEATURE_DIMENSIONS];
    for d in 0..FEATURE_DIMENSIONS {
        mean[d] = vectors.iter().map(|v| v[d]).sum::<f64>() / n;
        let variance = vectors.iter().map(|v| (v[d] - mean[d]).powi(2)).sum::<f64>() / n;
        std_dev[d] = variance.sqrt();
    }
    vectors
        .iter()
        .map(|v| {
            let mut scaled = [0.0; FEATURE_DIMENSIONS];
            for d in 0..FEATURE_DIMENSIONS {
                if std_dev[d] > f64::EPSILON {
                    scaled[d] = (v[d] - mean[d]) / std_dev[d];
                }
            }
            scaled
        })
        .collect()
}

/// `1 - cos(a, b)`. Two zero vectors are identical; one zero vector is orthogonal to anything.
#[must_use]
pub fn cosine_distance(a: &FeatureVector, b: &FeatureVector) -> f64 {
    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let norm_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();
    match (norm_a > f64::EPSILON, norm_b > f64::EPSILON) {
        (false, false) => 0.0,
        (true, true) => (1.0 - dot / (norm_a * norm_b)).max(0.0),
        _ => 1.0,
    }
}

/// Energy bucket used as the first word of a label.
#[must_use]
pub fn energy_label(mean_energy: f64) -> &'static str {
    if mean_energy < 0.4 {
        "Low Energy"
    } else if mean_energy < 0.7 {
        "Mid Energy"
    } else {
        "High Energy"
    }
}

/// Most frequent value; ties go to the value seen first.
fn dominant<T, I>(values: I) -> Option<T>
where
    T: Copy + Eq + Hash,
    I: IntoIterator<Item = T>,
{
    let mut counts: HashMap<T, usize> = HashMap::new();
    let mut order = Vec::new();
    for value in values {
        let count = counts.entry(value).or_insert(0);
        if *count == 0 {
            order.push(value);
        }
        *count += 1;
    }
    let mut best: Option<(T, usize)> = None;
    for value in order {
        let count = counts[&value];
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((value, count));
        }
    }
    best.map(|(value, _)| value)
}

#[allow(clippy::cast_precision_loss)]
fn describe(id: ClusterId, members: &[&Track], raw: &[FeatureVector]) -> Option<Cluster> {
    let first = members.first()?;
    let n = members.len() as f64;
    let mean_bpm = members.iter().map(|t| t.bpm).sum::<f64>() / n;
    let mean_energy = members.iter().map(|t| t.energy()).sum::<f64>() / n;

    let mut centroid = [0.0; FEATURE_DIMENSIONS];
    for vector in raw {
        for (slot, value) in centroid.iter_mut().zip(vector) {
            *slot += value / n;
        }
    }

    let dominant_groove = dominant(members.iter().map(|t| t.groove)).unwrap_or(first.groove);
    let dominant_frequency = dominant(members.iter().map(|t| t.frequency)).unwrap_or(first.frequency);
    let dominant_key = dominant(members.iter().map(|t| t.key)).unwrap_or(first.key);

    let label = format!(
        "{} {:.0} BPM {} {}",
        energy_label(mean_energy),
        mean_bpm.round(),
        dominant_groove.display_name(),
        dominant_frequency.display_name()
    );

    Some(Cluster {
        id,
        label,
        track_ids: members.iter().map(|t| t.id).collect(),
        centroid,
        mean_bpm,
        mean_energy,
        dominant_key,
        dominant_groove,
        dominant_frequency,
        track_count: members.len(),
    })
}

/// Pure clustering run. Touches no shared state.
///
/// # Errors
///
/// [`EngineError::InvalidParameter`] for a bad configuration,
/// [`EngineError::Cancelled`] when `control` is cancelled between passes.
pub fn compute(tracks: &[Track], config: &ClusterConfig, control: &JobControl) -> Result<Clustering> {
    config.validate()?;

    if tracks.len() < config.min_size {
        log::info!(
            "too few tracks ({}) for clustering (min_size={}), all unclustered",
            tracks.len(),
            config.min_size
        );
        return Ok(Clustering {
            clusters: Vec::new(),
            assignments: tracks.iter().map(|t| (t.id, None)).collect(),
        });
    }

    let raw: Vec<FeatureVector> = tracks
        .iter()
        .map(|t| feature_vector(t, config.include_instrumentalness))
        .collect();
    let scaled = standardize(&raw);

    control.progress.start(tracks.len());
    let neighbours: Vec<Vec<usize>> = scaled
        .par_iter()
        .map(|point| {
            control.cancel.check()?;
            let row: Vec<usize> = scaled
                .iter()
                .enumerate()
                .filter(|(_, other)| cosine_distance(point, other) <= config.eps)
                .map(|(j, _)| j)
                .collect();
            control.progress.advance(1);
            Ok(row)
        })
        .collect::<Result<_>>()?;
    control.cancel.check()?;

    let labels = expand_clusters(&neighbours, config.min_size);

    let mut members: Vec<Vec<usize>> = Vec::new();
    for (i, label) in labels.iter().enumerate() {
        if let Some(label) = label {
            if *label >= members.len() {
                members.resize_with(label + 1, Vec::new);
            }
            members[*label].push(i);
        }
    }

    let clusters: Vec<Cluster> = members
        .iter()
        .enumerate()
        .filter_map(|(label, indices)| {
            let id = ClusterId(u32::try_from(label).ok()?);
            let tracks_in: Vec<&Track> = indices.iter().map(|&i| &tracks[i]).collect();
            let vectors: Vec<FeatureVector> = indices.iter().map(|&i| raw[i]).collect();
            describe(id, &tracks_in, &vectors)
        })
        .collect();

    let assignments = tracks
        .iter()
        .zip(&labels)
        .map(|(track, label)| {
            (
                track.id,
                label.and_then(|l| u32::try_from(l).ok()).map(ClusterId),
            )
        })
        .collect();

    let clustering = Clustering { clusters, assignments };
    log::info!(
        "clustered {} tracks into {} clusters ({} noise)",
        tracks.len(),
        clustering.clusters.len(),
        clustering.noise_count()
    );
    Ok(clustering)
}

/// Classic DBSCAN expansion over precomputed neighbourhoods.
///
/// A cluster whose border points were already claimed by an earlier one can
/// end up below `min_size`; such clusters are dissolved into noise and the
/// remaining labels renumbered in discovery order.
fn expand_clusters(neighbours: &[Vec<usize>], min_size: usize) -> Vec<Option<usize>> {
    let is_core = |i: usize| neighbours[i].len() >= min_size;
    let mut labels: Vec<Option<usize>> = vec![None; neighbours.len()];
    let mut visited = vec![false; neighbours.len()];
    let mut next_label = 0;

    for seed in 0..neighbours.len() {
        if visited[seed] || !is_core(seed) {
            continue;
        }
        let label = next_label;
        next_label += 1;

        let mut queue = VecDeque::from([seed]);
        visited[seed] = true;
        while let Some(point) = queue.pop_front() {
            labels[point] = Some(label);
            if !is_core(point) {
                continue;
            }
            for &neighbour in &neighbours[point] {
                if labels[neighbour].is_none() {
                    labels[neighbour] = Some(label);
                }
                if !visited[neighbour] {
                    visited[neighbour] = true;
                    queue.push_back(neighbour);
                }
            }
        }
    }

    let mut sizes = vec![0_usize; next_label];
    for label in labels.iter().flatten() {
        sizes[*label] += 1;
    }
    let mut renumbered = vec![None; next_label];
    let mut kept = 0;
    for (label, &size) in sizes.iter().enumerate() {
        if size >= min_size {
            renumbered[label] = Some(kept);
            kept += 1;
        } else {
            log::debug!("dissolving cluster of {size} tracks below min_size={min_size}");
        }
    }
    labels
        .into_iter()
        .map(|label| label.and_then(|l| renumbered[l]))
        .collect()
}

/// Runs clustering and owns writes of `cluster_id` into the state table.
#[derive(Debug)]
pub struct ClusterEngine {
    config: ClusterConfig,
    state: Arc<TrackStateTable>,
}

impl ClusterEngine {
    /// # Errors
    ///
    /// [`EngineError::InvalidParameter`] for a bad configuration.
    pub fn new(config: ClusterConfig, state: Arc<TrackStateTable>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, state })
    }

    #[must_use]
    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    /// Cluster the whole library and publish the assignments.
    ///
    /// # Errors
    ///
    /// See [`compute`]. A cancelled run leaves the previous assignments untouched.
    pub fn cluster(&self, tracks: &[Track], control: &JobControl) -> Result<Vec<Cluster>> {
        let clustering = compute(tracks, &self.config, control)?;
        self.assign(&clustering);
        Ok(clustering.clusters)
    }

    /// Overwrite every track's `cluster_id` with the run's assignments.
    pub fn assign(&self, clustering: &Clustering) {
        self.state
            .replace_clusters(clustering.assignments.iter().copied());
    }

    /// Cluster on a worker thread.
    ///
    /// # Errors
    ///
    /// Fails only if the OS refuses to spawn the thread.
    pub fn spawn(self: &Arc<Self>, tracks: Vec<Track>) -> std::io::Result<BackgroundJob<Vec<Cluster>>> {
        let engine = Arc::clone(self);
        BackgroundJob::spawn("clustering", move |control| engine.cluster(&tracks, control))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::AudioFeatures;

    #[test]
    fn test_cosine_distance_edge_cases() {
        let zero = [0.0; FEATURE_DIMENSIONS];
        let mut unit = [0.0; FEATURE_DIMENSIONS];
        unit[0] = 1.0;
        let mut opposite = [0.0; FEATURE_DIMENSIONS];
        opposite[0] = -1.0;
        assert_eq!(cosine_distance(&zero, &zero), 0.0);
        assert_eq!(cosine_distance(&zero, &unit), 1.0);
        assert!(cosine_distance(&unit, &unit).abs() < 1e-12);
        assert!((cosine_distance(&unit, &opposite) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_standardize_zero_variance_dimension() {
        let vectors = vec![[1.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.5], [3.0, 2.0, 0.0, 0.0, 0.0, 0.0, 0.5]];
        let scaled = standardize(&vectors);
        assert!((scaled[0][0] + 1.0).abs() < 1e-12);
        assert!((scaled[1][0] - 1.0).abs() < 1e-12);
        assert_eq!(scaled[0][1], 0.0);
    }

    #[test]
    fn test_feature_vector_layout() {
        let track = Track {
            bpm: 128.0,
            groove: GrooveType::Breakbeat,
            features: AudioFeatures { energy: 0.9, instrumentalness: 0.7, ..AudioFeatures::default() },
            ..Track::default()
        };
        let v = feature_vector(&track, true);
        assert_eq!(v[0], 0.9);
        assert!((v[3] - 0.64).abs() < 1e-12);
        assert_eq!(v[5], 0.7);
        assert_eq!(v[6], 0.5);
        assert_eq!(feature_vector(&track, false)[5], 0.0);
    }

    #[test]
    fn test_dominant_prefers_first_seen_on_tie() {
        assert_eq!(dominant(["b", "a", "a", "b"]), Some("b"));
        assert_eq!(dominant(["b", "a", "a"]), Some("a"));
        assert_eq!(dominant(Vec::<u8>::new()), None);
    }

    #[test]
    fn test_energy_buckets() {
        assert_eq!(energy_label(0.39), "Low Energy");
        assert_eq!(energy_label(0.4), "Mid Energy");
        assert_eq!(energy_label(0.7), "High Energy");
    }

    #[test]
    fn test_expand_marks_isolated_points_as_noise() {
        let neighbours = vec![vec![0, 1, 2], vec![0, 1, 2], vec![0, 1, 2], vec![3]];
        assert_eq!(expand_clusters(&neighbours, 3), vec![Some(0), Some(0), Some(0), None]);
    }

    #[test]
    fn test_undersized_later_cluster_is_dissolved() {
        // Point 4 is a border of both groups and goes to the first; the second keeps only 5-7.
        let neighbours = vec![
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3, 4],
            vec![3, 4, 5],
            vec![4, 5, 6, 7],
            vec![5, 6, 7],
            vec![5, 6, 7],
        ];
        let labels = expand_clusters(&neighbours, 4);
        assert_eq!(labels, vec![Some(0), Some(0), Some(0), Some(0), Some(0), None, None, None]);
    }

    #[test]
    fn test_dissolving_keeps_ids_dense() {
        let mut neighbours = vec![
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3],
            vec![0, 1, 2, 3, 4],
            vec![3, 4, 5],
            vec![4, 5, 6, 7],
            vec![5, 6, 7],
            vec![5, 6, 7],
        ];
        neighbours.extend((8..12).map(|_| vec![8, 9, 10, 11]));
        let labels = expand_clusters(&neighbours, 4);
        assert_eq!(&labels[5..8], &[None, None, None]);
        assert_eq!(&labels[8..], &[Some(1); 4]);
    }

    #[test]
    fn test_too_few_tracks_is_all_unclustered() {
        let tracks = vec![Track::default(), Track { id: TrackId(1), ..Track::default() }];
        let result = compute(&tracks, &ClusterConfig::default(), &JobControl::new()).unwrap();
        assert!(result.clusters.is_empty());
        assert_eq!(result.noise_count(), 2);
    }

    #[test]
    fn test_rejects_bad_parameters() {
        let bad_eps = ClusterConfig { eps: 0.0, ..ClusterConfig::default() };
        let bad_size = ClusterConfig { min_size: 0, ..ClusterConfig::default() };
        assert!(matches!(bad_eps.validate(), Err(EngineError::InvalidParameter { .. })));
        assert!(matches!(bad_size.validate(), Err(EngineError::InvalidParameter { .. })));
    }

    #[test]
    fn test_label_format() {
        let members: Vec<Track> = (0..3)
            .map(|i| Track {
                id: TrackId(i),
                bpm: 127.6,
                frequency: FrequencyWeight::BassHeavy,
                features: AudioFeatures { energy: 0.85, ..AudioFeatures::default() },
                ..Track::default()
            })
            .collect();
        let refs: Vec<&Track> = members.iter().collect();
        let raw: Vec<FeatureVector> = members.iter().map(|t| feature_vector(t, true)).collect();
        let cluster = describe(ClusterId(0), &refs, &raw).unwrap();
        assert_eq!(cluster.label, "High Energy 128 BPM Four On Floor Bass Heavy");
        assert_eq!(cluster.track_count, 3);
        assert!((cluster.centroid[0] - 0.85).abs() < 1e-12);
    }
}
