//! # vibegraph
//!
//! Inspection front-end for the compatibility engine. Reads a JSON array of
//! analysed tracks and runs one engine operation over it.
//!
//! ## Usage
//!
//! ```bash
//! # How well does 12 flow into 40?
//! vibegraph --library tracks.json score 12 40
//!
//! # Edge index with progress logging
//! RUST_LOG=vibegraph=debug vibegraph --library tracks.json edges --threshold 0.5
//!
//! # Best order for five tracks, ending on 9
//! vibegraph --library tracks.json order 3 9 14 21 30 --end 9
//! ```

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use log::{debug, info};
use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::thread;
use std::time::Duration;
use vibegraph::cli::{self, Command};
use vibegraph::completion;
use vibegraph::{
    ClusterEngine, CompatibilityScorer, EdgeIndex, EngineConfig, JobControl, PathPlanner, SetBuilder,
    SuggestionEngine, Track, TrackId, TrackStateTable,
};

/// Read and validate the track library.
fn load_library(path: &Path) -> Result<Vec<Track>> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read library {}", path.display()))?;
    let tracks: Vec<Track> = serde_json::from_str(&raw)
        .with_context(|| format!("Failed to parse library {}", path.display()))?;
    vibegraph::track::validate_all(&tracks)
        .with_context(|| format!("Invalid track in {}", path.display()))?;
    info!("loaded {} tracks from {}", tracks.len(), path.display());
    Ok(tracks)
}

/// Track lookup by id for the commands that take ids.
struct Library {
    tracks: Vec<Track>,
    by_id: HashMap<TrackId, usize>,
}

impl Library {
    fn new(tracks: Vec<Track>) -> Self {
        let by_id = tracks.iter().enumerate().map(|(i, t)| (t.id, i)).collect();
        Self { tracks, by_id }
    }

    fn get(&self, id: u64) -> Result<&Track> {
        self.by_id
            .get(&TrackId(id))
            .map(|&i| &self.tracks[i])
            .with_context(|| format!("No track with id {id} in the library"))
    }

    fn label(&self, id: TrackId) -> String {
        match self.by_id.get(&id).map(|&i| &self.tracks[i]) {
            Some(track) if !track.title.is_empty() => format!("{id} {} - {}", track.artist, track.title),
            _ => id.to_string(),
        }
    }
}

fn print_breakdown(label: &str, b: &vibegraph::CompatibilityBreakdown) {
    println!("{label}");
    println!("  harmonic     {:.3}", b.harmonic);
    println!("  tempo        {:.3}", b.tempo);
    println!("  energy       {:.3}", b.energy);
    println!("  groove       {:.3}", b.groove);
    println!("  frequency    {:.3}", b.frequency);
    println!("  mix quality  {:.3}", b.mix_quality);
    println!("  aggregate    {:.3}", b.aggregate);
}

/// Main entry point.
///
/// Logging is controlled via `RUST_LOG`:
/// - `RUST_LOG=debug vibegraph ...` - Phase boundaries and progress
/// - `RUST_LOG=vibegraph::scoring=trace vibegraph ...` - Every scored pair
fn main() -> Result<()> {
    env_logger::init();

    let args = cli::Args::parse();

    let command = match args.command {
        Command::Completion { shell } => {
            let mut cmd = cli::Args::command();
            completion::generate_completions(
                completion::shell_to_completion_shell(&shell),
                &mut cmd,
                &mut io::stdout(),
            );
            return Ok(());
        }
        command => command,
    };

    let config = EngineConfig::load_or_default(args.config.as_deref())?;
    let Some(library_path) = args.library.as_deref() else {
        bail!("No library given. Pass --library <file> or set VIBEGRAPH_LIBRARY");
    };
    let library = Library::new(load_library(library_path)?);
    let scorer = CompatibilityScorer::new(&config.weights).context("Invalid scoring weights")?;

    match command {
        Command::Score { from, to } => {
            let (from, to) = (library.get(from)?, library.get(to)?);
            let breakdown = scorer.score(from, to);
            print_breakdown(
                &format!("{} -> {}", library.label(from.id), library.label(to.id)),
                &breakdown,
            );
        }
        Command::Edges { threshold, top } => {
            let threshold = threshold.unwrap_or(config.edges.threshold);
            let index = Arc::new(EdgeIndex::new(scorer, config.edges)?);
            let job = index
                .spawn_build(library.tracks.clone(), threshold)
                .context("Failed to start edge build")?;
            while !job.is_finished() {
                thread::sleep(Duration::from_millis(250));
                let progress = job.progress();
                debug!("edge build {:.0}% ({}/{})", progress.fraction() * 100.0, progress.scored, progress.total);
            }
            let count = job.join()?;

            let snapshot = index.snapshot();
            println!("{count} edges over {} tracks (threshold {threshold:.2})", library.tracks.len());
            let mut strongest: Vec<_> = snapshot.iter().collect();
            strongest.sort_by(|a, b| {
                b.score()
                    .partial_cmp(&a.score())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });
            for edge in strongest.into_iter().take(top) {
                println!(
                    "  {:.3}  {} -> {}",
                    edge.score(),
                    library.label(edge.source),
                    library.label(edge.target)
                );
            }
        }
        Command::Cluster { eps, min_size } => {
            let mut cluster_config = config.clustering;
            if let Some(eps) = eps {
                cluster_config.eps = eps;
            }
            if let Some(min_size) = min_size {
                cluster_config.min_size = min_size;
            }
            let engine = ClusterEngine::new(cluster_config, Arc::new(TrackStateTable::new()))?;
            let clusters = engine.cluster(&library.tracks, &JobControl::new())?;
            let clustered: usize = clusters.iter().map(|c| c.track_count).sum();

            for cluster in &clusters {
                println!("{} [{}]: {} tracks", cluster.id, cluster.label, cluster.track_count);
                for id in &cluster.track_ids {
                    println!("    {}", library.label(*id));
                }
            }
            println!(
                "{} clusters, {} unclustered",
                clusters.len(),
                library.tracks.len() - clustered
            );
        }
        Command::Order { ids, start, end } => {
            let subset = ids
                .iter()
                .map(|&id| library.get(id).cloned())
                .collect::<Result<Vec<_>>>()?;
            let start = start.map(|id| library.get(id)).transpose()?;
            let end = end.map(|id| library.get(id)).transpose()?;

            let planner = PathPlanner::new(scorer, config.planner);
            let plan = planner.plan(&subset, start, end)?;
            for (position, track) in plan.order.iter().enumerate() {
                println!("{:>3}. {}", position + 1, library.label(track.id));
            }
            println!(
                "total compatibility {:.3} (greedy {:.3}, {} passes)",
                plan.total, plan.greedy_total, plan.passes
            );
        }
        Command::Suggest {
            current,
            history,
            strategy,
            count,
            key_lock,
            groove_lock,
            bpm_min,
            bpm_max,
            with_clusters,
        } => {
            let current = library.get(current)?.clone();
            let history = history
                .iter()
                .map(|&id| library.get(id).cloned())
                .collect::<Result<Vec<_>>>()?;

            let mut query = config.suggestions.clone();
            query.weights = config.weights;
            if let Some(strategy) = strategy {
                query.strategy = strategy.into();
            }
            if let Some(count) = count {
                query.num_suggestions = count;
            }
            query.key_lock |= key_lock;
            query.groove_lock |= groove_lock;
            query.bpm_min = bpm_min.or(query.bpm_min);
            query.bpm_max = bpm_max.or(query.bpm_max);

            let state = Arc::new(TrackStateTable::new());
            if with_clusters {
                let clusters = ClusterEngine::new(config.clustering, Arc::clone(&state))?
                    .cluster(&library.tracks, &JobControl::new())?;
                debug!("clustered library into {} islands", clusters.len());
            }

            let engine = SuggestionEngine::new(library.tracks.clone(), state);
            let results = engine.suggest(&current, &history, &query)?;
            if results.is_empty() {
                println!("No candidates left after filtering");
            }
            for (rank, result) in results.iter().enumerate() {
                println!(
                    "{:>2}. {:.3}  {}  (base {:.3} x strategy {:.2} x context {:.2} + diversity {:.2})",
                    rank + 1,
                    result.final_score,
                    library.label(result.track_id),
                    result.base_compatibility,
                    result.strategy_modifier,
                    result.context_modifier,
                    result.diversity_bonus
                );
            }
        }
        Command::BuildSet { minutes, profile, start } => {
            let mut set_config = config.set_builder.clone();
            if let Some(minutes) = minutes {
                set_config.target_minutes = minutes;
            }
            if let Some(profile) = profile {
                set_config.profile = profile.into();
            }
            if let Some(start) = start {
                set_config.start = Some(TrackId(start));
            }

            let set = SetBuilder::new(scorer).generate(&library.tracks, &set_config)?;
            for (position, track) in set.tracks.iter().enumerate() {
                println!(
                    "{:>3}. {:>6.1} BPM {:>3} energy {:.2}  {}",
                    position + 1,
                    track.bpm,
                    track.key.to_string(),
                    track.energy(),
                    library.label(track.id)
                );
            }
            println!(
                "{} tracks, {:.1} minutes, total compatibility {:.3}",
                set.tracks.len(),
                set.duration_seconds / 60.0,
                PathPlanner::new(scorer, config.planner).total_compatibility(&set.tracks)
            );
        }
        Command::CompleteTracks => {
            completion::print_track_completions(&library.tracks)?;
        }
        // Needs no library; answered above.
        Command::Completion { .. } => {}
    }

    Ok(())
}
