//! # Shell Completion Module
//!
//! Completion scripts through `clap_complete`, plus a hidden helper listing
//! track ids from a library so shells can complete them dynamically.
//!
//! ## Usage
//!
//! ```bash
//! # Generate bash completions
//! vibegraph completion bash > ~/.local/share/bash-completion/completions/vibegraph
//!
//! # Track ids with descriptions, one per line
//! vibegraph --library tracks.json complete-tracks
//! ```

use crate::track::Track;
use clap::Command;
use clap_complete::{generate, Generator, Shell as CompletionShell};
use std::io::{self, Write};

/// Write the completion script for `gen` to `out`.
pub fn generate_completions<G: Generator>(gen: G, cmd: &mut Command, out: &mut dyn Write) {
    let name = cmd.get_name().to_string();
    generate(gen, cmd, name, out);
}

/// Convert our Shell enum to clap_complete's Shell enum
pub fn shell_to_completion_shell(shell: &crate::cli::Shell) -> CompletionShell {
    match shell {
        crate::cli::Shell::Bash => CompletionShell::Bash,
        crate::cli::Shell::Zsh => CompletionShell::Zsh,
        crate::cli::Shell::Fish => CompletionShell::Fish,
        crate::cli::Shell::PowerShell => CompletionShell::PowerShell,
        crate::cli::Shell::Elvish => CompletionShell::Elvish,
    }
}

/// `id<TAB>description` lines, sorted by id. The description falls back to
/// tempo and key for untitled tracks.
#[must_use]
pub fn track_completions(tracks: &[Track]) -> Vec<String> {
    let mut sorted: Vec<&Track> = tracks.iter().collect();
    sorted.sort_by_key(|t| t.id);
    sorted
        .into_iter()
        .map(|track| {
            let description = match (track.artist.is_empty(), track.title.is_empty()) {
                (false, false) => format!("{} - {}", track.artist, track.title),
                (true, false) => track.title.clone(),
                _ => format!("{:.0} BPM {}", track.bpm, track.key),
            };
            format!("{}\t{}", track.id.0, description.replace(['\t', '\n'], " "))
        })
        .collect()
}

/// Print [`track_completions`] to stdout.
///
/// # Errors
///
/// Fails when stdout is closed.
pub fn print_track_completions(tracks: &[Track]) -> io::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    for line in track_completions(tracks) {
        writeln!(out, "{line}")?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::TrackId;
    use clap::CommandFactory;

    #[test]
    fn test_shell_conversion() {
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Bash),
            CompletionShell::Bash
        );
        assert_eq!(
            shell_to_completion_shell(&crate::cli::Shell::Zsh),
            CompletionShell::Zsh
        );
    }

    #[test]
    fn test_generated_script_mentions_subcommands() {
        let mut cmd = crate::cli::Args::command();
        let mut buffer = Vec::new();
        generate_completions(CompletionShell::Bash, &mut cmd, &mut buffer);
        let script = String::from_utf8(buffer).unwrap();
        assert!(script.contains("vibegraph"));
        assert!(script.contains("build-set"));
    }

    #[test]
    fn test_track_completions_format() {
        let tracks = vec![
            Track { id: TrackId(9), title: "Nightfall".into(), artist: "Kessel".into(), ..Track::default() },
            Track { id: TrackId(2), bpm: 126.0, key: "4B".parse().unwrap(), ..Track::default() },
        ];
        assert_eq!(
            track_completions(&tracks),
            vec!["2\t126 BPM 4B".to_string(), "9\tKessel - Nightfall".to_string()]
        );
    }
}
