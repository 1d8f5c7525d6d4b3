//! Archive to book pipeline.
//!
//! `Idle -> Scanning -> Replaying -> Aggregating -> Serializing -> Done`, with
//! `Failed` reachable from every non-terminal phase. Games are replayed on
//! the rayon pool into thread-local [`Aggregator`]s which are reduced into one,
//! then finalised and written next to the target path before being renamed
//! over it. A cancelled or failed build never touches the published file.

use std::{
    collections::HashSet,
    io::{self, Write},
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};

use derivative::Derivative;
use log::{debug, info, warn};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use super::{
    format::{encode_book, BookHeader, FLAG_FULL},
    stats::Aggregator,
};
use crate::{
    chess::{replay::Replay, types::MoveCode},
    error::{Error, Result},
    pgn::{self, GameSlice},
};

/// Ply depth indexed when no explicit limit is given.
pub const DEFAULT_OPENING_PLIES: usize = 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuildPhase {
    Idle,
    Scanning,
    Replaying,
    Aggregating,
    Serializing,
    Done,
    Failed,
}

impl BuildPhase {
    pub fn can_transition_to(self, next: BuildPhase) -> bool {
        use BuildPhase::*;
        match (self, next) {
            (Idle, Scanning)
            | (Scanning, Replaying)
            | (Replaying, Aggregating)
            | (Aggregating, Serializing)
            | (Serializing, Done) => true,
            (Done | Failed, Failed) => false,
            (_, Failed) => true,
            _ => false,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, BuildPhase::Done | BuildPhase::Failed)
    }
}

/// How deep into each game the builder indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "type")]
pub enum BuildMode {
    /// Every ply of every game.
    Full,
    /// Only the first `max_plies` plies of each game.
    #[serde(rename_all = "camelCase")]
    Opening { max_plies: usize },
}

impl BuildMode {
    pub fn max_plies(self) -> Option<usize> {
        match self {
            BuildMode::Full => None,
            BuildMode::Opening { max_plies } => Some(max_plies),
        }
    }
}

#[derive(Derivative, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "camelCase", default)]
pub struct BuildOptions {
    #[derivative(Default(value = "BuildMode::Opening { max_plies: DEFAULT_OPENING_PLIES }"))]
    pub mode: BuildMode,
    /// Size of a dedicated worker pool. `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Book path. Defaults to the archive path with a `.bin` extension.
    pub output: Option<PathBuf>,
}

impl BuildOptions {
    pub fn output_for(&self, archive: &Path) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| archive.with_extension("bin"))
    }
}

/// Shared flag that aborts a running build at the next game boundary.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildReport {
    pub games: u64,
    pub moves: u64,
    pub illegal_moves: u64,
    pub positions: u64,
    pub elapsed_ms: u64,
    pub archive_size: u64,
    pub book_path: PathBuf,
    pub book_size: u64,
}

impl BuildReport {
    fn elapsed(&self) -> u64 {
        self.elapsed_ms.max(1)
    }

    pub fn games_per_second(&self) -> u64 {
        self.games.saturating_mul(1000) / self.elapsed()
    }

    pub fn moves_per_second(&self) -> u64 {
        self.moves.saturating_mul(1000) / self.elapsed()
    }

    /// Archive throughput in megabytes (10^6 bytes) per second.
    pub fn mbytes_per_second(&self) -> f64 {
        self.archive_size as f64 / self.elapsed() as f64 / 1000.0
    }
}

/// Per-worker accumulator.
#[derive(Debug, Default)]
struct Partial {
    aggregator: Aggregator,
    games: u64,
    moves: u64,
    illegal: u64,
}

impl Partial {
    fn merge(self, other: Partial) -> Partial {
        Partial {
            aggregator: self.aggregator.merge(other.aggregator),
            games: self.games + other.games,
            moves: self.moves + other.moves,
            illegal: self.illegal + other.illegal,
        }
    }

    fn index_game(&mut self, slice: &GameSlice<'_>, max_plies: Option<usize>) {
        self.games += 1;

        let record = match pgn::parse_game(slice) {
            Ok(record) => record,
            Err(e) => {
                warn!("Unreadable game at offset {}: {}", slice.offset, e);
                self.illegal += 1;
                return;
            }
        };

        // a position can recur within one game; it still counts as one game
        let mut seen: HashSet<(u64, MoveCode)> = HashSet::new();
        let mut replay = Replay::new(&record.sans, record.result).with_max_plies(max_plies);
        for event in replay.by_ref() {
            self.moves += 1;
            if seen.insert((event.key, event.mv)) {
                self.aggregator.record(
                    event.key,
                    event.mv,
                    event.result.for_mover(event.mover),
                    record.offset,
                );
            }
        }

        if let Some(illegal) = replay.illegal() {
            debug!(
                "Illegal move '{}' at ply {} in game at offset {}",
                illegal.san, illegal.ply, record.offset
            );
            self.illegal += 1;
        }
    }
}

pub struct BookBuilder {
    options: BuildOptions,
    phase: BuildPhase,
    cancel: CancelToken,
}

impl BookBuilder {
    pub fn new(options: BuildOptions) -> Self {
        Self {
            options,
            phase: BuildPhase::Idle,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn phase(&self) -> BuildPhase {
        self.phase
    }

    fn advance(&mut self, next: BuildPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        debug!("Build phase {:?} -> {:?}", self.phase, next);
        self.phase = next;
        Ok(())
    }

    /// Index `archive` and publish the book. A builder runs once.
    pub fn build(&mut self, archive: &Path) -> Result<BuildReport> {
        self.advance(BuildPhase::Scanning)?;
        match self.run(archive) {
            Ok(report) => Ok(report),
            Err(e) => {
                warn!("Build of {} failed: {}", archive.display(), e);
                self.phase = BuildPhase::Failed;
                Err(e)
            }
        }
    }

    fn run(&mut self, archive: &Path) -> Result<BuildReport> {
        let start = Instant::now();
        let output = self.options.output_for(archive);
        let max_plies = self.options.mode.max_plies();

        let data = pgn::read_archive(archive)?;
        let games = pgn::split_games(&data);
        info!(
            "Scanned {} games in {} ({} bytes)",
            games.len(),
            archive.display(),
            data.len()
        );

        self.advance(BuildPhase::Replaying)?;
        let cancel = self.cancel.clone();
        let replay_all = || {
            games
                .par_iter()
                .fold(Partial::default, |mut acc, slice| {
                    if !cancel.is_cancelled() {
                        acc.index_game(slice, max_plies);
                    }
                    acc
                })
                .reduce(Partial::default, Partial::merge)
        };
        let partial = match self.options.threads {
            Some(threads) => rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| Error::Io(io::Error::new(io::ErrorKind::Other, e.to_string())))?
                .install(replay_all),
            None => replay_all(),
        };
        if self.cancel.is_cancelled() {
            info!("Build of {} cancelled", archive.display());
            return Err(Error::Cancelled);
        }

        self.advance(BuildPhase::Aggregating)?;
        let Partial {
            aggregator,
            games,
            moves,
            illegal,
        } = partial;
        let entries = aggregator.into_entries();
        debug!("Aggregated {} positions", entries.len());

        self.advance(BuildPhase::Serializing)?;
        let header = BookHeader {
            flags: if max_plies.is_none() { FLAG_FULL } else { 0 },
            max_plies: max_plies.map_or(0, |p| p.min(u32::MAX as usize) as u32),
            games,
            moves,
            illegal,
            ..Default::default()
        };
        let bytes = encode_book(&entries, header)?;
        if self.cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        publish(&output, &bytes)?;

        self.advance(BuildPhase::Done)?;
        let report = BuildReport {
            games,
            moves,
            illegal_moves: illegal,
            positions: entries.len() as u64,
            elapsed_ms: start.elapsed().as_millis() as u64,
            archive_size: data.len() as u64,
            book_path: output,
            book_size: bytes.len() as u64,
        };
        info!(
            "Indexed {} games ({} moves, {} illegal, {} positions) into {} in {}ms",
            report.games,
            report.moves,
            report.illegal_moves,
            report.positions,
            report.book_path.display(),
            report.elapsed_ms
        );
        Ok(report)
    }
}

/// Write to a sibling temporary file, then rename it over `path`.
fn publish(path: &Path, bytes: &[u8]) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(bytes)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    Ok(())
}
