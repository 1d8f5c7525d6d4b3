use std::path::PathBuf;

use derivative::Derivative;
use serde::{Deserialize, Serialize};

use crate::book::{
    builder::{BuildMode, DEFAULT_OPENING_PLIES},
    BuildReport, FindResult,
};

// =============================================================================
// Configuration
// =============================================================================

/// Session-wide settings applied to every request.
#[derive(Derivative, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[derivative(Default)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
    /// Worker threads for builds. `None` uses the global rayon pool.
    pub threads: Option<usize>,
    /// Depth of restricted builds when a request does not name one.
    #[derivative(Default(value = "DEFAULT_OPENING_PLIES"))]
    pub opening_plies: usize,
}

impl EngineConfig {
    pub fn default_mode(&self) -> BuildMode {
        BuildMode::Opening {
            max_plies: self.opening_plies,
        }
    }
}

// =============================================================================
// Requests and responses
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRequest {
    pub archive: PathBuf,
    /// `None` means a restricted build at the configured depth.
    #[serde(default)]
    pub mode: Option<BuildMode>,
    #[serde(default)]
    pub output: Option<PathBuf>,
}

impl BuildRequest {
    pub fn new(archive: impl Into<PathBuf>) -> Self {
        Self {
            archive: archive.into(),
            mode: None,
            output: None,
        }
    }

    pub fn full(mut self) -> Self {
        self.mode = Some(BuildMode::Full);
        self
    }
}

pub type BuildResponse = BuildReport;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindRequest {
    pub book: PathBuf,
    pub fen: String,
    /// Offsets returned per move; `None` returns all of them.
    #[serde(default)]
    pub max_game_offsets: Option<usize>,
    #[serde(default)]
    pub skip: usize,
}

impl FindRequest {
    pub fn new(book: impl Into<PathBuf>, fen: impl Into<String>) -> Self {
        Self {
            book: book.into(),
            fen: fen.into(),
            max_game_offsets: None,
            skip: 0,
        }
    }
}

pub type FindResponse = FindResult;

/// A game record pulled back out of the archive by offset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameText {
    pub offset: u64,
    pub headers: Vec<(String, String)>,
    pub pgn: String,
}
