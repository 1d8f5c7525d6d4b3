//! PGN archive indexing into a queryable opening book.
//!
//! Games are replayed from the standard starting position, every
//! (position, move) pair is aggregated into per-move statistics, and the
//! result is written as a read-only binary book keyed by Polyglot-compatible
//! Zobrist hashes. [`engine::BookEngine`] exposes build and query requests;
//! [`protocol`] drives it from text lines.

pub mod book;
pub mod chess;
pub mod engine;
pub mod error;
pub mod pgn;
pub mod protocol;

pub use book::{Book, BookBuilder, BuildMode, BuildOptions, BuildReport, FindResult};
pub use chess::position::{BookPosition, INITIAL_KEY};
pub use engine::{BookEngine, BuildRequest, EngineConfig, FindRequest};
pub use error::{Error, Result};
