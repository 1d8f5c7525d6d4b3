//! Board state, position keys and game replay.
//!
//! This module wraps shakmaty for the parts the book needs: a coordinate move
//! code, an incrementally hashed position and a SAN replayer that stops at the
//! first move it cannot resolve.

pub mod position;
pub mod replay;
pub mod types;

pub use position::{BookPosition, INITIAL_KEY};
pub use replay::{IllegalMove, PlyEvent, Replay};
pub use types::{GameResult, MoveCode, MoverOutcome};
