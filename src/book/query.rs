use serde::{Deserialize, Serialize};

use super::format::{Book, StoredMove};
use crate::{chess::position::BookPosition, error::Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveReport {
    #[serde(rename = "move")]
    pub move_: String,
    pub weight: u64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    #[serde(rename = "pgn offsets")]
    pub offsets: Vec<u64>,
}

impl MoveReport {
    fn from_stored(stored: &StoredMove<'_>, skip: usize, limit: Option<usize>) -> Result<Self> {
        Ok(MoveReport {
            move_: stored.mv.to_string(),
            weight: stored.weight,
            games: stored.games,
            wins: stored.wins,
            losses: stored.losses,
            draws: stored.draws,
            offsets: stored.offsets(skip, limit)?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindResult {
    pub fen: String,
    pub key: u64,
    pub moves: Vec<MoveReport>,
}

/// Look up the position described by `fen`.
///
/// Every move's offset list is windowed to `offsets[skip..skip + limit]`
/// independently. An unknown position yields an empty move list.
pub fn find(book: &Book, fen: &str, skip: usize, limit: Option<usize>) -> Result<FindResult> {
    let position = BookPosition::from_fen(fen)?;
    let key = position.key();

    let moves = match book.lookup(key)? {
        Some(stored) => stored
            .iter()
            .map(|m| MoveReport::from_stored(m, skip, limit))
            .collect::<Result<Vec<_>>>()?,
        None => Vec::new(),
    };

    Ok(FindResult {
        fen: fen.trim().to_string(),
        key,
        moves,
    })
}
