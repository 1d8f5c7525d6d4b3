//! Replays one game's SAN tokens from the initial position.
//!
//! [`Replay`] is a lazy iterator of [`PlyEvent`]s. It stops at the first
//! token that does not resolve to exactly one legal move; the failure is kept
//! on the iterator so the caller can count it without aborting the build.

use shakmaty::{san::SanPlus, Color};

use super::{
    position::BookPosition,
    types::{GameResult, MoveCode},
};

/// One replayed ply: the position before the move, the move and the game result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlyEvent {
    pub key: u64,
    pub mover: Color,
    pub mv: MoveCode,
    pub result: GameResult,
}

/// A token that could not be replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IllegalMove {
    /// Zero-based ply index of the offending token.
    pub ply: usize,
    pub san: String,
}

pub struct Replay<'a> {
    tokens: std::slice::Iter<'a, SanPlus>,
    position: BookPosition,
    result: GameResult,
    ply: usize,
    max_plies: Option<usize>,
    illegal: Option<IllegalMove>,
}

impl<'a> Replay<'a> {
    pub fn new(tokens: &'a [SanPlus], result: GameResult) -> Self {
        Self {
            tokens: tokens.iter(),
            position: BookPosition::initial(),
            result,
            ply: 0,
            max_plies: None,
            illegal: None,
        }
    }

    /// Only replay the first `max_plies` plies.
    pub fn with_max_plies(mut self, max_plies: Option<usize>) -> Self {
        self.max_plies = max_plies;
        self
    }

    pub fn illegal(&self) -> Option<&IllegalMove> {
        self.illegal.as_ref()
    }

    pub fn position(&self) -> &BookPosition {
        &self.position
    }
}

impl Iterator for Replay<'_> {
    type Item = PlyEvent;

    fn next(&mut self) -> Option<PlyEvent> {
        if self.illegal.is_some() || self.max_plies.is_some_and(|max| self.ply >= max) {
            return None;
        }
        let san_plus = self.tokens.next()?;

        let key = self.position.key();
        let mover = self.position.turn();
        let played = san_plus
            .san
            .to_move(self.position.chess())
            .ok()
            .and_then(|m| self.position.play(&m).ok().map(|()| m));

        match played {
            Some(m) => {
                self.ply += 1;
                Some(PlyEvent {
                    key,
                    mover,
                    mv: MoveCode::from_move(&m),
                    result: self.result,
                })
            }
            None => {
                self.illegal = Some(IllegalMove {
                    ply: self.ply,
                    san: san_plus.to_string(),
                });
                None
            }
        }
    }
}
