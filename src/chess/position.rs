//! Position identity used by both the book builder and the query engine.
//!
//! The key is a 64-bit Zobrist hash using the Polyglot random table (via
//! shakmaty's [`Zobrist64`]), so the standard starting position hashes to
//! `0x463b96181691fc9c`. Keys are maintained incrementally while replaying:
//! only the squares, castling rights, en passant file and side to move that
//! change are XORed in or out.

use shakmaty::{
    fen::Fen,
    zobrist::{Zobrist64, ZobristValue},
    CastlingMode, CastlingSide, Chess, Color, EnPassantMode, Move, Piece, Position, PositionError,
    Square,
};

use crate::error::{Error, Result};

/// Key of the standard starting position.
pub const INITIAL_KEY: u64 = 0x463b_9618_1691_fc9c;

const CASTLING_RIGHTS: [(Color, CastlingSide); 4] = [
    (Color::White, CastlingSide::KingSide),
    (Color::White, CastlingSide::QueenSide),
    (Color::Black, CastlingSide::KingSide),
    (Color::Black, CastlingSide::QueenSide),
];

#[inline]
fn piece_key(square: Square, piece: Piece) -> u64 {
    Zobrist64::zobrist_for_piece(square, piece).0
}

/// A board state together with its position key.
#[derive(Debug, Clone)]
pub struct BookPosition {
    pos: Chess,
    key: u64,
}

impl Default for BookPosition {
    fn default() -> Self {
        Self::initial()
    }
}

impl BookPosition {
    /// The standard starting position.
    pub fn initial() -> Self {
        Self::from_chess(Chess::default())
    }

    pub fn from_chess(pos: Chess) -> Self {
        let key = compute_key(&pos);
        Self { pos, key }
    }

    /// Parse a FEN. Board-only FENs default to white to move with no rights.
    /// Castling rights and en passant squares the board cannot support are
    /// dropped rather than rejected.
    pub fn from_fen(fen: &str) -> Result<Self> {
        let fen = Fen::from_ascii(fen.trim().as_bytes())?;
        let pos: Chess = fen
            .into_position(CastlingMode::Standard)
            .or_else(PositionError::ignore_invalid_castling_rights)
            .or_else(PositionError::ignore_invalid_ep_square)
            .or_else(PositionError::ignore_too_much_material)?;
        Ok(Self::from_chess(pos))
    }

    pub fn key(&self) -> u64 {
        self.key
    }

    pub fn turn(&self) -> Color {
        self.pos.turn()
    }

    pub fn chess(&self) -> &Chess {
        &self.pos
    }

    /// Return the position after `m`, failing if `m` is not legal here.
    pub fn apply(&self, m: &Move) -> Result<Self> {
        let mut next = self.clone();
        next.play(m)?;
        Ok(next)
    }

    /// Play `m` in place, updating the key incrementally.
    pub fn play(&mut self, m: &Move) -> Result<()> {
        if !self.pos.is_legal(m) {
            return Err(Error::IllegalMove(m.to_string()));
        }

        let us = self.pos.turn();
        let ep_before = self.pos.ep_square(EnPassantMode::Legal);
        let castles_before = CASTLING_RIGHTS.map(|(c, s)| self.pos.castles().has(c, s));

        let mut delta = match *m {
            Move::Normal {
                role,
                from,
                capture,
                to,
                promotion,
            } => {
                let mut d = piece_key(from, role.of(us));
                if let Some(captured) = capture {
                    d ^= piece_key(to, captured.of(!us));
                }
                d ^ piece_key(to, promotion.unwrap_or(role).of(us))
            }
            Move::EnPassant { from, to } => {
                let captured = Square::from_coords(to.file(), from.rank());
                piece_key(from, shakmaty::Role::Pawn.of(us))
                    ^ piece_key(to, shakmaty::Role::Pawn.of(us))
                    ^ piece_key(captured, shakmaty::Role::Pawn.of(!us))
            }
            Move::Castle { king, rook } => {
                let side = CastlingSide::from_queen_side(rook < king);
                let king_to = Square::from_coords(side.king_to_file(), king.rank());
                let rook_to = Square::from_coords(side.rook_to_file(), rook.rank());
                piece_key(king, shakmaty::Role::King.of(us))
                    ^ piece_key(king_to, shakmaty::Role::King.of(us))
                    ^ piece_key(rook, shakmaty::Role::Rook.of(us))
                    ^ piece_key(rook_to, shakmaty::Role::Rook.of(us))
            }
            Move::Put { .. } => return Err(Error::IllegalMove(m.to_string())),
        };

        self.pos.play_unchecked(m);

        for (i, (color, side)) in CASTLING_RIGHTS.iter().enumerate() {
            if castles_before[i] != self.pos.castles().has(*color, *side) {
                delta ^= Zobrist64::zobrist_for_castling_right(*color, *side).0;
            }
        }

        let ep_after = self.pos.ep_square(EnPassantMode::Legal);
        if ep_before != ep_after {
            if let Some(sq) = ep_before {
                delta ^= Zobrist64::zobrist_for_en_passant_file(sq.file()).0;
            }
            if let Some(sq) = ep_after {
                delta ^= Zobrist64::zobrist_for_en_passant_file(sq.file()).0;
            }
        }

        delta ^= Zobrist64::zobrist_for_white_turn().0;
        self.key ^= delta;
        Ok(())
    }
}

/// Full, non-incremental key computation. Used for FEN input and as the
/// reference the incremental update must agree with.
pub fn compute_key(pos: &Chess) -> u64 {
    let board = pos.board();
    let mut key = 0u64;

    for square in board.occupied() {
        if let Some(piece) = board.piece_at(square) {
            key ^= piece_key(square, piece);
        }
    }

    for (color, side) in CASTLING_RIGHTS {
        if pos.castles().has(color, side) {
            key ^= Zobrist64::zobrist_for_castling_right(color, side).0;
        }
    }

    if let Some(sq) = pos.ep_square(EnPassantMode::Legal) {
        key ^= Zobrist64::zobrist_for_en_passant_file(sq.file()).0;
    }

    if pos.turn() == Color::White {
        key ^= Zobrist64::zobrist_for_white_turn().0;
    }

    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::san::San;

    fn play_sans(sans: &[&str]) -> BookPosition {
        let mut pos = BookPosition::initial();
        for san in sans {
            let m = san.parse::<San>().unwrap().to_move(pos.chess()).unwrap();
            pos.play(&m).unwrap();
            assert_eq!(pos.key(), compute_key(pos.chess()), "after {}", san);
        }
        pos
    }

    #[test]
    fn initial_key_is_fixed() {
        assert_eq!(BookPosition::initial().key(), 5060803636482931868);
        assert_eq!(INITIAL_KEY, 5060803636482931868);
    }

    #[test]
    fn fen_key_matches_initial() {
        let pos =
            BookPosition::from_fen("rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1")
                .unwrap();
        assert_eq!(pos.key(), INITIAL_KEY);
    }

    #[test]
    fn known_polyglot_keys() {
        // Reference keys from the Polyglot book format description.
        assert_eq!(play_sans(&["e4"]).key(), 0x823c9b50fd114196);
        assert_eq!(play_sans(&["e4", "d5"]).key(), 0x0756b94461c50fb0);
        assert_eq!(play_sans(&["e4", "d5", "e5"]).key(), 0x662fafb965db29d4);
        assert_eq!(play_sans(&["e4", "d5", "e5", "f5"]).key(), 0x22a48b5a8e47ff78);
    }

    #[test]
    fn incremental_matches_full_with_special_moves() {
        // en passant, castling both sides, promotion with capture
        let pos = play_sans(&[
            "e4", "d5", "e5", "f5", "exf6", "Nc6", "fxg7", "Qd6", "gxh8=Q", "Bd7", "Nf3", "O-O-O",
            "Bc4", "Nf6", "O-O",
        ]);
        assert_eq!(pos.key(), compute_key(pos.chess()));
    }

    #[test]
    fn transpositions_share_a_key() {
        let a = play_sans(&["Nf3", "Nf6", "d4"]);
        let b = play_sans(&["d4", "Nf6", "Nf3"]);
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn apply_rejects_illegal_move() {
        let pos = BookPosition::initial();
        let m = Move::Normal {
            role: shakmaty::Role::Pawn,
            from: Square::E2,
            capture: None,
            to: Square::E5,
            promotion: None,
        };
        assert!(matches!(pos.apply(&m), Err(Error::IllegalMove(_))));
    }

    #[test]
    fn malformed_fen_is_an_error() {
        assert!(BookPosition::from_fen("not a fen").is_err());
        // no kings
        assert!(BookPosition::from_fen("8/8/8/8/8/8/8/8 w - - 0 1").is_err());
    }

    #[test]
    fn unsupported_rights_and_ep_are_dropped() {
        let bare = BookPosition::from_fen("4k3/8/8/8/8/8/8/4K3 w - - 0 1").unwrap();
        let castling = BookPosition::from_fen("4k3/8/8/8/8/8/8/4K3 w KQkq - 0 1").unwrap();
        let ep = BookPosition::from_fen("4k3/8/8/8/8/8/8/4K3 w - e6 0 1").unwrap();
        assert_eq!(castling.key(), bare.key());
        assert_eq!(ep.key(), bare.key());
    }
}
