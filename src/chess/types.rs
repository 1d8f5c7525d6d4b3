//! Small value types shared by the replayer, the aggregator and the book format.
//!
//! Moves are stored as a 16-bit coordinate code (origin, destination,
//! promotion), laid out like the Polyglot book move encoding. Castling is kept
//! in king-origin to king-destination form so that the coordinate string is the
//! usual `e1g1`.

use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use shakmaty::{CastlingSide, Color, Move, Role, Square};

const PROMOTION_CHARS: [char; 4] = ['n', 'b', 'r', 'q'];

/// Coordinate move code.
///
/// bit  0- 5: destination square (a1 = 0 .. h8 = 63)
/// bit  6-11: origin square
/// bit 12-14: promotion piece (knight = 1 .. queen = 4, 0 for none)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MoveCode(u16);

impl MoveCode {
    pub fn new(from: Square, to: Square, promotion: Option<Role>) -> Self {
        let promo = match promotion {
            Some(Role::Knight) => 1,
            Some(Role::Bishop) => 2,
            Some(Role::Rook) => 3,
            Some(Role::Queen) => 4,
            _ => 0,
        };
        MoveCode((u32::from(to) | (u32::from(from) << 6) | (promo << 12)) as u16)
    }

    /// Encode a resolved move. Castling uses the king's standard destination.
    pub fn from_move(m: &Move) -> Self {
        match *m {
            Move::Castle { king, rook } => {
                let side = CastlingSide::from_queen_side(rook < king);
                let to = Square::from_coords(side.king_to_file(), king.rank());
                MoveCode::new(king, to, None)
            }
            _ => {
                let from = m.from().unwrap_or(m.to());
                MoveCode::new(from, m.to(), m.promotion())
            }
        }
    }

    pub const fn from_raw(raw: u16) -> Self {
        MoveCode(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn to_index(self) -> u8 {
        (self.0 & 0x3f) as u8
    }

    pub const fn from_index(self) -> u8 {
        ((self.0 >> 6) & 0x3f) as u8
    }

    pub fn promotion_char(self) -> Option<char> {
        match (self.0 >> 12) & 0x7 {
            p @ 1..=4 => Some(PROMOTION_CHARS[p as usize - 1]),
            _ => None,
        }
    }

    /// Key matching the ascending lexicographic order of the coordinate string.
    fn coord_key(self) -> (u8, u8, u8, u8, u8) {
        let (from, to) = (self.from_index(), self.to_index());
        (
            from & 7,
            from >> 3,
            to & 7,
            to >> 3,
            self.promotion_char().map_or(0, |c| c as u8),
        )
    }
}

impl Ord for MoveCode {
    fn cmp(&self, other: &Self) -> Ordering {
        self.coord_key().cmp(&other.coord_key())
    }
}

impl PartialOrd for MoveCode {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MoveCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let square = |idx: u8| [(b'a' + (idx & 7)) as char, (b'1' + (idx >> 3)) as char];
        let [ff, fr] = square(self.from_index());
        let [tf, tr] = square(self.to_index());
        write!(f, "{ff}{fr}{tf}{tr}")?;
        if let Some(p) = self.promotion_char() {
            write!(f, "{p}")?;
        }
        Ok(())
    }
}

/// Result of a game as recorded in its `Result` tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum GameResult {
    WhiteWins,
    BlackWins,
    Draw,
    #[default]
    Unknown,
}

impl GameResult {
    pub fn from_tag(value: &str) -> Self {
        match value.trim() {
            "1-0" => GameResult::WhiteWins,
            "0-1" => GameResult::BlackWins,
            "1/2-1/2" | "½-½" => GameResult::Draw,
            _ => GameResult::Unknown,
        }
    }

    /// The result as seen by the side that made a move.
    pub fn for_mover(self, mover: Color) -> MoverOutcome {
        match (self, mover) {
            (GameResult::WhiteWins, Color::White) | (GameResult::BlackWins, Color::Black) => {
                MoverOutcome::Win
            }
            (GameResult::WhiteWins, Color::Black) | (GameResult::BlackWins, Color::White) => {
                MoverOutcome::Loss
            }
            (GameResult::Draw, _) => MoverOutcome::Draw,
            (GameResult::Unknown, _) => MoverOutcome::Unknown,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoverOutcome {
    Win,
    Loss,
    Draw,
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use shakmaty::{Chess, Position};

    #[test]
    fn test_move_code_display() {
        let code = MoveCode::new(Square::E2, Square::E4, None);
        assert_eq!(code.to_string(), "e2e4");
        // e2e4: to=28, from=12 -> 28 | 12 << 6
        assert_eq!(code.raw(), 28 | (12 << 6));

        let promo = MoveCode::new(Square::A7, Square::A8, Some(Role::Queen));
        assert_eq!(promo.to_string(), "a7a8q");
    }

    #[test]
    fn test_castling_is_king_destination() {
        let pos: Chess = "r3k2r/8/8/8/8/8/8/R3K2R w KQkq - 0 1"
            .parse::<shakmaty::fen::Fen>()
            .unwrap()
            .into_position(shakmaty::CastlingMode::Standard)
            .unwrap();
        let mut castles: Vec<String> = pos
            .legal_moves()
            .iter()
            .filter(|m| m.is_castle())
            .map(|m| MoveCode::from_move(m).to_string())
            .collect();
        castles.sort();
        assert_eq!(castles, vec!["e1c1", "e1g1"]);
    }

    #[test]
    fn test_ordering_matches_coordinate_strings() {
        let mut codes = vec![
            MoveCode::new(Square::G1, Square::F3, None),
            MoveCode::new(Square::E2, Square::E4, None),
            MoveCode::new(Square::B7, Square::B8, Some(Role::Queen)),
            MoveCode::new(Square::B7, Square::B8, None),
            MoveCode::new(Square::B7, Square::B8, Some(Role::Knight)),
            MoveCode::new(Square::D2, Square::D4, None),
        ];
        let mut strings: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        codes.sort();
        strings.sort();
        let sorted: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        assert_eq!(sorted, strings);
    }

    #[test]
    fn test_result_for_mover() {
        assert_eq!(GameResult::from_tag("1-0").for_mover(Color::White), MoverOutcome::Win);
        assert_eq!(GameResult::from_tag("1-0").for_mover(Color::Black), MoverOutcome::Loss);
        assert_eq!(GameResult::from_tag("1/2-1/2").for_mover(Color::Black), MoverOutcome::Draw);
        assert_eq!(GameResult::from_tag("*").for_mover(Color::White), MoverOutcome::Unknown);
    }
}
