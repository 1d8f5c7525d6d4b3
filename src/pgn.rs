//! Archive scanning.
//!
//! A PGN archive is split into game records at game-start markers: the first
//! tag pair or movetext token after a result terminator (or the start of the
//! file), or a tag pair that follows movetext. The byte offset of the marker is
//! the game's identity in the book. Each record's movetext is tokenized with
//! `pgn-reader`; variations are skipped and the `Result` tag supplies the game
//! result.

use std::{fs, path::Path};

use pgn_reader::{BufferedReader, Outcome, RawHeader, SanPlus, Skip, Visitor};
use shakmaty::Color;

use crate::{
    chess::types::GameResult,
    error::{Error, Result},
};

/// One game record inside the archive bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GameSlice<'a> {
    pub offset: u64,
    pub bytes: &'a [u8],
}

/// Tokenized movetext of one game.
#[derive(Debug, Clone, Default)]
pub struct GameRecord {
    pub offset: u64,
    pub result: GameResult,
    pub sans: Vec<SanPlus>,
}

/// Split archive bytes into game records.
pub fn split_games(data: &[u8]) -> Vec<GameSlice<'_>> {
    let starts = game_starts(data);
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(data.len());
            GameSlice {
                offset: start as u64,
                bytes: &data[start..end],
            }
        })
        .collect()
}

/// Byte offsets where game records begin.
///
/// A record opens at the first tag pair or movetext token while no record is
/// open, and at a tag pair that follows movetext. A result terminator closes
/// it. Brace comments, rest-of-line comments and `%` escape lines are skipped,
/// so a `[` inside them never opens a record.
fn game_starts(data: &[u8]) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut open = false;
    let mut in_movetext = false;
    let mut line_start = true;
    let mut i = if data.starts_with(BOM) { BOM.len() } else { 0 };

    while i < data.len() {
        let b = data[i];
        if b == b'\n' {
            line_start = true;
            i += 1;
            continue;
        }
        if b.is_ascii_whitespace() {
            i += 1;
            continue;
        }
        let at_line_start = std::mem::replace(&mut line_start, false);

        match b {
            b'%' if at_line_start => i = line_end(data, i),
            b';' => i = line_end(data, i),
            b'{' => {
                i = data[i..]
                    .iter()
                    .position(|&c| c == b'}')
                    .map_or(data.len(), |p| i + p + 1);
            }
            b'[' => {
                if !open || in_movetext {
                    starts.push(i);
                    open = true;
                    in_movetext = false;
                }
                i = tag_end(data, i);
            }
            _ => {
                if !open {
                    starts.push(i);
                    open = true;
                }
                in_movetext = true;
                let end = data[i..]
                    .iter()
                    .position(|&c| c.is_ascii_whitespace() || b"{}[];()".contains(&c))
                    .map_or(data.len(), |p| i + p);
                // parentheses are one-byte tokens
                let end = end.max(i + 1);
                if is_terminator(&data[i..end]) {
                    open = false;
                    in_movetext = false;
                }
                i = end;
            }
        }
    }

    starts
}

const BOM: &[u8] = b"\xef\xbb\xbf";

fn line_end(data: &[u8], from: usize) -> usize {
    data[from..]
        .iter()
        .position(|&c| c == b'\n')
        .map_or(data.len(), |p| from + p)
}

/// Index just past the `]` closing the tag pair at `from`, honouring quoted
/// values and their escapes.
fn tag_end(data: &[u8], from: usize) -> usize {
    let mut quoted = false;
    let mut i = from + 1;
    while i < data.len() {
        match data[i] {
            b'\\' if quoted => i += 1,
            b'"' => quoted = !quoted,
            b']' if !quoted => return i + 1,
            b'\n' => return i,
            _ => {}
        }
        i += 1;
    }
    data.len()
}

fn is_terminator(token: &[u8]) -> bool {
    matches!(token, b"1-0" | b"0-1" | b"1/2-1/2" | b"*")
}

#[derive(Default)]
struct RecordVisitor {
    result: GameResult,
    tag_result: bool,
    sans: Vec<SanPlus>,
}

impl Visitor for RecordVisitor {
    type Result = (GameResult, Vec<SanPlus>);

    fn begin_game(&mut self) {
        *self = RecordVisitor::default();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        if key == b"Result" {
            self.result = GameResult::from_tag(&String::from_utf8_lossy(value.as_bytes()));
            self.tag_result = true;
        }
    }

    fn san(&mut self, san_plus: SanPlus) {
        self.sans.push(san_plus);
    }

    fn begin_variation(&mut self) -> Skip {
        Skip(true)
    }

    fn outcome(&mut self, outcome: Option<Outcome>) {
        // the Result tag wins; the movetext terminator is the fallback
        if !self.tag_result {
            self.result = match outcome {
                Some(Outcome::Decisive {
                    winner: Color::White,
                }) => GameResult::WhiteWins,
                Some(Outcome::Decisive {
                    winner: Color::Black,
                }) => GameResult::BlackWins,
                Some(Outcome::Draw) => GameResult::Draw,
                None => GameResult::Unknown,
            };
        }
    }

    fn end_game(&mut self) -> Self::Result {
        (self.result, std::mem::take(&mut self.sans))
    }
}

/// Tokenize one game record.
pub fn parse_game(slice: &GameSlice<'_>) -> Result<GameRecord> {
    let mut reader = BufferedReader::new_cursor(slice.bytes);
    let mut visitor = RecordVisitor::default();
    let (result, sans) = reader.read_game(&mut visitor)?.unwrap_or_default();
    Ok(GameRecord {
        offset: slice.offset,
        result,
        sans,
    })
}

/// Return the text of the game that starts at or before `offset`, bounded by
/// the next game-start marker.
pub fn read_game_text(archive: &Path, offset: u64) -> Result<String> {
    let data = read_archive(archive)?;
    let game = split_games(&data)
        .into_iter()
        .take_while(|g| g.offset <= offset)
        .last()
        .map(|g| String::from_utf8_lossy(g.bytes).trim().to_string())
        .unwrap_or_default();
    Ok(game)
}

#[derive(Default)]
struct HeaderVisitor {
    headers: Vec<(String, String)>,
}

impl Visitor for HeaderVisitor {
    type Result = Vec<(String, String)>;

    fn begin_game(&mut self) {
        self.headers.clear();
    }

    fn header(&mut self, key: &[u8], value: RawHeader<'_>) {
        self.headers.push((
            String::from_utf8_lossy(key).into_owned(),
            value.decode_utf8_lossy().into_owned(),
        ));
    }

    fn end_headers(&mut self) -> Skip {
        Skip(true)
    }

    fn end_game(&mut self) -> Self::Result {
        std::mem::take(&mut self.headers)
    }
}

/// Tag pairs of the first game in `text`, in order, with escapes decoded.
pub fn game_headers(text: &str) -> Result<Vec<(String, String)>> {
    let mut reader = BufferedReader::new_cursor(text.as_bytes());
    let mut visitor = HeaderVisitor::default();
    Ok(reader.read_game(&mut visitor)?.unwrap_or_default())
}

pub(crate) fn read_archive(archive: &Path) -> Result<Vec<u8>> {
    if !archive.is_file() {
        return Err(Error::ArchiveNotFound(archive.to_path_buf()));
    }
    Ok(fs::read(archive)?)
}
