//! Line-oriented command adapter over [`BookEngine`].
//!
//! ```text
//! book <pgn> [full | plies=N]
//! find <book> [max_game_offsets N] [skip N] <fen>
//! game <pgn> <offset>
//! quit
//! ```
//!
//! `book` answers with `Name: value` report lines ending in
//! `Processing time (ms): ...`. `find` and `game` answer with one JSON line.
//! Failures answer with one JSON line `{"error": kind, "message": text}`.

use std::{
    io::{BufRead, Write},
    path::PathBuf,
};

use log::{debug, info};
use serde::Serialize;

use crate::{
    book::{BuildMode, BuildReport},
    engine::{BookEngine, BuildRequest, FindRequest},
    error::{Error, Result},
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Book(BuildRequest),
    Find(FindRequest),
    Game { archive: PathBuf, offset: u64 },
    Quit,
}

fn protocol_error(msg: impl Into<String>) -> Error {
    Error::Protocol(msg.into())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: Option<&str>) -> Result<T> {
    value
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| protocol_error(format!("{} expects a non-negative integer", name)))
}

/// Parse one input line. Blank lines parse to `None`.
pub fn parse_command(line: &str) -> Result<Option<Command>> {
    let mut tokens = line.split_whitespace();
    let Some(name) = tokens.next() else {
        return Ok(None);
    };

    let command = match name {
        "book" => {
            let archive = tokens
                .next()
                .ok_or_else(|| protocol_error("usage: book <pgn> [full | plies=N]"))?;
            let mut request = BuildRequest::new(archive);
            match tokens.next() {
                None => {}
                Some("full") => request.mode = Some(BuildMode::Full),
                Some(token) => {
                    let plies = token
                        .strip_prefix("plies=")
                        .ok_or_else(|| protocol_error(format!("unknown book option '{}'", token)))?;
                    request.mode = Some(BuildMode::Opening {
                        max_plies: parse_number("plies", Some(plies))?,
                    });
                }
            }
            if let Some(extra) = tokens.next() {
                return Err(protocol_error(format!("unexpected token '{}'", extra)));
            }
            Command::Book(request)
        }
        "find" => {
            let book = tokens
                .next()
                .ok_or_else(|| protocol_error("usage: find <book> [max_game_offsets N] [skip N] <fen>"))?;
            let mut request = FindRequest::new(book, String::new());
            let mut rest: Vec<&str> = tokens.collect();
            let mut start = 0;
            while start < rest.len() {
                match rest[start] {
                    "max_game_offsets" => {
                        request.max_game_offsets =
                            Some(parse_number("max_game_offsets", rest.get(start + 1).copied())?);
                    }
                    "skip" => {
                        request.skip = parse_number("skip", rest.get(start + 1).copied())?;
                    }
                    _ => break,
                }
                start += 2;
            }
            rest.drain(..start);
            if rest.is_empty() {
                return Err(protocol_error("find requires a FEN"));
            }
            request.fen = rest.join(" ");
            Command::Find(request)
        }
        "game" => {
            let archive = tokens
                .next()
                .ok_or_else(|| protocol_error("usage: game <pgn> <offset>"))?;
            let offset = parse_number("offset", tokens.next())?;
            Command::Game {
                archive: PathBuf::from(archive),
                offset,
            }
        }
        "quit" => Command::Quit,
        other => return Err(protocol_error(format!("unknown command '{}'", other))),
    };
    Ok(Some(command))
}

/// Render a build report the way callers scrape it.
pub fn format_report(report: &BuildReport) -> String {
    format!(
        "Games: {}\nMoves: {}\nIncorrect moves: {}\nUnique positions: {}\n\
         Games/second: {}\nMoves/second: {}\nMBytes/second: {:.3}\n\
         Book size (bytes): {}\nBook file: {}\nProcessing time (ms): {}",
        report.games,
        report.moves,
        report.illegal_moves,
        report.positions,
        report.games_per_second(),
        report.moves_per_second(),
        report.mbytes_per_second(),
        report.book_size,
        report.book_path.display(),
        report.elapsed_ms
    )
}

#[derive(Serialize)]
struct ErrorResponse<'a> {
    error: &'a str,
    message: String,
}

pub fn format_error(err: &Error) -> String {
    let response = ErrorResponse {
        error: err.kind(),
        message: err.to_string(),
    };
    serde_json::to_string(&response).unwrap_or_else(|_| format!("{{\"error\":\"{}\"}}", err.kind()))
}

fn to_json<T: Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value).map_err(|e| protocol_error(e.to_string()))
}

/// Run a command and render its response. `Quit` closes the engine.
pub fn execute(engine: &BookEngine, command: &Command) -> Result<Option<String>> {
    match command {
        Command::Book(request) => engine
            .build(request)
            .map(|report| Some(format_report(&report))),
        Command::Find(request) => to_json(&engine.find(request)?).map(Some),
        Command::Game { archive, offset } => to_json(&engine.game(archive, *offset)?).map(Some),
        Command::Quit => {
            engine.close();
            Ok(None)
        }
    }
}

/// Serve commands from `input` until `quit` or end of input.
pub fn run<R: BufRead, W: Write>(engine: &BookEngine, input: R, mut output: W) -> Result<()> {
    for line in input.lines() {
        let line = line?;
        debug!("<< {}", line.trim_end());

        let response = match parse_command(&line) {
            Ok(None) => continue,
            Ok(Some(Command::Quit)) => break,
            Ok(Some(command)) => execute(engine, &command),
            Err(e) => Err(e),
        };
        match response {
            Ok(Some(text)) => writeln!(output, "{}", text)?,
            Ok(None) => {}
            Err(e) => writeln!(output, "{}", format_error(&e))?,
        }
        output.flush()?;
    }
    engine.close();
    info!("Session finished");
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::{fs, io::Cursor};

    use super::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    #[test]
    fn test_parse_book() {
        let Some(Command::Book(request)) = parse_command("book games.pgn full").unwrap() else {
            panic!("expected book command");
        };
        assert_eq!(request.archive, PathBuf::from("games.pgn"));
        assert_eq!(request.mode, Some(BuildMode::Full));

        let Some(Command::Book(request)) = parse_command("book games.pgn plies=12").unwrap() else {
            panic!("expected book command");
        };
        assert_eq!(request.mode, Some(BuildMode::Opening { max_plies: 12 }));

        let Some(Command::Book(request)) = parse_command("  book games.pgn ").unwrap() else {
            panic!("expected book command");
        };
        assert_eq!(request.mode, None);

        assert!(parse_command("book").is_err());
        assert!(parse_command("book games.pgn deep").is_err());
    }

    #[test]
    fn test_parse_find() {
        let line = format!("find games.bin max_game_offsets 10 skip 20 {}", START_FEN);
        let Some(Command::Find(request)) = parse_command(&line).unwrap() else {
            panic!("expected find command");
        };
        assert_eq!(request.book, PathBuf::from("games.bin"));
        assert_eq!(request.max_game_offsets, Some(10));
        assert_eq!(request.skip, 20);
        assert_eq!(request.fen, START_FEN);

        let line = format!("find games.bin {}", START_FEN);
        let Some(Command::Find(request)) = parse_command(&line).unwrap() else {
            panic!("expected find command");
        };
        assert_eq!(request.max_game_offsets, None);
        assert_eq!(request.skip, 0);

        assert!(parse_command("find games.bin max_game_offsets x 8/8/8/8/8/8/8/8 w - - 0 1").is_err());
        assert!(parse_command("find games.bin skip 3").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse_command("   ").unwrap(), None);
        assert_eq!(parse_command("quit").unwrap(), Some(Command::Quit));
        assert_eq!(
            parse_command("game games.pgn 42").unwrap(),
            Some(Command::Game {
                archive: PathBuf::from("games.pgn"),
                offset: 42
            })
        );
        let err = parse_command("frobnicate").unwrap_err();
        assert_eq!(err.kind(), "protocol");
    }

    #[test]
    fn test_format_report() {
        let report = BuildReport {
            games: 3,
            moves: 8,
            illegal_moves: 1,
            positions: 7,
            elapsed_ms: 4,
            archive_size: 2_000,
            book_path: PathBuf::from("games.bin"),
            book_size: 180,
        };
        assert_eq!(
            format_report(&report),
            "Games: 3\nMoves: 8\nIncorrect moves: 1\nUnique positions: 7\n\
             Games/second: 750\nMoves/second: 2000\nMBytes/second: 0.500\n\
             Book size (bytes): 180\nBook file: games.bin\nProcessing time (ms): 4"
        );
    }

    #[test]
    fn test_session() {
        let dir = tempfile::tempdir().unwrap();
        let pgn = dir.path().join("games.pgn");
        fs::write(&pgn, "[Result \"1/2-1/2\"]\n\n1. e4 e5 2. Nf3 1/2-1/2\n").unwrap();
        let book = dir.path().join("games.bin");

        let input = format!(
            "book {pgn} full\n\nfind {book} {fen}\nfind {missing} {fen}\nquit\nbook {pgn}\n",
            pgn = pgn.display(),
            book = book.display(),
            missing = dir.path().join("missing.bin").display(),
            fen = START_FEN
        );
        let engine = BookEngine::default();
        let mut output = Vec::new();
        run(&engine, Cursor::new(input), &mut output).unwrap();
        assert!(engine.is_closed());

        let text = String::from_utf8(output).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "Games: 1");
        assert_eq!(lines[1], "Moves: 3");
        assert_eq!(lines[2], "Incorrect moves: 0");
        assert!(lines[4].starts_with("Games/second: "));
        assert_eq!(lines[8], format!("Book file: {}", book.display()));
        assert!(lines[9].starts_with("Processing time (ms): "));

        let found: serde_json::Value = serde_json::from_str(lines[10]).unwrap();
        assert_eq!(found["key"], 5060803636482931868u64);
        assert_eq!(found["moves"][0]["move"], "e2e4");
        assert_eq!(found["moves"][0]["draws"], 1);
        assert_eq!(found["moves"][0]["pgn offsets"], serde_json::json!([0]));

        let missing: serde_json::Value = serde_json::from_str(lines[11]).unwrap();
        assert_eq!(missing["error"], "book_not_found");

        // nothing after quit
        assert_eq!(lines.len(), 12);
    }
}
