use std::{
    fs, io,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::SystemTime,
};

use dashmap::DashMap;
use log::{debug, info};

use super::types::{
    BuildRequest, BuildResponse, EngineConfig, FindRequest, FindResponse, GameText,
};
use crate::{
    book::{query, Book, BookBuilder, BuildOptions, CancelToken},
    error::{Error, Result},
    pgn,
};

/// Length and modification time of a book file when it was opened.
type FileStamp = (u64, Option<SystemTime>);

#[derive(Debug)]
struct CachedBook {
    book: Arc<Book>,
    stamp: FileStamp,
}

fn canonical_book_path(path: &Path) -> Result<PathBuf> {
    fs::canonicalize(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => Error::BookNotFound(path.to_path_buf()),
        _ => Error::Io(e),
    })
}

fn file_stamp(path: &Path) -> Result<FileStamp> {
    let meta = fs::metadata(path)?;
    Ok((meta.len(), meta.modified().ok()))
}

/// Book session: builds, queries and game retrieval.
///
/// Opened books are cached per canonical path and shared between concurrent
/// queries. A cached copy is reopened when the file's length or modification
/// time changes, and publishing a book through [`BookEngine::build`] evicts it.
/// After [`BookEngine::close`] every request fails with [`Error::Closed`].
#[derive(Debug, Default)]
pub struct BookEngine {
    config: EngineConfig,
    books: DashMap<PathBuf, CachedBook>,
    cancel: CancelToken,
    closed: AtomicBool,
}

impl BookEngine {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(Error::Closed);
        }
        Ok(())
    }

    pub fn build(&self, request: &BuildRequest) -> Result<BuildResponse> {
        self.ensure_open()?;
        let options = BuildOptions {
            mode: request.mode.unwrap_or_else(|| self.config.default_mode()),
            threads: self.config.threads,
            output: request.output.clone(),
        };
        info!(
            "Building book from {} ({:?})",
            request.archive.display(),
            options.mode
        );

        let report = BookBuilder::new(options)
            .with_cancel_token(self.cancel.clone())
            .build(&request.archive)?;

        let published = canonical_book_path(&report.book_path)?;
        if self.books.remove(&published).is_some() {
            debug!("Evicted cached book {}", published.display());
        }
        Ok(report)
    }

    /// Open `path`, or return the cached copy if the file is unchanged.
    pub fn book(&self, path: &Path) -> Result<Arc<Book>> {
        self.ensure_open()?;
        let canonical = canonical_book_path(path)?;
        let stamp = file_stamp(&canonical)?;
        if let Some(cached) = self.books.get(&canonical) {
            if cached.stamp == stamp {
                debug!("Using cached book {}", canonical.display());
                return Ok(Arc::clone(&cached.book));
            }
            debug!("Book {} changed on disk, reopening", canonical.display());
        }
        let book = Arc::new(Book::open(&canonical)?);
        self.books.insert(
            canonical,
            CachedBook {
                book: Arc::clone(&book),
                stamp,
            },
        );
        Ok(book)
    }

    pub fn find(&self, request: &FindRequest) -> Result<FindResponse> {
        let book = self.book(&request.book)?;
        query::find(
            &book,
            &request.fen,
            request.skip,
            request.max_game_offsets,
        )
    }

    pub fn game(&self, archive: &Path, offset: u64) -> Result<GameText> {
        self.ensure_open()?;
        let text = pgn::read_game_text(archive, offset)?;
        Ok(GameText {
            offset,
            headers: pgn::game_headers(&text)?,
            pgn: text,
        })
    }

    /// Release cached books and abort running builds. Idempotent.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.cancel.cancel();
            self.books.clear();
            info!("Book engine closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn archive(dir: &Path, text: &str) -> PathBuf {
        let path = dir.join("games.pgn");
        fs::write(&path, text).unwrap();
        path
    }

    #[test]
    fn test_build_then_find() {
        let dir = tempfile::tempdir().unwrap();
        let pgn = archive(dir.path(), "[Result \"1-0\"]\n\n1. e4 e5 2. Nf3 1-0\n");
        let engine = BookEngine::default();

        let report = engine.build(&BuildRequest::new(&pgn).full()).unwrap();
        assert_eq!(report.games, 1);

        let result = engine
            .find(&FindRequest::new(&report.book_path, START_FEN))
            .unwrap();
        assert_eq!(result.moves.len(), 1);
        assert_eq!(result.moves[0].move_, "e2e4");
        assert_eq!(result.moves[0].wins, 1);
    }

    #[test]
    fn test_rebuild_evicts_cache() {
        let dir = tempfile::tempdir().unwrap();
        let pgn = archive(dir.path(), "1. e4 *\n");
        let engine = BookEngine::default();
        let report = engine.build(&BuildRequest::new(&pgn)).unwrap();
        let first = engine.book(&report.book_path).unwrap();
        assert!(Arc::ptr_eq(&first, &engine.book(&report.book_path).unwrap()));

        fs::write(&pgn, "1. d4 *\n\n[Event \"2\"]\n\n1. d4 *\n").unwrap();
        engine.build(&BuildRequest::new(&pgn)).unwrap();
        let result = engine
            .find(&FindRequest::new(&report.book_path, START_FEN))
            .unwrap();
        assert_eq!(result.moves[0].move_, "d2d4");
        assert_eq!(result.moves[0].games, 2);
    }

    #[test]
    fn test_cache_follows_file_not_spelling() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();
        let pgn = archive(dir.path(), "1. e4 *\n");
        let engine = BookEngine::default();
        engine.build(&BuildRequest::new(&pgn)).unwrap();

        let alias = dir.path().join("sub").join("..").join("games.bin");
        let before = engine.find(&FindRequest::new(&alias, START_FEN)).unwrap();
        assert_eq!(before.moves[0].move_, "e2e4");

        fs::write(&pgn, "1. d4 *\n").unwrap();
        engine.build(&BuildRequest::new(&pgn)).unwrap();
        let after = engine.find(&FindRequest::new(&alias, START_FEN)).unwrap();
        assert_eq!(after.moves.len(), 1);
        assert_eq!(after.moves[0].move_, "d2d4");
    }

    #[test]
    fn test_book_replaced_outside_engine_is_reopened() {
        let dir = tempfile::tempdir().unwrap();
        let engine = BookEngine::default();
        let one = archive(dir.path(), "1. e4 *\n");
        let report = engine.build(&BuildRequest::new(&one)).unwrap();
        let first = engine.book(&report.book_path).unwrap();

        // published by another process: same path, different content
        let other = dir.path().join("other.pgn");
        fs::write(&other, "1. e4 *\n\n1. d4 *\n\n1. c4 *\n").unwrap();
        BookBuilder::new(BuildOptions {
            output: Some(report.book_path.clone()),
            ..Default::default()
        })
        .build(&other)
        .unwrap();

        let second = engine.book(&report.book_path).unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.header().games, 3);
    }

    #[test]
    fn test_game_by_offset() {
        let dir = tempfile::tempdir().unwrap();
        let text = "[Event \"A\"]\n\n1. e4 *\n\n[Event \"B\"]\n[White \"X\"]\n\n1. d4 *\n";
        let pgn = archive(dir.path(), text);
        let offset = text.find("[Event \"B\"]").unwrap() as u64;

        let game = BookEngine::default().game(&pgn, offset).unwrap();
        assert_eq!(game.headers[0], ("Event".to_string(), "B".to_string()));
        assert_eq!(game.headers[1], ("White".to_string(), "X".to_string()));
        assert!(game.pgn.ends_with("1. d4 *"));
    }

    #[test]
    fn test_closed_engine_rejects_requests() {
        let dir = tempfile::tempdir().unwrap();
        let pgn = archive(dir.path(), "1. e4 *\n");
        let engine = BookEngine::default();
        engine.close();
        engine.close();
        assert!(engine.is_closed());
        assert!(matches!(
            engine.build(&BuildRequest::new(&pgn)),
            Err(Error::Closed)
        ));
        assert!(matches!(
            engine.find(&FindRequest::new(dir.path().join("games.bin"), START_FEN)),
            Err(Error::Closed)
        ));
        assert!(matches!(engine.game(&pgn, 0), Err(Error::Closed)));
    }

    #[test]
    fn test_missing_and_corrupt_books_differ() {
        let dir = tempfile::tempdir().unwrap();
        let engine = BookEngine::default();
        let missing = engine
            .find(&FindRequest::new(dir.path().join("none.bin"), START_FEN))
            .unwrap_err();
        assert_eq!(missing.kind(), "book_not_found");

        let junk = dir.path().join("junk.bin");
        fs::write(&junk, vec![7u8; 200]).unwrap();
        let corrupt = engine.find(&FindRequest::new(&junk, START_FEN)).unwrap_err();
        assert_eq!(corrupt.kind(), "corrupt_book");
    }
}
