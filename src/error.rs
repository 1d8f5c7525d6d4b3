use std::path::PathBuf;

use crate::book::builder::BuildPhase;

/// Error type shared by the builder, the book reader and the query engine.
///
/// A position that is simply not in the book is *not* an error; queries
/// return an empty move list for it.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive not found: {}", .0.display())]
    ArchiveNotFound(PathBuf),

    #[error("Book not found: {}", .0.display())]
    BookNotFound(PathBuf),

    #[error("Corrupt book: {0}")]
    CorruptBook(String),

    #[error("FEN parsing error: {0}")]
    FenParsing(#[from] shakmaty::fen::ParseFenError),

    #[error("Position setup error: {0}")]
    PositionSetup(#[from] shakmaty::PositionError<shakmaty::Chess>),

    #[error("Illegal move: {0}")]
    IllegalMove(String),

    #[error("Invalid build transition: from {from:?} to {to:?}")]
    InvalidTransition { from: BuildPhase, to: BuildPhase },

    #[error("Build cancelled")]
    Cancelled,

    #[error("Engine is closed")]
    Closed,

    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl Error {
    /// Short machine-readable name of the error kind, used in protocol output.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Io(_) => "io",
            Error::ArchiveNotFound(_) => "archive_not_found",
            Error::BookNotFound(_) => "book_not_found",
            Error::CorruptBook(_) => "corrupt_book",
            Error::FenParsing(_) | Error::PositionSetup(_) => "invalid_fen",
            Error::IllegalMove(_) => "illegal_move",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::Cancelled => "cancelled",
            Error::Closed => "closed",
            Error::Protocol(_) => "protocol",
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
