// =============================================================================
// Book Engine
// =============================================================================
//
// Request/response surface over the book builder and the query engine. The
// line protocol in `protocol` is a thin adapter on top of this module.
//
// ```
// ┌─────────────────┐    ┌─────────────────┐    ┌─────────────────┐
// │   BookEngine    │────│  BookBuilder    │────│   Aggregator    │
// │  (session)      │    │  (archive->bin) │    │  (move stats)   │
// └─────────────────┘    └─────────────────┘    └─────────────────┘
//          │
// ┌─────────────────┐    ┌─────────────────┐
// │  Book cache     │────│  find / lookup  │
// │  (DashMap)      │    │  (binary search)│
// └─────────────────┘    └─────────────────┘
// ```
//
// ## Usage
// ```rust
// use pgn_book_lib::engine::{BookEngine, BuildRequest, FindRequest};
//
// let engine = BookEngine::default();
// let report = engine.build(&BuildRequest::new("games.pgn").full())?;
// let result = engine.find(&FindRequest::new(&report.book_path, fen))?;
// engine.close();
// ```

pub mod manager;
pub mod types;

pub use manager::BookEngine;
pub use types::{
    BuildRequest, BuildResponse, EngineConfig, FindRequest, FindResponse, GameText,
};
