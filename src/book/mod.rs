pub mod builder;
pub mod format;
pub mod query;
pub mod stats;

pub use builder::{BookBuilder, BuildMode, BuildOptions, BuildPhase, BuildReport, CancelToken};
pub use format::{Book, BookHeader};
pub use query::{find, FindResult, MoveReport};
pub use stats::{Aggregator, BookEntry, MoveStat};
