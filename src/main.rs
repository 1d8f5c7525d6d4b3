use std::{
    io::{self, BufWriter},
    process::ExitCode,
};

use clap::Parser;
use log::error;

use pgn_book_lib::{
    book::builder::DEFAULT_OPENING_PLIES,
    engine::{BookEngine, EngineConfig},
    protocol,
};

/// Index PGN archives into an opening book and query it by position.
///
/// Without a command, reads protocol lines from stdin until `quit`:
///   book <pgn> [full | plies=N]
///   find <book> [max_game_offsets N] [skip N] <fen>
///   game <pgn> <offset>
#[derive(Parser)]
#[command(name = "pgn-book", version, about, verbatim_doc_comment)]
struct Cli {
    /// Worker threads for book builds (default: one per core)
    #[arg(short, long)]
    threads: Option<usize>,

    /// Plies indexed per game when a build is not `full`
    #[arg(long, default_value_t = DEFAULT_OPENING_PLIES)]
    opening_plies: usize,

    /// Run a single command and exit, e.g. `book games.pgn full`
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    command: Vec<String>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let engine = BookEngine::new(EngineConfig {
        threads: cli.threads,
        opening_plies: cli.opening_plies,
    });

    if cli.command.is_empty() {
        let stdin = io::stdin();
        let stdout = io::stdout();
        return match protocol::run(&engine, stdin.lock(), BufWriter::new(stdout.lock())) {
            Ok(()) => ExitCode::SUCCESS,
            Err(e) => {
                error!("Session aborted: {}", e);
                ExitCode::FAILURE
            }
        };
    }

    let line = cli.command.join(" ");
    let result = protocol::parse_command(&line).and_then(|command| match command {
        Some(command) => protocol::execute(&engine, &command),
        None => Ok(None),
    });
    engine.close();

    match result {
        Ok(response) => {
            if let Some(text) = response {
                println!("{}", text);
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            println!("{}", protocol::format_error(&e));
            ExitCode::FAILURE
        }
    }
}
