//! Per-position move statistics.
//!
//! [`Aggregator`] maps a position key to the moves played from it. Every
//! update is a sum or an append, so recording in any order and merging
//! partial aggregators in any grouping gives the same final book once
//! [`Aggregator::into_entries`] has normalised offset order. Builders rely on
//! this to fold games on worker threads and reduce the partial maps at the end.

use std::collections::HashMap;

use crate::chess::types::{MoveCode, MoverOutcome};

/// Handle of an offset list inside an [`OffsetArena`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OffsetHandle(u32);

/// Growable storage for the offset lists of every move.
#[derive(Debug, Default)]
pub struct OffsetArena {
    lists: Vec<Vec<u64>>,
}

impl OffsetArena {
    pub fn alloc(&mut self) -> OffsetHandle {
        self.lists.push(Vec::new());
        OffsetHandle((self.lists.len() - 1) as u32)
    }

    pub fn push(&mut self, handle: OffsetHandle, offset: u64) {
        self.lists[handle.0 as usize].push(offset);
    }

    pub fn get(&self, handle: OffsetHandle) -> &[u64] {
        &self.lists[handle.0 as usize]
    }

    fn take(&mut self, handle: OffsetHandle) -> Vec<u64> {
        std::mem::take(&mut self.lists[handle.0 as usize])
    }

    fn extend(&mut self, handle: OffsetHandle, offsets: Vec<u64>) {
        let list = &mut self.lists[handle.0 as usize];
        if list.is_empty() {
            *list = offsets;
        } else {
            list.extend(offsets);
        }
    }
}

/// Score used to rank moves within a position.
///
/// Each game counts 1, a draw adds 1 more and a win adds 2 more, so the weight
/// grows with every game played and with every improvement in result.
pub fn weight(games: u32, wins: u32, draws: u32) -> u64 {
    games as u64 + 2 * wins as u64 + draws as u64
}

/// Counters for one move from one position while aggregating.
#[derive(Debug, Clone, Copy)]
struct MoveCounters {
    mv: MoveCode,
    games: u32,
    wins: u32,
    losses: u32,
    draws: u32,
    offsets: OffsetHandle,
}

/// Finalised statistics for one move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveStat {
    pub mv: MoveCode,
    pub weight: u64,
    pub games: u32,
    pub wins: u32,
    pub losses: u32,
    pub draws: u32,
    /// Archive offsets of the contributing games, ascending.
    pub offsets: Vec<u64>,
}

/// All moves recorded for one position key, sorted by weight descending and
/// then by coordinate string ascending.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookEntry {
    pub key: u64,
    pub moves: Vec<MoveStat>,
}

/// Sort moves by weight descending, ties by coordinate string ascending.
pub fn sort_moves(moves: &mut [MoveStat]) {
    moves.sort_by(|a, b| b.weight.cmp(&a.weight).then_with(|| a.mv.cmp(&b.mv)));
}

#[derive(Debug, Default)]
pub struct Aggregator {
    entries: HashMap<u64, Vec<MoveCounters>>,
    arena: OffsetArena,
    records: u64,
}

impl Aggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one game's contribution for `mv` played from `key`.
    pub fn record(&mut self, key: u64, mv: MoveCode, outcome: MoverOutcome, offset: u64) {
        let counters = self.counters_mut(key, mv);
        counters.games += 1;
        match outcome {
            MoverOutcome::Win => counters.wins += 1,
            MoverOutcome::Loss => counters.losses += 1,
            MoverOutcome::Draw => counters.draws += 1,
            MoverOutcome::Unknown => {}
        }
        let handle = counters.offsets;
        self.arena.push(handle, offset);
        self.records += 1;
    }

    fn counters_mut(&mut self, key: u64, mv: MoveCode) -> &mut MoveCounters {
        let moves = self.entries.entry(key).or_default();
        let idx = match moves.iter().position(|c| c.mv == mv) {
            Some(idx) => idx,
            None => {
                moves.push(MoveCounters {
                    mv,
                    games: 0,
                    wins: 0,
                    losses: 0,
                    draws: 0,
                    offsets: self.arena.alloc(),
                });
                moves.len() - 1
            }
        };
        &mut moves[idx]
    }

    /// Fold another aggregator into this one.
    pub fn merge(mut self, mut other: Aggregator) -> Aggregator {
        if other.entries.len() > self.entries.len() {
            std::mem::swap(&mut self, &mut other);
        }
        for (key, moves) in other.entries {
            for theirs in moves {
                let offsets = other.arena.take(theirs.offsets);
                let ours = self.counters_mut(key, theirs.mv);
                ours.games += theirs.games;
                ours.wins += theirs.wins;
                ours.losses += theirs.losses;
                ours.draws += theirs.draws;
                let handle = ours.offsets;
                self.arena.extend(handle, offsets);
            }
        }
        self.records += other.records;
        self
    }

    /// Number of distinct position keys.
    pub fn positions(&self) -> usize {
        self.entries.len()
    }

    /// Number of `record` calls folded into this aggregator.
    pub fn records(&self) -> u64 {
        self.records
    }

    /// Offsets recorded so far for a (key, move) pair, in append order.
    pub fn offsets(&self, key: u64, mv: MoveCode) -> Option<&[u64]> {
        self.entries
            .get(&key)?
            .iter()
            .find(|c| c.mv == mv)
            .map(|c| self.arena.get(c.offsets))
    }

    /// Finalise into entries sorted by key, with moves ranked and offsets
    /// in ascending archive order.
    pub fn into_entries(mut self) -> Vec<BookEntry> {
        let mut entries: Vec<BookEntry> = self
            .entries
            .drain()
            .map(|(key, counters)| {
                let mut moves: Vec<MoveStat> = counters
                    .into_iter()
                    .map(|c| {
                        let mut offsets = self.arena.take(c.offsets);
                        offsets.sort_unstable();
                        MoveStat {
                            mv: c.mv,
                            weight: weight(c.games, c.wins, c.draws),
                            games: c.games,
                            wins: c.wins,
                            losses: c.losses,
                            draws: c.draws,
                            offsets,
                        }
                    })
                    .collect();
                sort_moves(&mut moves);
                BookEntry { key, moves }
            })
            .collect();
        entries.sort_unstable_by_key(|e| e.key);
        entries
    }
}
