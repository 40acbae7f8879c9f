use super::chain::{TransitionEntry, TransitionTable};
use super::repair::remove_repeated_runs;
use crate::error::{AbortReason, GenerationAbortedError};
use crate::models::Song;
use log::{debug, trace};
use rand::Rng;

/// Cumulative weights over a node's successors, used for weighted selection.
/// Built fresh for every sampling decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CumulativeDistribution {
    bounds: Vec<(u64, usize)>, // (cumulative weight, entry index), ascending
}

impl CumulativeDistribution {
    /// Entries without a positive frequency are left out
    pub fn new(entries: &[TransitionEntry]) -> Self {
        let mut running = 0;
        let bounds = entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.frequency > 0)
            .map(|(index, entry)| {
                running += entry.frequency;
                (running, index)
            })
            .collect();
        Self { bounds }
    }

    pub fn total(&self) -> u64 {
        self.bounds.last().map_or(0, |(bound, _)| *bound)
    }

    /// Entry index whose cumulative bound is the smallest one >= `draw`.
    /// `draw` must lie in `1..=total()`.
    pub fn select(&self, draw: u64) -> Option<usize> {
        if draw == 0 || draw > self.total() {
            return None;
        }
        let position = self.bounds.partition_point(|(bound, _)| *bound < draw);
        self.bounds.get(position).map(|(_, index)| *index)
    }

    /// Draw uniformly from `1..=total()` and select the matching entry
    pub fn sample<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<usize> {
        match self.total() {
            0 => None,
            total => self.select(rng.gen_range(1..=total)),
        }
    }
}

/// Random walk over a `TransitionTable` producing a duplicate-free playlist
pub struct SequenceSampler<'a, R> {
    table: &'a TransitionTable,
    rng: R,
    max_attempts_per_position: usize,
    max_repairs: usize,
}

impl<'a, R: Rng> SequenceSampler<'a, R> {
    pub fn new(table: &'a TransitionTable, rng: R) -> Self {
        Self {
            table,
            rng,
            max_attempts_per_position: 10,
            max_repairs: 200,
        }
    }

    pub fn with_budgets(mut self, max_attempts_per_position: usize, max_repairs: usize) -> Self {
        self.max_attempts_per_position = max_attempts_per_position.max(1);
        self.max_repairs = max_repairs;
        self
    }

    /// Generate up to `length` songs starting with `seed`.
    ///
    /// No song appears twice, and no artist gets `max_consecutive_by_same_artist`
    /// songs in a row (values below 2 disable that check). If the walk gets
    /// stuck, or repairs exceed the budget, the error carries the songs
    /// assembled so far.
    pub fn generate(
        &mut self,
        length: usize,
        max_consecutive_by_same_artist: usize,
        seed: Song,
    ) -> Result<Vec<Song>, GenerationAbortedError> {
        let mut playlist = vec![seed];
        let mut repairs = 0;

        while playlist.len() < length {
            let Some(next) = self.extend(&playlist, max_consecutive_by_same_artist) else {
                debug!("Generation stalled at {} songs", playlist.len());
                return Err(GenerationAbortedError {
                    reason: AbortReason::Stalled,
                    partial: playlist,
                });
            };
            trace!("Appending {next}");
            playlist.push(next);

            // A deletion shortens the list, so the loop refills from the deletion point
            if remove_repeated_runs(&mut playlist) {
                repairs += 1;
                debug!("Removed a repeated sequence ({repairs}/{})", self.max_repairs);
                if repairs > self.max_repairs {
                    return Err(GenerationAbortedError {
                        reason: AbortReason::RepairBudgetExhausted,
                        partial: playlist,
                    });
                }
            }
        }

        Ok(playlist)
    }

    /// Find an acceptable successor, starting from the last song and walking
    /// back through the playlist until some position yields one
    fn extend(&mut self, playlist: &[Song], max_consecutive_by_same_artist: usize) -> Option<Song> {
        let table = self.table;

        for anchor in playlist.iter().rev() {
            let (key, node) = match table.lookup(&anchor.title) {
                Ok(found) => found,
                Err(e) => {
                    debug!("{e}, backing up");
                    continue;
                }
            };

            let distribution = CumulativeDistribution::new(&node.entries);
            for _ in 0..self.max_attempts_per_position {
                let Some(index) = distribution.sample(&mut self.rng) else {
                    break;
                };
                let candidate = &node.entries[index].successor;
                if is_acceptable(candidate, playlist, max_consecutive_by_same_artist) {
                    return Some(candidate.clone());
                }
            }
            debug!("No acceptable successor for '{key}', backing up");
        }

        None
    }
}

fn is_acceptable(candidate: &Song, playlist: &[Song], max_consecutive_by_same_artist: usize) -> bool {
    if playlist.contains(candidate) {
        return false;
    }
    if max_consecutive_by_same_artist < 2 {
        return true;
    }
    let tail_run = playlist
        .iter()
        .rev()
        .take_while(|song| song.artist == candidate.artist)
        .count();
    tail_run + 1 < max_consecutive_by_same_artist
}
