use super::config::SessionGapPolicy;
use super::utils::normalize_title;
use crate::error::LookupNotFoundError;
use crate::models::{PlayEvent, Song};
use chrono::TimeDelta;
use log::debug;
use std::collections::BTreeMap;
use std::io::{self, Write};

/// Observed transitions into one successor
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionEntry {
    pub successor: Song,
    pub frequency: u64,
}

/// All successors of one chain node, in first-seen order
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionEntries {
    pub entries: Vec<TransitionEntry>,
    pub total: u64, // sum of all frequencies
}

impl TransitionEntries {
    fn record(&mut self, successor: &PlayEvent) {
        match self.entries.iter_mut().find(|entry| {
            entry.successor.title == successor.title && entry.successor.artist == successor.artist
        }) {
            Some(entry) => entry.frequency += 1,
            None => self.entries.push(TransitionEntry {
                successor: successor.song(),
                frequency: 1,
            }),
        }
        self.total += 1;
    }
}

/// First-order Markov chain keyed by song title
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TransitionTable {
    chain: BTreeMap<String, TransitionEntries>,
    normalized_keys: Vec<(String, String)>, // (normalized key, key), sorted by key
}

impl TransitionTable {
    pub fn len(&self) -> usize {
        self.chain.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chain.is_empty()
    }

    /// Exact lookup by title
    #[cfg(test)]
    pub fn get(&self, title: &str) -> Option<&TransitionEntries> {
        self.chain.get(title)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TransitionEntries)> {
        self.chain.iter()
    }

    /// Find the node for `title`: an exact key first, otherwise the longest key
    /// whose normalized form is a prefix of the normalized title
    pub fn lookup(&self, title: &str) -> Result<(&str, &TransitionEntries), LookupNotFoundError> {
        if let Some((key, entries)) = self.chain.get_key_value(title) {
            return Ok((key.as_str(), entries));
        }

        let wanted = normalize_title(title);
        let mut best: Option<&(String, String)> = None;
        for candidate in &self.normalized_keys {
            let (normalized, _) = candidate;
            if normalized.is_empty() || !wanted.starts_with(normalized.as_str()) {
                continue;
            }
            if best.is_none_or(|(current, _)| normalized.len() > current.len()) {
                best = Some(candidate);
            }
        }

        best.and_then(|(_, key)| self.chain.get_key_value(key))
            .map(|(key, entries)| (key.as_str(), entries))
            .ok_or_else(|| LookupNotFoundError {
                title: title.to_string(),
            })
    }

    /// Write every node with its successors, ordered by title
    pub fn write_summary<W: Write>(&self, mut out: W) -> io::Result<()> {
        for (key, entries) in self.iter() {
            writeln!(out, "Prefix: {key} with {} suffixes.", entries.total)?;
            for entry in &entries.entries {
                writeln!(
                    out,
                    "  {} - {}: {}",
                    entry.successor.artist, entry.successor.title, entry.frequency
                )?;
            }
        }
        out.flush()
    }
}

/// Builds a `TransitionTable` from an ascending play history
#[derive(Debug, Clone)]
pub struct ChainBuilder {
    policy: SessionGapPolicy,
    max_gap: TimeDelta,
}

impl Default for ChainBuilder {
    fn default() -> Self {
        Self::new(SessionGapPolicy::Forward, TimeDelta::hours(1))
    }
}

impl ChainBuilder {
    pub fn new(policy: SessionGapPolicy, max_gap: TimeDelta) -> Self {
        Self { policy, max_gap }
    }

    pub fn build(&self, events: &[PlayEvent]) -> TransitionTable {
        let mut chain: BTreeMap<String, TransitionEntries> = BTreeMap::new();
        let mut skipped_repeats = 0;
        let mut skipped_gaps = 0;

        for pair in events.windows(2) {
            let (current, next) = (&pair[0], &pair[1]);
            if current.same_song(next) {
                skipped_repeats += 1;
                continue;
            }
            if !self.same_session(current, next) {
                skipped_gaps += 1;
                continue;
            }
            chain.entry(current.title.clone()).or_default().record(next);
        }

        debug!(
            "Built chain with {} nodes from {} events ({skipped_repeats} repeats, {skipped_gaps} session breaks skipped)",
            chain.len(),
            events.len()
        );

        let normalized_keys = chain
            .keys()
            .map(|key| (normalize_title(key), key.clone()))
            .collect();
        TransitionTable {
            chain,
            normalized_keys,
        }
    }

    /// Whether two consecutive plays belong to the same listening session.
    /// Events without a timestamp never break a session.
    fn same_session(&self, current: &PlayEvent, next: &PlayEvent) -> bool {
        let (Some(current_at), Some(next_at)) = (current.played_at, next.played_at) else {
            return true;
        };
        match self.policy {
            SessionGapPolicy::Forward => {
                let gap = next_at - current_at;
                gap >= TimeDelta::zero() && gap < self.max_gap
            }
            // Earlier minus later, which is never positive in an ascending history
            SessionGapPolicy::Permissive => current_at - next_at < self.max_gap,
        }
    }
}
