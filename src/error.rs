//! Error types for history ingestion and playlist synthesis.

use crate::models::Song;
use thiserror::Error;

/// Failure to fetch one page of history
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct FetchError {
    pub transient: bool,
    pub message: String,
}

impl FetchError {
    pub fn transient(message: impl Into<String>) -> Self {
        FetchError {
            transient: true,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        FetchError {
            transient: false,
            message: message.into(),
        }
    }
}

/// Errors surfaced by `HistoryIngestor::ingest`
#[derive(Error, Debug)]
pub enum IngestError {
    /// A page could not be retrieved from the remote API
    #[error("Remote fetch failed for page {page}: {source}")]
    Fetch {
        page: u32,
        #[source]
        source: FetchError,
    },

    /// Ingestion finished without a single scrobble
    #[error("No play history found for user '{user}'")]
    EmptyHistory { user: String },
}

/// Cache read/write failures. Never fatal to ingestion.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache record is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// No chain entry matches a title, even after normalization
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("No chain entry matches title '{title}'")]
pub struct LookupNotFoundError {
    pub title: String,
}

/// Why a generation run stopped before reaching the requested length
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortReason {
    /// Every playlist position ran out of attempts without an acceptable successor
    Stalled,
    /// The repeated-subsequence repair ran more often than allowed
    RepairBudgetExhausted,
}

/// Generation stopped early. The partial playlist travels with the error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Playlist generation aborted after {} songs: {}", .partial.len(), .reason.describe())]
pub struct GenerationAbortedError {
    pub reason: AbortReason,
    pub partial: Vec<Song>,
}

impl AbortReason {
    fn describe(&self) -> &'static str {
        match self {
            AbortReason::Stalled => "no acceptable successor could be found for any song in the list",
            AbortReason::RepairBudgetExhausted => "too many repeated sequences had to be removed",
        }
    }
}

impl GenerationAbortedError {
    pub fn into_partial(self) -> Vec<Song> {
        self.partial
    }
}
