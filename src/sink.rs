use crate::models::Song;
use anyhow::{Context, Result};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;

/// Destination for a finished playlist
pub trait PlaylistSink {
    /// Publish `songs` for `account`, returning where the playlist ended up
    fn publish(&self, account: &str, songs: &[Song]) -> Result<String>;
}

/// Prints the playlist to stdout
pub struct ConsoleSink;

impl PlaylistSink for ConsoleSink {
    fn publish(&self, account: &str, songs: &[Song]) -> Result<String> {
        println!("\nPlaylist for {account} ({} songs):", songs.len());
        for (i, song) in songs.iter().enumerate() {
            println!("  {:>3}. {}", i + 1, song);
        }
        Ok("stdout".to_string())
    }
}

#[derive(Debug, Serialize)]
struct PlaylistDocument<'a> {
    account: &'a str,
    generated_at: String,
    songs: &'a [Song],
}

/// Writes the playlist as a JSON document
pub struct JsonFileSink {
    path: PathBuf,
}

impl JsonFileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl PlaylistSink for JsonFileSink {
    fn publish(&self, account: &str, songs: &[Song]) -> Result<String> {
        let document = PlaylistDocument {
            account,
            generated_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            songs,
        };
        let json = serde_json::to_string_pretty(&document)?;
        std::fs::write(&self.path, json)
            .with_context(|| format!("Failed to write playlist to {}", self.path.display()))?;
        Ok(self.path.display().to_string())
    }
}
