use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// A song identified by artist and title, compared by exact string match
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Song {
    pub artist: String,
    pub title: String,
}

impl Song {
    pub fn new(artist: impl Into<String>, title: impl Into<String>) -> Self {
        Song {
            artist: artist.into(),
            title: title.into(),
        }
    }

    /// Canonical composite key used wherever songs are stored in a set
    pub fn canonical_key(&self) -> String {
        format!("{}\u{0}{}", self.artist, self.title)
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "\"{}\" by {}", self.title, self.artist)
    }
}

/// One completed scrobble from the user's history
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayEvent {
    pub artist: String,
    pub title: String,
    pub played_at: Option<DateTime<Utc>>, // None when the source timestamp didn't parse
}

impl PlayEvent {
    pub fn new(
        artist: impl Into<String>,
        title: impl Into<String>,
        played_at: Option<DateTime<Utc>>,
    ) -> Self {
        PlayEvent {
            artist: artist.into(),
            title: title.into(),
            played_at,
        }
    }

    pub fn song(&self) -> Song {
        Song::new(self.artist.clone(), self.title.clone())
    }

    /// True when both events refer to the same (artist, title)
    pub fn same_song(&self, other: &PlayEvent) -> bool {
        self.artist == other.artist && self.title == other.title
    }
}

/// Set of distinct songs, keyed by `Song::canonical_key`
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SongSet {
    keys: BTreeSet<String>,
}

impl SongSet {
    pub fn from_events(events: &[PlayEvent]) -> Self {
        let mut set = SongSet::default();
        for event in events {
            set.insert(&event.song());
        }
        set
    }

    /// Returns true if the song was not already present
    pub fn insert(&mut self, song: &Song) -> bool {
        self.keys.insert(song.canonical_key())
    }

    pub fn contains(&self, song: &Song) -> bool {
        self.keys.contains(&song.canonical_key())
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Response structure for the user.getrecenttracks API call
#[derive(Debug, Deserialize)]
pub struct RecentTracksResponse {
    #[serde(rename = "recenttracks", alias = "recentTracks")]
    pub recent_tracks: RecentTracks,
}

#[derive(Debug, Deserialize)]
pub struct RecentTracks {
    #[serde(default)]
    pub track: OneOrMany<Track>,
    #[serde(rename = "@attr", default)]
    pub attr: PageAttributes,
}

/// Last.fm collapses single-element arrays into a bare object
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

/// Page information; every field arrives as a string and may be missing
#[derive(Debug, Default, Deserialize)]
#[allow(dead_code)]
pub struct PageAttributes {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub page: Option<String>,
    #[serde(rename = "perPage", default)]
    pub per_page: Option<String>,
    #[serde(rename = "totalPages", default)]
    pub total_pages: Option<String>,
    #[serde(default)]
    pub total: Option<String>,
}

impl PageAttributes {
    /// Total page count reported by the API, never less than one
    pub fn total_pages(&self) -> u32 {
        self.total_pages
            .as_deref()
            .and_then(|pages| pages.trim().parse::<u32>().ok())
            .unwrap_or(1)
            .max(1)
    }
}

#[derive(Debug, Deserialize)]
pub struct Track {
    pub artist: TextField,
    pub name: String,
    #[serde(default)]
    #[allow(dead_code)]
    pub album: Option<TextField>,
    #[serde(default)]
    pub date: Option<TrackDate>,
    #[serde(rename = "@attr", default)]
    pub attr: Option<TrackAttributes>,
}

impl Track {
    pub fn is_now_playing(&self) -> bool {
        self.attr
            .as_ref()
            .and_then(|attr| attr.nowplaying.as_deref())
            .is_some_and(|flag| flag.eq_ignore_ascii_case("true"))
    }

    /// Scrobble time, if the `uts` field is present and parses
    pub fn played_at(&self) -> Option<DateTime<Utc>> {
        let uts = self.date.as_ref()?.uts.trim().parse::<i64>().ok()?;
        DateTime::from_timestamp(uts, 0)
    }
}

impl From<Track> for PlayEvent {
    fn from(track: Track) -> Self {
        let played_at = track.played_at();
        PlayEvent::new(track.artist.text, track.name, played_at)
    }
}

#[derive(Debug, Deserialize)]
pub struct TextField {
    #[serde(rename = "#text", default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackDate {
    #[serde(default)]
    pub uts: String,
    #[serde(rename = "#text", default)]
    #[allow(dead_code)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct TrackAttributes {
    #[serde(default)]
    pub nowplaying: Option<String>,
}

/// Error body returned by the API, e.g. `{"error": 29, "message": "Rate limit exceeded"}`
#[derive(Debug, Deserialize)]
pub struct ApiErrorResponse {
    pub error: u32,
    pub message: String,
}

impl ApiErrorResponse {
    /// Error codes worth retrying: operation failed, service offline,
    /// temporarily unavailable and rate limit exceeded
    pub fn is_transient(&self) -> bool {
        matches!(self.error, 8 | 11 | 16 | 29)
    }
}
