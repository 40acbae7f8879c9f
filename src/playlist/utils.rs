use crate::models::{PlayEvent, Song, SongSet};

/// Lower-case a title and strip punctuation. Symbols such as `+` or `$` stay.
/// Used for chain lookups.
pub fn normalize_title(title: &str) -> String {
    title
        .to_lowercase()
        .chars()
        .filter(|c| !is_punctuation(*c))
        .collect()
}

/// Punctuation in the Unicode sense: connectors, dashes, brackets, quotes and
/// other marks, but not math or currency symbols
fn is_punctuation(c: char) -> bool {
    if c.is_ascii() {
        return c.is_ascii_punctuation() && !matches!(c, '$' | '+' | '<' | '=' | '>' | '^' | '`' | '|' | '~');
    }
    matches!(
        c,
        '\u{a1}' | '\u{a7}' | '\u{ab}' | '\u{b6}' | '\u{b7}' | '\u{bb}' | '\u{bf}'
            | '\u{2010}'..='\u{2027}'
            | '\u{2030}'..='\u{2043}'
            | '\u{2045}'..='\u{2051}'
            | '\u{2053}'..='\u{205e}'
            | '\u{3001}'..='\u{3003}'
            | '\u{3008}'..='\u{3011}'
            | '\u{3014}'..='\u{301f}'
            | '\u{fe10}'..='\u{fe19}'
            | '\u{fe30}'..='\u{fe4f}'
            | '\u{ff01}'..='\u{ff03}'
            | '\u{ff05}'..='\u{ff0a}'
            | '\u{ff0c}'..='\u{ff0f}'
    )
}

/// Lower-case and keep only letters, digits and whitespace. Hyphens become
/// spaces so the parts of a hyphenated word don't get stuck together when
/// searching.
pub fn search_normalize(text: &str) -> String {
    text.to_lowercase()
        .chars()
        .filter_map(|c| match c {
            '-' => Some(' '),
            c if c.is_alphanumeric() || c.is_whitespace() => Some(c),
            _ => None,
        })
        .collect()
}

/// Distinct songs from a history, most recently played first
pub struct SongIndex {
    songs: Vec<Song>,
}

impl SongIndex {
    pub fn from_history(events: &[PlayEvent]) -> Self {
        let mut seen = SongSet::default();
        let songs = events
            .iter()
            .rev()
            .map(PlayEvent::song)
            .filter(|song| seen.insert(song))
            .collect();
        SongIndex { songs }
    }

    pub fn len(&self) -> usize {
        self.songs.len()
    }

    /// The song played most recently
    pub fn latest(&self) -> Option<&Song> {
        self.songs.first()
    }

    /// Find a song in the history by title and, optionally, artist.
    /// Exact matches win over normalized ones; among equals the most
    /// recently played song is picked.
    pub fn resolve(&self, title: &str, artist: Option<&str>) -> Option<&Song> {
        let artist_matches = |song: &Song| {
            artist.is_none_or(|artist| search_normalize(&song.artist) == search_normalize(artist))
        };

        if let Some(song) = self
            .songs
            .iter()
            .find(|song| song.title == title && artist.is_none_or(|a| song.artist == a))
        {
            return Some(song);
        }

        let wanted = search_normalize(title);
        if wanted.trim().is_empty() {
            return None;
        }
        self.songs
            .iter()
            .find(|song| search_normalize(&song.title) == wanted && artist_matches(song))
            .or_else(|| {
                self.songs.iter().find(|song| {
                    search_normalize(&song.title).contains(&wanted)
                        && artist_matches(song)
                })
            })
    }
}
