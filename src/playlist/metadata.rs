use crate::models::Song;
use std::collections::HashMap;

/// Statistics about a generated playlist
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlaylistSummary {
    pub total_songs: usize,
    pub artist_count: usize,
    pub longest_artist_run: usize, // most consecutive songs by one artist
    pub top_artists: Vec<(String, usize)>, // most frequent first, ties by name
}

impl PlaylistSummary {
    pub fn from_songs(songs: &[Song]) -> Self {
        let mut artist_counts: HashMap<&str, usize> = HashMap::new();
        for song in songs {
            *artist_counts.entry(song.artist.as_str()).or_insert(0) += 1;
        }

        let mut longest_artist_run = 0;
        let mut run = 0;
        for (index, song) in songs.iter().enumerate() {
            run = match index.checked_sub(1).map(|prev| &songs[prev]) {
                Some(prev) if prev.artist == song.artist => run + 1,
                _ => 1,
            };
            longest_artist_run = longest_artist_run.max(run);
        }

        let mut top_artists: Vec<(String, usize)> = artist_counts
            .iter()
            .map(|(artist, count)| (artist.to_string(), *count))
            .collect();
        top_artists.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

        PlaylistSummary {
            total_songs: songs.len(),
            artist_count: artist_counts.len(),
            longest_artist_run,
            top_artists,
        }
    }
}
