//! Best-effort persistent cache for ingested history.
//!
//! Records are opaque byte blobs keyed by a purpose tag plus the user ID.
//! The typed helpers below own the serialization; any failure to read a
//! record is treated like a miss by callers.

use crate::error::CacheError;
use crate::models::{PlayEvent, SongSet};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Mutex;

/// What a cache record holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CachePurpose {
    History,
    UniqueSet,
}

impl CachePurpose {
    pub fn tag(&self) -> &'static str {
        match self {
            CachePurpose::History => "history",
            CachePurpose::UniqueSet => "unique-set",
        }
    }

    pub fn key(&self, user: &str) -> String {
        format!("{}{}", self.tag(), user)
    }
}

/// Simple get/set store. `Ok(None)` means the key is absent.
#[cfg_attr(test, mockall::automock)]
pub trait Cache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError>;
    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError>;
}

/// Cache storing one file per key inside a directory
pub struct FileCache {
    dir: PathBuf,
}

impl FileCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        FileCache { dir: dir.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        let file_name: String = key
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
            .collect();
        self.dir.join(format!("{file_name}.json"))
    }
}

impl Cache for FileCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        fs::create_dir_all(&self.dir)?;
        fs::write(self.path_for(key), value)?;
        Ok(())
    }
}

/// In-process cache, used when persistence is disabled
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), value.to_vec());
        Ok(())
    }
}

/// On-disk shape of a cached history
#[derive(Debug, Serialize, Deserialize)]
struct CachedHistory {
    events: Vec<PlayEvent>,
}

/// Read the ascending event list cached for `user`
pub fn read_history(cache: &dyn Cache, user: &str) -> Result<Option<Vec<PlayEvent>>, CacheError> {
    let Some(bytes) = cache.get(&CachePurpose::History.key(user))? else {
        return Ok(None);
    };
    let cached: CachedHistory = serde_json::from_slice(&bytes)?;
    debug!("Read {} cached events for '{user}'", cached.events.len());
    Ok(Some(cached.events))
}

pub fn write_history(cache: &dyn Cache, user: &str, events: &[PlayEvent]) -> Result<(), CacheError> {
    let record = CachedHistory {
        events: events.to_vec(),
    };
    let bytes = serde_json::to_vec(&record)?;
    cache.set(&CachePurpose::History.key(user), &bytes)
}

/// Read the distinct-song set cached for `user`
pub fn read_unique_songs(cache: &dyn Cache, user: &str) -> Result<Option<SongSet>, CacheError> {
    let Some(bytes) = cache.get(&CachePurpose::UniqueSet.key(user))? else {
        return Ok(None);
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

pub fn write_unique_songs(cache: &dyn Cache, user: &str, songs: &SongSet) -> Result<(), CacheError> {
    let bytes = serde_json::to_vec(songs)?;
    cache.set(&CachePurpose::UniqueSet.key(user), &bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Song;
    use chrono::DateTime;

    #[test]
    fn test_keys_combine_tag_and_user() {
        assert_eq!(CachePurpose::History.key("bob"), "historybob");
        assert_eq!(CachePurpose::UniqueSet.key("bob"), "unique-setbob");
    }

    #[test]
    fn test_file_cache_miss_and_hit() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path().join("nested"));

        assert!(cache.get("historybob").unwrap().is_none());
        cache.set("historybob", b"payload").unwrap();
        assert_eq!(cache.get("historybob").unwrap(), Some(b"payload".to_vec()));
    }

    #[test]
    fn test_file_cache_sanitizes_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileCache::new(dir.path());

        cache.set("history../../etc", b"x").unwrap();
        assert!(dir.path().join("history______etc.json").exists());
    }

    #[test]
    fn test_history_survives_cache() {
        let cache = MemoryCache::new();
        let events = vec![
            PlayEvent::new("A", "One", DateTime::from_timestamp(100, 0)),
            PlayEvent::new("B", "Two", None),
        ];

        write_history(&cache, "bob", &events).unwrap();
        assert_eq!(read_history(&cache, "bob").unwrap(), Some(events));
        assert!(read_history(&cache, "alice").unwrap().is_none());
    }

    #[test]
    fn test_corrupt_history_is_reported() {
        let cache = MemoryCache::new();
        cache.set(&CachePurpose::History.key("bob"), b"{not json").unwrap();

        let result = read_history(&cache, "bob");
        assert!(matches!(result, Err(CacheError::Corrupt(_))));
    }

    #[test]
    fn test_unique_songs_survive_cache() {
        let cache = MemoryCache::new();
        let mut songs = SongSet::default();
        songs.insert(&Song::new("title", "artist"));

        write_unique_songs(&cache, "test", &songs).unwrap();
        let read = read_unique_songs(&cache, "test").unwrap().unwrap();
        assert!(read.contains(&Song::new("title", "artist")));
    }
}
