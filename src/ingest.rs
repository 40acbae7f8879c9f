use crate::cache::{self, Cache};
use crate::client::{HistoryQuery, PageFetcher};
use crate::error::{FetchError, IngestError};
use crate::models::{PlayEvent, SongSet};
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use std::thread;

/// Maximum number of pages fetched concurrently
pub const PAGE_BATCH_SIZE: u32 = 100;

type PageSlot = Option<Result<Vec<PlayEvent>, FetchError>>;

/// Retrieves a user's complete scrobble history in chronological order
pub struct HistoryIngestor<'a> {
    fetcher: &'a dyn PageFetcher,
    cache: &'a dyn Cache,
    api_key: String,
    batch_size: u32,
}

impl<'a> HistoryIngestor<'a> {
    pub fn new(fetcher: &'a dyn PageFetcher, cache: &'a dyn Cache, api_key: impl Into<String>) -> Self {
        HistoryIngestor {
            fetcher,
            cache,
            api_key: api_key.into(),
            batch_size: PAGE_BATCH_SIZE,
        }
    }

    #[cfg(test)]
    pub fn with_batch_size(mut self, batch_size: u32) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Fetch everything scrobbled since the cached history, merge it in and
    /// return the whole history, oldest first
    pub fn ingest(&self, user: &str) -> Result<Vec<PlayEvent>, IngestError> {
        let cached = self.read_cached(user);
        let last_known = latest_timestamp(&cached);
        let from = last_known.map_or(0, |time| time.timestamp() + 1);

        let query = HistoryQuery::recent_tracks(user, &self.api_key, from);
        let first = self
            .fetcher
            .fetch_page(&query, 1)
            .map_err(|source| IngestError::Fetch { page: 1, source })?;
        let total_pages = first.total_pages.max(1);
        info!("Fetching {total_pages} page(s) of history for '{user}' (from={from})");

        let mut pages = vec![first.events];
        pages.extend(self.fetch_remaining(&query, total_pages)?);

        let fresh = reassemble(pages);
        info!("Fetched {} new scrobbles, {} cached", fresh.len(), cached.len());
        let events = merge(cached, fresh, last_known);

        if events.is_empty() {
            return Err(IngestError::EmptyHistory {
                user: user.to_string(),
            });
        }

        self.persist(user, &events);
        Ok(events)
    }

    fn read_cached(&self, user: &str) -> Vec<PlayEvent> {
        match cache::read_history(self.cache, user) {
            Ok(Some(events)) if !events.is_empty() => events,
            Ok(_) => {
                info!("No cached history for '{user}', fetching everything");
                Vec::new()
            }
            Err(e) => {
                warn!("Ignoring unreadable cached history for '{user}': {e}");
                Vec::new()
            }
        }
    }

    fn persist(&self, user: &str, events: &[PlayEvent]) {
        if let Err(e) = cache::write_history(self.cache, user, events) {
            warn!("Couldn't cache history for '{user}': {e}");
        }
        let unique = SongSet::from_events(events);
        debug!("History for '{user}' holds {} distinct songs", unique.len());
        if let Err(e) = cache::write_unique_songs(self.cache, user, &unique) {
            warn!("Couldn't cache distinct songs for '{user}': {e}");
        }
    }

    /// Fetch pages 2..=total_pages in batches, one worker per page. Each batch
    /// finishes completely before the next one starts, and only one batch of
    /// results is buffered before it joins the rest.
    fn fetch_remaining(
        &self,
        query: &HistoryQuery,
        total_pages: u32,
    ) -> Result<Vec<Vec<PlayEvent>>, IngestError> {
        let mut pages = Vec::new();
        let mut start = 2;

        while start <= total_pages {
            let end = batch_end(start, self.batch_size, total_pages);
            debug!("Fetching pages {start}..={end}");

            let mut batch: Vec<PageSlot> = (start..=end).map(|_| None).collect();
            let fetcher = self.fetcher;
            thread::scope(|scope| {
                for (offset, slot) in batch.iter_mut().enumerate() {
                    let page = start + offset as u32;
                    scope.spawn(move || {
                        *slot = Some(fetcher.fetch_page(query, page).map(|p| p.events));
                    });
                }
            });

            let mut failure = None;
            for (offset, slot) in batch.into_iter().enumerate() {
                let page = start + offset as u32;
                match slot {
                    Some(Ok(events)) => pages.push(events),
                    Some(Err(source)) => {
                        failure.get_or_insert(IngestError::Fetch { page, source });
                    }
                    None => {
                        failure.get_or_insert(IngestError::Fetch {
                            page,
                            source: FetchError::permanent("page was never fetched"),
                        });
                    }
                }
            }
            if let Some(e) = failure {
                return Err(e);
            }

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(pages)
    }
}

/// Last page of the batch containing `start`. Batches end on multiples of
/// `batch_size`, so the first batch is 2..=100, then 101..=200 and so on.
fn batch_end(start: u32, batch_size: u32, total_pages: u32) -> u32 {
    (((start - 1) / batch_size + 1) * batch_size).min(total_pages)
}

/// Most recent known timestamp in an ascending history
fn latest_timestamp(events: &[PlayEvent]) -> Option<DateTime<Utc>> {
    events.iter().rev().find_map(|event| event.played_at)
}

/// Pages arrive newest first, and so do the tracks within each page.
/// Reverse both to get the oldest scrobble first.
pub fn reassemble(pages: Vec<Vec<PlayEvent>>) -> Vec<PlayEvent> {
    pages
        .into_iter()
        .rev()
        .flat_map(|page| page.into_iter().rev())
        .collect()
}

/// Append freshly fetched events after the cached ones, skipping any that
/// aren't newer than the cached tail. Without a known timestamp the fetch
/// started from the beginning, so it replaces the cached events.
pub fn merge(
    cached: Vec<PlayEvent>,
    fresh: Vec<PlayEvent>,
    last_known: Option<DateTime<Utc>>,
) -> Vec<PlayEvent> {
    let Some(known) = last_known else {
        if !cached.is_empty() {
            debug!("Cached history has no timestamps, replacing {} events", cached.len());
        }
        return fresh;
    };
    let mut merged = cached;
    merged.extend(
        fresh
            .into_iter()
            .filter(|event| event.played_at.is_none_or(|played_at| played_at > known)),
    );
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CachePurpose, MemoryCache, MockCache};
    use crate::client::{HistoryPage, MockPageFetcher};
    use crate::error::CacheError;
    use crate::models::Song;
    use std::sync::Mutex;

    fn event(title: &str, uts: i64) -> PlayEvent {
        PlayEvent::new("Artist", title, DateTime::from_timestamp(uts, 0))
    }

    fn titles(events: &[PlayEvent]) -> Vec<&str> {
        events.iter().map(|e| e.title.as_str()).collect()
    }

    /// Serves fixed newest-first pages and records which were requested
    struct FakeHistory {
        pages: Vec<Vec<PlayEvent>>,
        failing_page: Option<u32>,
        requested: Mutex<Vec<(u32, i64)>>,
    }

    impl FakeHistory {
        fn new(pages: Vec<Vec<PlayEvent>>) -> Self {
            FakeHistory {
                pages,
                failing_page: None,
                requested: Mutex::new(Vec::new()),
            }
        }
    }

    impl PageFetcher for FakeHistory {
        fn fetch_page(&self, query: &HistoryQuery, page: u32) -> Result<HistoryPage, FetchError> {
            self.requested.lock().unwrap().push((page, query.from));
            if self.failing_page == Some(page) {
                return Err(FetchError::transient("gave up after 4 attempts"));
            }
            Ok(HistoryPage {
                events: self.pages.get(page as usize - 1).cloned().unwrap_or_default(),
                total_pages: self.pages.len().max(1) as u32,
            })
        }
    }

    #[test]
    fn test_reassemble_reverses_both_axes() {
        let pages = vec![
            vec![event("e6", 6), event("e5", 5)],
            vec![event("e4", 4), event("e3", 3)],
            vec![event("e2", 2), event("e1", 1)],
        ];

        let events = reassemble(pages);
        assert_eq!(titles(&events), vec!["e1", "e2", "e3", "e4", "e5", "e6"]);
    }

    #[test]
    fn test_merge_appends_after_cached_prefix() {
        let cached = vec![event("e1", 1), event("e2", 2)];
        let fresh = reassemble(vec![vec![event("e4", 4), event("e3", 3)]]);

        let merged = merge(cached, fresh, DateTime::from_timestamp(2, 0));
        assert_eq!(titles(&merged), vec!["e1", "e2", "e3", "e4"]);
    }

    #[test]
    fn test_merge_drops_events_already_cached() {
        let cached = vec![event("e1", 1), event("e2", 2)];
        let fresh = vec![event("e2", 2), event("e3", 3)];

        let merged = merge(cached, fresh, DateTime::from_timestamp(2, 0));
        assert_eq!(titles(&merged), vec!["e1", "e2", "e3"]);
    }

    #[test]
    fn test_merge_without_known_timestamp_replaces_cache() {
        let cached = vec![PlayEvent::new("Artist", "One", None), PlayEvent::new("Artist", "Two", None)];
        let fresh = cached.clone();

        let merged = merge(cached, fresh, None);
        assert_eq!(titles(&merged), vec!["One", "Two"]);
    }

    #[test]
    fn test_untimed_cache_does_not_grow_across_runs() {
        let untimed = vec![PlayEvent::new("Artist", "One", None), PlayEvent::new("Artist", "Two", None)];
        let cache = MemoryCache::new();
        cache::write_history(&cache, "bob", &untimed).unwrap();
        let newest_first: Vec<PlayEvent> = untimed.iter().rev().cloned().collect();
        let fetcher = FakeHistory::new(vec![newest_first]);
        let ingestor = HistoryIngestor::new(&fetcher, &cache, "key");

        let first = ingestor.ingest("bob").unwrap();
        let second = ingestor.ingest("bob").unwrap();

        assert_eq!(titles(&first), vec!["One", "Two"]);
        assert_eq!(second, first);
        assert!(fetcher.requested.lock().unwrap().iter().all(|(_, from)| *from == 0));
    }

    #[test]
    fn test_batch_boundaries() {
        assert_eq!(batch_end(2, 100, 350), 100);
        assert_eq!(batch_end(101, 100, 350), 200);
        assert_eq!(batch_end(301, 100, 350), 350);
        assert_eq!(batch_end(2, 100, 7), 7);
    }

    #[test]
    fn test_ingest_full_history_in_batches() {
        // 7 pages of 2 events, newest page first
        let pages: Vec<Vec<PlayEvent>> = (0..7)
            .map(|p| {
                let newest = 14 - 2 * p;
                vec![event(&format!("e{newest}"), newest), event(&format!("e{}", newest - 1), newest - 1)]
            })
            .collect();
        let fetcher = FakeHistory::new(pages);
        let cache = MemoryCache::new();

        let events = HistoryIngestor::new(&fetcher, &cache, "key")
            .with_batch_size(3)
            .ingest("bob")
            .unwrap();

        let expected: Vec<String> = (1..=14).map(|i| format!("e{i}")).collect();
        assert_eq!(titles(&events), expected.iter().map(String::as_str).collect::<Vec<_>>());

        let mut requested: Vec<u32> = fetcher.requested.lock().unwrap().iter().map(|(p, _)| *p).collect();
        requested.sort();
        assert_eq!(requested, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_ingest_resumes_from_cached_tail() {
        let cache = MemoryCache::new();
        cache::write_history(&cache, "bob", &[event("e1", 100), event("e2", 200)]).unwrap();
        let fetcher = FakeHistory::new(vec![vec![event("e4", 400), event("e3", 300)]]);

        let events = HistoryIngestor::new(&fetcher, &cache, "key").ingest("bob").unwrap();

        assert_eq!(titles(&events), vec!["e1", "e2", "e3", "e4"]);
        assert_eq!(fetcher.requested.lock().unwrap()[0], (1, 201));

        let cached = cache::read_history(&cache, "bob").unwrap().unwrap();
        assert_eq!(cached, events);
        let unique = cache::read_unique_songs(&cache, "bob").unwrap().unwrap();
        assert_eq!(unique.len(), 4);
        assert!(unique.contains(&Song::new("Artist", "e3")));
    }

    #[test]
    fn test_corrupt_cache_falls_back_to_full_fetch() {
        let cache = MemoryCache::new();
        cache.set(&CachePurpose::History.key("bob"), b"garbage").unwrap();
        let fetcher = FakeHistory::new(vec![vec![event("e2", 2), event("e1", 1)]]);

        let events = HistoryIngestor::new(&fetcher, &cache, "key").ingest("bob").unwrap();

        assert_eq!(titles(&events), vec!["e1", "e2"]);
        assert_eq!(fetcher.requested.lock().unwrap()[0], (1, 0));
    }

    #[test]
    fn test_failed_page_aborts_ingestion() {
        let mut fetcher = FakeHistory::new(vec![
            vec![event("e4", 4)],
            vec![event("e3", 3)],
            vec![event("e2", 2)],
            vec![event("e1", 1)],
        ]);
        fetcher.failing_page = Some(3);
        let cache = MemoryCache::new();

        let result = HistoryIngestor::new(&fetcher, &cache, "key").ingest("bob");

        match result {
            Err(IngestError::Fetch { page, source }) => {
                assert_eq!(page, 3);
                assert!(source.transient);
            }
            other => panic!("expected fetch error, got {other:?}"),
        }
        // Sibling pages in the batch were still fetched
        assert_eq!(fetcher.requested.lock().unwrap().len(), 4);
        assert!(cache::read_history(&cache, "bob").unwrap().is_none());
    }

    #[test]
    fn test_huge_page_count_fails_with_fetch_error() {
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch_page().returning(|_, page| match page {
            1 => Ok(HistoryPage { events: vec![event("e1", 1)], total_pages: u32::MAX }),
            2 => Err(FetchError::permanent("API error 6: User not found")),
            _ => Ok(HistoryPage::default()),
        });
        let cache = MemoryCache::new();

        let result = HistoryIngestor::new(&fetcher, &cache, "key").ingest("bob");
        assert!(matches!(result, Err(IngestError::Fetch { page: 2, .. })));
    }

    #[test]
    fn test_empty_history_is_an_error() {
        let mut fetcher = MockPageFetcher::new();
        fetcher
            .expect_fetch_page()
            .times(1)
            .returning(|_, _| Ok(HistoryPage { events: vec![], total_pages: 1 }));
        let cache = MemoryCache::new();

        let result = HistoryIngestor::new(&fetcher, &cache, "key").ingest("nobody");
        assert!(matches!(result, Err(IngestError::EmptyHistory { user }) if user == "nobody"));
    }

    #[test]
    fn test_first_page_failure_is_a_fetch_error() {
        let mut fetcher = MockPageFetcher::new();
        fetcher
            .expect_fetch_page()
            .returning(|_, _| Err(FetchError::permanent("API error 6: User not found")));
        let cache = MemoryCache::new();

        let result = HistoryIngestor::new(&fetcher, &cache, "key").ingest("nobody");
        assert!(matches!(result, Err(IngestError::Fetch { page: 1, .. })));
    }

    #[test]
    fn test_cache_write_failure_is_not_fatal() {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Ok(None));
        cache
            .expect_set()
            .returning(|_, _| Err(CacheError::Io(std::io::Error::other("disk full"))));
        let fetcher = FakeHistory::new(vec![vec![event("e1", 1)]]);

        let events = HistoryIngestor::new(&fetcher, &cache, "key").ingest("bob").unwrap();
        assert_eq!(events.len(), 1);
    }

    #[test]
    fn test_query_carries_user_and_key() {
        let mut fetcher = MockPageFetcher::new();
        fetcher.expect_fetch_page().returning(|query, _| {
            assert_eq!(query.user, "bob");
            assert_eq!(query.api_key, "secret");
            assert_eq!(query.limit, 200);
            Ok(HistoryPage { events: vec![event("e1", 1)], total_pages: 1 })
        });
        let cache = MemoryCache::new();

        let events = HistoryIngestor::new(&fetcher, &cache, "secret").ingest("bob").unwrap();
        assert_eq!(titles(&events), vec!["e1"]);
    }
}
