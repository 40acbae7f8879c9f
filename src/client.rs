use crate::error::FetchError;
use crate::models::{ApiErrorResponse, PlayEvent, RecentTracksResponse};
use log::{debug, trace};
use std::time::Duration;
use ureq::AgentBuilder;
use urlencoding::encode;

/// Root of the Last.fm API
pub const DEFAULT_API_URL: &str = "http://ws.audioscrobbler.com/2.0/";

/// Base query shared by every page request of one ingestion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    pub method: String,
    pub user: String,
    pub api_key: String,
    pub limit: u32,
    pub from: i64, // unix seconds, 0 for the whole history
}

impl HistoryQuery {
    pub fn recent_tracks(user: &str, api_key: &str, from: i64) -> Self {
        HistoryQuery {
            method: "user.getrecenttracks".to_string(),
            user: user.to_string(),
            api_key: api_key.to_string(),
            limit: 200,
            from,
        }
    }

    /// Full request URL for one page
    pub fn page_url(&self, base_url: &str, page: u32) -> String {
        format!(
            "{}?method={}&user={}&api_key={}&limit={}&from={}&page={}&format=json",
            base_url,
            encode(&self.method),
            encode(&self.user),
            encode(&self.api_key),
            self.limit,
            self.from,
            page
        )
    }
}

/// One page of history in the order the API returned it (newest first)
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HistoryPage {
    pub events: Vec<PlayEvent>,
    pub total_pages: u32,
}

/// Fetches a single page of play history
#[cfg_attr(test, mockall::automock)]
pub trait PageFetcher: Send + Sync {
    fn fetch_page(&self, query: &HistoryQuery, page: u32) -> Result<HistoryPage, FetchError>;
}

/// Blocking Last.fm client. Every attempt opens a fresh connection.
pub struct LastFmClient {
    base_url: String,
    timeout: Duration,
    max_attempts: u32,
    retry_delay: Duration,
}

impl LastFmClient {
    pub fn new(base_url: impl Into<String>) -> Self {
        LastFmClient {
            base_url: base_url.into(),
            timeout: Duration::from_secs(5),
            max_attempts: 4,
            retry_delay: Duration::from_millis(250),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    fn attempt(&self, url: &str) -> Result<HistoryPage, FetchError> {
        // No idle connections kept, so nothing is reused between attempts
        let agent = AgentBuilder::new()
            .timeout(self.timeout)
            .max_idle_connections(0)
            .build();

        match agent.get(url).call() {
            Ok(response) => {
                let body = response
                    .into_string()
                    .map_err(|e| FetchError::transient(format!("Failed to read body: {e}")))?;
                parse_page(&body)
            }
            Err(ureq::Error::Status(code, response)) => {
                let body = response.into_string().unwrap_or_default();
                Err(classify_status(code, &body))
            }
            Err(ureq::Error::Transport(transport)) => Err(FetchError::transient(format!(
                "HTTP request failed: {transport}"
            ))),
        }
    }
}

impl PageFetcher for LastFmClient {
    fn fetch_page(&self, query: &HistoryQuery, page: u32) -> Result<HistoryPage, FetchError> {
        let url = query.page_url(&self.base_url, page);
        with_retries(self.max_attempts, self.retry_delay, page, || self.attempt(&url))
    }
}

/// Run `attempt` until it succeeds, fails permanently, or `max_attempts` is used up
pub fn with_retries<F>(
    max_attempts: u32,
    retry_delay: Duration,
    page: u32,
    mut attempt: F,
) -> Result<HistoryPage, FetchError>
where
    F: FnMut() -> Result<HistoryPage, FetchError>,
{
    let max_attempts = max_attempts.max(1);
    let mut last_error = FetchError::transient("no attempt made");

    for tries in 1..=max_attempts {
        match attempt() {
            Ok(page) => return Ok(page),
            Err(e) if !e.transient => return Err(e),
            Err(e) => {
                debug!("Page {page}: attempt {tries}/{max_attempts} failed: {e}");
                last_error = e;
            }
        }
        if tries < max_attempts && !retry_delay.is_zero() {
            std::thread::sleep(retry_delay);
        }
    }

    Err(FetchError::transient(format!(
        "gave up after {max_attempts} attempts: {}",
        last_error.message
    )))
}

/// Parse a page body, dropping a leading now-playing track
pub fn parse_page(body: &str) -> Result<HistoryPage, FetchError> {
    let parsed: RecentTracksResponse = match serde_json::from_str(body) {
        Ok(parsed) => parsed,
        Err(parse_error) => {
            // Errors can also arrive with a 200 status
            return Err(match serde_json::from_str::<ApiErrorResponse>(body) {
                Ok(api_error) => classify_api_error(&api_error),
                Err(_) => FetchError::transient(format!("Malformed page body: {parse_error}")),
            });
        }
    };

    let total_pages = parsed.recent_tracks.attr.total_pages();
    let mut tracks = parsed.recent_tracks.track.into_vec();

    if tracks.first().is_some_and(|track| track.is_now_playing()) {
        trace!("Dropping now-playing track '{}'", tracks[0].name);
        tracks.remove(0);
    }

    Ok(HistoryPage {
        events: tracks.into_iter().map(PlayEvent::from).collect(),
        total_pages,
    })
}

/// A non-200 response is transient unless its body names a permanent API error
fn classify_status(code: u16, body: &str) -> FetchError {
    match serde_json::from_str::<ApiErrorResponse>(body) {
        Ok(api_error) => classify_api_error(&api_error),
        Err(_) => FetchError::transient(format!("HTTP status {code}")),
    }
}

fn classify_api_error(api_error: &ApiErrorResponse) -> FetchError {
    let message = format!("API error {}: {}", api_error.error, api_error.message);
    if api_error.is_transient() {
        FetchError::transient(message)
    } else {
        FetchError::permanent(message)
    }
}
