use crate::client::DEFAULT_API_URL;
use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Application configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub api_key: String,
    pub api_url: String,
    pub cache_dir: Option<PathBuf>,
    pub request_timeout: Duration,
    pub max_attempts: u32,
}

/// Shape of the optional JSON settings file
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
struct SettingsFile {
    lastfm_key: Option<String>,
    api_url: Option<String>,
    cache_dir: Option<PathBuf>,
    request_timeout_secs: Option<u64>,
    max_attempts: Option<u32>,
}

/// Load configuration from a JSON settings file, falling back to `.env`
/// and the environment when the file can't be read
pub fn load_config(settings_path: Option<&Path>) -> Result<Config> {
    // Load `.env` file if present
    dotenv::dotenv().ok();

    let settings = match settings_path.map(std::fs::read_to_string) {
        Some(Ok(content)) => serde_json::from_str::<SettingsFile>(&content)
            .context("Failed to parse settings file")?,
        Some(Err(e)) => {
            log::debug!("Settings file unavailable ({e}), using environment");
            SettingsFile::default()
        }
        None => SettingsFile::default(),
    };

    resolve(settings, |name| std::env::var(name).ok())
}

fn resolve(settings: SettingsFile, env: impl Fn(&str) -> Option<String>) -> Result<Config> {
    let api_key = settings
        .lastfm_key
        .or_else(|| env("LASTFM_KEY"))
        .filter(|key| !key.trim().is_empty())
        .ok_or_else(|| anyhow!("No Last.fm API key: set LASTFM_KEY or 'lastfm-key' in the settings file"))?;

    let api_url = settings
        .api_url
        .or_else(|| env("LASTFM_API_URL"))
        .unwrap_or_else(|| DEFAULT_API_URL.to_string());

    let cache_dir = settings
        .cache_dir
        .or_else(|| env("SCROBBLE_CACHE_DIR").map(PathBuf::from))
        .or_else(|| dirs::cache_dir().map(|dir| dir.join("scrobble-playlist")));

    Ok(Config {
        api_key,
        api_url,
        cache_dir,
        request_timeout: Duration::from_secs(settings.request_timeout_secs.unwrap_or(5)),
        max_attempts: settings.max_attempts.unwrap_or(4),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env_from(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_settings_file_wins_over_environment() {
        let settings: SettingsFile = serde_json::from_str(
            r#"{"lastfm-key": "file-key", "cache-dir": "/tmp/cache", "max-attempts": 2}"#,
        )
        .unwrap();
        let config = resolve(settings, env_from(&[("LASTFM_KEY", "env-key")])).unwrap();

        assert_eq!(config.api_key, "file-key");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/tmp/cache")));
        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.api_url, DEFAULT_API_URL);
    }

    #[test]
    fn test_environment_fallback() {
        let config = resolve(
            SettingsFile::default(),
            env_from(&[
                ("LASTFM_KEY", "env-key"),
                ("LASTFM_API_URL", "http://localhost:9000/"),
                ("SCROBBLE_CACHE_DIR", "/var/cache/scrobbles"),
            ]),
        )
        .unwrap();

        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.api_url, "http://localhost:9000/");
        assert_eq!(config.cache_dir, Some(PathBuf::from("/var/cache/scrobbles")));
    }

    #[test]
    fn test_missing_key_is_an_error() {
        let err = resolve(SettingsFile::default(), env_from(&[("LASTFM_KEY", "  ")])).unwrap_err();
        assert!(err.to_string().contains("LASTFM_KEY"));
    }

    #[test]
    fn test_malformed_settings_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"{ nope").unwrap();

        assert!(load_config(Some(file.path())).is_err());
    }
}
