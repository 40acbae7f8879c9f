use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{info, warn};
use std::path::PathBuf;

mod cache;
mod client;
mod config;
mod error;
mod ingest;
mod models;
mod playlist;
mod sink;


use crate::cache::{Cache, FileCache, MemoryCache};
use crate::client::LastFmClient;
use crate::config::load_config;
use crate::ingest::HistoryIngestor;
use crate::models::Song;
use crate::playlist::utils::SongIndex;
use crate::playlist::{GeneratorConfig, PlaylistGenerator, PlaylistSummary, SessionGapPolicy};
use crate::sink::{ConsoleSink, JsonFileSink, PlaylistSink};

#[derive(Parser)]
#[command(name = "scrobble-playlist")]
#[command(about = "Builds a playlist from your Last.fm history with a Markov chain")]
#[command(version)]
struct Args {
    /// Last.fm user whose history is used
    #[arg(short = 'u', long = "user")]
    user: String,

    /// Number of songs in the playlist, including the first one
    #[arg(short = 'l', long = "length")]
    length: Option<usize>,

    /// Title of the song to start with (defaults to the last song played)
    #[arg(short = 't', long = "title")]
    title: Option<String>,

    /// Artist of the song to start with
    #[arg(short = 'a', long = "artist")]
    artist: Option<String>,

    /// Never let this many songs by one artist play in a row
    #[arg(long = "max-same-artist")]
    max_same_artist: Option<usize>,

    /// Path to a generator configuration JSON file
    #[arg(short = 'c', long = "config")]
    config_file: Option<String>,

    /// Path to a settings JSON file (API key, cache directory)
    #[arg(short = 's', long = "settings", default_value = "config.json")]
    settings_file: PathBuf,

    /// Link plays regardless of the time between them
    #[arg(long = "permissive-sessions")]
    permissive_sessions: bool,

    /// Don't read or write the history cache
    #[arg(long = "no-cache")]
    no_cache: bool,

    /// Write the playlist as JSON to this file instead of printing it
    #[arg(short = 'o', long = "output")]
    output: Option<PathBuf>,

    /// Write the transition table to this file
    #[arg(long = "dump-chain")]
    dump_chain: Option<PathBuf>,

    /// Publish a shorter playlist if generation stops early
    #[arg(long = "allow-partial")]
    allow_partial: bool,

    /// Quiet mode - only warnings and errors
    #[arg(short = 'q', long = "quiet")]
    quiet: bool,

    /// Verbose mode - debug output
    #[arg(short = 'v', long = "verbose")]
    verbose: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.quiet {
        "warn"
    } else if args.verbose {
        "debug"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level)).init();

    let config = load_config(Some(&args.settings_file))?;
    let generator_config = build_generator_config(&args)?;

    let store: Box<dyn Cache> = match (&config.cache_dir, args.no_cache) {
        (Some(dir), false) => {
            info!("Caching history in {}", dir.display());
            Box::new(FileCache::new(dir.clone()))
        }
        _ => Box::new(MemoryCache::new()),
    };

    let client = LastFmClient::new(config.api_url.clone())
        .with_timeout(config.request_timeout)
        .with_max_attempts(config.max_attempts);

    // Fetch the whole history
    let history = HistoryIngestor::new(&client, store.as_ref(), config.api_key.clone())
        .ingest(&args.user)
        .with_context(|| format!("Couldn't read the play history of '{}'", args.user))?;
    let index = SongIndex::from_history(&history);
    info!(
        "Got {} scrobbles ({} distinct songs) from Last.fm",
        history.len(),
        index.len()
    );

    let generator = PlaylistGenerator::new(generator_config);
    let table = generator.build_chain(&history);
    if table.is_empty() {
        warn!("No two plays share a session, so the playlist can't grow past its first song");
    } else {
        info!("Built a chain with {} songs", table.len());
    }

    if let Some(path) = &args.dump_chain {
        let file = std::fs::File::create(path)
            .with_context(|| format!("Failed to create {}", path.display()))?;
        table.write_summary(std::io::BufWriter::new(file))?;
        info!("Wrote the chain to {}", path.display());
    }

    let seed = choose_seed(&args, &index)?;
    info!("Starting from {seed}");
    match cache::read_unique_songs(store.as_ref(), &args.user) {
        Ok(Some(known)) if !known.is_empty() && !known.contains(&seed) => {
            warn!("{seed} was never played; the chain will be searched by title")
        }
        Ok(_) => {}
        Err(e) => warn!("Couldn't read the cached song list: {e}"),
    }

    let songs = match generator.generate_playlist(&table, seed, rand::thread_rng()) {
        Ok(songs) => songs,
        Err(e) if args.allow_partial => {
            warn!("{e}; publishing the shorter playlist");
            e.into_partial()
        }
        Err(e) => {
            return Err(anyhow!(e).context("Use --allow-partial to publish the shorter playlist anyway"));
        }
    };

    let summary = PlaylistSummary::from_songs(&songs);
    info!(
        "Playlist: {} songs by {} artists, longest run by one artist: {}",
        summary.total_songs, summary.artist_count, summary.longest_artist_run
    );
    let top: Vec<String> = summary
        .top_artists
        .iter()
        .take(3)
        .map(|(artist, count)| format!("{artist} ({count})"))
        .collect();
    info!("Top artists: {}", top.join(", "));

    let sink: Box<dyn PlaylistSink> = match &args.output {
        Some(path) => Box::new(JsonFileSink::new(path.clone())),
        None => Box::new(ConsoleSink),
    };
    let location = sink.publish(&args.user, &songs)?;
    info!("Playlist published to {location}");

    Ok(())
}

/// Generator settings from the optional config file, overridden by flags
fn build_generator_config(args: &Args) -> Result<GeneratorConfig> {
    let mut config = match &args.config_file {
        Some(path) => GeneratorConfig::load_from_file(path)?,
        None => GeneratorConfig::default(),
    };
    if let Some(length) = args.length {
        config.length = length;
    }
    if let Some(max) = args.max_same_artist {
        config.max_consecutive_by_same_artist = max;
    }
    if args.permissive_sessions {
        config.session_gap = SessionGapPolicy::Permissive;
    }
    Ok(config)
}

/// The song named on the command line, or the last song played
fn choose_seed(args: &Args, index: &SongIndex) -> Result<Song> {
    match (&args.title, &args.artist) {
        (Some(title), artist) => Ok(index
            .resolve(title, artist.as_deref())
            .cloned()
            .unwrap_or_else(|| Song::new(artist.clone().unwrap_or_default(), title.clone()))),
        (None, Some(_)) => Err(anyhow!("--artist needs --title")),
        (None, None) => index
            .latest()
            .cloned()
            .ok_or_else(|| anyhow!("The history has no songs to start from")),
    }
}
