#![forbid(unsafe_code)]

//! Re-extracts every stored playlist and stores the videos that appeared
//! since the last sync. Meant to run from cron or a systemd timer.

use anyhow::{Context, Result, anyhow, bail};
use env_logger::Env;
use log::warn;
use std::env;
use std::path::PathBuf;
use ytdlp_wrapper::config::{DEFAULT_CONFIG_PATH, load_runtime_paths};
use ytdlp_wrapper::store::Store;
use ytdlp_wrapper::sync::sync_playlist;

#[derive(Debug, Clone, PartialEq, Eq)]
struct RefreshArgs {
    config: PathBuf,
    db: Option<PathBuf>,
}

impl RefreshArgs {
    fn parse() -> Result<Self> {
        Self::from_iter(env::args().skip(1))
    }

    #[cfg(test)]
    fn from_slice(values: &[&str]) -> Result<Self> {
        Self::from_iter(values.iter().map(|value| value.to_string()))
    }

    fn from_iter<I>(iter: I) -> Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut config = PathBuf::from(DEFAULT_CONFIG_PATH);
        let mut db = None;
        let mut args = iter.into_iter();

        while let Some(arg) = args.next() {
            if let Some(value) = arg.strip_prefix("--config=") {
                config = PathBuf::from(value);
                continue;
            }
            if let Some(value) = arg.strip_prefix("--db=") {
                db = Some(PathBuf::from(value));
                continue;
            }

            match arg.as_str() {
                "--config" => {
                    let value = args
                        .next()
                        .ok_or_else(|| anyhow!("--config requires a value"))?;
                    config = PathBuf::from(value);
                }
                "--db" => {
                    let value = args.next().ok_or_else(|| anyhow!("--db requires a value"))?;
                    db = Some(PathBuf::from(value));
                }
                _ => {
                    bail!("unknown argument: {arg}");
                }
            }
        }

        Ok(Self { config, db })
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let RefreshArgs { config, db } = RefreshArgs::parse()?;
    let mut paths = load_runtime_paths(&config)?;
    if let Some(db) = db {
        paths.db_path = db;
    }
    paths.prepare()?;

    let store = Store::open(&paths.db_path)
        .with_context(|| format!("opening database {}", paths.db_path.display()))?;
    let tool = paths.tool();

    let playlists = store.list_playlists()?;
    if playlists.is_empty() {
        println!("No playlists stored in {}.", paths.db_path.display());
        return Ok(());
    }

    tool.ensure_available()?;

    println!("Found {} playlist(s) to refresh.", playlists.len());
    let mut total_new = 0usize;
    let mut failures = 0usize;

    for (index, playlist) in playlists.iter().enumerate() {
        println!();
        println!(
            "[{}/{}] Refreshing: {} ({})",
            index + 1,
            playlists.len(),
            playlist.title,
            playlist.url
        );

        match sync_playlist(&store, &tool, &playlist.url) {
            Ok(report) => {
                total_new += report.new_videos;
                println!("  {} new video(s)", report.new_videos);
            }
            Err(err) => {
                failures += 1;
                warn!("refresh of {} failed: {err:#}", playlist.url);
                eprintln!("  Warning: could not refresh {}: {err:#}", playlist.url);
            }
        }
    }

    println!();
    println!(
        "Refresh complete: {total_new} new video(s), {failures} playlist(s) failed."
    );

    Ok(())
}
