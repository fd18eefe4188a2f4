#![forbid(unsafe_code)]

//! Headless front-end: downloads single videos, syncs playlists into the
//! local database and downloads what was synced.

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use env_logger::Env;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use ytdlp_wrapper::config::{DEFAULT_CONFIG_PATH, RuntimePaths, load_runtime_paths};
use ytdlp_wrapper::download::{BatchEvent, DownloadOutcome, DownloadRequest, Downloader};
use ytdlp_wrapper::extractor::YtDlp;
use ytdlp_wrapper::store::{DownloadStatus, Store};
use ytdlp_wrapper::sync::sync_playlist;
use ytdlp_wrapper::urls::is_playlist_url;

/// Conventional exit status after an interrupt.
const EXIT_CANCELLED: u8 = 130;

#[derive(Parser, Debug)]
#[command(author, version, about = "Download videos and keep playlists in sync with yt-dlp.")]
struct Cli {
    #[arg(
        long = "config",
        value_name = "PATH",
        default_value = DEFAULT_CONFIG_PATH,
        global = true,
        help = "Path to the env config file"
    )]
    config: PathBuf,
    #[arg(
        long = "downloads-dir",
        value_name = "PATH",
        global = true,
        help = "Override the downloads directory"
    )]
    downloads_dir: Option<PathBuf>,
    #[arg(long = "db", value_name = "PATH", global = true, help = "Override the database path")]
    db: Option<PathBuf>,
    #[arg(
        long = "cookies",
        value_name = "PATH",
        global = true,
        help = "Cookies file forwarded to yt-dlp"
    )]
    cookies: Option<PathBuf>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Download a single video.
    Download {
        url: String,
        #[arg(long = "no-prefetch", help = "Skip the metadata lookup before downloading")]
        no_prefetch: bool,
        #[arg(last = true, value_name = "YT_DLP_ARGS")]
        passthrough: Vec<String>,
    },
    /// Extract a playlist or channel and store its new videos.
    Playlist { url: String },
    /// Sync playlist and channel URLs, download anything else.
    Get {
        url: String,
        #[arg(last = true, value_name = "YT_DLP_ARGS")]
        passthrough: Vec<String>,
    },
    /// Download every stored video of a playlist not yet completed.
    DownloadPlaylist {
        id: String,
        #[arg(last = true, value_name = "YT_DLP_ARGS")]
        passthrough: Vec<String>,
    },
    /// List download jobs, newest first.
    History {
        #[arg(long)]
        json: bool,
        #[arg(long, value_name = "STATUS")]
        status: Option<DownloadStatus>,
    },
    /// List stored playlists.
    Playlists {
        #[arg(long)]
        json: bool,
    },
    /// Show the stored videos of a playlist.
    Show { id: String },
    /// Delete a playlist and its stored videos.
    RemovePlaylist { id: String },
    /// Check that yt-dlp can be run.
    Check,
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::Builder::from_env(Env::default().default_filter_or("warn")).init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            eprintln!("Error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let paths = resolve_paths(&cli)?;
    let tool = paths.tool();

    if let Command::Check = cli.command {
        tool.ensure_available()?;
        println!("{} is available.", tool.program().display());
        return Ok(ExitCode::SUCCESS);
    }

    paths.prepare()?;
    let store = Store::open(&paths.db_path)
        .with_context(|| format!("opening database {}", paths.db_path.display()))?;
    let downloader = Downloader::new(&store, &tool, &paths.downloads_dir);

    match cli.command {
        Command::Download {
            url,
            no_prefetch,
            passthrough,
        } => download(&downloader, &url, &passthrough, !no_prefetch).await,
        Command::Playlist { url } => {
            sync(&store, &tool, &url)?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Get { url, passthrough } => {
            if is_playlist_url(&url) {
                sync(&store, &tool, &url)?;
                Ok(ExitCode::SUCCESS)
            } else {
                download(&downloader, &url, &passthrough, true).await
            }
        }
        Command::DownloadPlaylist { id, passthrough } => {
            download_playlist(&downloader, &id, &passthrough).await
        }
        Command::History { json, status } => {
            let records = match status {
                Some(status) => store.list_downloads_by_status(status)?,
                None => store.list_downloads()?,
            };
            if json {
                println!("{}", serde_json::to_string_pretty(&records)?);
            } else if records.is_empty() {
                println!("No downloads recorded.");
            } else {
                for record in &records {
                    println!(
                        "{}  {:<9}  {}  ({})",
                        record.created_at.format("%Y-%m-%d %H:%M:%S"),
                        record.status,
                        record.title,
                        record.url
                    );
                    if let Some(path) = &record.file_path {
                        println!("    file: {path}");
                    }
                    if let Some(error) = &record.error {
                        println!("    error: {error}");
                    }
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Playlists { json } => {
            let playlists = store.list_playlists()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&playlists)?);
            } else if playlists.is_empty() {
                println!("No playlists stored.");
            } else {
                for playlist in &playlists {
                    println!(
                        "{}  {} [{}] saved {}/{} downloaded {}",
                        playlist.id,
                        playlist.title,
                        playlist.channel.as_deref().unwrap_or("-"),
                        playlist.videos_saved,
                        playlist.total_videos,
                        playlist.videos_downloaded
                    );
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::Show { id } => {
            let Some(playlist) = store.get_playlist(&id)? else {
                bail!("no playlist with id {id}");
            };
            println!("{} ({})", playlist.title, playlist.url);
            if let Some(channel) = &playlist.channel {
                println!("Channel: {channel}");
            }
            for video in store.list_playlist_videos(&id)? {
                let mark = if store.has_completed_download(&id, &video.video_url)? {
                    "x"
                } else {
                    " "
                };
                println!(
                    "  [{mark}] {:>4}. {}  {}",
                    video.position, video.video_title, video.video_url
                );
            }
            Ok(ExitCode::SUCCESS)
        }
        Command::RemovePlaylist { id } => {
            if !store.delete_playlist(&id)? {
                bail!("no playlist with id {id}");
            }
            println!("Removed playlist {id}.");
            Ok(ExitCode::SUCCESS)
        }
        Command::Check => Ok(ExitCode::SUCCESS),
    }
}

fn resolve_paths(cli: &Cli) -> Result<RuntimePaths> {
    let mut paths = load_runtime_paths(&cli.config)?;
    if let Some(dir) = &cli.downloads_dir {
        paths.downloads_dir = dir.clone();
    }
    if let Some(db) = &cli.db {
        paths.db_path = db.clone();
    }
    if let Some(cookies) = &cli.cookies {
        paths.cookies_file = Some(cookies.clone());
    }
    Ok(paths)
}

fn sync(store: &Store, tool: &YtDlp, url: &str) -> Result<()> {
    tool.ensure_available()?;
    println!("Extracting {url}...");
    let report = sync_playlist(store, tool, url)?;
    if report.created {
        println!(
            "Saved playlist {} with {} video(s).",
            report.playlist_id, report.new_videos
        );
    } else {
        println!(
            "Playlist {} updated: {} new video(s).",
            report.playlist_id, report.new_videos
        );
    }
    Ok(())
}

async fn download(
    downloader: &Downloader<'_>,
    url: &str,
    passthrough: &[String],
    prefetch_metadata: bool,
) -> Result<ExitCode> {
    let cancel = cancel_on_ctrl_c();
    let request = DownloadRequest {
        url,
        passthrough,
        playlist_id: None,
        prefetch_metadata,
    };
    let outcome = downloader
        .run(request, &cancel, |progress| println!("  {progress}"))
        .await?;
    Ok(report_outcome(&outcome))
}

async fn download_playlist(
    downloader: &Downloader<'_>,
    playlist_id: &str,
    passthrough: &[String],
) -> Result<ExitCode> {
    let cancel = cancel_on_ctrl_c();
    let summary = downloader
        .download_playlist(playlist_id, passthrough, &cancel, |event| match event {
            BatchEvent::Starting {
                index,
                total,
                title,
            } => {
                println!();
                println!("[{index}/{total}] {title}");
            }
            BatchEvent::Progress(progress) => println!("  {progress}"),
            BatchEvent::Finished(outcome) => {
                report_outcome(outcome);
            }
        })
        .await?;

    println!();
    println!(
        "Completed {}, failed {}, already downloaded {}.",
        summary.completed, summary.failed, summary.skipped
    );
    if summary.cancelled {
        return Ok(ExitCode::from(EXIT_CANCELLED));
    }
    if summary.failed > 0 {
        return Ok(ExitCode::FAILURE);
    }
    Ok(ExitCode::SUCCESS)
}

fn report_outcome(outcome: &DownloadOutcome) -> ExitCode {
    match outcome {
        DownloadOutcome::Completed { file_path, .. } => {
            println!("  Saved to {file_path}");
            ExitCode::SUCCESS
        }
        DownloadOutcome::Cancelled { .. } => {
            eprintln!("  Download cancelled.");
            ExitCode::from(EXIT_CANCELLED)
        }
        DownloadOutcome::Failed { error, .. } => {
            eprintln!("  Download failed: {error}");
            ExitCode::FAILURE
        }
    }
}

/// Token cancelled on the first Ctrl+C; a second one exits immediately.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        eprintln!();
        eprintln!("Interrupt received, cancelling... (press Ctrl+C again to quit)");
        trigger.cancel();
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Second interrupt, exiting.");
            std::process::exit(i32::from(EXIT_CANCELLED));
        }
    });
    token
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn download_collects_passthrough_after_separator() {
        let cli = Cli::try_parse_from([
            "ytdlp_wrapper",
            "download",
            "https://youtu.be/abc",
            "--",
            "-f",
            "bestaudio",
        ])
        .unwrap();
        match cli.command {
            Command::Download {
                url,
                no_prefetch,
                passthrough,
            } => {
                assert_eq!(url, "https://youtu.be/abc");
                assert!(!no_prefetch);
                assert_eq!(passthrough, vec!["-f", "bestaudio"]);
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn global_overrides_apply_after_subcommand() {
        let cli = Cli::try_parse_from([
            "ytdlp_wrapper",
            "history",
            "--status",
            "failed",
            "--db",
            "/tmp/state.db",
            "--config",
            "/nonexistent/ytdlp-wrapper.env",
        ])
        .unwrap();
        let paths = resolve_paths(&cli).unwrap();
        assert_eq!(paths.db_path, PathBuf::from("/tmp/state.db"));
        assert!(matches!(
            cli.command,
            Command::History {
                json: false,
                status: Some(DownloadStatus::Failed)
            }
        ));
    }

    #[test]
    fn unknown_status_is_rejected() {
        assert!(Cli::try_parse_from(["ytdlp_wrapper", "history", "--status", "done"]).is_err());
    }
}
