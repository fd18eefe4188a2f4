//! Metadata queries against yt-dlp and the argument sets used to drive it.
//!
//! yt-dlp is asked to `--print` pipe-delimited fields instead of dumping JSON:
//! flat playlists can list thousands of entries and one line per entry keeps
//! the parsing trivial. Missing fields come back as `NA`, which is why most of
//! this module is fallback handling for channel names and URLs.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::{debug, warn};
use serde::Serialize;

use crate::error::ExtractError;
use crate::urls::{
    UNKNOWN_CHANNEL, channel_name_from_url, clean_channel_url, is_channel_url, is_missing,
    title_from_url,
};

pub const DEFAULT_PROGRAM: &str = "yt-dlp";
/// Filename template handed to yt-dlp; the tool does the substitution.
pub const OUTPUT_TEMPLATE: &str = "%(title)s.%(ext)s";

const VIDEO_PRINT_FORMAT: &str = "%(id)s|%(title)s|%(channel)s|%(channel_url)s";
const PLAYLIST_PRINT_FORMAT: &str = "%(playlist_title,playlist)s|%(playlist_channel,channel)s|%(playlist_channel_url,channel_url)s|%(playlist_index)s|%(id)s|%(title)s|%(channel)s|%(channel_url)s|%(url)s";
const PLAYLIST_FIELDS: usize = 9;
const CANONICAL_CHANNEL_PREFIX: &str = "https://www.youtube.com/channel/";

/// Single-video metadata as reported by the print query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VideoMetadata {
    pub id: String,
    pub title: String,
    pub channel: String,
    pub channel_url: String,
    pub url: String,
}

/// One entry of a flat playlist listing, with its 1-based position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListedVideo {
    pub position: i64,
    pub id: String,
    pub title: String,
    pub channel: String,
    pub channel_url: String,
    pub url: String,
}

/// Freshly extracted playlist contents. Owned by whoever ran the extraction.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PlaylistSnapshot {
    pub title: String,
    pub channel: String,
    pub channel_url: String,
    pub videos: Vec<ListedVideo>,
}

/// Handle on the yt-dlp executable plus the options every call shares.
#[derive(Debug, Clone)]
pub struct YtDlp {
    program: PathBuf,
    cookies: Option<PathBuf>,
}

impl Default for YtDlp {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, None)
    }
}

impl YtDlp {
    pub fn new(program: impl Into<PathBuf>, cookies: Option<PathBuf>) -> Self {
        Self {
            program: program.into(),
            cookies,
        }
    }

    pub fn program(&self) -> &Path {
        &self.program
    }

    fn program_name(&self) -> String {
        self.program.to_string_lossy().into_owned()
    }

    /// Runs `<program> --version`; anything but a clean exit means the tool
    /// cannot be used.
    pub fn ensure_available(&self) -> Result<(), ExtractError> {
        let status = Command::new(&self.program)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();

        match status {
            Ok(status) if status.success() => Ok(()),
            Ok(status) => {
                debug!("{} --version exited with {status}", self.program_name());
                Err(ExtractError::ToolMissing {
                    program: self.program_name(),
                })
            }
            Err(err) => {
                debug!("{} --version failed to start: {err}", self.program_name());
                Err(ExtractError::ToolMissing {
                    program: self.program_name(),
                })
            }
        }
    }

    /// Arguments for a real download into `output_dir`.
    ///
    /// `--newline` forces one progress line per update so the output can be
    /// parsed line by line.
    pub fn download_args(&self, url: &str, output_dir: &Path, passthrough: &[String]) -> Vec<String> {
        let mut args = vec![
            "--restrict-filenames".to_owned(),
            "-o".to_owned(),
            output_template(output_dir),
            "--newline".to_owned(),
        ];
        if let Some(cookies) = &self.cookies {
            args.push("--cookies".to_owned());
            args.push(cookies.to_string_lossy().into_owned());
        }
        args.extend(passthrough.iter().cloned());
        args.push(url.to_owned());
        args
    }

    pub fn fetch_video_metadata(&self, url: &str) -> Result<VideoMetadata, ExtractError> {
        let output = self.print(&["--print", VIDEO_PRINT_FORMAT], url)?;
        parse_video_metadata(url, &output)
    }

    /// Lists a playlist (or channel) without resolving each entry.
    ///
    /// An empty listing is returned as-is; deciding whether that is an error
    /// is left to the caller.
    pub fn fetch_playlist(&self, url: &str) -> Result<PlaylistSnapshot, ExtractError> {
        let canonical = if is_channel_url(url) {
            self.resolve_canonical_channel_url(url)
        } else {
            None
        };

        let output = self.print(&["--flat-playlist", "--print", PLAYLIST_PRINT_FORMAT], url)?;
        Ok(parse_playlist_listing(url, &output, canonical.as_deref()))
    }

    /// Resolves a vanity channel URL to its `/channel/<id>` form by probing
    /// the first item. Failures only cost the canonical form, so they are
    /// logged and swallowed.
    pub fn resolve_canonical_channel_url(&self, url: &str) -> Option<String> {
        match self.print(&["--print", "%(channel_id)s", "--playlist-items", "1"], url) {
            Ok(output) => canonical_channel_url(&output),
            Err(err) => {
                warn!("could not resolve canonical channel for {url}: {err}");
                None
            }
        }
    }

    fn print(&self, args: &[&str], url: &str) -> Result<String, ExtractError> {
        let mut command = Command::new(&self.program);
        command.args(args);
        if let Some(cookies) = &self.cookies {
            command.arg("--cookies").arg(cookies);
        }
        command.arg(url);
        debug!("probing {url} with {} {}", self.program_name(), args.join(" "));

        let output = command.output().map_err(|err| ExtractError::ToolFailed {
            url: url.to_owned(),
            reason: format!("could not start {}: {err}", self.program_name()),
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let detail = stderr
                .lines()
                .rev()
                .find(|line| !line.trim().is_empty())
                .unwrap_or_default()
                .trim();
            let reason = if detail.is_empty() {
                format!("{} exited with {}", self.program_name(), output.status)
            } else {
                format!("{} exited with {}: {detail}", self.program_name(), output.status)
            };
            return Err(ExtractError::ToolFailed {
                url: url.to_owned(),
                reason,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

pub fn output_template(output_dir: &Path) -> String {
    output_dir.join(OUTPUT_TEMPLATE).to_string_lossy().into_owned()
}

/// Parses the `id|title|channel|channel_url` print output.
pub fn parse_video_metadata(url: &str, output: &str) -> Result<VideoMetadata, ExtractError> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    let parts: Vec<&str> = line.splitn(4, '|').collect();
    let [id, title, channel, channel_url] = parts[..] else {
        return Err(ExtractError::InvalidOutput {
            url: url.to_owned(),
            line: line.to_owned(),
        });
    };

    Ok(VideoMetadata {
        id: id.to_owned(),
        title: title.to_owned(),
        channel: channel.to_owned(),
        channel_url: clean_channel_url(channel_url),
        url: url.to_owned(),
    })
}

fn canonical_channel_url(output: &str) -> Option<String> {
    let channel_id = output.trim();
    if is_missing(channel_id) {
        return None;
    }
    Some(format!("{CANONICAL_CHANNEL_PREFIX}{channel_id}"))
}

/// Builds a snapshot from the flat-playlist print output, applying the
/// per-video and playlist-level channel fallbacks.
pub fn parse_playlist_listing(
    playlist_url: &str,
    output: &str,
    canonical_channel_url: Option<&str>,
) -> PlaylistSnapshot {
    let mut snapshot = PlaylistSnapshot::default();

    for line in output.lines().map(str::trim).filter(|line| !line.is_empty()) {
        let parts: Vec<&str> = line.splitn(PLAYLIST_FIELDS, '|').collect();
        let [
            playlist_title,
            playlist_channel,
            playlist_channel_url,
            index,
            id,
            title,
            channel,
            channel_url,
            url,
        ] = parts[..]
        else {
            debug!("skipping unparseable playlist line: {line}");
            continue;
        };

        if is_missing(&snapshot.title) {
            snapshot.title = playlist_title.to_owned();
            snapshot.channel = playlist_channel.to_owned();
            snapshot.channel_url = clean_channel_url(playlist_channel_url);
        }

        let mut video_channel = if is_missing(channel) {
            playlist_channel.to_owned()
        } else {
            channel.to_owned()
        };
        let video_channel_url = if !is_missing(channel_url) {
            clean_channel_url(channel_url)
        } else if let Some(canonical) = canonical_channel_url {
            clean_channel_url(canonical)
        } else {
            clean_channel_url(playlist_channel_url)
        };

        if is_missing(&video_channel) {
            video_channel = if is_missing(&video_channel_url) {
                UNKNOWN_CHANNEL.to_owned()
            } else {
                channel_name_from_url(&video_channel_url)
            };
        }

        let position = index
            .trim()
            .parse::<i64>()
            .unwrap_or(snapshot.videos.len() as i64 + 1);

        snapshot.videos.push(ListedVideo {
            position,
            id: id.to_owned(),
            title: title.to_owned(),
            channel: video_channel,
            channel_url: video_channel_url,
            url: url.to_owned(),
        });
    }

    if is_missing(&snapshot.title) && !snapshot.videos.is_empty() {
        snapshot.title = title_from_url(playlist_url);
    }

    if let Some(canonical) = canonical_channel_url {
        snapshot.channel_url = canonical.to_owned();
    } else if is_missing(&snapshot.channel_url) && is_channel_url(playlist_url) {
        snapshot.channel_url = clean_channel_url(playlist_url);
    }

    if is_missing(&snapshot.channel) && !is_missing(&snapshot.channel_url) {
        snapshot.channel = channel_name_from_url(&snapshot.channel_url);
    }

    if is_missing(&snapshot.channel_url)
        && let Some(video) = snapshot
            .videos
            .iter()
            .find(|video| !is_missing(&video.channel_url))
    {
        snapshot.channel_url = video.channel_url.clone();
        if is_missing(&snapshot.channel) {
            snapshot.channel = video.channel.clone();
        }
    }

    snapshot
}
