//! Line-oriented parsing of yt-dlp's human-readable output.
//!
//! yt-dlp has no structured progress channel, so every line is matched against
//! a handful of patterns independently. Lines that match nothing produce no
//! events; that is the normal case for most of the tool's chatter.

use std::path::Path;
use std::sync::LazyLock;

use regex::Regex;

static PROGRESS_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+\.?\d*)%").expect("progress pattern"));
static ETA_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"ETA\s+(\d{2}:\d{2}(?::\d{2})?)").expect("eta pattern"));
static DESTINATION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[download\] Destination: (.+)").expect("destination pattern"));
static ALREADY_DOWNLOADED_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[download\] (.+?) has already been downloaded").expect("already pattern")
});
static MERGER_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\[Merger\] Merging formats into "(.+)""#).expect("merger pattern")
});

/// Structured fact extracted from a single output line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LineEvent {
    Progress { percent: String, eta: Option<String> },
    Destination(String),
    AlreadyDownloaded(String),
    Merged(String),
}

/// Runs every matcher against `line` and returns whatever matched.
pub fn parse_line(line: &str) -> Vec<LineEvent> {
    let mut events = Vec::new();

    if let Some(caps) = DESTINATION_RE.captures(line) {
        events.push(LineEvent::Destination(caps[1].trim().to_owned()));
    }
    if let Some(caps) = ALREADY_DOWNLOADED_RE.captures(line) {
        events.push(LineEvent::AlreadyDownloaded(caps[1].trim().to_owned()));
    }
    if let Some(caps) = MERGER_RE.captures(line) {
        events.push(LineEvent::Merged(caps[1].to_owned()));
    }
    if let Some(progress) = parse_progress(line) {
        events.push(progress);
    }

    events
}

fn parse_progress(line: &str) -> Option<LineEvent> {
    if !line.contains("[download]") || !line.contains('%') {
        return None;
    }
    let percent = PROGRESS_RE.captures(line)?[1].to_owned();
    let eta = ETA_RE.captures(line).map(|caps| caps[1].to_owned());
    Some(LineEvent::Progress { percent, eta })
}

/// File name without directory or extension, used as a display title.
pub fn title_from_path(path: &str) -> String {
    Path::new(path)
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_owned())
}

/// Renders the single-line status shown while a download runs.
pub fn format_progress(percent: &str, eta: Option<&str>) -> String {
    match eta {
        Some(eta) => format!("Progress: {percent}% | ETA: {eta}"),
        None => format!("Progress: {percent}%"),
    }
}

/// What changed after feeding one line to a [`DownloadTracker`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TrackerUpdate {
    /// A new composite progress string; identical consecutive ones are dropped.
    Progress(String),
    /// The one-shot display title for this run.
    TitleCaptured(String),
}

/// Per-run accumulator over parsed lines.
///
/// Holds the last emitted progress string, the captured title and the most
/// recent output path reported by the tool.
#[derive(Debug, Default)]
pub struct DownloadTracker {
    last_progress: Option<String>,
    title: Option<String>,
    output_path: Option<String>,
}

impl DownloadTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with a title already known (e.g. from a metadata lookup) so
    /// destination lines will not replace it.
    pub fn with_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn output_path(&self) -> Option<&str> {
        self.output_path.as_deref()
    }

    pub fn observe(&mut self, line: &str) -> Vec<TrackerUpdate> {
        let mut updates = Vec::new();
        for event in parse_line(line) {
            match event {
                LineEvent::Destination(path) | LineEvent::AlreadyDownloaded(path) => {
                    if self.title.is_none() {
                        let title = title_from_path(&path);
                        self.title = Some(title.clone());
                        updates.push(TrackerUpdate::TitleCaptured(title));
                    }
                    self.output_path = Some(path);
                }
                LineEvent::Merged(path) => self.output_path = Some(path),
                LineEvent::Progress { percent, eta } => {
                    let rendered = format_progress(&percent, eta.as_deref());
                    if self.last_progress.as_deref() != Some(rendered.as_str()) {
                        self.last_progress = Some(rendered.clone());
                        updates.push(TrackerUpdate::Progress(rendered));
                    }
                }
            }
        }
        updates
    }
}
