//! Single-video download jobs and the playlist batch built on top of them.
//!
//! A job is recorded as `pending` before yt-dlp starts, enriched while output
//! streams in, and closed with exactly one terminal status. Cancelled and
//! failed runs both sweep partial artifacts out of the output directory; only
//! the recorded status and error text differ.

use std::path::Path;

use anyhow::{Result, bail};
use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;
use walkdir::WalkDir;

use crate::error::RunError;
use crate::extractor::{VideoMetadata, YtDlp, output_template};
use crate::output::{DownloadTracker, TrackerUpdate};
use crate::process;
use crate::store::{DownloadStatus, Store};
use crate::urls::is_missing;

pub const CANCELLED_MESSAGE: &str = "Download cancelled by user";

/// Suffixes yt-dlp uses for files that are still being written.
const PARTIAL_SUFFIXES: [&str; 3] = [".part", ".ytdl", ".temp"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DownloadOutcome {
    Completed { id: String, file_path: String },
    Cancelled { id: String },
    Failed { id: String, error: String },
}

impl DownloadOutcome {
    pub fn id(&self) -> &str {
        match self {
            DownloadOutcome::Completed { id, .. }
            | DownloadOutcome::Cancelled { id }
            | DownloadOutcome::Failed { id, .. } => id,
        }
    }

    pub fn status(&self) -> DownloadStatus {
        match self {
            DownloadOutcome::Completed { .. } => DownloadStatus::Completed,
            DownloadOutcome::Cancelled { .. } => DownloadStatus::Cancelled,
            DownloadOutcome::Failed { .. } => DownloadStatus::Failed,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DownloadRequest<'a> {
    pub url: &'a str,
    /// Extra yt-dlp flags, passed through untouched.
    pub passthrough: &'a [String],
    /// Owning playlist, `None` for orphan downloads.
    pub playlist_id: Option<&'a str>,
    /// Look up title and channel before downloading.
    pub prefetch_metadata: bool,
}

/// Everything a download job needs: the store, the tool and where files go.
#[derive(Debug, Clone, Copy)]
pub struct Downloader<'a> {
    store: &'a Store,
    tool: &'a YtDlp,
    output_dir: &'a Path,
}

impl<'a> Downloader<'a> {
    pub fn new(store: &'a Store, tool: &'a YtDlp, output_dir: &'a Path) -> Self {
        Self {
            store,
            tool,
            output_dir,
        }
    }

    /// Runs one job to its terminal status.
    ///
    /// Only a missing tool or a failed store write on the job record itself
    /// is returned as an error; a failed or cancelled run is an outcome.
    pub async fn run<F>(
        &self,
        request: DownloadRequest<'_>,
        cancel: &CancellationToken,
        mut on_progress: F,
    ) -> Result<DownloadOutcome>
    where
        F: FnMut(&str),
    {
        self.tool.ensure_available()?;

        let metadata = if request.prefetch_metadata {
            self.prefetch(request.url)
        } else {
            None
        };
        let known_title = metadata
            .as_ref()
            .map(|meta| meta.title.as_str())
            .filter(|title| !is_missing(title));

        let id = self
            .store
            .insert_download(request.url, known_title.unwrap_or_default(), request.playlist_id)?;
        info!("download {id} pending for {}", request.url);

        if let Some(meta) = &metadata
            && !is_missing(&meta.channel)
            && let Err(err) = self
                .store
                .update_download_channel(&id, &meta.channel, &meta.channel_url)
        {
            warn!("could not record channel for download {id}: {err:#}");
        }

        let mut tracker = match known_title {
            Some(title) => DownloadTracker::with_title(title),
            None => DownloadTracker::new(),
        };
        let args = self
            .tool
            .download_args(request.url, self.output_dir, request.passthrough);

        let result = process::run(self.tool.program(), &args, cancel, |line| {
            debug!("yt-dlp [{id}]: {}", line.text);
            for update in tracker.observe(&line.text) {
                match update {
                    TrackerUpdate::Progress(progress) => on_progress(&progress),
                    TrackerUpdate::TitleCaptured(title) => {
                        if let Err(err) = self.store.update_download_title(&id, &title) {
                            warn!("could not record title for download {id}: {err:#}");
                        }
                    }
                }
            }
        })
        .await;

        let outcome = match result {
            Ok(()) => {
                let file_path = tracker
                    .output_path()
                    .map(str::to_owned)
                    .unwrap_or_else(|| output_template(self.output_dir));
                if self.finish(&id, DownloadStatus::Completed, Some(&file_path), None)?
                    && let Some(playlist_id) = request.playlist_id
                    && let Err(err) = self.store.increment_videos_downloaded(playlist_id)
                {
                    warn!("could not update downloaded count of playlist {playlist_id}: {err:#}");
                }
                DownloadOutcome::Completed { id, file_path }
            }
            Err(RunError::Cancelled) => {
                cleanup_partial_files(self.output_dir);
                self.finish(&id, DownloadStatus::Cancelled, None, Some(CANCELLED_MESSAGE))?;
                DownloadOutcome::Cancelled { id }
            }
            Err(err) => {
                cleanup_partial_files(self.output_dir);
                let error = err.to_string();
                self.finish(&id, DownloadStatus::Failed, None, Some(&error))?;
                DownloadOutcome::Failed { id, error }
            }
        };

        info!("download {} finished as {}", outcome.id(), outcome.status());
        Ok(outcome)
    }

    fn prefetch(&self, url: &str) -> Option<VideoMetadata> {
        match self.tool.fetch_video_metadata(url) {
            Ok(meta) => Some(meta),
            Err(err) => {
                warn!("metadata lookup failed for {url}, continuing without it: {err}");
                None
            }
        }
    }

    fn finish(
        &self,
        id: &str,
        status: DownloadStatus,
        file_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        let written = self.store.finish_download(id, status, file_path, error)?;
        if !written {
            warn!("download {id} already had a terminal status; {status} not recorded");
        }
        Ok(written)
    }

    /// Downloads every stored entry of a playlist in order, skipping the
    /// ones already completed for it. Stops at the first cancellation.
    pub async fn download_playlist<F>(
        &self,
        playlist_id: &str,
        passthrough: &[String],
        cancel: &CancellationToken,
        mut on_event: F,
    ) -> Result<BatchSummary>
    where
        F: FnMut(BatchEvent<'_>),
    {
        if self.store.get_playlist(playlist_id)?.is_none() {
            bail!("no playlist with id {playlist_id}");
        }
        let videos = self.store.list_playlist_videos(playlist_id)?;
        let total = videos.len();
        let mut summary = BatchSummary::default();

        for (index, video) in videos.iter().enumerate() {
            if cancel.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            if self.store.has_completed_download(playlist_id, &video.video_url)? {
                summary.skipped += 1;
                continue;
            }

            on_event(BatchEvent::Starting {
                index: index + 1,
                total,
                title: &video.video_title,
            });

            let request = DownloadRequest {
                url: &video.video_url,
                passthrough,
                playlist_id: Some(playlist_id),
                prefetch_metadata: false,
            };
            let outcome = self
                .run(request, cancel, |progress| on_event(BatchEvent::Progress(progress)))
                .await?;
            on_event(BatchEvent::Finished(&outcome));

            match outcome {
                DownloadOutcome::Completed { .. } => summary.completed += 1,
                DownloadOutcome::Failed { .. } => summary.failed += 1,
                DownloadOutcome::Cancelled { .. } => {
                    summary.cancelled = true;
                    break;
                }
            }
        }

        Ok(summary)
    }
}

#[derive(Debug)]
pub enum BatchEvent<'a> {
    Starting {
        index: usize,
        total: usize,
        title: &'a str,
    },
    Progress(&'a str),
    Finished(&'a DownloadOutcome),
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub completed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: bool,
}

/// Removes `*.part`, `*.ytdl` and `*.temp` files directly inside `dir`.
/// Failures are logged and skipped; returns how many files were removed.
pub fn cleanup_partial_files(dir: &Path) -> usize {
    let mut removed = 0;

    for entry in WalkDir::new(dir).min_depth(1).max_depth(1) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(err) => {
                warn!("could not scan {} for partial files: {err}", dir.display());
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy();
        if !PARTIAL_SUFFIXES.iter().any(|suffix| name.ends_with(suffix)) {
            continue;
        }
        match std::fs::remove_file(entry.path()) {
            Ok(()) => removed += 1,
            Err(err) => warn!("failed to remove {}: {err}", entry.path().display()),
        }
    }

    if removed > 0 {
        info!("cleaned up {removed} partial file(s) in {}", dir.display());
    }
    removed
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::{TempDir, tempdir};

    #[test]
    fn cleanup_removes_only_partial_files() {
        let dir = tempdir().unwrap();
        for name in ["a.mp4.part", "b.ytdl", "c.temp", "keep.mp4", "notes.part.txt"] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        fs::create_dir(dir.path().join("sub.part")).unwrap();
        fs::write(dir.path().join("sub.part").join("inner.part"), b"x").unwrap();

        assert_eq!(cleanup_partial_files(dir.path()), 3);
        assert!(dir.path().join("keep.mp4").exists());
        assert!(dir.path().join("notes.part.txt").exists());
        assert!(dir.path().join("sub.part").join("inner.part").exists());
        assert!(!dir.path().join("a.mp4.part").exists());
    }

    #[test]
    fn cleanup_of_missing_directory_is_harmless() {
        let dir = tempdir().unwrap();
        assert_eq!(cleanup_partial_files(&dir.path().join("missing")), 0);
    }

    #[tokio::test]
    async fn missing_tool_creates_no_record() {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("downloads.db")).unwrap();
        let tool = YtDlp::new(dir.path().join("no-such-yt-dlp"), None);
        let downloader = Downloader::new(&store, &tool, dir.path());

        let request = DownloadRequest {
            url: "https://youtu.be/abc",
            passthrough: &[],
            playlist_id: None,
            prefetch_metadata: true,
        };
        let err = downloader
            .run(request, &CancellationToken::new(), |_| {})
            .await
            .unwrap_err();

        assert!(err.to_string().contains("not installed"));
        assert!(store.list_downloads().unwrap().is_empty());
    }

    #[cfg(unix)]
    mod with_stub {
        use super::*;
        use crate::sync::reconcile;
        use crate::extractor::{ListedVideo, PlaylistSnapshot};
        use std::os::unix::fs::PermissionsExt;
        use std::path::PathBuf;

        /// Stub answering `--version` and `--print`; `body` handles downloads
        /// with `$dir` set to the output directory.
        fn install_ytdlp_stub(dir: &Path, body: &str) -> PathBuf {
            let script_path = dir.join("yt-dlp");
            let script = format!(
                r#"#!/usr/bin/env bash
if [[ "$1" == "--version" ]]; then
    echo 2025.01.01
    exit 0
fi
if [[ " $* " == *" --print "* ]]; then
    echo "vid1|Prefetched Title|Prefetched Channel|https://www.youtube.com/@prefetched/videos"
    exit 0
fi
prev=""
out=""
for arg in "$@"; do
    if [[ "$prev" == "-o" ]]; then
        out="$arg"
    fi
    prev="$arg"
done
dir="$(dirname "$out")"
{body}
"#
            );
            fs::write(&script_path, script).unwrap();
            let mut perms = fs::metadata(&script_path).unwrap().permissions();
            perms.set_mode(0o755);
            fs::set_permissions(&script_path, perms).unwrap();
            script_path
        }

        struct Fixture {
            _temp: TempDir,
            store: Store,
            tool: YtDlp,
            output_dir: PathBuf,
        }

        fn fixture(body: &str) -> Fixture {
            let temp = tempdir().unwrap();
            let output_dir = temp.path().join("downloads");
            fs::create_dir_all(&output_dir).unwrap();
            let store = Store::open(&temp.path().join("db").join("downloads.db")).unwrap();
            let tool = YtDlp::new(install_ytdlp_stub(temp.path(), body), None);
            Fixture {
                _temp: temp,
                store,
                tool,
                output_dir,
            }
        }

        fn orphan(url: &str, prefetch: bool) -> DownloadRequest<'_> {
            DownloadRequest {
                url,
                passthrough: &[],
                playlist_id: None,
                prefetch_metadata: prefetch,
            }
        }

        const SUCCESS_BODY: &str = r#"
echo "[download] Destination: $dir/Clip_Name.mp4"
echo "[download]  10.0% of 10MiB ETA 00:09"
echo "[download]  10.0% of 10MiB ETA 00:09"
echo "[download]  55.5% of 10MiB ETA 00:04"
echo "[download] Destination: $dir/Other.m4a"
touch "$dir/Clip_Name.mp4"
exit 0
"#;

        #[tokio::test]
        async fn successful_download_captures_title_and_path() {
            let fx = fixture(SUCCESS_BODY);
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            let mut progress = Vec::new();

            let outcome = downloader
                .run(
                    orphan("https://youtu.be/abc", false),
                    &CancellationToken::new(),
                    |line| progress.push(line.to_owned()),
                )
                .await
                .unwrap();

            let DownloadOutcome::Completed { id, file_path } = outcome else {
                panic!("expected completion, got {outcome:?}");
            };
            assert_eq!(
                progress,
                vec![
                    "Progress: 10.0% | ETA: 00:09",
                    "Progress: 55.5% | ETA: 00:04",
                ]
            );
            assert!(file_path.ends_with("Other.m4a"));

            let record = fx.store.get_download(&id).unwrap().unwrap();
            assert_eq!(record.status, DownloadStatus::Completed);
            assert_eq!(record.title, "Clip_Name");
            assert_eq!(record.file_path.as_deref(), Some(file_path.as_str()));
            assert!(record.error.is_none());
        }

        #[tokio::test]
        async fn prefetched_metadata_fills_title_and_channel() {
            let fx = fixture(SUCCESS_BODY);
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);

            let outcome = downloader
                .run(
                    orphan("https://youtu.be/abc", true),
                    &CancellationToken::new(),
                    |_| {},
                )
                .await
                .unwrap();

            let record = fx.store.get_download(outcome.id()).unwrap().unwrap();
            assert_eq!(record.title, "Prefetched Title");
            assert_eq!(record.channel.as_deref(), Some("Prefetched Channel"));
            assert_eq!(
                record.channel_url.as_deref(),
                Some("https://www.youtube.com/@prefetched")
            );
        }

        #[tokio::test]
        async fn failed_download_records_error_and_cleans_up() {
            let fx = fixture(
                r#"
touch "$dir/Broken.mp4.part"
echo "[download]   1.0% of 10MiB ETA 00:30"
echo "ERROR: unable to download video data: HTTP Error 403" >&2
exit 1
"#,
            );
            fs::write(fx.output_dir.join("kept.mp4"), b"done").unwrap();
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);

            let outcome = downloader
                .run(
                    orphan("https://youtu.be/abc", false),
                    &CancellationToken::new(),
                    |_| {},
                )
                .await
                .unwrap();

            let DownloadOutcome::Failed { id, error } = outcome else {
                panic!("expected failure, got {outcome:?}");
            };
            assert!(error.contains("HTTP Error 403"), "{error}");
            assert!(!fx.output_dir.join("Broken.mp4.part").exists());
            assert!(fx.output_dir.join("kept.mp4").exists());

            let record = fx.store.get_download(&id).unwrap().unwrap();
            assert_eq!(record.status, DownloadStatus::Failed);
            assert_eq!(record.error.as_deref(), Some(error.as_str()));
        }

        #[tokio::test]
        async fn cancelled_download_is_recorded_and_cleaned_up() {
            let fx = fixture(
                r#"
touch "$dir/Long.mp4.part" "$dir/Long.mp4.ytdl" "$dir/frag.temp"
echo "[download] Destination: $dir/Long.mp4"
echo "[download]   5.0% of 1GiB ETA 10:00"
exec sleep 30
"#,
            );
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            let token = CancellationToken::new();
            let trigger = token.clone();

            let outcome = downloader
                .run(orphan("https://youtu.be/long", false), &token, |_| {
                    trigger.cancel()
                })
                .await
                .unwrap();

            let DownloadOutcome::Cancelled { id } = outcome else {
                panic!("expected cancellation, got {outcome:?}");
            };
            for leftover in ["Long.mp4.part", "Long.mp4.ytdl", "frag.temp"] {
                assert!(!fx.output_dir.join(leftover).exists(), "{leftover} left behind");
            }

            let record = fx.store.get_download(&id).unwrap().unwrap();
            assert_eq!(record.status, DownloadStatus::Cancelled);
            assert_eq!(record.error.as_deref(), Some(CANCELLED_MESSAGE));
            assert_eq!(record.title, "Long");

            assert!(
                !fx.store
                    .finish_download(&id, DownloadStatus::Completed, Some("x"), None)
                    .unwrap()
            );
            let record = fx.store.get_download(&id).unwrap().unwrap();
            assert_eq!(record.status, DownloadStatus::Cancelled);
        }

        fn stored_playlist(store: &Store, ids: &[&str]) -> String {
            let snapshot = PlaylistSnapshot {
                title: "Batch".into(),
                channel: "Owner".into(),
                channel_url: "https://www.youtube.com/@owner".into(),
                videos: ids
                    .iter()
                    .enumerate()
                    .map(|(index, id)| ListedVideo {
                        position: index as i64 + 1,
                        id: (*id).to_owned(),
                        title: format!("Video {id}"),
                        channel: "Owner".into(),
                        channel_url: "https://www.youtube.com/@owner".into(),
                        url: format!("https://www.youtube.com/watch?v={id}"),
                    })
                    .collect(),
            };
            reconcile(store, "https://www.youtube.com/playlist?list=PLbatch", &snapshot)
                .unwrap()
                .playlist_id
        }

        #[tokio::test]
        async fn playlist_batch_counts_downloads_and_skips_completed() {
            let fx = fixture(SUCCESS_BODY);
            let playlist_id = stored_playlist(&fx.store, &["a", "b"]);
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            let token = CancellationToken::new();

            let mut started = Vec::new();
            let summary = downloader
                .download_playlist(&playlist_id, &[], &token, |event| {
                    if let BatchEvent::Starting { title, .. } = event {
                        started.push(title.to_owned());
                    }
                })
                .await
                .unwrap();

            assert_eq!(started, vec!["Video a", "Video b"]);
            assert_eq!(
                summary,
                BatchSummary {
                    completed: 2,
                    failed: 0,
                    skipped: 0,
                    cancelled: false,
                }
            );
            let playlist = fx.store.get_playlist(&playlist_id).unwrap().unwrap();
            assert_eq!(playlist.videos_downloaded, 2);
            let records = fx.store.list_downloads().unwrap();
            assert!(
                records
                    .iter()
                    .all(|record| record.playlist_id.as_deref() == Some(playlist_id.as_str()))
            );

            let again = downloader
                .download_playlist(&playlist_id, &[], &token, |_| {})
                .await
                .unwrap();
            assert_eq!(again.skipped, 2);
            assert_eq!(again.completed, 0);
            let playlist = fx.store.get_playlist(&playlist_id).unwrap().unwrap();
            assert_eq!(playlist.videos_downloaded, 2);
        }

        #[tokio::test]
        async fn playlist_batch_stops_on_cancellation() {
            let fx = fixture(
                r#"
echo "[download]   5.0% of 1GiB ETA 10:00"
exec sleep 30
"#,
            );
            let playlist_id = stored_playlist(&fx.store, &["a", "b", "c"]);
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            let token = CancellationToken::new();
            let trigger = token.clone();

            let summary = downloader
                .download_playlist(&playlist_id, &[], &token, |event| {
                    if let BatchEvent::Progress(_) = event {
                        trigger.cancel();
                    }
                })
                .await
                .unwrap();

            assert!(summary.cancelled);
            assert_eq!(summary.completed, 0);
            assert_eq!(fx.store.list_downloads().unwrap().len(), 1);
            let playlist = fx.store.get_playlist(&playlist_id).unwrap().unwrap();
            assert_eq!(playlist.videos_downloaded, 0);
        }

        #[tokio::test]
        async fn playlist_batch_creates_no_jobs_once_cancelled() {
            let fx = fixture(SUCCESS_BODY);
            let playlist_id = stored_playlist(&fx.store, &["a", "b"]);
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            let token = CancellationToken::new();
            token.cancel();

            let mut started = 0;
            let summary = downloader
                .download_playlist(&playlist_id, &[], &token, |event| {
                    if let BatchEvent::Starting { .. } = event {
                        started += 1;
                    }
                })
                .await
                .unwrap();

            assert!(summary.cancelled);
            assert_eq!(started, 0);
            assert!(fx.store.list_downloads().unwrap().is_empty());
        }

        #[tokio::test]
        async fn unknown_playlist_is_an_error() {
            let fx = fixture("exit 0\n");
            let downloader = Downloader::new(&fx.store, &fx.tool, &fx.output_dir);
            assert!(
                downloader
                    .download_playlist("missing", &[], &CancellationToken::new(), |_| {})
                    .await
                    .is_err()
            );
        }
    }
}
