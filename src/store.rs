//! SQLite persistence for download jobs, playlists and playlist entries.
//!
//! The table and column names (and the `pending|completed|failed|cancelled`
//! status strings) are read directly by other tooling, so treat the schema
//! below as a public contract. Timestamps are stored as UTC RFC 3339 text and
//! ids are random UUIDs.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{Context, Result, bail};
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{Connection, OptionalExtension, Row, named_params, params};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::urls::title_from_url;

/// Lifecycle of a download job. Everything but `Pending` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl DownloadStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DownloadStatus::Pending => "pending",
            DownloadStatus::Completed => "completed",
            DownloadStatus::Failed => "failed",
            DownloadStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        self != DownloadStatus::Pending
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Error, Debug)]
#[error("unknown download status {0:?}")]
pub struct UnknownStatus(String);

impl FromStr for DownloadStatus {
    type Err = UnknownStatus;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(DownloadStatus::Pending),
            "completed" => Ok(DownloadStatus::Completed),
            "failed" => Ok(DownloadStatus::Failed),
            "cancelled" => Ok(DownloadStatus::Cancelled),
            other => Err(UnknownStatus(other.to_owned())),
        }
    }
}

impl ToSql for DownloadStatus {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for DownloadStatus {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        value
            .as_str()?
            .parse()
            .map_err(|err| FromSqlError::Other(Box::new(err)))
    }
}

/// Row of the `downloads` table.
#[derive(Debug, Clone, Serialize)]
pub struct DownloadRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_path: Option<String>,
    pub status: DownloadStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Empty for orphan downloads that did not come from a playlist.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub playlist_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `playlists` table.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistRecord {
    pub id: String,
    pub url: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    /// Item count as last observed remotely.
    pub total_videos: i64,
    /// Entries persisted in `playlist_videos`.
    pub videos_saved: i64,
    /// Entries whose download completed.
    pub videos_downloaded: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Row of the `playlist_videos` table. Never updated after insertion.
#[derive(Debug, Clone, Serialize)]
pub struct PlaylistVideoRecord {
    pub id: String,
    pub playlist_id: String,
    pub playlist_name: String,
    pub video_url: String,
    pub video_title: String,
    pub video_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub channel_url: Option<String>,
    /// 1-based position in the remote listing at extraction time.
    pub position: i64,
}

/// Values for a new `playlist_videos` row.
#[derive(Debug, Clone, Copy)]
pub struct NewPlaylistVideo<'a> {
    pub playlist_id: &'a str,
    pub playlist_name: &'a str,
    pub video_url: &'a str,
    pub video_title: &'a str,
    pub video_id: &'a str,
    pub channel: &'a str,
    pub channel_url: &'a str,
    pub position: i64,
}

/// Values for a new `playlists` row.
#[derive(Debug, Clone, Copy)]
pub struct NewPlaylist<'a> {
    pub url: &'a str,
    pub title: &'a str,
    pub channel: &'a str,
    pub channel_url: &'a str,
    pub total_videos: i64,
    pub videos_saved: i64,
}

/// Owner of the single SQLite connection used for a process invocation.
#[derive(Debug)]
pub struct Store {
    conn: Connection,
}

impl Store {
    /// Opens (and if necessary creates) the database and its schema.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating database directory {}", parent.display()))?;
        }

        let conn = Connection::open(path)
            .with_context(|| format!("opening database {}", path.display()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .context("enabling WAL mode")?;
        conn.pragma_update(None, "foreign_keys", "ON")
            .context("enabling foreign keys")?;

        let mut store = Self { conn };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&mut self) -> Result<()> {
        let tx = self.conn.transaction()?;

        tx.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS downloads (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL,
                title TEXT NOT NULL,
                channel TEXT,
                channel_url TEXT,
                file_path TEXT,
                status TEXT NOT NULL,
                error TEXT,
                playlist_id TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_url ON downloads(url);
            CREATE INDEX IF NOT EXISTS idx_status ON downloads(status);
            CREATE INDEX IF NOT EXISTS idx_downloads_playlist_id ON downloads(playlist_id);

            CREATE TABLE IF NOT EXISTS playlists (
                id TEXT PRIMARY KEY,
                url TEXT NOT NULL UNIQUE,
                title TEXT NOT NULL,
                channel TEXT,
                channel_url TEXT,
                total_videos INTEGER NOT NULL DEFAULT 0,
                videos_saved INTEGER NOT NULL DEFAULT 0,
                videos_downloaded INTEGER NOT NULL DEFAULT 0,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS playlist_videos (
                id TEXT PRIMARY KEY,
                playlist_id TEXT NOT NULL,
                playlist_name TEXT NOT NULL,
                video_url TEXT NOT NULL,
                video_title TEXT NOT NULL,
                video_id TEXT NOT NULL,
                channel TEXT,
                channel_url TEXT,
                idx INTEGER NOT NULL,
                UNIQUE (playlist_id, video_id),
                FOREIGN KEY (playlist_id) REFERENCES playlists(id) ON DELETE CASCADE
            );
            CREATE INDEX IF NOT EXISTS idx_playlist_videos_playlist_id
                ON playlist_videos(playlist_id);
            "#,
        )?;

        tx.commit()?;
        Ok(())
    }

    // ---- downloads -------------------------------------------------------

    /// Creates a `pending` job. An empty title is replaced by one derived
    /// from the URL.
    pub fn insert_download(&self, url: &str, title: &str, playlist_id: Option<&str>) -> Result<String> {
        let id = new_id();
        let title = if title.is_empty() {
            title_from_url(url)
        } else {
            title.to_owned()
        };
        let now = timestamp_now();

        self.conn
            .execute(
                r#"
                INSERT INTO downloads (id, url, title, channel, channel_url, status,
                                       playlist_id, created_at, updated_at)
                VALUES (:id, :url, :title, NULL, NULL, :status, :playlist_id, :now, :now)
                "#,
                named_params! {
                    ":id": id,
                    ":url": url,
                    ":title": title,
                    ":status": DownloadStatus::Pending,
                    ":playlist_id": playlist_id,
                    ":now": now,
                },
            )
            .with_context(|| format!("inserting download for {url}"))?;

        Ok(id)
    }

    pub fn update_download_title(&self, id: &str, title: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE downloads SET title = ?1, updated_at = ?2 WHERE id = ?3",
                params![title, timestamp_now(), id],
            )
            .with_context(|| format!("updating title of download {id}"))?;
        Ok(())
    }

    pub fn update_download_channel(&self, id: &str, channel: &str, channel_url: &str) -> Result<()> {
        self.conn
            .execute(
                "UPDATE downloads SET channel = ?1, channel_url = ?2, updated_at = ?3 WHERE id = ?4",
                params![
                    non_empty(channel),
                    non_empty(channel_url),
                    timestamp_now(),
                    id
                ],
            )
            .with_context(|| format!("updating channel of download {id}"))?;
        Ok(())
    }

    /// Writes the terminal status of a job.
    ///
    /// Only a `pending` job can be finished, so a terminal status is recorded
    /// exactly once. Returns `false` when the job had already been finished.
    pub fn finish_download(
        &self,
        id: &str,
        status: DownloadStatus,
        file_path: Option<&str>,
        error: Option<&str>,
    ) -> Result<bool> {
        if !status.is_terminal() {
            bail!("cannot finish download {id} with non-terminal status {status}");
        }

        let changed = self
            .conn
            .execute(
                r#"
                UPDATE downloads
                SET status = :status, file_path = :file_path, error = :error, updated_at = :now
                WHERE id = :id AND status = 'pending'
                "#,
                named_params! {
                    ":status": status,
                    ":file_path": file_path,
                    ":error": error,
                    ":now": timestamp_now(),
                    ":id": id,
                },
            )
            .with_context(|| format!("recording {status} for download {id}"))?;

        if changed == 0 && self.get_download(id)?.is_none() {
            bail!("no download with id {id}");
        }
        Ok(changed > 0)
    }

    pub fn get_download(&self, id: &str) -> Result<Option<DownloadRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE id = ?1"
        ))?;
        let mut rows = stmt.query([id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_download(row)?)),
            None => Ok(None),
        }
    }

    /// Every job, most recent first.
    pub fn list_downloads(&self) -> Result<Vec<DownloadRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads ORDER BY created_at DESC, rowid DESC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_download(row)?);
        }
        Ok(records)
    }

    pub fn list_downloads_by_status(&self, status: DownloadStatus) -> Result<Vec<DownloadRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {DOWNLOAD_COLUMNS} FROM downloads WHERE status = ?1 \
             ORDER BY created_at DESC, rowid DESC"
        ))?;
        let mut rows = stmt.query([status])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_download(row)?);
        }
        Ok(records)
    }

    /// Whether `url` was already downloaded successfully on behalf of the
    /// playlist.
    pub fn has_completed_download(&self, playlist_id: &str, url: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                r#"
                SELECT 1 FROM downloads
                WHERE playlist_id = ?1 AND url = ?2 AND status = 'completed'
                LIMIT 1
                "#,
                params![playlist_id, url],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    // ---- playlists -------------------------------------------------------

    pub fn insert_playlist(&self, playlist: &NewPlaylist<'_>) -> Result<String> {
        let id = new_id();
        let title = if playlist.title.is_empty() {
            title_from_url(playlist.url)
        } else {
            playlist.title.to_owned()
        };
        let now = timestamp_now();

        self.conn
            .execute(
                r#"
                INSERT INTO playlists (id, url, title, channel, channel_url, total_videos,
                                       videos_saved, videos_downloaded, created_at, updated_at)
                VALUES (:id, :url, :title, :channel, :channel_url, :total_videos,
                        :videos_saved, 0, :now, :now)
                "#,
                named_params! {
                    ":id": id,
                    ":url": playlist.url,
                    ":title": title,
                    ":channel": non_empty(playlist.channel),
                    ":channel_url": non_empty(playlist.channel_url),
                    ":total_videos": playlist.total_videos,
                    ":videos_saved": playlist.videos_saved,
                    ":now": now,
                },
            )
            .with_context(|| format!("inserting playlist {}", playlist.url))?;

        Ok(id)
    }

    pub fn get_playlist(&self, id: &str) -> Result<Option<PlaylistRecord>> {
        self.playlist_where("id = ?1", id)
    }

    /// Exact-match lookup on the source URL.
    pub fn find_playlist_by_url(&self, url: &str) -> Result<Option<PlaylistRecord>> {
        self.playlist_where("url = ?1", url)
    }

    fn playlist_where(&self, clause: &str, value: &str) -> Result<Option<PlaylistRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlists WHERE {clause}"
        ))?;
        let mut rows = stmt.query([value])?;
        match rows.next()? {
            Some(row) => Ok(Some(row_to_playlist(row)?)),
            None => Ok(None),
        }
    }

    /// Every playlist, most recently synced first.
    pub fn list_playlists(&self) -> Result<Vec<PlaylistRecord>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PLAYLIST_COLUMNS} FROM playlists ORDER BY updated_at DESC, rowid DESC"
        ))?;
        let mut rows = stmt.query([])?;
        let mut records = Vec::new();
        while let Some(row) = rows.next()? {
            records.push(row_to_playlist(row)?);
        }
        Ok(records)
    }

    /// Records a re-sync: the remote total is replaced, the saved count grows
    /// by `newly_saved`. The downloaded count is left alone.
    pub fn record_playlist_sync(&self, id: &str, total_videos: i64, newly_saved: i64) -> Result<()> {
        self.conn
            .execute(
                r#"
                UPDATE playlists
                SET total_videos = ?1, videos_saved = videos_saved + ?2, updated_at = ?3
                WHERE id = ?4
                "#,
                params![total_videos, newly_saved, timestamp_now(), id],
            )
            .with_context(|| format!("updating counters of playlist {id}"))?;
        Ok(())
    }

    pub fn set_videos_saved(&self, id: &str, videos_saved: i64) -> Result<()> {
        self.conn
            .execute(
                "UPDATE playlists SET videos_saved = ?1, updated_at = ?2 WHERE id = ?3",
                params![videos_saved, timestamp_now(), id],
            )
            .with_context(|| format!("updating saved count of playlist {id}"))?;
        Ok(())
    }

    pub fn increment_videos_downloaded(&self, id: &str) -> Result<()> {
        self.conn
            .execute(
                r#"
                UPDATE playlists
                SET videos_downloaded = videos_downloaded + 1, updated_at = ?1
                WHERE id = ?2
                "#,
                params![timestamp_now(), id],
            )
            .with_context(|| format!("updating downloaded count of playlist {id}"))?;
        Ok(())
    }

    /// Deletes a playlist; its entries go with it through the cascade.
    pub fn delete_playlist(&self, id: &str) -> Result<bool> {
        let changed = self
            .conn
            .execute("DELETE FROM playlists WHERE id = ?1", [id])
            .with_context(|| format!("deleting playlist {id}"))?;
        Ok(changed > 0)
    }

    // ---- playlist videos -------------------------------------------------

    pub fn playlist_video_exists(&self, playlist_id: &str, video_id: &str) -> Result<bool> {
        let found: Option<i64> = self
            .conn
            .query_row(
                "SELECT 1 FROM playlist_videos WHERE playlist_id = ?1 AND video_id = ?2",
                params![playlist_id, video_id],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    pub fn insert_playlist_video(&self, video: &NewPlaylistVideo<'_>) -> Result<String> {
        let id = new_id();
        self.conn
            .execute(
                r#"
                INSERT INTO playlist_videos (id, playlist_id, playlist_name, video_url,
                                             video_title, video_id, channel, channel_url, idx)
                VALUES (:id, :playlist_id, :playlist_name, :video_url,
                        :video_title, :video_id, :channel, :channel_url, :idx)
                "#,
                named_params! {
                    ":id": id,
                    ":playlist_id": video.playlist_id,
                    ":playlist_name": video.playlist_name,
                    ":video_url": video.video_url,
                    ":video_title": video.video_title,
                    ":video_id": video.video_id,
                    ":channel": non_empty(video.channel),
                    ":channel_url": non_empty(video.channel_url),
                    ":idx": video.position,
                },
            )
            .with_context(|| {
                format!(
                    "inserting video {} into playlist {}",
                    video.video_id, video.playlist_id
                )
            })?;
        Ok(id)
    }

    /// Entries of a playlist in their stored order.
    pub fn list_playlist_videos(&self, playlist_id: &str) -> Result<Vec<PlaylistVideoRecord>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, playlist_id, playlist_name, video_url, video_title, video_id,
                   channel, channel_url, idx
            FROM playlist_videos
            WHERE playlist_id = ?1
            ORDER BY idx ASC, rowid ASC
            "#,
        )?;
        let mut rows = stmt.query([playlist_id])?;
        let mut videos = Vec::new();
        while let Some(row) = rows.next()? {
            videos.push(row_to_playlist_video(row)?);
        }
        Ok(videos)
    }

    pub fn count_playlist_videos(&self, playlist_id: &str) -> Result<i64> {
        let count = self.conn.query_row(
            "SELECT COUNT(*) FROM playlist_videos WHERE playlist_id = ?1",
            [playlist_id],
            |row| row.get(0),
        )?;
        Ok(count)
    }
}

const DOWNLOAD_COLUMNS: &str = "id, url, title, channel, channel_url, file_path, status, error, \
                                playlist_id, created_at, updated_at";
const PLAYLIST_COLUMNS: &str = "id, url, title, channel, channel_url, total_videos, videos_saved, \
                                videos_downloaded, created_at, updated_at";

fn new_id() -> String {
    Uuid::new_v4().to_string()
}

fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|parsed| parsed.with_timezone(&Utc))
        .with_context(|| format!("parsing stored timestamp {raw:?}"))
}

/// Unknown channel data is stored as NULL rather than an empty string.
fn non_empty(value: &str) -> Option<&str> {
    (!value.is_empty()).then_some(value)
}

fn row_to_download(row: &Row<'_>) -> Result<DownloadRecord> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(DownloadRecord {
        id: row.get("id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        channel: row.get("channel")?,
        channel_url: row.get("channel_url")?,
        file_path: row.get("file_path")?,
        status: row.get("status")?,
        error: row.get("error")?,
        playlist_id: row.get("playlist_id")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_playlist(row: &Row<'_>) -> Result<PlaylistRecord> {
    let created_at: String = row.get("created_at")?;
    let updated_at: String = row.get("updated_at")?;
    Ok(PlaylistRecord {
        id: row.get("id")?,
        url: row.get("url")?,
        title: row.get("title")?,
        channel: row.get("channel")?,
        channel_url: row.get("channel_url")?,
        total_videos: row.get("total_videos")?,
        videos_saved: row.get("videos_saved")?,
        videos_downloaded: row.get("videos_downloaded")?,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

fn row_to_playlist_video(row: &Row<'_>) -> Result<PlaylistVideoRecord> {
    Ok(PlaylistVideoRecord {
        id: row.get("id")?,
        playlist_id: row.get("playlist_id")?,
        playlist_name: row.get("playlist_name")?,
        video_url: row.get("video_url")?,
        video_title: row.get("video_title")?,
        video_id: row.get("video_id")?,
        channel: row.get("channel")?,
        channel_url: row.get("channel_url")?,
        position: row.get("idx")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::{TempDir, tempdir};

    fn temp_store() -> (TempDir, Store) {
        let dir = tempdir().unwrap();
        let store = Store::open(&dir.path().join("db").join("downloads.db")).unwrap();
        (dir, store)
    }

    fn sample_playlist<'a>(url: &'a str) -> NewPlaylist<'a> {
        NewPlaylist {
            url,
            title: "Mix",
            channel: "Owner",
            channel_url: "https://www.youtube.com/@owner",
            total_videos: 2,
            videos_saved: 0,
        }
    }

    fn sample_video<'a>(playlist_id: &'a str, video_id: &'a str, position: i64) -> NewPlaylistVideo<'a> {
        NewPlaylistVideo {
            playlist_id,
            playlist_name: "Mix",
            video_url: "https://youtu.be/x",
            video_title: "X",
            video_id,
            channel: "",
            channel_url: "",
            position,
        }
    }

    #[test]
    fn open_creates_parent_directory_and_is_reopenable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("downloads.db");
        {
            let store = Store::open(&path).unwrap();
            store.insert_download("https://youtu.be/a", "A", None).unwrap();
        }
        let store = Store::open(&path).unwrap();
        assert_eq!(store.list_downloads().unwrap().len(), 1);
    }

    #[test]
    fn insert_download_starts_pending_with_url_title_fallback() {
        let (_dir, store) = temp_store();
        let id = store
            .insert_download("https://example.com/media/clip.mp4", "", None)
            .unwrap();
        let record = store.get_download(&id).unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Pending);
        assert_eq!(record.title, "clip");
        assert!(record.channel.is_none());
        assert!(record.playlist_id.is_none());
        assert_eq!(record.created_at, record.updated_at);
    }

    #[test]
    fn finish_download_is_write_once() {
        let (_dir, store) = temp_store();
        let id = store.insert_download("https://youtu.be/a", "A", None).unwrap();

        assert!(
            store
                .finish_download(&id, DownloadStatus::Cancelled, None, Some("Download cancelled by user"))
                .unwrap()
        );
        assert!(
            !store
                .finish_download(&id, DownloadStatus::Completed, Some("/out/a.mp4"), None)
                .unwrap()
        );

        let record = store.get_download(&id).unwrap().unwrap();
        assert_eq!(record.status, DownloadStatus::Cancelled);
        assert_eq!(record.error.as_deref(), Some("Download cancelled by user"));
        assert!(record.file_path.is_none());
    }

    #[test]
    fn finish_download_rejects_pending_and_unknown_ids() {
        let (_dir, store) = temp_store();
        let id = store.insert_download("https://youtu.be/a", "A", None).unwrap();
        assert!(store.finish_download(&id, DownloadStatus::Pending, None, None).is_err());
        assert!(
            store
                .finish_download("missing", DownloadStatus::Failed, None, Some("x"))
                .is_err()
        );
    }

    #[test]
    fn title_and_channel_updates_are_visible() {
        let (_dir, store) = temp_store();
        let id = store.insert_download("https://youtu.be/a", "", None).unwrap();
        store.update_download_title(&id, "Real Title").unwrap();
        store
            .update_download_channel(&id, "Chan", "https://www.youtube.com/@chan")
            .unwrap();
        let record = store.get_download(&id).unwrap().unwrap();
        assert_eq!(record.title, "Real Title");
        assert_eq!(record.channel.as_deref(), Some("Chan"));
        assert_eq!(record.channel_url.as_deref(), Some("https://www.youtube.com/@chan"));
    }

    #[test]
    fn downloads_list_most_recent_first_and_filter_by_status() {
        let (_dir, store) = temp_store();
        let first = store.insert_download("https://youtu.be/1", "one", None).unwrap();
        let second = store.insert_download("https://youtu.be/2", "two", None).unwrap();
        store
            .finish_download(&first, DownloadStatus::Failed, None, Some("boom"))
            .unwrap();

        let all = store.list_downloads().unwrap();
        let ids: Vec<&str> = all.iter().map(|record| record.id.as_str()).collect();
        assert_eq!(ids, vec![second.as_str(), first.as_str()]);

        let failed = store.list_downloads_by_status(DownloadStatus::Failed).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id, first);
    }

    #[test]
    fn playlist_url_is_unique() {
        let (_dir, store) = temp_store();
        let url = "https://www.youtube.com/playlist?list=PL1";
        store.insert_playlist(&sample_playlist(url)).unwrap();
        assert!(store.insert_playlist(&sample_playlist(url)).is_err());
        assert!(store.find_playlist_by_url(url).unwrap().is_some());
        assert!(
            store
                .find_playlist_by_url("https://www.youtube.com/playlist?list=PL2")
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn playlist_video_pair_is_unique_and_ordered() {
        let (_dir, store) = temp_store();
        let playlist_id = store
            .insert_playlist(&sample_playlist("https://www.youtube.com/playlist?list=PL1"))
            .unwrap();

        store.insert_playlist_video(&sample_video(&playlist_id, "b", 2)).unwrap();
        store.insert_playlist_video(&sample_video(&playlist_id, "a", 1)).unwrap();
        assert!(store.insert_playlist_video(&sample_video(&playlist_id, "a", 3)).is_err());

        assert!(store.playlist_video_exists(&playlist_id, "a").unwrap());
        assert!(!store.playlist_video_exists(&playlist_id, "c").unwrap());

        let videos = store.list_playlist_videos(&playlist_id).unwrap();
        let order: Vec<&str> = videos.iter().map(|video| video.video_id.as_str()).collect();
        assert_eq!(order, vec!["a", "b"]);
        assert!(videos[0].channel.is_none());
    }

    #[test]
    fn deleting_playlist_cascades_to_entries() {
        let (_dir, store) = temp_store();
        let playlist_id = store
            .insert_playlist(&sample_playlist("https://www.youtube.com/playlist?list=PL1"))
            .unwrap();
        store.insert_playlist_video(&sample_video(&playlist_id, "a", 1)).unwrap();

        assert!(store.delete_playlist(&playlist_id).unwrap());
        assert_eq!(store.count_playlist_videos(&playlist_id).unwrap(), 0);
        assert!(store.get_playlist(&playlist_id).unwrap().is_none());
        assert!(!store.delete_playlist(&playlist_id).unwrap());
    }

    #[test]
    fn counters_update_independently() {
        let (_dir, store) = temp_store();
        let id = store
            .insert_playlist(&sample_playlist("https://www.youtube.com/playlist?list=PL1"))
            .unwrap();
        store.set_videos_saved(&id, 2).unwrap();
        store.record_playlist_sync(&id, 3, 1).unwrap();
        store.increment_videos_downloaded(&id).unwrap();

        let playlist = store.get_playlist(&id).unwrap().unwrap();
        assert_eq!(playlist.total_videos, 3);
        assert_eq!(playlist.videos_saved, 3);
        assert_eq!(playlist.videos_downloaded, 1);
    }

    #[test]
    fn completed_download_lookup_is_scoped_to_playlist() {
        let (_dir, store) = temp_store();
        let playlist_id = store
            .insert_playlist(&sample_playlist("https://www.youtube.com/playlist?list=PL1"))
            .unwrap();
        let url = "https://youtu.be/a";
        let id = store.insert_download(url, "A", Some(&playlist_id)).unwrap();
        assert!(!store.has_completed_download(&playlist_id, url).unwrap());

        store
            .finish_download(&id, DownloadStatus::Completed, Some("/out/A.mp4"), None)
            .unwrap();
        assert!(store.has_completed_download(&playlist_id, url).unwrap());
        assert!(!store.has_completed_download("other", url).unwrap());
    }

    #[test]
    fn download_record_serializes_for_listing() {
        let (_dir, store) = temp_store();
        let id = store.insert_download("https://youtu.be/abc", "Clip", None).unwrap();
        let record = store.get_download(&id).unwrap().unwrap();

        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "pending");
        assert_eq!(json["title"], "Clip");
        assert!(json.get("channel").is_none());
        assert!(json.get("playlist_id").is_none());
    }

    #[test]
    fn status_strings_round_trip() {
        for status in [
            DownloadStatus::Pending,
            DownloadStatus::Completed,
            DownloadStatus::Failed,
            DownloadStatus::Cancelled,
        ] {
            assert_eq!(status.as_str().parse::<DownloadStatus>().unwrap(), status);
        }
        assert!("done".parse::<DownloadStatus>().is_err());
    }
}
