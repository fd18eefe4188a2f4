//! Reconciles a freshly extracted playlist snapshot with what is stored.
//!
//! Only videos that are not yet recorded for the playlist are inserted, so a
//! re-run against an unchanged listing adds nothing. The saved counter grows
//! by the number of insertions instead of being recounted: entries that
//! vanished remotely stay stored and keep counting.

use anyhow::Result;
use log::{info, warn};
use serde::Serialize;

use crate::error::ExtractError;
use crate::extractor::{ListedVideo, PlaylistSnapshot, YtDlp};
use crate::store::{NewPlaylist, NewPlaylistVideo, Store};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub playlist_id: String,
    pub new_videos: usize,
    /// True when this run created the playlist record.
    pub created: bool,
}

/// Merges `snapshot` into the store under `playlist_url`.
///
/// An empty snapshot is rejected with [`ExtractError::EmptyPlaylist`] before
/// anything is written.
pub fn reconcile(store: &Store, playlist_url: &str, snapshot: &PlaylistSnapshot) -> Result<SyncReport> {
    if snapshot.videos.is_empty() {
        return Err(ExtractError::EmptyPlaylist(playlist_url.to_owned()).into());
    }

    match store.find_playlist_by_url(playlist_url)? {
        Some(existing) => {
            let mut added = 0usize;
            for video in &snapshot.videos {
                if store.playlist_video_exists(&existing.id, &video.id)? {
                    continue;
                }
                match store.insert_playlist_video(&new_entry(&existing.id, &existing.title, video)) {
                    Ok(_) => added += 1,
                    Err(err) => warn!("skipping video {} of {playlist_url}: {err:#}", video.id),
                }
            }

            store.record_playlist_sync(&existing.id, snapshot.videos.len() as i64, added as i64)?;
            info!(
                "updated playlist {} ({}): {added} new of {} listed",
                existing.id,
                playlist_url,
                snapshot.videos.len()
            );

            Ok(SyncReport {
                playlist_id: existing.id,
                new_videos: added,
                created: false,
            })
        }
        None => {
            let playlist_id = store.insert_playlist(&NewPlaylist {
                url: playlist_url,
                title: &snapshot.title,
                channel: &snapshot.channel,
                channel_url: &snapshot.channel_url,
                total_videos: snapshot.videos.len() as i64,
                videos_saved: 0,
            })?;
            let playlist_title = store
                .get_playlist(&playlist_id)?
                .map(|playlist| playlist.title)
                .unwrap_or_else(|| snapshot.title.clone());

            let mut saved = 0usize;
            for video in &snapshot.videos {
                match store.insert_playlist_video(&new_entry(&playlist_id, &playlist_title, video)) {
                    Ok(_) => saved += 1,
                    Err(err) => warn!("skipping video {} of {playlist_url}: {err:#}", video.id),
                }
            }

            store.set_videos_saved(&playlist_id, saved as i64)?;
            info!(
                "created playlist {playlist_id} ({playlist_url}) with {saved} of {} videos",
                snapshot.videos.len()
            );

            Ok(SyncReport {
                playlist_id,
                new_videos: saved,
                created: true,
            })
        }
    }
}

/// Extracts the current listing of `playlist_url` and reconciles it.
pub fn sync_playlist(store: &Store, tool: &YtDlp, playlist_url: &str) -> Result<SyncReport> {
    let snapshot = tool.fetch_playlist(playlist_url)?;
    reconcile(store, playlist_url, &snapshot)
}

fn new_entry<'a>(playlist_id: &'a str, playlist_name: &'a str, video: &'a ListedVideo) -> NewPlaylistVideo<'a> {
    NewPlaylistVideo {
        playlist_id,
        playlist_name,
        video_url: &video.url,
        video_title: &video.title,
        video_id: &video.id,
        channel: &video.channel,
        channel_url: &video.channel_url,
        position: video.position,
    }
}
