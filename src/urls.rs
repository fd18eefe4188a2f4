//! Pure helpers for the URLs yt-dlp hands back.
//!
//! Channel URLs come in several shapes (`/@handle`, `/channel/ID`, `/c/NAME`,
//! `/user/NAME`, each optionally followed by a tab such as `/videos`). The
//! cleaned form is what gets persisted, so the rules here are part of the
//! database contract.

use url::Url;

/// Placeholder yt-dlp prints for fields it could not resolve.
pub const NOT_AVAILABLE: &str = "NA";

pub const UNKNOWN_CHANNEL: &str = "Unknown Channel";

const CHANNEL_TAB_SUFFIXES: [&str; 6] = [
    "/videos",
    "/shorts",
    "/streams",
    "/playlists",
    "/community",
    "/about",
];

/// True for empty strings and yt-dlp's `NA` placeholder.
pub fn is_missing(value: &str) -> bool {
    value.is_empty() || value == NOT_AVAILABLE
}

/// Strips one channel tab suffix, the query string and one trailing slash.
///
/// Returns `""` for empty or `NA` input. Any other input never cleans down to
/// an empty string; in that case the original is returned untouched.
pub fn clean_channel_url(raw: &str) -> String {
    if is_missing(raw) {
        return String::new();
    }

    let mut cleaned = raw;
    if let Some(stripped) = CHANNEL_TAB_SUFFIXES
        .iter()
        .find_map(|suffix| cleaned.strip_suffix(suffix))
    {
        cleaned = stripped;
    }
    if let Some((before, _query)) = cleaned.split_once('?') {
        cleaned = before;
    }
    cleaned = cleaned.strip_suffix('/').unwrap_or(cleaned);

    if cleaned.is_empty() {
        raw.to_owned()
    } else {
        cleaned.to_owned()
    }
}

pub fn is_channel_url(url: &str) -> bool {
    url.contains("/channel/") || url.contains("/@") || url.contains("/c/") || url.contains("/user/")
}

/// Playlist listings and whole channels are both synced as playlists.
pub fn is_playlist_url(url: &str) -> bool {
    url.contains("/playlist")
        || url.contains("list=")
        || url.contains("/playlists/")
        || is_channel_url(url)
}

/// Derives a readable channel name from the URL path, trying `@handle`,
/// `/channel/ID`, `/c/NAME` and `/user/NAME` in that order.
pub fn channel_name_from_url(url: &str) -> String {
    if let Some(handle) = segment_after(url, "/@") {
        return format!("@{handle}");
    }
    ["/channel/", "/c/", "/user/"]
        .iter()
        .find_map(|marker| segment_after(url, marker))
        .map(str::to_owned)
        .unwrap_or_else(|| UNKNOWN_CHANNEL.to_owned())
}

fn segment_after<'a>(url: &'a str, marker: &str) -> Option<&'a str> {
    let (_, rest) = url.split_once(marker)?;
    Some(rest.split('/').next().unwrap_or(rest))
}

/// Best-effort display title for a URL when the tool reports none: the last
/// path segment without extension, then the `v` or `id` query parameter, then
/// host plus path.
pub fn title_from_url(raw: &str) -> String {
    let Ok(parsed) = Url::parse(raw) else {
        return raw.to_owned();
    };

    if let Some(last) = parsed
        .path_segments()
        .and_then(|segments| segments.filter(|segment| !segment.is_empty()).last())
    {
        let stem = match last.rfind('.') {
            Some(dot) => &last[..dot],
            None => last,
        };
        if !stem.is_empty() {
            return stem.to_owned();
        }
    }

    for key in ["v", "id"] {
        if let Some((_, value)) = parsed
            .query_pairs()
            .find(|(name, value)| name == key && !value.is_empty())
        {
            return value.into_owned();
        }
    }

    let host = parsed.host_str().unwrap_or_default();
    let joined = format!("{host}{}", parsed.path());
    joined
        .strip_prefix("www.")
        .map(str::to_owned)
        .unwrap_or(joined)
}
