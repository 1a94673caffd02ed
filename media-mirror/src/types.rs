//! Normalized response shapes. These are what gets cached and served; the
//! raw upstream payloads live next to their clients in `sources`.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MediaType {
    Anime,
    Manga,
}

impl MediaType {
    pub const fn as_str(&self) -> &'static str {
        match self {
            MediaType::Anime => "ANIME",
            MediaType::Manga => "MANGA",
        }
    }
}

impl fmt::Display for MediaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MediaType {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ANIME" => Ok(MediaType::Anime),
            "MANGA" => Ok(MediaType::Manga),
            _ => Err(()),
        }
    }
}

/// Kinds accepted by the cross-source lookup.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKind {
    Anime,
    Manga,
    Novel,
    Vn,
}

impl LookupKind {
    pub const fn as_str(&self) -> &'static str {
        match self {
            LookupKind::Anime => "anime",
            LookupKind::Manga => "manga",
            LookupKind::Novel => "novel",
            LookupKind::Vn => "vn",
        }
    }

    /// AniList media type for this kind. Visual novels are not on AniList.
    pub const fn anilist_type(&self) -> Option<MediaType> {
        match self {
            LookupKind::Anime => Some(MediaType::Anime),
            LookupKind::Manga | LookupKind::Novel => Some(MediaType::Manga),
            LookupKind::Vn => None,
        }
    }
}

impl fmt::Display for LookupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LookupKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "anime" => Ok(LookupKind::Anime),
            "manga" => Ok(LookupKind::Manga),
            "novel" => Ok(LookupKind::Novel),
            "vn" => Ok(LookupKind::Vn),
            _ => Err(()),
        }
    }
}

/// An offset/limit window over every group of a collection. `limit` is never zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Window {
    pub offset: usize,
    pub limit: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaTitle {
    pub romaji: Option<String>,
    pub english: Option<String>,
    pub native: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoverImage {
    pub large: Option<String>,
    pub medium: Option<String>,
}

/// Compact media record embedded in collection entries.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSummary {
    pub id: i64,
    pub title: MediaTitle,
    pub format: Option<String>,
    pub status: Option<String>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub average_score: Option<u32>,
    pub genres: Vec<String>,
    /// `null` when upstream has no image at all.
    pub cover_image: Option<CoverImage>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaEntry {
    pub id: i64,
    pub status: Option<String>,
    pub score: Option<f64>,
    pub progress: Option<u32>,
    pub updated_at: Option<i64>,
    pub media: MediaSummary,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListGroup {
    pub name: String,
    pub entries: Vec<MediaEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UserAvatar {
    pub large: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ListUser {
    pub id: i64,
    pub name: String,
    pub avatar: Option<UserAvatar>,
}

/// Window metadata attached to a paginated view.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Pagination {
    pub offset: usize,
    pub limit: usize,
    /// Full, unsliced size of each group.
    pub total_per_status: IndexMap<String, usize>,
    pub has_more_per_status: IndexMap<String, bool>,
    /// True if any group has entries past this window.
    pub has_more: bool,
}

/// A user's grouped list. Stored with `pagination: None` as the full
/// snapshot; paginated views are re-slices of it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaCollection {
    pub user: Option<ListUser>,
    /// Groups in upstream order, keyed by status.
    pub lists_by_status: IndexMap<String, ListGroup>,
    /// Entries across all groups, counted once at normalization.
    pub total_entries: usize,
    pub per_chunk: u32,
    pub pagination: Option<Pagination>,
}

/// Media record served by the reading endpoint.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaDetails {
    pub id: i64,
    pub title: MediaTitle,
    pub format: Option<String>,
    pub status: Option<String>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    pub average_score: Option<u32>,
    pub genres: Vec<String>,
    pub cover_image: Option<CoverImage>,
    pub description: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProgress {
    pub status: Option<String>,
    pub score: Option<f64>,
    pub progress: Option<u32>,
    pub progress_volumes: Option<u32>,
    pub updated_at: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingResponse {
    pub media: MediaDetails,
    pub user_progress: Option<UserProgress>,
    pub display_title: String,
    pub cover_url: String,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityMedia {
    pub id: i64,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub site_url: Option<String>,
    pub title: MediaTitle,
    pub cover_image: CoverImage,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    /// Id of the media the activity is about.
    pub id: i64,
    pub status: Option<String>,
    pub progress: Option<String>,
    pub created_at: Option<i64>,
    pub media: ActivityMedia,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ActivityFeed {
    pub activities: Vec<Activity>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub name: String,
    pub artist: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    pub is_now_playing: bool,
    /// Scrobble time in unix milliseconds. Absent while playing.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecentTracks {
    pub tracks: Vec<Track>,
    pub user: String,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub genres: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_score: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub site_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub released: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupData {
    pub external_id: String,
    pub title: String,
    pub cover_image: Option<String>,
    pub metadata: LookupMetadata,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub success: bool,
    pub data: LookupData,
}
