//! Turns raw upstream payloads into the compact shapes in [`crate::types`].
//!
//! Every optional-field decision is made here. Code downstream of this module
//! works with the normalized types only.

use crate::sources::anilist::{RawActivity, RawCollection, RawCoverImage, RawEntry, RawMedia};
use crate::sources::lastfm::{RawRecentTracks, RawTrack};
use crate::sources::vndb::RawVn;
use crate::types::{
    Activity, ActivityMedia, CoverImage, ListGroup, ListUser, LookupData, LookupMetadata,
    MediaCollection, MediaDetails, MediaEntry, MediaSummary, MediaTitle, MediaType,
    ReadingResponse, RecentTracks, Track, UserAvatar, UserProgress,
};
use indexmap::IndexMap;

/// Shown when a media has no title in any script.
pub const UNKNOWN_TITLE: &str = "Unknown Title";
/// Shown when a media has no cover image.
pub const FALLBACK_COVER: &str = "/code-xml.svg";

const NOT_YET_RELEASED: &str = "NOT_YET_RELEASED";
const OTHER_GROUP: &str = "OTHER";

fn non_empty(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.trim().is_empty())
}

fn non_empty_owned(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// English, then romaji, then native.
pub fn display_title(title: &MediaTitle) -> String {
    non_empty(&title.english)
        .or_else(|| non_empty(&title.romaji))
        .or_else(|| non_empty(&title.native))
        .unwrap_or(UNKNOWN_TITLE)
        .to_string()
}

/// Large, then medium.
pub fn cover_url(cover: Option<&CoverImage>) -> String {
    cover
        .and_then(|c| non_empty(&c.large).or_else(|| non_empty(&c.medium)))
        .unwrap_or(FALLBACK_COVER)
        .to_string()
}

/// `None` unless at least one size is present.
fn cover_image(raw: Option<RawCoverImage>) -> Option<CoverImage> {
    let raw = raw?;
    let cover = CoverImage {
        large: non_empty_owned(raw.large),
        medium: non_empty_owned(raw.medium),
    };
    (cover.large.is_some() || cover.medium.is_some()).then_some(cover)
}

fn media_summary(media: RawMedia) -> Option<MediaSummary> {
    Some(MediaSummary {
        id: media.id?,
        title: media.title.unwrap_or_default(),
        format: media.format,
        status: media.status,
        episodes: media.episodes,
        chapters: media.chapters,
        average_score: media.average_score,
        genres: media.genres.unwrap_or_default(),
        cover_image: cover_image(media.cover_image),
    })
}

/// Drops entries without media and entries for unreleased media.
fn media_entry(entry: RawEntry) -> Option<MediaEntry> {
    let media = entry.media?;
    if media.status.as_deref() == Some(NOT_YET_RELEASED) {
        return None;
    }

    Some(MediaEntry {
        id: entry.id,
        status: entry.status,
        score: entry.score,
        progress: entry.progress,
        updated_at: entry.updated_at,
        media: media_summary(media)?,
    })
}

/// Groups a (possibly multi-chunk) collection by list status.
///
/// Lists sharing a status are merged in upstream order. The result is a
/// snapshot: `pagination` is always `None`.
pub fn collection(raw: RawCollection, per_chunk: u32) -> MediaCollection {
    let mut lists_by_status: IndexMap<String, ListGroup> = IndexMap::new();
    let mut total_entries = 0;

    for list in raw.lists.unwrap_or_default() {
        let key = non_empty(&list.status)
            .or_else(|| non_empty(&list.name))
            .unwrap_or(OTHER_GROUP)
            .to_string();
        let name = non_empty(&list.name).unwrap_or(&key).to_string();

        let entries: Vec<MediaEntry> = list
            .entries
            .unwrap_or_default()
            .into_iter()
            .filter_map(media_entry)
            .collect();
        total_entries += entries.len();

        lists_by_status
            .entry(key)
            .or_insert_with(|| ListGroup {
                name,
                entries: Vec::new(),
            })
            .entries
            .extend(entries);
    }

    MediaCollection {
        user: raw.user.map(|user| ListUser {
            id: user.id,
            name: user.name,
            avatar: user.avatar.map(|avatar| UserAvatar {
                large: avatar.large,
            }),
        }),
        lists_by_status,
        total_entries,
        per_chunk,
        pagination: None,
    }
}

pub fn media_details(media: RawMedia) -> Option<MediaDetails> {
    Some(MediaDetails {
        id: media.id?,
        title: media.title.unwrap_or_default(),
        format: media.format,
        status: media.status,
        chapters: media.chapters,
        volumes: media.volumes,
        average_score: media.average_score,
        genres: media.genres.unwrap_or_default(),
        cover_image: cover_image(media.cover_image),
        description: media.description,
    })
}

pub fn user_progress(entry: &RawEntry) -> UserProgress {
    UserProgress {
        status: entry.status.clone(),
        score: entry.score,
        progress: entry.progress,
        progress_volumes: entry.progress_volumes,
        updated_at: entry.updated_at,
    }
}

pub fn reading(media: MediaDetails, user_progress: Option<UserProgress>) -> ReadingResponse {
    ReadingResponse {
        display_title: display_title(&media.title),
        cover_url: cover_url(media.cover_image.as_ref()),
        media,
        user_progress,
    }
}

/// Keeps activities about media of `media_type`, newest first, at most `limit`.
pub fn activities(raw: Vec<RawActivity>, media_type: MediaType, limit: usize) -> Vec<Activity> {
    raw.into_iter()
        .filter_map(|activity| {
            let media = activity.media?;
            let id = media.id?;
            if media.media_type.as_deref()?.parse::<MediaType>().ok()? != media_type {
                return None;
            }

            let cover = media.cover_image.unwrap_or_default();
            Some(Activity {
                id,
                status: activity.status,
                progress: activity.progress,
                created_at: activity.created_at,
                media: ActivityMedia {
                    id,
                    media_type,
                    site_url: media.site_url,
                    title: media.title.unwrap_or_default(),
                    cover_image: CoverImage {
                        large: non_empty_owned(cover.extra_large)
                            .or_else(|| non_empty_owned(cover.large)),
                        medium: non_empty_owned(cover.medium),
                    },
                },
            })
        })
        .take(limit)
        .collect()
}

fn track(raw: RawTrack) -> Track {
    let image = raw
        .image
        .unwrap_or_default()
        .into_iter()
        .find(|image| image.size == "large")
        .map(|image| image.url)
        .filter(|url| !url.is_empty());

    Track {
        name: raw.name,
        artist: raw.artist.map(|artist| artist.text).unwrap_or_default(),
        album: raw
            .album
            .map(|album| album.text)
            .filter(|album| !album.is_empty()),
        image,
        is_now_playing: raw
            .attr
            .and_then(|attr| attr.nowplaying)
            .is_some_and(|playing| !playing.is_empty()),
        timestamp: raw
            .date
            .and_then(|date| date.uts.parse::<i64>().ok())
            .map(|seconds| seconds * 1000),
    }
}

/// `fallback_user` is used when the payload does not name the user.
pub fn recent_tracks(raw: RawRecentTracks, fallback_user: &str) -> RecentTracks {
    RecentTracks {
        tracks: raw
            .track
            .map(|tracks| tracks.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(track)
            .collect(),
        user: raw
            .attr
            .and_then(|attr| non_empty_owned(attr.user))
            .unwrap_or_else(|| fallback_user.to_string()),
    }
}

pub fn anilist_lookup(media: RawMedia) -> Option<LookupData> {
    let id = media.id?;
    let title = media.title.unwrap_or_default();
    let cover = cover_image(media.cover_image);

    Some(LookupData {
        external_id: id.to_string(),
        title: display_title(&title),
        cover_image: cover.and_then(|c| c.large.or(c.medium)),
        metadata: LookupMetadata {
            format: media.format,
            status: media.status,
            genres: media.genres,
            average_score: media.average_score,
            description: media.description,
            site_url: media.site_url,
            released: None,
        },
    })
}

pub fn vndb_lookup(vn: RawVn) -> LookupData {
    let title = non_empty_owned(vn.title)
        .or_else(|| non_empty_owned(vn.alttitle))
        .unwrap_or_else(|| UNKNOWN_TITLE.to_string());

    LookupData {
        title,
        cover_image: vn.image.and_then(|image| non_empty_owned(image.url)),
        metadata: LookupMetadata {
            description: vn.description,
            released: vn.released,
            average_score: vn
                .rating
                .filter(|rating| *rating > 0.0)
                .map(|rating| rating.round() as u32),
            site_url: Some(format!("https://vndb.org/{}", vn.id)),
            ..LookupMetadata::default()
        },
        external_id: vn.id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    fn raw_collection(value: Value) -> RawCollection {
        serde_json::from_value(value).unwrap()
    }

    fn entry(id: i64, media_status: &str) -> Value {
        json!({
            "id": id,
            "status": "CURRENT",
            "score": 8.5,
            "progress": 3,
            "updatedAt": 1700000000,
            "media": {"id": id * 100, "status": media_status, "title": {"romaji": format!("Show {id}")}},
        })
    }

    #[test]
    fn test_total_counts_surviving_entries() {
        let raw = raw_collection(json!({
            "lists": [
                {"name": "Watching", "status": "CURRENT", "entries": [
                    entry(1, "RELEASING"), entry(2, "NOT_YET_RELEASED"), entry(3, "FINISHED"),
                ]},
                {"name": "Planning", "status": "PLANNING", "entries": [
                    entry(4, "NOT_YET_RELEASED"),
                ]},
                {"name": "Completed", "status": "COMPLETED", "entries": [
                    entry(5, "FINISHED"), entry(6, "FINISHED"),
                ]},
            ]
        }));

        let collection = collection(raw, 500);

        let summed: usize = collection
            .lists_by_status
            .values()
            .map(|group| group.entries.len())
            .sum();
        assert_eq!(collection.total_entries, 4);
        assert_eq!(collection.total_entries, summed);
        assert!(
            collection
                .lists_by_status
                .values()
                .flat_map(|group| &group.entries)
                .all(|e| e.media.status.as_deref() != Some("NOT_YET_RELEASED"))
        );
        assert_eq!(collection.lists_by_status["PLANNING"].entries.len(), 0);
        assert_eq!(collection.per_chunk, 500);
        assert!(collection.pagination.is_none());
    }

    #[test]
    fn test_grouping_keys_and_order() {
        let raw = raw_collection(json!({
            "lists": [
                {"name": "Watching", "status": "CURRENT", "entries": [entry(1, "FINISHED")]},
                {"name": "Favourites", "status": null, "entries": [entry(2, "FINISHED")]},
                {"name": null, "status": null, "entries": [entry(3, "FINISHED")]},
                // A later chunk repeating a status merges into the first group.
                {"name": "Watching", "status": "CURRENT", "entries": [entry(4, "FINISHED")]},
            ]
        }));

        let collection = collection(raw, 500);

        let keys: Vec<_> = collection.lists_by_status.keys().cloned().collect();
        assert_eq!(keys, vec!["CURRENT", "Favourites", "OTHER"]);
        assert_eq!(collection.lists_by_status["OTHER"].name, "OTHER");
        assert_eq!(collection.lists_by_status["Favourites"].name, "Favourites");

        let ids: Vec<_> = collection.lists_by_status["CURRENT"]
            .entries
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![1, 4]);
    }

    #[test]
    fn test_missing_fields_become_explicit() {
        let raw = raw_collection(json!({
            "user": {"id": 1, "name": "keiran"},
            "lists": [{"status": "CURRENT", "entries": [
                {"id": 1, "media": {"id": 10, "genres": null, "coverImage": null}},
                {"id": 2, "media": {"id": 20, "coverImage": {"large": "", "medium": "m.png"}}},
                {"id": 3, "media": null},
            ]}]
        }));

        let collection = collection(raw, 500);
        let entries = &collection.lists_by_status["CURRENT"].entries;

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].media.genres, Vec::<String>::new());
        assert_eq!(entries[0].media.cover_image, None);
        assert_eq!(
            entries[1].media.cover_image,
            Some(CoverImage {
                large: None,
                medium: Some("m.png".into())
            })
        );

        let value = serde_json::to_value(&entries[0]).unwrap();
        assert_eq!(value["media"]["genres"], json!([]));
        assert_eq!(value["media"]["coverImage"], Value::Null);
        assert_eq!(collection.user.unwrap().avatar, None);
    }

    #[test]
    fn test_title_fallback() {
        let native_only = MediaTitle {
            english: None,
            romaji: Some("".into()),
            native: Some("進撃の巨人".into()),
        };
        assert_eq!(display_title(&native_only), "進撃の巨人");

        let preferred = MediaTitle {
            english: Some("Attack on Titan".into()),
            romaji: Some("Shingeki no Kyojin".into()),
            native: None,
        };
        assert_eq!(display_title(&preferred), "Attack on Titan");

        assert_eq!(display_title(&MediaTitle::default()), UNKNOWN_TITLE);
    }

    #[test]
    fn test_cover_fallback() {
        let medium_only = CoverImage {
            large: None,
            medium: Some("m.png".into()),
        };
        assert_eq!(cover_url(Some(&medium_only)), "m.png");
        assert_eq!(cover_url(None), FALLBACK_COVER);
        assert_eq!(cover_url(Some(&CoverImage::default())), FALLBACK_COVER);
    }

    #[test]
    fn test_reading_presentation_fields() {
        let media: RawMedia = serde_json::from_value(json!({
            "id": 30013,
            "title": {"romaji": "One Piece"},
            "chapters": null,
            "genres": ["Action"],
        }))
        .unwrap();

        let reading = reading(media_details(media).unwrap(), None);
        assert_eq!(reading.display_title, "One Piece");
        assert_eq!(reading.cover_url, FALLBACK_COVER);
        assert_eq!(
            serde_json::to_value(&reading).unwrap()["userProgress"],
            Value::Null
        );
    }

    #[test]
    fn test_activities_filter_and_limit() {
        let raw: Vec<RawActivity> = serde_json::from_value(json!([
            {},
            {"status": "watched episode", "media": {"id": 1, "type": "ANIME"}},
            {"status": "read chapter", "progress": "1 - 3", "createdAt": 3,
             "media": {"id": 2, "type": "MANGA", "coverImage": {"extraLarge": "xl", "large": "l", "medium": "m"}}},
            {"status": "read chapter", "media": {"id": null, "type": "MANGA"}},
            {"status": "read chapter", "media": {"id": 3, "type": "MANGA", "coverImage": {"large": "l3"}}},
            {"status": "read chapter", "media": {"id": 4, "type": "MANGA"}},
        ]))
        .unwrap();

        let activities = activities(raw, MediaType::Manga, 2);

        assert_eq!(activities.len(), 2);
        assert_eq!(activities[0].id, 2);
        assert_eq!(activities[0].progress.as_deref(), Some("1 - 3"));
        assert_eq!(activities[0].media.cover_image.large.as_deref(), Some("xl"));
        assert_eq!(activities[0].media.cover_image.medium.as_deref(), Some("m"));
        assert_eq!(activities[1].id, 3);
        assert_eq!(activities[1].media.cover_image.large.as_deref(), Some("l3"));
    }

    #[test]
    fn test_recent_tracks() {
        let raw: RawRecentTracks = serde_json::from_value(json!({
            "track": [
                {
                    "name": "Playing",
                    "artist": {"#text": "Band"},
                    "album": {"#text": ""},
                    "image": [
                        {"size": "small", "#text": "s.png"},
                        {"size": "large", "#text": "l.png"},
                    ],
                    "@attr": {"nowplaying": "true"},
                },
                {
                    "name": "Played",
                    "artist": {"#text": "Band"},
                    "album": {"#text": "Album"},
                    "date": {"uts": "1700000000", "#text": "14 Nov 2023"},
                },
            ],
        }))
        .unwrap();

        let recent = recent_tracks(raw, "configured");

        assert_eq!(recent.user, "configured");
        assert_eq!(
            recent.tracks[0],
            Track {
                name: "Playing".into(),
                artist: "Band".into(),
                album: None,
                image: Some("l.png".into()),
                is_now_playing: true,
                timestamp: None,
            }
        );
        assert!(!recent.tracks[1].is_now_playing);
        assert_eq!(recent.tracks[1].album.as_deref(), Some("Album"));
        assert_eq!(recent.tracks[1].timestamp, Some(1_700_000_000_000));
    }

    #[test]
    fn test_lookups() {
        let media: RawMedia = serde_json::from_value(json!({
            "id": 1,
            "title": {"english": null, "romaji": "Cowboy Bebop"},
            "coverImage": {"large": null, "medium": "m.png"},
            "siteUrl": "https://anilist.co/anime/1",
        }))
        .unwrap();
        let data = anilist_lookup(media).unwrap();
        assert_eq!(data.external_id, "1");
        assert_eq!(data.title, "Cowboy Bebop");
        assert_eq!(data.cover_image.as_deref(), Some("m.png"));
        assert_eq!(
            data.metadata.site_url.as_deref(),
            Some("https://anilist.co/anime/1")
        );

        let vn: RawVn = serde_json::from_value(json!({
            "id": "v17",
            "title": "Ever17",
            "image": {"url": "https://t.vndb.org/cv/1.jpg"},
            "rating": 84.5,
            "released": "2002-08-29",
        }))
        .unwrap();
        let data = vndb_lookup(vn);
        assert_eq!(data.external_id, "v17");
        assert_eq!(data.metadata.average_score, Some(85));
        assert_eq!(
            data.metadata.site_url.as_deref(),
            Some("https://vndb.org/v17")
        );
        assert_eq!(data.metadata.genres, None);
    }
}
