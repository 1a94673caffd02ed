//! Request orchestration: cache lookup, upstream fetch, normalization and
//! cache write, one method per endpoint.

use crate::cache::{Cache, CacheEntry};
use crate::config::{CollectionConfig, Config};
use crate::keys::CacheKey;
use crate::normalize;
use crate::pagination::paginate;
use crate::sources::{AniList, LastFm, Vndb};
use crate::types::{
    ActivityFeed, LookupKind, LookupResponse, MediaCollection, MediaType, ReadingResponse,
    RecentTracks, Window,
};
use crate::upstream::{UpstreamClient, UpstreamError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::future::Future;
use std::time::Duration;

/// Upper bound on activities fetched for the recent feed.
const MAX_ACTIVITY_FETCH: u32 = 50;

#[derive(thiserror::Error, Debug)]
pub enum FetchError {
    #[error("{0}")]
    NotFound(&'static str),
    #[error("{0}")]
    NotConfigured(&'static str),
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("could not encode response: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A served value and the cache entry it came from.
#[derive(Clone, Debug)]
pub struct Cached {
    pub entry: CacheEntry,
    /// Freshness window the entry was read or written under.
    pub ttl: Duration,
}

impl Cached {
    /// Freshness left at `now`, zero once stale.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let age = self.entry.age(now).to_std().unwrap_or_default();
        self.ttl.saturating_sub(age)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct CollectionQuery {
    pub username: String,
    pub media_type: MediaType,
    pub per_chunk: u32,
    /// `None` serves the whole snapshot.
    pub window: Option<Window>,
}

/// What a media lookup resolves against.
#[derive(Clone, Debug, PartialEq)]
pub enum LookupTarget {
    AniList {
        kind: LookupKind,
        id: i64,
        media_type: MediaType,
    },
    /// `id` in `v123` form.
    VisualNovel { id: String },
}

impl LookupTarget {
    fn cache_key(&self) -> CacheKey {
        match self {
            LookupTarget::AniList { kind, id, .. } => CacheKey::lookup(*kind, &id.to_string()),
            LookupTarget::VisualNovel { id } => CacheKey::lookup(LookupKind::Vn, id),
        }
    }
}

/// Shared per-process service state. Cheap to clone.
#[derive(Clone)]
pub struct MediaMirror {
    cache: Cache,
    anilist: AniList,
    lastfm: Option<LastFm>,
    vndb: Vndb,
    collection: CollectionConfig,
    response_ttl: Duration,
    snapshot_ttl: Duration,
}

impl MediaMirror {
    pub fn new(config: &Config, cache: Cache) -> Result<Self, reqwest::Error> {
        let client = UpstreamClient::new(&config.upstreams)?;
        let lastfm = config.lastfm_credentials().map(|credentials| {
            LastFm::new(
                client.clone(),
                config.upstreams.lastfm_url.clone(),
                credentials,
            )
        });
        if lastfm.is_none() {
            tracing::warn!("no Last.fm credentials configured, recent tracks are unavailable");
        }

        Ok(MediaMirror {
            cache,
            anilist: AniList::new(client.clone(), config.upstreams.anilist_url.clone()),
            lastfm,
            vndb: Vndb::new(client, config.upstreams.vndb_url.clone()),
            collection: config.collection.clone(),
            response_ttl: config.cache.response_ttl(),
            snapshot_ttl: config.cache.snapshot_ttl(),
        })
    }

    pub fn collection_config(&self) -> &CollectionConfig {
        &self.collection
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.cache.now()
    }

    /// Serves `key` from the cache, or runs `fetch` and stores its result.
    /// Failed fetches leave the cache untouched.
    async fn cached<T, F, Fut>(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetch: F,
    ) -> Result<Cached, FetchError>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let key = key.to_string();
        tracing::Span::current().record("key", key.as_str());
        if let Some(entry) = self.cache.get(&key, ttl).await {
            tracing::debug!(key = %key, "serving from cache");
            return Ok(Cached { entry, ttl });
        }

        let value = match fetch().await {
            Ok(value) => serde_json::to_value(value)?,
            Err(e) => {
                tracing::debug!(key = %key, error = %e, "fetch failed, nothing cached");
                return Err(e);
            }
        };
        let entry = self.cache.set(&key, value).await;
        Ok(Cached { entry, ttl })
    }

    /// A user's collection, whole or as a window over the cached snapshot.
    ///
    /// Pages are keyed by the snapshot version they were cut from and never
    /// outlive it, so a page always agrees with the current snapshot.
    pub async fn collection(&self, query: &CollectionQuery) -> Result<Cached, FetchError> {
        let snapshot = self.snapshot(query).await?;
        let Some(window) = query.window else {
            return Ok(snapshot);
        };

        let key = CacheKey::collection_page(
            &query.username,
            query.media_type,
            query.per_chunk,
            snapshot.entry.updated_at.timestamp_millis(),
            window,
        );
        let ttl = self.response_ttl.min(snapshot.remaining(self.now()));
        self.cached(&key, ttl, || std::future::ready(slice(&snapshot, window)))
            .await
    }

    async fn snapshot(&self, query: &CollectionQuery) -> Result<Cached, FetchError> {
        let key =
            CacheKey::collection_snapshot(&query.username, query.media_type, query.per_chunk);
        self.cached(&key, self.snapshot_ttl, || self.fetch_snapshot(query))
            .await
    }

    async fn fetch_snapshot(&self, query: &CollectionQuery) -> Result<MediaCollection, FetchError> {
        let raw = self
            .anilist
            .collection(
                &query.username,
                query.media_type,
                query.per_chunk,
                self.collection.max_chunks,
            )
            .await?
            .ok_or(FetchError::NotFound("user not found or no public lists"))?;
        Ok(normalize::collection(raw, query.per_chunk))
    }

    /// One media, overlaid with the user's progress when `username` is given.
    pub async fn reading(
        &self,
        media_id: i64,
        username: Option<&str>,
    ) -> Result<Cached, FetchError> {
        let key = CacheKey::reading(media_id, username);
        self.cached(&key, self.response_ttl, || self.fetch_reading(media_id, username))
            .await
    }

    async fn fetch_reading(
        &self,
        media_id: i64,
        username: Option<&str>,
    ) -> Result<ReadingResponse, FetchError> {
        let Some(username) = username else {
            let media = self
                .anilist
                .media(media_id, MediaType::Manga)
                .await?
                .and_then(normalize::media_details)
                .ok_or(FetchError::NotFound("Media not found"))?;
            return Ok(normalize::reading(media, None));
        };

        let user = self
            .anilist
            .user(username)
            .await?
            .ok_or(FetchError::NotFound("User not found"))?;
        let mut entry = self
            .anilist
            .media_list(media_id, user.id)
            .await?
            .ok_or(FetchError::NotFound("Media list entry not found"))?;

        let progress = normalize::user_progress(&entry);
        let media = entry
            .media
            .take()
            .and_then(normalize::media_details)
            .ok_or(FetchError::NotFound("Media list entry not found"))?;
        Ok(normalize::reading(media, Some(progress)))
    }

    /// A user's latest list activities for one media type.
    pub async fn activity(
        &self,
        username: &str,
        per_page: u32,
        media_type: MediaType,
    ) -> Result<Cached, FetchError> {
        let key = CacheKey::activity(username, per_page, media_type);
        self.cached(&key, self.response_ttl, || {
            self.fetch_activity(username, per_page, media_type)
        })
        .await
    }

    async fn fetch_activity(
        &self,
        username: &str,
        per_page: u32,
        media_type: MediaType,
    ) -> Result<ActivityFeed, FetchError> {
        let user = self
            .anilist
            .user(username)
            .await?
            .ok_or(FetchError::NotFound("user not found"))?;

        // Over-fetch since other media types are filtered out.
        let fetch_size = per_page.saturating_mul(4).min(MAX_ACTIVITY_FETCH);
        let raw = self.anilist.activities(user.id, fetch_size).await?;

        Ok(ActivityFeed {
            activities: normalize::activities(raw, media_type, per_page as usize),
        })
    }

    pub async fn recent_tracks(&self, limit: u32) -> Result<Cached, FetchError> {
        let lastfm = self
            .lastfm
            .as_ref()
            .ok_or(FetchError::NotConfigured("Last.fm credentials not configured"))?;

        let key = CacheKey::recent_tracks(lastfm.username(), limit);
        self.cached(&key, self.response_ttl, || fetch_recent_tracks(lastfm, limit))
            .await
    }

    pub async fn lookup(&self, target: &LookupTarget) -> Result<Cached, FetchError> {
        let key = target.cache_key();
        self.cached(&key, self.response_ttl, || self.fetch_lookup(target))
            .await
    }

    async fn fetch_lookup(&self, target: &LookupTarget) -> Result<LookupResponse, FetchError> {
        let data = match target {
            LookupTarget::AniList { id, media_type, .. } => self
                .anilist
                .media(*id, *media_type)
                .await?
                .and_then(normalize::anilist_lookup)
                .ok_or(FetchError::NotFound("Media not found"))?,
            LookupTarget::VisualNovel { id } => self
                .vndb
                .visual_novel(id)
                .await?
                .map(normalize::vndb_lookup)
                .ok_or(FetchError::NotFound("Visual novel not found"))?,
        };
        Ok(LookupResponse {
            success: true,
            data,
        })
    }
}

fn slice(snapshot: &Cached, window: Window) -> Result<MediaCollection, FetchError> {
    let snapshot: MediaCollection = serde_json::from_value(snapshot.entry.value.as_ref().clone())?;
    Ok(paginate(&snapshot, window))
}

async fn fetch_recent_tracks(lastfm: &LastFm, limit: u32) -> Result<RecentTracks, FetchError> {
    let raw = lastfm.recent_tracks(limit).await?;
    Ok(normalize::recent_tracks(raw, lastfm.username()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::MemoryStore;
    use crate::cache::testing::ManualClock;
    use crate::config::LastFmCredentials;
    use crate::testutils::MockUpstream;
    use http::StatusCode;
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn config(mock: &MockUpstream) -> Config {
        let mut config = Config::default();
        config.upstreams.anilist_url = mock.url();
        config.upstreams.lastfm_url = mock.url_with_path("2.0/");
        config.upstreams.vndb_url = mock.url_with_path("kana");
        config.lastfm = Some(LastFmCredentials {
            username: "someone".into(),
            api_key: "secret".into(),
        });
        config
    }

    fn mirror(mock: &MockUpstream) -> MediaMirror {
        let cache = Cache::new(Arc::new(MemoryStore::new(100)));
        MediaMirror::new(&config(mock), cache).unwrap()
    }

    fn collection_response() -> Value {
        json!({"data": {"MediaListCollection": {
            "hasNextChunk": false,
            "user": {"id": 1, "name": "keiran"},
            "lists": [
                {"name": "Watching", "status": "CURRENT", "entries": [
                    {"id": 1, "media": {"id": 10, "status": "RELEASING"}},
                    {"id": 2, "media": {"id": 20, "status": "NOT_YET_RELEASED"}},
                    {"id": 3, "media": {"id": 30, "status": "FINISHED"}},
                ]},
                {"name": "Completed", "status": "COMPLETED", "entries": [
                    {"id": 4, "media": {"id": 40, "status": "FINISHED"}},
                ]},
            ],
        }}})
    }

    fn query(window: Option<Window>) -> CollectionQuery {
        CollectionQuery {
            username: "Keiran".into(),
            media_type: MediaType::Anime,
            per_chunk: 500,
            window,
        }
    }

    #[tokio::test]
    async fn test_pages_reuse_the_snapshot() {
        let mock = MockUpstream::start(|_| (StatusCode::OK, collection_response())).await;
        let mirror = mirror(&mock);

        let full = mirror.collection(&query(None)).await.unwrap();
        assert_eq!(full.entry.value["totalEntries"], 3);
        assert_eq!(full.entry.value["pagination"], Value::Null);

        for offset in [0, 1, 2] {
            let page = mirror
                .collection(&query(Some(Window { offset, limit: 1 })))
                .await
                .unwrap();
            assert_eq!(page.entry.value["pagination"]["offset"], offset);
            assert_eq!(page.entry.value["totalEntries"], 3);
        }

        // One upstream fetch for the snapshot, every page sliced from it.
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn test_page_miss_builds_snapshot_first() {
        let mock = MockUpstream::start(|_| (StatusCode::OK, collection_response())).await;
        let mirror = mirror(&mock);

        let page = mirror
            .collection(&query(Some(Window {
                offset: 0,
                limit: 1,
            })))
            .await
            .unwrap();
        assert_eq!(
            page.entry.value["pagination"]["totalPerStatus"],
            json!({"CURRENT": 2, "COMPLETED": 1})
        );

        mirror.collection(&query(None)).await.unwrap();
        assert_eq!(mock.hits(), 1);
    }

    #[tokio::test]
    async fn test_snapshot_outlives_page_ttl() {
        let mock = MockUpstream::start(|_| (StatusCode::OK, collection_response())).await;
        let clock = Arc::new(ManualClock::new());
        let cache = Cache::with_clock(Arc::new(MemoryStore::new(100)), clock.clone());
        let mirror = MediaMirror::new(&config(&mock), cache).unwrap();
        let window = Some(Window {
            offset: 0,
            limit: 1,
        });

        mirror.collection(&query(window)).await.unwrap();
        // Past the page TTL but within the snapshot TTL.
        clock.advance(mirror.response_ttl + Duration::from_secs(1));
        mirror.collection(&query(window)).await.unwrap();
        assert_eq!(mock.hits(), 1);

        clock.advance(mirror.snapshot_ttl);
        mirror.collection(&query(window)).await.unwrap();
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test]
    async fn test_page_never_outlives_its_snapshot() {
        // Every upstream fetch returns one more entry than the last.
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mock = MockUpstream::start(move |_| {
            let size = seen.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            let entries: Vec<Value> = (1..=size)
                .map(|id| json!({"id": id, "media": {"id": id * 10}}))
                .collect();
            let body = json!({"data": {"MediaListCollection": {
                "hasNextChunk": false,
                "lists": [{"name": "Watching", "status": "CURRENT", "entries": entries}],
            }}});
            (StatusCode::OK, body)
        })
        .await;
        let clock = Arc::new(ManualClock::new());
        let cache = Cache::with_clock(Arc::new(MemoryStore::new(100)), clock.clone());
        let mirror = MediaMirror::new(&config(&mock), cache).unwrap();
        let window = Some(Window {
            offset: 0,
            limit: 10,
        });

        let full = mirror.collection(&query(None)).await.unwrap();
        assert_eq!(full.entry.value["totalEntries"], 1);

        // A page cut just before the snapshot expires is capped to it.
        clock.advance(mirror.snapshot_ttl - Duration::from_secs(60));
        let page = mirror.collection(&query(window)).await.unwrap();
        assert_eq!(page.entry.value["totalEntries"], 1);
        assert!(page.ttl <= Duration::from_secs(60));

        clock.advance(Duration::from_secs(120));
        let full = mirror.collection(&query(None)).await.unwrap();
        let page = mirror.collection(&query(window)).await.unwrap();

        assert_eq!(mock.hits(), 2);
        assert_eq!(full.entry.value["totalEntries"], 2);
        assert_eq!(page.entry.value["totalEntries"], 2);
        assert_eq!(
            page.entry.value["pagination"]["totalPerStatus"],
            json!({"CURRENT": 2})
        );
    }

    #[tokio::test]
    async fn test_reading_with_user_progress() {
        let mock = MockUpstream::start(|req| {
            let query = req.body["query"].as_str().unwrap_or_default();
            let body = if query.contains("User(name") {
                json!({"data": {"User": {"id": 42, "name": "keiran"}}})
            } else {
                assert_eq!(req.body["variables"], json!({"mediaId": 30013, "userId": 42}));
                json!({"data": {"MediaList": {
                    "id": 9, "status": "CURRENT", "score": 9.0, "progress": 1100,
                    "progressVolumes": 100, "updatedAt": 1700000000,
                    "media": {"id": 30013, "title": {"romaji": "One Piece"}},
                }}})
            };
            (StatusCode::OK, body)
        })
        .await;

        let cached = mirror(&mock).reading(30013, Some("keiran")).await.unwrap();
        let value = cached.entry.value.as_ref();

        assert_eq!(value["displayTitle"], "One Piece");
        assert_eq!(value["userProgress"]["progress"], 1100);
        assert_eq!(value["userProgress"]["progressVolumes"], 100);
        assert_eq!(value["media"]["genres"], json!([]));
        assert_eq!(mock.hits(), 2);
    }

    #[tokio::test]
    async fn test_reading_not_found_messages() {
        let mock = MockUpstream::start(|req| {
            let query = req.body["query"].as_str().unwrap_or_default();
            let body = if query.contains("User(name") {
                json!({"data": {"User": {"id": 42, "name": "keiran"}}})
            } else {
                json!({"data": {"MediaList": null, "Media": null}})
            };
            (StatusCode::OK, body)
        })
        .await;
        let mirror = mirror(&mock);

        assert!(matches!(
            mirror.reading(1, Some("keiran")).await,
            Err(FetchError::NotFound("Media list entry not found"))
        ));
        assert!(matches!(
            mirror.reading(1, None).await,
            Err(FetchError::NotFound("Media not found"))
        ));
    }

    #[tokio::test]
    async fn test_activity_over_fetches() {
        let mock = MockUpstream::start(|req| {
            let query = req.body["query"].as_str().unwrap_or_default();
            let body = if query.contains("User(name") {
                json!({"data": {"User": {"id": 42, "name": "keiran"}}})
            } else {
                json!({"data": {"Page": {"activities": [
                    {"status": "read chapter", "media": {"id": 1, "type": "MANGA"}},
                    {"status": "watched episode", "media": {"id": 2, "type": "ANIME"}},
                    {"status": "read chapter", "media": {"id": 3, "type": "MANGA"}},
                ]}}})
            };
            (StatusCode::OK, body)
        })
        .await;

        let cached = mirror(&mock)
            .activity("keiran", 20, MediaType::Manga)
            .await
            .unwrap();

        let activities = cached.entry.value["activities"].as_array().unwrap().clone();
        assert_eq!(activities.len(), 2);
        assert_eq!(mock.requests()[1].body["variables"]["perPage"], 50);
    }

    #[tokio::test]
    async fn test_recent_tracks_need_credentials() {
        let mock = MockUpstream::start(|_| (StatusCode::OK, json!({}))).await;
        let mut config = config(&mock);
        config.lastfm = None;
        let cache = Cache::new(Arc::new(MemoryStore::new(100)));
        let mirror = MediaMirror::new(&config, cache).unwrap();

        // Only meaningful when the environment does not provide credentials.
        if config.lastfm_credentials().is_none() {
            assert!(matches!(
                mirror.recent_tracks(10).await,
                Err(FetchError::NotConfigured(_))
            ));
            assert_eq!(mock.hits(), 0);
        }
    }

    #[tokio::test]
    async fn test_lookup_visual_novel() {
        let mock = MockUpstream::start(|_| {
            (
                StatusCode::OK,
                json!({"results": [{"id": "v17", "title": "Ever17", "rating": 84.2}]}),
            )
        })
        .await;

        let cached = mirror(&mock)
            .lookup(&LookupTarget::VisualNovel { id: "v17".into() })
            .await
            .unwrap();

        assert_eq!(cached.entry.key, "lookup:vn:v17");
        assert_eq!(cached.entry.value["success"], true);
        assert_eq!(cached.entry.value["data"]["metadata"]["averageScore"], 84);
    }
}
