//! AniList GraphQL API.

use super::found;
use crate::types::{MediaTitle, MediaType};
use crate::upstream::{UpstreamClient, UpstreamError};
use serde::Deserialize;
use serde_json::json;
use url::Url;

const UPSTREAM: &str = "anilist";

macro_rules! media_fields {
    () => {
        "id
        title { romaji english native }
        format
        status
        episodes
        chapters
        volumes
        averageScore
        genres
        coverImage { large medium }"
    };
}

const COLLECTION_QUERY: &str = concat!(
    "query ($userName: String, $type: MediaType, $chunk: Int, $perChunk: Int) {
  MediaListCollection(userName: $userName, type: $type, chunk: $chunk, perChunk: $perChunk) {
    hasNextChunk
    user { id name avatar { large } }
    lists {
      name
      status
      entries {
        id
        status
        score
        progress
        updatedAt
        media { ",
    media_fields!(),
    " }
      }
    }
  }
}"
);

const USER_QUERY: &str = "query ($userName: String) {
  User(name: $userName) { id name }
}";

const MEDIA_LIST_QUERY: &str = concat!(
    "query ($mediaId: Int, $userId: Int) {
  MediaList(mediaId: $mediaId, userId: $userId) {
    id
    status
    score
    progress
    progressVolumes
    updatedAt
    media { ",
    media_fields!(),
    " description(asHtml: false) }
  }
}"
);

const MEDIA_QUERY: &str = concat!(
    "query ($id: Int, $type: MediaType) {
  Media(id: $id, type: $type) { ",
    media_fields!(),
    " description(asHtml: false) siteUrl }
}"
);

const ACTIVITY_QUERY: &str = "query ($userId: Int, $perPage: Int) {
  Page(perPage: $perPage) {
    activities(userId: $userId, type: MEDIA_LIST, sort: ID_DESC) {
      ... on ListActivity {
        status
        progress
        createdAt
        media {
          id
          type
          siteUrl
          title { romaji english native }
          coverImage { extraLarge large medium }
        }
      }
    }
  }
}";

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawCoverImage {
    pub extra_large: Option<String>,
    pub large: Option<String>,
    pub medium: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawMedia {
    pub id: Option<i64>,
    #[serde(rename = "type")]
    pub media_type: Option<String>,
    pub title: Option<MediaTitle>,
    pub format: Option<String>,
    pub status: Option<String>,
    pub episodes: Option<u32>,
    pub chapters: Option<u32>,
    pub volumes: Option<u32>,
    pub average_score: Option<u32>,
    pub genres: Option<Vec<String>>,
    pub cover_image: Option<RawCoverImage>,
    pub description: Option<String>,
    pub site_url: Option<String>,
}

/// A list entry, as returned inside a collection or by `MediaList`.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RawEntry {
    pub id: i64,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub score: Option<f64>,
    #[serde(default)]
    pub progress: Option<u32>,
    #[serde(default)]
    pub progress_volumes: Option<u32>,
    #[serde(default)]
    pub updated_at: Option<i64>,
    #[serde(default)]
    pub media: Option<RawMedia>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RawList {
    pub name: Option<String>,
    pub status: Option<String>,
    pub entries: Option<Vec<RawEntry>>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawAvatar {
    #[serde(default)]
    pub large: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawUser {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub avatar: Option<RawAvatar>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawCollection {
    pub has_next_chunk: Option<bool>,
    pub user: Option<RawUser>,
    pub lists: Option<Vec<RawList>>,
}

impl RawCollection {
    /// Appends the lists of a later chunk. Groups are merged at normalization.
    fn absorb(&mut self, chunk: RawCollection) {
        if self.user.is_none() {
            self.user = chunk.user;
        }
        self.lists
            .get_or_insert_with(Vec::new)
            .extend(chunk.lists.unwrap_or_default());
        self.has_next_chunk = chunk.has_next_chunk;
    }
}

/// Non-`ListActivity` items come back as empty objects and parse as all `None`.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct RawActivity {
    pub status: Option<String>,
    pub progress: Option<String>,
    pub created_at: Option<i64>,
    pub media: Option<RawMedia>,
}

#[derive(Deserialize, Default)]
struct CollectionData {
    #[serde(rename = "MediaListCollection")]
    collection: Option<RawCollection>,
}

#[derive(Deserialize, Default)]
struct UserData {
    #[serde(rename = "User")]
    user: Option<RawUser>,
}

#[derive(Deserialize, Default)]
struct MediaListData {
    #[serde(rename = "MediaList")]
    media_list: Option<RawEntry>,
}

#[derive(Deserialize, Default)]
struct MediaData {
    #[serde(rename = "Media")]
    media: Option<RawMedia>,
}

#[derive(Deserialize, Default)]
struct RawPage {
    #[serde(default)]
    activities: Option<Vec<RawActivity>>,
}

#[derive(Deserialize, Default)]
struct PageData {
    #[serde(rename = "Page")]
    page: Option<RawPage>,
}

#[derive(Clone)]
pub struct AniList {
    client: UpstreamClient,
    url: Url,
}

impl AniList {
    pub fn new(client: UpstreamClient, url: Url) -> Self {
        AniList { client, url }
    }

    /// Fetches a user's whole collection, following `hasNextChunk` for at
    /// most `max_chunks` requests. `None` if the user or list does not exist.
    pub async fn collection(
        &self,
        user_name: &str,
        media_type: MediaType,
        per_chunk: u32,
        max_chunks: u32,
    ) -> Result<Option<RawCollection>, UpstreamError> {
        found(
            self.collection_chunks(user_name, media_type, per_chunk, max_chunks)
                .await,
        )
    }

    async fn collection_chunks(
        &self,
        user_name: &str,
        media_type: MediaType,
        per_chunk: u32,
        max_chunks: u32,
    ) -> Result<Option<RawCollection>, UpstreamError> {
        let mut merged: Option<RawCollection> = None;

        for chunk in 1..=max_chunks {
            let data: CollectionData = self
                .client
                .post_graphql(
                    UPSTREAM,
                    &self.url,
                    COLLECTION_QUERY,
                    json!({
                        "userName": user_name,
                        "type": media_type,
                        "chunk": chunk,
                        "perChunk": per_chunk,
                    }),
                )
                .await?;

            let Some(page) = data.collection else {
                break;
            };

            let has_next = page.has_next_chunk.unwrap_or(false);
            merged = Some(match merged.take() {
                None => page,
                Some(mut collection) => {
                    collection.absorb(page);
                    collection
                }
            });

            if !has_next {
                break;
            }
            if chunk == max_chunks {
                tracing::warn!(
                    user_name,
                    max_chunks,
                    "collection has more chunks than allowed, truncating"
                );
            }
        }

        Ok(merged)
    }

    pub async fn user(&self, user_name: &str) -> Result<Option<RawUser>, UpstreamError> {
        let result = self
            .client
            .post_graphql::<UserData>(
                UPSTREAM,
                &self.url,
                USER_QUERY,
                json!({ "userName": user_name }),
            )
            .await
            .map(|data| data.user);
        found(result)
    }

    /// A user's list entry for one media, with the media embedded.
    pub async fn media_list(
        &self,
        media_id: i64,
        user_id: i64,
    ) -> Result<Option<RawEntry>, UpstreamError> {
        let result = self
            .client
            .post_graphql::<MediaListData>(
                UPSTREAM,
                &self.url,
                MEDIA_LIST_QUERY,
                json!({ "mediaId": media_id, "userId": user_id }),
            )
            .await
            .map(|data| data.media_list);
        found(result)
    }

    pub async fn media(
        &self,
        id: i64,
        media_type: MediaType,
    ) -> Result<Option<RawMedia>, UpstreamError> {
        let result = self
            .client
            .post_graphql::<MediaData>(
                UPSTREAM,
                &self.url,
                MEDIA_QUERY,
                json!({ "id": id, "type": media_type }),
            )
            .await
            .map(|data| data.media);
        found(result)
    }

    /// Most recent list activities of a user, newest first.
    pub async fn activities(
        &self,
        user_id: i64,
        per_page: u32,
    ) -> Result<Vec<RawActivity>, UpstreamError> {
        let result = self
            .client
            .post_graphql::<PageData>(
                UPSTREAM,
                &self.url,
                ACTIVITY_QUERY,
                json!({ "userId": user_id, "perPage": per_page }),
            )
            .await
            .map(|data| data.page.and_then(|page| page.activities));
        Ok(found(result)?.unwrap_or_default())
    }
}
