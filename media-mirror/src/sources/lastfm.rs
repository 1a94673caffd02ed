//! Last.fm REST API.

use crate::config::LastFmCredentials;
use crate::upstream::{UpstreamClient, UpstreamError};
use serde::Deserialize;
use url::Url;

const UPSTREAM: &str = "lastfm";

/// `{"#text": ...}` wrapper used for most scalar fields.
#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
pub struct Text {
    #[serde(rename = "#text", default)]
    pub text: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawImage {
    #[serde(default)]
    pub size: String,
    #[serde(rename = "#text", default)]
    pub url: String,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawDate {
    pub uts: String,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RawTrackAttr {
    pub nowplaying: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
pub struct RawTrack {
    pub name: String,
    #[serde(default)]
    pub artist: Option<Text>,
    #[serde(default)]
    pub album: Option<Text>,
    #[serde(default)]
    pub image: Option<Vec<RawImage>>,
    #[serde(default)]
    pub date: Option<RawDate>,
    #[serde(rename = "@attr", default)]
    pub attr: Option<RawTrackAttr>,
}

/// Last.fm collapses single-element arrays into a bare object.
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(untagged)]
pub enum OneOrMany<T> {
    Many(Vec<T>),
    One(T),
}

impl<T> OneOrMany<T> {
    pub fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::Many(items) => items,
            OneOrMany::One(item) => vec![item],
        }
    }
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RawRecentTracksAttr {
    pub user: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone, PartialEq)]
#[serde(default)]
pub struct RawRecentTracks {
    pub track: Option<OneOrMany<RawTrack>>,
    #[serde(rename = "@attr")]
    pub attr: Option<RawRecentTracksAttr>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RecentTracksResponse {
    recenttracks: Option<RawRecentTracks>,
    error: Option<i64>,
    message: Option<String>,
}

#[derive(Clone)]
pub struct LastFm {
    client: UpstreamClient,
    url: Url,
    credentials: LastFmCredentials,
}

impl LastFm {
    pub fn new(client: UpstreamClient, url: Url, credentials: LastFmCredentials) -> Self {
        LastFm {
            client,
            url,
            credentials,
        }
    }

    /// The account whose scrobbles are mirrored.
    pub fn username(&self) -> &str {
        &self.credentials.username
    }

    pub async fn recent_tracks(&self, limit: u32) -> Result<RawRecentTracks, UpstreamError> {
        let mut url = self.url.clone();
        url.query_pairs_mut()
            .append_pair("method", "user.getrecenttracks")
            .append_pair("user", &self.credentials.username)
            .append_pair("api_key", &self.credentials.api_key)
            .append_pair("format", "json")
            .append_pair("limit", &limit.to_string());

        let response: RecentTracksResponse = self.client.get_json(UPSTREAM, url).await?;

        if let Some(code) = response.error {
            return Err(UpstreamError::Api {
                upstream: UPSTREAM,
                message: response
                    .message
                    .unwrap_or_else(|| format!("error code {code}")),
                status: None,
            });
        }
        Ok(response.recenttracks.unwrap_or_default())
    }
}
