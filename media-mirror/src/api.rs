use crate::config::{ANILIST_MAX_PER_CHUNK, Listener as ListenerConfig};
use crate::metrics_defs::API_REQUEST;
use crate::mirror::{Cached, CollectionQuery, FetchError, LookupTarget, MediaMirror};
use crate::sources::vndb;
use crate::types::{LookupKind, MediaType, Window};
use axum::{
    Json, Router,
    extract::{Query, State},
    http::{HeaderMap, HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
    routing::get,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use shared::counter;
use std::future::Future;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::net::TcpListener;
use tracing::Instrument;

const MAX_ACTIVITY_PER_PAGE: u32 = 50;
const DEFAULT_ACTIVITY_PER_PAGE: u32 = 10;
const MAX_TRACK_LIMIT: u32 = 200;
const DEFAULT_TRACK_LIMIT: u32 = 10;

pub fn router(mirror: MediaMirror) -> Router {
    Router::new()
        .route("/api/anilist", get(collection))
        .route("/api/anilist/reading", get(reading))
        .route("/api/anilist/recent", get(recent_activity))
        .route("/api/lastfm", get(recent_tracks))
        .route("/api/media-lookup", get(media_lookup))
        .with_state(mirror)
}

/// Binds the public listener, flags readiness and serves until the process exits.
pub async fn serve(
    listener: ListenerConfig,
    mirror: MediaMirror,
    ready: Arc<AtomicBool>,
) -> std::io::Result<()> {
    let addr = format!("{}:{}", listener.host, listener.port);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!(addr, "media mirror listening");
    ready.store(true, Ordering::Relaxed);

    axum::serve(listener, router(mirror)).await
}

#[derive(thiserror::Error, Debug)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Fetch(FetchError::NotFound(_)) => StatusCode::NOT_FOUND,
            ApiError::Fetch(
                FetchError::NotConfigured(_)
                | FetchError::Upstream(_)
                | FetchError::Serialization(_),
            ) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-facing messages are specific; everything else is internal.
    fn is_internal(&self) -> bool {
        matches!(
            self,
            ApiError::Fetch(FetchError::Upstream(_) | FetchError::Serialization(_))
        )
    }
}

/// An error a handler answers with.
trait RequestError: IntoResponse + std::fmt::Display {
    /// A failure on our side or upstream's, as opposed to a bad request or a miss.
    fn is_failure(&self) -> bool;
}

impl RequestError for ApiError {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            ApiError::Fetch(
                FetchError::NotConfigured(_)
                    | FetchError::Upstream(_)
                    | FetchError::Serialization(_)
            )
        )
    }
}

#[derive(Serialize)]
struct ApiErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    message: Option<String>,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = if self.is_internal() {
            ApiErrorResponse {
                error: "internal_server_error".into(),
                message: Some(self.to_string()),
            }
        } else {
            ApiErrorResponse {
                error: self.to_string(),
                message: None,
            }
        };

        (self.status(), Json(body)).into_response()
    }
}

/// Lookup errors use the `{success, error}` envelope of lookup results.
#[derive(Debug)]
struct LookupError(ApiError);

impl std::fmt::Display for LookupError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Serialize)]
struct LookupErrorResponse {
    success: bool,
    error: String,
}

impl RequestError for LookupError {
    fn is_failure(&self) -> bool {
        self.0.is_failure()
    }
}

/// Every failed lookup is a 404 unless the request itself was bad. Upstream
/// failures only expose a short summary; the full error goes to the log.
impl IntoResponse for LookupError {
    fn into_response(self) -> Response {
        let (status, error) = match self.0 {
            ApiError::Validation(message) => (StatusCode::BAD_REQUEST, message),
            ApiError::Fetch(FetchError::Upstream(e)) => {
                (StatusCode::NOT_FOUND, e.public_message())
            }
            ApiError::Fetch(FetchError::Serialization(_)) => {
                (StatusCode::NOT_FOUND, "Media lookup failed".to_string())
            }
            ApiError::Fetch(e @ (FetchError::NotFound(_) | FetchError::NotConfigured(_))) => {
                (StatusCode::NOT_FOUND, e.to_string())
            }
        };
        let body = Json(LookupErrorResponse {
            success: false,
            error,
        });
        (status, body).into_response()
    }
}

/// Strong validator over the key and the time the entry was written.
fn etag(key: &str, updated_at: DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(key.as_bytes());
    hasher.update(updated_at.timestamp_millis().to_string().as_bytes());
    format!("\"{:x}\"", hasher.finalize())
}

fn if_none_match(headers: &HeaderMap, etag: &str) -> bool {
    headers
        .get_all(header::IF_NONE_MATCH)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .any(|candidate| candidate == etag || candidate == "*")
}

/// A cached value with its freshness headers.
struct CachedResponse {
    cached: Cached,
    etag: String,
    now: DateTime<Utc>,
    not_modified: bool,
}

impl CachedResponse {
    fn new(cached: Cached, now: DateTime<Utc>, headers: &HeaderMap) -> Self {
        let etag = etag(&cached.entry.key, cached.entry.updated_at);
        CachedResponse {
            not_modified: if_none_match(headers, &etag),
            cached,
            etag,
            now,
        }
    }

    fn max_age(&self) -> u64 {
        self.cached.remaining(self.now).as_secs()
    }
}

impl IntoResponse for CachedResponse {
    fn into_response(self) -> Response {
        let cache_control = format!("public, max-age={}", self.max_age());

        let mut response = if self.not_modified {
            StatusCode::NOT_MODIFIED.into_response()
        } else {
            Json(self.cached.entry.value.as_ref()).into_response()
        };

        let headers = response.headers_mut();
        if let Ok(value) = HeaderValue::from_str(&self.etag) {
            headers.insert(header::ETAG, value);
        }
        if let Ok(value) = HeaderValue::from_str(&cache_control) {
            headers.insert(header::CACHE_CONTROL, value);
        }
        response
    }
}

/// Runs one request inside a `request` span carrying the endpoint and, once
/// known, the cache key, then logs and counts the outcome.
async fn respond<F, E>(endpoint: &'static str, handle: F) -> Response
where
    F: Future<Output = Result<CachedResponse, E>>,
    E: RequestError,
{
    let span = tracing::info_span!("request", endpoint, key = tracing::field::Empty);
    let result = handle.instrument(span.clone()).await;

    let response = match result {
        Ok(response) => response.into_response(),
        Err(e) => {
            let failure = e.is_failure();
            let error = e.to_string();
            let response = e.into_response();
            span.in_scope(|| {
                if failure {
                    tracing::error!(
                        status = %response.status(),
                        error = %error,
                        "request failed"
                    );
                } else {
                    tracing::debug!(
                        status = %response.status(),
                        error = %error,
                        "request rejected"
                    );
                }
            });
            response
        }
    };

    counter!(
        API_REQUEST,
        "endpoint" => endpoint,
        "status" => response.status().as_str().to_string()
    )
    .increment(1);
    response
}

fn required(value: Option<&str>, message: &'static str) -> Result<String, ApiError> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(String::from)
        .ok_or_else(|| ApiError::Validation(message.into()))
}

/// Parses an optional numeric parameter, `default` if absent or empty.
fn parse_or<T: FromStr>(
    value: Option<&str>,
    default: T,
    message: &'static str,
) -> Result<T, ApiError> {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        None => Ok(default),
        Some(value) => value
            .parse()
            .map_err(|_| ApiError::Validation(message.into())),
    }
}

fn in_range(value: u32, max: u32, name: &str) -> Result<u32, ApiError> {
    if value == 0 || value > max {
        return Err(ApiError::Validation(format!("{name} must be between 1 and {max}")));
    }
    Ok(value)
}

fn media_type(value: Option<&str>, default: MediaType) -> Result<MediaType, ApiError> {
    parse_or(value, default, "type must be ANIME or MANGA")
}

#[derive(Deserialize, Debug, Default)]
struct CollectionParams {
    username: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
    #[serde(rename = "perChunk")]
    per_chunk: Option<String>,
    offset: Option<String>,
    limit: Option<String>,
}

impl CollectionParams {
    fn validate(
        &self,
        default_per_chunk: u32,
        max_per_chunk: u32,
    ) -> Result<CollectionQuery, ApiError> {
        let username = required(self.username.as_deref(), "username is required")?;
        let media_type = media_type(self.media_type.as_deref(), MediaType::Anime)?;

        let per_chunk = parse_or(
            self.per_chunk.as_deref(),
            default_per_chunk,
            "perChunk must be an integer",
        )?;
        let per_chunk = in_range(per_chunk, max_per_chunk.min(ANILIST_MAX_PER_CHUNK), "perChunk")?;

        let offset = parse_or(
            self.offset.as_deref(),
            0usize,
            "offset must be a non-negative integer",
        )?;
        let limit = parse_or(
            self.limit.as_deref(),
            0usize,
            "limit must be a non-negative integer",
        )?;
        // A zero or absent limit disables pagination.
        let window = (limit > 0).then_some(Window { offset, limit });

        Ok(CollectionQuery {
            username,
            media_type,
            per_chunk,
            window,
        })
    }
}

async fn collection(
    State(mirror): State<MediaMirror>,
    Query(params): Query<CollectionParams>,
    headers: HeaderMap,
) -> Response {
    respond("anilist", async {
        let config = mirror.collection_config();
        let query = params.validate(config.default_per_chunk, config.max_per_chunk)?;
        let cached = mirror.collection(&query).await?;
        Ok::<_, ApiError>(CachedResponse::new(cached, mirror.now(), &headers))
    })
    .await
}

#[derive(Deserialize, Debug, Default)]
struct ReadingParams {
    id: Option<String>,
    username: Option<String>,
}

async fn reading(
    State(mirror): State<MediaMirror>,
    Query(params): Query<ReadingParams>,
    headers: HeaderMap,
) -> Response {
    respond("anilist_reading", async {
        let id = required(params.id.as_deref(), "Media ID is required")?;
        let id: i64 = id
            .parse()
            .map_err(|_| ApiError::Validation("Invalid media ID".into()))?;
        let username = params
            .username
            .as_deref()
            .map(str::trim)
            .filter(|username| !username.is_empty());

        let cached = mirror.reading(id, username).await?;
        Ok::<_, ApiError>(CachedResponse::new(cached, mirror.now(), &headers))
    })
    .await
}

#[derive(Deserialize, Debug, Default)]
struct ActivityParams {
    username: Option<String>,
    #[serde(rename = "perPage")]
    per_page: Option<String>,
    #[serde(rename = "type")]
    media_type: Option<String>,
}

async fn recent_activity(
    State(mirror): State<MediaMirror>,
    Query(params): Query<ActivityParams>,
    headers: HeaderMap,
) -> Response {
    respond("anilist_recent", async {
        let username = required(params.username.as_deref(), "username is required")?;
        let per_page = parse_or(
            params.per_page.as_deref(),
            DEFAULT_ACTIVITY_PER_PAGE,
            "perPage must be an integer",
        )?;
        let per_page = in_range(per_page, MAX_ACTIVITY_PER_PAGE, "perPage")?;
        let media_type = media_type(params.media_type.as_deref(), MediaType::Manga)?;

        let cached = mirror.activity(&username, per_page, media_type).await?;
        Ok::<_, ApiError>(CachedResponse::new(cached, mirror.now(), &headers))
    })
    .await
}

#[derive(Deserialize, Debug, Default)]
struct TracksParams {
    limit: Option<String>,
}

async fn recent_tracks(
    State(mirror): State<MediaMirror>,
    Query(params): Query<TracksParams>,
    headers: HeaderMap,
) -> Response {
    respond("lastfm", async {
        let limit = parse_or(
            params.limit.as_deref(),
            DEFAULT_TRACK_LIMIT,
            "limit must be an integer",
        )?;
        let limit = in_range(limit, MAX_TRACK_LIMIT, "limit")?;

        let cached = mirror.recent_tracks(limit).await?;
        Ok::<_, ApiError>(CachedResponse::new(cached, mirror.now(), &headers))
    })
    .await
}

#[derive(Deserialize, Debug, Default)]
struct LookupParams {
    id: Option<String>,
    #[serde(rename = "type")]
    kind: Option<String>,
}

impl LookupParams {
    fn validate(&self) -> Result<LookupTarget, ApiError> {
        let id = required(self.id.as_deref(), "ID is required")?;
        let kind: LookupKind = self
            .kind
            .as_deref()
            .ok_or(())
            .and_then(str::parse)
            .map_err(|_| {
                ApiError::Validation("Type must be one of: anime, manga, novel, vn".into())
            })?;

        match kind.anilist_type() {
            None => Ok(LookupTarget::VisualNovel {
                id: vndb::normalize_id(&id),
            }),
            Some(media_type) => {
                let id = id
                    .parse()
                    .map_err(|_| ApiError::Validation("Invalid AniList ID".into()))?;
                Ok(LookupTarget::AniList {
                    kind,
                    id,
                    media_type,
                })
            }
        }
    }
}

async fn media_lookup(
    State(mirror): State<MediaMirror>,
    Query(params): Query<LookupParams>,
    headers: HeaderMap,
) -> Response {
    respond("media_lookup", async {
        let target = params.validate().map_err(LookupError)?;
        let cached = mirror
            .lookup(&target)
            .await
            .map_err(|e| LookupError(e.into()))?;
        Ok::<_, LookupError>(CachedResponse::new(cached, mirror.now(), &headers))
    })
    .await
}
