use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;
use url::Url;

const LASTFM_USERNAME_ENV: &str = "LASTFM_USERNAME";
const LASTFM_API_KEY_ENV: &str = "LASTFM_API_KEY";

/// AniList refuses larger chunks.
pub const ANILIST_MAX_PER_CHUNK: u32 = 500;

#[derive(Error, Debug, PartialEq)]
pub enum ValidationError {
    #[error("Port cannot be 0")]
    InvalidPort,

    #[error("{0} must be greater than zero")]
    ZeroValue(&'static str),

    #[error("snapshot_ttl_secs ({snapshot}) must not be shorter than response_ttl_secs ({response})")]
    SnapshotTtlTooShort { snapshot: u64, response: u64 },

    #[error("default_per_chunk ({default}) exceeds max_per_chunk ({max})")]
    PerChunkOutOfRange { default: u32, max: u32 },

    #[error("sqlite cache path is empty")]
    EmptySqlitePath,
}

/// Network listener configuration
#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Listener {
    pub host: String,
    pub port: u16,
}

impl Listener {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        Ok(())
    }
}

impl Default for Listener {
    fn default() -> Self {
        Listener {
            host: "127.0.0.1".into(),
            port: 3000,
        }
    }
}

fn default_admin_listener() -> Listener {
    Listener {
        host: "127.0.0.1".into(),
        port: 3001,
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(rename_all = "lowercase")]
#[serde(tag = "type")]
pub enum CacheBackend {
    Memory {
        #[serde(default = "default_max_capacity")]
        max_capacity: u64,
    },
    Sqlite {
        path: String,
    },
}

fn default_max_capacity() -> u64 {
    10_000
}

impl Default for CacheBackend {
    fn default() -> Self {
        CacheBackend::Memory {
            max_capacity: default_max_capacity(),
        }
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// Freshness window for served responses and paginated views.
    pub response_ttl_secs: u64,
    /// Freshness window for full collection snapshots.
    pub snapshot_ttl_secs: u64,
    /// Entries created longer ago than this are purged by the cleanup sweep.
    pub retention_days: u64,
    pub cleanup_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            backend: CacheBackend::default(),
            response_ttl_secs: 60 * 60,
            snapshot_ttl_secs: 6 * 60 * 60,
            retention_days: 30,
            cleanup_interval_secs: 24 * 60 * 60,
        }
    }
}

impl CacheConfig {
    pub fn response_ttl(&self) -> Duration {
        Duration::from_secs(self.response_ttl_secs)
    }

    pub fn snapshot_ttl(&self) -> Duration {
        Duration::from_secs(self.snapshot_ttl_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days.saturating_mul(24 * 60 * 60))
    }

    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.response_ttl_secs == 0 {
            return Err(ValidationError::ZeroValue("response_ttl_secs"));
        }
        if self.snapshot_ttl_secs == 0 {
            return Err(ValidationError::ZeroValue("snapshot_ttl_secs"));
        }
        if self.snapshot_ttl_secs < self.response_ttl_secs {
            return Err(ValidationError::SnapshotTtlTooShort {
                snapshot: self.snapshot_ttl_secs,
                response: self.response_ttl_secs,
            });
        }
        if self.retention_days == 0 {
            return Err(ValidationError::ZeroValue("retention_days"));
        }
        if self.cleanup_interval_secs == 0 {
            return Err(ValidationError::ZeroValue("cleanup_interval_secs"));
        }
        match &self.backend {
            CacheBackend::Memory { max_capacity: 0 } => {
                Err(ValidationError::ZeroValue("max_capacity"))
            }
            CacheBackend::Sqlite { path } if path.trim().is_empty() => {
                Err(ValidationError::EmptySqlitePath)
            }
            _ => Ok(()),
        }
    }
}

/// Base URLs of the third-party services.
///
/// Uses `url::Url` so malformed URLs are rejected while the config is parsed.
#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct Upstreams {
    pub anilist_url: Url,
    pub lastfm_url: Url,
    pub vndb_url: Url,
    pub timeout_secs: u64,
    pub user_agent: String,
}

impl Default for Upstreams {
    fn default() -> Self {
        // Literal URLs, parsing cannot fail.
        Upstreams {
            anilist_url: Url::parse("https://graphql.anilist.co").expect("valid url"),
            lastfm_url: Url::parse("https://ws.audioscrobbler.com/2.0/").expect("valid url"),
            vndb_url: Url::parse("https://api.vndb.org/kana").expect("valid url"),
            timeout_secs: 10,
            user_agent: concat!("media-mirror/", env!("CARGO_PKG_VERSION")).into(),
        }
    }
}

impl Upstreams {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Clone, Deserialize, PartialEq)]
pub struct LastFmCredentials {
    pub username: String,
    pub api_key: String,
}

impl LastFmCredentials {
    pub fn from_env() -> Option<Self> {
        let username = std::env::var(LASTFM_USERNAME_ENV).ok()?;
        let api_key = std::env::var(LASTFM_API_KEY_ENV).ok()?;
        if username.is_empty() || api_key.is_empty() {
            return None;
        }
        Some(LastFmCredentials { username, api_key })
    }
}

// Keep the api key out of logs.
impl std::fmt::Debug for LastFmCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LastFmCredentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
#[serde(default)]
pub struct CollectionConfig {
    pub default_per_chunk: u32,
    pub max_per_chunk: u32,
    /// Upper bound on chunk requests for a single snapshot.
    pub max_chunks: u32,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        CollectionConfig {
            default_per_chunk: ANILIST_MAX_PER_CHUNK,
            max_per_chunk: ANILIST_MAX_PER_CHUNK,
            max_chunks: 20,
        }
    }
}

impl CollectionConfig {
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.default_per_chunk == 0 {
            return Err(ValidationError::ZeroValue("default_per_chunk"));
        }
        if self.max_chunks == 0 {
            return Err(ValidationError::ZeroValue("max_chunks"));
        }
        if self.max_per_chunk == 0 || self.max_per_chunk > ANILIST_MAX_PER_CHUNK {
            return Err(ValidationError::PerChunkOutOfRange {
                default: self.default_per_chunk,
                max: self.max_per_chunk,
            });
        }
        if self.default_per_chunk > self.max_per_chunk {
            return Err(ValidationError::PerChunkOutOfRange {
                default: self.default_per_chunk,
                max: self.max_per_chunk,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Deserialize, Debug, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub listener: Listener,
    #[serde(default = "default_admin_listener")]
    pub admin_listener: Listener,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub upstreams: Upstreams,
    pub lastfm: Option<LastFmCredentials>,
    #[serde(default)]
    pub collection: CollectionConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listener: Listener::default(),
            admin_listener: default_admin_listener(),
            cache: CacheConfig::default(),
            upstreams: Upstreams::default(),
            lastfm: None,
            collection: CollectionConfig::default(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ValidationError> {
        self.listener.validate()?;
        self.admin_listener.validate()?;
        self.cache.validate()?;
        self.collection.validate()?;
        if self.upstreams.timeout_secs == 0 {
            return Err(ValidationError::ZeroValue("timeout_secs"));
        }
        Ok(())
    }

    /// Credentials from the config file, falling back to the environment.
    pub fn lastfm_credentials(&self) -> Option<LastFmCredentials> {
        self.lastfm.clone().or_else(LastFmCredentials::from_env)
    }
}
