//! Cache keys for every cached response shape.

use crate::types::{LookupKind, MediaType, Window};
use std::fmt;

/// One variant per response shape. Every parameter that changes the
/// response is part of the key; subjects are compared case-insensitively.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CacheKey {
    /// Full, unpaginated collection.
    CollectionSnapshot {
        subject: String,
        media_type: MediaType,
        per_chunk: u32,
    },
    /// An offset/limit window over one version of a snapshot.
    CollectionPage {
        subject: String,
        media_type: MediaType,
        per_chunk: u32,
        /// Write time of the snapshot, unix milliseconds.
        snapshot_at: i64,
        window: Window,
    },
    Reading {
        media_id: i64,
        subject: Option<String>,
    },
    Activity {
        subject: String,
        per_page: u32,
        media_type: MediaType,
    },
    RecentTracks {
        user: String,
        limit: u32,
    },
    Lookup {
        kind: LookupKind,
        id: String,
    },
}

fn normalize_subject(subject: &str) -> String {
    subject.trim().to_lowercase()
}

impl CacheKey {
    pub fn collection_snapshot(subject: &str, media_type: MediaType, per_chunk: u32) -> Self {
        CacheKey::CollectionSnapshot {
            subject: normalize_subject(subject),
            media_type,
            per_chunk,
        }
    }

    pub fn collection_page(
        subject: &str,
        media_type: MediaType,
        per_chunk: u32,
        snapshot_at: i64,
        window: Window,
    ) -> Self {
        CacheKey::CollectionPage {
            subject: normalize_subject(subject),
            media_type,
            per_chunk,
            snapshot_at,
            window,
        }
    }

    pub fn reading(media_id: i64, subject: Option<&str>) -> Self {
        CacheKey::Reading {
            media_id,
            subject: subject.map(normalize_subject),
        }
    }

    pub fn activity(subject: &str, per_page: u32, media_type: MediaType) -> Self {
        CacheKey::Activity {
            subject: normalize_subject(subject),
            per_page,
            media_type,
        }
    }

    pub fn recent_tracks(user: &str, limit: u32) -> Self {
        CacheKey::RecentTracks {
            user: normalize_subject(user),
            limit,
        }
    }

    pub fn lookup(kind: LookupKind, id: &str) -> Self {
        CacheKey::Lookup {
            kind,
            id: id.trim().to_lowercase(),
        }
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CacheKey::CollectionSnapshot {
                subject,
                media_type,
                per_chunk,
            } => write!(f, "anilist:collection:{subject}:{media_type}:{per_chunk}"),
            CacheKey::CollectionPage {
                subject,
                media_type,
                per_chunk,
                snapshot_at,
                window,
            } => write!(
                f,
                "anilist:collection-page:{subject}:{media_type}:{per_chunk}:{snapshot_at}:{}:{}",
                window.offset, window.limit
            ),
            CacheKey::Reading { media_id, subject } => write!(
                f,
                "anilist:reading:{media_id}:{}",
                subject.as_deref().unwrap_or("none")
            ),
            CacheKey::Activity {
                subject,
                per_page,
                media_type,
            } => write!(f, "anilist:recent:{subject}:{per_page}:{media_type}"),
            CacheKey::RecentTracks { user, limit } => write!(f, "lastfm:recent:{user}:{limit}"),
            CacheKey::Lookup { kind, id } => write!(f, "lookup:{kind}:{id}"),
        }
    }
}
