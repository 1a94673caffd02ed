//! Per-service protocol code: queries, raw payload types and fetch calls.
//!
//! Raw types mirror upstream payloads field for field and are `Option`
//! heavy. They never leave this module tree except through `normalize`.

pub mod anilist;
pub mod lastfm;
pub mod vndb;

pub use anilist::AniList;
pub use lastfm::LastFm;
pub use vndb::Vndb;

use crate::upstream::UpstreamError;

/// Folds an upstream "not found" failure into `Ok(None)`.
fn found<T>(result: Result<Option<T>, UpstreamError>) -> Result<Option<T>, UpstreamError> {
    match result {
        Err(e) if e.is_not_found() => Ok(None),
        other => other,
    }
}
