use crate::types::{ListGroup, MediaCollection, Pagination, Window};
use indexmap::IndexMap;

/// Slices every group of `snapshot` to `window`.
///
/// The snapshot is left untouched; the view copies the entries it keeps.
/// `totalEntries` stays the snapshot's full count and per-group totals come
/// from the snapshot, so a view never disagrees with its parent.
pub fn paginate(snapshot: &MediaCollection, window: Window) -> MediaCollection {
    let mut lists_by_status = IndexMap::with_capacity(snapshot.lists_by_status.len());
    let mut total_per_status = IndexMap::with_capacity(snapshot.lists_by_status.len());
    let mut has_more_per_status = IndexMap::with_capacity(snapshot.lists_by_status.len());

    for (status, group) in &snapshot.lists_by_status {
        let total = group.entries.len();
        let entries: Vec<_> = group
            .entries
            .iter()
            .skip(window.offset)
            .take(window.limit)
            .cloned()
            .collect();

        total_per_status.insert(status.clone(), total);
        has_more_per_status.insert(
            status.clone(),
            window.offset.saturating_add(entries.len()) < total,
        );
        lists_by_status.insert(
            status.clone(),
            ListGroup {
                name: group.name.clone(),
                entries,
            },
        );
    }

    let has_more = has_more_per_status.values().any(|more| *more);
    MediaCollection {
        user: snapshot.user.clone(),
        lists_by_status,
        total_entries: snapshot.total_entries,
        per_chunk: snapshot.per_chunk,
        pagination: Some(Pagination {
            offset: window.offset,
            limit: window.limit,
            total_per_status,
            has_more_per_status,
            has_more,
        }),
    }
}
