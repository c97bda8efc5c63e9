//! Merge freshly fetched posts with the cached set.
//!
//! The union is stable-sorted by creation time descending and deduplicated
//! by id, keeping the first occurrence: when a post appears in both inputs,
//! the fresher record (placed first in the concatenation) wins.
//! Posts are never mutated in place; a merge always yields a new collection.

use crate::types::Post;
use std::cmp::Ordering;
use std::collections::HashSet;

/// Bound on the persisted collection, applied before caching.
pub const CACHE_CAP: usize = 500;

pub fn merge_dedup(fresh: Vec<Post>, cached: Vec<Post>) -> Vec<Post> {
    let mut all = fresh;
    all.extend(cached);
    all.sort_by(compare_created_desc);

    let mut seen = HashSet::new();
    all.retain(|post| !post.id.is_empty() && seen.insert(post.id.clone()));
    all
}

/// Cursor after a merge: the id of the newest element, or the previous
/// cursor when the merge produced nothing.
pub fn advance_cursor(merged: &[Post], previous: Option<String>) -> Option<String> {
    merged.first().map(|post| post.id.clone()).or(previous)
}

/// Newest first. A missing or empty `created_at` ranks as least-recent, so
/// those records sink to the end rather than floating to the top.
fn compare_created_desc(a: &Post, b: &Post) -> Ordering {
    match (created_key(a), created_key(b)) {
        (Some(x), Some(y)) => y.cmp(x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

fn created_key(post: &Post) -> Option<&str> {
    // RFC 3339 strings from a single API compare chronologically as text.
    post.created_at.as_deref().filter(|s| !s.is_empty())
}
