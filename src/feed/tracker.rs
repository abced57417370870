//! Cursor tracking: which fetched items are new, and in what order.

use chrono::{DateTime, Utc};

use super::types::FeedItem;

/// Select the items newer than the cursor, oldest first.
///
/// Items whose timestamp is less than or equal to the cursor are treated as
/// already delivered. Items sharing a timestamp keep their fetch order. Without
/// a cursor every item is new.
pub fn select_new(mut items: Vec<FeedItem>, cursor: Option<DateTime<Utc>>) -> Vec<FeedItem> {
    // Vec::sort_by_key is stable
    items.sort_by_key(|item| item.timestamp);

    match cursor {
        Some(cursor) => items
            .into_iter()
            .skip_while(|item| item.timestamp <= cursor)
            .collect(),
        None => items,
    }
}

/// The item a baseline should point at: the newest one.
///
/// Among items tied on the newest timestamp the last in fetch order wins,
/// matching the order `select_new` would have delivered them in.
pub fn latest(items: &[FeedItem]) -> Option<&FeedItem> {
    items.iter().max_by_key(|item| item.timestamp)
}
