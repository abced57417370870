//! Baseline initialization.
//!
//! A baseline points a subscription's cursor at the newest item currently in
//! the feed without delivering anything, so the first poll does not replay
//! the feed's history.

use tracing::debug;

use super::fetcher::FeedSource;
use super::tracker::latest;
use super::types::Cursor;
use crate::Result;

/// Fetch `url` once and return the cursor of its newest item.
///
/// Returns `Ok(None)` when the feed currently has no items.
pub async fn baseline(source: &dyn FeedSource, url: &str) -> Result<Option<Cursor>> {
    let items = source.fetch(url).await?;
    let cursor = latest(&items).map(Cursor::at);

    match &cursor {
        Some(c) => debug!(
            "Baseline for {}: {} item(s), latest {:?} at {}",
            url,
            items.len(),
            c.item_key,
            c.timestamp
        ),
        None => debug!("Baseline for {}: feed has no items", url),
    }

    Ok(cursor)
}
