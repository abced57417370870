//! Subscription management.
//!
//! Adding a subscription baselines it before it is stored, so the poller
//! never sees a fresh subscription without a cursor.

use chrono::Utc;
use tracing::info;

use super::baseline::baseline;
use super::fetcher::FeedSource;
use super::repository::SubscriptionRepository;
use super::types::{Cursor, NewSubscription, Subscription};
use crate::db::Database;
use crate::{RelayError, Result};

/// Service for adding, listing and removing subscriptions.
pub struct SubscriptionService<'a> {
    db: &'a Database,
    source: &'a dyn FeedSource,
}

impl<'a> SubscriptionService<'a> {
    /// Create a new service over the given database and feed source.
    pub fn new(db: &'a Database, source: &'a dyn FeedSource) -> Self {
        Self { db, source }
    }

    /// Subscribe `destination` to the feed at `url`.
    ///
    /// The feed is fetched once and the cursor set to its newest item. A feed
    /// with no items gets an empty baseline backdated by
    /// [`Cursor::empty_baseline`]'s grace window. An item that shows up later
    /// with a pubDate inside that window is still delivered; anything dated
    /// earlier is treated as backlog and skipped.
    ///
    /// # Errors
    ///
    /// - `Validation` if the URL does not parse or the destination is empty
    /// - `Duplicate` if the URL is already subscribed
    /// - `Fetch` if the feed cannot be retrieved; nothing is stored
    pub async fn add(&self, url: &str, destination: &str) -> Result<Subscription> {
        let url = url.trim();
        let destination = destination.trim();

        url::Url::parse(url).map_err(|e| RelayError::Validation(format!("invalid URL: {}", e)))?;
        if destination.is_empty() {
            return Err(RelayError::Validation(
                "destination must not be empty".to_string(),
            ));
        }

        let repo = SubscriptionRepository::new(self.db.pool());
        if repo.get_by_url(url).await?.is_some() {
            return Err(RelayError::Duplicate(url.to_string()));
        }

        let cursor = match baseline(self.source, url).await? {
            Some(cursor) => cursor,
            None => {
                info!("Feed {} has no items; starting from now", url);
                Cursor::empty_baseline(Utc::now())
            }
        };

        let sub = repo
            .create(&NewSubscription::new(url, destination).with_cursor(cursor))
            .await?;
        info!(
            "Subscribed {} -> {} (starting after {:?})",
            sub.url, sub.destination, sub.cursor_item_key
        );
        Ok(sub)
    }

    /// Remove the subscription for `url`.
    pub async fn remove(&self, url: &str) -> Result<()> {
        let repo = SubscriptionRepository::new(self.db.pool());
        if !repo.delete(url.trim()).await? {
            return Err(RelayError::NotFound("subscription".to_string()));
        }
        info!("Unsubscribed {}", url.trim());
        Ok(())
    }

    /// List all subscriptions in registration order.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        SubscriptionRepository::new(self.db.pool()).list().await
    }
}
