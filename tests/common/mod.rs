//! Test helpers for poller integration tests.
//!
//! Provides a scripted feed source, a recording delivery sink, and helpers
//! for building subscriptions against an in-memory database.

#![allow(dead_code)]

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};

use feedrelay::feed::{DeliverySink, FeedSource, NewSubscription, PollScheduler};
use feedrelay::{Cursor, Database, FeedItem, RelayError, Result, SubscriptionRepository};

/// Feed URL used by single-subscription tests.
pub const FEED_URL: &str = "https://example.com/feed.xml";

/// Timestamp `secs` seconds after the Unix epoch.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Item keyed `key` published at `secs`.
pub fn item(key: &str, secs: i64) -> FeedItem {
    FeedItem::new(key, ts(secs)).with_title(format!("Item {key}"))
}

/// Feed source returning whatever the test scripted per URL.
#[derive(Default)]
pub struct ScriptedSource {
    feeds: Mutex<HashMap<String, std::result::Result<Vec<FeedItem>, String>>>,
    fetches: Mutex<Vec<String>>,
}

impl ScriptedSource {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Serve `items` for `url`.
    pub fn set_items(&self, url: &str, items: Vec<FeedItem>) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(items));
    }

    /// Make fetches of `url` fail.
    pub fn set_error(&self, url: &str, message: &str) {
        self.feeds
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(message.to_string()));
    }

    /// Number of fetches made for `url`.
    pub fn fetch_count(&self, url: &str) -> usize {
        self.fetches
            .lock()
            .unwrap()
            .iter()
            .filter(|u| u.as_str() == url)
            .count()
    }
}

#[async_trait]
impl FeedSource for ScriptedSource {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>> {
        self.fetches.lock().unwrap().push(url.to_string());
        match self.feeds.lock().unwrap().get(url) {
            Some(Ok(items)) => Ok(items.clone()),
            Some(Err(message)) => Err(RelayError::Fetch(message.clone())),
            None => Err(RelayError::Fetch("HTTP error: 404 Not Found".to_string())),
        }
    }
}

/// Sink that records every successful delivery.
#[derive(Default)]
pub struct RecordingSink {
    delivered: Mutex<Vec<(String, FeedItem)>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingSink {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Fail every delivery of the item keyed `key` until [`Self::heal`].
    pub fn fail_on(&self, key: &str) {
        self.failing.lock().unwrap().insert(key.to_string());
    }

    /// Stop failing deliveries.
    pub fn heal(&self) {
        self.failing.lock().unwrap().clear();
    }

    /// Keys delivered so far, in delivery order.
    pub fn keys(&self) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .map(|(_, item)| item.key.clone())
            .collect()
    }

    /// Keys delivered to `destination`, in delivery order.
    pub fn keys_for(&self, destination: &str) -> Vec<String> {
        self.delivered
            .lock()
            .unwrap()
            .iter()
            .filter(|(d, _)| d == destination)
            .map(|(_, item)| item.key.clone())
            .collect()
    }
}

#[async_trait]
impl DeliverySink for RecordingSink {
    async fn deliver(&self, item: &FeedItem, destination: &str) -> Result<()> {
        if self.failing.lock().unwrap().contains(&item.key) {
            return Err(RelayError::Delivery(format!("rejected {}", item.key)));
        }
        self.delivered
            .lock()
            .unwrap()
            .push((destination.to_string(), item.clone()));
        Ok(())
    }
}

/// In-memory database shared between a scheduler and assertions.
pub async fn setup_db() -> Arc<Database> {
    Arc::new(Database::open_in_memory().await.unwrap())
}

/// Scheduler wired to the given fakes with default settings.
pub fn scheduler(
    db: &Arc<Database>,
    source: &Arc<ScriptedSource>,
    sink: &Arc<RecordingSink>,
) -> PollScheduler {
    PollScheduler::new(Arc::clone(db), source.clone(), sink.clone())
}

/// Store a subscription with the given cursor directly.
pub async fn subscribe(db: &Database, url: &str, destination: &str, cursor: Option<Cursor>) {
    let mut sub = NewSubscription::new(url, destination);
    sub.cursor = cursor;
    SubscriptionRepository::new(db.pool())
        .create(&sub)
        .await
        .unwrap();
}

/// Current cursor timestamp for `url`.
pub async fn cursor_of(db: &Database, url: &str) -> Option<Cursor> {
    SubscriptionRepository::new(db.pool())
        .get_by_url(url)
        .await
        .unwrap()
        .and_then(|sub| sub.cursor())
}
