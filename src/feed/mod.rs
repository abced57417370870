//! Feed polling and delivery.
//!
//! This module provides subscriptions, feed fetching, cursor tracking and
//! the periodic poller that delivers new items.

pub mod baseline;
pub mod delivery;
pub mod fetcher;
pub mod repository;
pub mod scheduler;
pub mod service;
pub mod tracker;
pub mod types;

pub use baseline::baseline;
pub use delivery::{DeliverySink, LogSink, WebhookSink};
pub use fetcher::{parse_items, validate_url, FeedSource, RssFetcher};
pub use repository::SubscriptionRepository;
pub use scheduler::{
    CycleReport, PollOutcome, PollScheduler, PollStatus, DEFAULT_MAX_CONCURRENT_FEEDS,
    DEFAULT_POLL_INTERVAL_SECS,
};
pub use service::SubscriptionService;
pub use tracker::{latest, select_new};
pub use types::{
    item_key, Cursor, FeedItem, NewSubscription, Subscription, EMPTY_BASELINE_GRACE_MINUTES,
};
