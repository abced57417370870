//! feedrelay - feed polling and delivery engine
//!
//! Polls subscribed RSS/Atom feeds on an interval and delivers each item
//! newer than the subscription's cursor exactly once, oldest first.

pub mod config;
pub mod db;
pub mod error;
pub mod feed;
pub mod logging;

pub use config::Config;
pub use db::Database;
pub use error::{RelayError, Result};
pub use feed::{
    Cursor, CycleReport, DeliverySink, FeedItem, FeedSource, PollScheduler, RssFetcher,
    Subscription, SubscriptionRepository, SubscriptionService,
};
