//! Poll scheduler.
//!
//! Runs poll cycles on a fixed interval. A cycle fetches every subscription,
//! delivers the items newer than its cursor oldest first, and commits the
//! cursor after each delivered item. Cycles never overlap: the next tick is
//! only awaited once the current cycle has returned.

use std::sync::Arc;

use chrono::Utc;
use futures::stream::{self, StreamExt};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::baseline::baseline;
use super::delivery::DeliverySink;
use super::fetcher::FeedSource;
use super::repository::SubscriptionRepository;
use super::tracker::select_new;
use super::types::{Cursor, Subscription};
use crate::config::PollConfig;
use crate::db::Database;

/// Default interval between poll cycles in seconds (5 minutes).
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 300;

/// Default number of subscriptions processed concurrently.
pub const DEFAULT_MAX_CONCURRENT_FEEDS: usize = 4;

/// How polling one subscription ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// All new items were delivered (possibly none).
    Completed,
    /// The subscription had no cursor and was baselined instead of polled.
    Baselined,
    /// The feed could not be fetched; cursor unchanged.
    FetchFailed,
    /// An item could not be delivered; later items were not attempted.
    DeliveryFailed,
    /// The store failed; remaining work for this subscription was dropped.
    StoreFailed,
    /// Shutdown was requested before all items were delivered.
    Interrupted,
}

/// Result of polling one subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollOutcome {
    /// Feed URL.
    pub url: String,
    /// Items delivered and committed.
    pub delivered: usize,
    /// How polling ended.
    pub status: PollStatus,
}

impl PollOutcome {
    fn new(url: &str, delivered: usize, status: PollStatus) -> Self {
        Self {
            url: url.to_string(),
            delivered,
            status,
        }
    }
}

/// Summary of one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Subscriptions in the cycle's snapshot.
    pub subscriptions: usize,
    /// Items delivered across all subscriptions.
    pub delivered: usize,
    pub completed: usize,
    pub baselined: usize,
    pub fetch_failures: usize,
    pub delivery_failures: usize,
    pub store_failures: usize,
    pub interrupted: usize,
}

impl CycleReport {
    fn record(&mut self, outcome: &PollOutcome) {
        self.delivered += outcome.delivered;
        match outcome.status {
            PollStatus::Completed => self.completed += 1,
            PollStatus::Baselined => self.baselined += 1,
            PollStatus::FetchFailed => self.fetch_failures += 1,
            PollStatus::DeliveryFailed => self.delivery_failures += 1,
            PollStatus::StoreFailed => self.store_failures += 1,
            PollStatus::Interrupted => self.interrupted += 1,
        }
    }

    /// Number of subscriptions that ended in a failure.
    pub fn failures(&self) -> usize {
        self.fetch_failures + self.delivery_failures + self.store_failures
    }
}

/// Periodic feed poller.
///
/// Constructed with its collaborators: the store, the feed source and the
/// delivery sink.
pub struct PollScheduler {
    db: Arc<Database>,
    source: Arc<dyn FeedSource>,
    sink: Arc<dyn DeliverySink>,
    poll_interval: Duration,
    max_concurrent: usize,
    baseline_on_startup: bool,
}

impl PollScheduler {
    /// Create a scheduler with default settings.
    pub fn new(
        db: Arc<Database>,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn DeliverySink>,
    ) -> Self {
        Self {
            db,
            source,
            sink,
            poll_interval: Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            max_concurrent: DEFAULT_MAX_CONCURRENT_FEEDS,
            baseline_on_startup: false,
        }
    }

    /// Create a scheduler from configuration.
    pub fn with_config(
        db: Arc<Database>,
        source: Arc<dyn FeedSource>,
        sink: Arc<dyn DeliverySink>,
        config: &PollConfig,
    ) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.interval_secs.max(1)),
            max_concurrent: config.max_concurrent_feeds.max(1),
            baseline_on_startup: config.baseline_on_startup,
            ..Self::new(db, source, sink)
        }
    }

    /// Interval between the start of two cycles.
    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Run until `shutdown` turns true or its sender is dropped.
    ///
    /// The first cycle starts immediately.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Poll scheduler started (interval: {} seconds, concurrency: {})",
            self.poll_interval.as_secs(),
            self.max_concurrent
        );

        if self.baseline_on_startup {
            self.rebaseline_all(&shutdown).await;
        }

        let mut timer = interval(self.poll_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || stop_requested(&shutdown) {
                        break;
                    }
                    continue;
                }
            }

            if stop_requested(&shutdown) {
                break;
            }

            let report = self.run_cycle(&shutdown).await;
            if report.subscriptions > 0 {
                info!(
                    "Poll cycle finished: {} subscription(s), {} item(s) delivered, {} failure(s)",
                    report.subscriptions,
                    report.delivered,
                    report.failures()
                );
            }
        }

        info!("Poll scheduler stopped");
    }

    /// Spawn the scheduler on the runtime.
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        tokio::spawn(async move { self.run(shutdown).await })
    }

    /// Perform one poll cycle over a snapshot of all subscriptions.
    pub async fn run_cycle(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let subscriptions = match SubscriptionRepository::new(self.db.pool()).list().await {
            Ok(subs) => subs,
            Err(e) => {
                error!("Failed to list subscriptions: {}", e);
                return CycleReport::default();
            }
        };

        let mut report = CycleReport {
            subscriptions: subscriptions.len(),
            ..CycleReport::default()
        };
        if subscriptions.is_empty() {
            debug!("No subscriptions to poll");
            return report;
        }

        debug!("Polling {} subscription(s)", subscriptions.len());

        let outcomes: Vec<PollOutcome> = stream::iter(subscriptions)
            .map(|sub| self.poll_subscription(sub, shutdown))
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    /// Poll a single subscription: fetch, select, deliver, commit.
    pub async fn poll_subscription(
        &self,
        sub: Subscription,
        shutdown: &watch::Receiver<bool>,
    ) -> PollOutcome {
        if stop_requested(shutdown) {
            return PollOutcome::new(&sub.url, 0, PollStatus::Interrupted);
        }

        if !sub.is_baselined() {
            debug!("Subscription {} has no cursor; baselining", sub.url);
            return self.rebaseline(&sub).await;
        }

        let repo = SubscriptionRepository::new(self.db.pool());

        let items = match self.source.fetch(&sub.url).await {
            Ok(items) => items,
            Err(e) => {
                warn!("Failed to fetch feed {}: {}", sub.url, e);
                if let Err(err) = repo.record_error(&sub.url, &e.to_string()).await {
                    error!("Failed to record error for {}: {}", sub.url, err);
                }
                return PollOutcome::new(&sub.url, 0, PollStatus::FetchFailed);
            }
        };

        let new_items = select_new(items, sub.cursor_timestamp);
        let mut delivered = 0;

        for item in new_items {
            if stop_requested(shutdown) {
                info!(
                    "Shutdown requested; stopping {} after {} item(s)",
                    sub.url, delivered
                );
                return PollOutcome::new(&sub.url, delivered, PollStatus::Interrupted);
            }

            if let Err(e) = self.sink.deliver(&item, &sub.destination).await {
                warn!(
                    "Failed to deliver {} from {} to {}: {}",
                    item.key, sub.url, sub.destination, e
                );
                if let Err(err) = repo.record_error(&sub.url, &e.to_string()).await {
                    error!("Failed to record error for {}: {}", sub.url, err);
                }
                return PollOutcome::new(&sub.url, delivered, PollStatus::DeliveryFailed);
            }

            if let Err(e) = repo
                .update_cursor(&sub.url, Some(&item.key), item.timestamp)
                .await
            {
                error!(
                    "Delivered {} but failed to commit cursor for {}: {}",
                    item.key, sub.url, e
                );
                return PollOutcome::new(&sub.url, delivered, PollStatus::StoreFailed);
            }
            delivered += 1;
        }

        if let Err(e) = repo.record_success(&sub.url).await {
            error!("Failed to record poll for {}: {}", sub.url, e);
        }

        if delivered > 0 {
            info!("Sent {} new item(s) from {}", delivered, sub.url);
        } else {
            debug!("No new items from {}", sub.url);
        }
        PollOutcome::new(&sub.url, delivered, PollStatus::Completed)
    }

    /// Re-baseline every subscription, skipping whatever was published
    /// since the cursor was last committed.
    pub async fn rebaseline_all(&self, shutdown: &watch::Receiver<bool>) -> CycleReport {
        let subscriptions = match SubscriptionRepository::new(self.db.pool()).list().await {
            Ok(subs) => subs,
            Err(e) => {
                error!("Failed to list subscriptions for baseline: {}", e);
                return CycleReport::default();
            }
        };

        info!("Re-baselining {} subscription(s)", subscriptions.len());

        let mut report = CycleReport {
            subscriptions: subscriptions.len(),
            ..CycleReport::default()
        };
        let outcomes: Vec<PollOutcome> = stream::iter(subscriptions)
            .map(|sub| async move {
                if stop_requested(shutdown) {
                    return PollOutcome::new(&sub.url, 0, PollStatus::Interrupted);
                }
                self.rebaseline(&sub).await
            })
            .buffer_unordered(self.max_concurrent)
            .collect()
            .await;

        for outcome in &outcomes {
            report.record(outcome);
        }
        report
    }

    /// Move a subscription's cursor to the feed's newest item without
    /// delivering. The cursor never moves backwards.
    async fn rebaseline(&self, sub: &Subscription) -> PollOutcome {
        let repo = SubscriptionRepository::new(self.db.pool());

        let cursor = match baseline(self.source.as_ref(), &sub.url).await {
            Ok(Some(cursor)) => cursor,
            Ok(None) => Cursor::empty_baseline(Utc::now()),
            Err(e) => {
                warn!("[baseline] {} failed: {}", sub.url, e);
                if let Err(err) = repo.record_error(&sub.url, &e.to_string()).await {
                    error!("Failed to record error for {}: {}", sub.url, err);
                }
                return PollOutcome::new(&sub.url, 0, PollStatus::FetchFailed);
            }
        };

        if let Some(current) = sub.cursor_timestamp {
            if cursor.timestamp <= current {
                debug!("[baseline] {} already at or past latest item", sub.url);
                return PollOutcome::new(&sub.url, 0, PollStatus::Baselined);
            }
        }

        if let Err(e) = repo
            .update_cursor(&sub.url, cursor.item_key.as_deref(), cursor.timestamp)
            .await
        {
            error!("[baseline] failed to store cursor for {}: {}", sub.url, e);
            return PollOutcome::new(&sub.url, 0, PollStatus::StoreFailed);
        }

        info!("[baseline] {} -> {:?}", sub.url, cursor.item_key);
        PollOutcome::new(&sub.url, 0, PollStatus::Baselined)
    }
}

fn stop_requested(shutdown: &watch::Receiver<bool>) -> bool {
    *shutdown.borrow()
}
