//! Delivery sinks.
//!
//! The poller only needs to know whether an item reached its destination.
//! How it is presented there is up to the sink.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::info;

use super::types::FeedItem;
use crate::{RelayError, Result};

/// Sends one item to one destination.
#[async_trait]
pub trait DeliverySink: Send + Sync {
    /// Deliver `item` to `destination`. An `Err` means the item was not
    /// delivered and its cursor must not advance.
    async fn deliver(&self, item: &FeedItem, destination: &str) -> Result<()>;
}

/// Sink that writes each item to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

#[async_trait]
impl DeliverySink for LogSink {
    async fn deliver(&self, item: &FeedItem, destination: &str) -> Result<()> {
        info!(
            destination = %destination,
            key = %item.key,
            published = %item.timestamp.to_rfc3339(),
            "New item: {}",
            item.title.as_deref().unwrap_or("Untitled")
        );
        Ok(())
    }
}

/// JSON body posted by [`WebhookSink`].
#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    destination: &'a str,
    item: &'a FeedItem,
}

/// Sink that POSTs `{ "destination": ..., "item": {...} }` to an endpoint.
///
/// Any non-2xx response counts as a failed delivery.
pub struct WebhookSink {
    client: Client,
    endpoint: String,
}

impl WebhookSink {
    /// Create a webhook sink for `endpoint`.
    pub fn new(endpoint: impl Into<String>, timeout_secs: u64) -> Result<Self> {
        let endpoint = endpoint.into();
        url::Url::parse(&endpoint)
            .map_err(|e| RelayError::Config(format!("invalid webhook URL: {}", e)))?;

        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| RelayError::Delivery(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client, endpoint })
    }
}

#[async_trait]
impl DeliverySink for WebhookSink {
    async fn deliver(&self, item: &FeedItem, destination: &str) -> Result<()> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&WebhookPayload { destination, item })
            .send()
            .await
            .map_err(|e| RelayError::Delivery(format!("webhook request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Delivery(format!(
                "webhook returned {}",
                response.status()
            )));
        }
        Ok(())
    }
}
