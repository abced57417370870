//! Feed subscription and item types.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

/// How far an empty baseline reaches back before the moment it is taken.
///
/// Items that show up after the baseline but carry a pubDate up to this much
/// older are still delivered. Anything older is treated as backlog.
pub const EMPTY_BASELINE_GRACE_MINUTES: i64 = 10;

/// A feed subscription bound to one delivery destination.
#[derive(Debug, Clone, PartialEq)]
pub struct Subscription {
    /// Subscription ID.
    pub id: i64,
    /// Feed URL (unique across subscriptions).
    pub url: String,
    /// Opaque delivery destination (channel id, webhook target, ...).
    pub destination: String,
    /// Key of the most recently delivered or baseline item.
    pub cursor_item_key: Option<String>,
    /// Timestamp of the most recently delivered or baseline item.
    pub cursor_timestamp: Option<DateTime<Utc>>,
    /// Number of consecutive failed polls.
    pub error_count: i32,
    /// Last poll error message.
    pub last_error: Option<String>,
    /// When the subscription was last polled successfully.
    pub last_polled_at: Option<DateTime<Utc>>,
    /// When the subscription was created.
    pub created_at: DateTime<Utc>,
    /// When the subscription was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// The persisted cursor, if the subscription has been baselined.
    pub fn cursor(&self) -> Option<Cursor> {
        self.cursor_timestamp.map(|timestamp| Cursor {
            item_key: self.cursor_item_key.clone(),
            timestamp,
        })
    }

    /// Whether the subscription may take part in delivery polling.
    ///
    /// A subscription without a cursor timestamp has never been baselined.
    pub fn is_baselined(&self) -> bool {
        self.cursor_timestamp.is_some()
    }
}

/// New subscription for creation.
#[derive(Debug, Clone)]
pub struct NewSubscription {
    /// Feed URL.
    pub url: String,
    /// Delivery destination.
    pub destination: String,
    /// Initial cursor.
    pub cursor: Option<Cursor>,
}

impl NewSubscription {
    /// Create a new subscription without a cursor.
    pub fn new(url: impl Into<String>, destination: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            cursor: None,
        }
    }

    /// Set the initial cursor.
    pub fn with_cursor(mut self, cursor: Cursor) -> Self {
        self.cursor = Some(cursor);
        self
    }
}

/// Delivery cursor: the last item a subscription has seen.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    /// Item key. `None` for an empty baseline.
    pub item_key: Option<String>,
    /// Item timestamp; the authoritative dedup signal.
    pub timestamp: DateTime<Utc>,
}

impl Cursor {
    /// Cursor pointing at the given item.
    pub fn at(item: &FeedItem) -> Self {
        Self {
            item_key: Some(item.key.clone()),
            timestamp: item.timestamp,
        }
    }

    /// Cursor for a feed that had no items when it was baselined.
    pub fn empty_at(timestamp: DateTime<Utc>) -> Self {
        Self {
            item_key: None,
            timestamp,
        }
    }

    /// Empty baseline taken at `now`, backdated by
    /// [`EMPTY_BASELINE_GRACE_MINUTES`].
    pub fn empty_baseline(now: DateTime<Utc>) -> Self {
        Self::empty_at(now - Duration::minutes(EMPTY_BASELINE_GRACE_MINUTES))
    }
}

/// An item produced by one fetch of a feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FeedItem {
    /// Best-effort identity: link, else guid, else title.
    pub key: String,
    /// Publish time; Unix epoch when the source gives none.
    pub timestamp: DateTime<Utc>,
    /// Item title.
    pub title: Option<String>,
    /// Plain-text summary (HTML stripped, truncated).
    pub snippet: Option<String>,
    /// Link to the original article.
    pub link: Option<String>,
    /// Image attached to the item.
    pub image_url: Option<String>,
}

impl FeedItem {
    /// Create an item with the given key and timestamp.
    pub fn new(key: impl Into<String>, timestamp: DateTime<Utc>) -> Self {
        Self {
            key: key.into(),
            timestamp,
            title: None,
            snippet: None,
            link: None,
            image_url: None,
        }
    }

    /// Set the title.
    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Set the snippet.
    pub fn with_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.snippet = Some(snippet.into());
        self
    }

    /// Set the link.
    pub fn with_link(mut self, link: impl Into<String>) -> Self {
        self.link = Some(link.into());
        self
    }

    /// Set the image URL.
    pub fn with_image_url(mut self, image_url: impl Into<String>) -> Self {
        self.image_url = Some(image_url.into());
        self
    }
}

/// Pick the item key: link, then guid, then title.
///
/// Title is a degraded fallback; two distinct items sharing a title collapse
/// into one key. Timestamps remain the authoritative dedup signal.
pub fn item_key(link: Option<&str>, guid: Option<&str>, title: Option<&str>) -> String {
    [link, guid, title]
        .into_iter()
        .flatten()
        .map(str::trim)
        .find(|s| !s.is_empty())
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn subscription() -> Subscription {
        Subscription {
            id: 1,
            url: "https://example.com/feed.xml".to_string(),
            destination: "channel-1".to_string(),
            cursor_item_key: None,
            cursor_timestamp: None,
            error_count: 0,
            last_error: None,
            last_polled_at: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_item_key_prefers_link() {
        assert_eq!(
            item_key(Some("https://example.com/1"), Some("guid-1"), Some("Title")),
            "https://example.com/1"
        );
    }

    #[test]
    fn test_item_key_falls_back_to_guid_then_title() {
        assert_eq!(item_key(None, Some("guid-1"), Some("Title")), "guid-1");
        assert_eq!(item_key(Some("  "), Some(""), Some("Title")), "Title");
        assert_eq!(item_key(None, None, None), "");
    }

    #[test]
    fn test_subscription_without_cursor() {
        let sub = subscription();
        assert!(!sub.is_baselined());
        assert!(sub.cursor().is_none());
    }

    #[test]
    fn test_subscription_cursor() {
        let sub = Subscription {
            cursor_item_key: Some("https://example.com/2".to_string()),
            cursor_timestamp: Some(ts(2)),
            ..subscription()
        };
        assert!(sub.is_baselined());
        assert_eq!(
            sub.cursor(),
            Some(Cursor {
                item_key: Some("https://example.com/2".to_string()),
                timestamp: ts(2),
            })
        );
    }

    #[test]
    fn test_cursor_at_item() {
        let item = FeedItem::new("key-7", ts(7)).with_title("Seven");
        let cursor = Cursor::at(&item);
        assert_eq!(cursor.item_key.as_deref(), Some("key-7"));
        assert_eq!(cursor.timestamp, ts(7));
    }

    #[test]
    fn test_empty_baseline_is_backdated() {
        let cursor = Cursor::empty_baseline(ts(3600));
        assert!(cursor.item_key.is_none());
        assert_eq!(
            cursor.timestamp,
            ts(3600 - EMPTY_BASELINE_GRACE_MINUTES * 60)
        );
    }

    #[test]
    fn test_new_subscription_with_cursor() {
        let sub = NewSubscription::new("https://example.com/feed.xml", "channel-1")
            .with_cursor(Cursor::empty_at(ts(10)));
        assert_eq!(sub.destination, "channel-1");
        assert_eq!(sub.cursor.unwrap().item_key, None);
    }

    #[test]
    fn test_feed_item_serializes_payload() {
        let item = FeedItem::new("https://example.com/1", ts(0))
            .with_title("Hello")
            .with_link("https://example.com/1")
            .with_image_url("https://example.com/1.png");
        let json = serde_json::to_value(&item).unwrap();
        assert_eq!(json["title"], "Hello");
        assert_eq!(json["image_url"], "https://example.com/1.png");
        assert!(json["snippet"].is_null());
    }
}
