//! Subscription store.

use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::SqlitePool;

use super::types::{NewSubscription, Subscription};
use crate::{RelayError, Result};

/// Row type for a subscription from the database.
#[derive(Debug, Clone, sqlx::FromRow)]
struct SubscriptionRow {
    id: i64,
    url: String,
    destination: String,
    cursor_item_key: Option<String>,
    cursor_timestamp: Option<String>,
    error_count: i32,
    last_error: Option<String>,
    last_polled_at: Option<String>,
    created_at: String,
    updated_at: String,
}

impl From<SubscriptionRow> for Subscription {
    fn from(row: SubscriptionRow) -> Self {
        Subscription {
            id: row.id,
            url: row.url,
            destination: row.destination,
            cursor_item_key: row.cursor_item_key,
            cursor_timestamp: row.cursor_timestamp.and_then(|s| parse_datetime(&s)),
            error_count: row.error_count,
            last_error: row.last_error,
            last_polled_at: row.last_polled_at.and_then(|s| parse_datetime(&s)),
            created_at: parse_datetime(&row.created_at).unwrap_or_else(Utc::now),
            updated_at: parse_datetime(&row.updated_at).unwrap_or_else(Utc::now),
        }
    }
}

const SELECT_COLUMNS: &str = "SELECT id, url, destination, cursor_item_key, cursor_timestamp, \
     error_count, last_error, last_polled_at, created_at, updated_at FROM subscriptions";

/// Repository for subscription records.
pub struct SubscriptionRepository<'a> {
    pool: &'a SqlitePool,
}

impl<'a> SubscriptionRepository<'a> {
    /// Create a new repository instance.
    pub fn new(pool: &'a SqlitePool) -> Self {
        Self { pool }
    }

    /// Insert a subscription.
    ///
    /// Fails with [`RelayError::Duplicate`] if the URL is already subscribed.
    pub async fn create(&self, sub: &NewSubscription) -> Result<Subscription> {
        let (cursor_key, cursor_ts) = match &sub.cursor {
            Some(cursor) => (
                cursor.item_key.clone(),
                Some(format_timestamp(&cursor.timestamp)),
            ),
            None => (None, None),
        };

        let result = sqlx::query(
            r#"
            INSERT INTO subscriptions (url, destination, cursor_item_key, cursor_timestamp)
            VALUES (?, ?, ?, ?)
            "#,
        )
        .bind(&sub.url)
        .bind(&sub.destination)
        .bind(cursor_key)
        .bind(cursor_ts)
        .execute(self.pool)
        .await
        .map_err(|e| match e.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                RelayError::Duplicate(sub.url.clone())
            }
            _ => RelayError::Database(e.to_string()),
        })?;

        self.get_by_id(result.last_insert_rowid())
            .await?
            .ok_or_else(|| RelayError::NotFound("subscription".to_string()))
    }

    /// Get a subscription by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!("{SELECT_COLUMNS} WHERE id = ?"))
            .bind(id)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Subscription::from))
    }

    /// Get a subscription by feed URL.
    pub async fn get_by_url(&self, url: &str) -> Result<Option<Subscription>> {
        let row = sqlx::query_as::<_, SubscriptionRow>(&format!("{SELECT_COLUMNS} WHERE url = ?"))
            .bind(url)
            .fetch_optional(self.pool)
            .await?;

        Ok(row.map(Subscription::from))
    }

    /// List all subscriptions in registration order.
    pub async fn list(&self) -> Result<Vec<Subscription>> {
        let rows = sqlx::query_as::<_, SubscriptionRow>(&format!("{SELECT_COLUMNS} ORDER BY id ASC"))
            .fetch_all(self.pool)
            .await?;

        Ok(rows.into_iter().map(Subscription::from).collect())
    }

    /// Advance a subscription's cursor.
    ///
    /// The compare and the write happen in one statement, so concurrent
    /// readers see either the old or the new cursor. A timestamp older than
    /// the stored one is rejected with [`RelayError::Validation`]; an equal
    /// one is accepted.
    pub async fn update_cursor(
        &self,
        url: &str,
        item_key: Option<&str>,
        timestamp: DateTime<Utc>,
    ) -> Result<()> {
        let ts = format_timestamp(&timestamp);
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET cursor_item_key = ?,
                cursor_timestamp = ?,
                updated_at = datetime('now')
            WHERE url = ?
              AND (cursor_timestamp IS NULL OR cursor_timestamp <= ?)
            "#,
        )
        .bind(item_key)
        .bind(&ts)
        .bind(url)
        .bind(&ts)
        .execute(self.pool)
        .await?;

        if result.rows_affected() > 0 {
            return Ok(());
        }

        match self.get_by_url(url).await? {
            None => Err(RelayError::NotFound("subscription".to_string())),
            Some(existing) => Err(RelayError::Validation(format!(
                "cursor for {} would move back from {} to {}",
                url,
                existing
                    .cursor_timestamp
                    .map(|t| t.to_rfc3339())
                    .unwrap_or_default(),
                timestamp.to_rfc3339()
            ))),
        }
    }

    /// Record a successful poll: reset the error counter.
    pub async fn record_success(&self, url: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET error_count = 0,
                last_error = NULL,
                last_polled_at = datetime('now'),
                updated_at = datetime('now')
            WHERE url = ?
            "#,
        )
        .bind(url)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Record a failed poll.
    pub async fn record_error(&self, url: &str, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET error_count = error_count + 1,
                last_error = ?,
                updated_at = datetime('now')
            WHERE url = ?
            "#,
        )
        .bind(error)
        .bind(url)
        .execute(self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Delete a subscription by URL.
    pub async fn delete(&self, url: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM subscriptions WHERE url = ?")
            .bind(url)
            .execute(self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Count all subscriptions.
    pub async fn count(&self) -> Result<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM subscriptions")
            .fetch_one(self.pool)
            .await?;

        Ok(count)
    }
}

/// Fixed-width UTC form, so text order in SQL equals chronological order.
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format("%Y-%m-%dT%H:%M:%S%.9fZ").to_string()
}

/// Parse a stored datetime string.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    // SQLite datetime('now') format
    NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feed::types::Cursor;
    use crate::Database;
    use chrono::TimeZone;

    const URL: &str = "https://example.com/feed.xml";

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    async fn setup_db() -> Database {
        Database::open_in_memory().await.unwrap()
    }

    #[tokio::test]
    async fn test_create_subscription() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());

        let sub = repo
            .create(&NewSubscription::new(URL, "channel-1").with_cursor(Cursor {
                item_key: Some("https://example.com/2".to_string()),
                timestamp: ts(2),
            }))
            .await
            .unwrap();

        assert!(sub.id > 0);
        assert_eq!(sub.url, URL);
        assert_eq!(sub.destination, "channel-1");
        assert_eq!(sub.cursor_item_key.as_deref(), Some("https://example.com/2"));
        assert_eq!(sub.cursor_timestamp, Some(ts(2)));
        assert_eq!(sub.error_count, 0);
        assert!(sub.last_polled_at.is_none());
    }

    #[tokio::test]
    async fn test_create_without_cursor() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());

        let sub = repo.create(&NewSubscription::new(URL, "c")).await.unwrap();
        assert!(!sub.is_baselined());
    }

    #[tokio::test]
    async fn test_create_duplicate_url() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());

        repo.create(&NewSubscription::new(URL, "channel-1"))
            .await
            .unwrap();
        let err = repo
            .create(&NewSubscription::new(URL, "channel-2"))
            .await
            .unwrap_err();

        assert!(matches!(err, RelayError::Duplicate(ref u) if u == URL));
        assert_eq!(repo.count().await.unwrap(), 1);
        let kept = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(kept.destination, "channel-1");
    }

    #[tokio::test]
    async fn test_get_and_list() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());

        let first = repo
            .create(&NewSubscription::new("https://a.example.com/rss", "a"))
            .await
            .unwrap();
        repo.create(&NewSubscription::new("https://b.example.com/rss", "b"))
            .await
            .unwrap();

        let by_id = repo.get_by_id(first.id).await.unwrap().unwrap();
        assert_eq!(by_id.url, "https://a.example.com/rss");
        assert!(repo.get_by_url("https://missing.example.com").await.unwrap().is_none());

        let all = repo.list().await.unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].destination, "a");
        assert_eq!(all[1].destination, "b");
    }

    #[tokio::test]
    async fn test_update_cursor_advances() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        repo.update_cursor(URL, Some("k1"), ts(1)).await.unwrap();
        repo.update_cursor(URL, Some("k3"), ts(3)).await.unwrap();

        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.cursor_item_key.as_deref(), Some("k3"));
        assert_eq!(sub.cursor_timestamp, Some(ts(3)));
    }

    #[tokio::test]
    async fn test_update_cursor_accepts_equal_timestamp() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        repo.update_cursor(URL, Some("first"), ts(6)).await.unwrap();
        repo.update_cursor(URL, Some("second"), ts(6)).await.unwrap();

        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.cursor_item_key.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_update_cursor_rejects_regression() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        repo.update_cursor(URL, Some("k5"), ts(5)).await.unwrap();
        let err = repo.update_cursor(URL, Some("k4"), ts(4)).await.unwrap_err();
        assert!(matches!(err, RelayError::Validation(_)));

        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.cursor_timestamp, Some(ts(5)));
        assert_eq!(sub.cursor_item_key.as_deref(), Some("k5"));
    }

    #[tokio::test]
    async fn test_update_cursor_subsecond_ordering() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        let later = Utc.timestamp_opt(10, 500_000_000).unwrap();
        repo.update_cursor(URL, Some("later"), later).await.unwrap();
        assert!(repo.update_cursor(URL, Some("earlier"), ts(10)).await.is_err());

        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.cursor_timestamp, Some(later));
    }

    #[tokio::test]
    async fn test_update_cursor_epoch_round_trip() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        repo.update_cursor(URL, None, DateTime::<Utc>::UNIX_EPOCH)
            .await
            .unwrap();
        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.cursor_timestamp, Some(DateTime::<Utc>::UNIX_EPOCH));
        assert!(sub.cursor_item_key.is_none());
    }

    #[tokio::test]
    async fn test_update_cursor_missing_subscription() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());

        let err = repo.update_cursor(URL, Some("k"), ts(1)).await.unwrap_err();
        assert!(matches!(err, RelayError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_record_error_and_success() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        assert!(repo.record_error(URL, "timeout").await.unwrap());
        assert!(repo.record_error(URL, "HTTP error: 503").await.unwrap());
        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.error_count, 2);
        assert_eq!(sub.last_error.as_deref(), Some("HTTP error: 503"));

        assert!(repo.record_success(URL).await.unwrap());
        let sub = repo.get_by_url(URL).await.unwrap().unwrap();
        assert_eq!(sub.error_count, 0);
        assert!(sub.last_error.is_none());
        assert!(sub.last_polled_at.is_some());
    }

    #[tokio::test]
    async fn test_delete_subscription() {
        let db = setup_db().await;
        let repo = SubscriptionRepository::new(db.pool());
        repo.create(&NewSubscription::new(URL, "c")).await.unwrap();

        assert!(repo.delete(URL).await.unwrap());
        assert!(!repo.delete(URL).await.unwrap());
        assert_eq!(repo.count().await.unwrap(), 0);
    }

    #[test]
    fn test_format_timestamp_is_fixed_width() {
        assert_eq!(
            format_timestamp(&DateTime::<Utc>::UNIX_EPOCH),
            "1970-01-01T00:00:00.000000000Z"
        );
        let a = format_timestamp(&ts(9));
        let b = format_timestamp(&ts(10));
        assert_eq!(a.len(), b.len());
        assert!(a < b);
    }

    #[test]
    fn test_parse_datetime_formats() {
        assert_eq!(
            parse_datetime("1970-01-01T00:00:05.000000000Z"),
            Some(ts(5))
        );
        assert_eq!(parse_datetime("1970-01-01 00:00:05"), Some(ts(5)));
        assert_eq!(parse_datetime("garbage"), None);
    }
}
