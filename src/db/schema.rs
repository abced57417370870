//! Database schema and migrations for feedrelay.
//!
//! Migrations are applied in order the first time the database is opened
//! or after an upgrade. The schema_version table tracks which ones ran.

/// Database migrations.
pub const MIGRATIONS: &[&str] = &[
    // v1: Feed subscriptions with their delivery cursor
    r#"
CREATE TABLE subscriptions (
    id                INTEGER PRIMARY KEY AUTOINCREMENT,
    url               TEXT NOT NULL UNIQUE,
    destination       TEXT NOT NULL,
    cursor_item_key   TEXT,                 -- Key of the last delivered (or baseline) item
    cursor_timestamp  TEXT,                 -- RFC 3339; NULL until baselined
    created_at        TEXT NOT NULL DEFAULT (datetime('now')),
    updated_at        TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX idx_subscriptions_destination ON subscriptions(destination);
"#,
    // v2: Poll bookkeeping
    r#"
ALTER TABLE subscriptions ADD COLUMN error_count INTEGER NOT NULL DEFAULT 0;
ALTER TABLE subscriptions ADD COLUMN last_error TEXT;
ALTER TABLE subscriptions ADD COLUMN last_polled_at TEXT;
"#,
];
