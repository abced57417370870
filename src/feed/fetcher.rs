//! Feed fetcher.
//!
//! Retrieves a feed over HTTP(S) and turns its entries into [`FeedItem`]s.
//! Requests are guarded against SSRF and bounded in size and time.

use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use feed_rs::model::Entry;
use feed_rs::parser;
use reqwest::Client;

use crate::config::FetchConfig;
use crate::error::{RelayError, Result};
use crate::feed::types::{item_key, FeedItem};

/// Source of feed items.
///
/// Implementations must be side-effect free: fetching the same URL twice
/// without upstream changes yields the same items.
#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch the current items of the feed at `url`, in no particular order.
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>>;
}

/// HTTP feed fetcher.
///
/// Holds one shared `reqwest::Client`, so connections to feed hosts are
/// pooled process-wide.
pub struct RssFetcher {
    client: Client,
    max_feed_size: u64,
    max_snippet_length: usize,
    allow_private_hosts: bool,
}

impl RssFetcher {
    /// Create a fetcher from configuration.
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .read_timeout(Duration::from_secs(config.read_timeout_secs))
            .timeout(Duration::from_secs(config.total_timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.as_str())
            .build()
            .map_err(|e| RelayError::Fetch(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            max_feed_size: config.max_feed_size_bytes,
            max_snippet_length: config.max_snippet_length,
            allow_private_hosts: config.allow_private_hosts,
        })
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>> {
        validate_url(url, self.allow_private_hosts)?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to fetch feed: {}", e)))?;

        if !response.status().is_success() {
            return Err(RelayError::Fetch(format!("HTTP error: {}", response.status())));
        }

        if let Some(content_length) = response.content_length() {
            self.check_size(content_length)?;
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| RelayError::Fetch(format!("failed to read response: {}", e)))?;
        self.check_size(bytes.len() as u64)?;

        Ok(bytes.to_vec())
    }

    fn check_size(&self, size: u64) -> Result<()> {
        if size > self.max_feed_size {
            return Err(RelayError::Fetch(format!(
                "feed too large: {} bytes (max {} bytes)",
                size, self.max_feed_size
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FeedSource for RssFetcher {
    async fn fetch(&self, url: &str) -> Result<Vec<FeedItem>> {
        let bytes = self.download(url).await?;
        parse_items(&bytes, self.max_snippet_length)
    }
}

/// Validate a feed URL.
///
/// Only http and https are accepted. Unless `allow_private` is set, local
/// hostnames and loopback, private, or link-local addresses are rejected.
pub fn validate_url(url: &str, allow_private: bool) -> Result<()> {
    let parsed =
        url::Url::parse(url).map_err(|e| RelayError::Fetch(format!("invalid URL: {}", e)))?;

    match parsed.scheme() {
        "http" | "https" => {}
        scheme => {
            return Err(RelayError::Fetch(format!(
                "unsupported URL scheme: {}",
                scheme
            )));
        }
    }

    let host = parsed
        .host()
        .ok_or_else(|| RelayError::Fetch("URL has no host".to_string()))?;

    if allow_private {
        return Ok(());
    }

    let ip = match host {
        url::Host::Domain(domain) => {
            if is_forbidden_hostname(domain) {
                return Err(RelayError::Fetch(format!("forbidden host: {}", domain)));
            }
            return Ok(());
        }
        url::Host::Ipv4(v4) => IpAddr::V4(v4),
        url::Host::Ipv6(v6) => IpAddr::V6(v6),
    };

    if is_private_ip(&ip) {
        return Err(RelayError::Fetch(format!(
            "private IP address not allowed: {}",
            ip
        )));
    }
    Ok(())
}

const FORBIDDEN_HOST_SUFFIXES: &[&str] = &[
    ".local",
    ".localhost",
    ".internal",
    ".intranet",
    ".corp",
    ".home",
    ".lan",
];

fn is_forbidden_hostname(host: &str) -> bool {
    let host = host.to_lowercase();
    host == "localhost"
        || FORBIDDEN_HOST_SUFFIXES
            .iter()
            .any(|suffix| host.ends_with(suffix))
}

fn is_private_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_broadcast()
                || v4.is_unspecified()
                || v4.is_documentation()
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                // fc00::/7 unique local
                || (first & 0xfe00) == 0xfc00
                // fe80::/10 link-local
                || (first & 0xffc0) == 0xfe80
        }
    }
}

/// Parse raw feed bytes (RSS, Atom or JSON Feed) into items.
pub fn parse_items(bytes: &[u8], max_snippet_length: usize) -> Result<Vec<FeedItem>> {
    // Missing ids stay empty so the key falls back to the title instead of
    // a generated id that changes on every parse.
    let feed = parser::Builder::new()
        .id_generator(|_, _, _| String::new())
        .build()
        .parse(bytes)
        .map_err(|e| RelayError::Fetch(format!("failed to parse feed: {}", e)))?;

    Ok(feed
        .entries
        .into_iter()
        .map(|entry| entry_to_item(entry, max_snippet_length))
        .collect())
}

fn entry_to_item(entry: Entry, max_snippet_length: usize) -> FeedItem {
    let title = entry.title.as_ref().map(|t| t.content.trim().to_string());
    let link = entry.links.first().map(|l| l.href.clone());
    let key = item_key(link.as_deref(), Some(entry.id.as_str()), title.as_deref());
    let timestamp = entry
        .published
        .or(entry.updated)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);

    let body = entry.content.as_ref().and_then(|c| c.body.clone());
    let summary = entry.summary.as_ref().map(|s| s.content.clone());
    let image_url = media_image(&entry).or_else(|| {
        body.as_deref()
            .or(summary.as_deref())
            .and_then(first_img_src)
    });
    let snippet = summary
        .or(body)
        .map(|html| truncate_chars(&strip_html(&html), max_snippet_length))
        .filter(|s| !s.is_empty());

    FeedItem {
        key,
        timestamp,
        title: title.filter(|t| !t.is_empty()),
        snippet,
        link,
        image_url,
    }
}

/// First image from `media:content`, enclosures, or media thumbnails.
fn media_image(entry: &Entry) -> Option<String> {
    entry
        .media
        .iter()
        .flat_map(|m| m.content.iter())
        .filter(|c| {
            c.content_type
                .as_ref()
                .map_or(true, |ct| ct.as_str().starts_with("image/"))
        })
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            entry
                .media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .next()
        })
}

/// `src` of the first `<img>` tag in an HTML fragment.
fn first_img_src(html: &str) -> Option<String> {
    let lower = html.to_ascii_lowercase();
    let mut from = 0;
    while let Some(pos) = lower[from..].find("<img") {
        let tag_start = from + pos;
        let tag_end = lower[tag_start..]
            .find('>')
            .map_or(lower.len(), |end| tag_start + end);
        let tag = &lower[tag_start..tag_end];

        if let Some(attr) = tag.find("src=") {
            let value_start = tag_start + attr + 4;
            let rest = &html[value_start..tag_end];
            let src = match rest.chars().next() {
                Some(q @ ('"' | '\'')) => rest[1..].split(q).next(),
                _ => rest.split_whitespace().next(),
            };
            if let Some(src) = src.filter(|s| !s.is_empty()) {
                return Some(src.to_string());
            }
        }
        from = tag_end;
    }
    None
}

/// Strip HTML tags, decode common entities, and collapse whitespace.
fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut chars = html.chars().peekable();
    let mut in_tag = false;

    while let Some(ch) = chars.next() {
        match ch {
            '<' => in_tag = true,
            '>' if in_tag => {
                in_tag = false;
                text.push(' ');
            }
            _ if in_tag => {}
            '&' => {
                let mut entity = String::new();
                while let Some(&next) = chars.peek() {
                    if next == ';'
                        || !(next.is_ascii_alphanumeric() || next == '#')
                        || entity.len() > 8
                    {
                        break;
                    }
                    entity.push(next);
                    chars.next();
                }
                if chars.peek() == Some(&';') {
                    chars.next();
                    match decode_entity(&entity) {
                        Some(decoded) => text.push(decoded),
                        None => {
                            text.push('&');
                            text.push_str(&entity);
                            text.push(';');
                        }
                    }
                } else {
                    text.push('&');
                    text.push_str(&entity);
                }
            }
            _ => text.push(ch),
        }
    }

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn decode_entity(entity: &str) -> Option<char> {
    match entity {
        "amp" => Some('&'),
        "lt" => Some('<'),
        "gt" => Some('>'),
        "quot" => Some('"'),
        "apos" => Some('\''),
        "nbsp" => Some(' '),
        _ => {
            let code = if let Some(hex) = entity
                .strip_prefix("#x")
                .or_else(|| entity.strip_prefix("#X"))
            {
                u32::from_str_radix(hex, 16).ok()?
            } else {
                entity.strip_prefix('#')?.parse().ok()?
            };
            char::from_u32(code)
        }
    }
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}
