/// RSS headline collection.
///
/// Fetches a fixed set of feeds concurrently and turns them into
/// timestamped headline records for the generation prompt. An empty
/// result means "no fresh news", never an error.

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Duration, Utc};
use std::time::Duration as StdDuration;
use tokio::sync::Mutex;

// Global lock to prevent overlapping collection runs
lazy_static::lazy_static! {
    static ref COLLECT_LOCK: Mutex<()> = Mutex::new(());
}

/// A single headline from one of the feeds.
#[derive(Debug, Clone)]
pub struct HeadlineRecord {
    pub title: String,
    pub summary: String,
    pub link: String,
    pub published: DateTime<Utc>,
    pub source: String,
}

/// Feeds used when no NEWS_FEEDS override is configured.
pub fn default_feeds() -> Vec<(String, String)> {
    [
        ("bbc", "https://feeds.bbci.co.uk/news/rss.xml"),
        ("reuters", "https://www.reutersagency.com/feed/"),
        ("verge", "https://www.theverge.com/rss/index.xml"),
        ("nature", "https://www.nature.com/nature.rss"),
        ("arstechnica", "https://feeds.arstechnica.com/arstechnica/index"),
    ]
    .iter()
    .map(|(name, url)| (name.to_string(), url.to_string()))
    .collect()
}

pub struct NewsCollector {
    sources: Vec<(String, String)>,
    client: reqwest::Client,
    max_items_per_source: usize,
    max_age_hours: i64,
}

impl NewsCollector {
    pub fn new(feeds: Vec<(String, String)>) -> Self {
        let sources = if feeds.is_empty() {
            default_feeds()
        } else {
            feeds
        };

        log::info!("News collector initialized with {} sources", sources.len());

        Self {
            sources,
            client: reqwest::Client::builder()
                .timeout(StdDuration::from_secs(10))
                .build()
                .unwrap_or_default(),
            max_items_per_source: 5,
            max_age_hours: 24,
        }
    }

    /// Fetch every feed and return fresh headlines, newest first.
    /// Per-source failures are logged and skipped.
    pub async fn collect(&self) -> Vec<HeadlineRecord> {
        // One collection run at a time
        let _lock = COLLECT_LOCK.lock().await;

        log::info!("Collecting news from {} sources", self.sources.len());

        let mut handles = Vec::new();
        for (name, url) in &self.sources {
            let client = self.client.clone();
            let name = name.clone();
            let url = url.clone();
            let max_items = self.max_items_per_source;
            let max_age_hours = self.max_age_hours;
            handles.push(tokio::spawn(async move {
                let result = fetch_feed(client, &name, &url, max_items, max_age_hours).await;
                (name, result)
            }));
        }

        let mut all = Vec::new();
        for handle in handles {
            match handle.await {
                Ok((name, Ok(items))) => {
                    log::info!("Fetched {} headlines from {}", items.len(), name);
                    all.extend(items);
                }
                Ok((name, Err(e))) => {
                    log::warn!("Failed to fetch feed {}: {:#}", name, e);
                }
                Err(e) => {
                    log::error!("Feed task panicked: {}", e);
                }
            }
        }

        all.sort_by(|a, b| b.published.cmp(&a.published));

        log::info!("Collected {} fresh headlines", all.len());
        all
    }

    /// The most recent `limit` headlines across all sources.
    pub async fn recent_headlines(&self, limit: usize) -> Vec<HeadlineRecord> {
        let mut items = self.collect().await;
        items.truncate(limit);
        items
    }
}

async fn fetch_feed(
    client: reqwest::Client,
    source: &str,
    url: &str,
    max_items: usize,
    max_age_hours: i64,
) -> Result<Vec<HeadlineRecord>> {
    let response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Request to {} failed", url))?;

    if !response.status().is_success() {
        bail!("Feed {} returned HTTP {}", source, response.status());
    }

    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("Failed to read feed body from {}", source))?;

    parse_feed_items(source, &bytes, max_items, max_age_hours, Utc::now())
}

/// Parse an RSS document into fresh headline records.
fn parse_feed_items(
    source: &str,
    bytes: &[u8],
    max_items: usize,
    max_age_hours: i64,
    now: DateTime<Utc>,
) -> Result<Vec<HeadlineRecord>> {
    let channel = rss::Channel::read_from(bytes)
        .with_context(|| format!("Failed to parse RSS feed from {}", source))?;

    let mut items = Vec::new();
    for item in channel.items().iter().take(max_items) {
        let title = strip_html(item.title().unwrap_or_default());
        if title.is_empty() {
            continue;
        }

        let published = item
            .pub_date()
            .and_then(|d| DateTime::parse_from_rfc2822(d).ok())
            .map(|d| d.with_timezone(&Utc))
            .unwrap_or(now);

        if now - published > Duration::hours(max_age_hours) {
            log::debug!("Skipping stale headline: {}", title);
            continue;
        }

        items.push(HeadlineRecord {
            title,
            summary: strip_html(item.description().unwrap_or_default()),
            link: item.link().unwrap_or_default().to_string(),
            published,
            source: source.to_string(),
        });
    }

    Ok(items)
}

/// Remove tags, decode the common entities, collapse whitespace.
pub fn strip_html(input: &str) -> String {
    let mut text = String::with_capacity(input.len());
    let mut in_tag = false;
    for ch in input.chars() {
        match ch {
            '<' => in_tag = true,
            '>' => in_tag = false,
            _ if !in_tag => text.push(ch),
            _ => {}
        }
    }

    let text = text
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ");

    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_tags_and_entities() {
        assert_eq!(
            strip_html("<p>Rust &amp; <b>safety</b></p>"),
            "Rust & safety"
        );
        assert_eq!(strip_html("  spaced \n\t text  "), "spaced text");
        assert_eq!(strip_html(""), "");
    }

    #[test]
    fn parses_fresh_items_and_drops_stale_ones() {
        let now = Utc::now();
        let fresh = now - Duration::hours(1);
        let stale = now - Duration::hours(48);
        let xml = format!(
            r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>feed</title><link>http://e</link><description>d</description>
              <item>
                <title>Fresh &amp; notable</title>
                <link>http://e/1</link>
                <description>&lt;p&gt;body&lt;/p&gt;</description>
                <pubDate>{}</pubDate>
              </item>
              <item>
                <title>Stale story</title>
                <link>http://e/2</link>
                <pubDate>{}</pubDate>
              </item>
            </channel></rss>"#,
            fresh.to_rfc2822(),
            stale.to_rfc2822()
        );

        let items = parse_feed_items("test", xml.as_bytes(), 5, 24, now).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Fresh & notable");
        assert_eq!(items[0].summary, "body");
        assert_eq!(items[0].source, "test");
    }

    #[test]
    fn item_without_date_defaults_to_now() {
        let now = Utc::now();
        let xml = r#"<?xml version="1.0"?>
            <rss version="2.0"><channel>
              <title>feed</title><link>http://e</link><description>d</description>
              <item><title>Undated</title><link>http://e/3</link></item>
            </channel></rss>"#;

        let items = parse_feed_items("test", xml.as_bytes(), 5, 24, now).unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].published, now);
    }

    #[test]
    fn default_feed_table_is_nonempty() {
        assert!(!default_feeds().is_empty());
    }
}
