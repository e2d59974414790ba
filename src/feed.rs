//! Organization event feed retrieval and entry extraction.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use url::Url;

use crate::schedule::{self, EventSchedule};

/// One item from an organization's event feed.
///
/// `schedule` is `None` when the title's date clause did not parse; the entry
/// stays in the feed (it counts toward totals) but reconciliation skips it.
#[derive(Debug, Clone)]
pub struct FeedEntry {
    pub id: String,
    pub title: String,
    pub link: String,
    pub published: Option<DateTime<Utc>>,
    pub schedule: Option<EventSchedule>,
}

/// A fetched feed: the feed's title (used as the calendar summary) and its
/// entries in document order.
#[derive(Debug, Clone)]
pub struct OrgFeed {
    pub summary: String,
    pub entries: Vec<FeedEntry>,
}

impl OrgFeed {
    /// Entries with a parsed schedule, in feed order.
    pub fn valid_entries(&self) -> impl Iterator<Item = &FeedEntry> {
        self.entries.iter().filter(|e| e.schedule.is_some())
    }
}

/// Build the feed URL for an organization id.
pub fn feed_url(base_url: &str, org_id: u32) -> Result<Url> {
    let org = org_id.to_string();
    Url::parse_with_params(
        base_url,
        &[
            ("subscriblink", "TRUE"),
            ("orglist", org.as_str()),
            ("orgkey", org.as_str()),
            ("cnt", "500"),
            ("hideDesc", "TRUE"),
        ],
    )
    .with_context(|| format!("Invalid feed base URL '{}'", base_url))
}

/// Fetch and parse the event feed for one organization.
pub async fn fetch_feed(
    http: &reqwest::Client,
    base_url: &str,
    org_id: u32,
    tz: Tz,
) -> Result<OrgFeed> {
    let url = feed_url(base_url, org_id)?;
    println!("Retrieving RSS feed at \"{}\"", url);

    let bytes = http
        .get(url.clone())
        .send()
        .await
        .and_then(|r| r.error_for_status())
        .with_context(|| format!("Failed to fetch feed for org {}", org_id))?
        .bytes()
        .await
        .context("Failed to read feed body")?;

    parse_feed(&bytes, tz)
}

/// Parse raw feed XML into entries with attached schedules.
///
/// Entries missing an id, title, or link are dropped; a title whose date
/// clause does not match any shape is kept with no schedule and logged.
pub fn parse_feed(bytes: &[u8], tz: Tz) -> Result<OrgFeed> {
    let feed = feed_rs::parser::parse(bytes).context("Failed to parse feed XML")?;

    let summary = feed
        .title
        .map(|t| t.content)
        .context("Feed has no title")?;

    let mut entries = Vec::new();
    for entry in feed.entries {
        if entry.id.is_empty() {
            continue;
        }
        let Some(title) = entry.title.map(|t| t.content) else {
            continue;
        };
        let Some(link) = entry.links.first().map(|l| l.href.clone()) else {
            continue;
        };

        let schedule = schedule::parse_title(&title, tz);
        if schedule.is_none() {
            eprintln!(
                "WARNING: no date clause matched for entry \"{}\" ({})",
                title, entry.id
            );
        }

        entries.push(FeedEntry {
            id: entry.id,
            title,
            link,
            published: entry.published,
            schedule,
        });
    }

    Ok(OrgFeed { summary, entries })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono_tz::America::Chicago;

    fn rss_fixture() -> &'static str {
        r#"<?xml version="1.0" encoding="UTF-8"?>
<rss version="2.0">
  <channel>
    <title>Pack 123 Events</title>
    <link>http://example.org/events</link>
    <item>
      <guid>evt-1</guid>
      <title>Pack Meeting: 1/13/2016</title>
      <link>http://example.org/events/1</link>
      <pubDate>Wed, 13 Jan 2016 06:00:00 GMT</pubDate>
    </item>
    <item>
      <guid>evt-2</guid>
      <title>Meeting: 1/17/2016 2 PM - 3:30 PM</title>
      <link>http://example.org/events/2</link>
      <pubDate>Sun, 17 Jan 2016 20:00:00 GMT</pubDate>
    </item>
    <item>
      <guid>evt-3</guid>
      <title>Mystery event with no clause</title>
      <link>http://example.org/events/3</link>
    </item>
  </channel>
</rss>"#
    }

    #[test]
    fn test_parse_feed_attaches_schedules() {
        let feed = parse_feed(rss_fixture().as_bytes(), Chicago).unwrap();

        assert_eq!(feed.summary, "Pack 123 Events");
        assert_eq!(feed.entries.len(), 3);

        let first = &feed.entries[0];
        assert_eq!(first.id, "evt-1");
        assert_eq!(first.link, "http://example.org/events/1");
        let schedule = first.schedule.as_ref().unwrap();
        assert!(schedule.all_day);
        assert_eq!(schedule.short_title, "Pack Meeting");

        // Unparseable title is kept, marked invalid
        assert!(feed.entries[2].schedule.is_none());
        assert_eq!(feed.valid_entries().count(), 2);
    }

    #[test]
    fn test_feed_url_carries_org_id() {
        let url = feed_url("http://example.org/rss/RSS_Events.aspx", 1935).unwrap();
        let query: Vec<(String, String)> = url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert!(query.contains(&("orglist".to_string(), "1935".to_string())));
        assert!(query.contains(&("orgkey".to_string(), "1935".to_string())));
    }

    #[tokio::test]
    async fn test_fetch_feed_over_http() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/feed")
            .match_query(mockito::Matcher::UrlEncoded(
                "orglist".into(),
                "1935".into(),
            ))
            .with_header("content-type", "application/rss+xml")
            .with_body(rss_fixture())
            .create_async()
            .await;

        let http = reqwest::Client::new();
        let url = format!("{}/feed", server.url());
        let feed = fetch_feed(&http, &url, 1935, Chicago).await.unwrap();

        mock.assert_async().await;
        assert_eq!(feed.summary, "Pack 123 Events");
        assert_eq!(feed.entries.len(), 3);
    }
}
