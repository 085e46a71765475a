use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use feed_rs::model::{Entry, MediaObject};
use feed_rs::parser;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::ACCEPT;
use reqwest::Client;
use tracing::{error, info, warn};

use crate::article::{identify, resolve_date, Article, RawDate, UNTITLED};
use crate::config::{FeedSource, FetchConfig};
use crate::error::{EntryError, FetchError};
use crate::text::{bounded_description, decode_entities, normalize};

const FEED_ACCEPT: &str = "application/rss+xml, application/atom+xml, application/xml;q=0.9, */*;q=0.8";

static IMG_SRC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"<img[^>]+src\s*=\s*["']([^"']+)["']"#).expect("valid img regex")
});

/// Anything that can turn one feed source into articles.
///
/// Implementations must not fail: every problem degrades to fewer articles.
#[async_trait]
pub trait FeedFetch: Send + Sync {
    async fn fetch(&self, source: &FeedSource) -> Vec<Article>;
}

/// Feed fields extracted from either parser, before normalization.
#[derive(Debug, Clone, Default)]
pub struct RawEntry {
    pub title: Option<String>,
    pub link: Option<String>,
    pub description: Option<String>,
    pub date: RawDate,
    pub image: Option<String>,
}

pub struct Fetcher {
    client: Client,
    max_entries: usize,
    summary_length: usize,
}

impl Fetcher {
    pub fn new(config: &FetchConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout))
            .user_agent(&config.user_agent)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            max_entries: config.max_entries,
            summary_length: config.summary_length,
        }
    }

    async fn try_fetch(&self, source: &FeedSource) -> Result<Vec<Article>, FetchError> {
        let response = self
            .client
            .get(&source.url)
            .header(ACCEPT, FEED_ACCEPT)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status));
        }

        let bytes = response.bytes().await?;
        parse_articles(&bytes, source, self.max_entries, self.summary_length)
    }
}

#[async_trait]
impl FeedFetch for Fetcher {
    async fn fetch(&self, source: &FeedSource) -> Vec<Article> {
        info!("Fetching RSS feed: {} ({})", source.name, source.url);

        match self.try_fetch(source).await {
            Ok(articles) => {
                info!(
                    "Fetched {} articles from '{}'",
                    articles.len(),
                    source.name
                );
                articles
            }
            Err(e) => {
                error!("Failed to fetch feed '{}': {}", source.key, e);
                Vec::new()
            }
        }
    }
}

/// Parse a feed payload into at most `max_entries` articles.
///
/// Documents rejected by feed-rs are scanned item by item instead, so a
/// truncated or slightly broken feed still contributes what it can.
pub fn parse_articles(
    bytes: &[u8],
    source: &FeedSource,
    max_entries: usize,
    summary_length: usize,
) -> Result<Vec<Article>, FetchError> {
    let raw_entries: Vec<RawEntry> = match parser::parse(bytes) {
        Ok(feed) => {
            let pub_dates = extract_pub_dates_from_xml(bytes);
            feed.entries
                .into_iter()
                .take(max_entries)
                .map(|entry| raw_entry_from_feed(entry, &pub_dates))
                .collect()
        }
        Err(e) => {
            warn!(
                "Feed parsing warning for '{}': {}; scanning items leniently",
                source.key, e
            );
            let items = scan_items(bytes);
            if items.is_empty() {
                return Err(FetchError::Unreadable);
            }
            items.into_iter().take(max_entries).collect()
        }
    };

    let articles = raw_entries
        .into_iter()
        .filter_map(|raw| match build_article(raw, source, summary_length) {
            Ok(article) => Some(article),
            Err(e) => {
                warn!("Skipping entry in '{}': {}", source.key, e);
                None
            }
        })
        .collect();

    Ok(articles)
}

/// Normalize one entry into an article attributed to `source`.
pub fn build_article(
    raw: RawEntry,
    source: &FeedSource,
    summary_length: usize,
) -> Result<Article, EntryError> {
    let title = raw
        .title
        .as_deref()
        .map(normalize)
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| UNTITLED.to_string());

    let link = raw
        .link
        .map(|l| l.trim().to_string())
        .filter(|l| !l.is_empty())
        .ok_or_else(|| EntryError::MissingLink {
            title: title.clone(),
        })?;

    let description = raw
        .description
        .as_deref()
        .map(|d| bounded_description(d, summary_length))
        .unwrap_or_default();

    Ok(Article {
        id: identify(&title, &link),
        title,
        link,
        description,
        published: resolve_date(&raw.date),
        category: source.category.clone(),
        source: source.name.clone(),
        feed_key: source.key.clone(),
        image: raw.image.filter(|i| !i.trim().is_empty()),
    })
}

fn raw_entry_from_feed(entry: Entry, pub_dates: &HashMap<String, String>) -> RawEntry {
    let link = entry
        .links
        .first()
        .map(|l| l.href.trim().to_string())
        .filter(|l| !l.is_empty());

    let description = entry
        .summary
        .map(|s| s.content)
        .or_else(|| entry.content.and_then(|c| c.body));

    // feed-rs drops dates it cannot parse; recover the raw <pubDate> text
    let date = match entry.published.or(entry.updated) {
        Some(dt) => RawDate::from(dt),
        None => link
            .as_ref()
            .and_then(|l| pub_dates.get(l))
            .map(|text| RawDate::Text(text.clone()))
            .unwrap_or_default(),
    };

    let image = extract_media_image(&entry.media)
        .or_else(|| description.as_deref().and_then(extract_image_from_html));

    RawEntry {
        title: entry.title.map(|t| t.content),
        link,
        description,
        date,
        image,
    }
}

/// First media content URL, else the first thumbnail. RSS enclosures are
/// exposed by feed-rs as media content.
pub fn extract_media_image(media: &[MediaObject]) -> Option<String> {
    media
        .iter()
        .flat_map(|m| m.content.iter())
        .find_map(|c| c.url.as_ref().map(|u| u.to_string()))
        .or_else(|| {
            media
                .iter()
                .flat_map(|m| m.thumbnails.iter())
                .map(|t| t.image.uri.clone())
                .find(|uri| !uri.is_empty())
        })
}

/// First `<img src>` inside an HTML description.
pub fn extract_image_from_html(html: &str) -> Option<String> {
    IMG_SRC_RE
        .captures(html)
        .map(|caps| decode_entities(caps[1].trim()))
}

/// Map item links to their raw `<pubDate>` text.
pub fn extract_pub_dates_from_xml(xml_bytes: &[u8]) -> HashMap<String, String> {
    let mut pub_dates = HashMap::new();
    let xml_str = match std::str::from_utf8(xml_bytes) {
        Ok(s) => s,
        Err(_) => return pub_dates,
    };

    for item in item_blocks(xml_str) {
        let link = element_text(item, "link");
        let pub_date = element_text(item, "pubDate");

        if let (Some(link), Some(pub_date)) = (link, pub_date) {
            pub_dates.insert(link, pub_date);
        }
    }

    pub_dates
}

/// Tolerant `<item>` scanner for documents feed-rs rejects.
pub fn scan_items(xml_bytes: &[u8]) -> Vec<RawEntry> {
    let xml_str = String::from_utf8_lossy(xml_bytes);

    item_blocks(&xml_str)
        .map(|item| {
            let description = element_text(item, "description");
            let image = extract_xml_attribute(item, "enclosure", "url")
                .or_else(|| description.as_deref().and_then(extract_image_from_html));

            RawEntry {
                title: element_text(item, "title"),
                link: element_text(item, "link"),
                date: element_text(item, "pubDate")
                    .map(RawDate::Text)
                    .unwrap_or_default(),
                description,
                image,
            }
        })
        .collect()
}

/// Split a document into `<item>` bodies. Opening tags may carry attributes
/// (`<item rdf:about="..">`). An unterminated last item runs to the end of
/// the input.
fn item_blocks(xml: &str) -> impl Iterator<Item = &str> {
    xml.match_indices("<item")
        .filter_map(move |(start, tag)| {
            let rest = &xml[start + tag.len()..];
            match rest.chars().next() {
                Some('>') => Some(&rest[1..]),
                Some(c) if c.is_whitespace() => rest.find('>').map(|gt| &rest[gt + 1..]),
                _ => None,
            }
        })
        .map(|block| {
            let end = block.find("</item>").unwrap_or(block.len());
            &block[..end]
        })
}

pub fn extract_xml_element(xml: &str, tag: &str) -> Option<String> {
    let start_tag = format!("<{}>", tag);
    let end_tag = format!("</{}>", tag);

    let start = xml.find(&start_tag)? + start_tag.len();
    let end = xml[start..].find(&end_tag)? + start;

    Some(xml[start..end].trim().to_string())
}

/// Element content with CDATA unwrapped or entities decoded.
fn element_text(xml: &str, tag: &str) -> Option<String> {
    let raw = extract_xml_element(xml, tag)?;
    let text = match raw
        .strip_prefix("<![CDATA[")
        .and_then(|inner| inner.strip_suffix("]]>"))
    {
        Some(inner) => inner.trim().to_string(),
        None => decode_entities(&raw),
    };
    Some(text).filter(|t| !t.is_empty())
}

pub fn extract_xml_attribute(xml: &str, tag: &str, attribute: &str) -> Option<String> {
    let start = xml.find(&format!("<{} ", tag))?;
    let element = &xml[start..];
    let element = &element[..element.find('>')?];

    let marker = format!("{}=", attribute);
    let value_start = element.find(&marker)? + marker.len();
    let quote = element[value_start..].chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let value = &element[value_start + 1..];
    let value_end = value.find(quote)?;

    Some(decode_entities(&value[..value_end])).filter(|v| !v.is_empty())
}
