use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use futures::future::FutureExt;
use futures::stream::{self, StreamExt};
use tracing::{info, warn};

use crate::article::{now_in_vietnam, Article};
use crate::config::FeedSource;
use crate::fetcher::FeedFetch;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AggregateOptions {
    /// Sources fetched at the same time
    pub max_concurrent: usize,
    /// Budget for one source including parsing
    pub source_timeout: Duration,
}

impl Default for AggregateOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            source_timeout: Duration::from_secs(15),
        }
    }
}

/// One fully built aggregation result.
///
/// Articles are ordered newest first. The category and source groupings
/// hold positions into that sequence, so each grouping is a view in the
/// same order rather than a separate copy.
#[derive(Debug, Clone)]
pub struct Snapshot {
    articles: Vec<Article>,
    by_category: BTreeMap<String, Vec<usize>>,
    by_source: BTreeMap<String, Vec<usize>>,
    built_at: DateTime<FixedOffset>,
}

impl Snapshot {
    /// Sort `articles` newest first (stable) and index them.
    pub fn from_articles(mut articles: Vec<Article>) -> Self {
        articles.sort_by(|a, b| b.published.cmp(&a.published));

        let mut by_category: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        let mut by_source: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (position, article) in articles.iter().enumerate() {
            by_category
                .entry(article.category.to_lowercase())
                .or_default()
                .push(position);
            by_source
                .entry(article.feed_key.to_lowercase())
                .or_default()
                .push(position);
        }

        Self {
            articles,
            by_category,
            by_source,
            built_at: now_in_vietnam(),
        }
    }

    pub fn empty() -> Self {
        Self::from_articles(Vec::new())
    }

    pub fn articles(&self) -> &[Article] {
        &self.articles
    }

    pub fn len(&self) -> usize {
        self.articles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.articles.is_empty()
    }

    pub fn built_at(&self) -> DateTime<FixedOffset> {
        self.built_at
    }

    /// Articles of one category. Keys match case-insensitively.
    pub fn by_category<'a>(&'a self, category: &str) -> impl Iterator<Item = &'a Article> + 'a {
        self.view(self.by_category.get(&category.to_lowercase()))
    }

    pub fn by_source<'a>(&'a self, feed_key: &str) -> impl Iterator<Item = &'a Article> + 'a {
        self.view(self.by_source.get(&feed_key.to_lowercase()))
    }

    pub fn category_counts(&self) -> BTreeMap<String, usize> {
        count(&self.by_category)
    }

    pub fn source_counts(&self) -> BTreeMap<String, usize> {
        count(&self.by_source)
    }

    fn view<'a>(&'a self, positions: Option<&'a Vec<usize>>) -> impl Iterator<Item = &'a Article> + 'a {
        positions
            .into_iter()
            .flatten()
            .map(move |&position| &self.articles[position])
    }
}

fn count(index: &BTreeMap<String, Vec<usize>>) -> BTreeMap<String, usize> {
    index
        .iter()
        .map(|(key, positions)| (key.clone(), positions.len()))
        .collect()
}

/// Fetch every source concurrently and merge the results into a snapshot.
///
/// At most `max_concurrent` fetches run at once and every one of them is
/// awaited. A source that exceeds `source_timeout` contributes nothing.
pub async fn aggregate(
    fetcher: &dyn FeedFetch,
    sources: &[FeedSource],
    options: &AggregateOptions,
) -> Snapshot {
    info!("Aggregating {} feeds", sources.len());

    let fetches: Vec<_> = sources
        .iter()
        .map(|source| fetch_one(fetcher, source, options).boxed())
        .collect();
    let per_source: Vec<Vec<Article>> = stream::iter(fetches)
        .buffered(options.max_concurrent.max(1))
        .collect()
        .await;

    let articles: Vec<Article> = per_source.into_iter().flatten().collect();
    let snapshot = Snapshot::from_articles(articles);

    info!("Fetched total {} articles", snapshot.len());
    snapshot
}

async fn fetch_one(
    fetcher: &dyn FeedFetch,
    source: &FeedSource,
    options: &AggregateOptions,
) -> Vec<Article> {
    match tokio::time::timeout(options.source_timeout, fetcher.fetch(source)).await {
        Ok(articles) => articles,
        Err(_) => {
            warn!(
                "Feed '{}' timed out after {:?}",
                source.key, options.source_timeout
            );
            Vec::new()
        }
    }
}
