//! Read-only queries over the cached snapshot.
//!
//! Every query takes one `Arc<CachedSnapshot>` from the cache and answers
//! entirely from it, so results never mix two snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, FixedOffset};
use serde::Serialize;

use crate::article::Article;
use crate::cache::{CachedSnapshot, NewsCache};
use crate::config::FeedSource;
use crate::error::QueryError;

pub const MAX_PER_PAGE: usize = 100;
pub const MAX_LATEST: usize = 50;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PaginationMeta {
    pub page: usize,
    pub per_page: usize,
    pub total: usize,
    pub pages: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub articles: Vec<Article>,
    pub pagination: PaginationMeta,
}

/// Optional filters of the news listing.
#[derive(Debug, Clone, Default)]
pub struct NewsFilter {
    pub category: Option<String>,
    pub source: Option<String>,
    pub limit: Option<usize>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Listing {
    pub articles: Vec<Article>,
    pub total: usize,
    /// Whether the answering snapshot was still fresh
    pub cached: bool,
    pub last_updated: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Stats {
    pub total_articles: usize,
    pub categories: BTreeMap<String, usize>,
    pub sources: BTreeMap<String, usize>,
    pub last_update: DateTime<FixedOffset>,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Health {
    pub has_snapshot: bool,
    pub last_update: Option<DateTime<FixedOffset>>,
    pub refreshing: bool,
}

pub struct NewsService {
    cache: Arc<NewsCache>,
}

impl NewsService {
    pub fn new(cache: Arc<NewsCache>) -> Self {
        Self { cache }
    }

    pub fn cache(&self) -> &Arc<NewsCache> {
        &self.cache
    }

    pub fn sources(&self) -> &[FeedSource] {
        self.cache.sources()
    }

    /// Distinct categories of the configured sources, sorted.
    pub fn categories(&self) -> Vec<String> {
        self.sources()
            .iter()
            .map(|s| s.category.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub async fn get_all(&self, page: usize, per_page: usize) -> Result<Page, QueryError> {
        let cached = self.cache.get_snapshot().await;
        paginate(cached.snapshot.articles(), page, per_page)
    }

    pub async fn get_by_category(&self, category: &str) -> Vec<Article> {
        let cached = self.cache.get_snapshot().await;
        let category = category.trim().to_lowercase();
        cached.snapshot.by_category(&category).cloned().collect()
    }

    pub async fn get_by_source(&self, source_key: &str) -> Vec<Article> {
        let cached = self.cache.get_snapshot().await;
        let source_key = source_key.trim().to_lowercase();
        cached.snapshot.by_source(&source_key).cloned().collect()
    }

    /// Case-insensitive substring match over title and description.
    pub async fn search(&self, query: &str) -> Result<Vec<Article>, QueryError> {
        let needle = query.trim().to_lowercase();
        if needle.is_empty() {
            return Err(QueryError::EmptyQuery);
        }

        let cached = self.cache.get_snapshot().await;
        Ok(cached
            .snapshot
            .articles()
            .iter()
            .filter(|a| {
                a.title.to_lowercase().contains(&needle)
                    || a.description.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    pub async fn get_latest(&self, count: usize) -> Result<Vec<Article>, QueryError> {
        if count == 0 {
            return Err(QueryError::InvalidCount);
        }

        let cached = self.cache.get_snapshot().await;
        Ok(cached
            .snapshot
            .articles()
            .iter()
            .take(count.min(MAX_LATEST))
            .cloned()
            .collect())
    }

    /// Filtered listing: category and source narrow the set, then `limit`
    /// keeps the newest entries.
    pub async fn list(&self, filter: &NewsFilter) -> Result<Listing, QueryError> {
        if filter.limit == Some(0) {
            return Err(QueryError::InvalidLimit);
        }

        let cached = self.cache.get_snapshot().await;
        let category = normalized_key(filter.category.as_deref());
        let source = normalized_key(filter.source.as_deref());

        let articles: Vec<Article> = cached
            .snapshot
            .articles()
            .iter()
            .filter(|a| category.as_deref().map_or(true, |c| a.category.to_lowercase() == c))
            .filter(|a| source.as_deref().map_or(true, |s| a.feed_key.to_lowercase() == s))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        Ok(Listing {
            total: articles.len(),
            articles,
            cached: self.cache.is_fresh(&cached),
            last_updated: cached.last_update_local(),
        })
    }

    pub async fn get_stats(&self) -> Stats {
        let cached = self.cache.get_snapshot().await;
        stats_of(&cached)
    }

    pub async fn force_refresh(&self) -> Stats {
        let cached = self.cache.force_refresh().await;
        stats_of(&cached)
    }

    /// Never triggers a rebuild.
    pub async fn health(&self) -> Health {
        let current = self.cache.peek().await;
        Health {
            has_snapshot: current.is_some(),
            last_update: current.map(|cached| cached.last_update_local()),
            refreshing: self.cache.is_refreshing().await,
        }
    }
}

fn normalized_key(key: Option<&str>) -> Option<String> {
    key.map(|k| k.trim().to_lowercase()).filter(|k| !k.is_empty())
}

fn stats_of(cached: &CachedSnapshot) -> Stats {
    Stats {
        total_articles: cached.snapshot.len(),
        categories: cached.snapshot.category_counts(),
        sources: cached.snapshot.source_counts(),
        last_update: cached.last_update_local(),
    }
}

/// Slice one page out of `articles`. `per_page` is capped at
/// [`MAX_PER_PAGE`]; pages past the end are empty.
pub fn paginate(articles: &[Article], page: usize, per_page: usize) -> Result<Page, QueryError> {
    if page == 0 {
        return Err(QueryError::InvalidPage);
    }
    if per_page == 0 {
        return Err(QueryError::InvalidPerPage);
    }

    let per_page = per_page.min(MAX_PER_PAGE);
    let total = articles.len();
    let pages = total.div_ceil(per_page);
    let start = (page - 1).saturating_mul(per_page).min(total);
    let end = start.saturating_add(per_page).min(total);

    Ok(Page {
        articles: articles[start..end].to_vec(),
        pagination: PaginationMeta {
            page,
            per_page,
            total,
            pages,
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregator::AggregateOptions;
    use crate::article::{identify, resolve_date, RawDate};
    use crate::fetcher::FeedFetch;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct StaticFetcher {
        feeds: HashMap<String, Vec<Article>>,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl FeedFetch for StaticFetcher {
        async fn fetch(&self, source: &FeedSource) -> Vec<Article> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.feeds.get(&source.key).cloned().unwrap_or_default()
        }
    }

    fn feed_source(key: &str, category: &str) -> FeedSource {
        FeedSource {
            key: key.to_string(),
            name: format!("Nguồn {key}"),
            url: format!("https://example.vn/{key}.rss"),
            category: category.to_string(),
        }
    }

    fn article(source: &FeedSource, n: usize, title: &str, description: &str) -> Article {
        let link = format!("https://example.vn/{}/{n}", source.key);
        Article {
            id: identify(title, &link),
            title: title.to_string(),
            link,
            description: description.to_string(),
            published: resolve_date(&RawDate::Text(format!(
                "2024-12-09T{:02}:{:02}:00+07:00",
                n / 60,
                n % 60
            ))),
            category: source.category.clone(),
            source: source.name.clone(),
            feed_key: source.key.clone(),
            image: None,
        }
    }

    fn numbered(source: &FeedSource, count: usize) -> Vec<Article> {
        (0..count)
            .map(|n| article(source, n, &format!("Bài {n}"), ""))
            .collect()
    }

    fn create_service(feeds: Vec<(FeedSource, Vec<Article>)>) -> (NewsService, Arc<StaticFetcher>) {
        let sources: Vec<_> = feeds.iter().map(|(s, _)| s.clone()).collect();
        let fetcher = Arc::new(StaticFetcher {
            feeds: feeds
                .into_iter()
                .map(|(s, articles)| (s.key, articles))
                .collect(),
            calls: AtomicUsize::new(0),
        });
        let cache = NewsCache::new(
            sources,
            fetcher.clone(),
            Duration::from_secs(300),
            AggregateOptions::default(),
        );
        (NewsService::new(Arc::new(cache)), fetcher)
    }

    mod paginate_tests {
        use super::*;

        #[test]
        fn test_second_page_of_25() {
            let s = feed_source("a", "stocks");
            let articles = numbered(&s, 25);

            let page = paginate(&articles, 2, 10).unwrap();

            assert_eq!(page.articles, articles[10..20].to_vec());
            assert_eq!(
                page.pagination,
                PaginationMeta {
                    page: 2,
                    per_page: 10,
                    total: 25,
                    pages: 3
                }
            );
        }

        #[test]
        fn test_last_partial_page() {
            let s = feed_source("a", "stocks");
            let page = paginate(&numbered(&s, 25), 3, 10).unwrap();
            assert_eq!(page.articles.len(), 5);
        }

        #[test]
        fn test_page_past_end_is_empty() {
            let s = feed_source("a", "stocks");
            let page = paginate(&numbered(&s, 25), 9, 10).unwrap();
            assert!(page.articles.is_empty());
            assert_eq!(page.pagination.pages, 3);
        }

        #[test]
        fn test_per_page_capped() {
            let s = feed_source("a", "stocks");
            let page = paginate(&numbered(&s, 150), 1, 500).unwrap();
            assert_eq!(page.articles.len(), MAX_PER_PAGE);
            assert_eq!(page.pagination.per_page, MAX_PER_PAGE);
            assert_eq!(page.pagination.pages, 2);
        }

        #[test]
        fn test_empty_set() {
            let page = paginate(&[], 1, 10).unwrap();
            assert_eq!(page.pagination.total, 0);
            assert_eq!(page.pagination.pages, 0);
        }

        #[test]
        fn test_zero_rejected() {
            assert_eq!(paginate(&[], 0, 10).unwrap_err(), QueryError::InvalidPage);
            assert_eq!(paginate(&[], 1, 0).unwrap_err(), QueryError::InvalidPerPage);
        }
    }

    mod query_tests {
        use super::*;

        #[tokio::test]
        async fn test_get_all_uses_snapshot_order() {
            let s = feed_source("a", "stocks");
            let (service, _) = create_service(vec![(s.clone(), numbered(&s, 25))]);

            let page = service.get_all(2, 10).await.unwrap();

            assert_eq!(page.articles.len(), 10);
            // Newest first: minute 24 is index 0, so index 10 is "Bài 14"
            assert_eq!(page.articles[0].title, "Bài 14");
            assert_eq!(page.pagination.pages, 3);
        }

        #[tokio::test]
        async fn test_category_and_source_filters() {
            let a = feed_source("vietstock_stocks", "stocks");
            let b = feed_source("cafef_market", "market");
            let (service, _) = create_service(vec![
                (a.clone(), numbered(&a, 4)),
                (b.clone(), numbered(&b, 6)),
            ]);

            assert_eq!(service.get_by_category("market").await.len(), 6);
            assert_eq!(service.get_by_category("MARKET").await.len(), 6);
            assert!(service.get_by_category("bonds").await.is_empty());
            assert_eq!(service.get_by_source("vietstock_stocks").await.len(), 4);
            assert!(service.get_by_source("unknown").await.is_empty());
        }

        #[tokio::test]
        async fn test_mixed_case_config_keys_match() {
            let a = feed_source("VietStock_Stocks", "Stocks");
            let (service, _) = create_service(vec![(a.clone(), numbered(&a, 3))]);

            assert_eq!(service.get_by_category("stocks").await.len(), 3);
            assert_eq!(service.get_by_source("vietstock_stocks").await.len(), 3);

            let filter = NewsFilter {
                category: Some("STOCKS".to_string()),
                source: Some("vietstock_stocks".to_string()),
                limit: None,
            };
            assert_eq!(service.list(&filter).await.unwrap().total, 3);
        }

        #[tokio::test]
        async fn test_search_case_insensitive() {
            let s = feed_source("a", "stocks");
            let articles = vec![
                article(&s, 1, "Thị trường Chứng Khoán hồi phục", ""),
                article(&s, 2, "Giá vàng tăng", "Nhà đầu tư chứng khoán thận trọng"),
                article(&s, 3, "Lãi suất ngân hàng", "Không liên quan"),
            ];
            let (service, _) = create_service(vec![(s, articles)]);

            let found = service.search("chứng khoán").await.unwrap();

            let mut titles: Vec<_> = found.iter().map(|a| a.title.as_str()).collect();
            titles.sort();
            assert_eq!(titles, vec!["Giá vàng tăng", "Thị trường Chứng Khoán hồi phục"]);
        }

        #[tokio::test]
        async fn test_empty_search_rejected_without_fetching() {
            let s = feed_source("a", "stocks");
            let (service, fetcher) = create_service(vec![(s.clone(), numbered(&s, 3))]);

            assert_eq!(service.search("   ").await.unwrap_err(), QueryError::EmptyQuery);
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);
        }

        #[tokio::test]
        async fn test_latest_capped() {
            let s = feed_source("a", "stocks");
            let (service, _) = create_service(vec![(s.clone(), numbered(&s, 80))]);

            assert_eq!(service.get_latest(5).await.unwrap().len(), 5);
            assert_eq!(service.get_latest(500).await.unwrap().len(), MAX_LATEST);
            assert_eq!(service.get_latest(0).await.unwrap_err(), QueryError::InvalidCount);
        }

        #[tokio::test]
        async fn test_list_with_filters_and_limit() {
            let a = feed_source("vietstock_stocks", "stocks");
            let b = feed_source("cafef_market", "market");
            let (service, _) = create_service(vec![
                (a.clone(), numbered(&a, 4)),
                (b.clone(), numbered(&b, 6)),
            ]);

            let listing = service
                .list(&NewsFilter {
                    category: Some("Market".to_string()),
                    source: None,
                    limit: Some(3),
                })
                .await
                .unwrap();

            assert_eq!(listing.total, 3);
            assert!(listing.articles.iter().all(|a| a.feed_key == "cafef_market"));
            assert!(listing.cached);

            let none = service
                .list(&NewsFilter {
                    category: Some("market".to_string()),
                    source: Some("vietstock_stocks".to_string()),
                    limit: None,
                })
                .await
                .unwrap();
            assert_eq!(none.total, 0);

            let zero = service
                .list(&NewsFilter {
                    limit: Some(0),
                    ..Default::default()
                })
                .await;
            assert_eq!(zero.unwrap_err(), QueryError::InvalidLimit);
        }

        #[tokio::test]
        async fn test_stats_counts_sum_to_total() {
            let a = feed_source("vietstock_stocks", "stocks");
            let b = feed_source("vietstock_expert", "expert");
            let c = feed_source("cafef_market", "market");
            let (service, _) = create_service(vec![
                (a.clone(), numbered(&a, 20)),
                (b.clone(), numbered(&b, 7)),
                (c.clone(), Vec::new()),
            ]);

            let stats = service.get_stats().await;

            assert_eq!(stats.total_articles, 27);
            assert_eq!(stats.categories.values().sum::<usize>(), 27);
            assert_eq!(stats.sources.values().sum::<usize>(), 27);
            assert_eq!(stats.sources["vietstock_expert"], 7);
            assert!(!stats.sources.contains_key("cafef_market"));
        }

        #[tokio::test]
        async fn test_health_does_not_build() {
            let s = feed_source("a", "stocks");
            let (service, fetcher) = create_service(vec![(s.clone(), numbered(&s, 3))]);

            let health = service.health().await;
            assert!(!health.has_snapshot);
            assert!(health.last_update.is_none());
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 0);

            service.get_stats().await;
            let health = service.health().await;
            assert!(health.has_snapshot);
            assert!(health.last_update.is_some());
        }

        #[tokio::test]
        async fn test_force_refresh_fetches_again() {
            let s = feed_source("a", "stocks");
            let (service, fetcher) = create_service(vec![(s.clone(), numbered(&s, 3))]);

            service.get_stats().await;
            let stats = service.force_refresh().await;

            assert_eq!(stats.total_articles, 3);
            assert_eq!(fetcher.calls.load(Ordering::SeqCst), 2);
        }

        #[tokio::test]
        async fn test_categories_distinct_sorted() {
            let (service, _) = create_service(vec![
                (feed_source("a", "stocks"), Vec::new()),
                (feed_source("b", "market"), Vec::new()),
                (feed_source("c", "stocks"), Vec::new()),
            ]);

            assert_eq!(service.categories(), vec!["market", "stocks"]);
        }
    }
}
