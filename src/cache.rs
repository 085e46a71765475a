use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, Utc};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::aggregator::{aggregate, AggregateOptions, Snapshot};
use crate::article::vietnam_offset;
use crate::config::FeedSource;
use crate::fetcher::FeedFetch;

/// Source of "now" for staleness decisions.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Empty,
    Fresh,
    Stale,
}

/// A published snapshot together with the moment it was stored.
#[derive(Debug)]
pub struct CachedSnapshot {
    pub snapshot: Snapshot,
    pub last_update: DateTime<Utc>,
}

impl CachedSnapshot {
    pub fn last_update_local(&self) -> DateTime<FixedOffset> {
        self.last_update.with_timezone(&vietnam_offset())
    }
}

/// Owns the current snapshot and decides when to rebuild it.
///
/// The snapshot and its timestamp are swapped as one `Arc`, so readers never
/// see a new timestamp paired with an old snapshot. Rebuilds are serialized
/// through `rebuild_gate`.
pub struct NewsCache {
    sources: Vec<FeedSource>,
    fetcher: Arc<dyn FeedFetch>,
    clock: Arc<dyn Clock>,
    refresh_interval: chrono::Duration,
    options: AggregateOptions,
    current: RwLock<Option<Arc<CachedSnapshot>>>,
    rebuild_gate: Mutex<()>,
    refreshing: AtomicBool,
}

impl NewsCache {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn FeedFetch>,
        refresh_interval: Duration,
        options: AggregateOptions,
    ) -> Self {
        Self::with_clock(
            sources,
            fetcher,
            refresh_interval,
            options,
            Arc::new(SystemClock),
        )
    }

    pub fn with_clock(
        sources: Vec<FeedSource>,
        fetcher: Arc<dyn FeedFetch>,
        refresh_interval: Duration,
        options: AggregateOptions,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let refresh_interval =
            chrono::Duration::from_std(refresh_interval).unwrap_or(chrono::Duration::MAX);

        Self {
            sources,
            fetcher,
            clock,
            refresh_interval,
            options,
            current: RwLock::new(None),
            rebuild_gate: Mutex::new(()),
            refreshing: AtomicBool::new(false),
        }
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn is_fresh(&self, cached: &CachedSnapshot) -> bool {
        self.clock.now() - cached.last_update <= self.refresh_interval
    }

    pub async fn state(&self) -> CacheState {
        match self.peek().await {
            None => CacheState::Empty,
            Some(cached) if self.is_fresh(&cached) => CacheState::Fresh,
            Some(_) => CacheState::Stale,
        }
    }

    /// Current pair, without triggering a rebuild.
    pub async fn peek(&self) -> Option<Arc<CachedSnapshot>> {
        self.current.read().await.clone()
    }

    pub async fn is_refreshing(&self) -> bool {
        self.refreshing.load(Ordering::SeqCst)
    }

    /// Current snapshot, rebuilt first when empty or stale.
    pub async fn get_snapshot(&self) -> Arc<CachedSnapshot> {
        if let Some(cached) = self.fresh_snapshot().await {
            debug!("Returning cached news data");
            return cached;
        }

        let _gate = self.rebuild_gate.lock().await;
        // Another caller may have rebuilt while this one waited on the gate
        if let Some(cached) = self.fresh_snapshot().await {
            return cached;
        }

        info!("Cache expired or empty, fetching fresh news data");
        self.rebuild().await
    }

    /// Rebuild regardless of the current state.
    pub async fn force_refresh(&self) -> Arc<CachedSnapshot> {
        let _gate = self.rebuild_gate.lock().await;
        info!("Forced refresh requested");
        self.rebuild().await
    }

    /// Rebuild only when stale; a no-op on a fresh cache. Returns whether a
    /// rebuild happened.
    pub async fn refresh_if_stale(&self) -> bool {
        if self.fresh_snapshot().await.is_some() {
            return false;
        }

        let _gate = self.rebuild_gate.lock().await;
        if self.fresh_snapshot().await.is_some() {
            return false;
        }

        self.rebuild().await;
        true
    }

    async fn fresh_snapshot(&self) -> Option<Arc<CachedSnapshot>> {
        self.peek().await.filter(|cached| self.is_fresh(cached))
    }

    /// Callers must hold `rebuild_gate`.
    async fn rebuild(&self) -> Arc<CachedSnapshot> {
        let _refreshing = RefreshingGuard::set(&self.refreshing);

        let snapshot = aggregate(self.fetcher.as_ref(), &self.sources, &self.options).await;
        let cached = Arc::new(CachedSnapshot {
            snapshot,
            last_update: self.clock.now(),
        });
        *self.current.write().await = Some(cached.clone());
        cached
    }
}

/// Holds the refreshing flag up until dropped, including when the rebuild
/// future is cancelled mid-flight.
struct RefreshingGuard<'a>(&'a AtomicBool);

impl<'a> RefreshingGuard<'a> {
    fn set(flag: &'a AtomicBool) -> Self {
        flag.store(true, Ordering::SeqCst);
        Self(flag)
    }
}

impl Drop for RefreshingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Warm the cache, then rebuild whenever a periodic check finds it stale.
pub async fn start_background_refresh(cache: Arc<NewsCache>, check_interval: Duration) {
    info!("Starting initial feed fetch");
    cache.get_snapshot().await;

    loop {
        tokio::time::sleep(check_interval).await;
        if cache.refresh_if_stale().await {
            info!("Scheduled refresh rebuilt the news cache");
        }
    }
}
