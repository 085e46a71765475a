use std::sync::Arc;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vn_market_news::cache::{start_background_refresh, NewsCache};
use vn_market_news::config::Config;
use vn_market_news::fetcher::Fetcher;
use vn_market_news::news::NewsService;
use vn_market_news::routes::{self, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vn_market_news=info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config_path = std::env::var("FEEDS_CONFIG").unwrap_or_else(|_| "feeds.toml".to_string());
    let config = Config::load(&config_path)?;
    info!("Loaded {} feeds from {}", config.feeds.len(), config_path);

    let fetcher = Arc::new(Fetcher::new(&config.fetch));
    let cache = Arc::new(NewsCache::new(
        config.feeds.clone(),
        fetcher,
        config.refresh_interval(),
        config.fetch.aggregate_options(),
    ));

    // Start background refresh task
    let bg_cache = cache.clone();
    let check_interval = config.check_interval();
    tokio::spawn(async move {
        start_background_refresh(bg_cache, check_interval).await;
    });

    let state = Arc::new(AppState {
        news: NewsService::new(cache),
    });
    let app = routes::router(state);

    let bind = match std::env::var("PORT") {
        Ok(port) => format!("0.0.0.0:{}", port),
        Err(_) => config.bind.clone(),
    };
    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Server starting on http://{}", bind);

    axum::serve(listener, app).await?;

    Ok(())
}
