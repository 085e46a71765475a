use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::article::now_in_vietnam;
use crate::error::QueryError;
use crate::news::{paginate, NewsFilter, NewsService};

const DEFAULT_LATEST: usize = 10;
const DEFAULT_PER_PAGE: usize = 20;

pub struct AppState {
    pub news: NewsService,
}

// Custom error type
pub struct AppError {
    status: StatusCode,
    error: String,
    message: &'static str,
}

impl From<QueryError> for AppError {
    fn from(err: QueryError) -> Self {
        AppError {
            status: StatusCode::BAD_REQUEST,
            error: err.to_string(),
            message: "Tham số không hợp lệ",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(json!({
                "success": false,
                "error": self.error,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home))
        .route("/api/news", get(news))
        .route("/api/news/category/:category", get(news_by_category))
        .route("/api/news/source/:source", get(news_by_source))
        .route("/api/news/search", get(search))
        .route("/api/news/latest", get(latest))
        .route("/api/stats", get(stats))
        .route("/api/refresh", post(refresh))
        .route("/api/refresh/status", get(refresh_status))
        .route("/api/sources", get(sources))
        .route("/api/health", get(health))
        .fallback(not_found)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

// Route handlers
pub async fn home(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let sources: Vec<&str> = state
        .news
        .sources()
        .iter()
        .map(|s| s.key.as_str())
        .collect();

    Json(json!({
        "message": "API Tin Tức Chứng Khoán Việt Nam",
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": {
            "/api/news": "Lấy tất cả tin tức",
            "/api/news?category=stocks": "Lọc theo danh mục",
            "/api/news?source=vietstock_stocks": "Lọc theo nguồn",
            "/api/news?limit=10": "Giới hạn số lượng bài viết",
            "/api/news?page=1&per_page=20": "Phân trang",
            "/api/news/category/{category}": "Tin theo danh mục",
            "/api/news/source/{source}": "Tin theo nguồn",
            "/api/news/search?q=...": "Tìm kiếm tin tức",
            "/api/news/latest?count=10": "Tin mới nhất",
            "/api/stats": "Thống kê",
            "/api/refresh": "Làm mới dữ liệu (POST)",
            "/api/sources": "Danh sách các nguồn tin",
            "/api/health": "Kiểm tra trạng thái",
        },
        "categories": state.news.categories(),
        "sources": sources,
    }))
}

/// Numeric parameters arrive as text so that malformed values get the JSON
/// error envelope instead of the extractor's plain-text rejection.
#[derive(Debug, Default, Deserialize)]
pub struct NewsQuery {
    pub category: Option<String>,
    pub source: Option<String>,
    pub limit: Option<String>,
    pub page: Option<String>,
    pub per_page: Option<String>,
}

/// Parse an optional positive integer, mapping malformed input to `err`.
fn parse_param(value: Option<&str>, err: QueryError) -> Result<Option<usize>, AppError> {
    match value.map(str::trim) {
        None | Some("") => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| err.into()),
    }
}

pub async fn news(
    State(state): State<Arc<AppState>>,
    Query(query): Query<NewsQuery>,
) -> Result<impl IntoResponse, AppError> {
    let page = parse_param(query.page.as_deref(), QueryError::InvalidPage)?;
    let per_page = parse_param(query.per_page.as_deref(), QueryError::InvalidPerPage)?;
    let filter = NewsFilter {
        category: query.category,
        source: query.source,
        // A malformed limit is ignored rather than rejected
        limit: query.limit.as_deref().and_then(|l| l.trim().parse().ok()),
    };
    let listing = state.news.list(&filter).await?;

    if page.is_some() || per_page.is_some() {
        let page = paginate(
            &listing.articles,
            page.unwrap_or(1),
            per_page.unwrap_or(DEFAULT_PER_PAGE),
        )?;
        return Ok(Json(json!({
            "success": true,
            "total": page.pagination.total,
            "articles": page.articles,
            "pagination": page.pagination,
            "cached": listing.cached,
            "last_updated": listing.last_updated,
        })));
    }

    Ok(Json(json!({
        "success": true,
        "total": listing.total,
        "articles": listing.articles,
        "cached": listing.cached,
        "last_updated": listing.last_updated,
    })))
}

pub async fn news_by_category(
    State(state): State<Arc<AppState>>,
    Path(category): Path<String>,
) -> impl IntoResponse {
    let articles = state.news.get_by_category(&category).await;
    Json(json!({
        "success": true,
        "category": category,
        "total": articles.len(),
        "articles": articles,
    }))
}

pub async fn news_by_source(
    State(state): State<Arc<AppState>>,
    Path(source): Path<String>,
) -> impl IntoResponse {
    let articles = state.news.get_by_source(&source).await;
    Json(json!({
        "success": true,
        "source": source,
        "total": articles.len(),
        "articles": articles,
    }))
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
}

pub async fn search(
    State(state): State<Arc<AppState>>,
    Query(query): Query<SearchQuery>,
) -> Result<impl IntoResponse, AppError> {
    let articles = state.news.search(&query.q).await?;
    Ok(Json(json!({
        "success": true,
        "query": query.q.trim(),
        "total": articles.len(),
        "articles": articles,
    })))
}

#[derive(Debug, Default, Deserialize)]
pub struct LatestQuery {
    pub count: Option<String>,
}

pub async fn latest(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LatestQuery>,
) -> Result<impl IntoResponse, AppError> {
    let count = parse_param(query.count.as_deref(), QueryError::InvalidCount)?
        .unwrap_or(DEFAULT_LATEST);
    let articles = state.news.get_latest(count).await?;
    Ok(Json(json!({
        "success": true,
        "total": articles.len(),
        "articles": articles,
    })))
}

pub async fn stats(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.news.get_stats().await;
    Json(json!({
        "success": true,
        "stats": stats,
    }))
}

pub async fn refresh(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.news.force_refresh().await;
    Json(json!({
        "success": true,
        "message": "Đã làm mới dữ liệu",
        "total": stats.total_articles,
        "last_update": stats.last_update,
    }))
}

pub async fn refresh_status(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let refreshing = state.news.cache().is_refreshing().await;
    Json(json!({
        "success": true,
        "refreshing": refreshing,
    }))
}

pub async fn sources(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(json!({
        "success": true,
        "sources": state.news.sources(),
    }))
}

pub async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.news.health().await;
    Json(json!({
        "status": "healthy",
        "timestamp": now_in_vietnam(),
        "cache_status": if health.has_snapshot { "active" } else { "empty" },
        "has_snapshot": health.has_snapshot,
        "last_update": health.last_update,
        "refreshing": health.refreshing,
    }))
}

pub async fn not_found() -> impl IntoResponse {
    AppError {
        status: StatusCode::NOT_FOUND,
        error: "Endpoint not found".to_string(),
        message: "Vui lòng kiểm tra lại URL API",
    }
}
