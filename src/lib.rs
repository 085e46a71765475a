//! Vietnamese market news aggregator.
//!
//! Fetches VietStock and CafeF RSS feeds concurrently, normalizes them into
//! a single newest-first snapshot, caches it with staleness-driven refresh
//! and serves filtered views of it as a JSON API.

pub mod aggregator;
pub mod article;
pub mod cache;
pub mod config;
pub mod error;
pub mod fetcher;
pub mod news;
pub mod routes;
pub mod text;
