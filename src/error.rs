use reqwest::StatusCode;

/// Why a single source produced nothing. Never leaves the fetcher.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("unexpected status {0}")]
    Status(StatusCode),

    #[error("feed contains no readable items")]
    Unreadable,
}

/// Why one entry of an otherwise readable feed was skipped.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EntryError {
    #[error("entry '{title}' has no link")]
    MissingLink { title: String },
}

/// Invalid caller input to a query. The HTTP layer maps these to 400.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum QueryError {
    #[error("search query must not be empty")]
    EmptyQuery,

    #[error("page must be a positive integer")]
    InvalidPage,

    #[error("per_page must be a positive integer")]
    InvalidPerPage,

    #[error("count must be a positive integer")]
    InvalidCount,

    #[error("limit must be a positive integer")]
    InvalidLimit,
}
