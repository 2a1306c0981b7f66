//! Crate-wide error taxonomy.
//!
//! Remote failures keep their category (network / auth / remote payload) so
//! callers can distinguish "retry later" from "re-authenticate". Store errors
//! during crawl/sync are caught per record by the engines and logged to the
//! `file_errors` table; anything that escapes here aborts the owning job.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Remote call failed at the transport level.
    #[error("network error: {0}")]
    Network(String),

    /// Credentials absent or rejected by the remote store.
    #[error("auth error: {0}")]
    Auth(String),

    /// Remote returned an error payload.
    #[error("remote error: {0}")]
    Remote(String),

    /// The stored change-feed continuation token was rejected as expired.
    /// Recovering requires a full crawl.
    #[error("continuation token expired; a full crawl is required")]
    TokenExpired,

    /// Incremental sync requested but no continuation token is stored.
    #[error("no continuation token found; run a full crawl first")]
    NoContinuationToken,

    /// Local store failure that is not attributable to a single record.
    #[error("store error: {0}")]
    Store(#[from] rusqlite::Error),

    /// Requested cache entry does not exist.
    #[error("cache miss: {0}")]
    CacheMiss(String),

    /// Cache entry exists but failed the validity rules.
    #[error("cache expired: {0}")]
    CacheExpired(String),

    /// Cache payload could not be parsed. The coordinator deletes the entry
    /// and treats it as absent; this kind only escapes on delete failure.
    #[error("cache corrupt: {0}")]
    CacheCorrupt(String),

    /// Analytics requested before the derived cache is built. A compute job
    /// has been started; retry shortly.
    #[error("analytics not ready: {0}")]
    NotReady(String),

    /// Requested entity (job, snapshot, file) does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed caller input, e.g. an unknown analytics view name.
    #[error("validation error: {0}")]
    Validation(String),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable lowercase kind string for logs and wire payloads.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Network(_) => "network",
            Error::Auth(_) => "auth",
            Error::Remote(_) => "remote",
            Error::TokenExpired => "token_expired",
            Error::NoContinuationToken => "no_continuation_token",
            Error::Store(_) => "store",
            Error::CacheMiss(_) => "cache_miss",
            Error::CacheExpired(_) => "cache_expired",
            Error::CacheCorrupt(_) => "cache_corrupt",
            Error::NotReady(_) => "not_ready",
            Error::NotFound(_) => "not_found",
            Error::Validation(_) => "validation",
            Error::Json(_) => "json",
            Error::Io(_) => "io",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
