//! DriveScope — local metadata index and analytics engine for Google Drive.
//!
//! Maintains a durable, queryable SQLite index of a remote file store so
//! expensive full enumerations are avoided: a full crawl builds the index
//! and anchors the remote change feed, incremental syncs consume the feed
//! forward, and a derived-analytics engine computes duplicate groups, folder
//! depths, semantic categories, activity timelines, and size breakdowns from
//! cached snapshots. The HTTP layer, OAuth flow, and remote transport are
//! external collaborators injected through [`remote::RemoteClient`].

pub mod analytics;
pub mod cache;
pub mod config;
pub mod crawl;
pub mod error;
pub mod health;
pub mod jobs;
pub mod queries;
pub mod remote;
pub mod service;
pub mod store;
pub mod sync;
pub mod types;

pub use config::DriveConfig;
pub use error::{Error, Result};
pub use service::DriveService;
pub use store::IndexStore;
