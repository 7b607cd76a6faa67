//! GitHub-backed finder.
//!
//! `GithubClient` implements both `PageFetcher` and `HostVerifier` against
//! the REST API; `create_finder` wires one client into a verified
//! `LastCommonCommitsFinder`.

pub mod client;

pub use client::GithubClient;

use std::sync::Arc;

use crate::commits::cache::HistoryCache;
use crate::commits::resolver::LastCommonCommitsFinder;
use crate::config::FinderConfig;
use crate::error::Result;

pub type GithubFinder<C> = LastCommonCommitsFinder<Arc<GithubClient>, C>;

/// Build a finder for `config.owner/config.repo`, checking the owner and
/// repository first.
pub async fn create_finder<C: HistoryCache>(
    config: FinderConfig,
    cache: C,
) -> Result<GithubFinder<C>> {
    let client = Arc::new(GithubClient::new(&config)?);
    LastCommonCommitsFinder::connect(config, client.as_ref(), client.clone(), cache).await
}
