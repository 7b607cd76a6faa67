//! Last common commits of two branches of a GitHub repository.
//!
//! GitHub has no merge-base endpoint, so both branches are paged through the
//! "list commits" API until their histories overlap. Accumulated histories
//! are cached per branch for a short TTL.
//!
//! - `commits`: the lookup itself plus its fetcher, verifier and cache seams
//! - `github`: reqwest implementation of the seams
//! - `config`, `error`, `models`: shared types

pub mod commits;
pub mod config;
pub mod error;
pub mod github;
pub mod models;

pub use commits::{
    CommonCommitsFinder, FileHistoryCache, HistoryCache, LastCommonCommitsFinder,
    MemoryHistoryCache,
};
pub use config::FinderConfig;
pub use error::{CacheError, FinderError, Result};
pub use github::{create_finder, GithubClient, GithubFinder};
pub use models::{CacheKey, CommitId, CommitSequence};
