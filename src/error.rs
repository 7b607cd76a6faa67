//! Error types for host checks, page fetches and the history cache.
//!
//! `FinderError` covers everything that can abort construction or a lookup:
//! - `UserNotFound`, `RepoInaccessible`, `Unauthorized` → construction pre-checks
//! - `Timeout`, `Connection` → transport failures, left to the caller to retry
//! - `Api`, `Decode` → the host answered, but not with a commit listing
//!
//! `CacheError` is only ever reported, never propagated out of a lookup.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FinderError {
    #[error("User {0} does not exist")]
    UserNotFound(String),

    #[error(
        "User {owner} does not have a repository named {repo}, or the token does not have enough permissions to access it!"
    )]
    RepoInaccessible { owner: String, repo: String },

    #[error("The token doesn't have permission to access this resource")]
    Unauthorized,

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Unexpected response from host ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

impl FinderError {
    pub fn repo_inaccessible(owner: &str, repo: &str) -> Self {
        FinderError::RepoInaccessible {
            owner: owner.to_string(),
            repo: repo.to_string(),
        }
    }

    /// Failures raised while verifying the owner and repository.
    pub fn is_precheck(&self) -> bool {
        matches!(
            self,
            FinderError::UserNotFound(_)
                | FinderError::RepoInaccessible { .. }
                | FinderError::Unauthorized
        )
    }

    /// Failures a caller may reasonably retry.
    pub fn is_transient(&self) -> bool {
        matches!(self, FinderError::Timeout(_) | FinderError::Connection(_))
    }
}

#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Cache serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Cache lock poisoned")]
    Poisoned,
}

pub type Result<T> = std::result::Result<T, FinderError>;
