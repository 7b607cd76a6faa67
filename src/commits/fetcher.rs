use async_trait::async_trait;

use crate::error::Result;
use crate::models::CommitSequence;

/// Source of paginated commit listings for one repository.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Commits reachable from `branch`, newest first, for the 1-based `page`.
    ///
    /// An empty sequence marks the end of history and is not an error.
    /// Implementations must not retry.
    async fn fetch_commits(&self, branch: &str, page: u32) -> Result<CommitSequence>;
}

/// Existence and permission checks run before a finder is built.
#[async_trait]
pub trait HostVerifier: Send + Sync {
    async fn user_exists(&self, owner: &str) -> Result<bool>;

    async fn repo_accessible(&self, owner: &str, repo: &str) -> Result<bool>;
}

#[async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for std::sync::Arc<T> {
    async fn fetch_commits(&self, branch: &str, page: u32) -> Result<CommitSequence> {
        (**self).fetch_commits(branch, page).await
    }
}

#[async_trait]
impl<T: HostVerifier + ?Sized> HostVerifier for std::sync::Arc<T> {
    async fn user_exists(&self, owner: &str) -> Result<bool> {
        (**self).user_exists(owner).await
    }

    async fn repo_accessible(&self, owner: &str, repo: &str) -> Result<bool> {
        (**self).repo_accessible(owner, repo).await
    }
}
