//! Wire shapes of the GitHub REST responses we read.
//!
//! Only the fields the finder needs are declared; serde ignores the rest.

use serde::Deserialize;

use super::CommitId;

/// One element of `GET /repos/{owner}/{repo}/commits`
#[derive(Debug, Clone, Deserialize)]
pub struct CommitListItem {
    pub sha: CommitId,
}

/// Error body GitHub attaches to non-success responses.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub message: String,
}
