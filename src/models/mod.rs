//! Commit identifiers, cache keys and GitHub wire types.
//!
//! - `commit`: CommitId, CommitSequence, CacheKey
//! - `github`: CommitListItem, ApiErrorBody for decoding REST responses

pub mod commit;
pub mod github;

pub use commit::*;
pub use github::*;
