pub mod cache;
pub mod fetcher;
pub mod resolver;

pub use cache::{FileHistoryCache, HistoryCache, MemoryHistoryCache};
pub use fetcher::{HostVerifier, PageFetcher};
pub use resolver::{last_common, CommonCommitsFinder, LastCommonCommitsFinder};
