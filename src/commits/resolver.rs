//! Last-common-commit lookup over two paginated branch listings.
//!
//! The host only offers "list commits reachable from ref", newest first, one
//! page at a time. Both branches are paged in lockstep and the accumulated
//! lists are intersected after every round; the answer is the first shared
//! commit in each branch's own order. This is not a DAG merge-base: it is
//! only as good as the host's linearization and the pages actually fetched.
//!
//! Accumulated histories are written back to the `HistoryCache` so that a
//! later lookup on the same branch can shortcut without paging.

use async_trait::async_trait;
use std::collections::HashSet;

use crate::commits::cache::HistoryCache;
use crate::commits::fetcher::{HostVerifier, PageFetcher};
use crate::config::FinderConfig;
use crate::error::{FinderError, Result};
use crate::models::{CacheKey, CommitId, CommitSequence};

/// Lookup of the most recent commits reachable from two branches.
#[async_trait]
pub trait CommonCommitsFinder: Send + Sync {
    async fn find_last_common_commits(
        &self,
        branch_a: &str,
        branch_b: &str,
    ) -> Result<HashSet<CommitId>>;
}

/// First commit of each sequence that also occurs in the other one.
///
/// At most two ids; one when both branches agree on the newest shared commit.
pub fn last_common(commits_a: &[CommitId], commits_b: &[CommitId]) -> HashSet<CommitId> {
    let in_a: HashSet<&CommitId> = commits_a.iter().collect();
    let in_b: HashSet<&CommitId> = commits_b.iter().collect();

    let mut result = HashSet::new();
    if let Some(first) = commits_a.iter().find(|id| in_b.contains(id)) {
        result.insert(first.clone());
    }
    if let Some(first) = commits_b.iter().find(|id| in_a.contains(id)) {
        result.insert(first.clone());
    }
    result
}

/// Per-branch pagination state for one lookup.
struct BranchCursor<'a> {
    branch: &'a str,
    commits: CommitSequence,
    exhausted: bool,
}

impl<'a> BranchCursor<'a> {
    fn new(branch: &'a str) -> Self {
        Self {
            branch,
            commits: Vec::new(),
            exhausted: false,
        }
    }

    /// Fold in one fetched page; an empty page ends this branch's history.
    fn absorb(&mut self, page: u32, fetched: Option<CommitSequence>) {
        let Some(fetched) = fetched else {
            return;
        };
        tracing::debug!(
            "{} page {}: {} commits ({} accumulated)",
            self.branch,
            page,
            fetched.len(),
            self.commits.len() + fetched.len()
        );
        if fetched.is_empty() {
            self.exhausted = true;
        } else {
            self.commits.extend(fetched);
        }
    }

    /// Exhausted with nothing accumulated: no overlap can ever appear.
    fn is_barren(&self) -> bool {
        self.exhausted && self.commits.is_empty()
    }
}

pub struct LastCommonCommitsFinder<F, C> {
    config: FinderConfig,
    fetcher: F,
    cache: C,
}

impl<F: PageFetcher, C: HistoryCache> LastCommonCommitsFinder<F, C> {
    /// Verify owner and repository, then build the finder.
    ///
    /// Fails with `UserNotFound`, `RepoInaccessible` or `Unauthorized` (or a
    /// transport error) without constructing anything.
    pub async fn connect<V: HostVerifier + ?Sized>(
        config: FinderConfig,
        verifier: &V,
        fetcher: F,
        cache: C,
    ) -> Result<Self> {
        if !verifier.user_exists(&config.owner).await? {
            return Err(FinderError::UserNotFound(config.owner.clone()));
        }
        if !verifier.repo_accessible(&config.owner, &config.repo).await? {
            return Err(FinderError::repo_inaccessible(&config.owner, &config.repo));
        }
        tracing::info!("Verified access to {}/{}", config.owner, config.repo);

        Ok(Self {
            config,
            fetcher,
            cache,
        })
    }

    fn cache_key(&self, branch: &str) -> CacheKey {
        CacheKey::new(&self.config.owner, &self.config.repo, branch)
    }

    async fn lookup(&self, branch_a: &str, branch_b: &str) -> Result<HashSet<CommitId>> {
        for branch in [branch_a, branch_b] {
            if branch.is_empty() {
                return Err(FinderError::InvalidArgument("branch name must not be empty".into()));
            }
        }

        let cached_a = self.cache.get(&self.cache_key(branch_a)).await;
        let cached_b = self.cache.get(&self.cache_key(branch_b)).await;
        let cached = last_common(&cached_a, &cached_b);
        if !cached.is_empty() {
            tracing::info!("Resolved {} / {} from cache", branch_a, branch_b);
            return Ok(cached);
        }

        // The deadline covers paging only; cache access stays best-effort.
        let paged = match self.config.lookup_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.paginate(branch_a, branch_b))
                .await
                .map_err(|_| {
                    FinderError::Timeout(format!(
                        "lookup of {} / {} exceeded {:?}",
                        branch_a, branch_b, deadline
                    ))
                })?,
            None => self.paginate(branch_a, branch_b).await,
        };
        let (cursor_a, cursor_b, result) = paged?;

        for cursor in [&cursor_a, &cursor_b] {
            let key = self.cache_key(cursor.branch);
            if let Err(e) = self.cache.put(&key, &cursor.commits).await {
                tracing::warn!("Failed to cache history for {}: {}", key, e);
            }
        }

        Ok(result)
    }

    async fn paginate<'b>(
        &self,
        branch_a: &'b str,
        branch_b: &'b str,
    ) -> Result<(BranchCursor<'b>, BranchCursor<'b>, HashSet<CommitId>)> {
        let mut a = BranchCursor::new(branch_a);
        let mut b = BranchCursor::new(branch_b);
        let mut page = 1;

        loop {
            // One suspension point per round: both branches' pages, together.
            let (fetched_a, fetched_b) =
                tokio::try_join!(self.fetch_unless(&a, page), self.fetch_unless(&b, page))?;
            a.absorb(page, fetched_a);
            b.absorb(page, fetched_b);

            let result = last_common(&a.commits, &b.commits);
            if !result.is_empty() {
                tracing::info!("Converged on {} / {} after {} page(s)", branch_a, branch_b, page);
                return Ok((a, b, result));
            }
            if (a.exhausted && b.exhausted) || a.is_barren() || b.is_barren() {
                tracing::info!("No common commit between {} and {}", branch_a, branch_b);
                return Ok((a, b, result));
            }
            if self.config.max_pages.is_some_and(|max| page >= max) {
                tracing::warn!(
                    "Giving up on {} / {} after {} page(s) without a common commit",
                    branch_a,
                    branch_b,
                    page
                );
                return Ok((a, b, result));
            }
            page += 1;
        }
    }

    async fn fetch_unless(
        &self,
        cursor: &BranchCursor<'_>,
        page: u32,
    ) -> Result<Option<CommitSequence>> {
        if cursor.exhausted {
            return Ok(None);
        }
        self.fetcher.fetch_commits(cursor.branch, page).await.map(Some)
    }
}

#[async_trait]
impl<F: PageFetcher, C: HistoryCache> CommonCommitsFinder for LastCommonCommitsFinder<F, C> {
    async fn find_last_common_commits(
        &self,
        branch_a: &str,
        branch_b: &str,
    ) -> Result<HashSet<CommitId>> {
        let outcome = self.lookup(branch_a, branch_b).await;
        self.cache.close().await;
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commits::cache::MemoryHistoryCache;
    use crate::error::CacheError;
    use mockall::mock;
    use std::time::Duration;

    const OWNER: &str = "exampleOwner";
    const REPO: &str = "exampleRepo";

    mock! {
        Fetcher {}

        #[async_trait]
        impl PageFetcher for Fetcher {
            async fn fetch_commits(&self, branch: &str, page: u32) -> Result<CommitSequence>;
        }
    }

    mock! {
        Verifier {}

        #[async_trait]
        impl HostVerifier for Verifier {
            async fn user_exists(&self, owner: &str) -> Result<bool>;
            async fn repo_accessible(&self, owner: &str, repo: &str) -> Result<bool>;
        }
    }

    mock! {
        Cache {}

        #[async_trait]
        impl HistoryCache for Cache {
            async fn get(&self, key: &CacheKey) -> CommitSequence;
            async fn put(
                &self,
                key: &CacheKey,
                commits: &[CommitId],
            ) -> std::result::Result<(), CacheError>;
            async fn close(&self);
        }
    }

    fn ids(raw: &[&str]) -> CommitSequence {
        raw.iter().map(|s| CommitId::from(*s)).collect()
    }

    fn set(raw: &[&str]) -> HashSet<CommitId> {
        raw.iter().map(|s| CommitId::from(*s)).collect()
    }

    fn config() -> FinderConfig {
        FinderConfig::new(OWNER, REPO).with_token(Some("exampleToken".into()))
    }

    fn allowing_verifier() -> MockVerifier {
        let mut verifier = MockVerifier::new();
        verifier.expect_user_exists().returning(|_| Ok(true));
        verifier.expect_repo_accessible().returning(|_, _| Ok(true));
        verifier
    }

    async fn build_finder<C: HistoryCache>(
        fetcher: MockFetcher,
        cache: C,
    ) -> LastCommonCommitsFinder<MockFetcher, C> {
        LastCommonCommitsFinder::connect(config(), &allowing_verifier(), fetcher, cache)
            .await
            .unwrap()
    }

    fn expect_page(
        fetcher: &mut MockFetcher,
        branch: &'static str,
        page: u32,
        commits: &'static [&'static str],
    ) {
        fetcher
            .expect_fetch_commits()
            .withf(move |b: &str, p: &u32| b == branch && *p == page)
            .times(1)
            .returning(move |_, _| Ok(ids(commits)));
    }

    fn empty_cache() -> MockCache {
        let mut cache = MockCache::new();
        cache.expect_get().returning(|_| Vec::new());
        cache.expect_close().returning(|| ());
        cache
    }

    #[test]
    fn last_common_picks_first_shared_per_branch() {
        let a = ids(&["a1", "a2", "common"]);
        let b = ids(&["b1", "common", "b2"]);
        assert_eq!(last_common(&a, &b), set(&["common"]));

        let a = ids(&["x", "c1", "c2"]);
        let b = ids(&["c2", "y", "c1"]);
        assert_eq!(last_common(&a, &b), set(&["c1", "c2"]));

        assert!(last_common(&ids(&["a"]), &ids(&["b"])).is_empty());
        assert!(last_common(&[], &ids(&["b"])).is_empty());
    }

    #[tokio::test]
    async fn cache_hit_skips_fetching() {
        let mut cache = MockCache::new();
        cache
            .expect_get()
            .withf(|key: &CacheKey| key.branch == "branchA")
            .returning(|_| ids(&["commitA1", "commitA2", "commonCommit"]));
        cache
            .expect_get()
            .withf(|key: &CacheKey| key.branch == "branchB")
            .returning(|_| ids(&["commitB1", "commonCommit", "commitB2"]));
        cache.expect_put().never();
        cache.expect_close().returning(|| ());

        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch_commits().never();

        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("branchA", "branchB").await.unwrap();
        assert_eq!(result, set(&["commonCommit"]));
    }

    #[tokio::test]
    async fn repeated_cache_hits_are_stable_and_read_only() {
        let cache = MemoryHistoryCache::new(Duration::from_secs(600));
        let key_a = CacheKey::new(OWNER, REPO, "branchA");
        let key_b = CacheKey::new(OWNER, REPO, "branchB");
        cache.put(&key_a, &ids(&["commitA1", "commonCommit"])).await.unwrap();
        cache.put(&key_b, &ids(&["commonCommit", "commitB2"])).await.unwrap();

        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch_commits().never();
        let finder = build_finder(fetcher, cache).await;

        for _ in 0..3 {
            let result = finder.find_last_common_commits("branchA", "branchB").await.unwrap();
            assert_eq!(result, set(&["commonCommit"]));
        }
        assert_eq!(finder.cache.get(&key_a).await, ids(&["commitA1", "commonCommit"]));
        assert_eq!(finder.cache.get(&key_b).await, ids(&["commonCommit", "commitB2"]));
    }

    #[tokio::test]
    async fn converges_on_first_page_and_caches_it() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "branchA", 1, &["commitA1", "commitA2", "commonCommit"]);
        expect_page(&mut fetcher, "branchB", 1, &["commitB1", "commonCommit", "commitB2"]);

        let mut cache = empty_cache();
        cache
            .expect_put()
            .withf(|key: &CacheKey, commits: &[CommitId]| {
                key.as_key() == "exampleOwner_exampleRepo_branchA"
                    && commits == ids(&["commitA1", "commitA2", "commonCommit"]).as_slice()
            })
            .times(1)
            .returning(|_, _| Ok(()));
        cache
            .expect_put()
            .withf(|key: &CacheKey, commits: &[CommitId]| {
                key.as_key() == "exampleOwner_exampleRepo_branchB"
                    && commits == ids(&["commitB1", "commonCommit", "commitB2"]).as_slice()
            })
            .times(1)
            .returning(|_, _| Ok(()));

        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("branchA", "branchB").await.unwrap();
        assert_eq!(result, set(&["commonCommit"]));
    }

    #[tokio::test]
    async fn accumulates_pages_until_overlap() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "main", 1, &["m3", "m2"]);
        expect_page(&mut fetcher, "dev", 1, &["d3", "d2"]);
        expect_page(&mut fetcher, "main", 2, &["m1", "base"]);
        expect_page(&mut fetcher, "dev", 2, &["d1", "m2"]);

        let cache = MemoryHistoryCache::new(Duration::from_secs(600));
        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("main", "dev").await.unwrap();
        assert_eq!(result, set(&["m2"]));

        let cached = finder.cache.get(&CacheKey::new(OWNER, REPO, "main")).await;
        assert_eq!(cached, ids(&["m3", "m2", "m1", "base"]));
        let cached = finder.cache.get(&CacheKey::new(OWNER, REPO, "dev")).await;
        assert_eq!(cached, ids(&["d3", "d2", "d1", "m2"]));
    }

    #[tokio::test]
    async fn disjoint_histories_terminate_empty() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "branch1", 1, &["commitA1", "commitA2", "commitA3"]);
        expect_page(&mut fetcher, "branch2", 1, &["commitB1", "commitB2", "commitB3"]);
        expect_page(&mut fetcher, "branch1", 2, &[]);
        expect_page(&mut fetcher, "branch2", 2, &[]);

        let mut cache = empty_cache();
        cache.expect_put().times(2).returning(|_, _| Ok(()));

        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("branch1", "branch2").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn exhausted_branch_is_not_refetched() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "short", 1, &["s1", "root"]);
        expect_page(&mut fetcher, "long", 1, &["l4", "l3"]);
        expect_page(&mut fetcher, "short", 2, &[]);
        expect_page(&mut fetcher, "long", 2, &["l2", "l1"]);
        expect_page(&mut fetcher, "long", 3, &["root"]);

        let cache = MemoryHistoryCache::new(Duration::from_secs(600));
        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("short", "long").await.unwrap();
        assert_eq!(result, set(&["root"]));
    }

    #[tokio::test]
    async fn empty_branch_ends_after_first_round() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "branchA", 1, &["commitA1", "commitA2", "commitA3"]);
        expect_page(&mut fetcher, "branchB", 1, &[]);

        let mut cache = empty_cache();
        cache.expect_put().times(2).returning(|_, _| Ok(()));

        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("branchA", "branchB").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn max_pages_bounds_the_search() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "a", 1, &["a2"]);
        expect_page(&mut fetcher, "b", 1, &["b2"]);
        expect_page(&mut fetcher, "a", 2, &["a1"]);
        expect_page(&mut fetcher, "b", 2, &["b1"]);

        let config = config().with_max_pages(Some(2));
        let finder = LastCommonCommitsFinder::connect(
            config,
            &allowing_verifier(),
            fetcher,
            MemoryHistoryCache::new(Duration::from_secs(600)),
        )
        .await
        .unwrap();
        let result = finder.find_last_common_commits("a", "b").await.unwrap();
        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn connection_failure_propagates_without_caching() {
        let mut fetcher = MockFetcher::new();
        fetcher
            .expect_fetch_commits()
            .withf(|b: &str, p: &u32| b == "branchA" && *p == 1)
            .returning(|_, _| Err(FinderError::Connection("Error".into())));
        fetcher
            .expect_fetch_commits()
            .withf(|b: &str, _: &u32| b == "branchB")
            .returning(|_, _| Ok(ids(&["commitB1"])));

        let mut cache = empty_cache();
        cache.expect_put().never();

        let finder = build_finder(fetcher, cache).await;
        let err = finder.find_last_common_commits("branchA", "branchB").await.unwrap_err();
        assert!(matches!(err, FinderError::Connection(_)));
    }

    #[tokio::test]
    async fn timeout_on_later_page_discards_history() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "branchA", 1, &["a1"]);
        expect_page(&mut fetcher, "branchB", 1, &["b1"]);
        fetcher
            .expect_fetch_commits()
            .withf(|_: &str, p: &u32| *p == 2)
            .returning(|_, _| Err(FinderError::Timeout("Error".into())));

        let cache = MemoryHistoryCache::new(Duration::from_secs(600));
        let finder = build_finder(fetcher, cache).await;
        let err = finder.find_last_common_commits("branchA", "branchB").await.unwrap_err();
        assert!(matches!(err, FinderError::Timeout(_)));
        assert!(finder.cache.is_empty());
    }

    #[tokio::test]
    async fn cache_write_failure_keeps_result() {
        let mut fetcher = MockFetcher::new();
        expect_page(&mut fetcher, "branchA", 1, &["a1", "common"]);
        expect_page(&mut fetcher, "branchB", 1, &["common"]);

        let mut cache = empty_cache();
        cache
            .expect_put()
            .times(2)
            .returning(|_, _| Err(CacheError::Poisoned));

        let finder = build_finder(fetcher, cache).await;
        let result = finder.find_last_common_commits("branchA", "branchB").await.unwrap();
        assert_eq!(result, set(&["common"]));
    }

    #[tokio::test]
    async fn rejects_empty_branch_name() {
        let mut fetcher = MockFetcher::new();
        fetcher.expect_fetch_commits().never();
        let finder = build_finder(fetcher, empty_cache()).await;
        let err = finder.find_last_common_commits("", "main").await.unwrap_err();
        assert!(matches!(err, FinderError::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn unauthorized_token_refuses_construction() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_user_exists()
            .returning(|_| Err(FinderError::Unauthorized));
        verifier.expect_repo_accessible().never();

        let result = LastCommonCommitsFinder::connect(
            FinderConfig::new(OWNER, REPO).with_token(Some("invalidToken".into())),
            &verifier,
            MockFetcher::new(),
            MockCache::new(),
        )
        .await;
        assert!(matches!(result, Err(FinderError::Unauthorized)));
    }

    #[tokio::test]
    async fn missing_user_refuses_construction() {
        let mut verifier = MockVerifier::new();
        verifier
            .expect_user_exists()
            .withf(|owner: &str| owner == "nonexistentUser")
            .returning(|_| Ok(false));
        verifier.expect_repo_accessible().never();

        let result = LastCommonCommitsFinder::connect(
            FinderConfig::new("nonexistentUser", REPO),
            &verifier,
            MockFetcher::new(),
            MockCache::new(),
        )
        .await;
        match result {
            Err(FinderError::UserNotFound(owner)) => assert_eq!(owner, "nonexistentUser"),
            Err(e) => panic!("unexpected error: {}", e),
            Ok(_) => panic!("finder built for a missing user"),
        }
    }

    #[tokio::test]
    async fn inaccessible_repo_refuses_construction() {
        let mut verifier = MockVerifier::new();
        verifier.expect_user_exists().returning(|_| Ok(true));
        verifier
            .expect_repo_accessible()
            .withf(|owner: &str, repo: &str| owner == OWNER && repo == "restrictedRepo")
            .returning(|_, _| Ok(false));

        let result = LastCommonCommitsFinder::connect(
            FinderConfig::new(OWNER, "restrictedRepo"),
            &verifier,
            MockFetcher::new(),
            MockCache::new(),
        )
        .await;
        assert!(matches!(result, Err(FinderError::RepoInaccessible { .. })));
    }

    /// Answers every page with `[common, <branch>]` after `delay`.
    struct DelayedFetcher {
        delay: Duration,
    }

    #[async_trait]
    impl PageFetcher for DelayedFetcher {
        async fn fetch_commits(&self, branch: &str, _page: u32) -> Result<CommitSequence> {
            tokio::time::sleep(self.delay).await;
            Ok(ids(&["common", branch]))
        }
    }

    /// In-memory cache whose writes take `delay`.
    struct SlowWriteCache {
        inner: MemoryHistoryCache,
        delay: Duration,
    }

    #[async_trait]
    impl HistoryCache for SlowWriteCache {
        async fn get(&self, key: &CacheKey) -> CommitSequence {
            self.inner.get(key).await
        }

        async fn put(
            &self,
            key: &CacheKey,
            commits: &[CommitId],
        ) -> std::result::Result<(), CacheError> {
            tokio::time::sleep(self.delay).await;
            self.inner.put(key, commits).await
        }

        async fn close(&self) {
            self.inner.close().await
        }
    }

    #[tokio::test]
    async fn deadline_stops_stalled_paging_without_caching() {
        let mut cache = empty_cache();
        cache.expect_put().never();

        let finder = LastCommonCommitsFinder::connect(
            config().with_lookup_timeout(Some(Duration::from_millis(50))),
            &allowing_verifier(),
            DelayedFetcher {
                delay: Duration::from_secs(5),
            },
            cache,
        )
        .await
        .unwrap();
        let err = finder.find_last_common_commits("a", "b").await.unwrap_err();
        assert!(matches!(err, FinderError::Timeout(_)));
    }

    #[tokio::test]
    async fn slow_cache_write_outlasting_deadline_keeps_result() {
        let cache = SlowWriteCache {
            inner: MemoryHistoryCache::new(Duration::from_secs(600)),
            delay: Duration::from_millis(150),
        };
        let finder = LastCommonCommitsFinder::connect(
            config().with_lookup_timeout(Some(Duration::from_millis(50))),
            &allowing_verifier(),
            DelayedFetcher {
                delay: Duration::ZERO,
            },
            cache,
        )
        .await
        .unwrap();

        let result = finder.find_last_common_commits("a", "b").await.unwrap();
        assert_eq!(result, set(&["common"]));

        let written_a = finder.cache.inner.get(&CacheKey::new(OWNER, REPO, "a")).await;
        let written_b = finder.cache.inner.get(&CacheKey::new(OWNER, REPO, "b")).await;
        assert_eq!(written_a, ids(&["common", "a"]));
        assert_eq!(written_b, ids(&["common", "b"]));
    }
}
