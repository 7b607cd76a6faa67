//! last-common-commits - find the newest commits shared by two GitHub branches
//!
//! # Usage
//! ```bash
//! last-common-commits octocat hello-world main dev
//! GITHUB_TOKEN=... last-common-commits octocat hello-world main dev --per-page 100
//! last-common-commits octocat hello-world main dev --no-persist
//! ```

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use last_common_commits::config::{DEFAULT_API_URL, DEFAULT_CACHE_TTL, DEFAULT_REQUEST_TIMEOUT};
use last_common_commits::{
    create_finder, CommonCommitsFinder, FileHistoryCache, FinderConfig, HistoryCache,
    MemoryHistoryCache,
};

/// Find the last common commits of two branches of a GitHub repository
#[derive(Parser)]
#[command(name = "last-common-commits")]
#[command(
    about = "Find the last commits shared by two branches of a GitHub repository",
    long_about = None
)]
struct Cli {
    /// Repository owner (user or organization)
    owner: String,

    /// Repository name
    repo: String,

    /// First branch
    branch_a: String,

    /// Second branch
    branch_b: String,

    /// Personal access token; anonymous access when omitted
    #[arg(short, long, env = "GITHUB_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Base URL of the GitHub REST API
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,

    /// Directory holding the history cache file
    #[arg(long, value_name = "DIR")]
    cache_dir: Option<PathBuf>,

    /// Keep fetched history in memory only
    #[arg(long)]
    no_persist: bool,

    /// Lifetime of cached branch history, in seconds
    #[arg(long, default_value_t = DEFAULT_CACHE_TTL.as_secs())]
    ttl_secs: u64,

    /// Connect and read timeout per request, in seconds
    #[arg(long, default_value_t = DEFAULT_REQUEST_TIMEOUT.as_secs())]
    timeout_secs: u64,

    /// Commits requested per page
    #[arg(long)]
    per_page: Option<u32>,

    /// Stop paging after this many rounds
    #[arg(long)]
    max_pages: Option<u32>,

    /// Deadline for paging through both branches, in seconds
    #[arg(long)]
    deadline_secs: Option<u64>,
}

impl Cli {
    fn config(&self) -> FinderConfig {
        FinderConfig::new(&self.owner, &self.repo)
            .with_token(self.token.clone())
            .with_api_url(&self.api_url)
            .with_request_timeout(Duration::from_secs(self.timeout_secs))
            .with_cache_ttl(Duration::from_secs(self.ttl_secs))
            .with_per_page(self.per_page)
            .with_max_pages(self.max_pages)
            .with_lookup_timeout(self.deadline_secs.map(Duration::from_secs))
    }

    fn cache(&self, ttl: Duration) -> Arc<dyn HistoryCache> {
        if self.no_persist {
            return Arc::new(MemoryHistoryCache::new(ttl));
        }
        let path = match &self.cache_dir {
            Some(dir) => dir.join("cache.json"),
            None => FileHistoryCache::default_path(),
        };
        tracing::debug!("Using history cache at {}", path.display());
        Arc::new(FileHistoryCache::new(path, ttl))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries only commit ids.
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = cli.config();
    let cache = cli.cache(config.cache_ttl);

    let finder = match create_finder(config, cache).await {
        Ok(finder) => finder,
        Err(e) if e.is_precheck() => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
        Err(e) => return Err(e).context("failed to verify repository"),
    };

    // Timeouts and connectivity failures abort; anything else is reported.
    let commits = match finder
        .find_last_common_commits(&cli.branch_a, &cli.branch_b)
        .await
    {
        Ok(commits) => commits,
        Err(e) if e.is_transient() => {
            return Err(e).with_context(|| {
                format!("lookup of {} / {} failed", cli.branch_a, cli.branch_b)
            });
        }
        Err(e) => {
            eprintln!("✗ {}", e);
            std::process::exit(1);
        }
    };

    let mut commits: Vec<_> = commits.into_iter().collect();
    commits.sort();
    for commit in commits {
        println!("{}", commit);
    }

    Ok(())
}
