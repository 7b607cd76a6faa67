use std::time::Duration;

pub const DEFAULT_API_URL: &str = "https://api.github.com";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(10 * 60);

/// Repository coordinates and tuning, bound once when a finder is built.
#[derive(Debug, Clone)]
pub struct FinderConfig {
    pub owner: String,
    pub repo: String,
    pub token: Option<String>,
    pub api_url: String,
    /// Applied to both connect and read.
    pub request_timeout: Duration,
    pub cache_ttl: Duration,
    /// Page size requested from the host. `None` keeps the host default.
    pub per_page: Option<u32>,
    /// Upper bound on pagination rounds for one lookup.
    pub max_pages: Option<u32>,
    /// Deadline for the paging phase of one lookup. Cache reads and
    /// write-back run outside it.
    pub lookup_timeout: Option<Duration>,
}

impl FinderConfig {
    pub fn new(owner: impl Into<String>, repo: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            repo: repo.into(),
            token: None,
            api_url: DEFAULT_API_URL.to_string(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            cache_ttl: DEFAULT_CACHE_TTL,
            per_page: None,
            max_pages: None,
            lookup_timeout: None,
        }
    }

    /// Empty tokens are treated as anonymous access.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_per_page(mut self, per_page: Option<u32>) -> Self {
        self.per_page = per_page;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    pub fn with_lookup_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.lookup_timeout = timeout;
        self
    }
}
