use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};

use crate::commits::fetcher::{HostVerifier, PageFetcher};
use crate::config::FinderConfig;
use crate::error::{FinderError, Result};
use crate::models::{ApiErrorBody, CommitListItem, CommitSequence};

const ACCEPT: &str = "application/vnd.github.v3+json";
const USER_AGENT: &str = concat!("last-common-commits/", env!("CARGO_PKG_VERSION"));

/// GitHub REST access for one repository.
pub struct GithubClient {
    http: Client,
    api_url: String,
    owner: String,
    repo: String,
    token: Option<String>,
    per_page: Option<u32>,
}

impl GithubClient {
    pub fn new(config: &FinderConfig) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(config.request_timeout)
            .timeout(config.request_timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| FinderError::Connection(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            api_url: config.api_url.clone(),
            owner: config.owner.clone(),
            repo: config.repo.clone(),
            token: config.token.clone(),
            per_page: config.per_page,
        })
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let request = self
            .http
            .get(format!("{}{}", self.api_url, path))
            .header(reqwest::header::ACCEPT, ACCEPT);
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder, what: &str) -> Result<Response> {
        request.send().await.map_err(|e| transport_error(e, what))
    }

    /// 200 → true, 401 → `Unauthorized`, anything else → false
    async fn resource_exists(&self, path: &str, what: &str) -> Result<bool> {
        let response = self.send(self.get(path), what).await?;
        match response.status() {
            StatusCode::OK => Ok(true),
            StatusCode::UNAUTHORIZED => Err(FinderError::Unauthorized),
            status => {
                tracing::debug!("{} answered {}", what, status);
                Ok(false)
            }
        }
    }
}

fn transport_error(err: reqwest::Error, what: &str) -> FinderError {
    if err.is_timeout() {
        FinderError::Timeout(format!("{}: {}", what, err))
    } else if err.is_decode() {
        FinderError::Decode(format!("{}: {}", what, err))
    } else {
        FinderError::Connection(format!("{}: {}", what, err))
    }
}

#[async_trait]
impl PageFetcher for GithubClient {
    async fn fetch_commits(&self, branch: &str, page: u32) -> Result<CommitSequence> {
        if branch.is_empty() {
            return Err(FinderError::InvalidArgument("branch name must not be empty".into()));
        }
        if page == 0 {
            return Err(FinderError::InvalidArgument("pages are numbered from 1".into()));
        }

        let what = format!("fetching commits for branch {} (page {})", branch, page);
        let mut query = vec![("sha", branch.to_string()), ("page", page.to_string())];
        if let Some(per_page) = self.per_page {
            query.push(("per_page", per_page.to_string()));
        }
        let request = self
            .get(&format!("/repos/{}/{}/commits", self.owner, self.repo))
            .query(&query);
        let response = self.send(request, &what).await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
            return Err(FinderError::repo_inaccessible(&self.owner, &self.repo));
        }
        if !status.is_success() {
            let message = response
                .json::<ApiErrorBody>()
                .await
                .map(|body| body.message)
                .unwrap_or_default();
            return Err(FinderError::Api {
                status: status.as_u16(),
                message,
            });
        }

        let items: Vec<CommitListItem> = response
            .json()
            .await
            .map_err(|e| transport_error(e, &what))?;
        Ok(items.into_iter().map(|item| item.sha).collect())
    }
}

#[async_trait]
impl HostVerifier for GithubClient {
    async fn user_exists(&self, owner: &str) -> Result<bool> {
        self.resource_exists(&format!("/users/{}", owner), &format!("checking user {}", owner))
            .await
    }

    async fn repo_accessible(&self, owner: &str, repo: &str) -> Result<bool> {
        self.resource_exists(
            &format!("/repos/{}/{}", owner, repo),
            &format!("checking repository {}/{}", owner, repo),
        )
        .await
    }
}
