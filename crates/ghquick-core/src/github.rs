//! GitHub REST API client for repositories and pull requests.

use std::fmt;

use reqwest::header::ACCEPT;
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument};

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_API_VERSION: &str = "2022-11-28";
const USER_AGENT: &str = concat!("ghquick/", env!("CARGO_PKG_VERSION"));

/// Errors from the remote host API.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{operation}: not found")]
    NotFound { operation: &'static str },

    #[error("{operation} failed with HTTP {status}: {message}")]
    Http {
        operation: &'static str,
        status: u16,
        message: String,
    },

    #[error("{operation} failed: {message}")]
    Network {
        operation: &'static str,
        message: String,
    },

    #[error("pull request #{0} is not mergeable")]
    NotMergeable(u64),
}

/// A hosted repository.
#[derive(Debug, Clone, Deserialize)]
pub struct Repository {
    pub name: String,
    #[serde(default)]
    pub private: bool,
    #[serde(default)]
    pub html_url: String,
}

/// A pull request.
#[derive(Debug, Clone, Deserialize)]
pub struct PullRequest {
    pub number: u64,
    pub title: String,
    pub html_url: String,
    /// `None` while the host is still computing mergeability.
    #[serde(default)]
    pub mergeable: Option<bool>,
    #[serde(default)]
    pub state: String,
}

/// What [`GitHubClient::ensure_repository`] had to do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryStatus {
    Existing,
    VisibilityUpdated,
    Created,
}

#[derive(Debug, Serialize)]
struct CreateRepository<'a> {
    name: &'a str,
    private: bool,
    auto_init: bool,
}

#[derive(Debug, Serialize)]
struct EditRepository {
    private: bool,
}

#[derive(Debug, Serialize)]
struct CreatePullRequest<'a> {
    title: &'a str,
    body: &'a str,
    head: &'a str,
    base: &'a str,
}

#[derive(Debug, Serialize)]
struct MergePullRequest {
    merge_method: &'static str,
}

#[derive(Debug, Deserialize)]
struct MergeResult {
    #[serde(default)]
    merged: bool,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

/// GitHub API client scoped to one owner.
#[derive(Clone)]
pub struct GitHubClient {
    token: String,
    owner: String,
    base_url: String,
    client: reqwest::Client,
}

impl fmt::Debug for GitHubClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GitHubClient")
            .field("token", &"***")
            .field("owner", &self.owner)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl GitHubClient {
    /// Create a client authenticated with `token` acting for `owner`.
    ///
    /// # Errors
    ///
    /// Returns `ApiError::Network` if the HTTP client cannot be built.
    pub fn new(token: impl Into<String>, owner: impl Into<String>) -> Result<Self, ApiError> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ApiError::Network {
                operation: "build HTTP client",
                message: e.to_string(),
            })?;
        Ok(Self {
            token: token.into(),
            owner: owner.into(),
            base_url: GITHUB_API_BASE.to_owned(),
            client,
        })
    }

    /// Point the client at another API base URL.
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_owned();
        self
    }

    fn repo_url(&self, repo: &str, path: &str) -> String {
        format!("{}/repos/{}/{repo}{path}", self.base_url, self.owner)
    }

    async fn send<T: DeserializeOwned>(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<T, ApiError> {
        let response = request
            .header(ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", GITHUB_API_VERSION)
            .bearer_auth(&self.token)
            .send()
            .await
            .map_err(|e| ApiError::Network {
                operation,
                message: e.to_string(),
            })?;

        let status = response.status();
        debug!(operation, status = status.as_u16(), "GitHub API response");

        if status == StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound { operation });
        }
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<ErrorBody>(&text)
                .map(|body| body.message)
                .unwrap_or(text);
            return Err(ApiError::Http {
                operation,
                status: status.as_u16(),
                message,
            });
        }

        response.json().await.map_err(|e| ApiError::Network {
            operation,
            message: format!("invalid response: {e}"),
        })
    }

    /// Fetch a repository owned by this client's owner.
    pub async fn get_repository(&self, repo: &str) -> Result<Repository, ApiError> {
        let request = self.client.get(self.repo_url(repo, ""));
        self.send("get repository", request).await
    }

    /// Create a repository for the authenticated user, without an initial commit.
    pub async fn create_repository(&self, repo: &str, private: bool) -> Result<Repository, ApiError> {
        let body = CreateRepository {
            name: repo,
            private,
            auto_init: false,
        };
        let request = self
            .client
            .post(format!("{}/user/repos", self.base_url))
            .json(&body);
        self.send("create repository", request).await
    }

    /// Change a repository's visibility.
    pub async fn set_visibility(&self, repo: &str, private: bool) -> Result<Repository, ApiError> {
        let request = self
            .client
            .patch(self.repo_url(repo, ""))
            .json(&EditRepository { private });
        self.send("update repository", request).await
    }

    /// Make sure `repo` exists with the requested visibility.
    ///
    /// Only a not-found answer leads to creation; any other failure is
    /// returned as is.
    #[instrument(skip(self))]
    pub async fn ensure_repository(
        &self,
        repo: &str,
        private: bool,
    ) -> Result<RepositoryStatus, ApiError> {
        info!("checking if repository exists");
        match self.get_repository(repo).await {
            Ok(existing) if existing.private == private => {
                info!("repository exists, will append changes");
                Ok(RepositoryStatus::Existing)
            }
            Ok(_) => {
                info!("updating repository visibility");
                self.set_visibility(repo, private).await?;
                info!("repository visibility updated");
                Ok(RepositoryStatus::VisibilityUpdated)
            }
            Err(ApiError::NotFound { .. }) => {
                info!("repository doesn't exist, creating it");
                self.create_repository(repo, private).await?;
                info!("repository created");
                Ok(RepositoryStatus::Created)
            }
            Err(e) => Err(e),
        }
    }

    /// Open a pull request from `head` into `base`.
    #[instrument(skip(self, body))]
    pub async fn create_pull_request(
        &self,
        repo: &str,
        title: &str,
        body: &str,
        head: &str,
        base: &str,
    ) -> Result<PullRequest, ApiError> {
        let request = self
            .client
            .post(self.repo_url(repo, "/pulls"))
            .json(&CreatePullRequest {
                title,
                body,
                head,
                base,
            });
        self.send("create pull request", request).await
    }

    pub async fn get_pull_request(&self, repo: &str, number: u64) -> Result<PullRequest, ApiError> {
        let request = self.client.get(self.repo_url(repo, &format!("/pulls/{number}")));
        self.send("get pull request", request).await
    }

    /// Open pull requests, newest first.
    pub async fn list_open_pull_requests(&self, repo: &str) -> Result<Vec<PullRequest>, ApiError> {
        let request = self.client.get(self.repo_url(
            repo,
            "/pulls?state=open&sort=created&direction=desc",
        ));
        self.send("list pull requests", request).await
    }

    /// Merge a pull request with a merge commit.
    #[instrument(skip(self))]
    pub async fn merge_pull_request(&self, repo: &str, number: u64) -> Result<(), ApiError> {
        let request = self
            .client
            .put(self.repo_url(repo, &format!("/pulls/{number}/merge")))
            .json(&MergePullRequest {
                merge_method: "merge",
            });
        let result: MergeResult = self.send("merge pull request", request).await?;
        if !result.merged {
            return Err(ApiError::NotMergeable(number));
        }
        info!(number, "pull request merged");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stub::StubServer;

    fn client(server: &StubServer) -> GitHubClient {
        GitHubClient::new("ghp_test", "alice")
            .expect("should build client")
            .with_base_url(server.url())
    }

    fn json(body: &str) -> serde_json::Value {
        serde_json::from_str(body).expect("should be json")
    }

    #[tokio::test]
    async fn test_should_keep_existing_repository() {
        let server = StubServer::start(vec![(
            200,
            r#"{"name":"demo","private":false,"html_url":"https://github.com/alice/demo"}"#.to_owned(),
        )])
        .await;

        let status = client(&server)
            .ensure_repository("demo", false)
            .await
            .expect("should succeed");

        assert_eq!(status, RepositoryStatus::Existing);
        let requests = server.requests().await;
        assert_eq!(requests.len(), 1);
        assert!(requests[0].head.starts_with("GET /repos/alice/demo "));
        assert!(requests[0].head.to_lowercase().contains("x-github-api-version: 2022-11-28"));
    }

    #[tokio::test]
    async fn test_should_fix_visibility_of_existing_repository() {
        let server = StubServer::start(vec![
            (200, r#"{"name":"demo","private":false}"#.to_owned()),
            (200, r#"{"name":"demo","private":true}"#.to_owned()),
        ])
        .await;

        let status = client(&server)
            .ensure_repository("demo", true)
            .await
            .expect("should succeed");

        assert_eq!(status, RepositoryStatus::VisibilityUpdated);
        let requests = server.requests().await;
        assert!(requests[1].head.starts_with("PATCH /repos/alice/demo "));
        assert_eq!(json(&requests[1].body)["private"], true);
    }

    #[tokio::test]
    async fn test_should_create_repository_only_when_not_found() {
        let server = StubServer::start(vec![
            (404, r#"{"message":"Not Found"}"#.to_owned()),
            (201, r#"{"name":"demo","private":true}"#.to_owned()),
        ])
        .await;

        let status = client(&server)
            .ensure_repository("demo", true)
            .await
            .expect("should succeed");

        assert_eq!(status, RepositoryStatus::Created);
        let requests = server.requests().await;
        assert!(requests[1].head.starts_with("POST /user/repos "));
        let body = json(&requests[1].body);
        assert_eq!(body["name"], "demo");
        assert_eq!(body["private"], true);
        assert_eq!(body["auto_init"], false);
    }

    #[tokio::test]
    async fn test_should_not_create_repository_on_other_errors() {
        let server = StubServer::start(vec![(
            403,
            r#"{"message":"Resource not accessible by integration"}"#.to_owned(),
        )])
        .await;

        let err = client(&server)
            .ensure_repository("demo", false)
            .await
            .unwrap_err();

        assert!(matches!(err, ApiError::Http { status: 403, .. }));
        assert!(err.to_string().contains("Resource not accessible"));
        assert_eq!(server.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_should_create_pull_request() {
        let server = StubServer::start(vec![(
            201,
            r#"{"number":7,"title":"add tests","html_url":"https://github.com/alice/demo/pull/7","state":"open"}"#
                .to_owned(),
        )])
        .await;

        let pr = client(&server)
            .create_pull_request("demo", "add tests", "body", "update-1", "main")
            .await
            .expect("should create PR");

        assert_eq!(pr.number, 7);
        assert_eq!(pr.html_url, "https://github.com/alice/demo/pull/7");
        let requests = server.requests().await;
        assert!(requests[0].head.starts_with("POST /repos/alice/demo/pulls "));
        let body = json(&requests[0].body);
        assert_eq!(body["head"], "update-1");
        assert_eq!(body["base"], "main");
    }

    #[tokio::test]
    async fn test_should_list_open_pull_requests_newest_first() {
        let server = StubServer::start(vec![(
            200,
            r#"[{"number":9,"title":"b","html_url":"u9"},{"number":8,"title":"a","html_url":"u8"}]"#
                .to_owned(),
        )])
        .await;

        let prs = client(&server)
            .list_open_pull_requests("demo")
            .await
            .expect("should list PRs");

        assert_eq!(prs.iter().map(|p| p.number).collect::<Vec<_>>(), vec![9, 8]);
        let requests = server.requests().await;
        assert!(
            requests[0]
                .head
                .starts_with("GET /repos/alice/demo/pulls?state=open&sort=created&direction=desc ")
        );
    }

    #[tokio::test]
    async fn test_should_read_unknown_mergeability_as_none() {
        let server = StubServer::start(vec![(
            200,
            r#"{"number":3,"title":"t","html_url":"u","mergeable":null}"#.to_owned(),
        )])
        .await;

        let pr = client(&server)
            .get_pull_request("demo", 3)
            .await
            .expect("should get PR");
        assert_eq!(pr.mergeable, None);
    }

    #[tokio::test]
    async fn test_should_merge_with_merge_commit() {
        let server = StubServer::start(vec![(
            200,
            r#"{"sha":"abc","merged":true,"message":"Pull Request successfully merged"}"#.to_owned(),
        )])
        .await;

        client(&server)
            .merge_pull_request("demo", 3)
            .await
            .expect("should merge");

        let requests = server.requests().await;
        assert!(requests[0].head.starts_with("PUT /repos/alice/demo/pulls/3/merge "));
        assert_eq!(json(&requests[0].body)["merge_method"], "merge");
    }

    #[tokio::test]
    async fn test_should_report_unmerged_pull_request() {
        let server = StubServer::start(vec![(200, r#"{"merged":false}"#.to_owned())]).await;

        let err = client(&server)
            .merge_pull_request("demo", 3)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::NotMergeable(3)));
    }
}
