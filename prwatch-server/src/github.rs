use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware, RequestBuilder};
use serde::Deserialize;
use tracing::{error, info};

use prwatch_core::{CommitSha, PullRequestReview, PullRequestSummary, RepoRef, StatusProvider};

use crate::recording::{RecordingLogger, RecordingMiddleware, ServiceType};

pub const DEFAULT_GITHUB_API_URL: &str = "https://api.github.com";

/// GitHub's maximum page size.
const REVIEWS_PER_PAGE: usize = 100;

/// GitHub REST client used as the pull-request status source.
#[derive(Clone)]
pub struct GitHubClient {
    client: ClientWithMiddleware,
    api_base: String,
    token: String,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestResponse {
    pub number: u64,
    pub title: String,
    pub head: PullRequestRefResponse,
    #[serde(default)]
    pub merged: Option<bool>,
}

#[derive(Debug, Deserialize)]
pub struct PullRequestRefResponse {
    pub sha: String,
}

#[derive(Debug, Deserialize)]
pub struct CombinedStatusResponse {
    pub state: Option<String>,
    #[serde(default)]
    pub total_count: u64,
}

#[derive(Debug, Deserialize)]
pub struct ReviewResponse {
    pub state: String,
    pub user: Option<ReviewUser>,
}

#[derive(Debug, Deserialize)]
pub struct ReviewUser {
    pub login: String,
}

impl GitHubClient {
    pub fn new(
        api_base: &str,
        token: String,
        request_timeout: Duration,
        recording_logger: Option<RecordingLogger>,
    ) -> Result<Self> {
        Ok(Self {
            client: create_github_client(request_timeout, recording_logger)?,
            api_base: api_base.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> RequestBuilder {
        self.client
            .get(url)
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, what: &str) -> Result<T> {
        let response = self
            .get(url)
            .send()
            .await
            .with_context(|| format!("Failed to send {} request", what))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .context("Failed to read error response body")?;
            error!("GitHub API error fetching {}: {} - {}", what, status, error_text);
            return Err(anyhow!(
                "GitHub API error fetching {}: {} - {}",
                what,
                status,
                error_text
            ));
        }

        response
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", what))
    }

    pub async fn get_pull_request(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<PullRequestResponse> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}",
            self.api_base, repo.owner, repo.name, pr_number
        );

        info!("Fetching PR #{} from {}", pr_number, repo);

        let pr: PullRequestResponse = self.get_json(&url, "pull request").await?;

        info!(
            "Fetched PR #{} (head: {}, title: {:?})",
            pr.number, pr.head.sha, pr.title
        );

        Ok(pr)
    }

    pub async fn get_combined_status(
        &self,
        repo: &RepoRef,
        sha: &CommitSha,
    ) -> Result<CombinedStatusResponse> {
        let url = format!(
            "{}/repos/{}/{}/commits/{}/status",
            self.api_base, repo.owner, repo.name, sha
        );

        let status: CombinedStatusResponse = self.get_json(&url, "combined status").await?;

        info!(
            "Combined status of {} at {}: {} ({} contexts)",
            repo,
            sha.short(),
            status.state.as_deref().unwrap_or("none"),
            status.total_count
        );

        Ok(status)
    }

    /// `GET /pulls/{n}/merge` answers 204 when merged and 404 when not.
    pub async fn check_merged(&self, repo: &RepoRef, pr_number: u64) -> Result<bool> {
        let url = format!(
            "{}/repos/{}/{}/pulls/{}/merge",
            self.api_base, repo.owner, repo.name, pr_number
        );

        let response = self
            .get(&url)
            .send()
            .await
            .context("Failed to send merge check request")?;

        match response.status() {
            StatusCode::NO_CONTENT => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            status => {
                let error_text = response
                    .text()
                    .await
                    .context("Failed to read error response body")?;
                error!(
                    "GitHub API error checking merge state: {} - {}",
                    status, error_text
                );
                Err(anyhow!(
                    "GitHub API error checking merge state: {} - {}",
                    status,
                    error_text
                ))
            }
        }
    }

    /// All reviews of a pull request, oldest first, across every page.
    pub async fn list_reviews(
        &self,
        repo: &RepoRef,
        pr_number: u64,
    ) -> Result<Vec<ReviewResponse>> {
        let mut all_reviews = Vec::new();
        let mut page = 1;

        loop {
            let url = format!(
                "{}/repos/{}/{}/pulls/{}/reviews?page={}&per_page={}",
                self.api_base, repo.owner, repo.name, pr_number, page, REVIEWS_PER_PAGE
            );

            let reviews: Vec<ReviewResponse> = self.get_json(&url, "reviews").await?;
            let count = reviews.len();
            all_reviews.extend(reviews);

            // A short page is the last one.
            if count < REVIEWS_PER_PAGE {
                break;
            }
            page += 1;
        }

        info!(
            "Fetched {} review(s) of PR #{} in {}",
            all_reviews.len(),
            pr_number,
            repo
        );

        Ok(all_reviews)
    }
}

#[async_trait]
impl StatusProvider for GitHubClient {
    async fn head_commit(&self, repo: &RepoRef, pr_number: u64) -> Result<CommitSha> {
        let pr = self.get_pull_request(repo, pr_number).await?;
        Ok(CommitSha::from(pr.head.sha))
    }

    async fn combined_ci_status(
        &self,
        repo: &RepoRef,
        commit: &CommitSha,
    ) -> Result<Option<String>> {
        Ok(self.get_combined_status(repo, commit).await?.state)
    }

    async fn is_merged(&self, repo: &RepoRef, pr_number: u64) -> Result<bool> {
        self.check_merged(repo, pr_number).await
    }

    async fn reviews(&self, repo: &RepoRef, pr_number: u64) -> Result<Vec<PullRequestReview>> {
        Ok(self
            .list_reviews(repo, pr_number)
            .await?
            .into_iter()
            .map(|review| PullRequestReview {
                state: review.state,
                reviewer: review.user.map(|u| u.login),
            })
            .collect())
    }

    async fn title(&self, repo: &RepoRef, pr_number: u64) -> Result<String> {
        Ok(self.get_pull_request(repo, pr_number).await?.title)
    }

    async fn pull_request(&self, repo: &RepoRef, pr_number: u64) -> Result<PullRequestSummary> {
        let pr = self.get_pull_request(repo, pr_number).await?;
        Ok(PullRequestSummary {
            head: CommitSha::from(pr.head.sha),
            title: pr.title,
        })
    }
}

pub fn create_github_client(
    request_timeout: Duration,
    recording_logger: Option<RecordingLogger>,
) -> Result<ClientWithMiddleware> {
    let client = Client::builder()
        .user_agent(concat!("prwatch/", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .build()
        .context("Failed to create GitHub HTTP client")?;

    let mut builder = ClientBuilder::new(client);

    if let Some(logger) = recording_logger {
        builder = builder.with(RecordingMiddleware::new(logger, ServiceType::GitHub));
    }

    Ok(builder.build())
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;
    use prwatch_core::{classify_review, ReviewStatus};
    use serde_json::json;

    fn client(server: &MockServer) -> GitHubClient {
        GitHubClient::new(
            &server.base_url(),
            "ghp_test".to_string(),
            Duration::from_secs(5),
            None,
        )
        .unwrap()
    }

    fn acme() -> RepoRef {
        RepoRef::new("acme", "widgets")
    }

    #[tokio::test]
    async fn test_head_commit_and_title() {
        let server = MockServer::start();
        let pull = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/pulls/42")
                .header("authorization", "Bearer ghp_test");
            then.status(200).json_body(json!({
                "number": 42,
                "title": "Add widgets",
                "head": {"sha": "abc1234", "ref": "feature"},
                "merged": false
            }));
        });
        let github = client(&server);

        assert_eq!(github.head_commit(&acme(), 42).await.unwrap().0, "abc1234");
        assert_eq!(github.title(&acme(), 42).await.unwrap(), "Add widgets");
        pull.assert_hits(2);
    }

    #[tokio::test]
    async fn test_pull_request_reads_head_and_title_once() {
        let server = MockServer::start();
        let pull = server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/42");
            then.status(200).json_body(json!({
                "number": 42,
                "title": "Add widgets",
                "head": {"sha": "abc1234"},
                "merged": false
            }));
        });
        let github = client(&server);

        let summary = github.pull_request(&acme(), 42).await.unwrap();

        assert_eq!(summary.head, CommitSha::from("abc1234"));
        assert_eq!(summary.title, "Add widgets");
        pull.assert_hits(1);
    }

    #[tokio::test]
    async fn test_combined_status() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/commits/abc1234/status");
            then.status(200)
                .json_body(json!({"state": "success", "total_count": 2, "statuses": []}));
        });
        let github = client(&server);

        let state = github
            .combined_ci_status(&acme(), &CommitSha::from("abc1234"))
            .await
            .unwrap();
        assert_eq!(state.as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn test_is_merged() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/1/merge");
            then.status(204);
        });
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/2/merge");
            then.status(404).json_body(json!({"message": "Not Found"}));
        });
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/3/merge");
            then.status(401).json_body(json!({"message": "Bad credentials"}));
        });
        let github = client(&server);

        assert!(github.is_merged(&acme(), 1).await.unwrap());
        assert!(!github.is_merged(&acme(), 2).await.unwrap());
        assert!(github.is_merged(&acme(), 3).await.is_err());
    }

    #[tokio::test]
    async fn test_reviews_keep_api_order() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/pulls/42/reviews")
                .query_param("page", "1")
                .query_param("per_page", "100");
            then.status(200).json_body(json!([
                {"id": 1, "state": "APPROVED", "user": {"login": "alice"}},
                {"id": 2, "state": "CHANGES_REQUESTED", "user": {"login": "bob"}},
                {"id": 3, "state": "COMMENTED", "user": null}
            ]));
        });
        let github = client(&server);

        let reviews = github.reviews(&acme(), 42).await.unwrap();

        let states: Vec<&str> = reviews.iter().map(|r| r.state.as_str()).collect();
        assert_eq!(states, vec!["APPROVED", "CHANGES_REQUESTED", "COMMENTED"]);
        assert_eq!(reviews[0].reviewer.as_deref(), Some("alice"));
        assert_eq!(reviews[2].reviewer, None);
    }

    #[tokio::test]
    async fn test_reviews_follow_pages() {
        let server = MockServer::start();
        let first_page: Vec<serde_json::Value> = (0..100)
            .map(|id| json!({"id": id, "state": "APPROVED", "user": {"login": "alice"}}))
            .collect();
        let page_one = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/pulls/42/reviews")
                .query_param("page", "1");
            then.status(200).json_body(json!(first_page));
        });
        let page_two = server.mock(|when, then| {
            when.method(GET)
                .path("/repos/acme/widgets/pulls/42/reviews")
                .query_param("page", "2");
            then.status(200).json_body(json!([
                {"id": 100, "state": "CHANGES_REQUESTED", "user": {"login": "bob"}}
            ]));
        });
        let github = client(&server);

        let reviews = github.reviews(&acme(), 42).await.unwrap();

        assert_eq!(reviews.len(), 101);
        assert_eq!(reviews[100].state, "CHANGES_REQUESTED");
        assert_eq!(
            classify_review(false, &reviews),
            Some(ReviewStatus::ChangesRequested)
        );
        page_one.assert();
        page_two.assert();
    }

    #[tokio::test]
    async fn test_api_error_is_reported() {
        let server = MockServer::start();
        server.mock(|when, then| {
            when.method(GET).path("/repos/acme/widgets/pulls/9");
            then.status(403).body("rate limited");
        });
        let github = client(&server);

        let err = github.title(&acme(), 9).await.unwrap_err();
        assert!(err.to_string().contains("403"));
    }
}
