//! Platform (GitHub) API client.
//!
//! Generalized from the teacher's `crates/shipper/src/registry.rs::RegistryClient`:
//! a `reqwest` client built once with a fixed `user_agent`, methods that
//! match on `StatusCode` to turn HTTP semantics into domain results, and
//! `bail!` on any unexpected status rather than swallowing it. The teacher
//! uses `reqwest::blocking`; the orchestrator runs inside a `tokio`
//! multi-threaded runtime with many concurrent workers, so this is ported
//! to async `reqwest`.

use anyhow::{bail, Context, Result};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;

const USER_AGENT: &str = concat!("agent-runner/", env!("CARGO_PKG_VERSION"));

/// Everything the reconciler/dispatcher/review engine need from the
/// platform, expressed as a trait so tests can substitute a fake
/// implementation instead of standing up a `wiremock` server for every
/// call site.
#[async_trait::async_trait]
pub trait Client: Send + Sync {
    async fn list_labeled_items(&self, owner: &str, repo: &str, label: &str) -> Result<Vec<Value>>;
    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> Result<()>;
    async fn remove_label(&self, owner: &str, repo: &str, number: u64, label: &str) -> Result<()>;
    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<Value>;
    async fn list_comments(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>>;
    async fn list_reviews(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>>;
    async fn list_review_threads(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>>;
    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<Value>;
    async fn merge_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        method: &str,
    ) -> Result<Value>;
    async fn delete_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<()>;
    async fn search_issues(&self, query: &str) -> Result<Vec<Value>>;
    async fn list_org_repos(&self, owner: &str) -> Result<Vec<String>>;
}

pub struct HttpClient {
    http: reqwest::Client,
    token: String,
    base_url: String,
}

impl HttpClient {
    pub fn new(token: String) -> Result<Self> {
        Self::with_base_url(token, "https://api.github.com".to_string())
    }

    pub fn with_base_url(token: String, base_url: String) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building platform HTTP client")?;
        Ok(Self { http, token, base_url })
    }

    fn request(&self, method: Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.token)
            .header("Accept", "application/vnd.github+json")
    }

    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self.request(Method::GET, path).send().await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json::<T>().await?),
            s => bail!("platform API error: GET {path} returned {s}"),
        }
    }
}

#[async_trait::async_trait]
impl Client for HttpClient {
    async fn list_labeled_items(&self, owner: &str, repo: &str, label: &str) -> Result<Vec<Value>> {
        let path = format!("/repos/{owner}/{repo}/issues?labels={label}&state=open&per_page=100");
        self.get_json(&path).await
    }

    async fn add_labels(&self, owner: &str, repo: &str, number: u64, labels: &[String]) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/issues/{number}/labels");
        let resp = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({ "labels": labels }))
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(()),
            s => bail!("platform API error: adding labels on {owner}/{repo}#{number} returned {s}"),
        }
    }

    async fn remove_label(&self, owner: &str, repo: &str, number: u64, label: &str) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/issues/{number}/labels/{label}");
        let resp = self.request(Method::DELETE, &path).send().await?;
        match resp.status() {
            StatusCode::OK | StatusCode::NOT_FOUND => Ok(()),
            s => bail!("platform API error: removing label on {owner}/{repo}#{number} returned {s}"),
        }
    }

    async fn post_comment(&self, owner: &str, repo: &str, number: u64, body: &str) -> Result<Value> {
        let path = format!("/repos/{owner}/{repo}/issues/{number}/comments");
        let resp = self
            .request(Method::POST, &path)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await?;
        match resp.status() {
            StatusCode::CREATED => Ok(resp.json::<Value>().await?),
            s => bail!("platform API error: posting comment on {owner}/{repo}#{number} returned {s}"),
        }
    }

    async fn list_comments(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>> {
        let path = format!("/repos/{owner}/{repo}/issues/{number}/comments?per_page=100");
        self.get_json(&path).await
    }

    async fn list_reviews(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}/reviews?per_page=100");
        self.get_json(&path).await
    }

    async fn list_review_threads(&self, owner: &str, repo: &str, number: u64) -> Result<Vec<Value>> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}/comments?per_page=100");
        self.get_json(&path).await
    }

    async fn get_pull_request(&self, owner: &str, repo: &str, number: u64) -> Result<Value> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}");
        self.get_json(&path).await
    }

    async fn merge_pull_request(
        &self,
        owner: &str,
        repo: &str,
        number: u64,
        method: &str,
    ) -> Result<Value> {
        let path = format!("/repos/{owner}/{repo}/pulls/{number}/merge");
        let resp = self
            .request(Method::PUT, &path)
            .json(&serde_json::json!({ "merge_method": method }))
            .send()
            .await?;
        match resp.status() {
            StatusCode::OK => Ok(resp.json::<Value>().await?),
            s => {
                let detail = resp.text().await.unwrap_or_default();
                bail!("platform API error: merging {owner}/{repo}#{number} returned {s}: {detail}")
            }
        }
    }

    async fn delete_ref(&self, owner: &str, repo: &str, git_ref: &str) -> Result<()> {
        let path = format!("/repos/{owner}/{repo}/git/refs/{git_ref}");
        let resp = self.request(Method::DELETE, &path).send().await?;
        match resp.status() {
            StatusCode::NO_CONTENT | StatusCode::NOT_FOUND => Ok(()),
            s => bail!("platform API error: deleting ref {git_ref} on {owner}/{repo} returned {s}"),
        }
    }

    async fn search_issues(&self, query: &str) -> Result<Vec<Value>> {
        let path = format!("/search/issues?q={query}&per_page=100");
        let body: Value = self.get_json(&path).await?;
        Ok(body
            .get("items")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }

    async fn list_org_repos(&self, owner: &str) -> Result<Vec<String>> {
        let path = format!("/orgs/{owner}/repos?per_page=100&type=all");
        let repos: Vec<Value> = self.get_json(&path).await?;
        Ok(repos
            .into_iter()
            .filter_map(|r| r.get("name").and_then(Value::as_str).map(str::to_string))
            .collect())
    }
}
