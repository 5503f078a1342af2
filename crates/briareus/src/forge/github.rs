//! GitHub-style forge dialect.
//!
//! Grounded on `examples/original_source/Briareus/VCS/GitRepo.py`'s
//! `GitHubInfo` for exact field semantics (PR `number`/`head`, `branches`,
//! `.../contents/<path>`, typed submodule entries) and on the teacher's
//! `github.rs` for the Rust client-construction idiom (header-carrying
//! `ClientWithMiddleware`, `#[instrument]` on public async methods).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::StatusCode;
use reqwest_middleware::ClientBuilder;
use serde_json::Value;
use tracing::instrument;

use crate::model::{PRInfo, RepoDesc, SourceUrl};

use super::cache::{CachedBody, UrlCache};
use super::{Forge, ForgeError, RefInfo, SubmoduleRef, USER_AGENT};

pub(crate) struct GitHubClient {
    api_base: String,
    client: reqwest_middleware::ClientWithMiddleware,
    cache: UrlCache,
}

impl GitHubClient {
    /// `host` is the API base, e.g. `https://api.github.com` or
    /// `https://ghe.example.com/api/v3`. `token` is the bearer token half
    /// of the `user:token` `BRIAREUS_PAT` tokenspec.
    pub(crate) fn new(api_base: &str, token: &str) -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {token}"))?,
        );
        headers.insert("X-GitHub-Api-Version", HeaderValue::from_static("2022-11-28"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/vnd.github+json"));

        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .expect("couldn't build GitHub HTTP client");

        let client = ClientBuilder::new(inner).build();

        Ok(Self {
            api_base: api_base.trim_end_matches('/').to_string(),
            client,
            cache: UrlCache::new(),
        })
    }

    fn repo_path(&self, repo: &RepoDesc) -> Result<(String, String), ForgeError> {
        owner_repo(&repo.url).ok_or_else(|| ForgeError::UrlTranslation {
            url: repo.url.clone(),
        })
    }

    async fn get_json(&self, url: &str, allow_404: bool) -> Result<Option<Value>, ForgeError> {
        match self.cache.get_json(&self.client, url, allow_404).await? {
            Some(CachedBody::Json(v)) => Ok(Some(v)),
            Some(CachedBody::NotFound) => Ok(None),
            None => Ok(None),
        }
    }
}

/// Extracts `(owner, repo)` from a GitHub-style HTTPS or SSH clone URL.
fn owner_repo(url: &str) -> Option<(String, String)> {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .map(|rest| rest.splitn(2, '/').nth(1))
        .unwrap_or_else(|| url.split_once(':').map(|(_, path)| path));

    let path = stripped?.trim_end_matches(".git").trim_end_matches('/');
    let (owner, repo) = path.split_once('/')?;
    Some((owner.to_string(), repo.to_string()))
}

#[async_trait]
impl Forge for GitHubClient {
    #[instrument(skip(self, repo))]
    async fn get_branches(&self, repo: &RepoDesc) -> Result<Vec<RefInfo>, ForgeError> {
        let (owner, name) = self.repo_path(repo)?;
        let url = format!("{}/repos/{owner}/{name}/branches", self.api_base);

        let Some(Value::Array(branches)) = self.get_json(&url, false).await.map_err(|e| {
            ForgeError::ListBranches {
                source: Box::new(e),
                repo: repo.name.clone(),
            }
        })?
        else {
            return Ok(vec![]);
        };

        Ok(branches
            .into_iter()
            .filter_map(|b| {
                let name = b.get("name")?.as_str()?.to_string();
                let sha = b.get("commit")?.get("sha")?.as_str()?.to_string();
                Some(RefInfo { name, sha })
            })
            .collect())
    }

    #[instrument(skip(self, repo))]
    async fn get_pullreqs(&self, repo: &RepoDesc) -> Result<Vec<PRInfo>, ForgeError> {
        let (owner, name) = self.repo_path(repo)?;
        let url = format!("{}/repos/{owner}/{name}/pulls?state=open", self.api_base);

        let Some(Value::Array(prs)) = self.get_json(&url, false).await.map_err(|e| {
            ForgeError::ListPullreqs {
                source: Box::new(e),
                repo: repo.name.clone(),
            }
        })?
        else {
            return Ok(vec![]);
        };

        Ok(prs
            .into_iter()
            // `merged_at` is present (non-null) once a PR has been merged,
            // even though GitHub still reports `state: "open"` briefly in
            // that window; exclude those, matching GitRepo.py's filter.
            .filter(|pr| {
                pr.get("state").and_then(Value::as_str) == Some("open")
                    && pr.get("merged_at").map(Value::is_null).unwrap_or(true)
            })
            .filter_map(|pr| {
                let ident = pr.get("number")?.as_u64()?.to_string();
                let head = pr.get("head")?;
                let branch = head.get("ref")?.as_str()?.to_string();
                let source_url = head
                    .get("repo")
                    .and_then(|r| r.get("html_url"))
                    .and_then(Value::as_str)
                    .map(|s| SourceUrl::Concrete(s.to_string()))?;
                let title = pr.get("title")?.as_str()?.to_string();
                let user = pr
                    .get("user")
                    .and_then(|u| u.get("login"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                Some(PRInfo {
                    target_repo: repo.name.clone(),
                    source_url,
                    branch,
                    ident,
                    title,
                    user,
                    // GitHub's pull-request payload carries no email; the
                    // Gatherer fills it in with a follow-up `get_user_email`
                    // call once it resolves the PR's source.
                    email: String::new(),
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_user_email(&self, user: &str) -> Result<String, ForgeError> {
        let url = format!("{}/users/{user}", self.api_base);
        Ok(self
            .get_json(&url, true)
            .await?
            .and_then(|v| v.get("email").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_default())
    }

    #[instrument(skip(self, repo))]
    async fn get_file(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ForgeError> {
        let (owner, name) = self.repo_path(repo)?;
        let url = format!(
            "{}/repos/{owner}/{name}/contents/{path}?ref={git_ref}",
            self.api_base
        );

        let resp = self
            .client
            .get(&url)
            .header(ACCEPT, "application/vnd.github.raw+json")
            .send()
            .await?;

        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            status => Err(ForgeError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            }),
        }
    }

    #[instrument(skip(self, repo))]
    async fn get_submodule_info(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<SubmoduleRef>, ForgeError> {
        let (owner, name) = self.repo_path(repo)?;
        let url = format!(
            "{}/repos/{owner}/{name}/contents/{path}?ref={git_ref}",
            self.api_base
        );

        let Some(entry) = self.get_json(&url, true).await? else {
            return Ok(None);
        };

        if entry.get("type").and_then(Value::as_str) != Some("submodule") {
            return Ok(None);
        }

        let url = entry
            .get("submodule_git_url")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let revision = entry
            .get("sha")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        Ok(Some(SubmoduleRef { url, revision }))
    }

    /// GitHub's PR payload already carries a concrete source URL, so this
    /// dialect never produces a `DifferentProject` reference; treat the
    /// input as already-resolved.
    async fn resolve_project_url(&self, project_ref: &str) -> Result<Option<String>, ForgeError> {
        Ok(Some(project_ref.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_repo_from_https_url() {
        assert_eq!(
            owner_repo("https://github.com/acme/widget.git"),
            Some(("acme".to_string(), "widget".to_string()))
        );
        assert_eq!(
            owner_repo("https://github.com/acme/widget"),
            Some(("acme".to_string(), "widget".to_string()))
        );
    }

    #[test]
    fn owner_repo_from_ssh_url() {
        assert_eq!(
            owner_repo("git@github.com:acme/widget.git"),
            Some(("acme".to_string(), "widget".to_string()))
        );
    }
}
