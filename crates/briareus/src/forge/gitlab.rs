//! GitLab-style forge dialect.
//!
//! Grounded on `examples/original_source/Briareus/VCS/GitRepo.py`'s
//! `GitLabInfo`: `iid`-keyed merge requests, `source_project_id`/
//! `source_project_url` resolution into `SourceUrl::SameProject` /
//! `DifferentProject`, and submodule metadata split across `.gitmodules`
//! (for the URL) and the file blob id (for the pinned revision) — GitLab's
//! `ref` for file lookups must be a commit SHA, never a branch name, for
//! the blob-id reading below to be meaningful.

use async_trait::async_trait;
use reqwest::StatusCode;
use reqwest::header::{HeaderMap, HeaderValue};
use reqwest_middleware::ClientBuilder;
use serde_json::Value;
use tracing::instrument;

use crate::model::{PRInfo, RepoDesc, SourceUrl};

use super::cache::{CachedBody, UrlCache};
use super::{Forge, ForgeError, RefInfo, SubmoduleRef, USER_AGENT};

/// `http` doesn't define `Private-Token` as a well-known header constant,
/// so we fall back to a literal name where `PRIVATE_TOKEN` isn't available.
#[allow(non_upper_case_globals)]
const PRIVATE_TOKEN: &str = "PRIVATE-TOKEN";

pub(crate) struct GitLabClient {
    api_base: String,
    client: reqwest_middleware::ClientWithMiddleware,
    cache: UrlCache,
}

impl GitLabClient {
    /// `host` is the scheme+authority, e.g. `https://gitlab.com`. `token` is
    /// the bare `BRIAREUS_PAT` tokenspec for this host.
    pub(crate) fn new(host: &str, token: &str) -> Result<Self, ForgeError> {
        let mut headers = HeaderMap::new();
        headers.insert(PRIVATE_TOKEN, HeaderValue::from_str(token)?);

        let inner = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .expect("couldn't build GitLab HTTP client");

        let client = ClientBuilder::new(inner).build();

        Ok(Self {
            api_base: format!("{}/api/v4", host.trim_end_matches('/')),
            client,
            cache: UrlCache::new(),
        })
    }

    fn project_url(&self, repo: &RepoDesc, suffix: &str) -> Result<String, ForgeError> {
        let path = project_path(&repo.url).ok_or_else(|| ForgeError::UrlTranslation {
            url: repo.url.clone(),
        })?;
        Ok(format!(
            "{}/projects/{}{suffix}",
            self.api_base,
            encode_path(&path)
        ))
    }

    async fn get_json(&self, url: &str, allow_404: bool) -> Result<Option<Value>, ForgeError> {
        match self.cache.get_json(&self.client, url, allow_404).await? {
            Some(CachedBody::Json(v)) => Ok(Some(v)),
            Some(CachedBody::NotFound) => Ok(None),
            None => Ok(None),
        }
    }
}

/// Extracts the `owner/repo`-style project path from a GitLab clone URL.
fn project_path(url: &str) -> Option<String> {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .map(|rest| rest.splitn(2, '/').nth(1))
        .unwrap_or_else(|| url.split_once(':').map(|(_, path)| path));

    Some(stripped?.trim_end_matches(".git").trim_end_matches('/').to_string())
}

fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

#[async_trait]
impl Forge for GitLabClient {
    #[instrument(skip(self, repo))]
    async fn get_branches(&self, repo: &RepoDesc) -> Result<Vec<RefInfo>, ForgeError> {
        let url = self.project_url(repo, "/repository/branches")?;

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
                let sha = b.get("commit")?.get("id")?.as_str()?.to_string();
                Some(RefInfo { name, sha })
            })
            .collect())
    }

    #[instrument(skip(self, repo))]
    async fn get_pullreqs(&self, repo: &RepoDesc) -> Result<Vec<PRInfo>, ForgeError> {
        let url = self.project_url(repo, "/merge_requests?state=opened")?;

        let Some(Value::Array(mrs)) = self.get_json(&url, false).await.map_err(|e| {
            ForgeError::ListPullreqs {
                source: Box::new(e),
                repo: repo.name.clone(),
            }
        })?
        else {
            return Ok(vec![]);
        };

        let target_project_id = self.get_json(&self.project_url(repo, "")?, false).await?
            .and_then(|v| v.get("id").and_then(Value::as_u64));

        Ok(mrs
            .into_iter()
            .filter(|mr| {
                mr.get("state").and_then(Value::as_str) == Some("opened")
                    && mr.get("merged_at").map(Value::is_null).unwrap_or(true)
            })
            .filter_map(|mr| {
                let ident = mr.get("iid")?.as_u64()?.to_string();
                let branch = mr.get("source_branch")?.as_str()?.to_string();
                let title = mr.get("title")?.as_str()?.to_string();
                let user = mr
                    .get("author")
                    .and_then(|u| u.get("username"))
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();

                let source_url = if let Some(url) =
                    mr.get("source_project_url").and_then(Value::as_str)
                {
                    SourceUrl::Concrete(url.to_string())
                } else {
                    let source_project_id = mr.get("source_project_id").and_then(Value::as_u64);
                    match (source_project_id, target_project_id) {
                        (Some(src), Some(tgt)) if src == tgt => SourceUrl::SameProject,
                        (Some(src), _) => SourceUrl::DifferentProject(src.to_string()),
                        // No source project at all (e.g. a cross-visibility
                        // fork) — the Gatherer will be unable to resolve
                        // this and will drop the PR per SPEC_FULL.md §4.3.
                        (None, _) => SourceUrl::DifferentProject(String::new()),
                    }
                };

                Some(PRInfo {
                    target_repo: repo.name.clone(),
                    source_url,
                    branch,
                    ident,
                    title,
                    user,
                    email: String::new(),
                })
            })
            .collect())
    }

    #[instrument(skip(self))]
    async fn get_user_email(&self, user: &str) -> Result<String, ForgeError> {
        let url = format!("{}/users?username={user}", self.api_base);
        Ok(self
            .get_json(&url, true)
            .await?
            .and_then(|v| v.as_array()?.first()?.get("public_email")?.as_str().map(str::to_string))
            .unwrap_or_default())
    }

    #[instrument(skip(self, repo))]
    async fn get_file(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ForgeError> {
        let url = self.project_url(
            repo,
            &format!("/repository/files/{}/raw?ref={git_ref}", encode_path(path)),
        )?;

        let resp = self.client.get(&url).send().await?;
        match resp.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(resp.bytes().await?.to_vec())),
            status => Err(ForgeError::UnexpectedStatus {
                url,
                status: status.as_u16(),
            }),
        }
    }

    /// `git_ref` MUST be a commit SHA here, not a branch name — GitLab's
    /// file-metadata endpoint reports the blob id pinned at that exact
    /// commit, which is what we need for the submodule's pinned revision.
    #[instrument(skip(self, repo))]
    async fn get_submodule_info(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<SubmoduleRef>, ForgeError> {
        let meta_url = self.project_url(
            repo,
            &format!("/repository/files/{}?ref={git_ref}", encode_path(path)),
        )?;

        let Some(meta) = self.get_json(&meta_url, true).await? else {
            return Ok(None);
        };

        let revision = meta
            .get("blob_id")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        // The submodule's remote URL isn't part of the file-metadata
        // response; it's read from `.gitmodules` itself by the caller
        // (see `gatherer::parse_gitmodules`), which already has the
        // `.gitmodules` text in hand. We return an empty URL here and let
        // the caller fill it in from that parse.
        Ok(Some(SubmoduleRef {
            url: String::new(),
            revision,
        }))
    }

    #[instrument(skip(self))]
    async fn resolve_project_url(&self, project_ref: &str) -> Result<Option<String>, ForgeError> {
        let url = format!("{}/projects/{}", self.api_base, encode_path(project_ref));
        Ok(self
            .get_json(&url, true)
            .await?
            .and_then(|v| v.get("http_url_to_repo").and_then(Value::as_str).map(str::to_string)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn project_path_from_https_url() {
        assert_eq!(
            project_path("https://gitlab.com/acme/widget.git"),
            Some("acme/widget".to_string())
        );
    }

    #[test]
    fn encode_path_escapes_slash() {
        assert_eq!(encode_path("acme/widget"), "acme%2Fwidget");
    }
}
