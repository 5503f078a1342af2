//! Dialect-specific forge API clients (§4.1) and the URL/credential
//! translation shared by both.

pub(crate) mod cache;
pub(crate) mod github;
pub(crate) mod gitlab;

use std::collections::HashMap;

use async_trait::async_trait;
use reqwest::header::InvalidHeaderValue;
use thiserror::Error;

use crate::model::{PRInfo, RepoDesc, RepoLoc};

pub(crate) const USER_AGENT: &str = concat!("briareus/", env!("CARGO_PKG_VERSION"));

/// Which forge API dialect a repo's URL resolves to.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub(crate) enum Dialect {
    GitHub,
    GitLab,
}

#[derive(Error, Debug)]
pub(crate) enum ForgeError {
    #[error("request error while accessing forge API")]
    Request(#[from] reqwest::Error),
    #[error("request error while accessing forge API")]
    Middleware(#[from] reqwest_middleware::Error),
    #[error("invalid credential header")]
    InvalidTokenHeader(#[from] InvalidHeaderValue),
    #[error("unexpected status {status} from {url}")]
    UnexpectedStatus { url: String, status: u16 },
    #[error("couldn't translate {url} into a forge API URL")]
    UrlTranslation { url: String },
    #[error("refusing network access to {host} while running offline")]
    Offline { host: String },
    #[error("no credentials configured for host {host}")]
    MissingCredentials { host: String },
    #[error("malformed BRIAREUS_PAT entry for host {host}")]
    MalformedCredentials { host: String },
    #[error("couldn't list branches for {repo}")]
    ListBranches {
        #[source]
        source: Box<ForgeError>,
        repo: String,
    },
    #[error("couldn't list pull/merge requests for {repo}")]
    ListPullreqs {
        #[source]
        source: Box<ForgeError>,
        repo: String,
    },
}

/// Forge metadata describing a checked-in submodule: its remote URL and the
/// pinned commit (GitHub: from a typed submodule API entry; GitLab: the
/// `.gitmodules` URL plus the file blob id, per SPEC_FULL.md §4.1).
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct SubmoduleRef {
    pub(crate) url: String,
    pub(crate) revision: String,
}

/// A branch or tag head as reported by a forge.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct RefInfo {
    pub(crate) name: String,
    pub(crate) sha: String,
}

/// The operations common to both forge dialects, per SPEC_FULL.md §4.1.
#[async_trait]
pub(crate) trait Forge: Send + Sync {
    async fn get_branches(&self, repo: &RepoDesc) -> Result<Vec<RefInfo>, ForgeError>;

    async fn get_pullreqs(&self, repo: &RepoDesc) -> Result<Vec<PRInfo>, ForgeError>;

    /// Returns `""` when the forge has no (public) email on file for the
    /// user, matching the GitLab `public_email` behavior from Open
    /// Question (d) rather than distinguishing "absent" from "private".
    async fn get_user_email(&self, user: &str) -> Result<String, ForgeError>;

    /// `Ok(None)` means "not found" — callers decide whether that's an
    /// error or an expected miss (e.g. an optional submodule probe).
    async fn get_file(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<Vec<u8>>, ForgeError>;

    async fn get_submodule_info(
        &self,
        repo: &RepoDesc,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<SubmoduleRef>, ForgeError>;

    /// Resolves a dialect-specific `SourceUrl::DifferentProject` reference
    /// into a concrete clone URL. GitHub never produces `DifferentProject`
    /// (its PR payload already carries a concrete source URL), so its
    /// implementation is a passthrough; GitLab looks up the project by id.
    async fn resolve_project_url(&self, project_ref: &str) -> Result<Option<String>, ForgeError>;
}

/// Parsed form of `BRIAREUS_PAT=host1=tokenspec1;host2=tokenspec2;…`
/// (SPEC_FULL.md §6). GitHub tokenspecs are `user:token`; GitLab tokenspecs
/// are a bare token.
#[derive(Clone, Debug, Default)]
pub(crate) struct Credentials(HashMap<String, String>);

impl Credentials {
    pub(crate) fn parse(raw: &str) -> Result<Self, ForgeError> {
        let mut map = HashMap::new();
        for entry in raw.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            let (host, tokenspec) = entry
                .split_once('=')
                .ok_or_else(|| ForgeError::MalformedCredentials {
                    host: entry.to_string(),
                })?;
            map.insert(host.to_string(), tokenspec.to_string());
        }
        Ok(Self(map))
    }

    pub(crate) fn tokenspec_for(&self, host: &str) -> Result<&str, ForgeError> {
        self.0
            .get(host)
            .map(String::as_str)
            .ok_or_else(|| ForgeError::MissingCredentials {
                host: host.to_string(),
            })
    }

    /// GitHub's `Authorization` header value is `user:token`; we only need
    /// the token half for a bearer header, so split it out here.
    pub(crate) fn github_token_for(&self, host: &str) -> Result<&str, ForgeError> {
        let spec = self.tokenspec_for(host)?;
        Ok(spec.split_once(':').map(|(_, token)| token).unwrap_or(spec))
    }

    pub(crate) fn gitlab_token_for(&self, host: &str) -> Result<&str, ForgeError> {
        self.tokenspec_for(host)
    }
}

/// Rewrites an SSH-style or private clone URL into an HTTPS netloc using the
/// configured `RepoLoc` translation table, following the original
/// implementation's `to_http_url`: try the literal remote spec as a key
/// first, and only then a scheme-stripped/translated form. Returns the
/// input unchanged (assumed to already be HTTPS) if no entry matches.
pub(crate) fn translate_netloc(url: &str, repo_locs: &[RepoLoc]) -> String {
    for loc in repo_locs {
        if url.contains(&loc.repo_loc) {
            return url.replacen(&loc.repo_loc, &loc.api_host, 1);
        }
    }
    url.to_string()
}

/// Determines which dialect a (possibly-translated) repo URL belongs to.
/// GitLab instances are distinguished from GitHub/GHE purely by not being
/// `github.com` or an enterprise host explicitly configured as GitHub — in
/// practice this is driven by the per-host dialect table in `Config`
/// (see `config.rs`), not by sniffing the URL itself.
pub(crate) fn host_of(url: &str) -> Option<&str> {
    let rest = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("git@"))?;
    let rest = rest.split(['/', ':']).next()?;
    Some(rest)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credentials_parse_multiple_hosts() {
        let creds =
            Credentials::parse("github.com=alice:ghp_abc;gitlab.com=glpat_def").unwrap();
        assert_eq!(creds.github_token_for("github.com").unwrap(), "ghp_abc");
        assert_eq!(creds.gitlab_token_for("gitlab.com").unwrap(), "glpat_def");
    }

    #[test]
    fn credentials_missing_host_errors() {
        let creds = Credentials::parse("github.com=alice:ghp_abc").unwrap();
        assert!(matches!(
            creds.tokenspec_for("gitlab.com"),
            Err(ForgeError::MissingCredentials { .. })
        ));
    }

    #[test]
    fn translate_netloc_rewrites_configured_host() {
        let repo_locs = vec![RepoLoc {
            repo_loc: "projFoo-github".to_string(),
            api_host: "github.com".to_string(),
        }];
        let translated = translate_netloc("git@projFoo-github:team/repo.git", &repo_locs);
        assert_eq!(translated, "git@github.com:team/repo.git");
    }

    #[test]
    fn translate_netloc_passthrough_when_unconfigured() {
        let translated = translate_netloc("https://github.com/team/repo.git", &[]);
        assert_eq!(translated, "https://github.com/team/repo.git");
    }

    #[test]
    fn host_of_handles_ssh_and_https() {
        assert_eq!(host_of("git@github.com:team/repo.git"), Some("github.com"));
        assert_eq!(
            host_of("https://gitlab.example.com/team/repo"),
            Some("gitlab.example.com")
        );
    }
}
