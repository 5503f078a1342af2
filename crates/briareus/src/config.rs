//! Process configuration (SPEC_FULL.md §10.4): merges CLI flags, an optional
//! `briareus.yml`/`briareus.yaml` file, and hardcoded defaults.

use std::collections::HashSet;
use std::fs;
use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::Deserialize;
use thiserror::Error;

use crate::forge::{Credentials, ForgeError};

const CONFIG_CANDIDATES: &[&str] = &["briareus.yml", "briareus.yaml"];

const DEFAULT_CONCURRENCY: usize = 4;
const DEFAULT_TIMEOUT_SECS: u64 = 30;

#[derive(Error, Debug)]
#[error("configuration error in {path}")]
pub(crate) struct ConfigError {
    /// The path to the configuration file that caused this error, or a
    /// synthetic marker (`BRIAREUS_PAT`) for environment-sourced failures.
    path: String,
    #[source]
    pub(crate) source: ConfigErrorInner,
}

#[derive(Error, Debug)]
pub(crate) enum ConfigErrorInner {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid configuration syntax")]
    Syntax(#[source] serde_yaml::Error),
    #[error("invalid BRIAREUS_PAT credentials table")]
    Credentials(#[source] ForgeError),
}

/// The on-disk shape of `briareus.yml`. Every field is optional: a CLI flag
/// takes precedence, and a hardcoded default fills whatever neither supplies.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    concurrency: Option<usize>,
    timeout_secs: Option<u64>,
    /// Hostnames whose repos should be addressed with the GitLab dialect
    /// rather than the default GitHub one. `gitlab.com` is always included.
    #[serde(default)]
    gitlab_hosts: Vec<String>,
}

/// Resolved process configuration for one run: cache directory, concurrency
/// limit, per-call timeout, the per-host dialect table, and the parsed
/// `BRIAREUS_PAT` credentials table.
#[derive(Debug, Clone)]
pub(crate) struct Config {
    pub(crate) cache_dir: Utf8PathBuf,
    pub(crate) offline: bool,
    pub(crate) concurrency: usize,
    pub(crate) timeout: Duration,
    pub(crate) credentials: Credentials,
    pub(crate) gitlab_hosts: HashSet<String>,
}

impl Config {
    /// Discovers `briareus.yml`/`briareus.yaml` upward from the current
    /// directory, merges it under the given CLI-flag overrides, and parses
    /// `BRIAREUS_PAT` from the environment (absent means "no credentials",
    /// which is only a problem once a forge call actually needs one).
    pub(crate) fn discover(
        cache_dir: Utf8PathBuf,
        offline: bool,
        cli_concurrency: Option<usize>,
        cli_timeout_secs: Option<u64>,
    ) -> Result<Self, ConfigError> {
        let raw = Self::discover_in_cwd()?.unwrap_or_default();

        let credentials = match std::env::var("BRIAREUS_PAT") {
            Ok(raw_pat) => Credentials::parse(&raw_pat).map_err(|source| ConfigError {
                path: "BRIAREUS_PAT".to_string(),
                source: ConfigErrorInner::Credentials(source),
            })?,
            Err(_) => Credentials::default(),
        };

        let mut gitlab_hosts: HashSet<String> = raw.gitlab_hosts.into_iter().collect();
        gitlab_hosts.insert("gitlab.com".to_string());

        Ok(Self {
            cache_dir,
            offline,
            concurrency: cli_concurrency.or(raw.concurrency).unwrap_or(DEFAULT_CONCURRENCY),
            timeout: Duration::from_secs(
                cli_timeout_secs.or(raw.timeout_secs).unwrap_or(DEFAULT_TIMEOUT_SECS),
            ),
            credentials,
            gitlab_hosts,
        })
    }

    /// Walks up from the current directory looking for `briareus.yml` or
    /// `briareus.yaml`, stopping at the first `.git` directory or the
    /// filesystem root, whichever comes first.
    fn discover_in_cwd() -> Result<Option<RawConfig>, ConfigError> {
        let Ok(cwd) = std::env::current_dir() else {
            return Ok(None);
        };
        let Ok(mut dir) = Utf8PathBuf::try_from(cwd) else {
            return Ok(None);
        };

        loop {
            for candidate in CONFIG_CANDIDATES {
                let path = dir.join(candidate);
                if path.is_file() {
                    return Self::load(&path).map(Some);
                }
            }
            if dir.join(".git").is_dir() {
                return Ok(None);
            }
            match dir.parent() {
                Some(parent) => dir = parent.to_path_buf(),
                None => return Ok(None),
            }
        }
    }

    fn load(path: &Utf8Path) -> Result<RawConfig, ConfigError> {
        let wrap = |source: ConfigErrorInner| ConfigError {
            path: path.to_string(),
            source,
        };
        let contents = fs::read_to_string(path).map_err(|e| wrap(ConfigErrorInner::Io(e)))?;
        serde_yaml::from_str(&contents).map_err(|e| wrap(ConfigErrorInner::Syntax(e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_config_defaults_to_empty() {
        let raw: RawConfig = serde_yaml::from_str("{}").unwrap();
        assert!(raw.concurrency.is_none());
        assert!(raw.gitlab_hosts.is_empty());
    }

    #[test]
    fn raw_config_parses_gitlab_hosts() {
        let raw: RawConfig = serde_yaml::from_str("gitlab_hosts: [\"gitlab.example.com\"]").unwrap();
        assert_eq!(raw.gitlab_hosts, vec!["gitlab.example.com".to_string()]);
    }
}
