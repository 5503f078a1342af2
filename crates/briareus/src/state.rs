//! Runtime state for one run: the resolved [`Config`] plus the forge clients
//! built from it, cached by `(Dialect, host)` so that two repos on the same
//! host share one connection pool and credentials lookup.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::config::Config;
use crate::forge::github::GitHubClient;
use crate::forge::gitlab::GitLabClient;
use crate::forge::{Dialect, Forge, ForgeError, host_of, translate_netloc};
use crate::gatherer::ForgeFactory;
use crate::model::{RepoDesc, RepoLoc};

pub(crate) struct RunState {
    config: Config,
    repo_locs: Vec<RepoLoc>,
    clients: Mutex<HashMap<(Dialect, String), Arc<dyn Forge>>>,
}

impl RunState {
    pub(crate) fn new(config: Config, repo_locs: Vec<RepoLoc>) -> Arc<Self> {
        Arc::new(Self {
            config,
            repo_locs,
            clients: Mutex::new(HashMap::new()),
        })
    }

    pub(crate) fn config(&self) -> &Config {
        &self.config
    }

    /// A `ForgeFactory` closure bound to this state's credentials and client
    /// cache, handed to `Gatherer::new`.
    pub(crate) fn forge_factory(self: &Arc<Self>) -> ForgeFactory {
        let state = Arc::clone(self);
        Arc::new(move |repo: &RepoDesc| state.forge_for(repo))
    }

    fn forge_for(&self, repo: &RepoDesc) -> Result<Arc<dyn Forge>, ForgeError> {
        let translated = translate_netloc(&repo.url, &self.repo_locs);
        let host = host_of(&translated)
            .ok_or_else(|| ForgeError::UrlTranslation { url: repo.url.clone() })?
            .to_string();

        if self.config.offline {
            return Err(ForgeError::Offline { host });
        }

        let dialect = if self.config.gitlab_hosts.contains(&host) {
            Dialect::GitLab
        } else {
            Dialect::GitHub
        };

        let mut clients = self.clients.lock().expect("forge client cache poisoned");
        if let Some(client) = clients.get(&(dialect, host.clone())) {
            return Ok(Arc::clone(client));
        }

        let client: Arc<dyn Forge> = match dialect {
            Dialect::GitHub => {
                let api_base = if host == "github.com" {
                    "https://api.github.com".to_string()
                } else {
                    format!("https://{host}/api/v3")
                };
                let token = self.config.credentials.github_token_for(&host)?;
                Arc::new(GitHubClient::new(&api_base, token)?)
            }
            Dialect::GitLab => {
                let api_base = format!("https://{host}");
                let token = self.config.credentials.gitlab_token_for(&host)?;
                Arc::new(GitLabClient::new(&api_base, token)?)
            }
        };

        clients.insert((dialect, host), Arc::clone(&client));
        Ok(client)
    }
}
