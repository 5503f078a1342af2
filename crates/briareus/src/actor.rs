//! `RepoActor`: one serialization unit per repository name (SPEC_FULL.md §4.2).
//!
//! Grounded on `examples/original_source/Briareus/VCS/InternalOps.py`'s
//! `is_idle`/`pending_requests` bookkeeping for the single-requester gate and
//! quiescence semantics; mapped onto a `tokio::sync::mpsc` mailbox per the
//! "actor model → systems-language mapping" guidance in SPEC_FULL.md §9,
//! since the teacher has no actor model of its own to draw the channel idiom
//! from.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;

use crate::forge::{Forge, ForgeError, RefInfo, SubmoduleRef};
use crate::model::{PRInfo, RepoDesc};

/// Default quiescence for the actor backing the project's declared repos.
pub(crate) const CORE_QUIESCENCE: Duration = Duration::from_secs(12 * 60 * 60);
/// Default quiescence for actors spun up transiently during submodule
/// recursion or PR-source resolution.
pub(crate) const TRANSIENT_QUIESCENCE: Duration = Duration::from_secs(20);

#[derive(Error, Debug, Clone)]
#[error("invalid repo {name}: {message}")]
pub(crate) struct InvalidRepo {
    pub(crate) name: String,
    pub(crate) kind: InvalidRepoKind,
    pub(crate) remote: String,
    pub(crate) api_url: Option<String>,
    pub(crate) message: String,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub(crate) enum InvalidRepoKind {
    Timeout,
    Forge,
}

impl InvalidRepo {
    fn from_forge(repo: &RepoDesc, err: &ForgeError) -> Self {
        Self {
            name: repo.name.clone(),
            kind: InvalidRepoKind::Forge,
            remote: repo.url.clone(),
            api_url: None,
            message: err.to_string(),
        }
    }

    fn timeout(repo: &RepoDesc, deadline: Duration) -> Self {
        Self {
            name: repo.name.clone(),
            kind: InvalidRepoKind::Timeout,
            remote: repo.url.clone(),
            api_url: None,
            message: format!("no reply within {deadline:?}"),
        }
    }
}

/// One in-flight request against a `RepoActor`, paired with its reply channel.
enum Message {
    DeclareRepo(oneshot::Sender<Result<(), InvalidRepo>>),
    HasBranch {
        branch: String,
        reply: oneshot::Sender<Result<bool, InvalidRepo>>,
    },
    GetPullReqs(oneshot::Sender<Result<Vec<PRInfo>, InvalidRepo>>),
    GitmodulesData {
        git_ref: String,
        reply: oneshot::Sender<Result<Option<Vec<u8>>, InvalidRepo>>,
    },
    ReadFileFromVcs {
        path: String,
        git_ref: String,
        reply: oneshot::Sender<Result<Option<SubmoduleRef>, InvalidRepo>>,
    },
    Status(oneshot::Sender<ActorStatus>),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct ActorStatus {
    pub(crate) branches_known: bool,
    pub(crate) pending: usize,
}

/// A handle to a running (or not-yet-started) repo actor. Cloning a handle
/// is cheap — it's just a channel sender — and is how the Gatherer and
/// sibling actors address the same repo without sharing its internal state.
#[derive(Clone)]
pub(crate) struct RepoActorHandle {
    tx: mpsc::Sender<Message>,
}

impl RepoActorHandle {
    /// Spawns a fresh actor backed by `forge`, with the given quiescence
    /// period before it self-terminates on idleness and `per_call_timeout`
    /// as the soft deadline (SPEC_FULL.md §5) on every forge call it issues.
    pub(crate) fn spawn(
        repo: RepoDesc,
        forge: Arc<dyn Forge>,
        quiescence: Duration,
        per_call_timeout: Duration,
    ) -> Self {
        let (tx, rx) = mpsc::channel(32);
        tokio::spawn(run(repo, forge, quiescence, per_call_timeout, rx));
        Self { tx }
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Message,
    ) -> Option<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(make(reply_tx)).await.ok()?;
        reply_rx.await.ok()
    }

    pub(crate) async fn declare(&self) -> Result<(), InvalidRepo> {
        self.request(Message::DeclareRepo)
            .await
            .unwrap_or_else(|| Err(gone()))
    }

    pub(crate) async fn has_branch(&self, branch: &str) -> Result<bool, InvalidRepo> {
        let branch = branch.to_string();
        self.request(|reply| Message::HasBranch { branch, reply })
            .await
            .unwrap_or_else(|| Err(gone()))
    }

    pub(crate) async fn get_pullreqs(&self) -> Result<Vec<PRInfo>, InvalidRepo> {
        self.request(Message::GetPullReqs)
            .await
            .unwrap_or_else(|| Err(gone()))
    }

    pub(crate) async fn gitmodules(&self, git_ref: &str) -> Result<Option<Vec<u8>>, InvalidRepo> {
        let git_ref = git_ref.to_string();
        self.request(|reply| Message::GitmodulesData { git_ref, reply })
            .await
            .unwrap_or_else(|| Err(gone()))
    }

    pub(crate) async fn read_submodule_entry(
        &self,
        path: &str,
        git_ref: &str,
    ) -> Result<Option<SubmoduleRef>, InvalidRepo> {
        let (path, git_ref) = (path.to_string(), git_ref.to_string());
        self.request(|reply| Message::ReadFileFromVcs {
            path,
            git_ref,
            reply,
        })
        .await
        .unwrap_or_else(|| Err(gone()))
    }

    #[allow(dead_code)]
    pub(crate) async fn status(&self) -> Option<ActorStatus> {
        self.request(Message::Status).await
    }
}

/// A handle whose actor has already self-terminated (idle eviction) answers
/// every request as a timeout-flavored `InvalidRepo`; callers re-create a
/// fresh actor on the next `DeclareRepo` rather than treating this as fatal.
fn gone() -> InvalidRepo {
    InvalidRepo {
        name: String::new(),
        kind: InvalidRepoKind::Timeout,
        remote: String::new(),
        api_url: None,
        message: "actor no longer running".to_string(),
    }
}

/// The actor's own event loop: single-requester gate (process one message to
/// completion, then dequeue the next) plus quiescence-based self-exit.
async fn run(
    repo: RepoDesc,
    forge: Arc<dyn Forge>,
    quiescence: Duration,
    per_call_timeout: Duration,
    mut rx: mpsc::Receiver<Message>,
) {
    let mut branches: Option<Vec<RefInfo>> = None;
    let mut pullreqs: Option<Vec<PRInfo>> = None;

    loop {
        let msg = match timeout(quiescence, rx.recv()).await {
            Ok(Some(msg)) => msg,
            Ok(None) => break,
            Err(_) => {
                tracing::debug!(repo = %repo.name, "actor idle past quiescence, exiting");
                break;
            }
        };

        match msg {
            Message::DeclareRepo(reply) => {
                let _ = reply.send(Ok(()));
            }
            Message::HasBranch { branch, reply } => {
                let result = ensure_branches(&repo, &forge, &mut branches, per_call_timeout)
                    .await
                    .map(|list| list.iter().any(|b| b.name == branch));
                let _ = reply.send(result);
            }
            Message::GetPullReqs(reply) => {
                if pullreqs.is_none() {
                    let fetched = timeout(per_call_timeout, forge.get_pullreqs(&repo)).await;
                    match fetched {
                        Ok(Ok(prs)) => pullreqs = Some(prs),
                        Ok(Err(e)) => {
                            let _ = reply.send(Err(InvalidRepo::from_forge(&repo, &e)));
                            continue;
                        }
                        Err(_) => {
                            let _ = reply.send(Err(InvalidRepo::timeout(&repo, per_call_timeout)));
                            continue;
                        }
                    }
                }
                let _ = reply.send(Ok(pullreqs.clone().unwrap_or_default()));
            }
            Message::GitmodulesData { git_ref, reply } => {
                let fetched = timeout(
                    per_call_timeout,
                    forge.get_file(&repo, ".gitmodules", &git_ref),
                )
                .await;
                let result = match fetched {
                    Ok(Ok(body)) => Ok(body),
                    Ok(Err(e)) => Err(InvalidRepo::from_forge(&repo, &e)),
                    Err(_) => Err(InvalidRepo::timeout(&repo, per_call_timeout)),
                };
                let _ = reply.send(result);
            }
            Message::ReadFileFromVcs {
                path,
                git_ref,
                reply,
            } => {
                let fetched = timeout(
                    per_call_timeout,
                    forge.get_submodule_info(&repo, &path, &git_ref),
                )
                .await;
                let result = match fetched {
                    Ok(Ok(entry)) => Ok(entry),
                    Ok(Err(e)) => Err(InvalidRepo::from_forge(&repo, &e)),
                    Err(_) => Err(InvalidRepo::timeout(&repo, per_call_timeout)),
                };
                let _ = reply.send(result);
            }
            Message::Status(reply) => {
                let _ = reply.send(ActorStatus {
                    branches_known: branches.is_some(),
                    pending: rx.len(),
                });
            }
        }
    }
}

async fn ensure_branches<'a>(
    repo: &RepoDesc,
    forge: &Arc<dyn Forge>,
    cache: &'a mut Option<Vec<RefInfo>>,
    per_call_timeout: Duration,
) -> Result<&'a Vec<RefInfo>, InvalidRepo> {
    if cache.is_none() {
        let fetched = timeout(per_call_timeout, forge.get_branches(repo)).await;
        match fetched {
            Ok(Ok(list)) => *cache = Some(list),
            Ok(Err(e)) => return Err(InvalidRepo::from_forge(repo, &e)),
            Err(_) => return Err(InvalidRepo::timeout(repo, per_call_timeout)),
        }
    }
    Ok(cache.as_ref().expect("just populated"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingForge {
        branch_calls: AtomicUsize,
    }

    #[async_trait]
    impl Forge for CountingForge {
        async fn get_branches(&self, _repo: &RepoDesc) -> Result<Vec<RefInfo>, ForgeError> {
            self.branch_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![RefInfo {
                name: "main".to_string(),
                sha: "deadbeef".to_string(),
            }])
        }

        async fn get_pullreqs(&self, _repo: &RepoDesc) -> Result<Vec<PRInfo>, ForgeError> {
            Ok(vec![])
        }

        async fn get_user_email(&self, _user: &str) -> Result<String, ForgeError> {
            Ok(String::new())
        }

        async fn get_file(
            &self,
            _repo: &RepoDesc,
            _path: &str,
            _git_ref: &str,
        ) -> Result<Option<Vec<u8>>, ForgeError> {
            Ok(None)
        }

        async fn get_submodule_info(
            &self,
            _repo: &RepoDesc,
            _path: &str,
            _git_ref: &str,
        ) -> Result<Option<SubmoduleRef>, ForgeError> {
            Ok(None)
        }

        async fn resolve_project_url(&self, project_ref: &str) -> Result<Option<String>, ForgeError> {
            Ok(Some(project_ref.to_string()))
        }
    }

    #[tokio::test]
    async fn has_branch_caches_after_first_fetch() {
        let forge = Arc::new(CountingForge {
            branch_calls: AtomicUsize::new(0),
        });
        let handle = RepoActorHandle::spawn(
            RepoDesc::new("R1", "https://github.com/acme/r1"),
            forge.clone(),
            TRANSIENT_QUIESCENCE,
            Duration::from_secs(5),
        );

        assert!(handle.has_branch("main").await.unwrap());
        assert!(!handle.has_branch("feature").await.unwrap());
        assert_eq!(forge.branch_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn declare_repo_always_succeeds() {
        let forge = Arc::new(CountingForge {
            branch_calls: AtomicUsize::new(0),
        });
        let handle = RepoActorHandle::spawn(
            RepoDesc::new("R1", "https://github.com/acme/r1"),
            forge,
            TRANSIENT_QUIESCENCE,
            Duration::from_secs(5),
        );
        assert!(handle.declare().await.is_ok());
    }
}
