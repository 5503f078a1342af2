//! Breadth-first multi-repo discovery (SPEC_FULL.md §4.3).
//!
//! Grounded on `examples/original_source/Briareus/VCS/InternalOps.py`'s
//! `GatherRepoInfo`/`GetGitInfo` control flow, translated from its message-class
//! dispatch into async/await over `RepoActorHandle`s. The pending-responses
//! counter and completion barrier from the original is replaced by a work
//! queue drained to exhaustion: each round fans its work out concurrently,
//! bounded by the per-forge connection limit (`Gatherer::concurrency`), and
//! new work discovered mid-round (PRs, submodules) is folded back into the
//! next round, so the loop terminates exactly when a round produces no
//! further work — the same termination condition as the counter-reaching-zero
//! rule, expressed without an explicit counter.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::actor::{InvalidRepo, RepoActorHandle, TRANSIENT_QUIESCENCE};
use crate::forge::{Forge, ForgeError};
use crate::model::{
    InputDesc, PRInfo, RepoDesc, SourceUrl, SubModuleInfo, INVALID_REMOTE_REPO,
    UNKNOWN_REMOTE_REF,
};

#[derive(Error, Debug)]
pub(crate) enum GathererError {
    #[error("project repo {0} is unreachable: {1}")]
    ProjectRepoUnreachable(String, InvalidRepo),
    #[error("input declares no repos")]
    NoRepos,
    #[error(transparent)]
    Forge(#[from] ForgeError),
}

/// One observed `(repo, branch)` pair, suppressed later in `facts.rs` when a
/// pullreq already references the same pair.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub(crate) struct BranchObservation {
    pub(crate) repo_name: String,
    pub(crate) branch_name: String,
}

#[derive(Clone, Debug, Default)]
pub(crate) struct GatheredInfo {
    pub(crate) pullreqs: Vec<PRInfo>,
    pub(crate) submodules: Vec<SubModuleInfo>,
    pub(crate) subrepos: Vec<RepoDesc>,
    pub(crate) branches: Vec<BranchObservation>,
}

/// Produces the `Arc<dyn Forge>` a `RepoDesc` should talk to. Supplied by
/// `state.rs`, which owns the per-host client table keyed by `(Dialect, host)`
/// built from `Config`'s `BRIAREUS_PAT` table.
pub(crate) type ForgeFactory =
    Arc<dyn Fn(&RepoDesc) -> Result<Arc<dyn Forge>, ForgeError> + Send + Sync>;

enum Work {
    /// Declare a repo, probe its main + requested branches, and fetch its PRs.
    Bootstrap { repo: RepoDesc, is_submodule: bool },
    /// Resolve a PR's source URL, probe branch existence, fetch `.gitmodules`.
    ProcessPr { repo: RepoDesc, pr: PRInfo },
    /// Parse `.gitmodules` contents fetched from `source_url` at `git_ref`
    /// and recurse into any submodule repos not yet known.
    ProcessGitmodules {
        containing_repo: RepoDesc,
        source_url: String,
        git_ref: String,
        branch: String,
        pullreq_ident: Option<String>,
        contents: Vec<u8>,
    },
}

struct Outcome {
    more_work: Vec<Work>,
    pullreqs: Vec<PRInfo>,
    submodules: Vec<SubModuleInfo>,
    branches: Vec<BranchObservation>,
}

impl Outcome {
    fn empty() -> Self {
        Self {
            more_work: vec![],
            pullreqs: vec![],
            submodules: vec![],
            branches: vec![],
        }
    }
}

#[derive(Default)]
struct Inner {
    /// All spawned actors, including transient ones backing a PR's fork for
    /// a one-shot `.gitmodules` read.
    actors: HashMap<String, RepoActorHandle>,
    url_index: HashMap<String, String>,
    forges: HashMap<String, Arc<dyn Forge>>,
    /// Declared input repos plus discovered submodule-origin repos — the set
    /// that participates in branch-existence probing and ends up in
    /// `GatheredInfo::subrepos` (submodule-origin ones only).
    tracked: HashMap<String, RepoDesc>,
    submodule_repo_names: HashSet<String>,
    /// Every branch name referenced by a PR discovered so far, used both to
    /// avoid re-probing branch existence for a repeat branch name and to
    /// backfill existence checks when a new subrepo joins mid-run.
    pr_branches: HashSet<String>,
}

/// Shared, cloneable handle threaded through every concurrently-running
/// discovery task for one `Gatherer::run` call.
#[derive(Clone)]
struct Ctx {
    inner: Arc<Mutex<Inner>>,
    forge_factory: ForgeFactory,
    project_repo: Arc<str>,
    requested_branches: Arc<Vec<String>>,
    per_call_timeout: Duration,
}

impl Ctx {
    async fn forge_for(&self, repo: &RepoDesc) -> Result<Arc<dyn Forge>, ForgeError> {
        let mut inner = self.inner.lock().await;
        if let Some(existing) = inner.forges.get(&repo.url) {
            return Ok(existing.clone());
        }
        let forge = (self.forge_factory)(repo)?;
        inner.forges.insert(repo.url.clone(), forge.clone());
        Ok(forge)
    }

    /// Spawns (or reuses, by canonical URL) the actor for `repo`. When
    /// `track` is set, `repo` also joins the tracked set used for
    /// branch-existence probing and subrepo reporting.
    async fn ensure_actor(
        &self,
        repo: &RepoDesc,
        track: bool,
    ) -> Result<RepoActorHandle, ForgeError> {
        let canonical = canonicalize(&repo.url);

        {
            let mut inner = self.inner.lock().await;
            if let Some(existing_name) = inner.url_index.get(&canonical).cloned() {
                if let Some(handle) = inner.actors.get(&existing_name).cloned() {
                    inner.actors.insert(repo.name.clone(), handle.clone());
                    if track {
                        inner.tracked.insert(repo.name.clone(), repo.clone());
                    }
                    return Ok(handle);
                }
            }
        }

        let forge = self.forge_for(repo).await?;
        let handle =
            RepoActorHandle::spawn(repo.clone(), forge, TRANSIENT_QUIESCENCE, self.per_call_timeout);

        let mut inner = self.inner.lock().await;
        inner.url_index.insert(canonical, repo.name.clone());
        inner.actors.insert(repo.name.clone(), handle.clone());
        if track {
            inner.tracked.insert(repo.name.clone(), repo.clone());
        }
        Ok(handle)
    }

    async fn tracked_actors(&self) -> Vec<(String, RepoActorHandle)> {
        let inner = self.inner.lock().await;
        inner
            .tracked
            .keys()
            .filter_map(|name| inner.actors.get(name).map(|h| (name.clone(), h.clone())))
            .collect()
    }

    /// Records `branch` as PR-referenced; returns `true` the first time it's
    /// seen, matching §4.3 step 3 ("if no existing PR already references
    /// branch B, probe for B's existence in every currently known repo").
    async fn first_time_branch(&self, branch: &str) -> bool {
        self.inner.lock().await.pr_branches.insert(branch.to_string())
    }

    async fn known_pr_branches(&self) -> Vec<String> {
        self.inner.lock().await.pr_branches.iter().cloned().collect()
    }

    async fn is_new_submodule(&self, canonical_url: &str) -> bool {
        let inner = self.inner.lock().await;
        !inner.url_index.contains_key(canonical_url)
    }

    async fn mark_submodule(&self, repo: &RepoDesc) {
        let mut inner = self.inner.lock().await;
        inner.submodule_repo_names.insert(repo.name.clone());
    }

    async fn subrepos(&self) -> Vec<RepoDesc> {
        let inner = self.inner.lock().await;
        let mut repos: Vec<_> = inner
            .submodule_repo_names
            .iter()
            .filter_map(|name| inner.tracked.get(name).cloned())
            .collect();
        repos.sort();
        repos
    }
}

pub(crate) struct Gatherer {
    forge_factory: ForgeFactory,
    /// Per-forge connection limit bounding each round's fan-out (SPEC_FULL.md
    /// §5, `Config.concurrency` / `--concurrency`).
    concurrency: usize,
    /// Per-call soft deadline threaded into every spawned `RepoActorHandle`
    /// (SPEC_FULL.md §5, `Config.timeout` / `--timeout-secs`).
    per_call_timeout: Duration,
}

impl Gatherer {
    pub(crate) fn new(forge_factory: ForgeFactory, concurrency: usize, per_call_timeout: Duration) -> Self {
        Self {
            forge_factory,
            concurrency,
            per_call_timeout,
        }
    }

    pub(crate) async fn run(&self, input: &InputDesc) -> Result<GatheredInfo, GathererError> {
        if input.repos.is_empty() {
            return Err(GathererError::NoRepos);
        }
        let project_repo = input.project_repo().ok_or(GathererError::NoRepos)?.name.clone();

        let ctx = Ctx {
            inner: Arc::new(Mutex::new(Inner::default())),
            forge_factory: self.forge_factory.clone(),
            project_repo: Arc::from(project_repo.as_str()),
            requested_branches: Arc::new(
                input.branches.iter().map(|b| b.branch_name.clone()).collect(),
            ),
            per_call_timeout: self.per_call_timeout,
        };

        for repo in &input.repos {
            ctx.ensure_actor(repo, true).await.map_err(GathererError::Forge)?;
        }

        let mut gathered = GatheredInfo::default();
        let mut queue: Vec<Work> = input
            .repos
            .iter()
            .cloned()
            .map(|repo| Work::Bootstrap {
                repo,
                is_submodule: false,
            })
            .collect();

        while !queue.is_empty() {
            let round = std::mem::take(&mut queue);
            let mut outcomes = stream::iter(round)
                .map(|work| {
                    let ctx = ctx.clone();
                    async move { process(ctx, work).await }
                })
                .buffer_unordered(self.concurrency);

            while let Some(outcome) = outcomes.next().await {
                match outcome {
                    Ok(outcome) => {
                        queue.extend(outcome.more_work);
                        gathered.pullreqs.extend(outcome.pullreqs);
                        gathered.submodules.extend(outcome.submodules);
                        gathered.branches.extend(outcome.branches);
                    }
                    Err(GathererError::ProjectRepoUnreachable(name, err)) => {
                        return Err(GathererError::ProjectRepoUnreachable(name, err));
                    }
                    Err(other) => return Err(other),
                }
            }
        }

        gathered.subrepos = ctx.subrepos().await;
        gathered.pullreqs.sort_by(|a, b| {
            (a.target_repo.as_str(), a.ident.as_str())
                .cmp(&(b.target_repo.as_str(), b.ident.as_str()))
        });
        gathered.branches.sort_by(|a, b| {
            (a.repo_name.as_str(), a.branch_name.as_str())
                .cmp(&(b.repo_name.as_str(), b.branch_name.as_str()))
        });
        gathered.branches.dedup();

        Ok(gathered)
    }
}

async fn process(ctx: Ctx, work: Work) -> Result<Outcome, GathererError> {
    match work {
        Work::Bootstrap { repo, is_submodule } => bootstrap(&ctx, repo, is_submodule).await,
        Work::ProcessPr { repo, pr } => process_pr(&ctx, repo, pr).await,
        Work::ProcessGitmodules {
            containing_repo,
            source_url,
            git_ref,
            branch,
            pullreq_ident,
            contents,
        } => {
            process_gitmodules(
                &ctx,
                containing_repo,
                source_url,
                git_ref,
                branch,
                pullreq_ident,
                contents,
            )
            .await
        }
    }
}

async fn bootstrap(ctx: &Ctx, repo: RepoDesc, is_submodule: bool) -> Result<Outcome, GathererError> {
    let handle = ctx
        .ensure_actor(&repo, true)
        .await
        .map_err(GathererError::Forge)?;

    if let Err(e) = handle.declare().await {
        if repo.name.as_str() == &*ctx.project_repo {
            return Err(GathererError::ProjectRepoUnreachable(repo.name, e));
        }
        tracing::warn!(repo = %repo.name, error = %e, "repo unreachable, eliding");
        return Ok(Outcome::empty());
    }

    let mut branches = Vec::new();
    for candidate in std::iter::once(repo.main_branch.clone())
        .chain(ctx.requested_branches.iter().cloned())
    {
        match handle.has_branch(&candidate).await {
            Ok(true) => branches.push(BranchObservation {
                repo_name: repo.name.clone(),
                branch_name: candidate,
            }),
            Ok(false) => {}
            Err(e) => tracing::warn!(repo = %repo.name, branch = %candidate, error = %e, "branch probe failed"),
        }
    }

    // A newly-joined subrepo also needs checking against every PR branch
    // already discovered elsewhere (§4.3 "Submodule discovery").
    if is_submodule {
        for branch in ctx.known_pr_branches().await {
            if let Ok(true) = handle.has_branch(&branch).await {
                branches.push(BranchObservation {
                    repo_name: repo.name.clone(),
                    branch_name: branch,
                });
            }
        }
    }

    let mut more_work = Vec::new();
    match handle.get_pullreqs().await {
        Ok(prs) => {
            for pr in prs {
                more_work.push(Work::ProcessPr {
                    repo: repo.clone(),
                    pr,
                });
            }
        }
        Err(e) => tracing::warn!(repo = %repo.name, error = %e, "couldn't list pull/merge requests"),
    }

    // The project repo's own main branch is itself a `.gitmodules` source.
    if repo.name.as_str() == &*ctx.project_repo {
        if let Ok(Some(contents)) = handle.gitmodules(&repo.main_branch).await {
            more_work.push(Work::ProcessGitmodules {
                containing_repo: repo.clone(),
                source_url: repo.url.clone(),
                git_ref: repo.main_branch.clone(),
                branch: repo.main_branch.clone(),
                pullreq_ident: None,
                contents,
            });
        }
    }

    Ok(Outcome {
        more_work,
        pullreqs: vec![],
        submodules: vec![],
        branches,
    })
}

async fn process_pr(ctx: &Ctx, repo: RepoDesc, pr: PRInfo) -> Result<Outcome, GathererError> {
    let forge = ctx.forge_for(&repo).await.map_err(GathererError::Forge)?;

    let Some(resolved_url) = resolve_source_url(&forge, &repo, &pr.source_url).await else {
        tracing::warn!(repo = %repo.name, pr = %pr.ident, "dropping PR with unresolvable source url");
        return Ok(Outcome::empty());
    };

    let mut final_pr = pr.clone();
    final_pr.source_url = SourceUrl::Concrete(resolved_url.clone());
    if !final_pr.user.is_empty() {
        match forge.get_user_email(&final_pr.user).await {
            Ok(email) => final_pr.email = email,
            Err(e) => {
                tracing::warn!(repo = %repo.name, user = %final_pr.user, error = %e, "couldn't resolve user email");
            }
        }
    }

    let mut branches = Vec::new();
    if ctx.first_time_branch(&pr.branch).await {
        branches.push(BranchObservation {
            repo_name: repo.name.clone(),
            branch_name: pr.branch.clone(),
        });
        for (name, handle) in ctx.tracked_actors().await {
            if name == repo.name {
                continue;
            }
            if let Ok(true) = handle.has_branch(&pr.branch).await {
                branches.push(BranchObservation {
                    repo_name: name,
                    branch_name: pr.branch.clone(),
                });
            }
        }
    }

    let mut more_work = Vec::new();
    if repo.name.as_str() == &*ctx.project_repo {
        // Transient, untracked actor for the PR's own fork — it isn't a
        // project repo or a submodule, just a one-shot `.gitmodules` read.
        let source_repo = RepoDesc::new(
            format!("{}#pr{}", repo.name, final_pr.ident),
            resolved_url.clone(),
        );
        if let Ok(source_handle) = ctx.ensure_actor(&source_repo, false).await {
            if let Ok(Some(contents)) = source_handle.gitmodules(&final_pr.branch).await {
                more_work.push(Work::ProcessGitmodules {
                    containing_repo: repo.clone(),
                    source_url: resolved_url,
                    git_ref: final_pr.branch.clone(),
                    branch: final_pr.branch.clone(),
                    pullreq_ident: Some(final_pr.ident.clone()),
                    contents,
                });
            }
        }
    }

    Ok(Outcome {
        more_work,
        pullreqs: vec![final_pr],
        submodules: vec![],
        branches,
    })
}

async fn process_gitmodules(
    ctx: &Ctx,
    containing_repo: RepoDesc,
    source_url: String,
    git_ref: String,
    branch: String,
    pullreq_ident: Option<String>,
    contents: Vec<u8>,
) -> Result<Outcome, GathererError> {
    let source_repo = RepoDesc::new(format!("{}@gitmodules", containing_repo.name), source_url);
    let source_handle = match ctx.ensure_actor(&source_repo, false).await {
        Ok(h) => h,
        Err(e) => {
            tracing::warn!(repo = %containing_repo.name, error = %e, ".gitmodules source unreachable");
            return Ok(Outcome::empty());
        }
    };

    let mut submodules = Vec::new();
    let mut more_work = Vec::new();

    for (path, declared_url) in parse_gitmodules(&contents) {
        let info = source_handle
            .read_submodule_entry(&path, &git_ref)
            .await
            .ok()
            .flatten();

        let (url, revision) = match info {
            Some(entry) => {
                let url = if entry.url.is_empty() { declared_url.clone() } else { entry.url };
                (url, entry.revision)
            }
            None => {
                let probe = RepoDesc::new(name_from_path(&path), declared_url.clone());
                let reachable = ctx
                    .ensure_actor(&probe, false)
                    .await
                    .is_ok_and(|h| matches!(
                        tokio::time::timeout(std::time::Duration::from_secs(5), h.declare()).await,
                        Ok(Ok(()))
                    ));
                if reachable {
                    (declared_url.clone(), UNKNOWN_REMOTE_REF.to_string())
                } else {
                    (INVALID_REMOTE_REPO.to_string(), UNKNOWN_REMOTE_REF.to_string())
                }
            }
        };

        let sub_name = name_from_path(&path);
        submodules.push(SubModuleInfo {
            containing_repo: containing_repo.name.clone(),
            branch: branch.clone(),
            pullreq_ident: pullreq_ident.clone(),
            submodule_name: sub_name.clone(),
            pinned_revision: revision,
        });

        if url == INVALID_REMOTE_REPO {
            continue;
        }

        let canonical = canonicalize(&url);
        if ctx.is_new_submodule(&canonical).await {
            let desc = RepoDesc::new(sub_name, url);
            if ctx.ensure_actor(&desc, true).await.is_ok() {
                ctx.mark_submodule(&desc).await;
                more_work.push(Work::Bootstrap {
                    repo: desc,
                    is_submodule: true,
                });
            }
        }
    }

    Ok(Outcome {
        more_work,
        pullreqs: vec![],
        submodules,
        branches: vec![],
    })
}

/// Strips scheme/user/`.git` so that `https://github.com/a/b.git`,
/// `https://github.com/a/b`, and `git@github.com:a/b.git` compare equal.
fn canonicalize(url: &str) -> String {
    let stripped = url
        .strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .or_else(|| url.strip_prefix("git@"))
        .unwrap_or(url)
        .replacen(':', "/", 1);
    stripped.trim_end_matches(".git").trim_end_matches('/').to_lowercase()
}

/// Parses `.gitmodules` INI-style contents into `(path, declared_url)` pairs.
/// GitLab submodule resolution needs the declared URL since its file-metadata
/// API doesn't carry one (see `forge::gitlab::get_submodule_info`).
fn parse_gitmodules(contents: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(contents);
    let mut entries = Vec::new();
    let mut current_path: Option<String> = None;
    let mut current_url: Option<String> = None;

    for line in text.lines() {
        let line = line.trim();
        if line.starts_with('[') {
            if let (Some(path), Some(url)) = (current_path.take(), current_url.take()) {
                entries.push((path, url));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            match key.trim() {
                "path" => current_path = Some(value.trim().to_string()),
                "url" => current_url = Some(value.trim().to_string()),
                _ => {}
            }
        }
    }
    if let (Some(path), Some(url)) = (current_path, current_url) {
        entries.push((path, url));
    }
    entries
}

/// Resolves a `PRInfo`'s declared `source_url` into a concrete clone URL,
/// per SPEC_FULL.md §4.3 step 1. Returns `None` when unresolvable (Open
/// Question (a)), in which case the caller drops the PR with a warning.
async fn resolve_source_url(
    forge: &Arc<dyn Forge>,
    target_repo: &RepoDesc,
    source_url: &SourceUrl,
) -> Option<String> {
    match source_url {
        SourceUrl::SameProject => Some(target_repo.url.clone()),
        SourceUrl::Concrete(url) => Some(url.clone()),
        SourceUrl::DifferentProject(project_ref) => {
            match forge.resolve_project_url(project_ref).await {
                Ok(resolved) => resolved,
                Err(e) => {
                    tracing::warn!(
                        repo = %target_repo.name,
                        project_ref,
                        error = %e,
                        "couldn't resolve PR source project"
                    );
                    None
                }
            }
        }
    }
}

/// Submodule name fallback used for the path's last component, both as the
/// ordinary submodule name and when the remote is unreachable (§4.1
/// ".gitmodules degraded resolution").
fn name_from_path(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonicalize_unifies_ssh_and_https() {
        assert_eq!(
            canonicalize("git@github.com:acme/widget.git"),
            canonicalize("https://github.com/acme/widget")
        );
    }

    #[test]
    fn parse_gitmodules_extracts_path_and_url() {
        let text = br#"
[submodule "vendor/lib"]
    path = vendor/lib
    url = https://github.com/acme/lib.git
"#;
        let entries = parse_gitmodules(text);
        assert_eq!(
            entries,
            vec![(
                "vendor/lib".to_string(),
                "https://github.com/acme/lib.git".to_string()
            )]
        );
    }

    #[test]
    fn parse_gitmodules_handles_multiple_entries() {
        let text = br#"
[submodule "a"]
    path = a
    url = https://github.com/acme/a.git
[submodule "b"]
    path = b
    url = https://github.com/acme/b.git
"#;
        assert_eq!(parse_gitmodules(text).len(), 2);
    }

    #[test]
    fn name_from_path_takes_last_component() {
        assert_eq!(name_from_path("vendor/nested/lib"), "lib");
    }
}
