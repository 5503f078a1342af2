//! Static data description of a Briareus project: the repositories, branches,
//! variables, and location translations that make up one run's input.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The default main branch assumed for a [`RepoDesc`] when the input spec
/// doesn't say otherwise.
pub(crate) const DEFAULT_MAIN_BRANCH: &str = "master";

/// A declared or discovered repository.
///
/// Equality and ordering are by `name` alone: two `RepoDesc`s with the same
/// name are the same repo for every purpose downstream, even if one was
/// constructed with a stale URL.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct RepoDesc {
    pub(crate) name: String,
    pub(crate) url: String,
    #[serde(default = "default_main_branch")]
    pub(crate) main_branch: String,
    /// Set internally once per project; never part of the input spec itself.
    #[serde(default)]
    pub(crate) project_repo: bool,
}

fn default_main_branch() -> String {
    DEFAULT_MAIN_BRANCH.to_string()
}

impl RepoDesc {
    pub(crate) fn new(name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
            project_repo: false,
        }
    }
}

impl PartialEq for RepoDesc {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for RepoDesc {}

impl PartialOrd for RepoDesc {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RepoDesc {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name.cmp(&other.name)
    }
}

impl std::hash::Hash for RepoDesc {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

/// Translates the netloc portion of an SSH-style or otherwise non-API clone
/// URL into the forge API hostname that actually answers HTTPS requests.
///
/// Some private repos are only reachable by Hydra (the builder) via an
/// SSH hostname override (e.g. `git@projFoo-github:team/repo`), while
/// Briareus itself needs the real forge API host (e.g. `github.com`) to
/// make REST calls. See `forge::url` for where this table is consulted.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct RepoLoc {
    pub(crate) repo_loc: String,
    pub(crate) api_host: String,
}

/// A requested branch. Only meaningful once at least one repo in the project
/// is observed to actually have it.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub(crate) struct BranchDesc {
    pub(crate) branch_name: String,
}

impl fmt::Display for BranchDesc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.branch_name)
    }
}

/// A build variable and its ordered list of values. Every combination of
/// values across every declared variable participates in the build matrix's
/// Cartesian product (see `bcgen`).
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct VariableDesc {
    pub(crate) variable_name: String,
    pub(crate) variable_values: Vec<String>,
}

/// Where a pull/merge request's source branch actually lives.
///
/// GitHub always resolves this to [`SourceUrl::Concrete`] directly. GitLab's
/// API instead gives us a project id, which we turn into `SameProject` or
/// `DifferentProject` and defer final URL resolution to the Gatherer (see
/// `gatherer::resolve_source_url`), since resolving `DifferentProject` means
/// looking up another project's own clone URL from the same forge client.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) enum SourceUrl {
    SameProject,
    DifferentProject(String),
    Concrete(String),
}

/// A discovered pull/merge request.
///
/// `ident` is opaque and forge-local: GitHub's `number` and GitLab's `iid`
/// are both just decimal strings here. Two PRs with the same `ident` but
/// different `target_repo` are unrelated.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct PRInfo {
    pub(crate) target_repo: String,
    pub(crate) source_url: SourceUrl,
    pub(crate) branch: String,
    pub(crate) ident: String,
    pub(crate) title: String,
    pub(crate) user: String,
    pub(crate) email: String,
}

/// A submodule pin observed at one `(containing_repo, branch)` (or PR ref).
///
/// `pullreq_ident` is `None` for the project repo's own branches and `Some`
/// for the per-PR `.gitmodules` snapshot taken at the PR's head ref.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct SubModuleInfo {
    pub(crate) containing_repo: String,
    pub(crate) branch: String,
    pub(crate) pullreq_ident: Option<String>,
    pub(crate) submodule_name: String,
    pub(crate) pinned_revision: String,
}

/// Sentinel used in place of a submodule's pinned revision when its
/// committed blob is missing from the parent tree at the probed ref. The
/// downstream build is expected to fail cleanly on this value rather than
/// silently building against whatever happened to be checked out.
pub(crate) const UNKNOWN_REMOTE_REF: &str = "unknownRemoteRefForPullReq";

/// Sentinel submodule URL used when a `.gitmodules` entry's own remote is
/// unreachable (not just missing a committed blob at this ref).
pub(crate) const INVALID_REMOTE_REPO: &str = "invalid_remote_repo";

/// The parsed form of the free-text input specification. Produced by an
/// external parser (out of scope per SPEC_FULL.md §1/§6); Briareus consumes
/// this as JSON on stdin or as a file argument.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct InputDesc {
    #[serde(rename = "RL")]
    pub(crate) repos: Vec<RepoDesc>,
    #[serde(rename = "BL")]
    pub(crate) branches: Vec<BranchDesc>,
    #[serde(rename = "VAR", default)]
    pub(crate) variables: Vec<VariableDesc>,
    #[serde(rename = "RX", default)]
    pub(crate) repo_locs: Vec<RepoLoc>,
    /// Pre-formatted reporting-logic fact lines (`project_owner(...)`,
    /// `action_type(...)`), supplied verbatim by the input parser. Treated
    /// as opaque text, not a typed record, matching the original parser's
    /// own treatment of the `Reporting.logic` block.
    #[serde(rename = "REP", default)]
    pub(crate) reporting_logic: Option<String>,
    #[serde(rename = "PNAME", default)]
    pub(crate) project_name: Option<String>,
}

impl InputDesc {
    /// The project repo, i.e. the one `RepoDesc` flagged `project_repo`.
    ///
    /// Input parsers are expected to flag exactly one repo as the project
    /// repo before handing an `InputDesc` to Briareus; the first declared
    /// repo is used as a fallback so that a parser which didn't bother is
    /// still usable for single-repo projects.
    pub(crate) fn project_repo(&self) -> Option<&RepoDesc> {
        self.repos
            .iter()
            .find(|r| r.project_repo)
            .or_else(|| self.repos.first())
    }

    /// The project's display name: the explicit `PNAME`, or else the
    /// project repo's own name.
    pub(crate) fn project_name(&self) -> Option<&str> {
        self.project_name
            .as_deref()
            .filter(|n| !n.is_empty())
            .or_else(|| self.project_repo().map(|r| r.name.as_str()))
    }
}

/// One result entry as reported by the external build system, keyed by
/// jobset name (see `BldConfig::jobset_name`).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub(crate) struct BuilderResult {
    pub(crate) buildname: String,
    pub(crate) nrtotal: u32,
    pub(crate) nrsucceeded: u32,
    pub(crate) nrfailed: u32,
    pub(crate) nrscheduled: u32,
    #[serde(default)]
    pub(crate) cfgerror: bool,
}

/// One entry in a persisted report, read back in as "prior state" on the
/// next run and re-emitted (possibly with an updated `status`) as part of
/// the new report.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct StatusReport {
    pub(crate) buildname: String,
    pub(crate) status: BuildStatus,
    pub(crate) count: Option<usize>,
    /// Recipients a notification has already been delivered to for the
    /// current `status`; suppresses re-sending an unchanged notification.
    #[serde(default)]
    pub(crate) sent_to: Vec<String>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BuildStatus {
    InitialSuccess,
    Succeeded,
    Fixed,
    Failed,
    Pending,
    BadConfig,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repo_desc_equality_ignores_url() {
        let a = RepoDesc::new("R1", "https://example.com/a.git");
        let b = RepoDesc::new("R1", "https://example.com/b.git");
        assert_eq!(a, b);
    }

    #[test]
    fn repo_desc_default_main_branch() {
        let raw = r#"{"name":"R1","url":"u"}"#;
        let repo: RepoDesc = serde_json::from_str(raw).unwrap();
        assert_eq!(repo.main_branch, "master");
    }

    #[test]
    fn project_name_falls_back_to_project_repo() {
        let mut proj = RepoDesc::new("R1", "u1");
        proj.project_repo = true;
        let input = InputDesc {
            repos: vec![proj, RepoDesc::new("R2", "u2")],
            branches: vec![],
            variables: vec![],
            repo_locs: vec![],
            reporting_logic: None,
            project_name: None,
        };
        assert_eq!(input.project_name(), Some("R1"));
    }
}
