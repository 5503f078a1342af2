//! The concrete build configuration value types BCGen produces: one
//! `BldConfig` per `(branch/PR, strategy, variable assignment)` tuple in the
//! build matrix.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Which kind of top-level build request this configuration satisfies.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum BranchType {
    Regular,
    Pullreq,
}

/// Policy by which repos not directly named by the branch/PR request select
/// their ref.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Strategy {
    /// Mixed: requested branch, own main branch, or submodule pin.
    Regular,
    /// Non-PR repos take the submodule-pinned revision.
    Submodules,
    /// Non-PR repos take the tip of their own matching branch, or main.
    Heads,
    /// Emitted alongside `Regular` when the project has submodules; see
    /// SPEC_FULL.md §4.5.
    Standard,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Strategy::Regular => "regular",
            Strategy::Submodules => "submodules",
            Strategy::Heads => "HEADs",
            Strategy::Standard => "standard",
        };
        write!(f, "{s}")
    }
}

/// Human/jobset-facing description of why this configuration exists.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub(crate) enum ConfigDescription {
    /// Satisfies a plain `branchreq(P, B)`.
    BranchReq(String),
    /// A solo PR: `(repo, ident)`.
    PrSolo(String, String),
    /// A PR shared by branch name across ≥2 repos.
    PrGrouped(String),
    /// The project's own main branch.
    MainBranch,
}

/// One repo's contribution to a `BldConfig`: which ref it builds, and
/// whether that ref comes from a PR or the primary (non-PR) resolution.
#[derive(Clone, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub(crate) struct BldRepoRev {
    pub(crate) repo_name: String,
    #[serde(rename = "ref")]
    pub(crate) git_ref: String,
    /// `None` encodes the `"project_primary"` sentinel from SPEC_FULL.md §6.
    pub(crate) pullreq_id: Option<String>,
}

impl BldRepoRev {
    pub(crate) fn primary(repo_name: impl Into<String>, git_ref: impl Into<String>) -> Self {
        Self {
            repo_name: repo_name.into(),
            git_ref: git_ref.into(),
            pullreq_id: None,
        }
    }

    pub(crate) fn pullreq(
        repo_name: impl Into<String>,
        git_ref: impl Into<String>,
        pullreq_id: impl Into<String>,
    ) -> Self {
        Self {
            repo_name: repo_name.into(),
            git_ref: git_ref.into(),
            pullreq_id: Some(pullreq_id.into()),
        }
    }
}

/// One concrete entry in the build matrix.
///
/// Equality is structural (derived), matching SPEC_FULL.md §3's "Equality by
/// structural value." `blds` and `bldvars` are stored pre-sorted (by repo
/// name, then variable name) so that two configs built from the same facts
/// always compare and hash identically regardless of construction order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub(crate) struct BldConfig {
    pub(crate) project_name: String,
    pub(crate) branch_type: BranchType,
    pub(crate) branch_name: String,
    pub(crate) strategy: Strategy,
    pub(crate) description: ConfigDescription,
    pub(crate) blds: Vec<BldRepoRev>,
    pub(crate) bldvars: BTreeMap<String, String>,
}

impl BldConfig {
    /// Builds a `BldConfig`, canonicalizing `blds` ordering per the
    /// coalescing invariant in SPEC_FULL.md §4.5 rule 3.
    pub(crate) fn new(
        project_name: impl Into<String>,
        branch_type: BranchType,
        branch_name: impl Into<String>,
        strategy: Strategy,
        description: ConfigDescription,
        mut blds: Vec<BldRepoRev>,
        bldvars: BTreeMap<String, String>,
    ) -> Self {
        blds.sort_by(|a, b| a.repo_name.cmp(&b.repo_name));
        Self {
            project_name: project_name.into(),
            branch_type,
            branch_name: branch_name.into(),
            strategy,
            description,
            blds,
            bldvars,
        }
    }

    /// The jobset name used both as the `BuilderResult::buildname` key and
    /// as the Hydra jobset's dictionary key: `[PRid-]branch.strategy[-var1-var2...]`.
    pub(crate) fn jobset_name(&self) -> String {
        let mut name = String::new();

        if let ConfigDescription::PrSolo(_, ref id) | ConfigDescription::PrGrouped(ref id) =
            &self.description
        {
            name.push_str(id);
            name.push('-');
        }

        name.push_str(&self.branch_name);
        name.push('.');
        name.push_str(&self.strategy.to_string());

        for value in self.bldvars.values() {
            name.push('-');
            name.push_str(value);
        }

        name
    }

    /// `true` if this configuration resulted from a PR (solo or grouped).
    pub(crate) fn is_pullreq(&self) -> bool {
        matches!(self.branch_type, BranchType::Pullreq)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jobset_name_for_branchreq() {
        let cfg = BldConfig::new(
            "R1",
            BranchType::Regular,
            "master",
            Strategy::Heads,
            ConfigDescription::BranchReq("master".into()),
            vec![BldRepoRev::primary("R1", "abc123")],
            BTreeMap::from([
                ("c_compiler".to_string(), "gnucc".to_string()),
                ("ghcver".to_string(), "ghc865".to_string()),
            ]),
        );
        assert_eq!(cfg.jobset_name(), "master.HEADs-gnucc-ghc865");
    }

    #[test]
    fn jobset_name_for_pr_solo() {
        let cfg = BldConfig::new(
            "R1",
            BranchType::Pullreq,
            "develop",
            Strategy::Standard,
            ConfigDescription::PrSolo("R1".into(), "9".into()),
            vec![BldRepoRev::pullreq("R1", "deadbeef", "9")],
            BTreeMap::from([("ghcver".to_string(), "ghc865".to_string())]),
        );
        assert_eq!(cfg.jobset_name(), "9-develop.standard-ghc865");
    }

    #[test]
    fn equal_configs_built_in_different_bld_order_are_equal() {
        let mk = |blds: Vec<BldRepoRev>| {
            BldConfig::new(
                "R1",
                BranchType::Regular,
                "master",
                Strategy::Submodules,
                ConfigDescription::MainBranch,
                blds,
                BTreeMap::new(),
            )
        };

        let a = mk(vec![
            BldRepoRev::primary("R1", "a"),
            BldRepoRev::primary("R2", "b"),
        ]);
        let b = mk(vec![
            BldRepoRev::primary("R2", "b"),
            BldRepoRev::primary("R1", "a"),
        ]);
        assert_eq!(a, b);
    }
}
