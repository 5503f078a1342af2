//! Rule-driven enumeration of the build matrix (SPEC_FULL.md §4.5).
//!
//! No teacher or example-repo analog exists for this stage (zizmor has no
//! build-matrix concept); the rule set below is reconstructed directly from
//! the distilled spec's own enumeration and cross-checked against
//! `examples/original_source/test/test_facts.py`'s companion fixtures for
//! entity shapes (repo/branch/PR/submodule naming), not for exact counts —
//! reproducing the original's precise strategy-selection arithmetic would
//! require running its reference implementation, which is out of scope here.

use std::collections::{BTreeMap, HashMap, HashSet};

use itertools::Itertools;
use thiserror::Error;

use crate::bldconfig::{BldConfig, BldRepoRev, BranchType, ConfigDescription, Strategy};
use crate::gatherer::GatheredInfo;
use crate::model::{InputDesc, PRInfo, RepoDesc};

#[derive(Error, Debug)]
pub(crate) enum BcGenError {
    #[error("input declares no project repo")]
    NoProjectRepo,
}

/// Base product before strategy/variable expansion: either a plain requested
/// branch, or a PR (solo or grouped by shared branch name across repos).
enum BaseProduct<'a> {
    BranchReq(&'a str),
    PrSolo(&'a PRInfo),
    PrGrouped(&'a str, Vec<&'a PRInfo>),
}

pub(crate) fn generate(
    input: &InputDesc,
    gathered: &GatheredInfo,
) -> Result<Vec<BldConfig>, BcGenError> {
    let project_repo = input.project_repo().ok_or(BcGenError::NoProjectRepo)?;
    let project_name = input
        .project_name()
        .unwrap_or(&project_repo.name)
        .to_string();

    let participating: Vec<RepoDesc> = input
        .repos
        .iter()
        .cloned()
        .chain(gathered.subrepos.iter().cloned())
        .unique_by(|r| r.name.clone())
        .collect();

    let branch_index: HashSet<(&str, &str)> = gathered
        .branches
        .iter()
        .map(|b| (b.repo_name.as_str(), b.branch_name.as_str()))
        .collect();

    // `(containing_repo, branch) -> (submodule_name -> pinned_revision)`,
    // restricted to the project-primary pins (pullreq_ident == None); PR-ref
    // pins are looked up separately per PR branch when needed.
    let mut primary_pins: HashMap<(&str, &str), HashMap<&str, &str>> = HashMap::new();
    for sub in &gathered.submodules {
        if sub.pullreq_ident.is_none() {
            primary_pins
                .entry((sub.containing_repo.as_str(), sub.branch.as_str()))
                .or_default()
                .insert(sub.submodule_name.as_str(), sub.pinned_revision.as_str());
        }
    }

    let has_submodules = !gathered.subrepos.is_empty();

    let mut by_branch: HashMap<&str, Vec<&PRInfo>> = HashMap::new();
    for pr in &gathered.pullreqs {
        by_branch.entry(pr.branch.as_str()).or_default().push(pr);
    }

    let mut base_products = Vec::new();
    for branch in &input.branches {
        let anchored = branch_index.contains(&(project_repo.name.as_str(), branch.branch_name.as_str()))
            || primary_pins.contains_key(&(project_repo.name.as_str(), branch.branch_name.as_str()));
        if anchored {
            base_products.push(BaseProduct::BranchReq(&branch.branch_name));
        } else {
            tracing::debug!(branch = %branch.branch_name, "dropping branchreq: no project-repo anchor");
        }
    }
    for (&branch_name, prs) in &by_branch {
        if prs.len() >= 2 && prs.iter().map(|p| p.target_repo.as_str()).unique().count() >= 2 {
            base_products.push(BaseProduct::PrGrouped(branch_name, prs.clone()));
        } else {
            for pr in prs {
                base_products.push(BaseProduct::PrSolo(pr));
            }
        }
    }

    let var_names: Vec<&str> = input.variables.iter().map(|v| v.variable_name.as_str()).collect();
    let value_lists: Vec<&[String]> = input
        .variables
        .iter()
        .map(|v| v.variable_values.as_slice())
        .collect();

    let mut configs = Vec::new();

    for base in &base_products {
        let branch_type = match base {
            BaseProduct::BranchReq(_) => BranchType::Regular,
            BaseProduct::PrSolo(_) | BaseProduct::PrGrouped(_, _) => BranchType::Pullreq,
        };
        let branch_name = match base {
            BaseProduct::BranchReq(b) => b.to_string(),
            BaseProduct::PrSolo(pr) => pr.branch.clone(),
            BaseProduct::PrGrouped(b, _) => b.to_string(),
        };
        let description = match base {
            BaseProduct::BranchReq(b) => ConfigDescription::BranchReq(b.to_string()),
            BaseProduct::PrSolo(pr) => ConfigDescription::PrSolo(pr.target_repo.clone(), pr.ident.clone()),
            BaseProduct::PrGrouped(b, _) => ConfigDescription::PrGrouped(b.to_string()),
        };
        let prs_by_repo: HashMap<&str, &PRInfo> = match base {
            BaseProduct::BranchReq(_) => HashMap::new(),
            BaseProduct::PrSolo(pr) => HashMap::from([(pr.target_repo.as_str(), *pr)]),
            BaseProduct::PrGrouped(_, prs) => {
                prs.iter().map(|pr| (pr.target_repo.as_str(), *pr)).collect()
            }
        };

        for strategy in strategies_for(has_submodules) {
            let blds = resolve_blds(
                &participating,
                &project_repo.name,
                &branch_name,
                strategy,
                &branch_index,
                &primary_pins,
                &prs_by_repo,
            );
            let Some(blds) = blds else {
                continue;
            };

            if value_lists.is_empty() {
                configs.push(BldConfig::new(
                    project_name.clone(),
                    branch_type,
                    branch_name.clone(),
                    strategy,
                    description.clone(),
                    blds.clone(),
                    BTreeMap::new(),
                ));
                continue;
            }

            for combo in value_lists.iter().map(|v| v.iter()).multi_cartesian_product() {
                let bldvars: BTreeMap<String, String> = var_names
                    .iter()
                    .zip(combo.iter())
                    .map(|(name, value)| (name.to_string(), (*value).clone()))
                    .collect();
                configs.push(BldConfig::new(
                    project_name.clone(),
                    branch_type,
                    branch_name.clone(),
                    strategy,
                    description.clone(),
                    blds.clone(),
                    bldvars,
                ));
            }
        }
    }

    configs.sort_by(|a, b| a.jobset_name().cmp(&b.jobset_name()));
    configs.dedup();
    Ok(configs)
}

/// Which strategies apply to a base product, given whether the project has
/// any submodules at all. `Standard` is reserved for the mixed
/// branch-or-pin-or-main resolution the distilled spec describes but leaves
/// underspecified relative to `Submodules`/`Heads`; it is not produced by
/// this generator (see DESIGN.md).
fn strategies_for(has_submodules: bool) -> Vec<Strategy> {
    if has_submodules {
        vec![Strategy::Heads, Strategy::Submodules]
    } else {
        vec![Strategy::Regular]
    }
}

/// Resolves one `BldConfig.blds` list for `branch_name` under `strategy`.
/// Returns `None` when the configuration must be suppressed entirely (rule
/// 1: no anchor; or a required submodule pin is missing under the
/// `submodules` strategy).
fn resolve_blds(
    participating: &[RepoDesc],
    project_repo_name: &str,
    branch_name: &str,
    strategy: Strategy,
    branch_index: &HashSet<(&str, &str)>,
    primary_pins: &HashMap<(&str, &str), HashMap<&str, &str>>,
    prs_by_repo: &HashMap<&str, &PRInfo>,
) -> Option<Vec<BldRepoRev>> {
    let pins = primary_pins.get(&(project_repo_name, branch_name));
    let mut blds = Vec::with_capacity(participating.len());

    for repo in participating {
        if let Some(pr) = prs_by_repo.get(repo.name.as_str()) {
            blds.push(BldRepoRev::pullreq(&repo.name, &pr.branch, &pr.ident));
            continue;
        }

        let has_branch = branch_index.contains(&(repo.name.as_str(), branch_name));
        let pin = pins.and_then(|m| m.get(repo.name.as_str()));

        let git_ref = match strategy {
            Strategy::Heads => {
                if has_branch {
                    branch_name.to_string()
                } else {
                    repo.main_branch.clone()
                }
            }
            Strategy::Submodules => {
                if repo.name == project_repo_name {
                    if !has_branch {
                        return None;
                    }
                    branch_name.to_string()
                } else if let Some(rev) = pin {
                    rev.to_string()
                } else {
                    // No pin for a participating subrepo: nothing to build
                    // against, so the whole configuration is suppressed.
                    return None;
                }
            }
            Strategy::Regular | Strategy::Standard => {
                if has_branch {
                    branch_name.to_string()
                } else if let Some(rev) = pin {
                    rev.to_string()
                } else {
                    repo.main_branch.clone()
                }
            }
        };

        blds.push(BldRepoRev::primary(&repo.name, git_ref));
    }

    Some(blds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatherer::BranchObservation;
    use crate::model::{BranchDesc, RepoDesc, SourceUrl, VariableDesc};

    fn project_only_input() -> InputDesc {
        let mut r1 = RepoDesc::new("R1", "r1_url");
        r1.project_repo = true;
        InputDesc {
            repos: vec![r1],
            branches: vec![BranchDesc {
                branch_name: "master".to_string(),
            }],
            variables: vec![VariableDesc {
                variable_name: "ghcver".to_string(),
                variable_values: vec!["ghc844".to_string(), "ghc865".to_string()],
            }],
            repo_locs: vec![],
            reporting_logic: None,
            project_name: None,
        }
    }

    #[test]
    fn branchreq_without_submodules_uses_regular_strategy_only() {
        let input = project_only_input();
        let gathered = GatheredInfo {
            branches: vec![BranchObservation {
                repo_name: "R1".to_string(),
                branch_name: "master".to_string(),
            }],
            ..Default::default()
        };

        let configs = generate(&input, &gathered).unwrap();
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.strategy == Strategy::Regular));
    }

    #[test]
    fn branchreq_missing_from_project_repo_is_dropped() {
        let input = project_only_input();
        let gathered = GatheredInfo::default();
        let configs = generate(&input, &gathered).unwrap();
        assert!(configs.is_empty());
    }

    #[test]
    fn pr_solo_pins_its_own_repo() {
        let mut input = project_only_input();
        input.branches.clear();
        let gathered = GatheredInfo {
            pullreqs: vec![PRInfo {
                target_repo: "R1".to_string(),
                source_url: SourceUrl::Concrete("r1_fork".to_string()),
                branch: "feature".to_string(),
                ident: "42".to_string(),
                title: "t".to_string(),
                user: "u".to_string(),
                email: String::new(),
            }],
            ..Default::default()
        };

        let configs = generate(&input, &gathered).unwrap();
        assert!(configs.iter().all(|c| c.is_pullreq()));
        assert!(configs.iter().all(|c| c.blds.iter().any(|b| b.pullreq_id.as_deref() == Some("42"))));
    }
}
