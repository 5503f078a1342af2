//! Transforms `GatheredInfo` + `InputDesc` into the sorted, deduplicated list
//! of ground facts consumed by `bcgen.rs` (SPEC_FULL.md §4.4).
//!
//! Grounded on `examples/original_source/test/test_facts.py`'s expected fact
//! list for exact literal forms and the branch-suppression-when-pullreq
//! invariant; the nine `:- discontiguous <pred>/<arity>.` lines in that
//! fixture are Prolog-tooling declarations, not part of the fact form itself,
//! and are intentionally not reproduced here (see DESIGN.md).

use std::collections::HashSet;
use std::fmt;

use crate::gatherer::GatheredInfo;
use crate::model::InputDesc;

/// One ground fact line, already rendered in its final textual form. Kept as
/// an opaque string rather than a typed tuple: BCGen never needs to inspect
/// an individual fact's shape, only the sorted list as a whole, and the
/// `reporting_logic` lines are opaque text by construction (§4.4).
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Fact(String);

impl fmt::Display for Fact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn quoted(s: &str) -> String {
    format!("\"{s}\"")
}

/// Builds the sorted fact list for one gathered project.
pub(crate) fn build(input: &InputDesc, gathered: &GatheredInfo) -> Vec<Fact> {
    let mut facts = Vec::new();

    let Some(project_name) = input.project_name().map(str::to_string) else {
        return facts;
    };
    facts.push(Fact(format!("project({}).", quoted(&project_name))));

    for repo in &input.repos {
        facts.push(Fact(format!("repo({}).", quoted(&repo.name))));
    }
    for repo in &gathered.subrepos {
        facts.push(Fact(format!("subrepo({}).", quoted(&repo.name))));
    }

    if let Some(project_repo) = input.project_repo() {
        facts.push(Fact(format!(
            "default_main_branch({}).",
            quoted(&project_repo.main_branch)
        )));
    }

    for branch in &input.branches {
        facts.push(Fact(format!(
            "branchreq({}, {}).",
            quoted(&project_name),
            quoted(&branch.branch_name)
        )));
    }

    // A `pullreq(R, id, B)` fact suppresses the plain `branch(R, B)` fact for
    // the same pair, so a build never tries both the bare branch and the PR
    // against it (see the test fixture's note on "R2", "bugfix9").
    let pullreq_pairs: HashSet<(&str, &str)> = gathered
        .pullreqs
        .iter()
        .map(|pr| (pr.target_repo.as_str(), pr.branch.as_str()))
        .collect();

    for obs in &gathered.branches {
        if pullreq_pairs.contains(&(obs.repo_name.as_str(), obs.branch_name.as_str())) {
            continue;
        }
        facts.push(Fact(format!(
            "branch({}, {}).",
            quoted(&obs.repo_name),
            quoted(&obs.branch_name)
        )));
    }

    for pr in &gathered.pullreqs {
        facts.push(Fact(format!(
            "pullreq({}, {}, {}).",
            quoted(&pr.target_repo),
            quoted(&pr.ident),
            quoted(&pr.branch)
        )));
    }

    for sub in &gathered.submodules {
        let pr_or_primary = sub
            .pullreq_ident
            .as_deref()
            .map(quoted)
            .unwrap_or_else(|| "project_primary".to_string());
        facts.push(Fact(format!(
            "submodule({}, {}, {}, {}, {}).",
            quoted(&sub.containing_repo),
            pr_or_primary,
            quoted(&sub.branch),
            quoted(&sub.submodule_name),
            quoted(&sub.pinned_revision)
        )));
    }

    for var in &input.variables {
        facts.push(Fact(format!(
            "varname({}, {}).",
            quoted(&project_name),
            quoted(&var.variable_name)
        )));
        for value in &var.variable_values {
            facts.push(Fact(format!(
                "varvalue({}, {}, {}).",
                quoted(&project_name),
                quoted(&var.variable_name),
                quoted(value)
            )));
        }
    }

    if let Some(logic) = &input.reporting_logic {
        for line in logic.lines() {
            let line = line.trim();
            if !line.is_empty() {
                facts.push(Fact(line.to_string()));
            }
        }
    }

    facts.sort_by(|a, b| a.0.cmp(&b.0));
    facts.dedup();
    facts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gatherer::BranchObservation;
    use crate::model::{BranchDesc, PRInfo, RepoDesc, SourceUrl, VariableDesc};

    fn input_fixture() -> InputDesc {
        let mut r1 = RepoDesc::new("R1", "r1_url");
        r1.project_repo = true;
        InputDesc {
            repos: vec![r1, RepoDesc::new("R2", "r2_url")],
            branches: vec![BranchDesc {
                branch_name: "master".to_string(),
            }],
            variables: vec![VariableDesc {
                variable_name: "ghcver".to_string(),
                variable_values: vec!["ghc865".to_string()],
            }],
            repo_locs: vec![],
            reporting_logic: None,
            project_name: None,
        }
    }

    #[test]
    fn pullreq_suppresses_plain_branch_fact() {
        let input = input_fixture();
        let gathered = GatheredInfo {
            pullreqs: vec![PRInfo {
                target_repo: "R2".to_string(),
                source_url: SourceUrl::Concrete("r2_url".to_string()),
                branch: "bugfix9".to_string(),
                ident: "23".to_string(),
                title: "t".to_string(),
                user: "u".to_string(),
                email: String::new(),
            }],
            submodules: vec![],
            subrepos: vec![],
            branches: vec![BranchObservation {
                repo_name: "R2".to_string(),
                branch_name: "bugfix9".to_string(),
            }],
        };

        let facts = build(&input, &gathered);
        let rendered: Vec<String> = facts.iter().map(ToString::to_string).collect();
        assert!(rendered.contains(&r#"pullreq("R2", "23", "bugfix9")."#.to_string()));
        assert!(!rendered.contains(&r#"branch("R2", "bugfix9")."#.to_string()));
    }

    #[test]
    fn facts_are_sorted_and_deduplicated() {
        let input = input_fixture();
        let gathered = GatheredInfo::default();
        let facts = build(&input, &gathered);
        let mut sorted = facts.clone();
        sorted.sort_by(|a, b| a.0.cmp(&b.0));
        assert_eq!(facts, sorted);
    }
}
