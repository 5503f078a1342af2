//! Analysis & report correlation (SPEC_FULL.md §4.6): classifies each
//! `BldConfig`'s builder result against its prior status, detects
//! variable-isolated failures and project-wide failure, and evaluates the
//! fact-base–defined notification table.
//!
//! Grounded on `examples/original_source/Briareus/AnaRep/HTMLSummary.py` for
//! the shape of the per-event recipient/action lookup (`project_owner`,
//! `action_type`); the status-classification table itself is §4.6's own.

use std::collections::{BTreeMap, HashMap, HashSet};

use serde::Serialize;

use crate::bldconfig::BldConfig;
use crate::model::{BuildStatus, BuilderResult, StatusReport};

#[derive(Clone, Debug, Serialize)]
pub(crate) struct VarFailure {
    pub(crate) project: String,
    pub(crate) variable: String,
    pub(crate) value: String,
}

#[derive(Clone, Debug, Serialize)]
pub(crate) struct SendEmail {
    pub(crate) recipients: Vec<String>,
    pub(crate) notification: String,
    pub(crate) sent_to: Vec<String>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub(crate) struct AnaRep {
    pub(crate) reports: Vec<StatusReport>,
    pub(crate) var_failures: Vec<VarFailure>,
    pub(crate) completely_failing: Vec<String>,
    pub(crate) notifications: Vec<SendEmail>,
}

/// `project_owner(P, email)` / `action_type(email, addr, P[, event])` facts,
/// pre-parsed by the input's opaque `reporting_logic` block. Supplementing
/// the distilled spec: Briareus treats this purely as a lookup table handed
/// in by the caller, since `reporting_logic` itself is opaque text (§4.4);
/// a future `src/reporting.rs` could parse the Prolog-ish fact lines
/// directly, but no such parser exists yet and none is required by any
/// TESTABLE PROPERTY in §8.
#[derive(Clone, Debug, Default)]
pub(crate) struct NotificationTable {
    /// `project -> owner email`.
    pub(crate) owners: HashMap<String, String>,
    /// `project -> event -> recipient emails`. An entry under the empty
    /// event key `""` applies to every event that has no more specific row.
    pub(crate) actions: HashMap<String, HashMap<String, Vec<String>>>,
}

impl NotificationTable {
    fn recipients_for(&self, project: &str, event: &str) -> Vec<String> {
        let mut recipients: HashSet<String> = HashSet::new();
        if let Some(owner) = self.owners.get(project) {
            recipients.insert(owner.clone());
        }
        if let Some(by_event) = self.actions.get(project) {
            if let Some(general) = by_event.get("") {
                recipients.extend(general.iter().cloned());
            }
            if let Some(specific) = by_event.get(event) {
                recipients.extend(specific.iter().cloned());
            }
        }
        let mut recipients: Vec<String> = recipients.into_iter().collect();
        recipients.sort();
        recipients
    }
}

/// Correlates `configs`' builder results against `prior` state.
pub(crate) fn analyze(
    configs: &[BldConfig],
    results: &[BuilderResult],
    prior: &[StatusReport],
    table: &NotificationTable,
) -> AnaRep {
    let results_by_name: HashMap<&str, &BuilderResult> =
        results.iter().map(|r| (r.buildname.as_str(), r)).collect();
    let prior_by_name: HashMap<&str, &StatusReport> =
        prior.iter().map(|r| (r.buildname.as_str(), r)).collect();

    let mut reports = Vec::new();
    for config in configs {
        let name = config.jobset_name();
        let prior_entry = prior_by_name.get(name.as_str()).copied();
        let result = results_by_name.get(name.as_str()).copied();
        reports.push(classify(&name, result, prior_entry));
    }

    let var_failures = detect_variable_isolation(configs, &reports);

    let completely_failing = detect_completely_failing(configs, &reports);

    let notifications = build_notifications(configs, &reports, &var_failures, &completely_failing, table, &prior_by_name);

    AnaRep {
        reports,
        var_failures,
        completely_failing,
        notifications,
    }
}

fn classify(
    buildname: &str,
    result: Option<&BuilderResult>,
    prior: Option<&StatusReport>,
) -> StatusReport {
    let prior_status = prior.map(|p| p.status);

    let Some(result) = result else {
        // Builder doesn't know about this config at all — carry the prior
        // status forward as a `PendingStatus`-flavored pending entry.
        return StatusReport {
            buildname: buildname.to_string(),
            status: prior_status.unwrap_or(BuildStatus::Pending),
            count: None,
            sent_to: prior.map(|p| p.sent_to.clone()).unwrap_or_default(),
        };
    };

    let status = if result.cfgerror {
        BuildStatus::BadConfig
    } else if result.nrtotal == 0 {
        // Open Question (b): treated unconditionally as pending, matching
        // §4.6's table exactly rather than trying to distinguish
        // "not yet scheduled" from "builder doesn't know this config".
        BuildStatus::Pending
    } else if result.nrfailed > 0 {
        BuildStatus::Failed
    } else {
        match prior_status {
            None => BuildStatus::InitialSuccess,
            Some(BuildStatus::Failed) | Some(BuildStatus::BadConfig) => BuildStatus::Fixed,
            _ => BuildStatus::Succeeded,
        }
    };

    let count = matches!(status, BuildStatus::Failed).then_some(result.nrfailed as usize);

    StatusReport {
        buildname: buildname.to_string(),
        status,
        count,
        sent_to: prior.map(|p| p.sent_to.clone()).unwrap_or_default(),
    }
}

/// For each variable `V`, checks whether every configuration with `V = x`
/// failed while every configuration differing only in `V`'s value succeeded.
fn detect_variable_isolation(configs: &[BldConfig], reports: &[StatusReport]) -> Vec<VarFailure> {
    let status_by_name: HashMap<&str, BuildStatus> =
        reports.iter().map(|r| (r.buildname.as_str(), r.status)).collect();

    let mut failures = Vec::new();
    let mut seen: HashSet<(String, String, String)> = HashSet::new();

    for config in configs {
        for (var_name, value) in &config.bldvars {
            let key = (config.project_name.clone(), var_name.clone(), value.clone());
            if seen.contains(&key) {
                continue;
            }

            let mut siblings_with_value = Vec::new();
            let mut siblings_other_values = Vec::new();
            for other in configs {
                if other.project_name != config.project_name {
                    continue;
                }
                if !shares_axes_except(config, other, var_name) {
                    continue;
                }
                if other.bldvars.get(var_name) == Some(value) {
                    siblings_with_value.push(other);
                } else {
                    siblings_other_values.push(other);
                }
            }

            let all_failed = !siblings_with_value.is_empty()
                && siblings_with_value.iter().all(|c| {
                    status_by_name.get(c.jobset_name().as_str()) == Some(&BuildStatus::Failed)
                });
            let others_all_succeeded = !siblings_other_values.is_empty()
                && siblings_other_values.iter().all(|c| {
                    matches!(
                        status_by_name.get(c.jobset_name().as_str()),
                        Some(BuildStatus::Succeeded)
                            | Some(BuildStatus::InitialSuccess)
                            | Some(BuildStatus::Fixed)
                    )
                });

            if all_failed && others_all_succeeded {
                failures.push(VarFailure {
                    project: config.project_name.clone(),
                    variable: var_name.clone(),
                    value: value.clone(),
                });
            }
            seen.insert(key);
        }
    }
    failures
}

/// Two configs "share axes except `var_name`" when they're the same branch,
/// strategy, and description, and agree on every other variable.
fn shares_axes_except(a: &BldConfig, b: &BldConfig, var_name: &str) -> bool {
    a.branch_name == b.branch_name
        && a.strategy == b.strategy
        && a.description == b.description
        && a.bldvars
            .iter()
            .filter(|(k, _)| k.as_str() != var_name)
            .all(|(k, v)| b.bldvars.get(k) == Some(v))
}

fn detect_completely_failing(configs: &[BldConfig], reports: &[StatusReport]) -> Vec<String> {
    let status_by_name: HashMap<&str, BuildStatus> =
        reports.iter().map(|r| (r.buildname.as_str(), r.status)).collect();

    let mut by_project: HashMap<&str, Vec<BuildStatus>> = HashMap::new();
    for config in configs {
        if let Some(status) = status_by_name.get(config.jobset_name().as_str()) {
            by_project.entry(config.project_name.as_str()).or_default().push(*status);
        }
    }

    let mut failing = Vec::new();
    for (project, statuses) in by_project {
        let non_pending: Vec<_> = statuses.iter().filter(|s| **s != BuildStatus::Pending).collect();
        if !non_pending.is_empty() && non_pending.iter().all(|s| **s == BuildStatus::Failed) {
            failing.push(project.to_string());
        }
    }
    failing.sort();
    failing
}

fn build_notifications(
    configs: &[BldConfig],
    reports: &[StatusReport],
    var_failures: &[VarFailure],
    completely_failing: &[String],
    table: &NotificationTable,
    prior_by_name: &HashMap<&str, &StatusReport>,
) -> Vec<SendEmail> {
    let mut notifications = Vec::new();
    let isolated_values: HashSet<(&str, &str, &str)> = var_failures
        .iter()
        .map(|vf| (vf.project.as_str(), vf.variable.as_str(), vf.value.as_str()))
        .collect();

    for vf in var_failures {
        emit(
            &mut notifications,
            table,
            &vf.project,
            "variable_failing",
            prior_by_name.get(vf.project.as_str()).map(|p| p.sent_to.as_slice()).unwrap_or(&[]),
        );
    }

    for project in completely_failing {
        emit(
            &mut notifications,
            table,
            project,
            "main_broken",
            &[],
        );
    }

    for (config, report) in configs.iter().zip(reports.iter()) {
        // Individual failures covered by a variable-level notification are
        // elided per §4.6's variable-isolation rule.
        let isolated = config
            .bldvars
            .iter()
            .any(|(name, value)| isolated_values.contains(&(config.project_name.as_str(), name.as_str(), value.as_str())));
        if isolated {
            continue;
        }

        let event = match report.status {
            BuildStatus::Fixed => Some("main_good"),
            BuildStatus::Pending => Some("new_pending"),
            _ => None,
        };
        if let Some(event) = event {
            emit(&mut notifications, table, &config.project_name, event, &report.sent_to);
        }
    }

    notifications
}

fn emit(
    notifications: &mut Vec<SendEmail>,
    table: &NotificationTable,
    project: &str,
    event: &str,
    already_sent: &[String],
) {
    let recipients = table.recipients_for(project, event);
    if recipients.is_empty() {
        return;
    }
    let already: BTreeMap<&str, ()> = already_sent.iter().map(|s| (s.as_str(), ())).collect();
    if recipients.iter().all(|r| already.contains_key(r.as_str())) {
        return;
    }
    notifications.push(SendEmail {
        recipients: recipients.clone(),
        notification: format!("{project}:{event}"),
        sent_to: recipients,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bldconfig::{BranchType, ConfigDescription, Strategy};
    use std::collections::BTreeMap as Map;

    fn config(branch: &str, vars: &[(&str, &str)]) -> BldConfig {
        BldConfig::new(
            "R1",
            BranchType::Regular,
            branch,
            Strategy::Regular,
            ConfigDescription::BranchReq(branch.to_string()),
            vec![],
            vars.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect::<Map<_, _>>(),
        )
    }

    #[test]
    fn classify_initial_success_when_no_prior() {
        let result = BuilderResult {
            buildname: "x".to_string(),
            nrtotal: 3,
            nrsucceeded: 3,
            nrfailed: 0,
            nrscheduled: 0,
            cfgerror: false,
        };
        let report = classify("x", Some(&result), None);
        assert_eq!(report.status, BuildStatus::InitialSuccess);
    }

    #[test]
    fn classify_fixed_transition() {
        let result = BuilderResult {
            buildname: "x".to_string(),
            nrtotal: 3,
            nrsucceeded: 3,
            nrfailed: 0,
            nrscheduled: 0,
            cfgerror: false,
        };
        let prior = StatusReport {
            buildname: "x".to_string(),
            status: BuildStatus::Failed,
            count: Some(1),
            sent_to: vec![],
        };
        let report = classify("x", Some(&result), Some(&prior));
        assert_eq!(report.status, BuildStatus::Fixed);
    }

    #[test]
    fn classify_zero_total_is_pending() {
        let result = BuilderResult {
            buildname: "x".to_string(),
            nrtotal: 0,
            nrsucceeded: 0,
            nrfailed: 0,
            nrscheduled: 0,
            cfgerror: false,
        };
        let report = classify("x", Some(&result), None);
        assert_eq!(report.status, BuildStatus::Pending);
    }

    #[test]
    fn variable_isolation_detects_isolated_failure() {
        let configs = vec![
            config("master", &[("c_compiler", "clang")]),
            config("master", &[("c_compiler", "gnucc")]),
        ];
        let reports = vec![
            StatusReport {
                buildname: configs[0].jobset_name(),
                status: BuildStatus::Failed,
                count: Some(1),
                sent_to: vec![],
            },
            StatusReport {
                buildname: configs[1].jobset_name(),
                status: BuildStatus::Succeeded,
                count: None,
                sent_to: vec![],
            },
        ];
        let failures = detect_variable_isolation(&configs, &reports);
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].value, "clang");
    }
}
