//! Hydra jobset JSON emission (SPEC_FULL.md §6, "Builder jobset (Hydra
//! dialect, for reference)").
//!
//! Grounded on `examples/original_source/Briareus/BuildSys/Hydra.py`'s
//! `_jobset`/`_jobset_variant`/`_jobset_inputs`/`_jobset_desc`: same default
//! field values, same `variant` encoding, same `<repo>-src` input naming.
//! The original's `srcident` (an internal per-input Python identifier with
//! no Rust counterpart here) is dropped from the description string; the
//! remaining `repo:ref` text still uniquely identifies each participating
//! repo's input.

use std::collections::BTreeMap;

use serde_json::{Map, Value, json};

use crate::bldconfig::BldConfig;

/// Builds one Hydra jobset object per `BldConfig`, keyed by jobset name, with
/// `builder_conf`'s `jobset` overrides (if any) applied last.
///
/// `repo_urls` maps every participating repo name (project repo, subrepos,
/// and any PR source repos) to its clone URL, the same table `bcgen.rs` and
/// `facts.rs` draw from.
pub(crate) fn build_jobsets(
    configs: &[BldConfig],
    project_repo_name: &str,
    repo_urls: &BTreeMap<String, String>,
    builder_conf: Option<&Value>,
) -> BTreeMap<String, Value> {
    let overrides = builder_conf
        .and_then(|c| c.get("jobset"))
        .and_then(Value::as_object);

    configs
        .iter()
        .map(|config| (config.jobset_name(), jobset(config, project_repo_name, repo_urls, overrides)))
        .collect()
}

fn jobset(
    config: &BldConfig,
    project_repo_name: &str,
    repo_urls: &BTreeMap<String, String>,
    overrides: Option<&Map<String, Value>>,
) -> Value {
    let mut jobset = json!({
        "checkinterval": 600,
        "description": jobset_desc(config),
        "emailoverride": "",
        "enabled": 1,
        "enableemail": false,
        "hidden": false,
        "keepnr": 3,
        "nixexprinput": format!("{project_repo_name}-src"),
        "nixexprpath": "./release.nix",
        "schedulingshares": 1,
    });

    let mut inputs = jobset_inputs(config, repo_urls);

    if let Some(overrides) = overrides {
        let obj = jobset.as_object_mut().expect("jobset is always an object");
        for (key, value) in overrides {
            if key == "inputs" {
                continue;
            }
            obj.insert(key.clone(), value.clone());
        }
        if let Some(override_inputs) = overrides.get("inputs").and_then(Value::as_object) {
            for (key, value) in override_inputs {
                inputs.insert(key.clone(), value.clone());
            }
        }
    }

    jobset
        .as_object_mut()
        .expect("jobset is always an object")
        .insert("inputs".to_string(), Value::Object(inputs));

    jobset
}

/// `|branch=<b>|strategy=<s>[|PR]` — a string input jobsets can switch on
/// without needing to parse any of the other per-repo inputs.
fn jobset_variant(config: &BldConfig) -> String {
    let mut parts = vec![
        format!("branch={}", config.branch_name),
        format!("strategy={}", config.strategy),
    ];
    if config.is_pullreq() {
        parts.push("PR".to_string());
    }
    format!("|{}", parts.join("|"))
}

fn jobset_inputs(config: &BldConfig, repo_urls: &BTreeMap<String, String>) -> Map<String, Value> {
    let mut inputs = Map::new();

    inputs.insert(
        "variant".to_string(),
        json!({
            "emailresponsible": false,
            "type": "string",
            "value": jobset_variant(config),
        }),
    );

    for bld in &config.blds {
        let url = repo_urls
            .get(&bld.repo_name)
            .cloned()
            .unwrap_or_else(|| format!("--<unknown URL for repo {}>--", bld.repo_name));
        inputs.insert(
            format!("{}-src", bld.repo_name),
            json!({
                "emailresponsible": false,
                "type": "git",
                "value": format!("{url} {}", bld.git_ref),
            }),
        );
    }

    for (name, value) in &config.bldvars {
        inputs.insert(
            name.clone(),
            json!({
                "emailresponsible": false,
                "type": "string",
                "value": value,
            }),
        );
    }

    inputs
}

fn jobset_desc(config: &BldConfig) -> String {
    let mut parts: Vec<String> = config
        .blds
        .iter()
        .map(|bld| match &bld.pullreq_id {
            Some(id) => format!("PR{id}-{}:{}", bld.git_ref, bld.repo_name),
            None => format!("{}:{}", bld.git_ref, bld.repo_name),
        })
        .collect();
    parts.extend(config.bldvars.iter().map(|(name, value)| format!("{name}={value}")));
    format!("Build configuration: {}", parts.join(", "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bldconfig::{BldRepoRev, BranchType, ConfigDescription, Strategy};
    use std::collections::BTreeMap as Map;

    fn repo_urls() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("R1".to_string(), "https://example.com/r1.git".to_string()),
            ("R2".to_string(), "https://example.com/r2.git".to_string()),
        ])
    }

    #[test]
    fn jobset_has_expected_defaults_and_inputs() {
        let config = BldConfig::new(
            "proj",
            BranchType::Regular,
            "master",
            Strategy::Regular,
            ConfigDescription::BranchReq("master".to_string()),
            vec![
                BldRepoRev::primary("R1", "master"),
                BldRepoRev::primary("R2", "master"),
            ],
            Map::from([("ghcver".to_string(), "ghc865".to_string())]),
        );

        let jobsets = build_jobsets(&[config.clone()], "R1", &repo_urls(), None);
        let obj = jobsets.get(&config.jobset_name()).unwrap().as_object().unwrap();

        assert_eq!(obj["checkinterval"], 600);
        assert_eq!(obj["keepnr"], 3);
        assert_eq!(obj["nixexprinput"], "R1-src");
        assert_eq!(obj["nixexprpath"], "./release.nix");

        let inputs = obj["inputs"].as_object().unwrap();
        assert_eq!(inputs["R1-src"]["value"], "https://example.com/r1.git master");
        assert_eq!(inputs["ghcver"]["value"], "ghc865");
        assert_eq!(inputs["variant"]["value"], "|branch=master|strategy=regular");
    }

    #[test]
    fn builder_conf_overrides_merge_into_inputs() {
        let config = BldConfig::new(
            "proj",
            BranchType::Regular,
            "master",
            Strategy::Regular,
            ConfigDescription::BranchReq("master".to_string()),
            vec![BldRepoRev::primary("R1", "master")],
            Map::new(),
        );

        let conf = json!({
            "jobset": {
                "checkinterval": 120,
                "inputs": {
                    "extra": {"type": "string", "value": "x"}
                }
            }
        });

        let jobsets = build_jobsets(&[config.clone()], "R1", &repo_urls(), Some(&conf));
        let obj = jobsets.get(&config.jobset_name()).unwrap().as_object().unwrap();
        assert_eq!(obj["checkinterval"], 120);
        assert_eq!(obj["inputs"]["extra"]["value"], "x");
        assert_eq!(obj["inputs"]["R1-src"]["type"], "git");
    }
}
