//! JSON encoding of the Hydra jobset and the analysis report (SPEC_FULL.md
//! §6, `--json` for the report stage; the jobset stage has no alternate
//! encoding since JSON is its only wire form).
//!
//! Grounded on the teacher's `output/json/v1.rs` wrapper-and-serialize
//! idiom; there's only one report shape here, so no version wrapper is
//! needed the way zizmor's finding schema has one.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::anarep::AnaRep;

pub(crate) fn write_jobset(jobsets: &BTreeMap<String, Value>) -> String {
    serde_json::to_string_pretty(jobsets).expect("jobset map is always serializable")
}

pub(crate) fn write_report(report: &AnaRep) -> String {
    serde_json::to_string_pretty(report).expect("AnaRep is always serializable")
}
